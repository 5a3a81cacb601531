//! Background reaper: adaptive, sampled TTL expiration.
//!
//! A single tokio task fires on a fixed interval and sweeps each shard
//! independently. Rather than scanning whole shards, every tick examines a
//! 25% sample of a shard's entries; when more than 10% of the examined
//! entries turn out to be expired the examination budget is escalated by
//! 1.2x for the rest of that shard's sweep (aggressive mode). Candidates
//! are re-checked under the same exclusive lock before deletion so the
//! sweep never races a lazy delete or a concurrent overwrite.
//!
//! Each deletion publishes `EXPIRED` on the key's topic. Publishes are
//! non-blocking and lossy, so expiration progress never depends on
//! subscriber backpressure.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::logger::Logger;
use crate::pubsub::PubSub;
use crate::store::shard::Shard;

/// Fraction of a shard examined per tick.
const BASE_SAMPLE_FRACTION: f64 = 0.25;
/// Budget multiplier applied when a sweep turns aggressive.
const AGGRESSION_FACTOR: f64 = 1.2;
/// Expired-to-examined ratio beyond which the sweep turns aggressive.
const AGGRESSIVE_THRESHOLD: f64 = 0.1;

/// Handle to the running reaper task.
pub(crate) struct Reaper {
    shutdown_tx: watch::Sender<bool>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Spawns the reaper on the current tokio runtime.
    pub(crate) fn start(
        shards: Arc<Vec<Shard>>,
        pubsub: PubSub,
        logger: Logger,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reaper_loop(shards, pubsub, logger, interval, shutdown_rx));
        Self {
            shutdown_tx,
            handle: StdMutex::new(Some(handle)),
        }
    }

    /// Signals the task to stop and joins it. Later calls are no-ops.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper").finish_non_exhaustive()
    }
}

async fn reaper_loop(
    shards: Arc<Vec<Shard>>,
    pubsub: PubSub,
    logger: Logger,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // First tick fires one full interval after start.
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("reaper received shutdown signal");
                    logger.info("expiration reaper shutting down");
                    return;
                }
            }
        }

        let mut total_examined = 0usize;
        let mut total_deleted = 0usize;

        for shard in shards.iter() {
            let (examined, deleted) = sweep_shard(shard, &pubsub, &logger);
            total_examined += examined;
            total_deleted += deleted;
        }

        if total_deleted > 0 {
            debug!(
                examined = total_examined,
                deleted = total_deleted,
                "reaper tick"
            );
        }
        logger.info(format!(
            "reaper tick examined={} deleted={} efficiency={:.2}",
            total_examined,
            total_deleted,
            safe_divide(total_deleted, total_examined),
        ));
    }
}

/// Sweeps one shard; returns `(examined, deleted)`.
pub(crate) fn sweep_shard(shard: &Shard, pubsub: &PubSub, logger: &Logger) -> (usize, usize) {
    let check_limit = {
        let data = shard.data.read().unwrap();
        (data.len() as f64 * BASE_SAMPLE_FRACTION) as usize
    };
    if check_limit < 1 {
        return (0, 0);
    }

    let mut data = shard.data.write().unwrap();

    let mut check_limit = check_limit;
    let mut examined = 0usize;
    let mut aggressive = false;
    let mut candidates: Vec<String> = Vec::new();

    for (key, entry) in data.iter() {
        if examined >= check_limit {
            break;
        }
        examined += 1;

        if entry.is_expired() {
            candidates.push(key.clone());
            if candidates.len() > (examined as f64 * AGGRESSIVE_THRESHOLD) as usize {
                check_limit = (check_limit as f64 * AGGRESSION_FACTOR) as usize;
                aggressive = true;
            }
        }
    }

    // Re-check each candidate under the lock we still hold; a concurrent
    // overwrite between sampling and deletion must win.
    let mut deleted = 0usize;
    for key in candidates {
        let still_expired = data.get(&key).map(|e| e.is_expired()).unwrap_or(false);
        if still_expired {
            data.remove(&key);
            pubsub.publish(&key, "EXPIRED");
            deleted += 1;
        }
    }

    if deleted > 0 {
        let efficiency = safe_divide(deleted, examined);
        if aggressive {
            trace!(examined, deleted, "aggressive shard sweep");
            logger.warn(format!(
                "aggressive sweep examined={} deleted={} efficiency={:.2}",
                examined, deleted, efficiency
            ));
        } else {
            logger.debug(format!(
                "shard sweep examined={} deleted={} efficiency={:.2}",
                examined, deleted, efficiency
            ));
        }
    }

    (examined, deleted)
}

fn safe_divide(a: usize, b: usize) -> f64 {
    if b == 0 {
        0.0
    } else {
        a as f64 / b as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::{Entry, Payload};
    use std::time::Instant;

    fn expired_entry() -> Entry {
        Entry::with_expiration(
            Payload::Scalar("v".into()),
            Some(Instant::now() - Duration::from_secs(1)),
        )
    }

    fn live_entry() -> Entry {
        Entry::new(Payload::Scalar("v".into()))
    }

    fn fill(shard: &Shard, expired: usize, live: usize) {
        let mut data = shard.data.write().unwrap();
        for i in 0..expired {
            data.insert(format!("expired-{}", i), expired_entry());
        }
        for i in 0..live {
            data.insert(format!("live-{}", i), live_entry());
        }
    }

    #[test]
    fn test_sweep_skips_tiny_shards() {
        let shard = Shard::new();
        fill(&shard, 2, 1);
        // 3 keys * 0.25 < 1, so nothing is even examined.
        let (examined, deleted) = sweep_shard(&shard, &PubSub::new(8), &Logger::disabled());
        assert_eq!((examined, deleted), (0, 0));
    }

    #[test]
    fn test_sweep_deletes_expired_entries() {
        let shard = Shard::new();
        fill(&shard, 100, 0);
        let (examined, deleted) = sweep_shard(&shard, &PubSub::new(8), &Logger::disabled());
        assert!(examined >= 25);
        assert_eq!(deleted, examined);
        assert_eq!(shard.data.read().unwrap().len(), 100 - deleted);
    }

    #[test]
    fn test_sweep_escalates_on_heavy_expiry() {
        let shard = Shard::new();
        // Everything expired: the sweep should escalate past the base 25
        // examination budget of a 100-key shard.
        fill(&shard, 100, 0);
        let (examined, _) = sweep_shard(&shard, &PubSub::new(8), &Logger::disabled());
        assert!(examined > 25, "examined {} entries without escalation", examined);
    }

    #[test]
    fn test_sweep_leaves_live_entries() {
        let shard = Shard::new();
        fill(&shard, 0, 100);
        let (examined, deleted) = sweep_shard(&shard, &PubSub::new(8), &Logger::disabled());
        assert_eq!(examined, 25);
        assert_eq!(deleted, 0);
        assert_eq!(shard.data.read().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_sweep_publishes_expired() {
        let shard = Shard::new();
        let pubsub = PubSub::new(8);
        // Enough keys that the 25% sample is non-empty.
        fill(&shard, 4, 0);
        let mut subs: Vec<_> = (0..4)
            .map(|i| pubsub.subscribe(&format!("expired-{}", i)))
            .collect();

        let (_, deleted) = sweep_shard(&shard, &pubsub, &Logger::disabled());
        assert!(deleted >= 1);

        let received: usize = subs
            .iter_mut()
            .filter_map(|s| s.try_recv())
            .filter(|m| m == "EXPIRED")
            .count();
        assert_eq!(received, deleted);
    }

    #[tokio::test]
    async fn test_reaper_stop_joins_task() {
        let shards = Arc::new(vec![Shard::new()]);
        let reaper = Reaper::start(
            Arc::clone(&shards),
            PubSub::new(8),
            Logger::disabled(),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        reaper.stop().await;
        reaper.stop().await;
    }
}
