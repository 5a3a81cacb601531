//! Best-effort transactions over a live store.
//!
//! A [`Transaction`] exposes the mutating subset of the [`Store`] API, but
//! defers every mutation: each call records a command closure (executed at
//! commit) and a compensating closure built from a raw-entry snapshot of
//! the affected key, captured **at the moment the call is recorded**.
//! Commit replays the commands in order; the first failure triggers every
//! recorded compensation in reverse order and surfaces as
//! `TransactionFailed` wrapping the cause.
//!
//! Two deliberate limitations, kept for compatibility with the store's
//! contract:
//!
//! - **No read-your-writes.** Reads pass straight through to the store and
//!   observe committed state only; a `get` after a buffered `set` returns
//!   the pre-transaction value.
//! - **No isolation.** The transaction takes no shard locks while open;
//!   commit is a sequence of independently-atomic store operations, and a
//!   concurrent writer that touches the same key between snapshot and
//!   rollback may have its change overwritten by the compensation. This is
//!   best-effort rollback, not serializability.
//!
//! Conditional writes (`set_nx`, `set_xx`, `set_cas`) always record; their
//! precondition is evaluated by the store at commit time, so a conflict
//! surfaces as a failed commit followed by rollback. Operations whose
//! failure is already certain at record time (`lpop`, `rpop`, `ltrim`,
//! `hdel`, `srem`, `delete`, `rename` against an absent or wrong-kind key)
//! refuse to record instead of enqueueing a command that cannot succeed.
//!
//! # Example
//!
//! ```
//! use emberkv::{Config, Context, Store};
//! use std::time::Duration;
//!
//! let store = Store::new(Config::default().with_cleanup_interval(Duration::ZERO)).unwrap();
//! let ctx = Context::background();
//!
//! store.set(&ctx, "balance", 100i64, 0).unwrap();
//!
//! let tx = store.transaction();
//! tx.incr_by(&ctx, "balance", 50).unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(store.get(&ctx, "balance").unwrap().to_string(), "150");
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::store::entry::{Entry, Kind, Payload, Scalar};
use crate::store::Store;

type Command = Box<dyn FnOnce(&Store) -> Result<()> + Send>;
type Rollback = Box<dyn FnOnce(&Store) + Send>;

struct TxState {
    commands: Vec<Command>,
    rollbacks: Vec<Rollback>,
    active: bool,
}

/// A queue of deferred mutations with compensating rollbacks.
///
/// Not designed for concurrent use: every method serializes on the
/// transaction's own mutex, and the underlying shards are not locked for
/// the transaction's duration.
pub struct Transaction {
    store: Store,
    state: Mutex<TxState>,
}

/// Builds the compensation for one key from a snapshot taken now: restore
/// the snapshot, or delete the key if it did not exist.
fn rollback_for(key: &str, snapshot: Option<Entry>) -> Rollback {
    let key = key.to_string();
    Box::new(move |store: &Store| match snapshot {
        Some(entry) => store.restore_raw_entry(&key, entry),
        None => store.remove_raw_entry(&key),
    })
}

impl Transaction {
    pub(crate) fn new(store: Store) -> Self {
        store.logger().info("transaction started");
        Self {
            store,
            state: Mutex::new(TxState {
                commands: Vec::new(),
                rollbacks: Vec::new(),
                active: true,
            }),
        }
    }

    fn active_state(&self) -> Result<MutexGuard<'_, TxState>> {
        let state = self.state.lock().unwrap();
        if !state.active {
            return Err(StoreError::TransactionNotActive);
        }
        Ok(state)
    }

    /// Records a mutation on `key`: the command plus a compensation built
    /// from the key's current raw entry.
    fn record(&self, state: &mut TxState, key: &str, command: Command) {
        let snapshot = self.store.get_raw_entry(key);
        state.commands.push(command);
        state.rollbacks.push(rollback_for(key, snapshot));
    }

    /// Replays the recorded commands in insertion order. On the first
    /// error, every recorded compensation runs in reverse order and the
    /// commit fails with `TransactionFailed` wrapping the cause. Either
    /// way the transaction is finalized.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return Err(StoreError::TransactionNotActive);
        }

        let commands = std::mem::take(&mut state.commands);
        let mut rollbacks = Some(std::mem::take(&mut state.rollbacks));
        state.active = false;

        for command in commands {
            if let Err(err) = command(&self.store) {
                if let Some(rollbacks) = rollbacks.take() {
                    for rollback in rollbacks.into_iter().rev() {
                        rollback(&self.store);
                    }
                }
                self.store
                    .logger()
                    .warn(format!("transaction failed, rolled back: {}", err));
                return Err(StoreError::TransactionFailed(Box::new(err)));
            }
        }

        self.store.logger().info("transaction committed");
        Ok(())
    }

    /// Runs every recorded compensation in reverse order and finalizes the
    /// transaction. A no-op success when already finalized.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return Ok(());
        }

        state.commands.clear();
        let rollbacks = std::mem::take(&mut state.rollbacks);
        state.active = false;

        for rollback in rollbacks.into_iter().rev() {
            rollback(&self.store);
        }
        self.store.logger().info("transaction rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred string / scalar mutations
    // ------------------------------------------------------------------

    pub fn set(&self, ctx: &Context, key: &str, value: impl Into<Scalar>, ttl: i64) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k, value) = (ctx.clone(), key.to_string(), value.into());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.set(&ctx, &k, value, ttl)),
        );
        Ok(())
    }

    pub fn set_nx(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k, value) = (ctx.clone(), key.to_string(), value.into());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.set_nx(&ctx, &k, value, ttl)),
        );
        Ok(())
    }

    pub fn set_xx(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k, value) = (ctx.clone(), key.to_string(), value.into());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.set_xx(&ctx, &k, value, ttl)),
        );
        Ok(())
    }

    pub fn set_cas(
        &self,
        ctx: &Context,
        key: &str,
        old: impl Into<Scalar>,
        new: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        let (old, new) = (old.into(), new.into());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.set_cas(&ctx, &k, old, new, ttl)),
        );
        Ok(())
    }

    /// Defers the write and returns the key's payload as of record time
    /// (`None` when absent), matching the store's `get_set` result shape.
    pub fn get_set(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<Option<Payload>> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        let previous = snapshot.as_ref().map(|entry| entry.payload.clone());

        let (ctx, k, value) = (ctx.clone(), key.to_string(), value.into());
        state
            .commands
            .push(Box::new(move |store| store.get_set(&ctx, &k, value, ttl).map(|_| ())));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(previous)
    }

    pub fn incr(&self, ctx: &Context, key: &str) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.incr(&ctx, &k).map(|_| ())),
        );
        Ok(())
    }

    pub fn decr(&self, ctx: &Context, key: &str) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.decr(&ctx, &k).map(|_| ())),
        );
        Ok(())
    }

    pub fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.incr_by(&ctx, &k, delta).map(|_| ())),
        );
        Ok(())
    }

    pub fn decr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.decr_by(&ctx, &k, delta).map(|_| ())),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred list mutations
    // ------------------------------------------------------------------

    pub fn lpush(&self, ctx: &Context, key: &str, values: Vec<Scalar>) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.lpush(&ctx, &k, values)),
        );
        Ok(())
    }

    pub fn rpush(&self, ctx: &Context, key: &str, values: Vec<Scalar>) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.rpush(&ctx, &k, values)),
        );
        Ok(())
    }

    /// Defers the pop and returns the head as of record time. Refuses to
    /// record against an absent key or a non-list entry.
    pub fn lpop(&self, ctx: &Context, key: &str) -> Result<Scalar> {
        self.pop_deferred(ctx, key, true)
    }

    /// Defers the pop and returns the tail as of record time.
    pub fn rpop(&self, ctx: &Context, key: &str) -> Result<Scalar> {
        self.pop_deferred(ctx, key, false)
    }

    fn pop_deferred(&self, ctx: &Context, key: &str, front: bool) -> Result<Scalar> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        let value = match &snapshot {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) => match &entry.payload {
                Payload::List(list) => {
                    let end = if front { list.front() } else { list.back() };
                    end.cloned().ok_or(StoreError::EmptyList)?
                }
                _ => return Err(StoreError::InvalidType),
            },
        };

        let (ctx, k) = (ctx.clone(), key.to_string());
        state.commands.push(Box::new(move |store| {
            let result = if front {
                store.lpop(&ctx, &k)
            } else {
                store.rpop(&ctx, &k)
            };
            result.map(|_| ())
        }));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(value)
    }

    /// Refuses to record against an absent key or a non-list entry.
    pub fn ltrim(&self, ctx: &Context, key: &str, start: i64, end: i64) -> Result<()> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        match &snapshot {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.kind() != Kind::List => return Err(StoreError::InvalidType),
            Some(_) => {}
        }

        let (ctx, k) = (ctx.clone(), key.to_string());
        state
            .commands
            .push(Box::new(move |store| store.ltrim(&ctx, &k, start, end)));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred hash mutations
    // ------------------------------------------------------------------

    pub fn hset(
        &self,
        ctx: &Context,
        key: &str,
        field: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k, f, value) = (ctx.clone(), key.to_string(), field.to_string(), value.into());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.hset(&ctx, &k, &f, value, ttl)),
        );
        Ok(())
    }

    /// Refuses to record against an absent key or a non-hash entry.
    pub fn hdel(&self, ctx: &Context, key: &str, field: &str) -> Result<()> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        match &snapshot {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.kind() != Kind::Hash => return Err(StoreError::InvalidType),
            Some(_) => {}
        }

        let (ctx, k, f) = (ctx.clone(), key.to_string(), field.to_string());
        state
            .commands
            .push(Box::new(move |store| store.hdel(&ctx, &k, &f)));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred set mutations
    // ------------------------------------------------------------------

    pub fn sadd(&self, ctx: &Context, key: &str, members: Vec<Scalar>) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.sadd(&ctx, &k, members).map(|_| ())),
        );
        Ok(())
    }

    /// Refuses to record against an absent key or a non-set entry.
    pub fn srem(&self, ctx: &Context, key: &str, members: Vec<Scalar>) -> Result<()> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        match &snapshot {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.kind() != Kind::Set => return Err(StoreError::InvalidType),
            Some(_) => {}
        }

        let (ctx, k) = (ctx.clone(), key.to_string());
        state
            .commands
            .push(Box::new(move |store| store.srem(&ctx, &k, members).map(|_| ())));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred lifecycle mutations
    // ------------------------------------------------------------------

    pub fn expire(&self, ctx: &Context, key: &str, ttl: i64) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.expire(&ctx, &k, ttl).map(|_| ())),
        );
        Ok(())
    }

    pub fn persist(&self, ctx: &Context, key: &str) -> Result<()> {
        let mut state = self.active_state()?;
        let (ctx, k) = (ctx.clone(), key.to_string());
        self.record(
            &mut state,
            key,
            Box::new(move |store| store.persist(&ctx, &k).map(|_| ())),
        );
        Ok(())
    }

    /// Snapshots **both** keys so the compensation can restore or delete
    /// each independently. Refuses to record when the source is absent.
    pub fn rename(&self, ctx: &Context, old_key: &str, new_key: &str) -> Result<()> {
        let mut state = self.active_state()?;

        let old_snapshot = self.store.get_raw_entry(old_key);
        if old_snapshot.is_none() {
            return Err(StoreError::KeyNotFound);
        }
        let new_snapshot = self.store.get_raw_entry(new_key);

        let (ctx, old, new) = (ctx.clone(), old_key.to_string(), new_key.to_string());
        state
            .commands
            .push(Box::new(move |store| store.rename(&ctx, &old, &new)));
        // Reverse-order rollback restores the target first, then the source.
        state.rollbacks.push(rollback_for(old_key, old_snapshot));
        state.rollbacks.push(rollback_for(new_key, new_snapshot));
        Ok(())
    }

    /// Refuses to record against an absent key.
    pub fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        let mut state = self.active_state()?;

        let snapshot = self.store.get_raw_entry(key);
        if snapshot.is_none() {
            return Err(StoreError::KeyNotFound);
        }

        let (ctx, k) = (ctx.clone(), key.to_string());
        state
            .commands
            .push(Box::new(move |store| store.delete(&ctx, &k)));
        state.rollbacks.push(rollback_for(key, snapshot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-through operations (committed state only; a transaction never
    // observes its own buffered writes)
    // ------------------------------------------------------------------

    pub fn get(&self, ctx: &Context, key: &str) -> Result<Payload> {
        self.active_state()?;
        self.store.get(ctx, key)
    }

    pub fn llen(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.active_state()?;
        self.store.llen(ctx, key)
    }

    pub fn lrange(&self, ctx: &Context, key: &str, start: i64, end: i64) -> Result<Vec<Scalar>> {
        self.active_state()?;
        self.store.lrange(ctx, key, start, end)
    }

    pub fn lindex(&self, ctx: &Context, key: &str, index: i64) -> Result<Scalar> {
        self.active_state()?;
        self.store.lindex(ctx, key, index)
    }

    pub fn hget(&self, ctx: &Context, key: &str, field: &str) -> Result<Scalar> {
        self.active_state()?;
        self.store.hget(ctx, key, field)
    }

    pub fn hget_all(&self, ctx: &Context, key: &str) -> Result<HashMap<String, Scalar>> {
        self.active_state()?;
        self.store.hget_all(ctx, key)
    }

    pub fn hexists(&self, ctx: &Context, key: &str, field: &str) -> Result<bool> {
        self.active_state()?;
        self.store.hexists(ctx, key, field)
    }

    pub fn hlen(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.active_state()?;
        self.store.hlen(ctx, key)
    }

    pub fn smembers(&self, ctx: &Context, key: &str) -> Result<Vec<Scalar>> {
        self.active_state()?;
        self.store.smembers(ctx, key)
    }

    pub fn sismember(&self, ctx: &Context, key: &str, member: impl Into<Scalar>) -> Result<bool> {
        self.active_state()?;
        self.store.sismember(ctx, key, member)
    }

    pub fn scard(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.active_state()?;
        self.store.scard(ctx, key)
    }

    pub fn exists(&self, ctx: &Context, key: &str) -> Result<bool> {
        self.active_state()?;
        self.store.exists(ctx, key)
    }

    pub fn key_type(&self, ctx: &Context, key: &str) -> Result<Kind> {
        self.active_state()?;
        self.store.key_type(ctx, key)
    }

    pub fn get_with_details(&self, ctx: &Context, key: &str) -> Result<(Payload, i64)> {
        self.active_state()?;
        self.store.get_with_details(ctx, key)
    }

    pub fn find_by_value(&self, ctx: &Context, value: impl Into<Scalar>) -> Result<Vec<String>> {
        self.active_state()?;
        self.store.find_by_value(ctx, value)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Transaction")
            .field("active", &state.active)
            .field("commands", &state.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn test_store() -> Store {
        Store::new(Config::default().with_cleanup_interval(Duration::ZERO)).unwrap()
    }

    fn ctx() -> Context {
        Context::background()
    }

    fn get_str(store: &Store, key: &str) -> String {
        store.get(&ctx(), key).unwrap().to_string()
    }

    #[test]
    fn test_commit_applies_buffered_set() {
        let store = test_store();
        store.set(&ctx(), "x", "before", 0).unwrap();

        let tx = store.transaction();
        tx.set(&ctx(), "x", "after", 0).unwrap();
        assert_eq!(get_str(&store, "x"), "before");

        tx.commit().unwrap();
        assert_eq!(get_str(&store, "x"), "after");
    }

    #[test]
    fn test_commit_runs_commands_in_order() {
        let store = test_store();
        let tx = store.transaction();
        tx.set(&ctx(), "k", "first", 0).unwrap();
        tx.set(&ctx(), "k", "second", 0).unwrap();
        tx.commit().unwrap();
        assert_eq!(get_str(&store, "k"), "second");
    }

    #[test]
    fn test_nx_conflict_fails_commit_and_rolls_back() {
        let store = test_store();
        store.set(&ctx(), "k", "A", 0).unwrap();

        let tx = store.transaction();
        tx.set_nx(&ctx(), "k", "B", 0).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_transaction_failed());
        assert!(err.is_key_exists());
        assert_eq!(get_str(&store, "k"), "A");
    }

    #[test]
    fn test_failed_commit_undoes_applied_commands() {
        let store = test_store();
        store.set(&ctx(), "a", "original", 0).unwrap();
        store.set(&ctx(), "conflict", "present", 0).unwrap();

        let tx = store.transaction();
        tx.set(&ctx(), "a", "modified", 0).unwrap();
        tx.set(&ctx(), "fresh", "created", 0).unwrap();
        tx.set_nx(&ctx(), "conflict", "boom", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());

        // The first two commands were applied, then compensated: "a" is
        // back to its snapshot and "fresh" was deleted again.
        assert_eq!(get_str(&store, "a"), "original");
        assert!(!store.exists(&ctx(), "fresh").unwrap());
        assert_eq!(get_str(&store, "conflict"), "present");
    }

    #[test]
    fn test_xx_on_absent_key_fails_commit() {
        let store = test_store();
        let tx = store.transaction();
        tx.set_xx(&ctx(), "ghost", "v", 0).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_transaction_failed());
        assert!(err.is_key_not_found());
        assert!(!store.exists(&ctx(), "ghost").unwrap());
    }

    #[test]
    fn test_cas_mismatch_fails_commit() {
        let store = test_store();
        store.set(&ctx(), "k", "actual", 0).unwrap();

        let tx = store.transaction();
        tx.set_cas(&ctx(), "k", "expected", "new", 0).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_value_mismatch());
        assert_eq!(get_str(&store, "k"), "actual");
    }

    #[test]
    fn test_no_read_your_writes() {
        let store = test_store();
        store.set(&ctx(), "k", "committed", 0).unwrap();

        let tx = store.transaction();
        tx.set(&ctx(), "k", "buffered", 0).unwrap();
        // The buffered write is invisible to the transaction's own read.
        assert_eq!(tx.get(&ctx(), "k").unwrap().to_string(), "committed");
        tx.commit().unwrap();
        assert_eq!(get_str(&store, "k"), "buffered");
    }

    #[test]
    fn test_explicit_rollback_discards_commands() {
        let store = test_store();
        store.set(&ctx(), "k", "keep", 0).unwrap();

        let tx = store.transaction();
        tx.set(&ctx(), "k", "discard", 0).unwrap();
        tx.rollback().unwrap();

        assert_eq!(get_str(&store, "k"), "keep");
        // Finalized: further mutations are rejected, rollback is a no-op.
        assert_eq!(
            tx.set(&ctx(), "k", "late", 0),
            Err(StoreError::TransactionNotActive)
        );
        assert_eq!(tx.rollback(), Ok(()));
    }

    #[test]
    fn test_operations_after_commit_rejected() {
        let store = test_store();
        let tx = store.transaction();
        tx.set(&ctx(), "k", "v", 0).unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.commit(), Err(StoreError::TransactionNotActive));
        assert_eq!(
            tx.incr(&ctx(), "k"),
            Err(StoreError::TransactionNotActive)
        );
        assert_eq!(tx.get(&ctx(), "k"), Err(StoreError::TransactionNotActive));
    }

    #[test]
    fn test_incr_decr_deferred() {
        let store = test_store();
        let tx = store.transaction();
        tx.incr(&ctx(), "c").unwrap();
        tx.incr(&ctx(), "c").unwrap();
        tx.decr(&ctx(), "c").unwrap();

        assert!(!store.exists(&ctx(), "c").unwrap());
        tx.commit().unwrap();
        assert_eq!(get_str(&store, "c"), "1");
    }

    #[test]
    fn test_get_set_returns_record_time_value() {
        let store = test_store();
        store.set(&ctx(), "k", "old", 0).unwrap();

        let tx = store.transaction();
        let previous = tx.get_set(&ctx(), "k", "new", 0).unwrap();
        assert_eq!(previous, Some(Payload::Scalar("old".into())));
        assert_eq!(tx.get_set(&ctx(), "absent", "v", 0).unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(get_str(&store, "k"), "new");
    }

    #[test]
    fn test_lpop_returns_head_without_mutating() {
        let store = test_store();
        store
            .rpush(&ctx(), "l", vec!["a".into(), "b".into()])
            .unwrap();

        let tx = store.transaction();
        assert_eq!(tx.lpop(&ctx(), "l").unwrap(), Scalar::from("a"));
        // Store untouched until commit.
        assert_eq!(store.llen(&ctx(), "l").unwrap(), 2);

        tx.commit().unwrap();
        assert_eq!(store.llen(&ctx(), "l").unwrap(), 1);
        assert_eq!(
            store.lrange(&ctx(), "l", 0, -1).unwrap(),
            vec![Scalar::from("b")]
        );
    }

    #[test]
    fn test_rpop_returns_tail() {
        let store = test_store();
        store
            .rpush(&ctx(), "l", vec!["a".into(), "b".into()])
            .unwrap();

        let tx = store.transaction();
        assert_eq!(tx.rpop(&ctx(), "l").unwrap(), Scalar::from("b"));
        tx.commit().unwrap();
        assert_eq!(store.llen(&ctx(), "l").unwrap(), 1);
    }

    #[test]
    fn test_pop_refuses_absent_or_wrong_kind() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(tx.lpop(&ctx(), "missing"), Err(StoreError::KeyNotFound));

        store.set(&ctx(), "s", "scalar", 0).unwrap();
        assert_eq!(tx.lpop(&ctx(), "s"), Err(StoreError::InvalidType));
        // Refused calls recorded nothing.
        tx.commit().unwrap();
        assert_eq!(get_str(&store, "s"), "scalar");
    }

    #[test]
    fn test_list_rollback_restores_deep_snapshot() {
        let store = test_store();
        store
            .rpush(&ctx(), "l", vec!["a".into(), "b".into()])
            .unwrap();

        let tx = store.transaction();
        tx.lpush(&ctx(), "l", vec!["x".into()]).unwrap();
        tx.set_nx(&ctx(), "l2", "v", 0).unwrap();
        store.set(&ctx(), "l2", "conflict", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());
        // The lpush was applied then compensated with the deep snapshot.
        assert_eq!(
            store.lrange(&ctx(), "l", 0, -1).unwrap(),
            vec![Scalar::from("a"), Scalar::from("b")]
        );
    }

    #[test]
    fn test_ltrim_deferred_commit() {
        let store = test_store();
        store
            .rpush(
                &ctx(),
                "numbers",
                vec![
                    Scalar::Int(1),
                    Scalar::Int(2),
                    Scalar::Int(3),
                    Scalar::Int(4),
                    Scalar::Int(5),
                ],
            )
            .unwrap();

        let tx = store.transaction();
        tx.ltrim(&ctx(), "numbers", 1, 2).unwrap();
        assert_eq!(store.llen(&ctx(), "numbers").unwrap(), 5);

        tx.commit().unwrap();
        assert_eq!(
            store.lrange(&ctx(), "numbers", 0, -1).unwrap(),
            vec![Scalar::Int(2), Scalar::Int(3)]
        );
    }

    #[test]
    fn test_ltrim_rollback_restores_list() {
        let store = test_store();
        store
            .rpush(
                &ctx(),
                "numbers",
                vec![
                    Scalar::Int(10),
                    Scalar::Int(20),
                    Scalar::Int(30),
                    Scalar::Int(40),
                ],
            )
            .unwrap();

        let tx = store.transaction();
        tx.ltrim(&ctx(), "numbers", 1, 2).unwrap();
        tx.rollback().unwrap();

        assert_eq!(
            store.lrange(&ctx(), "numbers", 0, -1).unwrap(),
            vec![
                Scalar::Int(10),
                Scalar::Int(20),
                Scalar::Int(30),
                Scalar::Int(40)
            ]
        );
    }

    #[test]
    fn test_ltrim_refuses_absent_or_wrong_kind() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(
            tx.ltrim(&ctx(), "missing", 0, 1),
            Err(StoreError::KeyNotFound)
        );

        store.set(&ctx(), "s", "v", 0).unwrap();
        assert_eq!(tx.ltrim(&ctx(), "s", 0, 1), Err(StoreError::InvalidType));
    }

    #[test]
    fn test_hash_mutations_deferred_and_compensated() {
        let store = test_store();
        store.hset(&ctx(), "h", "f", "old", 0).unwrap();

        let tx = store.transaction();
        tx.hset(&ctx(), "h", "f", "new", 0).unwrap();
        tx.hset(&ctx(), "h", "g", "added", 0).unwrap();
        tx.set_nx(&ctx(), "h2", "v", 0).unwrap();
        store.set(&ctx(), "h2", "conflict", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());
        assert_eq!(store.hget(&ctx(), "h", "f").unwrap(), Scalar::from("old"));
        assert!(!store.hexists(&ctx(), "h", "g").unwrap());
    }

    #[test]
    fn test_hdel_refuses_absent() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(
            tx.hdel(&ctx(), "missing", "f"),
            Err(StoreError::KeyNotFound)
        );

        store.set(&ctx(), "s", "v", 0).unwrap();
        assert_eq!(tx.hdel(&ctx(), "s", "f"), Err(StoreError::InvalidType));
    }

    #[test]
    fn test_set_mutations_deferred() {
        let store = test_store();
        let tx = store.transaction();
        tx.sadd(&ctx(), "s", vec!["a".into(), "b".into()]).unwrap();
        assert!(!store.exists(&ctx(), "s").unwrap());

        tx.commit().unwrap();
        assert_eq!(store.scard(&ctx(), "s").unwrap(), 2);
    }

    #[test]
    fn test_srem_refuses_absent() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(
            tx.srem(&ctx(), "missing", vec!["a".into()]),
            Err(StoreError::KeyNotFound)
        );
    }

    #[test]
    fn test_delete_deferred_with_restore_on_failure() {
        let store = test_store();
        store.set(&ctx(), "doomed", "payload", 0).unwrap();
        store.set(&ctx(), "conflict", "present", 0).unwrap();

        let tx = store.transaction();
        tx.delete(&ctx(), "doomed").unwrap();
        tx.set_nx(&ctx(), "conflict", "boom", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());
        assert_eq!(get_str(&store, "doomed"), "payload");
    }

    #[test]
    fn test_delete_refuses_absent() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(tx.delete(&ctx(), "missing"), Err(StoreError::KeyNotFound));
    }

    #[test]
    fn test_rename_compensates_both_keys() {
        let store = test_store();
        store.set(&ctx(), "src", "v", 0).unwrap();
        store.set(&ctx(), "conflict", "present", 0).unwrap();

        let tx = store.transaction();
        tx.rename(&ctx(), "src", "dst").unwrap();
        tx.set_nx(&ctx(), "conflict", "boom", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());
        // The rename was applied, then both sides were compensated.
        assert_eq!(get_str(&store, "src"), "v");
        assert!(!store.exists(&ctx(), "dst").unwrap());
    }

    #[test]
    fn test_rename_refuses_absent_source() {
        let store = test_store();
        let tx = store.transaction();
        assert_eq!(
            tx.rename(&ctx(), "missing", "dst"),
            Err(StoreError::KeyNotFound)
        );
    }

    #[test]
    fn test_expire_negative_ttl_fails_commit() {
        let store = test_store();
        store.set(&ctx(), "k", "v", 0).unwrap();

        let tx = store.transaction();
        tx.expire(&ctx(), "k", -5).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_invalid_ttl());
        assert!(err.is_transaction_failed());
    }

    #[test]
    fn test_expire_and_persist_deferred() {
        let store = test_store();
        store.set(&ctx(), "k", "v", 0).unwrap();

        let tx = store.transaction();
        tx.expire(&ctx(), "k", 100).unwrap();
        tx.commit().unwrap();

        let (_, ttl) = store.get_with_details(&ctx(), "k").unwrap();
        assert!(ttl > 0 && ttl <= 100);

        let tx = store.transaction();
        tx.persist(&ctx(), "k").unwrap();
        tx.commit().unwrap();
        let (_, ttl) = store.get_with_details(&ctx(), "k").unwrap();
        assert_eq!(ttl, -1);
    }

    #[test]
    fn test_read_through_surface() {
        let store = test_store();
        store.set(&ctx(), "k", "v", 0).unwrap();
        store.hset(&ctx(), "h", "f", "x", 0).unwrap();
        store.sadd(&ctx(), "s", vec!["m".into()]).unwrap();
        store.rpush(&ctx(), "l", vec!["a".into()]).unwrap();

        let tx = store.transaction();
        assert!(tx.exists(&ctx(), "k").unwrap());
        assert_eq!(tx.key_type(&ctx(), "k").unwrap(), Kind::String);
        assert_eq!(tx.hget(&ctx(), "h", "f").unwrap(), Scalar::from("x"));
        assert_eq!(tx.hlen(&ctx(), "h").unwrap(), 1);
        assert!(tx.hexists(&ctx(), "h", "f").unwrap());
        assert!(tx.sismember(&ctx(), "s", "m").unwrap());
        assert_eq!(tx.scard(&ctx(), "s").unwrap(), 1);
        assert_eq!(tx.llen(&ctx(), "l").unwrap(), 1);
        assert_eq!(tx.lrange(&ctx(), "l", 0, -1).unwrap().len(), 1);
        assert_eq!(tx.find_by_value(&ctx(), "v").unwrap(), vec!["k"]);
        let (_, ttl) = tx.get_with_details(&ctx(), "k").unwrap();
        assert_eq!(ttl, -1);
    }

    #[test]
    fn test_snapshot_taken_at_record_time_not_commit_time() {
        let store = test_store();
        store.set(&ctx(), "k", "at-record", 0).unwrap();

        let tx = store.transaction();
        tx.set(&ctx(), "k", "buffered", 0).unwrap();

        // A concurrent writer slips in between record and commit failure.
        store.set(&ctx(), "k", "interloper", 0).unwrap();
        tx.set_nx(&ctx(), "k2", "v", 0).unwrap();
        store.set(&ctx(), "k2", "conflict", 0).unwrap();

        assert!(tx.commit().unwrap_err().is_transaction_failed());
        // Best-effort compensation restored the record-time snapshot,
        // overwriting the interloper.
        assert_eq!(get_str(&store, "k"), "at-record");
    }
}
