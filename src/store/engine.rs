//! The store façade: a sharded, typed, TTL-aware keyspace.
//!
//! `Store` owns the shard vector, the notification bus, the logger and the
//! background reaper. Every key is routed to exactly one shard by
//! FNV-1a/32 modulo the shard count; within a shard, operations serialize
//! on the shard's reader/writer lock. Read-only operations take the shared
//! lock; anything that may insert, mutate, or lazily delete an expired
//! entry takes the exclusive lock. Locks are scoped to a single operation.
//!
//! Expiration is enforced on two paths: lazily, when an operation observes
//! an expired entry (it is treated as absent and may be removed on the
//! spot), and actively, by the reaper task sweeping shards in the
//! background.
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
//! store.set(&ctx, "name", "ember", 0).unwrap();
//! assert_eq!(store.get(&ctx, "name").unwrap().to_string(), "ember");
//!
//! store.incr(&ctx, "hits").unwrap();
//! assert_eq!(store.incr(&ctx, "hits").unwrap(), 2);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::logger::Logger;
use crate::pubsub::{PubSub, Subscription};
use crate::store::entry::{Entry, Kind, Payload, Scalar};
use crate::store::reaper::Reaper;
use crate::store::shard::{fnv1a_32, Shard};
use crate::transaction::Transaction;

struct StoreInner {
    shards: Arc<Vec<Shard>>,
    pubsub: PubSub,
    logger: Logger,
    config: Config,
    reaper: Option<Reaper>,
}

/// The embeddable key/value store.
///
/// Cheap to clone; all clones share the same keyspace, bus and reaper.
///
/// **Note:** with logging enabled or a non-zero `cleanup_interval`,
/// construction spawns background tasks and therefore must happen inside a
/// tokio runtime.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.inner.shards.len())
            .field("reaper", &self.inner.reaper.is_some())
            .finish()
    }
}

/// Converts a TTL in seconds to an absolute expiration.
/// `0` means "never expires"; negative TTLs are rejected.
fn expiration_from_ttl(ttl: i64) -> Result<Option<Instant>> {
    if ttl < 0 {
        return Err(StoreError::InvalidTtl);
    }
    if ttl == 0 {
        return Ok(None);
    }
    Ok(Some(Instant::now() + Duration::from_secs(ttl as u64)))
}

/// Renders a value vector for notification payloads.
fn format_values(values: &[Scalar]) -> String {
    let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

impl Store {
    /// Creates a store from `config`, spawning the reaper (unless
    /// `cleanup_interval` is zero) and the logger worker (if enabled).
    /// Fails only when the configured log file cannot be opened.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let config = config.normalized();

        let logger = if config.enable_logging {
            Logger::new(
                config.log_file.as_deref(),
                config.log_buffer_size,
                config.min_level,
            )?
        } else {
            Logger::disabled()
        };

        let shards: Arc<Vec<Shard>> =
            Arc::new((0..config.shard_count).map(|_| Shard::new()).collect());
        let pubsub = PubSub::new(config.pubsub_buffer_size);

        let reaper = if config.cleanup_interval > Duration::ZERO {
            Some(Reaper::start(
                Arc::clone(&shards),
                pubsub.clone(),
                logger.clone(),
                config.cleanup_interval,
            ))
        } else {
            None
        };

        logger.info(format!(
            "store started shards={} cleanup_interval={:?}",
            config.shard_count, config.cleanup_interval
        ));

        Ok(Self {
            inner: Arc::new(StoreInner {
                shards,
                pubsub,
                logger,
                config,
                reaper,
            }),
        })
    }

    /// The logger collaborator (disabled handle when logging is off).
    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// The configuration the store was built with (post-normalization).
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        (fnv1a_32(key) as usize) % self.inner.shards.len()
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard {
        &self.inner.shards[self.shard_index(key)]
    }

    /// The single cancellation poll performed at the top of every
    /// operation; never re-checked after a lock is acquired.
    fn check_ctx(&self, ctx: &Context, op: &str, key: &str) -> Result<()> {
        ctx.check().map_err(|err| {
            self.inner
                .logger
                .warn(format!("{} canceled key={}", op, key));
            err
        })
    }

    // ------------------------------------------------------------------
    // String / scalar operations
    // ------------------------------------------------------------------

    fn set_internal(
        &self,
        ctx: &Context,
        op: &str,
        key: &str,
        value: Scalar,
        ttl: i64,
        if_exists: bool,
        if_not_exists: bool,
    ) -> Result<()> {
        self.check_ctx(ctx, op, key)?;

        if key.is_empty() {
            self.inner.logger.error(format!("{}: empty key", op));
            return Err(StoreError::InvalidKey);
        }
        let expires_at = expiration_from_ttl(ttl).map_err(|err| {
            self.inner
                .logger
                .error(format!("{}: invalid ttl key={} ttl={}", op, key, ttl));
            err
        })?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        // An expired slot counts as absent for the NX/XX gates.
        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
        }
        let exists = data.contains_key(key);

        if if_exists && !exists {
            self.inner
                .logger
                .warn(format!("{}: key does not exist key={}", op, key));
            return Err(StoreError::KeyNotFound);
        }
        if if_not_exists && exists {
            self.inner
                .logger
                .warn(format!("{}: key already exists key={}", op, key));
            return Err(StoreError::KeyExists);
        }

        let rendered = value.to_string();
        data.insert(
            key.to_string(),
            Entry::with_expiration(Payload::Scalar(value), expires_at),
        );

        self.inner
            .logger
            .info(format!("{} ok key={} ttl={}", op, key, ttl));
        self.inner.pubsub.publish(key, &format!("SET: {}", rendered));
        Ok(())
    }

    /// Creates or replaces a string entry. `ttl == 0` stores without
    /// expiration. Publishes `SET: <value>` on the key's topic.
    pub fn set(&self, ctx: &Context, key: &str, value: impl Into<Scalar>, ttl: i64) -> Result<()> {
        self.set_internal(ctx, "set", key, value.into(), ttl, false, false)
    }

    /// Like [`Store::set`], but only succeeds when the key is absent (or
    /// expired). Fails with `KeyExists` otherwise.
    pub fn set_nx(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        self.set_internal(ctx, "set_nx", key, value.into(), ttl, false, true)
    }

    /// Like [`Store::set`], but only succeeds when the key is present.
    /// Fails with `KeyNotFound` otherwise.
    pub fn set_xx(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        self.set_internal(ctx, "set_xx", key, value.into(), ttl, true, false)
    }

    /// Returns the current payload of `key`.
    ///
    /// An absent key yields `KeyNotFound`. A slot whose expiration has
    /// passed yields `KeyExpired` (distinct from `KeyNotFound`) and is
    /// lazily removed under the exclusive lock.
    pub fn get(&self, ctx: &Context, key: &str) -> Result<Payload> {
        self.check_ctx(ctx, "get", key)?;

        let shard = self.shard_for(key);
        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                None => {
                    self.inner
                        .logger
                        .warn(format!("get: key not found key={}", key));
                    return Err(StoreError::KeyNotFound);
                }
                Some(entry) if !entry.is_expired() => {
                    self.inner.logger.info(format!("get ok key={}", key));
                    return Ok(entry.payload.clone());
                }
                Some(_) => {}
            }
        }

        // Observed expired under the shared lock: re-check and remove
        // under the exclusive lock, then report the expiry.
        let mut data = shard.data.write().unwrap();
        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
        }
        self.inner.logger.info(format!("get: key expired key={}", key));
        Err(StoreError::KeyExpired)
    }

    /// Compare-and-set: replaces the payload only when it currently equals
    /// `old`. The new TTL always applies. Publishes `CAS: <old> -> <new>`.
    pub fn set_cas(
        &self,
        ctx: &Context,
        key: &str,
        old: impl Into<Scalar>,
        new: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        self.check_ctx(ctx, "set_cas", key)?;
        let old = old.into();
        let new = new.into();
        let expires_at = expiration_from_ttl(ttl).map_err(|err| {
            self.inner
                .logger
                .error(format!("set_cas: invalid ttl key={} ttl={}", key, ttl));
            err
        })?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let entry = match data.get(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("set_cas: key not found key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.inner
                    .logger
                    .warn(format!("set_cas: key expired key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        if entry.payload != Payload::Scalar(old.clone()) {
            self.inner
                .logger
                .warn(format!("set_cas: value mismatch key={}", key));
            return Err(StoreError::ValueMismatch);
        }

        let rendered = format!("CAS: {} -> {}", old, new);
        data.insert(
            key.to_string(),
            Entry::with_expiration(Payload::Scalar(new), expires_at),
        );

        self.inner
            .logger
            .info(format!("set_cas ok key={} ttl={}", key, ttl));
        self.inner.pubsub.publish(key, &rendered);
        Ok(())
    }

    /// Atomically stores `value` and returns the previous payload, or
    /// `None` when the key was absent or expired. Publishes
    /// `GETSET: <old> -> <new>`.
    pub fn get_set(
        &self,
        ctx: &Context,
        key: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<Option<Payload>> {
        self.check_ctx(ctx, "get_set", key)?;
        let value = value.into();
        let expires_at = expiration_from_ttl(ttl).map_err(|err| {
            self.inner
                .logger
                .error(format!("get_set: invalid ttl key={} ttl={}", key, ttl));
            err
        })?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
        }
        let previous = data.get(key).map(|entry| entry.payload.clone());

        let old_rendered = previous
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "null".to_string());
        let message = format!("GETSET: {} -> {}", old_rendered, value);

        data.insert(
            key.to_string(),
            Entry::with_expiration(Payload::Scalar(value), expires_at),
        );

        self.inner
            .logger
            .info(format!("get_set ok key={} ttl={}", key, ttl));
        self.inner.pubsub.publish(key, &message);
        Ok(previous)
    }

    fn counter_delta(&self, ctx: &Context, op: &str, key: &str, delta: i64, check_kind: bool) -> Result<i64> {
        self.check_ctx(ctx, op, key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let absent = match data.get(key) {
            None => true,
            Some(entry) => entry.is_expired(),
        };
        if absent {
            data.insert(key.to_string(), Entry::new(Payload::Scalar(Scalar::Int(delta))));
            self.inner
                .logger
                .info(format!("{} created key={} value={}", op, key, delta));
            return Ok(delta);
        }

        let entry = match data.get_mut(key) {
            Some(entry) => entry,
            None => return Err(StoreError::KeyNotFound),
        };
        if check_kind && entry.kind() != Kind::String {
            self.inner
                .logger
                .error(format!("{}: not a string key={}", op, key));
            return Err(StoreError::InvalidType);
        }

        match &mut entry.payload {
            Payload::Scalar(Scalar::Int(current)) => {
                // Deterministic two's-complement wrap at the i64 bounds.
                *current = current.wrapping_add(delta);
                let value = *current;
                self.inner
                    .logger
                    .info(format!("{} ok key={} value={}", op, key, value));
                Ok(value)
            }
            _ => {
                self.inner
                    .logger
                    .error(format!("{}: value is not an integer key={}", op, key));
                Err(StoreError::InvalidValueType)
            }
        }
    }

    /// Increments the integer at `key` by one, creating it at `1` when
    /// absent. Non-integer payloads fail with `InvalidValueType`.
    pub fn incr(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.counter_delta(ctx, "incr", key, 1, false)
    }

    /// Decrements the integer at `key` by one, creating it at `-1` when
    /// absent.
    pub fn decr(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.counter_delta(ctx, "decr", key, -1, false)
    }

    /// Adds `delta` to the integer at `key`, creating it at `delta` when
    /// absent. Unlike [`Store::incr`], a non-string entry fails with
    /// `InvalidType` before the scalar shape is inspected.
    pub fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<i64> {
        self.counter_delta(ctx, "incr_by", key, delta, true)
    }

    /// `decr_by(k, n)` is `incr_by(k, -n)`.
    pub fn decr_by(&self, ctx: &Context, key: &str, delta: i64) -> Result<i64> {
        self.counter_delta(ctx, "decr_by", key, delta.wrapping_neg(), true)
    }

    // ------------------------------------------------------------------
    // List operations
    // ------------------------------------------------------------------

    fn push_internal(
        &self,
        ctx: &Context,
        op: &str,
        key: &str,
        values: Vec<Scalar>,
        front: bool,
    ) -> Result<()> {
        self.check_ctx(ctx, op, key)?;

        if key.is_empty() {
            self.inner.logger.error(format!("{}: empty key", op));
            return Err(StoreError::InvalidKey);
        }
        if values.is_empty() {
            self.inner
                .logger
                .warn(format!("{}: no values key={}", op, key));
            return Err(StoreError::EmptyValues);
        }

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
            self.inner
                .logger
                .info(format!("{}: removed expired key before push key={}", op, key));
        }

        match data.get_mut(key) {
            Some(entry) => match &mut entry.payload {
                Payload::List(list) => {
                    for value in &values {
                        if front {
                            list.push_front(value.clone());
                        } else {
                            list.push_back(value.clone());
                        }
                    }
                }
                _ => {
                    self.inner
                        .logger
                        .error(format!("{}: existing key is not a list key={}", op, key));
                    return Err(StoreError::InvalidType);
                }
            },
            None => {
                let mut list = VecDeque::with_capacity(values.len());
                for value in &values {
                    if front {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                data.insert(key.to_string(), Entry::new(Payload::List(list)));
            }
        }

        let tag = if front { "LPush" } else { "RPush" };
        self.inner
            .logger
            .info(format!("{} ok key={} count={}", op, key, values.len()));
        self.inner
            .pubsub
            .publish(key, &format!("{}: {}", tag, format_values(&values)));
        Ok(())
    }

    /// Pushes values onto the head of the list at `key`, creating it when
    /// absent. The first element after the push is the **last** value
    /// supplied: `lpush(k, [a, b, c])` on an empty list yields `[c, b, a]`.
    /// Publishes `LPush: <values>`.
    pub fn lpush(&self, ctx: &Context, key: &str, values: Vec<Scalar>) -> Result<()> {
        self.push_internal(ctx, "lpush", key, values, true)
    }

    /// Appends values to the tail of the list at `key` in argument order,
    /// creating it when absent. Publishes `RPush: <values>`.
    pub fn rpush(&self, ctx: &Context, key: &str, values: Vec<Scalar>) -> Result<()> {
        self.push_internal(ctx, "rpush", key, values, false)
    }

    fn pop_internal(&self, ctx: &Context, op: &str, key: &str, front: bool) -> Result<Scalar> {
        self.check_ctx(ctx, op, key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let entry = match data.get_mut(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("{}: key not found key={}", op, key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("{}: key expired key={}", op, key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        let (value, now_empty) = match &mut entry.payload {
            Payload::List(list) => {
                let popped = if front {
                    list.pop_front()
                } else {
                    list.pop_back()
                };
                match popped {
                    Some(value) => (value, list.is_empty()),
                    None => {
                        // Empty lists are deleted on the last pop, so this
                        // slot should not exist; report it defensively.
                        self.inner
                            .logger
                            .warn(format!("{}: list empty key={}", op, key));
                        return Err(StoreError::EmptyList);
                    }
                }
            }
            _ => {
                self.inner
                    .logger
                    .error(format!("{}: existing key is not a list key={}", op, key));
                return Err(StoreError::InvalidType);
            }
        };

        if now_empty {
            data.remove(key);
            self.inner
                .logger
                .info(format!("{}: removed empty list key={}", op, key));
        }

        self.inner.logger.info(format!("{} ok key={}", op, key));
        Ok(value)
    }

    /// Removes and returns the head of the list; deletes the key when the
    /// last element is popped.
    pub fn lpop(&self, ctx: &Context, key: &str) -> Result<Scalar> {
        self.pop_internal(ctx, "lpop", key, true)
    }

    /// Removes and returns the tail of the list; deletes the key when the
    /// last element is popped.
    pub fn rpop(&self, ctx: &Context, key: &str) -> Result<Scalar> {
        self.pop_internal(ctx, "rpop", key, false)
    }

    /// Length of the list at `key`.
    pub fn llen(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.check_ctx(ctx, "llen", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        let entry = match data.get(key) {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.is_expired() => return Err(StoreError::KeyNotFound),
            Some(entry) => entry,
        };
        match &entry.payload {
            Payload::List(list) => Ok(list.len()),
            _ => Err(StoreError::InvalidType),
        }
    }

    /// Returns `list[start..=end]` with Redis-style index handling:
    /// negative indices count from the end (`-1` is the last element),
    /// `start` clamps to `0`, `end` clamps to `len - 1`, and an inverted
    /// or out-of-range window yields an empty vector.
    pub fn lrange(&self, ctx: &Context, key: &str, start: i64, end: i64) -> Result<Vec<Scalar>> {
        self.check_ctx(ctx, "lrange", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        let entry = match data.get(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("lrange: key not found key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("lrange: key expired key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        let list = match &entry.payload {
            Payload::List(list) => list,
            _ => {
                self.inner
                    .logger
                    .error(format!("lrange: existing key is not a list key={}", key));
                return Err(StoreError::InvalidType);
            }
        };

        let len = list.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut end = if end < 0 { len + end } else { end };
        if start < 0 {
            start = 0;
        }
        if end >= len {
            end = len - 1;
        }
        if start > end || start >= len {
            return Ok(Vec::new());
        }

        let result: Vec<Scalar> = list
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .collect();
        self.inner.logger.info(format!(
            "lrange ok key={} start={} end={} len={}",
            key,
            start,
            end,
            result.len()
        ));
        Ok(result)
    }

    /// Returns the element at `index`; negative indices count from the
    /// end. An out-of-range index yields `KeyNotFound`, like a missing
    /// hash field.
    pub fn lindex(&self, ctx: &Context, key: &str, index: i64) -> Result<Scalar> {
        self.check_ctx(ctx, "lindex", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        let entry = match data.get(key) {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.is_expired() => return Err(StoreError::KeyNotFound),
            Some(entry) => entry,
        };
        let list = match &entry.payload {
            Payload::List(list) => list,
            _ => {
                self.inner
                    .logger
                    .error(format!("lindex: existing key is not a list key={}", key));
                return Err(StoreError::InvalidType);
            }
        };

        let len = list.len() as i64;
        let index = if index < 0 { len + index } else { index };
        if index < 0 || index >= len {
            return Err(StoreError::KeyNotFound);
        }
        list.get(index as usize)
            .cloned()
            .ok_or(StoreError::KeyNotFound)
    }

    /// Keeps only `list[start..=end]`, with the same index handling as
    /// [`Store::lrange`]. A window that selects nothing deletes the key,
    /// like the last pop.
    pub fn ltrim(&self, ctx: &Context, key: &str, start: i64, end: i64) -> Result<()> {
        self.check_ctx(ctx, "ltrim", key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let entry = match data.get_mut(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("ltrim: key not found key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("ltrim: key expired key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        let now_empty = match &mut entry.payload {
            Payload::List(list) => {
                let len = list.len() as i64;
                let mut start = if start < 0 { len + start } else { start };
                let mut end = if end < 0 { len + end } else { end };
                if start < 0 {
                    start = 0;
                }
                if end >= len {
                    end = len - 1;
                }

                if start > end || start >= len {
                    list.clear();
                } else {
                    list.truncate((end + 1) as usize);
                    for _ in 0..start {
                        list.pop_front();
                    }
                }
                list.is_empty()
            }
            _ => {
                self.inner
                    .logger
                    .error(format!("ltrim: existing key is not a list key={}", key));
                return Err(StoreError::InvalidType);
            }
        };

        if now_empty {
            data.remove(key);
            self.inner
                .logger
                .info(format!("ltrim: removed empty list key={}", key));
        }
        self.inner
            .logger
            .info(format!("ltrim ok key={} start={} end={}", key, start, end));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hash operations
    // ------------------------------------------------------------------

    /// Sets `field` in the hash at `key`, creating the hash when absent.
    ///
    /// TTL handling differs from the scalar ops: `ttl == 0` on an existing
    /// hash **preserves** its current expiration; `ttl > 0` resets it to
    /// `now + ttl`; a newly created hash takes the given TTL.
    pub fn hset(
        &self,
        ctx: &Context,
        key: &str,
        field: &str,
        value: impl Into<Scalar>,
        ttl: i64,
    ) -> Result<()> {
        self.check_ctx(ctx, "hset", key)?;
        let value = value.into();
        let expires_at = expiration_from_ttl(ttl).map_err(|err| {
            self.inner
                .logger
                .error(format!("hset: invalid ttl key={} ttl={}", key, ttl));
            err
        })?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
            self.inner
                .logger
                .info(format!("hset: removed expired key key={}", key));
        }

        match data.get_mut(key) {
            Some(entry) => match &mut entry.payload {
                Payload::Hash(fields) => {
                    fields.insert(field.to_string(), value);
                    if ttl > 0 {
                        entry.expires_at = expires_at;
                    }
                }
                _ => {
                    self.inner
                        .logger
                        .error(format!("hset: existing key is not a hash key={}", key));
                    return Err(StoreError::InvalidType);
                }
            },
            None => {
                let mut fields = HashMap::new();
                fields.insert(field.to_string(), value);
                data.insert(
                    key.to_string(),
                    Entry::with_expiration(Payload::Hash(fields), expires_at),
                );
            }
        }

        self.inner
            .logger
            .info(format!("hset ok key={} field={} ttl={}", key, field, ttl));
        Ok(())
    }

    fn with_hash<T>(
        &self,
        ctx: &Context,
        op: &str,
        key: &str,
        f: impl FnOnce(&HashMap<String, Scalar>) -> Result<T>,
    ) -> Result<T> {
        self.check_ctx(ctx, op, key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        let entry = match data.get(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("{}: key not found key={}", op, key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("{}: key expired key={}", op, key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };
        match &entry.payload {
            Payload::Hash(fields) => f(fields),
            _ => {
                self.inner
                    .logger
                    .error(format!("{}: existing key is not a hash key={}", op, key));
                Err(StoreError::InvalidType)
            }
        }
    }

    /// Returns the value of `field`; a missing field yields `KeyNotFound`.
    pub fn hget(&self, ctx: &Context, key: &str, field: &str) -> Result<Scalar> {
        self.with_hash(ctx, "hget", key, |fields| {
            fields.get(field).cloned().ok_or(StoreError::KeyNotFound)
        })
    }

    /// Removes `field`; when the hash becomes empty the key is deleted.
    pub fn hdel(&self, ctx: &Context, key: &str, field: &str) -> Result<()> {
        self.check_ctx(ctx, "hdel", key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let entry = match data.get_mut(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("hdel: key not found key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("hdel: key expired key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        let now_empty = match &mut entry.payload {
            Payload::Hash(fields) => {
                fields.remove(field);
                fields.is_empty()
            }
            _ => {
                self.inner
                    .logger
                    .error(format!("hdel: existing key is not a hash key={}", key));
                return Err(StoreError::InvalidType);
            }
        };

        if now_empty {
            data.remove(key);
            self.inner
                .logger
                .info(format!("hdel: removed empty hash key={}", key));
        }
        self.inner
            .logger
            .info(format!("hdel ok key={} field={}", key, field));
        Ok(())
    }

    /// Returns a copy of the whole hash; later store mutations are not
    /// visible through the returned map.
    pub fn hget_all(&self, ctx: &Context, key: &str) -> Result<HashMap<String, Scalar>> {
        self.with_hash(ctx, "hget_all", key, |fields| Ok(fields.clone()))
    }

    /// Whether `field` exists in the hash.
    pub fn hexists(&self, ctx: &Context, key: &str, field: &str) -> Result<bool> {
        self.with_hash(ctx, "hexists", key, |fields| Ok(fields.contains_key(field)))
    }

    /// Number of fields in the hash.
    pub fn hlen(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.with_hash(ctx, "hlen", key, |fields| Ok(fields.len()))
    }

    // ------------------------------------------------------------------
    // Set operations
    // ------------------------------------------------------------------

    /// Adds members to the set at `key`, creating it when absent. Returns
    /// how many members were newly inserted.
    pub fn sadd(&self, ctx: &Context, key: &str, members: Vec<Scalar>) -> Result<usize> {
        self.check_ctx(ctx, "sadd", key)?;

        if key.is_empty() {
            self.inner.logger.error("sadd: empty key");
            return Err(StoreError::InvalidKey);
        }
        if members.is_empty() {
            self.inner
                .logger
                .warn(format!("sadd: no members key={}", key));
            return Err(StoreError::EmptyValues);
        }

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        if data.get(key).map(Entry::is_expired).unwrap_or(false) {
            data.remove(key);
        }

        let added = match data.get_mut(key) {
            Some(entry) => match &mut entry.payload {
                Payload::Set(set) => members.into_iter().filter(|m| set.insert(m.clone())).count(),
                _ => {
                    self.inner
                        .logger
                        .error(format!("sadd: existing key is not a set key={}", key));
                    return Err(StoreError::InvalidType);
                }
            },
            None => {
                let set: HashSet<Scalar> = members.into_iter().collect();
                let added = set.len();
                data.insert(key.to_string(), Entry::new(Payload::Set(set)));
                added
            }
        };

        self.inner
            .logger
            .info(format!("sadd ok key={} added={}", key, added));
        Ok(added)
    }

    /// Removes members from the set; when it becomes empty the key is
    /// deleted. Returns how many members were actually removed.
    pub fn srem(&self, ctx: &Context, key: &str, members: Vec<Scalar>) -> Result<usize> {
        self.check_ctx(ctx, "srem", key)?;

        if members.is_empty() {
            self.inner
                .logger
                .warn(format!("srem: no members key={}", key));
            return Err(StoreError::EmptyValues);
        }

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        let entry = match data.get_mut(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("srem: key not found key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .warn(format!("srem: key expired key={}", key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) => entry,
        };

        let (removed, now_empty) = match &mut entry.payload {
            Payload::Set(set) => {
                let removed = members.iter().filter(|m| set.remove(m)).count();
                (removed, set.is_empty())
            }
            _ => {
                self.inner
                    .logger
                    .error(format!("srem: existing key is not a set key={}", key));
                return Err(StoreError::InvalidType);
            }
        };

        if now_empty {
            data.remove(key);
            self.inner
                .logger
                .info(format!("srem: removed empty set key={}", key));
        }
        self.inner
            .logger
            .info(format!("srem ok key={} removed={}", key, removed));
        Ok(removed)
    }

    fn with_set<T>(
        &self,
        ctx: &Context,
        op: &str,
        key: &str,
        f: impl FnOnce(&HashSet<Scalar>) -> Result<T>,
    ) -> Result<T> {
        self.check_ctx(ctx, op, key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        let entry = match data.get(key) {
            None => return Err(StoreError::KeyNotFound),
            Some(entry) if entry.is_expired() => return Err(StoreError::KeyNotFound),
            Some(entry) => entry,
        };
        match &entry.payload {
            Payload::Set(set) => f(set),
            _ => {
                self.inner
                    .logger
                    .error(format!("{}: existing key is not a set key={}", op, key));
                Err(StoreError::InvalidType)
            }
        }
    }

    /// All members of the set, in unspecified order.
    pub fn smembers(&self, ctx: &Context, key: &str) -> Result<Vec<Scalar>> {
        self.with_set(ctx, "smembers", key, |set| Ok(set.iter().cloned().collect()))
    }

    /// Whether `member` is in the set.
    pub fn sismember(
        &self,
        ctx: &Context,
        key: &str,
        member: impl Into<Scalar>,
    ) -> Result<bool> {
        let member = member.into();
        self.with_set(ctx, "sismember", key, |set| Ok(set.contains(&member)))
    }

    /// Cardinality of the set.
    pub fn scard(&self, ctx: &Context, key: &str) -> Result<usize> {
        self.with_set(ctx, "scard", key, |set| Ok(set.len()))
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Whether `key` is present and not expired. Never errors except on
    /// cancellation.
    pub fn exists(&self, ctx: &Context, key: &str) -> Result<bool> {
        self.check_ctx(ctx, "exists", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();
        Ok(data.get(key).map(|e| !e.is_expired()).unwrap_or(false))
    }

    /// Updates the expiration of a live entry. `ttl == 0` removes the
    /// expiration (same as [`Store::persist`]). Returns `Ok(false)`, not
    /// an error, when the key is absent or expired.
    pub fn expire(&self, ctx: &Context, key: &str, ttl: i64) -> Result<bool> {
        self.check_ctx(ctx, "expire", key)?;
        let expires_at = expiration_from_ttl(ttl).map_err(|err| {
            self.inner
                .logger
                .error(format!("expire: invalid ttl key={} ttl={}", key, ttl));
            err
        })?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        match data.get_mut(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired() => Ok(false),
            Some(entry) => {
                entry.expires_at = expires_at;
                self.inner
                    .logger
                    .info(format!("expire ok key={} ttl={}", key, ttl));
                Ok(true)
            }
        }
    }

    /// Clears the expiration. Returns `true` only when the entry existed,
    /// was not expired, and actually had a finite expiration.
    pub fn persist(&self, ctx: &Context, key: &str) -> Result<bool> {
        self.check_ctx(ctx, "persist", key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        match data.get_mut(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired() => Ok(false),
            Some(entry) => {
                if entry.expires_at.is_none() {
                    return Ok(false);
                }
                entry.expires_at = None;
                self.inner.logger.info(format!("persist ok key={}", key));
                Ok(true)
            }
        }
    }

    /// The container kind of the entry at `key`.
    pub fn key_type(&self, ctx: &Context, key: &str) -> Result<Kind> {
        self.check_ctx(ctx, "key_type", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        match data.get(key) {
            None => Err(StoreError::KeyNotFound),
            Some(entry) if entry.is_expired() => Err(StoreError::KeyNotFound),
            Some(entry) => Ok(entry.kind()),
        }
    }

    /// Returns the payload together with its remaining TTL in whole
    /// seconds (`-1` when the entry never expires). Distinguishes
    /// `KeyNotFound` (no slot) from `KeyExpired` (slot past its expiry).
    pub fn get_with_details(&self, ctx: &Context, key: &str) -> Result<(Payload, i64)> {
        self.check_ctx(ctx, "get_with_details", key)?;

        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();

        match data.get(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("get_with_details: key not found key={}", key));
                Err(StoreError::KeyNotFound)
            }
            Some(entry) if entry.is_expired() => {
                self.inner
                    .logger
                    .info(format!("get_with_details: key expired key={}", key));
                Err(StoreError::KeyExpired)
            }
            Some(entry) => Ok((entry.payload.clone(), entry.ttl_seconds())),
        }
    }

    /// Moves the entry at `old_key` to `new_key`.
    ///
    /// Locking: when both keys land in the same shard its lock is taken
    /// once; otherwise the old key's shard is locked first, then the new
    /// key's, always in that order. Identical keys are a no-op success.
    /// Publishes `RENAMED` on the old key and `CREATED (via rename)` on
    /// the new one.
    pub fn rename(&self, ctx: &Context, old_key: &str, new_key: &str) -> Result<()> {
        self.check_ctx(ctx, "rename", old_key)?;

        if old_key.is_empty() || new_key.is_empty() {
            self.inner.logger.error("rename: empty key");
            return Err(StoreError::InvalidKey);
        }
        if old_key == new_key {
            self.inner
                .logger
                .warn(format!("rename: keys are identical key={}", old_key));
            return Ok(());
        }

        let old_index = self.shard_index(old_key);
        let new_index = self.shard_index(new_key);

        if old_index == new_index {
            let mut data = self.inner.shards[old_index].data.write().unwrap();
            Self::move_entry(&mut data, &mut None, old_key, new_key, &self.inner.logger)?;
        } else {
            let old_shard = &self.inner.shards[old_index];
            let new_shard = &self.inner.shards[new_index];
            // Old shard before new shard, unconditionally.
            let mut old_data = old_shard.data.write().unwrap();
            let mut new_data = new_shard.data.write().unwrap();
            Self::move_entry(
                &mut old_data,
                &mut Some(&mut *new_data),
                old_key,
                new_key,
                &self.inner.logger,
            )?;
        }

        self.inner
            .logger
            .info(format!("rename ok old={} new={}", old_key, new_key));
        self.inner.pubsub.publish(old_key, "RENAMED");
        self.inner.pubsub.publish(new_key, "CREATED (via rename)");
        Ok(())
    }

    /// Shared body of same-shard and cross-shard rename. `target` is
    /// `None` when both keys live in `source`.
    fn move_entry(
        source: &mut HashMap<String, Entry>,
        target: &mut Option<&mut HashMap<String, Entry>>,
        old_key: &str,
        new_key: &str,
        logger: &Logger,
    ) -> Result<()> {
        match source.get(old_key) {
            None => {
                logger.warn(format!("rename: source not found key={}", old_key));
                return Err(StoreError::KeyNotFound);
            }
            Some(entry) if entry.is_expired() => {
                source.remove(old_key);
                logger.warn(format!("rename: source expired key={}", old_key));
                return Err(StoreError::KeyNotFound);
            }
            Some(_) => {}
        }

        {
            let dest: &mut HashMap<String, Entry> = match target {
                Some(map) => &mut **map,
                None => &mut *source,
            };
            match dest.get(new_key) {
                Some(entry) if entry.is_expired() => {
                    dest.remove(new_key);
                }
                Some(_) => {
                    logger.warn(format!("rename: target exists key={}", new_key));
                    return Err(StoreError::KeyExists);
                }
                None => {}
            }
        }

        let Some(entry) = source.remove(old_key) else {
            return Err(StoreError::KeyNotFound);
        };
        match target {
            Some(map) => map.insert(new_key.to_string(), entry),
            None => source.insert(new_key.to_string(), entry),
        };
        Ok(())
    }

    /// Scans every shard in sequence (shared lock each, never
    /// simultaneously) for live entries whose scalar payload equals
    /// `value`. Container payloads never match. An empty result is
    /// `KeyNotFound`. The result is a best-effort snapshot with no
    /// cross-shard atomicity.
    pub fn find_by_value(&self, ctx: &Context, value: impl Into<Scalar>) -> Result<Vec<String>> {
        self.check_ctx(ctx, "find_by_value", "")?;
        let value = value.into();

        let mut keys = Vec::new();
        for shard in self.inner.shards.iter() {
            let data = shard.data.read().unwrap();
            for (key, entry) in data.iter() {
                if !entry.is_expired() && entry.payload.as_scalar() == Some(&value) {
                    keys.push(key.clone());
                }
            }
        }

        if keys.is_empty() {
            self.inner
                .logger
                .warn(format!("find_by_value: no keys match value={}", value));
            return Err(StoreError::KeyNotFound);
        }
        self.inner
            .logger
            .info(format!("find_by_value ok matches={}", keys.len()));
        Ok(keys)
    }

    /// Removes the entry at `key`; an absent (or expired) key is
    /// `KeyNotFound`. Publishes `DELETE`.
    pub fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.check_ctx(ctx, "delete", key)?;

        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();

        match data.get(key) {
            None => {
                self.inner
                    .logger
                    .warn(format!("delete: key not found key={}", key));
                Err(StoreError::KeyNotFound)
            }
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.inner
                    .logger
                    .warn(format!("delete: key expired key={}", key));
                Err(StoreError::KeyNotFound)
            }
            Some(_) => {
                data.remove(key);
                self.inner.logger.info(format!("delete ok key={}", key));
                self.inner.pubsub.publish(key, "DELETE");
                Ok(())
            }
        }
    }

    /// Removes every entry in every shard, publishing `FLUSH_ALL` once per
    /// removed key. Shards are flushed one at a time; observers may see
    /// partial progress, and a busy bus may drop some of the
    /// notifications.
    pub fn drop_all(&self, ctx: &Context) -> Result<()> {
        self.check_ctx(ctx, "drop_all", "")?;

        for shard in self.inner.shards.iter() {
            let mut data = shard.data.write().unwrap();
            for key in data.keys() {
                self.inner.pubsub.publish(key, "FLUSH_ALL");
            }
            data.clear();
        }

        self.inner.logger.info("drop_all ok: all keys removed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Raw entry access (transaction snapshots)
    // ------------------------------------------------------------------

    /// Deep-copies the raw entry at `key`, expiration included. Expired
    /// slots read as absent. Transaction snapshots only.
    pub(crate) fn get_raw_entry(&self, key: &str) -> Option<Entry> {
        let shard = self.shard_for(key);
        let data = shard.data.read().unwrap();
        match data.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.clone()),
            _ => None,
        }
    }

    /// Unconditionally writes `entry` at `key`, kind and expiration
    /// included, without publishing. Transaction rollbacks only.
    pub(crate) fn restore_raw_entry(&self, key: &str, entry: Entry) {
        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();
        data.insert(key.to_string(), entry);
    }

    /// Silently removes the slot at `key`, without publishing. Transaction
    /// rollbacks only.
    pub(crate) fn remove_raw_entry(&self, key: &str) {
        let shard = self.shard_for(key);
        let mut data = shard.data.write().unwrap();
        data.remove(key);
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Attaches a new subscriber sink to `key`'s topic.
    pub fn subscribe(&self, key: &str) -> Subscription {
        self.inner.logger.debug(format!("subscribe key={}", key));
        self.inner.pubsub.subscribe(key)
    }

    /// Detaches a subscriber sink; it observes end-of-stream after its
    /// buffered messages drain.
    pub fn unsubscribe(&self, sub: &Subscription) {
        self.inner
            .logger
            .debug(format!("unsubscribe key={}", sub.topic()));
        self.inner.pubsub.unsubscribe(sub);
    }

    /// Topics that currently have at least one subscriber.
    pub fn list_subscriptions(&self) -> Vec<String> {
        self.inner.pubsub.list_subscribers()
    }

    /// Tears down every subscription on `key`'s topic.
    pub fn close_all_subscriptions_for_key(&self, key: &str) {
        self.inner
            .logger
            .warn(format!("closing all subscriptions key={}", key));
        self.inner.pubsub.unsubscribe_all_for_key(key);
    }

    // ------------------------------------------------------------------
    // Transactions and shutdown
    // ------------------------------------------------------------------

    /// Starts a new transaction over this store.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Shuts the store down: stops and joins the reaper, closes every
    /// subscriber sink, then closes the logger (draining its buffer).
    pub async fn close(&self) {
        self.inner.logger.info("shutting down store");

        if let Some(reaper) = &self.inner.reaper {
            reaper.stop().await;
        }
        self.inner.pubsub.close();
        self.inner.logger.close().await;
    }
}
