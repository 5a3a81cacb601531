//! # EmberKV: An Embeddable In-Memory Key-Value Store
//!
//! EmberKV is an in-process key/value store with Redis-like data types
//! (strings, lists, hashes, sets), per-key TTL, atomic conditional updates,
//! a buffered topic-based notification bus, and a transaction layer with
//! best-effort rollback.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Store                                │
//! │                                                                  │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐                 │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ ...N    │   fnv1a_32(key) │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │      mod N      │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘                 │
//! │       ▲                                   │                      │
//! │       │                                   ▼                      │
//! │  ┌────┴──────────┐              ┌──────────────────┐             │
//! │  │    Reaper     │              │ Notification bus │──► sinks    │
//! │  │ (tokio task)  │              │ (lossy fan-out)  │             │
//! │  └───────────────┘              └──────────────────┘             │
//! │                                                                  │
//! │  ┌───────────────┐              ┌──────────────────┐             │
//! │  │  Transaction  │              │      Logger      │──► file /   │
//! │  │ (deferred ops)│              │ (buffered async) │    stdout   │
//! │  └───────────────┘              └──────────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```
//! use emberkv::{Config, Context, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Store::new(Config::default()).unwrap();
//! let ctx = Context::background();
//!
//! // Strings with TTL
//! store.set(&ctx, "session:1", "alice", 60).unwrap();
//!
//! // Counters
//! store.incr(&ctx, "hits").unwrap();
//!
//! // Lists, hashes, sets
//! store.rpush(&ctx, "queue", vec!["job-1".into()]).unwrap();
//! store.hset(&ctx, "user:1", "name", "alice", 0).unwrap();
//! store.sadd(&ctx, "tags", vec!["rust".into()]).unwrap();
//!
//! // Notifications
//! let mut events = store.subscribe("session:1");
//! store.set(&ctx, "session:1", "bob", 60).unwrap();
//! assert_eq!(events.recv().await.as_deref(), Some("SET: bob"));
//!
//! // Transactions with best-effort rollback
//! let tx = store.transaction();
//! tx.set(&ctx, "a", "1", 0).unwrap();
//! tx.incr(&ctx, "hits").unwrap();
//! tx.commit().unwrap();
//!
//! store.close().await;
//! # }
//! ```
//!
//! ## Design highlights
//!
//! - **Sharded keyspace.** Keys route to one of N shards by a stable
//!   FNV-1a/32 hash; each shard has its own reader/writer lock, scoped to
//!   a single operation.
//! - **Lazy + active expiry.** Readers treat expired entries as absent
//!   (and may remove them on the spot); a background reaper samples each
//!   shard every tick, escalating when expirations cluster.
//! - **Lossy notifications.** Publishes never block: each subscriber owns
//!   a bounded buffer and misses messages once it is full.
//! - **Best-effort transactions.** Mutations are buffered with raw-entry
//!   snapshots; a failed commit compensates in reverse order. There is no
//!   cross-operation isolation.

pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod pubsub;
pub mod store;
pub mod transaction;

pub use config::Config;
pub use context::Context;
pub use error::{Result, StoreError};
pub use logger::{LogLevel, Logger};
pub use pubsub::{PubSub, Subscription};
pub use store::{Entry, Kind, Payload, Scalar, Store};
pub use transaction::Transaction;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
