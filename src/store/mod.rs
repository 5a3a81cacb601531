//! Storage engine: the sharded keyspace, the typed entry model, and the
//! background expiration reaper.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Store                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ ...N    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └────────────────────────────────────────────────────────────┘
//!                 ▲                          │
//!                 │                          ▼
//!     ┌───────────┴───────────┐   ┌───────────────────┐
//!     │        Reaper         │   │  Notification bus │
//!     │ (background sampling) │   │  (EXPIRED, SET..) │
//!     └───────────────────────┘   └───────────────────┘
//! ```

pub mod engine;
pub mod entry;
pub(crate) mod reaper;
pub(crate) mod shard;

pub use engine::Store;
pub use entry::{Entry, Kind, Payload, Scalar};
