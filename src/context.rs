//! Cancellation context threaded through store and transaction operations.
//!
//! Every user-facing operation polls its [`Context`] exactly once at entry:
//! if the context is canceled or its deadline has passed, the operation
//! returns [`StoreError::ContextCanceled`] without side effects. Operations
//! never re-check the context after acquiring a lock, so a cancellation
//! mid-operation does not abort it.
//!
//! A `Context` is cheaply cloneable; all clones share the same cancellation
//! state, so canceling one clone trips every holder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, StoreError};

#[derive(Debug)]
struct ContextState {
    canceled: AtomicBool,
    deadline: Option<Instant>,
}

/// A cancellation token accepted by every [`Store`](crate::Store) and
/// [`Transaction`](crate::Transaction) operation.
///
/// # Example
///
/// ```
/// use emberkv::Context;
/// use std::time::Duration;
///
/// let ctx = Context::background();
/// assert!(!ctx.is_canceled());
///
/// let ctx = Context::with_timeout(Duration::from_millis(5));
/// std::thread::sleep(Duration::from_millis(10));
/// assert!(ctx.is_canceled());
///
/// let ctx = Context::background();
/// let clone = ctx.clone();
/// clone.cancel();
/// assert!(ctx.is_canceled());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    state: Arc<ContextState>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::build(None)
    }

    /// A context that trips once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    /// A context that trips at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            state: Arc::new(ContextState {
                canceled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    /// Cancels this context and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    /// Whether the context has been canceled or its deadline has passed.
    pub fn is_canceled(&self) -> bool {
        if self.state.canceled.load(Ordering::Acquire) {
            return true;
        }
        match self.state.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// The non-blocking entry poll performed by every operation.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(StoreError::ContextCanceled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
