use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Shared cooperative cancellation flag.
///
/// Clones observe the same flag. The transition is one-way: once a
/// cancellation has been requested the token stays canceled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-requested state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling this more than once has no further effect.
    pub fn request_cancel(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            debug!("Cancellation requested");
        }
    }

    /// Whether cancellation has been requested by any holder of this token
    pub fn is_canceled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
