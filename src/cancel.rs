//! Ambient cancellation for long-running operations.
//!
//! Every long operation (indexing, fan-out searches, memory scans) accepts a
//! [`CancelToken`]. Cancellation is cooperative: the operation checks the
//! token at natural suspension points (per file, per page, per task) and
//! returns [`Error::Cancelled`](crate::Error::Cancelled) when tripped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation handle.
///
/// Clones share the same underlying flag, so cancelling any clone cancels
/// all of them. The default token is never cancelled.
///
/// # Examples
///
/// ```
/// use codeseek::CancelToken;
///
/// let token = CancelToken::new();
/// let child = token.clone();
/// assert!(!child.is_cancelled());
/// token.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if the token has been tripped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] when the token is cancelled.
    pub fn check(&self, reason: &str) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::cancelled(reason))
        } else {
            Ok(())
        }
    }
}
