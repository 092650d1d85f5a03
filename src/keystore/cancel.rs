//! Explicit cancellation handle passed alongside long-running calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{KeystoreError, KeystoreResult};

/// Cloneable flag shared between the caller and in-flight keystore calls
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> KeystoreResult<()> {
        if self.is_cancelled() {
            return Err(KeystoreError::cancelled("Operation cancelled by caller"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());
        token.cancel();
        assert!(observer.is_cancelled());
        assert_eq!(observer.check().unwrap_err().code, crate::error::ErrorCode::Cancelled);
    }
}
