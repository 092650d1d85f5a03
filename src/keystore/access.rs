//! Per-handle exclusive access and cosigner slot binding
//!
//! Backends usually front a single physical device, so at most one call may
//! be in flight per handle. A second caller either fails fast or queues,
//! depending on the busy policy.

use std::sync::{Mutex, MutexGuard, OnceLock, TryLockError};

use crate::config::BusyPolicy;
use crate::error::{KeystoreError, KeystoreResult};
use crate::types::SigningMode;

#[derive(Debug, Default)]
pub struct ExclusiveAccess {
    lock: Mutex<()>,
}

/// Held for the duration of one keystore call
#[must_use]
pub struct AccessGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ExclusiveAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, policy: BusyPolicy, operation: &str) -> KeystoreResult<AccessGuard<'_>> {
        let guard = match policy {
            BusyPolicy::Reject => match self.lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    crate::log_warn!("keystore", "Handle busy", operation = operation);
                    return Err(KeystoreError::busy(format!(
                        "Keystore is busy; '{}' rejected",
                        operation
                    )));
                }
                // A panicked call holds no device state we rely on
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            },
            BusyPolicy::Wait => self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
        Ok(AccessGuard { _guard: guard })
    }
}

/// Cosigner index of a handle, fixed once a configuration binds it
#[derive(Debug, Default)]
pub struct CosignerSlot {
    index: OnceLock<usize>,
}

impl CosignerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound index, 0 while unbound
    pub fn index(&self) -> usize {
        self.index.get().copied().unwrap_or(0)
    }

    pub fn bound(&self) -> Option<usize> {
        self.index.get().copied()
    }

    /// Bind the slot. Rebinding to the same index is a no-op.
    pub fn bind(&self, mode: SigningMode, index: usize) -> KeystoreResult<()> {
        if mode == SigningMode::SingleSig {
            if index == 0 {
                return Ok(());
            }
            return Err(KeystoreError::configuration(
                "Single-sig keystores always sign at cosigner index 0",
            ));
        }

        let bound = *self.index.get_or_init(|| index);
        if bound != index {
            return Err(KeystoreError::configuration(format!(
                "Keystore already bound to cosigner index {}, cannot rebind to {}",
                bound, index
            )));
        }
        Ok(())
    }

    /// Whether `bind(mode, index)` would succeed, without binding
    pub fn can_bind(&self, mode: SigningMode, index: usize) -> bool {
        match mode {
            SigningMode::SingleSig => index == 0,
            SigningMode::Multisig => self.bound().map_or(true, |bound| bound == index),
        }
    }
}
