//! Serialise environment mutations across tests.
//!
//! Output-mode detection reads `NO_COLOR` and `TERM`, and configuration
//! merging reads `CAMPUS_BDD_*`. Tests that change any of them hold
//! [`EnvLock`] so concurrently running tests never observe a half-applied
//! environment.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{fmt, fmt::Formatter};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard that holds the global environment lock.
pub struct EnvLock {
    _guard: MutexGuard<'static, ()>,
}

impl fmt::Debug for EnvLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvLock").finish_non_exhaustive()
    }
}

impl EnvLock {
    /// Acquire the lock, recovering it if a previous holder panicked.
    #[must_use]
    pub fn acquire() -> Self {
        Self {
            _guard: ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
