//! Scoped environment variable changes.
//!
//! `std::env::set_var` and `remove_var` are `unsafe` in Rust 2024 because
//! they mutate process-global state. Hold an
//! [`EnvLock`](crate::env_lock::EnvLock) while a guard is alive.
//!
//! ```rust,ignore
//! use test_support::env_lock::EnvLock;
//! use test_support::env_var_guard::EnvVarGuard;
//!
//! let _lock = EnvLock::acquire();
//! let _colour = EnvVarGuard::remove("NO_COLOR");
//! let _term = EnvVarGuard::set("TERM", "dumb");
//! ```
use std::{borrow::Cow, ffi::OsString};

/// Restores a variable's previous value on drop.
#[derive(Debug)]
pub struct EnvVarGuard {
    name: Cow<'static, str>,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    /// Set `name` to `val` until the guard drops.
    #[must_use]
    pub fn set(name: impl Into<Cow<'static, str>>, val: &str) -> Self {
        let name = name.into();
        let prev = std::env::var_os(&*name);
        // SAFETY: callers hold `EnvLock`, serialising environment mutations.
        unsafe { std::env::set_var(&*name, val) };
        Self { name, prev }
    }

    /// Unset `name` until the guard drops.
    #[must_use]
    pub fn remove(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let prev = std::env::var_os(&*name);
        // SAFETY: callers hold `EnvLock`, serialising environment mutations.
        unsafe { std::env::remove_var(&*name) };
        Self { name, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped while its `EnvLock` is still held.
        unsafe {
            match &self.prev {
                Some(value) => std::env::set_var(&*self.name, value),
                None => std::env::remove_var(&*self.name),
            }
        }
    }
}
