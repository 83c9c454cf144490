//! Scoped, reversible mutation of process environment variables.
//!
//! The font subsystem reads its configuration from the process environment
//! while the font database is loaded. [`EnvScope`] applies a set of overrides,
//! remembers what it replaced, and puts everything back when dropped, on both
//! the normal and the unwinding exit path.
//!
//! Only one scope may be active in the process at a time. Entering a second
//! scope while one is alive fails with [`EnvScopeError::AlreadyActive`]
//! instead of silently interleaving captures.

use std::{
    env,
    ffi::OsString,
    sync::atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tracing::debug;

static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvScopeError {
    #[error("another environment scope is already active")]
    AlreadyActive,
}

/// Guard restoring every overridden variable to its captured prior state on drop.
#[derive(Debug)]
pub struct EnvScope {
    captured: Vec<(String, Option<OsString>)>,
}

impl EnvScope {
    /// Apply every override whose value is present. Absent values leave the
    /// variable untouched and are not captured.
    pub fn enter<I, K, V>(overrides: I) -> Result<Self, EnvScopeError>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        if SCOPE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EnvScopeError::AlreadyActive);
        }

        let mut scope = Self {
            captured: Vec::new(),
        };

        for (name, value) in overrides {
            let Some(value) = value else {
                continue;
            };
            let name = name.into();
            // Only the first capture of a repeated name holds the pre-scope value.
            if !scope.captured.iter().any(|(seen, _)| *seen == name) {
                scope.captured.push((name.clone(), env::var_os(&name)));
            }
            let value = value.into();
            debug!(
                target = "infra::env_scope",
                op = "env_scope::enter",
                variable = %name,
                "Overriding environment variable"
            );
            // SAFETY: SCOPE_ACTIVE admits a single scope per process, and callers
            // confine scopes to the startup phase before render threads exist.
            unsafe { env::set_var(&name, value) };
        }

        Ok(scope)
    }

    /// Run `body` inside a scope built from `overrides`.
    pub fn run<I, K, V, T>(overrides: I, body: impl FnOnce() -> T) -> Result<T, EnvScopeError>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        let _scope = Self::enter(overrides)?;
        Ok(body())
    }

    /// Names of the variables this scope overrode, in application order.
    pub fn overridden(&self) -> impl Iterator<Item = &str> {
        self.captured.iter().map(|(name, _)| name.as_str())
    }

    /// Whether any scope is currently alive in this process.
    pub fn is_active() -> bool {
        SCOPE_ACTIVE.load(Ordering::Acquire)
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        for (name, previous) in self.captured.drain(..).rev() {
            // SAFETY: see `EnvScope::enter`; restoration happens under the same
            // single-scope invariant.
            match previous {
                Some(value) => unsafe { env::set_var(&name, value) },
                None => unsafe { env::remove_var(&name) },
            }
        }
        SCOPE_ACTIVE.store(false, Ordering::Release);
    }
}
