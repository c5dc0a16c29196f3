//! # Extender configuration.
//!
//! Provides [`ExtenderConfig`], the centralized settings of the extender runtime.
//!
//! Config is used in two ways:
//! 1. **Extender creation**: `ExtenderBuilder::new(config)`
//! 2. **Module defaults**: a module without its own timeout inherits `dependency_timeout`
//!
//! ## Sentinel values
//! - `dependency_timeout = 0s` → wait for dependencies forever (no timer armed)
//! - `max_concurrent_init = 0` → unlimited (no semaphore created)

use std::time::Duration;

/// Global configuration for the extender runtime.
///
/// ## Field semantics
/// - `dependency_timeout`: default deadline for mandatory dependencies (`0s` = forever)
/// - `grace`: maximum time `shutdown()` spends closing tracked modules
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `max_concurrent_init`: init callables allowed to run at once (`0` = unlimited)
///
/// All fields are public; prefer the helper accessors over sprinkling sentinel checks.
#[derive(Clone, Debug)]
pub struct ExtenderConfig {
    /// Default time a module may spend in `RESOLVING_DEPENDENCIES`.
    ///
    /// Overridden per module by [`ModuleSpecBuilder::timeout`](crate::ModuleSpecBuilder::timeout).
    pub dependency_timeout: Duration,

    /// Upper bound on a whole-extender shutdown.
    ///
    /// When exceeded, `shutdown()` returns `ExtenderError::GraceExceeded` listing the
    /// modules that were still tracked.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Maximum number of init callables running concurrently.
    pub max_concurrent_init: usize,
}

impl ExtenderConfig {
    /// Returns the default dependency deadline as an `Option`.
    ///
    /// - `None` → wait forever
    /// - `Some(d)` → modules are interrupted after `d`
    #[inline]
    pub fn default_dependency_timeout(&self) -> Option<Duration> {
        if self.dependency_timeout == Duration::ZERO {
            None
        } else {
            Some(self.dependency_timeout)
        }
    }

    /// Returns the init concurrency limit as an `Option`.
    #[inline]
    pub fn init_concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent_init == 0 {
            None
        } else {
            Some(self.max_concurrent_init)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ExtenderConfig {
    /// Default configuration:
    ///
    /// - `dependency_timeout = 300s`
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `max_concurrent_init = 0` (unlimited)
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(300),
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            max_concurrent_init: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_disable_limits() {
        let cfg = ExtenderConfig {
            dependency_timeout: Duration::ZERO,
            bus_capacity: 0,
            ..ExtenderConfig::default()
        };
        assert_eq!(cfg.default_dependency_timeout(), None);
        assert_eq!(cfg.init_concurrency_limit(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn defaults() {
        let cfg = ExtenderConfig::default();
        assert_eq!(cfg.default_dependency_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(cfg.grace, Duration::from_secs(60));
        assert_eq!(cfg.bus_capacity_clamped(), 1024);
    }
}
