//! Error types used by the extender runtime and by module callables.
//!
//! This module defines four error enums:
//!
//! - [`ConfigurationError`]: a module's declared configuration is malformed.
//! - [`ModuleError`]: returned by a module's own init/teardown callables.
//! - [`BootstrapError`]: terminal failure outcome of one module bootstrap.
//! - [`ExtenderError`]: errors raised by the extender controller itself.
//!
//! Every type provides `as_label` (stable snake_case, for logs/metrics) and
//! `as_message` (human-readable details).

use std::time::Duration;
use thiserror::Error;

/// # Malformed module configuration.
///
/// Fatal at discovery: a module whose descriptors fail validation never starts.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A filter expression could not be parsed.
    #[error("invalid filter {filter:?} at byte {position}: {reason}")]
    InvalidFilter {
        /// The filter text as written.
        filter: String,
        /// Byte offset where parsing failed.
        position: usize,
        /// What the parser expected.
        reason: &'static str,
    },

    /// A filter names an attribute the textual form cannot carry.
    #[error("invalid attribute name {key:?} in filter: {reason}")]
    InvalidAttributeName {
        /// The attribute name as given.
        key: String,
        /// Why the name is rejected.
        reason: &'static str,
    },

    /// A dependency descriptor has an empty component name.
    #[error("dependency descriptor with filter {filter} has an empty component name")]
    EmptyComponent {
        /// Rendered filter of the offending descriptor.
        filter: String,
    },

    /// Two descriptors of one module share a component name.
    #[error("module {module:?} declares component {component:?} more than once")]
    DuplicateComponent {
        /// Module symbolic name.
        module: String,
        /// The duplicated component name.
        component: String,
    },
}

impl ConfigurationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigurationError::InvalidFilter { .. } => "config_invalid_filter",
            ConfigurationError::InvalidAttributeName { .. } => "config_invalid_attribute_name",
            ConfigurationError::EmptyComponent { .. } => "config_empty_component",
            ConfigurationError::DuplicateComponent { .. } => "config_duplicate_component",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Errors returned by module callables.
///
/// The init and teardown closures supplied in a
/// [`ModuleSpec`](crate::ModuleSpec) report failures with this type.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The callable failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The callable observed its cancellation token and gave up.
    #[error("context cancelled")]
    Canceled,
}

impl ModuleError {
    /// Convenience constructor for [`ModuleError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ModuleError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use modvisor::ModuleError;
    ///
    /// assert_eq!(ModuleError::fail("boom").as_label(), "module_failed");
    /// assert_eq!(ModuleError::Canceled.as_label(), "module_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Fail { .. } => "module_failed",
            ModuleError::Canceled => "module_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ModuleError::Fail { error } => format!("error: {error}"),
            ModuleError::Canceled => "context cancelled".to_string(),
        }
    }
}

/// # Terminal failure of a module bootstrap.
///
/// Each variant corresponds to one way a module ends up `INTERRUPTED`
/// (or never starts, for [`BootstrapError::Configuration`]). These errors are
/// recorded on the module handle and published on the bus; they never escape
/// into the host's lifecycle callback.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// The module's declared configuration is malformed.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Mandatory dependencies were still unresolved when the deadline expired.
    #[error("module {module:?} timed out after {timeout:?} waiting for {unsatisfied:?}")]
    DependencyTimeout {
        /// Module symbolic name.
        module: String,
        /// The deadline that expired (`0s` when waiting was disabled).
        timeout: Duration,
        /// Rendered filters of the descriptors still unsatisfied.
        unsatisfied: Vec<String>,
    },

    /// The module's init callable returned an error.
    #[error("module {module:?} failed to initialize: {source}")]
    Initialization {
        /// Module symbolic name.
        module: String,
        /// Error returned by the init callable.
        #[source]
        source: ModuleError,
    },

    /// A close request preempted an in-flight bootstrap.
    #[error("bootstrap of module {module:?} aborted by close request")]
    RaceAborted {
        /// Module symbolic name.
        module: String,
    },
}

impl BootstrapError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use modvisor::BootstrapError;
    ///
    /// let err = BootstrapError::RaceAborted { module: "m".into() };
    /// assert_eq!(err.as_label(), "bootstrap_race_aborted");
    /// assert!(!err.is_fault());
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BootstrapError::Configuration(_) => "bootstrap_configuration",
            BootstrapError::DependencyTimeout { .. } => "bootstrap_dependency_timeout",
            BootstrapError::Initialization { .. } => "bootstrap_initialization",
            BootstrapError::RaceAborted { .. } => "bootstrap_race_aborted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BootstrapError::Configuration(e) => e.as_message(),
            BootstrapError::DependencyTimeout {
                timeout,
                unsatisfied,
                ..
            } => format!("timeout {timeout:?}; unsatisfied={unsatisfied:?}"),
            BootstrapError::Initialization { source, .. } => source.as_message(),
            BootstrapError::RaceAborted { .. } => "close requested during bootstrap".to_string(),
        }
    }

    /// Whether this outcome is a fault.
    ///
    /// A [`BootstrapError::RaceAborted`] is an expected consequence of closing a
    /// module early and is logged at lower severity.
    pub fn is_fault(&self) -> bool {
        !matches!(self, BootstrapError::RaceAborted { .. })
    }
}

/// # Errors produced by the extender controller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtenderError {
    /// The extender is shutting down and accepts no new modules.
    #[error("extender is shutting down")]
    ShuttingDown,

    /// A module with the same id is already tracked.
    #[error("module {module:?} (id {id}) is already tracked")]
    AlreadyTracked {
        /// Module symbolic name.
        module: String,
        /// Module id.
        id: u64,
    },

    /// The module's configuration was rejected.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Shutdown grace period was exceeded; some modules did not close in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of modules still tracked when the grace expired.
        stuck: Vec<String>,
    },
}

impl ExtenderError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use modvisor::ExtenderError;
    /// use std::time::Duration;
    ///
    /// let err = ExtenderError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "extender_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ExtenderError::ShuttingDown => "extender_shutting_down",
            ExtenderError::AlreadyTracked { .. } => "extender_already_tracked",
            ExtenderError::Configuration(_) => "extender_configuration",
            ExtenderError::GraceExceeded { .. } => "extender_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ExtenderError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck modules={stuck:?}")
            }
            other => other.to_string(),
        }
    }
}
