//! # Dependency descriptors.
//!
//! A [`DependencyDescriptor`] names one capability a module requires: a [`Filter`],
//! the component inside the module that declared it (diagnostic only), and whether
//! the dependency is mandatory.
//!
//! The live match counter of a descriptor is owned by the
//! [`DependencyTracker`](crate::DependencyTracker) that watches it; descriptors
//! themselves are immutable values.

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::registry::Filter;

/// One required capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyDescriptor {
    component: Arc<str>,
    filter: Filter,
    mandatory: bool,
}

impl DependencyDescriptor {
    /// Creates a descriptor from an already-built filter.
    pub fn new(component: impl Into<Arc<str>>, filter: Filter, mandatory: bool) -> Self {
        Self {
            component: component.into(),
            filter,
            mandatory,
        }
    }

    /// Parses `filter` and creates a mandatory descriptor.
    ///
    /// # Example
    /// ```
    /// use modvisor::DependencyDescriptor;
    ///
    /// let d = DependencyDescriptor::mandatory("log", "(kind=Logger)").unwrap();
    /// assert!(d.is_mandatory());
    /// assert_eq!(d.to_string(), "log(kind=Logger)");
    /// ```
    pub fn mandatory(component: impl Into<Arc<str>>, filter: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::new(component, Filter::parse(filter)?, true))
    }

    /// Parses `filter` and creates an optional descriptor.
    pub fn optional(component: impl Into<Arc<str>>, filter: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::new(component, Filter::parse(filter)?, false))
    }

    /// Owning component name.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Filter a capability must match.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Whether absence of a match blocks the module from starting.
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

impl fmt::Display for DependencyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.component, self.filter)
    }
}

/// Checks a module's descriptor list.
pub(crate) fn validate(module: &str, descriptors: &[DependencyDescriptor]) -> Result<(), ConfigurationError> {
    for (i, d) in descriptors.iter().enumerate() {
        if d.component.trim().is_empty() {
            return Err(ConfigurationError::EmptyComponent {
                filter: d.filter.to_string(),
            });
        }
        d.filter.validate()?;
        if descriptors[..i].iter().any(|prev| prev.component == d.component) {
            return Err(ConfigurationError::DuplicateComponent {
                module: module.to_string(),
                component: d.component.to_string(),
            });
        }
    }
    Ok(())
}
