use std::error::Error as StdError;

use crate::module::{MAX_PRIORITY, MIN_PRIORITY};

/// Crate-wide result type for registry and dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A module declared a priority outside the valid range. Fatal at startup.
    #[error(
        "priority {priority} of module {module} is invalid, should be in [{min}, {max})",
        min = MIN_PRIORITY,
        max = MAX_PRIORITY
    )]
    InvalidPriority { module: String, priority: i32 },

    /// A second unit resolved to a name or type that is already registered.
    #[error("module {name} is duplicated")]
    DuplicateModule { name: String },

    /// One unit could not be read or resolved. The unit is skipped.
    #[error("failed to load module unit {unit}: {reason}")]
    ModuleLoad { unit: String, reason: String },

    #[error("module {name} not found")]
    ModuleNotFound { name: String },

    /// Context accessed outside of a callback invocation.
    #[error("no context found")]
    NoContext,

    #[error("retry count must be positive")]
    InvalidRetryCount,

    #[error("callback {callback} is not bound to a module instance")]
    UnboundCallback { callback: String },

    /// A module lifecycle hook failed.
    #[error("module {module} failed during {phase}: {source}")]
    Lifecycle {
        module: String,
        phase: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn module_load(unit: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ModuleLoad {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    #[must_use]
    pub fn lifecycle(module: impl Into<String>, phase: &'static str, source: anyhow::Error) -> Self {
        Self::Lifecycle {
            module: module.into(),
            phase,
            source: source.into(),
        }
    }
}
