use thiserror::Error;

use crate::state::StateKey;

/// Failure raised by a single reducer while handling a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReducerError {
    /// The command is not legal in the current state (strict mode only).
    #[error("'{command}' is not allowed: {reason}")]
    InvalidTransition {
        /// Wire name of the rejected command.
        command: String,
        /// Why the transition was refused.
        reason: String,
    },
    /// The reducer found state it cannot interpret.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}

/// Failure of a whole dispatch. The previous state remains current.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A reducer returned an error; no patch from this dispatch is installed.
    #[error("reducer '{reducer}' failed on '{command}': {source}")]
    Reducer {
        /// Reducer that failed.
        reducer: &'static str,
        /// Wire name of the command being dispatched.
        command: String,
        /// Underlying reducer error.
        #[source]
        source: ReducerError,
    },
    /// A reducer wrote a sub-record it does not own.
    #[error("reducer '{reducer}' wrote '{key}' outside its declared domain")]
    DomainViolation {
        /// Offending reducer.
        reducer: &'static str,
        /// Sub-record written without ownership.
        key: StateKey,
    },
}

/// Failure while assembling a reducer registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two reducers declare ownership of the same sub-record.
    #[error("reducer '{incoming}' overlaps '{existing}' on '{key}'")]
    OverlappingDomain {
        /// Reducer being registered.
        incoming: &'static str,
        /// Reducer already owning the key.
        existing: &'static str,
        /// Contested sub-record.
        key: StateKey,
    },
    /// A reducer with the same name is already registered.
    #[error("reducer '{0}' is already registered")]
    DuplicateName(&'static str),
}

/// Invalid kernel configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A bounded log was configured to hold nothing.
    #[error("{field} must be at least 1")]
    ZeroCapacity {
        /// Name of the offending setting.
        field: &'static str,
    },
    /// A frequency-table key is blank.
    #[error("interval key '{0}' is blank")]
    BlankIntervalKey(String),
}
