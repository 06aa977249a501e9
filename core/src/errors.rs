use std::fmt;

/// The crate-wide result type, an alias over `anyhow::Result`.
pub type PortResult<T> = anyhow::Result<T>;

/// Failure kinds a workflow must be able to tell apart.
///
/// Everything else travels as a plain `anyhow` error with context. These
/// variants are matched by downcast:
///
/// ```
/// use modelport_core::errors::ExportError;
/// # let err = anyhow::Error::from(ExportError::ScopeReentry);
/// if let Some(ExportError::ScopeReentry) = err.downcast_ref::<ExportError>() {
///     // a patch scope was already active
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// A qualified name does not resolve to a live callable.
    Resolution(String),
    /// Two rewrite entries for the same name tie with identical guards.
    PredicateConflict(String),
    /// A patch scope was opened while another one is active.
    ScopeReentry,
    /// The rewrite context was accessed where it is not defined.
    ContextUnavailable(&'static str),
    /// A raw input cannot be coerced to the task family's structure.
    Input(String),
    /// A task family does not implement an optional capability.
    Unsupported(&'static str),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExportError::Resolution(name) => {
                write!(f, "no live callable registered for `{name}'")
            }
            ExportError::PredicateConflict(name) => {
                write!(f, "rewrite entries for `{name}' tie with identical guards")
            }
            ExportError::ScopeReentry => {
                write!(f, "a patch scope is already active in this process")
            }
            ExportError::ContextUnavailable(when) => {
                write!(f, "rewrite context unavailable: {when}")
            }
            ExportError::Input(what) => write!(f, "invalid input: {what}"),
            ExportError::Unsupported(what) => write!(f, "not supported: {what}"),
        }
    }
}

impl std::error::Error for ExportError {}
