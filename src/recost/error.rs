use crate::planner::error::PlanError;
use std::fmt;

/// Errors raised by a recosting pass
#[derive(Debug, Clone, PartialEq)]
pub enum RecostError {
    /// A plan node kind the recoster deliberately does not handle
    UnsupportedNode(&'static str),
    /// Recursion went deeper than the configured limit
    DepthExceeded { depth: usize, limit: usize },
    /// A substitution was registered without a search string or index
    InvalidRegistration(String),
    /// The plan itself is inconsistent
    Plan(PlanError),
}

impl fmt::Display for RecostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedNode(kind) => write!(f, "Unsupported plan node: {kind}"),
            Self::DepthExceeded { depth, limit } => {
                write!(f, "Recosting depth {depth} exceeds the limit of {limit}")
            }
            Self::InvalidRegistration(reason) => write!(f, "Invalid substitution: {reason}"),
            Self::Plan(e) => write!(f, "Plan error: {e}"),
        }
    }
}

impl std::error::Error for RecostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Plan(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PlanError> for RecostError {
    fn from(err: PlanError) -> Self {
        Self::Plan(err)
    }
}

pub type RecostResult<T> = Result<T, RecostError>;
