use crate::planner::node::NodeId;
use crate::planner::query::LevelId;
use crate::planner::relation::RelId;
use std::fmt;

/// Errors raised while navigating a host plan
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// Node id does not address a slot in the arena
    MissingNode(NodeId),
    /// Relation id is not known to the query
    MissingRelation(RelId),
    /// Query level id is not known to the query
    MissingLevel(LevelId),
    /// Subplan id does not address a slot in the subplan table
    MissingSubplan(usize),
    /// Node exists but its shape is not what its kind requires
    MalformedPlan(String),
    /// Tree nests deeper than the configured limit
    TooDeep { depth: usize, limit: usize },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::MissingNode(id) => write!(f, "Plan node {id} does not exist"),
            PlanError::MissingRelation(id) => write!(f, "Relation {id} does not exist"),
            PlanError::MissingLevel(id) => write!(f, "Query level {id} does not exist"),
            PlanError::MissingSubplan(plan_id) => write!(f, "Subplan {plan_id} does not exist"),
            PlanError::MalformedPlan(msg) => write!(f, "Malformed plan: {msg}"),
            PlanError::TooDeep { depth, limit } => {
                write!(f, "Plan depth {depth} exceeds the limit of {limit}")
            }
        }
    }
}

impl std::error::Error for PlanError {}

/// Result type for plan navigation
pub type PlanResult<T> = Result<T, PlanError>;
