pub mod error;
pub mod generate;
pub mod node;
pub mod query;
pub mod relation;


pub use error::{PlanError, PlanResult};
pub use generate::{IndexPathGenerator, PathList, StandardPathGenerator};
pub use node::{
    AggCosts, AggStrategy, IndexAccess, JoinPath, JoinType, NodeId, NodeKind, PathHeader,
    PlanArena, PlanNode, Rollup, UniqueMethod,
};
pub use query::{
    CostedPlan, LevelId, PlannedQuery, QueryLevel, SubLinkKind, SubplanRef, SubplanSlot,
};
pub use relation::{
    Clause, IndexCandidate, IndexId, IsolatedRelation, QualCost, RelId, RelSet, RelationInfo,
};
