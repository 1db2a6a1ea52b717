pub mod config;
pub mod cost;
pub mod explain;
pub mod planner;
pub mod recost;
pub mod scenario;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::{
    ConfigSnapshot, CostConstants, HypotheticalGuard, HypotheticalSettings, OptimizerConfig,
    StrategyFlags,
};
pub use cost::{CostModel, StandardCostModel};
pub use explain::{ExplainDocument, ExplainFormat, ExplanationNode, PlanExplanation};
pub use planner::{
    IndexPathGenerator, NodeId, NodeKind, PlanArena, PlanError, PlanNode, PlannedQuery,
    StandardPathGenerator,
};
pub use recost::{RecostError, RecostResult, Recoster, SubplanValidityMask, SubstitutionTable};
pub use scenario::{Scenario, ScenarioError};
pub use session::{HostPlanner, PlanOptions, PlanOutcome, RecordedPlanner, Session};
