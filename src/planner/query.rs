use crate::planner::error::{PlanError, PlanResult};
use crate::planner::node::{NodeId, PlanArena, PlanNode};
use crate::planner::relation::{RelId, RelationInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one query level (the main query or a nested subquery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelId(pub usize);

impl LevelId {
    pub const MAIN: LevelId = LevelId(0);
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level#{}", self.0)
    }
}

/// Semantic kind of the sublink a subplan implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLinkKind {
    Exists,
    All,
    Any,
    RowCompare,
    Expr,
    MultiExpr,
    Array,
    Cte,
}

impl SubLinkKind {
    /// Fraction of the subplan's output the consumer is expected to fetch.
    pub fn tuple_fraction(&self) -> f64 {
        match self {
            // Just like a LIMIT 1.
            SubLinkKind::Exists => 1.0,
            SubLinkKind::All | SubLinkKind::Any => 0.5,
            _ => 0.0,
        }
    }
}

/// A reference from a query level to one slot of the subplan table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubplanRef {
    /// 1-based id; slot `plan_id - 1` of the subplan table.
    pub plan_id: usize,
    pub kind: SubLinkKind,
    #[serde(default)]
    pub use_hash_table: bool,
    /// The subplan depends on parameters from the enclosing query.
    #[serde(default)]
    pub parameterized: bool,
    #[serde(default)]
    pub startup_cost: f64,
    #[serde(default)]
    pub per_call_cost: f64,
}

impl SubplanRef {
    pub fn new(plan_id: usize, kind: SubLinkKind) -> Self {
        Self {
            plan_id,
            kind,
            use_hash_table: false,
            parameterized: false,
            startup_cost: 0.0,
            per_call_cost: 0.0,
        }
    }

    pub fn slot(&self) -> usize {
        self.plan_id.saturating_sub(1)
    }

    /// Cost this subplan adds to the node that evaluates it once.
    pub fn charge(&self) -> f64 {
        self.startup_cost + self.per_call_cost
    }
}

/// Final plan selected for a subplan slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostedPlan {
    pub root: NodeId,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub rows: f64,
    pub width: u32,
}

impl CostedPlan {
    pub fn from_node(root: NodeId, node: &PlanNode) -> Self {
        Self {
            root,
            startup_cost: node.header.startup_cost,
            total_cost: node.header.total_cost,
            rows: node.header.rows,
            width: node.header.width,
        }
    }
}

/// One slot of the subplan table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubplanSlot {
    /// Query level that produces this subplan.
    pub level: LevelId,
    /// `None` when the host discarded the slot.
    #[serde(default)]
    pub plan: Option<CostedPlan>,
}

/// The final relation of one query level plus the subplans it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLevel {
    /// Candidate paths for the level's final relation.
    pub paths: Vec<NodeId>,
    pub cheapest_total: NodeId,
    /// Path the host picked for this level.
    pub chosen: NodeId,
    #[serde(default)]
    pub init_plans: Vec<SubplanRef>,
    #[serde(default)]
    pub noninit_plans: Vec<SubplanRef>,
}

impl QueryLevel {
    pub fn single(path: NodeId) -> Self {
        Self {
            paths: vec![path],
            cheapest_total: path,
            chosen: path,
            init_plans: Vec::new(),
            noninit_plans: Vec::new(),
        }
    }

    pub fn subplan_refs(&self) -> impl Iterator<Item = &SubplanRef> {
        self.init_plans.iter().chain(self.noninit_plans.iter())
    }
}

/// Host planner state for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedQuery {
    pub arena: PlanArena,
    #[serde(default)]
    pub relations: Vec<RelationInfo>,
    /// Level 0 is the main query.
    pub levels: Vec<QueryLevel>,
    /// Slot `i` holds subplan id `i + 1`.
    #[serde(default)]
    pub subplans: Vec<SubplanSlot>,
    /// Groups of subplan ids produced as alternatives for one sublink.
    #[serde(default)]
    pub alternatives: Vec<Vec<usize>>,
}

impl PlannedQuery {
    pub fn relation(&self, id: RelId) -> PlanResult<&RelationInfo> {
        self.relations
            .iter()
            .find(|r| r.id == id)
            .ok_or(PlanError::MissingRelation(id))
    }

    pub fn relation_mut(&mut self, id: RelId) -> PlanResult<&mut RelationInfo> {
        self.relations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(PlanError::MissingRelation(id))
    }

    pub fn level(&self, id: LevelId) -> PlanResult<&QueryLevel> {
        self.levels.get(id.0).ok_or(PlanError::MissingLevel(id))
    }

    pub fn level_mut(&mut self, id: LevelId) -> PlanResult<&mut QueryLevel> {
        self.levels.get_mut(id.0).ok_or(PlanError::MissingLevel(id))
    }

    pub fn main_level(&self) -> PlanResult<&QueryLevel> {
        self.level(LevelId::MAIN)
    }

    pub fn subplan(&self, plan_id: usize) -> PlanResult<&SubplanSlot> {
        plan_id
            .checked_sub(1)
            .and_then(|slot| self.subplans.get(slot))
            .ok_or(PlanError::MissingSubplan(plan_id))
    }

    pub fn subplan_mut(&mut self, plan_id: usize) -> PlanResult<&mut SubplanSlot> {
        plan_id
            .checked_sub(1)
            .and_then(|slot| self.subplans.get_mut(slot))
            .ok_or(PlanError::MissingSubplan(plan_id))
    }

    /// Mutable access to every reference to `plan_id` across all levels.
    pub fn subplan_refs_mut(&mut self, plan_id: usize) -> impl Iterator<Item = &mut SubplanRef> {
        self.levels
            .iter_mut()
            .flat_map(|l| l.init_plans.iter_mut().chain(l.noninit_plans.iter_mut()))
            .filter(move |r| r.plan_id == plan_id)
    }

    /// Cheapest path of `level` for fetching `fraction` of its output.
    ///
    /// A fraction of zero or less asks for the cheapest total path; a
    /// fraction of one or more is an absolute row count.
    pub fn cheapest_fractional_path(&self, level: LevelId, fraction: f64) -> PlanResult<NodeId> {
        let level = self.level(level)?;
        let best = self.arena.header(level.cheapest_total)?;
        if fraction <= 0.0 {
            return Ok(level.cheapest_total);
        }
        let fraction = if fraction >= 1.0 {
            if best.rows > 1.0 {
                fraction / best.rows
            } else {
                1.0
            }
        } else {
            fraction
        };

        let mut chosen = level.cheapest_total;
        let mut chosen_cost = best.startup_cost + fraction * best.run_cost();
        for &path in &level.paths {
            let header = self.arena.header(path)?;
            let cost = header.startup_cost + fraction * header.run_cost();
            if cost < chosen_cost {
                chosen = path;
                chosen_cost = cost;
            }
        }
        Ok(chosen)
    }

    /// Refresh `level.cheapest_total` from the current path costs.
    ///
    /// Only `paths` compete; a level without paths keeps its current value.
    pub fn refresh_cheapest_total(&mut self, level: LevelId) -> PlanResult<NodeId> {
        let current = self.level(level)?;
        let mut best: Option<(NodeId, f64)> = None;
        for &path in &current.paths {
            let cost = self.arena.header(path)?.total_cost;
            if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                best = Some((path, cost));
            }
        }
        let best = best.map_or(current.cheapest_total, |(path, _)| path);
        self.level_mut(level)?.cheapest_total = best;
        Ok(best)
    }
}
