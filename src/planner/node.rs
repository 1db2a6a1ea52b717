use crate::planner::error::{PlanError, PlanResult};
use crate::planner::query::LevelId;
use crate::planner::relation::{Clause, IndexId, QualCost, RelId, RelSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable address of a node in a [`PlanArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fields every plan node carries regardless of its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathHeader {
    /// Relation the node produces rows for; preserved across replacement.
    pub parent: Option<RelId>,
    /// Required-outer parameterization.
    pub param: Option<RelSet>,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub rows: f64,
    pub width: u32,
    pub pathkeys: Vec<String>,
    pub parallel_aware: bool,
    pub parallel_safe: bool,
    pub parallel_workers: u32,
    /// Evaluation cost of the node's output target list.
    pub target: QualCost,
}

impl Default for PathHeader {
    fn default() -> Self {
        Self {
            parent: None,
            param: None,
            startup_cost: 0.0,
            total_cost: 0.0,
            rows: 0.0,
            width: 0,
            pathkeys: Vec::new(),
            parallel_aware: false,
            parallel_safe: true,
            parallel_workers: 0,
            target: QualCost::default(),
        }
    }
}

impl PathHeader {
    pub fn for_relation(parent: RelId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn set_estimate(&mut self, startup_cost: f64, total_cost: f64, rows: f64) {
        self.startup_cost = startup_cost;
        self.total_cost = total_cost;
        self.rows = rows;
    }

    pub fn run_cost(&self) -> f64 {
        self.total_cost - self.startup_cost
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Full,
    Right,
    Semi,
    Anti,
}

/// Index access parameters shared by plain and index-only scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAccess {
    pub index: IndexId,
    #[serde(default = "one")]
    pub loop_count: f64,
    #[serde(default)]
    pub partial: bool,
    #[serde(default = "one")]
    pub selectivity: f64,
    #[serde(default)]
    pub index_total_cost: f64,
}

fn one() -> f64 {
    1.0
}

impl IndexAccess {
    pub fn new(index: IndexId) -> Self {
        Self {
            index,
            loop_count: 1.0,
            partial: false,
            selectivity: 1.0,
            index_total_cost: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPath {
    pub join_type: JoinType,
    pub outer: NodeId,
    pub inner: NodeId,
    #[serde(default)]
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggStrategy {
    Plain,
    Sorted,
    Hashed,
    Mixed,
}

/// Transition and final-function costs of the aggregates in one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggCosts {
    pub trans_startup: f64,
    pub trans_per_tuple: f64,
    pub final_per_group: f64,
    /// Per-group transition state size in bytes.
    pub transition_space: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub num_group_cols: usize,
    pub num_groups: f64,
    #[serde(default)]
    pub hashed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UniqueMethod {
    /// Adjacent-duplicate removal over sorted input.
    Upper,
    /// Semi-join uniquification by sorting the input.
    Sorted { num_groups: f64 },
    /// Semi-join uniquification with a hash table.
    Hashed { num_groups: f64 },
}

/// One variant per plan node kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    SeqScan,
    SampleScan {
        fraction: f64,
    },
    IndexScan(IndexAccess),
    IndexOnlyScan(IndexAccess),
    BitmapHeapScan {
        bitmapqual: NodeId,
        #[serde(default = "one")]
        loop_count: f64,
    },
    BitmapAnd {
        quals: Vec<NodeId>,
        #[serde(default = "one")]
        selectivity: f64,
    },
    BitmapOr {
        quals: Vec<NodeId>,
        #[serde(default = "one")]
        selectivity: f64,
    },
    SubqueryScan {
        subpath: NodeId,
        level: LevelId,
    },
    CteScan {
        plan_id: usize,
    },
    ResultScan,
    NestLoop(JoinPath),
    HashJoin {
        join: JoinPath,
        #[serde(default)]
        hash_clauses: Vec<Clause>,
        #[serde(default)]
        parallel_hash: bool,
    },
    MergeJoin {
        join: JoinPath,
        #[serde(default)]
        merge_clauses: Vec<Clause>,
        #[serde(default)]
        outer_sortkeys: Vec<String>,
        #[serde(default)]
        inner_sortkeys: Vec<String>,
        #[serde(default)]
        materialize_inner: bool,
    },
    Projection {
        subpath: NodeId,
        /// Target list is identical to the child's.
        #[serde(default)]
        dummy: bool,
    },
    Sort {
        subpath: NodeId,
        #[serde(default)]
        limit_tuples: f64,
    },
    IncrementalSort {
        subpath: NodeId,
        presorted_cols: usize,
        #[serde(default)]
        limit_tuples: f64,
    },
    Material {
        subpath: NodeId,
    },
    Memoize {
        subpath: NodeId,
    },
    Unique {
        subpath: NodeId,
        num_keys: usize,
        method: UniqueMethod,
    },
    Gather {
        subpath: NodeId,
        num_workers: u32,
        #[serde(default)]
        override_rows: Option<f64>,
    },
    GatherMerge {
        subpath: NodeId,
        num_workers: u32,
        #[serde(default)]
        override_rows: Option<f64>,
    },
    Group {
        subpath: NodeId,
        num_group_cols: usize,
        num_groups: f64,
        #[serde(default)]
        qual: Vec<Clause>,
    },
    Agg {
        subpath: NodeId,
        strategy: AggStrategy,
        #[serde(default)]
        agg_costs: Option<AggCosts>,
        #[serde(default)]
        num_group_cols: usize,
        #[serde(default = "one")]
        num_groups: f64,
        #[serde(default)]
        qual: Vec<Clause>,
    },
    GroupingSets {
        subpath: NodeId,
        strategy: AggStrategy,
        #[serde(default)]
        agg_costs: Option<AggCosts>,
        rollups: Vec<Rollup>,
        #[serde(default)]
        qual: Vec<Clause>,
    },
    WindowAgg {
        subpath: NodeId,
        num_funcs: usize,
        #[serde(default)]
        partition_cols: usize,
        #[serde(default)]
        order_cols: usize,
    },
    Limit {
        subpath: NodeId,
        /// 0 means no OFFSET, a negative value an unknown one.
        #[serde(default)]
        offset_est: f64,
        /// 0 means no LIMIT, a negative value an unknown one.
        #[serde(default)]
        count_est: f64,
    },
    SetOp {
        subpath: NodeId,
        num_distinct: usize,
    },
    Append {
        subpaths: Vec<NodeId>,
    },
    MergeAppend {
        subpaths: Vec<NodeId>,
    },

    TidScan,
    TidRangeScan,
    FunctionScan,
    TableFuncScan,
    ValuesScan,
    WorkTableScan,
    NamedTuplestoreScan,
    ForeignScan,
    CustomScan,
    MinMaxAgg,
    GroupResult,
    ModifyTable {
        subpath: NodeId,
    },
    LockRows {
        subpath: NodeId,
    },
    ProjectSet {
        subpath: NodeId,
    },
    RecursiveUnion {
        left: NodeId,
        right: NodeId,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::SeqScan => "Seq Scan",
            NodeKind::SampleScan { .. } => "Sample Scan",
            NodeKind::IndexScan(_) => "Index Scan",
            NodeKind::IndexOnlyScan(_) => "Index Only Scan",
            NodeKind::BitmapHeapScan { .. } => "Bitmap Heap Scan",
            NodeKind::BitmapAnd { .. } => "BitmapAnd",
            NodeKind::BitmapOr { .. } => "BitmapOr",
            NodeKind::SubqueryScan { .. } => "Subquery Scan",
            NodeKind::CteScan { .. } => "CTE Scan",
            NodeKind::ResultScan => "Result",
            NodeKind::NestLoop(_) => "Nested Loop",
            NodeKind::HashJoin { .. } => "Hash Join",
            NodeKind::MergeJoin { .. } => "Merge Join",
            NodeKind::Projection { .. } => "Projection",
            NodeKind::Sort { .. } => "Sort",
            NodeKind::IncrementalSort { .. } => "Incremental Sort",
            NodeKind::Material { .. } => "Materialize",
            NodeKind::Memoize { .. } => "Memoize",
            NodeKind::Unique { .. } => "Unique",
            NodeKind::Gather { .. } => "Gather",
            NodeKind::GatherMerge { .. } => "Gather Merge",
            NodeKind::Group { .. } => "Group",
            NodeKind::Agg { .. } => "Aggregate",
            NodeKind::GroupingSets { .. } => "GroupingSets",
            NodeKind::WindowAgg { .. } => "WindowAgg",
            NodeKind::Limit { .. } => "Limit",
            NodeKind::SetOp { .. } => "SetOp",
            NodeKind::Append { .. } => "Append",
            NodeKind::MergeAppend { .. } => "Merge Append",
            NodeKind::TidScan => "Tid Scan",
            NodeKind::TidRangeScan => "Tid Range Scan",
            NodeKind::FunctionScan => "Function Scan",
            NodeKind::TableFuncScan => "Table Function Scan",
            NodeKind::ValuesScan => "Values Scan",
            NodeKind::WorkTableScan => "WorkTable Scan",
            NodeKind::NamedTuplestoreScan => "Named Tuplestore Scan",
            NodeKind::ForeignScan => "Foreign Scan",
            NodeKind::CustomScan => "Custom Scan",
            NodeKind::MinMaxAgg => "MinMaxAgg",
            NodeKind::GroupResult => "Group Result",
            NodeKind::ModifyTable { .. } => "ModifyTable",
            NodeKind::LockRows { .. } => "LockRows",
            NodeKind::ProjectSet { .. } => "ProjectSet",
            NodeKind::RecursiveUnion { .. } => "Recursive Union",
        }
    }

    /// Direct children in execution order (outer before inner).
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::BitmapHeapScan { bitmapqual, .. } => vec![*bitmapqual],
            NodeKind::BitmapAnd { quals, .. } | NodeKind::BitmapOr { quals, .. } => quals.clone(),
            NodeKind::NestLoop(join)
            | NodeKind::HashJoin { join, .. }
            | NodeKind::MergeJoin { join, .. } => vec![join.outer, join.inner],
            NodeKind::SubqueryScan { subpath, .. }
            | NodeKind::Projection { subpath, .. }
            | NodeKind::Sort { subpath, .. }
            | NodeKind::IncrementalSort { subpath, .. }
            | NodeKind::Material { subpath }
            | NodeKind::Memoize { subpath }
            | NodeKind::Unique { subpath, .. }
            | NodeKind::Gather { subpath, .. }
            | NodeKind::GatherMerge { subpath, .. }
            | NodeKind::Group { subpath, .. }
            | NodeKind::Agg { subpath, .. }
            | NodeKind::GroupingSets { subpath, .. }
            | NodeKind::WindowAgg { subpath, .. }
            | NodeKind::Limit { subpath, .. }
            | NodeKind::SetOp { subpath, .. }
            | NodeKind::ModifyTable { subpath }
            | NodeKind::LockRows { subpath }
            | NodeKind::ProjectSet { subpath } => vec![*subpath],
            NodeKind::Append { subpaths } | NodeKind::MergeAppend { subpaths } => subpaths.clone(),
            NodeKind::RecursiveUnion { left, right } => vec![*left, *right],
            NodeKind::SeqScan
            | NodeKind::SampleScan { .. }
            | NodeKind::IndexScan(_)
            | NodeKind::IndexOnlyScan(_)
            | NodeKind::CteScan { .. }
            | NodeKind::ResultScan
            | NodeKind::TidScan
            | NodeKind::TidRangeScan
            | NodeKind::FunctionScan
            | NodeKind::TableFuncScan
            | NodeKind::ValuesScan
            | NodeKind::WorkTableScan
            | NodeKind::NamedTuplestoreScan
            | NodeKind::ForeignScan
            | NodeKind::CustomScan
            | NodeKind::MinMaxAgg
            | NodeKind::GroupResult => Vec::new(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut NodeId> {
        match self {
            NodeKind::BitmapHeapScan { bitmapqual, .. } => vec![bitmapqual],
            NodeKind::BitmapAnd { quals, .. } | NodeKind::BitmapOr { quals, .. } => {
                quals.iter_mut().collect()
            }
            NodeKind::NestLoop(join)
            | NodeKind::HashJoin { join, .. }
            | NodeKind::MergeJoin { join, .. } => vec![&mut join.outer, &mut join.inner],
            NodeKind::SubqueryScan { subpath, .. }
            | NodeKind::Projection { subpath, .. }
            | NodeKind::Sort { subpath, .. }
            | NodeKind::IncrementalSort { subpath, .. }
            | NodeKind::Material { subpath }
            | NodeKind::Memoize { subpath }
            | NodeKind::Unique { subpath, .. }
            | NodeKind::Gather { subpath, .. }
            | NodeKind::GatherMerge { subpath, .. }
            | NodeKind::Group { subpath, .. }
            | NodeKind::Agg { subpath, .. }
            | NodeKind::GroupingSets { subpath, .. }
            | NodeKind::WindowAgg { subpath, .. }
            | NodeKind::Limit { subpath, .. }
            | NodeKind::SetOp { subpath, .. }
            | NodeKind::ModifyTable { subpath }
            | NodeKind::LockRows { subpath }
            | NodeKind::ProjectSet { subpath } => vec![subpath],
            NodeKind::Append { subpaths } | NodeKind::MergeAppend { subpaths } => {
                subpaths.iter_mut().collect()
            }
            NodeKind::RecursiveUnion { left, right } => vec![left, right],
            _ => Vec::new(),
        }
    }

    pub fn index_access(&self) -> Option<&IndexAccess> {
        match self {
            NodeKind::IndexScan(access) | NodeKind::IndexOnlyScan(access) => Some(access),
            _ => None,
        }
    }

    pub fn is_index_scan(&self) -> bool {
        self.index_access().is_some()
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(
            self,
            NodeKind::BitmapHeapScan { .. } | NodeKind::BitmapAnd { .. } | NodeKind::BitmapOr { .. }
        )
    }

    /// Whether the node can evaluate an arbitrary target list itself.
    pub fn is_projection_capable(&self) -> bool {
        !matches!(
            self,
            NodeKind::Material { .. }
                | NodeKind::Memoize { .. }
                | NodeKind::Sort { .. }
                | NodeKind::IncrementalSort { .. }
                | NodeKind::Unique { .. }
                | NodeKind::SetOp { .. }
                | NodeKind::LockRows { .. }
                | NodeKind::Limit { .. }
                | NodeKind::ModifyTable { .. }
                | NodeKind::MergeAppend { .. }
                | NodeKind::RecursiveUnion { .. }
                | NodeKind::ProjectSet { .. }
                | NodeKind::Append { .. }
        )
    }

    /// Whether the executor keeps the node's output, making rescans cheap.
    pub fn materializes_output(&self) -> bool {
        matches!(
            self,
            NodeKind::Material { .. }
                | NodeKind::FunctionScan
                | NodeKind::TableFuncScan
                | NodeKind::CteScan { .. }
                | NodeKind::NamedTuplestoreScan
                | NodeKind::WorkTableScan
                | NodeKind::Sort { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(default)]
    pub header: PathHeader,
    pub kind: NodeKind,
}

impl PlanNode {
    pub fn new(header: PathHeader, kind: NodeKind) -> Self {
        Self { header, kind }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Arena holding every node of a planned statement.
///
/// Nodes refer to each other by [`NodeId`]; an id stays valid for the
/// arena's lifetime, so replacing a slot's content never invalidates the
/// references other nodes hold to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanArena {
    nodes: Vec<PlanNode>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: PlanNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> PlanResult<&PlanNode> {
        self.nodes.get(id.0).ok_or(PlanError::MissingNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> PlanResult<&mut PlanNode> {
        self.nodes.get_mut(id.0).ok_or(PlanError::MissingNode(id))
    }

    pub fn header(&self, id: NodeId) -> PlanResult<&PathHeader> {
        self.get(id).map(|n| &n.header)
    }

    pub fn children(&self, id: NodeId) -> PlanResult<Vec<NodeId>> {
        self.get(id).map(|n| n.kind.children())
    }

    /// Overwrite the content of slot `id` with `replacement`.
    ///
    /// The slot keeps its `parent` linkage; everything else becomes the
    /// replacement's. Returns the previous content.
    pub fn replace_node(&mut self, id: NodeId, mut replacement: PlanNode) -> PlanResult<PlanNode> {
        let slot = self.get_mut(id)?;
        replacement.header.parent = slot.header.parent;
        Ok(std::mem::replace(slot, replacement))
    }

    /// Deep-copy the subtree rooted at `root` in `source` into this arena.
    pub fn graft(&mut self, source: &PlanArena, root: NodeId) -> PlanResult<NodeId> {
        let node = self.graft_node(source, root)?;
        Ok(self.push(node))
    }

    /// Copy the node at `root` out of `source`, grafting only its descendants.
    ///
    /// The returned node is not stored anywhere yet; its child ids point
    /// into this arena.
    pub fn graft_node(&mut self, source: &PlanArena, root: NodeId) -> PlanResult<PlanNode> {
        let mut node = source.get(root)?.clone();
        for child in node.kind.children_mut() {
            *child = self.graft(source, *child)?;
        }
        Ok(node)
    }

    /// Node ids of the subtree rooted at `root`, parents before children.
    pub fn subtree(&self, root: NodeId) -> PlanResult<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children = self.children(id)?;
            out.push(id);
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }
}
