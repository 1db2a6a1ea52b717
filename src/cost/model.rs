use crate::config::OptimizerConfig;
use crate::planner::node::{
    AggCosts, AggStrategy, IndexAccess, JoinPath, PathHeader, Rollup, UniqueMethod,
};
use crate::planner::query::{CostedPlan, SubplanRef};
use crate::planner::relation::{Clause, QualCost, RelationInfo};

/// Startup cost, total cost, and output rows produced by one oracle call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostEstimate {
    pub startup: f64,
    pub total: f64,
    pub rows: f64,
}

impl CostEstimate {
    pub const fn new(startup: f64, total: f64, rows: f64) -> Self {
        Self {
            startup,
            total,
            rows,
        }
    }

    pub fn apply_to(&self, header: &mut PathHeader) {
        header.set_estimate(self.startup, self.total, self.rows);
    }
}

/// Cost summary of an input that has already been costed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputCost {
    pub startup: f64,
    pub total: f64,
    pub rows: f64,
    pub width: u32,
}

impl InputCost {
    pub fn run(&self) -> f64 {
        self.total - self.startup
    }
}

impl From<&PathHeader> for InputCost {
    fn from(header: &PathHeader) -> Self {
        Self {
            startup: header.startup_cost,
            total: header.total_cost,
            rows: header.rows,
            width: header.width,
        }
    }
}

impl From<&CostedPlan> for InputCost {
    fn from(plan: &CostedPlan) -> Self {
        Self {
            startup: plan.startup_cost,
            total: plan.total_cost,
            rows: plan.rows,
            width: plan.width,
        }
    }
}

/// Cost and selectivity of a bitmap input (an index scan or an AND/OR tree).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BitmapInput {
    pub cost: f64,
    pub selectivity: f64,
}

impl BitmapInput {
    /// Bitmap input of a costed index access returning `rows` tuples.
    pub fn from_index(access: &IndexAccess, rows: f64, config: &OptimizerConfig) -> Self {
        // Small per-tuple charge for building the bitmap.
        Self {
            cost: access.index_total_cost + 0.1 * config.constants.cpu_operator_cost * rows,
            selectivity: access.selectivity,
        }
    }
}

/// The host's cost formulas.
///
/// Every method reads the live tunables from `config`; methods taking
/// clauses by `&mut` fill in the clauses' evaluation-cost memo as a side
/// effect.
pub trait CostModel {
    fn qual_cost(&self, clauses: &mut [Clause], config: &OptimizerConfig) -> QualCost;

    fn cost_seqscan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_samplescan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        fraction: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    /// Cost an index scan, refreshing `access.selectivity` and `access.index_total_cost`.
    fn cost_index(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        access: &mut IndexAccess,
        index_only: bool,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_bitmap_and(&self, inputs: &[BitmapInput], config: &OptimizerConfig) -> BitmapInput;

    fn cost_bitmap_or(&self, inputs: &[BitmapInput], config: &OptimizerConfig) -> BitmapInput;

    fn cost_bitmap_heap_scan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        bitmap: BitmapInput,
        loop_count: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_subqueryscan(
        &self,
        rel: Option<&mut RelationInfo>,
        header: &PathHeader,
        subpath: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_ctescan(
        &self,
        rel: Option<&mut RelationInfo>,
        header: &PathHeader,
        cte: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_resultscan(&self, header: &PathHeader, config: &OptimizerConfig) -> CostEstimate;

    fn cost_nestloop(
        &self,
        join: &mut JoinPath,
        outer: InputCost,
        inner: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_hashjoin(
        &self,
        join: &mut JoinPath,
        hash_clauses: &mut [Clause],
        parallel_hash: bool,
        outer: InputCost,
        inner: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    #[allow(clippy::too_many_arguments)]
    fn cost_mergejoin(
        &self,
        join: &mut JoinPath,
        merge_clauses: &mut [Clause],
        outer_sortkeys: &[String],
        inner_sortkeys: &[String],
        materialize_inner: bool,
        outer: InputCost,
        inner: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_sort(
        &self,
        input_cost: f64,
        tuples: f64,
        width: u32,
        limit_tuples: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_incremental_sort(
        &self,
        presorted_cols: usize,
        input: InputCost,
        limit_tuples: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_material(&self, input: InputCost, config: &OptimizerConfig) -> CostEstimate;

    fn cost_gather(
        &self,
        input: InputCost,
        num_workers: u32,
        override_rows: Option<f64>,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    /// `input` is the already-sorted input, a Sort on top of the subpath if needed.
    fn cost_gather_merge(
        &self,
        input: InputCost,
        num_workers: u32,
        override_rows: Option<f64>,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_group(
        &self,
        num_group_cols: usize,
        num_groups: f64,
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    #[allow(clippy::too_many_arguments)]
    fn cost_agg(
        &self,
        strategy: AggStrategy,
        agg_costs: Option<&AggCosts>,
        num_group_cols: usize,
        num_groups: f64,
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_grouping_sets(
        &self,
        strategy: AggStrategy,
        agg_costs: Option<&AggCosts>,
        rollups: &[Rollup],
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_windowagg(
        &self,
        num_funcs: usize,
        partition_cols: usize,
        order_cols: usize,
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_unique(
        &self,
        method: UniqueMethod,
        num_keys: usize,
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate;

    fn cost_append(&self, children: &[InputCost], config: &OptimizerConfig) -> CostEstimate;

    fn cost_merge_append(&self, children: &[InputCost], config: &OptimizerConfig) -> CostEstimate;

    /// Refresh `subplan.startup_cost` and `subplan.per_call_cost` from its final plan.
    fn cost_subplan(
        &self,
        subplan: &mut SubplanRef,
        plan: &CostedPlan,
        materializes_output: bool,
        config: &OptimizerConfig,
    );
}
