use crate::config::{DISABLE_COST, OptimizerConfig};
use crate::cost::model::{BitmapInput, CostEstimate, CostModel, InputCost};
use crate::cost::{clamp_row_est, parallel_divisor, relation_bytes};
use crate::planner::node::{
    AggCosts, AggStrategy, IndexAccess, JoinPath, JoinType, PathHeader, Rollup, UniqueMethod,
};
use crate::planner::query::{CostedPlan, SubLinkKind, SubplanRef};
use crate::planner::relation::{Clause, QualCost, RelationInfo};

/// Extra per-row CPU charged by Append and MergeAppend for passing tuples up.
pub const APPEND_CPU_COST_MULTIPLIER: f64 = 0.5;

/// Multiplier applied to `work_mem` for hash tables.
const HASH_MEM_MULTIPLIER: f64 = 2.0;

/// Group count assumed for presorted keys without statistics.
const DEFAULT_NUM_DISTINCT: f64 = 200.0;

/// Number of runs merged per pass by an external sort.
const MERGE_ORDER: f64 = 6.0;

/// Partition fan-out of a spilling hash aggregate.
const HASHAGG_PARTITIONS: f64 = 4.0;

/// PostgreSQL-flavoured cost formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCostModel;

impl StandardCostModel {
    pub fn new() -> Self {
        Self
    }

    fn clause_cost(clause: &mut Clause, config: &OptimizerConfig) -> QualCost {
        if let Some(cost) = clause.eval_cost {
            return cost;
        }
        let cost = QualCost::new(
            0.0,
            f64::from(clause.operators) * config.constants.cpu_operator_cost,
        );
        clause.eval_cost = Some(cost);
        cost
    }

    fn selectivity(clauses: &[Clause]) -> f64 {
        clauses.iter().map(|c| c.selectivity).product()
    }

    fn sort_mem_bytes(config: &OptimizerConfig) -> f64 {
        config.constants.work_mem_kb * 1024.0
    }

    fn hash_mem_bytes(config: &OptimizerConfig) -> f64 {
        Self::sort_mem_bytes(config) * HASH_MEM_MULTIPLIER
    }

    /// Startup and run cost of sorting `tuples` rows, excluding the input.
    fn tuplesort_cost(
        tuples: f64,
        width: u32,
        limit_tuples: f64,
        config: &OptimizerConfig,
    ) -> (f64, f64) {
        let c = &config.constants;
        let tuples = tuples.max(2.0);
        let comparison_cost = 2.0 * c.cpu_operator_cost;
        let input_bytes = relation_bytes(tuples, width);
        let sort_mem = Self::sort_mem_bytes(config);

        let bounded = limit_tuples > 0.0 && limit_tuples < tuples;
        let (output_tuples, output_bytes) = if bounded {
            let output = limit_tuples * 2.0;
            (output, relation_bytes(output, width))
        } else {
            (tuples, input_bytes)
        };

        let startup = if output_bytes > sort_mem {
            let npages = (input_bytes / config.constants.block_size).ceil();
            let nruns = input_bytes / sort_mem;
            let log_runs = if nruns > MERGE_ORDER {
                (nruns.ln() / MERGE_ORDER.ln()).ceil()
            } else {
                1.0
            };
            let page_accesses = 2.0 * npages * log_runs;
            comparison_cost * tuples * tuples.log2()
                + page_accesses * (config.seq_page_cost * 0.75 + config.random_page_cost * 0.25)
        } else if bounded && (tuples > output_tuples || input_bytes > sort_mem) {
            comparison_cost * tuples * output_tuples.log2()
        } else {
            comparison_cost * tuples * tuples.log2()
        };

        (startup, c.cpu_operator_cost * tuples)
    }

    fn apply_qual(
        &self,
        qual: &mut [Clause],
        startup: &mut f64,
        total: &mut f64,
        output_rows: f64,
        config: &OptimizerConfig,
    ) -> f64 {
        if qual.is_empty() {
            return output_rows;
        }
        let cost = self.qual_cost(qual, config);
        *startup += cost.startup;
        *total += cost.startup + cost.per_tuple * output_rows;
        clamp_row_est(output_rows * Self::selectivity(qual))
    }
}

/// Mackert–Lohman estimate of heap pages fetched for `tuples_fetched` tuples.
pub fn index_pages_fetched(
    tuples_fetched: f64,
    pages: f64,
    index_pages: f64,
    config: &OptimizerConfig,
) -> f64 {
    let t = pages.max(1.0);
    let total_pages = t + index_pages.max(0.0);
    let b = (config.constants.effective_cache_size * t / total_pages)
        .ceil()
        .max(1.0);
    let n = tuples_fetched;

    if t <= b {
        let fetched = (2.0 * t * n) / (2.0 * t + n);
        if fetched >= t { t } else { fetched.ceil() }
    } else {
        let lim = (2.0 * t * b) / (2.0 * t - b);
        let fetched = if n <= lim {
            (2.0 * t * n) / (2.0 * t + n)
        } else {
            b + (n - lim) * (t - b) / t
        };
        fetched.ceil()
    }
}

fn join_rows(join_type: JoinType, outer: f64, inner: f64, selectivity: f64) -> f64 {
    let matched = outer * inner * selectivity;
    let rows = match join_type {
        JoinType::Inner => matched,
        JoinType::Left => matched.max(outer),
        JoinType::Right => matched.max(inner),
        JoinType::Full => matched.max(outer).max(inner),
        JoinType::Semi => outer * (inner * selectivity).min(1.0),
        JoinType::Anti => outer * (1.0 - (inner * selectivity).min(1.0)),
    };
    clamp_row_est(rows)
}

impl CostModel for StandardCostModel {
    fn qual_cost(&self, clauses: &mut [Clause], config: &OptimizerConfig) -> QualCost {
        clauses
            .iter_mut()
            .map(|clause| Self::clause_cost(clause, config))
            .fold(QualCost::default(), |acc, cost| acc.add(&cost))
    }

    fn cost_seqscan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let qual = self.qual_cost(&mut rel.base_restrict, config);
        let mut rows = clamp_row_est(rel.param_rows(header.param.as_ref()));

        let mut startup = qual.startup + header.target.startup;
        let disk_run = config.seq_page_cost * rel.pages;
        let mut cpu_run = (c.cpu_tuple_cost + qual.per_tuple) * rel.tuples;
        cpu_run += header.target.per_tuple * rows;

        if header.parallel_workers > 0 {
            let divisor = parallel_divisor(header.parallel_workers);
            cpu_run /= divisor;
            rows = clamp_row_est(rows / divisor);
        }
        if !config.flags.enable_seqscan {
            startup += DISABLE_COST;
        }

        CostEstimate::new(startup, startup + cpu_run + disk_run, rows)
    }

    fn cost_samplescan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        fraction: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let fraction = fraction.clamp(0.0, 1.0);
        let qual = self.qual_cost(&mut rel.base_restrict, config);
        let pages = (rel.pages * fraction).ceil();
        let tuples = rel.tuples * fraction;
        let rows = clamp_row_est(rel.param_rows(header.param.as_ref()) * fraction);

        let startup = qual.startup + header.target.startup;
        let run = config.random_page_cost * pages
            + (c.cpu_tuple_cost + qual.per_tuple) * tuples
            + header.target.per_tuple * rows;

        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_index(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        access: &mut IndexAccess,
        index_only: bool,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let (index_pages, index_columns) = rel
            .index(access.index)
            .map_or((1.0, Vec::new()), |i| (i.pages.max(1.0), i.columns.clone()));
        let param = header.param.clone();
        let is_index_qual = |clause: &Clause| {
            clause
                .leading_column()
                .is_some_and(|col| index_columns.iter().any(|c| c == col))
        };

        // Clauses the index can answer narrow the scan; the rest are
        // rechecked against every fetched heap tuple.
        let mut selectivity = 1.0;
        let mut index_ops = 0u32;
        let mut qpqual = QualCost::default();
        for clause in &mut rel.base_restrict {
            if is_index_qual(clause) {
                selectivity *= clause.selectivity;
                index_ops += clause.operators;
            } else {
                qpqual = qpqual.add(&Self::clause_cost(clause, config));
            }
        }
        for clause in &mut rel.join_clauses {
            let movable = match (&param, &clause.outer_rels) {
                (Some(outer), Some(needed)) => needed.is_subset_of(outer),
                _ => false,
            };
            if !movable {
                continue;
            }
            if is_index_qual(clause) {
                selectivity *= clause.selectivity;
                index_ops += clause.operators;
            } else {
                qpqual = qpqual.add(&Self::clause_cost(clause, config));
            }
        }

        let loop_count = access.loop_count.max(1.0);
        let tuples = rel.tuples.max(1.0);
        let num_index_tuples = clamp_row_est(selectivity * tuples);
        let num_index_pages = (selectivity * index_pages).ceil().max(1.0);
        let index_startup = if tuples > 1.0 {
            tuples.log2().ceil() * c.cpu_operator_cost
        } else {
            0.0
        };
        let index_page_reads = if loop_count > 1.0 {
            index_pages_fetched(num_index_pages * loop_count, index_pages, rel.pages, config)
                / loop_count
        } else {
            num_index_pages
        };
        let index_total = index_startup
            + index_page_reads * config.random_page_cost
            + num_index_tuples
                * (c.cpu_index_tuple_cost + f64::from(index_ops) * c.cpu_operator_cost);
        access.selectivity = selectivity;
        access.index_total_cost = index_total;

        let tuples_fetched = clamp_row_est(selectivity * rel.tuples);
        let heap_pages = rel.pages.max(1.0);
        let visible = if index_only {
            1.0 - rel.all_visible_frac.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let io = if loop_count > 1.0 {
            let pages = (index_pages_fetched(tuples_fetched * loop_count, heap_pages, index_pages, config)
                * visible)
                .ceil();
            pages * config.random_page_cost / loop_count
        } else {
            let pages =
                (index_pages_fetched(tuples_fetched, heap_pages, index_pages, config) * visible)
                    .ceil();
            pages * config.random_page_cost
        };

        let mut rows = clamp_row_est(rel.param_rows(param.as_ref()));
        let mut startup = index_startup + qpqual.startup + header.target.startup;
        let mut cpu_run = (c.cpu_tuple_cost + qpqual.per_tuple) * tuples_fetched
            + header.target.per_tuple * rows;
        if header.parallel_workers > 0 {
            let divisor = parallel_divisor(header.parallel_workers);
            cpu_run /= divisor;
            rows = clamp_row_est(rows / divisor);
        }

        let enabled = if index_only {
            config.flags.enable_indexonlyscan
        } else {
            config.flags.enable_indexscan
        };
        if !enabled {
            startup += DISABLE_COST;
        }

        let run = (index_total - index_startup) + io + cpu_run;
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_bitmap_and(&self, inputs: &[BitmapInput], config: &OptimizerConfig) -> BitmapInput {
        let mut result = BitmapInput {
            cost: 0.0,
            selectivity: 1.0,
        };
        for (i, input) in inputs.iter().enumerate() {
            result.cost += input.cost;
            result.selectivity *= input.selectivity;
            if i > 0 {
                result.cost += 100.0 * config.constants.cpu_operator_cost;
            }
        }
        result
    }

    fn cost_bitmap_or(&self, inputs: &[BitmapInput], config: &OptimizerConfig) -> BitmapInput {
        let mut result = BitmapInput {
            cost: 0.0,
            selectivity: 0.0,
        };
        for (i, input) in inputs.iter().enumerate() {
            result.cost += input.cost;
            result.selectivity += input.selectivity;
            if i > 0 {
                result.cost += 100.0 * config.constants.cpu_operator_cost;
            }
        }
        result.selectivity = result.selectivity.min(1.0);
        result
    }

    fn cost_bitmap_heap_scan(
        &self,
        rel: &mut RelationInfo,
        header: &PathHeader,
        bitmap: BitmapInput,
        loop_count: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let tuples_fetched = clamp_row_est(bitmap.selectivity * rel.tuples);
        let t = rel.pages.max(1.0);
        let loop_count = loop_count.max(1.0);

        let pages_fetched = if loop_count > 1.0 {
            index_pages_fetched(tuples_fetched * loop_count, t, 0.0, config) / loop_count
        } else {
            (2.0 * t * tuples_fetched) / (2.0 * t + tuples_fetched)
        };
        let pages_fetched = if pages_fetched >= t {
            t
        } else {
            pages_fetched.ceil()
        };

        // Fetching most of the table degrades towards sequential reads.
        let cost_per_page = if pages_fetched >= 2.0 {
            config.random_page_cost
                - (config.random_page_cost - config.seq_page_cost) * (pages_fetched / t).sqrt()
        } else {
            config.random_page_cost
        };

        let qual = self.qual_cost(&mut rel.base_restrict, config);
        let mut rows = clamp_row_est(rel.param_rows(header.param.as_ref()));
        let mut startup = bitmap.cost + qual.startup + header.target.startup;
        let mut cpu_run = (c.cpu_tuple_cost + qual.per_tuple) * tuples_fetched
            + header.target.per_tuple * rows;
        if header.parallel_workers > 0 {
            let divisor = parallel_divisor(header.parallel_workers);
            cpu_run /= divisor;
            rows = clamp_row_est(rows / divisor);
        }
        if !config.flags.enable_bitmapscan {
            startup += DISABLE_COST;
        }

        CostEstimate::new(startup, startup + pages_fetched * cost_per_page + cpu_run, rows)
    }

    fn cost_subqueryscan(
        &self,
        rel: Option<&mut RelationInfo>,
        header: &PathHeader,
        subpath: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let (qual, selectivity) = match rel {
            Some(rel) => (
                self.qual_cost(&mut rel.base_restrict, config),
                Self::selectivity(&rel.base_restrict),
            ),
            None => (QualCost::default(), 1.0),
        };
        let rows = clamp_row_est(subpath.rows * selectivity);
        let startup = subpath.startup + qual.startup + header.target.startup;
        let run = subpath.run()
            + (config.constants.cpu_tuple_cost + qual.per_tuple) * subpath.rows
            + header.target.per_tuple * rows;
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_ctescan(
        &self,
        rel: Option<&mut RelationInfo>,
        header: &PathHeader,
        cte: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let (qual, selectivity) = match rel {
            Some(rel) => (
                self.qual_cost(&mut rel.base_restrict, config),
                Self::selectivity(&rel.base_restrict),
            ),
            None => (QualCost::default(), 1.0),
        };
        let rows = clamp_row_est(cte.rows * selectivity);
        let startup = qual.startup + header.target.startup;
        let run = (config.constants.cpu_tuple_cost + qual.per_tuple) * cte.rows
            + header.target.per_tuple * rows;
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_resultscan(&self, header: &PathHeader, config: &OptimizerConfig) -> CostEstimate {
        let rows = clamp_row_est(header.rows);
        let startup = header.target.startup;
        let run = (config.constants.cpu_tuple_cost + header.target.per_tuple) * rows;
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_nestloop(
        &self,
        join: &mut JoinPath,
        outer: InputCost,
        inner: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let outer_rows = outer.rows.max(1.0);
        let mut startup = outer.startup + inner.startup;
        let mut run = outer.run() + inner.run();
        // Every rescan after the first pays the inner side in full.
        if outer_rows > 1.0 {
            run += (outer_rows - 1.0) * inner.total;
        }

        let qual = self.qual_cost(&mut join.clauses, config);
        let selectivity = Self::selectivity(&join.clauses);
        let ntuples = outer_rows * inner.rows.max(1.0);
        startup += qual.startup;
        run += (config.constants.cpu_tuple_cost + qual.per_tuple) * ntuples;

        if !config.flags.enable_nestloop {
            startup += DISABLE_COST;
        }
        let rows = join_rows(join.join_type, outer.rows, inner.rows, selectivity);
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_hashjoin(
        &self,
        join: &mut JoinPath,
        hash_clauses: &mut [Clause],
        parallel_hash: bool,
        outer: InputCost,
        inner: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let num_hash_clauses = hash_clauses.len().max(1) as f64;

        // Building the hash table is all startup.
        let mut startup = outer.startup + inner.total;
        let mut run = outer.run();
        startup += (c.cpu_operator_cost * num_hash_clauses + c.cpu_tuple_cost) * inner.rows;
        run += c.cpu_operator_cost * num_hash_clauses * outer.rows;

        let inner_bytes = relation_bytes(inner.rows, inner.width);
        let hash_mem = Self::hash_mem_bytes(config);
        if inner_bytes > hash_mem {
            let inner_pages = (inner_bytes / c.block_size).ceil();
            let outer_pages = (relation_bytes(outer.rows, outer.width) / c.block_size).ceil();
            startup += config.seq_page_cost * inner_pages;
            run += config.seq_page_cost * (inner_pages + 2.0 * outer_pages);
        }

        let hash_qual = self.qual_cost(hash_clauses, config);
        let hash_selectivity = Self::selectivity(hash_clauses);
        let bucket_fraction = hash_selectivity.max(1.0 / inner.rows.max(1.0));
        startup += hash_qual.startup;
        run += hash_qual.per_tuple
            * outer.rows
            * clamp_row_est(inner.rows * bucket_fraction)
            * 0.5;

        let other_qual = self.qual_cost(&mut join.clauses, config);
        let rows = join_rows(
            join.join_type,
            outer.rows,
            inner.rows,
            hash_selectivity * Self::selectivity(&join.clauses),
        );
        startup += other_qual.startup;
        run += (c.cpu_tuple_cost + other_qual.per_tuple) * rows;

        if !config.flags.enable_hashjoin || (parallel_hash && !config.flags.enable_parallel_hash) {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + run, rows)
    }

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
    ) -> CostEstimate {
        let c = &config.constants;
        let sorted = |input: InputCost, keys: &[String]| {
            if keys.is_empty() {
                (input.startup, input.run())
            } else {
                let sort = self.cost_sort(input.total, input.rows, input.width, 0.0, config);
                (sort.startup, sort.total - sort.startup)
            }
        };
        let (outer_startup, outer_run) = sorted(outer, outer_sortkeys);
        let (inner_startup, mut inner_run) = sorted(inner, inner_sortkeys);
        if materialize_inner {
            inner_run += c.cpu_operator_cost * inner.rows;
        }

        let merge_qual = self.qual_cost(merge_clauses, config);
        let other_qual = self.qual_cost(&mut join.clauses, config);
        let rows = join_rows(
            join.join_type,
            outer.rows,
            inner.rows,
            Self::selectivity(merge_clauses) * Self::selectivity(&join.clauses),
        );

        let mut startup = outer_startup + inner_startup + merge_qual.startup + other_qual.startup;
        let run = outer_run
            + inner_run
            + merge_qual.per_tuple * (outer.rows + inner.rows)
            + (c.cpu_tuple_cost + other_qual.per_tuple) * rows;

        if !config.flags.enable_mergejoin {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_sort(
        &self,
        input_cost: f64,
        tuples: f64,
        width: u32,
        limit_tuples: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let (sort_startup, sort_run) = Self::tuplesort_cost(tuples, width, limit_tuples, config);
        let mut startup = input_cost + sort_startup;
        if !config.flags.enable_sort {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + sort_run, tuples)
    }

    fn cost_incremental_sort(
        &self,
        presorted_cols: usize,
        input: InputCost,
        limit_tuples: f64,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let input_groups = if presorted_cols == 0 {
            1.0
        } else {
            clamp_row_est(DEFAULT_NUM_DISTINCT.min(input.rows))
        };
        let group_tuples = input.rows / input_groups;
        let group_input_run = input.run() / input_groups;
        let (group_startup, group_run) =
            Self::tuplesort_cost(group_tuples * 1.5, input.width, limit_tuples, config);

        let mut startup = input.startup + group_startup + group_input_run;
        let comparison_cost = 2.0 * c.cpu_operator_cost;
        let run = group_run
            + (group_run + group_startup) * (input_groups - 1.0)
            + group_input_run * (input_groups - 1.0)
            + (c.cpu_tuple_cost + comparison_cost) * input.rows
            + 2.0 * c.cpu_tuple_cost * input_groups;

        if !config.flags.enable_sort {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + run, input.rows)
    }

    fn cost_material(&self, input: InputCost, config: &OptimizerConfig) -> CostEstimate {
        let c = &config.constants;
        let mut startup = input.startup;
        let mut run = input.run() + 2.0 * c.cpu_operator_cost * input.rows;
        let bytes = relation_bytes(input.rows, input.width);
        if bytes > Self::sort_mem_bytes(config) {
            run += config.seq_page_cost * (bytes / c.block_size).ceil();
        }
        if !config.flags.enable_material {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + run, input.rows)
    }

    fn cost_gather(
        &self,
        input: InputCost,
        num_workers: u32,
        override_rows: Option<f64>,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let rows = override_rows.unwrap_or_else(|| input.rows * parallel_divisor(num_workers));
        let startup = input.startup + c.parallel_setup_cost;
        let run = input.run() + c.parallel_tuple_cost * rows;
        CostEstimate::new(startup, startup + run, clamp_row_est(rows))
    }

    fn cost_gather_merge(
        &self,
        input: InputCost,
        num_workers: u32,
        override_rows: Option<f64>,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let rows = override_rows.unwrap_or_else(|| input.rows * parallel_divisor(num_workers));
        let n = f64::from(num_workers) + 1.0;
        let log_n = n.log2();
        let comparison_cost = 2.0 * c.cpu_operator_cost;

        // Heap build across all participants, then one comparison per tuple.
        let mut startup = comparison_cost * n * log_n + c.parallel_setup_cost + input.startup;
        let run = rows * comparison_cost * log_n
            + c.cpu_operator_cost * rows
            + c.parallel_tuple_cost * rows * 1.05
            + input.run();

        if !config.flags.enable_gathermerge {
            startup += DISABLE_COST;
        }
        CostEstimate::new(startup, startup + run, clamp_row_est(rows))
    }

    fn cost_group(
        &self,
        num_group_cols: usize,
        num_groups: f64,
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let mut startup = input.startup;
        let mut total = input.total
            + config.constants.cpu_operator_cost * input.rows * num_group_cols as f64;
        let rows = self.apply_qual(qual, &mut startup, &mut total, num_groups, config);
        CostEstimate::new(startup, total, clamp_row_est(rows))
    }

    fn cost_agg(
        &self,
        strategy: AggStrategy,
        agg_costs: Option<&AggCosts>,
        num_group_cols: usize,
        num_groups: f64,
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let costs = agg_costs.copied().unwrap_or_default();
        let group_cols = num_group_cols as f64;
        let num_groups = num_groups.max(1.0);

        let (mut startup, mut total, output_rows) = match strategy {
            AggStrategy::Plain => {
                let startup = input.total
                    + costs.trans_startup
                    + costs.trans_per_tuple * input.rows
                    + costs.final_per_group;
                (startup, startup + c.cpu_tuple_cost, 1.0)
            }
            AggStrategy::Sorted | AggStrategy::Mixed => {
                let startup = input.startup + costs.trans_startup;
                let total = input.total
                    + costs.trans_per_tuple * input.rows
                    + c.cpu_operator_cost * input.rows * group_cols
                    + costs.final_per_group * num_groups
                    + c.cpu_tuple_cost * num_groups;
                (startup, total, num_groups)
            }
            AggStrategy::Hashed => {
                let mut startup = input.total
                    + costs.trans_startup
                    + costs.trans_per_tuple * input.rows
                    + c.cpu_operator_cost * input.rows * group_cols;
                let mut total =
                    startup + costs.final_per_group * num_groups + c.cpu_tuple_cost * num_groups;

                let entry_size = f64::from(input.width) + 24.0 + costs.transition_space;
                let hash_mem = Self::hash_mem_bytes(config);
                if entry_size * num_groups > hash_mem {
                    let batches = (entry_size * num_groups / hash_mem).ceil();
                    let depth = (batches.ln() / HASHAGG_PARTITIONS.ln()).ceil().max(1.0);
                    let pages = (relation_bytes(input.rows, input.width) / c.block_size).ceil();
                    let pages_moved = pages * depth;
                    let spill_cpu = 2.0 * c.cpu_tuple_cost * input.rows * depth;
                    startup += pages_moved * config.random_page_cost + spill_cpu;
                    total += pages_moved * config.random_page_cost
                        + pages_moved * config.seq_page_cost
                        + spill_cpu;
                }
                if !config.flags.enable_hashagg {
                    startup += DISABLE_COST;
                    total += DISABLE_COST;
                }
                (startup, total, num_groups)
            }
        };

        let rows = self.apply_qual(qual, &mut startup, &mut total, output_rows, config);
        CostEstimate::new(startup, total, clamp_row_est(rows))
    }

    fn cost_grouping_sets(
        &self,
        strategy: AggStrategy,
        agg_costs: Option<&AggCosts>,
        rollups: &[Rollup],
        qual: &mut [Clause],
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let Some((first, rest)) = rollups.split_first() else {
            return self.cost_agg(strategy, agg_costs, 0, 1.0, qual, input, config);
        };

        let first_strategy = if first.hashed {
            AggStrategy::Hashed
        } else if strategy == AggStrategy::Plain {
            AggStrategy::Plain
        } else {
            AggStrategy::Sorted
        };
        let head = self.cost_agg(
            first_strategy,
            agg_costs,
            first.num_group_cols,
            first.num_groups,
            &mut [],
            input,
            config,
        );
        let mut startup = head.startup;
        let mut total = head.total;
        let mut rows = head.rows;

        // Later rollups re-read the input without paying for it again.
        for rollup in rest {
            let reread = if rollup.hashed {
                InputCost {
                    startup: 0.0,
                    total: 0.0,
                    ..input
                }
            } else {
                let sort = self.cost_sort(0.0, input.rows, input.width, 0.0, config);
                InputCost {
                    startup: sort.startup,
                    total: sort.total,
                    ..input
                }
            };
            let rollup_strategy = if rollup.hashed {
                AggStrategy::Hashed
            } else {
                AggStrategy::Sorted
            };
            let cost = self.cost_agg(
                rollup_strategy,
                agg_costs,
                rollup.num_group_cols,
                rollup.num_groups,
                &mut [],
                reread,
                config,
            );
            total += cost.total;
            rows += cost.rows;
        }

        let rows = self.apply_qual(qual, &mut startup, &mut total, rows, config);
        CostEstimate::new(startup, total, clamp_row_est(rows))
    }

    fn cost_windowagg(
        &self,
        num_funcs: usize,
        partition_cols: usize,
        order_cols: usize,
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let per_row = c.cpu_operator_cost * num_funcs as f64
            + c.cpu_operator_cost * (partition_cols + order_cols) as f64
            + c.cpu_tuple_cost;
        CostEstimate::new(input.startup, input.total + per_row * input.rows, input.rows)
    }

    fn cost_unique(
        &self,
        method: UniqueMethod,
        num_keys: usize,
        input: InputCost,
        config: &OptimizerConfig,
    ) -> CostEstimate {
        let c = &config.constants;
        let compare = c.cpu_operator_cost * input.rows * num_keys as f64;
        match method {
            UniqueMethod::Upper => {
                CostEstimate::new(input.startup, input.total + compare, input.rows)
            }
            UniqueMethod::Sorted { num_groups } => {
                let sort = self.cost_sort(input.total, input.rows, input.width, 0.0, config);
                CostEstimate::new(sort.startup, sort.total + compare, clamp_row_est(num_groups))
            }
            UniqueMethod::Hashed { num_groups } => self.cost_agg(
                AggStrategy::Hashed,
                None,
                num_keys,
                num_groups,
                &mut [],
                input,
                config,
            ),
        }
    }

    fn cost_append(&self, children: &[InputCost], config: &OptimizerConfig) -> CostEstimate {
        let Some(first) = children.first() else {
            return CostEstimate::default();
        };
        let rows: f64 = children.iter().map(|c| c.rows).sum();
        let total: f64 = children.iter().map(|c| c.total).sum::<f64>()
            + config.constants.cpu_tuple_cost * APPEND_CPU_COST_MULTIPLIER * rows;
        CostEstimate::new(first.startup, total, rows)
    }

    fn cost_merge_append(&self, children: &[InputCost], config: &OptimizerConfig) -> CostEstimate {
        let c = &config.constants;
        if children.is_empty() {
            return CostEstimate::default();
        }
        let rows: f64 = children.iter().map(|c| c.rows).sum();
        let input_startup: f64 = children.iter().map(|c| c.startup).sum();
        let input_run: f64 = children.iter().map(InputCost::run).sum();

        let n = (children.len() as f64).max(2.0);
        let log_n = n.log2();
        let comparison_cost = 2.0 * c.cpu_operator_cost;
        let startup = input_startup + comparison_cost * n * log_n;
        let run = input_run
            + rows * comparison_cost * log_n
            + c.cpu_tuple_cost * APPEND_CPU_COST_MULTIPLIER * rows;
        CostEstimate::new(startup, startup + run, rows)
    }

    fn cost_subplan(
        &self,
        subplan: &mut SubplanRef,
        plan: &CostedPlan,
        materializes_output: bool,
        config: &OptimizerConfig,
    ) {
        let c = &config.constants;
        let mut startup = 0.0;
        let mut per_call = c.cpu_operator_cost;

        if subplan.use_hash_table {
            startup += plan.total_cost + c.cpu_operator_cost * plan.rows;
        } else {
            let run = plan.total_cost - plan.startup_cost;
            per_call += match subplan.kind {
                SubLinkKind::Exists => run / clamp_row_est(plan.rows),
                SubLinkKind::All | SubLinkKind::Any => 0.5 * run,
                _ => run,
            };
            // A rescannable plan pays its startup only once.
            if !subplan.parameterized && materializes_output {
                startup += plan.startup_cost;
            } else {
                per_call += plan.startup_cost;
            }
        }

        subplan.startup_cost = startup;
        subplan.per_call_cost = per_call;
    }
}
