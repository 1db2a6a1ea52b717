use crate::config::OptimizerConfig;
use crate::cost::{BitmapInput, CostEstimate, CostModel, InputCost, clamp_row_est};
use crate::planner::error::PlanError;
use crate::planner::generate::IndexPathGenerator;
use crate::planner::node::{NodeId, NodeKind, PlanNode, UniqueMethod};
use crate::planner::query::PlannedQuery;
use crate::planner::relation::{QualCost, RelId, RelationInfo};
use crate::recost::error::{RecostError, RecostResult};
use crate::recost::orchestrator::Recoster;
use crate::recost::substitute;

/// What sits directly above the node being recosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OuterContext {
    #[default]
    None,
    /// The node is an input of a bitmap tree and is substituted with it.
    Bitmap,
}

/// How a node's cost is composed from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// Costed directly from relation statistics.
    Scan,
    /// Bitmap AND / OR over index inputs.
    BitmapTree,
    /// Two inputs combined by a join formula.
    Join,
    /// One input plus a per-row charge.
    SingleChild,
    /// Several inputs summed, or adopted when there is only one.
    MultiChild,
    /// Cost derived from a nested recosting pass.
    Nested,
    /// Not recostable.
    Unsupported,
}

impl Composition {
    pub fn of(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::SeqScan
            | NodeKind::SampleScan { .. }
            | NodeKind::IndexScan(_)
            | NodeKind::IndexOnlyScan(_)
            | NodeKind::BitmapHeapScan { .. }
            | NodeKind::CteScan { .. }
            | NodeKind::ResultScan => Composition::Scan,
            NodeKind::BitmapAnd { .. } | NodeKind::BitmapOr { .. } => Composition::BitmapTree,
            NodeKind::NestLoop(_) | NodeKind::HashJoin { .. } | NodeKind::MergeJoin { .. } => {
                Composition::Join
            }
            NodeKind::Projection { .. }
            | NodeKind::Sort { .. }
            | NodeKind::IncrementalSort { .. }
            | NodeKind::Material { .. }
            | NodeKind::Memoize { .. }
            | NodeKind::Unique { .. }
            | NodeKind::Gather { .. }
            | NodeKind::GatherMerge { .. }
            | NodeKind::Group { .. }
            | NodeKind::Agg { .. }
            | NodeKind::GroupingSets { .. }
            | NodeKind::WindowAgg { .. }
            | NodeKind::Limit { .. }
            | NodeKind::SetOp { .. } => Composition::SingleChild,
            NodeKind::Append { .. } | NodeKind::MergeAppend { .. } => Composition::MultiChild,
            NodeKind::SubqueryScan { .. } => Composition::Nested,
            NodeKind::TidScan
            | NodeKind::TidRangeScan
            | NodeKind::FunctionScan
            | NodeKind::TableFuncScan
            | NodeKind::ValuesScan
            | NodeKind::WorkTableScan
            | NodeKind::NamedTuplestoreScan
            | NodeKind::ForeignScan
            | NodeKind::CustomScan
            | NodeKind::MinMaxAgg
            | NodeKind::GroupResult
            | NodeKind::ModifyTable { .. }
            | NodeKind::LockRows { .. }
            | NodeKind::ProjectSet { .. }
            | NodeKind::RecursiveUnion { .. } => Composition::Unsupported,
        }
    }
}

/// True when `keys` is a prefix of `other`.
fn pathkeys_contained_in(keys: &[String], other: &[String]) -> bool {
    other.starts_with(keys)
}

/// Apply OFFSET and LIMIT estimates to an input's cost and rows.
///
/// Zero means absent; a negative estimate means unknown and is taken as
/// ten percent of the input.
pub fn adjust_limit_rows_costs(input: InputCost, offset_est: f64, count_est: f64) -> CostEstimate {
    let input_rows = input.rows;
    let run = input.run();
    let mut rows = input.rows;
    let mut startup = input.startup;
    let mut total = input.total;

    if offset_est != 0.0 {
        let offset_rows = if offset_est > 0.0 {
            offset_est
        } else {
            clamp_row_est(input_rows * 0.10)
        }
        .min(rows);
        if input_rows > 0.0 {
            startup += run * offset_rows / input_rows;
        }
        rows = clamp_row_est(rows - offset_rows);
    }

    if count_est != 0.0 {
        let count_rows = if count_est > 0.0 {
            count_est
        } else {
            clamp_row_est(input_rows * 0.10)
        }
        .min(rows);
        if input_rows > 0.0 {
            total = startup + run * count_rows / input_rows;
        }
        rows = clamp_row_est(count_rows);
    }

    CostEstimate::new(startup, total, rows)
}

fn scan_relation<'q>(
    query: &'q mut PlannedQuery,
    parent: Option<RelId>,
    name: &str,
) -> RecostResult<&'q mut RelationInfo> {
    let parent = parent.ok_or_else(|| PlanError::MalformedPlan(format!("{name} has no relation")))?;
    let rel = query.relation_mut(parent)?;
    rel.forget_clause_costs();
    Ok(rel)
}

fn optional_relation(
    query: &mut PlannedQuery,
    parent: Option<RelId>,
) -> RecostResult<Option<&mut RelationInfo>> {
    match parent {
        Some(parent) => Ok(Some(query.relation_mut(parent)?)),
        None => Ok(None),
    }
}

fn single_child(node: &PlanNode) -> RecostResult<NodeId> {
    node.kind
        .children()
        .first()
        .copied()
        .ok_or_else(|| PlanError::MalformedPlan(format!("{} has no input", node.name())).into())
}

impl<M: CostModel, G: IndexPathGenerator> Recoster<'_, M, G> {
    pub(crate) fn recost_at(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
        outer: OuterContext,
        depth: usize,
    ) -> RecostResult<()> {
        self.check_depth(depth)?;
        let node = query.arena.get(id)?;
        let name = node.name();
        let children = node.kind.children();
        let nested = match node.kind {
            NodeKind::SubqueryScan { subpath, level } => Some((subpath, level)),
            _ => None,
        };
        let composition = Composition::of(&node.kind);
        log::trace!("recosting {name} {id} as {composition:?}");

        match composition {
            Composition::Unsupported => Err(RecostError::UnsupportedNode(name)),
            Composition::Scan => self.recost_scan(config, query, id, outer, depth),
            Composition::BitmapTree => self.recost_bitmap_tree(config, query, id, depth).map(|_| ()),
            Composition::Join => {
                for child in children {
                    self.recost_at(config, query, child, OuterContext::None, depth + 1)?;
                }
                self.cost_join(config, query, id)
            }
            Composition::SingleChild => {
                let child = children.first().copied().ok_or_else(|| {
                    PlanError::MalformedPlan(format!("{name} has no input"))
                })?;
                self.recost_at(config, query, child, OuterContext::None, depth + 1)?;
                self.cost_single_child(config, query, id)
            }
            Composition::MultiChild => {
                for child in children {
                    self.recost_at(config, query, child, OuterContext::None, depth + 1)?;
                }
                self.cost_multi_child(config, query, id)
            }
            Composition::Nested => {
                let (subpath, level) =
                    nested.ok_or_else(|| PlanError::MalformedPlan(name.to_string()))?;
                self.scribble(config, query, level, subpath, depth + 1)?;
                self.cost_subquery_scan(config, query, id, subpath)
            }
        }
    }

    fn try_substitute(
        &self,
        config: &OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
    ) -> RecostResult<()> {
        if self.substitutions.is_empty() {
            return Ok(());
        }
        let node = query.arena.get(id)?;
        let Some(parent) = node.header.parent else {
            return Ok(());
        };
        let rel = query.relation(parent)?;
        let replacement = substitute::find_replacement(
            &query.arena,
            rel,
            id,
            self.substitutions,
            self.generator,
            config,
        )?;
        if let Some(replacement) = replacement {
            substitute::apply(&mut query.arena, id, replacement)?;
        }
        Ok(())
    }

    fn recost_scan(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
        outer: OuterContext,
        depth: usize,
    ) -> RecostResult<()> {
        let substitutable = matches!(
            query.arena.get(id)?.kind,
            NodeKind::IndexScan(_) | NodeKind::IndexOnlyScan(_) | NodeKind::BitmapHeapScan { .. }
        );
        if substitutable && outer == OuterContext::None {
            self.try_substitute(config, query, id)?;
        }

        let mut node = query.arena.get(id)?.clone();
        let parent = node.header.parent;
        let name = node.name();
        let index_only = matches!(node.kind, NodeKind::IndexOnlyScan(_));
        let estimate = match &mut node.kind {
            NodeKind::SeqScan => {
                let rel = scan_relation(query, parent, name)?;
                self.model.cost_seqscan(rel, &node.header, config)
            }
            NodeKind::SampleScan { fraction } => {
                let rel = scan_relation(query, parent, name)?;
                self.model
                    .cost_samplescan(rel, &node.header, *fraction, config)
            }
            NodeKind::IndexScan(access) | NodeKind::IndexOnlyScan(access) => {
                let rel = scan_relation(query, parent, name)?;
                self.model
                    .cost_index(rel, &node.header, access, index_only, config)
            }
            NodeKind::BitmapHeapScan {
                bitmapqual,
                loop_count,
            } => {
                let bitmap = self.recost_bitmap_tree(config, query, *bitmapqual, depth + 1)?;
                let rel = scan_relation(query, parent, name)?;
                self.model
                    .cost_bitmap_heap_scan(rel, &node.header, bitmap, *loop_count, config)
            }
            NodeKind::CteScan { plan_id } => {
                let cte = query
                    .subplan(*plan_id)?
                    .plan
                    .as_ref()
                    .map(InputCost::from)
                    .ok_or_else(|| {
                        PlanError::MalformedPlan(format!("CTE scan of empty subplan {plan_id}"))
                    })?;
                let rel = optional_relation(query, parent)?;
                self.model.cost_ctescan(rel, &node.header, cte, config)
            }
            NodeKind::ResultScan => self.model.cost_resultscan(&node.header, config),
            _ => return Err(RecostError::UnsupportedNode(name)),
        };

        estimate.apply_to(&mut node.header);
        *query.arena.get_mut(id)? = node;
        Ok(())
    }

    /// Recost a bitmap tree and return its combined cost and selectivity.
    fn recost_bitmap_tree(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
        depth: usize,
    ) -> RecostResult<BitmapInput> {
        self.check_depth(depth)?;
        let node = query.arena.get(id)?.clone();
        match &node.kind {
            NodeKind::IndexScan(_) | NodeKind::IndexOnlyScan(_) => {
                self.recost_at(config, query, id, OuterContext::Bitmap, depth)?;
                let node = query.arena.get(id)?;
                let access = node.kind.index_access().ok_or_else(|| {
                    PlanError::MalformedPlan(format!("bitmap input {id} is not an index scan"))
                })?;
                Ok(BitmapInput::from_index(access, node.header.rows, config))
            }
            NodeKind::BitmapAnd { quals, .. } | NodeKind::BitmapOr { quals, .. } => {
                let mut inputs = Vec::with_capacity(quals.len());
                for &qual in quals {
                    inputs.push(self.recost_bitmap_tree(config, query, qual, depth + 1)?);
                }
                let is_and = matches!(node.kind, NodeKind::BitmapAnd { .. });
                let combined = if is_and {
                    self.model.cost_bitmap_and(&inputs, config)
                } else {
                    self.model.cost_bitmap_or(&inputs, config)
                };

                let tuples = node
                    .header
                    .parent
                    .and_then(|p| query.relation(p).ok())
                    .map(|rel| rel.tuples);
                let slot = query.arena.get_mut(id)?;
                let rows = tuples.map_or(slot.header.rows, |t| combined.selectivity * t);
                slot.header.set_estimate(combined.cost, combined.cost, rows);
                if let NodeKind::BitmapAnd { selectivity, .. } | NodeKind::BitmapOr { selectivity, .. } =
                    &mut slot.kind
                {
                    *selectivity = combined.selectivity;
                }
                Ok(combined)
            }
            _ => Err(PlanError::MalformedPlan(format!(
                "{} cannot feed a bitmap heap scan",
                node.name()
            ))
            .into()),
        }
    }

    fn cost_join(
        &self,
        config: &OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
    ) -> RecostResult<()> {
        let mut node = query.arena.get(id)?.clone();
        let estimate = match &mut node.kind {
            NodeKind::NestLoop(join) => {
                let outer = InputCost::from(query.arena.header(join.outer)?);
                let inner = InputCost::from(query.arena.header(join.inner)?);
                self.model.cost_nestloop(join, outer, inner, config)
            }
            NodeKind::HashJoin {
                join,
                hash_clauses,
                parallel_hash,
            } => {
                let outer = InputCost::from(query.arena.header(join.outer)?);
                let inner = InputCost::from(query.arena.header(join.inner)?);
                self.model
                    .cost_hashjoin(join, hash_clauses, *parallel_hash, outer, inner, config)
            }
            NodeKind::MergeJoin {
                join,
                merge_clauses,
                outer_sortkeys,
                inner_sortkeys,
                materialize_inner,
            } => {
                let outer = InputCost::from(query.arena.header(join.outer)?);
                let inner = InputCost::from(query.arena.header(join.inner)?);
                // The materialize decision stays whatever the planner made it.
                self.model.cost_mergejoin(
                    join,
                    merge_clauses,
                    outer_sortkeys,
                    inner_sortkeys,
                    *materialize_inner,
                    outer,
                    inner,
                    config,
                )
            }
            _ => return Err(RecostError::UnsupportedNode(node.name())),
        };

        estimate.apply_to(&mut node.header);
        *query.arena.get_mut(id)? = node;
        Ok(())
    }

    fn cost_single_child(
        &self,
        config: &OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
    ) -> RecostResult<()> {
        let c = &config.constants;
        let mut node = query.arena.get(id)?.clone();
        let child = query.arena.get(single_child(&node)?)?;
        let input = InputCost::from(&child.header);
        let target = node.header.target;

        let estimate = match &mut node.kind {
            NodeKind::Projection { dummy, .. } => {
                let old = child.header.target;
                if *dummy || child.kind.is_projection_capable() {
                    let startup_delta = target.startup - old.startup;
                    CostEstimate::new(
                        input.startup + startup_delta,
                        input.total
                            + startup_delta
                            + (target.per_tuple - old.per_tuple) * input.rows,
                        input.rows,
                    )
                } else {
                    CostEstimate::new(
                        input.startup + target.startup,
                        input.total
                            + target.startup
                            + (c.cpu_tuple_cost + target.per_tuple) * input.rows,
                        input.rows,
                    )
                }
            }
            NodeKind::Sort { limit_tuples, .. } => {
                self.model
                    .cost_sort(input.total, input.rows, input.width, *limit_tuples, config)
            }
            NodeKind::IncrementalSort {
                presorted_cols,
                limit_tuples,
                ..
            } => self
                .model
                .cost_incremental_sort(*presorted_cols, input, *limit_tuples, config),
            NodeKind::Material { .. } => self.model.cost_material(input, config),
            NodeKind::Memoize { .. } => {
                CostEstimate::new(input.startup, input.total + c.cpu_tuple_cost, input.rows)
            }
            NodeKind::Unique {
                num_keys,
                method: UniqueMethod::Upper,
                ..
            } => CostEstimate::new(
                input.startup,
                input.total + c.cpu_operator_cost * input.rows * *num_keys as f64,
                node.header.rows,
            ),
            NodeKind::Unique {
                num_keys, method, ..
            } => self.model.cost_unique(*method, *num_keys, input, config),
            NodeKind::Gather {
                num_workers,
                override_rows,
                ..
            } => self
                .model
                .cost_gather(input, *num_workers, *override_rows, config),
            NodeKind::GatherMerge {
                num_workers,
                override_rows,
                ..
            } => {
                let sorted = if pathkeys_contained_in(&node.header.pathkeys, &child.header.pathkeys)
                {
                    input
                } else {
                    let sort =
                        self.model
                            .cost_sort(input.total, input.rows, input.width, 0.0, config);
                    InputCost {
                        startup: sort.startup,
                        total: sort.total,
                        ..input
                    }
                };
                self.model
                    .cost_gather_merge(sorted, *num_workers, *override_rows, config)
            }
            NodeKind::Group {
                num_group_cols,
                num_groups,
                qual,
                ..
            } => {
                let est = self
                    .model
                    .cost_group(*num_group_cols, *num_groups, qual, input, config);
                with_target(est, target)
            }
            NodeKind::Agg {
                strategy,
                agg_costs,
                num_group_cols,
                num_groups,
                qual,
                ..
            } => {
                let est = self.model.cost_agg(
                    *strategy,
                    agg_costs.as_ref(),
                    *num_group_cols,
                    *num_groups,
                    qual,
                    input,
                    config,
                );
                with_target(est, target)
            }
            NodeKind::GroupingSets {
                strategy,
                agg_costs,
                rollups,
                qual,
                ..
            } => self.model.cost_grouping_sets(
                *strategy,
                agg_costs.as_ref(),
                rollups,
                qual,
                input,
                config,
            ),
            NodeKind::WindowAgg {
                num_funcs,
                partition_cols,
                order_cols,
                ..
            } => self
                .model
                .cost_windowagg(*num_funcs, *partition_cols, *order_cols, input, config),
            NodeKind::Limit {
                offset_est,
                count_est,
                ..
            } => adjust_limit_rows_costs(input, *offset_est, *count_est),
            NodeKind::SetOp { num_distinct, .. } => CostEstimate::new(
                input.startup,
                input.total + c.cpu_operator_cost * input.rows * *num_distinct as f64,
                node.header.rows,
            ),
            _ => return Err(RecostError::UnsupportedNode(node.name())),
        };

        estimate.apply_to(&mut node.header);
        *query.arena.get_mut(id)? = node;
        Ok(())
    }

    fn cost_multi_child(
        &self,
        config: &OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
    ) -> RecostResult<()> {
        let mut node = query.arena.get(id)?.clone();
        let children = node.kind.children();

        if let [only] = children.as_slice() {
            // A lone child is passed through untouched.
            let child = query.arena.header(*only)?;
            node.header
                .set_estimate(child.startup_cost, child.total_cost, child.rows);
            node.header.pathkeys = child.pathkeys.clone();
        } else {
            let inputs = children
                .iter()
                .map(|&child| query.arena.header(child).map(InputCost::from))
                .collect::<Result<Vec<_>, _>>()?;
            let estimate = match node.kind {
                NodeKind::Append { .. } => self.model.cost_append(&inputs, config),
                NodeKind::MergeAppend { .. } => self.model.cost_merge_append(&inputs, config),
                _ => return Err(RecostError::UnsupportedNode(node.name())),
            };
            estimate.apply_to(&mut node.header);
        }

        *query.arena.get_mut(id)? = node;
        Ok(())
    }

    fn cost_subquery_scan(
        &self,
        config: &OptimizerConfig,
        query: &mut PlannedQuery,
        id: NodeId,
        subpath: NodeId,
    ) -> RecostResult<()> {
        let mut node = query.arena.get(id)?.clone();
        let input = InputCost::from(query.arena.header(subpath)?);
        let rel = optional_relation(query, node.header.parent)?;
        let estimate = self.model.cost_subqueryscan(rel, &node.header, input, config);
        estimate.apply_to(&mut node.header);
        *query.arena.get_mut(id)? = node;
        Ok(())
    }
}

fn with_target(estimate: CostEstimate, target: QualCost) -> CostEstimate {
    CostEstimate::new(
        estimate.startup + target.startup,
        estimate.total + target.startup + target.per_tuple * estimate.rows,
        estimate.rows,
    )
}
