use crate::config::OptimizerConfig;
use crate::cost::CostModel;
use crate::planner::generate::IndexPathGenerator;
use crate::planner::query::{CostedPlan, LevelId, PlannedQuery, SubLinkKind, SubplanRef};
use crate::recost::error::RecostResult;
use crate::recost::orchestrator::Recoster;
use crate::recost::walker::OuterContext;
use serde::{Deserialize, Serialize};

/// Which subplan slots the host filled in for the real plan.
///
/// Index `i` describes subplan id `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubplanValidityMask {
    valid: Vec<bool>,
}

impl SubplanValidityMask {
    pub fn from_query(query: &PlannedQuery) -> Self {
        Self {
            valid: query.subplans.iter().map(|slot| slot.plan.is_some()).collect(),
        }
    }

    pub fn is_valid(&self, plan_id: usize) -> bool {
        plan_id
            .checked_sub(1)
            .and_then(|slot| self.valid.get(slot))
            .copied()
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.valid
    }
}

impl<M: CostModel, G: IndexPathGenerator> Recoster<'_, M, G> {
    /// Reprocess every subplan referenced from `level`.
    pub(crate) fn reprocess_subplans(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        level: LevelId,
        depth: usize,
    ) -> RecostResult<()> {
        let refs = query.level(level)?.subplan_refs().cloned().collect::<Vec<_>>();
        for subplan in &refs {
            self.reprocess(config, query, subplan, depth)?;
        }
        Ok(())
    }

    /// Recost the paths of one subplan, pick its final path and refresh
    /// the slot plus every reference's charge.
    pub fn reprocess(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        subplan: &SubplanRef,
        depth: usize,
    ) -> RecostResult<Option<CostedPlan>> {
        self.check_depth(depth)?;
        let slot = query.subplan(subplan.plan_id)?;
        if slot.plan.is_none() {
            log::trace!("subplan {} was discarded, skipping", subplan.plan_id);
            return Ok(None);
        }
        let sub_level = slot.level;
        let is_cte = subplan.kind == SubLinkKind::Cte;

        if is_cte {
            self.reprocess_subplans(config, query, sub_level, depth + 1)?;
        }

        let paths = query.level(sub_level)?.paths.clone();
        for path in paths {
            self.recost_at(config, query, path, OuterContext::None, depth + 1)?;
        }
        query.refresh_cheapest_total(sub_level)?;

        // A CTE may be read any number of times, so plan for all of it.
        let fraction = if is_cte {
            0.0
        } else {
            subplan.kind.tuple_fraction()
        };
        let chosen = query.cheapest_fractional_path(sub_level, fraction)?;
        let node = query.arena.get(chosen)?;
        let materializes = node.kind.materializes_output();
        let mut plan = CostedPlan::from_node(chosen, node);

        if is_cte {
            let nested: f64 = query
                .level(sub_level)?
                .subplan_refs()
                .filter(|r| query.subplan(r.plan_id).is_ok_and(|s| s.plan.is_some()))
                .map(|r| r.charge())
                .sum();
            plan.startup_cost += nested;
            plan.total_cost += nested;
        }

        query.level_mut(sub_level)?.chosen = chosen;
        query.subplan_mut(subplan.plan_id)?.plan = Some(plan.clone());
        for reference in query.subplan_refs_mut(subplan.plan_id) {
            self.model.cost_subplan(reference, &plan, materializes, config);
        }

        log::debug!(
            "reprocessed subplan {} ({:?}): cost={:.2}..{:.2}",
            subplan.plan_id,
            subplan.kind,
            plan.startup_cost,
            plan.total_cost
        );
        Ok(Some(plan))
    }
}

fn first_charge(query: &PlannedQuery, plan_id: usize) -> Option<f64> {
    query
        .levels
        .iter()
        .flat_map(|level| level.subplan_refs())
        .find(|r| r.plan_id == plan_id)
        .map(SubplanRef::charge)
}

/// Keep one subplan per group of alternatives.
///
/// The first alternative `mask` marks valid wins; failing that, the one
/// with the lowest charge. The others lose their slot and references.
///
/// `Session::plan` builds `mask` from the real plan, so every alternative
/// still planned in the copy is valid there and the first one always wins.
/// The charge fallback applies only to masks that mark no available
/// alternative valid.
pub fn pick_alternatives(query: &mut PlannedQuery, mask: &SubplanValidityMask) -> Vec<usize> {
    let groups = query.alternatives.clone();
    let mut picked = Vec::with_capacity(groups.len());

    for group in groups {
        let available = group
            .iter()
            .copied()
            .filter(|&id| query.subplan(id).is_ok_and(|slot| slot.plan.is_some()))
            .collect::<Vec<_>>();

        let winner = available
            .iter()
            .copied()
            .find(|&id| mask.is_valid(id))
            .or_else(|| {
                available
                    .iter()
                    .copied()
                    .filter_map(|id| first_charge(query, id).map(|charge| (id, charge)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(id, _)| id)
            });
        let Some(winner) = winner else {
            continue;
        };

        for &loser in group.iter().filter(|&&id| id != winner) {
            if let Ok(slot) = query.subplan_mut(loser) {
                slot.plan = None;
            }
            for level in &mut query.levels {
                level.init_plans.retain(|r| r.plan_id != loser);
                level.noninit_plans.retain(|r| r.plan_id != loser);
            }
        }
        log::debug!("picked subplan {winner} among {group:?}");
        picked.push(winner);
    }

    picked
}
