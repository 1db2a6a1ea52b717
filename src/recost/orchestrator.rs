use crate::config::{HypotheticalSettings, OptimizerConfig};
use crate::cost::CostModel;
use crate::planner::generate::IndexPathGenerator;
use crate::planner::node::NodeId;
use crate::planner::query::{LevelId, PlannedQuery};
use crate::recost::error::{RecostError, RecostResult};
use crate::recost::substitute::SubstitutionTable;
use crate::recost::walker::OuterContext;

/// Drives recosting passes over a planned statement.
///
/// A pass snapshots the live tunables, wires the hypothetical ones,
/// reprocesses the level's subplans, recosts the tree, charges init plans
/// into the root, and restores the tunables on every exit path.
pub struct Recoster<'a, M, G> {
    pub(crate) model: &'a M,
    pub(crate) generator: &'a G,
    pub(crate) substitutions: &'a SubstitutionTable,
    pub(crate) settings: &'a HypotheticalSettings,
}

impl<'a, M: CostModel, G: IndexPathGenerator> Recoster<'a, M, G> {
    pub fn new(
        model: &'a M,
        generator: &'a G,
        substitutions: &'a SubstitutionTable,
        settings: &'a HypotheticalSettings,
    ) -> Self {
        Self {
            model,
            generator,
            substitutions,
            settings,
        }
    }

    pub(crate) fn check_depth(&self, depth: usize) -> RecostResult<()> {
        let limit = self.settings.max_depth;
        if depth > limit {
            log::warn!("recosting aborted at depth {depth} (limit {limit})");
            return Err(RecostError::DepthExceeded { depth, limit });
        }
        Ok(())
    }

    /// Run one recosting pass over `path`, the final path of `level`.
    pub fn scribble(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        level: LevelId,
        path: NodeId,
        depth: usize,
    ) -> RecostResult<()> {
        self.check_depth(depth)?;
        let mut guard = config.enter_hypothetical(self.settings);
        log::debug!("recosting pass over {level} from {path} at depth {depth}");

        self.reprocess_subplans(&mut guard, query, level, depth)?;
        self.recost_at(&mut guard, query, path, OuterContext::None, depth)?;
        self.charge_init_plans(query, level, path)?;

        let header = query.arena.header(path)?;
        log::debug!(
            "recosted {level}: cost={:.2}..{:.2} rows={:.0}",
            header.startup_cost,
            header.total_cost,
            header.rows
        );
        Ok(())
    }

    /// Recost the tree at `root` under `config` as it stands.
    pub fn recost(
        &self,
        config: &mut OptimizerConfig,
        query: &mut PlannedQuery,
        root: NodeId,
        outer: OuterContext,
    ) -> RecostResult<()> {
        self.recost_at(config, query, root, outer, 0)
    }

    /// Add the cost of every init plan of `level` to `path`.
    fn charge_init_plans(
        &self,
        query: &mut PlannedQuery,
        level: LevelId,
        path: NodeId,
    ) -> RecostResult<()> {
        let charge: f64 = query
            .level(level)?
            .init_plans
            .iter()
            .filter(|r| query.subplan(r.plan_id).is_ok_and(|slot| slot.plan.is_some()))
            .map(|r| r.charge())
            .sum();
        if charge > 0.0 {
            let header = &mut query.arena.get_mut(path)?.header;
            header.startup_cost += charge;
            header.total_cost += charge;
        }
        Ok(())
    }
}
