use crate::config::{HypotheticalSettings, OptimizerConfig};
use crate::cost::{CostModel, StandardCostModel};
use crate::explain::ExplainDocument;
use crate::planner::error::PlanError;
use crate::planner::generate::{IndexPathGenerator, StandardPathGenerator};
use crate::planner::query::{LevelId, PlannedQuery};
use crate::planner::relation::IndexId;
use crate::recost::{
    Recoster, RecostResult, SubplanValidityMask, SubstitutionTable, pick_alternatives,
};
use std::collections::BTreeMap;

/// The host optimizer: turns a statement into its planner state.
pub trait HostPlanner {
    type Query: ?Sized;

    fn plan(&mut self, query: &Self::Query, config: &OptimizerConfig)
    -> Result<PlannedQuery, PlanError>;
}

/// Replays plans recorded from a real optimizer, keyed by statement name.
///
/// The live tunables are not consulted; a recorded plan is returned as is.
#[derive(Debug, Clone, Default)]
pub struct RecordedPlanner {
    plans: BTreeMap<String, PlannedQuery>,
}

impl RecordedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, plan: PlannedQuery) {
        self.plans.insert(name.into(), plan);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl HostPlanner for RecordedPlanner {
    type Query = str;

    fn plan(&mut self, query: &str, _config: &OptimizerConfig) -> Result<PlannedQuery, PlanError> {
        self.plans
            .get(query)
            .cloned()
            .ok_or_else(|| PlanError::MalformedPlan(format!("no recorded plan named '{query}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// The statement is being explained rather than executed.
    pub explain: bool,
}

/// Result of planning one statement.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The host's plan, untouched by any hypothetical pass.
    pub real: PlannedQuery,
    pub hypothetical: Option<PlannedQuery>,
    pub validity: Option<SubplanValidityMask>,
}

/// Planning state of one client: tunables, settings and registrations.
pub struct Session<M = StandardCostModel, G = StandardPathGenerator<StandardCostModel>> {
    pub config: OptimizerConfig,
    pub settings: HypotheticalSettings,
    substitutions: SubstitutionTable,
    model: M,
    generator: G,
}

impl Session {
    pub fn new(config: OptimizerConfig, settings: HypotheticalSettings) -> Self {
        Self::with_components(
            config,
            settings,
            StandardCostModel::new(),
            StandardPathGenerator::default(),
        )
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(OptimizerConfig::default(), HypotheticalSettings::default())
    }
}

impl<M: CostModel, G: IndexPathGenerator> Session<M, G> {
    pub fn with_components(
        config: OptimizerConfig,
        settings: HypotheticalSettings,
        model: M,
        generator: G,
    ) -> Self {
        Self {
            config,
            settings,
            substitutions: SubstitutionTable::new(),
            model,
            generator,
        }
    }

    pub fn register(&mut self, search: Option<&str>, index: Option<IndexId>) -> RecostResult<()> {
        self.substitutions.register(search, index)
    }

    pub fn reset(&mut self) {
        self.substitutions.reset();
    }

    pub fn substitutions(&self) -> &SubstitutionTable {
        &self.substitutions
    }

    pub fn set_substitutions(&mut self, substitutions: SubstitutionTable) {
        self.substitutions = substitutions;
    }

    /// Plan `query` with the host planner and, when explaining with the
    /// hypothetical model enabled, recost a copy of the result.
    pub fn plan<P: HostPlanner + ?Sized>(
        &mut self,
        planner: &mut P,
        query: &P::Query,
        options: PlanOptions,
    ) -> RecostResult<PlanOutcome> {
        let real = planner.plan(query, &self.config)?;
        if !self.settings.enabled || !options.explain {
            return Ok(PlanOutcome {
                real,
                hypothetical: None,
                validity: None,
            });
        }

        let validity = SubplanValidityMask::from_query(&real);
        let mut hypothetical = real.clone();
        let root = hypothetical.main_level()?.chosen;

        let recoster = Recoster::new(
            &self.model,
            &self.generator,
            &self.substitutions,
            &self.settings,
        );
        recoster.scribble(&mut self.config, &mut hypothetical, LevelId::MAIN, root, 0)?;
        pick_alternatives(&mut hypothetical, &validity);

        Ok(PlanOutcome {
            real,
            hypothetical: Some(hypothetical),
            validity: Some(validity),
        })
    }

    /// Plan `query` for explain and build its explain document.
    pub fn explain<P: HostPlanner + ?Sized>(
        &mut self,
        planner: &mut P,
        query: &P::Query,
    ) -> RecostResult<ExplainDocument> {
        let outcome = self.plan(planner, query, PlanOptions { explain: true })?;
        let show = self.settings.show_hypothetical;
        Ok(ExplainDocument::new(&outcome, show, self.settings.max_depth)?)
    }
}
