use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Penalty added to the startup cost of a strategy that is switched off.
pub const DISABLE_COST: f64 = 1.0e10;

/// Default recursion limit for a recosting pass, nested passes included.
pub const DEFAULT_MAX_DEPTH: usize = 400;

/// Per-strategy enable flags of the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyFlags {
    pub enable_hashjoin: bool,
    pub enable_mergejoin: bool,
    pub enable_nestloop: bool,
    pub enable_sort: bool,
    pub enable_gathermerge: bool,
    pub enable_hashagg: bool,
    pub enable_parallel_hash: bool,
    pub enable_material: bool,
    pub enable_memoize: bool,
    pub enable_seqscan: bool,
    pub enable_indexscan: bool,
    pub enable_indexonlyscan: bool,
    pub enable_bitmapscan: bool,
}

impl StrategyFlags {
    pub const fn all_enabled() -> Self {
        Self {
            enable_hashjoin: true,
            enable_mergejoin: true,
            enable_nestloop: true,
            enable_sort: true,
            enable_gathermerge: true,
            enable_hashagg: true,
            enable_parallel_hash: true,
            enable_material: true,
            enable_memoize: true,
            enable_seqscan: true,
            enable_indexscan: true,
            enable_indexonlyscan: true,
            enable_bitmapscan: true,
        }
    }
}

impl Default for StrategyFlags {
    fn default() -> Self {
        Self::all_enabled()
    }
}

/// Cost constants that a recosting pass reads but never swaps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConstants {
    pub cpu_tuple_cost: f64,
    pub cpu_index_tuple_cost: f64,
    pub cpu_operator_cost: f64,
    pub parallel_tuple_cost: f64,
    pub parallel_setup_cost: f64,
    /// Sort / hash memory budget in kilobytes.
    pub work_mem_kb: f64,
    /// Effective cache size in pages.
    pub effective_cache_size: f64,
    pub block_size: f64,
}

impl Default for CostConstants {
    fn default() -> Self {
        Self {
            cpu_tuple_cost: 0.01,
            cpu_index_tuple_cost: 0.005,
            cpu_operator_cost: 0.0025,
            parallel_tuple_cost: 0.1,
            parallel_setup_cost: 1000.0,
            work_mem_kb: 4096.0,
            effective_cache_size: 524_288.0,
            block_size: 8192.0,
        }
    }
}

/// The live optimizer tunables, threaded explicitly through every recosting call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub seq_page_cost: f64,
    pub random_page_cost: f64,
    pub flags: StrategyFlags,
    pub constants: CostConstants,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            seq_page_cost: 1.0,
            random_page_cost: 4.0,
            flags: StrategyFlags::default(),
            constants: CostConstants::default(),
        }
    }
}

/// Immutable copy of the swappable tunables taken at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigSnapshot {
    seq_page_cost: f64,
    random_page_cost: f64,
    flags: StrategyFlags,
}

impl ConfigSnapshot {
    pub fn seq_page_cost(&self) -> f64 {
        self.seq_page_cost
    }

    pub fn random_page_cost(&self) -> f64 {
        self.random_page_cost
    }

    pub fn flags(&self) -> StrategyFlags {
        self.flags
    }
}

/// Settings of the alternate cost model evaluated by a hypothetical pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypotheticalSettings {
    /// Master switch; when off planning is a pass-through to the host.
    pub enabled: bool,
    pub seq_page_cost: f64,
    pub random_page_cost: f64,
    /// Emit the hypothetical plan after the real one in explain output.
    pub show_hypothetical: bool,
    pub max_depth: usize,
}

impl Default for HypotheticalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            seq_page_cost: 1.0,
            random_page_cost: 4.0,
            show_hypothetical: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl HypotheticalSettings {
    /// Page costs must be finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("seq_page_cost", self.seq_page_cost),
            ("random_page_cost", self.random_page_cost),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a finite, non-negative number"));
            }
        }
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

impl OptimizerConfig {
    /// Copy the swappable tunables without side effects.
    pub fn capture(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            seq_page_cost: self.seq_page_cost,
            random_page_cost: self.random_page_cost,
            flags: self.flags,
        }
    }

    /// Install the hypothetical page costs and switch every strategy on.
    pub fn wire_hypothetical(&mut self, settings: &HypotheticalSettings) {
        self.seq_page_cost = settings.seq_page_cost;
        self.random_page_cost = settings.random_page_cost;
        self.flags = StrategyFlags::all_enabled();
    }

    /// Write every field of `snapshot` back onto the live tunables.
    pub fn restore(&mut self, snapshot: &ConfigSnapshot) {
        self.seq_page_cost = snapshot.seq_page_cost;
        self.random_page_cost = snapshot.random_page_cost;
        self.flags = snapshot.flags;
    }

    /// Capture, wire, and hand back a guard that restores on drop.
    pub fn enter_hypothetical(&mut self, settings: &HypotheticalSettings) -> HypotheticalGuard<'_> {
        HypotheticalGuard::engage(self, settings)
    }
}

/// Exclusive hypothetical-mode access to an [`OptimizerConfig`].
///
/// The captured snapshot is written back when the guard goes out of scope,
/// whether the pass returned normally or propagated an error. Nested passes
/// engage their own guard through [`DerefMut`], so the borrow checker keeps
/// the restore order strictly LIFO.
pub struct HypotheticalGuard<'a> {
    config: &'a mut OptimizerConfig,
    snapshot: ConfigSnapshot,
}

impl<'a> HypotheticalGuard<'a> {
    pub fn engage(config: &'a mut OptimizerConfig, settings: &HypotheticalSettings) -> Self {
        let snapshot = config.capture();
        config.wire_hypothetical(settings);
        log::trace!(
            "hypothetical config wired (seq_page_cost={}, random_page_cost={})",
            settings.seq_page_cost,
            settings.random_page_cost
        );
        Self { config, snapshot }
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }
}

impl Deref for HypotheticalGuard<'_> {
    type Target = OptimizerConfig;

    fn deref(&self) -> &Self::Target {
        self.config
    }
}

impl DerefMut for HypotheticalGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.config
    }
}

impl Drop for HypotheticalGuard<'_> {
    fn drop(&mut self) {
        self.config.restore(&self.snapshot);
        log::trace!("optimizer config restored");
    }
}
