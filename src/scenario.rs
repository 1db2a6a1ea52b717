use crate::config::{HypotheticalSettings, OptimizerConfig};
use crate::planner::query::PlannedQuery;
use crate::recost::SubstitutionTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A recorded plan together with the settings it should be explained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: OptimizerConfig,
    #[serde(default)]
    pub settings: HypotheticalSettings,
    pub plan: PlannedQuery,
    #[serde(default)]
    pub substitutions: SubstitutionTable,
}

#[derive(Debug)]
pub enum ScenarioError {
    Io(std::io::Error),
    Json(serde_json::Error),
    MsgpackDecode(rmp_serde::decode::Error),
    MsgpackEncode(rmp_serde::encode::Error),
    /// Settings outside their valid range.
    InvalidSettings(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::MsgpackDecode(e) => write!(f, "MessagePack decode error: {e}"),
            Self::MsgpackEncode(e) => write!(f, "MessagePack encode error: {e}"),
            Self::InvalidSettings(reason) => write!(f, "Invalid settings: {reason}"),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::MsgpackDecode(e) => Some(e),
            Self::MsgpackEncode(e) => Some(e),
            Self::InvalidSettings(_) => None,
        }
    }
}

impl From<std::io::Error> for ScenarioError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ScenarioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<rmp_serde::decode::Error> for ScenarioError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::MsgpackDecode(err)
    }
}

impl From<rmp_serde::encode::Error> for ScenarioError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::MsgpackEncode(err)
    }
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;

fn is_msgpack(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("msgpack") || ext.eq_ignore_ascii_case("mp"))
}

impl Scenario {
    /// Wrap a plan with default tunables and settings.
    pub fn new(plan: PlannedQuery) -> Self {
        Self {
            config: OptimizerConfig::default(),
            settings: HypotheticalSettings::default(),
            plan,
            substitutions: SubstitutionTable::new(),
        }
    }

    pub fn from_json(json: &str) -> ScenarioResult<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn to_json(&self) -> ScenarioResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> ScenarioResult<Self> {
        let scenario: Self = rmp_serde::from_slice(bytes)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn to_msgpack(&self) -> ScenarioResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Load a scenario; `.msgpack` and `.mp` files are MessagePack, anything else JSON.
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        log::debug!("loading scenario from {}", path.display());
        if is_msgpack(path) {
            Self::from_msgpack(&bytes)
        } else {
            let scenario: Self = serde_json::from_slice(&bytes)?;
            scenario.validate()?;
            Ok(scenario)
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ScenarioResult<()> {
        let path = path.as_ref();
        let bytes = if is_msgpack(path) {
            self.to_msgpack()?
        } else {
            self.to_json()?.into_bytes()
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn validate(&self) -> ScenarioResult<()> {
        self.settings
            .validate()
            .map_err(ScenarioError::InvalidSettings)
    }
}
