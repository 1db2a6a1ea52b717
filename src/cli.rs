use clap::{Args, Parser, Subcommand};
use hypocost::ExplainFormat;
use hypocost::HypotheticalSettings;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    version,
    name = "hypocost",
    about = r#"
Recost recorded query plans under a hypothetical cost model.

hypocost replays a plan produced by a real optimizer and prices it again
with alternate page costs, optionally swapping indexes for hypothetical
ones, so both estimates can be compared side by side."#
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Explain a recorded scenario under the real and the hypothetical cost model
    Explain(ExplainCommand),
    /// Start the server
    Serve(ServeCommand),
}

/// Overrides for the hypothetical cost model.
#[derive(Debug, Clone, Args)]
pub struct HypotheticalConfig {
    /// Skip the hypothetical pass and show only the real plan.
    #[arg(long, env = "HYPOCOST_DISABLE")]
    pub disable: bool,
    /// Hypothetical cost of a sequentially fetched page.
    #[arg(long, env = "HYPOCOST_SEQ_PAGE_COST")]
    pub seq_page_cost: Option<f64>,
    /// Hypothetical cost of a non-sequentially fetched page.
    #[arg(long, env = "HYPOCOST_RANDOM_PAGE_COST")]
    pub random_page_cost: Option<f64>,
    /// Leave the hypothetical plan out of explain output.
    #[arg(long, env = "HYPOCOST_HIDE_HYPOTHETICAL")]
    pub hide_hypothetical: bool,
    /// Deepest plan nesting a recosting pass will descend into.
    #[arg(long, env = "HYPOCOST_MAX_DEPTH")]
    pub max_depth: Option<usize>,
}

impl HypotheticalConfig {
    /// Layer the command line over `base`.
    pub fn apply(&self, base: HypotheticalSettings) -> HypotheticalSettings {
        HypotheticalSettings {
            enabled: !self.disable,
            seq_page_cost: self.seq_page_cost.unwrap_or(base.seq_page_cost),
            random_page_cost: self.random_page_cost.unwrap_or(base.random_page_cost),
            show_hypothetical: base.show_hypothetical && !self.hide_hypothetical,
            max_depth: self.max_depth.unwrap_or(base.max_depth),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExplainCommand {
    /// Scenario file; `.msgpack` or `.mp` for MessagePack, JSON otherwise.
    pub file: PathBuf,
    /// Output format.
    #[arg(long, short, value_enum, env = "HYPOCOST_FORMAT", default_value_t = ExplainFormat::Text)]
    pub format: ExplainFormat,
    /// Index substitution as SEARCH=INDEX_ID; may be repeated.
    #[arg(long = "substitute", short = 's', value_parser = parse_substitution)]
    pub substitutions: Vec<(String, u32)>,

    #[command(flatten)]
    pub hypothetical: HypotheticalConfig,
}

#[derive(Debug, Clone, Args)]
pub struct ServeCommand {
    /// Address for the recosting server.
    #[arg(long, short, env = "HYPOCOST_ADDRESS", default_value = "127.0.0.1:6970")]
    pub address: String,

    #[command(flatten)]
    pub hypothetical: HypotheticalConfig,
}

fn parse_substitution(arg: &str) -> Result<(String, u32), String> {
    let (search, index) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected SEARCH=INDEX_ID, got '{arg}'"))?;
    let index = index
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid index id '{index}': {e}"))?;
    Ok((search.to_string(), index))
}
