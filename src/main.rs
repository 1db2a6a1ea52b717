#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![warn(clippy::nursery)]
#![allow(clippy::multiple_crate_versions)]
mod cli;

use crate::cli::{Cli, Commands};
use clap::Parser;
use hypocost::planner::IndexId;
use hypocost::server::{self, ServerState};
use hypocost::{HypotheticalSettings, OptimizerConfig, RecordedPlanner, Scenario, Session};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCENARIO_STATEMENT: &str = "scenario";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Explain(cmd) => {
            let scenario = Scenario::load(&cmd.file)?;
            let settings = cmd.hypothetical.apply(scenario.settings);
            settings.validate().map_err(anyhow::Error::msg)?;

            let mut session = Session::new(scenario.config, settings);
            session.set_substitutions(scenario.substitutions);
            for (search, index) in &cmd.substitutions {
                session.register(Some(search), Some(IndexId(*index)))?;
            }

            let mut planner = RecordedPlanner::new();
            planner.record(SCENARIO_STATEMENT, scenario.plan);
            let document = session.explain(&mut planner, SCENARIO_STATEMENT)?;
            println!("{}", document.render(cmd.format)?.trim_end());
        }
        Commands::Serve(cmd) => {
            let settings = cmd.hypothetical.apply(HypotheticalSettings::default());
            settings.validate().map_err(anyhow::Error::msg)?;
            let session = Session::new(OptimizerConfig::default(), settings);

            server::start_server(
                Arc::new(Mutex::new(ServerState::new(session))),
                &cmd.address,
            )
            .await?;
        }
    }

    Ok(())
}
