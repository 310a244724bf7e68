use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use intrigue::present::NullPresenter;
use intrigue::runtime::context::EngineConfig;
use intrigue::runtime::engine::Engine;
use intrigue::world::{ActorId, StaticWorld};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheme graph headless against a stub world until it ends
    Run {
        /// Path to the graph YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Graph group to start
        #[arg(long, short)]
        scheme: String,

        /// Conspirator actor id
        #[arg(long, default_value_t = 1)]
        conspirator: u64,

        /// Target actor id
        #[arg(long)]
        target: Option<u64>,

        /// Simulated seconds per tick
        #[arg(long, default_value_t = 0.1)]
        step: f64,

        /// Give up after this many simulated seconds
        #[arg(long, default_value_t = 600.0)]
        budget: f64,
    },

    /// Evaluate a rule graph once and print its result
    Check {
        /// Path to the graph YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Rule group to evaluate
        #[arg(long, short)]
        rule: String,

        /// Conspirator actor id
        #[arg(long, default_value_t = 1)]
        conspirator: u64,

        /// Target actor id
        #[arg(long)]
        target: Option<u64>,
    },
}

fn stub_world(conspirator: u64, target: Option<u64>) -> Arc<StaticWorld> {
    let world = StaticWorld::new();
    world.add_actor(ActorId(conspirator));
    if let Some(target) = target {
        world.add_actor(ActorId(target));
    }
    Arc::new(world)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            scheme,
            conspirator,
            target,
            step,
            budget,
        } => {
            let world = stub_world(conspirator, target);
            let mut engine = Engine::new(EngineConfig::default(), world, Arc::new(NullPresenter));

            let diagnostics = engine.load_path(&file)?;
            for diag in &diagnostics {
                warn!(group = %diag.group, node = %diag.node, "{}", diag.detail);
            }

            let id = engine.start_scheme(&scheme, ActorId(conspirator), target.map(ActorId))?;
            info!(scheme = %id, group = %scheme, "scheme started");

            let mut elapsed = 0.0;
            loop {
                for (finished, result) in engine.tick(step) {
                    if finished == id {
                        info!(?result, "scheme finished after {elapsed:.1}s");
                        return Ok(());
                    }
                }
                if engine.scheme(id).is_none() {
                    info!("scheme finished after {elapsed:.1}s");
                    return Ok(());
                }
                elapsed += step;
                if elapsed > budget {
                    return Err(anyhow!("scheme still running after {budget}s, giving up"));
                }
            }
        }

        Commands::Check {
            file,
            rule,
            conspirator,
            target,
        } => {
            let world = stub_world(conspirator, target);
            let engine = Engine::new(EngineConfig::default(), world, Arc::new(NullPresenter));

            let diagnostics = engine.load_path(&file)?;
            for diag in &diagnostics {
                warn!(group = %diag.group, node = %diag.node, "{}", diag.detail);
            }

            let result = engine.check_rule(&rule, Some(ActorId(conspirator)), target.map(ActorId))?;
            info!(passed = result.passed, "rule evaluated");
            for note in &result.errors {
                println!("error   {}: {}", note.name, note.message);
            }
            for note in &result.warnings {
                println!("warning {}: {}", note.name, note.message);
            }
            println!("{}", if result.passed { "PASSED" } else { "FAILED" });
        }
    }

    Ok(())
}
