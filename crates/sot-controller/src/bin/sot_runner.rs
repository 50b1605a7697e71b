use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sot_controller::{env_parse, ControlLoop, ControllerConfig, RunStatus, ThreadPool};
use sot_strategy::{SurrogateStrategy, SurrogateStrategyConfig};
use sot_types::{Ackley, Objective};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = ControllerConfig::from_env().context("reading controller configuration")?;
    let checkpoint = config
        .checkpoint_path
        .get_or_insert_with(|| PathBuf::from("sot-checkpoint.json"))
        .clone();
    let budget = env_parse::<usize>("SOT_BUDGET")?.unwrap_or(200);
    let dim = env_parse::<usize>("SOT_DIM")?.unwrap_or(10);
    let seed = env_parse::<u64>("SOT_SEED")?.unwrap_or(0);
    let threads = env_parse::<usize>("SOT_THREADS")?.unwrap_or(config.batch_size);

    let objective = Arc::new(Ackley::new(dim)?);
    let strategy = SurrogateStrategy::new(
        SurrogateStrategyConfig::new(objective.bounds().clone()).with_seed(seed),
    )?;
    let pool = ThreadPool::new(objective, threads)?;

    let mut control = ControlLoop::new(config, strategy, pool);
    let stop = control.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next safe point");
            stop.raise();
        }
    });

    let resume = checkpoint.is_file();
    if resume {
        info!("Found checkpoint {}, resuming", checkpoint.display());
    } else {
        info!("No checkpoint at {}, starting fresh on Ackley({})", checkpoint.display(), dim);
    }

    let outcome = tokio::task::spawn_blocking(move || {
        if resume {
            control.resume(&checkpoint)
        } else {
            control.run(budget)
        }
    })
    .await??;

    match outcome.status {
        RunStatus::Stopped => info!("Run {} stopped; rerun to resume", outcome.run_id),
        status => info!("Run {} ended: {:?}", outcome.run_id, status),
    }
    info!(
        "{} issued, {} completed, {} failed",
        outcome.issued, outcome.completed, outcome.failed
    );
    if let Some(best) = outcome.best {
        println!(
            "best value {:.6} at {:?}",
            best.value.unwrap_or(f64::NAN),
            best.point
        );
    }
    Ok(())
}
