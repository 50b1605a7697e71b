//! Start a 10-dimensional Ackley run, kill it part way, then resume it from
//! its checkpoint and finish the budget.

use tracing_subscriber::EnvFilter;

use sot_controller::{CheckpointStore, ControlLoop, ControllerConfig, RunStatus, SerialPool};
use sot_strategy::{SurrogateStrategy, SurrogateStrategyConfig};
use sot_types::{Ackley, Objective, SotResult};

const DIM: usize = 10;
const BUDGET: usize = 200;
const KILL_AFTER: usize = 60;

fn control_loop(path: &std::path::Path) -> SotResult<ControlLoop<SurrogateStrategy, SerialPool<Ackley>>> {
    let objective = Ackley::new(DIM)?;
    let strategy =
        SurrogateStrategy::new(SurrogateStrategyConfig::new(objective.bounds().clone()).with_seed(42))?;
    let config = ControllerConfig::new("ackley").with_checkpoint(path);
    Ok(ControlLoop::new(config, strategy, SerialPool::new(objective)))
}

fn main() -> SotResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let path = std::env::temp_dir().join(format!("sot-ackley-{}.json", std::process::id()));

    let halted = control_loop(&path)?.halt_after(KILL_AFTER).run(BUDGET)?;
    assert_eq!(halted.status, RunStatus::Halted);
    let saved = CheckpointStore::new(&path).load()?;
    println!(
        "killed after {} evaluations; checkpoint holds {} issued, {} pending",
        halted.completed + halted.failed,
        saved.issued_count,
        saved.pending.len()
    );

    let outcome = control_loop(&path)?.resume(&path)?;
    println!(
        "resumed run finished ({:?}): {} evaluations, best {:.4}",
        outcome.status,
        outcome.completed + outcome.failed,
        outcome.best.and_then(|r| r.value).unwrap_or(f64::NAN)
    );

    std::fs::remove_file(&path)?;
    Ok(())
}
