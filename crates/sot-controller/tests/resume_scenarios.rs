use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use proptest::prelude::*;
use tempfile::tempdir;

use sot_controller::{
    CheckpointStore, ControlLoop, ControllerConfig, Event, EventLog, LogState, RunStatus,
    SerialPool, StopSignal, TerminationReason, ThreadPool, WorkerPool,
};
use sot_strategy::{RandomSearch, SearchStrategy, SurrogateStrategy, SurrogateStrategyConfig};
use sot_types::{Bounds, EvaluationError, EvaluationStatus, FnObjective, Linear, Objective, Sphere};

fn surrogate_for(objective: &dyn Objective, seed: u64) -> SurrogateStrategy {
    SurrogateStrategy::new(SurrogateStrategyConfig::new(objective.bounds().clone()).with_seed(seed))
        .unwrap()
}

fn linear_loop(
    batch: usize,
    checkpoint: Option<&Path>,
) -> ControlLoop<SurrogateStrategy, SerialPool<Linear>> {
    let objective = Linear::scalar(0.0, 10.0).unwrap();
    let strategy = surrogate_for(&objective, 3);
    let mut config = ControllerConfig::new("linear").with_batch_size(batch);
    if let Some(path) = checkpoint {
        config = config.with_checkpoint(path);
    }
    ControlLoop::new(config, strategy, SerialPool::new(objective))
}

fn evaluated_points<S: SearchStrategy, P: WorkerPool>(
    control: &ControlLoop<S, P>,
) -> Vec<Vec<f64>> {
    control.records().values().map(|r| r.point.clone()).collect()
}

#[test]
fn killed_linear_run_resumes_to_the_same_result() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("linear.json");

    let mut first = linear_loop(1, Some(path.as_path())).halt_after(4);
    let halted = first.run(10).unwrap();
    assert_eq!(halted.status, RunStatus::Halted);
    assert_eq!(halted.completed, 4);

    // The last safe point came after the third completion and the dispatch
    // of its replacement.
    let saved = CheckpointStore::new(&path).load().unwrap();
    assert_eq!(saved.issued_count, 4);
    assert_eq!(saved.pending.len(), 1);
    assert_eq!(saved.budget, 10);

    let mut second = linear_loop(1, Some(path.as_path()));
    let resumed = second.resume(&path).unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.run_id, halted.run_id);
    assert_eq!(resumed.issued, 10);
    assert_eq!(resumed.completed + resumed.failed, 10);
    assert_eq!(resumed.pending, 0);
    assert_eq!(second.records().len(), 10);
    assert!(second.records().values().all(|r| r.status.is_resolved()));

    let min = second
        .records()
        .values()
        .filter_map(|r| r.value)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(resumed.best.as_ref().and_then(|r| r.value), Some(min));

    let mut uninterrupted = linear_loop(1, None);
    let reference = uninterrupted.run(10).unwrap();
    assert_eq!(evaluated_points(&second), evaluated_points(&uninterrupted));
    assert_eq!(
        resumed.best.and_then(|r| r.value),
        reference.best.and_then(|r| r.value)
    );
}

#[test]
fn truncated_checkpoint_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("truncated.json");
    linear_loop(1, Some(path.as_path())).halt_after(2).run(10).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    let err = linear_loop(1, None).resume(&path).unwrap_err();
    assert!(err.is_corrupt_checkpoint(), "unexpected error: {err}");
}

#[test]
fn broken_strategy_bounds_are_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bounds.json");
    linear_loop(1, Some(path.as_path())).halt_after(6).run(10).unwrap();

    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["strategy_state"]["config"]["bounds"]["upper"] = serde_json::json!([]);
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let err = linear_loop(1, None).resume(&path).unwrap_err();
    assert!(err.is_corrupt_checkpoint(), "unexpected error: {err}");
}

#[test]
fn strategy_state_for_another_dimension_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wide.json");
    linear_loop(1, Some(path.as_path())).halt_after(3).run(10).unwrap();

    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let wide = serde_json::to_value(Bounds::uniform(2, 0.0, 10.0).unwrap()).unwrap();
    doc["strategy_state"]["config"]["bounds"] = wide;
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let err = linear_loop(1, None).resume(&path).unwrap_err();
    assert!(err.is_corrupt_checkpoint(), "unexpected error: {err}");
}

#[test]
fn sparse_checkpoints_lag_behind_a_halt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sparse.json");
    let objective = Linear::scalar(0.0, 10.0).unwrap();
    let strategy = surrogate_for(&objective, 3);
    let config = ControllerConfig::new("sparse")
        .with_checkpoint(&path)
        .with_checkpoint_every(3);
    let mut control =
        ControlLoop::new(config, strategy, SerialPool::new(objective)).halt_after(5);
    let halted = control.run(10).unwrap();
    assert_eq!(halted.status, RunStatus::Halted);
    assert_eq!(halted.completed, 5);

    // Saves happened after the first dispatch and after the third resolution.
    let saved = CheckpointStore::new(&path).load().unwrap();
    let state = saved.validate().unwrap();
    assert_eq!(state.completed + state.failed, 3);
    assert_eq!(halted.completed - state.completed, 2);
    assert_eq!(saved.issued_count, 4);
    assert_eq!(saved.pending.len(), 1);

    let resumed = linear_loop(1, None).resume(&path).unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.completed + resumed.failed, 10);
}

#[test]
fn checkpoint_round_trips_through_the_store() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("round.json"));

    let mut control = linear_loop(2, None).halt_after(5);
    control.run(10).unwrap();
    let snapshot = control.snapshot().unwrap();
    store.save(&snapshot).unwrap();
    assert_eq!(store.load().unwrap(), snapshot);
}

#[test]
fn resume_resubmits_exactly_the_pending_points() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pending.json");
    linear_loop(3, Some(path.as_path())).halt_after(4).run(12).unwrap();
    let saved = CheckpointStore::new(&path).load().unwrap();
    assert_eq!(saved.pending.len(), 3);

    let seen: Arc<Mutex<Vec<Vec<f64>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let bounds = Bounds::uniform(1, 0.0, 10.0).unwrap();
    let objective = FnObjective::new("recording", bounds, move |x: &[f64]| {
        log.lock().unwrap().push(x.to_vec());
        Ok(x[0])
    });
    let strategy = surrogate_for(&objective, 3);
    let mut control = ControlLoop::new(
        ControllerConfig::new("pending").with_batch_size(3),
        strategy,
        SerialPool::new(objective),
    );
    control.resume(&path).unwrap();

    let resubmitted = control
        .event_log()
        .events()
        .iter()
        .find_map(|e| match e {
            Event::Resubmitted { ids, .. } => Some(ids.clone()),
            _ => None,
        })
        .unwrap();
    let pending_ids: Vec<_> = saved.pending.iter().map(|p| p.id).collect();
    assert_eq!(resubmitted, pending_ids);

    let pending_points: Vec<Vec<f64>> = saved.pending.iter().map(|p| p.point.clone()).collect();
    let evaluated = seen.lock().unwrap();
    assert_eq!(&evaluated[..3], pending_points.as_slice());
    let resolved_before = saved.issued_count - saved.pending.len();
    assert_eq!(evaluated.len(), 12 - resolved_before);
}

#[test]
fn best_so_far_never_gets_worse() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("monotone.json");
    let halted = linear_loop(2, Some(path.as_path())).halt_after(6).run(16).unwrap();
    let saved_best = CheckpointStore::new(&path)
        .load()
        .unwrap()
        .best_so_far
        .and_then(|r| r.value)
        .unwrap();
    assert!(halted.best.and_then(|r| r.value).unwrap() <= saved_best);

    let mut control = linear_loop(2, Some(path.as_path()));
    let resumed = control.resume(&path).unwrap();
    assert!(resumed.best.and_then(|r| r.value).unwrap() <= saved_best);

    let mut state = LogState::default();
    let mut last = f64::INFINITY;
    for (index, event) in control.event_log().events().iter().enumerate() {
        state.apply(index, event).unwrap();
        if let Some(value) = state.best.as_ref().and_then(|r| r.value) {
            assert!(value <= last);
            last = value;
        }
    }
}

#[test]
fn budget_is_conserved_across_resume() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("budget.json");
    linear_loop(4, Some(path.as_path())).halt_after(5).run(9).unwrap();

    let saved = CheckpointStore::new(&path).load().unwrap();
    let state = EventLog::from_events(saved.event_log.clone()).fold().unwrap();
    assert!(saved.issued_count <= saved.budget);
    assert_eq!(state.completed + state.failed + state.pending.len(), state.issued);

    let mut control = linear_loop(4, Some(path.as_path()));
    let outcome = control.resume(&path).unwrap();
    assert_eq!(outcome.issued, 9);
    assert_eq!(control.strategy().issued(), 9);
    assert_eq!(control.records().len(), 9);

    let again = linear_loop(4, Some(path.as_path())).resume(&path).unwrap();
    assert_eq!(again.status, RunStatus::AlreadyComplete);
    assert_eq!(again.issued, 9);
    assert_eq!(again.best, outcome.best);
}

#[test]
fn slow_evaluations_time_out_as_failures() {
    let objective: Arc<dyn Objective> = Arc::new(FnObjective::new(
        "slow",
        Bounds::uniform(1, 0.0, 1.0).unwrap(),
        |x: &[f64]| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(x[0])
        },
    ));
    let strategy = RandomSearch::new(objective.bounds().clone(), 5);
    let pool = ThreadPool::new(objective, 4).unwrap();
    let config = ControllerConfig::new("timeouts")
        .with_batch_size(2)
        .with_eval_timeout(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(5));

    let mut control = ControlLoop::new(config, strategy, pool);
    let outcome = control.run(4).unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.failed, 4);
    assert!(outcome.best.is_none());

    let timed_out = EvaluationError::TimedOut { timeout_ms: 20 }.to_string();
    assert!(control
        .records()
        .values()
        .all(|r| r.status == EvaluationStatus::Failed
            && r.error.as_deref() == Some(timed_out.as_str())));
}

#[test]
fn stop_signal_writes_a_final_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stopped.json");

    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<StopSignal>> = Arc::new(OnceLock::new());
    let (counter, signal) = (Arc::clone(&calls), Arc::clone(&slot));
    let bounds = Bounds::uniform(1, 0.0, 10.0).unwrap();
    let objective = FnObjective::new("stopper", bounds, move |x: &[f64]| {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            if let Some(stop) = signal.get() {
                stop.raise();
            }
        }
        Ok(x[0])
    });
    let strategy = surrogate_for(&objective, 3);
    let mut control = ControlLoop::new(
        ControllerConfig::new("stop").with_checkpoint(&path),
        strategy,
        SerialPool::new(objective),
    );
    slot.set(control.stop_signal()).unwrap();

    let outcome = control.run(8).unwrap();
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.completed, 3);

    let saved = CheckpointStore::new(&path).load().unwrap();
    assert!(matches!(
        saved.event_log.last(),
        Some(Event::Terminated {
            reason: TerminationReason::Stopped,
            ..
        })
    ));
    assert_eq!(saved.pending.len(), outcome.pending);

    let resumed = linear_loop(1, Some(path.as_path())).resume(&path).unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.issued, 8);
}

#[test]
fn failed_evaluations_never_train_the_surrogate() {
    let bounds = Bounds::uniform(1, 0.0, 10.0).unwrap();
    let objective = FnObjective::new("cliff", bounds, |x: &[f64]| {
        if x[0] > 6.0 {
            Err(EvaluationError::failed("beyond the cliff"))
        } else {
            Ok(x[0])
        }
    });
    let strategy = surrogate_for(&objective, 8);
    let pool = SerialPool::new(objective);
    let mut control = ControlLoop::new(ControllerConfig::new("cliff"), strategy, pool);
    let outcome = control.run(12).unwrap();

    assert_eq!(outcome.completed + outcome.failed, 12);
    assert_eq!(control.strategy().training_size(), outcome.completed);
    assert_eq!(control.strategy().failed_count(), outcome.failed);
    assert!(control
        .records()
        .values()
        .filter(|r| r.status == EvaluationStatus::Failed)
        .all(|r| r.point[0] > 6.0 && r.value.is_none()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn replaying_the_log_rebuilds_the_strategy(
        seed in 0u64..1_000,
        budget in 6usize..14,
        batch in 1usize..4,
        halt in 1usize..14,
    ) {
        let objective = Sphere::new(2).unwrap();
        let strategy = surrogate_for(&objective, seed);
        let mut control = ControlLoop::new(
            ControllerConfig::new("replay").with_batch_size(batch),
            strategy,
            SerialPool::new(Sphere::new(2).unwrap()),
        )
        .halt_after(halt.min(budget));
        control.run(budget).unwrap();

        let mut fresh = surrogate_for(&objective, seed);
        let state = control.event_log().replay(&mut fresh).unwrap();

        prop_assert_eq!(fresh.export_state().unwrap(), control.strategy().export_state().unwrap());
        prop_assert_eq!(&state.records, control.records());
        prop_assert_eq!(state.best.as_ref(), control.best());
        prop_assert!(state.issued <= budget);
    }
}
