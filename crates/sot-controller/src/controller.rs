//! The checkpointed control loop.
//!
//! One thread owns the strategy and the event log. Every state change goes
//! through the log first; snapshots are written only at safe points, so the
//! last checkpoint on disk is always a consistent place to resume from.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sot_strategy::SearchStrategy;
use sot_types::{
    internal_error, EvaluationError, EvaluationId, EvaluationRecord, SotError, SotResult,
    StrategyError,
};

use crate::checkpoint::{Checkpoint, CheckpointStore, PendingEntry, FORMAT_VERSION};
use crate::config::ControllerConfig;
use crate::event_log::{Event, EventLog, LogState, TerminationReason};
use crate::pool::{Completion, WorkerPool};

/// Cooperative stop request, shared between the control thread and whoever
/// wants to interrupt it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Budget issued and every evaluation resolved.
    Completed,
    /// The checkpoint already described a finished run.
    AlreadyComplete,
    /// Stop signal honoured; a final checkpoint was written.
    Stopped,
    /// Returned by `halt_after` without cleanup, as if the process died.
    Halted,
    /// The strategy ran out of admissible points before the budget.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub best: Option<EvaluationRecord>,
    pub issued: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Drives a [`SearchStrategy`] against a [`WorkerPool`], journaling to an
/// [`EventLog`] and checkpointing through a [`CheckpointStore`].
pub struct ControlLoop<S, P> {
    config: ControllerConfig,
    strategy: S,
    pool: P,
    store: Option<CheckpointStore>,
    log: EventLog,
    state: LogState,
    dispatched: HashMap<EvaluationId, Instant>,
    stop: StopSignal,
    halt_after: Option<usize>,
    resolved: usize,
    since_checkpoint: usize,
    starved: bool,
}

impl<S: SearchStrategy, P: WorkerPool> ControlLoop<S, P> {
    pub fn new(config: ControllerConfig, strategy: S, pool: P) -> Self {
        let store = config.checkpoint_path.clone().map(CheckpointStore::new);
        Self {
            config,
            strategy,
            pool,
            store,
            log: EventLog::new(),
            state: LogState::default(),
            dispatched: HashMap::new(),
            stop: StopSignal::new(),
            halt_after: None,
            resolved: 0,
            since_checkpoint: 0,
            starved: false,
        }
    }

    /// Return `Halted` right after the `n`-th resolution in this process,
    /// skipping the final checkpoint.
    pub fn halt_after(mut self, n: usize) -> Self {
        self.halt_after = Some(n);
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn records(&self) -> &BTreeMap<EvaluationId, EvaluationRecord> {
        &self.state.records
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.state.best.as_ref()
    }

    pub fn pending_ids(&self) -> Vec<EvaluationId> {
        self.state.pending.keys().copied().collect()
    }

    /// Fresh run with the given evaluation budget.
    pub fn run(&mut self, budget: usize) -> SotResult<RunOutcome> {
        self.config.validate()?;
        self.reset();
        self.strategy.start(budget)?;

        let run_id = Uuid::new_v4();
        info!(
            "Starting run {} ({}): {} strategy, budget {}, batch size {}",
            run_id,
            self.config.name,
            self.strategy.name(),
            budget,
            self.config.batch_size
        );
        self.record(Event::Started {
            run_id,
            budget,
            at: Utc::now(),
        })?;

        self.fill_slots()?;
        self.checkpoint()?;
        self.drive()
    }

    /// Resume from the checkpoint file at `path`. Later snapshots go to the
    /// configured checkpoint path, or back to `path` when none is configured.
    pub fn resume(&mut self, path: impl AsRef<Path>) -> SotResult<RunOutcome> {
        let store = CheckpointStore::new(path.as_ref());
        let checkpoint = store.load()?;
        if self.store.is_none() {
            self.store = Some(store);
        }
        self.resume_from(checkpoint)
    }

    pub fn resume_from(&mut self, checkpoint: Checkpoint) -> SotResult<RunOutcome> {
        self.config.validate()?;
        let state = checkpoint.validate()?;
        if checkpoint.dim != self.pool.dim() {
            return Err(SotError::corrupt(format!(
                "checkpoint has dimension {}, objective has {}",
                checkpoint.dim,
                self.pool.dim()
            )));
        }

        self.reset();
        self.strategy
            .import_state(checkpoint.strategy_state)
            .map_err(|e| SotError::corrupt(format!("strategy state: {e}")))?;
        if self.strategy.dim() != checkpoint.dim {
            return Err(SotError::corrupt(format!(
                "strategy state has dimension {}, checkpoint has {}",
                self.strategy.dim(),
                checkpoint.dim
            )));
        }
        if self.strategy.budget() != checkpoint.budget
            || self.strategy.issued() != checkpoint.issued_count
        {
            return Err(SotError::corrupt(format!(
                "strategy reports {}/{} issued, checkpoint says {}/{}",
                self.strategy.issued(),
                self.strategy.budget(),
                checkpoint.issued_count,
                checkpoint.budget
            )));
        }
        self.log = EventLog::from_events(checkpoint.event_log);
        self.state = state;

        info!(
            "Resuming run {} ({}): {}/{} issued, {} completed, {} failed, {} pending",
            checkpoint.run_id,
            self.config.name,
            self.state.issued,
            self.state.budget,
            self.state.completed,
            self.state.failed,
            self.state.pending.len()
        );

        if self.state.is_complete() {
            info!("Run {} was already complete", checkpoint.run_id);
            return Ok(self.outcome(RunStatus::AlreadyComplete));
        }

        let ids = self.pending_ids();
        self.record(Event::Resubmitted {
            ids: ids.clone(),
            at: Utc::now(),
        })?;
        for id in ids {
            let point = self
                .state
                .pending
                .get(&id)
                .cloned()
                .ok_or_else(|| internal_error!("pending {id} lost its point"))?;
            self.dispatch(id, point)?;
        }

        self.fill_slots()?;
        self.checkpoint()?;
        self.drive()
    }

    /// Self-consistent snapshot of the current run.
    pub fn snapshot(&self) -> SotResult<Checkpoint> {
        let run_id = self.state.run_id.ok_or(StrategyError::NotStarted)?;
        Ok(Checkpoint {
            format_version: FORMAT_VERSION,
            run_id,
            dim: self.pool.dim(),
            budget: self.state.budget,
            issued_count: self.state.issued,
            next_id: self.state.next_id,
            event_log: self.log.snapshot(),
            strategy_state: self.strategy.export_state()?,
            pending: self
                .state
                .pending
                .iter()
                .map(|(id, point)| PendingEntry {
                    id: *id,
                    point: point.clone(),
                })
                .collect(),
            best_so_far: self.state.best.clone(),
            saved_at: Utc::now(),
        })
    }

    fn reset(&mut self) {
        self.log = EventLog::new();
        self.state = LogState::default();
        self.dispatched.clear();
        self.resolved = 0;
        self.since_checkpoint = 0;
        self.starved = false;
    }

    /// Snapshots are taken after dispatching replacements, so pending work is in the snapshot.
    fn drive(&mut self) -> SotResult<RunOutcome> {
        loop {
            if self.stop.is_raised() {
                info!("Stop requested, writing final checkpoint");
                return self.finish(TerminationReason::Stopped);
            }

            if self.state.pending.is_empty() {
                if self.state.issued >= self.state.budget {
                    return self.finish(TerminationReason::Completed);
                }
                if self.starved || self.fill_slots()? == 0 {
                    return self.finish(TerminationReason::Exhausted);
                }
                continue;
            }

            let mut resolved = 0;
            match self.pool.next_completion(Some(self.config.poll_interval)) {
                Some(completion) => {
                    if self.apply_completion(completion)? {
                        resolved += 1;
                    }
                }
                None if self.pool.in_flight() == 0 && self.config.eval_timeout.is_none() => {
                    return Err(SotError::WorkerPool {
                        message: format!(
                            "{} evaluations pending but none in flight",
                            self.state.pending.len()
                        ),
                    });
                }
                None => {}
            }
            resolved += self.expire_overdue()?;
            if resolved == 0 {
                continue;
            }

            self.resolved += resolved;
            if self.halt_after.is_some_and(|n| self.resolved >= n) {
                warn!(
                    "Halting after {} resolutions without a final checkpoint",
                    self.resolved
                );
                return Ok(self.outcome(RunStatus::Halted));
            }

            self.fill_slots()?;
            self.since_checkpoint += resolved;
            if self.since_checkpoint >= self.config.checkpoint_every {
                self.checkpoint()?;
            }
        }
    }

    /// Append to the log after checking the event against the folded state.
    fn record(&mut self, event: Event) -> SotResult<Option<EvaluationRecord>> {
        let resolved = self.state.apply(self.log.len(), &event)?.cloned();
        self.log.append(event);
        Ok(resolved)
    }

    /// Propose one point per free slot and dispatch them. Returns how many
    /// were dispatched.
    fn fill_slots(&mut self) -> SotResult<usize> {
        let free = self
            .config
            .batch_size
            .saturating_sub(self.state.pending.len());
        let requested = free.min(self.strategy.remaining());
        if requested == 0 {
            return Ok(0);
        }

        let points = self.strategy.propose(requested);
        self.starved = points.is_empty();
        let now = Utc::now();
        let first = self.state.next_id;
        let records: Vec<EvaluationRecord> = points
            .into_iter()
            .enumerate()
            .map(|(i, point)| {
                EvaluationRecord::submitted_at(EvaluationId(first.0 + i as u64), point, now)
            })
            .collect();
        let dispatched = records.len();

        self.record(Event::Submitted {
            requested,
            records: records.clone(),
        })?;
        for record in records {
            self.dispatch(record.id, record.point)?;
        }
        if dispatched > 0 {
            debug!("Dispatched {} of {} requested evaluations", dispatched, requested);
        }
        Ok(dispatched)
    }

    fn dispatch(&mut self, id: EvaluationId, point: Vec<f64>) -> SotResult<()> {
        self.pool.submit(id, point)?;
        self.dispatched.insert(id, Instant::now());
        Ok(())
    }

    /// Returns false when the completion was stale and ignored.
    fn apply_completion(&mut self, completion: Completion) -> SotResult<bool> {
        let Completion {
            id,
            outcome,
            finished_at,
        } = completion;
        if !self.state.pending.contains_key(&id) {
            warn!("Ignoring late completion for {}: no longer pending", id);
            return Ok(false);
        }
        self.dispatched.remove(&id);

        let outcome = outcome.and_then(|value| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(EvaluationError::NonFinite { value })
            }
        });
        let event = match outcome {
            Ok(value) => Event::Completed {
                id,
                value,
                completed_at: finished_at,
            },
            Err(e) => {
                warn!("Evaluation {} failed: {}", id, e);
                Event::Failed {
                    id,
                    reason: e.to_string(),
                    completed_at: finished_at,
                }
            }
        };
        self.resolve(event)?;
        Ok(true)
    }

    /// Fail every dispatched evaluation older than the timeout.
    fn expire_overdue(&mut self) -> SotResult<usize> {
        let Some(timeout) = self.config.eval_timeout else {
            return Ok(0);
        };
        let mut overdue: Vec<EvaluationId> = self
            .dispatched
            .iter()
            .filter(|(_, since)| since.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        overdue.sort();

        for id in &overdue {
            self.dispatched.remove(id);
            let error = EvaluationError::TimedOut {
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!("Evaluation {} timed out", id);
            self.resolve(Event::Failed {
                id: *id,
                reason: error.to_string(),
                completed_at: Utc::now(),
            })?;
        }
        Ok(overdue.len())
    }

    fn resolve(&mut self, event: Event) -> SotResult<()> {
        let previous_best = self.state.best.as_ref().map(|r| r.id);
        let record = self
            .record(event)?
            .ok_or_else(|| internal_error!("resolution event resolved nothing"))?;
        self.strategy.observe(&record);
        self.record(Event::StrategyUpdated {
            issued: self.state.issued,
            completed: self.state.completed,
            failed: self.state.failed,
        })?;

        if let Some(best) = self.state.best.as_ref().filter(|b| Some(b.id) != previous_best) {
            info!(
                "New best {:.6} at {} ({}/{} resolved)",
                best.value.unwrap_or(f64::NAN),
                best.id,
                self.state.completed + self.state.failed,
                self.state.budget
            );
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> SotResult<()> {
        self.since_checkpoint = 0;
        if let Some(store) = &self.store {
            store.save(&self.snapshot()?)?;
        }
        Ok(())
    }

    fn finish(&mut self, reason: TerminationReason) -> SotResult<RunOutcome> {
        self.record(Event::Terminated {
            reason,
            at: Utc::now(),
        })?;
        self.checkpoint()?;

        let status = match reason {
            TerminationReason::Completed => RunStatus::Completed,
            TerminationReason::Stopped => RunStatus::Stopped,
            TerminationReason::Exhausted => RunStatus::Exhausted,
        };
        let outcome = self.outcome(status);
        info!(
            "Run {} finished ({:?}): {} completed, {} failed, {} pending, best {:?}",
            outcome.run_id,
            status,
            outcome.completed,
            outcome.failed,
            outcome.pending,
            outcome.best.as_ref().and_then(|r| r.value)
        );
        Ok(outcome)
    }

    fn outcome(&self, status: RunStatus) -> RunOutcome {
        RunOutcome {
            run_id: self.state.run_id.unwrap_or_else(Uuid::nil),
            status,
            best: self.state.best.clone(),
            issued: self.state.issued,
            completed: self.state.completed,
            failed: self.state.failed,
            pending: self.state.pending.len(),
        }
    }
}
