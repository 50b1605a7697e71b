//! Worker transports: dispatch an evaluation, report its completion later.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use sot_types::{EvaluationError, EvaluationId, Objective, SotError, SotResult};

/// Outcome of one dispatched evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: EvaluationId,
    pub outcome: Result<f64, EvaluationError>,
    pub finished_at: DateTime<Utc>,
}

/// Capability to run evaluations asynchronously.
///
/// `submit` must not block the caller. `next_completion` is the control
/// loop's only suspension point: it waits up to `timeout` (forever when
/// `None`) for any submitted evaluation to finish.
pub trait WorkerPool: Send {
    /// Dimension declared by the objective behind this pool.
    fn dim(&self) -> usize;

    fn submit(&self, id: EvaluationId, point: Vec<f64>) -> SotResult<()>;

    fn next_completion(&self, timeout: Option<Duration>) -> Option<Completion>;

    /// Evaluations submitted but not yet reported.
    fn in_flight(&self) -> usize;
}

/// Run the objective, turning panics and non-finite values into failures.
pub(crate) fn evaluate_guarded(
    objective: &dyn Objective,
    point: &[f64],
) -> Result<f64, EvaluationError> {
    let value = match catch_unwind(AssertUnwindSafe(|| objective.evaluate(point))) {
        Ok(result) => result?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(EvaluationError::Panicked { message });
        }
    };
    if !value.is_finite() {
        return Err(EvaluationError::NonFinite { value });
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Serial pool
// ---------------------------------------------------------------------------

/// Evaluates lazily on the caller's thread, in submission order.
///
/// Completion order is deterministic, which makes this the pool of choice for
/// reproducible runs and tests.
pub struct SerialPool<O> {
    objective: O,
    queue: Mutex<VecDeque<(EvaluationId, Vec<f64>)>>,
}

impl<O: Objective> SerialPool<O> {
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }
}

impl<O: Objective> WorkerPool for SerialPool<O> {
    fn dim(&self) -> usize {
        self.objective.dim()
    }

    fn submit(&self, id: EvaluationId, point: Vec<f64>) -> SotResult<()> {
        self.queue.lock().push_back((id, point));
        Ok(())
    }

    fn next_completion(&self, _timeout: Option<Duration>) -> Option<Completion> {
        let (id, point) = self.queue.lock().pop_front()?;
        let outcome = evaluate_guarded(&self.objective, &point);
        Some(Completion {
            id,
            outcome,
            finished_at: Utc::now(),
        })
    }

    fn in_flight(&self) -> usize {
        self.queue.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Thread pool
// ---------------------------------------------------------------------------

/// Evaluates on a dedicated rayon pool; completions arrive on a channel in
/// whatever order the workers finish.
pub struct ThreadPool {
    objective: Arc<dyn Objective>,
    workers: rayon::ThreadPool,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    running: Arc<DashSet<EvaluationId>>,
}

impl ThreadPool {
    pub fn new(objective: Arc<dyn Objective>, threads: usize) -> SotResult<Self> {
        if threads == 0 {
            return Err(SotError::WorkerPool {
                message: "thread pool needs at least one thread".to_string(),
            });
        }
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sot-worker-{i}"))
            .build()
            .map_err(|e| SotError::WorkerPool {
                message: e.to_string(),
            })?;
        let (tx, rx) = unbounded();
        Ok(Self {
            objective,
            workers,
            tx,
            rx,
            running: Arc::new(DashSet::new()),
        })
    }
}

impl WorkerPool for ThreadPool {
    fn dim(&self) -> usize {
        self.objective.dim()
    }

    fn submit(&self, id: EvaluationId, point: Vec<f64>) -> SotResult<()> {
        self.running.insert(id);
        let objective = Arc::clone(&self.objective);
        let running = Arc::clone(&self.running);
        let tx = self.tx.clone();

        self.workers.spawn(move || {
            let outcome = evaluate_guarded(objective.as_ref(), &point);
            // Send before deregistering so in_flight never reads zero early.
            if tx
                .send(Completion {
                    id,
                    outcome,
                    finished_at: Utc::now(),
                })
                .is_err()
            {
                debug!("completion for {} dropped: pool shut down", id);
            }
            running.remove(&id);
        });
        Ok(())
    }

    fn next_completion(&self, timeout: Option<Duration>) -> Option<Completion> {
        match timeout {
            Some(t) => self.rx.recv_timeout(t).ok(),
            None => self.rx.recv().ok(),
        }
    }

    fn in_flight(&self) -> usize {
        self.running.len() + self.rx.len()
    }
}
