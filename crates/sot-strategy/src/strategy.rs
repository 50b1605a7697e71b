//! The contract between the control loop and a search strategy.

use sot_types::{EvaluationRecord, SotResult};

/// A stateful point generator that learns from completed evaluations.
///
/// The control loop is the only caller and never calls two methods
/// concurrently. A strategy must be deterministic given its configuration and
/// the sequence of calls it receives, so that replaying a run's event log
/// reproduces its proposals exactly.
pub trait SearchStrategy: Send {
    /// Human-readable strategy name.
    fn name(&self) -> &str;

    /// Dimension of the points this strategy proposes.
    fn dim(&self) -> usize;

    /// Reset to a fresh run with the given evaluation budget. Builds the
    /// experimental design and reseeds the random stream.
    fn start(&mut self, budget: usize) -> SotResult<()>;

    fn budget(&self) -> usize;

    /// Number of points handed out by `propose` since `start`.
    fn issued(&self) -> usize;

    fn remaining(&self) -> usize {
        self.budget().saturating_sub(self.issued())
    }

    /// Up to `count` new points, each within bounds and distinct from each
    /// other and from every point still outstanding. Never exceeds the budget.
    fn propose(&mut self, count: usize) -> Vec<Vec<f64>>;

    /// Consume a resolved evaluation. Failed records only update bookkeeping;
    /// they never train the surrogate.
    fn observe(&mut self, record: &EvaluationRecord);

    /// Opaque, serializable snapshot of the full internal state.
    fn export_state(&self) -> SotResult<serde_json::Value>;

    /// Restore a snapshot produced by `export_state`. Afterwards the strategy
    /// behaves exactly as it did at export time. A snapshot for a different
    /// dimension is rejected.
    fn import_state(&mut self, state: serde_json::Value) -> SotResult<()>;
}

impl<S: SearchStrategy + ?Sized> SearchStrategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn start(&mut self, budget: usize) -> SotResult<()> {
        (**self).start(budget)
    }

    fn budget(&self) -> usize {
        (**self).budget()
    }

    fn issued(&self) -> usize {
        (**self).issued()
    }

    fn propose(&mut self, count: usize) -> Vec<Vec<f64>> {
        (**self).propose(count)
    }

    fn observe(&mut self, record: &EvaluationRecord) {
        (**self).observe(record)
    }

    fn export_state(&self) -> SotResult<serde_json::Value> {
        (**self).export_state()
    }

    fn import_state(&mut self, state: serde_json::Value) -> SotResult<()> {
        (**self).import_state(state)
    }
}
