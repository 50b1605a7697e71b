//! Seeded uniform random search.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sot_types::{Bounds, EvaluationRecord, EvaluationStatus, SotResult, StrategyError};

use crate::rng::{seeded, RngState};
use crate::strategy::SearchStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RandomState {
    bounds: Bounds,
    seed: u64,
    started: bool,
    budget: usize,
    issued: usize,
    completed: usize,
    failed: usize,
    rng: RngState,
}

/// Independent uniform sampling across the bounds. Learns nothing, which
/// makes it a convenient baseline and a cheap stand-in for tests.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    bounds: Bounds,
    seed: u64,
    started: bool,
    budget: usize,
    issued: usize,
    completed: usize,
    failed: usize,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(bounds: Bounds, seed: u64) -> Self {
        Self {
            bounds,
            seed,
            started: false,
            budget: 0,
            issued: 0,
            completed: 0,
            failed: 0,
            rng: seeded(seed),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    fn sample_one(&mut self) -> Vec<f64> {
        (0..self.bounds.dim())
            .map(|i| self.rng.gen_range(self.bounds.lower()[i]..=self.bounds.upper()[i]))
            .collect()
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn dim(&self) -> usize {
        self.bounds.dim()
    }

    fn start(&mut self, budget: usize) -> SotResult<()> {
        *self = Self::new(self.bounds.clone(), self.seed);
        self.budget = budget;
        self.started = true;
        Ok(())
    }

    fn budget(&self) -> usize {
        self.budget
    }

    fn issued(&self) -> usize {
        self.issued
    }

    fn propose(&mut self, count: usize) -> Vec<Vec<f64>> {
        if !self.started {
            warn!("propose called before start");
            return Vec::new();
        }
        let count = count.min(self.remaining());
        let mut batch: Vec<Vec<f64>> = Vec::with_capacity(count);
        while batch.len() < count {
            let point = self.sample_one();
            if !batch.contains(&point) {
                batch.push(point);
            }
        }
        self.issued += batch.len();
        batch
    }

    fn observe(&mut self, record: &EvaluationRecord) {
        match record.status {
            EvaluationStatus::Completed => self.completed += 1,
            EvaluationStatus::Failed => self.failed += 1,
            EvaluationStatus::Pending => warn!("ignoring unresolved evaluation {}", record.id),
        }
    }

    fn export_state(&self) -> SotResult<serde_json::Value> {
        let state = RandomState {
            bounds: self.bounds.clone(),
            seed: self.seed,
            started: self.started,
            budget: self.budget,
            issued: self.issued,
            completed: self.completed,
            failed: self.failed,
            rng: RngState::capture(self.seed, &self.rng)?,
        };
        Ok(serde_json::to_value(state)?)
    }

    fn import_state(&mut self, state: serde_json::Value) -> SotResult<()> {
        let state: RandomState =
            serde_json::from_value(state).map_err(|e| StrategyError::InvalidState {
                message: format!("unreadable random-search state: {e}"),
            })?;
        if state.bounds.dim() != self.bounds.dim() {
            return Err(StrategyError::InvalidState {
                message: format!(
                    "state is for {} dimensions, strategy has {}",
                    state.bounds.dim(),
                    self.bounds.dim()
                ),
            }
            .into());
        }
        if state.issued > state.budget {
            return Err(StrategyError::InvalidState {
                message: format!("issued {} exceeds budget {}", state.issued, state.budget),
            }
            .into());
        }
        *self = Self {
            rng: state.rng.restore(),
            bounds: state.bounds,
            seed: state.seed,
            started: state.started,
            budget: state.budget,
            issued: state.issued,
            completed: state.completed,
            failed: state.failed,
        };
        Ok(())
    }
}
