//! Surrogate-guided global strategy: experimental design first, then
//! candidate sampling on a cubic RBF fitted to everything completed so far.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use sot_types::{Bounds, EvaluationRecord, EvaluationStatus, SotResult, StrategyError};

use crate::design::DesignKind;
use crate::rng::{seeded, RngState};
use crate::sampling::{perturbation_candidates, select};
use crate::strategy::SearchStrategy;
use crate::surrogate::RbfInterpolant;

/// Configuration for a [`SurrogateStrategy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateStrategyConfig {
    pub bounds: Bounds,
    pub design: DesignKind,

    /// Size of the experimental design; `None` means `2 * (dim + 1)`.
    pub design_points: Option<usize>,

    /// Candidates generated per adaptive proposal.
    pub num_candidates: usize,

    /// Merit weights cycled through on every pick; higher trusts the
    /// surrogate more.
    pub weights: Vec<f64>,

    /// Perturbation step in unit-cube coordinates.
    pub sigma_init: f64,
    pub sigma_min: f64,
    pub sigma_max: f64,

    /// Consecutive improvements before the step doubles.
    pub success_tolerance: usize,

    /// Consecutive non-improvements before the step halves.
    pub fail_tolerance: usize,

    pub seed: u64,
}

impl SurrogateStrategyConfig {
    pub fn new(bounds: Bounds) -> Self {
        let dim = bounds.dim();
        Self {
            bounds,
            design: DesignKind::SymmetricLatinHypercube,
            design_points: None,
            num_candidates: 100 * dim,
            weights: vec![0.3, 0.5, 0.8, 0.95],
            sigma_init: 0.2,
            sigma_min: 0.2 * 0.5f64.powi(6),
            sigma_max: 0.2,
            success_tolerance: 3,
            fail_tolerance: dim.max(5),
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_design(mut self, design: DesignKind, points: Option<usize>) -> Self {
        self.design = design;
        self.design_points = points;
        self
    }

    pub fn with_num_candidates(mut self, n: usize) -> Self {
        self.num_candidates = n;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn dim(&self) -> usize {
        self.bounds.dim()
    }

    pub fn design_size(&self) -> usize {
        self.design_points.unwrap_or(2 * (self.dim() + 1))
    }

    fn validate(&self) -> Result<(), StrategyError> {
        let invalid = |message: String| Err(StrategyError::InvalidConfig { message });
        if self.num_candidates == 0 {
            return invalid("num_candidates must be positive".into());
        }
        if self.weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return invalid(format!("weights must lie in [0, 1]: {:?}", self.weights));
        }
        let sigma_ordered =
            self.sigma_min <= self.sigma_init && self.sigma_init <= self.sigma_max;
        if !(self.sigma_min > 0.0 && sigma_ordered) {
            return invalid(format!(
                "need 0 < sigma_min <= sigma_init <= sigma_max, got {} / {} / {}",
                self.sigma_min, self.sigma_init, self.sigma_max
            ));
        }
        if self.design_size() == 0 {
            return invalid("design needs at least one point".into());
        }
        Ok(())
    }
}

/// Everything needed to resume a [`SurrogateStrategy`] exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SurrogateState {
    config: SurrogateStrategyConfig,
    started: bool,
    budget: usize,
    issued: usize,
    design: Vec<Vec<f64>>,
    training_points: Vec<Vec<f64>>,
    training_values: Vec<f64>,
    failed_points: Vec<Vec<f64>>,
    outstanding: Vec<Vec<f64>>,
    best_value: Option<f64>,
    sigma: f64,
    successes: usize,
    failures: usize,
    weight_cursor: usize,
    rng: RngState,
}

/// Global surrogate strategy with asynchronous, batch-friendly proposals.
///
/// Design points are handed out first. After that every proposal fits the
/// surrogate to the completed evaluations, perturbs the best point found so
/// far, and keeps the candidate with the lowest merit. Points still in flight
/// count as known so that concurrent proposals spread out.
#[derive(Debug, Clone)]
pub struct SurrogateStrategy {
    config: SurrogateStrategyConfig,
    started: bool,
    budget: usize,
    issued: usize,
    design: VecDeque<Vec<f64>>,
    training_points: Vec<Vec<f64>>,
    training_values: Vec<f64>,
    failed_points: Vec<Vec<f64>>,
    outstanding: Vec<Vec<f64>>,
    best_value: Option<f64>,
    sigma: f64,
    successes: usize,
    failures: usize,
    weight_cursor: usize,
    rng: ChaCha8Rng,
    surrogate: Option<RbfInterpolant>,
    fitted_on: usize,
}

impl SurrogateStrategy {
    pub fn new(config: SurrogateStrategyConfig) -> SotResult<Self> {
        config.validate()?;
        Ok(Self {
            sigma: config.sigma_init,
            rng: seeded(config.seed),
            config,
            started: false,
            budget: 0,
            issued: 0,
            design: VecDeque::new(),
            training_points: Vec::new(),
            training_values: Vec::new(),
            failed_points: Vec::new(),
            outstanding: Vec::new(),
            best_value: None,
            successes: 0,
            failures: 0,
            weight_cursor: 0,
            surrogate: None,
            fitted_on: 0,
        })
    }

    pub fn config(&self) -> &SurrogateStrategyConfig {
        &self.config
    }

    /// Number of completed evaluations the surrogate is trained on.
    pub fn training_size(&self) -> usize {
        self.training_points.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_points.len()
    }

    pub fn outstanding(&self) -> &[Vec<f64>] {
        &self.outstanding
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    fn in_adaptive_phase(&self) -> bool {
        self.design.is_empty()
    }

    fn refresh_surrogate(&mut self) {
        if self.fitted_on == self.training_points.len() {
            return;
        }
        let unit: Vec<Vec<f64>> = self
            .training_points
            .iter()
            .map(|p| self.config.bounds.to_unit(p))
            .collect();
        self.surrogate = match RbfInterpolant::fit(&unit, &self.training_values) {
            Ok(rbf) => Some(rbf),
            Err(e) => {
                debug!("surrogate fit skipped: {}", e);
                None
            }
        };
        self.fitted_on = self.training_points.len();
    }

    fn best_unit_point(&self) -> Option<Vec<f64>> {
        let mut best: Option<(usize, f64)> = None;
        for (i, v) in self.training_values.iter().enumerate() {
            if best.map_or(true, |(_, b)| *v < b) {
                best = Some((i, *v));
            }
        }
        best.map(|(i, _)| self.config.bounds.to_unit(&self.training_points[i]))
    }

    fn adaptive_points(&mut self, count: usize) -> Vec<Vec<f64>> {
        self.refresh_surrogate();
        let dim = self.config.dim();
        let center = self.best_unit_point();
        let candidates = perturbation_candidates(
            center.as_deref(),
            dim,
            self.sigma,
            self.config.num_candidates,
            &mut self.rng,
        );

        let known: Vec<Vec<f64>> = self
            .training_points
            .iter()
            .chain(&self.failed_points)
            .chain(&self.outstanding)
            .map(|p| self.config.bounds.to_unit(p))
            .collect();
        let min_distance = 1e-3 * (dim as f64).sqrt();

        select(
            &candidates,
            self.surrogate.as_ref(),
            &known,
            count,
            &self.config.weights,
            &mut self.weight_cursor,
            min_distance,
        )
        .into_iter()
        .map(|unit| self.config.bounds.from_unit(&unit))
        .collect()
    }

    fn adjust_step(&mut self, value: f64) {
        let improved = match self.best_value {
            None => true,
            Some(best) => value < best - 1e-3 * best.abs(),
        };
        if improved {
            self.successes += 1;
            self.failures = 0;
        } else {
            self.failures += 1;
            self.successes = 0;
        }

        if self.failures >= self.config.fail_tolerance {
            self.sigma = (self.sigma / 2.0).max(self.config.sigma_min);
            self.failures = 0;
            debug!("step reduced to {}", self.sigma);
        } else if self.successes >= self.config.success_tolerance {
            self.sigma = (self.sigma * 2.0).min(self.config.sigma_max);
            self.successes = 0;
            debug!("step increased to {}", self.sigma);
        }
    }

    fn take_outstanding(&mut self, point: &[f64]) {
        if let Some(pos) = self.outstanding.iter().position(|p| p.as_slice() == point) {
            self.outstanding.remove(pos);
        }
    }

    fn to_state(&self) -> SotResult<SurrogateState> {
        Ok(SurrogateState {
            config: self.config.clone(),
            started: self.started,
            budget: self.budget,
            issued: self.issued,
            design: self.design.iter().cloned().collect(),
            training_points: self.training_points.clone(),
            training_values: self.training_values.clone(),
            failed_points: self.failed_points.clone(),
            outstanding: self.outstanding.clone(),
            best_value: self.best_value,
            sigma: self.sigma,
            successes: self.successes,
            failures: self.failures,
            weight_cursor: self.weight_cursor,
            rng: RngState::capture(self.config.seed, &self.rng)?,
        })
    }
}

impl SearchStrategy for SurrogateStrategy {
    fn name(&self) -> &str {
        "surrogate"
    }

    fn dim(&self) -> usize {
        self.config.dim()
    }

    fn start(&mut self, budget: usize) -> SotResult<()> {
        let config = self.config.clone();
        *self = Self::new(config)?;

        let dim = self.config.dim();
        let unit = self
            .config
            .design
            .generate(dim, self.config.design_size(), &mut self.rng)?;
        self.design = unit
            .iter()
            .map(|u| self.config.bounds.from_unit(u))
            .collect();
        self.budget = budget;
        self.started = true;
        debug!(
            "surrogate strategy started: budget {}, {} design points in {} dimensions",
            budget,
            self.design.len(),
            dim
        );
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
        let mut batch = Vec::with_capacity(count);

        while batch.len() < count {
            match self.design.pop_front() {
                Some(point) => batch.push(point),
                None => break,
            }
        }
        self.outstanding.extend(batch.iter().cloned());

        if batch.len() < count {
            let adaptive = self.adaptive_points(count - batch.len());
            if adaptive.len() < count - batch.len() {
                warn!(
                    "only {} of {} adaptive points could be placed",
                    adaptive.len(),
                    count - batch.len()
                );
            }
            self.outstanding.extend(adaptive.iter().cloned());
            batch.extend(adaptive);
        }

        self.issued += batch.len();
        batch
    }

    fn observe(&mut self, record: &EvaluationRecord) {
        self.take_outstanding(&record.point);
        match (record.status, record.value) {
            (EvaluationStatus::Completed, Some(value)) => {
                if self.in_adaptive_phase() {
                    self.adjust_step(value);
                }
                if self.best_value.map_or(true, |b| value < b) {
                    self.best_value = Some(value);
                }
                self.training_points.push(record.point.clone());
                self.training_values.push(value);
            }
            (EvaluationStatus::Failed, _) => {
                self.failed_points.push(record.point.clone());
            }
            (status, _) => {
                warn!("ignoring unresolved evaluation {} ({:?})", record.id, status);
            }
        }
    }

    fn export_state(&self) -> SotResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_state()?)?)
    }

    fn import_state(&mut self, state: serde_json::Value) -> SotResult<()> {
        let state: SurrogateState =
            serde_json::from_value(state).map_err(|e| StrategyError::InvalidState {
                message: format!("unreadable surrogate state: {e}"),
            })?;
        state.config.validate()?;
        let dim = state.config.dim();
        if dim != self.config.dim() {
            return Err(StrategyError::InvalidState {
                message: format!(
                    "state is for {} dimensions, strategy has {}",
                    dim,
                    self.config.dim()
                ),
            }
            .into());
        }
        let wrong_dim = state
            .design
            .iter()
            .chain(&state.training_points)
            .chain(&state.failed_points)
            .chain(&state.outstanding)
            .any(|p| p.len() != dim);
        if wrong_dim || state.training_points.len() != state.training_values.len() {
            return Err(StrategyError::InvalidState {
                message: "surrogate state is structurally inconsistent".to_string(),
            }
            .into());
        }
        if state.issued > state.budget {
            return Err(StrategyError::InvalidState {
                message: format!("issued {} exceeds budget {}", state.issued, state.budget),
            }
            .into());
        }
        if state.config != self.config {
            debug!("adopting strategy configuration from imported state");
        }

        *self = Self {
            rng: state.rng.restore(),
            config: state.config,
            started: state.started,
            budget: state.budget,
            issued: state.issued,
            design: state.design.into(),
            training_points: state.training_points,
            training_values: state.training_values,
            failed_points: state.failed_points,
            outstanding: state.outstanding,
            best_value: state.best_value,
            sigma: state.sigma,
            successes: state.successes,
            failures: state.failures,
            weight_cursor: state.weight_cursor,
            surrogate: None,
            fitted_on: 0,
        };
        Ok(())
    }
}
