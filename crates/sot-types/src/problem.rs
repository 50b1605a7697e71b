//! Problem definition: box bounds and the objective collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{EvaluationError, SotError, SotResult};

/// Axis-aligned box `[lower_i, upper_i]` for every dimension.
///
/// Deserialization goes through [`Bounds::new`], so a decoded value always
/// satisfies the same checks as a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

#[derive(Deserialize)]
struct RawBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = SotError;

    fn try_from(raw: RawBounds) -> SotResult<Self> {
        Bounds::new(raw.lower, raw.upper)
    }
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> SotResult<Self> {
        if lower.is_empty() {
            return Err(SotError::Validation("bounds must have at least one dimension".into()));
        }
        if lower.len() != upper.len() {
            return Err(SotError::Validation(format!(
                "lower bound has {} dimensions, upper bound has {}",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(SotError::Validation(format!(
                    "dimension {i}: invalid range [{lo}, {hi}]"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    /// The same `[low, high]` range in every one of `dim` dimensions.
    pub fn uniform(dim: usize, low: f64, high: f64) -> SotResult<Self> {
        Self::new(vec![low; dim], vec![high; dim])
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn width(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dim()
            && point
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi)
    }

    /// Map a point of the unit cube into the box.
    pub fn from_unit(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .enumerate()
            .map(|(i, u)| {
                let x = self.lower[i] + u.clamp(0.0, 1.0) * self.width(i);
                x.clamp(self.lower[i], self.upper[i])
            })
            .collect()
    }

    /// Map a point of the box into the unit cube.
    pub fn to_unit(&self, point: &[f64]) -> Vec<f64> {
        point
            .iter()
            .enumerate()
            .map(|(i, x)| (x - self.lower[i]) / self.width(i))
            .collect()
    }
}

/// The expensive function being minimized.
///
/// Implementations may be slow and blocking; the worker pool may call
/// `evaluate` concurrently from several threads.
pub trait Objective: Send + Sync {
    fn name(&self) -> &str;

    fn bounds(&self) -> &Bounds;

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError>;

    fn dim(&self) -> usize {
        self.bounds().dim()
    }
}

impl<T: Objective + ?Sized> Objective for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn bounds(&self) -> &Bounds {
        (**self).bounds()
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError> {
        (**self).evaluate(point)
    }
}

/// Adapter turning a closure into an [`Objective`].
pub struct FnObjective<F> {
    name: String,
    bounds: Bounds,
    func: F,
}

impl<F> FnObjective<F>
where
    F: Fn(&[f64]) -> Result<f64, EvaluationError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, bounds: Bounds, func: F) -> Self {
        Self {
            name: name.into(),
            bounds,
            func,
        }
    }
}

impl<F> fmt::Debug for FnObjective<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObjective")
            .field("name", &self.name)
            .field("bounds", &self.bounds)
            .finish()
    }
}

impl<F> Objective for FnObjective<F>
where
    F: Fn(&[f64]) -> Result<f64, EvaluationError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError> {
        if point.len() != self.bounds.dim() {
            return Err(EvaluationError::DimensionMismatch {
                expected: self.bounds.dim(),
                found: point.len(),
            });
        }
        (self.func)(point)
    }
}
