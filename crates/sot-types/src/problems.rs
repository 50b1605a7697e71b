//! Standard test problems.

use std::f64::consts::{E, PI};

use crate::errors::{EvaluationError, SotResult};
use crate::problem::{Bounds, Objective};

fn check_dim(bounds: &Bounds, point: &[f64]) -> Result<(), EvaluationError> {
    if point.len() != bounds.dim() {
        return Err(EvaluationError::DimensionMismatch {
            expected: bounds.dim(),
            found: point.len(),
        });
    }
    Ok(())
}

/// Ackley function on `[-15, 20]^d`; global minimum 0 at the origin.
#[derive(Debug, Clone)]
pub struct Ackley {
    bounds: Bounds,
}

impl Ackley {
    pub fn new(dim: usize) -> SotResult<Self> {
        Ok(Self {
            bounds: Bounds::uniform(dim, -15.0, 20.0)?,
        })
    }
}

impl Objective for Ackley {
    fn name(&self) -> &str {
        "ackley"
    }

    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError> {
        check_dim(&self.bounds, point)?;
        let d = point.len() as f64;
        let sum_sq: f64 = point.iter().map(|x| x * x).sum();
        let sum_cos: f64 = point.iter().map(|x| (2.0 * PI * x).cos()).sum();
        Ok(-20.0 * (-0.2 * (sum_sq / d).sqrt()).exp() - (sum_cos / d).exp() + 20.0 + E)
    }
}

/// Sphere function on `[-5, 5]^d`; global minimum 0 at the origin.
#[derive(Debug, Clone)]
pub struct Sphere {
    bounds: Bounds,
}

impl Sphere {
    pub fn new(dim: usize) -> SotResult<Self> {
        Ok(Self {
            bounds: Bounds::uniform(dim, -5.0, 5.0)?,
        })
    }
}

impl Objective for Sphere {
    fn name(&self) -> &str {
        "sphere"
    }

    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError> {
        check_dim(&self.bounds, point)?;
        Ok(point.iter().map(|x| x * x).sum())
    }
}

/// `f(x) = sum(x)` on a caller-chosen box. With one dimension on `[0, 10]`
/// this is the identity objective used by the resume scenarios.
#[derive(Debug, Clone)]
pub struct Linear {
    bounds: Bounds,
}

impl Linear {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    pub fn scalar(low: f64, high: f64) -> SotResult<Self> {
        Ok(Self {
            bounds: Bounds::uniform(1, low, high)?,
        })
    }
}

impl Objective for Linear {
    fn name(&self) -> &str {
        "linear"
    }

    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64, EvaluationError> {
        check_dim(&self.bounds, point)?;
        Ok(point.iter().sum())
    }
}
