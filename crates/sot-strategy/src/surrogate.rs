//! Radial basis function surrogate: cubic kernel with a linear polynomial tail.

use sot_types::StrategyError;

/// Regularization added to the kernel diagonal.
const DEFAULT_ETA: f64 = 1e-8;

/// Cubic RBF interpolant `s(x) = sum_i lambda_i |x - x_i|^3 + c_0 + c^T x`.
///
/// Fitted from scratch on every call to [`RbfInterpolant::fit`]; the fit is a
/// pure function of the training data.
#[derive(Debug, Clone, PartialEq)]
pub struct RbfInterpolant {
    centers: Vec<Vec<f64>>,
    lambda: Vec<f64>,
    tail: Vec<f64>,
}

impl RbfInterpolant {
    pub fn fit(points: &[Vec<f64>], values: &[f64]) -> Result<Self, StrategyError> {
        Self::fit_with_eta(points, values, DEFAULT_ETA)
    }

    pub fn fit_with_eta(
        points: &[Vec<f64>],
        values: &[f64],
        eta: f64,
    ) -> Result<Self, StrategyError> {
        let n = points.len();
        if n != values.len() {
            return Err(StrategyError::InvalidState {
                message: format!("{n} training points but {} values", values.len()),
            });
        }
        let dim = points.first().map_or(0, Vec::len);
        if dim == 0 || n < dim + 1 {
            return Err(StrategyError::InvalidState {
                message: format!(
                    "need at least {} points to fit a {dim}-d surrogate, have {n}",
                    dim + 1
                ),
            });
        }

        let size = n + dim + 1;
        let mut matrix = vec![vec![0.0; size]; size];
        let mut rhs = vec![0.0; size];

        for i in 0..n {
            for j in 0..n {
                matrix[i][j] = cubic(distance(&points[i], &points[j]));
            }
            matrix[i][i] += eta;
            matrix[i][n] = 1.0;
            matrix[n][i] = 1.0;
            for k in 0..dim {
                matrix[i][n + 1 + k] = points[i][k];
                matrix[n + 1 + k][i] = points[i][k];
            }
            rhs[i] = values[i];
        }

        let solution = solve(matrix, rhs).ok_or_else(|| StrategyError::InvalidState {
            message: "surrogate system is singular".to_string(),
        })?;

        Ok(Self {
            centers: points.to_vec(),
            lambda: solution[..n].to_vec(),
            tail: solution[n..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let kernel: f64 = self
            .centers
            .iter()
            .zip(&self.lambda)
            .map(|(c, l)| l * cubic(distance(x, c)))
            .sum();
        let linear: f64 = x.iter().zip(&self.tail[1..]).map(|(xi, ci)| xi * ci).sum();
        kernel + self.tail[0] + linear
    }
}

fn cubic(r: f64) -> f64 {
    r * r * r
}

pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| {
            a[x][col]
                .abs()
                .partial_cmp(&a[y][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-14 * scale {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
