//! Experimental designs: the initial space-filling points of a run.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sot_types::StrategyError;

/// Attempts at drawing a design that supports a linear tail before giving up.
const MAX_DESIGN_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesignKind {
    LatinHypercube,
    SymmetricLatinHypercube,
}

impl Default for DesignKind {
    fn default() -> Self {
        Self::SymmetricLatinHypercube
    }
}

impl DesignKind {
    /// Generate `num_pts` points in the unit cube `[0, 1]^dim`.
    ///
    /// When the design is large enough, redraws until the points have full
    /// affine rank so the RBF linear tail is well posed.
    pub fn generate<R: Rng + ?Sized>(
        self,
        dim: usize,
        num_pts: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>, StrategyError> {
        if dim == 0 || num_pts == 0 {
            return Err(StrategyError::InvalidConfig {
                message: format!("design needs dim > 0 and points > 0 (got {dim}, {num_pts})"),
            });
        }

        let needs_rank = num_pts > dim;
        for _ in 0..MAX_DESIGN_ATTEMPTS {
            let points = match self {
                Self::LatinHypercube => latin_hypercube(dim, num_pts, rng),
                Self::SymmetricLatinHypercube => symmetric_latin_hypercube(dim, num_pts, rng),
            };
            if !needs_rank || affine_rank(&points) == dim + 1 {
                return Ok(points);
            }
        }

        Err(StrategyError::InvalidConfig {
            message: format!(
                "could not draw a full-rank {self:?} design \
                 with {num_pts} points in {dim} dimensions"
            ),
        })
    }
}

fn latin_hypercube<R: Rng + ?Sized>(dim: usize, num_pts: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut points = vec![vec![0.0; dim]; num_pts];
    let mut strata: Vec<usize> = (0..num_pts).collect();
    for j in 0..dim {
        strata.shuffle(rng);
        for (point, stratum) in points.iter_mut().zip(&strata) {
            let jitter: f64 = rng.gen();
            point[j] = (*stratum as f64 + jitter) / num_pts as f64;
        }
    }
    points
}

/// Symmetric Latin hypercube: every level appears once per column, and row
/// `i` mirrors row `n - 1 - i` through the centre of the cube.
fn symmetric_latin_hypercube<R: Rng + ?Sized>(
    dim: usize,
    num_pts: usize,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    let n = num_pts;
    let half = n / 2;
    let mut levels = vec![vec![0usize; dim]; n];

    for (i, row) in levels.iter_mut().enumerate() {
        row[0] = i + 1;
    }
    if n % 2 == 1 {
        levels[half] = vec![half + 1; dim];
    }

    for j in 1..dim {
        let mut chosen: Vec<usize> = (0..half)
            .map(|i| if rng.gen::<bool>() { n - i } else { i + 1 })
            .collect();
        chosen.shuffle(rng);
        for (i, level) in chosen.into_iter().enumerate() {
            levels[i][j] = level;
            levels[n - 1 - i][j] = n + 1 - level;
        }
    }

    levels
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|level| {
                    if n == 1 {
                        0.5
                    } else {
                        (level - 1) as f64 / (n - 1) as f64
                    }
                })
                .collect()
        })
        .collect()
}

/// Rank of the matrix whose rows are `[1, x_1, ..., x_d]`.
pub(crate) fn affine_rank(points: &[Vec<f64>]) -> usize {
    let mut rows: Vec<Vec<f64>> = points
        .iter()
        .map(|p| std::iter::once(1.0).chain(p.iter().copied()).collect())
        .collect();
    let cols = rows.first().map_or(0, Vec::len);

    let mut rank = 0;
    for col in 0..cols {
        let pivot = (rank..rows.len()).max_by(|&a, &b| {
            rows[a][col]
                .abs()
                .partial_cmp(&rows[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let Some(pivot) = pivot else { break };
        if rows[pivot][col].abs() < 1e-10 {
            continue;
        }
        rows.swap(rank, pivot);
        for r in (rank + 1)..rows.len() {
            let factor = rows[r][col] / rows[rank][col];
            for c in col..cols {
                rows[r][c] -= factor * rows[rank][c];
            }
        }
        rank += 1;
    }
    rank
}
