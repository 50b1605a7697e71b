//! Candidate-based adaptive sampling (stochastic RBF).
//!
//! Candidates are scored by a weighted merit that trades off the surrogate's
//! prediction against distance from every point already evaluated or in
//! flight; the weight cycles to alternate exploration and exploitation.

use rand::Rng;

use crate::rng::standard_normal;
use crate::surrogate::{distance, RbfInterpolant};

/// Gaussian perturbations of `center` with step `sigma`, clipped to the unit
/// cube. Without a center the candidates are uniform.
pub(crate) fn perturbation_candidates<R: Rng + ?Sized>(
    center: Option<&[f64]>,
    dim: usize,
    sigma: f64,
    count: usize,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    (0..count)
        .map(|_| match center {
            Some(c) => c
                .iter()
                .map(|x| (x + sigma * standard_normal(rng)).clamp(0.0, 1.0))
                .collect(),
            None => (0..dim).map(|_| rng.gen::<f64>()).collect(),
        })
        .collect()
}

/// Pick up to `count` candidates by minimum merit.
///
/// `known` are unit-cube points that must not be re-proposed (evaluated and
/// outstanding). A candidate closer than `min_distance` to any known or
/// already-picked point is never selected. `weight_cursor` advances once per
/// pick.
pub(crate) fn select(
    candidates: &[Vec<f64>],
    surrogate: Option<&RbfInterpolant>,
    known: &[Vec<f64>],
    count: usize,
    weights: &[f64],
    weight_cursor: &mut usize,
    min_distance: f64,
) -> Vec<Vec<f64>> {
    if candidates.is_empty() || count == 0 {
        return Vec::new();
    }

    let predictions: Option<Vec<f64>> =
        surrogate.map(|s| candidates.iter().map(|c| s.predict(c)).collect());
    let mut distances: Vec<f64> = candidates
        .iter()
        .map(|c| {
            known
                .iter()
                .map(|k| distance(c, k))
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    let mut taken = vec![false; candidates.len()];
    let mut picked = Vec::with_capacity(count);

    while picked.len() < count {
        let eligible: Vec<usize> = (0..candidates.len())
            .filter(|&i| !taken[i] && distances[i] > min_distance)
            .collect();
        if eligible.is_empty() {
            break;
        }

        let weight = if weights.is_empty() {
            1.0
        } else {
            weights[*weight_cursor % weights.len()]
        };
        *weight_cursor += 1;

        let scaled_distance = scale(&eligible, &distances, true);
        let scaled_value = predictions
            .as_ref()
            .map(|p| scale(&eligible, p, false));

        let mut best: Option<(usize, f64)> = None;
        for (slot, &i) in eligible.iter().enumerate() {
            let merit = match &scaled_value {
                Some(values) => weight * values[slot] + (1.0 - weight) * scaled_distance[slot],
                None => scaled_distance[slot],
            };
            if best.map_or(true, |(_, m)| merit < m) {
                best = Some((i, merit));
            }
        }
        let Some((choice, _)) = best else { break };

        taken[choice] = true;
        let chosen = candidates[choice].clone();
        for (i, c) in candidates.iter().enumerate() {
            distances[i] = distances[i].min(distance(c, &chosen));
        }
        picked.push(chosen);
    }

    picked
}

/// Min-max scale the eligible entries to `[0, 1]`. With `invert`, larger raw
/// values map to smaller scores. A flat range scores 1 everywhere.
fn scale(eligible: &[usize], raw: &[f64], invert: bool) -> Vec<f64> {
    let finite = |v: f64| if v.is_finite() { v } else { f64::MAX };
    let (lo, hi) = eligible.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
        let v = finite(raw[i]);
        (lo.min(v), hi.max(v))
    });
    let range = hi - lo;
    eligible
        .iter()
        .map(|&i| {
            if !range.is_finite() || range <= 1e-12 {
                return 1.0;
            }
            let v = finite(raw[i]);
            if invert {
                (hi - v) / range
            } else {
                (v - lo) / range
            }
        })
        .collect()
}
