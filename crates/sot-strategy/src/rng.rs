//! Seeded random stream whose position can be persisted.

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sot_types::StrategyError;

/// Position of a `ChaCha8Rng` stream: the seed it was created from and how
/// many 32-bit words it has produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: u64,
    pub word_pos: u64,
}

impl RngState {
    pub fn capture(seed: u64, rng: &ChaCha8Rng) -> Result<Self, StrategyError> {
        let word_pos = u64::try_from(rng.get_word_pos()).map_err(|_| StrategyError::InvalidState {
            message: "random stream position exceeds u64".to_string(),
        })?;
        Ok(Self { seed, word_pos })
    }

    pub fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_word_pos(u128::from(self.word_pos));
        rng
    }
}

pub(crate) fn seeded(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Standard normal draw (Box–Muller).
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
