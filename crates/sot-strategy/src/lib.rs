//! # sot-strategy
//!
//! Search strategies for SOT: the [`SearchStrategy`] contract consumed by the
//! control loop, experimental designs (Latin hypercube, symmetric Latin
//! hypercube), a cubic RBF surrogate with linear tail, candidate-based
//! adaptive sampling, and a seeded random-search baseline.

mod design;
mod random;
mod rng;
mod sampling;
mod strategy;
mod surrogate;
mod surrogate_strategy;

pub use design::DesignKind;
pub use random::RandomSearch;
pub use rng::RngState;
pub use strategy::SearchStrategy;
pub use surrogate::RbfInterpolant;
pub use surrogate_strategy::{SurrogateStrategy, SurrogateStrategyConfig};
