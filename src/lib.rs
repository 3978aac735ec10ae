//! Multi-objective design optimization: problem definitions, NSGA-II and
//! MOEA/D-DE, Pareto fronts, single-objective optimizers, surrogate models
//! and design of experiments.

pub mod doe;
pub mod error;
pub mod multi_objective;
pub mod optimization;
pub mod problem;
pub mod surrogate;

pub use error::{Error, Result};
pub use multi_objective::{MoeadDe, Nsga2, ParetoFront};
pub use optimization::Optimizer;
pub use problem::{Constraint, DesignPoint, DesignVariable, OptimizationProblem};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Seeded generator for reproducible runs, or one seeded from the OS.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> ChaCha20Rng {
    match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    }
}
