//! Multi-objective optimizers and the Pareto front they maintain.
//!
//! Both optimizers search the normalized design space `[0, 1]^n` of an
//! [`OptimizationProblem`](crate::problem::OptimizationProblem) and offer
//! their non-dominated solutions to a [`ParetoFront`] that accumulates the
//! best trade-offs seen over the whole run.

pub mod moead;
pub mod nsga2;
pub mod pareto;
pub mod sorting;

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};
use crate::problem::OptimizationProblem;

pub use moead::{Decomposition, MoeadConfig, MoeadDe, MoeadHistory, MoeadResult, WeightGeneration};
pub use nsga2::{GenerationRecord, Nsga2, Nsga2Config, Nsga2Result};
pub use pareto::{dominates, ParetoFront, ParetoPoint};
pub use sorting::{crowding_distance, non_dominated_sort};

fn require_multi_objective(problem: &OptimizationProblem, algorithm: &'static str) -> Result<()> {
    if problem.n_objectives() < 2 {
        return Err(Error::NotMultiObjective {
            algorithm,
            found: problem.n_objectives(),
        });
    }
    Ok(())
}

/// A seeded starting point must match the problem and lie in the normalized box.
fn check_x0(problem: &OptimizationProblem, x0: Option<&[f64]>) -> Result<()> {
    let Some(x) = x0 else {
        return Ok(());
    };
    if x.len() != problem.n_variables() {
        return Err(Error::DimensionMismatch {
            expected: problem.n_variables(),
            found: x.len(),
        });
    }
    if let Some((i, v)) = x.iter().enumerate().find(|(_, v)| !(0.0..=1.0).contains(*v)) {
        return Err(Error::invalid_input(format!(
            "x0[{i}] = {v} lies outside the normalized range [0, 1]"
        )));
    }
    Ok(())
}

/// Evaluates every row of a normalized population.
///
/// Returns the objective matrix (one row per individual) and the total
/// constraint violation of each individual.
fn evaluate_population(
    problem: &OptimizationProblem,
    population: &Array2<f64>,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let mut objectives = Array2::zeros((population.nrows(), problem.n_objectives()));
    let mut violations = Array1::zeros(population.nrows());
    for (i, row) in population.outer_iter().enumerate() {
        let evaluation = problem.evaluate_normalized(&row.to_vec())?;
        objectives
            .row_mut(i)
            .assign(&Array1::from(evaluation.objectives().to_vec()));
        violations[i] = evaluation.total_violation();
    }
    Ok((objectives, violations))
}
