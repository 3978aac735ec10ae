//! Single-objective optimizers and the [`Optimizer`] façade.
//!
//! Every algorithm minimizes the first objective of an
//! [`OptimizationProblem`] over the normalized box `[0, 1]^n`.

pub mod bfgs;
pub mod genetic;
pub mod gradient_descent;

use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::problem::{DesignPoint, Evaluation, OptimizationProblem};

pub use bfgs::BfgsOptimizer;
pub use genetic::GeneticAlgorithm;
pub use gradient_descent::GradientDescentOptimizer;

/// A trait for algorithms minimizing a problem's first objective.
pub trait OptimizerAlgorithm {
    /// Minimizes `problem` starting from the normalized point `x0`.
    ///
    /// `x0` defaults to the problem's initial point.
    fn minimize(
        &self,
        problem: &OptimizationProblem,
        x0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<OptimizationResult>;
}

/// Per-iteration trace of a single-objective run.
///
/// Algorithms fill the series that make sense for them and leave the rest empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationHistory {
    pub iterations: Vec<usize>,
    /// Normalized iterate, or the generation's best individual
    pub x: Vec<Vec<f64>>,
    /// Objective at the iterate, or the generation's minimum
    pub objective: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mean_objective: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub best_fitness: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grad_norm: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub step: Vec<f64>,
    /// Total violation at the iterate, or the generation's mean
    pub constraint_violation: Vec<f64>,
}

/// Outcome of a single-objective run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best normalized point
    pub x: Vec<f64>,
    /// `x` in physical units
    pub x_point: DesignPoint,
    pub obj_value: f64,
    pub n_iterations: usize,
    pub n_function_evals: usize,
    pub success: bool,
    pub elapsed: Option<Duration>,
    pub message: String,
    pub history: OptimizationHistory,
    /// Full evaluation at `x`
    pub final_evaluation: Evaluation,
}

/// Resolves the starting point and warns when objectives beyond the first are ignored.
fn prepare(problem: &OptimizationProblem, x0: Option<&[f64]>, algorithm: &str) -> Result<Vec<f64>> {
    match problem.n_objectives() {
        0 => return Err(Error::invalid_input("problem has no objective to minimize")),
        1 => {}
        _ => warn!("{algorithm} with multiple objectives not supported. Using first objective."),
    }
    let x = match x0 {
        Some(x) => x.to_vec(),
        None => problem.get_initial_point(),
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
    Ok(x)
}

/// Value of the first objective together with the full evaluation.
fn first_objective(problem: &OptimizationProblem, x: &[f64]) -> Result<(f64, Evaluation)> {
    let evaluation = problem.evaluate_normalized(x)?;
    let value = evaluation.objectives()[0];
    Ok((value, evaluation))
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Which algorithm an [`Optimizer`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    Gradient,
    #[default]
    Genetic,
    Bfgs,
}

impl FromStr for AlgorithmKind {
    type Err = Infallible;

    /// Unknown names fall back to the genetic algorithm.
    fn from_str(s: &str) -> std::result::Result<Self, Infallible> {
        Ok(match s.to_lowercase().as_str() {
            "gradient" => AlgorithmKind::Gradient,
            "genetic" => AlgorithmKind::Genetic,
            "bfgs" => AlgorithmKind::Bfgs,
            other => {
                warn!("Unknown algorithm '{other}', using genetic algorithm");
                AlgorithmKind::Genetic
            }
        })
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlgorithmKind::Gradient => "gradient",
            AlgorithmKind::Genetic => "genetic",
            AlgorithmKind::Bfgs => "bfgs",
        })
    }
}

/// Tunables for every algorithm the façade can run; each reads its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub learning_rate: f64,
    pub momentum: f64,
    pub finite_diff_step: f64,
    pub population_size: usize,
    pub elite_ratio: f64,
    pub crossover_prob: f64,
    pub mutation_prob: f64,
    pub mutation_scale: f64,
    pub constraint_penalty: f64,
    pub bfgs_finite_diff_step: f64,
    pub seed: Option<u64>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum: 0.0,
            finite_diff_step: 1e-6,
            population_size: 50,
            elite_ratio: 0.1,
            crossover_prob: 0.8,
            mutation_prob: 0.2,
            mutation_scale: 0.1,
            constraint_penalty: 1000.0,
            bfgs_finite_diff_step: 1e-8,
            seed: None,
        }
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    problem_name: &'a str,
    algorithm: AlgorithmKind,
    options: &'a OptimizerOptions,
    obj_value: f64,
    n_iterations: usize,
    n_function_evals: usize,
    time: Option<f64>,
    success: bool,
    message: &'a str,
    timestamp: String,
}

/// Runs one of the single-objective algorithms and optionally persists the result.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    algorithm: AlgorithmKind,
    options: OptimizerOptions,
    output_dir: Option<PathBuf>,
}

impl Optimizer {
    pub fn new(algorithm: AlgorithmKind, options: OptimizerOptions) -> Self {
        Self {
            algorithm,
            options,
            output_dir: None,
        }
    }

    /// Writes `optimal_design.json`, `summary.json` and `history.json` into
    /// `dir` after every run.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn algorithm_kind(&self) -> AlgorithmKind {
        self.algorithm
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Builds the configured algorithm.
    pub fn algorithm(&self) -> Box<dyn OptimizerAlgorithm> {
        let o = &self.options;
        match self.algorithm {
            AlgorithmKind::Gradient => Box::new(GradientDescentOptimizer::new(
                o.learning_rate,
                o.momentum,
                o.finite_diff_step,
            )),
            AlgorithmKind::Genetic => Box::new(GeneticAlgorithm {
                population_size: o.population_size,
                elite_ratio: o.elite_ratio,
                crossover_prob: o.crossover_prob,
                mutation_prob: o.mutation_prob,
                mutation_scale: o.mutation_scale,
                constraint_penalty: o.constraint_penalty,
                seed: o.seed,
            }),
            AlgorithmKind::Bfgs => Box::new(BfgsOptimizer::new(o.bfgs_finite_diff_step)),
        }
    }

    pub fn optimize(
        &self,
        problem: &OptimizationProblem,
        x0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<OptimizationResult> {
        info!("Starting optimization with {} algorithm", self.algorithm);
        info!("Problem: {}", problem.name());
        info!("  {} design variables", problem.n_variables());
        info!("  {} objectives", problem.n_objectives());
        info!("  {} constraints", problem.n_constraints());

        let result = self
            .algorithm()
            .minimize(problem, x0, max_iterations, tolerance)?;

        info!("Optimization complete:");
        info!("  Objective value: {:.6e}", result.obj_value);
        info!("  Iterations: {}", result.n_iterations);
        info!("  Function evaluations: {}", result.n_function_evals);
        match result.elapsed {
            Some(t) => info!("  Time: {:.2} seconds", t.as_secs_f64()),
            None => info!("  Time: unknown"),
        }
        info!("  Design variable values:");
        for (name, value) in result.x_point.iter() {
            info!("    {name}: {value}");
        }

        if let Some(dir) = &self.output_dir {
            self.save_results(dir, problem, &result)?;
        }
        Ok(result)
    }

    fn save_results(
        &self,
        dir: &Path,
        problem: &OptimizationProblem,
        result: &OptimizationResult,
    ) -> Result<()> {
        fs::create_dir_all(dir)?;
        write_json(&dir.join("optimal_design.json"), &result.x_point)?;
        let summary = Summary {
            problem_name: problem.name(),
            algorithm: self.algorithm,
            options: &self.options,
            obj_value: result.obj_value,
            n_iterations: result.n_iterations,
            n_function_evals: result.n_function_evals,
            time: result.elapsed.map(|t| t.as_secs_f64()),
            success: result.success,
            message: &result.message,
            timestamp: Local::now().to_rfc3339(),
        };
        write_json(&dir.join("summary.json"), &summary)?;
        write_json(&dir.join("history.json"), &result.history)?;
        info!("Results saved to {}", dir.display());
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Constraint, DesignVariable};

    fn shifted_quadratic() -> OptimizationProblem {
        let mut problem = OptimizationProblem::new("Simple Quadratic Problem");
        problem.add_design_variable(DesignVariable::new("x1", -5.0, 5.0).unwrap());
        problem.add_design_variable(DesignVariable::new("x2", -5.0, 5.0).unwrap());
        problem.add_objective(
            "f",
            |x| (x["x1"] - 1.0).powi(2) + (x["x2"] + 2.0).powi(2),
            true,
        );
        problem
    }

    #[test]
    fn test_algorithm_kind_parsing() {
        assert_eq!("BFGS".parse::<AlgorithmKind>(), Ok(AlgorithmKind::Bfgs));
        assert_eq!("gradient".parse::<AlgorithmKind>(), Ok(AlgorithmKind::Gradient));
        assert_eq!("simplex".parse::<AlgorithmKind>(), Ok(AlgorithmKind::Genetic));
        assert_eq!(AlgorithmKind::Bfgs.to_string(), "bfgs");
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: OptimizerOptions =
            serde_json::from_str(r#"{"learning_rate": 0.05, "seed": 3}"#).unwrap();
        assert_eq!(options.learning_rate, 0.05);
        assert_eq!(options.seed, Some(3));
        assert_eq!(options.population_size, 50);
    }

    #[test]
    fn test_prepare_rejects_bad_inputs() {
        let empty = OptimizationProblem::new("empty");
        assert!(matches!(prepare(&empty, None, "test"), Err(Error::InvalidInput(_))));

        let problem = shifted_quadratic();
        assert!(matches!(
            prepare(&problem, Some(&[0.5]), "test"),
            Err(Error::DimensionMismatch { expected: 2, found: 1 })
        ));
        assert_eq!(prepare(&problem, None, "test").unwrap(), vec![0.5, 0.5]);
        assert!(matches!(
            prepare(&problem, Some(&[0.5, 1.2]), "test"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_facade_runs_every_algorithm() {
        let problem = shifted_quadratic();
        for kind in [AlgorithmKind::Gradient, AlgorithmKind::Genetic, AlgorithmKind::Bfgs] {
            let options = OptimizerOptions {
                learning_rate: 0.004,
                population_size: 30,
                seed: Some(8),
                ..Default::default()
            };
            let optimizer = Optimizer::new(kind, options);
            let result = optimizer.optimize(&problem, None, 200, 1e-6).unwrap();
            assert!(result.obj_value < 0.5, "{kind}: {}", result.obj_value);
            assert!(result.x.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_results_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut problem = shifted_quadratic();
        problem.add_constraint(
            Constraint::inequality("sum", |x| x["x1"] + x["x2"], None, Some(10.0)).unwrap(),
        );
        let optimizer = Optimizer::new(AlgorithmKind::Bfgs, OptimizerOptions::default())
            .with_output_dir(dir.path().join("run"));
        let result = optimizer.optimize(&problem, None, 100, 1e-8).unwrap();

        let run = dir.path().join("run");
        let design: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run.join("optimal_design.json")).unwrap())
                .unwrap();
        assert!((design["x1"].as_f64().unwrap() - result.x_point["x1"]).abs() < 1e-12);

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["algorithm"], "bfgs");
        assert_eq!(summary["problem_name"], "Simple Quadratic Problem");
        assert_eq!(summary["n_iterations"], result.n_iterations);

        let history: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run.join("history.json")).unwrap()).unwrap();
        assert!(history["objective"].is_array());
    }
}
