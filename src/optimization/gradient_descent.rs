use log::info;
use std::time::Instant;

use super::{first_objective, norm, prepare, OptimizationHistory, OptimizationResult, OptimizerAlgorithm};
use crate::error::Result;
use crate::problem::OptimizationProblem;

/// Gradient descent with momentum and forward-difference gradients.
///
/// Iterates are projected back onto `[0, 1]^n` after every step.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientDescentOptimizer {
    /// Step size
    pub learning_rate: f64,
    /// Momentum coefficient (0.0 for no momentum)
    pub momentum: f64,
    /// Step used for finite difference gradients
    pub finite_diff_step: f64,
}

impl Default for GradientDescentOptimizer {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum: 0.0,
            finite_diff_step: 1e-6,
        }
    }
}

impl GradientDescentOptimizer {
    pub fn new(learning_rate: f64, momentum: f64, finite_diff_step: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            finite_diff_step,
        }
    }

    /// Forward-difference gradient of the first objective around `x`, whose
    /// objective value is `base`.
    pub fn estimate_gradient(
        &self,
        problem: &OptimizationProblem,
        x: &[f64],
        base: f64,
    ) -> Result<Vec<f64>> {
        let mut gradient = Vec::with_capacity(x.len());
        let mut stepped = x.to_vec();
        for i in 0..x.len() {
            stepped[i] = x[i] + self.finite_diff_step;
            let (value, _) = first_objective(problem, &stepped)?;
            gradient.push((value - base) / self.finite_diff_step);
            stepped[i] = x[i];
        }
        Ok(gradient)
    }
}

impl OptimizerAlgorithm for GradientDescentOptimizer {
    /// Minimizes the first objective using gradient descent.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `x0` - Normalized starting point, defaults to the problem's initial point
    /// * `max_iterations` - Maximum number of iterations
    /// * `tolerance` - Gradient norm below which the run has converged
    ///
    /// # Examples
    ///
    /// ```
    /// use mdo::optimization::{GradientDescentOptimizer, OptimizerAlgorithm};
    /// use mdo::problem::{DesignVariable, OptimizationProblem};
    ///
    /// let mut problem = OptimizationProblem::new("bowl");
    /// problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
    /// problem.add_objective("f", |x| (x["x"] - 0.3).powi(2), true);
    ///
    /// let result = GradientDescentOptimizer::default()
    ///     .minimize(&problem, None, 1000, 1e-4)
    ///     .unwrap();
    /// assert!(result.success);
    /// assert!((result.x[0] - 0.3).abs() < 1e-3);
    /// ```
    fn minimize(
        &self,
        problem: &OptimizationProblem,
        x0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<OptimizationResult> {
        let mut x = prepare(problem, x0, "Gradient descent")?;
        let n = x.len();
        let mut velocity = vec![0.0; n];
        let mut history = OptimizationHistory::default();
        let mut grad_norm = f64::INFINITY;
        let mut n_function_evals = 0;
        let start = Instant::now();

        for iteration in 0..max_iterations {
            let (obj_value, evaluation) = first_objective(problem, &x)?;
            let gradient = self.estimate_gradient(problem, &x, obj_value)?;
            n_function_evals += n + 1;
            grad_norm = norm(&gradient);

            history.iterations.push(iteration);
            history.x.push(x.clone());
            history.objective.push(obj_value);
            history.grad_norm.push(grad_norm);
            history
                .constraint_violation
                .push(evaluation.total_violation());

            if grad_norm < tolerance {
                info!("Converged after {iteration} iterations (gradient norm = {grad_norm:.6e})");
                break;
            }

            for (v, g) in velocity.iter_mut().zip(&gradient) {
                *v = self.momentum * *v - self.learning_rate * g;
            }
            let x_new: Vec<f64> = x
                .iter()
                .zip(&velocity)
                .map(|(xi, vi)| (xi + vi).clamp(0.0, 1.0))
                .collect();
            let step = x_new
                .iter()
                .zip(&x)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            history.step.push(step);
            x = x_new;

            if iteration % 10 == 0 {
                info!(
                    "Iteration {}: obj = {:.6e}, grad_norm = {:.6e}, step = {:.6e}, constraint_violation = {:.6e}",
                    iteration,
                    obj_value,
                    grad_norm,
                    step,
                    evaluation.total_violation()
                );
            }
        }

        let elapsed = start.elapsed();
        let (obj_value, final_evaluation) = first_objective(problem, &x)?;
        n_function_evals += 1;
        let success = grad_norm < tolerance;

        Ok(OptimizationResult {
            x_point: problem.denormalize(&x)?,
            x,
            obj_value,
            n_iterations: history.iterations.len(),
            n_function_evals,
            success,
            elapsed: Some(elapsed),
            message: if success {
                "gradient norm below tolerance".to_string()
            } else {
                "maximum number of iterations reached".to_string()
            },
            history,
            final_evaluation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::problem::DesignVariable;
    use approx::assert_abs_diff_eq;

    // f(x, y) = (x - 1)^2 + (y + 1)^2 on [-2, 2]^2
    fn bowl() -> OptimizationProblem {
        let mut problem = OptimizationProblem::new("bowl");
        problem.add_design_variable(DesignVariable::new("x", -2.0, 2.0).unwrap());
        problem.add_design_variable(DesignVariable::new("y", -2.0, 2.0).unwrap());
        problem.add_objective("f", |p| (p["x"] - 1.0).powi(2) + (p["y"] + 1.0).powi(2), true);
        problem
    }

    #[test]
    fn test_gradient_estimate() {
        let problem = bowl();
        let gd = GradientDescentOptimizer::default();
        let x = [0.5, 0.5];
        let (base, _) = first_objective(&problem, &x).unwrap();
        let gradient = gd.estimate_gradient(&problem, &x, base).unwrap();
        // d/du (4u - 3)^2 = 8 (4u - 3) at u = 0.5 → -8; d/du (4u - 1)^2 → 8
        assert_abs_diff_eq!(gradient[0], -8.0, epsilon = 1e-3);
        assert_abs_diff_eq!(gradient[1], 8.0, epsilon = 1e-3);
    }

    #[test]
    fn test_gradient_descent_quadratic() {
        let problem = bowl();
        let gd = GradientDescentOptimizer::new(0.05, 0.0, 1e-7);
        let result = gd.minimize(&problem, None, 1000, 1e-4).unwrap();

        assert!(result.success);
        assert!(result.obj_value < 1e-6);
        assert_abs_diff_eq!(result.x_point["x"], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.x_point["y"], -1.0, epsilon = 1e-3);
        assert_eq!(result.history.iterations.len(), result.n_iterations);
        assert_eq!(result.final_evaluation.objective("f"), Some(result.obj_value));
    }

    #[test]
    fn test_momentum_still_converges() {
        let problem = bowl();
        let gd = GradientDescentOptimizer::new(0.02, 0.5, 1e-7);
        let result = gd.minimize(&problem, Some(&[0.0, 1.0]), 2000, 1e-4).unwrap();
        assert!(result.success);
        assert!(result.obj_value < 1e-6);
    }

    #[test]
    fn test_iterates_stay_in_unit_box() {
        let mut problem = OptimizationProblem::new("slope");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
        problem.add_objective("f", |p| -p["x"], true);
        let result = GradientDescentOptimizer::new(0.4, 0.0, 1e-6)
            .minimize(&problem, Some(&[0.1]), 20, 1e-9)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.x, vec![1.0]);
        assert!(result
            .history
            .x
            .iter()
            .flatten()
            .all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rejects_objective_free_problem() {
        let mut problem = OptimizationProblem::new("none");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
        let result = GradientDescentOptimizer::default().minimize(&problem, None, 10, 1e-6);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
