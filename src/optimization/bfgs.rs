use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use std::time::Instant;

use super::{first_objective, prepare, OptimizationHistory, OptimizationResult, OptimizerAlgorithm};
use crate::error::Result;
use crate::problem::OptimizationProblem;

const ARMIJO_C1: f64 = 1e-4;
const MAX_LINE_SEARCH: usize = 30;
const CURVATURE_EPSILON: f64 = 1e-10;

/// Quasi-Newton minimizer projected onto the unit box.
///
/// Keeps an approximation of the inverse Hessian, updated with the BFGS
/// formula whenever the curvature condition `yᵀs > 0` holds, and backtracks
/// along the projected search path until the Armijo condition is met.
/// Gradients come from one-sided finite differences.
#[derive(Debug, Clone, PartialEq)]
pub struct BfgsOptimizer {
    /// Step used for finite difference gradients
    pub finite_diff_step: f64,
}

impl Default for BfgsOptimizer {
    fn default() -> Self {
        Self {
            finite_diff_step: 1e-8,
        }
    }
}

fn project(x: &DVector<f64>) -> DVector<f64> {
    x.map(|v| v.clamp(0.0, 1.0))
}

/// Norm of `x - P(x - g)`, zero at a box-constrained stationary point.
fn projected_gradient_norm(x: &DVector<f64>, g: &DVector<f64>) -> f64 {
    (x - project(&(x - g))).norm()
}

impl BfgsOptimizer {
    pub fn new(finite_diff_step: f64) -> Self {
        Self { finite_diff_step }
    }

    /// Finite-difference gradient that never steps outside `[0, 1]`.
    fn gradient(
        &self,
        problem: &OptimizationProblem,
        x: &DVector<f64>,
        base: f64,
    ) -> Result<DVector<f64>> {
        let h = self.finite_diff_step;
        let mut stepped = x.as_slice().to_vec();
        let mut gradient = DVector::zeros(x.len());
        for i in 0..x.len() {
            let delta = if x[i] + h <= 1.0 { h } else { -h };
            stepped[i] = x[i] + delta;
            let (value, _) = first_objective(problem, &stepped)?;
            gradient[i] = (value - base) / delta;
            stepped[i] = x[i];
        }
        Ok(gradient)
    }
}

impl OptimizerAlgorithm for BfgsOptimizer {
    /// Minimizes the first objective over `[0, 1]^n`.
    ///
    /// Converges when the projected gradient norm or the relative decrease
    /// of the objective falls below `tolerance`. Constraints are evaluated
    /// and reported but not enforced.
    fn minimize(
        &self,
        problem: &OptimizationProblem,
        x0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<OptimizationResult> {
        let start_point = prepare(problem, x0, "BFGS")?;
        let n = start_point.len();
        let mut x = project(&DVector::from_vec(start_point));
        let start = Instant::now();

        let (mut f, mut evaluation) = first_objective(problem, x.as_slice())?;
        let mut g = self.gradient(problem, &x, f)?;
        let mut n_function_evals = n + 1;
        let mut h_inv = DMatrix::<f64>::identity(n, n);
        let mut history = OptimizationHistory::default();
        let mut success = false;
        let mut message = "maximum number of iterations reached";

        for iteration in 0..max_iterations {
            let pg_norm = projected_gradient_norm(&x, &g);
            history.iterations.push(iteration);
            history.x.push(x.as_slice().to_vec());
            history.objective.push(f);
            history.grad_norm.push(pg_norm);
            history.constraint_violation.push(evaluation.total_violation());

            if pg_norm < tolerance {
                success = true;
                message = "projected gradient norm below tolerance";
                break;
            }

            let mut direction = -(&h_inv * &g);
            if direction.dot(&g) >= 0.0 {
                debug!("BFGS direction is not a descent direction, resetting inverse Hessian");
                h_inv.fill_with_identity();
                direction = -g.clone();
            }

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_LINE_SEARCH {
                let candidate = project(&(&x + alpha * &direction));
                let s = &candidate - &x;
                let (value, eval) = first_objective(problem, candidate.as_slice())?;
                n_function_evals += 1;
                if value <= f + ARMIJO_C1 * g.dot(&s) {
                    accepted = Some((candidate, s, value, eval));
                    break;
                }
                alpha *= 0.5;
            }
            let Some((x_new, s, f_new, eval_new)) = accepted else {
                message = "line search failed to decrease the objective";
                break;
            };

            let g_new = self.gradient(problem, &x_new, f_new)?;
            n_function_evals += n;
            let y = &g_new - &g;
            let ys = y.dot(&s);
            if ys > CURVATURE_EPSILON {
                let rho = 1.0 / ys;
                let identity = DMatrix::<f64>::identity(n, n);
                let left = &identity - rho * &s * y.transpose();
                let right = &identity - rho * &y * s.transpose();
                h_inv = &left * &h_inv * &right + rho * &s * s.transpose();
            }

            let step = s.norm();
            history.step.push(step);
            if iteration % 10 == 0 {
                info!(
                    "Iteration {}: obj = {:.6e}, grad_norm = {:.6e}, step = {:.6e}",
                    iteration, f_new, pg_norm, step
                );
            }

            let relative_change = (f - f_new) / f.abs().max(f_new.abs()).max(1.0);
            x = x_new;
            f = f_new;
            g = g_new;
            evaluation = eval_new;

            if relative_change <= tolerance {
                success = true;
                message = "relative objective change below tolerance";
                break;
            }
        }

        info!("BFGS finished: {message}");
        Ok(OptimizationResult {
            x_point: problem.denormalize(x.as_slice())?,
            x: x.as_slice().to_vec(),
            obj_value: f,
            n_iterations: history.iterations.len(),
            n_function_evals,
            success,
            elapsed: Some(start.elapsed()),
            message: message.to_string(),
            history,
            final_evaluation: evaluation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::problem::DesignVariable;
    use approx::assert_abs_diff_eq;

    fn problem_with<F>(bounds: &[(&str, f64, f64)], f: F) -> OptimizationProblem
    where
        F: Fn(&crate::problem::DesignPoint) -> f64 + 'static,
    {
        let mut problem = OptimizationProblem::new("bfgs test");
        for &(name, lower, upper) in bounds {
            problem.add_design_variable(DesignVariable::new(name, lower, upper).unwrap());
        }
        problem.add_objective("f", f, true);
        problem
    }

    #[test]
    fn test_bfgs_quadratic() {
        let problem = problem_with(&[("x", -2.0, 2.0), ("y", -2.0, 2.0)], |p| {
            (p["x"] - 1.0).powi(2) + 3.0 * (p["y"] + 1.0).powi(2)
        });
        let result = BfgsOptimizer::default()
            .minimize(&problem, None, 100, 1e-6)
            .unwrap();

        assert!(result.success, "{}", result.message);
        assert!(result.obj_value < 1e-5);
        assert_abs_diff_eq!(result.x_point["x"], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(result.x_point["y"], -1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_bfgs_active_bound() {
        // Unconstrained minimum at x = 3 lies outside [0, 2].
        let problem = problem_with(&[("x", 0.0, 2.0)], |p| (p["x"] - 3.0).powi(2));
        let result = BfgsOptimizer::default()
            .minimize(&problem, None, 50, 1e-6)
            .unwrap();

        assert!(result.success);
        assert_eq!(result.x, vec![1.0]);
        assert_abs_diff_eq!(result.obj_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let problem = problem_with(&[("x", -2.0, 2.0), ("y", -2.0, 2.0)], |p| {
            (1.0 - p["x"]).powi(2) + 100.0 * (p["y"] - p["x"].powi(2)).powi(2)
        });
        let result = BfgsOptimizer::default()
            .minimize(&problem, Some(&[0.3, 0.6]), 500, 1e-10)
            .unwrap();
        assert!(result.obj_value < 1e-2, "obj = {}", result.obj_value);
        assert!(result.n_function_evals > result.n_iterations);
    }

    #[test]
    fn test_projected_gradient_norm() {
        let x = DVector::from_vec(vec![1.0, 0.5]);
        let g = DVector::from_vec(vec![-4.0, 0.0]);
        assert_eq!(projected_gradient_norm(&x, &g), 0.0);
        let g = DVector::from_vec(vec![0.25, 0.0]);
        assert_abs_diff_eq!(projected_gradient_norm(&x, &g), 0.25);
    }

    #[test]
    fn test_bfgs_dimension_mismatch() {
        let problem = problem_with(&[("x", 0.0, 1.0)], |p| p["x"]);
        assert!(matches!(
            BfgsOptimizer::default().minimize(&problem, Some(&[0.1, 0.2]), 10, 1e-6),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
