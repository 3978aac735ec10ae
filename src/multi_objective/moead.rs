use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::pareto::{ParetoFront, ParetoPoint};
use super::{check_x0, evaluate_population, require_multi_objective};
use crate::error::{Error, Result};
use crate::problem::OptimizationProblem;

/// Offset added inside the Tchebycheff distance so zero weights still rank points.
const TCHEBYCHEFF_EPSILON: f64 = 1e-6;

/// Scalarization turning an objective vector into one subproblem fitness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decomposition {
    /// `Σ wᵢ fᵢ`
    WeightedSum,
    /// `maxᵢ wᵢ |fᵢ - zᵢ + ε|`
    Tchebycheff,
    /// Penalty-based boundary intersection, `d1 + θ d2`
    Pbi,
}

impl Decomposition {
    /// Fitness of objective vector `f` under weight `w` and ideal point `z`.
    ///
    /// `theta` is only used by [`Decomposition::Pbi`].
    pub fn aggregate(self, f: &[f64], w: &[f64], z: &[f64], theta: f64) -> f64 {
        match self {
            Decomposition::WeightedSum => f.iter().zip(w).map(|(fi, wi)| wi * fi).sum(),
            Decomposition::Tchebycheff => f
                .iter()
                .zip(w)
                .zip(z)
                .map(|((fi, wi), zi)| wi * (fi - zi + TCHEBYCHEFF_EPSILON).abs())
                .fold(f64::NEG_INFINITY, f64::max),
            Decomposition::Pbi => {
                let norm = w.iter().map(|wi| wi * wi).sum::<f64>().sqrt();
                let direction: Vec<f64> = if norm > 0.0 {
                    w.iter().map(|wi| wi / norm).collect()
                } else {
                    w.to_vec()
                };
                let diff: Vec<f64> = f.iter().zip(z).map(|(fi, zi)| fi - zi).collect();
                let d1: f64 = diff.iter().zip(&direction).map(|(d, u)| d * u).sum();
                let d2 = diff
                    .iter()
                    .zip(&direction)
                    .map(|(d, u)| (d - d1 * u).powi(2))
                    .sum::<f64>()
                    .sqrt();
                d1 + theta * d2
            }
        }
    }
}

impl FromStr for Decomposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "weighted_sum" => Ok(Decomposition::WeightedSum),
            "tchebycheff" => Ok(Decomposition::Tchebycheff),
            "pbi" => Ok(Decomposition::Pbi),
            _ => Err(Error::invalid_config(format!(
                "unknown decomposition method: {s}"
            ))),
        }
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decomposition::WeightedSum => "weighted_sum",
            Decomposition::Tchebycheff => "tchebycheff",
            Decomposition::Pbi => "pbi",
        })
    }
}

/// How the subproblem weight vectors are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightGeneration {
    /// Random rows normalized to sum to one
    Uniform,
    /// Evenly spaced for two objectives, a simplex lattice for three
    Systematic,
}

impl FromStr for WeightGeneration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uniform" => Ok(WeightGeneration::Uniform),
            "systematic" => Ok(WeightGeneration::Systematic),
            _ => Err(Error::invalid_config(format!(
                "unknown weight generation method: {s}"
            ))),
        }
    }
}

/// Configuration of [`MoeadDe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoeadConfig {
    /// Neighbours per subproblem, the subproblem itself included
    pub n_neighbors: usize,
    /// Differential evolution scale factor F
    pub de_f: f64,
    /// Binomial crossover rate CR
    pub de_cr: f64,
    pub decomposition: Decomposition,
    pub weight_generation: WeightGeneration,
    /// Probability of mating within the neighbourhood instead of the whole population
    pub neighborhood_prob: f64,
    /// Penalty θ of the PBI decomposition
    pub pbi_theta: f64,
    pub seed: Option<u64>,
}

impl Default for MoeadConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 20,
            de_f: 0.5,
            de_cr: 0.8,
            decomposition: Decomposition::Tchebycheff,
            weight_generation: WeightGeneration::Uniform,
            neighborhood_prob: 0.9,
            pbi_theta: 5.0,
            seed: None,
        }
    }
}

impl MoeadConfig {
    fn validate(&self) -> Result<()> {
        if self.n_neighbors == 0 {
            return Err(Error::invalid_config("n_neighbors must be positive"));
        }
        for (name, p) in [
            ("de_cr", self.de_cr),
            ("neighborhood_prob", self.neighborhood_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::invalid_config(format!("{name} must lie in [0, 1], got {p}")));
            }
        }
        Ok(())
    }
}

/// Trajectory of a MOEA/D run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoeadHistory {
    pub iterations: Vec<usize>,
    /// Ideal point after every change, oldest first
    pub ideal_points: Vec<Vec<f64>>,
    /// Running Pareto front after every iteration
    pub pareto_snapshots: Vec<Vec<ParetoPoint>>,
}

/// Outcome of [`MoeadDe::optimize`].
#[derive(Debug, Clone)]
pub struct MoeadResult {
    pub pareto_front: ParetoFront,
    pub history: MoeadHistory,
    /// Normalized decision vector of every subproblem
    pub population: Array2<f64>,
    pub objectives: Array2<f64>,
    pub weights: Array2<f64>,
    pub ideal_point: Vec<f64>,
    pub n_function_evals: usize,
    pub elapsed: Duration,
}

/// MOEA/D with a differential evolution variation operator.
///
/// The problem is split into one scalar subproblem per weight vector. Each
/// trial solution competes for every subproblem in its mating neighbourhood,
/// so improvements spread between neighbouring directions.
#[derive(Debug, Clone, Default)]
pub struct MoeadDe {
    config: MoeadConfig,
}

impl MoeadDe {
    pub fn new(config: MoeadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MoeadConfig {
        &self.config
    }

    /// Builds the weight vectors, one row per subproblem, each summing to one.
    ///
    /// Systematic three-objective lattices hold at least `n_weights` points
    /// and are subsampled to `n_weights`.
    pub fn generate_weights(
        &self,
        n_objectives: usize,
        n_weights: usize,
        rng: &mut ChaCha20Rng,
    ) -> Array2<f64> {
        match (self.config.weight_generation, n_objectives) {
            (WeightGeneration::Uniform, _) => uniform_weights(n_objectives, n_weights, rng),
            (WeightGeneration::Systematic, 2) => Array2::from_shape_fn((n_weights, 2), |(i, k)| {
                let w0 = if n_weights > 1 {
                    i as f64 / (n_weights - 1) as f64
                } else {
                    0.5
                };
                if k == 0 {
                    w0
                } else {
                    1.0 - w0
                }
            }),
            (WeightGeneration::Systematic, 3) => {
                let h = ((n_weights * 2 * 2) as f64).sqrt().floor().max(1.0) as usize;
                let mut lattice = Vec::new();
                for i in 0..=h {
                    for j in 0..=(h - i) {
                        let k = h - i - j;
                        lattice.push([i as f64 / h as f64, j as f64 / h as f64, k as f64 / h as f64]);
                    }
                }
                let rows: Vec<[f64; 3]> = if lattice.len() > n_weights {
                    sample(rng, lattice.len(), n_weights)
                        .iter()
                        .map(|idx| lattice[idx])
                        .collect()
                } else {
                    lattice
                };
                Array2::from_shape_fn((rows.len(), 3), |(r, c)| rows[r][c])
            }
            (WeightGeneration::Systematic, m) => {
                warn!(
                    "Systematic weight generation not implemented for {m} objectives. Using uniform sampling."
                );
                uniform_weights(m, n_weights, rng)
            }
        }
    }

    /// Indices of the closest weight vectors (Euclidean) for every subproblem,
    /// nearest first.
    pub fn compute_neighborhoods(&self, weights: ArrayView2<f64>) -> Vec<Vec<usize>> {
        let n = weights.nrows();
        let k = self.config.n_neighbors.min(n);
        (0..n)
            .map(|i| {
                let distances: Vec<f64> = (0..n)
                    .map(|j| euclidean(weights.row(i), weights.row(j)))
                    .collect();
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by(|&a, &b| {
                    distances[a]
                        .partial_cmp(&distances[b])
                        .unwrap_or(Ordering::Equal)
                });
                order.truncate(k);
                order
            })
            .collect()
    }

    /// Runs MOEA/D-DE on `problem`.
    ///
    /// `population_size` defaults to `max(100, 10 * n_variables)`; the size
    /// actually used is the number of weight vectors generated for it. The
    /// callback receives the iteration, the running Pareto front and the
    /// history so far.
    pub fn optimize(
        &self,
        problem: &OptimizationProblem,
        n_iterations: usize,
        population_size: Option<usize>,
        x0: Option<&[f64]>,
        mut callback: Option<&mut dyn FnMut(usize, &ParetoFront, &MoeadHistory)>,
    ) -> Result<MoeadResult> {
        require_multi_objective(problem, "MOEA/D")?;
        self.config.validate()?;
        check_x0(problem, x0)?;

        let n_vars = problem.n_variables();
        let requested = population_size.unwrap_or_else(|| 100.max(10 * n_vars));
        if requested < 2 {
            return Err(Error::invalid_config("population_size must be at least 2"));
        }

        let mut rng = crate::rng_from_seed(self.config.seed);
        let weights = self.generate_weights(problem.n_objectives(), requested, &mut rng);
        let n = weights.nrows();
        let neighborhoods = self.compute_neighborhoods(weights.view());

        let mut population = Array2::from_shape_fn((n, n_vars), |_| rng.gen::<f64>());
        if let Some(x) = x0 {
            population.row_mut(0).assign(&ndarray::aview1(x));
        }
        let (mut objectives, _) = evaluate_population(problem, &population)?;
        let mut ideal: Vec<f64> = objectives
            .columns()
            .into_iter()
            .map(|c| c.fold(f64::INFINITY, |a, &b| a.min(b)))
            .collect();

        let mut pareto_front = ParetoFront::default();
        for (x, f) in population.outer_iter().zip(objectives.outer_iter()) {
            pareto_front.add_point(f.to_vec(), problem.denormalize(&x.to_vec())?);
        }

        let everyone: Vec<usize> = (0..n).collect();
        let mut history = MoeadHistory::default();
        let mut n_function_evals = n;
        let start = Instant::now();

        for iteration in 0..n_iterations {
            for i in 0..n {
                let pool: &[usize] = if rng.gen::<f64>() < self.config.neighborhood_prob {
                    &neighborhoods[i]
                } else {
                    &everyone
                };

                let y = self.differential_evolution(population.row(i), &population, pool, &mut rng);
                let evaluation = problem.evaluate_normalized(&y)?;
                n_function_evals += 1;
                let y_objectives = evaluation.objectives();

                if y_objectives.iter().zip(&ideal).any(|(f, z)| f < z) {
                    for (z, &f) in ideal.iter_mut().zip(y_objectives) {
                        *z = z.min(f);
                    }
                    history.ideal_points.push(ideal.clone());
                }

                for &j in pool {
                    let w = weights.row(j).to_vec();
                    let current = objectives.row(j).to_vec();
                    let new_fitness = self.aggregate(y_objectives, &w, &ideal);
                    let current_fitness = self.aggregate(&current, &w, &ideal);
                    if new_fitness < current_fitness {
                        population.row_mut(j).assign(&ndarray::aview1(&y));
                        objectives.row_mut(j).assign(&ndarray::aview1(y_objectives));
                    }
                }

                pareto_front.add_point(y_objectives.to_vec(), problem.denormalize(&y)?);
            }

            history.iterations.push(iteration);
            history
                .pareto_snapshots
                .push(pareto_front.get_pareto_points().to_vec());

            if let Some(cb) = callback.as_deref_mut() {
                cb(iteration, &pareto_front, &history);
            }
            if iteration == 0 || (iteration + 1) % 10 == 0 || iteration + 1 == n_iterations {
                info!(
                    "Iteration {}/{} - Time: {:.2}s - Pareto front size: {}",
                    iteration + 1,
                    n_iterations,
                    start.elapsed().as_secs_f64(),
                    pareto_front.len()
                );
            }
        }

        Ok(MoeadResult {
            pareto_front,
            history,
            population,
            objectives,
            weights,
            ideal_point: ideal,
            n_function_evals,
            elapsed: start.elapsed(),
        })
    }

    fn aggregate(&self, f: &[f64], w: &[f64], z: &[f64]) -> f64 {
        self.config
            .decomposition
            .aggregate(f, w, z, self.config.pbi_theta)
    }

    /// DE/rand/1 mutation from three pool members, then binomial crossover with `x`.
    fn differential_evolution(
        &self,
        x: ArrayView1<f64>,
        population: &Array2<f64>,
        pool: &[usize],
        rng: &mut ChaCha20Rng,
    ) -> Vec<f64> {
        let [r0, r1, r2] = if pool.len() >= 3 {
            let picked = sample(rng, pool.len(), 3);
            [pool[picked.index(0)], pool[picked.index(1)], pool[picked.index(2)]]
        } else {
            [(); 3].map(|_| pool[rng.gen_range(0..pool.len())])
        };

        let n_vars = x.len();
        let mut mask: Vec<bool> = (0..n_vars).map(|_| rng.gen::<f64>() < self.config.de_cr).collect();
        if n_vars > 0 && !mask.iter().any(|&m| m) {
            mask[rng.gen_range(0..n_vars)] = true;
        }

        (0..n_vars)
            .map(|k| {
                let value = if mask[k] {
                    population[[r0, k]]
                        + self.config.de_f * (population[[r1, k]] - population[[r2, k]])
                } else {
                    x[k]
                };
                value.clamp(0.0, 1.0)
            })
            .collect()
    }
}

fn uniform_weights(n_objectives: usize, n_weights: usize, rng: &mut ChaCha20Rng) -> Array2<f64> {
    let mut weights = Array2::from_shape_fn((n_weights, n_objectives), |_| rng.gen::<f64>());
    for mut row in weights.rows_mut() {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
    weights
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let diff: Array1<f64> = &a - &b;
    diff.dot(&diff).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::DesignVariable;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn zdt1_like() -> OptimizationProblem {
        let mut problem = OptimizationProblem::new("convex");
        problem.add_design_variable(DesignVariable::new("x1", 0.0, 1.0).unwrap());
        problem.add_design_variable(DesignVariable::new("x2", 0.0, 1.0).unwrap());
        problem.add_objective("f1", |x| x["x1"], true);
        problem.add_objective("f2", |x| (1.0 + x["x2"]) * (1.0 - x["x1"].sqrt()), true);
        problem
    }

    fn seeded(config: MoeadConfig, seed: u64) -> MoeadDe {
        MoeadDe::new(MoeadConfig {
            seed: Some(seed),
            ..config
        })
    }

    #[test]
    fn test_decompositions() {
        let f = [2.0, 1.0];
        let z = [0.0, 0.0];
        assert_relative_eq!(Decomposition::WeightedSum.aggregate(&f, &[0.25, 0.75], &z, 5.0), 1.25);
        assert_relative_eq!(
            Decomposition::Tchebycheff.aggregate(&f, &[0.5, 0.5], &z, 5.0),
            0.5 * (2.0 + 1e-6)
        );
        // Along the weight direction d2 vanishes.
        assert_relative_eq!(
            Decomposition::Pbi.aggregate(&[1.0, 1.0], &[1.0, 1.0], &z, 5.0),
            2f64.sqrt(),
            epsilon = 1e-12
        );
        // Perpendicular offset is penalised by θ.
        assert_relative_eq!(
            Decomposition::Pbi.aggregate(&[0.0, 1.0], &[1.0, 0.0], &z, 5.0),
            5.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            Decomposition::Pbi.aggregate(&[3.0, 4.0], &[0.0, 0.0], &z, 5.0),
            25.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("PBI".parse::<Decomposition>().unwrap(), Decomposition::Pbi);
        assert_eq!(
            "systematic".parse::<WeightGeneration>().unwrap(),
            WeightGeneration::Systematic
        );
        assert!(matches!(
            "boundary".parse::<Decomposition>(),
            Err(Error::InvalidConfig(_))
        ));
        let config: MoeadConfig =
            serde_json::from_str(r#"{"decomposition":"weighted_sum","n_neighbors":5}"#).unwrap();
        assert_eq!(config.decomposition, Decomposition::WeightedSum);
        assert_eq!(config.de_f, 0.5);
    }

    #[test]
    fn test_uniform_weights_sum_to_one() {
        let moead = MoeadDe::default();
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let weights = moead.generate_weights(4, 30, &mut rng);
        assert_eq!(weights.dim(), (30, 4));
        for row in weights.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_systematic_weights_two_objectives() {
        let moead = MoeadDe::new(MoeadConfig {
            weight_generation: WeightGeneration::Systematic,
            ..Default::default()
        });
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let weights = moead.generate_weights(2, 5, &mut rng);
        let expected = [0.0, 0.25, 0.5, 0.75, 1.0];
        for (row, w0) in weights.rows().into_iter().zip(expected) {
            assert_relative_eq!(row[0], w0);
            assert_relative_eq!(row[1], 1.0 - w0);
        }
    }

    #[test]
    fn test_systematic_weights_three_objectives() {
        let moead = MoeadDe::new(MoeadConfig {
            weight_generation: WeightGeneration::Systematic,
            ..Default::default()
        });
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let weights = moead.generate_weights(3, 20, &mut rng);
        assert_eq!(weights.dim(), (20, 3));
        for row in weights.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn test_neighborhoods_start_with_self() {
        let moead = MoeadDe::new(MoeadConfig {
            n_neighbors: 3,
            weight_generation: WeightGeneration::Systematic,
            ..Default::default()
        });
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let weights = moead.generate_weights(2, 6, &mut rng);
        let neighborhoods = moead.compute_neighborhoods(weights.view());
        assert_eq!(neighborhoods.len(), 6);
        assert_eq!(neighborhoods[0], vec![0, 1, 2]);
        for (i, hood) in neighborhoods.iter().enumerate() {
            assert_eq!(hood.len(), 3);
            assert_eq!(hood[0], i);
        }
    }

    #[test]
    fn test_requires_two_objectives() {
        let mut problem = OptimizationProblem::new("single");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
        problem.add_objective("f", |x| x["x"], true);
        assert!(matches!(
            MoeadDe::default().optimize(&problem, 1, Some(10), None, None),
            Err(Error::NotMultiObjective { algorithm: "MOEA/D", found: 1 })
        ));
    }

    #[test]
    fn test_ideal_point_is_monotone() {
        let problem = zdt1_like();
        let moead = seeded(
            MoeadConfig {
                n_neighbors: 5,
                ..Default::default()
            },
            7,
        );
        let mut snapshots = 0;
        let mut callback = |_: usize, front: &ParetoFront, history: &MoeadHistory| {
            assert!(!front.is_empty());
            snapshots = history.pareto_snapshots.len();
        };
        let result = moead
            .optimize(&problem, 15, Some(20), None, Some(&mut callback))
            .unwrap();

        assert_eq!(snapshots, 15);
        assert_eq!(result.history.iterations.len(), 15);
        for pair in result.history.ideal_points.windows(2) {
            for (later, earlier) in pair[1].iter().zip(&pair[0]) {
                assert!(later <= earlier);
            }
        }
        if let Some(last) = result.history.ideal_points.last() {
            assert_eq!(last, &result.ideal_point);
        }
        for (col, z) in result.objectives.columns().into_iter().zip(&result.ideal_point) {
            assert!(col.iter().all(|f| f >= z));
        }
        assert_eq!(result.n_function_evals, 20 + 15 * 20);
        assert!(result.population.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_default_population_size() {
        let problem = zdt1_like();
        let result = seeded(MoeadConfig::default(), 1)
            .optimize(&problem, 1, None, None, None)
            .unwrap();
        assert_eq!(result.population.nrows(), 100);
        assert_eq!(result.weights.nrows(), 100);
    }

    #[test]
    fn test_ties_do_not_replace() {
        let mut problem = OptimizationProblem::new("flat");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
        problem.add_objective("f1", |_| 1.0, true);
        problem.add_objective("f2", |_| 1.0, true);

        let config = MoeadConfig {
            n_neighbors: 4,
            ..Default::default()
        };
        let initial = seeded(config.clone(), 5)
            .optimize(&problem, 0, Some(8), None, None)
            .unwrap();
        let evolved = seeded(config, 5)
            .optimize(&problem, 5, Some(8), None, None)
            .unwrap();
        assert_eq!(initial.population, evolved.population);
        assert!(evolved.history.ideal_points.is_empty());
    }

    #[test]
    fn test_seeded_initial_point() {
        let problem = zdt1_like();
        let result = seeded(MoeadConfig::default(), 2)
            .optimize(&problem, 0, Some(10), Some(&[0.0, 0.0]), None)
            .unwrap();
        assert_eq!(result.population.row(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(result.ideal_point[0], 0.0);
    }

    #[test]
    fn test_rejects_x0_outside_unit_box() {
        let problem = zdt1_like();
        let result = seeded(MoeadConfig::default(), 2).optimize(
            &problem,
            3,
            Some(10),
            Some(&[-3.0, 0.0]),
            None,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_small_pool_samples_with_replacement() {
        let moead = seeded(MoeadConfig::default(), 0);
        let population = ndarray::arr2(&[[0.2, 0.4], [0.6, 0.8]]);
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let y = moead.differential_evolution(population.row(0), &population, &[0, 1], &mut rng);
        assert_eq!(y.len(), 2);
        assert!(y.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
