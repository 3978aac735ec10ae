use log::{debug, info};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

use super::pareto::{ParetoFront, ParetoPoint};
use super::sorting::{crowding_distance, non_dominated_sort, ranks};
use super::{check_x0, evaluate_population, require_multi_objective};
use crate::error::{Error, Result};
use crate::problem::OptimizationProblem;

/// Configuration of the NSGA-II optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nsga2Config {
    /// Number of individuals per generation
    pub population_size: usize,
    /// Probability that a parent pair is recombined
    pub crossover_prob: f64,
    /// Per-gene mutation probability
    pub mutation_prob: f64,
    /// Mutation step relative to the variable range
    pub mutation_scale: f64,
    /// Candidates drawn per tournament
    pub tournament_size: usize,
    /// Distribution index of simulated binary crossover
    pub eta_c: f64,
    /// Distribution index of polynomial mutation
    pub eta_m: f64,
    /// RNG seed; `None` draws one from the OS
    pub seed: Option<u64>,
}

impl Default for Nsga2Config {
    fn default() -> Self {
        Self {
            population_size: 100,
            crossover_prob: 0.8,
            mutation_prob: 0.2,
            mutation_scale: 0.1,
            tournament_size: 2,
            eta_c: 20.0,
            eta_m: 20.0,
            seed: None,
        }
    }
}

impl Nsga2Config {
    fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(Error::invalid_config("population_size must be at least 2"));
        }
        if self.tournament_size == 0 {
            return Err(Error::invalid_config("tournament_size must be positive"));
        }
        for (name, p) in [
            ("crossover_prob", self.crossover_prob),
            ("mutation_prob", self.mutation_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::invalid_config(format!("{name} must lie in [0, 1], got {p}")));
            }
        }
        if self.eta_c < 0.0 || self.eta_m < 0.0 {
            return Err(Error::invalid_config("distribution indices must be non-negative"));
        }
        Ok(())
    }
}

/// Snapshot taken once per generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    pub generation: usize,
    /// Size of the population's first front in this generation
    pub front_size: usize,
    /// Members of the running Pareto front after this generation
    pub pareto_points: Vec<ParetoPoint>,
}

/// Outcome of [`Nsga2::optimize`].
#[derive(Debug, Clone)]
pub struct Nsga2Result {
    pub pareto_front: ParetoFront,
    pub history: Vec<GenerationRecord>,
    pub n_generations: usize,
    /// Parent plus offspring evaluations, `max_generations * population_size * 2`
    pub n_function_evals: usize,
    pub elapsed: Duration,
    /// Normalized decision vectors of the last generation
    pub final_population: Array2<f64>,
    pub final_objectives: Array2<f64>,
    pub final_violations: Array1<f64>,
}

/// Non-dominated Sorting Genetic Algorithm II.
///
/// Each generation ranks the population into fronts, breeds an offspring
/// population by crowded tournament selection, simulated binary crossover and
/// polynomial mutation, then keeps the best half of parents plus offspring.
#[derive(Debug, Clone, Default)]
pub struct Nsga2 {
    config: Nsga2Config,
}

impl Nsga2 {
    pub fn new(config: Nsga2Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Nsga2Config {
        &self.config
    }

    /// Runs NSGA-II on `problem`.
    ///
    /// # Arguments
    ///
    /// * `problem` - Problem with at least two objectives
    /// * `max_generations` - Number of generations to run
    /// * `x0` - Optional normalized point placed in the initial population
    /// * `callback` - Called after every generation with the running Pareto front
    ///
    /// # Errors
    ///
    /// `Error::NotMultiObjective` for fewer than two objectives,
    /// `Error::InvalidConfig` for an unusable configuration,
    /// `Error::DimensionMismatch` for a wrongly sized `x0`,
    /// `Error::InvalidInput` for an `x0` outside `[0, 1]`, and any error
    /// raised while evaluating the problem.
    ///
    /// # Examples
    ///
    /// ```
    /// use mdo::multi_objective::{Nsga2, Nsga2Config};
    /// use mdo::problem::{DesignVariable, OptimizationProblem};
    ///
    /// let mut problem = OptimizationProblem::new("trade-off");
    /// problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
    /// problem.add_objective("f1", |x| x["x"], true);
    /// problem.add_objective("f2", |x| 1.0 - x["x"], true);
    ///
    /// let nsga2 = Nsga2::new(Nsga2Config {
    ///     population_size: 20,
    ///     seed: Some(1),
    ///     ..Default::default()
    /// });
    /// let result = nsga2.optimize(&problem, 10, None, None).unwrap();
    /// assert!(!result.pareto_front.is_empty());
    /// assert_eq!(result.n_function_evals, 10 * 20 * 2);
    /// ```
    pub fn optimize(
        &self,
        problem: &OptimizationProblem,
        max_generations: usize,
        x0: Option<&[f64]>,
        mut callback: Option<&mut dyn FnMut(usize, &ParetoFront)>,
    ) -> Result<Nsga2Result> {
        require_multi_objective(problem, "NSGA-II")?;
        self.config.validate()?;
        check_x0(problem, x0)?;

        let start = Instant::now();
        let n = self.config.population_size;
        let mut rng = crate::rng_from_seed(self.config.seed);

        let mut population = Array2::from_shape_fn((n, problem.n_variables()), |_| rng.gen::<f64>());
        if let Some(x) = x0 {
            population.row_mut(0).assign(&ndarray::aview1(x));
        }
        let (mut objectives, mut violations) = evaluate_population(problem, &population)?;

        let mut pareto_front = ParetoFront::default();
        let mut history = Vec::with_capacity(max_generations);

        for generation in 0..max_generations {
            let fronts = non_dominated_sort(objectives.view());
            let rank = ranks(&fronts, n);
            let mut distance = vec![0.0; n];
            for front in &fronts {
                for (&i, d) in front.iter().zip(crowding_distance(objectives.view(), front)) {
                    distance[i] = d;
                }
            }

            let first_front = fronts.first().map(Vec::as_slice).unwrap_or_default();
            for &i in first_front {
                let variables = problem.denormalize(&population.row(i).to_vec())?;
                pareto_front.add_point(objectives.row(i).to_vec(), variables);
            }
            history.push(GenerationRecord {
                generation,
                front_size: first_front.len(),
                pareto_points: pareto_front.get_pareto_points().to_vec(),
            });

            if let Some(cb) = callback.as_deref_mut() {
                cb(generation, &pareto_front);
            }
            if generation % 10 == 0 {
                info!(
                    "Generation {}: {} points on Pareto front",
                    generation,
                    first_front.len()
                );
            }
            if generation + 1 == max_generations {
                break;
            }

            let parents = self.tournament_selection(&rank, &distance, &mut rng);
            let mut offspring = self.crossover(&population, &parents, &mut rng);
            self.mutate(&mut offspring, &mut rng);
            let (offspring_objectives, offspring_violations) =
                evaluate_population(problem, &offspring)?;

            let combined_population = stack(population.view(), offspring.view())?;
            let combined_objectives = stack(objectives.view(), offspring_objectives.view())?;
            let combined_violations = concatenate(
                Axis(0),
                &[violations.view(), offspring_violations.view()],
            )
            .map_err(|e| Error::numerical(e.to_string()))?;

            let survivors = select_survivors(combined_objectives.view(), n);
            population = combined_population.select(Axis(0), &survivors);
            objectives = combined_objectives.select(Axis(0), &survivors);
            violations = combined_violations.select(Axis(0), &survivors);
            debug!(
                "Generation {}: survivors drawn from {} candidates",
                generation,
                combined_population.nrows()
            );
        }

        Ok(Nsga2Result {
            pareto_front,
            history,
            n_generations: max_generations,
            n_function_evals: max_generations * n * 2,
            elapsed: start.elapsed(),
            final_population: population,
            final_objectives: objectives,
            final_violations: violations,
        })
    }

    /// Picks one parent per population slot by crowded tournament.
    fn tournament_selection(
        &self,
        rank: &[usize],
        distance: &[f64],
        rng: &mut ChaCha20Rng,
    ) -> Vec<usize> {
        let n = rank.len();
        let k = self.config.tournament_size.min(n);
        (0..n)
            .map(|_| {
                let candidates = sample(rng, n, k);
                let mut winner = candidates.index(0);
                for c in candidates.iter().skip(1) {
                    if crowded_compare(c, winner, rank, distance) == Ordering::Less {
                        winner = c;
                    }
                }
                winner
            })
            .collect()
    }

    /// Simulated binary crossover on consecutive parent pairs.
    fn crossover(
        &self,
        population: &Array2<f64>,
        parents: &[usize],
        rng: &mut ChaCha20Rng,
    ) -> Array2<f64> {
        let n = parents.len();
        let mut offspring = population.select(Axis(0), parents);
        let exponent = 1.0 / (self.config.eta_c + 1.0);

        for i in (0..n.saturating_sub(1)).step_by(2) {
            if rng.gen::<f64>() >= self.config.crossover_prob {
                continue;
            }
            for j in 0..offspring.ncols() {
                let (p1, p2) = (offspring[[i, j]], offspring[[i + 1, j]]);
                let u: f64 = rng.gen();
                let beta = if u <= 0.5 {
                    (2.0 * u).powf(exponent)
                } else {
                    (1.0 / (2.0 * (1.0 - u))).powf(exponent)
                };
                offspring[[i, j]] = (0.5 * ((1.0 + beta) * p1 + (1.0 - beta) * p2)).clamp(0.0, 1.0);
                offspring[[i + 1, j]] =
                    (0.5 * ((1.0 - beta) * p1 + (1.0 + beta) * p2)).clamp(0.0, 1.0);
            }
        }
        offspring
    }

    /// Polynomial mutation, clipped to the unit box.
    fn mutate(&self, offspring: &mut Array2<f64>, rng: &mut ChaCha20Rng) {
        let exponent = 1.0 / (self.config.eta_m + 1.0);
        for gene in offspring.iter_mut() {
            if rng.gen::<f64>() >= self.config.mutation_prob {
                continue;
            }
            let u: f64 = rng.gen();
            let delta = if u <= 0.5 {
                (2.0 * u).powf(exponent) - 1.0
            } else {
                1.0 - (2.0 * (1.0 - u)).powf(exponent)
            };
            *gene = (*gene + delta * self.config.mutation_scale).clamp(0.0, 1.0);
        }
    }
}

/// Lower rank wins; within a rank the larger crowding distance wins.
fn crowded_compare(i: usize, j: usize, rank: &[usize], distance: &[f64]) -> Ordering {
    rank[i].cmp(&rank[j]).then_with(|| {
        distance[j]
            .partial_cmp(&distance[i])
            .unwrap_or(Ordering::Equal)
    })
}

fn stack<'a>(a: ArrayView2<'a, f64>, b: ArrayView2<'a, f64>) -> Result<Array2<f64>> {
    concatenate(Axis(0), &[a, b]).map_err(|e| Error::numerical(e.to_string()))
}

/// Indices of the `n` individuals kept by elitist truncation.
///
/// Whole fronts are taken in rank order while they fit; the front that would
/// overflow is taken in descending crowding distance until `n` are chosen.
/// Fewer than `n` indices are returned only when there are fewer than `n` rows.
pub fn select_survivors(objectives: ArrayView2<f64>, n: usize) -> Vec<usize> {
    let mut chosen = Vec::with_capacity(n);
    for front in non_dominated_sort(objectives) {
        let remaining = n - chosen.len();
        if front.len() <= remaining {
            chosen.extend_from_slice(&front);
            if chosen.len() == n {
                break;
            }
            continue;
        }
        let distance = crowding_distance(objectives, &front);
        let mut order: Vec<usize> = (0..front.len()).collect();
        order.sort_by(|&a, &b| distance[b].partial_cmp(&distance[a]).unwrap_or(Ordering::Equal));
        chosen.extend(order.into_iter().take(remaining).map(|k| front[k]));
        break;
    }
    chosen
}
