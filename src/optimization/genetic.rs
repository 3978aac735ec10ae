use log::info;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use std::cmp::Ordering;
use std::time::Instant;

use super::{prepare, OptimizationHistory, OptimizationResult, OptimizerAlgorithm};
use crate::error::{Error, Result};
use crate::problem::{Evaluation, OptimizationProblem};

/// Generations that must pass before the diversity check may stop a run.
const MIN_GENERATIONS_BEFORE_STOP: usize = 20;

/// Real-coded genetic algorithm with a penalty for constraint violations.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneticAlgorithm {
    /// Population size
    pub population_size: usize,
    /// Share of the population copied unchanged into the next generation
    pub elite_ratio: f64,
    /// Probability of crossover
    pub crossover_prob: f64,
    /// Per-gene probability of mutation
    pub mutation_prob: f64,
    /// Standard deviation of Gaussian mutation, relative to the unit range
    pub mutation_scale: f64,
    /// Weight of the total constraint violation in the fitness
    pub constraint_penalty: f64,
    pub seed: Option<u64>,
}

impl Default for GeneticAlgorithm {
    fn default() -> Self {
        Self {
            population_size: 50,
            elite_ratio: 0.1,
            crossover_prob: 0.8,
            mutation_prob: 0.2,
            mutation_scale: 0.1,
            constraint_penalty: 1000.0,
            seed: None,
        }
    }
}

struct Scored {
    objective: Vec<f64>,
    violation: Vec<f64>,
    fitness: Vec<f64>,
    evaluations: Vec<Evaluation>,
}

impl GeneticAlgorithm {
    fn evaluate_population(
        &self,
        problem: &OptimizationProblem,
        population: &[Vec<f64>],
    ) -> Result<Scored> {
        let evaluations = population
            .iter()
            .map(|x| problem.evaluate_normalized(x))
            .collect::<Result<Vec<_>>>()?;
        let objective: Vec<f64> = evaluations.iter().map(|e| e.objectives()[0]).collect();
        let violation: Vec<f64> = evaluations.iter().map(Evaluation::total_violation).collect();
        let fitness = objective
            .iter()
            .zip(&violation)
            .map(|(f, v)| f + self.constraint_penalty * v)
            .collect();
        Ok(Scored {
            objective,
            violation,
            fitness,
            evaluations,
        })
    }

    /// Binary tournament: the fitter of two random individuals.
    fn select(&self, population: &[Vec<f64>], fitness: &[f64], rng: &mut ChaCha20Rng) -> Vec<Vec<f64>> {
        let n = population.len();
        (0..n)
            .map(|_| {
                let a = rng.gen_range(0..n);
                let b = rng.gen_range(0..n);
                if fitness[a] < fitness[b] {
                    population[a].clone()
                } else {
                    population[b].clone()
                }
            })
            .collect()
    }

    /// Single-point crossover of consecutive pairs; an odd last parent is copied.
    fn crossover(&self, mut parents: Vec<Vec<f64>>, rng: &mut ChaCha20Rng) -> Vec<Vec<f64>> {
        let n_vars = parents.first().map_or(0, Vec::len);
        if n_vars < 2 {
            return parents;
        }
        for pair in parents.chunks_exact_mut(2) {
            if rng.gen::<f64>() < self.crossover_prob {
                let point = rng.gen_range(1..n_vars);
                let (first, second) = pair.split_at_mut(1);
                first[0][point..].swap_with_slice(&mut second[0][point..]);
            }
        }
        parents
    }

    /// Gaussian mutation, clipped to the unit box.
    fn mutate(&self, population: &mut [Vec<f64>], normal: &Normal<f64>, rng: &mut ChaCha20Rng) {
        for gene in population.iter_mut().flatten() {
            if rng.gen::<f64>() < self.mutation_prob {
                *gene = (*gene + normal.sample(rng)).clamp(0.0, 1.0);
            }
        }
    }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map_or(0, |(i, _)| i)
}

/// Largest per-variable standard deviation across the population.
fn diversity(population: &[Vec<f64>]) -> f64 {
    let n = population.len() as f64;
    let n_vars = population.first().map_or(0, Vec::len);
    (0..n_vars)
        .map(|j| {
            let mean = population.iter().map(|x| x[j]).sum::<f64>() / n;
            (population.iter().map(|x| (x[j] - mean).powi(2)).sum::<f64>() / n).sqrt()
        })
        .fold(0.0, f64::max)
}

impl OptimizerAlgorithm for GeneticAlgorithm {
    /// Evolves the population for up to `max_iterations` generations.
    ///
    /// The result is the best feasible individual (violation below
    /// `tolerance`) seen in any generation, or the fittest individual of the
    /// last generation when none was feasible. The run stops early once the
    /// population is feasible and its diversity drops below `tolerance`.
    fn minimize(
        &self,
        problem: &OptimizationProblem,
        x0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<OptimizationResult> {
        if self.population_size < 2 {
            return Err(Error::invalid_config("population_size must be at least 2"));
        }
        let normal = Normal::new(0.0, self.mutation_scale)
            .map_err(|e| Error::invalid_config(format!("mutation_scale: {e}")))?;
        let start_point = prepare(problem, x0, "Genetic algorithm")?;
        let n_vars = start_point.len();
        let n_elite = ((self.elite_ratio * self.population_size as f64) as usize)
            .min(self.population_size);

        let mut rng = crate::rng_from_seed(self.seed);
        let mut population: Vec<Vec<f64>> = (0..self.population_size)
            .map(|_| (0..n_vars).map(|_| rng.gen::<f64>()).collect())
            .collect();
        if x0.is_some() {
            population[0] = start_point;
        }

        let mut history = OptimizationHistory::default();
        let mut best: Option<(Vec<f64>, f64, Evaluation)> = None;
        let mut last_best: Option<(Vec<f64>, f64, Evaluation)> = None;
        let start = Instant::now();

        for generation in 0..max_iterations {
            let scored = self.evaluate_population(problem, &population)?;
            let best_idx = argmin(&scored.fitness);
            let generation_best_obj = scored.objective[best_idx];
            let n = population.len() as f64;
            let mean_obj = scored.objective.iter().sum::<f64>() / n;
            let mean_violation = scored.violation.iter().sum::<f64>() / n;

            let improves = best
                .as_ref()
                .map_or(true, |(_, obj, _)| generation_best_obj < *obj);
            if improves && scored.violation[best_idx] < tolerance {
                best = Some((
                    population[best_idx].clone(),
                    generation_best_obj,
                    scored.evaluations[best_idx].clone(),
                ));
            }
            last_best = Some((
                population[best_idx].clone(),
                generation_best_obj,
                scored.evaluations[best_idx].clone(),
            ));

            history.iterations.push(generation);
            history
                .objective
                .push(scored.objective.iter().copied().fold(f64::INFINITY, f64::min));
            history.mean_objective.push(mean_obj);
            history.x.push(population[best_idx].clone());
            history.best_fitness.push(scored.fitness[best_idx]);
            history.constraint_violation.push(mean_violation);

            if generation % 10 == 0 {
                info!(
                    "Generation {}: best obj = {:.6e}, mean obj = {:.6e}, mean constraint violation = {:.6e}",
                    generation, generation_best_obj, mean_obj, mean_violation
                );
            }

            let min_violation = scored.violation.iter().copied().fold(f64::INFINITY, f64::min);
            if min_violation < tolerance
                && generation > MIN_GENERATIONS_BEFORE_STOP
                && diversity(&population) < tolerance
            {
                info!("Converged after {generation} generations (low diversity)");
                break;
            }

            let mut order: Vec<usize> = (0..population.len()).collect();
            order.sort_by(|&a, &b| {
                scored.fitness[a]
                    .partial_cmp(&scored.fitness[b])
                    .unwrap_or(Ordering::Equal)
            });
            let mut next: Vec<Vec<f64>> = order[..n_elite]
                .iter()
                .map(|&i| population[i].clone())
                .collect();

            let selected = self.select(&population, &scored.fitness, &mut rng);
            let mut offspring = self.crossover(selected, &mut rng);
            self.mutate(&mut offspring, &normal, &mut rng);
            next.extend(offspring.into_iter().take(self.population_size - n_elite));
            population = next;
        }

        let elapsed = start.elapsed();
        let n_generations = history.iterations.len();
        let (x, obj_value, final_evaluation, message) = match (best, last_best) {
            (Some((x, obj, eval)), _) => (x, obj, eval, "best feasible individual"),
            (None, Some((x, obj, eval))) => {
                (x, obj, eval, "no feasible individual found; returning fittest")
            }
            (None, None) => {
                let (obj, eval) = super::first_objective(problem, &population[0])?;
                (population[0].clone(), obj, eval, "no generations run")
            }
        };

        Ok(OptimizationResult {
            x_point: problem.denormalize(&x)?,
            x,
            obj_value,
            n_iterations: n_generations,
            n_function_evals: n_generations * self.population_size,
            success: true,
            elapsed: Some(elapsed),
            message: message.to_string(),
            history,
            final_evaluation,
        })
    }
}
