//! Design of experiments: space-filling sampling plans over a problem's
//! design space, their evaluation, and simple post-processing.
//!
//! Samples live in the normalized box `[0, 1]^n`; exports convert them to
//! physical units.

use log::{info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::multi_objective::{ParetoFront, ParetoPoint};
use crate::problem::{DesignPoint, Evaluation, OptimizationProblem, OBJECTIVE_PREFIX, CONSTRAINT_PREFIX};

/// Prime bases of the Halton sequence, one per dimension.
const HALTON_PRIMES: [u64; 20] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
];

/// Sampling plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoeType {
    #[default]
    LatinHypercube,
    Random,
    FullFactorial,
    CentralComposite,
    BoxBehnken,
    Halton,
    /// Generated as a Latin hypercube
    Sobol,
}

impl DoeType {
    fn as_str(self) -> &'static str {
        match self {
            DoeType::LatinHypercube => "latin_hypercube",
            DoeType::Random => "random",
            DoeType::FullFactorial => "full_factorial",
            DoeType::CentralComposite => "central_composite",
            DoeType::BoxBehnken => "box_behnken",
            DoeType::Halton => "halton",
            DoeType::Sobol => "sobol",
        }
    }
}

impl FromStr for DoeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "latin_hypercube" => Ok(DoeType::LatinHypercube),
            "random" => Ok(DoeType::Random),
            "full_factorial" => Ok(DoeType::FullFactorial),
            "central_composite" => Ok(DoeType::CentralComposite),
            "box_behnken" => Ok(DoeType::BoxBehnken),
            "halton" => Ok(DoeType::Halton),
            "sobol" => Ok(DoeType::Sobol),
            other => Err(Error::invalid_config(format!(
                "Unsupported DOE type: {other}. Supported types: latin_hypercube, full_factorial, \
                 random, central_composite, box_behnken, halton, sobol"
            ))),
        }
    }
}

impl fmt::Display for DoeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics of one objective over the evaluated samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
}

/// Statistics and variable correlations per objective.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoeAnalysis {
    pub statistics: BTreeMap<String, ObjectiveStatistics>,
    /// Objective → design variable → Pearson correlation
    pub correlations: BTreeMap<String, BTreeMap<String, f64>>,
}

/// A sampling plan over the design space of an [`OptimizationProblem`].
///
/// # Examples
///
/// ```
/// use mdo::doe::{DesignOfExperiments, DoeType};
/// use mdo::problem::{DesignVariable, OptimizationProblem};
///
/// let mut problem = OptimizationProblem::new("doe");
/// problem.add_design_variable(DesignVariable::new("x", -1.0, 1.0).unwrap());
/// problem.add_design_variable(DesignVariable::new("y", 0.0, 2.0).unwrap());
/// problem.add_objective("f", |p| p["x"].powi(2) + p["y"], true);
///
/// let mut doe = DesignOfExperiments::new(&problem, DoeType::LatinHypercube, Some(42));
/// let samples = doe.generate_samples(20).unwrap();
/// assert_eq!(samples.dim(), (20, 2));
///
/// doe.evaluate().unwrap();
/// let (point, value) = doe.get_best_point(None, true).unwrap();
/// assert!(value <= 2.0 && point["y"] >= 0.0);
/// ```
pub struct DesignOfExperiments<'a> {
    problem: &'a OptimizationProblem,
    doe_type: DoeType,
    rng: ChaCha20Rng,
    samples: Option<Array2<f64>>,
    results: Option<Vec<Evaluation>>,
}

impl<'a> DesignOfExperiments<'a> {
    pub fn new(problem: &'a OptimizationProblem, doe_type: DoeType, seed: Option<u64>) -> Self {
        Self {
            problem,
            doe_type,
            rng: crate::rng_from_seed(seed),
            samples: None,
            results: None,
        }
    }

    pub fn doe_type(&self) -> DoeType {
        self.doe_type
    }

    /// Normalized samples of the last [`generate_samples`](Self::generate_samples) call.
    pub fn samples(&self) -> Option<&Array2<f64>> {
        self.samples.as_ref()
    }

    pub fn results(&self) -> Option<&[Evaluation]> {
        self.results.as_deref()
    }

    /// Generates a new plan, replacing earlier samples and results.
    ///
    /// `n_samples` is a target for the full factorial design and is
    /// ignored by the central composite and Box-Behnken designs, whose size
    /// follows from the number of variables.
    pub fn generate_samples(&mut self, n_samples: usize) -> Result<&Array2<f64>> {
        let n_vars = self.problem.n_variables();
        if n_vars == 0 {
            return Err(Error::invalid_input("problem has no design variables"));
        }
        if n_samples == 0 {
            return Err(Error::invalid_input("n_samples must be positive"));
        }
        let samples = match self.doe_type {
            DoeType::LatinHypercube => latin_hypercube(n_samples, n_vars, &mut self.rng),
            DoeType::Random => Array2::from_shape_fn((n_samples, n_vars), |_| self.rng.gen()),
            DoeType::FullFactorial => {
                // the epsilon keeps exact powers such as 27^(1/3) from flooring down
                let per_dim = (((n_samples as f64).powf(1.0 / n_vars as f64) + 1e-9).floor()
                    as usize)
                    .max(2);
                info!("Using {per_dim} points per dimension for full factorial design");
                full_factorial(per_dim, n_vars)?
            }
            DoeType::CentralComposite => central_composite(n_vars)?,
            DoeType::BoxBehnken => box_behnken(n_vars)?,
            DoeType::Halton => halton(n_samples, n_vars)?,
            DoeType::Sobol => {
                warn!("Sobol sequences are not available. Falling back to Latin Hypercube sampling.");
                latin_hypercube(n_samples, n_vars, &mut self.rng)
            }
        };
        info!(
            "Generated {} samples using {} design",
            samples.nrows(),
            self.doe_type
        );
        self.results = None;
        Ok(&*self.samples.insert(samples))
    }

    /// Evaluates every sample with the problem's objectives and constraints.
    pub fn evaluate(&mut self) -> Result<&[Evaluation]> {
        let samples = self
            .samples
            .as_ref()
            .ok_or_else(|| Error::invalid_input("No samples generated. Call generate_samples first."))?;
        let n = samples.nrows();
        info!("Evaluating {n} samples sequentially");
        let mut results = Vec::with_capacity(n);
        for (i, sample) in samples.axis_iter(Axis(0)).enumerate() {
            if i % 10 == 0 {
                info!("Progress: {i}/{n}");
            }
            results.push(self.problem.evaluate_normalized(&sample.to_vec())?);
        }
        info!("Completed evaluation of {n} samples");
        Ok(self.results.insert(results).as_slice())
    }

    fn evaluated(&self) -> Result<(&Array2<f64>, &[Evaluation])> {
        match (&self.samples, &self.results) {
            (Some(samples), Some(results)) => Ok((samples, results)),
            _ => Err(Error::invalid_input(
                "Samples or results not available. Call generate_samples and evaluate first.",
            )),
        }
    }

    fn objective_values(&self, results: &[Evaluation], name: &str) -> Result<Vec<f64>> {
        if self.problem.is_minimized(name).is_none() {
            return Err(Error::invalid_input(format!(
                "Objective '{name}' not found in problem definition"
            )));
        }
        results
            .iter()
            .map(|e| e.objective(name).ok_or_else(|| Error::MissingValue(format!("{OBJECTIVE_PREFIX}{name}"))))
            .collect()
    }

    fn sample_point(&self, samples: &Array2<f64>, i: usize) -> Result<DesignPoint> {
        self.problem.denormalize(&samples.row(i).to_vec())
    }

    /// Sample with the lowest (or highest) stored value of an objective.
    ///
    /// `objective` defaults to the first objective. Values are compared as
    /// stored in the evaluations, so maximized objectives appear negated.
    pub fn get_best_point(&self, objective: Option<&str>, minimize: bool) -> Result<(DesignPoint, f64)> {
        let (samples, results) = self.evaluated()?;
        let names = self.problem.objective_names();
        let name = match objective {
            Some(name) => name,
            None => names
                .first()
                .copied()
                .ok_or_else(|| Error::invalid_input("problem has no objectives"))?,
        };
        let values = self.objective_values(results, name)?;
        let best = values
            .iter()
            .enumerate()
            .reduce(|best, candidate| {
                let better = if minimize {
                    candidate.1 < best.1
                } else {
                    candidate.1 > best.1
                };
                if better {
                    candidate
                } else {
                    best
                }
            })
            .map(|(i, v)| (i, *v))
            .ok_or_else(|| Error::invalid_input("no samples evaluated"))?;
        Ok((self.sample_point(samples, best.0)?, best.1))
    }

    /// Non-dominated samples with respect to `objectives` (all by default).
    ///
    /// With fewer than two objectives the single best sample is returned.
    pub fn get_pareto_points(&self, objectives: Option<&[&str]>) -> Result<Vec<ParetoPoint>> {
        let (samples, results) = self.evaluated()?;
        let names: Vec<&str> = match objectives {
            Some(names) => names.to_vec(),
            None => self.problem.objective_names(),
        };
        if names.len() < 2 {
            warn!("At least 2 objectives needed for Pareto analysis. Returning best point.");
            let (variables, value) = self.get_best_point(names.first().copied(), true)?;
            return Ok(vec![ParetoPoint {
                objectives: vec![value],
                variables,
            }]);
        }
        let columns = names
            .iter()
            .map(|name| self.objective_values(results, name))
            .collect::<Result<Vec<_>>>()?;
        let mut front = ParetoFront::default();
        for i in 0..samples.nrows() {
            let objectives = columns.iter().map(|column| column[i]).collect();
            front.add_point(objectives, self.sample_point(samples, i)?);
        }
        Ok(front.get_pareto_points().to_vec())
    }

    /// Statistics of every objective and its correlation with each variable.
    pub fn analyze(&self) -> Result<DoeAnalysis> {
        let (samples, results) = self.evaluated()?;
        let variables: Vec<&str> = self.problem.design_variables().iter().map(|v| v.name()).collect();
        let mut statistics = BTreeMap::new();
        let mut correlations = BTreeMap::new();
        for name in self.problem.objective_names() {
            let values = self.objective_values(results, name)?;
            statistics.insert(name.to_string(), describe(&values));
            let y = ArrayView1::from(values.as_slice());
            let per_variable = variables
                .iter()
                .enumerate()
                .map(|(i, var)| (var.to_string(), pearson(samples.column(i), y)))
                .collect();
            correlations.insert(name.to_string(), per_variable);
        }
        Ok(DoeAnalysis {
            statistics,
            correlations,
        })
    }

    fn physical_samples(&self, samples: &Array2<f64>) -> Result<Vec<Vec<f64>>> {
        (0..samples.nrows())
            .map(|i| Ok(self.sample_point(samples, i)?.into_values()))
            .collect()
    }

    /// Writes the samples in physical units; `.csv` paths get CSV, anything
    /// else JSON.
    pub fn export_samples<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let samples = self
            .samples
            .as_ref()
            .ok_or_else(|| Error::invalid_input("No samples generated. Call generate_samples first."))?;
        let variables = self.variable_names();
        let rows = self.physical_samples(samples)?;
        create_parent(path)?;
        if is_csv(path) {
            write_csv(path, &variables, rows.iter().cloned())?;
        } else {
            #[derive(Serialize)]
            struct SamplesFile<'s> {
                doe_type: DoeType,
                n_samples: usize,
                variables: &'s [String],
                samples: &'s [Vec<f64>],
            }
            write_json(
                path,
                &SamplesFile {
                    doe_type: self.doe_type,
                    n_samples: rows.len(),
                    variables: &variables,
                    samples: &rows,
                },
            )?;
        }
        info!("Exported {} samples to {}", rows.len(), path.display());
        Ok(())
    }

    /// Writes samples with their objective and constraint values.
    pub fn export_results<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (samples, results) = self.evaluated()?;
        let variables = self.variable_names();
        let objectives: Vec<String> = self.problem.objective_names().iter().map(|s| s.to_string()).collect();
        let constraints: Vec<String> = self
            .problem
            .constraints()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = self.physical_samples(samples)?;
        create_parent(path)?;
        if is_csv(path) {
            let header: Vec<String> = variables
                .iter()
                .cloned()
                .chain(objectives.iter().map(|n| format!("{OBJECTIVE_PREFIX}{n}")))
                .chain(constraints.iter().map(|n| format!("{CONSTRAINT_PREFIX}{n}")))
                .collect();
            let lines = rows.iter().zip(results).map(|(row, eval)| {
                row.iter()
                    .copied()
                    .chain(eval.objectives().iter().copied())
                    .chain(eval.constraint_values().iter().copied())
                    .collect::<Vec<f64>>()
            });
            write_csv(path, &header, lines)?;
        } else {
            #[derive(Serialize)]
            struct ResultsFile<'s> {
                doe_type: DoeType,
                n_samples: usize,
                variables: &'s [String],
                objectives: &'s [String],
                constraints: &'s [String],
                samples: &'s [Vec<f64>],
                results: &'s [Evaluation],
            }
            write_json(
                path,
                &ResultsFile {
                    doe_type: self.doe_type,
                    n_samples: rows.len(),
                    variables: &variables,
                    objectives: &objectives,
                    constraints: &constraints,
                    samples: &rows,
                    results,
                },
            )?;
        }
        info!("Exported {} results to {}", rows.len(), path.display());
        Ok(())
    }

    fn variable_names(&self) -> Vec<String> {
        self.problem
            .design_variables()
            .iter()
            .map(|v| v.name().to_string())
            .collect()
    }
}

fn latin_hypercube(n: usize, d: usize, rng: &mut ChaCha20Rng) -> Array2<f64> {
    let width = 1.0 / n as f64;
    let mut samples = Array2::zeros((n, d));
    for mut column in samples.axis_iter_mut(Axis(1)) {
        let mut strata: Vec<f64> = (0..n)
            .map(|i| (i as f64 + rng.gen::<f64>()) * width)
            .collect();
        strata.shuffle(rng);
        for (cell, value) in column.iter_mut().zip(strata) {
            *cell = value;
        }
    }
    samples
}

/// Every combination of `per_dim` evenly spaced levels, last variable fastest.
fn full_factorial(per_dim: usize, d: usize) -> Result<Array2<f64>> {
    let n = u32::try_from(d)
        .ok()
        .and_then(|exp| per_dim.checked_pow(exp))
        .filter(|n| n.checked_mul(d).is_some())
        .ok_or_else(|| {
            Error::invalid_input(format!(
                "full factorial design with {per_dim} levels over {d} variables is too large"
            ))
        })?;
    let levels: Vec<f64> = (0..per_dim)
        .map(|k| k as f64 / (per_dim - 1) as f64)
        .collect();
    Ok(Array2::from_shape_fn((n, d), |(row, col)| {
        let index = row / per_dim.pow((d - 1 - col) as u32) % per_dim;
        levels[index]
    }))
}

/// Centre point, the `2^d` corners and the `2d` face-centred axial points.
fn central_composite(d: usize) -> Result<Array2<f64>> {
    let corners = u32::try_from(d)
        .ok()
        .and_then(|exp| 1usize.checked_shl(exp))
        .ok_or_else(|| {
            Error::invalid_input(format!(
                "central composite design over {d} variables is too large"
            ))
        })?;
    let mut points = vec![vec![0.5; d]];
    for i in 0..corners {
        points.push((0..d).map(|j| ((i >> j) & 1) as f64).collect());
    }
    for j in 0..d {
        for level in [0.0, 1.0] {
            let mut point = vec![0.5; d];
            point[j] = level;
            points.push(point);
        }
    }
    Ok(rows_to_array(points, d))
}

/// Centre point plus the edge midpoints of the cube for every pair of variables.
fn box_behnken(d: usize) -> Result<Array2<f64>> {
    if d < 3 {
        return Err(Error::invalid_input("Box-Behnken design requires at least 3 variables"));
    }
    let mut points = vec![vec![0.5; d]];
    for i in 0..d {
        for j in i + 1..d {
            for a in [0.0, 1.0] {
                for b in [0.0, 1.0] {
                    let mut point = vec![0.5; d];
                    point[i] = a;
                    point[j] = b;
                    points.push(point);
                }
            }
        }
    }
    Ok(rows_to_array(points, d))
}

fn halton(n: usize, d: usize) -> Result<Array2<f64>> {
    if d > HALTON_PRIMES.len() {
        return Err(Error::invalid_input(format!(
            "Halton sequence limited to {} dimensions",
            HALTON_PRIMES.len()
        )));
    }
    Ok(Array2::from_shape_fn((n, d), |(i, j)| {
        radical_inverse(i as u64 + 1, HALTON_PRIMES[j])
    }))
}

/// Van der Corput radical inverse of `index` in `base`.
fn radical_inverse(mut index: u64, base: u64) -> f64 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f64;
        result += fraction * (index % base) as f64;
        index /= base;
    }
    result
}

fn rows_to_array(rows: Vec<Vec<f64>>, d: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), d), |(i, j)| rows[i][j])
}

/// Linear-interpolation percentile of sorted data, `q` in `[0, 1]`.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

fn describe(values: &[f64]) -> ObjectiveStatistics {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    ObjectiveStatistics {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std,
        q25: percentile(&sorted, 0.25),
        median: percentile(&sorted, 0.5),
        q75: percentile(&sorted, 0.75),
    }
}

/// Pearson correlation; NaN when either series is constant.
fn pearson(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let n = x.len() as f64;
    let mx = x.sum() / n;
    let my = y.sum() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    sxy / (sxx * syy).sqrt()
}

fn is_csv(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_csv<I>(path: &Path, header: &[String], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<f64>>,
{
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", header.join(","))?;
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6e}")).collect();
        writeln!(out, "{}", cells.join(","))?;
    }
    out.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Constraint, DesignVariable};
    use approx::assert_abs_diff_eq;

    fn problem(n_vars: usize) -> OptimizationProblem {
        let mut problem = OptimizationProblem::new("doe test");
        for i in 0..n_vars {
            problem.add_design_variable(DesignVariable::new(format!("x{i}"), -1.0, 1.0).unwrap());
        }
        problem.add_objective("f1", |p| p.values().iter().map(|v| v * v).sum(), true);
        problem.add_objective("f2", |p| p.values().iter().map(|v| (v - 1.0).powi(2)).sum(), true);
        problem
    }

    fn generate(doe_type: DoeType, n_vars: usize, n: usize) -> Result<Array2<f64>> {
        let problem = problem(n_vars);
        let mut doe = DesignOfExperiments::new(&problem, doe_type, Some(7));
        doe.generate_samples(n).cloned()
    }

    #[test]
    fn test_latin_hypercube_has_one_sample_per_stratum() {
        let samples = generate(DoeType::LatinHypercube, 3, 10).unwrap();
        assert_eq!(samples.dim(), (10, 3));
        for column in samples.axis_iter(Axis(1)) {
            let mut strata: Vec<usize> = column.iter().map(|v| (v * 10.0).floor() as usize).collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_random_samples_in_unit_box() {
        let samples = generate(DoeType::Random, 2, 50).unwrap();
        assert_eq!(samples.nrows(), 50);
        assert!(samples.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_full_factorial_sizes() {
        let samples = generate(DoeType::FullFactorial, 3, 27).unwrap();
        assert_eq!(samples.dim(), (27, 3));
        assert_eq!(samples.row(0).to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(samples.row(1).to_vec(), vec![0.0, 0.0, 0.5]);
        assert_eq!(samples.row(26).to_vec(), vec![1.0, 1.0, 1.0]);
        // at least two levels per dimension
        assert_eq!(generate(DoeType::FullFactorial, 2, 3).unwrap().nrows(), 4);
    }

    #[test]
    fn test_central_composite() {
        let samples = generate(DoeType::CentralComposite, 3, 1).unwrap();
        assert_eq!(samples.nrows(), 1 + 8 + 6);
        assert_eq!(samples.row(0).to_vec(), vec![0.5; 3]);
        assert_eq!(samples.row(2).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(samples.row(9).to_vec(), vec![0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_grid_designs_reject_overflowing_sizes() {
        assert!(matches!(
            generate(DoeType::FullFactorial, 70, 2),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            generate(DoeType::CentralComposite, 70, 1),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_box_behnken() {
        let samples = generate(DoeType::BoxBehnken, 4, 1).unwrap();
        assert_eq!(samples.nrows(), 1 + 4 * 6);
        for row in samples.axis_iter(Axis(0)).skip(1) {
            assert_eq!(row.iter().filter(|&&v| v == 0.5).count(), 2);
        }
        assert!(matches!(
            generate(DoeType::BoxBehnken, 2, 1),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_halton() {
        let samples = generate(DoeType::Halton, 2, 4).unwrap();
        assert_eq!(samples.column(0).to_vec(), vec![0.5, 0.25, 0.75, 0.125]);
        assert_abs_diff_eq!(samples[(0, 1)], 1.0 / 3.0);
        assert_abs_diff_eq!(samples[(2, 1)], 1.0 / 9.0);
        assert!(matches!(
            generate(DoeType::Halton, 21, 4),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sobol_falls_back_to_latin_hypercube() {
        let samples = generate(DoeType::Sobol, 2, 8).unwrap();
        assert_eq!(samples, generate(DoeType::LatinHypercube, 2, 8).unwrap());
    }

    #[test]
    fn test_type_parsing() {
        assert_eq!("Box_Behnken".parse::<DoeType>().unwrap(), DoeType::BoxBehnken);
        assert!(matches!("taguchi".parse::<DoeType>(), Err(Error::InvalidConfig(_))));
        assert_eq!(DoeType::CentralComposite.to_string(), "central_composite");
    }

    #[test]
    fn test_evaluate_and_best_point() {
        let problem = problem(2);
        let mut doe = DesignOfExperiments::new(&problem, DoeType::FullFactorial, None);
        assert!(matches!(doe.evaluate(), Err(Error::InvalidInput(_))));
        doe.generate_samples(9).unwrap();
        assert_eq!(doe.evaluate().unwrap().len(), 9);

        let (point, value) = doe.get_best_point(Some("f1"), true).unwrap();
        assert_eq!(value, 0.0);
        assert_eq!(point.values(), &[0.0, 0.0]);
        let (point, value) = doe.get_best_point(None, false).unwrap();
        assert_eq!(value, 2.0);
        assert_eq!(point["x0"].abs(), 1.0);
        assert!(matches!(
            doe.get_best_point(Some("drag"), true),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pareto_points_are_mutually_non_dominated() {
        let problem = problem(1);
        let mut doe = DesignOfExperiments::new(&problem, DoeType::FullFactorial, None);
        doe.generate_samples(5).unwrap();
        doe.evaluate().unwrap();
        let front = doe.get_pareto_points(None).unwrap();
        // x in [0, 1] trades f1 against f2; x < 0 is dominated by x = 0
        let xs: Vec<f64> = front.iter().map(|p| p.variables["x0"]).collect();
        assert_eq!(xs.len(), 3);
        assert!(xs.iter().all(|&x| x >= 0.0));

        let single = doe.get_pareto_points(Some(&["f2"])).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].objectives, vec![0.0]);
    }

    #[test]
    fn test_analyze() {
        let problem = problem(2);
        let mut doe = DesignOfExperiments::new(&problem, DoeType::FullFactorial, None);
        doe.generate_samples(9).unwrap();
        doe.evaluate().unwrap();
        let analysis = doe.analyze().unwrap();
        let f2 = &analysis.statistics["f2"];
        assert_eq!(f2.min, 0.0);
        assert_eq!(f2.max, 8.0);
        assert!(analysis.correlations["f2"]["x0"] < -0.5);
        assert_abs_diff_eq!(analysis.correlations["f1"]["x1"], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut problem = problem(2);
        problem.add_constraint(Constraint::inequality("c", |p| p["x0"], None, Some(0.5)).unwrap());
        let mut doe = DesignOfExperiments::new(&problem, DoeType::CentralComposite, None);
        doe.generate_samples(1).unwrap();
        doe.evaluate().unwrap();

        let json_path = dir.path().join("out").join("samples.json");
        doe.export_samples(&json_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["doe_type"], "central_composite");
        assert_eq!(json["n_samples"], 9);
        assert_eq!(json["samples"][0], serde_json::json!([0.0, 0.0]));
        assert_eq!(json["samples"][1], serde_json::json!([-1.0, -1.0]));

        let csv_path = dir.path().join("results.csv");
        doe.export_results(&csv_path).unwrap();
        let csv = fs::read_to_string(&csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("x0,x1,obj_f1,obj_f2,con_c"));
        assert_eq!(lines.count(), 9);

        let results_path = dir.path().join("results.json");
        doe.export_results(&results_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&results_path).unwrap()).unwrap();
        assert_eq!(json["results"][0]["obj_f1"], 0.0);
        assert_eq!(json["constraints"], serde_json::json!(["c"]));
    }
}
