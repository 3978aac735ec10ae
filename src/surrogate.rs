//! Surrogate models: cheap regression stand-ins for expensive analyses.
//!
//! Every model shares a [`SurrogateState`] holding the input/output names,
//! the per-input bounds used to normalize inputs to `[0, 1]`, and the raw
//! training data. Model-specific math always runs on normalized inputs.

#[cfg(feature = "gaussian-process")]
pub mod gaussian_process;
pub mod polynomial;
pub mod rbf;

use chrono::{DateTime, Local};
use log::{info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};

#[cfg(feature = "gaussian-process")]
pub use gaussian_process::{GaussianProcessSurrogate, GpHyperParams, GpKernel};
pub use polynomial::PolynomialSurrogate;
pub use rbf::{RadialBasisSurrogate, RbfKernel};

/// Below this total sum of squares an output is treated as constant.
const MIN_TOTAL_VARIANCE: f64 = 1e-10;

/// Training or query data, either as a sample matrix or as named columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    /// Shape `(n_samples, n_features)`
    Array(Array2<f64>),
    /// Ordered `(name, column)` pairs, all columns of equal length
    Named(Vec<(String, Vec<f64>)>),
}

impl From<Array2<f64>> for Dataset {
    fn from(array: Array2<f64>) -> Self {
        Dataset::Array(array)
    }
}

impl Dataset {
    /// Builds a named dataset from `(name, column)` pairs.
    pub fn named<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        Dataset::Named(columns.into_iter().map(|(n, c)| (n.into(), c)).collect())
    }

    pub fn n_samples(&self) -> usize {
        match self {
            Dataset::Array(a) => a.nrows(),
            Dataset::Named(cols) => cols.first().map_or(0, |(_, c)| c.len()),
        }
    }

    fn names(&self) -> Option<Vec<String>> {
        match self {
            Dataset::Array(_) => None,
            Dataset::Named(cols) => Some(cols.iter().map(|(n, _)| n.clone()).collect()),
        }
    }

    /// Converts to a sample matrix, taking named columns in `order`.
    fn to_array(&self, order: Option<&[String]>) -> Result<Array2<f64>> {
        let cols = match self {
            Dataset::Array(a) => return Ok(a.clone()),
            Dataset::Named(cols) => cols,
        };
        let selected: Vec<&[f64]> = match order {
            Some(names) => names
                .iter()
                .map(|name| {
                    cols.iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, c)| c.as_slice())
                        .ok_or_else(|| Error::MissingValue(name.clone()))
                })
                .collect::<Result<_>>()?,
            None => cols.iter().map(|(_, c)| c.as_slice()).collect(),
        };
        let n = selected.first().map_or(0, |c| c.len());
        if let Some(bad) = selected.iter().find(|c| c.len() != n) {
            return Err(Error::DimensionMismatch {
                expected: n,
                found: bad.len(),
            });
        }
        Ok(Array2::from_shape_fn((n, selected.len()), |(i, j)| selected[j][i]))
    }
}

/// Model output, in the same form as the query [`Dataset`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    Array(Array2<f64>),
    Named(Vec<(String, Vec<f64>)>),
}

impl Predictions {
    /// Predicted column for the output `name`, when predictions are named.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        match self {
            Predictions::Array(_) => None,
            Predictions::Named(cols) => cols
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c.as_slice()),
        }
    }

    /// Predictions as a `(n_samples, n_outputs)` matrix.
    pub fn into_array(self) -> Array2<f64> {
        match self {
            Predictions::Array(a) => a,
            Predictions::Named(cols) => {
                let n = cols.first().map_or(0, |(_, c)| c.len());
                Array2::from_shape_fn((n, cols.len()), |(i, j)| cols[j].1[i])
            }
        }
    }
}

/// Coefficient of determination per output plus their mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct R2Scores {
    pub outputs: Vec<(String, f64)>,
    pub overall: f64,
}

impl R2Scores {
    fn from_outputs(outputs: Vec<(String, f64)>) -> Self {
        let overall = if outputs.is_empty() {
            0.0
        } else {
            outputs.iter().map(|(_, r2)| r2).sum::<f64>() / outputs.len() as f64
        };
        Self { outputs, overall }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        if name == "overall" {
            return Some(self.overall);
        }
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, r2)| *r2)
    }
}

/// Result of k-fold cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidation {
    pub folds: Vec<R2Scores>,
    pub average: R2Scores,
}

/// R² of `predicted` against `actual`; 1.0 for an (almost) constant output.
pub fn r2_score(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    let mean = actual.mean().unwrap_or(0.0);
    let ss_total: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_residual: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_total < MIN_TOTAL_VARIANCE {
        1.0
    } else {
        1.0 - ss_residual / ss_total
    }
}

/// Metadata and training data common to every surrogate model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurrogateState {
    pub name: String,
    pub trained: bool,
    pub input_dim: Option<usize>,
    pub output_dim: Option<usize>,
    pub input_names: Option<Vec<String>>,
    pub output_names: Option<Vec<String>>,
    /// Input name → `(lower, upper)`
    pub input_bounds: Option<BTreeMap<String, (f64, f64)>>,
    pub x_train: Option<Array2<f64>>,
    pub y_train: Option<Array2<f64>>,
}

impl SurrogateState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn set_input_bounds(&mut self, bounds: BTreeMap<String, (f64, f64)>) {
        self.input_bounds = Some(bounds);
    }

    pub fn set_input_output_names(&mut self, input_names: Vec<String>, output_names: Vec<String>) {
        self.input_dim = Some(input_names.len());
        self.output_dim = Some(output_names.len());
        self.input_names = Some(input_names);
        self.output_names = Some(output_names);
    }

    /// Scales each input column to `[0, 1]` using the bounds of its name.
    ///
    /// Degenerate bounds map to 0.5. Columns without bounds (or without a
    /// name) pass through unchanged.
    pub fn normalize_inputs(&self, x: &Array2<f64>) -> Array2<f64> {
        let Some(bounds) = &self.input_bounds else {
            warn!("Input bounds not set, using raw inputs");
            return x.clone();
        };
        let mut normalized = x.clone();
        for (i, mut column) in normalized.axis_iter_mut(Axis(1)).enumerate() {
            let name = self.input_names.as_ref().and_then(|names| names.get(i));
            match name.and_then(|n| bounds.get(n)) {
                Some(&(lb, ub)) if ub == lb => column.fill(0.5),
                Some(&(lb, ub)) => column.mapv_inplace(|v| (v - lb) / (ub - lb)),
                None => warn!(
                    "Bounds not found for input {}, using raw values",
                    name.map_or("<unnamed>", String::as_str)
                ),
            }
        }
        normalized
    }

    /// Inverse of [`normalize_inputs`](Self::normalize_inputs).
    pub fn denormalize_inputs(&self, x_norm: &Array2<f64>) -> Array2<f64> {
        let Some(bounds) = &self.input_bounds else {
            return x_norm.clone();
        };
        let mut x = x_norm.clone();
        for (i, mut column) in x.axis_iter_mut(Axis(1)).enumerate() {
            let name = self.input_names.as_ref().and_then(|names| names.get(i));
            if let Some(&(lb, ub)) = name.and_then(|n| bounds.get(n)) {
                column.mapv_inplace(|v| lb + v * (ub - lb));
            }
        }
        x
    }

    /// Converts training data to matrices, learning names and dimensions
    /// on first use.
    pub fn prepare_training_data(&mut self, x: &Dataset, y: &Dataset) -> Result<(Array2<f64>, Array2<f64>)> {
        if self.input_names.is_none() {
            if let Some(names) = x.names() {
                self.input_dim = Some(names.len());
                self.input_names = Some(names);
            }
        }
        if self.output_names.is_none() {
            if let Some(names) = y.names() {
                self.output_dim = Some(names.len());
                self.output_names = Some(names);
            }
        }
        let x = x.to_array(self.input_names.as_deref())?;
        let y = y.to_array(self.output_names.as_deref())?;
        self.input_dim.get_or_insert(x.ncols());
        self.output_dim.get_or_insert(y.ncols());
        self.check_shapes(&x, &y)?;
        Ok((x, y))
    }

    fn check_shapes(&self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        for (expected, found) in [(self.input_dim, x.ncols()), (self.output_dim, y.ncols())] {
            if let Some(expected) = expected {
                if expected != found {
                    return Err(Error::DimensionMismatch { expected, found });
                }
            }
        }
        if x.nrows() != y.nrows() {
            return Err(Error::DimensionMismatch {
                expected: x.nrows(),
                found: y.nrows(),
            });
        }
        Ok(())
    }

    /// Query inputs as a matrix with the training column order.
    pub fn input_array(&self, x: &Dataset) -> Result<Array2<f64>> {
        let x = x.to_array(self.input_names.as_deref())?;
        if let Some(expected) = self.input_dim {
            if x.ncols() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    found: x.ncols(),
                });
            }
        }
        Ok(x)
    }

    fn output_array(&self, y: &Dataset) -> Result<Array2<f64>> {
        y.to_array(self.output_names.as_deref())
    }

    fn output_name(&self, i: usize) -> String {
        self.output_names
            .as_ref()
            .and_then(|names| names.get(i).cloned())
            .unwrap_or_else(|| format!("output_{i}"))
    }

    /// Shapes raw predictions like the query.
    pub fn wrap_predictions(&self, query: &Dataset, predictions: Array2<f64>) -> Predictions {
        match (query, &self.output_names) {
            (Dataset::Named(_), Some(names)) => Predictions::Named(
                names
                    .iter()
                    .zip(predictions.axis_iter(Axis(1)))
                    .map(|(name, column)| (name.clone(), column.to_vec()))
                    .collect(),
            ),
            _ => Predictions::Array(predictions),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    name: String,
    #[serde(rename = "type")]
    model_type: String,
    input_dim: Option<usize>,
    output_dim: Option<usize>,
    input_names: Option<Vec<String>>,
    output_names: Option<Vec<String>>,
    input_bounds: Option<BTreeMap<String, (f64, f64)>>,
    trained: bool,
    timestamp: DateTime<Local>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    metadata: Metadata,
    model_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TrainingData {
    #[serde(default)]
    x_train: Option<Array2<f64>>,
    #[serde(default)]
    y_train: Option<Array2<f64>>,
}

/// A regression model trained on `(inputs, outputs)` samples.
///
/// Implementors provide the fit and predict steps on normalized inputs;
/// data handling, scoring, cross-validation and persistence are shared.
pub trait SurrogateModel {
    /// Type tag written to saved files.
    fn type_name(&self) -> &'static str;

    fn state(&self) -> &SurrogateState;

    fn state_mut(&mut self) -> &mut SurrogateState;

    /// Fits the model on normalized inputs.
    fn fit(&mut self, x_norm: &Array2<f64>, y: &Array2<f64>) -> Result<()>;

    /// Predicts outputs for normalized inputs of a trained model.
    fn predict_normalized(&self, x_norm: &Array2<f64>) -> Result<Array2<f64>>;

    /// Model-specific data for [`save`](Self::save) as a JSON object.
    ///
    /// The training set is added by `save` itself.
    fn model_data(&self) -> Result<serde_json::Value>;

    /// Restores what [`model_data`](Self::model_data) produced.
    fn restore_model_data(&mut self, data: serde_json::Value) -> Result<()>;

    fn is_trained(&self) -> bool {
        self.state().trained
    }

    fn set_input_bounds(&mut self, bounds: BTreeMap<String, (f64, f64)>) {
        self.state_mut().set_input_bounds(bounds);
    }

    fn set_input_output_names(&mut self, input_names: Vec<String>, output_names: Vec<String>) {
        self.state_mut().set_input_output_names(input_names, output_names);
    }

    /// Trains on `x` and `y`, replacing any previous fit.
    fn train(&mut self, x: &Dataset, y: &Dataset) -> Result<()> {
        let (x, y) = self.state_mut().prepare_training_data(x, y)?;
        if x.nrows() == 0 {
            return Err(Error::invalid_input("training data is empty"));
        }
        let x_norm = self.state().normalize_inputs(&x);
        self.fit(&x_norm, &y)?;
        let state = self.state_mut();
        state.x_train = Some(x);
        state.y_train = Some(y);
        state.trained = true;
        Ok(())
    }

    /// Predicts outputs for `x`, named when `x` is named.
    fn predict(&self, x: &Dataset) -> Result<Predictions> {
        if !self.is_trained() {
            return Err(Error::NotTrained);
        }
        let x_array = self.state().input_array(x)?;
        let x_norm = self.state().normalize_inputs(&x_array);
        let predictions = self.predict_normalized(&x_norm)?;
        Ok(self.state().wrap_predictions(x, predictions))
    }

    /// Per-output R² on `(x, y)`.
    fn score(&self, x: &Dataset, y: &Dataset) -> Result<R2Scores> {
        if !self.is_trained() {
            return Err(Error::NotTrained);
        }
        let state = self.state();
        let x_array = state.input_array(x)?;
        let y_array = state.output_array(y)?;
        state.check_shapes(&x_array, &y_array)?;
        let predicted = self.predict_normalized(&state.normalize_inputs(&x_array))?;
        let outputs = y_array
            .axis_iter(Axis(1))
            .zip(predicted.axis_iter(Axis(1)))
            .enumerate()
            .map(|(i, (actual, pred))| (state.output_name(i), r2_score(actual, pred)))
            .collect();
        Ok(R2Scores::from_outputs(outputs))
    }

    /// K-fold cross-validation over a random permutation of the samples.
    ///
    /// Leaves the model trained on the training split of the last fold.
    fn cross_validate(
        &mut self,
        x: &Dataset,
        y: &Dataset,
        n_folds: usize,
        rng: &mut dyn RngCore,
    ) -> Result<CrossValidation> {
        let (x, y) = self.state_mut().prepare_training_data(x, y)?;
        let n_samples = x.nrows();
        if n_folds < 2 || n_folds > n_samples {
            return Err(Error::invalid_input(format!(
                "cannot split {n_samples} samples into {n_folds} folds"
            )));
        }
        let mut indices: Vec<usize> = (0..n_samples).collect();
        indices.shuffle(rng);
        let fold_size = n_samples / n_folds;

        let mut folds = Vec::with_capacity(n_folds);
        for fold in 0..n_folds {
            let test = &indices[fold * fold_size..(fold + 1) * fold_size];
            let train: Vec<usize> = indices[..fold * fold_size]
                .iter()
                .chain(&indices[(fold + 1) * fold_size..])
                .copied()
                .collect();
            self.train(
                &Dataset::Array(x.select(Axis(0), &train)),
                &Dataset::Array(y.select(Axis(0), &train)),
            )?;
            folds.push(self.score(
                &Dataset::Array(x.select(Axis(0), test)),
                &Dataset::Array(y.select(Axis(0), test)),
            )?);
        }

        let average = R2Scores::from_outputs(
            folds[0]
                .outputs
                .iter()
                .enumerate()
                .map(|(i, (name, _))| {
                    let mean = folds.iter().map(|f| f.outputs[i].1).sum::<f64>() / n_folds as f64;
                    (name.clone(), mean)
                })
                .collect(),
        );
        Ok(CrossValidation { folds, average })
    }

    /// Writes the model as JSON `{metadata, model_data}`.
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let state = self.state();
        let mut model_data = self.model_data()?;
        if let serde_json::Value::Object(map) = &mut model_data {
            map.insert("x_train".into(), serde_json::to_value(&state.x_train)?);
            map.insert("y_train".into(), serde_json::to_value(&state.y_train)?);
        }
        let envelope = Envelope {
            metadata: Metadata {
                name: state.name.clone(),
                model_type: self.type_name().to_string(),
                input_dim: state.input_dim,
                output_dim: state.output_dim,
                input_names: state.input_names.clone(),
                output_names: state.output_names.clone(),
                input_bounds: state.input_bounds.clone(),
                trained: state.trained,
                timestamp: Local::now(),
            },
            model_data,
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &envelope)?;
        info!("Model saved to {}", path.display());
        Ok(())
    }

    /// Reads a model written by [`save`](Self::save).
    fn load(path: &Path) -> Result<Self>
    where
        Self: Sized + Default,
    {
        let envelope: Envelope = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let mut model = Self::default();
        let metadata = envelope.metadata;
        if metadata.model_type != model.type_name() {
            warn!(
                "Loaded model type ({}) doesn't match current type ({}). This may cause issues.",
                metadata.model_type,
                model.type_name()
            );
        }
        let training: TrainingData = serde_json::from_value(envelope.model_data.clone())?;
        *model.state_mut() = SurrogateState {
            name: metadata.name,
            trained: metadata.trained,
            input_dim: metadata.input_dim,
            output_dim: metadata.output_dim,
            input_names: metadata.input_names,
            output_names: metadata.output_names,
            input_bounds: metadata.input_bounds,
            x_train: training.x_train,
            y_train: training.y_train,
        };
        model.restore_model_data(envelope.model_data)?;
        info!("Model loaded from {}", path.display());
        Ok(model)
    }
}
