use log::{debug, info};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use super::{Dataset, Predictions, SurrogateModel, SurrogateState};
use crate::error::{Error, Result};

/// Log-space limits shared by the amplitude and the length scale.
const LOG_PARAM_BOUNDS: (f64, f64) = (-11.512_925_464_970_229, 11.512_925_464_970_229);
/// Extra length scales tried after the configured one.
const RESTART_LENGTH_SCALES: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 100.0];
const MAX_ASCENT_ITERATIONS: usize = 100;
const MAX_BACKTRACKS: usize = 30;
const ARMIJO_C1: f64 = 1e-4;
const GRADIENT_TOLERANCE: f64 = 1e-6;

/// Covariance function of a [`GaussianProcessSurrogate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpKernel {
    /// Squared exponential `σ² exp(-r² / 2ℓ²)`
    #[default]
    Rbf,
    /// Matérn with ν = 1.5, scaled by `σ²`
    Matern,
    /// Constant covariance `σ²`
    Constant,
    /// Pure noise: `noise_level` for identical points, 0 otherwise
    White,
}

impl GpKernel {
    /// Number of hyper-parameters fitted per output.
    fn n_free_params(self) -> usize {
        match self {
            GpKernel::Rbf | GpKernel::Matern => 2,
            GpKernel::Constant => 1,
            GpKernel::White => 0,
        }
    }
}

impl FromStr for GpKernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rbf" => Ok(GpKernel::Rbf),
            "matern" => Ok(GpKernel::Matern),
            "constant" => Ok(GpKernel::Constant),
            "white" => Ok(GpKernel::White),
            other => Err(Error::invalid_config(format!("Unknown kernel type: {other}"))),
        }
    }
}

impl fmt::Display for GpKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GpKernel::Rbf => "rbf",
            GpKernel::Matern => "matern",
            GpKernel::Constant => "constant",
            GpKernel::White => "white",
        })
    }
}

/// Kernel hyper-parameters of one output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpHyperParams {
    /// Signal variance `σ²` of the standardized output
    pub amplitude: f64,
    pub length_scale: f64,
}

/// Factorized process of one standardized output.
#[derive(Debug, Clone)]
struct OutputGp {
    params: GpHyperParams,
    cholesky: Cholesky<f64, Dyn>,
    /// `K⁻¹ y`
    alpha: DVector<f64>,
    log_marginal_likelihood: f64,
    y_mean: f64,
    y_std: f64,
}

#[derive(Debug, Clone)]
struct FittedGp {
    x: Array2<f64>,
    outputs: Vec<OutputGp>,
}

#[derive(Serialize, Deserialize)]
struct GpData {
    kernel_type: GpKernel,
    length_scale: f64,
    noise_level: f64,
    x_fit: Option<Array2<f64>>,
    y_fit: Option<Array2<f64>>,
    #[serde(default)]
    hyper_params: Option<Vec<GpHyperParams>>,
}

/// Gaussian process regression with per-output kernel fitting.
///
/// Each output gets an independent zero-mean process over its standardized
/// targets. Training maximizes the log marginal likelihood over the output's
/// amplitude and length scale, starting from the configured length scale and
/// restarting from a fixed log-spaced set. `noise_level` is added to the
/// diagonal of the training covariance and is not fitted.
#[derive(Debug, Clone)]
pub struct GaussianProcessSurrogate {
    state: SurrogateState,
    kernel: GpKernel,
    length_scale: f64,
    noise_level: f64,
    /// Targets of the last fit, kept so the model can be rebuilt on load
    y_fit: Option<Array2<f64>>,
    fitted: Option<FittedGp>,
}

impl Default for GaussianProcessSurrogate {
    fn default() -> Self {
        Self::new(GpKernel::Rbf)
    }
}

fn pairwise_distances(a: &Array2<f64>, b: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), b.nrows(), |i, j| {
        a.row(i)
            .iter()
            .zip(b.row(j).iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    })
}

fn to_log(params: GpHyperParams, n_free: usize) -> Vec<f64> {
    [params.amplitude.ln(), params.length_scale.ln()][..n_free].to_vec()
}

fn clamp_log(theta: &mut [f64]) {
    for t in theta {
        *t = t.clamp(LOG_PARAM_BOUNDS.0, LOG_PARAM_BOUNDS.1);
    }
}

impl GaussianProcessSurrogate {
    pub fn new(kernel: GpKernel) -> Self {
        Self {
            state: SurrogateState::new("Gaussian Process Surrogate"),
            kernel,
            length_scale: 1.0,
            noise_level: 1e-10,
            y_fit: None,
            fitted: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.state.name = name.into();
        self
    }

    /// Sets the starting length scale of the fit and the diagonal noise.
    pub fn with_params(mut self, length_scale: f64, noise_level: f64) -> Self {
        self.length_scale = length_scale;
        self.noise_level = noise_level;
        self
    }

    pub fn kernel(&self) -> GpKernel {
        self.kernel
    }

    /// Fitted hyper-parameters, one entry per output.
    pub fn hyper_params(&self) -> Result<Vec<GpHyperParams>> {
        Ok(self.fitted()?.outputs.iter().map(|o| o.params).collect())
    }

    /// Log marginal likelihood of each output's standardized targets.
    pub fn log_marginal_likelihoods(&self) -> Result<Vec<f64>> {
        Ok(self
            .fitted()?
            .outputs
            .iter()
            .map(|o| o.log_marginal_likelihood)
            .collect())
    }

    fn kernel_value(&self, params: GpHyperParams, r: f64, same_point: bool) -> f64 {
        let s = r / params.length_scale;
        match self.kernel {
            GpKernel::Rbf => params.amplitude * (-0.5 * s * s).exp(),
            GpKernel::Matern => {
                let t = 3f64.sqrt() * s;
                params.amplitude * (1.0 + t) * (-t).exp()
            }
            GpKernel::Constant => params.amplitude,
            GpKernel::White => {
                if same_point {
                    self.noise_level
                } else {
                    0.0
                }
            }
        }
    }

    /// Derivative of the kernel with respect to `ln ℓ`.
    fn length_scale_derivative(&self, params: GpHyperParams, r: f64) -> f64 {
        let s = r / params.length_scale;
        match self.kernel {
            GpKernel::Rbf => params.amplitude * (-0.5 * s * s).exp() * s * s,
            GpKernel::Matern => params.amplitude * 3.0 * s * s * (-(3f64.sqrt() * s)).exp(),
            GpKernel::Constant | GpKernel::White => 0.0,
        }
    }

    /// Diagonal term added to the training covariance. The white kernel
    /// already carries `noise_level` on its diagonal.
    fn nugget(&self) -> f64 {
        match self.kernel {
            GpKernel::White => 0.0,
            _ => self.noise_level,
        }
    }

    fn prior_variance(&self, params: GpHyperParams) -> f64 {
        self.kernel_value(params, 0.0, true)
    }

    fn params_from_log(&self, theta: &[f64]) -> GpHyperParams {
        GpHyperParams {
            amplitude: theta.first().map_or(1.0, |t| t.exp()),
            length_scale: theta.get(1).map_or(self.length_scale, |t| t.exp()),
        }
    }

    /// Factorizes the training covariance for `params` and evaluates
    /// `-½ yᵀα - Σ ln Lᵢᵢ - n/2 ln 2π`. `None` when the matrix is not
    /// positive definite.
    fn factorize(
        &self,
        distances: &DMatrix<f64>,
        y: &DVector<f64>,
        params: GpHyperParams,
    ) -> Option<(Cholesky<f64, Dyn>, DVector<f64>, f64)> {
        let n = distances.nrows();
        let nugget = self.nugget();
        let k = DMatrix::from_fn(n, n, |i, j| {
            self.kernel_value(params, distances[(i, j)], i == j)
                + if i == j { nugget } else { 0.0 }
        });
        let cholesky = Cholesky::new(k)?;
        let alpha = cholesky.solve(y);
        let log_det_half: f64 = cholesky.l_dirty().diagonal().iter().map(|v| v.ln()).sum();
        let value = -0.5 * y.dot(&alpha) - log_det_half - 0.5 * n as f64 * (2.0 * PI).ln();
        value.is_finite().then_some((cholesky, alpha, value))
    }

    /// Gradient of the log marginal likelihood in `(ln σ², ln ℓ)`,
    /// `½ tr((ααᵀ - K⁻¹) ∂K/∂θ)`, truncated to the fitted parameters.
    fn log_likelihood_gradient(
        &self,
        distances: &DMatrix<f64>,
        params: GpHyperParams,
        cholesky: &Cholesky<f64, Dyn>,
        alpha: &DVector<f64>,
    ) -> Vec<f64> {
        let n_free = self.kernel.n_free_params();
        let k_inv = cholesky.inverse();
        let mut gradient = vec![0.0; n_free];
        let n = distances.nrows();
        for i in 0..n {
            for j in 0..n {
                let w = alpha[i] * alpha[j] - k_inv[(i, j)];
                let r = distances[(i, j)];
                if n_free > 0 {
                    gradient[0] += w * self.kernel_value(params, r, i == j);
                }
                if n_free > 1 {
                    gradient[1] += w * self.length_scale_derivative(params, r);
                }
            }
        }
        gradient.iter_mut().for_each(|g| *g *= 0.5);
        gradient
    }

    /// Projected gradient ascent on the log marginal likelihood from `theta`.
    fn ascend(
        &self,
        distances: &DMatrix<f64>,
        y: &DVector<f64>,
        mut theta: Vec<f64>,
    ) -> Option<(GpHyperParams, f64)> {
        clamp_log(&mut theta);
        let mut params = self.params_from_log(&theta);
        let (mut cholesky, mut alpha, mut value) = self.factorize(distances, y, params)?;
        let mut step: f64 = 1.0;

        for _ in 0..MAX_ASCENT_ITERATIONS {
            let gradient = self.log_likelihood_gradient(distances, params, &cholesky, &alpha);
            let projected: Vec<f64> = theta
                .iter()
                .zip(&gradient)
                .map(|(t, g)| (t + g).clamp(LOG_PARAM_BOUNDS.0, LOG_PARAM_BOUNDS.1) - t)
                .collect();
            let g_max = projected.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if g_max < GRADIENT_TOLERANCE {
                break;
            }

            // one unit in log space is a factor of e per iteration at most
            let mut t = step.min(1.0 / g_max);
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let mut candidate: Vec<f64> =
                    theta.iter().zip(&gradient).map(|(th, g)| th + t * g).collect();
                clamp_log(&mut candidate);
                let moved: f64 = candidate
                    .iter()
                    .zip(&theta)
                    .zip(&gradient)
                    .map(|((c, th), g)| (c - th) * g)
                    .sum();
                let candidate_params = self.params_from_log(&candidate);
                if let Some((c, a, v)) = self.factorize(distances, y, candidate_params) {
                    if v >= value + ARMIJO_C1 * moved {
                        accepted = Some((candidate, candidate_params, c, a, v));
                        break;
                    }
                }
                t *= 0.5;
            }
            let Some((next_theta, next_params, c, a, v)) = accepted else {
                break;
            };
            let gain = v - value;
            theta = next_theta;
            params = next_params;
            cholesky = c;
            alpha = a;
            value = v;
            step = 2.0 * t;
            if gain <= 1e-10 * value.abs().max(1.0) {
                break;
            }
        }
        Some((params, value))
    }

    /// Best hyper-parameters over the configured start and the restarts.
    fn optimize_params(&self, distances: &DMatrix<f64>, y: &DVector<f64>) -> Option<GpHyperParams> {
        let n_free = self.kernel.n_free_params();
        let initial = GpHyperParams {
            amplitude: 1.0,
            length_scale: self.length_scale,
        };
        if n_free == 0 {
            return Some(initial);
        }
        let mut starts = vec![to_log(initial, n_free)];
        if n_free > 1 {
            starts.extend(RESTART_LENGTH_SCALES.iter().map(|&length_scale| {
                to_log(
                    GpHyperParams {
                        amplitude: 1.0,
                        length_scale,
                    },
                    n_free,
                )
            }));
        }

        let mut best: Option<(GpHyperParams, f64)> = None;
        for start in starts {
            match self.ascend(distances, y, start) {
                Some((params, value)) => {
                    debug!(
                        "GP restart reached log-likelihood {value:.6e} at amplitude={:.4e}, length_scale={:.4e}",
                        params.amplitude, params.length_scale
                    );
                    if best.map_or(true, |(_, v)| value > v) {
                        best = Some((params, value));
                    }
                }
                None => debug!("GP restart skipped: kernel matrix is not positive definite"),
            }
        }
        best.map(|(params, _)| params)
    }

    /// Standardizes every output and factorizes its process. Hyper-parameters
    /// are fitted unless `params` supplies one set per output.
    fn build(
        &self,
        x_norm: &Array2<f64>,
        y: &Array2<f64>,
        params: Option<&[GpHyperParams]>,
    ) -> Result<FittedGp> {
        if self.length_scale <= 0.0 {
            return Err(Error::invalid_config("length_scale must be positive"));
        }
        if self.noise_level < 0.0 {
            return Err(Error::invalid_config("noise_level must be non-negative"));
        }
        if let Some(params) = params {
            if params.len() != y.ncols() {
                return Err(Error::DimensionMismatch {
                    expected: y.ncols(),
                    found: params.len(),
                });
            }
        }
        let distances = pairwise_distances(x_norm, x_norm);

        let mut outputs = Vec::with_capacity(y.ncols());
        for (j, column) in y.axis_iter(Axis(1)).enumerate() {
            let y_mean = column.mean().unwrap_or(0.0);
            let std = column.std(0.0);
            let y_std = if std > 0.0 { std } else { 1.0 };
            let targets = DVector::from_iterator(column.len(), column.iter().map(|v| (v - y_mean) / y_std));

            let output_params = match params {
                Some(params) => params[j],
                None => self.optimize_params(&distances, &targets).ok_or_else(|| {
                    Error::numerical("kernel matrix is not positive definite; increase noise_level")
                })?,
            };
            let (cholesky, alpha, log_marginal_likelihood) = self
                .factorize(&distances, &targets, output_params)
                .ok_or_else(|| {
                    Error::numerical("kernel matrix is not positive definite; increase noise_level")
                })?;
            debug!(
                "GP output {j}: amplitude={:.4e}, length_scale={:.4e}, log-likelihood={:.6e}",
                output_params.amplitude, output_params.length_scale, log_marginal_likelihood
            );
            outputs.push(OutputGp {
                params: output_params,
                cholesky,
                alpha,
                log_marginal_likelihood,
                y_mean,
                y_std,
            });
        }
        Ok(FittedGp {
            x: x_norm.clone(),
            outputs,
        })
    }

    fn fitted(&self) -> Result<&FittedGp> {
        self.fitted.as_ref().ok_or(Error::NotTrained)
    }

    fn cross_covariance(&self, distances: &DMatrix<f64>, params: GpHyperParams) -> DMatrix<f64> {
        distances.map(|r| self.kernel_value(params, r, false))
    }

    fn mean_and_std(&self, x_norm: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        let distances = pairwise_distances(x_norm, &fitted.x);
        let mut means = Array2::zeros((x_norm.nrows(), fitted.outputs.len()));
        let mut stds = Array2::zeros((x_norm.nrows(), fitted.outputs.len()));

        for (j, output) in fitted.outputs.iter().enumerate() {
            let k_star = self.cross_covariance(&distances, output.params);
            let mean = &k_star * &output.alpha;
            let v = output
                .cholesky
                .l()
                .solve_lower_triangular(&k_star.transpose())
                .ok_or_else(|| Error::numerical("triangular solve failed"))?;
            let prior = self.prior_variance(output.params);
            for (i, column) in v.column_iter().enumerate() {
                let variance = (prior - column.norm_squared()).max(0.0);
                means[(i, j)] = mean[i] * output.y_std + output.y_mean;
                stds[(i, j)] = variance.sqrt() * output.y_std;
            }
        }
        Ok((means, stds))
    }

    /// Predictive mean and standard deviation, each shaped like the query.
    pub fn predict_with_std(&self, x: &Dataset) -> Result<(Predictions, Predictions)> {
        if !self.is_trained() {
            return Err(Error::NotTrained);
        }
        let x_array = self.state.input_array(x)?;
        let (mean, std) = self.mean_and_std(&self.state.normalize_inputs(&x_array))?;
        let std = match self.state.wrap_predictions(x, std) {
            Predictions::Named(cols) => Predictions::Named(
                cols.into_iter()
                    .map(|(name, c)| (format!("{name}_std"), c))
                    .collect(),
            ),
            array => array,
        };
        Ok((self.state.wrap_predictions(x, mean), std))
    }
}

impl SurrogateModel for GaussianProcessSurrogate {
    fn type_name(&self) -> &'static str {
        "GaussianProcessSurrogate"
    }

    fn state(&self) -> &SurrogateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SurrogateState {
        &mut self.state
    }

    fn fit(&mut self, x_norm: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        self.fitted = Some(self.build(x_norm, y, None)?);
        self.y_fit = Some(y.clone());
        info!("Trained Gaussian Process model with kernel={}", self.kernel);
        Ok(())
    }

    fn predict_normalized(&self, x_norm: &Array2<f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        let distances = pairwise_distances(x_norm, &fitted.x);
        let mut predictions = Array2::zeros((x_norm.nrows(), fitted.outputs.len()));
        for (j, output) in fitted.outputs.iter().enumerate() {
            let mean = self.cross_covariance(&distances, output.params) * &output.alpha;
            for (i, m) in mean.iter().enumerate() {
                predictions[(i, j)] = m * output.y_std + output.y_mean;
            }
        }
        Ok(predictions)
    }

    fn model_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(GpData {
            kernel_type: self.kernel,
            length_scale: self.length_scale,
            noise_level: self.noise_level,
            x_fit: self.fitted.as_ref().map(|f| f.x.clone()),
            y_fit: self.y_fit.clone(),
            hyper_params: self.hyper_params().ok(),
        })?)
    }

    /// Rebuilds the factorization from the stored hyper-parameters, or
    /// refits them when an older file has none.
    fn restore_model_data(&mut self, data: serde_json::Value) -> Result<()> {
        let data: GpData = serde_json::from_value(data)?;
        self.kernel = data.kernel_type;
        self.length_scale = data.length_scale;
        self.noise_level = data.noise_level;
        self.fitted = match (&data.x_fit, &data.y_fit) {
            (Some(x), Some(y)) => Some(self.build(x, y, data.hyper_params.as_deref())?),
            _ => None,
        };
        self.y_fit = data.y_fit;
        Ok(())
    }
}
