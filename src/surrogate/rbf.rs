use log::info;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{SurrogateModel, SurrogateState};
use crate::error::{Error, Result};

/// Radial basis function of the scaled distance `εr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RbfKernel {
    /// `exp(-(εr)²)`
    #[default]
    Gaussian,
    /// `sqrt(1 + (εr)²)`
    Multiquadric,
    /// `1 / sqrt(1 + (εr)²)`
    InverseMultiquadric,
    /// `r`
    Linear,
}

impl RbfKernel {
    pub fn evaluate(self, r: f64, epsilon: f64) -> f64 {
        let er = epsilon * r;
        match self {
            RbfKernel::Gaussian => (-(er * er)).exp(),
            RbfKernel::Multiquadric => (1.0 + er * er).sqrt(),
            RbfKernel::InverseMultiquadric => 1.0 / (1.0 + er * er).sqrt(),
            RbfKernel::Linear => r,
        }
    }
}

impl FromStr for RbfKernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gaussian" => Ok(RbfKernel::Gaussian),
            "multiquadric" => Ok(RbfKernel::Multiquadric),
            "inverse_multiquadric" => Ok(RbfKernel::InverseMultiquadric),
            "linear" => Ok(RbfKernel::Linear),
            other => Err(Error::invalid_config(format!("Unknown kernel type: {other}"))),
        }
    }
}

impl fmt::Display for RbfKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RbfKernel::Gaussian => "gaussian",
            RbfKernel::Multiquadric => "multiquadric",
            RbfKernel::InverseMultiquadric => "inverse_multiquadric",
            RbfKernel::Linear => "linear",
        })
    }
}

fn distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Radial basis function interpolation with one kernel centred on every
/// training point.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialBasisSurrogate {
    state: SurrogateState,
    kernel: RbfKernel,
    epsilon: f64,
    regularization: f64,
    centers: Option<Array2<f64>>,
    weights: Option<Array2<f64>>,
}

#[derive(Serialize, Deserialize)]
struct RbfData {
    kernel: RbfKernel,
    epsilon: f64,
    regularization: f64,
    centers: Option<Array2<f64>>,
    weights: Option<Array2<f64>>,
}

impl Default for RadialBasisSurrogate {
    fn default() -> Self {
        Self::new(RbfKernel::Gaussian)
    }
}

impl RadialBasisSurrogate {
    pub fn new(kernel: RbfKernel) -> Self {
        Self {
            state: SurrogateState::new("RBF Surrogate"),
            kernel,
            epsilon: 1.0,
            regularization: 1e-10,
            centers: None,
            weights: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.state.name = name.into();
        self
    }

    /// Overrides the kernel width and the diagonal regularization used by
    /// the next training run.
    pub fn with_params(mut self, epsilon: f64, regularization: f64) -> Self {
        self.epsilon = epsilon;
        self.regularization = regularization;
        self
    }

    pub fn kernel(&self) -> RbfKernel {
        self.kernel
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn regularization(&self) -> f64 {
        self.regularization
    }

    /// Kernel values between every row of `a` and every row of `b`.
    fn kernel_matrix(&self, a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
        Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
            self.kernel.evaluate(distance(a.row(i), b.row(j)), self.epsilon)
        })
    }
}

impl SurrogateModel for RadialBasisSurrogate {
    fn type_name(&self) -> &'static str {
        "RadialBasisSurrogate"
    }

    fn state(&self) -> &SurrogateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SurrogateState {
        &mut self.state
    }

    fn fit(&mut self, x_norm: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        let n = x_norm.nrows();
        let k = self.kernel_matrix(x_norm, x_norm);
        let system = DMatrix::from_fn(n, n, |i, j| {
            k[(i, j)] + if i == j { self.regularization } else { 0.0 }
        });
        let lu = system.lu();
        let mut weights = Array2::zeros((n, y.ncols()));
        for (output, column) in y.columns().into_iter().enumerate() {
            let rhs = DVector::from_iterator(n, column.iter().copied());
            let solution = lu.solve(&rhs).ok_or_else(|| {
                Error::numerical("RBF interpolation matrix is singular; increase the regularization")
            })?;
            for (i, w) in solution.iter().enumerate() {
                weights[(i, output)] = *w;
            }
        }
        self.centers = Some(x_norm.clone());
        self.weights = Some(weights);
        info!(
            "Trained RBF surrogate model with kernel={}, epsilon={}",
            self.kernel, self.epsilon
        );
        Ok(())
    }

    fn predict_normalized(&self, x_norm: &Array2<f64>) -> Result<Array2<f64>> {
        let (Some(centers), Some(weights)) = (&self.centers, &self.weights) else {
            return Err(Error::NotTrained);
        };
        Ok(self.kernel_matrix(x_norm, centers).dot(weights))
    }

    fn model_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(RbfData {
            kernel: self.kernel,
            epsilon: self.epsilon,
            regularization: self.regularization,
            centers: self.centers.clone(),
            weights: self.weights.clone(),
        })?)
    }

    fn restore_model_data(&mut self, data: serde_json::Value) -> Result<()> {
        let data: RbfData = serde_json::from_value(data)?;
        self.kernel = data.kernel;
        self.epsilon = data.epsilon;
        self.regularization = data.regularization;
        self.centers = data.centers;
        self.weights = data.weights;
        Ok(())
    }
}
