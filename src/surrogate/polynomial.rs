use log::info;
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{SurrogateModel, SurrogateState};
use crate::error::{Error, Result};

/// Singular values below this are treated as zero by the pseudo-inverse.
const PINV_EPSILON: f64 = 1e-12;

/// Least-squares polynomial regression.
///
/// Degree 1 fits the raw inputs without an intercept. Higher degrees use an
/// intercept, the linear terms, and for every power `d` from 2 up: the pure
/// powers `x_i^d` followed by the pairwise products `x_i^a x_j^(d-a)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialSurrogate {
    state: SurrogateState,
    degree: usize,
    coefficients: Option<Array2<f64>>,
}

#[derive(Serialize, Deserialize)]
struct PolynomialData {
    degree: usize,
    coefficients: Option<Array2<f64>>,
}

impl Default for PolynomialSurrogate {
    fn default() -> Self {
        Self::new(2)
    }
}

impl PolynomialSurrogate {
    pub fn new(degree: usize) -> Self {
        Self {
            state: SurrogateState::new("Polynomial Surrogate"),
            degree,
            coefficients: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.state.name = name.into();
        self
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Fitted coefficients, one column per output.
    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    /// Expands `x` into the polynomial feature matrix.
    pub fn features(&self, x: &Array2<f64>) -> Array2<f64> {
        if self.degree <= 1 {
            return x.clone();
        }
        let n_inputs = x.ncols();
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; x.nrows()]];
        columns.extend(x.axis_iter(Axis(1)).map(|c| c.to_vec()));
        for d in 2..=self.degree as i32 {
            for i in 0..n_inputs {
                columns.push(x.column(i).mapv(|v| v.powi(d)).to_vec());
            }
            for i in 0..n_inputs {
                for j in i + 1..n_inputs {
                    for a in 1..d {
                        columns.push(
                            x.column(i)
                                .iter()
                                .zip(x.column(j))
                                .map(|(xi, xj)| xi.powi(a) * xj.powi(d - a))
                                .collect(),
                        );
                    }
                }
            }
        }
        Array2::from_shape_fn((x.nrows(), columns.len()), |(r, c)| columns[c][r])
    }
}

impl SurrogateModel for PolynomialSurrogate {
    fn type_name(&self) -> &'static str {
        "PolynomialSurrogate"
    }

    fn state(&self) -> &SurrogateState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SurrogateState {
        &mut self.state
    }

    fn fit(&mut self, x_norm: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if self.degree == 0 {
            return Err(Error::invalid_config("polynomial degree must be at least 1"));
        }
        let phi = self.features(x_norm);
        let design = DMatrix::from_fn(phi.nrows(), phi.ncols(), |i, j| phi[(i, j)]);
        let pinv = design
            .pseudo_inverse(PINV_EPSILON)
            .map_err(|e| Error::numerical(format!("pseudo-inverse failed: {e}")))?;
        let targets = DMatrix::from_fn(y.nrows(), y.ncols(), |i, j| y[(i, j)]);
        let solution = pinv * targets;
        self.coefficients = Some(Array2::from_shape_fn(
            (solution.nrows(), solution.ncols()),
            |(i, j)| solution[(i, j)],
        ));
        info!("Trained polynomial surrogate model of degree {}", self.degree);
        Ok(())
    }

    fn predict_normalized(&self, x_norm: &Array2<f64>) -> Result<Array2<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(Error::NotTrained)?;
        let phi = self.features(x_norm);
        if phi.ncols() != coefficients.nrows() {
            return Err(Error::DimensionMismatch {
                expected: coefficients.nrows(),
                found: phi.ncols(),
            });
        }
        Ok(phi.dot(coefficients))
    }

    fn model_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(PolynomialData {
            degree: self.degree,
            coefficients: self.coefficients.clone(),
        })?)
    }

    fn restore_model_data(&mut self, data: serde_json::Value) -> Result<()> {
        let data: PolynomialData = serde_json::from_value(data)?;
        self.degree = data.degree;
        self.coefficients = data.coefficients;
        Ok(())
    }
}
