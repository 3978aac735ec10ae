use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A bounded, tunable parameter of an optimization problem.
///
/// Optimizers never see physical values directly: every variable is mapped
/// onto `[0, 1]` with [`normalize`](Self::normalize) and mapped back with
/// [`denormalize`](Self::denormalize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDesignVariable")]
pub struct DesignVariable {
    name: String,
    lower_bound: f64,
    upper_bound: f64,
    initial_value: f64,
    units: Option<String>,
    description: Option<String>,
}

impl DesignVariable {
    /// Creates a variable whose initial value is the midpoint of its bounds.
    ///
    /// # Errors
    /// `Error::InvalidBounds` unless `lower_bound < upper_bound` and both are finite.
    pub fn new(name: impl Into<String>, lower_bound: f64, upper_bound: f64) -> Result<Self> {
        let name = name.into();
        if !(lower_bound.is_finite() && upper_bound.is_finite() && lower_bound < upper_bound) {
            return Err(Error::InvalidBounds {
                name,
                lower: lower_bound,
                upper: upper_bound,
            });
        }
        Ok(Self {
            name,
            lower_bound,
            upper_bound,
            initial_value: 0.5 * (lower_bound + upper_bound),
            units: None,
            description: None,
        })
    }

    /// Sets the initial value, clamped into the variable's bounds.
    pub fn with_initial_value(mut self, value: f64) -> Self {
        self.initial_value = value.max(self.lower_bound).min(self.upper_bound);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Maps a physical value onto `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.lower_bound) / (self.upper_bound - self.lower_bound)
    }

    /// Maps a normalized value back to the physical range.
    pub fn denormalize(&self, normalized: f64) -> f64 {
        self.lower_bound + normalized * (self.upper_bound - self.lower_bound)
    }
}

impl fmt::Display for DesignVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.units {
            Some(units) => write!(
                f,
                "{} [{}]: {} ({}, {})",
                self.name, units, self.initial_value, self.lower_bound, self.upper_bound
            ),
            None => write!(
                f,
                "{}: {} ({}, {})",
                self.name, self.initial_value, self.lower_bound, self.upper_bound
            ),
        }
    }
}

#[derive(Deserialize)]
struct RawDesignVariable {
    name: String,
    lower_bound: f64,
    upper_bound: f64,
    initial_value: Option<f64>,
    units: Option<String>,
    description: Option<String>,
}

impl TryFrom<RawDesignVariable> for DesignVariable {
    type Error = Error;

    fn try_from(raw: RawDesignVariable) -> Result<Self> {
        let mut var = DesignVariable::new(raw.name, raw.lower_bound, raw.upper_bound)?;
        if let Some(v) = raw.initial_value {
            var = var.with_initial_value(v);
        }
        var.units = raw.units;
        var.description = raw.description;
        Ok(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_value_defaults_to_midpoint() {
        let x = DesignVariable::new("x", -2.0, 6.0).unwrap();
        assert_relative_eq!(x.initial_value(), 2.0);
    }

    #[test]
    fn test_initial_value_is_clamped() {
        let x = DesignVariable::new("x", 0.0, 10.0)
            .unwrap()
            .with_initial_value(15.0);
        assert_eq!(x.initial_value(), 10.0);

        let y = DesignVariable::new("y", 0.0, 10.0)
            .unwrap()
            .with_initial_value(-3.0);
        assert_eq!(y.initial_value(), 0.0);
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(matches!(
            DesignVariable::new("x", 1.0, 1.0),
            Err(Error::InvalidBounds { .. })
        ));
        assert!(matches!(
            DesignVariable::new("x", 2.0, 1.0),
            Err(Error::InvalidBounds { .. })
        ));
        assert!(DesignVariable::new("x", f64::NEG_INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_normalize_round_trip_and_monotonic() {
        let var = DesignVariable::new("length", 0.25, 3.75).unwrap();
        let mut previous = f64::NEG_INFINITY;
        for i in 0..=50 {
            let v = 0.25 + 3.5 * (i as f64) / 50.0;
            let u = var.normalize(v);
            assert!((0.0..=1.0 + 1e-12).contains(&u));
            assert!(u > previous);
            previous = u;
            assert_relative_eq!(var.denormalize(u), v, epsilon = 1e-12);
        }
        assert_eq!(var.normalize(0.25), 0.0);
        assert_eq!(var.normalize(3.75), 1.0);
    }

    #[test]
    fn test_display() {
        let var = DesignVariable::new("throat", 0.1, 0.3)
            .unwrap()
            .with_units("m")
            .with_initial_value(0.2);
        assert_eq!(var.to_string(), "throat [m]: 0.2 (0.1, 0.3)");
    }

    #[test]
    fn test_deserialize_validates_and_clamps() {
        let var: DesignVariable =
            serde_json::from_str(r#"{"name":"x","lower_bound":0,"upper_bound":10,"initial_value":15}"#)
                .unwrap();
        assert_eq!(var.initial_value(), 10.0);

        let bad = serde_json::from_str::<DesignVariable>(
            r#"{"name":"x","lower_bound":5,"upper_bound":1}"#,
        );
        assert!(bad.is_err());
    }
}
