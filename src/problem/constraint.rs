use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::problem::DesignPoint;

/// Default tolerance used by [`Constraint::is_satisfied`].
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// `g(x) = 0`
    Equality,
    /// `lower <= g(x) <= upper`, at least one side present.
    Inequality,
}

impl FromStr for ConstraintKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "equality" => Ok(ConstraintKind::Equality),
            "inequality" => Ok(ConstraintKind::Inequality),
            _ => Err(Error::InvalidConstraintType(s.to_string())),
        }
    }
}

type ConstraintFn = Box<dyn Fn(&DesignPoint) -> f64>;

/// A feasibility rule evaluated on physical design variable values.
pub struct Constraint {
    name: String,
    func: ConstraintFn,
    kind: ConstraintKind,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    units: Option<String>,
    description: Option<String>,
}

impl Constraint {
    /// Creates a constraint.
    ///
    /// Bounds are ignored for equality constraints, which always target zero.
    ///
    /// # Errors
    /// `Error::UnboundedInequality` for an inequality with neither bound.
    pub fn new<F>(
        name: impl Into<String>,
        func: F,
        kind: ConstraintKind,
        lower_bound: Option<f64>,
        upper_bound: Option<f64>,
    ) -> Result<Self>
    where
        F: Fn(&DesignPoint) -> f64 + 'static,
    {
        let name = name.into();
        if kind == ConstraintKind::Inequality && lower_bound.is_none() && upper_bound.is_none() {
            return Err(Error::UnboundedInequality(name));
        }
        Ok(Self {
            name,
            func: Box::new(func),
            kind,
            lower_bound,
            upper_bound,
            units: None,
            description: None,
        })
    }

    pub fn equality<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&DesignPoint) -> f64 + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            kind: ConstraintKind::Equality,
            lower_bound: None,
            upper_bound: None,
            units: None,
            description: None,
        }
    }

    /// Shorthand for a [`ConstraintKind::Inequality`] constraint.
    pub fn inequality<F>(
        name: impl Into<String>,
        func: F,
        lower_bound: Option<f64>,
        upper_bound: Option<f64>,
    ) -> Result<Self>
    where
        F: Fn(&DesignPoint) -> f64 + 'static,
    {
        Self::new(name, func, ConstraintKind::Inequality, lower_bound, upper_bound)
    }

    /// Creates a constraint from a textual type (`"equality"` / `"inequality"`).
    pub fn with_type<F>(
        name: impl Into<String>,
        func: F,
        constraint_type: &str,
        lower_bound: Option<f64>,
        upper_bound: Option<f64>,
    ) -> Result<Self>
    where
        F: Fn(&DesignPoint) -> f64 + 'static,
    {
        let kind = constraint_type.parse()?;
        Self::new(name, func, kind, lower_bound, upper_bound)
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

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn lower_bound(&self) -> Option<f64> {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> Option<f64> {
        self.upper_bound
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn evaluate(&self, x: &DesignPoint) -> f64 {
        (self.func)(x)
    }

    pub fn is_satisfied(&self, x: &DesignPoint, tolerance: f64) -> bool {
        self.is_satisfied_by(self.evaluate(x), tolerance)
    }

    pub fn constraint_violation(&self, x: &DesignPoint) -> f64 {
        self.violation_of(self.evaluate(x))
    }

    /// Checks an already computed constraint value.
    pub fn is_satisfied_by(&self, value: f64, tolerance: f64) -> bool {
        self.violation_of(value) <= tolerance
    }

    /// Violation magnitude of an already computed constraint value; zero when satisfied.
    pub fn violation_of(&self, value: f64) -> f64 {
        match self.kind {
            ConstraintKind::Equality => value.abs(),
            ConstraintKind::Inequality => {
                let mut violation: f64 = 0.0;
                if let Some(lb) = self.lower_bound {
                    if value < lb {
                        violation = violation.max(lb - value);
                    }
                }
                if let Some(ub) = self.upper_bound {
                    if value > ub {
                        violation = violation.max(value - ub);
                    }
                }
                violation
            }
        }
    }

    /// `(lower, upper)` with equality as `(0, 0)` and a missing side as ∓∞.
    pub fn bounds(&self) -> (f64, f64) {
        match self.kind {
            ConstraintKind::Equality => (0.0, 0.0),
            ConstraintKind::Inequality => (
                self.lower_bound.unwrap_or(f64::NEG_INFINITY),
                self.upper_bound.unwrap_or(f64::INFINITY),
            ),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("lower_bound", &self.lower_bound)
            .field("upper_bound", &self.upper_bound)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.lower_bound, self.upper_bound) {
            (ConstraintKind::Equality, _, _) => write!(f, "{} = 0", self.name),
            (_, Some(lb), Some(ub)) => write!(f, "{} <= {} <= {}", lb, self.name, ub),
            (_, Some(lb), None) => write!(f, "{} <= {}", lb, self.name),
            (_, None, Some(ub)) => write!(f, "{} <= {}", self.name, ub),
            (_, None, None) => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LabeledVector;

    fn point(x: f64) -> DesignPoint {
        LabeledVector::from_pairs([("x", x)]).unwrap()
    }

    fn identity(p: &DesignPoint) -> f64 {
        p["x"]
    }

    #[test]
    fn test_parse_constraint_type() {
        assert_eq!("Equality".parse::<ConstraintKind>().unwrap(), ConstraintKind::Equality);
        assert_eq!("INEQUALITY".parse::<ConstraintKind>().unwrap(), ConstraintKind::Inequality);
        assert!(matches!(
            Constraint::with_type("c", identity, "between", Some(0.0), None),
            Err(Error::InvalidConstraintType(_))
        ));
    }

    #[test]
    fn test_inequality_requires_a_bound() {
        assert!(matches!(
            Constraint::inequality("c", identity, None, None),
            Err(Error::UnboundedInequality(name)) if name == "c"
        ));
    }

    #[test]
    fn test_equality_violation() {
        let c = Constraint::equality("c", identity);
        assert_eq!(c.constraint_violation(&point(0.0)), 0.0);
        assert_eq!(c.constraint_violation(&point(-0.5)), 0.5);
        assert!(c.is_satisfied(&point(5e-7), DEFAULT_TOLERANCE));
        assert!(!c.is_satisfied(&point(1e-3), DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_two_sided_inequality_violation() {
        let c = Constraint::inequality("c", identity, Some(1.0), Some(2.0)).unwrap();
        assert_eq!(c.constraint_violation(&point(1.5)), 0.0);
        assert_eq!(c.constraint_violation(&point(0.25)), 0.75);
        assert_eq!(c.constraint_violation(&point(3.0)), 1.0);
    }

    #[test]
    fn test_violation_agrees_with_satisfaction() {
        let constraints = vec![
            Constraint::equality("eq", identity),
            Constraint::inequality("lower", identity, Some(0.0), None).unwrap(),
            Constraint::inequality("upper", identity, None, Some(0.5)).unwrap(),
            Constraint::inequality("both", identity, Some(-0.5), Some(0.5)).unwrap(),
        ];
        for c in &constraints {
            for i in -40..=40 {
                let p = point(i as f64 * 0.05);
                let satisfied = c.is_satisfied(&p, DEFAULT_TOLERANCE);
                let violation = c.constraint_violation(&p);
                assert!(violation >= 0.0);
                assert_eq!(
                    satisfied,
                    violation <= DEFAULT_TOLERANCE,
                    "{} at {}",
                    c,
                    p["x"]
                );
            }
        }
    }

    #[test]
    fn test_display() {
        let c = Constraint::inequality("mass", identity, None, Some(3.0)).unwrap();
        assert_eq!(c.to_string(), "mass <= 3");
        let c = Constraint::inequality("mass", identity, Some(1.0), Some(3.0)).unwrap();
        assert_eq!(c.to_string(), "1 <= mass <= 3");
        assert_eq!(Constraint::equality("g", identity).to_string(), "g = 0");
    }
}
