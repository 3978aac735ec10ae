//! Optimization problem definition.
//!
//! An [`OptimizationProblem`] gathers design variables, objectives,
//! constraints and an optional analysis function. Optimizers only ever talk
//! to it through normalized vectors in `[0, 1]^n`, whose column order is the
//! insertion order of the design variables.
//!
//! # Examples
//!
//! ```
//! use mdo::problem::{Constraint, DesignVariable, OptimizationProblem};
//!
//! let mut problem = OptimizationProblem::new("Simple Quadratic Problem");
//! problem.add_design_variable(DesignVariable::new("x1", -5.0, 5.0).unwrap());
//! problem.add_design_variable(DesignVariable::new("x2", -5.0, 5.0).unwrap());
//! problem.add_objective("f", |x| x["x1"].powi(2) + x["x2"].powi(2), true);
//! problem.add_constraint(
//!     Constraint::inequality("g1", |x| x["x1"] + x["x2"], Some(1.0), None).unwrap(),
//! );
//!
//! let result = problem.evaluate(&[0.5, 0.5][..]).unwrap();
//! assert_eq!(result.objective("f"), Some(0.0));
//! assert_eq!(result.total_violation(), 1.0);
//! ```

pub mod constraint;
pub mod labeled;
pub mod variable;

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, Error, Result};

pub use constraint::{Constraint, ConstraintKind, DEFAULT_TOLERANCE};
pub use labeled::{LabeledVector, Labels};
pub use variable::DesignVariable;

/// Physical design variable values keyed by variable name.
pub type DesignPoint = LabeledVector;

/// Output of an analysis function: unprefixed objective/constraint name → value.
pub type AnalysisResult = std::result::Result<HashMap<String, f64>, BoxError>;

type ObjectiveFn = Box<dyn Fn(&DesignPoint) -> f64>;
type AnalysisFn = Box<dyn Fn(&DesignPoint) -> AnalysisResult>;

/// Prefix of objective keys in an [`Evaluation`].
pub const OBJECTIVE_PREFIX: &str = "obj_";
/// Prefix of constraint keys in an [`Evaluation`].
pub const CONSTRAINT_PREFIX: &str = "con_";

struct Objective {
    name: String,
    // Already sign-flipped for maximized objectives.
    func: ObjectiveFn,
    minimize: bool,
}

/// The point handed to [`OptimizationProblem::evaluate`].
#[derive(Debug, Clone, Copy)]
pub enum EvalInput<'a> {
    /// Normalized values in `[0, 1]`, one per design variable in column order.
    Normalized(&'a [f64]),
    /// Physical values keyed by variable name.
    Physical(&'a DesignPoint),
}

impl<'a> From<&'a [f64]> for EvalInput<'a> {
    fn from(x: &'a [f64]) -> Self {
        EvalInput::Normalized(x)
    }
}

impl<'a> From<&'a Vec<f64>> for EvalInput<'a> {
    fn from(x: &'a Vec<f64>) -> Self {
        EvalInput::Normalized(x.as_slice())
    }
}

impl<'a> From<&'a DesignPoint> for EvalInput<'a> {
    fn from(x: &'a DesignPoint) -> Self {
        EvalInput::Physical(x)
    }
}

/// Objective and constraint values at one design point.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    values: BTreeMap<String, f64>,
    objectives: Vec<f64>,
    constraints: Vec<f64>,
    violation: f64,
}

impl Evaluation {
    /// Looks up a prefixed key such as `obj_drag` or `con_mass`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn objective(&self, name: &str) -> Option<f64> {
        self.get(&format!("{OBJECTIVE_PREFIX}{name}"))
    }

    pub fn constraint(&self, name: &str) -> Option<f64> {
        self.get(&format!("{CONSTRAINT_PREFIX}{name}"))
    }

    /// Objective values in the problem's objective order (minimization sense).
    pub fn objectives(&self) -> &[f64] {
        &self.objectives
    }

    /// Raw constraint values in the problem's constraint order.
    pub fn constraint_values(&self) -> &[f64] {
        &self.constraints
    }

    /// Sum of all constraint violations; zero for a feasible point.
    pub fn total_violation(&self) -> f64 {
        self.violation
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

impl Serialize for Evaluation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// Variables, objectives and constraints of a design optimization problem.
pub struct OptimizationProblem {
    name: String,
    design_variables: Vec<DesignVariable>,
    labels: Arc<Labels>,
    objectives: Vec<Objective>,
    constraints: Vec<Constraint>,
    analysis_function: Option<AnalysisFn>,
}

impl OptimizationProblem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            design_variables: Vec::new(),
            labels: Arc::new(Labels::default()),
            objectives: Vec::new(),
            constraints: Vec::new(),
            analysis_function: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a design variable; a variable with the same name is replaced in place.
    pub fn add_design_variable(&mut self, variable: DesignVariable) {
        match self
            .design_variables
            .iter_mut()
            .find(|v| v.name() == variable.name())
        {
            Some(existing) => *existing = variable,
            None => self.design_variables.push(variable),
        }
        let names = self.design_variables.iter().map(|v| v.name().to_string());
        // Names are unique by construction.
        self.labels = Arc::new(Labels::new(names).unwrap_or_default());
    }

    /// Adds an objective. Maximized objectives are stored negated so every
    /// optimizer can minimize.
    pub fn add_objective<F>(&mut self, name: impl Into<String>, func: F, minimize: bool)
    where
        F: Fn(&DesignPoint) -> f64 + 'static,
    {
        let func: ObjectiveFn = if minimize {
            Box::new(func)
        } else {
            Box::new(move |x| -func(x))
        };
        let objective = Objective {
            name: name.into(),
            func,
            minimize,
        };
        match self.objectives.iter_mut().find(|o| o.name == objective.name) {
            Some(existing) => *existing = objective,
            None => self.objectives.push(objective),
        }
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        match self
            .constraints
            .iter_mut()
            .find(|c| c.name() == constraint.name())
        {
            Some(existing) => *existing = constraint,
            None => self.constraints.push(constraint),
        }
    }

    /// Sets a function computing many outputs from one (expensive) analysis.
    ///
    /// Its result is consulted first for every objective and constraint name;
    /// names it does not provide fall back to their own functions.
    pub fn set_analysis_function<F>(&mut self, func: F)
    where
        F: Fn(&DesignPoint) -> AnalysisResult + 'static,
    {
        self.analysis_function = Some(Box::new(func));
    }

    pub fn design_variables(&self) -> &[DesignVariable] {
        &self.design_variables
    }

    pub fn variable_labels(&self) -> &Arc<Labels> {
        &self.labels
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective_names(&self) -> Vec<&str> {
        self.objectives.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn is_minimized(&self, objective: &str) -> Option<bool> {
        self.objectives
            .iter()
            .find(|o| o.name == objective)
            .map(|o| o.minimize)
    }

    pub fn n_variables(&self) -> usize {
        self.design_variables.len()
    }

    pub fn n_objectives(&self) -> usize {
        self.objectives.len()
    }

    pub fn n_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Converts a normalized vector to physical values.
    pub fn denormalize(&self, x: &[f64]) -> Result<DesignPoint> {
        self.check_dimension(x.len())?;
        let values = self
            .design_variables
            .iter()
            .zip(x)
            .map(|(var, &u)| var.denormalize(u))
            .collect();
        LabeledVector::new(Arc::clone(&self.labels), values)
    }

    /// Converts physical values to a normalized vector in column order.
    pub fn normalize(&self, point: &DesignPoint) -> Result<Vec<f64>> {
        self.design_variables
            .iter()
            .map(|var| point.value(var.name()).map(|v| var.normalize(v)))
            .collect()
    }

    /// Evaluates all objectives and constraints.
    ///
    /// # Errors
    /// `Error::DimensionMismatch` for a normalized vector of the wrong length,
    /// `Error::Analysis` when the analysis function fails.
    pub fn evaluate<'a>(&self, x: impl Into<EvalInput<'a>>) -> Result<Evaluation> {
        let owned;
        let point = match x.into() {
            EvalInput::Normalized(u) => {
                owned = self.denormalize(u)?;
                &owned
            }
            EvalInput::Physical(p) => p,
        };

        let analysis = match &self.analysis_function {
            Some(f) => Some(f(point).map_err(Error::Analysis)?),
            None => None,
        };
        let provided = |name: &str| analysis.as_ref().and_then(|r| r.get(name).copied());

        let mut values = BTreeMap::new();

        let mut objectives = Vec::with_capacity(self.objectives.len());
        for objective in &self.objectives {
            let value = match provided(&objective.name) {
                Some(v) if objective.minimize => v,
                Some(v) => -v,
                None => (objective.func)(point),
            };
            values.insert(format!("{OBJECTIVE_PREFIX}{}", objective.name), value);
            objectives.push(value);
        }

        let mut constraints = Vec::with_capacity(self.constraints.len());
        let mut violation = 0.0;
        for constraint in &self.constraints {
            let value = provided(constraint.name()).unwrap_or_else(|| constraint.evaluate(point));
            violation += constraint.violation_of(value);
            values.insert(format!("{CONSTRAINT_PREFIX}{}", constraint.name()), value);
            constraints.push(value);
        }

        Ok(Evaluation {
            values,
            objectives,
            constraints,
            violation,
        })
    }

    pub fn evaluate_normalized(&self, x: &[f64]) -> Result<Evaluation> {
        self.evaluate(EvalInput::Normalized(x))
    }

    pub fn evaluate_point(&self, point: &DesignPoint) -> Result<Evaluation> {
        self.evaluate(EvalInput::Physical(point))
    }

    /// Normalized initial values of every design variable.
    pub fn get_initial_point(&self) -> Vec<f64> {
        self.design_variables
            .iter()
            .map(|var| var.normalize(var.initial_value()))
            .collect()
    }

    /// Bounds of the normalized search space, always `[0, 1]` per variable.
    pub fn get_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.design_variables.len();
        (vec![0.0; n], vec![1.0; n])
    }

    pub fn get_constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        self.constraints.iter().map(Constraint::bounds).unzip()
    }

    fn check_dimension(&self, found: usize) -> Result<()> {
        if found != self.design_variables.len() {
            return Err(Error::DimensionMismatch {
                expected: self.design_variables.len(),
                found,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for OptimizationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationProblem")
            .field("name", &self.name)
            .field("design_variables", &self.design_variables)
            .field("objectives", &self.objective_names())
            .field("constraints", &self.constraints)
            .field("analysis_function", &self.analysis_function.is_some())
            .finish()
    }
}

impl fmt::Display for OptimizationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Problem: {}", self.name)?;
        writeln!(f, "\nDesign Variables:")?;
        for var in &self.design_variables {
            writeln!(f, "  {var}")?;
        }
        writeln!(f, "\nObjectives:")?;
        for objective in &self.objectives {
            writeln!(f, "  {}", objective.name)?;
        }
        write!(f, "\nConstraints:")?;
        for constraint in &self.constraints {
            write!(f, "\n  {constraint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn quadratic_problem() -> OptimizationProblem {
        let mut problem = OptimizationProblem::new("quadratic");
        problem.add_design_variable(DesignVariable::new("x1", -5.0, 5.0).unwrap());
        problem.add_design_variable(
            DesignVariable::new("x2", 0.0, 10.0)
                .unwrap()
                .with_initial_value(2.5),
        );
        problem.add_objective("f", |x| x["x1"].powi(2) + x["x2"].powi(2), true);
        problem.add_constraint(
            Constraint::inequality("g1", |x| x["x1"] + x["x2"], Some(1.0), None).unwrap(),
        );
        problem
    }

    #[test]
    fn test_normalized_and_physical_inputs_agree() {
        let problem = quadratic_problem();
        let from_normalized = problem.evaluate(&[0.6, 0.3][..]).unwrap();
        let point = LabeledVector::from_pairs([("x1", 1.0), ("x2", 3.0)]).unwrap();
        let from_point = problem.evaluate(&point).unwrap();

        assert_relative_eq!(from_normalized.objective("f").unwrap(), 10.0, epsilon = 1e-12);
        assert_relative_eq!(from_point.objective("f").unwrap(), 10.0, epsilon = 1e-12);
        assert_relative_eq!(from_normalized.constraint("g1").unwrap(), 4.0, epsilon = 1e-12);
        assert_eq!(from_point.total_violation(), 0.0);
    }

    #[test]
    fn test_keys_are_prefixed() {
        let problem = quadratic_problem();
        let result = problem.evaluate_normalized(&[0.5, 0.0]).unwrap();
        let keys: Vec<_> = result.as_map().keys().cloned().collect();
        assert_eq!(keys, vec!["con_g1".to_string(), "obj_f".to_string()]);
        assert_eq!(result.total_violation(), 1.0);
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let problem = quadratic_problem();
        assert!(matches!(
            problem.evaluate(&[0.5][..]),
            Err(Error::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_maximized_objective_is_negated() {
        let mut problem = OptimizationProblem::new("max");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 2.0).unwrap());
        problem.add_objective("thrust", |x| x["x"], false);
        let result = problem.evaluate_normalized(&[0.75]).unwrap();
        assert_eq!(result.objective("thrust"), Some(-1.5));
        assert_eq!(problem.is_minimized("thrust"), Some(false));
    }

    #[test]
    fn test_analysis_function_takes_precedence_with_fallback() {
        let calls = Rc::new(Cell::new(0));
        let mut problem = OptimizationProblem::new("analysis");
        problem.add_design_variable(DesignVariable::new("x", 0.0, 1.0).unwrap());
        problem.add_objective("drag", |_| 100.0, true);
        problem.add_objective("lift", |x| 2.0 * x["x"], false);
        problem.add_objective("mass", |x| x["x"] + 1.0, true);
        problem.add_constraint(Constraint::inequality("p", |_| 0.0, None, Some(1.0)).unwrap());

        let counter = Rc::clone(&calls);
        problem.set_analysis_function(move |x| {
            counter.set(counter.get() + 1);
            let mut out = HashMap::new();
            out.insert("drag".to_string(), 3.0 * x["x"]);
            out.insert("lift".to_string(), 4.0);
            out.insert("p".to_string(), 2.5);
            Ok(out)
        });

        let result = problem.evaluate_normalized(&[0.5]).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(result.objective("drag"), Some(1.5));
        assert_eq!(result.objective("lift"), Some(-4.0));
        assert_eq!(result.objective("mass"), Some(1.5));
        assert_eq!(result.constraint("p"), Some(2.5));
        assert_eq!(result.total_violation(), 1.5);
        assert_eq!(result.objectives(), &[1.5, -4.0, 1.5]);
    }

    #[test]
    fn test_analysis_failure_propagates() {
        let mut problem = quadratic_problem();
        problem.set_analysis_function(|_| Err("solver diverged".into()));
        let err = problem.evaluate_normalized(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
        assert!(err.to_string().contains("solver diverged"));
    }

    #[test]
    fn test_bounds_and_initial_point() {
        let problem = quadratic_problem();
        assert_eq!(problem.get_bounds(), (vec![0.0, 0.0], vec![1.0, 1.0]));
        assert_eq!(problem.get_initial_point(), vec![0.5, 0.25]);
        let (lb, ub) = problem.get_constraint_bounds();
        assert_eq!(lb, vec![1.0]);
        assert_eq!(ub, vec![f64::INFINITY]);
    }

    #[test]
    fn test_replacing_variable_keeps_column() {
        let mut problem = quadratic_problem();
        problem.add_design_variable(DesignVariable::new("x1", 0.0, 1.0).unwrap());
        assert_eq!(problem.n_variables(), 2);
        assert_eq!(problem.variable_labels().names()[0], "x1");
        assert_eq!(problem.design_variables()[0].upper_bound(), 1.0);
    }

    #[test]
    fn test_normalize_point_round_trip() {
        let problem = quadratic_problem();
        let point = problem.denormalize(&[0.1, 0.9]).unwrap();
        let back = problem.normalize(&point).unwrap();
        assert_relative_eq!(back[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(back[1], 0.9, epsilon = 1e-12);
    }
}
