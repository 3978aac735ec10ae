use chrono::{DateTime, Local};
use log::info;
use ndarray::Array2;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};
use crate::problem::DesignPoint;

/// Default tolerance for dominance comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Returns true if `a` Pareto-dominates `b` (all objectives minimized).
///
/// `a` must be no worse than `b` in every objective, within `tolerance`,
/// and strictly better by more than `tolerance` in at least one.
///
/// # Examples
///
/// ```
/// use mdo::multi_objective::dominates;
///
/// assert!(dominates(&[1.0, 2.0], &[1.0, 3.0], 1e-6));
/// assert!(!dominates(&[1.0, 3.0], &[2.0, 2.0], 1e-6));
/// assert!(!dominates(&[1.0, 2.0], &[1.0, 2.0], 1e-6));
/// ```
pub fn dominates<T: Float>(a: &[T], b: &[T], tolerance: T) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let no_worse = a.iter().zip(b).all(|(&ai, &bi)| ai <= bi + tolerance);
    no_worse && a.iter().zip(b).any(|(&ai, &bi)| ai < bi - tolerance)
}

/// One solution recorded by a [`ParetoFront`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoPoint {
    pub objectives: Vec<f64>,
    pub variables: DesignPoint,
}

/// Running set of mutually non-dominated solutions.
///
/// Every point ever offered is kept: non-dominated ones in the front, the
/// rest in a separate dominated list. Members are demoted when a later point
/// dominates them.
#[derive(Debug, Clone)]
pub struct ParetoFront {
    tolerance: f64,
    points: Vec<ParetoPoint>,
    dominated_points: Vec<ParetoPoint>,
}

impl Default for ParetoFront {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

#[derive(Serialize, Deserialize)]
struct ExportedFront {
    pareto_points: Vec<ParetoPoint>,
    dominated_points: Vec<ParetoPoint>,
    metadata: ExportMetadata,
}

#[derive(Serialize, Deserialize)]
struct ExportMetadata {
    timestamp: DateTime<Local>,
    n_pareto_points: usize,
    n_dominated_points: usize,
}

impl ParetoFront {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            points: Vec::new(),
            dominated_points: Vec::new(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Offers a point to the front.
    ///
    /// Returns `false` (and files the point as dominated) when an existing
    /// member dominates it. Otherwise the point joins the front, members it
    /// dominates are demoted, and `true` is returned.
    pub fn add_point(&mut self, objectives: Vec<f64>, variables: DesignPoint) -> bool {
        let point = ParetoPoint {
            objectives,
            variables,
        };

        if self
            .points
            .iter()
            .any(|p| dominates(&p.objectives, &point.objectives, self.tolerance))
        {
            self.dominated_points.push(point);
            return false;
        }

        let (demoted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.points)
            .into_iter()
            .partition(|p| dominates(&point.objectives, &p.objectives, self.tolerance));
        self.points = kept;
        self.points.push(point);
        self.dominated_points.extend(demoted);
        true
    }

    pub fn get_pareto_points(&self) -> &[ParetoPoint] {
        &self.points
    }

    pub fn get_dominated_points(&self) -> &[ParetoPoint] {
        &self.dominated_points
    }

    /// Front members followed by dominated points.
    pub fn get_all_points(&self) -> impl Iterator<Item = &ParetoPoint> + '_ {
        self.points.iter().chain(self.dominated_points.iter())
    }

    /// Number of non-dominated points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Selected objective columns of the front, one row per member.
    ///
    /// Intended for handing data to an external plotting tool.
    ///
    /// # Errors
    /// `Error::InvalidInput` if an index is out of range for the stored objectives.
    pub fn objective_columns(&self, indices: &[usize]) -> Result<Array2<f64>> {
        let mut out = Array2::zeros((self.points.len(), indices.len()));
        for (row, point) in self.points.iter().enumerate() {
            for (col, &k) in indices.iter().enumerate() {
                out[[row, col]] = *point.objectives.get(k).ok_or_else(|| {
                    Error::invalid_input(format!(
                        "objective index {k} out of range for {} objectives",
                        point.objectives.len()
                    ))
                })?;
            }
        }
        Ok(out)
    }

    /// Writes the front as pretty-printed JSON, creating parent directories.
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let exported = ExportedFront {
            pareto_points: self.points.clone(),
            dominated_points: self.dominated_points.clone(),
            metadata: ExportMetadata {
                timestamp: Local::now(),
                n_pareto_points: self.points.len(),
                n_dominated_points: self.dominated_points.len(),
            },
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &exported)?;
        info!("Pareto front data exported to {}", path.display());
        Ok(())
    }

    /// Reads a front written by [`export`](Self::export).
    ///
    /// Points are restored as stored, without re-checking dominance.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data: ExportedFront = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let front = Self {
            tolerance: DEFAULT_TOLERANCE,
            points: data.pareto_points,
            dominated_points: data.dominated_points,
        };
        info!(
            "Loaded Pareto front with {} points from {}",
            front.points.len(),
            path.display()
        );
        Ok(front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LabeledVector;

    fn vars(x: f64) -> DesignPoint {
        LabeledVector::from_pairs([("x", x)]).unwrap()
    }

    #[test]
    fn test_dominance_is_antisymmetric() {
        let grid: Vec<[f64; 2]> = (0..6)
            .flat_map(|i| (0..6).map(move |j| [i as f64 * 0.5, j as f64 * 0.5]))
            .collect();
        for a in &grid {
            for b in &grid {
                assert!(!(dominates(a, b, 1e-6) && dominates(b, a, 1e-6)));
            }
        }
    }

    #[test]
    fn test_dominance_respects_tolerance() {
        assert!(!dominates(&[1.0, 1.0], &[1.0 + 1e-7, 1.0], 1e-6));
        assert!(dominates(&[1.0, 1.0], &[1.0 + 1e-3, 1.0], 1e-6));
        assert!(dominates(&[1.0 + 5e-7, 0.0], &[1.0, 1.0], 1e-6));
    }

    #[test]
    fn test_add_point_scenario() {
        let mut front = ParetoFront::default();
        for (i, obj) in [[1.0, 5.0], [2.0, 3.0], [3.0, 2.0], [5.0, 1.0]].iter().enumerate() {
            assert!(front.add_point(obj.to_vec(), vars(i as f64)));
        }
        assert!(!front.add_point(vec![2.5, 3.5], vars(9.0)));

        assert_eq!(front.len(), 4);
        assert_eq!(front.get_dominated_points().len(), 1);
        assert_eq!(front.get_dominated_points()[0].objectives, vec![2.5, 3.5]);
        assert_eq!(front.get_all_points().count(), 5);
    }

    #[test]
    fn test_dominating_point_demotes_members() {
        let mut front = ParetoFront::default();
        front.add_point(vec![2.0, 2.0], vars(0.0));
        front.add_point(vec![3.0, 1.0], vars(1.0));
        front.add_point(vec![1.0, 4.0], vars(2.0));
        assert!(front.add_point(vec![1.5, 1.5], vars(3.0)));

        let objectives: Vec<_> = front
            .get_pareto_points()
            .iter()
            .map(|p| p.objectives.clone())
            .collect();
        assert_eq!(objectives, vec![vec![3.0, 1.0], vec![1.0, 4.0], vec![1.5, 1.5]]);
        assert_eq!(front.get_dominated_points()[0].objectives, vec![2.0, 2.0]);
    }

    #[test]
    fn test_front_stays_mutually_non_dominated() {
        let mut front = ParetoFront::default();
        let mut state: u64 = 7;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        for i in 0..300 {
            let objectives = vec![next(), next(), next()];
            front.add_point(objectives, vars(i as f64));
        }
        let points = front.get_pareto_points();
        for a in points {
            for b in points {
                assert!(!dominates(&a.objectives, &b.objectives, front.tolerance()));
            }
        }
        assert_eq!(points.len() + front.get_dominated_points().len(), 300);
    }

    #[test]
    fn test_objective_columns() {
        let mut front = ParetoFront::default();
        front.add_point(vec![1.0, 5.0, 0.0], vars(0.0));
        front.add_point(vec![5.0, 1.0, 0.0], vars(1.0));
        let cols = front.objective_columns(&[1, 0]).unwrap();
        assert_eq!(cols, ndarray::arr2(&[[5.0, 1.0], [1.0, 5.0]]));
        assert!(matches!(
            front.objective_columns(&[3]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_export_and_load_preserve_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("front.json");

        let mut front = ParetoFront::default();
        front.add_point(
            vec![1.0, 2.0],
            LabeledVector::from_pairs([("b", 0.25), ("a", 0.75)]).unwrap(),
        );
        front.add_point(vec![2.0, 1.0], vars(0.5));
        front.add_point(vec![3.0, 3.0], vars(0.1));
        front.export(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["metadata"]["n_pareto_points"], 2);
        assert_eq!(raw["metadata"]["n_dominated_points"], 1);

        let loaded = ParetoFront::load(&path).unwrap();
        assert_eq!(loaded.get_pareto_points(), front.get_pareto_points());
        assert_eq!(loaded.get_dominated_points(), front.get_dominated_points());
        assert_eq!(
            loaded.get_pareto_points()[0].variables.names(),
            &["b".to_string(), "a".to_string()]
        );
    }
}
