//! Non-dominated sorting and crowding distance.

use ndarray::ArrayView2;
use num_traits::Float;
use std::cmp::Ordering;

use super::pareto::dominates;

/// Splits individuals (rows of `objectives`) into successive Pareto fronts.
///
/// Front 0 holds the individuals nobody dominates; front `k + 1` holds the
/// ones left undominated once fronts `0..=k` are removed. Comparison is exact
/// (no tolerance). Runs in O(m·n²) for n individuals and m objectives.
///
/// # Examples
///
/// ```
/// use mdo::multi_objective::non_dominated_sort;
/// use ndarray::arr2;
///
/// let objectives = arr2(&[[1.0, 4.0], [2.0, 2.0], [3.0, 3.0], [4.0, 1.0]]);
/// let fronts = non_dominated_sort(objectives.view());
/// assert_eq!(fronts, vec![vec![0, 1, 3], vec![2]]);
/// ```
pub fn non_dominated_sort<T: Float>(objectives: ArrayView2<T>) -> Vec<Vec<usize>> {
    let n = objectives.nrows();
    let rows: Vec<Vec<T>> = objectives.outer_iter().map(|r| r.to_vec()).collect();

    let mut domination_count = vec![0usize; n];
    let mut dominated_sets: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut current = Vec::new();

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if dominates(&rows[i], &rows[j], T::zero()) {
                dominated_sets[i].push(j);
            } else if dominates(&rows[j], &rows[i], T::zero()) {
                domination_count[i] += 1;
            }
        }
        if domination_count[i] == 0 {
            current.push(i);
        }
    }

    let mut fronts = Vec::new();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_sets[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(current);
        current = next;
    }
    fronts
}

/// Crowding distance of each member of `front`, in the order of `front`.
///
/// Fronts of one or two members are all `+∞`. Otherwise, per objective, the
/// two extreme members get `+∞` and interior members accumulate the gap
/// between their neighbours divided by the objective's range on the front.
/// An objective with zero range adds nothing to interior members.
pub fn crowding_distance<T: Float>(objectives: ArrayView2<T>, front: &[usize]) -> Vec<T> {
    let n = front.len();
    if n <= 2 {
        return vec![T::infinity(); n];
    }

    let mut distances = vec![T::zero(); n];
    let mut order: Vec<usize> = (0..n).collect();

    for m in 0..objectives.ncols() {
        let value = |k: usize| objectives[[front[k], m]];
        order.sort_by(|&a, &b| value(a).partial_cmp(&value(b)).unwrap_or(Ordering::Equal));

        let first = order[0];
        let last = order[n - 1];
        distances[first] = T::infinity();
        distances[last] = T::infinity();

        let range = value(last) - value(first);
        if range > T::zero() {
            for w in order.windows(3) {
                distances[w[1]] = distances[w[1]] + (value(w[2]) - value(w[0])) / range;
            }
        }
    }
    distances
}

/// Front index of every individual, given the fronts from [`non_dominated_sort`].
pub fn ranks(fronts: &[Vec<usize>], n: usize) -> Vec<usize> {
    let mut ranks = vec![0; n];
    for (rank, front) in fronts.iter().enumerate() {
        for &i in front {
            ranks[i] = rank;
        }
    }
    ranks
}
