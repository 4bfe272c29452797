use crate::evolution::objective::{dominates, OptimizationDirection};
use rayon::prelude::*;

/// Finds the indices of non-dominated objective vectors within a slice.
///
/// A vector is non-dominated if no other vector in the slice dominates it
/// under `senses`. Indices are returned in input order.
///
/// # Complexity
/// O(N^2) comparisons, parallelized over the outer loop.
pub fn find_non_dominated_indices<T>(objectives: &[T], senses: &[OptimizationDirection]) -> Vec<usize>
where
    T: AsRef<[f64]> + Sync,
{
    if objectives.is_empty() {
        return vec![];
    }

    objectives
        .par_iter()
        .enumerate()
        .filter(|(i, candidate)| {
            // sequential inner loop, the outer one is already parallel
            !objectives
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && dominates(other.as_ref(), candidate.as_ref(), senses))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Peels `objectives` into successive non-dominated fronts.
///
/// `fronts[0]` is the Pareto front of the whole set, `fronts[1]` the front of
/// what remains once `fronts[0]` is removed, and so on. Every input index
/// appears in exactly one front; within a front indices keep input order.
pub fn build_pareto_fronts<T>(objectives: &[T], senses: &[OptimizationDirection]) -> Vec<Vec<usize>>
where
    T: AsRef<[f64]> + Sync,
{
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut remaining: Vec<usize> = (0..objectives.len()).collect();

    while !remaining.is_empty() {
        let remaining_objectives: Vec<&[f64]> =
            remaining.iter().map(|&idx| objectives[idx].as_ref()).collect();
        let non_dominated = find_non_dominated_indices(&remaining_objectives, senses);

        // A finite set always has a non-dominated member, since dominance is
        // irreflexive and transitive.
        debug_assert!(!non_dominated.is_empty());

        let front: Vec<usize> = non_dominated.iter().map(|&pos| remaining[pos]).collect();
        let mut in_front = vec![false; remaining.len()];
        for &pos in non_dominated.iter() {
            in_front[pos] = true;
        }
        remaining = remaining
            .iter()
            .zip(in_front)
            .filter(|(_, taken)| !taken)
            .map(|(&idx, _)| idx)
            .collect();

        fronts.push(front);
    }

    fronts
}

/// Computes the crowding distance of every member of `front`.
///
/// The result is aligned with `front`. For each objective the extremes get an
/// infinite distance and interior members accumulate the normalized gap
/// between their two neighbours.
pub fn crowding_distances<T: AsRef<[f64]>>(objectives: &[T], front: &[usize]) -> Vec<f64> {
    let mut distances = vec![0.0; front.len()];
    if front.is_empty() {
        return distances;
    }

    let number_of_objectives = objectives[front[0]].as_ref().len();
    let value = |position: usize, objective_idx: usize| objectives[front[position]].as_ref()[objective_idx];

    for objective_idx in 0..number_of_objectives {
        // positions into `front`, sorted by the current objective
        let mut order: Vec<usize> = (0..front.len()).collect();
        order.sort_by(|&a, &b| value(a, objective_idx).total_cmp(&value(b, objective_idx)));

        let first = order[0];
        let last = order[order.len() - 1];
        distances[first] = f64::INFINITY;
        distances[last] = f64::INFINITY;

        let range = value(last, objective_idx) - value(first, objective_idx);
        if range > 0.0 {
            for window in order.windows(3) {
                let (previous, current, next) = (window[0], window[1], window[2]);
                distances[current] +=
                    (value(next, objective_idx) - value(previous, objective_idx)) / range;
            }
        }
    }

    distances
}

/// Orders `objectives` best-first for truncation.
///
/// Members of a better front always come first; within a front, the less
/// crowded (larger crowding distance) come first. Ties keep input order.
pub fn rank_by_crowding<T>(objectives: &[T], senses: &[OptimizationDirection]) -> Vec<usize>
where
    T: AsRef<[f64]> + Sync,
{
    build_pareto_fronts(objectives, senses)
        .into_iter()
        .flat_map(|front| {
            let distances = crowding_distances(objectives, &front);
            let mut ranked: Vec<(usize, f64)> = front.into_iter().zip(distances).collect();
            // descending distance; infinities first
            ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));
            ranked.into_iter().map(|(idx, _)| idx)
        })
        .collect()
}
