use crate::evolution::objective::{dominates, objectives_match, OptimizationDirection};
use crate::evolution::pareto::{find_non_dominated_indices, rank_by_crowding};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use tracing::debug;

/// A candidate point: its objective vector and the decision vector
/// (normalized portfolio weights) that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub objectives: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Individual {
    pub fn new(objectives: Vec<f64>, weights: Vec<f64>) -> Self {
        Individual {
            objectives,
            weights,
        }
    }
}

impl AsRef<[f64]> for Individual {
    fn as_ref(&self) -> &[f64] {
        &self.objectives
    }
}

/// The incumbent set of a run: mutually non-dominated, duplicate-free and
/// bounded by an optional capacity.
///
/// Only [`Archive::merge`] mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Archive {
    individuals: Vec<Individual>,
    max_size: Option<usize>,
}

impl Archive {
    pub fn new(max_size: Option<usize>) -> Self {
        Archive {
            individuals: Vec::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn objectives(&self) -> Vec<Vec<f64>> {
        self.individuals
            .iter()
            .map(|individual| individual.objectives.clone())
            .collect()
    }

    pub fn into_individuals(self) -> Vec<Individual> {
        self.individuals
    }

    /// Merges `batch` into the archive and returns whether it changed.
    ///
    /// Only the non-dominated members of the batch are considered, in batch
    /// order. Each one evicts the archive members it dominates and is then
    /// appended unless a surviving member dominates or equals it. If the
    /// archive ends up over capacity it is truncated by crowding rank.
    ///
    /// # Panics
    /// If an objective vector's length differs from `senses`.
    pub fn merge(&mut self, batch: &[Individual], senses: &[OptimizationDirection]) -> bool {
        let changed = merge_individuals(&mut self.individuals, batch, senses);
        match self.max_size {
            Some(max_size) => truncate_by_crowding(&mut self.individuals, senses, max_size) || changed,
            None => changed,
        }
    }
}

impl Deref for Archive {
    type Target = [Individual];

    fn deref(&self) -> &Self::Target {
        &self.individuals
    }
}

/// Merges `batch` into `archive` without any capacity limit.
///
/// See [`Archive::merge`].
pub fn merge_individuals(
    archive: &mut Vec<Individual>,
    batch: &[Individual],
    senses: &[OptimizationDirection],
) -> bool {
    if batch.is_empty() {
        return false;
    }
    for individual in batch.iter() {
        check_objective_length(individual, senses);
    }

    let mut changed = false;
    for idx in find_non_dominated_indices(batch, senses) {
        let candidate = &batch[idx];
        let mut rejected = false;
        let mut position = 0;

        while position < archive.len() {
            let incumbent = &archive[position];
            if dominates(&candidate.objectives, &incumbent.objectives, senses) {
                archive.remove(position);
                continue;
            }
            if dominates(&incumbent.objectives, &candidate.objectives, senses)
                || objectives_match(&incumbent.objectives, &candidate.objectives)
            {
                rejected = true;
                break;
            }
            position += 1;
        }

        if !rejected {
            archive.push(candidate.clone());
            changed = true;
        }
    }

    changed
}

/// Keeps the `max_size` best members of `individuals` by crowding rank.
///
/// Returns `true` if anything was dropped.
pub fn truncate_by_crowding(
    individuals: &mut Vec<Individual>,
    senses: &[OptimizationDirection],
    max_size: usize,
) -> bool {
    if individuals.len() <= max_size {
        return false;
    }

    let ranking = rank_by_crowding(individuals.as_slice(), senses);
    let mut slots: Vec<Option<Individual>> = individuals.drain(..).map(Some).collect();
    individuals.extend(
        ranking
            .into_iter()
            .take(max_size)
            .filter_map(|idx| slots[idx].take()),
    );

    debug!(
        dropped = slots.iter().filter(|slot| slot.is_some()).count(),
        kept = individuals.len(),
        "archive truncated by crowding"
    );
    true
}

fn check_objective_length(individual: &Individual, senses: &[OptimizationDirection]) {
    assert_eq!(
        individual.objectives.len(),
        senses.len(),
        "objective vector has {} components but {} senses were configured",
        individual.objectives.len(),
        senses.len()
    );
}
