use crate::instance::InstanceError;
use thiserror::Error;

pub mod archive;
pub mod decoder;
pub mod engine;
pub mod objective;
pub mod pareto;
pub mod run;
pub mod schedule;
pub mod termination;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Expected {expected} optimization senses, found {found}.")]
    InvalidSenses { expected: usize, found: usize },
    #[error("Decision vectors must have at least one component.")]
    EmptyDecisionVector,
    #[error("Expected keys with {expected} components, found {found}.")]
    KeySizeMismatch { expected: usize, found: usize },
    #[error("The number of decode threads must be at least one.")]
    BadThreadCount,
    #[error("A run needs a time limit or an iterations limit.")]
    MissingTerminationCriterion,
    #[error("Invalid run parameter: {0}")]
    BadRunParameter(String),
    #[error("Invalid engine parameter: {0}")]
    BadEngineParameter(String),
    #[error(transparent)]
    Instance(#[from] InstanceError),
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}
