pub mod consts;
pub mod evolution;
pub mod instance;
pub mod output;
pub mod portfolio;
pub mod sampling;

pub use evolution::archive::{Archive, Individual};
pub use evolution::engine::{EngineConfig, RandomKeyEngine, SearchEngine};
pub use evolution::objective::{dominates, OptimizationDirection, Senses};
pub use evolution::run::{RunConfig, RunContext, RunReport};
pub use evolution::EvolutionError;
pub use instance::Instance;
pub use portfolio::Portfolio;
