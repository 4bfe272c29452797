use crate::evolution::archive::{Archive, Individual};
use crate::evolution::decoder::Decoder;
use crate::evolution::engine::{EngineConfig, EngineContext, SearchEngine};
use crate::evolution::objective::Senses;
use crate::evolution::schedule::{SnapshotSchedule, SnapshotTrigger};
use crate::evolution::termination::{Clock, Stopwatch, TerminationCriteria};
use crate::evolution::{default_max_concurrency, EvolutionError};
use crate::instance::Instance;
use crate::portfolio::Portfolio;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

fn default_seed() -> u64 {
    thread_rng().gen()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub time_limit: Option<f64>,
    #[serde(default)]
    pub iterations_limit: Option<u64>,
    /// Archive capacity.
    #[serde(default)]
    pub max_num_solutions: Option<usize>,
    /// Snapshot quota: the number of captures over the whole run.
    #[serde(default)]
    pub max_num_snapshots: usize,
    #[serde(default = "default_max_concurrency")]
    pub num_threads: usize,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: default_seed(),
            time_limit: None,
            iterations_limit: None,
            max_num_solutions: None,
            max_num_snapshots: 0,
            num_threads: default_max_concurrency(),
            engine: EngineConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn criteria(&self) -> TerminationCriteria {
        TerminationCriteria::new(self.time_limit, self.iterations_limit)
    }

    pub fn validate(&self) -> Result<(), EvolutionError> {
        if !self.criteria().is_bounded() {
            return Err(EvolutionError::MissingTerminationCriterion);
        }
        if let Some(time_limit) = self.time_limit {
            if !time_limit.is_finite() || time_limit <= 0.0 {
                return Err(EvolutionError::BadRunParameter(format!(
                    "time_limit must be a positive number of seconds, got {}",
                    time_limit
                )));
            }
        }
        if self.num_threads == 0 {
            return Err(EvolutionError::BadThreadCount);
        }
        if self.max_num_solutions == Some(0) {
            return Err(EvolutionError::BadRunParameter(
                "max_num_solutions must be at least one".into(),
            ));
        }
        if self.max_num_snapshots == 1 {
            warn!("A snapshot quota of 1 only captures the final state of the run.");
        }
        self.engine.validate()
    }
}

/// An immutable record stamped with the iteration and elapsed time at which
/// it was captured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub iteration: u64,
    pub elapsed_seconds: f64,
    pub payload: T,
}

/// Every snapshot series of a run, one entry per capture.
///
/// Elite counts are only recorded for engines that report them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshots {
    pub best_solutions: Vec<Snapshot<Vec<Vec<f64>>>>,
    pub num_non_dominated: Vec<Snapshot<Vec<usize>>>,
    pub num_fronts: Vec<Snapshot<Vec<usize>>>,
    pub num_elites: Vec<Snapshot<Vec<usize>>>,
    pub populations: Vec<Snapshot<Vec<Vec<Vec<f64>>>>>,
}

impl Snapshots {
    /// Number of captures.
    pub fn len(&self) -> usize {
        self.best_solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_solutions.is_empty()
    }
}

/// Everything a run owns: RNG, decode buffers, archive, snapshot schedule
/// and the snapshots themselves.
#[derive(Debug)]
pub struct RunContext {
    config: RunConfig,
    rng: StdRng,
    decoder: Decoder,
    senses: Senses,
    archive: Archive,
    schedule: SnapshotSchedule,
    snapshots: Snapshots,
    engine_name: String,
    num_iterations: u64,
    solving_time: f64,
    last_update_iteration: u64,
    last_update_time: f64,
    large_offset: u64,
}

impl RunContext {
    pub fn new(instance: Instance, config: RunConfig) -> Result<Self, EvolutionError> {
        config.validate()?;
        let senses = instance.senses().clone();
        let decoder = Decoder::new(instance, config.num_threads)?;
        Ok(RunContext {
            rng: StdRng::seed_from_u64(config.seed),
            decoder,
            senses,
            archive: Archive::new(config.max_num_solutions),
            schedule: SnapshotSchedule::new(config.max_num_snapshots, &config.criteria()),
            snapshots: Snapshots::default(),
            engine_name: config.engine.name().to_string(),
            num_iterations: 0,
            solving_time: 0.0,
            last_update_iteration: 0,
            last_update_time: 0.0,
            large_offset: 0,
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn instance(&self) -> &Instance {
        self.decoder.instance()
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn snapshots(&self) -> &Snapshots {
        &self.snapshots
    }

    pub fn schedule(&self) -> &SnapshotSchedule {
        &self.schedule
    }

    pub fn num_iterations(&self) -> u64 {
        self.num_iterations
    }

    pub fn solving_time(&self) -> f64 {
        self.solving_time
    }

    /// The archive as portfolios, in archive order.
    pub fn best_solutions(&self) -> Vec<Portfolio> {
        self.archive
            .iter()
            .map(|individual| Portfolio {
                weights: individual.weights.clone(),
                objectives: individual.objectives.clone(),
            })
            .collect()
    }

    /// Runs `engine` against the wall clock until a budget is exhausted.
    pub fn solve<E: SearchEngine + ?Sized>(&mut self, engine: &mut E) -> Result<RunReport, EvolutionError> {
        self.solve_with_clock(engine, &Stopwatch::start())
    }

    /// Runs `engine` until a budget is exhausted, reading time from `clock`.
    ///
    /// Any state from a previous solve is discarded first, including the
    /// random stream, so every solve starts from `config.seed`.
    pub fn solve_with_clock<E, C>(&mut self, engine: &mut E, clock: &C) -> Result<RunReport, EvolutionError>
    where
        E: SearchEngine + ?Sized,
        C: Clock + ?Sized,
    {
        self.reset();
        self.engine_name = engine.name().to_string();
        if self.engine_name != self.config.engine.name() {
            warn!(
                "Running engine {} but the configuration describes {}; its parameters are left out of the report.",
                self.engine_name,
                self.config.engine.name()
            );
        }
        let criteria = self.config.criteria();
        info!(
            engine = engine.name(),
            seed = self.config.seed,
            num_assets = self.instance().num_assets(),
            "Starting run"
        );

        let batch = {
            let mut context = EngineContext {
                rng: &mut self.rng,
                decoder: &mut self.decoder,
                senses: &self.senses,
            };
            engine.initialize(&mut context)?
        };
        self.update_best_individuals(&batch, clock.elapsed_seconds());

        if self.schedule.takes_initial() {
            self.capture_snapshot(engine, SnapshotTrigger::Initial, clock.elapsed_seconds());
        }

        while !criteria.are_met(clock.elapsed_seconds(), self.num_iterations) {
            self.num_iterations += 1;

            let batch = {
                let mut context = EngineContext {
                    rng: &mut self.rng,
                    decoder: &mut self.decoder,
                    senses: &self.senses,
                };
                engine.evolve(&mut context)?
            };
            self.update_best_individuals(&batch, clock.elapsed_seconds());

            let elapsed = clock.elapsed_seconds();
            if let Some(trigger) = self.schedule.due(self.num_iterations, elapsed) {
                self.capture_snapshot(engine, trigger, elapsed);
            }
        }

        if self.schedule.takes_final() {
            self.capture_snapshot(engine, SnapshotTrigger::Final, clock.elapsed_seconds());
        }
        self.solving_time = clock.elapsed_seconds();

        info!(
            iterations = self.num_iterations,
            solutions = self.archive.len(),
            snapshots = self.snapshots.len(),
            solving_time = self.solving_time,
            "Run finished"
        );
        Ok(self.report())
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.archive = Archive::new(self.config.max_num_solutions);
        self.schedule = SnapshotSchedule::new(self.config.max_num_snapshots, &self.config.criteria());
        self.snapshots = Snapshots::default();
        self.num_iterations = 0;
        self.solving_time = 0.0;
        self.last_update_iteration = 0;
        self.last_update_time = 0.0;
        self.large_offset = 0;
    }

    fn update_best_individuals(&mut self, batch: &[Individual], elapsed_seconds: f64) -> bool {
        let changed = self.archive.merge(batch, &self.senses);
        if changed {
            let offset = self.num_iterations - self.last_update_iteration;
            self.large_offset = self.large_offset.max(offset);
            self.last_update_iteration = self.num_iterations;
            self.last_update_time = elapsed_seconds;
            debug!(
                iteration = self.num_iterations,
                archive_size = self.archive.len(),
                "Archive updated"
            );
        }
        changed
    }

    fn capture_snapshot<E: SearchEngine + ?Sized>(
        &mut self,
        engine: &E,
        trigger: SnapshotTrigger,
        elapsed_seconds: f64,
    ) {
        let iteration = self.num_iterations;
        let stamp = |payload| Snapshot {
            iteration,
            elapsed_seconds,
            payload,
        };

        self.snapshots.best_solutions.push(Snapshot {
            iteration,
            elapsed_seconds,
            payload: self.archive.objectives(),
        });

        let counts = engine.population_counts(&self.senses);
        self.snapshots.num_non_dominated.push(stamp(counts.non_dominated));
        self.snapshots.num_fronts.push(stamp(counts.fronts));
        if let Some(elites) = counts.elites {
            self.snapshots.num_elites.push(stamp(elites));
        }

        self.snapshots.populations.push(Snapshot {
            iteration,
            elapsed_seconds,
            payload: engine
                .populations()
                .iter()
                .map(|population| population.iter().map(|individual| individual.objectives.clone()).collect())
                .collect(),
        });

        self.schedule.record(iteration, elapsed_seconds);
        debug!(
            ?trigger,
            iteration,
            elapsed_seconds,
            taken = self.schedule.taken(),
            quota = self.schedule.quota(),
            "Snapshot captured"
        );
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            num_assets: self.instance().num_assets(),
            seed: self.config.seed,
            time_limit: self.config.time_limit,
            iterations_limit: self.config.iterations_limit,
            max_num_solutions: self.config.max_num_solutions,
            max_num_snapshots: self.config.max_num_snapshots,
            engine_name: self.engine_name.clone(),
            engine: self.config.engine.clone(),
            time_snapshot_factor: self.schedule.time_factor(),
            iteration_snapshot_factor: self.schedule.iteration_factor(),
            num_iterations: self.num_iterations,
            num_solutions: self.archive.len(),
            solving_time: self.solving_time,
            num_snapshots: self.schedule.taken(),
            time_next_snapshot: self.schedule.next_time(),
            time_last_snapshot: self.schedule.last_time(),
            iteration_next_snapshot: self.schedule.next_iteration(),
            iteration_last_snapshot: self.schedule.last_iteration(),
            last_update_iteration: self.last_update_iteration,
            last_update_time: self.last_update_time,
            large_offset: self.large_offset,
        }
    }
}

/// Summary of a finished run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub num_assets: usize,
    pub seed: u64,
    pub time_limit: Option<f64>,
    pub iterations_limit: Option<u64>,
    pub max_num_solutions: Option<usize>,
    pub max_num_snapshots: usize,
    /// Name of the engine that actually ran.
    pub engine_name: String,
    /// Configured engine parameters.
    pub engine: EngineConfig,
    pub time_snapshot_factor: f64,
    pub iteration_snapshot_factor: f64,
    pub num_iterations: u64,
    pub num_solutions: usize,
    pub solving_time: f64,
    pub num_snapshots: usize,
    pub time_next_snapshot: f64,
    pub time_last_snapshot: f64,
    pub iteration_next_snapshot: u64,
    pub iteration_last_snapshot: u64,
    pub last_update_iteration: u64,
    pub last_update_time: f64,
    pub large_offset: u64,
}

fn or_unbounded<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unbounded".to_string(), |value| value.to_string())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of assets: {}", self.num_assets)?;
        writeln!(f, "Seed: {}", self.seed)?;
        writeln!(f, "Time limit: {}", or_unbounded(self.time_limit))?;
        writeln!(f, "Iterations limit: {}", or_unbounded(self.iterations_limit))?;
        writeln!(f, "Maximum number of solutions: {}", or_unbounded(self.max_num_solutions))?;
        writeln!(f, "Maximum number of snapshots: {}", self.max_num_snapshots)?;
        if self.engine_name == self.engine.name() {
            write!(f, "{}", self.engine)?;
        } else {
            writeln!(f, "Engine: {}", self.engine_name)?;
        }
        writeln!(
            f,
            "Factor at which the time between snapshots are increased: {}",
            self.time_snapshot_factor
        )?;
        writeln!(
            f,
            "Factor at which the iterations between snapshots are increased: {}",
            self.iteration_snapshot_factor
        )?;
        writeln!(f, "Number of iterations: {}", self.num_iterations)?;
        writeln!(f, "Solutions obtained: {}", self.num_solutions)?;
        writeln!(f, "Solving time: {}", self.solving_time)?;
        writeln!(f, "Number of snapshots: {}", self.num_snapshots)?;
        writeln!(f, "Time next snapshot: {}", self.time_next_snapshot)?;
        writeln!(f, "Time when the last snapshot was taken: {}", self.time_last_snapshot)?;
        writeln!(f, "Number of iteration of the next snapshot: {}", self.iteration_next_snapshot)?;
        writeln!(f, "Iteration when the last snapshot was taken: {}", self.iteration_last_snapshot)?;
        writeln!(f, "Last update iteration: {}", self.last_update_iteration)?;
        writeln!(f, "Last update time: {}", self.last_update_time)?;
        writeln!(f, "Largest iteration offset between updates: {}", self.large_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::engine::{RandomKeyEngine, RandomKeyParams};
    use nalgebra::DMatrix;
    use std::cell::Cell;

    struct ManualClock(Cell<f64>);

    impl Clock for ManualClock {
        fn elapsed_seconds(&self) -> f64 {
            let now = self.0.get();
            self.0.set(now + 0.001);
            now
        }
    }

    fn instance() -> Instance {
        Instance::new(
            vec!["AAA".into(), "BBB".into(), "CCC".into()],
            vec![0.05, 0.10, 0.15],
            DMatrix::from_row_slice(3, 3, &[0.04, 0.01, 0.0, 0.01, 0.09, 0.02, 0.0, 0.02, 0.16]),
        )
        .unwrap()
    }

    fn config(iterations_limit: u64, max_num_snapshots: usize) -> RunConfig {
        RunConfig {
            seed: 1234,
            time_limit: None,
            iterations_limit: Some(iterations_limit),
            max_num_solutions: Some(25),
            max_num_snapshots,
            num_threads: 2,
            engine: EngineConfig::RandomKeys(RandomKeyParams {
                population_size: 16,
                use_seed_portfolios: true,
            }),
        }
    }

    fn engine() -> RandomKeyEngine {
        RandomKeyEngine::new(RandomKeyParams {
            population_size: 16,
            use_seed_portfolios: true,
        })
        .unwrap()
    }

    #[test]
    fn test_run_config_validation() {
        let mut unbounded = config(10, 0);
        unbounded.iterations_limit = None;
        assert!(matches!(
            RunContext::new(instance(), unbounded),
            Err(EvolutionError::MissingTerminationCriterion)
        ));

        let mut no_threads = config(10, 0);
        no_threads.num_threads = 0;
        assert!(matches!(no_threads.validate(), Err(EvolutionError::BadThreadCount)));

        let mut negative_time = config(10, 0);
        negative_time.time_limit = Some(-1.0);
        assert!(matches!(
            negative_time.validate(),
            Err(EvolutionError::BadRunParameter(_))
        ));

        let mut empty_archive = config(10, 0);
        empty_archive.max_num_solutions = Some(0);
        assert!(empty_archive.validate().is_err());
    }

    #[test]
    fn test_run_config_deserialization_defaults() {
        let config: RunConfig = serde_json::from_str(r#"{"time_limit": 5.0}"#).unwrap();
        assert_eq!(config.time_limit, Some(5.0));
        assert_eq!(config.iterations_limit, None);
        assert_eq!(config.max_num_snapshots, 0);
        assert_eq!(config.num_threads, num_cpus::get());
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_respects_iteration_budget_and_quota() {
        let mut run = RunContext::new(instance(), config(30, 4)).unwrap();
        let report = run
            .solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0)))
            .unwrap();

        assert_eq!(report.num_iterations, 30);
        assert_eq!(run.snapshots().len(), 4);
        assert_eq!(run.snapshots().num_fronts.len(), 4);
        assert_eq!(run.snapshots().num_non_dominated.len(), 4);
        assert_eq!(run.snapshots().populations.len(), 4);
        assert!(run.snapshots().num_elites.is_empty());
        assert_eq!(run.snapshots().best_solutions[0].iteration, 0);
        assert_eq!(run.snapshots().best_solutions[3].iteration, 30);
        assert!(!run.archive().is_empty());
        assert!(run.archive().len() <= 25);
        assert_eq!(report.num_solutions, run.archive().len());
    }

    #[test]
    fn test_run_is_reproducible_for_a_seed() {
        let mut first = RunContext::new(instance(), config(20, 3)).unwrap();
        let mut second = RunContext::new(instance(), config(20, 3)).unwrap();
        first.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        second.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        assert_eq!(first.archive().objectives(), second.archive().objectives());
        assert_eq!(first.snapshots(), second.snapshots());
    }

    #[test]
    fn test_solving_twice_restarts_from_the_seed() {
        let mut run = RunContext::new(instance(), config(3, 2)).unwrap();
        let first = run.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        let first_archive = run.archive().objectives();
        let first_snapshots = run.snapshots().clone();

        let second = run.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        assert_eq!(run.archive().objectives(), first_archive);
        assert_eq!(run.snapshots(), &first_snapshots);
        assert_eq!(second.num_solutions, first.num_solutions);
        assert_eq!(second.last_update_iteration, first.last_update_iteration);

        let mut fresh = RunContext::new(instance(), config(3, 2)).unwrap();
        fresh.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        assert_eq!(fresh.archive().objectives(), first_archive);
    }

    #[test]
    fn test_run_threads_cover_every_engine() {
        let config: RunConfig = serde_json::from_str(
            r#"{"iterations_limit": 10, "num_threads": 3, "engine": {"engine": "nsbrkga"}}"#,
        )
        .unwrap();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.engine, EngineConfig::Nsbrkga(Default::default()));
        let run = RunContext::new(instance(), config).unwrap();
        assert_eq!(run.report().engine_name, "NSBRKGA");
    }

    #[test]
    fn test_best_solutions_are_feasible() {
        let mut run = RunContext::new(instance(), config(10, 0)).unwrap();
        run.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        assert!(run.snapshots().is_empty());
        for portfolio in run.best_solutions() {
            assert!(portfolio.is_feasible(run.instance()), "{:?}", portfolio);
        }
    }

    #[test]
    fn test_solve_with_wall_clock() {
        let mut run = RunContext::new(instance(), config(5, 2)).unwrap();
        let report = run.solve(&mut engine()).unwrap();
        assert_eq!(report.num_iterations, 5);
        assert_eq!(report.num_snapshots, 2);
        assert!(report.solving_time >= 0.0);
    }

    #[test]
    fn test_report_display() {
        let mut run = RunContext::new(instance(), config(3, 0)).unwrap();
        let report = run.solve_with_clock(&mut engine(), &ManualClock(Cell::new(0.0))).unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Number of assets: 3\nSeed: 1234\n"));
        assert!(text.contains("Time limit: unbounded\n"));
        assert!(text.contains("Iterations limit: 3\n"));
        assert!(text.contains("Engine: Random keys\n"));
        assert!(text.contains("Seed portfolios: true\n"));
        assert_eq!(report.engine_name, "Random keys");
        assert!(text.contains("Number of iterations: 3\n"));
    }
}
