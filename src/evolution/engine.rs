use crate::evolution::archive::Individual;
use crate::evolution::decoder::Decoder;
use crate::evolution::objective::Senses;
use crate::evolution::pareto::build_pareto_fronts;
use crate::evolution::EvolutionError;
use crate::portfolio::seed_portfolios;
use rand::distributions::Uniform;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// What an engine gets to work with on every call.
pub struct EngineContext<'a> {
    pub rng: &'a mut StdRng,
    pub decoder: &'a mut Decoder,
    pub senses: &'a Senses,
}

/// Per-population statistics recorded with every snapshot capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub non_dominated: Vec<usize>,
    pub fronts: Vec<usize>,
    pub elites: Option<Vec<usize>>,
}

/// The seam between the run driver and a search strategy.
///
/// The driver calls [`SearchEngine::initialize`] once and then
/// [`SearchEngine::evolve`] once per iteration, merging every returned batch
/// into the archive. Engines own their populations; the driver only reads
/// them when a snapshot is captured.
pub trait SearchEngine {
    fn name(&self) -> &str;

    /// Builds the first population(s) and returns the individuals to merge.
    fn initialize(&mut self, context: &mut EngineContext<'_>) -> Result<Vec<Individual>, EvolutionError>;

    /// Runs one iteration and returns the batch of new candidates.
    fn evolve(&mut self, context: &mut EngineContext<'_>) -> Result<Vec<Individual>, EvolutionError>;

    /// The current populations, in a stable order.
    fn populations(&self) -> &[Vec<Individual>];

    /// Elite set sizes, for engines that keep one per population.
    fn elite_counts(&self) -> Option<Vec<usize>> {
        None
    }

    fn population_counts(&self, senses: &Senses) -> PopulationCounts {
        let mut counts = PopulationCounts {
            elites: self.elite_counts(),
            ..PopulationCounts::default()
        };
        for population in self.populations() {
            let fronts = build_pareto_fronts(population, senses);
            counts.non_dominated.push(fronts.first().map_or(0, Vec::len));
            counts.fronts.push(fronts.len());
        }
        counts
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), EvolutionError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EvolutionError::BadEngineParameter(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_positive<T: PartialOrd + Default + fmt::Display>(name: &str, value: T) -> Result<(), EvolutionError> {
    if value <= T::default() {
        return Err(EvolutionError::BadEngineParameter(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nsga2Params {
    pub population_size: usize,
    pub crossover_probability: f64,
    pub crossover_distribution: f64,
    pub mutation_probability: f64,
    pub mutation_distribution: f64,
}

impl Default for Nsga2Params {
    fn default() -> Self {
        Nsga2Params {
            population_size: 300,
            crossover_probability: 0.95,
            crossover_distribution: 10.0,
            mutation_probability: 0.01,
            mutation_distribution: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoeadParams {
    pub population_size: usize,
    pub weight_generation: String,
    pub decomposition: String,
    pub neighbours: usize,
    pub cr: f64,
    pub f: f64,
    pub eta_m: f64,
    pub realb: f64,
    pub limit: usize,
    pub preserve_diversity: bool,
}

impl Default for MoeadParams {
    fn default() -> Self {
        MoeadParams {
            population_size: 300,
            weight_generation: "random".into(),
            decomposition: "tchebycheff".into(),
            neighbours: 20,
            cr: 1.0,
            f: 0.5,
            eta_m: 20.0,
            realb: 0.9,
            limit: 2,
            preserve_diversity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IhsParams {
    pub population_size: usize,
    pub phmcr: f64,
    pub ppar_min: f64,
    pub ppar_max: f64,
    pub bw_min: f64,
    pub bw_max: f64,
}

impl Default for IhsParams {
    fn default() -> Self {
        IhsParams {
            population_size: 300,
            phmcr: 0.85,
            ppar_min: 0.35,
            ppar_max: 0.99,
            bw_min: 1e-5,
            bw_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MhacoParams {
    pub population_size: usize,
    pub ker: usize,
    pub q: f64,
    pub threshold: usize,
    pub n_gen_mark: usize,
    pub eval_stop: usize,
    pub focus: f64,
    pub memory: bool,
}

impl Default for MhacoParams {
    fn default() -> Self {
        MhacoParams {
            population_size: 300,
            ker: 63,
            q: 1.0,
            threshold: 1,
            n_gen_mark: 7,
            eval_stop: 0,
            focus: 0.0,
            memory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NspsoParams {
    pub population_size: usize,
    pub omega: f64,
    pub c1: f64,
    pub c2: f64,
    pub chi: f64,
    pub v_coeff: f64,
    pub leader_selection_range: usize,
    pub diversity_mechanism: String,
    pub memory: bool,
}

impl Default for NspsoParams {
    fn default() -> Self {
        NspsoParams {
            population_size: 300,
            omega: 0.6,
            c1: 2.0,
            c2: 2.0,
            chi: 1.0,
            v_coeff: 0.5,
            leader_selection_range: 60,
            diversity_mechanism: "crowding distance".into(),
            memory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NsbrkgaParams {
    pub population_size: usize,
    pub min_elites_percentage: f64,
    pub max_elites_percentage: f64,
    pub mutation_probability: f64,
    pub mutation_distribution: f64,
    pub num_total_parents: usize,
    pub num_elite_parents: usize,
    pub num_populations: usize,
    pub exchange_interval: usize,
    pub num_exchange_individuals: usize,
    pub pr_percentage: f64,
    pub pr_interval: usize,
    pub shake_interval: usize,
    pub shake_intensity: f64,
    pub shake_distribution: f64,
    pub reset_interval: usize,
    pub reset_intensity: f64,
}

impl Default for NsbrkgaParams {
    fn default() -> Self {
        NsbrkgaParams {
            population_size: 300,
            min_elites_percentage: 0.10,
            max_elites_percentage: 0.30,
            mutation_probability: 0.01,
            mutation_distribution: 50.0,
            num_total_parents: 3,
            num_elite_parents: 2,
            num_populations: 3,
            exchange_interval: 200,
            num_exchange_individuals: 30,
            pr_percentage: 0.20,
            pr_interval: 500,
            shake_interval: 200,
            shake_intensity: 0.33,
            shake_distribution: 20.0,
            reset_interval: 500,
            reset_intensity: 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomKeyParams {
    pub population_size: usize,
    /// Whether the first population starts from the structured seed portfolios.
    pub use_seed_portfolios: bool,
}

impl Default for RandomKeyParams {
    fn default() -> Self {
        RandomKeyParams {
            population_size: 300,
            use_seed_portfolios: true,
        }
    }
}

/// Strategy selection together with that strategy's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineConfig {
    Nsga2(Nsga2Params),
    Moead(MoeadParams),
    Ihs(IhsParams),
    Mhaco(MhacoParams),
    Nspso(NspsoParams),
    Nsbrkga(NsbrkgaParams),
    RandomKeys(RandomKeyParams),
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::RandomKeys(RandomKeyParams::default())
    }
}

impl EngineConfig {
    pub fn name(&self) -> &'static str {
        match self {
            EngineConfig::Nsga2(_) => "NSGA-II",
            EngineConfig::Moead(_) => "MOEA/D",
            EngineConfig::Ihs(_) => "IHS",
            EngineConfig::Mhaco(_) => "MHACO",
            EngineConfig::Nspso(_) => "NSPSO",
            EngineConfig::Nsbrkga(_) => "NSBRKGA",
            EngineConfig::RandomKeys(_) => "Random keys",
        }
    }

    pub fn population_size(&self) -> usize {
        match self {
            EngineConfig::Nsga2(params) => params.population_size,
            EngineConfig::Moead(params) => params.population_size,
            EngineConfig::Ihs(params) => params.population_size,
            EngineConfig::Mhaco(params) => params.population_size,
            EngineConfig::Nspso(params) => params.population_size,
            EngineConfig::Nsbrkga(params) => params.population_size,
            EngineConfig::RandomKeys(params) => params.population_size,
        }
    }

    pub fn validate(&self) -> Result<(), EvolutionError> {
        check_positive("population_size", self.population_size())?;
        match self {
            EngineConfig::Nsga2(params) => {
                check_probability("crossover_probability", params.crossover_probability)?;
                check_probability("mutation_probability", params.mutation_probability)?;
                check_positive("crossover_distribution", params.crossover_distribution)?;
                check_positive("mutation_distribution", params.mutation_distribution)?;
            }
            EngineConfig::Moead(params) => {
                check_positive("neighbours", params.neighbours)?;
                check_probability("cr", params.cr)?;
                check_probability("realb", params.realb)?;
                check_positive("eta_m", params.eta_m)?;
                if params.neighbours >= params.population_size {
                    warn!(
                        "MOEA/D neighbourhood of {} covers the whole population of {}.",
                        params.neighbours, params.population_size
                    );
                }
            }
            EngineConfig::Ihs(params) => {
                check_probability("phmcr", params.phmcr)?;
                check_probability("ppar_min", params.ppar_min)?;
                check_probability("ppar_max", params.ppar_max)?;
                if params.ppar_min > params.ppar_max || params.bw_min > params.bw_max {
                    return Err(EvolutionError::BadEngineParameter(
                        "IHS minimum rates must not exceed their maxima".into(),
                    ));
                }
            }
            EngineConfig::Mhaco(params) => {
                check_positive("ker", params.ker)?;
                if params.ker > params.population_size {
                    return Err(EvolutionError::BadEngineParameter(format!(
                        "ker ({}) cannot exceed the population size ({})",
                        params.ker, params.population_size
                    )));
                }
            }
            EngineConfig::Nspso(params) => {
                check_positive("leader_selection_range", params.leader_selection_range)?;
                check_positive("chi", params.chi)?;
                check_probability("v_coeff", params.v_coeff)?;
            }
            EngineConfig::Nsbrkga(params) => {
                check_probability("min_elites_percentage", params.min_elites_percentage)?;
                check_probability("max_elites_percentage", params.max_elites_percentage)?;
                check_probability("mutation_probability", params.mutation_probability)?;
                check_probability("pr_percentage", params.pr_percentage)?;
                check_positive("num_populations", params.num_populations)?;
                check_positive("num_elite_parents", params.num_elite_parents)?;
                if params.min_elites_percentage > params.max_elites_percentage {
                    return Err(EvolutionError::BadEngineParameter(
                        "min_elites_percentage exceeds max_elites_percentage".into(),
                    ));
                }
                if params.num_elite_parents > params.num_total_parents {
                    return Err(EvolutionError::BadEngineParameter(format!(
                        "num_elite_parents ({}) exceeds num_total_parents ({})",
                        params.num_elite_parents, params.num_total_parents
                    )));
                }
            }
            EngineConfig::RandomKeys(_) => {}
        }
        Ok(())
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Engine: {}", self.name())?;
        writeln!(f, "Population size: {}", self.population_size())?;
        match self {
            EngineConfig::Nsga2(params) => {
                writeln!(f, "Crossover probability: {}", params.crossover_probability)?;
                writeln!(f, "Crossover distribution: {}", params.crossover_distribution)?;
                writeln!(f, "Mutation probability: {}", params.mutation_probability)?;
                writeln!(f, "Mutation distribution: {}", params.mutation_distribution)
            }
            EngineConfig::Moead(params) => {
                writeln!(f, "Weight generation: {}", params.weight_generation)?;
                writeln!(f, "Decomposition: {}", params.decomposition)?;
                writeln!(f, "Neighbours: {}", params.neighbours)?;
                writeln!(f, "CR: {}", params.cr)?;
                writeln!(f, "F: {}", params.f)?;
                writeln!(f, "Eta m: {}", params.eta_m)?;
                writeln!(f, "Realb: {}", params.realb)?;
                writeln!(f, "Limit: {}", params.limit)?;
                writeln!(f, "Preserve diversity: {}", params.preserve_diversity)
            }
            EngineConfig::Ihs(params) => {
                writeln!(f, "Phmcr: {}", params.phmcr)?;
                writeln!(f, "Ppar min: {}", params.ppar_min)?;
                writeln!(f, "Ppar max: {}", params.ppar_max)?;
                writeln!(f, "Bw min: {}", params.bw_min)?;
                writeln!(f, "Bw max: {}", params.bw_max)
            }
            EngineConfig::Mhaco(params) => {
                writeln!(f, "Ker: {}", params.ker)?;
                writeln!(f, "Q: {}", params.q)?;
                writeln!(f, "Threshold: {}", params.threshold)?;
                writeln!(f, "N gen mark: {}", params.n_gen_mark)?;
                writeln!(f, "Eval stop: {}", params.eval_stop)?;
                writeln!(f, "Focus: {}", params.focus)?;
                writeln!(f, "Memory: {}", params.memory)
            }
            EngineConfig::Nspso(params) => {
                writeln!(f, "Omega: {}", params.omega)?;
                writeln!(f, "C1: {}", params.c1)?;
                writeln!(f, "C2: {}", params.c2)?;
                writeln!(f, "Chi: {}", params.chi)?;
                writeln!(f, "V coeff: {}", params.v_coeff)?;
                writeln!(f, "Leader selection range: {}", params.leader_selection_range)?;
                writeln!(f, "Diversity mechanism: {}", params.diversity_mechanism)?;
                writeln!(f, "Memory: {}", params.memory)
            }
            EngineConfig::Nsbrkga(params) => {
                writeln!(f, "Minimum elites percentage: {}", params.min_elites_percentage)?;
                writeln!(f, "Maximum elites percentage: {}", params.max_elites_percentage)?;
                writeln!(f, "Mutation probability: {}", params.mutation_probability)?;
                writeln!(f, "Mutation distribution: {}", params.mutation_distribution)?;
                writeln!(f, "Total parents: {}", params.num_total_parents)?;
                writeln!(f, "Elite parents: {}", params.num_elite_parents)?;
                writeln!(f, "Populations: {}", params.num_populations)?;
                writeln!(f, "Exchange interval: {}", params.exchange_interval)?;
                writeln!(f, "Exchanged individuals: {}", params.num_exchange_individuals)?;
                writeln!(f, "Path relinking percentage: {}", params.pr_percentage)?;
                writeln!(f, "Path relinking interval: {}", params.pr_interval)?;
                writeln!(f, "Shake interval: {}", params.shake_interval)?;
                writeln!(f, "Shake intensity: {}", params.shake_intensity)?;
                writeln!(f, "Shake distribution: {}", params.shake_distribution)?;
                writeln!(f, "Reset interval: {}", params.reset_interval)?;
                writeln!(f, "Reset intensity: {}", params.reset_intensity)
            }
            EngineConfig::RandomKeys(params) => {
                writeln!(f, "Seed portfolios: {}", params.use_seed_portfolios)
            }
        }
    }
}

/// Baseline engine that samples uniform random keys every iteration.
///
/// No selection, crossover or mutation: each iteration replaces the whole
/// population with fresh samples. The first population optionally starts
/// from [`seed_portfolios`].
#[derive(Debug, Clone)]
pub struct RandomKeyEngine {
    params: RandomKeyParams,
    populations: Vec<Vec<Individual>>,
}

impl RandomKeyEngine {
    pub fn new(params: RandomKeyParams) -> Result<Self, EvolutionError> {
        check_positive("population_size", params.population_size)?;
        Ok(RandomKeyEngine {
            params,
            populations: vec![Vec::new()],
        })
    }

    fn sample_keys(&self, rng: &mut StdRng, count: usize, num_assets: usize) -> Vec<Vec<f64>> {
        let uniform = Uniform::new(0.0, 1.0);
        (0..count)
            .map(|_| (0..num_assets).map(|_| rng.sample(uniform)).collect())
            .collect()
    }
}

impl SearchEngine for RandomKeyEngine {
    fn name(&self) -> &str {
        "Random keys"
    }

    fn initialize(&mut self, context: &mut EngineContext<'_>) -> Result<Vec<Individual>, EvolutionError> {
        let num_assets = context.decoder.instance().num_assets();
        if num_assets == 0 {
            return Err(EvolutionError::EmptyDecisionVector);
        }
        let population_size = self.params.population_size;

        let mut keys = if self.params.use_seed_portfolios {
            let mut seeds = seed_portfolios(num_assets);
            if seeds.len() > population_size {
                warn!(
                    "Population size {} is smaller than the {} seed portfolios, keeping the first {}.",
                    population_size,
                    seeds.len(),
                    population_size
                );
                seeds.truncate(population_size);
            }
            seeds
        } else {
            Vec::new()
        };
        let missing = population_size - keys.len();
        keys.extend(self.sample_keys(context.rng, missing, num_assets));

        let population = context.decoder.decode_batch(&keys);
        self.populations = vec![population.clone()];
        Ok(population)
    }

    fn evolve(&mut self, context: &mut EngineContext<'_>) -> Result<Vec<Individual>, EvolutionError> {
        let num_assets = context.decoder.instance().num_assets();
        let keys = self.sample_keys(context.rng, self.params.population_size, num_assets);
        let population = context.decoder.decode_batch(&keys);
        self.populations = vec![population.clone()];
        Ok(population)
    }

    fn populations(&self) -> &[Vec<Individual>] {
        &self.populations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use nalgebra::DMatrix;

    fn decoder(num_assets: usize) -> Decoder {
        let tickers = (0..num_assets).map(|i| format!("T{}", i)).collect();
        let returns = (0..num_assets).map(|i| 0.01 * (i + 1) as f64).collect();
        let instance = Instance::new(tickers, returns, DMatrix::identity(num_assets, num_assets) * 0.04).unwrap();
        Decoder::new(instance, 2).unwrap()
    }

    #[test]
    fn test_engine_config_defaults_and_tagging() {
        let config: EngineConfig = serde_json::from_str(r#"{"engine":"nsga2"}"#).unwrap();
        assert_eq!(config, EngineConfig::Nsga2(Nsga2Params::default()));

        let config: EngineConfig =
            serde_json::from_str(r#"{"engine":"nsbrkga","num_populations":5}"#).unwrap();
        match config {
            EngineConfig::Nsbrkga(params) => {
                assert_eq!(params.num_populations, 5);
                assert_eq!(params.exchange_interval, 200);
                assert_eq!(params.shake_intensity, 0.33);
            }
            other => panic!("unexpected engine {:?}", other),
        }
        assert_eq!(EngineConfig::default().name(), "Random keys");
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::Moead(MoeadParams::default()).validate().is_ok());
        assert!(EngineConfig::Mhaco(MhacoParams::default()).validate().is_ok());
        assert!(EngineConfig::Nsbrkga(NsbrkgaParams::default()).validate().is_ok());

        let bad_probability = EngineConfig::Nsga2(Nsga2Params {
            crossover_probability: 1.5,
            ..Nsga2Params::default()
        });
        assert!(matches!(
            bad_probability.validate(),
            Err(EvolutionError::BadEngineParameter(_))
        ));

        let empty = EngineConfig::Ihs(IhsParams {
            population_size: 0,
            ..IhsParams::default()
        });
        assert!(empty.validate().is_err());

        let bad_parents = EngineConfig::Nsbrkga(NsbrkgaParams {
            num_elite_parents: 4,
            ..NsbrkgaParams::default()
        });
        assert!(bad_parents.validate().is_err());
    }

    #[test]
    fn test_nsbrkga_workers_come_from_the_run() {
        let text = EngineConfig::Nsbrkga(NsbrkgaParams::default()).to_string();
        assert!(text.ends_with("Reset intensity: 0.2\n"), "{}", text);
        assert!(!text.contains("Threads"));
    }

    #[test]
    fn test_engine_config_display() {
        let text = EngineConfig::Nspso(NspsoParams::default()).to_string();
        assert!(text.starts_with("Engine: NSPSO\nPopulation size: 300\n"));
        assert!(text.contains("Diversity mechanism: crowding distance\n"));
    }

    #[test]
    fn test_random_key_engine_seeds_first_population() {
        let mut decoder = decoder(3);
        let mut rng = StdRng::seed_from_u64(5);
        let senses = Senses::portfolio();
        let mut context = EngineContext {
            rng: &mut rng,
            decoder: &mut decoder,
            senses: &senses,
        };
        let mut engine = RandomKeyEngine::new(RandomKeyParams {
            population_size: 10,
            use_seed_portfolios: true,
        })
        .unwrap();

        let batch = engine.initialize(&mut context).unwrap();
        assert_eq!(batch.len(), 10);
        // the concentrated seed normalizes to a single asset
        assert_eq!(batch[0].weights, vec![1.0, 0.0, 0.0]);
        assert_eq!(engine.populations().len(), 1);
        assert_eq!(engine.populations()[0], batch);

        let next = engine.evolve(&mut context).unwrap();
        assert_eq!(next.len(), 10);
        for individual in next.iter() {
            let total: f64 = individual.weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "weights sum to {}", total);
        }
    }

    #[test]
    fn test_random_key_engine_truncates_seeds() {
        let mut decoder = decoder(4);
        let mut rng = StdRng::seed_from_u64(1);
        let senses = Senses::portfolio();
        let mut context = EngineContext {
            rng: &mut rng,
            decoder: &mut decoder,
            senses: &senses,
        };
        let mut engine = RandomKeyEngine::new(RandomKeyParams {
            population_size: 3,
            use_seed_portfolios: true,
        })
        .unwrap();
        assert_eq!(engine.initialize(&mut context).unwrap().len(), 3);
    }

    #[test]
    fn test_default_population_counts() {
        let mut decoder = decoder(3);
        let mut rng = StdRng::seed_from_u64(9);
        let senses = Senses::portfolio();
        let mut context = EngineContext {
            rng: &mut rng,
            decoder: &mut decoder,
            senses: &senses,
        };
        let mut engine = RandomKeyEngine::new(RandomKeyParams {
            population_size: 20,
            use_seed_portfolios: false,
        })
        .unwrap();
        engine.initialize(&mut context).unwrap();

        let counts = engine.population_counts(&senses);
        assert_eq!(counts.non_dominated.len(), 1);
        assert_eq!(counts.fronts.len(), 1);
        assert!(counts.non_dominated[0] >= 1);
        assert!(counts.fronts[0] >= 1);
        assert_eq!(counts.elites, None);
    }
}
