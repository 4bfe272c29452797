use anyhow::{bail, Context, Result};
use mopop::evolution::engine::{EngineConfig, RandomKeyEngine};
use mopop::evolution::run::{RunConfig, RunContext};
use mopop::output::write_run;
use mopop::sampling::{synthetic_instance, MarketConfig};
use rand::prelude::*;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        Err(_) => Ok(default),
    }
}

fn load_config() -> Result<RunConfig> {
    match env::var("MOPOP_CONFIG") {
        Ok(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("Unable to read {}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid run configuration in {}", path))
        }
        Err(_) => Ok(RunConfig {
            time_limit: Some(10.0),
            max_num_snapshots: 10,
            ..RunConfig::default()
        }),
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let output_dir = PathBuf::from(env_or("MOPOP_OUTPUT_DIR", "results".to_string())?);
    let market = MarketConfig {
        num_assets: env_or("MOPOP_NUM_ASSETS", MarketConfig::default().num_assets)?,
        num_factors: env_or("MOPOP_NUM_FACTORS", MarketConfig::default().num_factors)?,
        periods_to_sample: env_or("MOPOP_PERIODS", MarketConfig::default().periods_to_sample)?,
    };

    let params = match &config.engine {
        EngineConfig::RandomKeys(params) => params.clone(),
        other => bail!(
            "{} runs through an external engine wrapper; this binary only drives the random-key baseline",
            other.name()
        ),
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let instance = synthetic_instance(&market, &mut rng)?;
    info!(num_assets = instance.num_assets(), "Synthetic instance ready");

    let mut run = RunContext::new(instance, config)?;
    let mut engine = RandomKeyEngine::new(params)?;
    let report = run.solve(&mut engine)?;

    write_run(&output_dir, &run, &report)?;
    print!("{}", report);
    Ok(())
}
