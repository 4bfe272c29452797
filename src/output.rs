use crate::evolution::archive::Individual;
use crate::evolution::run::{RunContext, RunReport, Snapshot};
use itertools::join;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error while writing results: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize the run summary: {0}")]
    Json(#[from] serde_json::Error),
}

fn write_rows<W: Write>(writer: &mut W, rows: &[Vec<f64>]) -> io::Result<()> {
    for row in rows {
        writeln!(writer, "{}", join(row, " "))?;
    }
    Ok(())
}

/// One line per archived individual, objective components space-separated.
pub fn write_pareto<W: Write>(writer: &mut W, archive: &[Individual]) -> io::Result<()> {
    for individual in archive {
        writeln!(writer, "{}", join(&individual.objectives, " "))?;
    }
    Ok(())
}

/// `Ticker,0` header, then one `ticker,weight` line per asset.
pub fn write_solution<W: Write>(writer: &mut W, tickers: &[String], weights: &[f64]) -> io::Result<()> {
    writeln!(writer, "Ticker,0")?;
    for (ticker, weight) in tickers.iter().zip(weights) {
        writeln!(writer, "{},{}", ticker, weight)?;
    }
    Ok(())
}

pub fn write_best_solutions_snapshot<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot<Vec<Vec<f64>>>,
) -> io::Result<()> {
    writeln!(writer, "{} {}", snapshot.iteration, snapshot.elapsed_seconds)?;
    write_rows(writer, &snapshot.payload)
}

/// All populations of one capture, in order, without separators.
pub fn write_populations_snapshot<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot<Vec<Vec<Vec<f64>>>>,
) -> io::Result<()> {
    writeln!(writer, "{} {}", snapshot.iteration, snapshot.elapsed_seconds)?;
    for population in snapshot.payload.iter() {
        write_rows(writer, population)?;
    }
    Ok(())
}

/// One line per capture: `<iteration> <elapsed> <count_1> <count_2> ...`.
pub fn write_count_snapshots<W: Write>(writer: &mut W, snapshots: &[Snapshot<Vec<usize>>]) -> io::Result<()> {
    for snapshot in snapshots {
        write!(writer, "{} {}", snapshot.iteration, snapshot.elapsed_seconds)?;
        for count in snapshot.payload.iter() {
            write!(writer, " {}", count)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, OutputError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Writes every result file of a finished run into `dir`, creating it if
/// needed.
pub fn write_run(dir: &Path, run: &RunContext, report: &RunReport) -> Result<(), OutputError> {
    fs::create_dir_all(dir)?;

    let mut pareto = create(&dir.join("pareto.txt"))?;
    write_pareto(&mut pareto, run.archive())?;
    pareto.flush()?;

    let tickers = run.instance().tickers();
    for (i, individual) in run.archive().iter().enumerate() {
        let mut solution = create(&dir.join(format!("solution{}.sol", i)))?;
        write_solution(&mut solution, tickers, &individual.weights)?;
        solution.flush()?;
    }

    let snapshots = run.snapshots();
    for (i, snapshot) in snapshots.best_solutions.iter().enumerate() {
        let mut file = create(&dir.join(format!("best_solutions_snapshot{}.txt", i)))?;
        write_best_solutions_snapshot(&mut file, snapshot)?;
        file.flush()?;
    }
    for (i, snapshot) in snapshots.populations.iter().enumerate() {
        let mut file = create(&dir.join(format!("populations_snapshot{}.txt", i)))?;
        write_populations_snapshot(&mut file, snapshot)?;
        file.flush()?;
    }

    let mut non_dominated = create(&dir.join("num_non_dominated_snapshots.txt"))?;
    write_count_snapshots(&mut non_dominated, &snapshots.num_non_dominated)?;
    non_dominated.flush()?;

    let mut fronts = create(&dir.join("num_fronts_snapshots.txt"))?;
    write_count_snapshots(&mut fronts, &snapshots.num_fronts)?;
    fronts.flush()?;

    if !snapshots.num_elites.is_empty() {
        let mut elites = create(&dir.join("num_elites_snapshots.txt"))?;
        write_count_snapshots(&mut elites, &snapshots.num_elites)?;
        elites.flush()?;
    }

    let mut summary = create(&dir.join("summary.json"))?;
    serde_json::to_writer_pretty(&mut summary, report)?;
    summary.flush()?;

    info!(
        dir = %dir.display(),
        solutions = run.archive().len(),
        snapshots = snapshots.len(),
        "Results written"
    );
    Ok(())
}
