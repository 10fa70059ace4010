// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GHC command line
//!
//! Loads statistics files, classifies runs and prints reports.
//!
//! ## Usage
//!
//! ```bash
//! # Classify one run
//! ghc classify --run ghc42 --ped-on ped_eb.txt ped_ee.txt --laser laser.txt
//!
//! # Compare runs in order, only channels whose flags changed
//! ghc compare --run ghc41:pedestal_hvon=a.txt --run ghc42:pedestal_hvon=b.txt --changed
//! ```

mod mask;
mod source;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use ecal_ghc::stats::flag_evidence;
use ecal_ghc::{
    ingest_files, render_flag_table, render_run_table, ChannelId, ClassificationResult,
    ComparisonTable, DataKind, FlagSet, FlagStatistics, FlagStore, GhcConfig, GhcError,
    MeasurementStore, MemoryFlagStore, MemoryMeasurementStore, RowFilter, RunClassifier, RunId,
    RunStatistics,
};
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use source::RunSource;

/// ECAL Good Health Check
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one run and print its problematic channels
    Classify(ClassifyArgs),
    /// Classify several runs and compare each with its predecessor
    Compare(CompareArgs),
}

/// Options shared by both subcommands
#[derive(clap::Args, Debug)]
struct SessionArgs {
    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON threshold policy, replacing the configured one
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Channel-status CSV (channel,status) listing the detector; bad channels are masked
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Report masked channels too
    #[arg(long)]
    keep_masked: bool,
}

#[derive(clap::Args, Debug)]
struct ClassifyArgs {
    /// Run identifier
    #[arg(long)]
    run: String,

    /// Pedestal (HV on) statistics files
    #[arg(long = "ped-on", num_args = 1..)]
    ped_on: Vec<PathBuf>,

    /// Pedestal (HV off) statistics files
    #[arg(long = "ped-off", num_args = 1..)]
    ped_off: Vec<PathBuf>,

    /// Test-pulse statistics files
    #[arg(long = "test-pulse", num_args = 1..)]
    test_pulse: Vec<PathBuf>,

    /// Laser statistics files
    #[arg(long, num_args = 1..)]
    laser: Vec<PathBuf>,

    #[command(flatten)]
    session: SessionArgs,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct CompareArgs {
    /// Statistics file of a run, as RUN:KIND=FILE (repeatable)
    #[arg(long = "run", required = true, num_args = 1..)]
    sources: Vec<RunSource>,

    #[command(flatten)]
    session: SessionArgs,

    /// Only channels whose flags changed
    #[arg(long, conflicts_with = "unchanged")]
    changed: bool,

    /// Only channels whose flags did not change
    #[arg(long)]
    unchanged: bool,
}

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Ghc(#[from] GhcError),

    #[error("Channel-status file: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No statistics files given for run {0}")]
    NoInput(RunId),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing; library `log` records are forwarded to it
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match cli.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ECAL GHC v{}", ecal_ghc::VERSION);

    let outcome = match cli.command {
        Command::Classify(args) => classify(args),
        Command::Compare(args) => compare(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Engine configuration and detector population shared by the runs of one invocation
struct Session {
    config: GhcConfig,
    population: Vec<ChannelId>,
}

impl Session {
    /// Measurement store holding the detector population and no statistics
    fn store(&self) -> MemoryMeasurementStore {
        let mut store = MemoryMeasurementStore::new();
        store.register_channels(self.population.iter().copied());
        store
    }
}

impl SessionArgs {
    fn load(&self) -> Result<Session, CliError> {
        let mut config = match &self.config {
            Some(path) => GhcConfig::load(path)?,
            None => GhcConfig::default(),
        };
        if let Some(path) = &self.policy {
            let text = std::fs::read_to_string(path).map_err(GhcError::from)?;
            config.policy = serde_json::from_str(&text).map_err(|e| GhcError::Config(e.to_string()))?;
            config.validate()?;
            info!("Threshold policy loaded from {}", path.display());
        }
        let population = match &self.mask {
            Some(path) => {
                let population = mask::apply(&mut config, path)?;
                for (det, listed, nominal) in mask::incomplete_subdetectors(&population) {
                    warn!("Channel-status file lists {} of {} {} channels", listed, nominal, det);
                }
                population
            }
            None => {
                warn!("No channel-status file: inactive channels are counted among loaded channels only");
                Vec::new()
            }
        };
        config.keep_masked |= self.keep_masked;
        Ok(Session { config, population })
    }
}

/// JSON document of the `classify --json` output
#[derive(Serialize)]
struct ClassifyOutput<'a> {
    generated: String,
    result: &'a ClassificationResult,
    flags: BTreeMap<ChannelId, FlagSet>,
    missing: BTreeSet<ChannelId>,
}

fn classify(args: ClassifyArgs) -> Result<(), CliError> {
    let run = RunId::from(args.run.as_str());
    let session = args.session.load()?;

    let inputs = [
        (DataKind::PedestalHvOn, &args.ped_on),
        (DataKind::PedestalHvOff, &args.ped_off),
        (DataKind::TestPulse, &args.test_pulse),
        (DataKind::Laser, &args.laser),
    ];
    if inputs.iter().all(|(_, files)| files.is_empty()) {
        return Err(CliError::NoInput(run));
    }
    let mut store = session.store();
    for (kind, files) in inputs {
        if !files.is_empty() {
            ingest_files(&mut store, &run, kind, files.as_slice())?;
        }
    }

    let mut rc = RunClassifier::with_config(store, MemoryFlagStore::new(), session.config);
    let result = rc.classify(&run)?;

    if args.json {
        let output = ClassifyOutput {
            generated: Local::now().to_rfc3339(),
            result: &result,
            flags: rc.flags(&run)?,
            missing: rc.missing_channels(&run)?,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Generated {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}", result.report());
    println!("{}", render_run_table(&[RunStatistics::collect(&rc, &run, None)?]));
    print_problematic(&rc, &run)
}

fn print_problematic<M: MeasurementStore, F: FlagStore>(
    rc: &RunClassifier<M, F>,
    run: &RunId,
) -> Result<(), CliError> {
    println!("=== Problematic channels of {} ===\n", run);
    for (channel, flags) in rc.flags(run)? {
        let mut described = Vec::with_capacity(flags.len());
        for flag in flags {
            match flag_evidence(rc.measurements(), run, channel, flag)? {
                Some(evidence) => described.push(format!("{} {}", flag.describe(), evidence)),
                None => described.push(flag.describe()),
            }
        }
        println!("{:>10} {}  {}", channel, channel.subdetector(), described.join(", "));
    }

    let missing = rc.missing_channels(run)?;
    if !missing.is_empty() {
        println!(
            "\nMissing channels: {}",
            missing.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ")
        );
    }
    Ok(())
}

fn compare(args: CompareArgs) -> Result<(), CliError> {
    let session = args.session.load()?;
    let grouped = source::group(&args.sources);

    let mut store = session.store();
    for (run, kinds) in &grouped {
        for (kind, files) in kinds {
            ingest_files(&mut store, run, *kind, files.as_slice())?;
        }
    }

    let mut rc = RunClassifier::with_config(store, MemoryFlagStore::new(), session.config);
    let runs: Vec<RunId> = grouped.into_keys().collect();
    let mut columns = Vec::with_capacity(runs.len());
    for run in &runs {
        let result = rc.classify(run)?;
        if !result.fully_classified {
            warn!("Run {}: not all selection criteria were used", run);
        }
        columns.push((run.clone(), rc.run_flags(run)?));
    }

    let filter = if args.changed {
        RowFilter::Changed
    } else if args.unchanged {
        RowFilter::Unchanged
    } else {
        RowFilter::All
    };

    println!("Generated {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}", render_run_table(&RunStatistics::chronological(&rc, &runs)?));
    println!("{}", render_flag_table(&FlagStatistics::chronological(&rc, &runs)?));
    println!("{}", ComparisonTable::build(&columns).render(filter));
    Ok(())
}
