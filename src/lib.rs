//! # ECAL GHC - Good Health Check
//!
//! Classification of calorimeter readout channels from calibration-run
//! statistics, and comparison of the resulting defect flags between runs.
//!
//! ## Key Features
//!
//! - **Rule-based classification**: pedestal, test-pulse, laser and HV-off rules
//!   driven by a single [`ThresholdPolicy`]
//! - **Idempotent runs**: a run is classified once, sub-pass failures are contained
//! - **Temporal diffing**: flags added, resolved and persistent between runs
//!
//! ## Quick Start
//!
//! ```rust
//! use ecal_ghc::{
//!     ChannelId, Flag, Gain, MemoryFlagStore, MemoryMeasurementStore, Moment, RunClassifier,
//!     RunId, StatisticKey,
//! };
//!
//! let run = RunId::from("ghc1");
//! let channel = ChannelId::new(1011000001).unwrap();
//!
//! let mut store = MemoryMeasurementStore::new();
//! store.insert(&run, channel, StatisticKey::pedestal_on(Gain::G1, Moment::Mean), 0.5);
//! store.insert(&run, channel, StatisticKey::pedestal_on(Gain::G1, Moment::Rms), 0.1);
//!
//! let mut classifier = RunClassifier::new(store, MemoryFlagStore::new());
//! let result = classifier.classify(&run).unwrap();
//! assert!(!result.fully_classified); // no test-pulse, laser or HV-off data
//!
//! let flags = classifier.flags_for_channel(&run, channel).unwrap();
//! assert!(flags.contains(&Flag::DeadPedestal(Gain::G1)));
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Channel, subdetector and run identifiers
//! - [`statistic`]: Typed statistic keys
//! - [`flag`]: Defect flag vocabulary
//! - [`policy`]: Threshold policy
//! - [`classifier`]: Single-channel rules
//! - [`store`]: Measurement and flag store contracts
//! - [`run`]: Whole-run classification and queries
//! - [`diff`]: Flag-set comparison between runs
//! - [`stats`]: Run and flag statistics
//! - [`ingest`]: Statistics file reading

// Modules
pub mod classifier;
pub mod config;
pub mod diff;
pub mod error;
pub mod flag;
pub mod ingest;
pub mod model;
pub mod policy;
pub mod run;
pub mod statistic;
pub mod stats;
pub mod store;

// Re-exports for convenient access
pub use classifier::{ChannelClassifier, PedestalDecision, PopulationAverages};
pub use config::GhcConfig;
pub use diff::{
    diff, pairwise, ChannelCell, ComparisonTable, CountDelta, FlagDiff, RowFilter, RunDiff,
    RunFlags, SetDiff,
};
pub use error::{ChannelError, GhcError, Result, StoreError};
pub use flag::{CombineOp, Flag, FlagKind, FlagPattern, FlagSet};
pub use ingest::{ingest_files, DataKind, Ingest, IngestSummary};
pub use model::{ChannelId, RunId, Subdetector};
pub use policy::ThresholdPolicy;
pub use run::{
    ClassificationResult, Diagnostic, RunClassifier, SubPass, SubPassOutcome, SubPassReport,
};
pub use statistic::{ChannelStatistics, Gain, Moment, RunType, StatisticKey, StatisticPattern};
pub use stats::{render_flag_table, render_run_table, FlagStatistics, RunStatistics, StatValue};
pub use store::{
    ClassificationState, FlagStore, MeasurementStore, MemoryFlagStore, MemoryMeasurementStore,
    RunState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
