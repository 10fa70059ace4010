// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Run classification
//!
//! [`RunClassifier`] drives the classification of a whole run: it reads the
//! statistics from a [`MeasurementStore`], runs the sub-passes in order and
//! commits their flags to a [`FlagStore`]. A run is classified once; asking
//! again is a no-op until the run is reset.
//!
//! Each sub-pass computes its flags in memory and commits them in a single
//! batch, so a failing sub-pass leaves nothing behind. Only loss of a store
//! aborts the whole attempt.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::classifier::{ChannelClassifier, PopulationAverages};
use crate::config::GhcConfig;
use crate::diff::{RunDiff, RunFlags};
use crate::error::{GhcError, Result};
use crate::flag::{CombineOp, Flag, FlagPattern, FlagSet};
use crate::model::{ChannelId, RunId, Subdetector};
use crate::statistic::{ChannelStatistics, Gain, Moment, RunType, StatisticKey, StatisticPattern};
use crate::store::{ClassificationState, FlagStore, MeasurementStore, RunState};

/// Classification step, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubPass {
    Pedestal,
    TestPulse,
    Laser,
    HvOff,
    MissingChannels,
}

impl SubPass {
    pub const ALL: [SubPass; 5] = [
        SubPass::Pedestal,
        SubPass::TestPulse,
        SubPass::Laser,
        SubPass::HvOff,
        SubPass::MissingChannels,
    ];
}

impl fmt::Display for SubPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pedestal => "pedestal",
            Self::TestPulse => "test pulse",
            Self::Laser => "laser",
            Self::HvOff => "HV off",
            Self::MissingChannels => "missing channels",
        };
        f.write_str(name)
    }
}

/// What a sub-pass did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SubPassOutcome {
    /// Committed `entries` flags (or missing channels)
    Completed { entries: usize },
    /// Nothing committed
    Failed { reason: String },
}

impl SubPassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubPassReport {
    pub pass: SubPass,
    pub outcome: SubPassOutcome,
}

/// Non-fatal anomaly found while classifying
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    /// A population average had no eligible channel; dependent rules were skipped
    NoPopulation {
        run_type: RunType,
        subdetector: Subdetector,
        gain: Option<Gain>,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPopulation {
                run_type,
                subdetector,
                gain: Some(gain),
            } => write!(f, "no eligible {} channels in {} {}, average undefined", run_type, subdetector, gain),
            Self::NoPopulation {
                run_type,
                subdetector,
                gain: None,
            } => write!(f, "no eligible {} channels in {}, average undefined", run_type, subdetector),
        }
    }
}

/// Result of a classification request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub run: RunId,
    /// False when the run was already classified and nothing ran
    pub newly_classified: bool,
    /// False when any sub-pass failed
    pub fully_classified: bool,
    /// Sub-pass outcomes (empty when nothing ran)
    pub reports: Vec<SubPassReport>,
    pub diagnostics: Vec<Diagnostic>,
    /// Stored (channel, flag) entries for the run
    pub flag_count: usize,
    pub missing_count: usize,
}

impl ClassificationResult {
    /// Generate a text report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str(&format!("=== Classification of {} ===\n\n", self.run));
        if !self.newly_classified {
            report.push_str("Already classified, nothing recomputed\n");
        }
        for r in &self.reports {
            match &r.outcome {
                SubPassOutcome::Completed { entries } => {
                    report.push_str(&format!("  {:<17} done ({} entries)\n", r.pass.to_string(), entries))
                }
                SubPassOutcome::Failed { reason } => {
                    report.push_str(&format!("  {:<17} skipped: {}\n", r.pass.to_string(), reason))
                }
            }
        }
        for d in &self.diagnostics {
            report.push_str(&format!("  warning: {}\n", d));
        }
        report.push_str(&format!("\nFlags: {}\n", self.flag_count));
        report.push_str(&format!("Missing channels: {}\n", self.missing_count));
        if !self.fully_classified {
            report.push_str("Not all selection criteria were used for this run\n");
        }
        report
    }
}

/// Flags that exclude a channel from design performance
const DESIGN_FLAGS: [Flag; 4] = [
    Flag::BadPedestal(Gain::G12),
    Flag::DeadPedestal(Gain::G12),
    Flag::VeryLargeRms(Gain::G12),
    Flag::LargeRms(Gain::G12),
];

/// Whole-run classifier over a measurement store and a flag store
#[derive(Debug)]
pub struct RunClassifier<M, F> {
    measurements: M,
    flags: F,
    classifier: ChannelClassifier,
    config: GhcConfig,
}

impl<M: MeasurementStore, F: FlagStore> RunClassifier<M, F> {
    /// Create a run classifier with the default configuration
    pub fn new(measurements: M, flags: F) -> Self {
        Self::with_config(measurements, flags, GhcConfig::default())
    }

    /// Create a run classifier with a custom configuration
    pub fn with_config(measurements: M, flags: F, config: GhcConfig) -> Self {
        Self {
            measurements,
            flags,
            classifier: ChannelClassifier::with_policy(config.policy.clone()),
            config,
        }
    }

    pub fn config(&self) -> &GhcConfig {
        &self.config
    }

    pub fn measurements(&self) -> &M {
        &self.measurements
    }

    /// Mutable access to the measurements, e.g. to load more data
    pub fn measurements_mut(&mut self) -> &mut M {
        &mut self.measurements
    }

    pub fn flag_store(&self) -> &F {
        &self.flags
    }

    /// Classify a run, unless it already is
    pub fn classify(&mut self, run: &RunId) -> Result<ClassificationResult> {
        let state = self.flags.state(run)?;
        match state.state {
            ClassificationState::Classified => {
                self.check_fingerprint(run, &state);
                info!("Run {} already classified", run);
                return self.result(run, state, false, Vec::new(), Vec::new());
            }
            ClassificationState::Classifying => {
                warn!("Run {} has an interrupted classification, starting over", run);
                self.flags.clear(run)?;
            }
            ClassificationState::Unclassified => {}
        }

        match self.run_passes(run) {
            Ok(result) => Ok(result),
            Err(err) => {
                error!("Classification of run {} aborted: {}", run, err);
                if let Err(e) = self.flags.clear(run) {
                    warn!("Could not clear partial results of run {}: {}", run, e);
                }
                Err(err)
            }
        }
    }

    /// Drop flags and missing channels of a run, returning it to unclassified
    pub fn reset(&mut self, run: &RunId) -> Result<()> {
        info!("Resetting classification of run {}", run);
        self.flags.clear(run)?;
        Ok(())
    }

    pub fn state(&self, run: &RunId) -> Result<RunState> {
        Ok(self.flags.state(run)?)
    }

    pub fn is_classified(&self, run: &RunId) -> Result<bool> {
        Ok(self.state(run)?.is_classified())
    }

    fn check_fingerprint(&self, run: &RunId, state: &RunState) {
        let Some(expected) = state.fingerprint else {
            return;
        };
        match self.measurements.fingerprint(run) {
            Ok(current) if current != expected => warn!(
                "Statistics of run {} changed since classification; reset the run to reclassify",
                run
            ),
            Ok(_) => {}
            Err(e) => debug!("Could not fingerprint run {}: {}", run, e),
        }
    }

    fn run_passes(&mut self, run: &RunId) -> Result<ClassificationResult> {
        let fingerprint = self.measurements.fingerprint(run)?;
        self.flags.set_state(
            run,
            RunState {
                state: ClassificationState::Classifying,
                fully_classified: false,
                fingerprint: Some(fingerprint),
            },
        )?;

        let mut reports = Vec::with_capacity(SubPass::ALL.len());
        let mut diagnostics = Vec::new();
        for pass in SubPass::ALL {
            info!("Classifying {} of run {} ...", pass, run);
            let outcome = match self.run_pass(run, pass, &mut diagnostics) {
                Ok(entries) => {
                    info!("Finished {}: {} entries", pass, entries);
                    SubPassOutcome::Completed { entries }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    info!("Skipped {}: {}", pass, err);
                    debug!("Error details: {:?}", err);
                    SubPassOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            reports.push(SubPassReport { pass, outcome });
        }

        let fully_classified = reports.iter().all(|r| r.outcome.is_completed());
        if !fully_classified {
            info!("Not all selection criteria are used for the classification of run {}", run);
        }
        let state = RunState {
            state: ClassificationState::Classified,
            fully_classified,
            fingerprint: Some(fingerprint),
        };
        self.flags.set_state(run, state)?;
        self.result(run, state, true, reports, diagnostics)
    }

    fn result(
        &self,
        run: &RunId,
        state: RunState,
        newly_classified: bool,
        reports: Vec<SubPassReport>,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<ClassificationResult> {
        let flag_count = self.flags.flags(run)?.values().map(BTreeSet::len).sum();
        let missing_count = self.flags.missing_channels(run)?.len();
        Ok(ClassificationResult {
            run: run.clone(),
            newly_classified,
            fully_classified: state.fully_classified,
            reports,
            diagnostics,
            flag_count,
            missing_count,
        })
    }

    fn run_pass(&mut self, run: &RunId, pass: SubPass, diagnostics: &mut Vec<Diagnostic>) -> Result<usize> {
        match pass {
            SubPass::Pedestal => self.pedestal_pass(run),
            SubPass::TestPulse => self.test_pulse_pass(run, diagnostics),
            SubPass::Laser => self.laser_pass(run, diagnostics),
            SubPass::HvOff => self.hv_off_pass(run),
            SubPass::MissingChannels => self.missing_pass(run),
        }
    }

    /// Per-channel statistics of the given run types, bulk-read by key
    fn gather(&self, run: &RunId, run_types: &[RunType]) -> Result<BTreeMap<ChannelId, ChannelStatistics>> {
        let mut channels: BTreeMap<ChannelId, ChannelStatistics> = BTreeMap::new();
        for key in StatisticKey::all()
            .into_iter()
            .filter(|k| run_types.contains(&k.run_type()))
        {
            for (channel, value) in self.measurements.values(run, key)? {
                channels.entry(channel).or_default().insert(key, value);
            }
        }
        Ok(channels)
    }

    fn commit(&mut self, run: &RunId, entries: Vec<(ChannelId, Flag)>) -> Result<usize> {
        self.flags.commit_flags(run, &entries)?;
        Ok(entries.len())
    }

    fn pedestal_pass(&mut self, run: &RunId) -> Result<usize> {
        let channels = self.gather(run, &[RunType::PedestalHvOn])?;
        if channels.is_empty() {
            return Err(GhcError::NoData(RunType::PedestalHvOn));
        }
        let mut entries = Vec::new();
        for (channel, stats) in &channels {
            let flags = self.classifier.classify_pedestal(*channel, stats);
            if !flags.is_empty() {
                debug!("Channel {}: {}", channel, join_flags(&flags));
            }
            entries.extend(flags.into_iter().map(|f| (*channel, f)));
        }
        self.commit(run, entries)
    }

    fn test_pulse_pass(&mut self, run: &RunId, diagnostics: &mut Vec<Diagnostic>) -> Result<usize> {
        let channels = self.gather(run, &[RunType::TestPulse])?;
        if channels.is_empty() {
            return Err(GhcError::NoData(RunType::TestPulse));
        }

        let mut averages = PopulationAverages::new();
        for subdetector in Subdetector::ALL {
            let population: Vec<&ChannelStatistics> = channels
                .iter()
                .filter(|(c, _)| c.subdetector() == subdetector)
                .map(|(_, s)| s)
                .collect();
            for gain in Gain::ALL {
                let key = StatisticKey::test_pulse(gain, Moment::Mean);
                let values = population.iter().filter_map(|s| s.get(key));
                match averages.record(RunType::TestPulse, subdetector, Some(gain), values) {
                    Some(avg) => debug!("Average test pulse amplitude {} {}: {:.3}", subdetector, gain, avg),
                    None => report_no_population(diagnostics, RunType::TestPulse, subdetector, Some(gain)),
                }
            }
        }

        let mut entries = Vec::new();
        for (channel, stats) in &channels {
            let flags = self.classifier.classify_test_pulse(*channel, stats, &averages);
            entries.extend(flags.into_iter().map(|f| (*channel, f)));
        }
        self.commit(run, entries)
    }

    fn laser_pass(&mut self, run: &RunId, diagnostics: &mut Vec<Diagnostic>) -> Result<usize> {
        let channels = self.gather(run, &[RunType::Laser])?;
        if channels.is_empty() {
            return Err(GhcError::NoData(RunType::Laser));
        }

        let mut averages = PopulationAverages::new();
        for subdetector in Subdetector::ALL {
            let population: Vec<&ChannelStatistics> = channels
                .iter()
                .filter(|(c, _)| c.subdetector() == subdetector)
                .map(|(_, s)| s)
                .collect();
            // Dead channels do not enter the average
            let positive = population
                .iter()
                .filter_map(|s| s.get(StatisticKey::laser(Moment::Mean)))
                .filter(|v| *v > 0.0);
            match averages.record(RunType::Laser, subdetector, None, positive) {
                Some(avg) => debug!("Average laser amplitude {}: {:.3}", subdetector, avg),
                None => report_no_population(diagnostics, RunType::Laser, subdetector, None),
            }
        }

        let mut entries = Vec::new();
        for (channel, stats) in &channels {
            let flags = self.classifier.classify_laser(*channel, stats, &averages);
            entries.extend(flags.into_iter().map(|f| (*channel, f)));
        }
        self.commit(run, entries)
    }

    fn hv_off_pass(&mut self, run: &RunId) -> Result<usize> {
        let channels = self.gather(run, &[RunType::PedestalHvOn, RunType::PedestalHvOff])?;
        let has_off = channels.values().any(|s| {
            s.iter()
                .any(|(k, _)| k.run_type() == RunType::PedestalHvOff)
        });
        if !has_off {
            return Err(GhcError::NoData(RunType::PedestalHvOff));
        }

        // Committed pedestal flags guard the rule
        let existing = self.flags.flags(run)?;
        let none = FlagSet::new();
        let mut entries = Vec::new();
        for (channel, stats) in &channels {
            let flags = existing.get(channel).unwrap_or(&none);
            if let Some(flag) = self.classifier.classify_hv_off(*channel, stats, flags) {
                entries.push((*channel, flag));
            }
        }
        self.commit(run, entries)
    }

    fn missing_pass(&mut self, run: &RunId) -> Result<usize> {
        let mut missing = BTreeSet::new();
        for run_type in [RunType::PedestalHvOn, RunType::TestPulse] {
            for (a, b) in Gain::PAIRS {
                let rms = |gain| StatisticKey::new(run_type, Some(gain), Moment::Rms);
                let (Some(key_a), Some(key_b)) = (rms(a), rms(b)) else {
                    continue;
                };
                let set_a: BTreeSet<ChannelId> = self.measurements.values(run, key_a)?.into_keys().collect();
                let set_b: BTreeSet<ChannelId> = self.measurements.values(run, key_b)?.into_keys().collect();
                missing.extend(set_a.symmetric_difference(&set_b).copied());
            }
        }
        if !missing.is_empty() {
            debug!(
                "Missing channels: {}",
                missing.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("; ")
            );
        }
        self.flags.commit_missing(run, &missing)?;
        Ok(missing.len())
    }

    // Queries. Masked channels are hidden unless the configuration keeps them.

    /// Flags of one channel
    pub fn flags_for_channel(&self, run: &RunId, channel: ChannelId) -> Result<FlagSet> {
        if self.config.is_hidden(channel) {
            return Ok(FlagSet::new());
        }
        Ok(self.flags.flags_for_channel(run, channel)?)
    }

    /// Flags of every visible flagged channel
    pub fn flags(&self, run: &RunId) -> Result<BTreeMap<ChannelId, FlagSet>> {
        let mut flags = self.flags.flags(run)?;
        flags.retain(|c, _| !self.config.is_hidden(*c));
        Ok(flags)
    }

    /// Channels whose flags satisfy `patterns` combined with `op`
    pub fn channels_with_flag(
        &self,
        run: &RunId,
        patterns: &[FlagPattern],
        op: CombineOp,
        subdetector: Option<Subdetector>,
    ) -> Result<BTreeSet<ChannelId>> {
        Ok(self
            .flags(run)?
            .into_iter()
            .filter(|(c, flags)| c.subdetector().selected_by(subdetector) && op.select(patterns, flags))
            .map(|(c, _)| c)
            .collect())
    }

    pub fn missing_channels(&self, run: &RunId) -> Result<BTreeSet<ChannelId>> {
        Ok(self.flags.missing_channels(run)?)
    }

    /// Channels with at least one statistic matching any pattern
    ///
    /// An empty pattern list means any MEAN of pedestal, test pulse or laser.
    pub fn active_channels(
        &self,
        run: &RunId,
        patterns: &[StatisticPattern],
        subdetector: Option<Subdetector>,
    ) -> Result<BTreeSet<ChannelId>> {
        let defaults;
        let patterns = if patterns.is_empty() {
            defaults = StatisticPattern::activity_defaults();
            &defaults[..]
        } else {
            patterns
        };
        let mut active = BTreeSet::new();
        for pattern in patterns {
            active.extend(self.measurements.channels_with_statistic(run, pattern, subdetector)?);
        }
        active.retain(|c| !self.config.is_hidden(*c));
        Ok(active)
    }

    /// Population channels not active for `patterns`
    ///
    /// Empty when a requested run type has no data at all in the run.
    pub fn inactive_channels(
        &self,
        run: &RunId,
        patterns: &[StatisticPattern],
        subdetector: Option<Subdetector>,
    ) -> Result<BTreeSet<ChannelId>> {
        for pattern in patterns {
            if !self.has_datatype(run, pattern.run_type)? {
                return Ok(BTreeSet::new());
            }
        }
        let active = self.active_channels(run, patterns, subdetector)?;
        let mut all = self.measurements.all_channel_ids(subdetector)?;
        all.retain(|c| !active.contains(c));
        Ok(all)
    }

    /// Channels with at least one flag
    pub fn problematic_channels(&self, run: &RunId, without_missing: bool) -> Result<BTreeSet<ChannelId>> {
        let mut channels: BTreeSet<ChannelId> = self
            .flags(run)?
            .into_iter()
            .filter(|(_, f)| !f.is_empty())
            .map(|(c, _)| c)
            .collect();
        if without_missing {
            let missing = self.missing_channels(run)?;
            channels.retain(|c| !missing.contains(c));
        }
        Ok(channels)
    }

    /// Active channels without any G12 pedestal problem
    pub fn design_channels(&self, run: &RunId) -> Result<BTreeSet<ChannelId>> {
        let patterns: Vec<FlagPattern> = DESIGN_FLAGS.iter().copied().map(FlagPattern::exact).collect();
        let flagged = self.channels_with_flag(run, &patterns, CombineOp::Or, None)?;
        let mut active = self.active_channels(run, &[], None)?;
        active.retain(|c| !flagged.contains(c));
        Ok(active)
    }

    /// Whether any channel has MEAN data of a run type
    pub fn has_datatype(&self, run: &RunId, run_type: RunType) -> Result<bool> {
        let pattern = StatisticPattern::run_type(run_type).with_moment(Moment::Mean);
        Ok(!self
            .measurements
            .channels_with_statistic(run, &pattern, None)?
            .is_empty())
    }

    /// Compare the flags of two runs
    pub fn diff(&self, current: &RunId, reference: &RunId) -> Result<RunDiff> {
        Ok(RunDiff::between(
            current.clone(),
            &self.flags(current)?,
            reference.clone(),
            &self.flags(reference)?,
        ))
    }

    /// Visible flags and missing channels of a run, for comparison tables
    pub fn run_flags(&self, run: &RunId) -> Result<RunFlags> {
        Ok(RunFlags {
            flags: self.flags(run)?,
            missing: self.missing_channels(run)?,
        })
    }
}

fn report_no_population(
    diagnostics: &mut Vec<Diagnostic>,
    run_type: RunType,
    subdetector: Subdetector,
    gain: Option<Gain>,
) {
    let diagnostic = Diagnostic::NoPopulation {
        run_type,
        subdetector,
        gain,
    };
    warn!("{}; dependent rules skipped", diagnostic);
    diagnostics.push(diagnostic);
}

fn join_flags(flags: &FlagSet) -> String {
    flags.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("+")
}
