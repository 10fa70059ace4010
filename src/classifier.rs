// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channel classification module
//!
//! This module turns the statistics of a single channel into defect flags,
//! using the [`ThresholdPolicy`] limits and, for test-pulse and laser data,
//! averages over the channel's subdetector.

use std::collections::BTreeMap;

use crate::flag::{Flag, FlagSet};
use crate::model::{ChannelId, Subdetector};
use crate::policy::ThresholdPolicy;
use crate::statistic::{ChannelStatistics, Gain, Moment, RunType, StatisticKey};

/// Outcome of the pedestal rule for one gain
///
/// A dead channel carries exactly one flag; the noise and mean checks only
/// run for channels that are not dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PedestalDecision {
    /// Mean or RMS missing, rule skipped
    Absent,
    /// Mean or RMS at or below the dead floor
    Dead,
    /// Not dead; zero or more of LR / VLR / BP
    Normal(FlagSet),
}

impl PedestalDecision {
    /// Flags this decision contributes for `gain`
    pub fn flags(&self, gain: Gain) -> FlagSet {
        match self {
            Self::Absent => FlagSet::new(),
            Self::Dead => FlagSet::from([Flag::DeadPedestal(gain)]),
            Self::Normal(flags) => flags.clone(),
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

/// Key of a population average: run type, subdetector and gain
pub type AverageKey = (RunType, Subdetector, Option<Gain>);

/// Subdetector-wide averages used by the relative rules
///
/// A missing entry means the average is undefined (no eligible channels);
/// rules depending on it are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationAverages {
    averages: BTreeMap<AverageKey, f64>,
}

impl PopulationAverages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the average of `values`; returns it, or `None` if `values` is empty
    pub fn record(
        &mut self,
        run_type: RunType,
        subdetector: Subdetector,
        gain: Option<Gain>,
        values: impl IntoIterator<Item = f64>,
    ) -> Option<f64> {
        let average = mean_of(values)?;
        self.averages.insert((run_type, subdetector, gain), average);
        Some(average)
    }

    /// Set an average directly
    pub fn set(&mut self, run_type: RunType, subdetector: Subdetector, gain: Option<Gain>, average: f64) {
        self.averages.insert((run_type, subdetector, gain), average);
    }

    pub fn get(&self, run_type: RunType, subdetector: Subdetector, gain: Option<Gain>) -> Option<f64> {
        self.averages.get(&(run_type, subdetector, gain)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }
}

/// Arithmetic mean, `None` for an empty input
pub fn mean_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Single-channel rule engine
#[derive(Debug, Clone, Default)]
pub struct ChannelClassifier {
    policy: ThresholdPolicy,
}

impl ChannelClassifier {
    /// Create a classifier with the reference policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with a custom policy
    pub fn with_policy(policy: ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Get current policy
    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Classify a channel against every rule
    ///
    /// The HV-off rule sees the pedestal flags computed here, as it does
    /// when the run classifier reads them back from the flag store.
    pub fn classify(
        &self,
        channel: ChannelId,
        stats: &ChannelStatistics,
        averages: &PopulationAverages,
    ) -> FlagSet {
        let mut flags = self.classify_pedestal(channel, stats);
        flags.extend(self.classify_test_pulse(channel, stats, averages));
        flags.extend(self.classify_laser(channel, stats, averages));
        if let Some(flag) = self.classify_hv_off(channel, stats, &flags) {
            flags.insert(flag);
        }
        flags
    }

    /// Pedestal rule for one gain
    pub fn pedestal_decision(
        &self,
        subdetector: Subdetector,
        gain: Gain,
        mean: Option<f64>,
        rms: Option<f64>,
    ) -> PedestalDecision {
        let (mean, rms) = match (mean, rms) {
            (Some(mean), Some(rms)) => (mean, rms),
            _ => return PedestalDecision::Absent,
        };

        let limits = self.policy.pedestal(subdetector, gain);
        if mean <= limits.dead.mean_floor || rms <= limits.dead.rms_floor {
            return PedestalDecision::Dead;
        }

        let mut flags = FlagSet::new();
        if limits.large_rms.low <= rms && rms < limits.large_rms.high {
            flags.insert(Flag::LargeRms(gain));
        }
        if rms >= limits.large_rms.high {
            flags.insert(Flag::VeryLargeRms(gain));
        }
        if self.policy.bad_pedestal.is_bad(mean) {
            flags.insert(Flag::BadPedestal(gain));
        }
        PedestalDecision::Normal(flags)
    }

    /// Pedestal (HV on) flags over all gains
    pub fn classify_pedestal(&self, channel: ChannelId, stats: &ChannelStatistics) -> FlagSet {
        let subdetector = channel.subdetector();
        Gain::ALL
            .into_iter()
            .flat_map(|gain| {
                self.pedestal_decision(
                    subdetector,
                    gain,
                    stats.get(StatisticKey::pedestal_on(gain, Moment::Mean)),
                    stats.get(StatisticKey::pedestal_on(gain, Moment::Rms)),
                )
                .flags(gain)
            })
            .collect()
    }

    /// Test-pulse flags over all gains
    pub fn classify_test_pulse(
        &self,
        channel: ChannelId,
        stats: &ChannelStatistics,
        averages: &PopulationAverages,
    ) -> FlagSet {
        let mut flags = FlagSet::new();
        let subdetector = channel.subdetector();
        for gain in Gain::ALL {
            let mean = match stats.get(StatisticKey::test_pulse(gain, Moment::Mean)) {
                Some(mean) => mean,
                None => continue,
            };

            if mean == 0.0 {
                flags.insert(Flag::DeadTestPulse(gain));
            }

            let average = match averages.get(RunType::TestPulse, subdetector, Some(gain)) {
                Some(avg) => avg,
                None => continue,
            };
            if mean > 0.0 && mean < self.policy.test_pulse.low_fraction * average {
                flags.insert(Flag::LowTestPulse(gain));
            }
            if mean > self.policy.test_pulse.high_fraction * average {
                flags.insert(Flag::LargeTestPulse(gain));
            }
        }
        flags
    }

    /// Laser flags
    pub fn classify_laser(
        &self,
        channel: ChannelId,
        stats: &ChannelStatistics,
        averages: &PopulationAverages,
    ) -> FlagSet {
        let mut flags = FlagSet::new();
        let mean = match stats.get(StatisticKey::laser(Moment::Mean)) {
            Some(mean) => mean,
            None => return flags,
        };

        if mean <= 0.0 {
            flags.insert(Flag::DeadLaser);
            return flags;
        }

        let average = match averages.get(RunType::Laser, channel.subdetector(), None) {
            Some(avg) => avg,
            None => return flags,
        };
        let cut = self.policy.laser.low_fraction * average;
        if mean < cut {
            flags.insert(Flag::LowLaser);
        }
        if mean > cut {
            if let Some(rms) = stats.get(StatisticKey::laser(Moment::Rms)) {
                if rms / mean > self.policy.laser.rms_ratio {
                    flags.insert(Flag::LargeLaserError);
                }
            }
        }
        flags
    }

    /// HV-off rule, evaluated after pedestal classification
    ///
    /// `existing` must hold the channel's pedestal flags for this run.
    pub fn classify_hv_off(
        &self,
        channel: ChannelId,
        stats: &ChannelStatistics,
        existing: &FlagSet,
    ) -> Option<Flag> {
        let gain = crate::policy::HvOffRule::GAIN;
        let rule = &self.policy.hv_off;

        let rms_on = stats
            .get(StatisticKey::pedestal_on(gain, Moment::Rms))
            .filter(|v| *v > 0.0);
        let rms_off = stats
            .get(StatisticKey::pedestal_off(gain, Moment::Rms))
            .filter(|v| *v > 0.0);
        let (rms_on, rms_off) = match (rms_on, rms_off) {
            (Some(on), Some(off)) => (on, off),
            (on, off) => {
                log::debug!(
                    "Missing pedestal data for channel {}: PED_ON_RMS_G12 = {:?}, PED_OFF_RMS_G12 = {:?}",
                    channel,
                    on,
                    off
                );
                return None;
            }
        };

        if (rms_on - rms_off).abs() >= rule.rms_difference {
            return None;
        }
        if let Some(mean) = stats.get(StatisticKey::pedestal_on(gain, Moment::Mean)) {
            if !rule.in_window(mean) {
                return None;
            }
        }
        if existing.contains(&Flag::DeadPedestal(gain)) || existing.contains(&Flag::BadPedestal(gain)) {
            return None;
        }
        Some(Flag::BadVoltage(gain))
    }
}
