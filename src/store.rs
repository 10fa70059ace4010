// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data store contracts
//!
//! The engine reads raw statistics from a [`MeasurementStore`] and persists
//! its results through a [`FlagStore`]. Both are scoped by run. In-memory
//! implementations are provided for file-driven use and for tests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::StoreError;
use crate::flag::{Flag, FlagSet};
use crate::model::{ChannelId, RunId, Subdetector};
use crate::statistic::{ChannelStatistics, StatisticKey, StatisticPattern};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of raw per-channel statistics
pub trait MeasurementStore {
    /// One statistic of one channel; `None` when not measured
    fn statistic(&self, run: &RunId, channel: ChannelId, key: StatisticKey) -> StoreResult<Option<f64>>;

    /// Every channel's value for one statistic
    fn values(&self, run: &RunId, key: StatisticKey) -> StoreResult<BTreeMap<ChannelId, f64>>;

    /// Full channel population, optionally restricted to one subdetector
    fn all_channel_ids(&self, subdetector: Option<Subdetector>) -> StoreResult<BTreeSet<ChannelId>>;

    /// Channels having at least one statistic selected by `pattern`
    fn channels_with_statistic(
        &self,
        run: &RunId,
        pattern: &StatisticPattern,
        subdetector: Option<Subdetector>,
    ) -> StoreResult<BTreeSet<ChannelId>> {
        let mut channels = BTreeSet::new();
        for key in StatisticKey::all().into_iter().filter(|k| pattern.matches(k)) {
            channels.extend(
                self.values(run, key)?
                    .into_keys()
                    .filter(|c| c.subdetector().selected_by(subdetector)),
            );
        }
        Ok(channels)
    }

    /// Every statistic of one channel
    fn channel_statistics(&self, run: &RunId, channel: ChannelId) -> StoreResult<ChannelStatistics> {
        let mut stats = ChannelStatistics::new();
        for key in StatisticKey::all() {
            if let Some(value) = self.statistic(run, channel, key)? {
                stats.insert(key, value);
            }
        }
        Ok(stats)
    }

    /// Hash of a run's statistics, used to notice changes after classification
    fn fingerprint(&self, run: &RunId) -> StoreResult<u64> {
        let mut data = Vec::new();
        for key in StatisticKey::all() {
            let values = self.values(run, key)?;
            if values.is_empty() {
                continue;
            }
            data.extend_from_slice(key.to_string().as_bytes());
            for (channel, value) in values {
                data.extend_from_slice(&channel.raw().to_be_bytes());
                data.extend_from_slice(&value.to_bits().to_be_bytes());
            }
        }
        Ok(xxh64(&data, 0))
    }
}

/// Classification progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassificationState {
    #[default]
    Unclassified,
    Classifying,
    Classified,
}

/// Persisted classification status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub state: ClassificationState,
    /// False when any sub-pass failed
    pub fully_classified: bool,
    /// Statistics fingerprint taken when classification started
    pub fingerprint: Option<u64>,
}

impl RunState {
    pub fn is_classified(&self) -> bool {
        self.state == ClassificationState::Classified
    }
}

/// Sink for classification results
pub trait FlagStore {
    /// Classification status of a run (default state if never seen)
    fn state(&self, run: &RunId) -> StoreResult<RunState>;

    /// Record the classification status of a run
    fn set_state(&mut self, run: &RunId, state: RunState) -> StoreResult<()>;

    /// Add flags in one batch; on error nothing is written
    fn commit_flags(&mut self, run: &RunId, flags: &[(ChannelId, Flag)]) -> StoreResult<()>;

    /// Add missing channels in one batch; on error nothing is written
    fn commit_missing(&mut self, run: &RunId, channels: &BTreeSet<ChannelId>) -> StoreResult<()>;

    /// Flags of every flagged channel
    fn flags(&self, run: &RunId) -> StoreResult<BTreeMap<ChannelId, FlagSet>>;

    /// Missing channels of a run
    fn missing_channels(&self, run: &RunId) -> StoreResult<BTreeSet<ChannelId>>;

    /// Drop flags, missing channels and state of a run
    fn clear(&mut self, run: &RunId) -> StoreResult<()>;

    /// Flags of one channel
    fn flags_for_channel(&self, run: &RunId, channel: ChannelId) -> StoreResult<FlagSet> {
        Ok(self.flags(run)?.remove(&channel).unwrap_or_default())
    }
}

/// In-memory measurement store
#[derive(Debug, Clone, Default)]
pub struct MemoryMeasurementStore {
    runs: BTreeMap<RunId, BTreeMap<StatisticKey, BTreeMap<ChannelId, f64>>>,
    /// Channels known to exist even without any statistic
    population: BTreeSet<ChannelId>,
}

impl MemoryMeasurementStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one statistic, replacing any previous value
    pub fn insert(&mut self, run: &RunId, channel: ChannelId, key: StatisticKey, value: f64) {
        self.runs
            .entry(run.clone())
            .or_default()
            .entry(key)
            .or_default()
            .insert(channel, value);
    }

    /// Declare channels of the detector population
    pub fn register_channels(&mut self, channels: impl IntoIterator<Item = ChannelId>) {
        self.population.extend(channels);
    }

    /// Number of stored values for a run
    pub fn value_count(&self, run: &RunId) -> usize {
        self.runs
            .get(run)
            .map_or(0, |keys| keys.values().map(BTreeMap::len).sum())
    }
}

impl MeasurementStore for MemoryMeasurementStore {
    fn statistic(&self, run: &RunId, channel: ChannelId, key: StatisticKey) -> StoreResult<Option<f64>> {
        Ok(self
            .runs
            .get(run)
            .and_then(|keys| keys.get(&key))
            .and_then(|values| values.get(&channel))
            .copied())
    }

    fn values(&self, run: &RunId, key: StatisticKey) -> StoreResult<BTreeMap<ChannelId, f64>> {
        Ok(self
            .runs
            .get(run)
            .and_then(|keys| keys.get(&key))
            .cloned()
            .unwrap_or_default())
    }

    fn all_channel_ids(&self, subdetector: Option<Subdetector>) -> StoreResult<BTreeSet<ChannelId>> {
        let seen = self
            .runs
            .values()
            .flat_map(|keys| keys.values())
            .flat_map(|values| values.keys());
        Ok(self
            .population
            .iter()
            .chain(seen)
            .filter(|c| c.subdetector().selected_by(subdetector))
            .copied()
            .collect())
    }

    fn channel_statistics(&self, run: &RunId, channel: ChannelId) -> StoreResult<ChannelStatistics> {
        let Some(keys) = self.runs.get(run) else {
            return Ok(ChannelStatistics::new());
        };
        Ok(keys
            .iter()
            .filter_map(|(key, values)| values.get(&channel).map(|v| (*key, *v)))
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
struct RunRecord {
    state: RunState,
    flags: BTreeMap<ChannelId, FlagSet>,
    missing: BTreeSet<ChannelId>,
}

/// In-memory flag store
#[derive(Debug, Clone, Default)]
pub struct MemoryFlagStore {
    runs: BTreeMap<RunId, RunRecord>,
}

impl MemoryFlagStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of (channel, flag) entries for a run
    pub fn flag_count(&self, run: &RunId) -> usize {
        self.runs
            .get(run)
            .map_or(0, |r| r.flags.values().map(BTreeSet::len).sum())
    }
}

impl FlagStore for MemoryFlagStore {
    fn state(&self, run: &RunId) -> StoreResult<RunState> {
        Ok(self.runs.get(run).map(|r| r.state).unwrap_or_default())
    }

    fn set_state(&mut self, run: &RunId, state: RunState) -> StoreResult<()> {
        self.runs.entry(run.clone()).or_default().state = state;
        Ok(())
    }

    fn commit_flags(&mut self, run: &RunId, flags: &[(ChannelId, Flag)]) -> StoreResult<()> {
        let record = self.runs.entry(run.clone()).or_default();
        for (channel, flag) in flags {
            record.flags.entry(*channel).or_default().insert(*flag);
        }
        Ok(())
    }

    fn commit_missing(&mut self, run: &RunId, channels: &BTreeSet<ChannelId>) -> StoreResult<()> {
        self.runs
            .entry(run.clone())
            .or_default()
            .missing
            .extend(channels.iter().copied());
        Ok(())
    }

    fn flags(&self, run: &RunId) -> StoreResult<BTreeMap<ChannelId, FlagSet>> {
        Ok(self.runs.get(run).map(|r| r.flags.clone()).unwrap_or_default())
    }

    fn missing_channels(&self, run: &RunId) -> StoreResult<BTreeSet<ChannelId>> {
        Ok(self.runs.get(run).map(|r| r.missing.clone()).unwrap_or_default())
    }

    fn clear(&mut self, run: &RunId) -> StoreResult<()> {
        self.runs.remove(run);
        Ok(())
    }

    fn flags_for_channel(&self, run: &RunId, channel: ChannelId) -> StoreResult<FlagSet> {
        Ok(self
            .runs
            .get(run)
            .and_then(|r| r.flags.get(&channel))
            .cloned()
            .unwrap_or_default())
    }
}
