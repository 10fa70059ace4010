// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed statistic keys
//!
//! A statistic is identified by run type, gain (absent for laser runs)
//! and moment. Keys keep the legacy text form (`PED_ON_MEAN_G12`,
//! `APD_RMS`, ...) for ingestion and logs, but lookups never go
//! through strings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GhcError;

/// Calibration run type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Pedestal run with high voltage on
    PedestalHvOn,
    /// Pedestal run with high voltage off
    PedestalHvOff,
    /// Test-pulse run
    TestPulse,
    /// Laser run, APD amplitude
    Laser,
    /// Laser run, APD over PN-diode ratio
    LaserOverPn,
}

impl RunType {
    /// All run types
    pub const ALL: [RunType; 5] = [
        RunType::PedestalHvOn,
        RunType::PedestalHvOff,
        RunType::TestPulse,
        RunType::Laser,
        RunType::LaserOverPn,
    ];

    /// Whether statistics of this run type are recorded per gain
    pub fn is_gained(&self) -> bool {
        matches!(
            self,
            Self::PedestalHvOn | Self::PedestalHvOff | Self::TestPulse
        )
    }

    /// Prefix of the legacy key text
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PedestalHvOn => "PED_ON",
            Self::PedestalHvOff => "PED_OFF",
            Self::TestPulse => "ADC",
            Self::Laser => "APD",
            Self::LaserOverPn => "APD_OVER_PN",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PedestalHvOn => "pedestal HV ON",
            Self::PedestalHvOff => "pedestal HV OFF",
            Self::TestPulse => "test pulse",
            Self::Laser => "laser",
            Self::LaserOverPn => "laser APD/PN",
        };
        f.write_str(name)
    }
}

/// Readout gain setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gain {
    G1,
    G6,
    G12,
}

impl Gain {
    /// All gains in increasing amplification
    pub const ALL: [Gain; 3] = [Gain::G1, Gain::G6, Gain::G12];

    /// Gain pairs compared for missing-channel detection
    pub const PAIRS: [(Gain, Gain); 3] = [(Gain::G1, Gain::G6), (Gain::G1, Gain::G12), (Gain::G6, Gain::G12)];

    /// Legacy suffix ("G1", "G6", "G12")
    pub fn code(&self) -> &'static str {
        match self {
            Self::G1 => "G1",
            Self::G6 => "G6",
            Self::G12 => "G12",
        }
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Gain {
    type Err = GhcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gain::ALL
            .into_iter()
            .find(|g| g.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GhcError::UnknownKey(s.to_string()))
    }
}

/// Statistical moment of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Moment {
    Mean,
    Rms,
}

impl Moment {
    pub const ALL: [Moment; 2] = [Moment::Mean, Moment::Rms];

    fn code(&self) -> &'static str {
        match self {
            Self::Mean => "MEAN",
            Self::Rms => "RMS",
        }
    }
}

/// Composite statistic key
///
/// Gained run types always carry a gain and laser run types never do;
/// the constructors enforce this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StatisticKey {
    run_type: RunType,
    gain: Option<Gain>,
    moment: Moment,
}

impl StatisticKey {
    /// Create a key, returning `None` when the gain does not fit the run type
    pub fn new(run_type: RunType, gain: Option<Gain>, moment: Moment) -> Option<Self> {
        if run_type.is_gained() != gain.is_some() {
            return None;
        }
        Some(Self {
            run_type,
            gain,
            moment,
        })
    }

    /// Pedestal statistic, HV on
    pub fn pedestal_on(gain: Gain, moment: Moment) -> Self {
        Self {
            run_type: RunType::PedestalHvOn,
            gain: Some(gain),
            moment,
        }
    }

    /// Pedestal statistic, HV off
    pub fn pedestal_off(gain: Gain, moment: Moment) -> Self {
        Self {
            run_type: RunType::PedestalHvOff,
            gain: Some(gain),
            moment,
        }
    }

    /// Test-pulse amplitude statistic
    pub fn test_pulse(gain: Gain, moment: Moment) -> Self {
        Self {
            run_type: RunType::TestPulse,
            gain: Some(gain),
            moment,
        }
    }

    /// Laser APD amplitude statistic
    pub fn laser(moment: Moment) -> Self {
        Self {
            run_type: RunType::Laser,
            gain: None,
            moment,
        }
    }

    /// Laser APD/PN ratio statistic
    pub fn laser_over_pn(moment: Moment) -> Self {
        Self {
            run_type: RunType::LaserOverPn,
            gain: None,
            moment,
        }
    }

    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    pub fn gain(&self) -> Option<Gain> {
        self.gain
    }

    pub fn moment(&self) -> Moment {
        self.moment
    }

    /// Every valid key, in key order
    pub fn all() -> Vec<StatisticKey> {
        let mut keys = Vec::new();
        for run_type in RunType::ALL {
            let gains: Vec<Option<Gain>> = if run_type.is_gained() {
                Gain::ALL.into_iter().map(Some).collect()
            } else {
                vec![None]
            };
            for gain in gains {
                for moment in Moment::ALL {
                    keys.push(Self {
                        run_type,
                        gain,
                        moment,
                    });
                }
            }
        }
        keys.sort();
        keys
    }
}

impl fmt::Display for StatisticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gain {
            Some(gain) => write!(
                f,
                "{}_{}_{}",
                self.run_type.prefix(),
                self.moment.code(),
                gain
            ),
            None => write!(f, "{}_{}", self.run_type.prefix(), self.moment.code()),
        }
    }
}

impl FromStr for StatisticKey {
    type Err = GhcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::all()
            .into_iter()
            .find(|k| k.to_string() == wanted)
            .ok_or_else(|| GhcError::UnknownKey(s.to_string()))
    }
}

impl TryFrom<String> for StatisticKey {
    type Error = GhcError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StatisticKey> for String {
    fn from(key: StatisticKey) -> Self {
        key.to_string()
    }
}

/// Selection over statistic keys (a run type, optionally narrowed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatisticPattern {
    pub run_type: RunType,
    pub gain: Option<Gain>,
    pub moment: Option<Moment>,
}

impl StatisticPattern {
    /// Every statistic of a run type
    pub fn run_type(run_type: RunType) -> Self {
        Self {
            run_type,
            gain: None,
            moment: None,
        }
    }

    /// Narrow to one gain
    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Narrow to one moment
    pub fn with_moment(mut self, moment: Moment) -> Self {
        self.moment = Some(moment);
        self
    }

    /// Patterns defining an "active" channel when no datatype is requested:
    /// any MEAN of pedestal (HV on/off), test pulse or laser
    pub fn activity_defaults() -> Vec<StatisticPattern> {
        [
            RunType::PedestalHvOff,
            RunType::PedestalHvOn,
            RunType::TestPulse,
            RunType::Laser,
        ]
        .into_iter()
        .map(|rt| Self::run_type(rt).with_moment(Moment::Mean))
        .collect()
    }

    /// Whether a key is selected by this pattern
    pub fn matches(&self, key: &StatisticKey) -> bool {
        key.run_type == self.run_type
            && self.gain.map_or(true, |g| key.gain == Some(g))
            && self.moment.map_or(true, |m| key.moment == m)
    }
}

impl From<StatisticKey> for StatisticPattern {
    fn from(key: StatisticKey) -> Self {
        Self {
            run_type: key.run_type,
            gain: key.gain,
            moment: Some(key.moment),
        }
    }
}

/// All statistics of one channel within one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStatistics {
    values: BTreeMap<StatisticKey, f64>,
}

impl ChannelStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value, replacing any previous one
    pub fn insert(&mut self, key: StatisticKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Builder-style insert
    pub fn with(mut self, key: StatisticKey, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    /// Value of a statistic, `None` when absent
    pub fn get(&self, key: StatisticKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatisticKey, &f64)> {
        self.values.iter()
    }
}

impl FromIterator<(StatisticKey, f64)> for ChannelStatistics {
    fn from_iter<I: IntoIterator<Item = (StatisticKey, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
