// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Defect flag vocabulary
//!
//! Each flag names one defect class detected for a channel within a run.
//! Pedestal, high-voltage and test-pulse flags are per gain and print
//! with a gain suffix (`DPG1`, `BVG12`); laser flags have no gain.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GhcError;
use crate::statistic::{Gain, RunType};

/// Set of flags for one channel; ordered so reports list flags naturally
pub type FlagSet = BTreeSet<Flag>;

/// Kind of defect, without gain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlagKind {
    /// DP: pedestal mean or RMS at or below the dead floor
    DeadPedestal,
    /// BP: pedestal mean too far from nominal
    BadPedestal,
    /// LR: noisy
    LargeRms,
    /// VLR: very noisy
    VeryLargeRms,
    /// BV: pedestal RMS unchanged with HV off
    BadVoltage,
    /// DTP: no test-pulse response
    DeadTestPulse,
    /// STP: test-pulse amplitude low against the subdetector average
    LowTestPulse,
    /// LTP: test-pulse amplitude high against the subdetector average
    LargeTestPulse,
    /// DLAMPL: no laser response
    DeadLaser,
    /// SLAMPL: laser amplitude low against the subdetector average
    LowLaser,
    /// LLERRO: laser amplitude with large relative RMS
    LargeLaserError,
}

impl FlagKind {
    pub const ALL: [FlagKind; 11] = [
        FlagKind::DeadPedestal,
        FlagKind::BadPedestal,
        FlagKind::LargeRms,
        FlagKind::VeryLargeRms,
        FlagKind::BadVoltage,
        FlagKind::DeadTestPulse,
        FlagKind::LowTestPulse,
        FlagKind::LargeTestPulse,
        FlagKind::DeadLaser,
        FlagKind::LowLaser,
        FlagKind::LargeLaserError,
    ];

    /// Flags derived from HV-on pedestal data
    pub const PEDESTAL: [FlagKind; 4] = [
        FlagKind::DeadPedestal,
        FlagKind::BadPedestal,
        FlagKind::LargeRms,
        FlagKind::VeryLargeRms,
    ];

    /// Flags derived from HV-off pedestal data
    pub const HIGH_VOLTAGE: [FlagKind; 1] = [FlagKind::BadVoltage];

    /// Flags derived from test-pulse data
    pub const TEST_PULSE: [FlagKind; 3] = [
        FlagKind::DeadTestPulse,
        FlagKind::LowTestPulse,
        FlagKind::LargeTestPulse,
    ];

    /// Short code without gain suffix
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeadPedestal => "DP",
            Self::BadPedestal => "BP",
            Self::LargeRms => "LR",
            Self::VeryLargeRms => "VLR",
            Self::BadVoltage => "BV",
            Self::DeadTestPulse => "DTP",
            Self::LowTestPulse => "STP",
            Self::LargeTestPulse => "LTP",
            Self::DeadLaser => "DLAMPL",
            Self::LowLaser => "SLAMPL",
            Self::LargeLaserError => "LLERRO",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::DeadPedestal => "Dead Pedestal",
            Self::BadPedestal => "Bad Pedestal",
            Self::LargeRms => "Large RMS",
            Self::VeryLargeRms => "Very Large RMS",
            Self::BadVoltage => "Bad Voltage",
            Self::DeadTestPulse => "Dead TestPulse",
            Self::LowTestPulse => "Low TestPulse amplitude",
            Self::LargeTestPulse => "Large TP amplitude",
            Self::DeadLaser => "Dead laser",
            Self::LowLaser => "Low Laser Amplitude",
            Self::LargeLaserError => "Large RMS",
        }
    }

    /// Whether flags of this kind carry a gain
    pub fn is_gained(&self) -> bool {
        !matches!(
            self,
            Self::DeadLaser | Self::LowLaser | Self::LargeLaserError
        )
    }

    /// Run type whose data this kind is derived from
    pub fn source(&self) -> RunType {
        match self {
            Self::DeadPedestal | Self::BadPedestal | Self::LargeRms | Self::VeryLargeRms => {
                RunType::PedestalHvOn
            }
            Self::BadVoltage => RunType::PedestalHvOff,
            Self::DeadTestPulse | Self::LowTestPulse | Self::LargeTestPulse => RunType::TestPulse,
            Self::DeadLaser | Self::LowLaser | Self::LargeLaserError => RunType::Laser,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

/// One detected defect, with its gain where the kind has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Flag {
    DeadPedestal(Gain),
    BadPedestal(Gain),
    LargeRms(Gain),
    VeryLargeRms(Gain),
    BadVoltage(Gain),
    DeadTestPulse(Gain),
    LowTestPulse(Gain),
    LargeTestPulse(Gain),
    DeadLaser,
    LowLaser,
    LargeLaserError,
}

impl Flag {
    /// Build a flag from kind and gain; `None` if the gain does not fit the kind
    pub fn new(kind: FlagKind, gain: Option<Gain>) -> Option<Self> {
        let flag = match (kind, gain) {
            (FlagKind::DeadPedestal, Some(g)) => Self::DeadPedestal(g),
            (FlagKind::BadPedestal, Some(g)) => Self::BadPedestal(g),
            (FlagKind::LargeRms, Some(g)) => Self::LargeRms(g),
            (FlagKind::VeryLargeRms, Some(g)) => Self::VeryLargeRms(g),
            (FlagKind::BadVoltage, Some(g)) => Self::BadVoltage(g),
            (FlagKind::DeadTestPulse, Some(g)) => Self::DeadTestPulse(g),
            (FlagKind::LowTestPulse, Some(g)) => Self::LowTestPulse(g),
            (FlagKind::LargeTestPulse, Some(g)) => Self::LargeTestPulse(g),
            (FlagKind::DeadLaser, None) => Self::DeadLaser,
            (FlagKind::LowLaser, None) => Self::LowLaser,
            (FlagKind::LargeLaserError, None) => Self::LargeLaserError,
            _ => return None,
        };
        Some(flag)
    }

    pub fn kind(&self) -> FlagKind {
        match self {
            Self::DeadPedestal(_) => FlagKind::DeadPedestal,
            Self::BadPedestal(_) => FlagKind::BadPedestal,
            Self::LargeRms(_) => FlagKind::LargeRms,
            Self::VeryLargeRms(_) => FlagKind::VeryLargeRms,
            Self::BadVoltage(_) => FlagKind::BadVoltage,
            Self::DeadTestPulse(_) => FlagKind::DeadTestPulse,
            Self::LowTestPulse(_) => FlagKind::LowTestPulse,
            Self::LargeTestPulse(_) => FlagKind::LargeTestPulse,
            Self::DeadLaser => FlagKind::DeadLaser,
            Self::LowLaser => FlagKind::LowLaser,
            Self::LargeLaserError => FlagKind::LargeLaserError,
        }
    }

    pub fn gain(&self) -> Option<Gain> {
        match *self {
            Self::DeadPedestal(g)
            | Self::BadPedestal(g)
            | Self::LargeRms(g)
            | Self::VeryLargeRms(g)
            | Self::BadVoltage(g)
            | Self::DeadTestPulse(g)
            | Self::LowTestPulse(g)
            | Self::LargeTestPulse(g) => Some(g),
            Self::DeadLaser | Self::LowLaser | Self::LargeLaserError => None,
        }
    }

    /// Every flag in the vocabulary, in natural order
    pub fn all() -> Vec<Flag> {
        let mut flags = Vec::new();
        for kind in FlagKind::ALL {
            if kind.is_gained() {
                flags.extend(Gain::ALL.into_iter().filter_map(|g| Flag::new(kind, Some(g))));
            } else {
                flags.extend(Flag::new(kind, None));
            }
        }
        flags
    }

    /// Description including the gain, e.g. "DPG1(Dead Pedestal in Gain 1)"
    pub fn describe(&self) -> String {
        match (self.kind(), self.gain()) {
            (FlagKind::BadVoltage, _) | (_, None) => {
                format!("{}({})", self, self.kind().description())
            }
            (kind, Some(gain)) => format!(
                "{}({} in Gain {})",
                self,
                kind.description(),
                &gain.code()[1..]
            ),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gain() {
            Some(gain) => write!(f, "{}{}", self.kind().code(), gain),
            None => f.write_str(self.kind().code()),
        }
    }
}

impl FromStr for Flag {
    type Err = GhcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        if let Some(kind) = FlagKind::from_code(&code) {
            if let Some(flag) = Flag::new(kind, None) {
                return Ok(flag);
            }
        }
        // Longest suffix first so "G12" is not read as "G1" + "2"
        for gain in [Gain::G12, Gain::G6, Gain::G1] {
            if let Some(prefix) = code.strip_suffix(gain.code()) {
                if let Some(flag) = FlagKind::from_code(prefix).and_then(|k| Flag::new(k, Some(gain))) {
                    return Ok(flag);
                }
            }
        }
        Err(GhcError::UnknownFlag(s.to_string()))
    }
}

impl TryFrom<String> for Flag {
    type Error = GhcError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> Self {
        flag.to_string()
    }
}

/// Selector over flags: a kind, optionally restricted to one gain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagPattern {
    pub kind: FlagKind,
    pub gain: Option<Gain>,
}

impl FlagPattern {
    /// Matches exactly one flag
    pub fn exact(flag: Flag) -> Self {
        Self {
            kind: flag.kind(),
            gain: flag.gain(),
        }
    }

    /// Matches a kind at any gain
    pub fn kind(kind: FlagKind) -> Self {
        Self { kind, gain: None }
    }

    pub fn matches(&self, flag: &Flag) -> bool {
        flag.kind() == self.kind && self.gain.map_or(true, |g| flag.gain() == Some(g))
    }

    /// Whether any flag of the set matches
    pub fn matches_any(&self, flags: &FlagSet) -> bool {
        flags.iter().any(|f| self.matches(f))
    }
}

impl From<Flag> for FlagPattern {
    fn from(flag: Flag) -> Self {
        Self::exact(flag)
    }
}

impl FromStr for FlagPattern {
    type Err = GhcError;

    /// Accepts an exact code (`LRG12`) or a kind with a wildcard (`BV%`, `BV*`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(prefix) = trimmed
            .strip_suffix('%')
            .or_else(|| trimmed.strip_suffix('*'))
        {
            let code = prefix.to_ascii_uppercase();
            return FlagKind::from_code(&code)
                .map(Self::kind)
                .ok_or_else(|| GhcError::UnknownFlag(s.to_string()));
        }
        trimmed.parse::<Flag>().map(Self::exact)
    }
}

/// How several flag patterns combine when selecting channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineOp {
    /// Channel must match every pattern
    #[default]
    And,
    /// Channel must match at least one pattern
    Or,
}

impl CombineOp {
    /// Whether a channel's flags satisfy the patterns
    pub fn select(&self, patterns: &[FlagPattern], flags: &FlagSet) -> bool {
        if patterns.is_empty() {
            return false;
        }
        match self {
            Self::And => patterns.iter().all(|p| p.matches_any(flags)),
            Self::Or => patterns.iter().any(|p| p.matches_any(flags)),
        }
    }
}
