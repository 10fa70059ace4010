// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Core identifiers: subdetectors, channels and monitoring runs
//!
//! Channel IDs carry their subdetector in the leading decimal digit
//! (`1xxxxxxxx` for the barrel, `2xxxxxxxx` for the endcaps).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Calorimeter subdetector region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subdetector {
    /// Barrel (EB)
    #[serde(rename = "EB")]
    Barrel,
    /// Endcaps (EE)
    #[serde(rename = "EE")]
    Endcap,
}

impl Subdetector {
    /// Both subdetectors, barrel first
    pub const ALL: [Subdetector; 2] = [Subdetector::Barrel, Subdetector::Endcap];

    /// Subdetector owning a raw channel ID, if the ID is well formed
    pub fn from_raw_id(raw: u32) -> Option<Self> {
        let mut leading = raw;
        while leading >= 10 {
            leading /= 10;
        }
        match leading {
            1 => Some(Self::Barrel),
            2 => Some(Self::Endcap),
            _ => None,
        }
    }

    /// Short code used in reports ("EB" / "EE")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Barrel => "EB",
            Self::Endcap => "EE",
        }
    }

    /// Number of readout channels the subdetector was built with
    pub fn nominal_channel_count(&self) -> usize {
        match self {
            Self::Barrel => 61_200,
            Self::Endcap => 14_648,
        }
    }

    /// Whether `filter` (None = whole detector) selects this subdetector
    pub fn selected_by(&self, filter: Option<Subdetector>) -> bool {
        filter.map_or(true, |s| s == *self)
    }
}

impl fmt::Display for Subdetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Subdetector {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EB" => Ok(Self::Barrel),
            "EE" => Ok(Self::Endcap),
            other => Err(ChannelError::UnknownSubdetector(other.to_string())),
        }
    }
}

/// Readout channel identifier
///
/// Construction validates the leading digit, so [`ChannelId::subdetector`]
/// never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChannelId(u32);

impl ChannelId {
    /// Create a channel ID, rejecting IDs outside both subdetectors
    pub fn new(raw: u32) -> Result<Self, ChannelError> {
        match Subdetector::from_raw_id(raw) {
            Some(_) => Ok(Self(raw)),
            None => Err(ChannelError::InvalidId(raw)),
        }
    }

    /// Raw numeric ID
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Subdetector the channel belongs to
    pub fn subdetector(&self) -> Subdetector {
        match Subdetector::from_raw_id(self.0) {
            Some(s) => s,
            None => unreachable!("channel IDs are validated on construction"),
        }
    }
}

impl TryFrom<u32> for ChannelId {
    type Error = ChannelError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<ChannelId> for u32 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<u32>()
            .map_err(|_| ChannelError::Malformed(s.to_string()))?;
        Self::new(raw)
    }
}

/// Monitoring run (GHC) identifier
///
/// Runs order naturally: digit groups compare as numbers, so `ghc9`
/// sorts before `ghc10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a run identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Ord for RunId {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RunId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural ordering: digit runs compare numerically, text case-insensitively
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = compare_chunk(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_chunk(x: &str, y: &str) -> Ordering {
    let x_digits = x.bytes().all(|b| b.is_ascii_digit());
    let y_digits = y.bytes().all(|b| b.is_ascii_digit());
    match (x_digits, y_digits) {
        (true, true) => {
            let x = x.trim_start_matches('0');
            let y = y.trim_start_matches('0');
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        }
        // Numbers sort before text, as in a split on digit groups
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.to_lowercase().cmp(&y.to_lowercase()),
    }
}

fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let bytes = s.as_bytes();
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let digit = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digit {
            end += 1;
        }
        let chunk = &s[start..end];
        start = end;
        Some(chunk)
    })
}
