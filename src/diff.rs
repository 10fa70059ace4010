// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Flag-set differ
//!
//! Compares two classification runs: which flags (or channels) appeared,
//! which were resolved and which persisted. Runs are compared pairwise in
//! natural order, each against its predecessor.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Add;

use serde::Serialize;

use crate::flag::{Flag, FlagSet};
use crate::model::{ChannelId, RunId};

/// Set difference between a current and a reference set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetDiff<T: Ord> {
    /// In current only
    pub added: BTreeSet<T>,
    /// In reference only
    pub removed: BTreeSet<T>,
    /// In both
    pub common: BTreeSet<T>,
}

impl<T: Ord + Clone> SetDiff<T> {
    pub fn between(current: &BTreeSet<T>, reference: &BTreeSet<T>) -> Self {
        Self {
            added: current.difference(reference).cloned().collect(),
            removed: reference.difference(current).cloned().collect(),
            common: current.intersection(reference).cloned().collect(),
        }
    }

    /// Whether anything was added or removed
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Size of the current set
    pub fn current_len(&self) -> usize {
        self.added.len() + self.common.len()
    }

    /// Counts for `N^{+a}_{-r}` display
    pub fn delta(&self) -> CountDelta {
        CountDelta {
            total: self.current_len(),
            added: self.added.len(),
            removed: self.removed.len(),
        }
    }
}

impl<T: Ord> Default for SetDiff<T> {
    fn default() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            common: BTreeSet::new(),
        }
    }
}

/// Flag difference of one channel
pub type FlagDiff = SetDiff<Flag>;

/// Compare a channel's flags with its flags in a reference run
pub fn diff(current: &FlagSet, reference: &FlagSet) -> FlagDiff {
    SetDiff::between(current, reference)
}

/// A count and its change against a previous run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountDelta {
    pub total: usize,
    pub added: usize,
    pub removed: usize,
}

impl fmt::Display for CountDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{{+{}}}_{{-{}}}", self.total, self.added, self.removed)
    }
}

impl Add for CountDelta {
    type Output = CountDelta;

    fn add(self, other: CountDelta) -> CountDelta {
        CountDelta {
            total: self.total + other.total,
            added: self.added + other.added,
            removed: self.removed + other.removed,
        }
    }
}

impl std::iter::Sum for CountDelta {
    fn sum<I: Iterator<Item = CountDelta>>(iter: I) -> Self {
        iter.fold(CountDelta::default(), Add::add)
    }
}

/// Flag comparison of two runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDiff {
    pub current: RunId,
    pub reference: RunId,
    /// Every channel flagged in either run
    pub channels: BTreeMap<ChannelId, FlagDiff>,
}

impl RunDiff {
    /// Compare two runs' flag maps
    pub fn between(
        current: RunId,
        current_flags: &BTreeMap<ChannelId, FlagSet>,
        reference: RunId,
        reference_flags: &BTreeMap<ChannelId, FlagSet>,
    ) -> Self {
        let empty = FlagSet::new();
        let ids: BTreeSet<ChannelId> = current_flags
            .keys()
            .chain(reference_flags.keys())
            .copied()
            .collect();
        let channels = ids
            .into_iter()
            .map(|id| {
                let now = current_flags.get(&id).unwrap_or(&empty);
                let before = reference_flags.get(&id).unwrap_or(&empty);
                (id, diff(now, before))
            })
            .collect();
        Self {
            current,
            reference,
            channels,
        }
    }

    pub fn changed_channels(&self) -> impl Iterator<Item = (&ChannelId, &FlagDiff)> {
        self.channels.iter().filter(|(_, d)| d.changed())
    }

    pub fn unchanged_channels(&self) -> impl Iterator<Item = (&ChannelId, &FlagDiff)> {
        self.channels.iter().filter(|(_, d)| !d.changed())
    }

    /// Aggregate flag counts, summed over channels
    pub fn summary(&self) -> CountDelta {
        self.channels.values().map(SetDiff::delta).sum()
    }
}

/// Consecutive pairs `(current, previous)` of an ordered sequence
pub fn pairwise<T>(items: &[T]) -> impl Iterator<Item = (&T, &T)> {
    items.windows(2).map(|w| (&w[1], &w[0]))
}

/// One run's classification output as needed for comparison
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub flags: BTreeMap<ChannelId, FlagSet>,
    pub missing: BTreeSet<ChannelId>,
}

/// State of a channel in one column of the comparison table
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCell {
    /// Channel is a missing channel in this run
    Missed,
    /// Flags in this run (compared to the previous run, if any)
    Flags { diff: FlagDiff, compared: bool },
}

impl ChannelCell {
    pub fn changed(&self) -> bool {
        match self {
            Self::Missed => true,
            Self::Flags { diff, compared } => *compared && diff.changed(),
        }
    }
}

impl fmt::Display for ChannelCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let diff = match self {
            Self::Missed => return f.write_str("Missed channel"),
            Self::Flags { diff, .. } => diff,
        };
        let all: BTreeSet<&Flag> = diff
            .added
            .iter()
            .chain(&diff.removed)
            .chain(&diff.common)
            .collect();
        let items: Vec<String> = all
            .into_iter()
            .map(|flag| {
                if diff.added.contains(flag) {
                    format!("+{}", flag)
                } else if diff.removed.contains(flag) {
                    format!("-{}", flag)
                } else {
                    flag.to_string()
                }
            })
            .collect();
        if diff.current_len() == 0 {
            if items.is_empty() {
                f.write_str("OK")
            } else {
                write!(f, "OK: {}", items.join(", "))
            }
        } else {
            f.write_str(&items.join(", "))
        }
    }
}

/// Which rows of a comparison table to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFilter {
    #[default]
    All,
    Changed,
    Unchanged,
}

/// Per-channel history across several runs
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    pub runs: Vec<RunId>,
    pub rows: BTreeMap<ChannelId, Vec<ChannelCell>>,
}

impl ComparisonTable {
    /// Build the table for channels flagged in any run; `runs` must be in order
    pub fn build(runs: &[(RunId, RunFlags)]) -> Self {
        let channels: BTreeSet<ChannelId> = runs
            .iter()
            .flat_map(|(_, r)| r.flags.keys().copied())
            .collect();
        let empty = FlagSet::new();

        let rows = channels
            .into_iter()
            .map(|channel| {
                let cells = runs
                    .iter()
                    .enumerate()
                    .map(|(i, (_, run))| {
                        let current = run.flags.get(&channel).unwrap_or(&empty);
                        if current.is_empty() && run.missing.contains(&channel) {
                            return ChannelCell::Missed;
                        }
                        match i.checked_sub(1).map(|p| &runs[p].1) {
                            Some(prev) => ChannelCell::Flags {
                                diff: diff(current, prev.flags.get(&channel).unwrap_or(&empty)),
                                compared: true,
                            },
                            None => ChannelCell::Flags {
                                diff: diff(current, current),
                                compared: false,
                            },
                        }
                    })
                    .collect();
                (channel, cells)
            })
            .collect();

        Self {
            runs: runs.iter().map(|(id, _)| id.clone()).collect(),
            rows,
        }
    }

    /// Rows selected by `filter`
    pub fn rows(&self, filter: RowFilter) -> impl Iterator<Item = (&ChannelId, &Vec<ChannelCell>)> {
        self.rows.iter().filter(move |(_, cells)| {
            let changed = cells.iter().any(ChannelCell::changed);
            match filter {
                RowFilter::All => true,
                RowFilter::Changed => changed,
                RowFilter::Unchanged => !changed,
            }
        })
    }

    /// Plain-text rendering, one row per channel
    pub fn render(&self, filter: RowFilter) -> String {
        let mut out = String::new();
        out.push_str("Channel     | Det | ");
        out.push_str(
            &self
                .runs
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push('\n');
        for (channel, cells) in self.rows(filter) {
            let cells: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
            out.push_str(&format!(
                "{:<11} | {}  | {}\n",
                channel,
                channel.subdetector(),
                cells.join(" | ")
            ));
        }
        out
    }
}
