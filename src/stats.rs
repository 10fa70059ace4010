// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Run statistics
//!
//! Summary counts of a classified run, optionally against its predecessor,
//! and the per-flag breakdown by subdetector. Counts against a predecessor
//! display as `N^{+a}_{-r}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::diff::{pairwise, SetDiff};
use crate::error::Result;
use crate::flag::{CombineOp, Flag, FlagKind, FlagPattern};
use crate::model::{ChannelId, RunId, Subdetector};
use crate::run::RunClassifier;
use crate::statistic::{Gain, Moment, RunType, StatisticKey, StatisticPattern};
use crate::store::{FlagStore, MeasurementStore};

/// One cell of a statistics table
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    /// Channel count, no predecessor
    Count(usize),
    /// Channel count against the predecessor
    Delta(crate::diff::CountDelta),
    /// Pedestal RMS spread, undefined with fewer than two channels
    Spread(Option<f64>),
}

impl StatValue {
    /// Count or delta of a channel set
    pub fn of_channels(current: &BTreeSet<ChannelId>, previous: Option<&BTreeSet<ChannelId>>) -> Self {
        match previous {
            Some(previous) => Self::Delta(SetDiff::between(current, previous).delta()),
            None => Self::Count(current.len()),
        }
    }

    /// Current channel count, if this is a count
    pub fn total(&self) -> Option<usize> {
        match self {
            Self::Count(n) => Some(*n),
            Self::Delta(d) => Some(d.total),
            Self::Spread(_) => None,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::Delta(d) => write!(f, "{}", d),
            Self::Spread(Some(v)) => write!(f, "{}", v),
            Self::Spread(None) => f.write_str("n/a"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatRow {
    pub label: String,
    pub value: StatValue,
}

/// Summary table of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub run: RunId,
    pub reference: Option<RunId>,
    pub rows: Vec<StatRow>,
}

fn run_type_label(run_type: RunType) -> &'static str {
    match run_type {
        RunType::PedestalHvOn => "Pedestals (HV ON)",
        RunType::PedestalHvOff => "Pedestals (HV OFF)",
        RunType::TestPulse => "Testpulse",
        RunType::Laser => "Laser",
        RunType::LaserOverPn => "Laser APD/PN",
    }
}

impl RunStatistics {
    /// Collect the summary of `run`, against `previous` when given
    pub fn collect<M: MeasurementStore, F: FlagStore>(
        rc: &RunClassifier<M, F>,
        run: &RunId,
        previous: Option<&RunId>,
    ) -> Result<Self> {
        let mut rows = Vec::new();
        let mut push_sets = |label: String, sets: (BTreeSet<ChannelId>, Option<BTreeSet<ChannelId>>)| {
            rows.push(StatRow {
                label,
                value: StatValue::of_channels(&sets.0, sets.1.as_ref()),
            });
        };
        let both = |f: &dyn Fn(&RunId) -> Result<BTreeSet<ChannelId>>| -> Result<_> {
            Ok((f(run)?, previous.map(f).transpose()?))
        };

        for run_type in [RunType::PedestalHvOn, RunType::PedestalHvOff, RunType::TestPulse] {
            for gain in Gain::ALL {
                let pattern = [StatisticPattern::run_type(run_type)
                    .with_gain(gain)
                    .with_moment(Moment::Mean)];
                let label = run_type_label(run_type);
                push_sets(
                    format!("Active channels {} {}", label, gain),
                    both(&|r| rc.active_channels(r, &pattern, None))?,
                );
                push_sets(
                    format!("Inactive channels {} {}", label, gain),
                    both(&|r| rc.inactive_channels(r, &pattern, None))?,
                );
            }
        }

        push_sets(
            "Total problematic channels".to_string(),
            both(&|r| rc.problematic_channels(r, false))?,
        );
        push_sets(
            "Channels within design performance in G12".to_string(),
            both(&|r| rc.design_channels(r))?,
        );

        let with_flag = |pattern: FlagPattern| move |r: &RunId| rc.channels_with_flag(r, &[pattern], CombineOp::And, None);
        push_sets(
            "Noisy channels in G12".to_string(),
            both(&with_flag(FlagPattern::exact(Flag::LargeRms(Gain::G12))))?,
        );
        push_sets(
            "Very noisy channels in G12".to_string(),
            both(&with_flag(FlagPattern::exact(Flag::VeryLargeRms(Gain::G12))))?,
        );

        for gain in [Gain::G12, Gain::G6, Gain::G1] {
            let values = rc
                .measurements()
                .values(run, StatisticKey::pedestal_on(gain, Moment::Rms))?;
            rows.push(StatRow {
                label: format!("Pedestal RMS ADC counts in {}", gain),
                value: StatValue::Spread(pedestal_rms_spread(&values)),
            });
        }

        let mut push_sets = |label: String, sets: (BTreeSet<ChannelId>, Option<BTreeSet<ChannelId>>)| {
            rows.push(StatRow {
                label,
                value: StatValue::of_channels(&sets.0, sets.1.as_ref()),
            });
        };
        push_sets(
            "APD with bad or no connection to HV".to_string(),
            both(&with_flag(FlagPattern::kind(FlagKind::BadVoltage)))?,
        );
        push_sets(
            "Dead channels due to LVR board problems".to_string(),
            both(&with_flag(FlagPattern::exact(Flag::DeadLaser)))?,
        );

        Ok(Self {
            run: run.clone(),
            reference: previous.cloned(),
            rows,
        })
    }

    /// Statistics of runs in order, each against its predecessor
    pub fn chronological<M: MeasurementStore, F: FlagStore>(
        rc: &RunClassifier<M, F>,
        runs: &[RunId],
    ) -> Result<Vec<Self>> {
        let mut stats = Vec::with_capacity(runs.len());
        if let Some(first) = runs.first() {
            stats.push(Self::collect(rc, first, None)?);
        }
        for (current, previous) in pairwise(runs) {
            stats.push(Self::collect(rc, current, Some(previous))?);
        }
        Ok(stats)
    }

    pub fn get(&self, label: &str) -> Option<&StatValue> {
        self.rows.iter().find(|r| r.label == label).map(|r| &r.value)
    }
}

/// Render run statistics side by side, one column per run
pub fn render_run_table(stats: &[RunStatistics]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<45}", "GHC statistics"));
    for s in stats {
        out.push_str(&format!(" | {:>16}", s.run.to_string()));
    }
    out.push('\n');
    let rows = stats.first().map_or(0, |s| s.rows.len());
    for i in 0..rows {
        out.push_str(&format!("{:<45}", stats[0].rows[i].label));
        for s in stats {
            let cell = s.rows.get(i).map(|r| r.value.to_string()).unwrap_or_default();
            out.push_str(&format!(" | {:>16}", cell));
        }
        out.push('\n');
    }
    out
}

/// Per-flag channel counts of one run, by subdetector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagStatistics {
    pub run: RunId,
    pub reference: Option<RunId>,
    /// (flag, [EB, EE])
    pub rows: Vec<(Flag, [StatValue; 2])>,
}

impl FlagStatistics {
    /// Flags covered by the breakdown: every gained pedestal, HV and test-pulse flag
    pub fn flags() -> Vec<Flag> {
        FlagKind::PEDESTAL
            .iter()
            .chain(&FlagKind::HIGH_VOLTAGE)
            .chain(&FlagKind::TEST_PULSE)
            .flat_map(|kind| Gain::ALL.into_iter().filter_map(move |g| Flag::new(*kind, Some(g))))
            .collect()
    }

    pub fn collect<M: MeasurementStore, F: FlagStore>(
        rc: &RunClassifier<M, F>,
        run: &RunId,
        previous: Option<&RunId>,
    ) -> Result<Self> {
        let current = rc.flags(run)?;
        let before = previous.map(|p| rc.flags(p)).transpose()?;

        let select = |flags: &BTreeMap<ChannelId, crate::flag::FlagSet>, flag: Flag, det: Subdetector| {
            flags
                .iter()
                .filter(|(c, f)| c.subdetector() == det && f.contains(&flag))
                .map(|(c, _)| *c)
                .collect::<BTreeSet<ChannelId>>()
        };

        let rows = Self::flags()
            .into_iter()
            .map(|flag| {
                let cells = Subdetector::ALL.map(|det| {
                    let now = select(&current, flag, det);
                    let then = before.as_ref().map(|b| select(b, flag, det));
                    StatValue::of_channels(&now, then.as_ref())
                });
                (flag, cells)
            })
            .collect();

        Ok(Self {
            run: run.clone(),
            reference: previous.cloned(),
            rows,
        })
    }

    pub fn chronological<M: MeasurementStore, F: FlagStore>(
        rc: &RunClassifier<M, F>,
        runs: &[RunId],
    ) -> Result<Vec<Self>> {
        let mut stats = Vec::with_capacity(runs.len());
        if let Some(first) = runs.first() {
            stats.push(Self::collect(rc, first, None)?);
        }
        for (current, previous) in pairwise(runs) {
            stats.push(Self::collect(rc, current, Some(previous))?);
        }
        Ok(stats)
    }
}

/// Render flag statistics, EB and EE columns per run
pub fn render_flag_table(stats: &[FlagStatistics]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<8}", "Flag"));
    for s in stats {
        out.push_str(&format!(" | {:>14} EB | {:>14} EE", s.run.to_string(), s.run.to_string()));
    }
    out.push('\n');
    for flag in FlagStatistics::flags() {
        out.push_str(&format!("{:<8}", flag.to_string()));
        for s in stats {
            if let Some((_, [eb, ee])) = s.rows.iter().find(|(f, _)| *f == flag) {
                out.push_str(&format!(" | {:>17} | {:>17}", eb.to_string(), ee.to_string()));
            }
        }
        out.push('\n');
    }
    out
}

/// Point-to-point RMS of pedestal noise in channel order
///
/// `sqrt(mean((v[i+1] - v[i])^2))`, rounded to three decimals; `None` with
/// fewer than two channels.
pub fn pedestal_rms_spread(values: &BTreeMap<ChannelId, f64>) -> Option<f64> {
    let ordered: Vec<f64> = values.values().copied().collect();
    if ordered.len() < 2 {
        return None;
    }
    let sum: f64 = ordered.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    let rms = (sum / (ordered.len() - 1) as f64).sqrt();
    Some((rms * 1000.0).round() / 1000.0)
}

/// Measured values behind a flag, e.g. `(0.50 ± 0.10)` or `(ON: 1.50, OFF: 1.40)`
pub fn flag_evidence<M: MeasurementStore>(
    store: &M,
    run: &RunId,
    channel: ChannelId,
    flag: Flag,
) -> Result<Option<String>> {
    let get = |key: StatisticKey| store.statistic(run, channel, key);
    let pair = match (flag.kind(), flag.gain()) {
        (FlagKind::BadVoltage, Some(gain)) => {
            let on = get(StatisticKey::pedestal_on(gain, Moment::Rms))?;
            let off = get(StatisticKey::pedestal_off(gain, Moment::Rms))?;
            return Ok(match (on, off) {
                (Some(on), Some(off)) => Some(format!("(ON: {:.2}, OFF: {:.2})", on, off)),
                _ => None,
            });
        }
        (kind, Some(gain)) if kind.source() == RunType::PedestalHvOn => (
            get(StatisticKey::pedestal_on(gain, Moment::Mean))?,
            get(StatisticKey::pedestal_on(gain, Moment::Rms))?,
        ),
        (kind, Some(gain)) if kind.source() == RunType::TestPulse => (
            get(StatisticKey::test_pulse(gain, Moment::Mean))?,
            get(StatisticKey::test_pulse(gain, Moment::Rms))?,
        ),
        _ => (
            get(StatisticKey::laser(Moment::Mean))?,
            get(StatisticKey::laser(Moment::Rms))?,
        ),
    };
    Ok(match pair {
        (Some(mean), Some(rms)) => Some(format!("({:.2} ± {:.2})", mean, rms)),
        _ => None,
    })
}
