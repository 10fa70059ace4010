// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Statistics file ingestion
//!
//! Files hold one channel per line, whitespace separated:
//! `<ignored> <channel_id> <v1> <v2> ...`, with the value columns fixed by
//! the data kind. A channel seen twice in the same ingestion keeps its
//! first line.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{GhcError, Result};
use crate::model::{ChannelId, RunId};
use crate::statistic::{Gain, Moment, StatisticKey};
use crate::store::MemoryMeasurementStore;

/// Kind of statistics file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DataKind {
    PedestalHvOn,
    PedestalHvOff,
    TestPulse,
    Laser,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [
        DataKind::PedestalHvOn,
        DataKind::PedestalHvOff,
        DataKind::TestPulse,
        DataKind::Laser,
    ];

    /// Value columns, in file order
    pub fn columns(&self) -> Vec<StatisticKey> {
        use Gain::*;
        use Moment::*;
        match self {
            Self::PedestalHvOn => [G1, G6, G12]
                .into_iter()
                .flat_map(|g| [StatisticKey::pedestal_on(g, Mean), StatisticKey::pedestal_on(g, Rms)])
                .collect(),
            Self::PedestalHvOff => [G1, G6, G12]
                .into_iter()
                .flat_map(|g| [StatisticKey::pedestal_off(g, Mean), StatisticKey::pedestal_off(g, Rms)])
                .collect(),
            Self::TestPulse => [Mean, Rms]
                .into_iter()
                .flat_map(|m| [G1, G6, G12].map(|g| StatisticKey::test_pulse(g, m)))
                .collect(),
            Self::Laser => vec![
                StatisticKey::laser(Mean),
                StatisticKey::laser(Rms),
                StatisticKey::laser_over_pn(Mean),
                StatisticKey::laser_over_pn(Rms),
            ],
        }
    }

    /// Name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::PedestalHvOn => "pedestal_hvon",
            Self::PedestalHvOff => "pedestal_hvoff",
            Self::TestPulse => "testpulse",
            Self::Laser => "laser",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataKind {
    type Err = GhcError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| GhcError::Config(format!("unsupported type of data: {}", s)))
    }
}

/// Counters of one ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub files: usize,
    /// Channels stored
    pub channels: usize,
    /// Values stored
    pub records: usize,
    /// Repeated channel lines skipped
    pub duplicates: usize,
}

/// Reads statistics files of one kind into a run
#[derive(Debug)]
pub struct Ingest {
    run: RunId,
    kind: DataKind,
    columns: Vec<StatisticKey>,
    seen: BTreeSet<ChannelId>,
    summary: IngestSummary,
}

impl Ingest {
    pub fn new(run: RunId, kind: DataKind) -> Self {
        Self {
            run,
            kind,
            columns: kind.columns(),
            seen: BTreeSet::new(),
            summary: IngestSummary::default(),
        }
    }

    /// Read one source; nothing is stored if any line is malformed
    pub fn read<R: BufRead>(&mut self, reader: R, store: &mut MemoryMeasurementStore) -> Result<()> {
        let mut rows = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(self.parse_line(number, &line)?);
        }

        for (channel, values) in rows {
            if !self.seen.insert(channel) {
                warn!("Duplicate channel {}", channel);
                self.summary.duplicates += 1;
                continue;
            }
            for (key, value) in self.columns.iter().zip(values) {
                store.insert(&self.run, channel, *key, value);
                self.summary.records += 1;
            }
            self.summary.channels += 1;
        }
        Ok(())
    }

    /// Read one file
    pub fn read_file(&mut self, path: impl AsRef<Path>, store: &mut MemoryMeasurementStore) -> Result<()> {
        let path = path.as_ref();
        info!("Reading {} file '{}'", self.kind, path.display());
        let file = File::open(path)?;
        self.read(BufReader::new(file), store).map_err(|e| match e {
            GhcError::Parse { line, reason } => GhcError::Parse {
                line,
                reason: format!("{}: {}", path.display(), reason),
            },
            other => other,
        })?;
        self.summary.files += 1;
        Ok(())
    }

    pub fn finish(self) -> IngestSummary {
        debug!(
            "Ingested {} records for {} channels into run {}",
            self.summary.records, self.summary.channels, self.run
        );
        self.summary
    }

    fn parse_line(&self, number: usize, line: &str) -> Result<(ChannelId, Vec<f64>)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let expected = self.columns.len() + 2;
        if fields.len() < expected {
            return Err(GhcError::Parse {
                line: number,
                reason: format!("expected {} columns, got {}", expected, fields.len()),
            });
        }
        let channel: ChannelId = fields[1].parse().map_err(|e| GhcError::Parse {
            line: number,
            reason: format!("{}", e),
        })?;
        let values = fields[2..expected]
            .iter()
            .zip(&self.columns)
            .map(|(text, key)| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| GhcError::Parse {
                        line: number,
                        reason: format!("bad {} value {:?}", key, text),
                    })
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok((channel, values))
    }
}

/// Read every file of one kind into a run
pub fn ingest_files<P: AsRef<Path>>(
    store: &mut MemoryMeasurementStore,
    run: &RunId,
    kind: DataKind,
    paths: &[P],
) -> Result<IngestSummary> {
    let mut ingest = Ingest::new(run.clone(), kind);
    for path in paths {
        ingest.read_file(path, store)?;
    }
    let summary = ingest.finish();
    info!(
        "Run {}: read {} {} channels from {} file(s)",
        run, summary.channels, kind, summary.files
    );
    Ok(summary)
}
