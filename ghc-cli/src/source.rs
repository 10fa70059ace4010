// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Statistics file arguments of the `compare` subcommand.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use ecal_ghc::{DataKind, RunId};

/// One `RUN:KIND=FILE` argument
#[derive(Debug, Clone, PartialEq)]
pub struct RunSource {
    pub run: RunId,
    pub kind: DataKind,
    pub path: PathBuf,
}

impl FromStr for RunSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (run, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected RUN:KIND=FILE, got {:?}", s))?;
        let (kind, path) = rest
            .split_once('=')
            .ok_or_else(|| format!("expected RUN:KIND=FILE, got {:?}", s))?;
        if run.is_empty() || path.is_empty() {
            return Err(format!("expected RUN:KIND=FILE, got {:?}", s));
        }
        let kind = kind.parse::<DataKind>().map_err(|e| e.to_string())?;
        Ok(Self {
            run: RunId::from(run),
            kind,
            path: PathBuf::from(path),
        })
    }
}

/// Files grouped by run (in run order), then by kind
pub fn group(sources: &[RunSource]) -> BTreeMap<RunId, BTreeMap<DataKind, Vec<PathBuf>>> {
    let mut runs: BTreeMap<RunId, BTreeMap<DataKind, Vec<PathBuf>>> = BTreeMap::new();
    for source in sources {
        runs.entry(source.run.clone())
            .or_default()
            .entry(source.kind)
            .or_default()
            .push(source.path.clone());
    }
    runs
}
