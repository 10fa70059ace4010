// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channel-status files.
//!
//! CSV with a `channel,status` header, one channel per row. The file lists
//! the whole detector: its channels are the population inactive counts are
//! taken against, and channels whose status exceeds the configured limit
//! are masked.

use std::path::Path;

use ecal_ghc::{ChannelId, GhcConfig, Subdetector};
use serde::Deserialize;
use tracing::{debug, info};

use crate::CliError;

#[derive(Debug, Deserialize)]
struct StatusRecord {
    channel: u32,
    status: u32,
}

/// Read a channel-status file
pub fn read_statuses(path: &Path) -> Result<Vec<(ChannelId, u32)>, CliError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut statuses = Vec::new();
    for record in reader.deserialize() {
        let record: StatusRecord = record?;
        let channel = ChannelId::new(record.channel).map_err(ecal_ghc::GhcError::from)?;
        statuses.push((channel, record.status));
    }
    debug!("Read {} channel statuses from {}", statuses.len(), path.display());
    Ok(statuses)
}

/// Mask the bad channels listed in a channel-status file; returns every listed channel
pub fn apply(config: &mut GhcConfig, path: &Path) -> Result<Vec<ChannelId>, CliError> {
    let statuses = read_statuses(path)?;
    let population: Vec<ChannelId> = statuses.iter().map(|(c, _)| *c).collect();
    let masked = config.mask_from_status(statuses);
    info!(
        "Masked {} of {} channels with status above {}",
        masked,
        population.len(),
        config.max_good_status
    );
    Ok(population)
}

/// Subdetectors listing fewer channels than they were built with, as (subdetector, listed, nominal)
pub fn incomplete_subdetectors(population: &[ChannelId]) -> Vec<(Subdetector, usize, usize)> {
    Subdetector::ALL
        .into_iter()
        .filter_map(|det| {
            let listed = population.iter().filter(|c| c.subdetector() == det).count();
            let nominal = det.nominal_channel_count();
            (listed < nominal).then_some((det, listed, nominal))
        })
        .collect()
}
