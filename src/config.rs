// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Engine configuration.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GhcError, Result};
use crate::model::ChannelId;
use crate::policy::ThresholdPolicy;

/// Master configuration for a Good Health Check session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhcConfig {
    /// Classification thresholds.
    pub policy: ThresholdPolicy,

    /// Channels known bad from the channel-status database.
    pub masked_channels: BTreeSet<ChannelId>,

    /// Report masked channels in queries (default: false).
    pub keep_masked: bool,

    /// Highest channel-status value still considered good.
    pub max_good_status: u32,
}

impl Default for GhcConfig {
    fn default() -> Self {
        Self {
            policy: ThresholdPolicy::default(),
            masked_channels: BTreeSet::new(),
            keep_masked: false,
            max_good_status: 3,
        }
    }
}

impl GhcConfig {
    /// Configuration with a custom policy
    pub fn with_policy(policy: ThresholdPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| GhcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()
    }

    /// Mask every channel whose status exceeds `max_good_status`
    ///
    /// Returns the number of channels newly masked.
    pub fn mask_from_status(&mut self, statuses: impl IntoIterator<Item = (ChannelId, u32)>) -> usize {
        let before = self.masked_channels.len();
        let limit = self.max_good_status;
        self.masked_channels
            .extend(statuses.into_iter().filter(|(_, s)| *s > limit).map(|(c, _)| c));
        self.masked_channels.len() - before
    }

    /// Whether a channel is hidden from queries
    pub fn is_hidden(&self, channel: ChannelId) -> bool {
        !self.keep_masked && self.masked_channels.contains(&channel)
    }
}
