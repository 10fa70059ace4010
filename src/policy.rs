// ECAL GHC - Good Health Check channel classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Threshold policy
//!
//! Every numeric limit used by the classifier lives here. The default
//! policy holds the reference limits; a policy can also be loaded from
//! JSON to study alternative cuts.

use serde::{Deserialize, Serialize};

use crate::error::{GhcError, Result};
use crate::model::Subdetector;
use crate::statistic::Gain;

/// Dead-pedestal floors: a channel at or below either is dead
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadLimits {
    pub mean_floor: f64,
    pub rms_floor: f64,
}

/// Half-open noise band `[low, high)`; `high` and above is very noisy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmsRange {
    pub low: f64,
    pub high: f64,
}

/// Pedestal limits for one subdetector and gain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PedestalLimits {
    pub dead: DeadLimits,
    pub large_rms: RmsRange,
}

impl PedestalLimits {
    const fn new(mean_floor: f64, rms_floor: f64, low: f64, high: f64) -> Self {
        Self {
            dead: DeadLimits {
                mean_floor,
                rms_floor,
            },
            large_rms: RmsRange { low, high },
        }
    }
}

/// Pedestal limits for the three gains of one subdetector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainTable {
    pub g1: PedestalLimits,
    pub g6: PedestalLimits,
    pub g12: PedestalLimits,
}

impl GainTable {
    pub fn get(&self, gain: Gain) -> &PedestalLimits {
        match gain {
            Gain::G1 => &self.g1,
            Gain::G6 => &self.g6,
            Gain::G12 => &self.g12,
        }
    }
}

/// Bad-pedestal rule: `|mean - nominal_mean| >= tolerance`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BadPedestalRule {
    pub nominal_mean: f64,
    pub tolerance: f64,
}

impl BadPedestalRule {
    pub fn is_bad(&self, mean: f64) -> bool {
        (mean - self.nominal_mean).abs() >= self.tolerance
    }
}

/// HV-off rule: HV-on and HV-off RMS closer than `rms_difference` means the
/// APD bias is not reaching the channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HvOffRule {
    pub rms_difference: f64,
    /// Inclusive HV-on pedestal mean window the rule applies in
    pub mean_window: (f64, f64),
}

impl HvOffRule {
    /// Gain the rule is evaluated at
    pub const GAIN: Gain = Gain::G12;

    pub fn in_window(&self, mean: f64) -> bool {
        self.mean_window.0 <= mean && mean <= self.mean_window.1
    }
}

/// Test-pulse amplitude bounds, as fractions of the subdetector average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestPulseRule {
    pub low_fraction: f64,
    pub high_fraction: f64,
}

/// Laser amplitude bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaserRule {
    /// Amplitude below this fraction of the subdetector average is low
    pub low_fraction: f64,
    /// RMS/mean above this is a large relative error
    pub rms_ratio: f64,
}

/// Complete threshold policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    pub barrel: GainTable,
    pub endcap: GainTable,
    pub bad_pedestal: BadPedestalRule,
    pub hv_off: HvOffRule,
    pub test_pulse: TestPulseRule,
    pub laser: LaserRule,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            barrel: GainTable {
                g1: PedestalLimits::new(1.0, 0.2, 1.1, 3.0),
                g6: PedestalLimits::new(1.0, 0.4, 1.3, 4.0),
                g12: PedestalLimits::new(1.0, 0.5, 2.1, 6.0),
            },
            endcap: GainTable {
                g1: PedestalLimits::new(1.0, 0.2, 1.5, 4.0),
                g6: PedestalLimits::new(1.0, 0.4, 2.0, 5.0),
                g12: PedestalLimits::new(1.0, 0.5, 3.2, 7.0),
            },
            bad_pedestal: BadPedestalRule {
                nominal_mean: 200.0,
                tolerance: 30.0,
            },
            hv_off: HvOffRule {
                rms_difference: 0.2,
                mean_window: (170.0, 230.0),
            },
            test_pulse: TestPulseRule {
                low_fraction: 0.5,
                high_fraction: 1.5,
            },
            laser: LaserRule {
                low_fraction: 0.1,
                rms_ratio: 0.2,
            },
        }
    }
}

impl ThresholdPolicy {
    /// Pedestal limits for a subdetector and gain
    pub fn pedestal(&self, subdetector: Subdetector, gain: Gain) -> &PedestalLimits {
        match subdetector {
            Subdetector::Barrel => self.barrel.get(gain),
            Subdetector::Endcap => self.endcap.get(gain),
        }
    }

    /// Check internal consistency of a (possibly user-supplied) policy
    pub fn validate(&self) -> Result<()> {
        for subdetector in Subdetector::ALL {
            for gain in Gain::ALL {
                let limits = self.pedestal(subdetector, gain);
                if !(limits.large_rms.low < limits.large_rms.high) {
                    return Err(GhcError::Config(format!(
                        "{} {}: large RMS range [{}, {}) is empty",
                        subdetector, gain, limits.large_rms.low, limits.large_rms.high
                    )));
                }
                if limits.dead.rms_floor >= limits.large_rms.low {
                    return Err(GhcError::Config(format!(
                        "{} {}: dead RMS floor {} overlaps large RMS range",
                        subdetector, gain, limits.dead.rms_floor
                    )));
                }
            }
        }
        if !(self.bad_pedestal.tolerance > 0.0) {
            return Err(GhcError::Config(
                "bad pedestal tolerance must be positive".to_string(),
            ));
        }
        if !(self.hv_off.mean_window.0 <= self.hv_off.mean_window.1) {
            return Err(GhcError::Config(
                "HV-off mean window is inverted".to_string(),
            ));
        }
        if !(0.0 < self.test_pulse.low_fraction
            && self.test_pulse.low_fraction < self.test_pulse.high_fraction)
        {
            return Err(GhcError::Config(
                "test-pulse fractions must satisfy 0 < low < high".to_string(),
            ));
        }
        if !(self.laser.low_fraction > 0.0 && self.laser.rms_ratio > 0.0) {
            return Err(GhcError::Config(
                "laser fractions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
