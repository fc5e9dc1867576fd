// Model options and physical constants for the soil-column water balance.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunoffError};
use crate::soil::{Layer, SoilProperties};

// ═══════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════

pub const HOURS_PER_DAY: f64 = 24.0;
pub const MM_PER_M: f64 = 1000.0; // Converts m of water to mm
pub const ICE_LENS_CAPACITY: f64 = 0.13; // Liquid capacity fraction below which a frozen slot is impermeable
pub const ICE_LENS_MIN_THICKNESS: f64 = 0.05; // Minimum frozen slot thickness for an ice lens (m)

// ═══════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════

/// Model options for one call of [`crate::runoff`].
///
/// Replaces the global option flags of a full land-surface driver with an
/// explicit value. `n_nodes` is the number of thermal nodes in the
/// energy-balance state; it only matters when thermal reconciliation runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunoffConfig {
    pub full_energy: bool, // residual moisture and thermal reconciliation
    pub frozen_soil: bool, // thawed/frozen/unfrozen sublayers
    pub dist_prcp: bool,   // solve a dry fraction alongside the wet one
    pub n_layers: usize,
    pub n_nodes: usize,
    #[serde(default)]
    pub trace_balance: bool, // return a per-branch mass balance
}

impl Default for RunoffConfig {
    fn default() -> Self {
        RunoffConfig {
            full_energy: false,
            frozen_soil: false,
            dist_prcp: false,
            n_layers: 3,
            n_nodes: 3,
            trace_balance: false,
        }
    }
}

impl RunoffConfig {
    /// Thermal properties are recomputed after the water balance.
    pub fn reconciles_thermal(&self) -> bool {
        self.full_energy || self.frozen_soil
    }

    /// Number of precipitation-distribution branches solved per call.
    pub fn n_dist(&self) -> usize {
        if self.dist_prcp {
            2
        } else {
            1
        }
    }

    /// Check the options against the soil record and the layer arrays of a call.
    pub fn validate(&self, soil: &SoilProperties, wet: &[Layer], dry: &[Layer]) -> Result<()> {
        if self.n_layers == 0 {
            return Err(RunoffError::config("at least one soil layer is required"));
        }
        if self.reconciles_thermal() && self.n_nodes < 2 {
            return Err(RunoffError::config(format!(
                "thermal reconciliation needs at least 2 nodes, got {}",
                self.n_nodes
            )));
        }
        if wet.len() != self.n_layers {
            return Err(RunoffError::config(format!(
                "wet branch has {} layers, expected {}",
                wet.len(),
                self.n_layers
            )));
        }
        if self.dist_prcp && dry.len() != self.n_layers {
            return Err(RunoffError::config(format!(
                "dry branch has {} layers, expected {}",
                dry.len(),
                self.n_layers
            )));
        }
        soil.validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_reconciliation_follows_flags() {
        let mut cfg = RunoffConfig::default();
        assert!(!cfg.reconciles_thermal());
        cfg.frozen_soil = true;
        assert!(cfg.reconciles_thermal());
        cfg.frozen_soil = false;
        cfg.full_energy = true;
        assert!(cfg.reconciles_thermal());
    }

    #[test]
    fn branch_count() {
        let mut cfg = RunoffConfig::default();
        assert_eq!(cfg.n_dist(), 1);
        cfg.dist_prcp = true;
        assert_eq!(cfg.n_dist(), 2);
    }

    #[test]
    fn rejects_layer_count_mismatch() {
        let cfg = RunoffConfig {
            n_layers: 2,
            ..RunoffConfig::default()
        };
        let soil = SoilProperties::uniform(2, 100.0, 50.0, 0.5);
        let layers = vec![Layer::default(); 3];
        assert!(matches!(
            cfg.validate(&soil, &layers, &[]),
            Err(RunoffError::Config(_))
        ));
    }

    #[test]
    fn dry_branch_checked_only_when_distributed() {
        let mut cfg = RunoffConfig {
            n_layers: 2,
            ..RunoffConfig::default()
        };
        let soil = SoilProperties::uniform(2, 100.0, 50.0, 0.5);
        let layers = vec![Layer::default(); 2];
        assert!(cfg.validate(&soil, &layers, &[]).is_ok());
        cfg.dist_prcp = true;
        assert!(cfg.validate(&soil, &layers, &[]).is_err());
    }
}
