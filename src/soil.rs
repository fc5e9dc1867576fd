// Soil column data model: per-layer soil properties, per-layer moisture
// state and the thermal nodes of the energy balance.

use serde::{Deserialize, Serialize};

use crate::config::{RunoffConfig, MM_PER_M};
use crate::error::{Result, RunoffError};

// ═══════════════════════════════════════════════════════════════════════
// Soil properties (read-only for the time step)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilProperties {
    pub ksat: Vec<f64>,        // Saturated hydraulic conductivity (mm/day)
    pub max_moist: Vec<f64>,   // Maximum moisture content (mm)
    pub resid_moist: Vec<f64>, // Residual moisture content (volumetric fraction)
    pub expt: Vec<f64>,        // Brooks-Corey conductivity exponent
    pub depth: Vec<f64>,       // Layer thickness (m)
    pub b_infilt: f64,         // Infiltration curve shape parameter
    pub ds: f64,               // Fraction of dsmax where non-linear baseflow begins
    pub dsmax: f64,            // Maximum baseflow velocity (mm/day)
    pub ws: f64,               // Fraction of max_moist where non-linear baseflow occurs
    pub c: f64,                // Exponent of the non-linear baseflow curve
    #[serde(default)]
    pub hcap_soil: Vec<f64>, // Volumetric heat capacity of dry soil (J/K/m^3)
    #[serde(default)]
    pub hcon_soil: Vec<f64>, // Thermal conductivity of dry soil (W/m/K)
}

impl SoilProperties {
    /// Identical layers with typical ARNO baseflow parameters. Convenient for
    /// idealised columns.
    pub fn uniform(n_layers: usize, max_moist: f64, ksat: f64, depth: f64) -> Self {
        SoilProperties {
            ksat: vec![ksat; n_layers],
            max_moist: vec![max_moist; n_layers],
            resid_moist: vec![0.0; n_layers],
            expt: vec![10.0; n_layers],
            depth: vec![depth; n_layers],
            b_infilt: 0.2,
            ds: 0.001,
            dsmax: 10.0,
            ws: 0.9,
            c: 2.0,
            hcap_soil: vec![2.0e6; n_layers],
            hcon_soil: vec![0.25; n_layers],
        }
    }

    pub fn n_layers(&self) -> usize {
        self.depth.len()
    }

    /// Residual moisture of a layer in mm. Only non-zero when full energy
    /// accounting is active.
    pub fn resid_mm(&self, cfg: &RunoffConfig, layer: usize) -> f64 {
        if cfg.full_energy {
            self.resid_moist[layer] * self.depth[layer] * MM_PER_M
        } else {
            0.0
        }
    }

    /// Saturated conductivity of a layer per hourly sub-step (mm/h).
    pub fn ksat_hourly(&self, layer: usize) -> f64 {
        self.ksat[layer] / crate::config::HOURS_PER_DAY
    }

    pub(crate) fn validate(&self, cfg: &RunoffConfig) -> Result<()> {
        let n = cfg.n_layers;
        let per_layer: [(&str, &Vec<f64>); 5] = [
            ("ksat", &self.ksat),
            ("max_moist", &self.max_moist),
            ("resid_moist", &self.resid_moist),
            ("expt", &self.expt),
            ("depth", &self.depth),
        ];
        for (name, values) in per_layer {
            if values.len() != n {
                return Err(RunoffError::config(format!(
                    "soil {name} has {} layers, expected {n}",
                    values.len()
                )));
            }
        }
        for l in 0..n {
            if self.depth[l] <= 0.0 {
                return Err(RunoffError::config(format!(
                    "layer {l} depth must be positive, got {}",
                    self.depth[l]
                )));
            }
            if self.ksat[l] < 0.0 {
                return Err(RunoffError::config(format!(
                    "layer {l} ksat must not be negative, got {}",
                    self.ksat[l]
                )));
            }
            let resid = self.resid_mm(cfg, l);
            if self.max_moist[l] <= resid {
                return Err(RunoffError::config(format!(
                    "layer {l} max_moist {} does not exceed residual moisture {resid}",
                    self.max_moist[l]
                )));
            }
        }
        if self.b_infilt < 0.0 {
            return Err(RunoffError::config(format!(
                "b_infilt must not be negative, got {}",
                self.b_infilt
            )));
        }
        if !(self.ws > 0.0 && self.ws <= 1.0) {
            return Err(RunoffError::config(format!(
                "ws must lie in (0, 1], got {}",
                self.ws
            )));
        }
        if !(0.0..=1.0).contains(&self.ds) || self.dsmax < 0.0 || self.c <= 0.0 {
            return Err(RunoffError::config(format!(
                "invalid baseflow parameters ds={} dsmax={} c={}",
                self.ds, self.dsmax, self.c
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Layer state (per layer, per distribution branch)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub moist: f64,      // Unfrozen sublayer moisture (mm)
    pub moist_thaw: f64, // Thawed sublayer moisture (mm)
    pub moist_froz: f64, // Frozen sublayer liquid moisture (mm)
    pub ice: f64,        // Frozen sublayer ice content (mm)
    pub evap: f64,       // Evaporative demand for the time step (mm)
    pub tdepth: f64,     // Depth of the thaw front below the layer top (m)
    pub fdepth: f64,     // Depth of the freeze front below the layer top (m)
    pub t: f64,          // Unfrozen sublayer temperature (C)
    pub t_thaw: f64,     // Thawed sublayer temperature (C)
    pub t_froz: f64,     // Frozen sublayer temperature (C)
    pub kappa: f64,      // Thermal conductivity (W/m/K)
    pub cs: f64,         // Volumetric heat capacity (J/K/m^3)
}

impl Layer {
    /// Unfrozen layer holding `moist` mm.
    pub fn with_moist(moist: f64) -> Self {
        Layer {
            moist,
            ..Layer::default()
        }
    }

    /// Thickness fractions of the thawed, frozen and unfrozen sublayers
    /// implied by the front depths.
    pub fn front_fractions(&self, depth: f64) -> [f64; 3] {
        [
            self.tdepth / depth,
            (self.fdepth - self.tdepth) / depth,
            (depth - self.fdepth) / depth,
        ]
    }

    /// Liquid water held by the layer (mm), summed over its sublayers.
    pub fn liquid(&self, depth: f64) -> f64 {
        let f = self.front_fractions(depth);
        self.moist_thaw * f[0] + self.moist_froz * f[1] + self.moist * f[2]
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Energy balance thermal nodes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyState {
    pub kappa: Vec<f64>, // Node thermal conductivity (W/m/K)
    pub cs: Vec<f64>,    // Node volumetric heat capacity (J/K/m^3)
}

impl EnergyState {
    pub fn new(n_nodes: usize) -> Self {
        EnergyState {
            kappa: vec![0.0; n_nodes],
            cs: vec![0.0; n_nodes],
        }
    }
}
