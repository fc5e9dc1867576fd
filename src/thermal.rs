// Thermal reconciliation after the water balance: wet and dry branches are
// averaged and the soil thermal properties recomputed from the new moisture.
//
// The averaging and the property calculation belong to the energy-balance
// side of a land-surface model and are injected through `LayerAverager` and
// `ThermalModel`. Defaults are provided for standalone use.

use log::debug;

use crate::config::{RunoffConfig, MM_PER_M};
use crate::error::{Result, RunoffError};
use crate::runoff::CellContext;
use crate::soil::{EnergyState, Layer, SoilProperties};

// ═══════════════════════════════════════════════════════════════════════
// Physical constants
// ═══════════════════════════════════════════════════════════════════════

const HCAP_ICE: f64 = 2100.0; // Specific heat capacity of ice (J/K/kg)
const HCAP_WAT: f64 = 4180.0; // Specific heat capacity of water (J/K/kg)
const HCON_AIR: f64 = 0.025; // Thermal conductivity of air (W/m/K)
const HCON_ICE: f64 = 2.24; // Thermal conductivity of ice (W/m/K)
const HCON_WAT: f64 = 0.56; // Thermal conductivity of water (W/m/K)
const RHO_WAT: f64 = 1000.0; // Density of water (kg/m^3)

// ═══════════════════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThermalProps {
    pub kappa: f64, // Thermal conductivity (W/m/K)
    pub cs: f64,    // Volumetric heat capacity (J/K/m^3)
}

/// Combines the wet and dry branch state of one layer, `mu` being the wet
/// area fraction.
pub trait LayerAverager: Send + Sync {
    fn average(&self, wet: &Layer, dry: &Layer, depth: f64, mu: f64) -> Layer;
}

/// Computes per-layer thermal properties from the averaged layer state.
pub trait ThermalModel: Send + Sync {
    fn layer_thermal(
        &self,
        soil: &SoilProperties,
        layers: &[Layer],
        energy: &EnergyState,
        n_nodes: usize,
    ) -> Result<Vec<ThermalProps>>;
}

/// Area-weighted mean of every layer field.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAverage;

impl LayerAverager for WeightedAverage {
    fn average(&self, wet: &Layer, dry: &Layer, depth: f64, mu: f64) -> Layer {
        let mix = |w: f64, d: f64| mu * w + (1.0 - mu) * d;
        Layer {
            moist: mix(wet.moist, dry.moist),
            moist_thaw: mix(wet.moist_thaw, dry.moist_thaw),
            moist_froz: mix(wet.moist_froz, dry.moist_froz),
            ice: mix(wet.ice, dry.ice),
            evap: mix(wet.evap, dry.evap),
            tdepth: mix(wet.tdepth, dry.tdepth).clamp(0.0, depth),
            fdepth: mix(wet.fdepth, dry.fdepth).clamp(0.0, depth),
            t: mix(wet.t, dry.t),
            t_thaw: mix(wet.t_thaw, dry.t_thaw),
            t_froz: mix(wet.t_froz, dry.t_froz),
            kappa: mix(wet.kappa, dry.kappa),
            cs: mix(wet.cs, dry.cs),
        }
    }
}

/// Mixing-rule soil thermal properties: dry soil plus liquid water and ice,
/// with conductivity interpolated towards the saturated value by degree of
/// saturation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoilThermal;

impl ThermalModel for SoilThermal {
    fn layer_thermal(
        &self,
        soil: &SoilProperties,
        layers: &[Layer],
        _energy: &EnergyState,
        _n_nodes: usize,
    ) -> Result<Vec<ThermalProps>> {
        let n = layers.len();
        if soil.hcap_soil.len() != n || soil.hcon_soil.len() != n {
            return Err(RunoffError::thermal(format!(
                "dry soil heat capacity/conductivity given for {}/{} layers, expected {n}",
                soil.hcap_soil.len(),
                soil.hcon_soil.len()
            )));
        }

        let mut props = Vec::with_capacity(n);
        for (l, layer) in layers.iter().enumerate() {
            let depth = soil.depth[l];
            let depth_mm = depth * MM_PER_M;
            let max_moist = soil.max_moist[l];
            let vsat = max_moist / depth_mm;

            let f = layer.front_fractions(depth);
            let liquid = layer.liquid(depth).max(0.0);
            let ice = (layer.ice * f[1]).max(0.0);

            let smu = (liquid / max_moist).min(1.0);
            let smf = (ice / max_moist).min(1.0 - smu);
            let (thwat, thice) = if smu + smf > 0.0 {
                (vsat * smu / (smu + smf), vsat * smf / (smu + smf))
            } else {
                (0.0, 0.0)
            };
            let hcon_soil = soil.hcon_soil[l];
            let hcon_sat =
                hcon_soil * HCON_WAT.powf(thwat) * HCON_ICE.powf(thice) / HCON_AIR.powf(vsat);

            props.push(ThermalProps {
                kappa: (hcon_sat - hcon_soil) * (smf + smu) + hcon_soil,
                cs: soil.hcap_soil[l] + (HCAP_WAT * liquid + HCAP_ICE * ice) * RHO_WAT / depth_mm,
            });
        }
        Ok(props)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reconciliation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalReconciler<A = WeightedAverage, T = SoilThermal> {
    pub averager: A,
    pub model: T,
}

impl ThermalReconciler {
    /// Area-weighted averaging with the mixing-rule soil thermal model.
    pub fn standard() -> Self {
        ThermalReconciler {
            averager: WeightedAverage,
            model: SoilThermal,
        }
    }
}

impl<A: LayerAverager, T: ThermalModel> ThermalReconciler<A, T> {
    pub fn new(averager: A, model: T) -> Self {
        ThermalReconciler { averager, model }
    }

    /// Recompute thermal properties from the averaged branches and write them
    /// to both branches and to the top two energy-balance nodes.
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile(
        &self,
        cfg: &RunoffConfig,
        soil: &SoilProperties,
        wet: &mut [Layer],
        dry: &mut [Layer],
        energy: &mut EnergyState,
        mu: f64,
        ctx: CellContext,
    ) -> Result<()> {
        let n = wet.len();
        if energy.kappa.len() < 2 || energy.cs.len() < 2 {
            return Err(RunoffError::thermal(format!(
                "energy state has {} nodes, at least 2 required",
                energy.kappa.len().min(energy.cs.len())
            )));
        }

        let averaged: Vec<Layer> = (0..n)
            .map(|l| {
                if cfg.dist_prcp {
                    self.averager.average(&wet[l], &dry[l], soil.depth[l], mu)
                } else {
                    wet[l]
                }
            })
            .collect();

        let props = self.model.layer_thermal(soil, &averaged, energy, cfg.n_nodes)?;
        if props.len() != n {
            return Err(RunoffError::thermal(format!(
                "thermal model returned {} layers, expected {n}",
                props.len()
            )));
        }

        for (l, p) in props.iter().enumerate() {
            wet[l].kappa = p.kappa;
            wet[l].cs = p.cs;
            if cfg.dist_prcp {
                dry[l].kappa = p.kappa;
                dry[l].cs = p.cs;
            }
        }
        // Node spacing is assumed to match the top two layers
        for node in 0..2 {
            let p = props[node.min(n - 1)];
            energy.kappa[node] = p.kappa;
            energy.cs[node] = p.cs;
        }
        debug!(
            "{ctx}: thermal reconciliation kappa[0]={:.3} cs[0]={:.3e}",
            energy.kappa[0], energy.cs[0]
        );
        Ok(())
    }
}
