// Per-call driver: solves the wet branch and, with distributed
// precipitation, the dry branch, then reconciles thermal properties.

use std::fmt;

use log::{debug, trace};
use rayon::prelude::*;

use crate::baseflow;
use crate::config::RunoffConfig;
use crate::drainage;
use crate::error::{Result, RunoffError};
use crate::infiltration;
use crate::soil::{EnergyState, Layer, SoilProperties};
use crate::sublayer::Column;
use crate::thermal::{LayerAverager, ThermalModel, ThermalReconciler};

// ═══════════════════════════════════════════════════════════════════════
// Inputs and results
// ═══════════════════════════════════════════════════════════════════════

/// Spatial and temporal indices, only used to label log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellContext {
    pub band: usize, // Elevation band
    pub rec: usize,  // Time step record
    pub iveg: usize, // Vegetation tile
}

impl fmt::Display for CellContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec {} band {} veg {}", self.rec, self.band, self.iveg)
    }
}

/// One soil column for one time step.
#[derive(Debug, Clone, Copy)]
pub struct ColumnInput<'a> {
    pub wet: &'a [Layer],
    pub dry: &'a [Layer], // Ignored unless distributed precipitation is on
    pub energy: &'a EnergyState,
    pub ppt: [f64; 2], // Liquid water reaching the surface: wet, dry (mm)
    pub mu: f64,       // Wet area fraction
    pub dt: usize,     // Hours per model time step
    pub ctx: CellContext,
}

/// Mass balance of one branch over the time step (mm). Per-layer flows are
/// accumulated over the sub-steps; the top layer's inflow is net of
/// infiltration-excess runoff and the bottom layer's outflow is baseflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceTrace {
    pub inflow: f64,
    pub runoff: f64,
    pub baseflow: f64,
    pub evap: f64, // Evaporation actually withdrawn
    pub storage_before: f64,
    pub storage_after: f64,
    pub layer_inflow: Vec<f64>,
    pub layer_outflow: Vec<f64>,
}

impl BalanceTrace {
    /// Water unaccounted for; zero up to rounding.
    pub fn error(&self) -> f64 {
        self.inflow
            - self.runoff
            - self.baseflow
            - self.evap
            - (self.storage_after - self.storage_before)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunoffResult {
    pub wet_runoff: f64,
    pub wet_baseflow: f64,
    pub dry_runoff: f64,
    pub dry_baseflow: f64,
    pub wet_layers: Vec<Layer>,
    pub dry_layers: Vec<Layer>,
    pub energy: EnergyState,
    pub wet_balance: Option<BalanceTrace>,
    pub dry_balance: Option<BalanceTrace>,
}

#[derive(Debug, Clone, Default)]
struct BranchOutcome {
    runoff: f64,
    baseflow: f64,
    balance: Option<BalanceTrace>,
}

// ═══════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════

/// Partition surface water into runoff, soil storage and baseflow for one
/// column and one time step. Inputs are left untouched; updated state is
/// returned in the result.
pub fn runoff<A: LayerAverager, T: ThermalModel>(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    input: &ColumnInput<'_>,
    thermal: &ThermalReconciler<A, T>,
) -> Result<RunoffResult> {
    cfg.validate(soil, input.wet, input.dry)?;
    if input.dt == 0 {
        return Err(RunoffError::config("time step must span at least one hour"));
    }
    if !(0.0..=1.0).contains(&input.mu) {
        return Err(RunoffError::config(format!(
            "wet fraction must lie in [0, 1], got {}",
            input.mu
        )));
    }

    let mut wet = input.wet.to_vec();
    let mut dry = input.dry.to_vec();
    let mut energy = input.energy.clone();

    let mut wet_out = BranchOutcome::default();
    let mut dry_out = BranchOutcome::default();
    if input.mu > 0.0 {
        wet_out = solve_branch(cfg, soil, &mut wet, input.ppt[0], input.dt, input.ctx)?;
        debug!(
            "{}: wet branch runoff {:.4} baseflow {:.4}",
            input.ctx, wet_out.runoff, wet_out.baseflow
        );
    }
    if cfg.dist_prcp && 1.0 - input.mu > 0.0 {
        dry_out = solve_branch(cfg, soil, &mut dry, input.ppt[1], input.dt, input.ctx)?;
        debug!(
            "{}: dry branch runoff {:.4} baseflow {:.4}",
            input.ctx, dry_out.runoff, dry_out.baseflow
        );
    }

    if cfg.reconciles_thermal() {
        thermal.reconcile(cfg, soil, &mut wet, &mut dry, &mut energy, input.mu, input.ctx)?;
    }

    Ok(RunoffResult {
        wet_runoff: wet_out.runoff,
        wet_baseflow: wet_out.baseflow,
        dry_runoff: dry_out.runoff,
        dry_baseflow: dry_out.baseflow,
        wet_layers: wet,
        dry_layers: dry,
        energy,
        wet_balance: wet_out.balance,
        dry_balance: dry_out.balance,
    })
}

/// Like [`runoff`], but writes the updated layers and energy state back into
/// the caller's storage and returns `[wet_runoff, wet_baseflow, dry_runoff,
/// dry_baseflow]`.
#[allow(clippy::too_many_arguments)]
pub fn runoff_in_place<A: LayerAverager, T: ThermalModel>(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    wet: &mut [Layer],
    dry: &mut [Layer],
    energy: &mut EnergyState,
    ppt: [f64; 2],
    mu: f64,
    dt: usize,
    ctx: CellContext,
    thermal: &ThermalReconciler<A, T>,
) -> Result<[f64; 4]> {
    let result = {
        let input = ColumnInput {
            wet: &*wet,
            dry: &*dry,
            energy: &*energy,
            ppt,
            mu,
            dt,
            ctx,
        };
        runoff(cfg, soil, &input, thermal)?
    };
    wet.copy_from_slice(&result.wet_layers);
    dry.copy_from_slice(&result.dry_layers);
    *energy = result.energy;
    Ok([
        result.wet_runoff,
        result.wet_baseflow,
        result.dry_runoff,
        result.dry_baseflow,
    ])
}

/// Solve many independent columns in parallel. Results keep input order.
pub fn run_columns<A: LayerAverager, T: ThermalModel>(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    columns: &[ColumnInput<'_>],
    thermal: &ThermalReconciler<A, T>,
) -> Vec<Result<RunoffResult>> {
    columns
        .par_iter()
        .map(|input| runoff(cfg, soil, input, thermal))
        .collect()
}

fn solve_branch(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    layers: &mut [Layer],
    inflow: f64,
    dt: usize,
    ctx: CellContext,
) -> Result<BranchOutcome> {
    let mut column = Column::build(cfg, soil, layers, ctx)?;
    let storage_before = column.storage();

    let zone = infiltration::upper_zone(&column, &layers[0]);
    trace!(
        "{ctx}: upper zone {:.3}/{:.3} mm, top sublayer {}",
        zone.moist,
        zone.max_moist,
        zone.top_sub
    );
    let mut runoff =
        infiltration::infiltration_excess(inflow, zone.moist, zone.max_moist, soil.b_infilt);

    let drained = drainage::integrate(cfg, soil, layers, &mut column, inflow, runoff, dt, ctx);
    runoff += drained.saturation_runoff;

    let bottom_evap = layers[layers.len() - 1].evap;
    let bottom = baseflow::drain_bottom(soil, &mut column, drained.outflow, bottom_evap, dt);

    column.write_back(layers);

    let balance = cfg.trace_balance.then(|| {
        let mut layer_outflow = drained.layer_outflow;
        if let Some(last) = layer_outflow.last_mut() {
            *last += bottom.baseflow;
        }
        BalanceTrace {
            inflow,
            runoff,
            baseflow: bottom.baseflow,
            evap: drained.evap + bottom.evap,
            storage_before,
            storage_after: column.storage(),
            layer_inflow: drained.layer_inflow,
            layer_outflow,
        }
    });
    Ok(BranchOutcome {
        runoff,
        baseflow: bottom.baseflow,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(n: usize) -> (RunoffConfig, SoilProperties, Vec<Layer>) {
        let cfg = RunoffConfig {
            n_layers: n,
            trace_balance: true,
            ..RunoffConfig::default()
        };
        let soil = SoilProperties::uniform(n, 150.0, 60.0, 0.4);
        let layers = (0..n).map(|l| Layer::with_moist(60.0 + 10.0 * l as f64)).collect();
        (cfg, soil, layers)
    }

    #[test]
    fn inputs_are_not_mutated() {
        let (cfg, soil, layers) = column(3);
        let energy = EnergyState::new(3);
        let input = ColumnInput {
            wet: &layers,
            dry: &[],
            energy: &energy,
            ppt: [25.0, 0.0],
            mu: 1.0,
            dt: 24,
            ctx: CellContext::default(),
        };
        let before = layers.clone();
        let res = runoff(&cfg, &soil, &input, &ThermalReconciler::standard()).unwrap();
        assert_eq!(layers, before);
        assert_ne!(res.wet_layers, before);
        assert_eq!(res.dry_runoff, 0.0);
        assert_eq!(res.dry_baseflow, 0.0);
        assert!(res.dry_balance.is_none());
        assert!(res.wet_balance.as_ref().unwrap().error().abs() < 1e-9);
    }

    #[test]
    fn zero_wet_fraction_skips_the_wet_branch() {
        let (mut cfg, soil, layers) = column(2);
        cfg.dist_prcp = true;
        let dry = layers.clone();
        let energy = EnergyState::new(3);
        let input = ColumnInput {
            wet: &layers,
            dry: &dry,
            energy: &energy,
            ppt: [40.0, 0.0],
            mu: 0.0,
            dt: 6,
            ctx: CellContext::default(),
        };
        let res = runoff(&cfg, &soil, &input, &ThermalReconciler::standard()).unwrap();
        assert_eq!(res.wet_runoff, 0.0);
        assert_eq!(res.wet_baseflow, 0.0);
        assert_eq!(res.wet_layers, layers);
        assert!(res.dry_baseflow > 0.0);
    }

    #[test]
    fn rejects_zero_time_step_and_bad_fraction() {
        let (cfg, soil, layers) = column(2);
        let energy = EnergyState::new(3);
        let mut input = ColumnInput {
            wet: &layers,
            dry: &[],
            energy: &energy,
            ppt: [1.0, 0.0],
            mu: 1.0,
            dt: 0,
            ctx: CellContext::default(),
        };
        let thermal = ThermalReconciler::standard();
        assert!(runoff(&cfg, &soil, &input, &thermal).is_err());
        input.dt = 1;
        input.mu = 1.5;
        assert!(runoff(&cfg, &soil, &input, &thermal).is_err());
    }

    #[test]
    fn in_place_matches_by_value() {
        let (cfg, soil, layers) = column(3);
        let energy = EnergyState::new(3);
        let thermal = ThermalReconciler::standard();
        let input = ColumnInput {
            wet: &layers,
            dry: &[],
            energy: &energy,
            ppt: [12.0, 0.0],
            mu: 1.0,
            dt: 3,
            ctx: CellContext::default(),
        };
        let by_value = runoff(&cfg, &soil, &input, &thermal).unwrap();

        let mut wet = layers.clone();
        let mut dry: Vec<Layer> = Vec::new();
        let mut e = energy.clone();
        let out = runoff_in_place(
            &cfg,
            &soil,
            &mut wet,
            &mut dry,
            &mut e,
            [12.0, 0.0],
            1.0,
            3,
            CellContext::default(),
            &thermal,
        )
        .unwrap();
        assert_eq!(out[0], by_value.wet_runoff);
        assert_eq!(out[1], by_value.wet_baseflow);
        assert_eq!(wet, by_value.wet_layers);
    }

    #[test]
    fn parallel_columns_match_serial() {
        let (cfg, soil, layers) = column(3);
        let energy = EnergyState::new(3);
        let thermal = ThermalReconciler::standard();
        let inputs: Vec<ColumnInput<'_>> = (0..16)
            .map(|i| ColumnInput {
                wet: &layers,
                dry: &[],
                energy: &energy,
                ppt: [i as f64 * 3.0, 0.0],
                mu: 1.0,
                dt: 24,
                ctx: CellContext {
                    rec: i,
                    ..CellContext::default()
                },
            })
            .collect();
        let parallel = run_columns(&cfg, &soil, &inputs, &thermal);
        for (input, res) in inputs.iter().zip(parallel) {
            let serial = runoff(&cfg, &soil, input, &thermal).unwrap();
            assert_eq!(res.unwrap(), serial);
        }
    }
}
