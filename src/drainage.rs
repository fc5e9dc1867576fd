// Gravity drainage between sublayers, integrated on hourly sub-steps
// regardless of the model time step.
//
// Each sub-step first evaluates the Brooks-Corey unsaturated conductivity of
// every active slot, then walks the slots top to bottom passing water down.
// Saturation excess above an impermeable frozen slot is walked back up the
// slots already visited and leaves as surface runoff once the top is full.

use log::{debug, trace};

use crate::config::{RunoffConfig, ICE_LENS_CAPACITY, ICE_LENS_MIN_THICKNESS, MM_PER_M};
use crate::runoff::CellContext;
use crate::soil::{Layer, SoilProperties};
use crate::sublayer::{Column, Slot, FROZEN, N_SUB, UNFROZEN};

/// A slot visited during the current sub-step, in top-to-bottom order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSlot {
    pub layer: usize,
    pub sub: usize,
    pub impermeable: bool, // Frozen slot acting as an ice lens
}

/// Totals over all sub-steps of one time step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainageOutcome {
    pub saturation_runoff: f64,  // Excess shed at the surface (mm)
    pub outflow: f64,            // Water delivered to the bottom reservoir (mm)
    pub evap: f64,               // Evaporation withdrawn above the reservoir (mm)
    pub layer_inflow: Vec<f64>,  // Water entering each layer from above (mm)
    pub layer_outflow: Vec<f64>, // Water leaving each layer downward (mm)
}

#[derive(Debug, Clone)]
pub struct FluxState {
    pub q12: Vec<[f64; N_SUB]>, // Outgoing conductivity per slot (mm per sub-step)
    pub order: Vec<ActiveSlot>,
    pub evap: f64, // Evaporation withdrawn so far (mm)
    pub layer_inflow: Vec<f64>,
    pub layer_outflow: Vec<f64>,
    ctx: CellContext,
}

impl FluxState {
    pub fn new(n_layers: usize, ctx: CellContext) -> Self {
        FluxState {
            q12: vec![[0.0; N_SUB]; n_layers],
            order: Vec::with_capacity(n_layers * N_SUB),
            evap: 0.0,
            layer_inflow: vec![0.0; n_layers],
            layer_outflow: vec![0.0; n_layers],
            ctx,
        }
    }

    /// Conductivity pass. Every active slot except the bottom reservoir is
    /// recorded in `order`.
    pub fn conductivity(
        &mut self,
        cfg: &RunoffConfig,
        soil: &SoilProperties,
        layers: &[Layer],
        column: &Column,
    ) {
        self.order.clear();
        let last = column.n_layers() - 1;
        for (l, slots) in column.slots.iter().enumerate() {
            let resid = column.resid[l];
            let ksat = soil.ksat_hourly(l);
            let expt = soil.expt[l];
            for (sub, slot) in slots.iter().enumerate() {
                if !slot.is_active() || (l == last && sub == UNFROZEN) {
                    continue;
                }
                let tmp_moist = (slot.moist - layers[l].evap).max(resid);
                let mut impermeable = false;
                let q = if cfg.frozen_soil && sub == FROZEN && is_ice_lens(soil, slot, l) {
                    impermeable = true;
                    debug!(
                        "{}: layer {l} frozen sublayer is impermeable, ice {:.2} of {:.2} mm",
                        self.ctx, slot.ice, slot.max_moist
                    );
                    if let Some(prev) = self.order.last() {
                        self.q12[prev.layer][prev.sub] = 0.0;
                    }
                    0.0
                } else if cfg.frozen_soil && sub == FROZEN {
                    // Frozen slots are scaled by capacity alone; residual
                    // moisture does not apply to the liquid left in ice
                    ksat * (tmp_moist / soil.max_moist[l]).powf(expt)
                } else if slot.moist > resid {
                    ksat * ((tmp_moist - resid) / (soil.max_moist[l] - resid)).powf(expt)
                } else {
                    0.0
                };
                self.q12[l][sub] = q;
                self.order.push(ActiveSlot {
                    layer: l,
                    sub,
                    impermeable,
                });
            }
        }
    }

    /// Advance pass. `inflow` is the water entering the top slot this
    /// sub-step, already net of its runoff share. Returns the flux leaving
    /// the last visited slot and the saturation excess shed at the surface.
    pub fn advance(
        &mut self,
        layers: &[Layer],
        column: &mut Column,
        inflow: f64,
        dt: usize,
    ) -> (f64, f64) {
        let last_layer = column.n_layers() - 1;
        let mut flux = inflow;
        let mut runoff = 0.0;
        for k in 0..self.order.len() {
            let ActiveSlot {
                layer: l,
                sub,
                impermeable,
            } = self.order[k];
            let next = self.order.get(k + 1).copied();
            let blocked = impermeable || next.is_some_and(|s| s.impermeable);
            if k == 0 || self.order[k - 1].layer != l {
                self.layer_inflow[l] += flux;
            }
            let demand = layers[l].evap / dt as f64;
            let resid = column.resid[l];

            let mut passed_down = 0.0;
            let slot = &mut column.slots[l][sub];
            slot.moist += flux / slot.frac;
            // Evaporation only draws on water above residual
            let evap = demand.min((slot.moist - resid).max(0.0));
            slot.moist -= self.q12[l][sub] + evap;
            self.evap += evap * slot.frac;
            if slot.excess() > 0.0 {
                if blocked {
                    runoff += self.push_up(column, k);
                } else {
                    passed_down = slot.excess();
                    slot.fill();
                }
            }

            let slot = &mut column.slots[l][sub];
            if slot.moist < resid {
                // Shortfall is taken back from the flux leaving this slot
                let borrowed = (resid - slot.moist).min(self.q12[l][sub]);
                self.q12[l][sub] -= borrowed;
                slot.moist += borrowed;
            }
            flux = (self.q12[l][sub] + passed_down) * slot.frac;
            self.q12[l][sub] += passed_down;
            if next.map_or(l != last_layer, |s| s.layer != l) {
                self.layer_outflow[l] += flux;
            }
        }
        if self.order.last().map_or(true, |s| s.layer != last_layer) {
            self.layer_inflow[last_layer] += flux;
        }
        (flux, runoff)
    }

    /// Walk saturation excess from `order[from]` back up through the slots
    /// already visited. Returns what overflows the top of the column.
    fn push_up(&self, column: &mut Column, from: usize) -> f64 {
        for k in (1..=from).rev() {
            let src = self.order[k];
            let dst = self.order[k - 1];
            let source = &mut column.slots[src.layer][src.sub];
            let excess = source.excess();
            if excess <= 0.0 {
                return 0.0;
            }
            let moved = excess * source.frac;
            source.fill();
            let target = &mut column.slots[dst.layer][dst.sub];
            target.moist += moved / target.frac;
            trace!(
                "{}: saturation excess {moved:.4} mm moved from layer {}/{} up to layer {}/{}",
                self.ctx,
                src.layer,
                src.sub,
                dst.layer,
                dst.sub
            );
        }
        let top = self.order[0];
        let slot = &mut column.slots[top.layer][top.sub];
        let excess = slot.excess();
        if excess > 0.0 {
            slot.fill();
            trace!(
                "{}: saturation excess {:.4} mm shed as surface runoff",
                self.ctx,
                excess * slot.frac
            );
            excess * slot.frac
        } else {
            0.0
        }
    }
}

fn is_ice_lens(soil: &SoilProperties, slot: &Slot, l: usize) -> bool {
    let liquid_capacity = (slot.max_moist - slot.ice) / (soil.depth[l] * MM_PER_M);
    liquid_capacity < ICE_LENS_CAPACITY && slot.frac * soil.depth[l] > ICE_LENS_MIN_THICKNESS
}

/// Run `dt` hourly sub-steps. `inflow` and `runoff` are totals for the
/// time step and are spread evenly over the sub-steps.
#[allow(clippy::too_many_arguments)]
pub fn integrate(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    layers: &[Layer],
    column: &mut Column,
    inflow: f64,
    runoff: f64,
    dt: usize,
    ctx: CellContext,
) -> DrainageOutcome {
    let dt_inflow = inflow / dt as f64;
    let dt_runoff = runoff / dt as f64;
    let mut state = FluxState::new(column.n_layers(), ctx);
    let mut outcome = DrainageOutcome::default();
    for _ in 0..dt {
        state.conductivity(cfg, soil, layers, column);
        let (outflow, shed) = state.advance(layers, column, dt_inflow - dt_runoff, dt);
        outcome.outflow += outflow;
        outcome.saturation_runoff += shed;
    }
    outcome.evap = state.evap;
    outcome.layer_inflow = state.layer_inflow;
    outcome.layer_outflow = state.layer_outflow;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sublayer::THAWED;

    const CTX: CellContext = CellContext {
        band: 0,
        rec: 0,
        iveg: 0,
    };

    fn cfg(n_layers: usize, frozen_soil: bool) -> RunoffConfig {
        RunoffConfig {
            n_layers,
            frozen_soil,
            ..RunoffConfig::default()
        }
    }

    // Two unfrozen layers above a frozen bottom layer whose upper half is an
    // ice lens
    fn lens_column(moist: [f64; 2]) -> (RunoffConfig, SoilProperties, Vec<Layer>) {
        let soil = SoilProperties::uniform(3, 100.0, 240.0, 0.5);
        let layers = vec![
            Layer::with_moist(moist[0]),
            Layer::with_moist(moist[1]),
            Layer {
                moist_froz: 3.0,
                ice: 95.0,
                fdepth: 0.25,
                ..Layer::with_moist(50.0)
            },
        ];
        (cfg(3, true), soil, layers)
    }

    #[test]
    fn single_layer_passes_inflow_to_reservoir() {
        let c = cfg(1, false);
        let soil = SoilProperties::uniform(1, 100.0, 50.0, 0.5);
        let layers = vec![Layer::with_moist(40.0)];
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let out = integrate(&c, &soil, &layers, &mut col, 12.0, 2.0, 4, CTX);
        assert!((out.outflow - 10.0).abs() < 1e-12);
        assert_eq!(out.saturation_runoff, 0.0);
        assert_eq!(col.slots[0][UNFROZEN].moist, 40.0);
    }

    #[test]
    fn conductivity_follows_brooks_corey() {
        let c = cfg(2, false);
        let mut soil = SoilProperties::uniform(2, 100.0, 48.0, 0.5);
        soil.expt = vec![3.0, 3.0];
        let layers = vec![Layer::with_moist(50.0), Layer::with_moist(80.0)];
        let col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let mut state = FluxState::new(2, CTX);
        state.conductivity(&c, &soil, &layers, &col);
        assert_eq!(state.order.len(), 1);
        assert!((state.q12[0][UNFROZEN] - 2.0 * 0.125).abs() < 1e-12);
        // Bottom reservoir is left to baseflow
        assert_eq!(state.q12[1][UNFROZEN], 0.0);
    }

    #[test]
    fn dry_slot_does_not_drain() {
        let c = RunoffConfig {
            full_energy: true,
            ..cfg(2, false)
        };
        let mut soil = SoilProperties::uniform(2, 100.0, 48.0, 0.5);
        soil.resid_moist = vec![0.02, 0.02];
        let layers = vec![Layer::with_moist(10.0), Layer::with_moist(80.0)];
        let col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let mut state = FluxState::new(2, CTX);
        state.conductivity(&c, &soil, &layers, &col);
        assert_eq!(state.q12[0][UNFROZEN], 0.0);
    }

    #[test]
    fn ice_lens_blocks_itself_and_the_slot_above() {
        let (c, soil, layers) = lens_column([60.0, 60.0]);
        let col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let mut state = FluxState::new(3, CTX);
        state.conductivity(&c, &soil, &layers, &col);
        let lens = state.order.last().copied().unwrap();
        assert_eq!((lens.layer, lens.sub), (2, FROZEN));
        assert!(lens.impermeable);
        assert_eq!(state.q12[2][FROZEN], 0.0);
        assert_eq!(state.q12[1][UNFROZEN], 0.0);
        assert!(state.q12[0][UNFROZEN] > 0.0);
    }

    #[test]
    fn thin_frozen_slot_is_not_a_lens() {
        let (c, soil, mut layers) = lens_column([60.0, 60.0]);
        layers[2].fdepth = 0.02;
        let col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let mut state = FluxState::new(3, CTX);
        state.conductivity(&c, &soil, &layers, &col);
        assert!(state.order.iter().all(|s| !s.impermeable));
        assert!(state.q12[1][UNFROZEN] > 0.0);
    }

    #[test]
    fn blocked_excess_overflows_at_the_surface() {
        let (c, soil, layers) = lens_column([100.0, 100.0]);
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let out = integrate(&c, &soil, &layers, &mut col, 10.0, 0.0, 1, CTX);
        assert!((out.saturation_runoff - 10.0).abs() < 1e-9);
        assert_eq!(out.outflow, 0.0);
        assert!((col.slots[0][UNFROZEN].moist - 100.0).abs() < 1e-9);
        assert!((col.slots[1][UNFROZEN].moist - 100.0).abs() < 1e-9);
        assert_eq!(col.slots[2][FROZEN].moist, 3.0);
    }

    #[test]
    fn blocked_excess_is_absorbed_above_when_there_is_room() {
        let (c, soil, layers) = lens_column([90.0, 99.0]);
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let before = col.storage();
        let out = integrate(&c, &soil, &layers, &mut col, 5.0, 0.0, 1, CTX);
        assert_eq!(out.saturation_runoff, 0.0);
        assert_eq!(out.outflow, 0.0);
        assert!((col.slots[1][UNFROZEN].moist - 100.0).abs() < 1e-9);
        assert!((col.storage() - before - 5.0).abs() < 1e-9);
    }

    #[test]
    fn residual_shortfall_is_borrowed_from_outflow() {
        let c = cfg(2, false);
        let mut soil = SoilProperties::uniform(2, 100.0, 24_000.0, 0.5);
        soil.expt = vec![1.0, 1.0];
        let layers = vec![Layer::with_moist(50.0), Layer::with_moist(50.0)];
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        // Conductivity of 500 mm/h far exceeds the 50 mm stored
        let out = integrate(&c, &soil, &layers, &mut col, 0.0, 0.0, 1, CTX);
        assert_eq!(col.slots[0][UNFROZEN].moist, 0.0);
        assert!((out.outflow - 50.0).abs() < 1e-9);
    }

    #[test]
    fn evaporation_stops_at_residual() {
        let c = cfg(2, false);
        let soil = SoilProperties::uniform(2, 100.0, 48.0, 0.5);
        let mut layers = vec![Layer::with_moist(1.0), Layer::with_moist(0.5)];
        layers[0].evap = 10.0;
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let out = integrate(&c, &soil, &layers, &mut col, 0.0, 0.0, 24, CTX);
        let top = col.slots[0][UNFROZEN].moist;
        assert!(top >= 0.0 && top < 1e-12);
        assert!((out.evap - 1.0).abs() < 1e-12);
        assert_eq!(out.outflow, 0.0);
    }

    #[test]
    fn lens_at_the_surface_sheds_rain() {
        let c = cfg(2, true);
        let soil = SoilProperties::uniform(2, 100.0, 240.0, 0.5);
        let layers = vec![
            Layer {
                moist_froz: 3.0,
                ice: 95.0,
                fdepth: 0.25,
                ..Layer::with_moist(20.0)
            },
            Layer::with_moist(50.0),
        ];
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let out = integrate(&c, &soil, &layers, &mut col, 10.0, 0.0, 1, CTX);
        // The lens holds 2 mm of liquid over half the layer, the rest runs off
        assert!((out.saturation_runoff - 9.0).abs() < 1e-9);
        assert!((col.slots[0][FROZEN].moist - 5.0).abs() < 1e-12);
        assert!(col.slots[0][UNFROZEN].moist <= 20.0);
        assert!(out.outflow < 1e-5);
    }

    #[test]
    fn excess_moving_up_is_rescaled_by_thickness() {
        let c = cfg(2, true);
        let soil = SoilProperties::uniform(2, 100.0, 240.0, 0.5);
        // Thawed 0.2 over a frozen lens of 0.4 holding 5 mm above capacity
        let layers = vec![
            Layer {
                moist_thaw: 40.0,
                moist_froz: 10.0,
                ice: 95.0,
                tdepth: 0.1,
                fdepth: 0.3,
                ..Layer::with_moist(50.0)
            },
            Layer::with_moist(50.0),
        ];
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let before = col.storage();
        let mut state = FluxState::new(2, CTX);
        state.conductivity(&c, &soil, &layers, &col);
        assert!(state.order[1].impermeable);
        let (outflow, shed) = state.advance(&layers, &mut col, 0.0, 1);
        assert_eq!(shed, 0.0);
        assert!((col.slots[0][FROZEN].moist - 5.0).abs() < 1e-9);
        // 5 mm over 0.4 of the layer lands as 10 mm over 0.2
        assert!((col.slots[0][THAWED].moist - 50.0).abs() < 1e-9);
        assert!((col.storage() + outflow - before).abs() < 1e-12);
    }

    #[test]
    fn layer_flows_chain_down_the_column() {
        let c = cfg(3, false);
        let soil = SoilProperties::uniform(3, 100.0, 240.0, 0.5);
        let layers = vec![
            Layer::with_moist(80.0),
            Layer::with_moist(70.0),
            Layer::with_moist(60.0),
        ];
        let mut col = Column::build(&c, &soil, &layers, CTX).unwrap();
        let out = integrate(&c, &soil, &layers, &mut col, 12.0, 3.0, 6, CTX);
        assert!((out.layer_inflow[0] - 9.0).abs() < 1e-12);
        assert!((out.layer_inflow[1] - out.layer_outflow[0]).abs() < 1e-12);
        assert!((out.layer_inflow[2] - out.layer_outflow[1]).abs() < 1e-12);
        assert!((out.layer_inflow[2] - out.outflow).abs() < 1e-12);
        assert_eq!(out.layer_outflow[2], 0.0);
    }
}
