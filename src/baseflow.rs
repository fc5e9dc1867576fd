// ARNO baseflow from the unfrozen sublayer of the bottom layer.

use crate::config::HOURS_PER_DAY;
use crate::soil::SoilProperties;
use crate::sublayer::Column;

/// Two-regime ARNO drainage (mm per time step): linear below
/// `ws * max_moist`, with a power-law term added above it. `dsmax` is the
/// maximum baseflow for the time step.
pub fn arno_baseflow(moist: f64, max_moist: f64, ds: f64, dsmax: f64, ws: f64, c: f64) -> f64 {
    let threshold = ws * max_moist;
    let mut baseflow = ds * dsmax / threshold * moist;
    if moist > threshold {
        let frac = (moist - threshold) / (max_moist - threshold);
        baseflow += (dsmax - ds * dsmax / ws) * frac.powf(c);
    }
    baseflow
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BottomDrainage {
    pub baseflow: f64, // Scaled to the whole layer (mm)
    pub evap: f64,     // Evaporation withdrawn from the reservoir (mm)
}

/// Apply the drained inflow, evaporation and baseflow to the bottom
/// reservoir. Evaporation is limited to the water above residual.
pub fn drain_bottom(
    soil: &SoilProperties,
    column: &mut Column,
    inflow: f64,
    evap: f64,
    dt: usize,
) -> BottomDrainage {
    let l = column.n_layers() - 1;
    let resid = column.resid[l];
    let slot = column.bottom_mut();
    if !slot.is_active() {
        // Fully frozen bottom layer: drained water leaves the column
        return BottomDrainage {
            baseflow: inflow,
            evap: 0.0,
        };
    }

    let dsmax = soil.dsmax * dt as f64 / HOURS_PER_DAY;
    let mut baseflow = arno_baseflow(
        slot.moist,
        soil.max_moist[l],
        soil.ds,
        dsmax,
        soil.ws,
        soil.c,
    );

    slot.moist += inflow / slot.frac;
    let evap = evap.min((slot.moist - resid).max(0.0));
    slot.moist -= evap;
    // Neither loss takes the reservoir below residual
    baseflow = baseflow.min((slot.moist - resid).max(0.0));
    slot.moist -= baseflow;

    if slot.excess() > 0.0 {
        baseflow += slot.excess();
        slot.fill();
    }

    BottomDrainage {
        baseflow: baseflow * slot.frac,
        evap: evap * slot.frac,
    }
}
