// Surface infiltration: infiltration-excess runoff from the upper-zone
// moisture state (Wood et al. 1992, JGR 97 D3, eq. 1 and 3).

use crate::soil::Layer;
use crate::sublayer::{Column, FROZEN, N_SUB, THAWED, UNFROZEN};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpperZone {
    pub moist: f64,     // Moisture plus ice of the upper zone (mm)
    pub max_moist: f64, // Capacity of the upper zone (mm)
    pub top_sub: usize, // Uppermost sublayer present in the first layer
}

/// Aggregate the upper zone: the first two layers when the column has more
/// than two, otherwise the first layer alone.
pub fn upper_zone(column: &Column, top: &Layer) -> UpperZone {
    let n_top = if column.n_layers() > 2 { 2 } else { 1 };
    let mut moist = 0.0;
    let mut max_moist = 0.0;
    for slots in &column.slots[..n_top] {
        for s in slots.iter().take(N_SUB) {
            moist += (s.moist + s.ice) * s.frac;
            max_moist += s.max_moist * s.frac;
        }
    }
    let top_sub = if top.tdepth > 0.0 {
        THAWED
    } else if top.fdepth > 0.0 {
        FROZEN
    } else {
        UNFROZEN
    };
    UpperZone {
        moist: moist.min(max_moist),
        max_moist,
        top_sub,
    }
}

/// Infiltration-excess runoff (mm) for `inflow` mm arriving at a surface
/// with upper-zone `moist` of `max_moist` capacity and curve shape `b`.
pub fn infiltration_excess(inflow: f64, moist: f64, max_moist: f64, b: f64) -> f64 {
    if inflow == 0.0 {
        return 0.0;
    }
    let max_infil = (1.0 + b) * max_moist;
    if max_infil == 0.0 {
        return inflow;
    }

    // i0 = max_infil * (1 - (1 - A)^(1/b)) with A = 1 - (1 - W/Wc)^(b/(1+b)),
    // folded into one power so that b = 0 reduces to a bucket
    let i_0 = max_infil * (1.0 - (1.0 - moist / max_moist).powf(1.0 / (1.0 + b)));

    let runoff = if i_0 + inflow > max_infil {
        inflow - max_moist + moist
    } else {
        let basis = 1.0 - (i_0 + inflow) / max_infil;
        inflow - max_moist + moist + max_moist * basis.powf(1.0 + b)
    };
    runoff.max(0.0)
}
