// Sublayer working state: each layer split into thawed, frozen and unfrozen
// slots. Rebuilt on every call from the caller's layer state.

use log::trace;

use crate::config::RunoffConfig;
use crate::error::{Result, RunoffError};
use crate::runoff::CellContext;
use crate::soil::{Layer, SoilProperties};

pub const THAWED: usize = 0;
pub const FROZEN: usize = 1;
pub const UNFROZEN: usize = 2;
pub const N_SUB: usize = 3;

const SUB_NAMES: [&str; N_SUB] = ["thawed", "frozen", "unfrozen"];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Slot {
    pub frac: f64,      // Thickness fraction of the layer
    pub moist: f64,     // Liquid moisture (mm over the whole layer area)
    pub ice: f64,       // Ice content (mm)
    pub max_moist: f64, // Maximum moisture (mm)
}

impl Slot {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.frac > 0.0
    }

    /// Water held above capacity, or a non-positive number.
    #[inline]
    pub fn excess(&self) -> f64 {
        self.moist + self.ice - self.max_moist
    }

    /// Clamp liquid moisture so that moisture plus ice equals capacity.
    #[inline]
    pub fn fill(&mut self) {
        self.moist = self.max_moist - self.ice;
    }
}

/// Working arrays for one distribution branch, indexed `[layer][sublayer]`.
#[derive(Debug, Clone)]
pub struct Column {
    pub slots: Vec<[Slot; N_SUB]>,
    pub resid: Vec<f64>, // Residual moisture per layer (mm)
}

impl Column {
    pub fn build(
        cfg: &RunoffConfig,
        soil: &SoilProperties,
        layers: &[Layer],
        ctx: CellContext,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(layers.len());
        let mut resid = Vec::with_capacity(layers.len());
        for (l, layer) in layers.iter().enumerate() {
            slots.push(build_layer(cfg, soil, layer, l, ctx)?);
            resid.push(soil.resid_mm(cfg, l));
        }
        Ok(Column { slots, resid })
    }

    pub fn n_layers(&self) -> usize {
        self.slots.len()
    }

    pub fn bottom(&self) -> &Slot {
        &self.slots[self.slots.len() - 1][UNFROZEN]
    }

    pub fn bottom_mut(&mut self) -> &mut Slot {
        let l = self.slots.len() - 1;
        &mut self.slots[l][UNFROZEN]
    }

    /// Liquid water stored in the column (mm).
    pub fn storage(&self) -> f64 {
        self.slots
            .iter()
            .flat_map(|layer| layer.iter())
            .filter(|s| s.is_active())
            .map(|s| s.moist * s.frac)
            .sum()
    }

    /// Copy sublayer moisture back into the layer state. Zero-thickness
    /// sublayers report zero moisture.
    pub fn write_back(&self, layers: &mut [Layer]) {
        for (layer, slots) in layers.iter_mut().zip(&self.slots) {
            let moist = |s: &Slot| if s.is_active() { s.moist } else { 0.0 };
            layer.moist_thaw = moist(&slots[THAWED]);
            layer.moist_froz = moist(&slots[FROZEN]);
            layer.moist = moist(&slots[UNFROZEN]);
        }
    }
}

fn build_layer(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    layer: &Layer,
    l: usize,
    ctx: CellContext,
) -> Result<[Slot; N_SUB]> {
    let frac = if cfg.frozen_soil {
        layer.front_fractions(soil.depth[l])
    } else {
        [0.0, 0.0, 1.0]
    };
    let moist = [layer.moist_thaw, layer.moist_froz, layer.moist];
    for (sub, &m) in moist.iter().enumerate() {
        if m < 0.0 {
            return Err(RunoffError::NegativeMoisture {
                layer: l,
                sublayer: SUB_NAMES[sub],
                moisture: m,
            });
        }
    }
    let ice = [0.0, layer.ice, 0.0];

    let max_moist = soil.max_moist[l];
    let mut slots = [Slot::default(); N_SUB];
    for sub in 0..N_SUB {
        slots[sub] = Slot {
            frac: frac[sub],
            moist: moist[sub],
            ice: ice[sub],
            max_moist,
        };
    }

    // Ice expansion can push frozen liquid past capacity
    if slots[FROZEN].moist > max_moist {
        trace!(
            "{ctx}: layer {l} frozen moisture {:.3} clamped to {:.3}",
            slots[FROZEN].moist,
            max_moist
        );
        slots[FROZEN].moist = max_moist;
    }
    Ok(slots)
}
