//! Soil-column water balance for a multi-layer land-surface hydrology model.
//!
//! One call partitions the water reaching the surface into infiltration-excess
//! runoff, gravity drainage between layers (hourly sub-steps, Brooks-Corey
//! conductivity), saturation excess and ARNO baseflow from the bottom layer.
//! Optional frozen-soil sublayers and a wet/dry precipitation mosaic are
//! supported.

pub mod baseflow;
pub mod config;
pub mod drainage;
pub mod error;
pub mod infiltration;
pub mod runoff;
pub mod soil;
pub mod sublayer;
pub mod thermal;

#[cfg(feature = "python")]
mod python;

pub use config::RunoffConfig;
pub use error::{Result, RunoffError};
pub use runoff::{
    run_columns, runoff, runoff_in_place, BalanceTrace, CellContext, ColumnInput, RunoffResult,
};
pub use soil::{EnergyState, Layer, SoilProperties};
pub use thermal::{LayerAverager, SoilThermal, ThermalModel, ThermalReconciler, WeightedAverage};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _vic_runoff(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;
    Ok(())
}
