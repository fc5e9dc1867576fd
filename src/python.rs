// PyO3 entry point: run many independent soil columns over a forcing time
// series in parallel.

use numpy::{PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::config::RunoffConfig;
use crate::error::RunoffError;
use crate::runoff::{runoff_in_place, CellContext};
use crate::soil::{EnergyState, Layer, SoilProperties};
use crate::thermal::ThermalReconciler;

impl From<RunoffError> for PyErr {
    fn from(err: RunoffError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

// b_infilt, ds, dsmax, ws, c
const N_PARAMS: usize = 5;

struct UnitSeries {
    runoff: Vec<f64>,
    baseflow: Vec<f64>,
    moist: Vec<f64>,
}

fn run_unit(
    cfg: &RunoffConfig,
    soil: &SoilProperties,
    init_moist: &[f64],
    ppt: &[f64],
    evap: &[f64],
    dt: usize,
    unit: usize,
) -> Result<UnitSeries, RunoffError> {
    let mut layers: Vec<Layer> = init_moist.iter().map(|&m| Layer::with_moist(m)).collect();
    let mut energy = EnergyState::new(cfg.n_nodes);
    let thermal = ThermalReconciler::standard();

    let mut series = UnitSeries {
        runoff: Vec::with_capacity(ppt.len()),
        baseflow: Vec::with_capacity(ppt.len()),
        moist: Vec::new(),
    };
    for t in 0..ppt.len() {
        layers[0].evap = evap[t];
        let ctx = CellContext {
            band: 0,
            rec: t,
            iveg: unit,
        };
        let [runoff, baseflow, _, _] = runoff_in_place(
            cfg,
            soil,
            &mut layers,
            &mut [],
            &mut energy,
            [ppt[t], 0.0],
            1.0,
            dt,
            ctx,
            &thermal,
        )?;
        series.runoff.push(runoff);
        series.baseflow.push(baseflow);
    }
    series.moist = layers.iter().map(|l| l.moist).collect();
    Ok(series)
}

/// Run the soil water balance for all units in parallel.
///
/// Parameters
/// ----------
/// ppt : ndarray (n_time, n_units)
///     Rain and snowmelt reaching the surface per time step (mm)
/// evap : ndarray (n_time, n_units)
///     Evaporative demand on the top layer per time step (mm)
/// init_moist : ndarray (n_units, n_layers)
///     Initial layer moisture (mm)
/// ksat : ndarray (n_units, n_layers)
///     Saturated hydraulic conductivity (mm/day)
/// max_moist : ndarray (n_units, n_layers)
///     Maximum layer moisture (mm)
/// expt : ndarray (n_units, n_layers)
///     Brooks-Corey exponent
/// depth : ndarray (n_units, n_layers)
///     Layer thickness (m)
/// params : ndarray (5,)
///     [b_infilt, ds, dsmax, ws, c], shared by all units
/// dt : usize
///     Hours per time step
///
/// Returns
/// -------
/// tuple of 3 ndarrays:
///     runoff (n_time, n_units), baseflow (n_time, n_units),
///     final_moist (n_units, n_layers)
#[pyfunction]
#[pyo3(signature = (ppt, evap, init_moist, ksat, max_moist, expt, depth, params, dt=24))]
#[allow(clippy::too_many_arguments)]
fn run_runoff_batch<'py>(
    py: Python<'py>,
    ppt: PyReadonlyArray2<'py, f64>,
    evap: PyReadonlyArray2<'py, f64>,
    init_moist: PyReadonlyArray2<'py, f64>,
    ksat: PyReadonlyArray2<'py, f64>,
    max_moist: PyReadonlyArray2<'py, f64>,
    expt: PyReadonlyArray2<'py, f64>,
    depth: PyReadonlyArray2<'py, f64>,
    params: PyReadonlyArray1<'py, f64>,
    dt: usize,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
)> {
    let ppt = ppt.as_array();
    let evap = evap.as_array();
    let init_moist = init_moist.as_array();
    let ksat = ksat.as_array();
    let max_moist = max_moist.as_array();
    let expt = expt.as_array();
    let depth = depth.as_array();
    let params: Vec<f64> = params.as_array().iter().copied().collect();

    let n_time = ppt.shape()[0];
    let n_units = ppt.shape()[1];
    let n_layers = init_moist.shape()[1];

    if evap.shape() != ppt.shape() {
        return Err(PyValueError::new_err("evap must have the shape of ppt"));
    }
    for (name, arr) in [
        ("init_moist", &init_moist),
        ("ksat", &ksat),
        ("max_moist", &max_moist),
        ("expt", &expt),
        ("depth", &depth),
    ] {
        if arr.shape() != [n_units, n_layers] {
            return Err(PyValueError::new_err(format!(
                "{name} must have shape ({n_units}, {n_layers})"
            )));
        }
    }
    if params.len() != N_PARAMS {
        return Err(PyValueError::new_err(format!(
            "params must hold {N_PARAMS} values: b_infilt, ds, dsmax, ws, c"
        )));
    }

    let cfg = RunoffConfig {
        n_layers,
        ..RunoffConfig::default()
    };

    // Pre-extract per-unit inputs so the parallel section holds no numpy views
    struct UnitInput {
        soil: SoilProperties,
        init_moist: Vec<f64>,
        ppt: Vec<f64>,
        evap: Vec<f64>,
    }
    let units: Vec<UnitInput> = (0..n_units)
        .map(|u| {
            let row = |a: &ndarray::ArrayView2<f64>| -> Vec<f64> {
                (0..n_layers).map(|l| a[[u, l]]).collect()
            };
            UnitInput {
                soil: SoilProperties {
                    ksat: row(&ksat),
                    max_moist: row(&max_moist),
                    resid_moist: vec![0.0; n_layers],
                    expt: row(&expt),
                    depth: row(&depth),
                    b_infilt: params[0],
                    ds: params[1],
                    dsmax: params[2],
                    ws: params[3],
                    c: params[4],
                    hcap_soil: Vec::new(),
                    hcon_soil: Vec::new(),
                },
                init_moist: row(&init_moist),
                ppt: (0..n_time).map(|t| ppt[[t, u]]).collect(),
                evap: (0..n_time).map(|t| evap[[t, u]]).collect(),
            }
        })
        .collect();

    let results: Vec<Result<UnitSeries, RunoffError>> = py.allow_threads(|| {
        units
            .par_iter()
            .enumerate()
            .map(|(u, unit)| {
                run_unit(&cfg, &unit.soil, &unit.init_moist, &unit.ppt, &unit.evap, dt, u)
            })
            .collect()
    });

    let mut runoff_out = ndarray::Array2::<f64>::zeros((n_time, n_units));
    let mut baseflow_out = ndarray::Array2::<f64>::zeros((n_time, n_units));
    let mut moist_out = ndarray::Array2::<f64>::zeros((n_units, n_layers));

    for (u, result) in results.into_iter().enumerate() {
        let series = result?;
        for t in 0..n_time {
            runoff_out[[t, u]] = series.runoff[t];
            baseflow_out[[t, u]] = series.baseflow[t];
        }
        for (l, &m) in series.moist.iter().enumerate() {
            moist_out[[u, l]] = m;
        }
    }

    Ok((
        PyArray2::from_owned_array_bound(py, runoff_out),
        PyArray2::from_owned_array_bound(py, baseflow_out),
        PyArray2::from_owned_array_bound(py, moist_out),
    ))
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_runoff_batch, m)?)?;
    Ok(())
}
