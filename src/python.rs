//! Python bindings exposing the defect engine to the host pipeline

use crate::core::engine::{DefectEngine, PersistenceParams, SelfCalMode, SelfCalParams, SnowblindParams};
use crate::core::region_dilate::RegionDilateParams;
use crate::io::exposure::{mjd_to_datetime, Exposure};
use crate::types::{DefectError, DqFlags, DqWord, PixelValue};
use ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyArrayDyn, PyReadonlyArray2, PyReadonlyArrayDyn};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

impl From<DefectError> for PyErr {
    fn from(err: DefectError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(snowblind, m)?)?;
    m.add_function(wrap_pyfunction!(jump_plus, m)?)?;
    m.add_function(wrap_pyfunction!(persistence, m)?)?;
    m.add_function(wrap_pyfunction!(self_calibrate, m)?)?;
    Ok(())
}

/// Dilate large jump events in a DQ array; returns the updated array and
/// the number of flagged pixels
#[pyfunction]
#[pyo3(signature = (dq, min_radius=4, growth_factor=2.0, after_jumps=2, ring_width=2.0, new_jump_flag=None))]
fn snowblind<'py>(
    py: Python<'py>,
    dq: PyReadonlyArrayDyn<'py, DqWord>,
    min_radius: usize,
    growth_factor: f64,
    after_jumps: usize,
    ring_width: f64,
    new_jump_flag: Option<DqWord>,
) -> PyResult<(&'py PyArrayDyn<DqWord>, usize)> {
    let mut dq = dq.as_array().to_owned();
    let params = SnowblindParams {
        dilate: RegionDilateParams {
            min_radius,
            growth_factor,
            ..RegionDilateParams::default()
        },
        after_jumps,
        ring_width,
        new_jump_flag,
    };

    let report = py.allow_threads(|| DefectEngine::default().snowblind(&mut dq, &params))?;
    Ok((dq.into_pyarray(py), report.flagged_pixels))
}

/// Carry jump flags one group forward; returns the updated array and the
/// step status
#[pyfunction]
fn jump_plus<'py>(
    py: Python<'py>,
    groupdq: PyReadonlyArrayDyn<'py, DqWord>,
    nframes: u32,
) -> PyResult<(&'py PyArrayDyn<DqWord>, String)> {
    let mut groupdq = groupdq.as_array().to_owned();
    let status = py.allow_threads(|| DefectEngine::default().jump_plus(&mut groupdq, nframes))?;
    Ok((groupdq.into_pyarray(py), status.to_string()))
}

/// Flag persistence across exposures; returns the updated DQ arrays in
/// input order
#[pyfunction]
#[pyo3(signature = (dq, detectors, start_mjd, filenames, time_budget=2500.0))]
fn persistence<'py>(
    py: Python<'py>,
    dq: Vec<PyReadonlyArray2<'py, DqWord>>,
    detectors: Vec<String>,
    start_mjd: Vec<f64>,
    filenames: Vec<String>,
    time_budget: f64,
) -> PyResult<Vec<&'py PyArray2<DqWord>>> {
    if dq.len() != detectors.len() || dq.len() != start_mjd.len() || dq.len() != filenames.len() {
        return Err(PyValueError::new_err(
            "dq, detectors, start_mjd and filenames must have the same length",
        ));
    }

    let mut exposures = Vec::with_capacity(dq.len());
    for (((dq, detector), mjd), filename) in dq.iter().zip(detectors).zip(start_mjd).zip(filenames) {
        let dq = dq.as_array().to_owned();
        let data = Array2::<PixelValue>::zeros(dq.dim());
        let mut exposure = Exposure::new(filename, detector, mjd_to_datetime(mjd)?, data);
        exposure.dq = dq;
        exposures.push(exposure);
    }

    let params = PersistenceParams {
        time_budget,
        save_mask: false,
    };
    py.allow_threads(|| DefectEngine::default().persistence(&mut exposures, &params))?;

    Ok(exposures.into_iter().map(|e| e.dq.into_pyarray(py)).collect())
}

/// Self-calibrate bad pixels from a stack; returns the updated DQ arrays and
/// a dict of per-detector masks
#[pyfunction]
#[pyo3(signature = (data, dq, detectors, filenames, mode="open_pixel", threshold=3.0, flag_low_signal=false))]
#[allow(clippy::too_many_arguments)]
fn self_calibrate<'py>(
    py: Python<'py>,
    data: Vec<PyReadonlyArray2<'py, PixelValue>>,
    dq: Vec<PyReadonlyArray2<'py, DqWord>>,
    detectors: Vec<String>,
    filenames: Vec<String>,
    mode: &str,
    threshold: f64,
    flag_low_signal: bool,
) -> PyResult<(Vec<&'py PyArray2<DqWord>>, &'py PyDict)> {
    let mode = match mode {
        "open_pixel" => SelfCalMode::OpenPixel,
        "rc_selfcal" => SelfCalMode::ResistiveCorner,
        other => {
            return Err(PyValueError::new_err(format!(
                "Invalid self-calibration mode: {}",
                other
            )))
        }
    };
    if data.len() != dq.len() || data.len() != detectors.len() || data.len() != filenames.len() {
        return Err(PyValueError::new_err(
            "data, dq, detectors and filenames must have the same length",
        ));
    }

    let mut exposures = Vec::with_capacity(data.len());
    for (((data, dq), detector), filename) in data.iter().zip(&dq).zip(detectors).zip(filenames) {
        // Start time is unused by self-calibration
        let mut exposure = Exposure::new(
            filename,
            detector,
            mjd_to_datetime(0.0)?,
            data.as_array().to_owned(),
        );
        exposure.dq = dq.as_array().to_owned();
        exposures.push(exposure);
    }

    let params = SelfCalParams {
        mode,
        threshold,
        flag_low_signal,
        save_mask: true,
        ..SelfCalParams::default()
    };
    let engine = DefectEngine::new(DqFlags::default());
    let report = py.allow_threads(|| engine.self_calibrate(&mut exposures, &params))?;

    let masks = PyDict::new(py);
    for (detector, product) in report.products {
        masks.set_item(detector, product.mask.into_pyarray(py))?;
    }

    let dq = exposures.into_iter().map(|e| e.dq.into_pyarray(py)).collect();
    Ok((dq, masks))
}
