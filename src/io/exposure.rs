use crate::types::{DefectError, DefectResult, DqWord, PixelValue};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Seconds in one day, for MJD conversion
const SECONDS_PER_DAY: f64 = 86_400.0;

/// One calibrated exposure as handed over by the host data model
#[derive(Debug, Clone)]
pub struct Exposure {
    pub filename: String,
    /// Detector name, e.g. "NRCALONG"
    pub detector: String,
    /// Exposure start time
    pub start_time: DateTime<Utc>,
    pub data: Array2<PixelValue>,
    pub dq: Array2<DqWord>,
}

impl Exposure {
    /// Create an exposure with a zeroed DQ array matching `data`
    pub fn new(
        filename: impl Into<String>,
        detector: impl Into<String>,
        start_time: DateTime<Utc>,
        data: Array2<PixelValue>,
    ) -> Self {
        let dq = Array2::zeros(data.dim());
        Self {
            filename: filename.into(),
            detector: detector.into(),
            start_time,
            data,
            dq,
        }
    }

    /// Check that the science and DQ arrays describe the same pixels
    pub fn validate(&self) -> DefectResult<()> {
        if self.data.dim() != self.dq.dim() {
            return Err(DefectError::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                found: self.dq.shape().to_vec(),
            });
        }
        if self.detector.is_empty() {
            return Err(DefectError::InvalidParameter(format!(
                "{} has no detector name",
                self.filename
            )));
        }
        Ok(())
    }
}

/// Convert a Modified Julian Date to a UTC timestamp
pub fn mjd_to_datetime(mjd: f64) -> DefectResult<DateTime<Utc>> {
    if !mjd.is_finite() {
        return Err(DefectError::InvalidTimestamp {
            name: "MJD".to_string(),
            reason: format!("{} is not a finite date", mjd),
        });
    }

    let epoch = Utc
        .with_ymd_and_hms(1858, 11, 17, 0, 0, 0)
        .single()
        .ok_or_else(|| DefectError::InvalidTimestamp {
            name: "MJD".to_string(),
            reason: "MJD epoch is not representable".to_string(),
        })?;

    let micros = (mjd * SECONDS_PER_DAY * 1e6).round();
    if micros.abs() > i64::MAX as f64 {
        return Err(DefectError::InvalidTimestamp {
            name: "MJD".to_string(),
            reason: format!("{} is out of range", mjd),
        });
    }

    epoch
        .checked_add_signed(Duration::microseconds(micros as i64))
        .ok_or_else(|| DefectError::InvalidTimestamp {
            name: "MJD".to_string(),
            reason: format!("{} is out of range", mjd),
        })
}

/// Indices of `exposures` partitioned by detector name, in name order
pub fn group_by_detector(exposures: &[Exposure]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, exposure) in exposures.iter().enumerate() {
        groups.entry(exposure.detector.clone()).or_default().push(i);
    }
    groups
}

/// Sort a detector group by start time.
///
/// Returns the indices in start-time order (stable for equal times) and the
/// elapsed seconds between consecutive exposures, the first being 0.
pub fn sort_by_start_time(
    exposures: &[Exposure],
    indices: &[usize],
) -> DefectResult<(Vec<usize>, Vec<f64>)> {
    if let Some(&bad) = indices.iter().find(|&&i| i >= exposures.len()) {
        return Err(DefectError::InvalidParameter(format!(
            "exposure index {} out of range for {} exposures",
            bad,
            exposures.len()
        )));
    }

    let mut order = indices.to_vec();
    order.sort_by_key(|&i| exposures[i].start_time);

    let deltas = order
        .iter()
        .enumerate()
        .map(|(k, &i)| {
            if k == 0 {
                return Ok(0.0);
            }
            let previous = &exposures[order[k - 1]];
            let current = &exposures[i];
            let elapsed = current.start_time - previous.start_time;
            elapsed
                .num_microseconds()
                .map(|us| us as f64 / 1e6)
                .ok_or_else(|| DefectError::InvalidTimestamp {
                    name: current.filename.clone(),
                    reason: format!(
                        "elapsed time since {} does not fit in microseconds",
                        previous.filename
                    ),
                })
        })
        .collect::<DefectResult<Vec<f64>>>()?;

    Ok((order, deltas))
}

/// Name stem for mask products derived from a group of exposures.
///
/// Common prefix of the filenames, then the lowercase detector and the step
/// alias, joined by underscores.
pub fn mask_product_prefix<S: AsRef<str>>(filenames: &[S], detector: &str, alias: &str) -> String {
    let prefix = match filenames.split_first() {
        Some((first, rest)) => rest.iter().fold(first.as_ref().to_string(), |acc, name| {
            acc.chars()
                .zip(name.as_ref().chars())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect()
        }),
        None => String::new(),
    };
    format!("{}_{}_{}", prefix, detector.to_lowercase(), alias)
}
