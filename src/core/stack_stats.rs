use crate::types::{DefectError, DefectResult, PixelValue};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Sigma-clipping parameters for the population statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Clip values further than this many standard deviations from the median
    pub sigma: f64,
    /// Maximum number of clipping passes
    pub max_iters: usize,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iters: 5,
        }
    }
}

/// Threshold-mask parameters for a frame stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackStatsParams {
    /// Sigma multiplier applied to the clipped standard deviation
    pub threshold: f64,
    /// Remove the baseline's own median before computing statistics
    pub subtract_background: bool,
    /// Also flag pixels below `center - threshold * spread`
    pub flag_low: bool,
    pub clip: SigmaClipParams,
}

impl Default for StackStatsParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            subtract_background: false,
            flag_low: false,
            clip: SigmaClipParams::default(),
        }
    }
}

/// Sigma-clipped location and scale estimates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Values remaining after clipping
    pub count: usize,
}

impl ClippedStats {
    fn undefined() -> Self {
        Self {
            mean: f64::NAN,
            median: f64::NAN,
            std: f64::NAN,
            count: 0,
        }
    }
}

/// Same-shape frames from a single detector, stacked along axis 0
#[derive(Debug, Clone)]
pub struct FrameStack {
    detector: String,
    frames: Array3<PixelValue>,
}

impl FrameStack {
    pub fn new(detector: impl Into<String>, frames: Array3<PixelValue>) -> DefectResult<Self> {
        if frames.len_of(Axis(0)) == 0 {
            return Err(DefectError::EmptyStack);
        }
        Ok(Self {
            detector: detector.into(),
            frames,
        })
    }

    /// Stack frames tagged with their detector name.
    ///
    /// Every frame must come from the same detector and share one 2D shape.
    pub fn from_detector_frames<'a, I>(frames: I) -> DefectResult<Self>
    where
        I: IntoIterator<Item = (&'a str, ArrayView2<'a, PixelValue>)>,
    {
        let frames: Vec<(&str, ArrayView2<'_, PixelValue>)> = frames.into_iter().collect();
        let (detector, first) = match frames.first() {
            Some(&(detector, first)) => (detector, first),
            None => return Err(DefectError::EmptyStack),
        };

        for (other, frame) in &frames[1..] {
            if *other != detector {
                return Err(DefectError::MixedDetectors {
                    first: detector.to_string(),
                    other: other.to_string(),
                });
            }
            if frame.dim() != first.dim() {
                return Err(DefectError::ShapeMismatch {
                    expected: first.shape().to_vec(),
                    found: frame.shape().to_vec(),
                });
            }
        }

        let views: Vec<ArrayView2<'_, PixelValue>> = frames.iter().map(|(_, f)| f.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)?;
        Self::new(detector, stacked)
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    pub fn len(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (rows, columns) shared by every frame
    pub fn frame_shape(&self) -> (usize, usize) {
        (self.frames.len_of(Axis(1)), self.frames.len_of(Axis(2)))
    }

    pub fn frames(&self) -> ArrayView3<'_, PixelValue> {
        self.frames.view()
    }
}

/// Result of thresholding a stack's baseline
#[derive(Debug, Clone)]
pub struct StackMask {
    pub mask: Array2<bool>,
    pub baseline: Array2<PixelValue>,
    pub stats: ClippedStats,
}

/// Median of the non-NaN values, or NaN when there are none
pub fn nan_median<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    median_in_place(&mut finite)
}

fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn lane_median(lane: ArrayView1<'_, PixelValue>) -> PixelValue {
    nan_median(lane.iter().map(|&v| v as f64)) as PixelValue
}

/// Per-pixel median across the stack axis, ignoring NaNs.
///
/// Pixels that are NaN in every frame come out NaN.
#[cfg(feature = "parallel")]
pub fn nan_median_stack(stack: ArrayView3<'_, PixelValue>) -> Array2<PixelValue> {
    Zip::from(stack.lanes(Axis(0))).par_map_collect(lane_median)
}

#[cfg(not(feature = "parallel"))]
pub fn nan_median_stack(stack: ArrayView3<'_, PixelValue>) -> Array2<PixelValue> {
    Zip::from(stack.lanes(Axis(0))).map_collect(lane_median)
}

/// Iteratively sigma-clipped mean, median and standard deviation.
///
/// Non-finite values are ignored. Each pass drops values outside
/// `median +/- sigma * std` of the survivors; clipping stops once a pass
/// removes nothing or `max_iters` passes have run.
pub fn sigma_clipped_stats<I: IntoIterator<Item = f64>>(
    values: I,
    params: &SigmaClipParams,
) -> ClippedStats {
    let mut kept: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return ClippedStats::undefined();
    }

    for _ in 0..params.max_iters {
        let center = median_in_place(&mut kept);
        let (_, std) = mean_and_std(&kept);
        let lower = center - params.sigma * std;
        let upper = center + params.sigma * std;

        let before = kept.len();
        kept.retain(|&v| v >= lower && v <= upper);
        if kept.len() == before || kept.is_empty() {
            break;
        }
    }

    if kept.is_empty() {
        return ClippedStats::undefined();
    }

    let median = median_in_place(&mut kept);
    let (mean, std) = mean_and_std(&kept);
    ClippedStats {
        mean,
        median,
        std,
        count: kept.len(),
    }
}

/// Derives a bad-pixel mask from the robust baseline of a frame stack
#[derive(Debug, Clone, Default)]
pub struct StackStatistics {
    params: StackStatsParams,
}

impl StackStatistics {
    pub fn new(params: StackStatsParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StackStatsParams {
        &self.params
    }

    /// Median-collapse the stack, clip the population statistics, and flag
    /// baseline pixels beyond `threshold` standard deviations.
    pub fn compute(&self, stack: &FrameStack) -> DefectResult<StackMask> {
        if !self.params.threshold.is_finite() {
            return Err(DefectError::InvalidParameter(format!(
                "threshold must be finite, got {}",
                self.params.threshold
            )));
        }

        log::debug!(
            "Collapsing {} frame(s) of {} with parameters: {:?}",
            stack.len(),
            stack.detector(),
            self.params
        );

        let mut baseline = nan_median_stack(stack.frames());

        if self.params.subtract_background {
            let background = nan_median(baseline.iter().map(|&v| v as f64));
            if background.is_finite() {
                baseline.mapv_inplace(|v| v - background as PixelValue);
            }
        }

        let stats = sigma_clipped_stats(baseline.iter().map(|&v| v as f64), &self.params.clip);
        let upper = stats.median + self.params.threshold * stats.std;
        let lower = stats.median - self.params.threshold * stats.std;
        let flag_low = self.params.flag_low;

        let mask = baseline.mapv(|v| {
            let v = v as f64;
            v > upper || (flag_low && v < lower)
        });

        log::debug!(
            "{}: center={:.4e} spread={:.4e} from {} clipped values",
            stack.detector(),
            stats.median,
            stats.std,
            stats.count
        );

        Ok(StackMask {
            mask,
            baseline,
            stats,
        })
    }
}
