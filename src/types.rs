use ndarray::{Array2, ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use num_traits::PrimInt;
use serde::{Deserialize, Serialize};

/// Data-quality word as stored in ramp and image products
pub type DqWord = u32;

/// Real-valued science pixel
pub type PixelValue = f32;

/// 2D boolean defect frame (rows x columns)
pub type BoolFrame = Array2<bool>;

/// Boolean defect mask with the same rank and shape as its DQ array
pub type DefectMask = ArrayD<bool>;

/// Named data-quality bit values.
///
/// The engine never assumes a bit layout of its own; every flag it reads or
/// writes comes from an instance of this struct. `Default` follows the JWST
/// pixel/group DQ convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DqFlags {
    pub do_not_use: DqWord,
    pub saturated: DqWord,
    pub jump_det: DqWord,
    pub persistence: DqWord,
    pub rc: DqWord,
    pub open: DqWord,
    pub adj_open: DqWord,
}

impl Default for DqFlags {
    fn default() -> Self {
        Self {
            do_not_use: 1 << 0,
            saturated: 1 << 1,
            jump_det: 1 << 2,
            persistence: 1 << 5,
            rc: 1 << 14,
            open: 1 << 26,
            adj_open: 1 << 27,
        }
    }
}

/// Outcome of one engine stage, mirrored into the host's step metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Complete,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Complete => write!(f, "COMPLETE"),
            StepStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Error types for defect-mask processing
#[derive(Debug, thiserror::Error)]
pub enum DefectError {
    #[error("Unsupported array rank {rank}: expected 2, 3 or 4 dimensions")]
    InvalidRank { rank: usize },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Stack mixes detectors {first} and {other}")]
    MixedDetectors { first: String, other: String },

    #[error("Invalid ordering timestamp for {name}: {reason}")]
    InvalidTimestamp { name: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Frame stack is empty")]
    EmptyStack,

    #[error("Array layout error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for defect-mask operations
pub type DefectResult<T> = Result<T, DefectError>;

/// Decode the pixels carrying every bit of `flag`.
pub fn decode_flag<T: PrimInt>(dq: ArrayViewD<'_, T>, flag: T) -> DefectMask {
    dq.mapv(|word| word & flag == flag)
}

/// OR `bits` into every DQ word whose mask pixel is set. Never clears bits.
pub fn fold_flags<T: PrimInt>(
    dq: ArrayViewMutD<'_, T>,
    mask: ArrayViewD<'_, bool>,
    bits: T,
) -> DefectResult<usize> {
    if dq.shape() != mask.shape() {
        return Err(DefectError::ShapeMismatch {
            expected: dq.shape().to_vec(),
            found: mask.shape().to_vec(),
        });
    }

    let mut flagged = 0usize;
    Zip::from(dq).and(&mask).for_each(|word, &set| {
        if set {
            *word = *word | bits;
            flagged += 1;
        }
    });

    Ok(flagged)
}
