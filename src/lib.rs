//! snowblind: detector defect masking for infrared ramp data
//!
//! Grows large cosmic-ray jump events and their saturated cores, carries
//! jump and saturation flags forward in time (across groups of a ramp or
//! across consecutive exposures), and builds per-detector bad-pixel masks
//! from stacks of exposures. Every result is folded into the caller's DQ
//! arrays by OR-ing bits, so existing flags are never cleared.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    DefectError, DefectResult, DqFlags, DqWord, PixelValue, StepStatus, DefectMask, BoolFrame,
    decode_flag, fold_flags,
};

pub use io::Exposure;
pub use crate::core::{
    DefectEngine, ShapeAdapter, RegionDilator, StackStatistics, SnowblindParams,
    PersistenceParams, SelfCalParams, SelfCalMode,
};
