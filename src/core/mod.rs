//! Core defect detection and propagation modules

pub mod shape;
pub mod morphology;
pub mod region_dilate;
pub mod temporal;
pub mod stack_stats;
pub mod engine;

// Re-export main types
pub use shape::{ShapeAdapter, FrameLayout, FrameIndex};
pub use morphology::{Connectivity, Component};
pub use region_dilate::{RegionDilator, RegionDilateParams, LargeEvent, DilationOutcome};
pub use temporal::{propagate_fixed_count, propagate_time_budget, time_budget_windows};
pub use stack_stats::{StackStatistics, StackStatsParams, SigmaClipParams, ClippedStats, FrameStack, StackMask};
pub use engine::{
    DefectEngine, SnowblindParams, SnowblindReport, PersistenceParams, PersistenceReport,
    PersistenceMask, SelfCalMode, SelfCalParams, SelfCalReport, MaskProduct,
};
