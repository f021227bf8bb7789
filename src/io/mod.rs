//! Exposure model handed over by the host pipeline

pub mod exposure;

pub use exposure::{Exposure, mjd_to_datetime, group_by_detector, sort_by_start_time, mask_product_prefix};
