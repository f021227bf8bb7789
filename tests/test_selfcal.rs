use ndarray::Array2;
use snowblind::core::{DefectEngine, SelfCalMode, SelfCalParams};
use snowblind::io::{mjd_to_datetime, Exposure};
use snowblind::types::DqFlags;

/// Per-exposure offsets; their median is zero
const OFFSETS: [f32; 8] = [-0.3, -0.2, -0.1, 0.0, 0.0, 0.1, 0.2, 0.3];

/// Flat 10x10 pattern taking five evenly populated levels in [-0.4, 0.4]
fn pattern(r: usize, c: usize) -> f32 {
    0.2 * (((r + 2 * c) % 5) as f32 - 2.0)
}

fn detector_stack(detector: &str, with_defects: bool) -> Vec<Exposure> {
    let t0 = mjd_to_datetime(60300.0).expect("bad epoch");
    OFFSETS
        .iter()
        .enumerate()
        .map(|(k, &offset)| {
            let mut data = Array2::from_shape_fn((10, 10), |(r, c)| pattern(r, c) + offset);
            if with_defects {
                data[[2, 2]] = -10.0;
                data[[3, 5]] = 5.0;
                data[[8, 8]] = 0.6;
            }
            let name = format!("jw02_{}_{}_cal.fits", k, detector.to_lowercase());
            Exposure::new(name, detector, t0, data)
        })
        .collect()
}

fn all_exposures() -> Vec<Exposure> {
    let mut exposures = detector_stack("NRCA1", true);
    exposures.extend(detector_stack("NRCB1", false));
    exposures
}

#[test]
fn test_open_pixel_flags_high_outliers_only() {
    let _ = env_logger::builder().is_test(true).try_init();

    let flags = DqFlags::default();
    let bits = flags.do_not_use | flags.adj_open;

    let mut exposures = all_exposures();
    let params = SelfCalParams {
        save_mask: true,
        ..SelfCalParams::default()
    };
    let report = DefectEngine::new(flags)
        .self_calibrate(&mut exposures, &params)
        .expect("self-calibration failed");

    assert_eq!(report.flagged_pixels["NRCA1"], 1);
    assert_eq!(report.flagged_pixels["NRCB1"], 0);

    for e in exposures.iter().filter(|e| e.detector == "NRCA1") {
        assert_eq!(e.dq[[3, 5]], bits);
        assert_eq!(e.dq[[2, 2]], 0);
        assert_eq!(e.dq[[8, 8]], 0);
    }
    assert!(exposures
        .iter()
        .filter(|e| e.detector == "NRCB1")
        .all(|e| e.dq.iter().all(|&w| w == 0)));

    let stats = report.stats["NRCA1"];
    assert!(stats.median.abs() < 1e-6);
    assert!(stats.std > 0.25 && stats.std < 0.31);
    assert_eq!(stats.count, 98);

    let product = &report.products["NRCA1"];
    assert!(product.prefix.starts_with("jw02_"));
    assert!(product.prefix.ends_with("_nrca1_open_pixel"));
    assert!(product.mask[[3, 5]]);
    assert!((product.baseline[[3, 5]] - 5.0).abs() < 1e-6);
}

#[test]
fn test_flag_low_signal_and_resistive_corner_bits() {
    let flags = DqFlags::default();
    let bits = flags.do_not_use | flags.rc;

    let mut exposures = all_exposures();
    let params = SelfCalParams {
        mode: SelfCalMode::ResistiveCorner,
        flag_low_signal: true,
        ..SelfCalParams::default()
    };
    let report = DefectEngine::new(flags)
        .self_calibrate(&mut exposures, &params)
        .expect("self-calibration failed");

    assert_eq!(report.flagged_pixels["NRCA1"], 2);
    assert!(report.products.is_empty());
    for e in exposures.iter().filter(|e| e.detector == "NRCA1") {
        assert_eq!(e.dq[[2, 2]], bits);
        assert_eq!(e.dq[[3, 5]], bits);
        assert_eq!(e.dq[[8, 8]], 0);
    }
}

#[test]
fn test_existing_dq_bits_preserved() {
    let mut exposures = all_exposures();
    for e in exposures.iter_mut() {
        e.dq.fill(1 << 9);
    }

    DefectEngine::default()
        .self_calibrate(&mut exposures, &SelfCalParams::default())
        .expect("self-calibration failed");

    assert!(exposures
        .iter()
        .all(|e| e.dq.iter().all(|&w| w & (1 << 9) != 0)));
}

#[test]
fn test_infinite_threshold_rejected() {
    let mut exposures = all_exposures();
    let params = SelfCalParams {
        threshold: f64::INFINITY,
        ..SelfCalParams::default()
    };
    assert!(DefectEngine::default()
        .self_calibrate(&mut exposures, &params)
        .is_err());
}
