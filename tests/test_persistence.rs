use approx::assert_abs_diff_eq;
use chrono::Duration;
use ndarray::Array2;
use snowblind::core::{DefectEngine, PersistenceParams};
use snowblind::io::{mjd_to_datetime, Exposure};

const SATURATED: u32 = 2;
const PERSIST_BITS: u32 = 1 | 32;

/// Five exposures per detector, each starting 0.0132 days after the last
fn exposures() -> Vec<Exposure> {
    let t0 = mjd_to_datetime(60200.0).expect("bad epoch");
    let step = Duration::microseconds((0.0132_f64 * 86_400.0 * 1e6).round() as i64);

    let mut exposures = Vec::new();
    for detector in ["NRCALONG", "NRCBLONG"] {
        for k in 0..5 {
            let name = format!("jw01_{:02}_{}_cal.fits", k, detector.to_lowercase());
            exposures.push(Exposure::new(
                name,
                detector,
                t0 + step * k,
                Array2::zeros((8, 8)),
            ));
        }
    }
    // Hand the exposures over out of time order
    exposures.reverse();
    exposures
}

fn find<'a>(exposures: &'a [Exposure], detector: &str, k: usize) -> &'a Exposure {
    let name = format!("jw01_{:02}_{}_cal.fits", k, detector.to_lowercase());
    exposures
        .iter()
        .find(|e| e.filename == name)
        .expect("exposure missing")
}

#[test]
fn test_saturation_persists_within_time_budget() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut exposures = exposures();
    let first_a = exposures
        .iter_mut()
        .find(|e| e.filename == "jw01_00_nrcalong_cal.fits")
        .expect("exposure missing");
    first_a.dq[[3, 3]] = SATURATED;

    let params = PersistenceParams {
        time_budget: 2500.0,
        save_mask: true,
    };
    let report = DefectEngine::default()
        .persistence(&mut exposures, &params)
        .expect("persistence failed");

    // Triggering exposure itself is untouched
    assert_eq!(find(&exposures, "NRCALONG", 0).dq[[3, 3]], SATURATED);
    // 1140 s and 2281 s later are inside the budget, 3421 s is not
    assert_eq!(find(&exposures, "NRCALONG", 1).dq[[3, 3]], PERSIST_BITS);
    assert_eq!(find(&exposures, "NRCALONG", 2).dq[[3, 3]], PERSIST_BITS);
    assert_eq!(find(&exposures, "NRCALONG", 3).dq[[3, 3]], 0);
    // Other detector is independent
    for k in 0..5 {
        assert!(find(&exposures, "NRCBLONG", k).dq.iter().all(|&w| w == 0));
    }

    let deltas = &report.time_deltas["NRCALONG"];
    assert_eq!(deltas.len(), 5);
    assert_abs_diff_eq!(deltas[0], 0.0);
    for delta in &deltas[1..] {
        assert_abs_diff_eq!(*delta, 1140.48, epsilon = 1e-3);
    }

    assert_eq!(report.flagged_pixels.iter().sum::<usize>(), 2);
    assert_eq!(report.masks.len(), 10);
}

#[test]
fn test_zero_budget_flags_nothing() {
    let mut exposures = exposures();
    for e in exposures.iter_mut() {
        e.dq[[1, 1]] = SATURATED;
    }

    let params = PersistenceParams {
        time_budget: 0.0,
        save_mask: false,
    };
    let report = DefectEngine::default()
        .persistence(&mut exposures, &params)
        .expect("persistence failed");

    assert!(exposures.iter().all(|e| e.dq[[1, 1]] == SATURATED));
    assert!(report.masks.is_empty());
}

#[test]
fn test_mismatched_dq_rejected() {
    let mut exposures = exposures();
    exposures[0].dq = Array2::zeros((4, 4));

    let result = DefectEngine::default().persistence(&mut exposures, &PersistenceParams::default());
    assert!(result.is_err());
}

#[test]
fn test_failing_detector_leaves_every_dq_untouched() {
    let t0 = mjd_to_datetime(60200.0).expect("bad epoch");
    let later = t0 + Duration::seconds(10);

    let mut a0 = Exposure::new("a0.fits", "NRCA1", t0, Array2::zeros((4, 4)));
    a0.dq[[1, 1]] = SATURATED;
    let a1 = Exposure::new("a1.fits", "NRCA1", later, Array2::zeros((4, 4)));
    let b0 = Exposure::new("b0.fits", "NRCB1", t0, Array2::zeros((4, 4)));
    let b1 = Exposure::new("b1.fits", "NRCB1", later, Array2::zeros((5, 5)));

    let mut exposures = vec![a0, a1, b0, b1];
    let before: Vec<Array2<u32>> = exposures.iter().map(|e| e.dq.clone()).collect();

    let result = DefectEngine::default().persistence(&mut exposures, &PersistenceParams::default());

    assert!(result.is_err());
    for (e, dq) in exposures.iter().zip(&before) {
        assert_eq!(&e.dq, dq, "{} was modified", e.filename);
    }
}
