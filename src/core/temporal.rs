use crate::core::morphology::isotropic_dilation;
use crate::types::{DefectError, DefectResult};
use ndarray::{Array3, ArrayView3, Axis, Zip};

/// Copy each frame's flags into the next `after_count` frames of the same
/// ordering group, then dilate every frame of the result by `ring_width`.
///
/// `frames` is one ordering group (e.g. the groups of one integration) laid
/// out as (frame, row, column). Flags never move to an earlier frame and
/// never wrap past the last one. A `ring_width` of zero copies verbatim.
pub fn propagate_fixed_count(
    frames: ArrayView3<'_, bool>,
    after_count: usize,
    ring_width: f64,
) -> DefectResult<Array3<bool>> {
    if !ring_width.is_finite() || ring_width < 0.0 {
        return Err(DefectError::InvalidParameter(format!(
            "ring_width must be a finite non-negative number, got {}",
            ring_width
        )));
    }

    let n = frames.len_of(Axis(0));
    let mut propagated = frames.to_owned();

    for source in 0..n {
        let last = source.saturating_add(after_count).min(n.saturating_sub(1));
        let trigger = frames.index_axis(Axis(0), source);
        for target in source + 1..=last {
            Zip::from(propagated.index_axis_mut(Axis(0), target))
                .and(&trigger)
                .for_each(|dst, &src| *dst |= src);
        }
    }

    if ring_width > 0.0 {
        for mut frame in propagated.outer_iter_mut() {
            if frame.iter().any(|&v| v) {
                let ring = isotropic_dilation(frame.view(), ring_width);
                frame.assign(&ring);
            }
        }
    }

    Ok(propagated)
}

/// Number of later frames each frame's flags reach under a time budget.
///
/// `time_deltas[k]` is the elapsed time between frame `k-1` and frame `k`
/// (the first entry is 0). For frame `i` the count is the number of frames
/// `j >= i` whose elapsed time since `i` is strictly below `time_budget`,
/// minus frame `i` itself.
pub fn time_budget_windows(time_deltas: &[f64], time_budget: f64) -> DefectResult<Vec<usize>> {
    if !(time_budget >= 0.0) {
        return Err(DefectError::InvalidParameter(format!(
            "time budget must be a non-negative number of seconds, got {}",
            time_budget
        )));
    }
    if let Some(bad) = time_deltas.iter().find(|d| !(**d >= 0.0) || !d.is_finite()) {
        return Err(DefectError::InvalidParameter(format!(
            "time deltas must be finite and non-negative, got {}",
            bad
        )));
    }

    let windows = (0..time_deltas.len())
        .map(|i| {
            let mut elapsed = 0.0;
            let mut within = 0usize;
            for (offset, delta) in time_deltas[i..].iter().enumerate() {
                if offset > 0 {
                    elapsed += delta;
                }
                if elapsed < time_budget {
                    within += 1;
                }
            }
            within.saturating_sub(1)
        })
        .collect();

    Ok(windows)
}

/// Copy each frame's flags verbatim into the `windows[i]` frames after it,
/// clipping at the end of the sequence.
pub fn propagate_time_budget(
    frames: ArrayView3<'_, bool>,
    windows: &[usize],
) -> DefectResult<Array3<bool>> {
    let n = frames.len_of(Axis(0));
    if windows.len() != n {
        return Err(DefectError::InvalidParameter(format!(
            "{} propagation windows given for {} frames",
            windows.len(),
            n
        )));
    }

    let (rows, cols) = (frames.len_of(Axis(1)), frames.len_of(Axis(2)));
    let mut propagated = Array3::from_elem((n, rows, cols), false);

    for (source, &count) in windows.iter().enumerate() {
        let trigger = frames.index_axis(Axis(0), source);
        let end = source.saturating_add(count).min(n.saturating_sub(1));
        for target in source + 1..=end {
            Zip::from(propagated.index_axis_mut(Axis(0), target))
                .and(&trigger)
                .for_each(|dst, &src| *dst |= src);
        }
    }

    Ok(propagated)
}
