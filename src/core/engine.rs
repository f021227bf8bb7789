use crate::core::region_dilate::{LargeEvent, RegionDilateParams, RegionDilator};
use crate::core::shape::ShapeAdapter;
use crate::core::stack_stats::{
    ClippedStats, FrameStack, SigmaClipParams, StackMask, StackStatistics, StackStatsParams,
};
use crate::core::temporal::{propagate_fixed_count, propagate_time_budget, time_budget_windows};
use crate::io::exposure::{group_by_detector, mask_product_prefix, sort_by_start_time, Exposure};
use crate::types::{
    decode_flag, fold_flags, BoolFrame, DefectError, DefectMask, DefectResult, DqFlags, DqWord,
    PixelValue, StepStatus,
};
use ndarray::{Array2, Array3, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters for snowball / shower masking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowblindParams {
    pub dilate: RegionDilateParams,
    /// Groups after a jump into which saturated cores are carried
    pub after_jumps: usize,
    /// Ring grown around carried saturated cores (pixels)
    pub ring_width: f64,
    /// DQ bits set on dilated pixels; `None` uses the jump bit
    pub new_jump_flag: Option<DqWord>,
}

impl Default for SnowblindParams {
    fn default() -> Self {
        Self {
            dilate: RegionDilateParams::default(),
            after_jumps: 2,
            ring_width: 2.0,
            new_jump_flag: None,
        }
    }
}

/// Parameters for exposure-to-exposure persistence flagging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceParams {
    /// Time after an exposure's start during which later exposures are flagged (seconds)
    pub time_budget: f64,
    /// Keep the per-exposure persistence masks in the report
    pub save_mask: bool,
}

impl Default for PersistenceParams {
    fn default() -> Self {
        Self {
            time_budget: 2500.0,
            save_mask: false,
        }
    }
}

/// Which structural defect a self-calibration run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelfCalMode {
    /// Open and adjacent-to-open pixels; baseline used as is
    OpenPixel,
    /// RC-type pixels; baseline median removed first
    ResistiveCorner,
}

impl SelfCalMode {
    pub fn alias(&self) -> &'static str {
        match self {
            SelfCalMode::OpenPixel => "open_pixel",
            SelfCalMode::ResistiveCorner => "rc_selfcal",
        }
    }

    fn flag_bits(&self, flags: &DqFlags) -> DqWord {
        match self {
            SelfCalMode::OpenPixel => flags.do_not_use | flags.adj_open,
            SelfCalMode::ResistiveCorner => flags.do_not_use | flags.rc,
        }
    }
}

/// Parameters for stack self-calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCalParams {
    pub mode: SelfCalMode,
    /// Sigma multiplier for the threshold
    pub threshold: f64,
    /// Also flag pixels below the threshold
    pub flag_low_signal: bool,
    /// Keep per-detector mask and baseline products in the report
    pub save_mask: bool,
    pub clip: SigmaClipParams,
}

impl Default for SelfCalParams {
    fn default() -> Self {
        Self {
            mode: SelfCalMode::OpenPixel,
            threshold: 3.0,
            flag_low_signal: false,
            save_mask: false,
            clip: SigmaClipParams::default(),
        }
    }
}

/// Outcome of a snowball masking run
#[derive(Debug, Clone)]
pub struct SnowblindReport {
    pub status: StepStatus,
    pub events: Vec<LargeEvent>,
    /// DQ words that received the new jump bits (already-set words included)
    pub flagged_pixels: usize,
}

/// Persistence mask for one exposure
#[derive(Debug, Clone)]
pub struct PersistenceMask {
    pub filename: String,
    pub mask: BoolFrame,
}

/// Outcome of a persistence run
#[derive(Debug, Clone)]
pub struct PersistenceReport {
    pub status: StepStatus,
    /// Elapsed seconds between consecutive exposures, per detector
    pub time_deltas: BTreeMap<String, Vec<f64>>,
    /// Pixels flagged per exposure, in input order
    pub flagged_pixels: Vec<usize>,
    pub masks: Vec<PersistenceMask>,
}

/// Derived products of one detector's self-calibration
#[derive(Debug, Clone)]
pub struct MaskProduct {
    /// File name stem the host should save the products under
    pub prefix: String,
    pub mask: Array2<bool>,
    pub baseline: Array2<PixelValue>,
}

/// Outcome of a self-calibration run
#[derive(Debug, Clone)]
pub struct SelfCalReport {
    pub status: StepStatus,
    pub stats: BTreeMap<String, ClippedStats>,
    pub flagged_pixels: BTreeMap<String, usize>,
    pub products: BTreeMap<String, MaskProduct>,
}

/// Detects and propagates defect flags and folds them into DQ arrays.
///
/// Every operation only ever ORs bits into the caller's DQ arrays; bits
/// already set are never cleared.
#[derive(Debug, Clone, Default)]
pub struct DefectEngine {
    flags: DqFlags,
}

impl DefectEngine {
    pub fn new(flags: DqFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &DqFlags {
        &self.flags
    }

    /// Grow large jump events and, for ramps, the saturated cores inside them.
    ///
    /// `dq` is a rate image (2D), per-integration rates (3D) or a ramp's group
    /// DQ (4D). Dilated jumps are flagged in every product; saturated cores
    /// within dilated jumps are carried `after_jumps` groups forward and
    /// ringed only when the product has a group axis.
    pub fn snowblind(
        &self,
        dq: &mut ArrayD<DqWord>,
        params: &SnowblindParams,
    ) -> DefectResult<SnowblindReport> {
        let adapter = ShapeAdapter::from_shape(dq.shape())?;
        let new_jump_flag = params.new_jump_flag.unwrap_or(self.flags.jump_det);
        if !params.ring_width.is_finite() || params.ring_width < 0.0 {
            return Err(DefectError::InvalidParameter(format!(
                "ring_width must be a finite non-negative number, got {}",
                params.ring_width
            )));
        }

        log::info!(
            "Masking large jump events in {} frame(s) of shape {:?}",
            adapter.n_frames(),
            adapter.frame_shape()
        );

        let bool_jump = decode_flag(dq.view(), self.flags.jump_det);
        let dilator = RegionDilator::new(params.dilate.clone());
        let dilated = dilator.dilate_mask(bool_jump.view())?;

        let mut new_flags = dilated.mask.clone();
        if adapter.has_groups() {
            let bool_sat = decode_flag(dq.view(), self.flags.saturated);
            let rings = self.dilate_saturated_cores(
                &adapter,
                &bool_sat,
                &dilated.mask,
                params.after_jumps,
                params.ring_width,
            )?;
            new_flags.zip_mut_with(&rings, |dst, &src| *dst |= src);
        }

        let flagged = fold_flags(dq.view_mut(), new_flags.view(), new_jump_flag)?;

        log::info!(
            "Flagged {} pixels, {} large event(s)",
            flagged,
            dilated.events.len()
        );

        Ok(SnowblindReport {
            status: StepStatus::Complete,
            events: dilated.events,
            flagged_pixels: flagged,
        })
    }

    /// Saturated pixels inside dilated jumps, carried forward within each
    /// integration and ringed
    fn dilate_saturated_cores(
        &self,
        adapter: &ShapeAdapter,
        bool_sat: &DefectMask,
        bool_jump: &DefectMask,
        after_jumps: usize,
        ring_width: f64,
    ) -> DefectResult<DefectMask> {
        let mut sat_from_jump = bool_sat.clone();
        sat_from_jump.zip_mut_with(bool_jump, |sat, &jump| *sat &= jump);
        propagate_per_integration(adapter, &sat_from_jump, after_jumps, ring_width)
    }

    /// Carry jumps from group N into group N+1 for frame-averaged readouts.
    ///
    /// When `nframes <= 1` a jump inside a group cannot have affected the next
    /// one, so the DQ array is left alone and the run is reported SKIPPED.
    pub fn jump_plus(&self, groupdq: &mut ArrayD<DqWord>, nframes: u32) -> DefectResult<StepStatus> {
        let adapter = ShapeAdapter::from_shape(groupdq.shape())?;

        if nframes <= 1 {
            log::info!("No frame averaging in this readout mode");
            return Ok(StepStatus::Skipped);
        }
        if !adapter.has_groups() {
            log::info!("Product has no group axis; nothing to carry forward");
            return Ok(StepStatus::Skipped);
        }

        let bool_jump = decode_flag(groupdq.view(), self.flags.jump_det);
        let carried = propagate_per_integration(&adapter, &bool_jump, 1, 0.0)?;

        let flagged = fold_flags(groupdq.view_mut(), carried.view(), self.flags.jump_det)?;
        log::info!("Carried jumps forward; {} group pixels flagged", flagged);

        Ok(StepStatus::Complete)
    }

    /// Flag pixels saturated in one exposure as persistence in the exposures
    /// of the same detector that start within the time budget after it.
    pub fn persistence(
        &self,
        exposures: &mut [Exposure],
        params: &PersistenceParams,
    ) -> DefectResult<PersistenceReport> {
        for exposure in exposures.iter() {
            exposure.validate()?;
        }

        // Every group is resolved before any DQ array is touched
        let inputs: &[Exposure] = exposures;
        let groups = group_by_detector(inputs)
            .into_iter()
            .map(|(detector, indices)| {
                let (order, deltas) = sort_by_start_time(inputs, &indices)?;
                let saturated = self.saturated_stack(inputs, &order)?;
                let windows = time_budget_windows(&deltas, params.time_budget)?;
                let persist = propagate_time_budget(saturated.view(), &windows)?;
                Ok((detector, order, deltas, persist))
            })
            .collect::<DefectResult<Vec<_>>>()?;

        let bits = self.flags.do_not_use | self.flags.persistence;
        let mut time_deltas = BTreeMap::new();
        let mut flagged_pixels = vec![0usize; exposures.len()];
        let mut masks: Vec<Option<PersistenceMask>> = vec![None; exposures.len()];

        for (detector, order, deltas, persist) in groups {
            log::info!(
                "Time deltas [sec] between {} exposures are {:?}",
                detector,
                deltas
            );

            for (&i, frame) in order.iter().zip(persist.outer_iter()) {
                let exposure = &mut exposures[i];
                let flagged =
                    fold_flags(exposure.dq.view_mut().into_dyn(), frame.into_dyn(), bits)?;
                log::info!("Pixels flagged: {} {}", exposure.filename, flagged);

                flagged_pixels[i] = flagged;
                if params.save_mask {
                    masks[i] = Some(PersistenceMask {
                        filename: exposure.filename.clone(),
                        mask: frame.to_owned(),
                    });
                }
            }

            time_deltas.insert(detector, deltas);
        }

        Ok(PersistenceReport {
            status: StepStatus::Complete,
            time_deltas,
            flagged_pixels,
            masks: masks.into_iter().flatten().collect(),
        })
    }

    /// Saturation masks of `order`, stacked along a leading time axis
    fn saturated_stack(&self, exposures: &[Exposure], order: &[usize]) -> DefectResult<Array3<bool>> {
        let first = order
            .first()
            .ok_or(DefectError::EmptyStack)?;
        let (rows, cols) = exposures[*first].dq.dim();

        let mut stack = Array3::from_elem((order.len(), rows, cols), false);
        for (mut frame, &i) in stack.outer_iter_mut().zip(order) {
            let dq = &exposures[i].dq;
            if dq.dim() != (rows, cols) {
                return Err(DefectError::ShapeMismatch {
                    expected: vec![rows, cols],
                    found: dq.shape().to_vec(),
                });
            }
            frame.assign(&dq.mapv(|word| word & self.flags.saturated == self.flags.saturated));
        }

        Ok(stack)
    }

    /// Build a bad-pixel mask per detector from the median of all its
    /// exposures and flag it in every one of them.
    pub fn self_calibrate(
        &self,
        exposures: &mut [Exposure],
        params: &SelfCalParams,
    ) -> DefectResult<SelfCalReport> {
        for exposure in exposures.iter() {
            exposure.validate()?;
        }

        let statistics = StackStatistics::new(StackStatsParams {
            threshold: params.threshold,
            subtract_background: params.mode == SelfCalMode::ResistiveCorner,
            flag_low: params.flag_low_signal,
            clip: params.clip.clone(),
        });
        if params.flag_low_signal {
            log::info!(
                "Flagging pixels {}-sigma below median as well as those above.",
                params.threshold
            );
        }

        let groups = group_by_detector(exposures);
        let results = self.detector_masks(exposures, &groups, &statistics)?;

        let bits = params.mode.flag_bits(&self.flags);
        let mut report = SelfCalReport {
            status: StepStatus::Complete,
            stats: BTreeMap::new(),
            flagged_pixels: BTreeMap::new(),
            products: BTreeMap::new(),
        };

        for ((detector, indices), result) in groups.iter().zip(results) {
            let flagged = result.mask.iter().filter(|&&v| v).count();
            log::info!(
                "Flagged {} pixels with {} sigma on {}",
                flagged,
                params.threshold,
                detector
            );

            for &i in indices {
                fold_flags(
                    exposures[i].dq.view_mut().into_dyn(),
                    result.mask.view().into_dyn(),
                    bits,
                )?;
            }

            if params.save_mask {
                let filenames: Vec<&str> = indices
                    .iter()
                    .map(|&i| exposures[i].filename.as_str())
                    .collect();
                report.products.insert(
                    detector.clone(),
                    MaskProduct {
                        prefix: mask_product_prefix(&filenames, detector, params.mode.alias()),
                        mask: result.mask.clone(),
                        baseline: result.baseline.clone(),
                    },
                );
            }

            report.stats.insert(detector.clone(), result.stats);
            report.flagged_pixels.insert(detector.clone(), flagged);
        }

        Ok(report)
    }

    /// One stack mask per detector group, in group order
    fn detector_masks(
        &self,
        exposures: &[Exposure],
        groups: &BTreeMap<String, Vec<usize>>,
        statistics: &StackStatistics,
    ) -> DefectResult<Vec<StackMask>> {
        let build = |(detector, indices): (&String, &Vec<usize>)| -> DefectResult<StackMask> {
            log::info!("Creating mask for detector {}", detector);
            let stack = FrameStack::from_detector_frames(
                indices
                    .iter()
                    .map(|&i| (exposures[i].detector.as_str(), exposures[i].data.view())),
            )?;
            statistics.compute(&stack)
        };

        #[cfg(feature = "parallel")]
        let masks = {
            use rayon::prelude::*;
            groups.par_iter().map(build).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let masks = groups.iter().map(build).collect();

        masks
    }
}

/// Fixed-count propagation run separately over each ordering group of `mask`
fn propagate_per_integration(
    adapter: &ShapeAdapter,
    mask: &DefectMask,
    after_count: usize,
    ring_width: f64,
) -> DefectResult<DefectMask> {
    let mut propagated = DefectMask::from_elem(mask.raw_dim(), false);

    for group in adapter.ordering_groups() {
        let views = group
            .iter()
            .map(|&index| adapter.frame(mask.view(), index))
            .collect::<DefectResult<Vec<_>>>()?;
        if views.is_empty() {
            continue;
        }
        let cube = ndarray::stack(Axis(0), &views)?;
        let carried = propagate_fixed_count(cube.view(), after_count, ring_width)?;
        for (&index, frame) in group.iter().zip(carried.outer_iter()) {
            adapter.write_frame(&mut propagated, index, frame)?;
        }
    }

    Ok(propagated)
}
