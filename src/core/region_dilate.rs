use crate::core::morphology::{
    binary_opening, disk, fill_small_holes, isotropic_dilation_of, isotropic_erosion_of, label,
    Component, Connectivity,
};
use crate::core::shape::{FrameIndex, ShapeAdapter};
use crate::types::{BoolFrame, DefectError, DefectMask, DefectResult};
use ndarray::{s, Array2, ArrayView2, ArrayViewD};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Parameters for growing large-area jump events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDilateParams {
    /// Radius of the disk used to open away small events (pixels)
    pub min_radius: usize,
    /// Scale applied to each event's equal-area radius; negative erodes
    pub growth_factor: f64,
    /// Enclosed holes smaller than this are filled before opening (pixels)
    pub hole_area_threshold: usize,
    /// Events larger than this are reported as diagnostics (pixels)
    pub large_event_area: usize,
    /// Neighbourhood used to label events after opening
    pub connectivity: Connectivity,
}

impl Default for RegionDilateParams {
    fn default() -> Self {
        Self {
            min_radius: 4,
            growth_factor: 2.0,
            hole_area_threshold: 200,
            large_event_area: 900,
            connectivity: Connectivity::Eight,
        }
    }
}

/// A large event seen while dilating, reported but never acted upon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeEvent {
    /// Frame the event was found in; `None` for a bare 2D frame
    pub frame: Option<(usize, usize)>,
    /// (row, column) centroid
    pub centroid: (f64, f64),
    /// Equal-area circle radius (pixels)
    pub radius: f64,
    pub area: usize,
}

/// Dilated mask plus the diagnostics gathered on the way
#[derive(Debug, Clone)]
pub struct DilationOutcome {
    pub mask: DefectMask,
    pub events: Vec<LargeEvent>,
}

/// One region's grown (or shrunk) footprint, clipped to a window of the frame
struct RegionPatch {
    origin: (usize, usize),
    mask: Array2<bool>,
}

/// Removes noise-scale events from a boolean frame and grows the survivors
/// in proportion to their size.
#[derive(Debug, Clone, Default)]
pub struct RegionDilator {
    params: RegionDilateParams,
}

impl RegionDilator {
    pub fn new(params: RegionDilateParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RegionDilateParams {
        &self.params
    }

    /// Dilate one 2D frame.
    ///
    /// Small holes are filled, events smaller than the `min_radius` disk are
    /// opened away, and each remaining event is grown (or eroded) on its own
    /// by `ceil(sqrt(area / pi) * growth_factor)` before the results are
    /// OR-ed together.
    pub fn dilate_frame(
        &self,
        frame: ArrayView2<'_, bool>,
        index: Option<FrameIndex>,
    ) -> DefectResult<(BoolFrame, Vec<LargeEvent>)> {
        self.check_params()?;
        Ok(self.dilate_checked(frame, index))
    }

    /// Reject parameters that cannot describe a finite growth
    fn check_params(&self) -> DefectResult<()> {
        if !self.params.growth_factor.is_finite() {
            return Err(DefectError::InvalidParameter(format!(
                "growth_factor must be finite, got {}",
                self.params.growth_factor
            )));
        }
        Ok(())
    }

    fn dilate_checked(
        &self,
        frame: ArrayView2<'_, bool>,
        index: Option<FrameIndex>,
    ) -> (BoolFrame, Vec<LargeEvent>) {
        if !frame.iter().any(|&v| v) {
            return (frame.to_owned(), Vec::new());
        }

        let cores_filled = fill_small_holes(frame, self.params.hole_area_threshold);
        let big_events = binary_opening(cores_filled.view(), disk(self.params.min_radius).view());
        let (_, regions) = label(big_events.view(), self.params.connectivity);

        let events: Vec<LargeEvent> = regions
            .iter()
            .filter(|region| region.area() > self.params.large_event_area)
            .map(|region| self.report_large_event(region, index))
            .collect();

        if self.params.growth_factor == 0.0 {
            return (big_events, events);
        }

        let patches = self.grow_regions(&regions, frame.dim());

        let mut dilated = Array2::from_elem(frame.dim(), false);
        for patch in &patches {
            let (r0, c0) = patch.origin;
            let (h, w) = patch.mask.dim();
            dilated
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .zip_mut_with(&patch.mask, |dst, &src| *dst |= src);
        }

        (dilated, events)
    }

    /// Dilate every frame of a rank 2, 3 or 4 mask
    pub fn dilate_mask(&self, mask: ArrayViewD<'_, bool>) -> DefectResult<DilationOutcome> {
        self.check_params()?;
        let adapter = ShapeAdapter::from_shape(mask.shape())?;
        let frames = adapter.frames(mask.view())?;
        let tagged = mask.ndim() > 2;

        log::debug!(
            "Dilating {} frame(s) with parameters: {:?}",
            frames.len(),
            self.params
        );

        let results = self.dilate_frames(&frames, tagged);

        let mut out = DefectMask::from_elem(mask.raw_dim(), false);
        let mut events = Vec::new();
        for ((index, _), (dilated, frame_events)) in frames.iter().zip(results) {
            adapter.write_frame(&mut out, *index, dilated.view())?;
            events.extend(frame_events);
        }

        Ok(DilationOutcome { mask: out, events })
    }

    #[cfg(feature = "parallel")]
    fn dilate_frames(
        &self,
        frames: &[(FrameIndex, ArrayView2<'_, bool>)],
        tagged: bool,
    ) -> Vec<(BoolFrame, Vec<LargeEvent>)> {
        use rayon::prelude::*;

        frames
            .par_iter()
            .map(|(index, frame)| self.dilate_checked(frame.view(), tagged.then_some(*index)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn dilate_frames(
        &self,
        frames: &[(FrameIndex, ArrayView2<'_, bool>)],
        tagged: bool,
    ) -> Vec<(BoolFrame, Vec<LargeEvent>)> {
        frames
            .iter()
            .map(|(index, frame)| self.dilate_checked(frame.view(), tagged.then_some(*index)))
            .collect()
    }

    /// Grow each region in isolation, returning one windowed patch per region
    fn grow_regions(&self, regions: &[Component], shape: (usize, usize)) -> Vec<RegionPatch> {
        regions
            .iter()
            .map(|region| {
                let radius = (region.area() as f64 / PI).sqrt();
                let dilate_radius = (radius * self.params.growth_factor).ceil();
                self.grow_region(region, shape, dilate_radius)
            })
            .collect()
    }

    fn grow_region(&self, region: &Component, shape: (usize, usize), dilate_radius: f64) -> RegionPatch {
        let (rows, cols) = shape;
        let (r0, c0, r1, c1) = region.bbox();
        let reach = if dilate_radius > 0.0 {
            dilate_radius as usize
        } else {
            0
        };

        // Window holds the grown region, or at least one ring of background
        // around an eroded one
        let pad = reach.max(1);
        let wr0 = r0.saturating_sub(pad);
        let wc0 = c0.saturating_sub(pad);
        let wr1 = r1.saturating_add(pad).min(rows - 1);
        let wc1 = c1.saturating_add(pad).min(cols - 1);
        let window = (wr1 - wr0 + 1, wc1 - wc0 + 1);

        let local: Vec<(usize, usize)> = region
            .pixels
            .iter()
            .map(|&(r, c)| (r - wr0, c - wc0))
            .collect();

        let mask = if dilate_radius > 0.0 {
            isotropic_dilation_of(&local, window, dilate_radius)
        } else {
            isotropic_erosion_of(&local, window, -dilate_radius)
        };

        RegionPatch {
            origin: (wr0, wc0),
            mask,
        }
    }

    fn report_large_event(&self, region: &Component, index: Option<FrameIndex>) -> LargeEvent {
        let radius = (region.area() as f64 / PI).sqrt();
        let (y, x) = region.centroid();
        match index {
            Some(ig) => log::warn!(
                "Large CR masked with radius={:.1} at [{}, {}, {}]",
                radius,
                ig,
                y.round(),
                x.round()
            ),
            None => log::warn!(
                "Large CR masked with radius={:.1} at [{}, {}]",
                radius,
                y.round(),
                x.round()
            ),
        }

        LargeEvent {
            frame: index.map(|ig| (ig.integration, ig.group)),
            centroid: (y, x),
            radius,
            area: region.area(),
        }
    }
}
