use crate::types::{DefectError, DefectResult};
use ndarray::{ArrayD, ArrayView2, ArrayViewD, ArrayViewMut2, ArrayViewMutD, Axis, Ix2};

/// How a product's frames are arranged along its leading axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// Single 2D image (e.g. a rate product)
    Single,
    /// Ordered sequence of frames (e.g. per-integration rates)
    Stack { frames: usize },
    /// Integrations x groups (a ramp)
    Cube { integrations: usize, groups: usize },
}

/// Position of one 2D frame inside an array of rank 2, 3 or 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameIndex {
    /// Flattened position along the ordering axis
    pub ordinal: usize,
    pub integration: usize,
    pub group: usize,
}

impl std::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.integration, self.group)
    }
}

/// Uniform "ordering axis -> 2D frame" view over rank 2, 3 and 4 arrays.
///
/// All rank-dependent code in the crate goes through this type, so the
/// algorithms only ever see 2D frames tagged with a [`FrameIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeAdapter {
    layout: FrameLayout,
    shape: Vec<usize>,
}

impl ShapeAdapter {
    /// Build an adapter for an array of the given shape
    pub fn from_shape(shape: &[usize]) -> DefectResult<Self> {
        let layout = match *shape {
            [_, _] => FrameLayout::Single,
            [frames, _, _] => FrameLayout::Stack { frames },
            [integrations, groups, _, _] => FrameLayout::Cube {
                integrations,
                groups,
            },
            _ => return Err(DefectError::InvalidRank { rank: shape.len() }),
        };

        Ok(Self {
            layout,
            shape: shape.to_vec(),
        })
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// (rows, columns) of every frame
    pub fn frame_shape(&self) -> (usize, usize) {
        let n = self.shape.len();
        (self.shape[n - 2], self.shape[n - 1])
    }

    pub fn n_integrations(&self) -> usize {
        match self.layout {
            FrameLayout::Single | FrameLayout::Stack { .. } => 1,
            FrameLayout::Cube { integrations, .. } => integrations,
        }
    }

    pub fn groups_per_integration(&self) -> usize {
        match self.layout {
            FrameLayout::Single => 1,
            FrameLayout::Stack { frames } => frames,
            FrameLayout::Cube { groups, .. } => groups,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.n_integrations() * self.groups_per_integration()
    }

    /// True when the product has a group axis inside each integration
    pub fn has_groups(&self) -> bool {
        matches!(self.layout, FrameLayout::Cube { .. })
    }

    /// Every frame index, in ordering-axis order
    pub fn frame_indices(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        let groups = self.groups_per_integration();
        (0..self.n_frames()).map(move |ordinal| FrameIndex {
            ordinal,
            integration: ordinal / groups,
            group: ordinal % groups,
        })
    }

    /// Frames partitioned into ordering groups.
    ///
    /// A ramp yields one group per integration; stacks and single images form
    /// a single group. Fixed-count propagation never crosses these boundaries.
    pub fn ordering_groups(&self) -> Vec<Vec<FrameIndex>> {
        let groups = self.groups_per_integration();
        let indices: Vec<FrameIndex> = self.frame_indices().collect();
        indices.chunks(groups.max(1)).map(|c| c.to_vec()).collect()
    }

    /// Verify that another array shares this adapter's shape
    pub fn check_shape(&self, shape: &[usize]) -> DefectResult<()> {
        if shape != self.shape.as_slice() {
            return Err(DefectError::ShapeMismatch {
                expected: self.shape.clone(),
                found: shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Borrow one frame of `data`
    pub fn frame<'a, T>(
        &self,
        data: ArrayViewD<'a, T>,
        index: FrameIndex,
    ) -> DefectResult<ArrayView2<'a, T>> {
        self.check_shape(data.shape())?;
        let frame = match self.layout {
            FrameLayout::Single => data,
            FrameLayout::Stack { .. } => data.index_axis_move(Axis(0), index.group),
            FrameLayout::Cube { .. } => data
                .index_axis_move(Axis(0), index.integration)
                .index_axis_move(Axis(0), index.group),
        };
        Ok(frame.into_dimensionality::<Ix2>()?)
    }

    /// Mutably borrow one frame of `data`
    pub fn frame_mut<'a, T>(
        &self,
        data: ArrayViewMutD<'a, T>,
        index: FrameIndex,
    ) -> DefectResult<ArrayViewMut2<'a, T>> {
        self.check_shape(data.shape())?;
        let frame = match self.layout {
            FrameLayout::Single => data,
            FrameLayout::Stack { .. } => data.index_axis_move(Axis(0), index.group),
            FrameLayout::Cube { .. } => data
                .index_axis_move(Axis(0), index.integration)
                .index_axis_move(Axis(0), index.group),
        };
        Ok(frame.into_dimensionality::<Ix2>()?)
    }

    /// All frames of `data` tagged with their index, in ordering-axis order
    pub fn frames<'a, T>(
        &self,
        data: ArrayViewD<'a, T>,
    ) -> DefectResult<Vec<(FrameIndex, ArrayView2<'a, T>)>> {
        self.frame_indices()
            .map(|index| Ok((index, self.frame(data.clone(), index)?)))
            .collect()
    }

    /// Copy a 2D result into the matching frame of `out`
    pub fn write_frame<T: Clone>(
        &self,
        out: &mut ArrayD<T>,
        index: FrameIndex,
        frame: ArrayView2<'_, T>,
    ) -> DefectResult<()> {
        let mut target = self.frame_mut(out.view_mut(), index)?;
        if target.dim() != frame.dim() {
            let (rows, cols) = frame.dim();
            return Err(DefectError::ShapeMismatch {
                expected: target.shape().to_vec(),
                found: vec![rows, cols],
            });
        }
        target.assign(&frame);
        Ok(())
    }

    /// OR a 2D boolean result into the matching frame of `out`
    pub fn merge_frame(
        &self,
        out: &mut ArrayD<bool>,
        index: FrameIndex,
        frame: ArrayView2<'_, bool>,
    ) -> DefectResult<()> {
        let mut target = self.frame_mut(out.view_mut(), index)?;
        if target.dim() != frame.dim() {
            let (rows, cols) = frame.dim();
            return Err(DefectError::ShapeMismatch {
                expected: target.shape().to_vec(),
                found: vec![rows, cols],
            });
        }
        target.zip_mut_with(&frame, |dst, &src| *dst |= src);
        Ok(())
    }
}
