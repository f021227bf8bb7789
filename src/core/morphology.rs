//! Binary morphology on 2D boolean frames.
//!
//! Footprint operations follow the shift-and-OR formulation; isotropic
//! operations are exact Euclidean-distance thresholds evaluated only where a
//! region's boundary can reach.

use ndarray::{s, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Pixel neighbourhood used when growing connected components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge-sharing neighbours only
    Four,
    /// Edge- and corner-sharing neighbours
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// One labelled connected component
#[derive(Debug, Clone)]
pub struct Component {
    /// 1-based label, matching the label image
    pub label: usize,
    /// Pixel coordinates (row, column) in scan order
    pub pixels: Vec<(usize, usize)>,
}

impl Component {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Mean (row, column) of the component's pixels
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.pixels.len().max(1) as f64;
        let (sr, sc) = self
            .pixels
            .iter()
            .fold((0.0, 0.0), |(r, c), &(pr, pc)| (r + pr as f64, c + pc as f64));
        (sr / n, sc / n)
    }

    /// Inclusive bounding box (row_min, col_min, row_max, col_max)
    pub fn bbox(&self) -> (usize, usize, usize, usize) {
        self.pixels.iter().fold(
            (usize::MAX, usize::MAX, 0, 0),
            |(r0, c0, r1, c1), &(r, c)| (r0.min(r), c0.min(c), r1.max(r), c1.max(c)),
        )
    }
}

/// Disk-shaped footprint of the given radius, `(2r+1) x (2r+1)`
pub fn disk(radius: usize) -> Array2<bool> {
    let r = radius as isize;
    Array2::from_shape_fn((2 * radius + 1, 2 * radius + 1), |(i, j)| {
        let di = i as isize - r;
        let dj = j as isize - r;
        di * di + dj * dj <= r * r
    })
}

/// Offsets (dr, dc) of the active footprint elements relative to its center
fn footprint_offsets(footprint: ArrayView2<'_, bool>) -> Vec<(isize, isize)> {
    let (fr, fc) = footprint.dim();
    let (or, oc) = ((fr / 2) as isize, (fc / 2) as isize);
    footprint
        .indexed_iter()
        .filter(|&(_, &on)| on)
        .map(|((i, j), _)| (i as isize - or, j as isize - oc))
        .collect()
}

/// Source start, destination start, and length for a shift along one axis
#[inline]
fn shift_range(offset: isize, size: usize) -> (usize, usize, usize) {
    let n = size as isize;
    if offset.abs() >= n {
        return (0, 0, 0);
    }
    if offset >= 0 {
        (0, offset as usize, (n - offset) as usize)
    } else {
        ((-offset) as usize, 0, (n + offset) as usize)
    }
}

/// Binary dilation with an arbitrary footprint; pixels outside the frame are off.
pub fn binary_dilation(mask: ArrayView2<'_, bool>, footprint: ArrayView2<'_, bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut out = Array2::from_elem((rows, cols), false);

    for (dr, dc) in footprint_offsets(footprint) {
        let (src_r, dst_r, h) = shift_range(dr, rows);
        let (src_c, dst_c, w) = shift_range(dc, cols);
        if h == 0 || w == 0 {
            continue;
        }
        Zip::from(out.slice_mut(s![dst_r..dst_r + h, dst_c..dst_c + w]))
            .and(mask.slice(s![src_r..src_r + h, src_c..src_c + w]))
            .for_each(|dst, &src| *dst |= src);
    }

    out
}

/// Binary erosion with an arbitrary footprint; pixels outside the frame are on,
/// so regions touching the border are not eaten away from the edge.
pub fn binary_erosion(mask: ArrayView2<'_, bool>, footprint: ArrayView2<'_, bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut out = mask.to_owned();

    for (dr, dc) in footprint_offsets(footprint) {
        // out[p] &= mask[p - offset] wherever p - offset is inside the frame
        let (src_r, dst_r, h) = shift_range(dr, rows);
        let (src_c, dst_c, w) = shift_range(dc, cols);
        if h == 0 || w == 0 {
            continue;
        }
        Zip::from(out.slice_mut(s![dst_r..dst_r + h, dst_c..dst_c + w]))
            .and(mask.slice(s![src_r..src_r + h, src_c..src_c + w]))
            .for_each(|dst, &src| *dst &= src);
    }

    out
}

/// Erosion followed by dilation with the same footprint
pub fn binary_opening(mask: ArrayView2<'_, bool>, footprint: ArrayView2<'_, bool>) -> Array2<bool> {
    let eroded = binary_erosion(mask, footprint);
    binary_dilation(eroded.view(), footprint)
}

/// Label connected components of `mask`.
///
/// Returns the label image (0 = background) and the components in label order.
pub fn label(mask: ArrayView2<'_, bool>, connectivity: Connectivity) -> (Array2<usize>, Vec<Component>) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<usize>::zeros((rows, cols));
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for ((r, c), &on) in mask.indexed_iter() {
        if !on || labels[[r, c]] != 0 {
            continue;
        }

        let id = components.len() + 1;
        let mut pixels = Vec::new();
        labels[[r, c]] = id;
        queue.push_back((r, c));

        while let Some((pr, pc)) = queue.pop_front() {
            pixels.push((pr, pc));
            for &(dr, dc) in connectivity.offsets() {
                let nr = pr as isize + dr;
                let nc = pc as isize + dc;
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                    labels[[nr, nc]] = id;
                    queue.push_back((nr, nc));
                }
            }
        }

        pixels.sort_unstable();
        components.push(Component { label: id, pixels });
    }

    (labels, components)
}

/// Fill background components smaller than `area_threshold` pixels.
///
/// Background is segmented with 4-connectivity, so flagged pixels touching
/// only at corners still enclose a hole.
pub fn fill_small_holes(mask: ArrayView2<'_, bool>, area_threshold: usize) -> Array2<bool> {
    let background = mask.mapv(|v| !v);
    let (_, holes) = label(background.view(), Connectivity::Four);

    let mut filled = mask.to_owned();
    for hole in holes.iter().filter(|h| h.area() < area_threshold) {
        for &(r, c) in &hole.pixels {
            filled[[r, c]] = true;
        }
    }
    filled
}

/// True when (r, c) has an edge neighbour outside `member` or outside the frame
fn on_boundary(member: &Array2<bool>, r: usize, c: usize) -> bool {
    let (rows, cols) = member.dim();
    r == 0
        || c == 0
        || r + 1 == rows
        || c + 1 == cols
        || !member[[r - 1, c]]
        || !member[[r + 1, c]]
        || !member[[r, c - 1]]
        || !member[[r, c + 1]]
}

/// Lattice offsets within Euclidean distance `radius` of the origin
fn ball_offsets(radius: f64) -> Vec<(isize, isize)> {
    let reach = radius.floor() as isize;
    let r2 = radius * radius;
    let mut offsets = Vec::new();
    for dr in -reach..=reach {
        for dc in -reach..=reach {
            if ((dr * dr + dc * dc) as f64) <= r2 {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Pixels of a frame within Euclidean distance `radius` of any listed pixel.
///
/// Only boundary pixels can be nearest to an outside point, so the ball is
/// stamped from those alone.
pub fn isotropic_dilation_of(
    pixels: &[(usize, usize)],
    shape: (usize, usize),
    radius: f64,
) -> Array2<bool> {
    let (rows, cols) = shape;
    let mut out = Array2::from_elem(shape, false);
    for &(r, c) in pixels {
        out[[r, c]] = true;
    }
    if radius < 1.0 || pixels.is_empty() {
        return out;
    }

    let member = out.clone();
    // Nothing in the frame lies further than its half-perimeter
    let ball = ball_offsets(radius.min((rows + cols) as f64));
    for &(r, c) in pixels.iter().filter(|&&(r, c)| on_boundary(&member, r, c)) {
        for &(dr, dc) in &ball {
            let nr = r as isize + dr;
            let nc = c as isize + dc;
            if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                out[[nr as usize, nc as usize]] = true;
            }
        }
    }
    out
}

/// Listed pixels whose Euclidean distance to the nearest unlisted in-frame
/// pixel exceeds `radius`.
pub fn isotropic_erosion_of(
    pixels: &[(usize, usize)],
    shape: (usize, usize),
    radius: f64,
) -> Array2<bool> {
    let (rows, cols) = shape;
    let mut member = Array2::from_elem(shape, false);
    for &(r, c) in pixels {
        member[[r, c]] = true;
    }
    if radius <= 0.0 {
        return member;
    }

    let ball = ball_offsets(radius.min((rows + cols) as f64));
    let mut out = member.clone();
    for &(r, c) in pixels {
        let reached = ball.iter().any(|&(dr, dc)| {
            let nr = r as isize + dr;
            let nc = c as isize + dc;
            nr >= 0
                && nc >= 0
                && (nr as usize) < rows
                && (nc as usize) < cols
                && !member[[nr as usize, nc as usize]]
        });
        if reached {
            out[[r, c]] = false;
        }
    }
    out
}

/// Isotropic dilation of a whole frame by `radius` pixels
pub fn isotropic_dilation(mask: ArrayView2<'_, bool>, radius: f64) -> Array2<bool> {
    let pixels: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|&(_, &on)| on)
        .map(|(ix, _)| ix)
        .collect();
    isotropic_dilation_of(&pixels, mask.dim(), radius)
}
