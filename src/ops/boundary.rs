// ============================================================================
// BOUNDARY: integer extents of a transformed rectangle per resize policy
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use super::geometry::{is_convex, quad_area, rect_corners, OUTLINE_ORDER};
use super::matrix::{Matrix3, Vector2};

/// Homogeneous points with w below this are behind the projection plane.
pub const NEAR_Z: f64 = 0.02;

/// Coordinates are clamped to ±MAX_COORD before rounding.
const MAX_COORD: f64 = 1_048_576.0;

/// Slack allowed when rounding float extents to whole pixels.
const ROUND_EPSILON: f64 = 1e-6;

/// Minimum |area| (in px²) of a transformed quad that still draws something.
const MIN_AREA: f64 = 1e-6;

/// Grid resolution of the crop search before refinement.
const CROP_GRID: usize = 64;
const CROP_REFINE_STEPS: usize = 48;

/// How the output extents are derived from the transformed quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizePolicy {
    /// Bounding box of the transformed quad.
    #[default]
    Adjust,
    /// Keep the original box.
    Clip,
    /// Largest axis-aligned box inside the transformed quad.
    Crop,
    /// Like `Crop`, keeping the original aspect ratio.
    CropWithAspect,
}

impl ResizePolicy {
    pub fn label(&self) -> String {
        match self {
            ResizePolicy::Adjust         => t!("resize.adjust"),
            ResizePolicy::Clip           => t!("resize.clip"),
            ResizePolicy::Crop           => t!("resize.crop"),
            ResizePolicy::CropWithAspect => t!("resize.crop_aspect"),
        }
    }

    pub fn all() -> &'static [ResizePolicy] {
        &[
            ResizePolicy::Adjust,
            ResizePolicy::Clip,
            ResizePolicy::Crop,
            ResizePolicy::CropWithAspect,
        ]
    }
}

/// Integer pixel box, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Boundary {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Boundary {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn as_tuple(&self) -> (i32, i32, i32, i32) {
        (self.x1, self.y1, self.x2, self.y2)
    }
}

/// Extents of the rectangle (x1, y1)-(x2, y2) after `matrix`, or `None` when
/// there is nothing to draw.
pub fn compute_boundary(
    matrix: &Matrix3,
    policy: ResizePolicy,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) -> Option<Boundary> {
    try_compute_boundary(matrix, policy, x1, y1, x2, y2).ok()
}

/// [`compute_boundary`] with the failure reason.
pub fn try_compute_boundary(
    matrix: &Matrix3,
    policy: ResizePolicy,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) -> TransformResult<Boundary> {
    if x2 <= x1 || y2 <= y1 {
        return Err(TransformError::DegenerateTransform("empty source rectangle"));
    }
    if !matrix.is_finite() {
        return Err(TransformError::DegenerateTransform("non-finite matrix"));
    }

    let corners = rect_corners(x1 as f64, y1 as f64, x2 as f64, y2 as f64);
    let visible = clip_to_near_plane(matrix, &corners);
    if visible.len() < 3 {
        return Err(TransformError::DegenerateTransform("quad behind the projection plane"));
    }
    if polygon_area(&visible).abs() < MIN_AREA {
        return Err(TransformError::DegenerateTransform("zero-area quad"));
    }

    let out = match policy {
        ResizePolicy::Clip => Boundary::new(x1, y1, x2, y2),
        ResizePolicy::Adjust => adjust(&visible),
        ResizePolicy::Crop | ResizePolicy::CropWithAspect => {
            // Cropping needs the whole quad in front of the plane.
            if visible.len() != 4 || !all_in_front(matrix, &corners) {
                return Err(TransformError::DegenerateTransform("quad crosses the projection plane"));
            }
            let quad = corners.map(|p| matrix.transform_vector2(p));
            if !is_convex(&quad) || quad_area(&quad).abs() < MIN_AREA {
                return Err(TransformError::DegenerateTransform("quad is not convex"));
            }
            let aspect = (policy == ResizePolicy::CropWithAspect)
                .then(|| (x2 - x1) as f64 / (y2 - y1) as f64);
            crop(&quad, aspect)
        }
    };

    if out.is_empty() {
        return Err(TransformError::DegenerateTransform("empty boundary"));
    }
    Ok(out)
}

fn all_in_front(matrix: &Matrix3, corners: &[Vector2; 4]) -> bool {
    corners
        .iter()
        .all(|p| matrix.transform_homogeneous(p.x, p.y).2 >= NEAR_Z)
}

/// Transform the outline and clip it against the `w >= NEAR_Z` half space
/// (one Sutherland–Hodgman pass), returning divided image-space points.
fn clip_to_near_plane(matrix: &Matrix3, corners: &[Vector2; 4]) -> Vec<Vector2> {
    let hom: Vec<(f64, f64, f64)> = OUTLINE_ORDER
        .iter()
        .map(|&i| matrix.transform_homogeneous(corners[i].x, corners[i].y))
        .collect();

    let mut out = Vec::with_capacity(8);
    for i in 0..hom.len() {
        let a = hom[i];
        let b = hom[(i + 1) % hom.len()];
        let a_in = a.2 >= NEAR_Z;
        let b_in = b.2 >= NEAR_Z;
        if a_in {
            out.push(Vector2::new(a.0 / a.2, a.1 / a.2));
        }
        if a_in != b_in {
            let t = (NEAR_Z - a.2) / (b.2 - a.2);
            let x = a.0 + (b.0 - a.0) * t;
            let y = a.1 + (b.1 - a.1) * t;
            out.push(Vector2::new(x / NEAR_Z, y / NEAR_Z));
        }
    }
    out
}

fn polygon_area(points: &[Vector2]) -> f64 {
    let n = points.len();
    (0..n).map(|i| points[i].cross(points[(i + 1) % n])).sum::<f64>() * 0.5
}

fn clamp_coord(v: f64) -> f64 {
    v.clamp(-MAX_COORD, MAX_COORD)
}

fn adjust(points: &[Vector2]) -> Boundary {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Boundary::new(
        clamp_coord(min_x + ROUND_EPSILON).floor() as i32,
        clamp_coord(min_y + ROUND_EPSILON).floor() as i32,
        clamp_coord(max_x - ROUND_EPSILON).ceil() as i32,
        clamp_coord(max_y - ROUND_EPSILON).ceil() as i32,
    )
}

// ---------------------------------------------------------------------------
//  Crop: largest inscribed axis-aligned rectangle of a convex quad
// ---------------------------------------------------------------------------
//
// For a convex polygon the left edge L(y) is convex and the right edge R(y)
// concave, so a rectangle spanning rows [ya, yb] fits iff its x range lies in
// [max(L(ya), L(yb)), min(R(ya), R(yb))]. That reduces the problem to a 2D
// search over (ya, yb): a coarse grid followed by a shrinking pattern search.

/// Horizontal extent of the convex outline at row `y`.
fn span_at(outline: &[Vector2; 4], y: f64) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for i in 0..4 {
        let a = outline[i];
        let b = outline[(i + 1) % 4];
        if a.y == b.y {
            if a.y == y {
                lo = lo.min(a.x.min(b.x));
                hi = hi.max(a.x.max(b.x));
            }
            continue;
        }
        let (top, bottom) = if a.y < b.y { (a, b) } else { (b, a) };
        if y >= top.y && y <= bottom.y {
            let x = top.x + (y - top.y) / (bottom.y - top.y) * (bottom.x - top.x);
            lo = lo.min(x);
            hi = hi.max(x);
        }
    }
    (lo <= hi).then_some((lo, hi))
}

/// Rectangle (x1, y1, x2, y2) for the row pair, with its area.
fn rect_for_rows(
    outline: &[Vector2; 4],
    ya: f64,
    yb: f64,
    aspect: Option<f64>,
) -> Option<(f64, [f64; 4])> {
    if yb <= ya {
        return None;
    }
    let (la, ra) = span_at(outline, ya)?;
    let (lb, rb) = span_at(outline, yb)?;
    let left = la.max(lb);
    let right = ra.min(rb);
    if right <= left {
        return None;
    }
    let (w, h) = (right - left, yb - ya);
    match aspect {
        None => Some((w * h, [left, ya, right, yb])),
        Some(r) => {
            let fit_w = w.min(r * h);
            let fit_h = fit_w / r;
            let x = left + (w - fit_w) * 0.5;
            let y = ya + (h - fit_h) * 0.5;
            Some((fit_w * fit_h, [x, y, x + fit_w, y + fit_h]))
        }
    }
}

fn crop(quad: &[Vector2; 4], aspect: Option<f64>) -> Boundary {
    let outline = OUTLINE_ORDER.map(|i| quad[i]);
    let y_min = outline.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let y_max = outline.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let step = (y_max - y_min) / CROP_GRID as f64;
    let row = |i: usize| if i == CROP_GRID { y_max } else { y_min + step * i as f64 };

    let mut best: Option<(f64, f64, f64, [f64; 4])> = None;
    for i in 0..CROP_GRID {
        for j in (i + 1)..=CROP_GRID {
            let (ya, yb) = (row(i), row(j));
            if let Some((area, r)) = rect_for_rows(&outline, ya, yb, aspect)
                && best.is_none_or(|b| area > b.0)
            {
                best = Some((area, ya, yb, r));
            }
        }
    }

    let Some((mut area, mut ya, mut yb, mut rect)) = best else {
        return Boundary::new(0, 0, 0, 0);
    };

    let mut delta = step;
    for _ in 0..CROP_REFINE_STEPS {
        let mut improved = false;
        for (da, db) in [(-delta, 0.0), (delta, 0.0), (0.0, -delta), (0.0, delta)] {
            let na = (ya + da).clamp(y_min, y_max);
            let nb = (yb + db).clamp(y_min, y_max);
            if let Some((a, r)) = rect_for_rows(&outline, na, nb, aspect)
                && a > area
            {
                (area, ya, yb, rect) = (a, na, nb, r);
                improved = true;
            }
        }
        if !improved {
            delta *= 0.5;
        }
    }

    // Round inward so the box never leaves the quad.
    Boundary::new(
        clamp_coord(rect[0] - ROUND_EPSILON).ceil() as i32,
        clamp_coord(rect[1] - ROUND_EPSILON).ceil() as i32,
        clamp_coord(rect[2] + ROUND_EPSILON).floor() as i32,
        clamp_coord(rect[3] + ROUND_EPSILON).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_6;

    fn rotated() -> Matrix3 {
        Matrix3::rotate_about(30.0, 30.0, FRAC_PI_6)
    }

    fn perspective() -> Matrix3 {
        let quad = [
            Vector2::new(15.0, 5.0),
            Vector2::new(60.0, 12.0),
            Vector2::new(8.0, 48.0),
            Vector2::new(70.0, 55.0),
        ];
        Matrix3::perspective(10.0, 10.0, 40.0, 40.0, &quad)
    }

    /// True when `p` is inside (or within `eps` of) every edge of the quad.
    fn inside_with_tolerance(quad: &[Vector2; 4], p: Vector2, eps: f64) -> bool {
        let outline = OUTLINE_ORDER.map(|i| quad[i]);
        let orient = quad_area(quad).signum();
        (0..4).all(|i| {
            let a = outline[i];
            let b = outline[(i + 1) % 4];
            let edge = b - a;
            orient * edge.cross(p - a) / edge.length() >= -eps
        })
    }

    #[test]
    fn identity_adjust_is_exact() {
        let b = compute_boundary(&Matrix3::IDENTITY, ResizePolicy::Adjust, 10, 10, 50, 50);
        assert_eq!(b.map(|b| b.as_tuple()), Some((10, 10, 50, 50)));
    }

    #[test]
    fn identity_crop_and_clip_are_exact() {
        for policy in ResizePolicy::all() {
            let b = compute_boundary(&Matrix3::IDENTITY, *policy, 10, 10, 50, 50);
            assert_eq!(b.map(|b| b.as_tuple()), Some((10, 10, 50, 50)), "{:?}", policy);
        }
    }

    #[test]
    fn clip_keeps_original_box() {
        let b = compute_boundary(&rotated(), ResizePolicy::Clip, 10, 10, 50, 50);
        assert_eq!(b, Some(Boundary::new(10, 10, 50, 50)));
    }

    #[test]
    fn adjust_covers_all_corners() {
        for m in [rotated(), perspective(), Matrix3::from_scale(1.5, 0.25)] {
            let b = compute_boundary(&m, ResizePolicy::Adjust, 10, 10, 50, 50).expect("drawable");
            for p in rect_corners(10.0, 10.0, 50.0, 50.0) {
                let q = m.transform_vector2(p);
                assert!(q.x >= b.x1 as f64 && q.x <= b.x2 as f64, "{:?} {:?}", q, b);
                assert!(q.y >= b.y1 as f64 && q.y <= b.y2 as f64, "{:?} {:?}", q, b);
            }
        }
    }

    #[test]
    fn adjust_rounds_outward() {
        let m = Matrix3::from_translation(0.5, -0.25);
        let b = compute_boundary(&m, ResizePolicy::Adjust, 0, 0, 10, 10).expect("drawable");
        assert_eq!(b.as_tuple(), (0, -1, 11, 10));
    }

    #[test]
    fn crop_stays_inside_quad() {
        for m in [rotated(), perspective()] {
            let quad = rect_corners(10.0, 10.0, 50.0, 50.0).map(|p| m.transform_vector2(p));
            for policy in [ResizePolicy::Crop, ResizePolicy::CropWithAspect] {
                let b = compute_boundary(&m, policy, 10, 10, 50, 50).expect("drawable");
                assert!(!b.is_empty());
                for p in rect_corners(b.x1 as f64, b.y1 as f64, b.x2 as f64, b.y2 as f64) {
                    assert!(inside_with_tolerance(&quad, p, 1e-4), "{:?} {:?}", policy, b);
                }
            }
        }
    }

    #[test]
    fn crop_of_rotated_square_is_substantial() {
        // A 40x40 square rotated by 30° fits a square of about 29.3 px.
        let b = compute_boundary(&rotated(), ResizePolicy::CropWithAspect, 10, 10, 50, 50)
            .expect("drawable");
        assert!(b.width() >= 27 && b.width() <= 30, "{:?}", b);
        assert!((b.width() - b.height()).abs() <= 1, "{:?}", b);
    }

    #[test]
    fn degenerate_quads_fail() {
        let flat = Matrix3::from_scale(1.0, 0.0);
        assert!(compute_boundary(&flat, ResizePolicy::Adjust, 0, 0, 10, 10).is_none());
        assert!(compute_boundary(&Matrix3::IDENTITY, ResizePolicy::Adjust, 5, 5, 5, 10).is_none());
        let behind = Matrix3::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]]);
        assert!(compute_boundary(&behind, ResizePolicy::Adjust, 0, 0, 10, 10).is_none());
        let err = try_compute_boundary(&flat, ResizePolicy::Crop, 0, 0, 10, 10);
        assert!(matches!(err, Err(TransformError::DegenerateTransform(_))));
    }

    #[test]
    fn adjust_survives_partial_projection() {
        // Right half of the rect goes to infinity; the box is clipped, not inverted.
        let m = Matrix3::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-0.099, 0.0, 1.0]]);
        let b = compute_boundary(&m, ResizePolicy::Adjust, 0, 0, 20, 20).expect("drawable");
        assert!(b.x1 <= 0 && b.x2 > 20);
        assert!(b.y1 <= 0);
        assert!(compute_boundary(&m, ResizePolicy::Crop, 0, 0, 20, 20).is_none());
    }
}
