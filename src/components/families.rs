// ============================================================================
// TRANSFORM FAMILIES: Unified / Perspective / Rotate / Generic / Handle
// ============================================================================
//
// A family decides what the TransformInfo vector means, how it becomes a
// matrix, how an imposed matrix is folded back into it, and which parts of
// the grid the user can grab. The grid itself is family-agnostic.

use std::f64::consts::SQRT_2;

use serde::{Deserialize, Serialize};

use super::handle_grid::{HandlePoints, MAX_HANDLES};
use super::handles::{AreaFunction, HandleSet, ViewTransform, HANDLE_LARGE};
use super::transform_grid::{GridRect, TransformGrid};
use crate::error::{TransformError, TransformResult};
use crate::ops::matrix::{Matrix3, Vector2};

const EPSILON: f64 = 1e-6;
/// Largest perspective term a rotation matrix may carry.
const PERSPECTIVE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformFamily {
    #[default]
    Unified,
    Perspective,
    Rotate,
    Generic,
    Handle,
}

/// Declarative state of a transform session. Layout per family:
///
/// * Unified: `x0 y0 x1 y1 x2 y2 x3 y3 pivot_x pivot_y`
/// * Perspective: `x0 y0 x1 y1 x2 y2 x3 y3`
/// * Rotate: `angle pivot_x pivot_y`
/// * Generic: eight input coordinates, then eight output coordinates
/// * Handle: the Generic layout, then the number of visible handles
///
/// Corners are in grid corner order (top-left, top-right, bottom-left,
/// bottom-right of the item rectangle).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformInfo {
    family: TransformFamily,
    values: Vec<f64>,
}

impl TransformInfo {
    /// `None` when the length does not fit the family or a value is not finite.
    pub fn from_values(family: TransformFamily, values: Vec<f64>) -> Option<Self> {
        if values.len() != family.info_len() || !values.iter().all(|v| v.is_finite()) {
            return None;
        }
        if family == TransformFamily::Handle {
            let count = values[HANDLE_COUNT];
            if count.fract() != 0.0 || !(0.0..=MAX_HANDLES as f64).contains(&count) {
                return None;
            }
        }
        Some(Self { family, values })
    }

    pub fn family(&self) -> TransformFamily {
        self.family
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Transformed corner `i` (Unified, Perspective) or output point `i`
    /// (Generic, Handle).
    pub fn corner(&self, i: usize) -> Option<Vector2> {
        let base = match self.family {
            TransformFamily::Unified | TransformFamily::Perspective => 0,
            TransformFamily::Generic | TransformFamily::Handle => 8,
            TransformFamily::Rotate => return None,
        };
        Some(self.point(base + 2 * i))
    }

    pub fn corners(&self) -> Option<[Vector2; 4]> {
        Some([self.corner(0)?, self.corner(1)?, self.corner(2)?, self.corner(3)?])
    }

    /// Input point `i` (Generic, Handle).
    pub fn input_point(&self, i: usize) -> Option<Vector2> {
        matches!(self.family, TransformFamily::Generic | TransformFamily::Handle)
            .then(|| self.point(2 * i))
    }

    pub fn handle_points(&self) -> Option<HandlePoints> {
        (self.family == TransformFamily::Handle).then(|| HandlePoints {
            input: [0, 1, 2, 3].map(|i| self.point(2 * i)),
            output: [0, 1, 2, 3].map(|i| self.point(8 + 2 * i)),
            count: self.values[HANDLE_COUNT] as usize,
        })
    }

    /// Ignored unless this is a Handle info.
    pub fn set_handle_points(&mut self, points: &HandlePoints) {
        if self.family != TransformFamily::Handle {
            return;
        }
        self.set_corners(0, &points.input);
        self.set_corners(8, &points.output);
        self.values[HANDLE_COUNT] = points.count.min(MAX_HANDLES) as f64;
    }

    pub fn pivot(&self) -> Option<Vector2> {
        match self.family {
            TransformFamily::Unified => Some(self.point(8)),
            TransformFamily::Rotate => Some(self.point(1)),
            _ => None,
        }
    }

    /// Rotation angle in radians (Rotate only).
    pub fn angle(&self) -> Option<f64> {
        (self.family == TransformFamily::Rotate).then(|| self.values[0])
    }

    fn point(&self, i: usize) -> Vector2 {
        Vector2::new(self.values[i], self.values[i + 1])
    }

    fn set_point(&mut self, i: usize, p: Vector2) {
        self.values[i] = p.x;
        self.values[i + 1] = p.y;
    }

    fn set_corners(&mut self, base: usize, q: &[Vector2; 4]) {
        for (i, p) in q.iter().enumerate() {
            self.set_point(base + 2 * i, *p);
        }
    }

    fn set_pivot(&mut self, p: Vector2) {
        match self.family {
            TransformFamily::Unified => self.set_point(8, p),
            TransformFamily::Rotate => self.set_point(1, p),
            _ => {}
        }
    }
}

const HANDLE_COUNT: usize = 16;

fn all_finite(points: &[Vector2]) -> bool {
    points.iter().all(|p| p.is_finite())
}

/// Angle of `matrix` when it is a rotation about some point, else
/// `DegenerateTransform`. Scale, shear and perspective are refused.
fn rotation_angle(matrix: &Matrix3) -> TransformResult<f64> {
    let k = matrix.coeff;
    if k[2][2].abs() < EPSILON {
        return Err(TransformError::DegenerateTransform("not a rotation"));
    }
    let n = |v: f64| v / k[2][2];
    let (c, s) = (n(k[0][0]), n(k[1][0]));
    let affine = n(k[2][0]).abs() < PERSPECTIVE_EPSILON && n(k[2][1]).abs() < PERSPECTIVE_EPSILON;
    let rigid = (n(k[1][1]) - c).abs() < EPSILON
        && (n(k[0][1]) + s).abs() < EPSILON
        && (c.hypot(s) - 1.0).abs() < EPSILON;
    let angle = s.atan2(c);
    if affine && rigid && angle.is_finite() {
        Ok(angle)
    } else {
        Err(TransformError::DegenerateTransform("not a rotation"))
    }
}

impl TransformFamily {
    pub fn label(&self) -> String {
        match self {
            TransformFamily::Unified => t!("family.unified"),
            TransformFamily::Perspective => t!("family.perspective"),
            TransformFamily::Rotate => t!("family.rotate"),
            TransformFamily::Generic => t!("family.generic"),
            TransformFamily::Handle => t!("family.handle"),
        }
    }

    pub fn all() -> &'static [TransformFamily] {
        &[
            TransformFamily::Unified,
            TransformFamily::Perspective,
            TransformFamily::Rotate,
            TransformFamily::Generic,
            TransformFamily::Handle,
        ]
    }

    pub fn info_len(&self) -> usize {
        match self {
            TransformFamily::Unified => 10,
            TransformFamily::Perspective => 8,
            TransformFamily::Rotate => 3,
            TransformFamily::Generic => 16,
            TransformFamily::Handle => 17,
        }
    }

    /// Identity TransformInfo for the item rectangle.
    pub fn prepare(&self, rect: GridRect) -> TransformInfo {
        let corners = rect.corners();
        let center = rect.center();
        let mut info = TransformInfo { family: *self, values: vec![0.0; self.info_len()] };
        match self {
            TransformFamily::Unified => {
                info.set_corners(0, &corners);
                info.set_pivot(center);
            }
            TransformFamily::Perspective => info.set_corners(0, &corners),
            TransformFamily::Rotate => info.set_pivot(center),
            TransformFamily::Generic => {
                info.set_corners(0, &corners);
                info.set_corners(8, &corners);
            }
            TransformFamily::Handle => info.set_handle_points(&HandlePoints::new(corners)),
        }
        info
    }

    pub fn info_to_matrix(&self, info: &TransformInfo, rect: GridRect) -> TransformResult<Matrix3> {
        let m = match self {
            TransformFamily::Unified | TransformFamily::Perspective => {
                let q = info.corners().ok_or(TransformError::DegenerateTransform("missing corners"))?;
                rect.matrix_to_quad(&q)
            }
            TransformFamily::Rotate => {
                let p = info.pivot().unwrap_or_else(|| rect.center());
                Matrix3::rotate_about(p.x, p.y, info.values[0])
            }
            TransformFamily::Generic | TransformFamily::Handle => {
                let input = [0, 1, 2, 3].map(|i| info.point(2 * i));
                let output = [0, 1, 2, 3].map(|i| info.point(8 + 2 * i));
                Matrix3::generic(&input, &output)
                    .ok_or(TransformError::DegenerateTransform("degenerate point pairs"))?
            }
        };
        if m.is_finite() {
            Ok(m)
        } else {
            Err(TransformError::DegenerateTransform("non-finite matrix"))
        }
    }

    /// Fold an externally imposed matrix back into `info`. The corners go
    /// through `matrix`; unless `fixed_pivot` is set, the pivot goes through
    /// `matrix * inverse(old matrix)`. `info` is untouched on error.
    pub fn matrix_to_info(
        &self,
        info: &mut TransformInfo,
        matrix: &Matrix3,
        rect: GridRect,
        fixed_pivot: bool,
    ) -> TransformResult<()> {
        match self {
            TransformFamily::Unified | TransformFamily::Perspective => {
                let old = self.info_to_matrix(info, rect)?;
                let inverse = old
                    .invert()
                    .ok_or(TransformError::DegenerateTransform("singular matrix"))?;
                let transfer = *matrix * inverse;
                let corners = rect.corners().map(|p| matrix.transform_vector2(p));
                let pivot = match info.pivot() {
                    Some(p) if !fixed_pivot => Some(transfer.transform_vector2(p)),
                    other => other,
                };
                if !all_finite(&corners) || pivot.is_some_and(|p| !p.is_finite()) {
                    return Err(TransformError::DegenerateTransform("non-finite corners"));
                }
                info.set_corners(0, &corners);
                if let Some(p) = pivot {
                    info.set_pivot(p);
                }
            }
            TransformFamily::Rotate => {
                let angle = rotation_angle(matrix)?;
                let m = matrix.coeff;
                let (c, s) = (m[0][0] / m[2][2], m[1][0] / m[2][2]);
                let (x, y) = (m[0][2] / m[2][2], m[1][2] / m[2][2]);
                let stored = info.pivot().unwrap_or_else(|| rect.center());
                // Fixed point of the rotation, when it has one.
                let q = 2.0 * (1.0 - c);
                let pivot = if !fixed_pivot && q > EPSILON * EPSILON {
                    Vector2::new(((1.0 - c) * x - s * y) / q, (s * x + (1.0 - c) * y) / q)
                } else {
                    stored
                };
                let moved = matrix.transform_vector2(pivot);
                if !pivot.is_finite() || moved.distance(pivot) > EPSILON * (1.0 + pivot.length()) {
                    return Err(TransformError::DegenerateTransform("matrix moves the pivot"));
                }
                info.set_pivot(pivot);
                info.values[0] = angle;
            }
            TransformFamily::Generic | TransformFamily::Handle => {
                let input = [0, 1, 2, 3].map(|i| info.point(2 * i));
                let output = input.map(|p| matrix.transform_vector2(p));
                if !all_finite(&output) {
                    return Err(TransformError::DegenerateTransform("non-finite points"));
                }
                info.set_corners(8, &output);
            }
        }
        Ok(())
    }

    /// Which handles and area functions the grid offers.
    pub fn configure_widget(&self, grid: &mut TransformGrid) {
        let (handles, inside, outside) = match self {
            TransformFamily::Unified => (HandleSet::ALL, AreaFunction::Move, AreaFunction::Rotate),
            TransformFamily::Perspective => (
                HandleSet { perspective: true, center: true, ..HandleSet::default() },
                AreaFunction::Perspective,
                AreaFunction::Perspective,
            ),
            TransformFamily::Rotate => (
                HandleSet { pivot: true, ..HandleSet::default() },
                AreaFunction::Rotate,
                AreaFunction::Rotate,
            ),
            TransformFamily::Generic => (
                HandleSet { perspective: true, center: true, ..HandleSet::default() },
                AreaFunction::Move,
                AreaFunction::Perspective,
            ),
            // Handles are placed by the user, not by the grid.
            TransformFamily::Handle => (HandleSet::default(), AreaFunction::Move, AreaFunction::Move),
        };
        grid.handles = handles;
        grid.inside = inside;
        grid.outside = outside;
    }

    /// Push `info` into the grid. A degenerate info leaves the grid as is.
    pub fn update_widget(&self, info: &TransformInfo, grid: &mut TransformGrid) -> TransformResult<()> {
        let rect = grid.rect();
        let matrix = self.info_to_matrix(info, rect)?;
        let pivot = info
            .pivot()
            .unwrap_or_else(|| matrix.transform_vector2(rect.center()));
        grid.set_transform(matrix, pivot);
        Ok(())
    }

    /// Read the grid back into `info` after user interaction.
    pub fn widget_changed(&self, info: &mut TransformInfo, grid: &TransformGrid) -> TransformResult<()> {
        match self {
            TransformFamily::Unified | TransformFamily::Perspective => {
                let quad = grid.quad();
                if !all_finite(&quad) {
                    return Err(TransformError::DegenerateTransform("non-finite quad"));
                }
                info.set_corners(0, &quad);
                info.set_pivot(grid.pivot());
            }
            TransformFamily::Rotate => {
                // The grid pivot may move on its own, so only the angle is read
                // from the matrix.
                info.values[0] = rotation_angle(&grid.matrix())?;
                info.set_pivot(grid.pivot());
            }
            TransformFamily::Generic | TransformFamily::Handle => {
                self.matrix_to_info(info, &grid.matrix(), grid.rect(), true)?;
            }
        }
        Ok(())
    }

    /// Input/output point pairs (Generic, Handle). Handle infos include the
    /// hidden slots.
    pub fn info_to_points(&self, info: &TransformInfo) -> Option<[(Vector2, Vector2); 4]> {
        let paired = matches!(self, TransformFamily::Generic | TransformFamily::Handle);
        if !paired || info.family != *self {
            return None;
        }
        Some([0, 1, 2, 3].map(|i| (info.point(2 * i), info.point(8 + 2 * i))))
    }

    /// Lay out a default square centred on the visible part of the canvas.
    pub fn readjust(&self, info: &mut TransformInfo, view: &ViewTransform, viewport: egui::Rect) {
        let c = viewport.center();
        let half = (viewport.width().min(viewport.height()) as f64) / 2.0;
        let r = (half / SQRT_2 - HANDLE_LARGE / 2.0).max(HANDLE_LARGE / 2.0) as f32;
        let square = [
            egui::pos2(c.x - r, c.y - r),
            egui::pos2(c.x + r, c.y - r),
            egui::pos2(c.x - r, c.y + r),
            egui::pos2(c.x + r, c.y + r),
        ]
        .map(|p| view.to_image(p));
        let center = view.to_image(c);
        if !all_finite(&square) || !center.is_finite() {
            return;
        }
        match self {
            TransformFamily::Unified => {
                info.set_corners(0, &square);
                info.set_pivot(center);
            }
            TransformFamily::Perspective => info.set_corners(0, &square),
            TransformFamily::Rotate => {
                info.values[0] = 0.0;
                info.set_pivot(center);
            }
            TransformFamily::Generic | TransformFamily::Handle => {
                info.set_corners(0, &square);
                info.set_corners(8, &square);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    const RECT: GridRect = GridRect::new(0.0, 0.0, 100.0, 100.0);

    fn near(a: Vector2, x: f64, y: f64) -> bool {
        a.distance(Vector2::new(x, y)) < 1e-6
    }

    #[test]
    fn prepare_is_identity_for_every_family() {
        for family in TransformFamily::all() {
            let info = family.prepare(RECT);
            assert_eq!(info.len(), family.info_len());
            let m = family.info_to_matrix(&info, RECT).expect("matrix");
            assert!(m.approx_eq(&Matrix3::IDENTITY, 1e-9), "{:?}", family);
        }
        let info = TransformFamily::Unified.prepare(RECT);
        assert_eq!(info.values(), &[0.0, 0.0, 100.0, 0.0, 0.0, 100.0, 100.0, 100.0, 50.0, 50.0]);
    }

    #[test]
    fn unified_rotation_with_fixed_pivot() {
        let family = TransformFamily::Unified;
        let mut info = family.prepare(RECT);
        let rot = Matrix3::rotate_about(50.0, 50.0, FRAC_PI_2);
        family.matrix_to_info(&mut info, &rot, RECT, true).expect("fold");
        assert!(near(info.corner(0).unwrap(), 100.0, 0.0));
        assert!(near(info.pivot().unwrap(), 50.0, 50.0));
    }

    #[test]
    fn unified_pivot_is_carried_by_transfer() {
        let family = TransformFamily::Unified;
        let mut info = family.prepare(RECT);
        family
            .matrix_to_info(&mut info, &Matrix3::from_translation(10.0, 0.0), RECT, false)
            .expect("first");
        family
            .matrix_to_info(&mut info, &Matrix3::from_translation(30.0, 5.0), RECT, false)
            .expect("second");
        assert!(near(info.pivot().unwrap(), 80.0, 55.0));
        assert!(near(info.corner(3).unwrap(), 130.0, 105.0));
    }

    #[test]
    fn singular_old_matrix_is_a_noop() {
        let family = TransformFamily::Unified;
        let mut info = TransformInfo::from_values(
            family,
            vec![0.0, 0.0, 100.0, 0.0, 0.0, 0.0, 100.0, 0.0, 50.0, 50.0],
        )
        .expect("values");
        let before = info.clone();
        assert!(family.matrix_to_info(&mut info, &Matrix3::from_translation(1.0, 1.0), RECT, false).is_err());
        assert_eq!(info, before);
    }

    #[test]
    fn rotate_recovers_angle_and_pivot() {
        let family = TransformFamily::Rotate;
        let mut info = family.prepare(RECT);
        let m = Matrix3::rotate_about(20.0, 70.0, FRAC_PI_4);
        family.matrix_to_info(&mut info, &m, RECT, false).expect("fold");
        assert!((info.angle().unwrap() - FRAC_PI_4).abs() < 1e-9);
        assert!(near(info.pivot().unwrap(), 20.0, 70.0));
        let back = family.info_to_matrix(&info, RECT).expect("matrix");
        assert!(back.approx_eq(&m, 1e-9));
    }

    #[test]
    fn generic_points_follow_matrix() {
        let family = TransformFamily::Generic;
        let mut info = family.prepare(RECT);
        let m = Matrix3::from_scale(2.0, 0.5);
        family.matrix_to_info(&mut info, &m, RECT, false).expect("fold");
        let pairs = family.info_to_points(&info).expect("pairs");
        assert!(near(pairs[3].0, 100.0, 100.0));
        assert!(near(pairs[3].1, 200.0, 50.0));
        let back = family.info_to_matrix(&info, RECT).expect("matrix");
        assert!(back.approx_eq(&m, 1e-9));
        assert!(TransformFamily::Unified.info_to_points(&info).is_none());
    }

    #[test]
    fn widget_round_trip() {
        for family in TransformFamily::all() {
            let mut grid = TransformGrid::new(RECT);
            family.configure_widget(&mut grid);
            let mut info = family.prepare(RECT);
            let m = Matrix3::rotate_about(50.0, 50.0, 0.3);
            family.matrix_to_info(&mut info, &m, RECT, false).expect("fold");
            family.update_widget(&info, &mut grid).expect("update");
            let mut read = family.prepare(RECT);
            family.widget_changed(&mut read, &grid).expect("read");
            let a = family.info_to_matrix(&info, RECT).expect("a");
            let b = family.info_to_matrix(&read, RECT).expect("b");
            assert!(a.approx_eq(&b, 1e-6), "{:?}", family);
        }
    }

    #[test]
    fn readjust_centres_square_on_viewport() {
        let family = TransformFamily::Unified;
        let mut info = family.prepare(RECT);
        let view = ViewTransform::new(2.0, 2.0, 0.0, 0.0);
        let viewport = egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(400.0, 200.0));
        family.readjust(&mut info, &view, viewport);
        assert!(near(info.pivot().unwrap(), 100.0, 50.0));
        // radius = 100 / sqrt(2) - 12.5 screen px, screen positions are f32
        let r = (100.0 / SQRT_2 - 12.5) / 2.0;
        let c0 = info.corner(0).unwrap();
        assert!(c0.distance(Vector2::new(100.0 - r, 50.0 - r)) < 1e-3);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(TransformInfo::from_values(TransformFamily::Rotate, vec![0.0, 1.0]).is_none());
        assert!(TransformInfo::from_values(TransformFamily::Rotate, vec![f64::NAN, 1.0, 2.0]).is_none());
        let mut values = TransformFamily::Handle.prepare(RECT).values().to_vec();
        values[16] = 2.5;
        assert!(TransformInfo::from_values(TransformFamily::Handle, values.clone()).is_none());
        values[16] = 5.0;
        assert!(TransformInfo::from_values(TransformFamily::Handle, values.clone()).is_none());
        values[16] = 3.0;
        assert!(TransformInfo::from_values(TransformFamily::Handle, values).is_some());
    }

    #[test]
    fn rotate_refuses_anything_but_a_rotation() {
        let family = TransformFamily::Rotate;
        let mut info = family.prepare(RECT);
        family
            .matrix_to_info(&mut info, &Matrix3::rotate_about(50.0, 50.0, 0.5), RECT, true)
            .expect("rotation");
        let before = info.clone();

        let mut scaled = Matrix3::rotate_about(50.0, 50.0, 0.5);
        scaled.scale(2.0, 2.0);
        let mut sheared = Matrix3::IDENTITY;
        sheared.xshear(0.3);
        let mut tilted = Matrix3::IDENTITY;
        tilted.coeff[2][0] = 0.001;
        for m in [scaled, sheared, tilted, Matrix3::from_translation(5.0, 0.0)] {
            let result = family.matrix_to_info(&mut info, &m, RECT, false);
            assert!(matches!(result, Err(TransformError::DegenerateTransform(_))), "{:?}", m);
            assert_eq!(info, before);
        }
    }

    #[test]
    fn rotate_with_fixed_pivot_refuses_a_foreign_centre() {
        let family = TransformFamily::Rotate;
        let mut info = family.prepare(RECT);
        let m = Matrix3::rotate_about(10.0, 10.0, 0.5);
        assert!(family.matrix_to_info(&mut info, &m, RECT, true).is_err());
        assert!(family.matrix_to_info(&mut info, &m, RECT, false).is_ok());
        assert!(near(info.pivot().unwrap(), 10.0, 10.0));
    }

    #[test]
    fn handle_info_stores_points_and_count() {
        let family = TransformFamily::Handle;
        let mut info = family.prepare(RECT);
        let mut points = info.handle_points().expect("points");
        assert_eq!(points.count, 0);
        points.add(Vector2::new(30.0, 40.0)).expect("added");
        let points = points.transform_drag(0, Vector2::new(5.0, 5.0)).expect("drag");
        info.set_handle_points(&points);
        assert_eq!(info.handle_points(), Some(points));
        assert!(info.pivot().is_none());
        let m = family.info_to_matrix(&info, RECT).expect("matrix");
        assert!(m.approx_eq(&Matrix3::from_translation(5.0, 5.0), 1e-9));
        assert!(near(info.corner(0).unwrap(), 35.0, 45.0));
        assert!(near(info.input_point(0).unwrap(), 30.0, 40.0));

        // An imposed matrix moves every output point and keeps the count.
        family.matrix_to_info(&mut info, &Matrix3::from_scale(2.0, 2.0), RECT, false).expect("fold");
        assert_eq!(info.handle_points().expect("points").count, 1);
        assert!(near(info.corner(0).unwrap(), 60.0, 80.0));
    }
}
