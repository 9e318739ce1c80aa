// ============================================================================
// TRANSFORM GRID: on-canvas widget state and per-handle drag math
// ============================================================================
//
// The grid owns the current matrix (item rectangle -> image space) and the
// pivot. A drag snapshots the transformed quad and pivot at button-down and
// every motion recomputes the new quad from that snapshot plus the total
// pointer delta, so there is no drift. The matrix is then rebuilt from the
// quad; families read it back through `widget_changed`.

use egui::Pos2;

use super::guides::{transform_segments, GuidesType};
use super::handles::{
    hit_test, layout, AreaFunction, Corner, Handle, HandleMetrics, HandleSet, PlacedHandle,
    Side, ViewTransform,
};
use crate::ops::geometry::{
    calc_angle, is_convex, line_intersect, pivot_delta, point_in_quad, rect_corners, rotate2d,
    vector_project,
};
use crate::ops::matrix::{Matrix3, Vector2};

/// The untransformed item rectangle, in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct GridRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl GridRect {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> Vector2 {
        Vector2::new((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub fn corners(&self) -> [Vector2; 4] {
        rect_corners(self.x1, self.y1, self.x2, self.y2)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Projective map from this rectangle onto `quad`.
    pub fn matrix_to_quad(&self, quad: &[Vector2; 4]) -> Matrix3 {
        Matrix3::perspective(self.x1, self.y1, self.width(), self.height(), quad)
    }
}

impl From<crate::canvas::PixelRect> for GridRect {
    fn from(r: crate::canvas::PixelRect) -> Self {
        Self::new(r.x as f64, r.y as f64, r.right() as f64, r.bottom() as f64)
    }
}

/// Effective constraint switches for the current drag (options already
/// combined with held modifier keys).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GridConstraints {
    pub constrain_move: bool,
    pub constrain_scale: bool,
    pub constrain_rotate: bool,
    pub constrain_shear: bool,
    pub constrain_perspective: bool,
    pub from_pivot_scale: bool,
    pub from_pivot_shear: bool,
    pub from_pivot_perspective: bool,
    pub corner_snap: bool,
    pub fixed_pivot: bool,
}

#[derive(Clone, Copy, Debug)]
struct DragOrigin {
    handle: Handle,
    press: Vector2,
    quad: [Vector2; 4],
    pivot: Vector2,
    matrix: Matrix3,
}

/// Interactive grid state shared by all transform families.
#[derive(Clone, Debug)]
pub struct TransformGrid {
    rect: GridRect,
    matrix: Matrix3,
    pivot: Vector2,
    pub handles: HandleSet,
    pub inside: AreaFunction,
    pub outside: AreaFunction,
    pub constraints: GridConstraints,
    pub metrics: HandleMetrics,
    pub guides: GuidesType,
    pub grid_size: u32,
    drag: Option<DragOrigin>,
}

impl TransformGrid {
    pub fn new(rect: GridRect) -> Self {
        Self {
            rect,
            matrix: Matrix3::IDENTITY,
            pivot: rect.center(),
            handles: HandleSet::ALL,
            inside: AreaFunction::Move,
            outside: AreaFunction::Rotate,
            constraints: GridConstraints::default(),
            metrics: HandleMetrics::default(),
            guides: GuidesType::None,
            grid_size: 15,
            drag: None,
        }
    }

    pub fn rect(&self) -> GridRect {
        self.rect
    }

    pub fn matrix(&self) -> Matrix3 {
        self.matrix
    }

    pub fn pivot(&self) -> Vector2 {
        self.pivot
    }

    pub fn set_transform(&mut self, matrix: Matrix3, pivot: Vector2) {
        self.matrix = matrix;
        self.pivot = pivot;
    }

    /// The item rectangle pushed through the matrix.
    pub fn quad(&self) -> [Vector2; 4] {
        self.rect.corners().map(|p| self.matrix.transform_vector2(p))
    }

    /// Centre handle position: the mapped rectangle centre for a convex
    /// quad, the corner average otherwise.
    pub fn center(&self) -> Vector2 {
        let quad = self.quad();
        if is_convex(&quad) {
            self.matrix.transform_vector2(self.rect.center())
        } else {
            (quad[0] + quad[1] + quad[2] + quad[3]) * 0.25
        }
    }

    pub fn is_valid(&self) -> bool {
        self.matrix.is_finite() && is_convex(&self.quad())
    }

    pub fn placed_handles(&self, view: &ViewTransform) -> Vec<PlacedHandle> {
        layout(&self.quad(), self.center(), self.pivot, self.handles, &self.metrics, view)
    }

    /// Guide segments in image space.
    pub fn guide_segments(&self) -> Vec<(Vector2, Vector2)> {
        let r = self.rect;
        let segs = self.guides.segments(self.grid_size, r.x1, r.y1, r.x2, r.y2);
        transform_segments(&self.matrix, &segs)
    }

    /// Point handles first, then the family's inside/outside function.
    pub fn hit_test(&self, pointer: Pos2, view: &ViewTransform) -> Handle {
        let hit = hit_test(&self.placed_handles(view), pointer, &self.metrics);
        if hit != Handle::None {
            return hit;
        }
        let quad = self.quad();
        let p = view.to_image(pointer);
        let function = if point_in_quad(&quad, p) { self.inside } else { self.outside };
        match function {
            AreaFunction::Move => Handle::Center,
            AreaFunction::Rotate => Handle::RotationRing,
            AreaFunction::Perspective => {
                let nearest = Corner::ALL
                    .into_iter()
                    .min_by(|a, b| {
                        quad[a.index()].distance(p).total_cmp(&quad[b.index()].distance(p))
                    })
                    .unwrap_or(Corner::TopLeft);
                Handle::Perspective(nearest)
            }
        }
    }

    // ------------------------------------------------------------------------
    //  Drag
    // ------------------------------------------------------------------------

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn active_handle(&self) -> Handle {
        self.drag.map(|d| d.handle).unwrap_or(Handle::None)
    }

    /// Snapshot the quad and pivot for a drag starting at `press` (image space).
    pub fn begin_drag(&mut self, handle: Handle, press: Vector2) {
        self.drag = Some(DragOrigin {
            handle,
            press,
            quad: self.quad(),
            pivot: self.pivot,
            matrix: self.matrix,
        });
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    /// Abandon the drag, restoring the button-down state.
    pub fn cancel_drag(&mut self) {
        if let Some(origin) = self.drag.take() {
            self.matrix = origin.matrix;
            self.pivot = origin.pivot;
        }
    }

    /// Apply pointer motion to the dragged handle. Returns `false` when the
    /// motion was rejected (no drag, or a non-finite result).
    pub fn motion(&mut self, current: Vector2, view: &ViewTransform) -> bool {
        let Some(origin) = self.drag else {
            return false;
        };
        let c = self.constraints;
        let old = origin.quad;
        let mut new = old;
        let mut pivot = origin.pivot;
        let mut fixed_pivot = c.fixed_pivot;
        let mut d = current - origin.press;

        match origin.handle {
            // Point handles belong to the session, not the grid.
            Handle::None | Handle::Point(_) => return false,

            Handle::Center => {
                if c.constrain_move {
                    d = constrain_to_octant(d);
                }
                for p in new.iter_mut() {
                    *p = *p + d;
                }
            }

            Handle::RotationRing => {
                let mut angle = calc_angle(origin.press - origin.pivot, current - origin.pivot);
                if c.constrain_rotate && self.metrics.snap_angle > 0.0 {
                    angle = (angle / self.metrics.snap_angle).round() * self.metrics.snap_angle;
                }
                for (n, o) in new.iter_mut().zip(old.iter()) {
                    *n = origin.pivot + rotate2d(*o - origin.pivot, angle);
                }
                fixed_pivot = true;
            }

            Handle::Pivot => {
                pivot = origin.pivot + d;
                if c.corner_snap {
                    pivot = self.snap_pivot(pivot, &old, view);
                }
                fixed_pivot = true;
            }

            Handle::Corner(corner) => {
                let (this, left, right, opposite) = corner.neighbours();
                if c.constrain_scale {
                    d = vector_project(d, old[this] - old[opposite]);
                }
                new[this] = old[this] + d;
                new[right] = line_intersect(old[right] + d, new[this], old[opposite], old[right]);
                new[left] = line_intersect(old[left] + d, new[this], old[opposite], old[left]);
                if c.from_pivot_scale {
                    fixed_pivot |= hold_pivot(&old, &mut new, origin.pivot);
                }
            }

            Handle::Edge(side) => {
                let (this_l, this_r) = side.corners();
                let (opp_l, opp_r) = side.opposite_corners();
                let this_mid = (old[this_l] + old[this_r]) * 0.5;
                let opp_mid = (old[opp_l] + old[opp_r]) * 0.5;
                d = vector_project(d, this_mid - opp_mid);

                if c.constrain_scale {
                    let anchor = if c.from_pivot_scale { origin.pivot } else { opp_mid };
                    let axis = this_mid - anchor;
                    let len = axis.length_sq();
                    if len > 0.0 {
                        let s = (this_mid + d - anchor).dot(axis) / len;
                        for (n, o) in new.iter_mut().zip(old.iter()) {
                            *n = anchor + (*o - anchor) * s;
                        }
                    }
                    fixed_pivot |= c.from_pivot_scale;
                } else {
                    new[this_l] = old[this_l] + d;
                    new[this_r] = old[this_r] + d;
                    if c.from_pivot_scale {
                        fixed_pivot |= hold_pivot(&old, &mut new, origin.pivot);
                    }
                }
            }

            Handle::Shear(side) => {
                let (this_l, this_r) = side.corners();
                if c.constrain_shear {
                    d = vector_project(d, old[this_r] - old[this_l]);
                }
                new[this_l] = old[this_l] + d;
                new[this_r] = old[this_r] + d;
                if c.from_pivot_shear {
                    fixed_pivot |= hold_pivot(&old, &mut new, origin.pivot);
                }
            }

            Handle::Perspective(corner) => {
                let this = corner.index();
                if c.constrain_perspective {
                    d = (0..4)
                        .filter(|&i| i != this)
                        .map(|i| vector_project(d, old[this] - old[i]))
                        .min_by(|a, b| (d - *a).length().total_cmp(&(d - *b).length()))
                        .unwrap_or(d);
                }
                new[this] = old[this] + d;
                if c.from_pivot_perspective {
                    fixed_pivot |= hold_pivot(&old, &mut new, origin.pivot);
                }
            }
        }

        if !fixed_pivot
            && is_convex(&old)
            && is_convex(&new)
            && point_in_quad(&old, origin.pivot)
        {
            pivot = origin.pivot + pivot_delta(&old, &new, origin.pivot);
        }

        if !pivot.is_finite() || new.iter().any(|p| !p.is_finite()) {
            return false;
        }
        let matrix = if origin.handle == Handle::Pivot {
            origin.matrix
        } else {
            self.rect.matrix_to_quad(&new)
        };
        if !matrix.is_finite() {
            return false;
        }
        self.matrix = matrix;
        self.pivot = pivot;
        true
    }

    fn snap_pivot(&self, pivot: Vector2, quad: &[Vector2; 4], view: &ViewTransform) -> Vector2 {
        let center = self.center();
        let candidates = [quad[0], quad[1], quad[2], quad[3], center];
        let scale = view.scale();
        candidates
            .into_iter()
            .map(|p| (p, p.distance(pivot) * scale))
            .filter(|(_, d)| *d < self.metrics.pivot_snap_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
            .unwrap_or(pivot)
    }
}

/// Undo the pivot's movement so the update is mirrored around it.
/// Returns whether the pivot is now held in place.
fn hold_pivot(old: &[Vector2; 4], new: &mut [Vector2; 4], pivot: Vector2) -> bool {
    if !(is_convex(old) && is_convex(new)) {
        return false;
    }
    let delta = pivot_delta(old, new, pivot);
    for p in new.iter_mut() {
        *p = *p - delta;
    }
    true
}

/// Snap a move delta to the nearest horizontal, vertical or diagonal axis.
fn constrain_to_octant(d: Vector2) -> Vector2 {
    let mut angle = (-d.y).atan2(d.x);
    if angle < 0.0 {
        angle += 2.0 * std::f64::consts::PI;
    }
    let a = 16.0 * angle / (2.0 * std::f64::consts::PI);
    let dist = d.length() / std::f64::consts::SQRT_2;

    if !(1.0..15.0).contains(&a) {
        Vector2::new(d.x, 0.0)
    } else if a < 3.0 {
        Vector2::new(dist, -dist)
    } else if a < 5.0 {
        Vector2::new(0.0, d.y)
    } else if a < 7.0 {
        Vector2::new(-dist, -dist)
    } else if a < 9.0 {
        Vector2::new(d.x, 0.0)
    } else if a < 11.0 {
        Vector2::new(-dist, dist)
    } else if a < 13.0 {
        Vector2::new(0.0, d.y)
    } else {
        Vector2::new(dist, dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-6;

    fn grid() -> TransformGrid {
        TransformGrid::new(GridRect::new(0.0, 0.0, 100.0, 100.0))
    }

    fn drag(g: &mut TransformGrid, handle: Handle, from: (f64, f64), to: (f64, f64)) -> bool {
        g.begin_drag(handle, from.into());
        let ok = g.motion(to.into(), &ViewTransform::identity());
        g.end_drag();
        ok
    }

    fn near(a: Vector2, x: f64, y: f64) -> bool {
        a.distance(Vector2::new(x, y)) < EPS
    }

    #[test]
    fn move_translates_quad_and_pivot() {
        let mut g = grid();
        assert!(drag(&mut g, Handle::Center, (50.0, 50.0), (60.0, 45.0)));
        let q = g.quad();
        assert!(near(q[0], 10.0, -5.0));
        assert!(near(q[3], 110.0, 95.0));
        assert!(near(g.pivot(), 60.0, 45.0));
    }

    #[test]
    fn constrained_move_snaps_to_axis() {
        let mut g = grid();
        g.constraints.constrain_move = true;
        drag(&mut g, Handle::Center, (50.0, 50.0), (70.0, 53.0));
        assert!(near(g.quad()[0], 20.0, 0.0));
        assert_eq!(constrain_to_octant(Vector2::new(10.0, -9.0)).x, -constrain_to_octant(Vector2::new(10.0, -9.0)).y);
        assert_eq!(constrain_to_octant(Vector2::new(1.0, 30.0)), Vector2::new(0.0, 30.0));
    }

    #[test]
    fn corner_scale_keeps_opposite() {
        let mut g = grid();
        drag(&mut g, Handle::Corner(Corner::BottomRight), (100.0, 100.0), (150.0, 120.0));
        let q = g.quad();
        assert!(near(q[0], 0.0, 0.0));
        assert!(near(q[1], 150.0, 0.0));
        assert!(near(q[2], 0.0, 120.0));
        assert!(near(q[3], 150.0, 120.0));
        // pivot was inside, so it follows the rectangle
        assert!(near(g.pivot(), 75.0, 60.0));
    }

    #[test]
    fn corner_scale_from_pivot_is_symmetric() {
        let mut g = grid();
        g.constraints.from_pivot_scale = true;
        drag(&mut g, Handle::Corner(Corner::BottomRight), (100.0, 100.0), (110.0, 110.0));
        let q = g.quad();
        // the pivot is held, so the corners split the motion around it
        assert!(near(q[0], -5.0, -5.0));
        assert!(near(q[3], 105.0, 105.0));
        assert!(near(g.pivot(), 50.0, 50.0));
    }

    #[test]
    fn constrained_corner_keeps_aspect() {
        let mut g = TransformGrid::new(GridRect::new(0.0, 0.0, 200.0, 100.0));
        g.constraints.constrain_scale = true;
        drag(&mut g, Handle::Corner(Corner::BottomRight), (200.0, 100.0), (300.0, 110.0));
        let q = g.quad();
        let w = q[3].x - q[0].x;
        let h = q[3].y - q[0].y;
        assert!((w / h - 2.0).abs() < EPS);
    }

    #[test]
    fn edge_stretch_ignores_tangent_motion() {
        let mut g = grid();
        drag(&mut g, Handle::Edge(Side::Right), (100.0, 50.0), (130.0, 90.0));
        let q = g.quad();
        assert!(near(q[1], 130.0, 0.0));
        assert!(near(q[3], 130.0, 100.0));
        assert!(near(q[0], 0.0, 0.0));
    }

    #[test]
    fn constrained_edge_scales_uniformly() {
        let mut g = grid();
        g.constraints.constrain_scale = true;
        drag(&mut g, Handle::Edge(Side::Right), (100.0, 50.0), (150.0, 50.0));
        let q = g.quad();
        assert!(near(q[0], 0.0, -25.0));
        assert!(near(q[3], 150.0, 125.0));
    }

    #[test]
    fn shear_moves_one_side() {
        let mut g = grid();
        g.constraints.constrain_shear = true;
        drag(&mut g, Handle::Shear(Side::Top), (75.0, 0.0), (95.0, 7.0));
        let q = g.quad();
        assert!(near(q[0], 20.0, 0.0));
        assert!(near(q[1], 120.0, 0.0));
        assert!(near(q[2], 0.0, 100.0));
        assert!(g.matrix().is_affine());
    }

    #[test]
    fn perspective_moves_one_corner() {
        let mut g = grid();
        drag(&mut g, Handle::Perspective(Corner::TopLeft), (0.0, 0.0), (20.0, 10.0));
        let q = g.quad();
        assert!(near(q[0], 20.0, 10.0));
        assert!(near(q[3], 100.0, 100.0));
        assert!(!g.matrix().is_affine());

        let mut g = grid();
        g.constraints.constrain_perspective = true;
        drag(&mut g, Handle::Perspective(Corner::TopLeft), (0.0, 0.0), (20.0, 2.0));
        assert!(near(g.quad()[0], 20.0, 0.0));
    }

    #[test]
    fn rotation_about_pivot() {
        let mut g = grid();
        drag(&mut g, Handle::RotationRing, (150.0, 50.0), (50.0, 150.0));
        let q = g.quad();
        assert!(near(q[0], 100.0, 0.0));
        assert!(near(g.pivot(), 50.0, 50.0));
        let p = g.matrix().transform_vector2(Vector2::new(50.0, 50.0));
        assert!(near(p, 50.0, 50.0));
    }

    #[test]
    fn rotation_snaps() {
        let mut g = grid();
        g.constraints.constrain_rotate = true;
        let to = Vector2::new(50.0, 50.0) + rotate2d(Vector2::new(100.0, 0.0), 0.55);
        drag(&mut g, Handle::RotationRing, (150.0, 50.0), (to.x, to.y));
        let m = g.matrix();
        let angle = m.coeff[1][0].atan2(m.coeff[0][0]);
        assert!((angle - FRAC_PI_2 / 3.0).abs() < EPS);
    }

    #[test]
    fn pivot_snaps_to_corner() {
        let mut g = grid();
        g.constraints.corner_snap = true;
        drag(&mut g, Handle::Pivot, (50.0, 50.0), (95.0, 8.0));
        assert!(near(g.pivot(), 100.0, 0.0));
        assert!(g.matrix().is_identity());
    }

    #[test]
    fn outside_pivot_stays_put() {
        let mut g = grid();
        g.set_transform(Matrix3::IDENTITY, Vector2::new(300.0, 300.0));
        drag(&mut g, Handle::Center, (50.0, 50.0), (70.0, 50.0));
        assert!(near(g.pivot(), 300.0, 300.0));
    }

    #[test]
    fn cancel_restores_snapshot() {
        let mut g = grid();
        let before = (g.matrix(), g.pivot());
        g.begin_drag(Handle::Corner(Corner::TopLeft), Vector2::new(0.0, 0.0));
        g.motion(Vector2::new(30.0, 12.0), &ViewTransform::identity());
        g.motion(Vector2::new(-5.0, 40.0), &ViewTransform::identity());
        g.cancel_drag();
        assert_eq!((g.matrix(), g.pivot()), before);
        assert!(!g.is_dragging());
    }

    #[test]
    fn area_functions() {
        let mut g = grid();
        let view = ViewTransform::identity();
        assert_eq!(g.hit_test(Pos2::new(30.0, 70.0), &view), Handle::Center);
        assert_eq!(g.hit_test(Pos2::new(-80.0, 250.0), &view), Handle::RotationRing);
        g.handles = HandleSet { perspective: true, center: true, ..HandleSet::default() };
        g.inside = AreaFunction::Perspective;
        g.outside = AreaFunction::Perspective;
        assert_eq!(g.hit_test(Pos2::new(80.0, 70.0), &view), Handle::Perspective(Corner::BottomRight));
    }
}
