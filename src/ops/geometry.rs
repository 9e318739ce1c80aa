// ============================================================================
// GEOMETRY: quad and vector helpers shared by the grid and boundary code
// ============================================================================
//
// Quads are stored in corner order 0 = top-left, 1 = top-right,
// 2 = bottom-left, 3 = bottom-right (of the untransformed rectangle), which
// is NOT polygon order. Walk them as 0, 1, 3, 2 to trace the outline.

use std::f64::consts::PI;

use super::matrix::{Matrix3, Vector2};

/// Corner indices in outline order.
pub const OUTLINE_ORDER: [usize; 4] = [0, 1, 3, 2];

/// Clockwise (on screen, y down) angle from `a` to `b`, in `[0, 2π)`.
pub fn calc_angle(a: Vector2, b: Vector2) -> f64 {
    let len = a.length() * b.length();
    if len == 0.0 {
        return 0.0;
    }
    let angle = (a.dot(b) / len).clamp(-1.0, 1.0).acos();
    if a.cross(b) < 0.0 { 2.0 * PI - angle } else { angle }
}

/// Rotate `p` by `angle` about the origin, in the same sense as [`calc_angle`].
pub fn rotate2d(p: Vector2, angle: f64) -> Vector2 {
    let (sin, cos) = angle.sin_cos();
    Vector2::new(cos * p.x - sin * p.y, sin * p.x + cos * p.y)
}

/// Projection of `a` onto `b`.
pub fn vector_project(a: Vector2, b: Vector2) -> Vector2 {
    let len = b.length_sq();
    if len == 0.0 {
        return Vector2::ZERO;
    }
    b * (a.dot(b) / len)
}

/// Intersection of line p1-p2 with line q1-q2. Parallel lines yield the
/// average of the four points.
pub fn line_intersect(p1: Vector2, p2: Vector2, q1: Vector2, q2: Vector2) -> Vector2 {
    let denom = (q2.y - q1.y) * (p2.x - p1.x) - (q2.x - q1.x) * (p2.y - p1.y);
    if denom == 0.0 {
        return (p1 + p2 + q1 + q2) * 0.25;
    }
    let u = ((q2.x - q1.x) * (p1.y - q1.y) - (q2.y - q1.y) * (p1.x - q1.x)) / denom;
    p1 + (p2 - p1) * u
}

/// Strict convexity test for a quad in corner order. Collinear or
/// self-intersecting quads are not convex.
pub fn is_convex(q: &[Vector2; 4]) -> bool {
    let [p1, p2, p3, p4] = *q;
    let z1 = (p2.x - p1.x) * (p4.y - p1.y) - (p4.x - p1.x) * (p2.y - p1.y);
    let z2 = (p4.x - p1.x) * (p3.y - p1.y) - (p3.x - p1.x) * (p4.y - p1.y);
    let z3 = (p4.x - p2.x) * (p3.y - p2.y) - (p3.x - p2.x) * (p4.y - p2.y);
    let z4 = (p3.x - p2.x) * (p1.y - p2.y) - (p1.x - p2.x) * (p3.y - p2.y);
    z1 * z2 > 0.0 && z3 * z4 > 0.0
}

/// Even-odd point-in-quad test on the outline.
pub fn point_in_quad(q: &[Vector2; 4], p: Vector2) -> bool {
    let mut inside = false;
    for i in 0..4 {
        let a = q[OUTLINE_ORDER[i]];
        let b = q[OUTLINE_ORDER[(i + 1) % 4]];
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
    }
    inside
}

/// Signed area of the quad outline (positive when clockwise on screen).
pub fn quad_area(q: &[Vector2; 4]) -> f64 {
    let mut area = 0.0;
    for i in 0..4 {
        let a = q[OUTLINE_ORDER[i]];
        let b = q[OUTLINE_ORDER[(i + 1) % 4]];
        area += a.cross(b);
    }
    area * 0.5
}

/// Corners of the rectangle (x1, y1)-(x2, y2) in corner order.
pub fn rect_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> [Vector2; 4] {
    [
        Vector2::new(x1, y1),
        Vector2::new(x2, y1),
        Vector2::new(x1, y2),
        Vector2::new(x2, y2),
    ]
}

/// How far `pivot` moves when the quad `before` becomes `after`: the pivot
/// is carried along by the projective map between the two quads.
pub fn pivot_delta(before: &[Vector2; 4], after: &[Vector2; 4], pivot: Vector2) -> Vector2 {
    let from = Matrix3::perspective(0.0, 0.0, 1.0, 1.0, before);
    let to = Matrix3::perspective(0.0, 0.0, 1.0, 1.0, after);
    let Some(inv) = from.invert() else {
        return Vector2::ZERO;
    };
    let moved = (to * inv).transform_vector2(pivot);
    if moved.is_finite() { moved - pivot } else { Vector2::ZERO }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn square() -> [Vector2; 4] {
        rect_corners(0.0, 0.0, 100.0, 100.0)
    }

    #[test]
    fn angle_is_clockwise_on_screen() {
        let right = Vector2::new(1.0, 0.0);
        let down = Vector2::new(0.0, 1.0);
        assert!((calc_angle(right, down) - FRAC_PI_2).abs() < 1e-12);
        assert!((calc_angle(down, right) - 3.0 * FRAC_PI_2).abs() < 1e-12);
        assert_eq!(calc_angle(Vector2::ZERO, down), 0.0);
    }

    #[test]
    fn rotate2d_agrees_with_calc_angle() {
        let v = Vector2::new(3.0, 4.0);
        let r = rotate2d(v, 0.4);
        assert!((calc_angle(v, r) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn projection_and_intersection() {
        let p = vector_project(Vector2::new(3.0, 4.0), Vector2::new(2.0, 0.0));
        assert_eq!(p, Vector2::new(3.0, 0.0));
        let x = line_intersect(
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 10.0),
            Vector2::new(0.0, 10.0),
            Vector2::new(10.0, 0.0),
        );
        assert!(x.distance(Vector2::new(5.0, 5.0)) < 1e-12);
        let parallel = line_intersect(
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
            Vector2::new(1.0, 1.0),
        );
        assert_eq!(parallel, Vector2::new(0.5, 0.5));
    }

    #[test]
    fn convexity() {
        assert!(is_convex(&square()));
        let mut dart = square();
        dart[3] = Vector2::new(20.0, 20.0);
        assert!(!is_convex(&dart));
        let mut bowtie = square();
        bowtie.swap(2, 3);
        assert!(!is_convex(&bowtie));
        let flat = rect_corners(0.0, 0.0, 100.0, 0.0);
        assert!(!is_convex(&flat));
    }

    #[test]
    fn point_in_quad_uses_outline_order() {
        let q = square();
        assert!(point_in_quad(&q, Vector2::new(50.0, 50.0)));
        assert!(point_in_quad(&q, Vector2::new(1.0, 99.0)));
        assert!(!point_in_quad(&q, Vector2::new(150.0, 50.0)));
        assert!((quad_area(&q) - 10000.0).abs() < 1e-9);
    }

    #[test]
    fn pivot_follows_quad() {
        let before = square();
        let after = before.map(|p| p + Vector2::new(10.0, -5.0));
        let d = pivot_delta(&before, &after, Vector2::new(50.0, 50.0));
        assert!(d.distance(Vector2::new(10.0, -5.0)) < 1e-9);
    }
}
