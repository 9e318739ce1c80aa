// ============================================================================
// HANDLE GRID: transform by one to four user-placed handles
// ============================================================================
//
// Four slots of input/output point pairs always pin the matrix. The first
// `count` slots are visible handles; the rest stay hidden and are dragged
// along so the visible count decides what a drag can do:
//
//   1 handle : move
//   2 handles: rotate and scale about the other handle
//   3 handles: shear and scale (affine)
//   4 handles: perspective

use serde::{Deserialize, Serialize};

use crate::ops::matrix::{Matrix3, Vector2};

pub const MAX_HANDLES: usize = 4;

/// Smallest doubled triangle area three handles may span.
const COLLINEAR_EPSILON: f64 = 1e-6;
/// Offset tried when a placed handle would sit on a line through two others.
const NUDGE: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandleMode {
    /// Click adds a handle, dragging a handle transforms.
    #[default]
    AddTransform,
    /// Dragging a handle repositions it without changing the transform.
    Move,
    /// Click removes a handle.
    Remove,
}

impl HandleMode {
    pub fn label(&self) -> String {
        match self {
            HandleMode::AddTransform => t!("handle_mode.add_transform"),
            HandleMode::Move => t!("handle_mode.move"),
            HandleMode::Remove => t!("handle_mode.remove"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandlePoints {
    pub input: [Vector2; MAX_HANDLES],
    pub output: [Vector2; MAX_HANDLES],
    pub count: usize,
}

impl HandlePoints {
    /// No visible handles; the hidden slots sit on `corners` (identity).
    pub fn new(corners: [Vector2; MAX_HANDLES]) -> Self {
        Self { input: corners, output: corners, count: 0 }
    }

    pub fn matrix(&self) -> Option<Matrix3> {
        Matrix3::generic(&self.input, &self.output)
    }

    pub fn visible(&self) -> &[Vector2] {
        &self.output[..self.count]
    }

    /// Place a new handle at `at` (image space) without changing the
    /// transform. Returns its index, or `None` when all four are in use or
    /// no valid position is found near `at`.
    pub fn add(&mut self, at: Vector2) -> Option<usize> {
        if self.count >= MAX_HANDLES {
            return None;
        }
        let inverse = self.matrix()?.invert()?;
        let i = self.count;
        let mut next = *self;
        next.output[i] = at;
        next.settle(i, &inverse)?;
        *self = Self { count: i + 1, ..next };
        Some(i)
    }

    /// Drop visible handle `i`. Its pair moves to the first hidden slot so
    /// the matrix is unchanged.
    pub fn remove(&mut self, i: usize) -> bool {
        if i >= self.count {
            return false;
        }
        self.input[i..self.count].rotate_left(1);
        self.output[i..self.count].rotate_left(1);
        self.count -= 1;
        true
    }

    /// Points after dragging handle `i` by `delta` from this layout.
    pub fn transform_drag(&self, i: usize, delta: Vector2) -> Option<Self> {
        if i >= self.count {
            return None;
        }
        let mut out = *self;
        match self.count {
            1 => {
                for p in out.output.iter_mut() {
                    *p = *p + delta;
                }
            }
            2 => {
                let fixed = self.output[1 - i];
                let old = self.output[i] - fixed;
                let new = old + delta;
                let norm = old.length_sq();
                if norm < COLLINEAR_EPSILON {
                    return None;
                }
                // Complex ratio new / old: the rotation and scale about `fixed`.
                let zr = new.dot(old) / norm;
                let zi = old.cross(new) / norm;
                for j in 2..MAX_HANDLES {
                    let v = self.output[j] - fixed;
                    out.output[j] = fixed + Vector2::new(zr * v.x - zi * v.y, zr * v.y + zi * v.x);
                }
                out.output[i] = self.output[i] + delta;
            }
            3 => {
                let mut others = (0..3).filter(|&j| j != i);
                let (f0, f1) = match (others.next(), others.next()) {
                    (Some(a), Some(b)) => (self.output[a], self.output[b]),
                    _ => return None,
                };
                let active = self.output[i];
                let edge = f1 - f0;
                let base = edge.cross(active - f0);
                // Barycentric weight of the active handle at the hidden slot.
                let w = if base.abs() < COLLINEAR_EPSILON {
                    1.0
                } else {
                    edge.cross(self.output[3] - f0) / base
                };
                out.output[3] = self.output[3] + delta * w;
                out.output[i] = active + delta;
            }
            _ => out.output[i] = self.output[i] + delta,
        }
        out.matrix().filter(|m| m.is_finite())?;
        Some(out)
    }

    /// Points after repositioning handle `i` by `delta`. `inverse` is the
    /// inverse of this layout's matrix, which the result keeps.
    pub fn move_drag(&self, i: usize, delta: Vector2, inverse: &Matrix3) -> Option<Self> {
        if i >= self.count {
            return None;
        }
        let mut out = *self;
        out.output[i] = self.output[i] + delta;
        out.settle(i, inverse)?;
        Some(out)
    }

    /// Nudge output `i` off any line through two other slots, then pull its
    /// input back through `inverse`.
    fn settle(&mut self, i: usize, inverse: &Matrix3) -> Option<()> {
        let wanted = self.output[i];
        let offsets = [0.0, -NUDGE, NUDGE];
        let placed = offsets
            .iter()
            .flat_map(|&dy| offsets.iter().map(move |&dx| wanted + Vector2::new(dx, dy)))
            .find(|&p| self.is_free(i, p))?;
        self.output[i] = placed;
        self.input[i] = inverse.transform_vector2(placed);
        (self.input[i].is_finite() && self.matrix().is_some()).then_some(())
    }

    fn is_free(&self, i: usize, p: Vector2) -> bool {
        let others: Vec<Vector2> =
            (0..MAX_HANDLES).filter(|&j| j != i).map(|j| self.output[j]).collect();
        others.iter().enumerate().all(|(a, &pa)| {
            others[a + 1..]
                .iter()
                .all(|&pb| (pa - p).cross(pb - p).abs() > COLLINEAR_EPSILON)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> HandlePoints {
        HandlePoints::new([
            Vector2::new(0.0, 0.0),
            Vector2::new(100.0, 0.0),
            Vector2::new(0.0, 100.0),
            Vector2::new(100.0, 100.0),
        ])
    }

    fn maps(points: &HandlePoints, from: Vector2, to: Vector2) -> bool {
        let m = points.matrix().expect("matrix");
        m.transform_vector2(from).distance(to) < 1e-6
    }

    #[test]
    fn add_keeps_the_identity() {
        let mut points = square();
        assert_eq!(points.add(Vector2::new(30.0, 40.0)), Some(0));
        assert_eq!(points.add(Vector2::new(70.0, 20.0)), Some(1));
        assert_eq!(points.count, 2);
        assert!(points.matrix().expect("matrix").approx_eq(&Matrix3::IDENTITY, 1e-9));
        assert_eq!(points.visible()[0], Vector2::new(30.0, 40.0));
    }

    #[test]
    fn add_nudges_collinear_handles() {
        let mut points = square();
        // On the line through hidden slots 1 and 2.
        let i = points.add(Vector2::new(50.0, 50.0)).expect("added");
        let p = points.output[i];
        assert!(p != Vector2::new(50.0, 50.0));
        assert!(p.distance(Vector2::new(50.0, 50.0)) < 0.2);
    }

    #[test]
    fn fifth_handle_is_refused() {
        let mut points = square();
        for p in [(10.0, 20.0), (80.0, 15.0), (20.0, 70.0), (75.0, 80.0)] {
            assert!(points.add(Vector2::new(p.0, p.1)).is_some());
        }
        assert!(points.add(Vector2::new(40.0, 60.0)).is_none());
        assert_eq!(points.count, MAX_HANDLES);
    }

    #[test]
    fn one_handle_translates() {
        let mut points = square();
        points.add(Vector2::new(30.0, 40.0));
        let out = points.transform_drag(0, Vector2::new(5.0, -3.0)).expect("drag");
        let m = out.matrix().expect("matrix");
        assert!(m.approx_eq(&Matrix3::from_translation(5.0, -3.0), 1e-9));
    }

    #[test]
    fn two_handles_rotate_about_the_other() {
        let mut points = square();
        points.add(Vector2::new(20.0, 50.0));
        points.add(Vector2::new(80.0, 50.0));
        // Quarter turn of handle 1 about handle 0.
        let out = points.transform_drag(1, Vector2::new(-60.0, 60.0)).expect("drag");
        let m = out.matrix().expect("matrix");
        let expected = Matrix3::rotate_about(20.0, 50.0, std::f64::consts::FRAC_PI_2);
        assert!(m.approx_eq(&expected, 1e-9));
    }

    #[test]
    fn three_handles_stay_affine() {
        let mut points = square();
        points.add(Vector2::new(10.0, 10.0));
        points.add(Vector2::new(90.0, 20.0));
        points.add(Vector2::new(30.0, 80.0));
        let out = points.transform_drag(1, Vector2::new(10.0, 15.0)).expect("drag");
        let m = out.matrix().expect("matrix");
        assert!(m.coeff[2][0].abs() < 1e-9 && m.coeff[2][1].abs() < 1e-9);
        assert!(maps(&out, Vector2::new(10.0, 10.0), Vector2::new(10.0, 10.0)));
        assert!(maps(&out, Vector2::new(90.0, 20.0), Vector2::new(100.0, 35.0)));
        assert!(maps(&out, Vector2::new(30.0, 80.0), Vector2::new(30.0, 80.0)));
    }

    #[test]
    fn four_handles_move_only_the_active_one() {
        let mut points = square();
        for p in [(10.0, 20.0), (80.0, 15.0), (20.0, 70.0), (75.0, 80.0)] {
            points.add(Vector2::new(p.0, p.1));
        }
        let out = points.transform_drag(3, Vector2::new(10.0, 5.0)).expect("drag");
        assert_eq!(out.output[..3], points.output[..3]);
        assert!(maps(&out, Vector2::new(75.0, 80.0), Vector2::new(85.0, 85.0)));
        assert!(!out.matrix().expect("matrix").is_affine());
    }

    #[test]
    fn move_keeps_the_transform() {
        let mut points = square();
        points.add(Vector2::new(20.0, 50.0));
        let points = points.transform_drag(0, Vector2::new(10.0, 0.0)).expect("drag");
        let before = points.matrix().expect("matrix");
        let inverse = before.invert().expect("inverse");
        let out = points.move_drag(0, Vector2::new(0.0, 25.0), &inverse).expect("move");
        assert_eq!(out.output[0], Vector2::new(30.0, 75.0));
        assert!(out.matrix().expect("matrix").approx_eq(&before, 1e-9));
    }

    #[test]
    fn remove_keeps_the_transform() {
        let mut points = square();
        points.add(Vector2::new(20.0, 50.0));
        points.add(Vector2::new(80.0, 50.0));
        let points = points.transform_drag(1, Vector2::new(-60.0, 60.0)).expect("drag");
        let before = points.matrix().expect("matrix");
        let mut removed = points;
        assert!(removed.remove(0));
        assert_eq!(removed.count, 1);
        assert_eq!(removed.visible()[0], points.output[1]);
        assert!(removed.matrix().expect("matrix").approx_eq(&before, 1e-9));
        assert!(!removed.remove(1));
    }
}
