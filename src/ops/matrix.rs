// ============================================================================
// MATRIX3: homogeneous 2D transforms (affine and projective)
// ============================================================================
//
// Row-major, column vectors:
//
//   | m00 m01 m02 |   | x |
//   | m10 m11 m12 | * | y |
//   | m20 m21 m22 |   | 1 |
//
// `a * b` applies `b` first. The in-place helpers (translate, scale, rotate,
// shear) pre-multiply, so `m.translate(..)` means "after m, translate".

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Below this |determinant| a matrix is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// Below this |w| the homogeneous divide is treated as a point at infinity.
pub const W_EPSILON: f64 = 1e-12;

// ---------------------------------------------------------------------------
//  Vector2
// ---------------------------------------------------------------------------

/// A point or direction in image space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Vector2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z component of the 3D cross product.
    pub fn cross(self, other: Vector2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn length_sq(self) -> f64 {
        self.dot(self)
    }

    pub fn distance(self, other: Vector2) -> f64 {
        (self - other).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_pos2(self) -> egui::Pos2 {
        egui::pos2(self.x as f32, self.y as f32)
    }
}

impl Add for Vector2 {
    type Output = Vector2;
    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;
    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector2 {
    type Output = Vector2;
    fn mul(self, rhs: f64) -> Vector2 {
        Vector2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vector2 {
    type Output = Vector2;
    fn neg(self) -> Vector2 {
        Vector2::new(-self.x, -self.y)
    }
}

impl From<(f64, f64)> for Vector2 {
    fn from((x, y): (f64, f64)) -> Self {
        Vector2::new(x, y)
    }
}

// ---------------------------------------------------------------------------
//  Matrix3
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix3 {
    pub coeff: [[f64; 3]; 3],
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix3 {
    pub const IDENTITY: Matrix3 = Matrix3 {
        coeff: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    pub const fn new(coeff: [[f64; 3]; 3]) -> Self {
        Self { coeff }
    }

    pub const fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn from_translation(x: f64, y: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.translate(x, y);
        m
    }

    pub fn from_scale(sx: f64, sy: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.scale(sx, sy);
        m
    }

    pub fn from_rotation(theta: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.rotate(theta);
        m
    }

    /// `self * rhs`: `rhs` is applied first.
    pub fn multiply(&self, rhs: &Matrix3) -> Matrix3 {
        let a = &self.coeff;
        let b = &rhs.coeff;
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        Matrix3 { coeff: out }
    }

    /// Append a translation: `self = T(x, y) * self`.
    pub fn translate(&mut self, x: f64, y: f64) {
        let w = self.coeff[2];
        for j in 0..3 {
            self.coeff[0][j] += x * w[j];
            self.coeff[1][j] += y * w[j];
        }
    }

    /// Append a scale about the origin.
    pub fn scale(&mut self, sx: f64, sy: f64) {
        for j in 0..3 {
            self.coeff[0][j] *= sx;
            self.coeff[1][j] *= sy;
        }
    }

    /// Append a rotation about the origin. Positive angles turn +x towards +y,
    /// which is clockwise on screen.
    pub fn rotate(&mut self, theta: f64) {
        let (sin, cos) = theta.sin_cos();
        for j in 0..3 {
            let r0 = self.coeff[0][j];
            let r1 = self.coeff[1][j];
            self.coeff[0][j] = cos * r0 - sin * r1;
            self.coeff[1][j] = sin * r0 + cos * r1;
        }
    }

    /// Append a horizontal shear: x' = x + amount * y.
    pub fn xshear(&mut self, amount: f64) {
        for j in 0..3 {
            self.coeff[0][j] += amount * self.coeff[1][j];
        }
    }

    /// Append a vertical shear: y' = y + amount * x.
    pub fn yshear(&mut self, amount: f64) {
        for j in 0..3 {
            self.coeff[1][j] += amount * self.coeff[0][j];
        }
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.coeff;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse, or `None` when the matrix is singular or not finite.
    pub fn invert(&self) -> Option<Matrix3> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let m = &self.coeff;
        let inv = 1.0 / det;
        let out = Matrix3::new([
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
            ],
        ]);
        out.is_finite().then_some(out)
    }

    /// Homogeneous image of (x, y, 1).
    pub fn transform_homogeneous(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let m = &self.coeff;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
            m[2][0] * x + m[2][1] * y + m[2][2],
        )
    }

    /// Transform a point with the homogeneous divide. When `w` is (nearly)
    /// zero the point lies at infinity: each coordinate becomes an infinity
    /// carrying the sign of its numerator.
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        let (hx, hy, w) = self.transform_homogeneous(x, y);
        if w.abs() < W_EPSILON {
            return (
                f64::INFINITY.copysign(hx),
                f64::INFINITY.copysign(hy),
            );
        }
        (hx / w, hy / w)
    }

    pub fn transform_vector2(&self, p: Vector2) -> Vector2 {
        let (x, y) = self.transform_point(p.x, p.y);
        Vector2::new(x, y)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the bottom row is (0, 0, 1).
    pub fn is_affine(&self) -> bool {
        self.coeff[2][0] == 0.0 && self.coeff[2][1] == 0.0 && self.coeff[2][2] == 1.0
    }

    pub fn is_finite(&self) -> bool {
        self.coeff.iter().flatten().all(|v| v.is_finite())
    }

    pub fn approx_eq(&self, other: &Matrix3, eps: f64) -> bool {
        self.coeff
            .iter()
            .flatten()
            .zip(other.coeff.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }

    /// Rotation by `angle` about (cx, cy).
    pub fn rotate_about(cx: f64, cy: f64, angle: f64) -> Matrix3 {
        let mut m = Self::IDENTITY;
        m.translate(-cx, -cy);
        m.rotate(angle);
        m.translate(cx, cy);
        m
    }

    /// Projective map from the rectangle (x, y, w, h) onto the quad `t`, whose
    /// points correspond to the rectangle's top-left, top-right, bottom-left and
    /// bottom-right corners in that order.
    ///
    /// The rectangle is first normalised to the unit square; the unit square is
    /// then mapped onto the quad in closed form. Degenerate quads produce a
    /// singular (but finite) matrix rather than an error.
    pub fn perspective(x: f64, y: f64, w: f64, h: f64, t: &[Vector2; 4]) -> Matrix3 {
        let mut m = Self::IDENTITY;
        let sx = if w > 0.0 { 1.0 / w } else { 1.0 };
        let sy = if h > 0.0 { 1.0 / h } else { 1.0 };
        m.translate(-x, -y);
        m.scale(sx, sy);

        let dx1 = t[1].x - t[3].x;
        let dx2 = t[2].x - t[3].x;
        let dx3 = t[0].x - t[1].x + t[3].x - t[2].x;
        let dy1 = t[1].y - t[3].y;
        let dy2 = t[2].y - t[3].y;
        let dy3 = t[0].y - t[1].y + t[3].y - t[2].y;

        let mut trafo = [[0.0; 3]; 3];

        if dx3 == 0.0 && dy3 == 0.0 {
            // Parallelogram: the map is affine.
            trafo[0] = [t[1].x - t[0].x, t[3].x - t[1].x, t[0].x];
            trafo[1] = [t[1].y - t[0].y, t[3].y - t[1].y, t[0].y];
            trafo[2] = [0.0, 0.0, 1.0];
        } else {
            let det2 = dx1 * dy2 - dy1 * dx2;
            let g = if det2 == 0.0 { 1.0 } else { (dx3 * dy2 - dy3 * dx2) / det2 };
            let h = if det2 == 0.0 { 1.0 } else { (dx1 * dy3 - dy1 * dx3) / det2 };

            trafo[0] = [t[1].x - t[0].x + g * t[1].x, t[2].x - t[0].x + h * t[2].x, t[0].x];
            trafo[1] = [t[1].y - t[0].y + g * t[1].y, t[2].y - t[0].y + h * t[2].y, t[0].y];
            trafo[2] = [g, h, 1.0];
        }

        Matrix3::new(trafo).multiply(&m)
    }

    /// Projective map taking each `input[i]` to `output[i]`, found by solving
    /// the 8x8 linear system with m22 fixed at 1. `None` when the points are
    /// degenerate (three collinear, coincident, ...).
    pub fn generic(input: &[Vector2; 4], output: &[Vector2; 4]) -> Option<Matrix3> {
        let mut a = [[0.0f64; 9]; 8];
        for i in 0..4 {
            let (x, y) = (input[i].x, input[i].y);
            let (u, v) = (output[i].x, output[i].y);
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
        }

        // Gaussian elimination with partial pivoting.
        for col in 0..8 {
            let pivot = (col..8)
                .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
                .unwrap_or(col);
            if a[pivot][col].abs() < SINGULAR_EPSILON {
                return None;
            }
            a.swap(col, pivot);
            for row in 0..8 {
                if row != col {
                    let f = a[row][col] / a[col][col];
                    if f != 0.0 {
                        for k in col..9 {
                            a[row][k] -= f * a[col][k];
                        }
                    }
                }
            }
        }

        let s: Vec<f64> = (0..8).map(|i| a[i][8] / a[i][i]).collect();
        let m = Matrix3::new([
            [s[0], s[1], s[2]],
            [s[3], s[4], s[5]],
            [s[6], s[7], 1.0],
        ]);
        (m.is_finite() && m.invert().is_some()).then_some(m)
    }

    /// Split into translation, rotation, scale, shear and perspective so that
    /// `decompose().to_matrix()` reproduces the matrix (up to the m22 scale).
    pub fn decompose(&self) -> Option<Decomposition> {
        let m22 = self.coeff[2][2];
        if m22.abs() < SINGULAR_EPSILON || self.invert().is_none() {
            return None;
        }
        let n: Vec<f64> = self.coeff.iter().flatten().map(|v| v / m22).collect();
        let (tx, ty) = (n[2], n[5]);
        let (g, h) = (n[6], n[7]);

        // M = A * P with P = [[1,0,0],[0,1,0],[g,h,1]].
        let a = n[0] - tx * g;
        let b = n[1] - tx * h;
        let c = n[3] - ty * g;
        let d = n[4] - ty * h;

        let scale_x = a.hypot(c);
        if scale_x < SINGULAR_EPSILON {
            return None;
        }
        let angle = c.atan2(a);
        let (sin, cos) = angle.sin_cos();
        let k = cos * b + sin * d;
        let scale_y = cos * d - sin * b;
        if scale_y.abs() < SINGULAR_EPSILON {
            return None;
        }

        Some(Decomposition {
            translate: Vector2::new(tx, ty),
            angle,
            scale: Vector2::new(scale_x, scale_y),
            shear: k / scale_x,
            perspective: Vector2::new(g, h),
        })
    }
}

impl Mul for Matrix3 {
    type Output = Matrix3;
    fn mul(self, rhs: Matrix3) -> Matrix3 {
        self.multiply(&rhs)
    }
}

/// Factors of `T(translate) * R(angle) * S(scale) * Shx(shear) * P(perspective)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub translate: Vector2,
    /// Radians, in (-π, π].
    pub angle: f64,
    /// `scale.y` is negative for mirrored transforms.
    pub scale: Vector2,
    /// Horizontal shear applied before scaling.
    pub shear: f64,
    /// Bottom row (g, h) of the perspective factor.
    pub perspective: Vector2,
}

impl Decomposition {
    pub fn to_matrix(&self) -> Matrix3 {
        let mut m = Matrix3::new([
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [self.perspective.x, self.perspective.y, 1.0],
        ]);
        m.xshear(self.shear);
        m.scale(self.scale.x, self.scale.y);
        m.rotate(self.angle);
        m.translate(self.translate.x, self.translate.y);
        m
    }
}
