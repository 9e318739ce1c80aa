// ============================================================================
// TRANSFORM RESAMPLING: inverse-mapped sampling through a Matrix3
// ============================================================================
//
// Both the live preview and the final commit resample the same way: walk the
// destination pixels row by row (rayon over rows), push each pixel centre
// through the inverse matrix, and sample the source there. Pixels that land
// behind the projection plane or outside the source stay transparent.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::PixelRect;
use super::boundary::{compute_boundary, Boundary, ResizePolicy};
use super::matrix::Matrix3;

/// Interpolation used when sampling the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

impl Interpolation {
    pub fn label(&self) -> String {
        match self {
            Interpolation::Nearest  => t!("interpolation.nearest"),
            Interpolation::Bilinear => t!("interpolation.bilinear"),
            Interpolation::Bicubic  => t!("interpolation.bicubic"),
        }
    }

    pub fn all() -> &'static [Interpolation] {
        &[Interpolation::Nearest, Interpolation::Bilinear, Interpolation::Bicubic]
    }
}

/// Whether the matrix maps the item to the result or the result to the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformDirection {
    #[default]
    Forward,
    /// Corrective mode: the grid describes where the result comes from.
    Backward,
}

impl TransformDirection {
    pub fn label(&self) -> String {
        match self {
            TransformDirection::Forward  => t!("direction.forward"),
            TransformDirection::Backward => t!("direction.backward"),
        }
    }

    /// The matrix that actually moves pixels.
    pub fn apply(&self, matrix: &Matrix3) -> Option<Matrix3> {
        match self {
            TransformDirection::Forward => Some(*matrix),
            TransformDirection::Backward => matrix.invert(),
        }
    }
}

/// Resample `src` (whose top-left pixel sits at `src_origin`) into the
/// destination rectangle `dst`, where `inverse` maps destination
/// coordinates back to source (image) coordinates.
pub fn warp_into(
    src: &RgbaImage,
    src_origin: (i32, i32),
    inverse: &Matrix3,
    dst: PixelRect,
    interpolation: Interpolation,
) -> RgbaImage {
    let mut out = RgbaImage::new(dst.width, dst.height);
    if dst.is_empty() || src.width() == 0 || src.height() == 0 {
        return out;
    }

    let h = inverse.coeff;
    let row_bytes = dst.width as usize * 4;
    let (ox, oy) = (src_origin.0 as f64, src_origin.1 as f64);

    out.as_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row_idx, row)| {
            let v = dst.y as f64 + row_idx as f64 + 0.5;
            let base_x = h[0][1] * v + h[0][2];
            let base_y = h[1][1] * v + h[1][2];
            let base_w = h[2][1] * v + h[2][2];

            for col in 0..dst.width as usize {
                let u = dst.x as f64 + col as f64 + 0.5;
                let w = h[2][0] * u + base_w;
                if w <= 1e-8 {
                    continue;
                }
                let sx = (h[0][0] * u + base_x) / w - ox - 0.5;
                let sy = (h[1][0] * u + base_y) / w - oy - 0.5;
                if let Some(px) = sample(src, sx as f32, sy as f32, interpolation) {
                    row[col * 4..col * 4 + 4].copy_from_slice(&px.0);
                }
            }
        });
    out
}

/// Sample `img` at continuous pixel coordinates (pixel centres at integers).
/// `None` when the footprint misses the image entirely.
pub fn sample(img: &RgbaImage, x: f32, y: f32, interpolation: Interpolation) -> Option<Rgba<u8>> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    if x0 < -1 || y0 < -1 || x0 >= w || y0 >= h {
        return None;
    }

    let fetch = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= w || sy >= h {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let px = match interpolation {
        Interpolation::Nearest => {
            let nx = x.round() as i32;
            let ny = y.round() as i32;
            if nx < 0 || ny < 0 || nx >= w || ny >= h {
                return None;
            }
            fetch(nx, ny)
        }
        Interpolation::Bilinear => {
            let fx = x - x0 as f32;
            let fy = y - y0 as f32;
            let tl = premultiply(fetch(x0, y0));
            let tr = premultiply(fetch(x0 + 1, y0));
            let bl = premultiply(fetch(x0, y0 + 1));
            let br = premultiply(fetch(x0 + 1, y0 + 1));
            let mut acc = [0.0f32; 4];
            for c in 0..4 {
                let top = tl[c] + (tr[c] - tl[c]) * fx;
                let bot = bl[c] + (br[c] - bl[c]) * fx;
                acc[c] = top + (bot - top) * fy;
            }
            unpremultiply(acc)
        }
        Interpolation::Bicubic => {
            let wx = catmull_rom_weights(x - x0 as f32);
            let wy = catmull_rom_weights(y - y0 as f32);
            let mut acc = [0.0f32; 4];
            for (j, wyj) in wy.iter().enumerate() {
                for (i, wxi) in wx.iter().enumerate() {
                    let p = premultiply(fetch(x0 - 1 + i as i32, y0 - 1 + j as i32));
                    let wgt = wxi * wyj;
                    for c in 0..4 {
                        acc[c] += p[c] * wgt;
                    }
                }
            }
            unpremultiply(acc)
        }
    };

    Some(Rgba(px.map(|v| v.round().clamp(0.0, 255.0) as u8)))
}

#[inline]
fn premultiply(p: [f32; 4]) -> [f32; 4] {
    let a = p[3] / 255.0;
    [p[0] * a, p[1] * a, p[2] * a, p[3]]
}

#[inline]
fn unpremultiply(p: [f32; 4]) -> [f32; 4] {
    if p[3] <= 0.0 {
        return [0.0; 4];
    }
    let a = p[3].min(255.0) / 255.0;
    [p[0] / a, p[1] / a, p[2] / a, p[3]]
}

/// Catmull-Rom basis weights for taps at -1, 0, +1, +2 around parameter `t`.
#[inline]
fn catmull_rom_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
         1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
         0.5 * t3 - 0.5 * t2,
    ]
}

/// Transform a whole item: the commit-side counterpart of the preview.
///
/// Returns the new pixels and their placement, or `None` when the result
/// would be empty or the matrix cannot be inverted.
pub fn transform_pixels(
    src: &RgbaImage,
    offset: (i32, i32),
    matrix: &Matrix3,
    direction: TransformDirection,
    policy: ResizePolicy,
    interpolation: Interpolation,
) -> Option<(RgbaImage, Boundary)> {
    let m = direction.apply(matrix)?;
    let (x1, y1) = offset;
    let x2 = x1 + src.width() as i32;
    let y2 = y1 + src.height() as i32;
    let bounds = compute_boundary(&m, policy, x1, y1, x2, y2)?;
    let inverse = m.invert()?;
    let pixels = warp_into(src, offset, &inverse, bounds.into(), interpolation);
    Some((pixels, bounds))
}
