use serde::{Deserialize, Serialize};

use crate::ops::matrix::{Matrix3, Vector2};

/// Composition guides drawn inside the transform grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GuidesType {
    #[default]
    None,
    CenterLines,
    RuleOfThirds,
    RuleOfFifths,
    GoldenSections,
    DiagonalLines,
    /// `grid_size` evenly spaced lines in each direction.
    NumberOfLines,
    /// A line every `grid_size` pixels.
    Spacing,
}

const MAX_GUIDE_LINES: usize = 256;

impl GuidesType {
    pub fn label(&self) -> String {
        match self {
            GuidesType::None => t!("guides.none"),
            GuidesType::CenterLines => t!("guides.center"),
            GuidesType::RuleOfThirds => t!("guides.thirds"),
            GuidesType::RuleOfFifths => t!("guides.fifths"),
            GuidesType::GoldenSections => t!("guides.golden"),
            GuidesType::DiagonalLines => t!("guides.diagonal"),
            GuidesType::NumberOfLines => t!("guides.n_lines"),
            GuidesType::Spacing => t!("guides.spacing"),
        }
    }

    pub fn all() -> &'static [GuidesType] {
        &[
            GuidesType::None,
            GuidesType::CenterLines,
            GuidesType::RuleOfThirds,
            GuidesType::RuleOfFifths,
            GuidesType::GoldenSections,
            GuidesType::DiagonalLines,
            GuidesType::NumberOfLines,
            GuidesType::Spacing,
        ]
    }

    /// Whether `grid_size` means anything for this guide type.
    pub fn uses_grid_size(&self) -> bool {
        matches!(self, GuidesType::NumberOfLines | GuidesType::Spacing)
    }

    /// Guide segments for the untransformed rectangle (x1, y1)-(x2, y2).
    pub fn segments(&self, grid_size: u32, x1: f64, y1: f64, x2: f64, y2: f64) -> Vec<(Vector2, Vector2)> {
        let (w, h) = (x2 - x1, y2 - y1);
        if w <= 0.0 || h <= 0.0 {
            return Vec::new();
        }

        let fractions: Vec<f64> = match self {
            GuidesType::None | GuidesType::DiagonalLines | GuidesType::Spacing => Vec::new(),
            GuidesType::CenterLines => vec![0.5],
            GuidesType::RuleOfThirds => vec![1.0 / 3.0, 2.0 / 3.0],
            GuidesType::RuleOfFifths => (1..5).map(|i| i as f64 / 5.0).collect(),
            GuidesType::GoldenSections => {
                let phi = (1.0 + 5f64.sqrt()) / 2.0;
                vec![1.0 - 1.0 / phi, 1.0 / phi]
            }
            GuidesType::NumberOfLines => {
                let n = (grid_size.max(1) as usize).min(MAX_GUIDE_LINES);
                (1..=n).map(|i| i as f64 / (n + 1) as f64).collect()
            }
        };

        let mut out = Vec::new();
        for f in &fractions {
            let x = x1 + w * f;
            out.push((Vector2::new(x, y1), Vector2::new(x, y2)));
        }
        for f in &fractions {
            let y = y1 + h * f;
            out.push((Vector2::new(x1, y), Vector2::new(x2, y)));
        }

        match self {
            GuidesType::DiagonalLines => {
                let s = w.min(h);
                out.push((Vector2::new(x1, y1), Vector2::new(x1 + s, y1 + s)));
                out.push((Vector2::new(x2, y1), Vector2::new(x2 - s, y1 + s)));
                out.push((Vector2::new(x1, y2), Vector2::new(x1 + s, y2 - s)));
                out.push((Vector2::new(x2, y2), Vector2::new(x2 - s, y2 - s)));
            }
            GuidesType::Spacing => {
                let step = grid_size.max(1) as f64;
                let mut x = x1 + step;
                while x < x2 && out.len() < MAX_GUIDE_LINES {
                    out.push((Vector2::new(x, y1), Vector2::new(x, y2)));
                    x += step;
                }
                let mut y = y1 + step;
                while y < y2 && out.len() < 2 * MAX_GUIDE_LINES {
                    out.push((Vector2::new(x1, y), Vector2::new(x2, y)));
                    y += step;
                }
            }
            _ => {}
        }
        out
    }
}

/// Push guide segments through `matrix`, dropping any that leave the
/// finite plane.
pub fn transform_segments(matrix: &Matrix3, segments: &[(Vector2, Vector2)]) -> Vec<(Vector2, Vector2)> {
    segments
        .iter()
        .map(|(a, b)| (matrix.transform_vector2(*a), matrix.transform_vector2(*b)))
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirds_and_center() {
        let segs = GuidesType::RuleOfThirds.segments(0, 0.0, 0.0, 90.0, 30.0);
        assert_eq!(segs.len(), 4);
        assert!(segs[0].0.distance(Vector2::new(30.0, 0.0)) < 1e-9);
        assert!(segs[3].1.distance(Vector2::new(90.0, 20.0)) < 1e-9);
        assert_eq!(GuidesType::CenterLines.segments(0, 0.0, 0.0, 10.0, 10.0).len(), 2);
        assert!(GuidesType::None.segments(4, 0.0, 0.0, 10.0, 10.0).is_empty());
    }

    #[test]
    fn grid_size_driven() {
        assert_eq!(GuidesType::NumberOfLines.segments(3, 0.0, 0.0, 100.0, 100.0).len(), 6);
        // 10, 20, ..., 90 in each direction
        assert_eq!(GuidesType::Spacing.segments(10, 0.0, 0.0, 100.0, 100.0).len(), 18);
        assert_eq!(GuidesType::DiagonalLines.segments(0, 0.0, 0.0, 50.0, 20.0).len(), 4);
        assert!(GuidesType::Spacing.uses_grid_size());
    }

    #[test]
    fn segments_follow_matrix() {
        let segs = GuidesType::CenterLines.segments(0, 0.0, 0.0, 10.0, 10.0);
        let moved = transform_segments(&Matrix3::from_translation(5.0, 0.0), &segs);
        assert_eq!(moved[0].0, Vector2::new(10.0, 0.0));
    }
}
