use egui::{CursorIcon, Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::ops::matrix::{Matrix3, Vector2};

// ============================================================================
// VIEW TRANSFORM: image space <-> screen space
// ============================================================================

/// Maps image coordinates to screen coordinates: `screen = image * scale - offset`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    pub const fn new(scale_x: f64, scale_y: f64, offset_x: f64, offset_y: f64) -> Self {
        Self { scale_x, scale_y, offset_x, offset_y }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    /// View of a canvas drawn into `image_rect` at `zoom`, the way the
    /// editor lays out its canvas widget.
    pub fn from_canvas(image_rect: Rect, zoom: f32) -> Self {
        Self::new(
            zoom as f64,
            zoom as f64,
            -image_rect.min.x as f64,
            -image_rect.min.y as f64,
        )
    }

    pub fn to_screen(&self, p: Vector2) -> Pos2 {
        Pos2::new(
            (p.x * self.scale_x - self.offset_x) as f32,
            (p.y * self.scale_y - self.offset_y) as f32,
        )
    }

    pub fn to_image(&self, p: Pos2) -> Vector2 {
        Vector2::new(
            (p.x as f64 + self.offset_x) / self.scale_x,
            (p.y as f64 + self.offset_y) / self.scale_y,
        )
    }

    /// Mean scale, for converting screen distances to image distances.
    pub fn scale(&self) -> f64 {
        (self.scale_x.abs() + self.scale_y.abs()) * 0.5
    }

    pub fn matrix(&self) -> Matrix3 {
        let mut m = Matrix3::from_scale(self.scale_x, self.scale_y);
        m.translate(-self.offset_x, -self.offset_y);
        m
    }
}

// ============================================================================
// HANDLES
// ============================================================================

/// Quad corner, in corner order (top-left, top-right, bottom-left, bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [Corner::TopLeft, Corner::TopRight, Corner::BottomLeft, Corner::BottomRight];

    pub fn index(self) -> usize {
        match self {
            Corner::TopLeft => 0,
            Corner::TopRight => 1,
            Corner::BottomLeft => 2,
            Corner::BottomRight => 3,
        }
    }

    /// (this, left, right, opposite) corner indices, walking the outline.
    pub fn neighbours(self) -> (usize, usize, usize, usize) {
        match self {
            Corner::TopLeft => (0, 1, 2, 3),
            Corner::TopRight => (1, 3, 0, 2),
            Corner::BottomLeft => (2, 0, 3, 1),
            Corner::BottomRight => (3, 2, 1, 0),
        }
    }
}

/// Quad side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Top, Side::Right, Side::Bottom, Side::Left];

    /// The two corner indices on this side, left then right as seen from
    /// inside the quad.
    pub fn corners(self) -> (usize, usize) {
        match self {
            Side::Top => (1, 0),
            Side::Right => (3, 1),
            Side::Bottom => (2, 3),
            Side::Left => (0, 2),
        }
    }

    /// Corners of the opposite side, paired with [`Side::corners`].
    pub fn opposite_corners(self) -> (usize, usize) {
        let (l, r) = self.corners();
        (3 - r, 3 - l)
    }
}

/// A grabbable part of the transform grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Handle {
    #[default]
    None,
    /// Scale from a corner.
    Corner(Corner),
    /// Move a single corner freely.
    Perspective(Corner),
    /// Stretch one side.
    Edge(Side),
    /// Shear along one side.
    Shear(Side),
    /// Move the whole quad.
    Center,
    Pivot,
    RotationRing,
    /// A user-placed handle of the Handle family, by slot.
    Point(u8),
}

/// What dragging a handle does; drives cursor and status text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleAction {
    Move,
    Rotate,
    Scale,
    Stretch,
    Shear,
    Perspective,
    Pivot,
    Transform,
}

impl HandleAction {
    pub fn label(&self) -> String {
        match self {
            HandleAction::Move => t!("handle.move"),
            HandleAction::Rotate => t!("handle.rotate"),
            HandleAction::Scale => t!("handle.scale"),
            HandleAction::Stretch => t!("handle.stretch"),
            HandleAction::Shear => t!("handle.shear"),
            HandleAction::Perspective => t!("handle.perspective"),
            HandleAction::Pivot => t!("handle.pivot"),
            HandleAction::Transform => t!("handle.transform"),
        }
    }
}

impl Handle {
    /// Hit priority, lower wins. Small handles beat the large zones.
    pub fn priority(&self) -> u8 {
        match self {
            Handle::Pivot => 0,
            Handle::Perspective(_) | Handle::Point(_) => 1,
            Handle::Corner(_) => 2,
            Handle::Shear(_) => 3,
            Handle::Edge(_) => 4,
            Handle::Center => 5,
            Handle::RotationRing => 6,
            Handle::None => u8::MAX,
        }
    }

    pub fn action(&self) -> Option<HandleAction> {
        match self {
            Handle::None => None,
            Handle::Corner(_) => Some(HandleAction::Scale),
            Handle::Perspective(_) => Some(HandleAction::Perspective),
            Handle::Edge(_) => Some(HandleAction::Stretch),
            Handle::Shear(_) => Some(HandleAction::Shear),
            Handle::Center => Some(HandleAction::Move),
            Handle::Pivot => Some(HandleAction::Pivot),
            Handle::RotationRing => Some(HandleAction::Rotate),
            Handle::Point(_) => Some(HandleAction::Transform),
        }
    }

    pub fn cursor(&self) -> CursorIcon {
        match self {
            Handle::None => CursorIcon::Default,
            Handle::Corner(Corner::TopLeft | Corner::BottomRight) => CursorIcon::ResizeNwSe,
            Handle::Corner(Corner::TopRight | Corner::BottomLeft) => CursorIcon::ResizeNeSw,
            Handle::Edge(Side::Top | Side::Bottom) => CursorIcon::ResizeVertical,
            Handle::Edge(Side::Left | Side::Right) => CursorIcon::ResizeHorizontal,
            Handle::Shear(_) => CursorIcon::AllScroll,
            Handle::Perspective(_) | Handle::Pivot | Handle::Point(_) => CursorIcon::Crosshair,
            Handle::Center => CursorIcon::Move,
            Handle::RotationRing => CursorIcon::Grab,
        }
    }

    /// Shown on the status bar while hovering.
    pub fn status_text(&self) -> String {
        let Some(action) = self.action() else {
            return String::new();
        };
        let hint = match action {
            HandleAction::Move | HandleAction::Rotate | HandleAction::Scale
            | HandleAction::Shear | HandleAction::Perspective => format!(
                " ({}, {})",
                t!("hint.constrain", key = t!("key.shift")),
                t!("hint.from_pivot", key = t!("key.ctrl")),
            ),
            HandleAction::Stretch => format!(" ({})", t!("hint.constrain", key = t!("key.shift"))),
            HandleAction::Pivot => format!(" ({})", t!("hint.snap_pivot", key = t!("key.shift"))),
            HandleAction::Transform => String::new(),
        };
        format!("{}{}", action.label(), hint)
    }
}

// ============================================================================
// HANDLE METRICS
// ============================================================================

pub const HANDLE_LARGE: f64 = 25.0;
pub const HANDLE_MIN: f64 = 6.0;
pub const SNAP_ANGLE: f64 = PI / 12.0;

/// Screen-space sizes for drawing and hit testing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleMetrics {
    pub large: f64,
    pub min: f64,
    pub hit_radius: f64,
    pub snap_angle: f64,
    pub pivot_snap_distance: f64,
    /// Distance of the rotation ring handle beyond the top edge.
    pub rotate_offset: f64,
}

impl Default for HandleMetrics {
    fn default() -> Self {
        Self {
            large: HANDLE_LARGE,
            min: HANDLE_MIN,
            hit_radius: 1.5 * HANDLE_LARGE / 2.0,
            snap_angle: SNAP_ANGLE,
            pivot_snap_distance: 50.0,
            rotate_offset: 30.0,
        }
    }
}

impl HandleMetrics {
    /// Handle size for a quad whose screen bounding box is `w` x `h`.
    pub fn dynamic_size(&self, w: f64, h: f64) -> f64 {
        (w.min(h) / 3.0).clamp(self.min, self.large)
    }

    pub fn corner_size(&self, w: f64, h: f64, with_perspective: bool) -> f64 {
        let size = self.dynamic_size(w, h);
        if with_perspective { size * 1.5 } else { size }
    }

    pub fn perspective_size(&self, w: f64, h: f64, with_corners: bool) -> f64 {
        let size = self.dynamic_size(w, h);
        if with_corners { size * 0.8 } else { size }
    }
}

// ============================================================================
// HANDLE SET / LAYOUT
// ============================================================================

/// Which handle groups a family shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HandleSet {
    pub corners: bool,
    pub perspective: bool,
    pub edges: bool,
    pub shear: bool,
    pub center: bool,
    pub pivot: bool,
    pub rotation: bool,
}

impl HandleSet {
    pub const ALL: HandleSet = HandleSet {
        corners: true,
        perspective: true,
        edges: true,
        shear: true,
        center: true,
        pivot: true,
        rotation: true,
    };
}

/// What a press away from every point handle does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaFunction {
    Move,
    Rotate,
    /// Drag the nearest corner freely.
    Perspective,
}

/// A handle placed on screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedHandle {
    pub handle: Handle,
    pub pos: Pos2,
    pub size: f32,
}

/// Compute screen positions for every shown handle. `quad` is the
/// transformed item rectangle in image space.
pub fn layout(
    quad: &[Vector2; 4],
    center: Vector2,
    pivot: Vector2,
    set: HandleSet,
    metrics: &HandleMetrics,
    view: &ViewTransform,
) -> Vec<PlacedHandle> {
    let s = quad.map(|p| view.to_screen(p));
    let bbox = Rect::from_points(&s);
    let (bw, bh) = (bbox.width() as f64, bbox.height() as f64);
    let mid = |a: usize, b: usize| s[a] + (s[b] - s[a]) * 0.5;
    let quarter = |a: usize, b: usize| s[a] + (s[b] - s[a]) * 0.25;
    let mut out = Vec::with_capacity(20);

    if set.corners {
        let size = metrics.corner_size(bw, bh, set.perspective) as f32;
        for c in Corner::ALL {
            out.push(PlacedHandle { handle: Handle::Corner(c), pos: s[c.index()], size });
        }
    }
    if set.perspective {
        let size = metrics.perspective_size(bw, bh, set.corners) as f32;
        for c in Corner::ALL {
            out.push(PlacedHandle { handle: Handle::Perspective(c), pos: s[c.index()], size });
        }
    }
    if set.edges {
        let size = metrics.dynamic_size(bw, bh) as f32;
        for (side, pos) in [
            (Side::Top, mid(0, 1)),
            (Side::Bottom, mid(2, 3)),
            (Side::Right, mid(1, 3)),
            (Side::Left, mid(2, 0)),
        ] {
            out.push(PlacedHandle { handle: Handle::Edge(side), pos, size });
        }
    }
    if set.shear {
        let size = metrics.dynamic_size(bw, bh) as f32 * 0.6;
        for (side, pos) in [
            (Side::Top, quarter(1, 0)),
            (Side::Bottom, quarter(2, 3)),
            (Side::Right, quarter(3, 1)),
            (Side::Left, quarter(0, 2)),
        ] {
            out.push(PlacedHandle { handle: Handle::Shear(side), pos, size });
        }
    }
    if set.center {
        out.push(PlacedHandle {
            handle: Handle::Center,
            pos: view.to_screen(center),
            size: metrics.dynamic_size(bw, bh) as f32,
        });
    }
    if set.pivot {
        out.push(PlacedHandle {
            handle: Handle::Pivot,
            pos: view.to_screen(pivot),
            size: (metrics.large * 0.5) as f32,
        });
    }
    if set.rotation {
        let top = mid(0, 1);
        let c = view.to_screen(center);
        let dir = if top.distance(c) > 0.1 {
            (top - c).normalized()
        } else {
            Vec2::new(0.0, -1.0)
        };
        out.push(PlacedHandle {
            handle: Handle::RotationRing,
            pos: top + dir * metrics.rotate_offset as f32,
            size: metrics.dynamic_size(bw, bh) as f32,
        });
    }
    out
}

/// Screen placement of user-placed handles, one per visible point.
pub fn point_handles(points: &[Vector2], metrics: &HandleMetrics, view: &ViewTransform) -> Vec<PlacedHandle> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| PlacedHandle {
            handle: Handle::Point(i as u8),
            pos: view.to_screen(*p),
            size: metrics.large as f32,
        })
        .collect()
}

/// Closest handle under the pointer, by priority then distance. A handle
/// catches the pointer within half its size, capped at the hit radius, so
/// the large corner ring stays reachable around a small perspective dot.
pub fn hit_test(handles: &[PlacedHandle], pointer: Pos2, metrics: &HandleMetrics) -> Handle {
    let max_radius = metrics.hit_radius as f32;
    handles
        .iter()
        .filter_map(|h| {
            let d = h.pos.distance(pointer);
            (d < (h.size * 0.5).min(max_radius)).then_some((h.handle, d))
        })
        .min_by(|a, b| {
            a.0.priority()
                .cmp(&b.0.priority())
                .then(a.1.total_cmp(&b.1))
        })
        .map(|(h, _)| h)
        .unwrap_or(Handle::None)
}
