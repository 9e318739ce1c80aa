use egui::Pos2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::families::{TransformFamily, TransformInfo};
use super::guides::GuidesType;
use super::handle_grid::{HandleMode, HandlePoints, MAX_HANDLES};
use super::handles::{self, Handle, HandleMetrics, PlacedHandle, ViewTransform};
use super::history::TransformHistory;
use super::transform_grid::{GridConstraints, GridRect, TransformGrid};
use crate::canvas::{Drawable, Pickable, PixelRect, Selection};
use crate::compositor::PreviewParams;
use crate::error::{TransformError, TransformResult};
use crate::ops::boundary::ResizePolicy;
use crate::ops::matrix::{Matrix3, Vector2};
use crate::ops::transform::{Interpolation, TransformDirection};

// ============================================================================
// TRANSFORM GRID OPTIONS
// ============================================================================

/// Tool options for every transform-grid tool. Persisted by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformGridOptions {
    pub direction: TransformDirection,
    pub interpolation: Interpolation,
    pub clip: ResizePolicy,

    pub show_preview: bool,
    pub composited_preview: bool,
    /// Refresh the preview on every motion event rather than on release.
    pub synchronous_preview: bool,
    pub preview_opacity: f64,
    pub grid_type: GuidesType,
    pub grid_size: u32,

    /// Flip TransformInfo along with the direction so the result stays put.
    pub direction_linked: bool,
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
    /// What a click does in the Handle family.
    pub handle_mode: HandleMode,

    pub metrics: HandleMetrics,
}

impl Default for TransformGridOptions {
    fn default() -> Self {
        Self {
            direction: TransformDirection::Forward,
            interpolation: Interpolation::default(),
            clip: ResizePolicy::Adjust,
            show_preview: true,
            composited_preview: false,
            synchronous_preview: false,
            preview_opacity: 1.0,
            grid_type: GuidesType::NumberOfLines,
            grid_size: 15,
            direction_linked: false,
            constrain_move: false,
            constrain_scale: false,
            constrain_rotate: false,
            constrain_shear: true,
            constrain_perspective: false,
            from_pivot_scale: true,
            from_pivot_shear: true,
            from_pivot_perspective: true,
            corner_snap: true,
            fixed_pivot: false,
            handle_mode: HandleMode::AddTransform,
            metrics: HandleMetrics::default(),
        }
    }
}

/// Held modifier keys. Shift flips the constrain switches and pivot
/// snapping; Ctrl flips the from-pivot switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
}

impl From<egui::Modifiers> for Modifiers {
    fn from(m: egui::Modifiers) -> Self {
        Self { shift: m.shift, ctrl: m.command }
    }
}

impl TransformGridOptions {
    /// Options XOR held modifiers.
    pub fn constraints(&self, m: Modifiers) -> GridConstraints {
        GridConstraints {
            constrain_move: self.constrain_move ^ m.shift,
            constrain_scale: self.constrain_scale ^ m.shift,
            constrain_rotate: self.constrain_rotate ^ m.shift,
            constrain_shear: self.constrain_shear ^ m.shift,
            constrain_perspective: self.constrain_perspective ^ m.shift,
            from_pivot_scale: self.from_pivot_scale ^ m.ctrl,
            from_pivot_shear: self.from_pivot_shear ^ m.ctrl,
            from_pivot_perspective: self.from_pivot_perspective ^ m.ctrl,
            corner_snap: self.corner_snap ^ m.shift,
            fixed_pivot: self.fixed_pivot,
        }
    }
}

// ============================================================================
// GRID SESSION: one activation of a transform tool on one item
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GridState {
    #[default]
    Idle,
    HandleHover(Handle),
    Dragging(Handle),
    Committed,
    Cancelled,
}

/// A drag of one user-placed handle, relative to the layout at the press.
#[derive(Clone, Copy, Debug)]
struct PointDrag {
    origin: HandlePoints,
    inverse: Matrix3,
    index: usize,
    press: Vector2,
}

pub struct GridSession {
    id: Uuid,
    family: TransformFamily,
    options: TransformGridOptions,
    rect: GridRect,
    info: TransformInfo,
    initial_info: TransformInfo,
    drag_origin: Option<TransformInfo>,
    point_drag: Option<PointDrag>,
    last_pointer: Option<Vector2>,
    state: GridState,
    grid: TransformGrid,
    history: TransformHistory,
    modifiers: Modifiers,
    view: ViewTransform,
    dirty: bool,
}

impl GridSession {
    pub fn new(family: TransformFamily, rect: GridRect, options: TransformGridOptions) -> TransformResult<Self> {
        if rect.is_empty() {
            return Err(TransformError::DegenerateTransform("empty item rectangle"));
        }
        let info = family.prepare(rect);
        let mut grid = TransformGrid::new(rect);
        family.configure_widget(&mut grid);
        family.update_widget(&info, &mut grid)?;

        let mut session = Self {
            id: Uuid::new_v4(),
            family,
            options,
            rect,
            initial_info: info.clone(),
            info,
            drag_origin: None,
            point_drag: None,
            last_pointer: None,
            state: GridState::Idle,
            grid,
            history: TransformHistory::default(),
            modifiers: Modifiers::default(),
            view: ViewTransform::identity(),
            dirty: true,
        };
        session.apply_options_to_grid();
        crate::log_info!(
            "[transform {}] {:?} session on ({}, {})-({}, {})",
            session.short_id(), family, rect.x1, rect.y1, rect.x2, rect.y2
        );
        Ok(session)
    }

    /// Session over whatever of `item` the selection leaves to transform.
    pub fn for_drawable(
        family: TransformFamily,
        item: &dyn Drawable,
        selection: Option<&Selection>,
        options: TransformGridOptions,
    ) -> TransformResult<Self> {
        if item.buffer().is_none() {
            return Err(TransformError::UnavailableBuffer);
        }
        let bounds = item
            .mask_bounds(selection)
            .ok_or(TransformError::DegenerateTransform("nothing to transform"))?;
        Self::new(family, bounds.into(), options)
    }

    fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    fn apply_options_to_grid(&mut self) {
        self.grid.constraints = self.options.constraints(self.modifiers);
        self.grid.metrics = self.options.metrics;
        self.grid.guides = self.options.grid_type;
        self.grid.grid_size = self.options.grid_size;
    }

    fn sync_widget(&mut self) {
        if let Err(e) = self.family.update_widget(&self.info, &mut self.grid) {
            crate::log_warn!("[transform {}] widget update skipped: {}", self.short_id(), e);
        }
    }

    // ------------------------------------------------------------------------
    //  Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn family(&self) -> TransformFamily {
        self.family
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn info(&self) -> &TransformInfo {
        &self.info
    }

    pub fn rect(&self) -> GridRect {
        self.rect
    }

    pub fn options(&self) -> &TransformGridOptions {
        &self.options
    }

    pub fn grid(&self) -> &TransformGrid {
        &self.grid
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GridState::Dragging(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, GridState::Committed | GridState::Cancelled)
    }

    pub fn active_handle(&self) -> Handle {
        match self.state {
            GridState::HandleHover(h) | GridState::Dragging(h) => h,
            _ => Handle::None,
        }
    }

    pub fn pivot(&self) -> Vector2 {
        self.info.pivot().unwrap_or_else(|| self.grid.pivot())
    }

    pub fn handles(&self) -> Vec<PlacedHandle> {
        let mut placed = self.grid.placed_handles(&self.view);
        if let Some(points) = self.info.handle_points() {
            placed.extend(handles::point_handles(points.visible(), &self.grid.metrics, &self.view));
        }
        placed
    }

    fn hit_test(&self, pos: Pos2) -> Handle {
        if self.info.handle_points().is_some() {
            handles::hit_test(&self.handles(), pos, &self.grid.metrics)
        } else {
            self.grid.hit_test(pos, &self.view)
        }
    }

    /// Guide segments in screen space, for the host to draw.
    pub fn guide_lines(&self) -> Vec<(Pos2, Pos2)> {
        self.grid
            .guide_segments()
            .into_iter()
            .map(|(a, b)| (self.view.to_screen(a), self.view.to_screen(b)))
            .collect()
    }

    pub fn status_text(&self) -> String {
        let Some(points) = self.info.handle_points() else {
            return self.active_handle().status_text();
        };
        match (self.options.handle_mode, self.active_handle()) {
            (HandleMode::AddTransform, Handle::Point(_)) => match points.count {
                1 => t!("status.handle_move"),
                2 => t!("status.handle_rotate"),
                3 => t!("status.handle_shear"),
                _ => t!("status.handle_perspective"),
            },
            (HandleMode::AddTransform, _) if points.count < MAX_HANDLES => t!("status.add_handle"),
            (HandleMode::Move, Handle::Point(_)) => t!("status.handle_reposition"),
            (HandleMode::Remove, Handle::Point(_)) => t!("status.handle_remove"),
            _ => String::new(),
        }
    }

    // ------------------------------------------------------------------------
    //  Matrices
    // ------------------------------------------------------------------------

    /// Forward matrix derived from the current TransformInfo.
    pub fn matrix(&self) -> Option<Matrix3> {
        self.family.info_to_matrix(&self.info, self.rect).ok()
    }

    /// Matrix that actually moves pixels, honouring the direction option.
    pub fn preview_matrix(&self) -> Option<Matrix3> {
        self.options.direction.apply(&self.matrix()?)
    }

    /// Matrix handed to the commit. `None` while the transform is invalid.
    pub fn final_matrix(&self) -> Option<Matrix3> {
        if !self.transform_valid() {
            return None;
        }
        self.preview_matrix()
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        self.options.clip
    }

    /// Inputs for [`PreviewGraph::sync`](crate::compositor::PreviewGraph::sync).
    /// `None` when there is nothing to preview.
    pub fn preview_params(&self) -> Option<PreviewParams> {
        if !self.options.show_preview || !self.transform_valid() {
            return None;
        }
        let r = self.rect;
        Some(PreviewParams {
            matrix: self.preview_matrix()?,
            clip: self.options.clip,
            rect: PixelRect::from_corners(
                r.x1.floor() as i32,
                r.y1.floor() as i32,
                r.x2.ceil() as i32,
                r.y2.ceil() as i32,
            ),
            opacity: self.options.preview_opacity,
            view: self.view,
            interpolation: self.options.interpolation,
        })
    }

    pub fn transform_valid(&self) -> bool {
        self.grid.is_valid()
    }

    /// Whether the preview should stand in for the original item.
    pub fn should_hide_active_item(&self, item: &dyn Drawable, selection: Option<&Selection>) -> bool {
        self.options.show_preview
            && self.transform_valid()
            && item.as_layer().is_some()
            && selection.is_none_or(|s| s.is_empty())
    }

    // ------------------------------------------------------------------------
    //  Invalidation
    // ------------------------------------------------------------------------

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Consume the dirty flag if the preview is due for a refresh. Without
    /// synchronous preview, refreshes wait for the drag to end.
    pub fn take_dirty(&mut self) -> bool {
        if !self.dirty || (self.is_dragging() && !self.options.synchronous_preview) {
            return false;
        }
        self.dirty = false;
        true
    }

    // ------------------------------------------------------------------------
    //  Configuration
    // ------------------------------------------------------------------------

    pub fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
    }

    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        if modifiers == self.modifiers {
            return;
        }
        self.modifiers = modifiers;
        self.grid.constraints = self.options.constraints(modifiers);
        // Re-run the drag so the constraint change shows immediately.
        if self.is_dragging()
            && let Some(p) = self.last_pointer
            && let Err(e) = self.try_motion(p)
        {
            crate::log_warn!("[transform {}] {}", self.short_id(), e);
        }
    }

    pub fn set_options(&mut self, options: TransformGridOptions) {
        let direction = options.direction;
        let old_direction = self.options.direction;
        self.options = TransformGridOptions { direction: old_direction, ..options };
        self.apply_options_to_grid();
        self.set_direction(direction);
        self.mark_dirty();
    }

    pub fn set_direction(&mut self, direction: TransformDirection) {
        if direction == self.options.direction {
            return;
        }
        if self.options.direction_linked && !self.is_finished() {
            let before = self.info.clone();
            let result = self
                .matrix()
                .and_then(|m| m.invert())
                .ok_or(TransformError::DegenerateTransform("singular matrix"))
                .and_then(|inv| {
                    self.family
                        .matrix_to_info(&mut self.info, &inv, self.rect, self.grid.constraints.fixed_pivot)
                });
            match result {
                Ok(()) => {
                    self.sync_widget();
                    self.push_history(before, direction.label());
                }
                Err(e) => {
                    crate::log_warn!("[transform {}] direction link skipped: {}", self.short_id(), e);
                }
            }
        }
        self.options.direction = direction;
        self.mark_dirty();
    }

    // ------------------------------------------------------------------------
    //  Pointer / keyboard
    // ------------------------------------------------------------------------

    /// Pointer motion in screen space. Returns the hovered or dragged handle.
    pub fn pointer_move(&mut self, pos: Pos2) -> Handle {
        match self.state {
            GridState::Committed | GridState::Cancelled => Handle::None,
            GridState::Dragging(handle) => {
                if let Err(e) = self.try_motion(self.view.to_image(pos)) {
                    crate::log_warn!("[transform {}] motion ignored: {}", self.short_id(), e);
                }
                handle
            }
            GridState::Idle | GridState::HandleHover(_) => {
                let hit = self.hit_test(pos);
                self.state = if hit == Handle::None { GridState::Idle } else { GridState::HandleHover(hit) };
                hit
            }
        }
    }

    /// Press the primary button. Returns `true` when a drag started.
    pub fn button_down(&mut self, pos: Pos2) -> bool {
        if self.is_finished() || self.is_dragging() {
            return false;
        }
        if let Some(points) = self.info.handle_points() {
            return self.point_button_down(points, pos);
        }
        let handle = self.grid.hit_test(pos, &self.view);
        if handle == Handle::None {
            self.state = GridState::Idle;
            return false;
        }
        let press = self.view.to_image(pos);
        self.drag_origin = Some(self.info.clone());
        self.last_pointer = Some(press);
        self.grid.begin_drag(handle, press);
        self.state = GridState::Dragging(handle);
        true
    }

    /// Press in the Handle family: add, remove, or start dragging a handle.
    fn point_button_down(&mut self, mut points: HandlePoints, pos: Pos2) -> bool {
        let press = self.view.to_image(pos);
        let before = self.info.clone();
        let index = match (self.options.handle_mode, self.hit_test(pos)) {
            (HandleMode::Remove, Handle::Point(i)) => {
                if points.remove(i as usize) {
                    self.info.set_handle_points(&points);
                    self.push_history(before, HandleMode::Remove.label());
                    self.sync_widget();
                    self.mark_dirty();
                }
                self.state = GridState::Idle;
                return false;
            }
            (HandleMode::AddTransform, Handle::None) => match points.add(press) {
                Some(i) => {
                    self.info.set_handle_points(&points);
                    i
                }
                None => {
                    crate::log_warn!("[transform {}] handle not placed", self.short_id());
                    return false;
                }
            },
            (HandleMode::AddTransform | HandleMode::Move, Handle::Point(i)) => i as usize,
            _ => {
                self.state = GridState::Idle;
                return false;
            }
        };
        let Some(inverse) = points.matrix().and_then(|m| m.invert()) else {
            self.info = before;
            return false;
        };
        self.drag_origin = Some(before);
        self.point_drag = Some(PointDrag { origin: points, inverse, index, press });
        self.last_pointer = Some(press);
        self.state = GridState::Dragging(Handle::Point(index as u8));
        self.mark_dirty();
        true
    }

    fn point_motion(&mut self, drag: PointDrag, current: Vector2) -> TransformResult<()> {
        let delta = current - drag.press;
        let next = match self.options.handle_mode {
            HandleMode::Move => drag.origin.move_drag(drag.index, delta, &drag.inverse),
            _ => drag.origin.transform_drag(drag.index, delta),
        }
        .ok_or(TransformError::DegenerateTransform("degenerate handle layout"))?;
        self.info.set_handle_points(&next);
        self.sync_widget();
        self.mark_dirty();
        Ok(())
    }

    fn try_motion(&mut self, current: Vector2) -> TransformResult<()> {
        if !self.is_dragging() {
            return Err(TransformError::InvalidDragState);
        }
        if let Some(drag) = self.point_drag {
            self.last_pointer = Some(current);
            return self.point_motion(drag, current);
        }
        if !self.grid.is_dragging() {
            return Err(TransformError::InvalidDragState);
        }
        self.last_pointer = Some(current);
        if !self.grid.motion(current, &self.view) {
            return Err(TransformError::DegenerateTransform("non-finite drag result"));
        }
        let mut next = self.info.clone();
        self.family.widget_changed(&mut next, &self.grid)?;
        self.info = next;
        self.sync_widget();
        self.mark_dirty();
        Ok(())
    }

    pub fn button_up(&mut self, pos: Pos2) {
        let GridState::Dragging(handle) = self.state else {
            return;
        };
        if let Err(e) = self.try_motion(self.view.to_image(pos)) {
            crate::log_warn!("[transform {}] release motion ignored: {}", self.short_id(), e);
        }
        self.finish_drag(handle);
    }

    fn finish_drag(&mut self, handle: Handle) {
        self.grid.end_drag();
        self.point_drag = None;
        self.last_pointer = None;
        if let Some(origin) = self.drag_origin.take() {
            let description = handle.action().map(|a| a.label()).unwrap_or_default();
            self.push_history(origin, description);
        }
        self.sync_widget();
        self.mark_dirty();
        self.state = GridState::HandleHover(handle);
    }

    /// Escape: abort the drag if one is running, otherwise cancel the session.
    pub fn key_escape(&mut self) {
        match self.state {
            GridState::Dragging(handle) => self.abort_drag(handle),
            GridState::Committed | GridState::Cancelled => {}
            _ => self.cancel(),
        }
    }

    fn abort_drag(&mut self, handle: Handle) {
        self.grid.cancel_drag();
        self.point_drag = None;
        if let Some(origin) = self.drag_origin.take() {
            self.info = origin;
        }
        self.last_pointer = None;
        self.sync_widget();
        self.mark_dirty();
        self.state = GridState::HandleHover(handle);
    }

    /// Enter / double-click. Returns the matrix to apply, or `None` when
    /// the transform is invalid (the session stays open).
    pub fn commit(&mut self) -> Option<Matrix3> {
        if self.is_finished() {
            return None;
        }
        if let GridState::Dragging(handle) = self.state {
            self.finish_drag(handle);
        }
        let Some(matrix) = self.final_matrix() else {
            crate::log_warn!("[transform {}] commit refused: invalid transform", self.short_id());
            return None;
        };
        self.state = GridState::Committed;
        crate::log_info!(
            "[transform {}] {}",
            self.short_id(),
            t!("status.committed", family = self.family.label())
        );
        Some(matrix)
    }

    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        if let GridState::Dragging(handle) = self.state {
            self.abort_drag(handle);
        }
        self.state = GridState::Cancelled;
        crate::log_info!("[transform {}] {}", self.short_id(), t!("status.cancelled"));
    }

    // ------------------------------------------------------------------------
    //  Imposed matrices and history
    // ------------------------------------------------------------------------

    /// Replace the transform with `matrix`, carrying the pivot along unless
    /// it is fixed. A degenerate result leaves everything unchanged.
    pub fn impose_matrix(&mut self, matrix: &Matrix3) -> bool {
        if self.is_finished() || self.is_dragging() {
            return false;
        }
        let before = self.info.clone();
        let fixed = self.grid.constraints.fixed_pivot;
        if let Err(e) = self.family.matrix_to_info(&mut self.info, matrix, self.rect, fixed) {
            crate::log_warn!("[transform {}] matrix ignored: {}", self.short_id(), e);
            return false;
        }
        self.sync_widget();
        self.push_history(before, String::new());
        self.mark_dirty();
        true
    }

    /// Compose `op` after the current transform.
    pub fn apply(&mut self, op: &Matrix3) -> bool {
        match self.matrix() {
            Some(m) => self.impose_matrix(&(*op * m)),
            None => false,
        }
    }

    /// Move the pivot without touching the transform. Refused for families
    /// without a pivot.
    pub fn set_pivot(&mut self, pivot: Vector2) -> bool {
        if self.is_finished() || self.is_dragging() || !pivot.is_finite() {
            return false;
        }
        if self.info.pivot().is_none() {
            let e = TransformError::DegenerateTransform("family has no pivot");
            crate::log_warn!("[transform {}] pivot ignored: {}", self.short_id(), e);
            return false;
        }
        let before = self.info.clone();
        self.grid.set_transform(self.grid.matrix(), pivot);
        if let Err(e) = self.family.widget_changed(&mut self.info, &self.grid) {
            crate::log_warn!("[transform {}] pivot ignored: {}", self.short_id(), e);
            self.info = before;
            self.sync_widget();
            return false;
        }
        self.sync_widget();
        self.push_history(before, t!("handle.pivot"));
        self.mark_dirty();
        true
    }

    fn push_history(&mut self, before: TransformInfo, description: String) {
        if before != self.info {
            self.history.push(before, description);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.is_dragging() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_dragging() && self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() || self.is_finished() {
            return false;
        }
        if let Some(description) = self.history.undo(&mut self.info) {
            crate::log_info!("[transform {}] undo {}", self.short_id(), description);
        }
        self.sync_widget();
        self.mark_dirty();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() || self.is_finished() {
            return false;
        }
        if let Some(description) = self.history.redo(&mut self.info) {
            crate::log_info!("[transform {}] redo {}", self.short_id(), description);
        }
        self.sync_widget();
        self.mark_dirty();
        true
    }

    /// Back to the state at activation. Undoable.
    pub fn reset(&mut self) -> bool {
        if self.is_finished() || self.is_dragging() || self.info == self.initial_info {
            return false;
        }
        let before = std::mem::replace(&mut self.info, self.initial_info.clone());
        self.sync_widget();
        self.push_history(before, String::new());
        self.mark_dirty();
        true
    }

    /// Re-centre the default layout on the visible part of the canvas.
    pub fn readjust(&mut self, viewport: egui::Rect) -> bool {
        if self.is_finished() || self.is_dragging() {
            return false;
        }
        let before = self.info.clone();
        self.family.readjust(&mut self.info, &self.view, viewport);
        if self.family.info_to_matrix(&self.info, self.rect).is_err() {
            self.info = before;
            return false;
        }
        self.sync_widget();
        self.push_history(before, String::new());
        self.mark_dirty();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasLayer, PixelRect};
    use crate::components::handles::Corner;
    use image::RgbaImage;

    fn plain_options() -> TransformGridOptions {
        TransformGridOptions {
            constrain_shear: false,
            from_pivot_scale: false,
            from_pivot_shear: false,
            from_pivot_perspective: false,
            corner_snap: false,
            ..TransformGridOptions::default()
        }
    }

    fn corner(s: &GridSession, i: usize) -> Vector2 {
        s.info().corner(i).expect("corner")
    }

    fn session() -> GridSession {
        GridSession::new(TransformFamily::Unified, GridRect::new(0.0, 0.0, 100.0, 100.0), plain_options())
            .expect("session")
    }

    #[test]
    fn hover_then_drag_then_release() {
        let mut s = session();
        assert_eq!(s.pointer_move(Pos2::new(100.0, 100.0)), Handle::Perspective(Corner::BottomRight));
        assert_eq!(s.state(), GridState::HandleHover(Handle::Perspective(Corner::BottomRight)));
        assert!(s.button_down(Pos2::new(100.0, 100.0)));
        s.pointer_move(Pos2::new(120.0, 110.0));
        s.button_up(Pos2::new(130.0, 110.0));
        assert!(corner(&s, 3).distance(Vector2::new(130.0, 110.0)) < 1e-9);
        assert!(s.can_undo());
        assert_eq!(s.state(), GridState::HandleHover(Handle::Perspective(Corner::BottomRight)));
    }

    #[test]
    fn escape_during_drag_restores_bits() {
        let mut s = session();
        s.button_down(Pos2::new(50.0, 20.0));
        let before = s.drag_origin.clone().expect("origin");
        for p in [(60.0, 25.0), (71.3, 29.9), (12.0, -40.0)] {
            s.pointer_move(Pos2::new(p.0, p.1));
        }
        assert_ne!(s.info(), &before);
        s.key_escape();
        assert_eq!(s.info(), &before);
        assert!(!s.is_finished());
        assert!(!s.can_undo());
        s.key_escape();
        assert_eq!(s.state(), GridState::Cancelled);
        assert!(!s.button_down(Pos2::new(50.0, 50.0)));
    }

    #[test]
    fn undo_redo_and_reset() {
        let mut s = session();
        assert!(s.apply(&Matrix3::from_translation(10.0, 0.0)));
        assert!(s.apply(&Matrix3::from_translation(0.0, 10.0)));
        assert!(s.undo());
        assert!(corner(&s, 0).distance(Vector2::new(10.0, 0.0)) < 1e-9);
        assert!(s.redo());
        assert!(corner(&s, 0).distance(Vector2::new(10.0, 10.0)) < 1e-9);
        assert!(s.reset());
        assert_eq!(s.info(), &TransformFamily::Unified.prepare(s.rect()));
        assert!(s.undo());
        assert!(corner(&s, 0).distance(Vector2::new(10.0, 10.0)) < 1e-9);
        assert!(s.can_redo());
    }

    #[test]
    fn modifiers_flip_options() {
        let opts = plain_options();
        let c = opts.constraints(Modifiers { shift: true, ctrl: false });
        assert!(c.constrain_scale && c.corner_snap && !c.from_pivot_scale);
        let c = TransformGridOptions::default().constraints(Modifiers { shift: true, ctrl: true });
        assert!(!c.constrain_shear && !c.from_pivot_scale && !c.corner_snap);
    }

    #[test]
    fn backward_direction_inverts_preview() {
        let mut s = session();
        s.apply(&Matrix3::from_translation(5.0, 0.0));
        s.set_direction(TransformDirection::Backward);
        let m = s.final_matrix().expect("valid");
        assert!(m.approx_eq(&Matrix3::from_translation(-5.0, 0.0), 1e-9));
    }

    #[test]
    fn linked_direction_keeps_result() {
        let mut opts = plain_options();
        opts.direction_linked = true;
        let mut s = GridSession::new(TransformFamily::Unified, GridRect::new(0.0, 0.0, 100.0, 100.0), opts)
            .expect("session");
        let t = Matrix3::rotate_about(50.0, 50.0, 0.4);
        s.impose_matrix(&t);
        s.set_direction(TransformDirection::Backward);
        let m = s.final_matrix().expect("valid");
        assert!(m.approx_eq(&t, 1e-6));
        assert!(s.undo());
    }

    #[test]
    fn invalid_transform_blocks_commit() {
        let mut s = session();
        s.button_down(Pos2::new(0.0, 0.0));
        s.button_up(Pos2::new(150.0, 150.0));
        assert!(!s.transform_valid());
        assert!(s.commit().is_none());
        assert!(!s.is_finished());
        s.undo();
        assert!(s.commit().is_some());
        assert_eq!(s.state(), GridState::Committed);
    }

    #[test]
    fn dirty_waits_for_release_without_sync_preview() {
        let mut s = session();
        assert!(s.take_dirty());
        assert!(!s.take_dirty());
        s.button_down(Pos2::new(50.0, 20.0));
        s.pointer_move(Pos2::new(55.0, 20.0));
        assert!(!s.take_dirty());
        s.button_up(Pos2::new(55.0, 20.0));
        assert!(s.take_dirty());
    }

    #[test]
    fn hide_active_item_rules() {
        let layer = CanvasLayer::new("bg", RgbaImage::new(100, 100), (0, 0));
        let s = GridSession::for_drawable(TransformFamily::Rotate, &layer, None, plain_options())
            .expect("session");
        assert_eq!(s.rect(), GridRect::new(0.0, 0.0, 100.0, 100.0));
        assert!(s.should_hide_active_item(&layer, None));
        let sel = Selection::rect(100, 100, PixelRect::new(10, 10, 20, 20));
        assert!(!s.should_hide_active_item(&layer, Some(&sel)));
    }

    #[test]
    fn empty_rect_is_rejected() {
        assert!(GridSession::new(TransformFamily::Unified, GridRect::new(0.0, 0.0, 0.0, 10.0), plain_options()).is_err());

        let mut layer = CanvasLayer::new("pending", RgbaImage::new(10, 10), (0, 0));
        layer.buffer = None;
        assert!(matches!(
            GridSession::for_drawable(TransformFamily::Unified, &layer, None, plain_options()),
            Err(TransformError::UnavailableBuffer)
        ));
    }

    #[test]
    fn preview_params_follow_options() {
        let mut s = session();
        let p = s.preview_params().expect("params");
        assert_eq!(p.rect, PixelRect::new(0, 0, 100, 100));
        assert!(p.matrix.approx_eq(&Matrix3::IDENTITY, 1e-9));

        s.set_options(TransformGridOptions { show_preview: false, ..plain_options() });
        assert!(s.preview_params().is_none());
    }

    fn family_session(family: TransformFamily, options: TransformGridOptions) -> GridSession {
        GridSession::new(family, GridRect::new(0.0, 0.0, 100.0, 100.0), options).expect("session")
    }

    #[test]
    fn pivot_is_refused_without_a_pivot_slot() {
        for family in [TransformFamily::Perspective, TransformFamily::Generic, TransformFamily::Handle] {
            let mut s = family_session(family, plain_options());
            let before = s.info().clone();
            assert!(!s.set_pivot(Vector2::new(10.0, 20.0)), "{:?}", family);
            assert_eq!(s.info(), &before);
            assert!(s.pivot().distance(Vector2::new(50.0, 50.0)) < 1e-9);
            assert!(!s.can_undo());
        }
        let mut s = family_session(TransformFamily::Rotate, plain_options());
        assert!(s.set_pivot(Vector2::new(10.0, 20.0)));
        assert_eq!(s.pivot(), Vector2::new(10.0, 20.0));
    }

    #[test]
    fn rotate_session_refuses_a_scale() {
        let mut s = family_session(TransformFamily::Rotate, plain_options());
        assert!(!s.apply(&Matrix3::from_scale(2.0, 2.0)));
        assert!(s.matrix().expect("matrix").approx_eq(&Matrix3::IDENTITY, 1e-12));
        assert!(!s.can_undo());
        assert!(s.apply(&Matrix3::rotate_about(50.0, 50.0, 0.25)));
        assert!((s.info().angle().expect("angle") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn fixed_pivot_survives_a_rotation_drag() {
        let options = TransformGridOptions { fixed_pivot: true, ..plain_options() };
        for family in [TransformFamily::Unified, TransformFamily::Rotate] {
            let mut s = family_session(family, options.clone());
            let pivot = Vector2::new(30.0, 60.0);
            assert!(s.set_pivot(pivot));
            let press = match family {
                TransformFamily::Unified => s
                    .handles()
                    .into_iter()
                    .find(|h| h.handle == Handle::RotationRing)
                    .expect("ring")
                    .pos,
                _ => Pos2::new(90.0, 90.0),
            };
            assert!(s.button_down(press));
            assert_eq!(s.active_handle(), Handle::RotationRing);
            s.pointer_move(press + egui::vec2(40.0, 20.0));
            s.button_up(press + egui::vec2(40.0, 25.0));

            let m = s.matrix().expect("matrix");
            assert!(!m.approx_eq(&Matrix3::IDENTITY, 1e-3), "{:?}", family);
            assert!(m.transform_vector2(pivot).distance(pivot) < 1e-6, "{:?}", family);
            assert!(s.pivot().distance(pivot) < 1e-6, "{:?}", family);
        }
    }

    #[test]
    fn handle_family_adds_drags_and_removes() {
        let mut s = family_session(TransformFamily::Handle, plain_options());
        assert!(s.handles().is_empty());
        assert_eq!(s.status_text(), t!("status.add_handle"));

        // A click on empty canvas adds a handle without transforming.
        for p in [Pos2::new(20.0, 50.0), Pos2::new(80.0, 50.0)] {
            assert!(s.button_down(p));
            s.button_up(p);
        }
        assert_eq!(s.handles().len(), 2);
        assert!(s.matrix().expect("matrix").approx_eq(&Matrix3::IDENTITY, 1e-9));

        // Two handles: drag one a quarter turn about the other.
        assert_eq!(s.pointer_move(Pos2::new(81.0, 50.0)), Handle::Point(1));
        assert_eq!(s.status_text(), t!("status.handle_rotate"));
        assert!(s.button_down(Pos2::new(80.0, 50.0)));
        s.pointer_move(Pos2::new(50.0, 80.0));
        s.button_up(Pos2::new(20.0, 110.0));
        let turned = Matrix3::rotate_about(20.0, 50.0, std::f64::consts::FRAC_PI_2);
        assert!(s.matrix().expect("matrix").approx_eq(&turned, 1e-9));

        // Repositioning a handle keeps the transform.
        s.set_options(TransformGridOptions { handle_mode: HandleMode::Move, ..plain_options() });
        assert!(s.button_down(Pos2::new(20.0, 110.0)));
        s.button_up(Pos2::new(35.0, 100.0));
        assert!(s.matrix().expect("matrix").approx_eq(&turned, 1e-9));
        assert!(s.info().corner(1).expect("point").distance(Vector2::new(35.0, 100.0)) < 1e-9);

        // Removing one does too.
        s.set_options(TransformGridOptions { handle_mode: HandleMode::Remove, ..plain_options() });
        assert!(!s.button_down(Pos2::new(20.0, 50.0)));
        assert_eq!(s.handles().len(), 1);
        assert!(s.matrix().expect("matrix").approx_eq(&turned, 1e-9));

        assert!(s.undo());
        assert_eq!(s.handles().len(), 2);
        assert!(s.commit().is_some());
    }

    #[test]
    fn escape_drops_a_handle_added_by_the_press() {
        let mut s = family_session(TransformFamily::Handle, plain_options());
        assert!(s.button_down(Pos2::new(30.0, 40.0)));
        s.pointer_move(Pos2::new(45.0, 40.0));
        assert!(s.matrix().expect("matrix").approx_eq(&Matrix3::from_translation(15.0, 0.0), 1e-9));
        s.key_escape();
        assert!(s.handles().is_empty());
        assert!(s.matrix().expect("matrix").approx_eq(&Matrix3::IDENTITY, 1e-9));
        assert!(!s.can_undo());
    }
}
