// ============================================================================
// CANVAS MODEL: the read-only item capabilities the transform core consumes
// ============================================================================
//
// The transform tool never owns the document. It sees items through the
// Pickable / Drawable / Layer traits below and reads pixels through
// PixelSource, which always hands out owned snapshots. The concrete types at
// the bottom (CanvasLayer, LayerMask, Selection) back the CLI and the tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use egui::Rect;
use image::{ColorType, DynamicImage, GenericImageView, GrayImage, RgbaImage};
use uuid::Uuid;

use crate::ops::boundary::Boundary;

// ============================================================================
// PIXEL RECT
// ============================================================================

/// Integer pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// From corner coordinates; inverted corners give an empty rect.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self { x: self.x + dx, y: self.y + dy, ..*self }
    }

    /// Overlap of two rects, `None` when they do not overlap.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        let r = PixelRect::from_corners(x1, y1, x2, y2);
        (!r.is_empty()).then_some(r)
    }

    /// Smallest pixel rect covering a screen-space rect.
    pub fn from_egui(rect: Rect) -> Self {
        PixelRect::from_corners(
            rect.min.x.floor() as i32,
            rect.min.y.floor() as i32,
            rect.max.x.ceil() as i32,
            rect.max.y.ceil() as i32,
        )
    }
}

impl From<Boundary> for PixelRect {
    fn from(b: Boundary) -> Self {
        PixelRect::from_corners(b.x1, b.y1, b.x2, b.y2)
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Read access to pixel storage.
pub trait PixelSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// False while the storage is still being filled in. Readers that need a
    /// stable view must snapshot instead of holding on to the source.
    fn is_validated(&self) -> bool {
        true
    }

    /// Bumped on every write. Readers holding on to derived pixels compare
    /// it to tell whether they are stale.
    fn generation(&self) -> u64 {
        0
    }

    /// Owned copy of `rect` (in the source's own coordinates) clipped to the
    /// source bounds. `None` when nothing of `rect` lies inside.
    fn fetch_region(&self, rect: PixelRect) -> Option<DynamicImage>;

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }
}

impl PixelSource for DynamicImage {
    fn width(&self) -> u32 {
        GenericImageView::width(self)
    }

    fn height(&self) -> u32 {
        GenericImageView::height(self)
    }

    fn fetch_region(&self, rect: PixelRect) -> Option<DynamicImage> {
        let r = rect.intersect(&PixelSource::bounds(self))?;
        Some(self.crop_imm(r.x as u32, r.y as u32, r.width, r.height))
    }
}

/// Something with pixels the preview can read.
pub trait Pickable {
    fn id(&self) -> Uuid;
    fn buffer(&self) -> Option<Rc<dyn PixelSource>>;
    /// Pixel format the item is composited in, always with an alpha channel.
    fn format_with_alpha(&self) -> ColorType;
    /// Finish any pending writes before the buffer is read.
    fn flush(&self) {}
}

/// A pickable placed on the image.
pub trait Drawable: Pickable {
    fn offset(&self) -> (i32, i32);
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Item extents in image coordinates.
    fn bounds(&self) -> PixelRect {
        let (x, y) = self.offset();
        PixelRect::new(x, y, self.width(), self.height())
    }

    /// Part of the item an operation should touch: the whole item without an
    /// active selection, otherwise the selected part. `None` when that is
    /// nothing at all.
    fn mask_bounds(&self, selection: Option<&Selection>) -> Option<PixelRect> {
        match selection.filter(|s| !s.is_empty()) {
            Some(s) => s.bounds()?.intersect(&self.bounds()),
            None => {
                let b = self.bounds();
                (!b.is_empty()).then_some(b)
            }
        }
    }

    fn as_layer(&self) -> Option<&dyn Layer> {
        None
    }
}

pub trait Layer: Drawable {
    fn opacity(&self) -> f64;
    fn mask(&self) -> Option<&dyn Drawable>;
    fn show_mask(&self) -> bool;
    fn apply_mask(&self) -> bool;
}

// ============================================================================
// LIVE BUFFER
// ============================================================================

/// Pixel storage that can change under the reader and may still be filling in.
///
/// `generation` bumps on every write so callers can tell stale copies apart.
pub struct LiveBuffer {
    pixels: RefCell<DynamicImage>,
    validated: Cell<bool>,
    generation: Cell<u64>,
}

impl LiveBuffer {
    pub fn new(pixels: DynamicImage) -> Self {
        Self {
            pixels: RefCell::new(pixels),
            validated: Cell::new(true),
            generation: Cell::new(0),
        }
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self::new(DynamicImage::ImageRgba8(pixels))
    }

    pub fn from_gray(pixels: GrayImage) -> Self {
        Self::new(DynamicImage::ImageLuma8(pixels))
    }

    /// A buffer whose contents are still being computed.
    pub fn unvalidated(pixels: DynamicImage) -> Self {
        let buf = Self::new(pixels);
        buf.validated.set(false);
        buf
    }

    pub fn set_validated(&self, validated: bool) {
        self.validated.set(validated);
    }

    pub fn color(&self) -> ColorType {
        self.pixels.borrow().color()
    }

    /// Mutate the pixels in place.
    pub fn update(&self, f: impl FnOnce(&mut DynamicImage)) {
        f(&mut self.pixels.borrow_mut());
        self.generation.set(self.generation.get() + 1);
    }
}

impl PixelSource for LiveBuffer {
    fn width(&self) -> u32 {
        GenericImageView::width(&*self.pixels.borrow())
    }

    fn height(&self) -> u32 {
        GenericImageView::height(&*self.pixels.borrow())
    }

    fn is_validated(&self) -> bool {
        self.validated.get()
    }

    fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn fetch_region(&self, rect: PixelRect) -> Option<DynamicImage> {
        self.pixels.borrow().fetch_region(rect)
    }
}

/// Format of `color` once an alpha channel is added.
pub fn with_alpha(color: ColorType) -> ColorType {
    match color {
        ColorType::L8 | ColorType::La8 => ColorType::La8,
        ColorType::L16 | ColorType::La16 => ColorType::La16,
        ColorType::Rgb16 | ColorType::Rgba16 => ColorType::Rgba16,
        ColorType::Rgb32F | ColorType::Rgba32F => ColorType::Rgba32F,
        _ => ColorType::Rgba8,
    }
}

// ============================================================================
// CONCRETE ITEMS
// ============================================================================

/// Grayscale mask attached to a layer, in the layer's coordinates.
pub struct LayerMask {
    pub id: Uuid,
    pub offset: (i32, i32),
    pub buffer: Rc<LiveBuffer>,
}

impl LayerMask {
    pub fn new(pixels: GrayImage, offset: (i32, i32)) -> Self {
        Self {
            id: Uuid::new_v4(),
            offset,
            buffer: Rc::new(LiveBuffer::from_gray(pixels)),
        }
    }
}

impl Pickable for LayerMask {
    fn id(&self) -> Uuid {
        self.id
    }

    fn buffer(&self) -> Option<Rc<dyn PixelSource>> {
        Some(self.buffer.clone())
    }

    fn format_with_alpha(&self) -> ColorType {
        with_alpha(self.buffer.color())
    }
}

impl Drawable for LayerMask {
    fn offset(&self) -> (i32, i32) {
        self.offset
    }

    fn width(&self) -> u32 {
        PixelSource::width(self.buffer.as_ref())
    }

    fn height(&self) -> u32 {
        PixelSource::height(self.buffer.as_ref())
    }
}

/// A raster layer.
pub struct CanvasLayer {
    pub id: Uuid,
    pub name: String,
    pub offset: (i32, i32),
    /// `None` while the layer's storage has not been allocated yet.
    pub buffer: Option<Rc<LiveBuffer>>,
    pub opacity: f64,
    pub mask: Option<LayerMask>,
    pub show_mask: bool,
    pub apply_mask: bool,
}

impl CanvasLayer {
    pub fn new(name: impl Into<String>, pixels: RgbaImage, offset: (i32, i32)) -> Self {
        Self::from_buffer(name, Rc::new(LiveBuffer::from_rgba(pixels)), offset)
    }

    pub fn from_buffer(name: impl Into<String>, buffer: Rc<LiveBuffer>, offset: (i32, i32)) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            offset,
            buffer: Some(buffer),
            opacity: 1.0,
            mask: None,
            show_mask: false,
            apply_mask: true,
        }
    }
}

impl Pickable for CanvasLayer {
    fn id(&self) -> Uuid {
        self.id
    }

    fn buffer(&self) -> Option<Rc<dyn PixelSource>> {
        self.buffer.clone().map(|b| b as Rc<dyn PixelSource>)
    }

    fn format_with_alpha(&self) -> ColorType {
        self.buffer
            .as_ref()
            .map(|b| with_alpha(b.color()))
            .unwrap_or(ColorType::Rgba8)
    }
}

impl Drawable for CanvasLayer {
    fn offset(&self) -> (i32, i32) {
        self.offset
    }

    fn width(&self) -> u32 {
        self.buffer.as_ref().map(|b| PixelSource::width(b.as_ref())).unwrap_or(0)
    }

    fn height(&self) -> u32 {
        self.buffer.as_ref().map(|b| PixelSource::height(b.as_ref())).unwrap_or(0)
    }

    fn as_layer(&self) -> Option<&dyn Layer> {
        Some(self)
    }
}

impl Layer for CanvasLayer {
    fn opacity(&self) -> f64 {
        self.opacity
    }

    fn mask(&self) -> Option<&dyn Drawable> {
        self.mask.as_ref().map(|m| m as &dyn Drawable)
    }

    fn show_mask(&self) -> bool {
        self.show_mask
    }

    fn apply_mask(&self) -> bool {
        self.apply_mask
    }
}

/// The image's selection channel. Covers the whole image; zero is unselected.
pub struct Selection {
    pub id: Uuid,
    pub buffer: Rc<LiveBuffer>,
    bounds: Option<PixelRect>,
}

impl Selection {
    pub fn from_mask(mask: GrayImage) -> Self {
        let bounds = nonzero_bounds(&mask);
        Self {
            id: Uuid::new_v4(),
            buffer: Rc::new(LiveBuffer::from_gray(mask)),
            bounds,
        }
    }

    /// Fully selected rectangle on an image of the given size.
    pub fn rect(image_w: u32, image_h: u32, rect: PixelRect) -> Self {
        let mut mask = GrayImage::new(image_w, image_h);
        for (x, y, p) in mask.enumerate_pixels_mut() {
            if rect.contains(x as i32, y as i32) {
                p.0[0] = 255;
            }
        }
        Self::from_mask(mask)
    }

    /// Bounds of the selected pixels, `None` for an empty selection.
    pub fn bounds(&self) -> Option<PixelRect> {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }
}

impl Pickable for Selection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn buffer(&self) -> Option<Rc<dyn PixelSource>> {
        Some(self.buffer.clone())
    }

    fn format_with_alpha(&self) -> ColorType {
        ColorType::La8
    }
}

impl Drawable for Selection {
    fn offset(&self) -> (i32, i32) {
        (0, 0)
    }

    fn width(&self) -> u32 {
        PixelSource::width(self.buffer.as_ref())
    }

    fn height(&self) -> u32 {
        PixelSource::height(self.buffer.as_ref())
    }
}

fn nonzero_bounds(mask: &GrayImage) -> Option<PixelRect> {
    let (mut x1, mut y1) = (i32::MAX, i32::MAX);
    let (mut x2, mut y2) = (i32::MIN, i32::MIN);
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] != 0 {
            x1 = x1.min(x as i32);
            y1 = y1.min(y as i32);
            x2 = x2.max(x as i32 + 1);
            y2 = y2.max(y as i32 + 1);
        }
    }
    (x1 < x2).then(|| PixelRect::from_corners(x1, y1, x2, y2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Pos2;
    use image::Rgba;

    #[test]
    fn rect_intersection() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, -5, 10, 10);
        assert_eq!(a.intersect(&b), Some(PixelRect::new(5, 0, 5, 5)));
        assert_eq!(a.intersect(&PixelRect::new(10, 0, 5, 5)), None);
        assert!(PixelRect::from_corners(3, 3, 1, 8).is_empty());
    }

    #[test]
    fn egui_rect_rounds_outward() {
        let r = Rect::from_min_max(Pos2::new(0.5, 1.2), Pos2::new(9.1, 9.0));
        assert_eq!(PixelRect::from_egui(r), PixelRect::new(0, 1, 10, 8));
    }

    #[test]
    fn fetch_region_clips_to_source() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4])));
        let part = img.fetch_region(PixelRect::new(2, 2, 10, 10)).expect("overlap");
        assert_eq!(part.dimensions(), (2, 2));
        assert!(img.fetch_region(PixelRect::new(8, 8, 2, 2)).is_none());
    }

    #[test]
    fn live_buffer_tracks_generation_and_validation() {
        let buf = LiveBuffer::unvalidated(DynamicImage::new_rgba8(2, 2));
        assert!(!buf.is_validated());
        buf.update(|img| *img = DynamicImage::new_rgba8(3, 3));
        assert_eq!(buf.generation(), 1);
        assert_eq!(PixelSource::width(&buf), 3);
        buf.set_validated(true);
        assert!(buf.is_validated());
    }

    #[test]
    fn selection_bounds_and_item_intersection() {
        let sel = Selection::rect(100, 100, PixelRect::new(10, 10, 20, 20));
        assert_eq!(sel.bounds(), Some(PixelRect::new(10, 10, 20, 20)));

        let layer = CanvasLayer::new("a", RgbaImage::new(50, 50), (20, 20));
        assert_eq!(layer.mask_bounds(Some(&sel)), Some(PixelRect::new(20, 20, 10, 10)));
        let far = CanvasLayer::new("b", RgbaImage::new(5, 5), (80, 80));
        assert_eq!(far.mask_bounds(Some(&sel)), None);
        assert_eq!(layer.mask_bounds(None), Some(PixelRect::new(20, 20, 50, 50)));

        let empty = Selection::from_mask(GrayImage::new(10, 10));
        assert!(empty.is_empty());
        assert_eq!(layer.mask_bounds(Some(&empty)), Some(PixelRect::new(20, 20, 50, 50)));
    }

    #[test]
    fn layer_formats_gain_alpha() {
        assert_eq!(with_alpha(ColorType::L8), ColorType::La8);
        assert_eq!(with_alpha(ColorType::Rgb8), ColorType::Rgba8);
        let mut layer = CanvasLayer::new("c", RgbaImage::new(1, 1), (0, 0));
        assert_eq!(layer.format_with_alpha(), ColorType::Rgba8);
        layer.mask = Some(LayerMask::new(GrayImage::new(1, 1), (0, 0)));
        let mask = layer.mask().expect("mask");
        assert_eq!(mask.format_with_alpha(), ColorType::La8);
    }
}
