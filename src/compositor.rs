// ============================================================================
// PREVIEW GRAPH: source → convert → [layer mask] → opacity(+selection) →
//                 cache-or-passthrough → transform
// ============================================================================
//
// The graph is a fixed chain of stages. Which of the optional stages take
// part is a `PreviewTopology`, decided by mask presence alone; every other
// input is a stage parameter that can change without relinking. `sync`
// compares each input against the identity it last bound and touches only
// the stages whose input moved.

use std::rc::Rc;

use image::{DynamicImage, GrayImage, RgbaImage, imageops};
use uuid::Uuid;

use crate::canvas::{Drawable, Pickable, PixelRect, PixelSource, Selection};
use crate::components::handles::ViewTransform;
use crate::ops::boundary::{Boundary, ResizePolicy, compute_boundary};
use crate::ops::matrix::Matrix3;
use crate::ops::transform::{Interpolation, warp_into};

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Shape of the stage chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PreviewTopology {
    NoMask,
    LayerMaskOnly,
    SelectionMaskOnly,
    Both,
}

/// One link in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    ConvertFormat,
    LayerMaskBlend,
    /// Opacity blend, with the cropped selection as aux input when present.
    OpacityBlend,
    Cache,
    Transform,
}

impl PreviewTopology {
    pub fn from_presence(layer_mask: bool, selection_mask: bool) -> Self {
        match (layer_mask, selection_mask) {
            (false, false) => PreviewTopology::NoMask,
            (true, false) => PreviewTopology::LayerMaskOnly,
            (false, true) => PreviewTopology::SelectionMaskOnly,
            (true, true) => PreviewTopology::Both,
        }
    }

    pub fn has_layer_mask(&self) -> bool {
        matches!(self, PreviewTopology::LayerMaskOnly | PreviewTopology::Both)
    }

    pub fn has_selection_mask(&self) -> bool {
        matches!(self, PreviewTopology::SelectionMaskOnly | PreviewTopology::Both)
    }

    /// Evaluation order.
    pub fn stages(&self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            PreviewTopology::NoMask | PreviewTopology::SelectionMaskOnly => {
                &[Source, ConvertFormat, OpacityBlend, Cache, Transform]
            }
            PreviewTopology::LayerMaskOnly | PreviewTopology::Both => {
                &[Source, ConvertFormat, LayerMaskBlend, OpacityBlend, Cache, Transform]
            }
        }
    }
}

// ============================================================================
// INPUTS AND OUTPUT
// ============================================================================

/// Per-sync parameters that never change the topology.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreviewParams {
    /// Image-space transform of the item.
    pub matrix: Matrix3,
    pub clip: ResizePolicy,
    /// Region of the item being transformed, in image coordinates.
    pub rect: PixelRect,
    pub opacity: f64,
    pub view: ViewTransform,
    pub interpolation: Interpolation,
}

/// Counters for watching how much work `sync` and `render` do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub relinks: u32,
    pub buffer_fetches: u32,
    pub matrix_updates: u32,
    pub opacity_updates: u32,
}

/// A rendered piece of preview in screen coordinates.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub rect: PixelRect,
    pub pixels: RgbaImage,
}

// ============================================================================
// STAGES
// ============================================================================

/// Identity of a bound buffer. Any field changing means the binding is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BufferKey {
    owner: Uuid,
    storage: usize,
    /// Image-space placement of the buffer.
    origin: (i32, i32),
    generation: u64,
    validated: bool,
}

/// A buffer as the graph holds it. Unvalidated storage is copied at bind
/// time; the copy is then read like any other source.
struct Binding {
    key: BufferKey,
    source: Rc<dyn PixelSource>,
    /// Image-space position of the buffer's top-left pixel.
    origin: (i32, i32),
}

impl Binding {
    /// `None` when the buffer is missing or a snapshot copy fails.
    fn bind(
        owner: Uuid,
        source: Rc<dyn PixelSource>,
        origin: (i32, i32),
        stats: &mut GraphStats,
    ) -> Option<Self> {
        let key = buffer_key(owner, &source, origin);
        let source = if key.validated {
            source
        } else {
            stats.buffer_fetches += 1;
            let snapshot: DynamicImage = source.fetch_region(source.bounds())?;
            Rc::new(snapshot) as Rc<dyn PixelSource>
        };
        Some(Self { key, source, origin })
    }

    /// `region` (image coordinates) as a buffer of exactly that size.
    /// Parts outside the source stay transparent / zero.
    fn fetch(&self, region: PixelRect, stats: &mut GraphStats) -> Option<DynamicImage> {
        stats.buffer_fetches += 1;
        let local = region.translate(-self.origin.0, -self.origin.1);
        let got = self.source.fetch_region(local)?;
        let clipped = local.intersect(&self.source.bounds())?;
        if clipped == local {
            return Some(got);
        }
        let mut full = RgbaImage::new(region.width, region.height);
        imageops::replace(
            &mut full,
            &got.to_rgba8(),
            (clipped.x - local.x) as i64,
            (clipped.y - local.y) as i64,
        );
        Some(DynamicImage::ImageRgba8(full))
    }
}

fn buffer_key(owner: Uuid, source: &Rc<dyn PixelSource>, origin: (i32, i32)) -> BufferKey {
    BufferKey {
        owner,
        storage: Rc::as_ptr(source) as *const () as usize,
        origin,
        generation: source.generation(),
        validated: source.is_validated(),
    }
}

/// Key of whatever `d` currently exposes, `None` without a buffer.
fn drawable_key(d: &dyn Drawable, owner: Uuid) -> Option<BufferKey> {
    d.buffer().map(|b| buffer_key(owner, &b, d.offset()))
}

struct SourceStage {
    binding: Option<Binding>,
    /// Transform region clipped to the item, image coordinates.
    crop: Option<PixelRect>,
    /// The layer mask is standing in for the item.
    showing_mask: bool,
}

struct MaskStage {
    binding: Option<Binding>,
}

struct OpacityStage {
    opacity: f64,
    selection: Option<Binding>,
    /// Selection bounds over the item; `Some(None)` means the selection
    /// misses the item entirely.
    selection_crop: Option<Option<PixelRect>>,
}

struct CacheStage {
    pixels: Option<Rc<RgbaImage>>,
}

struct TransformStage {
    matrix: Matrix3,
    clip: ResizePolicy,
    view: ViewTransform,
    interpolation: Interpolation,
    boundary: Option<Boundary>,
}

struct Stages {
    topology: PreviewTopology,
    source: SourceStage,
    mask: MaskStage,
    opacity: OpacityStage,
    cache: CacheStage,
    transform: TransformStage,
}

// ============================================================================
// GRAPH
// ============================================================================

/// Incrementally maintained preview of one transformed item.
#[derive(Default)]
pub struct PreviewGraph {
    stages: Option<Stages>,
    stats: GraphStats,

    node_pickable: Option<BufferKey>,
    node_layer_mask: Option<BufferKey>,
    node_selection: Option<BufferKey>,
    node_show_mask: bool,
    node_opacity: Option<f64>,
    node_rect: Option<PixelRect>,
    node_matrix: Option<Matrix3>,
}

impl PreviewGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    /// Current shape, `None` before the first sync.
    pub fn topology(&self) -> Option<PreviewTopology> {
        self.stages.as_ref().map(|s| s.topology)
    }

    /// Screen-space extents of the transformed item.
    pub fn screen_bounds(&self) -> Option<PixelRect> {
        let t = &self.stages.as_ref()?.transform;
        let b = t.boundary?;
        let screen = t.view.matrix();
        let (x1, y1) = screen.transform_point(b.x1 as f64, b.y1 as f64);
        let (x2, y2) = screen.transform_point(b.x2 as f64, b.y2 as f64);
        let r = PixelRect::from_corners(
            x1.min(x2).floor() as i32,
            y1.min(y2).floor() as i32,
            x1.max(x2).ceil() as i32,
            y1.max(y2).ceil() as i32,
        );
        (!r.is_empty()).then_some(r)
    }

    /// Drop cached pixels and snapshots. The next sync rebinds everything.
    pub fn invalidate(&mut self) {
        self.node_pickable = None;
        self.node_layer_mask = None;
        self.node_selection = None;
        self.node_rect = None;
        if let Some(stages) = self.stages.as_mut() {
            stages.cache.pixels = None;
        }
    }

    /// Bring the graph in line with `item`, `selection` and `params`.
    /// Calling it again with the same inputs does nothing.
    pub fn sync(&mut self, item: &dyn Drawable, selection: Option<&Selection>, params: &PreviewParams) {
        item.flush();

        let selection = selection.filter(|s| !s.is_empty());
        let layer = item.as_layer();
        let layer_mask = layer.and_then(|l| l.mask());
        let show_mask = layer.is_some_and(|l| l.show_mask()) && layer_mask.is_some() && selection.is_none();
        let blend_mask = !show_mask && layer.is_some_and(|l| l.apply_mask()) && layer_mask.is_some();

        let topology = PreviewTopology::from_presence(blend_mask, selection.is_some());
        let mut stats = self.stats;
        let stages = self.stages.get_or_insert_with(|| Stages {
            topology,
            source: SourceStage { binding: None, crop: None, showing_mask: false },
            mask: MaskStage { binding: None },
            opacity: OpacityStage { opacity: 1.0, selection: None, selection_crop: None },
            cache: CacheStage { pixels: None },
            transform: TransformStage {
                matrix: Matrix3::IDENTITY,
                clip: params.clip,
                view: params.view,
                interpolation: params.interpolation,
                boundary: None,
            },
        });

        let mut composite_changed = false;

        if stats.relinks == 0 || stages.topology != topology {
            stats.relinks += 1;
            stages.topology = topology;
            composite_changed = true;
            crate::log_info!("Preview graph linked as {:?}", topology);
        }

        // Source: the item, or its mask when the mask is on display.
        let source_item: Option<(&dyn Drawable, Uuid)> = if show_mask {
            layer_mask.map(|m| (m, m.id()))
        } else {
            Some((item, item.id()))
        };
        let source_key = source_item.and_then(|(d, id)| drawable_key(d, id));
        if source_key != self.node_pickable || show_mask != self.node_show_mask {
            stages.source.binding = source_item.and_then(|(d, id)| {
                Binding::bind(id, d.buffer()?, d.offset(), &mut stats)
            });
            stages.source.showing_mask = show_mask;
            self.node_pickable = source_key;
            self.node_show_mask = show_mask;
            composite_changed = true;
        }

        let crop = params.rect.intersect(&item.bounds());
        if self.node_rect != Some(params.rect) || stages.source.crop != crop {
            stages.source.crop = crop;
            self.node_rect = Some(params.rect);
            composite_changed = true;
        }

        // Layer mask blend.
        let mask_key = if blend_mask {
            layer_mask.and_then(|m| drawable_key(m, m.id()))
        } else {
            None
        };
        if mask_key != self.node_layer_mask {
            stages.mask.binding = if blend_mask {
                layer_mask.and_then(|m| Binding::bind(m.id(), m.buffer()?, m.offset(), &mut stats))
            } else {
                None
            };
            self.node_layer_mask = mask_key;
            composite_changed = true;
        }

        // Opacity with the selection as aux.
        let selection_key = selection.and_then(|s| drawable_key(s, s.id()));
        if selection_key != self.node_selection {
            stages.opacity.selection = selection.and_then(|s| {
                Binding::bind(s.id(), s.buffer()?, s.offset(), &mut stats)
            });
            stages.opacity.selection_crop = selection.map(|s| item.mask_bounds(Some(s)));
            self.node_selection = selection_key;
            composite_changed = true;
        }
        if self.node_opacity != Some(params.opacity) {
            stages.opacity.opacity = params.opacity.clamp(0.0, 1.0);
            self.node_opacity = Some(params.opacity);
            stats.opacity_updates += 1;
            composite_changed = true;
        }

        if composite_changed {
            stages.cache.pixels = None;
        }

        // Transform.
        let t = &mut stages.transform;
        let rect_changed = t.boundary.is_none() || composite_changed;
        if self.node_matrix != Some(params.matrix) || t.clip != params.clip || rect_changed {
            if self.node_matrix != Some(params.matrix) {
                stats.matrix_updates += 1;
            }
            t.matrix = params.matrix;
            t.clip = params.clip;
            t.boundary = stages.source.crop.and_then(|c| {
                compute_boundary(&params.matrix, params.clip, c.x, c.y, c.right(), c.bottom())
            });
            self.node_matrix = Some(params.matrix);
        }
        t.view = params.view;
        t.interpolation = params.interpolation;

        self.stats = stats;
    }

    /// Evaluate the preview over `screen_rect`. `None` when the graph has
    /// not been synced, a buffer is missing, or nothing of the transformed
    /// item falls inside `screen_rect`.
    pub fn render(&mut self, screen_rect: PixelRect) -> Option<PreviewFrame> {
        if screen_rect.is_empty() {
            return None;
        }
        let dst = self.screen_bounds()?.intersect(&screen_rect)?;

        let composite = self.composite()?;
        let stages = self.stages.as_ref()?;
        let crop = stages.source.crop?;
        let t = &stages.transform;
        let inverse = t.view.matrix().multiply(&t.matrix).invert()?;
        let pixels = warp_into(&composite, (crop.x, crop.y), &inverse, dst, t.interpolation);
        Some(PreviewFrame { rect: dst, pixels })
    }

    /// Pre-transform pixels of the crop, from the cache when it holds them.
    fn composite(&mut self) -> Option<Rc<RgbaImage>> {
        let stages = self.stages.as_mut()?;
        if let Some(cached) = &stages.cache.pixels {
            return Some(cached.clone());
        }
        // Fetches count even when the pass bails out half way.
        let mut stats = self.stats;
        let pixels = evaluate(stages, &mut stats);
        self.stats = stats;
        pixels
    }
}

/// Run the stages in front of the cache and fill it when there is work
/// worth keeping.
fn evaluate(stages: &mut Stages, stats: &mut GraphStats) -> Option<Rc<RgbaImage>> {
    let crop = stages.source.crop?;
    let source = stages.source.binding.as_ref()?;
    let mut pixels = if stages.source.showing_mask {
        gray_as_rgba(&source.fetch(crop, stats)?.to_luma8())
    } else {
        source.fetch(crop, stats)?.to_rgba8()
    };

    if stages.topology.has_layer_mask() {
        let mask = stages.mask.binding.as_ref()?.fetch(crop, stats)?.to_luma8();
        multiply_alpha(&mut pixels, &mask, 1.0);
    }

    if stages.topology.has_selection_mask() {
        // Selection that misses the item leaves nothing visible.
        stages.opacity.selection_crop.flatten()?.intersect(&crop)?;
        let sel = stages.opacity.selection.as_ref()?.fetch(crop, stats)?.to_luma8();
        multiply_alpha(&mut pixels, &sel, stages.opacity.opacity);
    } else if stages.opacity.opacity < 1.0 {
        scale_alpha(&mut pixels, stages.opacity.opacity);
    }

    let pixels = Rc::new(pixels);
    // Plain untouched sources stay pass-through; live buffers are read anew.
    let passthrough = stages.topology == PreviewTopology::NoMask
        && stages.opacity.opacity >= 1.0
        && source.key.validated;
    if !passthrough {
        stages.cache.pixels = Some(pixels.clone());
    }
    Some(pixels)
}

fn gray_as_rgba(mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        image::Rgba([v, v, v, 255])
    })
}

fn multiply_alpha(pixels: &mut RgbaImage, mask: &GrayImage, opacity: f64) {
    for (p, m) in pixels.pixels_mut().zip(mask.pixels()) {
        let a = p.0[3] as f64 * (m.0[0] as f64 / 255.0) * opacity;
        p.0[3] = a.round().clamp(0.0, 255.0) as u8;
    }
}

fn scale_alpha(pixels: &mut RgbaImage, opacity: f64) {
    for p in pixels.pixels_mut() {
        p.0[3] = (p.0[3] as f64 * opacity).round().clamp(0.0, 255.0) as u8;
    }
}
