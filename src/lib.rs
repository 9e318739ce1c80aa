// ============================================================================
// paintfe-transform: the transform-grid tool core
// ============================================================================
//
// A host editor creates a `GridSession` over the active item, feeds it
// pointer and key events in screen space, keeps a `PreviewGraph` synced from
// `GridSession::preview_params`, and on commit hands `final_matrix()` and
// `resize_policy()` to its own resampler (`ops::transform::transform_pixels`
// is the reference one).

#[macro_use]
pub mod i18n;
#[macro_use]
pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod error;
pub mod ops;

pub use components::{GridSession, TransformFamily, TransformGridOptions};
pub use compositor::{PreviewGraph, PreviewTopology};
pub use error::{TransformError, TransformResult};
