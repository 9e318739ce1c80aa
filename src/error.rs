// ============================================================================
// ERRORS: failure taxonomy for the transform core
// ============================================================================
//
// None of these cross the interactive boundary: GridSession and PreviewGraph
// log them at warn level and carry on with the previous state. Only the CLI
// turns them into user-facing messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    /// Singular matrix, zero-area quad, or a quad entirely behind the
    /// projection plane.
    #[error("degenerate transform: {0}")]
    DegenerateTransform(&'static str),

    /// The requested rectangle misses the transformed boundary or the clip.
    #[error("render region is empty")]
    EmptyRenderRegion,

    /// The source pickable has no buffer yet.
    #[error("source buffer unavailable")]
    UnavailableBuffer,

    /// A drag update arrived with no active handle.
    #[error("drag update without an active handle")]
    InvalidDragState,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type TransformResult<T> = Result<T, TransformError>;
