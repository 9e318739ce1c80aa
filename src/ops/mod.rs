// ============================================================================
// OPS MODULE: pure geometry and pixel operations
// ============================================================================
//
//   matrix.rs   : Matrix3 / Vector2, perspective solve and decomposition
//   geometry.rs : angle, projection and quad helpers for the drag math
//   boundary.rs : ResizePolicy and the integer result box
//   transform.rs: inverse-mapped resampling (preview and commit)
// ============================================================================

pub mod boundary;
pub mod geometry;
pub mod matrix;
pub mod transform;

pub use boundary::{Boundary, ResizePolicy, compute_boundary};
pub use matrix::{Matrix3, Vector2};
pub use transform::{Interpolation, TransformDirection};
