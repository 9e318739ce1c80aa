// ============================================================================
// COMPONENTS: the interactive transform tool
// ============================================================================
//
//   handles.rs       : view mapping, handle kinds, layout and hit testing
//   guides.rs        : guide line patterns drawn inside the grid
//   transform_grid.rs: the grid widget: drag-to-matrix math and constraints
//   handle_grid.rs   : user-placed handles solved into a matrix
//   families.rs      : Unified / Perspective / Rotate / Generic / Handle strategies
//   history.rs       : per-session undo/redo of TransformInfo
//   tools.rs         : GridSession state machine and tool options
// ============================================================================

pub mod families;
pub mod guides;
pub mod handle_grid;
pub mod handles;
pub mod history;
pub mod tools;
pub mod transform_grid;

pub use families::{TransformFamily, TransformInfo};
pub use handle_grid::HandleMode;
pub use handles::{Handle, ViewTransform};
pub use tools::{GridSession, GridState, Modifiers, TransformGridOptions};
