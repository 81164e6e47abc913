//! Build-strategy variants, plan composition and manifest rendering.
//!
//! ```text
//! RepoContext ──detect/select──▶ Variant ──compose──▶ BuildPlan ──render──▶ BuildManifest
//! ```

pub mod catalog;
pub mod compose;
pub mod error;
pub mod layer;
pub mod packages;
pub mod privilege;
pub mod registry;
pub mod render;
pub mod skeleton;
pub mod snapshot;
pub mod variant;

pub use compose::{compose, BuildPlan};
pub use error::{ComposeError, RenderError};
pub use layer::{FileManifest, Layer};
pub use privilege::{Instruction, Privilege};
pub use registry::{Registry, Selection};
pub use render::{render, BuildManifest};
pub use skeleton::Skeleton;
pub use variant::{Detection, Variant};
