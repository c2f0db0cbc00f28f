//! Building the root filesystem the sandboxed command runs in

mod root;
mod scratch;
pub mod tar;

pub use root::{LayerArchive, RootBuilder, SandboxRoot};
pub use scratch::ScratchDir;

/// File name prefix for layer archives waiting inside a root to be extracted
pub(crate) const LAYER_TEMP_PREFIX: &str = ".minibox-layer-";
