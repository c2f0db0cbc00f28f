#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("minibox only works on linux or android");

#[macro_use] extern crate lazy_static;
#[macro_use] extern crate serde;

pub mod errors;
pub mod filesystem;
pub mod image;
pub mod manifest;
pub mod registry;
pub mod sandbox;

pub use crate::{
    errors::PipelineError,
    filesystem::{SandboxRoot, ScratchDir},
    image::{ContentDigest, ImageName, Repository, Tag},
    registry::{Client, ClientBuilder, DefaultRegistry, Token},
    sandbox::{ExitStatus, Sandbox},
};
