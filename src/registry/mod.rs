//! Support for downloading container images from a registry server

mod auth;
mod builder;
mod client;
mod default;

pub use auth::Token;
pub use builder::ClientBuilder;
pub use client::*;
pub use default::*;
