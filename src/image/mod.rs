//! Image references and image identity


mod digest;
mod name;
mod repository;
mod tag;

pub use digest::ContentDigest;
pub use name::ImageName;
pub use repository::{Repository, RepositoryIter};
pub use tag::Tag;
