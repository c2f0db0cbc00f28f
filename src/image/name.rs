use crate::{
    errors::ReferenceError,
    image::{Repository, Tag},
};
use regex::Regex;
use std::{fmt, ops::Range, str::FromStr};

/// Parsed image reference, `[namespace/]image[:tag]`
///
/// This is the repository coordinate a user types on the command line. The
/// [Repository] part is mandatory, the [Tag] is optional and defaults to
/// `latest`. Exactly one `:` may appear, and it separates the two.
///
/// A bare repository like `alpine` has no namespace here; the registry
/// configuration decides which namespace it lives in (see
/// [crate::DefaultRegistry::resolve]).
///
/// Only the default public registry is supported, so references that begin
/// with a registry host (`quay.io/...`, `localhost:5000/...`) are rejected,
/// as are references pinned by content digest.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ImageName {
    serialized: String,
    repository_pos: Range<usize>,
    tag_pos: Option<Range<usize>>,
}

impl ImageName {
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Build an [ImageName] from its parts
    pub fn from_parts(repository: &Repository, tag: Option<&Tag>) -> Result<Self, ReferenceError> {
        match tag {
            Some(tag) => ImageName::parse(&format!("{}:{}", repository, tag)),
            None => ImageName::parse(repository.as_str()),
        }
    }

    /// Parse a [prim@str] as an [ImageName]
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        lazy_static! {
            static ref HAS_REGISTRY: Regex = Regex::new(concat!(
                "^",
                "(?:",
                /* */ "[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?", // domain component
                /* */ "(?:\\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+", // at least one dot
                /* */ "(?::[0-9]+)?",
                "|",
                /* */ "[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?:[0-9]+", // no dots, but a port
                "|",
                /* */ "localhost(?::[0-9]+)?",
                ")",
                "/",
            ))
            .unwrap();
            static ref NAME: Regex = Regex::new(&format!(
                "^{}(?::{})?$",
                Repository::regex_str(),
                Tag::regex_str(),
            ))
            .unwrap();
        }
        if HAS_REGISTRY.is_match(s) {
            return Err(ReferenceError::InvalidReferenceFormat(s.to_owned()));
        }
        match NAME.captures(s) {
            None => Err(ReferenceError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => Ok(ImageName {
                serialized: s.to_owned(),
                repository_pos: captures.name("repo").unwrap().range(),
                tag_pos: captures.name("tag").map(|m| m.range()),
            }),
        }
    }

    pub fn repository_str(&self) -> &str {
        &self.serialized[self.repository_pos.clone()]
    }

    /// The tag exactly as written, if any
    pub fn tag_str(&self) -> Option<&str> {
        self.tag_pos
            .as_ref()
            .map(|pos| &self.serialized[pos.clone()])
    }

    pub fn repository(&self) -> Repository {
        Repository::parse(self.repository_str()).expect("already parsed")
    }

    /// The tag to pull, `latest` when none was written
    pub fn tag(&self) -> Tag {
        match self.tag_str() {
            Some(s) => Tag::parse(s).expect("already parsed"),
            None => Tag::latest(),
        }
    }
}

impl FromStr for ImageName {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
