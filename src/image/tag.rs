use crate::errors::ReferenceError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// A tag naming one version of an image within its repository
///
/// Up to 128 characters: alphanumerics and underscores anywhere, dots and
/// dashes anywhere but the first position. Tags never contain `:`, which is
/// what lets [crate::ImageName] split a reference at its only colon.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tag {
    serialized: String,
}

static LATEST_STR: &str = "latest";

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [Tag]
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Tag::regex_str())).unwrap();
        }
        if RE.is_match(s) {
            Ok(Tag {
                serialized: s.to_owned(),
            })
        } else {
            Err(ReferenceError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    /// The tag used when a reference does not name one
    pub fn latest() -> Self {
        Tag {
            serialized: LATEST_STR.to_owned(),
        }
    }

    pub fn is_latest(&self) -> bool {
        self.serialized == LATEST_STR
    }

    pub(crate) fn regex_str() -> &'static str {
        "(?P<tag>[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127})"
    }
}

impl Default for Tag {
    fn default() -> Self {
        Tag::latest()
    }
}

impl FromStr for Tag {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::parse(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self)
    }
}
