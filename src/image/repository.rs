use crate::errors::ReferenceError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// Path of an image repository on a registry, like `library/alpine`
///
/// One or more slash-separated components of lowercase alphanumerics. Inside
/// a component, runs may be joined by a single period, a single or double
/// underscore, or any number of dashes.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Repository {
    serialized: String,
}

/// Iterator over the slash-separated components of a [Repository]
pub struct RepositoryIter<'a> {
    remaining: Option<&'a str>,
}

impl<'a> Iterator for RepositoryIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining.take()?;
        match remaining.find('/') {
            Some(slash) => {
                self.remaining = Some(&remaining[slash + 1..]);
                Some(&remaining[..slash])
            }
            None => Some(remaining),
        }
    }
}

impl Repository {
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [Repository]
    ///
    /// ```
    /// # use minibox::Repository;
    /// let repo = Repository::parse("library/alpine").unwrap();
    /// let parts: Vec<&str> = repo.iter().collect();
    /// assert_eq!(parts, vec!["library", "alpine"])
    /// ```
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Repository::regex_str())).unwrap();
        }
        if RE.is_match(s) {
            Ok(Repository {
                serialized: s.to_owned(),
            })
        } else {
            Err(ReferenceError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    pub fn iter(&self) -> RepositoryIter<'_> {
        RepositoryIter {
            remaining: Some(&self.serialized),
        }
    }

    /// Does this path have a single component, like `alpine`?
    pub fn is_bare(&self) -> bool {
        !self.serialized.contains('/')
    }

    /// Everything before the last component, if there is more than one
    pub fn namespace_str(&self) -> Option<&str> {
        self.serialized.rfind('/').map(|slash| &self.serialized[..slash])
    }

    /// The last path component
    pub fn image_str(&self) -> &str {
        match self.serialized.rfind('/') {
            Some(slash) => &self.serialized[slash + 1..],
            None => &self.serialized,
        }
    }

    /// Join this path to another with a slash, forming a new repository path
    pub fn join(&self, other: &Self) -> Self {
        Repository {
            serialized: format!("{}/{}", self.serialized, other.serialized),
        }
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<repo>",
            /*  */ "[a-z0-9]+",
            /*  */ "(?:(?:[._]|__|[-]*)[a-z0-9]+)*", // separated runs
            /*  */ "(?:", // further path components
            /* -- */ "/",
            /* -- */ "[a-z0-9]+",
            /* -- */ "(?:(?:[._]|__|[-]*)[a-z0-9]+)*",
            /*  */ ")*",
            ")"
        )
    }
}

impl FromStr for Repository {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Repository::parse(s)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repository({})", self)
    }
}
