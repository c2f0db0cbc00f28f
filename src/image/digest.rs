use crate::errors::ReferenceError;
use regex::Regex;
use std::{convert::TryFrom, fmt, ops::Range, str::FromStr};

/// Content address of an immutable blob, like `sha256:<hex>`
///
/// Layers in a manifest are identified by these. We parse and carry digests
/// but do not verify downloaded content against them.
#[derive(Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ContentDigest {
    serialized: String,
    format_pos: Range<usize>,
    hex_pos: Range<usize>,
}

impl ContentDigest {
    /// Returns the full `format:hex` string
    ///
    /// The format specifier is alphanumeric with single `+`, `-`, `_`, or `.`
    /// separators. The hex part is 32 or more lowercase hexadecimal digits.
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use minibox::ContentDigest;
    /// let digest = ContentDigest::parse("format:00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(digest.format_str(), "format");
    /// assert_eq!(digest.hex_str(), "00112233445566778899aabbccddeeff")
    /// ```
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", ContentDigest::regex_str())).unwrap();
        }
        match RE.captures(s) {
            None => Err(ReferenceError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => Ok(ContentDigest {
                serialized: s.to_owned(),
                format_pos: captures.name("dig_f").unwrap().range(),
                hex_pos: captures.name("dig_h").unwrap().range(),
            }),
        }
    }

    /// The hash algorithm, `sha256` for everything a public registry serves
    pub fn format_str(&self) -> &str {
        &self.serialized[self.format_pos.clone()]
    }

    /// The hexadecimal hash, at least 32 digits
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.hex_pos.clone()]
    }

    /// A short prefix of the hash, for file names and log lines
    pub fn short_hex(&self) -> &str {
        &self.hex_str()[..12]
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>",
            /*  */ "(?P<dig_f>",
            /* -- */ "[a-zA-Z][a-zA-Z0-9]*",
            /* -- */ "(?:[-_+.][a-zA-Z][a-zA-Z0-9]*)*", // separated format components
            /*  */ ")",
            /*  */ "[:]",
            /*  */ "(?P<dig_h>[a-f0-9]{32,})",
            ")",
        )
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = ReferenceError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        ContentDigest::parse(&s)
    }
}

impl FromStr for ContentDigest {
    type Err = ReferenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
