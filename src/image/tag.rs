use crate::errors::ImageError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// Longest tag the registry will route
pub const MAX_TAG_LEN: usize = 128;

/// Name of one manifest within a repository, like `v1` or `latest`
///
/// Tags go into URL paths unescaped, so only the Docker tag alphabet is
/// accepted: word characters, plus dots and dashes after the first character.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tag(String);

impl Tag {
    pub const LATEST: &'static str = "latest";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a [prim@str] as a [Tag]
    ///
    /// ```
    /// # use dockyard::image::Tag;
    /// assert!(Tag::parse("v1.0-rc2").is_ok());
    /// assert!(Tag::parse(".hidden").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Tag::regex_str())).unwrap();
        }
        if s.len() <= MAX_TAG_LEN && RE.is_match(s) {
            Ok(Tag(s.to_owned()))
        } else {
            Err(ImageError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    /// The tag assumed when an image name leaves it out
    pub fn latest() -> Self {
        Tag(Tag::LATEST.to_owned())
    }

    pub fn is_latest(&self) -> bool {
        self.0 == Tag::LATEST
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<tag>",
            /*  */ "[a-zA-Z0-9_]", // no leading separator
            /*  */ "[a-zA-Z0-9_.-]{0,127}",
            ")"
        )
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::parse(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.0)
    }
}
