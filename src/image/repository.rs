use crate::errors::ImageError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// Repository names must be strictly shorter than this, slashes included
pub const MAX_REPOSITORY_LEN: usize = 256;

/// Name of an image repository on the registry, like `acme/app`
///
/// A name is one or more components joined by single slashes. Each component
/// is lowercase alphanumeric runs, optionally separated by a single `.`, `_`
/// or `-`, so it matches `[a-z0-9]+(?:[._-][a-z0-9]+)*`. The whole name is
/// less than [MAX_REPOSITORY_LEN] characters.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Repository(String);

/// Iterator over the slash-separated components of a [Repository]
pub type RepositoryIter<'a> = std::str::Split<'a, char>;

impl Repository {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a [prim@str] as a [Repository]
    ///
    /// The length limit is checked before the grammar, so an overlong name
    /// always reports [ImageError::RepositoryNameTooLong].
    ///
    /// ```
    /// # use dockyard::image::Repository;
    /// let repo = Repository::parse("acme/app").unwrap();
    /// let parts: Vec<&str> = repo.iter().collect();
    /// assert_eq!(parts, vec!["acme", "app"])
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Repository::regex_str())).unwrap();
        }
        if s.len() >= MAX_REPOSITORY_LEN {
            Err(ImageError::RepositoryNameTooLong(s.len()))
        } else if RE.is_match(s) {
            Ok(Repository(s.to_owned()))
        } else {
            Err(ImageError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    /// Components of the name, in order
    pub fn iter(&self) -> RepositoryIter<'_> {
        self.0.split('/')
    }

    /// Nest `other` under this name, as `self/other`
    pub fn join(&self, other: &Self) -> Result<Self, ImageError> {
        Repository::parse(&format!("{}/{}", self.0, other.0))
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<repo>",
            /*  */ "[a-z0-9]+(?:[._-][a-z0-9]+)*", // first component
            /*  */ "(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*", // more components
            ")"
        )
    }
}

impl AsRef<str> for Repository {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Repository {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Repository::parse(s)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repository({})", self.0)
    }
}
