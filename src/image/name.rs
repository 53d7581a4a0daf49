use crate::{
    errors::ImageError,
    image::{Repository, Tag},
};
use regex::Regex;
use std::{fmt, str, str::FromStr};

/// Parsed `repository[:tag]` image reference
///
/// This is the short form used on the command line and in logs, for
/// example `acme/app:v1`. The registry server is configured separately on the
/// client, so unlike a full Docker reference there is no host prefix and no
/// digest suffix. When no tag is written, the tag is `latest`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ImageName {
    repository: Repository,
    tag: Tag,
}

impl ImageName {
    /// Construct an [ImageName] from already validated parts
    pub fn new(repository: Repository, tag: Tag) -> Self {
        ImageName { repository, tag }
    }

    /// Parse a [prim@str] as an [ImageName]
    ///
    /// ```
    /// # use dockyard::image::ImageName;
    /// let name = ImageName::parse("acme/app:v1").unwrap();
    /// assert_eq!(name.repository().as_str(), "acme/app");
    /// assert_eq!(name.tag().as_str(), "v1");
    /// assert!(ImageName::parse("acme/app").unwrap().tag().is_latest());
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!(
                "^{}(?:[:]{})?$",
                Repository::regex_str(),
                Tag::regex_str(),
            ))
            .unwrap();
        }
        let captures = match RE.captures(s) {
            None => return Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => captures,
        };
        let repository = match captures.name("repo") {
            None => return Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(m) => Repository::parse(m.as_str())?,
        };
        let tag = match captures.name("tag") {
            None => Tag::latest(),
            Some(m) => Tag::parse(m.as_str())?,
        };
        Ok(ImageName { repository, tag })
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Return references to the repository and tag strings
    pub fn as_parts(&self) -> (&str, &str) {
        (self.repository.as_str(), self.tag.as_str())
    }
}

impl FromStr for ImageName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
