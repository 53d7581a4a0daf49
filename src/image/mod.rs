//! Image identity: repository names, tags, content digests, and registries


mod digest;
mod name;
mod registry;
mod repository;
mod tag;

pub use digest::{ContentDigest, DigestWriter};
pub use name::ImageName;
pub use registry::Registry;
pub use repository::{Repository, RepositoryIter, MAX_REPOSITORY_LEN};
pub use tag::{Tag, MAX_TAG_LEN};
