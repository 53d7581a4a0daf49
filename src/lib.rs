//! Move container images between local archives and a Docker Registry v2
//! server
//!
//! Images are pushed from, and pulled into, tar archives on the local
//! filesystem. Layers the registry already has are never uploaded again.

#[macro_use] extern crate lazy_static;
#[macro_use] extern crate serde;

pub mod archive;
pub mod errors;
pub mod image;
pub mod manifest;
pub mod registry;
pub mod store;

pub use crate::{
    errors::ImageError,
    image::{ContentDigest, ImageName, Registry, Repository, Tag},
    manifest::Manifest,
    registry::{Client, ClientBuilder},
};
