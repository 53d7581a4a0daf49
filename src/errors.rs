//! Error types you might see while moving images to or from a registry

use crate::image::ContentDigest;
use http::StatusCode;
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Errors during image transfer, archive handling, or naming
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// repository names must be shorter than 256 characters
    #[error("repository name is {0} characters long, must be less than 256")]
    RepositoryNameTooLong(usize),

    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// registry url could not be constructed
    #[error("invalid registry url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// a request header could not be constructed
    #[error("invalid request header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// the registry answered with an unsuccessful status
    #[error("registry error during {stage}: {status}; {message}")]
    Registry {
        stage: Stage,
        status: StatusCode,
        message: String,
    },

    /// manifest body is missing a field or has a field of the wrong type
    #[error("malformed manifest, field {field}: {reason}")]
    MalformedManifest { field: String, reason: String },

    /// the `repositories` index in a local image archive is unusable
    #[error("malformed archive index: {0}")]
    MalformedArchiveIndex(String),

    /// upload initiation response had no `Location` header
    #[error("no Location header in upload initiation response")]
    MissingUploadLocation,

    /// a response header that must appear at most once appeared several times
    #[error("expected a single {name} header, found {count}")]
    DuplicateHeader { name: &'static str, count: usize },

    /// a response header could not be interpreted
    #[error("unreadable {name} header in registry response")]
    InvalidHeader { name: &'static str },

    /// a file that was just written has no content
    #[error("no data written to {0:?}")]
    EmptyFile(PathBuf),

    /// a layer directory in the local archive has no `layer.tar`
    #[error("layer {0:?} has no layer.tar payload")]
    MissingLayerPayload(String),

    /// archive entry would be written outside of the scratch directory
    #[error("refusing to extract archive entry with unsafe path {0:?}")]
    UnsafeArchivePath(String),

    /// calculated digest of downloaded content is not what we asked for
    #[error("calculated digest of downloaded content is not what we asked for, expected {expected}, found {found}")]
    ContentDigestMismatch {
        expected: ContentDigest,
        found: ContentDigest,
    },

    /// no registry was configured and none is set in the environment
    #[error("no registry configured, set one explicitly or via $DOCKYARD_REGISTRY")]
    NoDefaultRegistry,

    /// no image is stored under this name
    #[error("image {0} not found")]
    ImageNotFound(String),
}

/// The step of a registry interaction during which an error occurred
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Ping,
    ManifestExists,
    ManifestFetch,
    ManifestPut,
    ManifestDelete,
    BlobExists,
    BlobFetch,
    BlobDelete,
    UploadInitiate,
    UploadTransfer,
    UploadFinalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ping => "ping",
            Stage::ManifestExists => "manifest existence check",
            Stage::ManifestFetch => "manifest fetch",
            Stage::ManifestPut => "manifest put",
            Stage::ManifestDelete => "manifest delete",
            Stage::BlobExists => "blob existence check",
            Stage::BlobFetch => "blob fetch",
            Stage::BlobDelete => "blob delete",
            Stage::UploadInitiate => "upload initiate",
            Stage::UploadTransfer => "upload transfer",
            Stage::UploadFinalize => "upload finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ImageError {
    /// Returns the registry status code, if this error came from one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ImageError::Registry { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the protocol step, if this error came from the registry
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ImageError::Registry { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
