//! Layer blob transfer: existence checks, downloads, deletes, and uploads
//!
//! Uploads use the registry's chunked upload protocol with a single chunk:
//! `POST` to open an upload session, one `PATCH` carrying the whole layer,
//! then a `PUT` naming the digest to commit it. A layer the registry already
//! has is never uploaded a second time.

use crate::{
    errors::{ImageError, Stage},
    image::{ContentDigest, Repository},
    manifest::media_types,
    registry::{
        client::{blob_path, header_value, upload_path, Client},
        transport::{Body, Response},
    },
};
use http::{
    header::{self, HeaderMap, HeaderValue},
    Method,
};
use std::{fs::File, path::Path};
use url::Url;

impl Client {
    /// Does the registry already have this blob in `repository`?
    pub fn blob_exists(
        &self,
        repository: &Repository,
        digest: &ContentDigest,
    ) -> Result<bool, ImageError> {
        let url = self.url(&blob_path(repository, digest))?;
        self.probe(Stage::BlobExists, url)
    }

    /// Start downloading a blob
    ///
    /// The response body streams the blob content. It is not checked against
    /// the digest here; the caller sees every byte as it arrives.
    pub fn fetch_blob(
        &self,
        repository: &Repository,
        digest: &ContentDigest,
    ) -> Result<Response, ImageError> {
        let url = self.url(&blob_path(repository, digest))?;
        log::info!("{} downloading blob {}", repository, digest);
        self.send_expecting_success(Stage::BlobFetch, self.request(Method::GET, url)?)
    }

    pub fn delete_blob(
        &self,
        repository: &Repository,
        digest: &ContentDigest,
    ) -> Result<(), ImageError> {
        let url = self.url(&blob_path(repository, digest))?;
        self.send_expecting_success(Stage::BlobDelete, self.request(Method::DELETE, url)?)?;
        log::debug!("{} deleted blob {}", repository, digest);
        Ok(())
    }

    /// Upload one layer file, unless the registry already has its content
    ///
    /// Returns the layer's digest either way.
    pub fn push_layer(
        &self,
        repository: &Repository,
        path: &Path,
    ) -> Result<ContentDigest, ImageError> {
        let (digest, size) = ContentDigest::from_file(path)?;
        log::debug!("{:?} is {}, {} bytes", path, digest, size);
        if size == 0 {
            return Err(ImageError::EmptyFile(path.to_path_buf()));
        }
        if self.blob_exists(repository, &digest)? {
            log::info!("{} already has layer {}", repository, digest);
            return Ok(digest);
        }
        log::info!("{} uploading layer {}, {} bytes", repository, digest, size);
        let location = self.initiate_upload(repository)?;
        let location = self.transfer_layer(location, path, size)?;
        self.finalize_upload(location, &digest)?;
        log::info!("{} upload complete, {}", repository, digest);
        Ok(digest)
    }

    fn initiate_upload(&self, repository: &Repository) -> Result<Url, ImageError> {
        let url = self.url(&upload_path(repository))?;
        let request = self
            .request(Method::POST, url)?
            .header(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        let response = self.send_expecting_success(Stage::UploadInitiate, request)?;
        match self.location(&response.headers)? {
            Some(location) => Ok(location),
            None => Err(ImageError::MissingUploadLocation),
        }
    }

    /// Send the whole layer as a single chunk, returning the location to
    /// finalize the upload at
    fn transfer_layer(&self, location: Url, path: &Path, size: u64) -> Result<Url, ImageError> {
        let file = File::open(path)?;
        let request = self
            .request(Method::PATCH, location.clone())?
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static(media_types::OCTET_STREAM),
            )
            .header(header::CONTENT_LENGTH, HeaderValue::from(size))
            .header(header::CONTENT_RANGE, header_value(&content_range(size))?)
            .body(Body::File(file, size));
        let response = self.send_expecting_success(Stage::UploadTransfer, request)?;
        Ok(self.location(&response.headers)?.unwrap_or(location))
    }

    fn finalize_upload(&self, location: Url, digest: &ContentDigest) -> Result<(), ImageError> {
        let url = finalize_url(location, digest);
        let request = self
            .request(Method::PUT, url)?
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static(media_types::OCTET_STREAM),
            )
            .header(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        self.send_expecting_success(Stage::UploadFinalize, request)?;
        Ok(())
    }

    /// The single `Location` header of a response, resolved against the
    /// registry's base URL
    fn location(&self, headers: &HeaderMap) -> Result<Option<Url>, ImageError> {
        let values: Vec<_> = headers.get_all(header::LOCATION).iter().collect();
        match values.as_slice() {
            [] => Ok(None),
            [value] => {
                let s = value.to_str().map_err(|_| ImageError::InvalidHeader {
                    name: "location",
                })?;
                Ok(Some(self.base_url().join(s.trim())?))
            }
            _ => Err(ImageError::DuplicateHeader {
                name: "location",
                count: values.len(),
            }),
        }
    }
}

/// `Content-Range` for a single chunk holding a whole blob of `size` bytes
fn content_range(size: u64) -> String {
    format!("0-{}", size.saturating_sub(1))
}

/// Append the digest parameter that commits an upload, keeping whatever
/// session state the registry put in the query
fn finalize_url(mut location: Url, digest: &ContentDigest) -> Url {
    let query = match location.query() {
        Some(query) if !query.is_empty() => format!("{}&digest={}", query, digest),
        _ => format!("digest={}", digest),
    };
    location.set_query(Some(&query));
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> ContentDigest {
        ContentDigest::from_content(b"layer")
    }

    #[test]
    fn finalize_url_without_query() {
        let url = Url::parse("http://localhost:5000/v2/acme/app/blobs/uploads/abc").unwrap();
        let url = finalize_url(url, &digest());
        assert_eq!(url.query(), Some(format!("digest={}", digest()).as_str()));
    }

    #[test]
    fn finalize_url_keeps_state() {
        let url =
            Url::parse("http://localhost:5000/v2/acme/app/blobs/uploads/abc?_state=xyz").unwrap();
        let url = finalize_url(url, &digest());
        assert_eq!(
            url.query(),
            Some(format!("_state=xyz&digest={}", digest()).as_str())
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[1], ("digest".to_owned(), digest().to_string()));
    }

    #[test]
    fn content_range_covers_whole_blob() {
        assert_eq!(content_range(1), "0-0");
        assert_eq!(content_range(1234), "0-1233");
    }
}
