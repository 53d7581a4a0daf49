//! In-process registry server, for tests and local experiments
//!
//! [MemoryRegistry] answers the subset of the Docker Registry v2 API that
//! [Client](super::Client) speaks, keeping everything in memory. It records
//! each request it sees, and can be told to fail specific requests, which
//! makes it useful for checking exactly what went over the wire.

use crate::{
    errors::ImageError,
    image::{ContentDigest, Repository, Tag},
    manifest::{media_types, Manifest, CONTENT_DIGEST_HEADER},
    registry::{
        auth::Credentials,
        transport::{Body, Request, Response, Transport},
    },
};
use http::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode,
};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// One request as seen by a [MemoryRegistry]
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body_len: u64,
}

#[derive(Debug)]
struct Fault {
    method: Method,
    path_contains: String,
    status: StatusCode,
}

#[derive(Debug)]
struct Upload {
    repository: String,
    data: Vec<u8>,
}

#[derive(Default, Debug)]
struct State {
    blobs: HashMap<(String, ContentDigest), Vec<u8>>,
    manifests: HashMap<(String, String), Vec<u8>>,
    uploads: HashMap<String, Upload>,
    next_upload_id: u64,
    requests: Vec<RecordedRequest>,
    faults: Vec<Fault>,
}

enum Route<'a> {
    Ping,
    Manifest(&'a str, &'a str),
    Blob(&'a str, &'a str),
    UploadStart(&'a str),
    Upload(&'a str, &'a str),
    Unknown,
}

fn route(path: &str) -> Route<'_> {
    let rest = match path.strip_prefix("/v2/") {
        None => return Route::Unknown,
        Some(rest) => rest,
    };
    if rest.is_empty() {
        Route::Ping
    } else if let Some((name, id)) = rest.rsplit_once("/blobs/uploads/") {
        if id.is_empty() {
            Route::UploadStart(name)
        } else {
            Route::Upload(name, id)
        }
    } else if let Some((name, digest)) = rest.rsplit_once("/blobs/") {
        Route::Blob(name, digest)
    } else if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
        Route::Manifest(name, reference)
    } else {
        Route::Unknown
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    fn new(status: StatusCode) -> Self {
        Reply {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    fn error(status: StatusCode, code: &str, message: &str) -> Self {
        let body = serde_json::json!({
            "errors": [{ "code": code, "message": message, "detail": null }]
        });
        let mut reply = Reply::new(status);
        reply.body = body.to_string().into_bytes();
        reply
    }

    fn header(mut self, name: &'static str, value: &str) -> Result<Self, ImageError> {
        self.headers.append(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// Docker Registry v2 server that lives in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    credentials: Option<Credentials>,
}

impl MemoryRegistry {
    /// A registry that accepts anonymous requests
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry that answers `401 Unauthorized` unless each request carries
    /// these Basic credentials
    pub fn with_credentials(credentials: Credentials) -> Self {
        MemoryRegistry {
            state: Default::default(),
            credentials: Some(credentials),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer `status` to every request with this method whose path contains
    /// `path_contains`
    pub fn fail_requests(&self, method: Method, path_contains: &str, status: StatusCode) {
        self.lock().faults.push(Fault {
            method,
            path_contains: path_contains.to_owned(),
            status,
        });
    }

    /// Every request seen so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Store a blob directly, returning its digest
    pub fn insert_blob(&self, repository: &Repository, content: &[u8]) -> ContentDigest {
        let digest = ContentDigest::from_content(content);
        self.lock().blobs.insert(
            (repository.to_string(), digest.clone()),
            content.to_vec(),
        );
        digest
    }

    /// Store a raw manifest body directly, without any validation
    pub fn insert_manifest(&self, repository: &Repository, tag: &Tag, body: &[u8]) {
        self.lock().manifests.insert(
            (repository.to_string(), tag.to_string()),
            body.to_vec(),
        );
    }

    pub fn blob(&self, repository: &Repository, digest: &ContentDigest) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .get(&(repository.to_string(), digest.clone()))
            .cloned()
    }

    pub fn manifest(&self, repository: &Repository, tag: &Tag) -> Option<Vec<u8>> {
        self.lock()
            .manifests
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
    }

    /// Number of blobs stored, across all repositories
    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Number of uploads that were started but never finalized
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    fn is_authorized(&self, headers: &HeaderMap) -> Result<bool, ImageError> {
        match &self.credentials {
            None => Ok(true),
            Some(credentials) => {
                let expected = credentials.authorization()?;
                Ok(headers.get(header::AUTHORIZATION) == Some(&expected))
            }
        }
    }

    fn handle(
        &self,
        state: &mut State,
        method: &Method,
        request: &Request,
        body: Vec<u8>,
    ) -> Result<Reply, ImageError> {
        let path = request.url.path();
        if let Some(fault) = state
            .faults
            .iter()
            .find(|f| &f.method == method && path.contains(&f.path_contains))
        {
            return Ok(Reply::error(fault.status, "INJECTED", "injected failure"));
        }
        if !self.is_authorized(&request.headers)? {
            return Reply::error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "authentication required",
            )
            .header("www-authenticate", "Basic realm=\"dockyard\"");
        }
        match route(path) {
            Route::Ping if method == Method::GET => Ok(Reply::new(StatusCode::OK)
                .header("docker-distribution-api-version", "registry/2.0")?
                .body(b"{}".to_vec())),
            Route::Manifest(name, reference) => {
                self.handle_manifest(state, method, name, reference, body)
            }
            Route::Blob(name, digest) => self.handle_blob(state, method, name, digest),
            Route::UploadStart(name) if method == Method::POST => {
                state.next_upload_id += 1;
                let id = format!("upload-{}", state.next_upload_id);
                state.uploads.insert(
                    id.clone(),
                    Upload {
                        repository: name.to_owned(),
                        data: Vec::new(),
                    },
                );
                Reply::new(StatusCode::ACCEPTED)
                    .header(
                        "location",
                        &format!("/v2/{}/blobs/uploads/{}?_state=0", name, id),
                    )?
                    .header("docker-upload-uuid", &id)?
                    .header("range", "0-0")
            }
            Route::Upload(name, id) => self.handle_upload(state, method, request, name, id, body),
            _ => Ok(Reply::error(
                StatusCode::NOT_FOUND,
                "UNSUPPORTED",
                "the operation is unsupported",
            )),
        }
    }

    fn handle_manifest(
        &self,
        state: &mut State,
        method: &Method,
        name: &str,
        reference: &str,
        body: Vec<u8>,
    ) -> Result<Reply, ImageError> {
        let key = (name.to_owned(), reference.to_owned());
        if method == Method::PUT {
            let (repository, tag) = match (Repository::parse(name), Tag::parse(reference)) {
                (Ok(repository), Ok(tag)) => (repository, tag),
                _ => {
                    return Ok(Reply::error(
                        StatusCode::BAD_REQUEST,
                        "NAME_INVALID",
                        "invalid repository name or tag",
                    ))
                }
            };
            let manifest = match Manifest::parse(&repository, &tag, &body) {
                Ok(manifest) => manifest,
                Err(err) => {
                    return Ok(Reply::error(
                        StatusCode::BAD_REQUEST,
                        "MANIFEST_INVALID",
                        &err.to_string(),
                    ))
                }
            };
            for digest in &manifest.layers {
                if !state.blobs.contains_key(&(name.to_owned(), digest.clone())) {
                    return Ok(Reply::error(
                        StatusCode::BAD_REQUEST,
                        "MANIFEST_BLOB_UNKNOWN",
                        &format!("blob unknown to registry: {}", digest),
                    ));
                }
            }
            let digest = ContentDigest::from_content(&body);
            state.manifests.insert(key, body);
            return Reply::new(StatusCode::CREATED)
                .header(
                    "location",
                    &format!("/v2/{}/manifests/{}", name, digest),
                )?
                .header(CONTENT_DIGEST_HEADER, digest.as_str());
        }
        let stored = match state.manifests.get(&key) {
            None => {
                return Ok(Reply::error(
                    StatusCode::NOT_FOUND,
                    "MANIFEST_UNKNOWN",
                    "manifest unknown",
                ))
            }
            Some(stored) => stored,
        };
        if method == Method::HEAD || method == Method::GET {
            let reply = Reply::new(StatusCode::OK)
                .header(
                    CONTENT_DIGEST_HEADER,
                    ContentDigest::from_content(stored).as_str(),
                )?
                .header("content-type", media_types::MANIFEST_JSON)?;
            if method == Method::GET {
                Ok(reply.body(stored.clone()))
            } else {
                reply.header("content-length", &stored.len().to_string())
            }
        } else if method == Method::DELETE {
            state.manifests.remove(&key);
            Ok(Reply::new(StatusCode::ACCEPTED))
        } else {
            Ok(Reply::error(
                StatusCode::METHOD_NOT_ALLOWED,
                "UNSUPPORTED",
                "the operation is unsupported",
            ))
        }
    }

    fn handle_blob(
        &self,
        state: &mut State,
        method: &Method,
        name: &str,
        digest: &str,
    ) -> Result<Reply, ImageError> {
        let digest = match ContentDigest::parse(digest) {
            Ok(digest) => digest,
            Err(_) => {
                return Ok(Reply::error(
                    StatusCode::BAD_REQUEST,
                    "DIGEST_INVALID",
                    "provided digest did not match uploaded content",
                ))
            }
        };
        let key = (name.to_owned(), digest.clone());
        let stored = match state.blobs.get(&key) {
            None => {
                return Ok(Reply::error(
                    StatusCode::NOT_FOUND,
                    "BLOB_UNKNOWN",
                    "blob unknown to registry",
                ))
            }
            Some(stored) => stored,
        };
        if method == Method::HEAD || method == Method::GET {
            let reply = Reply::new(StatusCode::OK)
                .header(CONTENT_DIGEST_HEADER, digest.as_str())?
                .header("content-type", media_types::OCTET_STREAM)?;
            if method == Method::GET {
                Ok(reply.body(stored.clone()))
            } else {
                reply.header("content-length", &stored.len().to_string())
            }
        } else if method == Method::DELETE {
            state.blobs.remove(&key);
            Ok(Reply::new(StatusCode::ACCEPTED))
        } else {
            Ok(Reply::error(
                StatusCode::METHOD_NOT_ALLOWED,
                "UNSUPPORTED",
                "the operation is unsupported",
            ))
        }
    }

    fn handle_upload(
        &self,
        state: &mut State,
        method: &Method,
        request: &Request,
        name: &str,
        id: &str,
        body: Vec<u8>,
    ) -> Result<Reply, ImageError> {
        let upload = match state.uploads.get_mut(id) {
            Some(upload) if upload.repository == name => upload,
            _ => {
                return Ok(Reply::error(
                    StatusCode::NOT_FOUND,
                    "BLOB_UPLOAD_UNKNOWN",
                    "blob upload unknown to registry",
                ))
            }
        };

        if method == Method::PATCH {
            if let Some(range) = request.headers.get("content-range") {
                let start = range
                    .to_str()
                    .ok()
                    .and_then(|range| range.split_once('-'))
                    .and_then(|(start, _)| start.parse::<usize>().ok());
                if start != Some(upload.data.len()) {
                    return Ok(Reply::error(
                        StatusCode::RANGE_NOT_SATISFIABLE,
                        "BLOB_UPLOAD_INVALID",
                        "content range does not continue the upload",
                    ));
                }
            }
            upload.data.extend_from_slice(&body);
            let received = upload.data.len();
            Reply::new(StatusCode::ACCEPTED)
                .header(
                    "location",
                    &format!("/v2/{}/blobs/uploads/{}?_state={}", name, id, received),
                )?
                .header("docker-upload-uuid", id)?
                .header("range", &format!("0-{}", received.saturating_sub(1)))
        } else if method == Method::PUT {
            let expected = request
                .url
                .query_pairs()
                .find(|(key, _)| key == "digest")
                .and_then(|(_, value)| ContentDigest::parse(&value).ok());
            upload.data.extend_from_slice(&body);
            let found = ContentDigest::from_content(&upload.data);
            if expected.as_ref() != Some(&found) {
                state.uploads.remove(id);
                return Ok(Reply::error(
                    StatusCode::BAD_REQUEST,
                    "DIGEST_INVALID",
                    "provided digest did not match uploaded content",
                ));
            }
            if let Some(upload) = state.uploads.remove(id) {
                state
                    .blobs
                    .insert((name.to_owned(), found.clone()), upload.data);
            }
            Reply::new(StatusCode::CREATED)
                .header("location", &format!("/v2/{}/blobs/{}", name, found))?
                .header(CONTENT_DIGEST_HEADER, found.as_str())
        } else if method == Method::DELETE {
            state.uploads.remove(id);
            Ok(Reply::new(StatusCode::NO_CONTENT))
        } else {
            Ok(Reply::error(
                StatusCode::METHOD_NOT_ALLOWED,
                "UNSUPPORTED",
                "the operation is unsupported",
            ))
        }
    }
}

impl Transport for MemoryRegistry {
    fn execute(&self, mut request: Request) -> Result<Response, ImageError> {
        let body = std::mem::replace(&mut request.body, Body::Empty).into_bytes()?;
        let method = request.method.clone();
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: method.clone(),
            path: request.url.path().to_owned(),
            query: request.url.query().map(str::to_owned),
            headers: request.headers.clone(),
            body_len: body.len() as u64,
        });
        let reply = self.handle(&mut state, &method, &request, body)?;
        log::trace!(
            "memory registry, {} {} -> {}",
            method,
            request.url.path(),
            reply.status
        );
        let body = if method == Method::HEAD {
            Vec::new()
        } else {
            reply.body
        };
        Ok(Response::from_bytes(reply.status, reply.headers, body))
    }
}
