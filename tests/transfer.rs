use dockyard::{
    errors::{ImageError, Stage},
    registry::{Client, Credentials, MemoryRegistry, Request, Response, Transport},
    ContentDigest, Repository, Tag,
};
use http::{header, header::HeaderMap, HeaderValue, Method, StatusCode};
use std::{fs, path::PathBuf, sync::Arc};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn client_for(transport: Arc<dyn Transport>) -> Client {
    init_logging();
    Client::builder()
        .registry(&"localhost:5000".parse().unwrap())
        .transport(transport)
        .build()
        .unwrap()
}

fn repo() -> Repository {
    "acme/app".parse().unwrap()
}

fn layer_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn expect_stage<T: std::fmt::Debug>(result: Result<T, ImageError>, expected: Stage) {
    match result {
        Err(ImageError::Registry { stage, status, .. }) => {
            assert_eq!(stage, expected);
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
        other => panic!("expected a registry error, got {:?}", other),
    }
}

/// Passes requests through to a [MemoryRegistry], letting a test tamper with
/// response headers on the way back
struct Tamper<F> {
    inner: Arc<MemoryRegistry>,
    edit: F,
}

impl<F> Transport for Tamper<F>
where
    F: Fn(&Method, &str, &mut HeaderMap) + Send + Sync,
{
    fn execute(&self, request: Request) -> Result<Response, ImageError> {
        let method = request.method.clone();
        let path = request.url.path().to_owned();
        let response = self.inner.execute(request)?;
        let status = response.status;
        let mut headers = response.headers.clone();
        (self.edit)(&method, &path, &mut headers);
        Ok(Response::new(status, headers, response.into_reader()))
    }
}

#[test]
fn upload_handshake() {
    init_logging();
    let credentials = Credentials::new("ci".into(), Some("s3cret".into()));
    let registry = Arc::new(MemoryRegistry::with_credentials(credentials.clone()));
    let client = Client::builder()
        .registry(&"localhost:5000".parse().unwrap())
        .login("ci".into(), Some("s3cret".into()))
        .transport(registry.clone())
        .build()
        .unwrap();
    let authorization = credentials.authorization().unwrap();
    let dir = TempDir::new().unwrap();
    let content = vec![0x5au8; 70_000];
    let digest = ContentDigest::from_content(&content);

    let pushed = client
        .push_layer(&repo(), &layer_file(&dir, "layer.tar", &content))
        .unwrap();
    assert_eq!(pushed, digest);
    assert_eq!(registry.blob(&repo(), &digest), Some(content.clone()));
    assert_eq!(registry.pending_uploads(), 0);

    let requests = registry.requests();
    let methods: Vec<&Method> = requests.iter().map(|r| &r.method).collect();
    assert_eq!(
        methods,
        vec![&Method::HEAD, &Method::POST, &Method::PATCH, &Method::PUT]
    );

    assert_eq!(requests[0].path, format!("/v2/acme/app/blobs/{}", digest));
    assert_eq!(requests[1].path, "/v2/acme/app/blobs/uploads/");

    let patch = &requests[2];
    assert!(patch.path.starts_with("/v2/acme/app/blobs/uploads/"));
    assert_eq!(patch.headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(patch.headers[header::CONTENT_LENGTH], "70000");
    assert_eq!(patch.headers[header::CONTENT_RANGE], "0-69999");
    assert_eq!(patch.body_len, 70_000);

    let put = &requests[3];
    assert_eq!(put.path, patch.path);
    assert_eq!(
        put.query.as_deref(),
        Some(format!("_state=70000&digest={}", digest).as_str())
    );
    assert_eq!(put.body_len, 0);
    assert_eq!(put.headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(put.headers[header::CONTENT_LENGTH], "0");

    for request in &requests {
        assert_eq!(request.headers.get(header::AUTHORIZATION), Some(&authorization));
    }
}

#[test]
fn digests_depend_only_on_content() {
    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let dir = TempDir::new().unwrap();

    let a = client
        .push_layer(&repo(), &layer_file(&dir, "a", b"same bytes"))
        .unwrap();
    registry.clear_requests();
    let b = client
        .push_layer(&repo(), &layer_file(&dir, "b", b"same bytes"))
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a, ContentDigest::from_content(b"same bytes"));

    let requests = registry.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::HEAD);
    assert_eq!(registry.blob_count(), 1);
}

#[test]
fn pushed_layer_fetches_back() {
    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let dir = TempDir::new().unwrap();
    let content = b"layer content for the round trip".to_vec();

    assert!(!client
        .blob_exists(&repo(), &ContentDigest::from_content(&content))
        .unwrap());
    let digest = client
        .push_layer(&repo(), &layer_file(&dir, "layer.tar", &content))
        .unwrap();
    assert!(client.blob_exists(&repo(), &digest).unwrap());
    let fetched = client.fetch_blob(&repo(), &digest).unwrap().bytes().unwrap();
    assert_eq!(fetched, content);

    client.delete_blob(&repo(), &digest).unwrap();
    assert!(!client.blob_exists(&repo(), &digest).unwrap());
    expect_missing(client.fetch_blob(&repo(), &digest), Stage::BlobFetch);
}

fn expect_missing<T: std::fmt::Debug>(result: Result<T, ImageError>, expected: Stage) {
    match result {
        Err(ImageError::Registry { stage, status, .. }) => {
            assert_eq!(stage, expected);
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        other => panic!("expected a registry error, got {:?}", other),
    }
}

#[test]
fn empty_layer_is_not_uploaded() {
    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let dir = TempDir::new().unwrap();
    match client.push_layer(&repo(), &layer_file(&dir, "empty", b"")) {
        Err(ImageError::EmptyFile(_)) => (),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(registry.requests().is_empty());
}

#[test]
fn errors_name_the_failing_step() {
    let dir = TempDir::new().unwrap();
    let layer = layer_file(&dir, "layer.tar", b"some layer");
    let cases = [
        (Method::HEAD, "/blobs/", Stage::BlobExists),
        (Method::POST, "/blobs/uploads/", Stage::UploadInitiate),
        (Method::PATCH, "/blobs/uploads/", Stage::UploadTransfer),
        (Method::PUT, "/blobs/uploads/", Stage::UploadFinalize),
    ];
    for (method, path, stage) in cases.iter() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_requests(method.clone(), path, StatusCode::INTERNAL_SERVER_ERROR);
        let client = client_for(registry.clone());
        expect_stage(client.push_layer(&repo(), &layer), *stage);
    }

    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_requests(Method::GET, "/v2/", StatusCode::INTERNAL_SERVER_ERROR);
    expect_stage(
        Client::builder()
            .registry(&"localhost:5000".parse().unwrap())
            .transport(registry)
            .open(),
        Stage::Ping,
    );
}

#[test]
fn manifest_errors_name_the_failing_step() {
    let tag: Tag = "v1".parse().unwrap();
    let dir = TempDir::new().unwrap();
    let layer = layer_file(&dir, "layer.tar", b"some layer");

    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_requests(Method::HEAD, "/manifests/", StatusCode::INTERNAL_SERVER_ERROR);
    expect_stage(
        client_for(registry).image_exists(&repo(), &tag),
        Stage::ManifestExists,
    );

    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_requests(Method::PUT, "/manifests/", StatusCode::INTERNAL_SERVER_ERROR);
    let client = client_for(registry.clone());
    let digest = client.push_layer(&repo(), &layer).unwrap();
    let manifest = dockyard::Manifest::build(repo(), tag.clone(), vec![digest.clone()]);
    expect_stage(client.push_manifest(&manifest), Stage::ManifestPut);

    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let digest = client.push_layer(&repo(), &layer).unwrap();
    let manifest = dockyard::Manifest::build(repo(), tag.clone(), vec![digest]);
    client.push_manifest(&manifest).unwrap();
    registry.fail_requests(Method::DELETE, "/blobs/", StatusCode::INTERNAL_SERVER_ERROR);
    expect_stage(client.delete_image(&repo(), &tag), Stage::BlobDelete);
    assert!(client.image_exists(&repo(), &tag).unwrap());

    let registry = Arc::new(MemoryRegistry::new());
    registry.fail_requests(Method::DELETE, "/manifests/", StatusCode::INTERNAL_SERVER_ERROR);
    let client = client_for(registry.clone());
    client.push_manifest(&dockyard::Manifest::build(repo(), tag.clone(), vec![])).unwrap();
    expect_stage(client.delete_image(&repo(), &tag), Stage::ManifestDelete);
}

#[test]
fn manifest_referencing_unknown_blob_is_refused() {
    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let manifest = dockyard::Manifest::build(
        repo(),
        "v1".parse().unwrap(),
        vec![ContentDigest::from_content(b"never uploaded")],
    );
    match client.push_manifest(&manifest) {
        Err(ImageError::Registry { stage, status, message }) => {
            assert_eq!(stage, Stage::ManifestPut);
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(message.contains("MANIFEST_BLOB_UNKNOWN"));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn malformed_manifest_from_registry() {
    let registry = Arc::new(MemoryRegistry::new());
    let client = client_for(registry.clone());
    let tag: Tag = "v1".parse().unwrap();
    registry.insert_manifest(&repo(), &tag, br#"{"fsLayers": [{"blobSum": 42}]}"#);
    match client.get_image_info(&repo(), &tag) {
        Err(ImageError::MalformedManifest { field, .. }) => {
            assert_eq!(field, "fsLayers[0].blobSum")
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn upload_without_location_fails() {
    let registry = Arc::new(MemoryRegistry::new());
    let tamper = Tamper {
        inner: registry.clone(),
        edit: |method: &Method, _: &str, headers: &mut HeaderMap| {
            if method == Method::POST {
                headers.remove(header::LOCATION);
            }
        },
    };
    let client = client_for(Arc::new(tamper));
    let dir = TempDir::new().unwrap();
    match client.push_layer(&repo(), &layer_file(&dir, "layer.tar", b"data")) {
        Err(ImageError::MissingUploadLocation) => (),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn upload_with_two_locations_fails() {
    let registry = Arc::new(MemoryRegistry::new());
    let tamper = Tamper {
        inner: registry.clone(),
        edit: |method: &Method, _: &str, headers: &mut HeaderMap| {
            if method == Method::POST {
                headers.append(header::LOCATION, HeaderValue::from_static("/elsewhere"));
            }
        },
    };
    let client = client_for(Arc::new(tamper));
    let dir = TempDir::new().unwrap();
    match client.push_layer(&repo(), &layer_file(&dir, "layer.tar", b"data")) {
        Err(ImageError::DuplicateHeader { count: 2, .. }) => (),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn absolute_upload_locations_are_followed() {
    let registry = Arc::new(MemoryRegistry::new());
    let tamper = Tamper {
        inner: registry.clone(),
        edit: |_: &Method, _: &str, headers: &mut HeaderMap| {
            if let Some(location) = headers.get(header::LOCATION).cloned() {
                let absolute = format!("http://localhost:5000{}", location.to_str().unwrap());
                headers.insert(header::LOCATION, HeaderValue::from_str(&absolute).unwrap());
            }
        },
    };
    let client = client_for(Arc::new(tamper));
    let dir = TempDir::new().unwrap();
    let digest = client
        .push_layer(&repo(), &layer_file(&dir, "layer.tar", b"data"))
        .unwrap();
    assert_eq!(registry.blob(&repo(), &digest), Some(b"data".to_vec()));
}

#[test]
fn repeated_manifest_digest_header_is_an_error() {
    let registry = Arc::new(MemoryRegistry::new());
    let tag: Tag = "v1".parse().unwrap();
    registry.insert_manifest(&repo(), &tag, br#"{"fsLayers": []}"#);
    let tamper = Tamper {
        inner: registry.clone(),
        edit: |method: &Method, path: &str, headers: &mut HeaderMap| {
            if method == Method::GET && path.contains("/manifests/") {
                let digest = ContentDigest::from_content(b"other");
                headers.append(
                    "docker-content-digest",
                    HeaderValue::from_str(digest.as_str()).unwrap(),
                );
            }
        },
    };
    let client = client_for(Arc::new(tamper));
    match client.get_image_info(&repo(), &tag) {
        Err(ImageError::DuplicateHeader { count: 2, .. }) => (),
        other => panic!("unexpected result {:?}", other),
    }
}
