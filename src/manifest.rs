//! Legacy (schema1-style) image manifests
//!
//! Only the parts of the schema1 format this client needs are modelled: the
//! image name and tag, and the ordered `fsLayers` list of blob digests.
//!
//! Reference: <https://docs.docker.com/registry/spec/manifest-v2-1/>

use crate::{
    errors::ImageError,
    image::{ContentDigest, Repository, Tag},
};
use http::header::HeaderMap;
use serde_json::Value;

/// Response header carrying the registry's digest for a manifest
pub const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

pub mod media_types {
    pub const MANIFEST_JSON: &str = "application/json; charset=utf-8";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// An image as the registry sees it: a named, tagged, ordered list of layers
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    pub repository: Repository,
    pub tag: Tag,
    /// Layer digests, in archive order on push and verbatim wire order on pull
    pub layers: Vec<ContentDigest>,
    /// Digest asserted by the server in `Docker-Content-Digest`, if any. This
    /// is not checked against the manifest body.
    pub content_digest: Option<ContentDigest>,
}

#[derive(Clone, Debug, Serialize)]
struct WireManifest {
    name: String,
    tag: String,
    #[serde(rename = "fsLayers")]
    fs_layers: Vec<FsLayer>,
}

#[derive(Clone, Debug, Serialize)]
struct FsLayer {
    #[serde(rename = "blobSum")]
    blob_sum: ContentDigest,
}

fn malformed<F: Into<String>, R: Into<String>>(field: F, reason: R) -> ImageError {
    ImageError::MalformedManifest {
        field: field.into(),
        reason: reason.into(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Manifest {
    /// Assemble a manifest for a set of layers that were just pushed
    ///
    /// The order of `layers` is kept exactly.
    pub fn build(repository: Repository, tag: Tag, layers: Vec<ContentDigest>) -> Self {
        Manifest {
            repository,
            tag,
            layers,
            content_digest: None,
        }
    }

    /// Parse a manifest body fetched for `repository:tag`
    ///
    /// The body must hold a `fsLayers` array whose elements each carry a
    /// `blobSum` digest string. Anything else fails with
    /// [ImageError::MalformedManifest] naming the first offending field.
    /// The `name` and `tag` fields in the body are informational and are not
    /// required; the manifest is attributed to the name it was requested by.
    pub fn parse(repository: &Repository, tag: &Tag, body: &[u8]) -> Result<Self, ImageError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| malformed("body", format!("not valid json, {}", err)))?;
        let object = match &value {
            Value::Object(object) => object,
            other => {
                return Err(malformed(
                    "body",
                    format!("expected an object, found {}", json_type_name(other)),
                ))
            }
        };
        let fs_layers = match object.get("fsLayers") {
            None => return Err(malformed("fsLayers", "missing")),
            Some(Value::Array(fs_layers)) => fs_layers,
            Some(other) => {
                return Err(malformed(
                    "fsLayers",
                    format!("expected an array, found {}", json_type_name(other)),
                ))
            }
        };
        let mut layers = Vec::with_capacity(fs_layers.len());
        for (index, layer) in fs_layers.iter().enumerate() {
            let field = format!("fsLayers[{}]", index);
            let blob_sum = match layer {
                Value::Object(layer) => layer.get("blobSum"),
                other => {
                    return Err(malformed(
                        field,
                        format!("expected an object, found {}", json_type_name(other)),
                    ))
                }
            };
            let field = format!("{}.blobSum", field);
            let digest = match blob_sum {
                None => return Err(malformed(field, "missing")),
                Some(Value::String(s)) => ContentDigest::parse(s)
                    .map_err(|_| malformed(field, format!("{:?} is not a sha256 digest", s)))?,
                Some(other) => {
                    return Err(malformed(
                        field,
                        format!("expected a string, found {}", json_type_name(other)),
                    ))
                }
            };
            layers.push(digest);
        }
        Ok(Manifest::build(repository.clone(), tag.clone(), layers))
    }

    /// Serialize to the wire format
    ///
    /// `{"name":…,"tag":…,"fsLayers":[{"blobSum":"sha256:…"},…]}`
    pub fn to_json(&self) -> Result<Vec<u8>, ImageError> {
        let wire = WireManifest {
            name: self.repository.to_string(),
            tag: self.tag.to_string(),
            fs_layers: self
                .layers
                .iter()
                .map(|digest| FsLayer {
                    blob_sum: digest.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Digest of the serialized body as this client would upload it
    pub fn local_digest(&self) -> Result<ContentDigest, ImageError> {
        Ok(ContentDigest::from_content(&self.to_json()?))
    }

    /// Attach the digest the server reported for this manifest
    pub fn with_content_digest(mut self, content_digest: Option<ContentDigest>) -> Self {
        self.content_digest = content_digest;
        self
    }
}

/// Read the `Docker-Content-Digest` header from a registry response
///
/// No header at all means the registry did not say, and is not an error.
/// Repeated headers are a protocol error.
pub fn content_digest_from_headers(
    headers: &HeaderMap,
) -> Result<Option<ContentDigest>, ImageError> {
    let values: Vec<_> = headers.get_all(CONTENT_DIGEST_HEADER).iter().collect();
    match values.as_slice() {
        [] => Ok(None),
        [value] => {
            let s = value.to_str().map_err(|_| ImageError::InvalidHeader {
                name: CONTENT_DIGEST_HEADER,
            })?;
            Ok(Some(ContentDigest::parse(s.trim())?))
        }
        _ => Err(ImageError::DuplicateHeader {
            name: CONTENT_DIGEST_HEADER,
            count: values.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn name() -> (Repository, Tag) {
        ("acme/app".parse().unwrap(), "v1".parse().unwrap())
    }

    fn digests() -> Vec<ContentDigest> {
        vec![
            ContentDigest::from_content(b"first"),
            ContentDigest::from_content(b"second"),
            ContentDigest::from_content(b"third"),
        ]
    }

    fn field_of(result: Result<Manifest, ImageError>) -> String {
        match result {
            Err(ImageError::MalformedManifest { field, .. }) => field,
            other => panic!("expected a malformed manifest error, got {:?}", other),
        }
    }

    #[test]
    fn build_preserves_order() {
        let (repo, tag) = name();
        let manifest = Manifest::build(repo.clone(), tag.clone(), digests());
        let json: Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "acme/app");
        assert_eq!(json["tag"], "v1");
        let sums: Vec<&str> = json["fsLayers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|layer| layer["blobSum"].as_str().unwrap())
            .collect();
        let expected: Vec<String> = digests().iter().map(|d| d.to_string()).collect();
        assert_eq!(sums, expected);

        let parsed = Manifest::parse(&repo, &tag, &manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed.layers, digests());
        assert_eq!(parsed.content_digest, None);
    }

    #[test]
    fn build_empty() {
        let (repo, tag) = name();
        let manifest = Manifest::build(repo, tag, vec![]);
        assert_eq!(
            String::from_utf8(manifest.to_json().unwrap()).unwrap(),
            r#"{"name":"acme/app","tag":"v1","fsLayers":[]}"#
        );
    }

    #[test]
    fn parse_keeps_wire_order() {
        let (repo, tag) = name();
        let [a, b, c] = [
            ContentDigest::from_content(b"a"),
            ContentDigest::from_content(b"b"),
            ContentDigest::from_content(b"c"),
        ];
        let body = format!(
            r#"{{"schemaVersion": 1, "fsLayers": [{{"blobSum": "{}"}}, {{"blobSum": "{}"}}, {{"blobSum": "{}"}}], "history": []}}"#,
            c, a, b
        );
        let manifest = Manifest::parse(&repo, &tag, body.as_bytes()).unwrap();
        assert_eq!(manifest.layers, vec![c, a, b]);
    }

    #[test]
    fn parse_missing_fs_layers() {
        let (repo, tag) = name();
        let result = Manifest::parse(&repo, &tag, br#"{"name": "acme/app", "tag": "v1"}"#);
        assert_eq!(field_of(result), "fsLayers");
    }

    #[test]
    fn parse_fs_layers_not_array() {
        let (repo, tag) = name();
        let result = Manifest::parse(&repo, &tag, br#"{"fsLayers": {"blobSum": "x"}}"#);
        assert_eq!(field_of(result), "fsLayers");
    }

    #[test]
    fn parse_numeric_blob_sum() {
        let (repo, tag) = name();
        let body = format!(
            r#"{{"fsLayers": [{{"blobSum": "{}"}}, {{"blobSum": 42}}]}}"#,
            ContentDigest::from_content(b"ok")
        );
        let result = Manifest::parse(&repo, &tag, body.as_bytes());
        assert_eq!(field_of(result), "fsLayers[1].blobSum");
    }

    #[test]
    fn parse_missing_blob_sum() {
        let (repo, tag) = name();
        let result = Manifest::parse(&repo, &tag, br#"{"fsLayers": [{"size": 3}]}"#);
        assert_eq!(field_of(result), "fsLayers[0].blobSum");
    }

    #[test]
    fn parse_layer_not_object() {
        let (repo, tag) = name();
        let result = Manifest::parse(&repo, &tag, br#"{"fsLayers": ["sha256:00"]}"#);
        assert_eq!(field_of(result), "fsLayers[0]");
    }

    #[test]
    fn parse_bad_digest_string() {
        let (repo, tag) = name();
        let result = Manifest::parse(&repo, &tag, br#"{"fsLayers": [{"blobSum": "md5:1234"}]}"#);
        assert_eq!(field_of(result), "fsLayers[0].blobSum");
    }

    #[test]
    fn parse_not_json() {
        let (repo, tag) = name();
        assert_eq!(field_of(Manifest::parse(&repo, &tag, b"<html>")), "body");
        assert_eq!(field_of(Manifest::parse(&repo, &tag, b"[]")), "body");
    }

    #[test]
    fn content_digest_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_digest_from_headers(&headers).unwrap(), None);

        let digest = ContentDigest::from_content(b"manifest");
        headers.append(
            CONTENT_DIGEST_HEADER,
            HeaderValue::from_str(digest.as_str()).unwrap(),
        );
        assert_eq!(
            content_digest_from_headers(&headers).unwrap(),
            Some(digest.clone())
        );

        headers.append(
            CONTENT_DIGEST_HEADER,
            HeaderValue::from_str(digest.as_str()).unwrap(),
        );
        match content_digest_from_headers(&headers) {
            Err(ImageError::DuplicateHeader { count: 2, .. }) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn local_digest_is_digest_of_body() {
        let (repo, tag) = name();
        let manifest = Manifest::build(repo, tag, digests());
        assert_eq!(
            manifest.local_digest().unwrap(),
            ContentDigest::from_content(&manifest.to_json().unwrap())
        );
    }
}
