//! Support for moving images between local archives and a registry server

use crate::{
    archive,
    errors::{ImageError, Stage},
    image::{ContentDigest, Registry, Repository, Tag},
    manifest::{content_digest_from_headers, media_types, Manifest},
    registry::{
        auth::Credentials,
        transport::{Body, HttpTransport, Request, Response, Transport},
    },
};
use http::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode,
};
use reqwest::Certificate;
use std::{convert::TryInto, env, fmt, path::Path, sync::Arc, time::Duration};
use url::Url;

/// Builder for configuring custom [Client] instances
pub struct ClientBuilder {
    req: reqwest::blocking::ClientBuilder,
    registry: Option<Registry>,
    https: Option<bool>,
    credentials: Option<Credentials>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Start constructing a custom registry client
    pub fn new() -> Self {
        let req = reqwest::blocking::Client::builder().user_agent(Client::default_user_agent());
        ClientBuilder {
            req,
            registry: None,
            https: None,
            credentials: None,
            transport: None,
        }
    }

    /// Set the registry server to talk to
    ///
    /// If unset, [Client::default_registry()] is consulted when the client is
    /// built.
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Force plain HTTP, regardless of what the registry name suggests
    pub fn insecure(mut self) -> Self {
        self.https = Some(false);
        self
    }

    /// Choose explicitly between HTTPS and plain HTTP
    pub fn https(mut self, https: bool) -> Self {
        self.https = Some(https);
        self
    }

    /// Send HTTP Basic credentials with every request
    ///
    /// If no login is set, [Credentials::from_env()] is consulted when the
    /// client is built.
    pub fn login(mut self, username: String, password: Option<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the last
    /// byte has been received. By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    ///
    /// By default there is no timeout beyond those built into the networking
    /// stack.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by this client
    ///
    /// By default, the value returned by [Client::default_user_agent()] is
    /// used, which identifies the version of `dockyard` acting as a client.
    pub fn user_agent<V>(mut self, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.req = self.req.user_agent(value);
        self
    }

    /// Set the default headers for every HTTP request
    pub fn default_request_headers(mut self, headers: HeaderMap) -> Self {
        self.req = self.req.default_headers(headers);
        self
    }

    /// Trust an additional root certificate
    pub fn add_root_certificate(mut self, certificate: Certificate) -> Self {
        self.req = self.req.add_root_certificate(certificate);
        self
    }

    /// Replace the network transport
    ///
    /// Network settings on this builder (timeouts, user agent, certificates)
    /// only apply to the default transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve defaults and produce the configuration a [Client] runs with
    pub fn config(self) -> Result<ClientConfig, ImageError> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => Client::default_registry()?,
        };
        let registry = match self.https {
            Some(https) => registry.with_https(https),
            None => registry,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.req.build()?)),
        };
        Ok(ClientConfig {
            registry,
            credentials: self.credentials.or_else(Credentials::from_env),
            transport,
        })
    }

    /// Construct a Client using the parameters from this Builder
    ///
    /// No network traffic happens here; see [ClientBuilder::open()].
    pub fn build(self) -> Result<Client, ImageError> {
        Client::new(self.config()?)
    }

    /// Construct a Client, and check that the registry answers
    pub fn open(self) -> Result<Client, ImageError> {
        let client = self.build()?;
        client.ping()?;
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::new()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("registry", &self.registry)
            .field("https", &self.https)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Everything a [Client] needs: where the registry is, how to reach it, and
/// who to say we are
#[derive(Clone)]
pub struct ClientConfig {
    pub registry: Registry,
    pub credentials: Option<Credentials>,
    pub transport: Arc<dyn Transport>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("registry", &self.registry)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Registry clients move images between local archives and one registry
/// server
///
/// Each client is bound to a single registry, with optional credentials that
/// accompany every request. Requests are issued one at a time and block until
/// the server has answered.
#[derive(Clone)]
pub struct Client {
    registry: Registry,
    base_url: Url,
    credentials: Option<Credentials>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl Client {
    /// Construct a registry client from a resolved configuration
    pub fn new(config: ClientConfig) -> Result<Client, ImageError> {
        let base_url = config.registry.base_url()?;
        log::debug!("registry client for {}", base_url);
        Ok(Client {
            registry: config.registry,
            base_url,
            credentials: config.credentials,
            transport: config.transport,
        })
    }

    /// Construct a registry client with custom options, via ClientBuilder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to a registry with default options, and check that it answers
    pub fn open(registry: &Registry) -> Result<Client, ImageError> {
        Client::builder().registry(registry).open()
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    /// Return the default registry server
    ///
    /// This is read from the `$DOCKYARD_REGISTRY` environment variable, as a
    /// `host[:port]` string. There is no built-in fallback.
    pub fn default_registry() -> Result<Registry, ImageError> {
        match env::var("DOCKYARD_REGISTRY") {
            Ok(s) => Registry::parse(&s),
            Err(_) => Err(ImageError::NoDefaultRegistry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url, ImageError> {
        Ok(self.base_url.join(path)?)
    }

    /// Start a request, with credentials attached if we have them
    pub(crate) fn request(&self, method: Method, url: Url) -> Result<Request, ImageError> {
        let request = Request::new(method, url);
        Ok(match &self.credentials {
            Some(credentials) => {
                request.header(header::AUTHORIZATION, credentials.authorization()?)
            }
            None => request,
        })
    }

    pub(crate) fn send(&self, request: Request) -> Result<Response, ImageError> {
        log::debug!("{} {}", request.method, request.url);
        let response = self.transport.execute(request)?;
        log::trace!("response {:?}", response);
        Ok(response)
    }

    /// Send a request, and turn any unsuccessful status into an error
    pub(crate) fn send_expecting_success(
        &self,
        stage: Stage,
        request: Request,
    ) -> Result<Response, ImageError> {
        let response = self.send(request)?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(registry_error(stage, response))
        }
    }

    /// HEAD a resource, answering whether it exists
    pub(crate) fn probe(&self, stage: Stage, url: Url) -> Result<bool, ImageError> {
        let response = self.send(self.request(Method::HEAD, url)?)?;
        match response.status {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(registry_error(stage, response)),
        }
    }

    /// Check that the server speaks the v2 API and accepts our credentials
    pub fn ping(&self) -> Result<(), ImageError> {
        let url = self.url("v2/")?;
        self.send_expecting_success(Stage::Ping, self.request(Method::GET, url)?)?;
        log::info!("registry {} is available", self.registry);
        Ok(())
    }

    /// Does the registry have a manifest for `repository:tag`?
    pub fn image_exists(&self, repository: &Repository, tag: &Tag) -> Result<bool, ImageError> {
        let url = self.url(&manifest_path(repository, tag))?;
        let exists = self.probe(Stage::ManifestExists, url)?;
        log::debug!("{}:{} exists: {}", repository, tag, exists);
        Ok(exists)
    }

    /// Fetch and parse the manifest for `repository:tag`
    pub fn get_image_info(
        &self,
        repository: &Repository,
        tag: &Tag,
    ) -> Result<Manifest, ImageError> {
        let url = self.url(&manifest_path(repository, tag))?;
        let request = self
            .request(Method::GET, url)?
            .header(
                header::ACCEPT,
                HeaderValue::from_static(media_types::MANIFEST_JSON),
            );
        let response = self.send_expecting_success(Stage::ManifestFetch, request)?;
        let content_digest = content_digest_from_headers(&response.headers)?;
        let body = response.bytes()?;
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&body));
        let manifest =
            Manifest::parse(repository, tag, &body)?.with_content_digest(content_digest);
        log::info!(
            "{}:{} has {} layers, digest {:?}",
            repository,
            tag,
            manifest.layers.len(),
            manifest.content_digest
        );
        Ok(manifest)
    }

    /// Download `repository:tag` into a local image archive at `dest`
    ///
    /// Layers are fetched in manifest order and each is checked against its
    /// digest. `dest` is only created once every layer has arrived intact.
    pub fn get_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        dest: &Path,
    ) -> Result<Manifest, ImageError> {
        let manifest = self.get_image_info(repository, tag)?;
        archive::pack(dest, &manifest.layers, |digest| {
            Ok(self.fetch_blob(repository, digest)?.into_reader())
        })?;
        log::info!("{}:{} saved to {:?}", repository, tag, dest);
        Ok(manifest)
    }

    /// Upload the local image archive at `archive_path` as `repository:tag`
    ///
    /// Every layer is uploaded in archive order, skipping any the registry
    /// already has, then the manifest is put last. The name recorded inside
    /// the archive is ignored in favor of `repository:tag`.
    pub fn push_image(
        &self,
        repository: &Repository,
        tag: &Tag,
        archive_path: &Path,
    ) -> Result<Manifest, ImageError> {
        let unpacked = archive::unpack(archive_path)?;
        if unpacked.index_repository != repository.as_str() || unpacked.index_tag != tag.as_str() {
            log::info!(
                "archive {:?} names {}:{}, pushing as {}:{}",
                archive_path,
                unpacked.index_repository,
                unpacked.index_tag,
                repository,
                tag
            );
        }
        let mut layers = Vec::with_capacity(unpacked.layers.len());
        for layer in &unpacked.layers {
            layers.push(self.push_layer(repository, &layer.path)?);
        }
        let manifest = Manifest::build(repository.clone(), tag.clone(), layers);
        let content_digest = self.push_manifest(&manifest)?;
        log::info!(
            "pushed {}:{}, {} layers",
            repository,
            tag,
            manifest.layers.len()
        );
        Ok(manifest.with_content_digest(content_digest))
    }

    /// Put a manifest, returning the digest the registry reports for it
    pub fn push_manifest(&self, manifest: &Manifest) -> Result<Option<ContentDigest>, ImageError> {
        let body = manifest.to_json()?;
        let local_digest = ContentDigest::from_content(&body);
        let url = self.url(&manifest_path(&manifest.repository, &manifest.tag))?;
        let request = self
            .request(Method::PUT, url)?
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static(media_types::MANIFEST_JSON),
            )
            .header(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64))
            .body(Body::Bytes(body));
        let response = self.send_expecting_success(Stage::ManifestPut, request)?;
        let content_digest = content_digest_from_headers(&response.headers)?;
        match &content_digest {
            Some(remote) if remote != &local_digest => log::warn!(
                "registry reports manifest digest {}, we computed {}",
                remote,
                local_digest
            ),
            _ => (),
        }
        Ok(content_digest)
    }

    /// Remove `repository:tag`, and every layer blob it references
    ///
    /// Blobs are deleted in manifest order before the manifest itself. The
    /// first failure stops the process, so a partial delete can leave some
    /// blobs removed and the manifest still present.
    pub fn delete_image(&self, repository: &Repository, tag: &Tag) -> Result<(), ImageError> {
        let manifest = self.get_image_info(repository, tag)?;
        for digest in &manifest.layers {
            self.delete_blob(repository, digest)?;
        }
        let url = self.url(&manifest_path(repository, tag))?;
        let request = self.request(Method::DELETE, url)?;
        self.send_expecting_success(Stage::ManifestDelete, request)?;
        log::info!("deleted {}:{}", repository, tag);
        Ok(())
    }
}

pub(crate) fn manifest_path(repository: &Repository, tag: &Tag) -> String {
    format!("v2/{}/manifests/{}", repository, tag)
}

pub(crate) fn blob_path(repository: &Repository, digest: &ContentDigest) -> String {
    format!("v2/{}/blobs/{}", repository, digest)
}

pub(crate) fn upload_path(repository: &Repository) -> String {
    format!("v2/{}/blobs/uploads/", repository)
}

/// Turn an unsuccessful response into an error, keeping its body as the
/// message
pub(crate) fn registry_error(stage: Stage, response: Response) -> ImageError {
    let status = response.status;
    let message = response.text_lossy();
    log::warn!("registry error during {}, {}: {}", stage, status, message);
    ImageError::Registry {
        stage,
        status,
        message,
    }
}

/// Make a header value from a string we built ourselves
pub(crate) fn header_value(s: &str) -> Result<HeaderValue, ImageError> {
    Ok(HeaderValue::from_str(s)?)
}
