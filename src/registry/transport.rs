//! The HTTP seam between the registry client and the network

use crate::errors::ImageError;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use std::{
    fmt,
    fs::File,
    io::{Cursor, Read},
};
use url::Url;

/// One request to the registry
///
/// Requests are fully described up front, including all headers. The
/// transport adds nothing except what its own configuration asks for (such as
/// a `User-Agent`).
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Set a header, replacing any earlier value
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }
}

/// Request body
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// An open file streamed from its current position, and its length
    File(File, u64),
}

impl Body {
    /// Number of bytes this body will send
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File(_, len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body into memory
    pub fn into_bytes(self) -> Result<Vec<u8>, ImageError> {
        match self {
            Body::Empty => Ok(Vec::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::File(file, len) => {
                let mut buffer = Vec::with_capacity(len as usize);
                file.take(len).read_to_end(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::File(_, len) => write!(f, "Body::File({} bytes)", len),
        }
    }
}

/// Response from the registry, with a streaming body
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Box<dyn Read + Send>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Box<dyn Read + Send>) -> Self {
        Response {
            status,
            headers,
            body,
        }
    }

    /// A response whose body is already in memory
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Response::new(status, headers, Box::new(Cursor::new(body)))
    }

    /// Consume the response, returning its body as a reader
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    /// Read the entire body
    pub fn bytes(mut self) -> Result<Vec<u8>, ImageError> {
        let mut buffer = Vec::new();
        self.body.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Read the body as text for diagnostics, never failing
    pub fn text_lossy(self) -> String {
        match self.bytes() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_owned(),
            Err(err) => format!("(unreadable response body: {})", err),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Blocking request/response transport to a registry server
///
/// Every call blocks until the response headers are available. The client
/// issues requests strictly one at a time.
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response
    ///
    /// An unsuccessful HTTP status is not an error at this level; only
    /// failures to exchange the request at all are.
    fn execute(&self, request: Request) -> Result<Response, ImageError>;
}

/// [Transport] over the network, using a blocking `reqwest` client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    req: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(req: reqwest::blocking::Client) -> Self {
        HttpTransport { req }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: Request) -> Result<Response, ImageError> {
        let Request {
            method,
            url,
            headers,
            body,
        } = request;
        let builder = self.req.request(method, url).headers(headers);
        let builder = match body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes),
            Body::File(file, len) => builder.body(reqwest::blocking::Body::sized(file, len)),
        };
        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        Ok(Response::new(status, headers, Box::new(response)))
    }
}
