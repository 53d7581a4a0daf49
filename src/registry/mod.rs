//! Docker Registry v2 client, and an in-memory registry to test it against

mod auth;
mod blob;
mod client;
mod memory;
mod transport;

pub use auth::Credentials;
pub use client::{Client, ClientBuilder, ClientConfig};
pub use memory::{MemoryRegistry, RecordedRequest};
pub use transport::{Body, HttpTransport, Request, Response, Transport};
