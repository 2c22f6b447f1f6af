//! Durable result storage.
//!
//! [`store::ObjectStore`] is the storage seam: [`store::S3ObjectStore`]
//! talks to any S3-compatible endpoint, [`store::MemoryObjectStore`] keeps
//! objects in memory for local runs and tests. [`publisher::ResultPublisher`]
//! uploads a finished video under a fresh key, issues its URL and always
//! removes the local file.

pub mod error;
pub mod publisher;
pub mod store;

pub use error::{PublishError, StoreError};
pub use publisher::{PublishedArtifact, ResultPublisher, UrlAccess};
pub use store::{MemoryObjectStore, ObjectStore, S3Config, S3ObjectStore};
