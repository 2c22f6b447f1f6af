/// Errors from an [`ObjectStore`](crate::store::ObjectStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The local file could not be opened or read.
    #[error("Failed to read local file: {0}")]
    Read(String),

    /// The backend rejected or failed the upload.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// A signed URL could not be produced.
    #[error("Failed to sign URL: {0}")]
    Presign(String),

    /// The backend cannot sign URLs at all.
    #[error("URL signing is not supported by this store")]
    PresignUnsupported,
}

/// Errors from [`ResultPublisher::publish`](crate::publisher::ResultPublisher::publish).
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The artifact to publish does not exist.
    #[error("Artifact not found: {0}")]
    MissingArtifact(String),

    /// The upload failed; no durable result exists.
    #[error("Failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },
}
