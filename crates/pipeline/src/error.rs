/// Errors from loading, recovering or running a generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The pipeline could not be constructed; no job can run until a
    /// later load succeeds.
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// The pipeline has no in-place generator reset.
    #[error("Generator reset is not supported by this pipeline")]
    ResetUnsupported,

    /// An in-place reset or generator rebuild failed.
    #[error("Generator recovery failed: {0}")]
    Recovery(String),

    /// Every recovery tier failed, including the full reload.
    #[error("Pipeline unrecoverable: {0}")]
    Unrecoverable(String),

    /// The pipeline ran but failed or produced no usable artifact.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The pipeline backend broke its message protocol.
    #[error("Pipeline protocol error: {0}")]
    Protocol(String),

    #[error("Pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A progress sink could not deliver an event.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Progress delivery failed: {0}")]
    Delivery(String),

    #[error("Progress event could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}
