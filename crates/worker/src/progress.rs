//! Progress sinks.
//!
//! The invoker calls a sink synchronously from inside the pipeline's frame
//! callback. [`WebhookProgressSink`] therefore only serializes the event and
//! queues it for a single sender task. Retries happen off the job's path and
//! a failed delivery is logged and dropped. A full queue rejects the event.

use std::sync::Arc;
use std::time::Duration;

use reelsmith_core::progress::ProgressEvent;
use reelsmith_pipeline::{ProgressError, ProgressSink};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Backoff between webhook delivery attempts.
const RETRY_DELAYS_MS: [u64; 3] = [250, 500, 1000];

/// HTTP timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Events waiting for the sender task.
const QUEUE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn publish(&self, job_id: &str, event: &ProgressEvent) -> Result<(), ProgressError> {
        tracing::debug!(
            job_id,
            progress = event.progress,
            countdown_ms = event.countdown_ms,
            has_preview = event.preview_frame.is_some(),
            "Job progress",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: &'a str,
    #[serde(flatten)]
    event: &'a ProgressEvent,
}

/// A serialized event waiting to be posted.
#[derive(Debug)]
struct Delivery {
    job_id: String,
    body: Vec<u8>,
}

/// POSTs `{ id, progress, countdown_ms, preview_frame? }` to a URL.
///
/// Events are posted in publish order by one task spawned in [`new`]. The
/// task exits once every clone of the sink has been dropped.
///
/// [`new`]: WebhookProgressSink::new
#[derive(Debug, Clone)]
pub struct WebhookProgressSink {
    queue: mpsc::Sender<Delivery>,
}

impl WebhookProgressSink {
    /// Must be called from within a Tokio runtime.
    pub fn new(url: impl Into<String>) -> Result<Self, ProgressError> {
        Self::with_capacity(url, QUEUE_CAPACITY)
    }

    fn with_capacity(url: impl Into<String>, capacity: usize) -> Result<Self, ProgressError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProgressError::Delivery(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProgressError::Delivery(e.to_string()))?;

        let (queue, rx) = mpsc::channel(capacity);
        runtime.spawn(Self::sender(client, url.into(), rx));
        Ok(Self { queue })
    }

    async fn sender(client: reqwest::Client, url: String, mut rx: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            Self::deliver(&client, &url, &delivery).await;
        }
        tracing::debug!(url = %url, "Progress webhook sender stopped");
    }

    async fn deliver(client: &reqwest::Client, url: &str, delivery: &Delivery) {
        for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
            match Self::post(client, url, &delivery.body).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(
                        job_id = %delivery.job_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Progress webhook attempt failed, retrying",
                    );
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
            }
        }

        if let Err(e) = Self::post(client, url, &delivery.body).await {
            tracing::warn!(job_id = %delivery.job_id, url, error = %e, "Progress webhook delivery failed after all retries");
        }
    }

    async fn post(client: &reqwest::Client, url: &str, body: &[u8]) -> Result<(), ProgressError> {
        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| ProgressError::Delivery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProgressError::Delivery(format!(
                "webhook returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

impl ProgressSink for WebhookProgressSink {
    fn publish(&self, job_id: &str, event: &ProgressEvent) -> Result<(), ProgressError> {
        let body = serde_json::to_vec(&WebhookPayload { id: job_id, event })?;
        let delivery = Delivery {
            job_id: job_id.to_string(),
            body,
        };
        match self.queue.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(ProgressError::Delivery("progress webhook queue is full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(ProgressError::Delivery("progress webhook sender has stopped".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Forwards every event to each inner sink. One sink failing does not stop
/// delivery to the others; the first error is returned.
#[derive(Clone, Default)]
pub struct FanoutProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutProgressSink {
    fn publish(&self, job_id: &str, event: &ProgressEvent) -> Result<(), ProgressError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(job_id, event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
