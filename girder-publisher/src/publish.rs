//! Publishing batches to the trace collector.
use crate::batch::SerializedBatch;
use girder::retry::RetryPolicy;
use log::{info, warn};
use reqwest::StatusCode;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// The default time to wait for a response from the collector.
pub const POST_TIMEOUT_DEFAULT: Duration = Duration::from_secs(3);

/// The default maximum number of attempts when publishing a batch.
pub const RETRY_LIMIT_DEFAULT: usize = 10;

/// The default base for exponential backoff between attempts.
const RETRY_BACKOFF_DEFAULT: Duration = Duration::from_millis(100);

/// An error publishing a batch.
#[derive(Debug)]
pub enum PublishError {
    /// The collector rejected the batch with a client error that retrying
    /// cannot fix; operator intervention is required.
    Fatal(StatusCode),
    /// Every attempt failed transiently; the batch should be dropped and
    /// publishing should continue with the next one.
    RetriesExhausted(usize),
}

impl fmt::Display for PublishError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Fatal(status) => {
                write!(fmt, "collector rejected the batch with {}", status)
            }
            PublishError::RetriesExhausted(attempts) => {
                write!(fmt, "exhausted allowance of {} attempts", attempts)
            }
        }
    }
}

impl Error for PublishError {}

/// Publishes span batches to a Zipkin-compatible collector.
///
/// Transient failures (5xx, I/O errors, timeouts) are retried with
/// exponential backoff up to the attempt limit; a 422 drops the batch as
/// a soft error; any other 4xx is fatal.
pub struct ZipkinPublisher {
    client: reqwest::blocking::Client,
    endpoint: String,
    retry_limit: usize,
    retry_backoff: Duration,
}

impl ZipkinPublisher {
    /// Creates a publisher POSTing to `<api_url>/spans`.
    pub fn new(
        api_url: &str,
        post_timeout: Duration,
        retry_limit: usize,
    ) -> Result<ZipkinPublisher, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(post_timeout)
            .user_agent(concat!(
                "girder-trace-publisher/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(ZipkinPublisher {
            client,
            endpoint: format!("{}/spans", api_url.trim_end_matches('/')),
            retry_limit,
            retry_backoff: RETRY_BACKOFF_DEFAULT,
        })
    }

    /// Overrides the base for exponential backoff between attempts.
    pub fn retry_backoff(mut self, base: Duration) -> ZipkinPublisher {
        self.retry_backoff = base;
        self
    }

    /// Publishes one batch.
    pub fn publish(&self, payload: &SerializedBatch) -> Result<(), PublishError> {
        if payload.item_count == 0 {
            return Ok(());
        }

        info!("sending batch of {} traces", payload.item_count);
        for _ in RetryPolicy::new()
            .attempts(self.retry_limit)
            .backoff(self.retry_backoff)
        {
            let result = self
                .client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.serialized.clone())
                .send();
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if status == StatusCode::UNPROCESSABLE_ENTITY {
                        warn!(
                            "collector rejected batch of {} traces with 422, dropping it",
                            payload.item_count
                        );
                        return Ok(());
                    }
                    if status.is_client_error() {
                        return Err(PublishError::Fatal(status));
                    }
                    warn!("collector returned {}, retrying", status);
                }
                Err(err) => warn!("error posting batch: {}", err),
            }
        }

        Err(PublishError::RetriesExhausted(self.retry_limit))
    }
}
