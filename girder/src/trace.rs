//  Copyright 2023 Girder Contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Distributed tracing instrumentation.
//!
//! The [`TraceObserver`] watches every server span, decides once per
//! request whether its trace is sampled, and when it is, attaches span
//! observers through the whole tree which serialize each finished span
//! into a Zipkin-compatible [`Record`] and hand it to the [`Recorder`].
use crate::config::{Config, ConfigError, EndpointAddress};
use crate::context::RequestContext;
use crate::observers::{Observer, SpanObserver};
use crate::record::{Recorder, DEFAULT_MAX_QUEUE_SIZE};
use crate::span::{SpanData, SpanKind, TagValue};
use log::{error, info};
use rand::Rng;
use std::error::Error as StdError;
use std::fmt;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use girder_mq::MessageQueueError;
use girder_types::{Annotation, AnnotationValue, BinaryAnnotation, Endpoint, Record, SpanId, TraceInfo};

/// Annotation value marking the moment a client sent a request.
const CLIENT_SEND: &str = "cs";
/// Annotation value marking the moment a client received a response.
const CLIENT_RECEIVE: &str = "cr";
/// Annotation value marking the moment a server sent a response.
const SERVER_SEND: &str = "ss";
/// Annotation value marking the moment a server received a request.
const SERVER_RECEIVE: &str = "sr";
/// Binary annotation key naming the component of a local span.
const LOCAL_COMPONENT: &str = "lc";

/// The default fraction of unsampled requests that are traced.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.1;

/// A handle to the tracing pipeline, shared by the tracing observer.
pub struct TracingClient {
    service_name: String,
    sample_rate: f64,
    recorder: Arc<Recorder>,
}

impl TracingClient {
    /// Creates a tracing client recording to the given recorder.
    ///
    /// `sample_rate` is the fraction, in `[0, 1]`, of requests without an
    /// upstream sampling decision that will be traced.
    pub fn new(service_name: &str, sample_rate: f64, recorder: Recorder) -> TracingClient {
        TracingClient {
            service_name: service_name.to_string(),
            sample_rate,
            recorder: Arc::new(recorder),
        }
    }

    /// Returns the name this service records spans under.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the configured sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Returns the recorder consuming this client's records.
    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }
}

/// An error creating the tracing pipeline from configuration.
#[derive(Debug)]
pub enum TracingError {
    /// A configuration value was missing or malformed.
    Config(ConfigError),
    /// The sidecar span queue could not be opened.
    Queue(MessageQueueError),
    /// The HTTP client for the remote recorder could not be constructed.
    Http(reqwest::Error),
}

impl fmt::Display for TracingError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingError::Config(err) => write!(fmt, "{}", err),
            TracingError::Queue(err) => write!(fmt, "error opening span queue: {}", err),
            TracingError::Http(err) => write!(fmt, "error building span collector client: {}", err),
        }
    }
}

impl StdError for TracingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TracingError::Config(err) => Some(err),
            TracingError::Queue(err) => Some(err),
            TracingError::Http(err) => Some(err),
        }
    }
}

impl From<ConfigError> for TracingError {
    fn from(err: ConfigError) -> TracingError {
        TracingError::Config(err)
    }
}

impl From<MessageQueueError> for TracingError {
    fn from(err: MessageQueueError) -> TracingError {
        TracingError::Queue(err)
    }
}

impl From<reqwest::Error> for TracingError {
    fn from(err: reqwest::Error) -> TracingError {
        TracingError::Http(err)
    }
}

/// Creates a tracing client from the `tracing.*` configuration keys.
///
/// The recorder variant is selected by what is configured: a sidecar queue
/// name wins over a collector endpoint, and with neither, spans go to the
/// debug log unless `tracing.log_if_unconfigured` is false.
pub fn tracing_client_from_config(config: &Config) -> Result<TracingClient, TracingError> {
    let service_name = config.get_string("tracing.service_name")?;
    let sample_rate = config.get_sample_rate_or("tracing.sample_rate", DEFAULT_SAMPLE_RATE)?;
    let max_queue_size = config
        .get_integer_or("tracing.max_span_queue_size", DEFAULT_MAX_QUEUE_SIZE as i64)?
        as usize;
    let num_workers = config.get_integer_or("tracing.num_span_workers", 5)? as usize;
    let batch_interval =
        config.get_timespan_or("tracing.span_batch_interval", Duration::from_millis(500))?;

    let recorder = if let Some(queue_name) = config.get_optional_string("tracing.queue_name") {
        info!("recording spans to queue {}", queue_name);
        Recorder::sidecar(&queue_name, num_workers, batch_interval)?
    } else if let Some(endpoint) = config.get_optional_endpoint("tracing.endpoint")? {
        info!("recording spans to {}", endpoint);
        Recorder::remote(&endpoint, max_queue_size, num_workers, batch_interval)?
    } else if config.get_boolean_or("tracing.log_if_unconfigured", true)? {
        Recorder::logging(max_queue_size, num_workers, batch_interval)
    } else {
        Recorder::null(max_queue_size, num_workers, batch_interval)
    };

    Ok(TracingClient::new(&service_name, sample_rate, recorder))
}

/// The distributed tracing observer.
///
/// Attach one with [`Girder::configure_tracing`](crate::Girder::configure_tracing).
pub struct TraceObserver {
    sample_rate: f64,
    recorder: Arc<Recorder>,
    endpoint: Endpoint,
}

impl TraceObserver {
    /// Creates the observer from a tracing client.
    pub fn new(client: TracingClient) -> TraceObserver {
        let endpoint = Endpoint::new(&client.service_name, &resolve_local_address());
        TraceObserver {
            sample_rate: client.sample_rate,
            recorder: client.recorder,
            endpoint,
        }
    }

    /// Decides whether a request's trace is recorded.
    ///
    /// Made once, at server-span creation: the debug flag forces sampling,
    /// an upstream decision is honored, and otherwise the sample rate
    /// applies.
    fn should_sample(&self, info: TraceInfo) -> bool {
        if info.debug() {
            return true;
        }
        match info.sampled() {
            Some(sampled) => sampled,
            None => rand::thread_rng().gen::<f64>() < self.sample_rate,
        }
    }
}

impl Observer for TraceObserver {
    fn on_server_span_created(
        &self,
        _context: &RequestContext,
        span: &mut SpanData,
    ) -> Option<Box<dyn SpanObserver>> {
        let sampled = self.should_sample(span.trace_info());
        span.set_sampled(sampled);
        if !sampled {
            return None;
        }
        Some(Box::new(TraceSpanObserver::new(
            self.endpoint.clone(),
            self.recorder.clone(),
            span,
        )))
    }
}

/// Serializes one sampled span into a wire record when it finishes.
///
/// Attached to every span in a sampled tree; each new child gets a fresh
/// observer of its own.
struct TraceSpanObserver {
    endpoint: Endpoint,
    recorder: Arc<Recorder>,
    binary_annotations: Vec<BinaryAnnotation>,
}

impl TraceSpanObserver {
    fn new(endpoint: Endpoint, recorder: Arc<Recorder>, span: &SpanData) -> TraceSpanObserver {
        let mut binary_annotations = Vec::new();
        if let Some(component_name) = span.kind().component_name() {
            binary_annotations.push(BinaryAnnotation::new(
                LOCAL_COMPONENT,
                AnnotationValue::from(component_name),
                endpoint.clone(),
            ));
        }
        TraceSpanObserver {
            endpoint,
            recorder,
            binary_annotations,
        }
    }

    fn binary_annotation(&self, key: &str, value: &TagValue) -> BinaryAnnotation {
        let value = match value {
            TagValue::Bool(v) => AnnotationValue::Bool(*v),
            other => AnnotationValue::from(other.to_string()),
        };
        BinaryAnnotation::new(key, value, self.endpoint.clone())
    }

    fn build_record(&self, span: &SpanData) -> Record {
        let start = span.start_us().unwrap_or(0);
        let end = span.end_us().unwrap_or(start);
        let info = span.trace_info();

        let mut builder = Record::builder();
        builder
            .trace_id(info.trace_id())
            .name(span.name())
            .id(info.span_id())
            .parent_id(info.parent_id().unwrap_or_else(|| SpanId::from(0)))
            .timestamp(start)
            .duration(end.saturating_sub(start))
            .binary_annotations(self.binary_annotations.iter().cloned());

        match span.kind() {
            SpanKind::Server => {
                builder
                    .annotation(Annotation::new(self.endpoint.clone(), start, SERVER_RECEIVE))
                    .annotation(Annotation::new(self.endpoint.clone(), end, SERVER_SEND));
            }
            SpanKind::Client => {
                builder
                    .annotation(Annotation::new(self.endpoint.clone(), start, CLIENT_SEND))
                    .annotation(Annotation::new(self.endpoint.clone(), end, CLIENT_RECEIVE));
            }
            SpanKind::Local { .. } => {}
        }

        builder.build()
    }
}

impl SpanObserver for TraceSpanObserver {
    fn on_set_tag(&mut self, _span: &SpanData, key: &str, value: &TagValue) {
        let annotation = self.binary_annotation(key, value);
        self.binary_annotations.push(annotation);
    }

    fn on_finish(&mut self, span: &SpanData, error: Option<&(dyn StdError + 'static)>) {
        if error.is_some() {
            self.binary_annotations.push(BinaryAnnotation::new(
                "error",
                AnnotationValue::Bool(true),
                self.endpoint.clone(),
            ));
        }
        self.recorder.send(self.build_record(span));
    }

    fn on_child_span_created(&mut self, child: &SpanData) -> Option<Box<dyn SpanObserver>> {
        Some(Box::new(TraceSpanObserver::new(
            self.endpoint.clone(),
            self.recorder.clone(),
            child,
        )))
    }
}

/// Resolves this host's address for span endpoint info, once at startup.
fn resolve_local_address() -> String {
    let hostname = match nix::unistd::gethostname() {
        Ok(hostname) => hostname,
        Err(err) => {
            error!("hostname could not be determined: {}", err);
            return "undefined".to_string();
        }
    };
    let hostname = hostname.to_string_lossy();
    match (hostname.as_ref(), 0u16).to_socket_addrs() {
        Ok(mut addrs) => match addrs.find(|addr| addr.is_ipv4()) {
            Some(addr) => addr.ip().to_string(),
            None => "undefined".to_string(),
        },
        Err(err) => {
            error!("hostname {} could not be resolved: {}", hostname, err);
            "undefined".to_string()
        }
    }
}

/// Returns the collector endpoint for a remote recorder.
pub(crate) fn collector_url(endpoint: &EndpointAddress) -> String {
    format!("http://{}/api/v1/spans", endpoint)
}
