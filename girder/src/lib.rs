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

//! Girder instruments and observes networked backend services.
//!
//! The core of the framework is a per-request span tree. A transport
//! adapter asks the process-wide [`Girder`] registry for a server span when
//! a request arrives, the application opens local and client spans beneath
//! it, and every span notifies the observers attached to it of its
//! lifecycle. The bundled tracing observer serializes sampled spans into
//! Zipkin-compatible records and feeds them to a [`Recorder`], which moves
//! them out of the request path and eventually to the trace collector.
//!
//! Alongside the span tree, each request carries a [`RequestContext`]
//! holding the per-request collaborators (clients, batches) produced by
//! registered context factories.
#![warn(missing_docs)]

#[doc(inline)]
pub use crate::context::{ContextFactory, RequestContext};
#[doc(inline)]
pub use crate::core::Girder;
#[doc(inline)]
pub use crate::observers::{Observer, SpanObserver};
#[doc(inline)]
pub use crate::record::{trace_queue_name, Recorder};
#[doc(inline)]
pub use crate::span::{Span, SpanData, SpanKind, TagValue};
#[doc(inline)]
pub use crate::trace::{tracing_client_from_config, TraceObserver, TracingClient, TracingError};

#[doc(inline)]
pub use girder_types::{Endpoint, Record, SamplingFlags, SpanId, TraceId, TraceInfo};

pub mod config;
pub mod context;
pub mod core;
pub mod observers;
pub mod record;
pub mod retry;
pub mod span;
pub mod trace;

#[cfg(test)]
mod test;
