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

//! The observer registry.
use crate::context::{ContextFactory, ContextObserver, RequestContext};
use crate::observers::Observer;
use crate::span::{next_id, Span, SpanData, SpanKind};
use crate::trace::{TraceObserver, TracingClient};
use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use girder_types::{SpanId, TraceId, TraceInfo};

/// The registry at the core of the framework.
///
/// A `Girder` holds the ordered list of observers that watch every request
/// this process serves. Transport adapters call
/// [`make_server_span`](Girder::make_server_span) when a request arrives,
/// which gives each registered observer the chance to attach behavior to
/// the new server span and to populate the request context.
///
/// The registry is an explicit value rather than a process-wide global so
/// that tests (and unusual deployments) can build as many as they need;
/// most services construct one at startup and share it behind an `Arc`.
#[derive(Default)]
pub struct Girder {
    observers: Vec<Box<dyn Observer>>,
}

impl Girder {
    /// Creates a registry with no observers.
    pub fn new() -> Girder {
        Girder::default()
    }

    /// Registers an observer.
    ///
    /// Observers see each request in registration order.
    pub fn register<O>(&mut self, observer: O)
    where
        O: Observer + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Registers the distributed tracing observer.
    pub fn configure_tracing(&mut self, client: TracingClient) {
        self.register(TraceObserver::new(client));
    }

    /// Attaches a factory-made attribute to each request's context.
    ///
    /// On every request, `factory` is asked to create a value which is
    /// attached to the context under `name`. When a local span opens, the
    /// factory's product is re-made for that span and shadows the
    /// request-level attribute for the local span's scope.
    pub fn add_to_context<F>(&mut self, name: &str, factory: F)
    where
        F: ContextFactory + 'static,
    {
        self.register(ContextObserver::new(name, Arc::new(factory)));
    }

    /// Creates the server span representing an inbound request.
    ///
    /// When `trace_info` is `None` (no upstream identifiers arrived, or
    /// they were rejected), a fresh root trace is generated: trace ID and
    /// span ID are the same fresh random value, there is no parent, and
    /// sampling is undetermined.
    ///
    /// Each registered observer sees the newborn span; the returned span
    /// must then be [`start`](Span::start)ed before the request is handed
    /// to the application, and finished exactly once when it completes.
    pub fn make_server_span(
        &self,
        context: &RequestContext,
        name: &str,
        trace_info: Option<TraceInfo>,
    ) -> Span {
        let info = trace_info.unwrap_or_else(new_root);
        context.set_trace(info);

        let mut data = SpanData::new(info, name, SpanKind::Server);
        let mut observers = Vec::new();
        for observer in &self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_server_span_created(context, &mut data)
            }));
            match result {
                Ok(Some(span_observer)) => observers.push(span_observer),
                Ok(None) => {}
                Err(_) => error!("error in observer on_server_span_created for span {}", name),
            }
        }

        // observers may have settled the sampling decision
        context.set_trace(data.trace_info());
        Span::new(data, Some(context.clone()), observers)
    }
}

fn new_root() -> TraceInfo {
    let id = next_id();
    let mut builder = TraceInfo::builder();
    builder
        .trace_id(TraceId::from(id))
        .span_id(SpanId::from(id));
    builder.build()
}
