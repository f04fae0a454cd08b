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

//! Request-scoped context.
use crate::observers::{Observer, SpanObserver};
use crate::span::SpanData;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use girder_types::TraceInfo;

type Attribute = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Inner {
    attributes: HashMap<String, Attribute>,
    shadowed: HashMap<String, Vec<Option<Attribute>>>,
    trace: Option<TraceInfo>,
    raw_edge_context: Option<Vec<u8>>,
}

/// The container for one request's collaborators.
///
/// A context is created when a request arrives and lives exactly as long
/// as its server span. It maps attribute names to per-request values
/// materialized by registered [`ContextFactory`]s, and carries two
/// reserved slots: the identity of the active server span and the raw
/// edge-context payload received from upstream.
///
/// The handle is cheap to clone; all clones see the same request. The
/// context is only mutated from the request's own flow of control, and
/// anything holding a clone must drop it when the server span finishes.
#[derive(Clone, Default)]
pub struct RequestContext {
    inner: Arc<Mutex<Inner>>,
}

impl RequestContext {
    /// Creates an empty context for a new request.
    pub fn new() -> RequestContext {
        RequestContext::default()
    }

    /// Sets a named attribute on the context.
    pub fn set(&self, name: &str, value: Attribute) {
        self.lock().attributes.insert(name.to_string(), value);
    }

    /// Returns the named attribute, downcast to its concrete type.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let attribute = self.lock().attributes.get(name)?.clone();
        attribute.downcast().ok()
    }

    /// Temporarily overrides a named attribute.
    ///
    /// The prior value (or its absence) is pushed onto a stack and
    /// restored by [`unshadow_context_attr`](Self::unshadow_context_attr).
    /// This is how per-component collaborators are substituted for the
    /// duration of a local span's scope.
    pub fn shadow_context_attr(&self, name: &str, value: Attribute) {
        let mut inner = self.lock();
        let prior = inner.attributes.insert(name.to_string(), value);
        inner
            .shadowed
            .entry(name.to_string())
            .or_insert_with(Vec::new)
            .push(prior);
    }

    /// Restores the attribute hidden by the most recent
    /// [`shadow_context_attr`](Self::shadow_context_attr) for `name`.
    pub fn unshadow_context_attr(&self, name: &str) {
        let mut inner = self.lock();
        let prior = match inner.shadowed.get_mut(name).and_then(Vec::pop) {
            Some(prior) => prior,
            None => {
                log::error!("unshadow of attribute {} which was never shadowed", name);
                return;
            }
        };
        match prior {
            Some(value) => inner.attributes.insert(name.to_string(), value),
            None => inner.attributes.remove(name),
        };
    }

    /// Returns the identity of the request's server span.
    ///
    /// Present from the moment the server span is allocated until the
    /// context is dropped.
    pub fn trace(&self) -> Option<TraceInfo> {
        self.lock().trace
    }

    pub(crate) fn set_trace(&self, trace: TraceInfo) {
        self.lock().trace = Some(trace);
    }

    /// Returns the opaque edge-context payload received from upstream.
    ///
    /// An empty payload is preserved as empty; `None` means no header
    /// arrived at all.
    pub fn raw_edge_context(&self) -> Option<Vec<u8>> {
        self.lock().raw_edge_context.clone()
    }

    /// Stores the opaque edge-context payload for downstream propagation.
    pub fn set_raw_edge_context(&self, payload: Option<Vec<u8>>) {
        self.lock().raw_edge_context = payload;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("request context lock poisoned")
    }
}

/// A factory for per-request context attributes.
///
/// Factories are registered with
/// [`Girder::add_to_context`](crate::Girder::add_to_context); on each
/// request the factory's product is attached to the context under the
/// registered name. When a local span opens, the factory is asked for a
/// fresh product scoped to that span, which shadows the request-level one
/// for the local span's duration.
pub trait ContextFactory: Send + Sync {
    /// Returns the object to attach to the context.
    fn make_object_for_context(&self, name: &str, span: &SpanData) -> Attribute;
}

pub(crate) struct ContextObserver {
    name: String,
    factory: Arc<dyn ContextFactory>,
}

impl ContextObserver {
    pub(crate) fn new(name: &str, factory: Arc<dyn ContextFactory>) -> ContextObserver {
        ContextObserver {
            name: name.to_string(),
            factory,
        }
    }
}

impl Observer for ContextObserver {
    fn on_server_span_created(
        &self,
        context: &RequestContext,
        span: &mut SpanData,
    ) -> Option<Box<dyn SpanObserver>> {
        let attribute = self.factory.make_object_for_context(&self.name, span);
        context.set(&self.name, attribute);
        Some(Box::new(ContextSpanObserver {
            name: self.name.clone(),
            factory: self.factory.clone(),
            context: context.clone(),
            shadowing: false,
        }))
    }
}

/// Watches a server or local span for local children, substituting the
/// factory's product for their scope.
struct ContextSpanObserver {
    name: String,
    factory: Arc<dyn ContextFactory>,
    context: RequestContext,
    shadowing: bool,
}

impl SpanObserver for ContextSpanObserver {
    fn on_finish(&mut self, _span: &SpanData, _error: Option<&(dyn std::error::Error + 'static)>) {
        if self.shadowing {
            self.context.unshadow_context_attr(&self.name);
        }
    }

    fn on_child_span_created(&mut self, child: &SpanData) -> Option<Box<dyn SpanObserver>> {
        if !child.kind().is_local() {
            return None;
        }
        let attribute = self.factory.make_object_for_context(&self.name, child);
        self.context.shadow_context_attr(&self.name, attribute);
        Some(Box::new(ContextSpanObserver {
            name: self.name.clone(),
            factory: self.factory.clone(),
            context: self.context.clone(),
            shadowing: true,
        }))
    }
}
