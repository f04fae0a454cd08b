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

//! Observer interfaces.
//!
//! Observers are how subsystems attach behavior to the request lifecycle:
//! an [`Observer`] watches the registry for new server spans, and a
//! [`SpanObserver`] watches one span. All methods default to no-ops so
//! implementations only override the events they care about.
use crate::context::RequestContext;
use crate::span::{SpanData, TagValue};
use std::error::Error;

/// An observer attached to a single span.
///
/// Callbacks fire in registration order, except `on_finish` which fires in
/// reverse registration order so that inner observers settle before the
/// observers that enclose them. A span is owned by one logical flow of
/// control, so implementations will never see concurrent callbacks for the
/// same span.
pub trait SpanObserver: Send {
    /// Called when the observed span is started.
    fn on_start(&mut self, _span: &SpanData) {}

    /// Called when a tag is set on the observed span.
    fn on_set_tag(&mut self, _span: &SpanData, _key: &str, _value: &TagValue) {}

    /// Called when a log entry is added to the observed span.
    fn on_log(&mut self, _span: &SpanData, _name: &str, _payload: &str) {}

    /// Called when the observed span is finished.
    ///
    /// `error` carries the failure the unit of work ended with, if any.
    fn on_finish(&mut self, _span: &SpanData, _error: Option<&(dyn Error + 'static)>) {}

    /// Called when a child of the observed span is created.
    ///
    /// Returning an observer attaches it to the new child span, so a
    /// subtree can be instrumented from a single decision at its root.
    fn on_child_span_created(&mut self, _child: &SpanData) -> Option<Box<dyn SpanObserver>> {
        None
    }
}

/// An observer registered with the [`Girder`](crate::Girder) registry,
/// watching the process rather than one span.
pub trait Observer: Send + Sync {
    /// Called when a server span is created for an incoming request.
    ///
    /// The observer may populate the request context and may mutate the
    /// newborn span's data (the tracing observer records its sampling
    /// decision this way). Returning a [`SpanObserver`] attaches it to the
    /// server span.
    fn on_server_span_created(
        &self,
        context: &RequestContext,
        span: &mut SpanData,
    ) -> Option<Box<dyn SpanObserver>>;
}
