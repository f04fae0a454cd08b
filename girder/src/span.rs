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

//! Spans.
use crate::context::RequestContext;
use crate::observers::SpanObserver;
use log::error;
use rand::Rng;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use girder_types::{trace_info, SpanId, TraceInfo};

/// The variant of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanKind {
    /// The root of the in-process span tree, representing one inbound
    /// request.
    Server,
    /// An in-process sub-operation under a server span.
    Local {
        /// The name of the component doing the work.
        component_name: String,
    },
    /// An outbound call to another service.
    Client,
}

impl SpanKind {
    /// Determines if this is a local span.
    pub fn is_local(&self) -> bool {
        matches!(self, SpanKind::Local { .. })
    }

    /// Returns the component name of a local span.
    pub fn component_name(&self) -> Option<&str> {
        match self {
            SpanKind::Local { component_name } => Some(component_name),
            _ => None,
        }
    }
}

/// The value of a span tag.
///
/// Tags reach the wire as strings or booleans; numeric values are coerced
/// to their decimal string form when serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// A string value.
    Str(String),
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(v) => fmt.write_str(v),
            TagValue::Bool(v) => write!(fmt, "{}", v),
            TagValue::Int(v) => write!(fmt, "{}", v),
            TagValue::Float(v) => write!(fmt, "{}", v),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> TagValue {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> TagValue {
        TagValue::Str(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> TagValue {
        TagValue::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> TagValue {
        TagValue::Int(value)
    }
}

impl From<u64> for TagValue {
    fn from(value: u64) -> TagValue {
        TagValue::Int(value as i64)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> TagValue {
        TagValue::Float(value)
    }
}

/// The identity and timing of a span, shared with its observers.
#[derive(Debug, Clone)]
pub struct SpanData {
    trace: TraceInfo,
    name: String,
    kind: SpanKind,
    start_us: Option<u64>,
    end_us: Option<u64>,
}

impl SpanData {
    pub(crate) fn new(trace: TraceInfo, name: &str, kind: SpanKind) -> SpanData {
        SpanData {
            trace,
            name: name.to_string(),
            kind,
            start_us: None,
            end_us: None,
        }
    }

    /// Returns the span's place within its trace.
    pub fn trace_info(&self) -> TraceInfo {
        self.trace
    }

    /// Returns the name of the operation the span represents.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the variant of the span.
    pub fn kind(&self) -> &SpanKind {
        &self.kind
    }

    /// Returns the start of the span in microseconds since the UNIX epoch,
    /// if it has started.
    pub fn start_us(&self) -> Option<u64> {
        self.start_us
    }

    /// Returns the end of the span in microseconds since the UNIX epoch,
    /// if it has finished.
    pub fn end_us(&self) -> Option<u64> {
        self.end_us
    }

    /// Records the sampling decision for the span's trace.
    ///
    /// Only meaningful before the span starts; the decision is made once,
    /// at the root.
    pub fn set_sampled(&mut self, sampled: bool) {
        let mut builder = trace_info::Builder::from(self.trace);
        builder.sampled(sampled);
        self.trace = builder.build();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Unstarted,
    Running,
    Finished,
}

/// A single unit of timed work.
///
/// A span is created unstarted, runs from `start` until `finish`, and
/// notifies its observers of everything that happens in between. Dropping
/// a running span finishes it without an error, so a span used as a scope
/// guard is always finished exactly once.
pub struct Span {
    data: SpanData,
    context: Option<RequestContext>,
    observers: Vec<Box<dyn SpanObserver>>,
    state: State,
}

impl Span {
    pub(crate) fn new(
        data: SpanData,
        context: Option<RequestContext>,
        observers: Vec<Box<dyn SpanObserver>>,
    ) -> Span {
        Span {
            data,
            context,
            observers,
            state: State::Unstarted,
        }
    }

    /// Returns the span's place within its trace.
    pub fn trace_info(&self) -> TraceInfo {
        self.data.trace_info()
    }

    /// Returns the identity and timing of the span.
    pub fn data(&self) -> &SpanData {
        &self.data
    }

    /// Returns the request context this span belongs to.
    ///
    /// Client spans do not hold the context.
    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    /// Records the start of the span.
    ///
    /// This must be called exactly once; observers are notified in
    /// registration order.
    pub fn start(&mut self) {
        if self.state != State::Unstarted {
            error!("start() called more than once on span {}", self.data.name);
            return;
        }
        self.state = State::Running;
        self.data.start_us = Some(epoch_micros());
        let data = &self.data;
        for observer in &mut self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_start(data)));
            if result.is_err() {
                error!("error in observer on_start for span {}", data.name);
            }
        }
    }

    /// Sets a tag on the span, notifying observers in registration order.
    ///
    /// Tags are only recorded while the span is running.
    pub fn set_tag<V>(&mut self, key: &str, value: V)
    where
        V: Into<TagValue>,
    {
        if self.state != State::Running {
            error!("tag {} set on span {} which is not running", key, self.data.name);
            return;
        }
        let value = value.into();
        let data = &self.data;
        for observer in &mut self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_set_tag(data, key, &value)
            }));
            if result.is_err() {
                error!("error in observer on_set_tag for span {}", data.name);
            }
        }
    }

    /// Adds a log entry to the span, notifying observers in registration
    /// order.
    ///
    /// Log entries are only recorded while the span is running.
    pub fn log(&mut self, name: &str, payload: &str) {
        if self.state != State::Running {
            error!("log {} added to span {} which is not running", name, self.data.name);
            return;
        }
        let data = &self.data;
        for observer in &mut self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_log(data, name, payload)
            }));
            if result.is_err() {
                error!("error in observer on_log for span {}", data.name);
            }
        }
    }

    /// Creates a client span representing an outbound call.
    ///
    /// The child inherits this span's trace ID and sampling flags and
    /// records this span as its parent. Each of this span's observers may
    /// contribute an observer to the child.
    pub fn make_child(&mut self, name: &str) -> Span {
        self.make_child_inner(name, SpanKind::Client)
    }

    /// Creates a local span representing an in-process sub-operation.
    pub fn make_local_child(&mut self, name: &str, component_name: &str) -> Span {
        self.make_child_inner(
            name,
            SpanKind::Local {
                component_name: component_name.to_string(),
            },
        )
    }

    fn make_child_inner(&mut self, name: &str, kind: SpanKind) -> Span {
        let context = if matches!(kind, SpanKind::Client) {
            None
        } else {
            self.context.clone()
        };
        let child_info = self.data.trace_info().child_of(SpanId::from(next_id()));
        let mut child = Span::new(SpanData::new(child_info, name, kind), context, vec![]);

        if self.state != State::Running {
            error!(
                "child span {} created under span {} which is not running",
                name, self.data.name
            );
            return child;
        }

        for observer in &mut self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_child_span_created(&child.data)
            }));
            match result {
                Ok(Some(child_observer)) => child.observers.push(child_observer),
                Ok(None) => {}
                Err(_) => error!(
                    "error in observer on_child_span_created for span {}",
                    self.data.name
                ),
            }
        }
        child
    }

    /// Records the end of the span.
    ///
    /// `error` carries the failure the unit of work ended with, if any;
    /// observers are notified in reverse registration order. Consuming the
    /// span guarantees this happens at most once; a span dropped while
    /// running finishes with no error.
    pub fn finish(mut self, error: Option<&(dyn Error + 'static)>) {
        self.finish_inner(error);
    }

    fn finish_inner(&mut self, error: Option<&(dyn Error + 'static)>) {
        match self.state {
            State::Running => {}
            State::Unstarted => {
                self.state = State::Finished;
                return;
            }
            State::Finished => return,
        }
        self.state = State::Finished;
        self.data.end_us = Some(epoch_micros());
        let data = &self.data;
        for observer in self.observers.iter_mut().rev() {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| observer.on_finish(data, error)));
            if result.is_err() {
                error!("error in observer on_finish for span {}", data.name);
            }
        }
        // the context must not outlive the server span's scope
        self.context = None;
        self.observers.clear();
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.state == State::Running {
            self.finish_inner(None);
        }
    }
}

/// Returns the current UTC time as microseconds since the UNIX epoch.
pub(crate) fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_micros() as u64
}

/// Generates a fresh nonzero 64-bit identifier.
pub(crate) fn next_id() -> u64 {
    loop {
        let id = rand::thread_rng().gen::<u64>();
        if id != 0 {
            return id;
        }
    }
}
