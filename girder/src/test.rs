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
use crate::context::{ContextFactory, RequestContext};
use crate::observers::{Observer, SpanObserver};
use crate::record::{Flush, Recorder};
use crate::span::{SpanData, TagValue};
use crate::trace::TracingClient;
use crate::Girder;
use std::any::Any;
use std::error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use girder_types::{AnnotationValue, Record, SpanId, TraceId, TraceInfo};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Started(String),
    Tag(String, String),
    Log(String),
    ChildCreated(String),
    Finished(String, bool),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct RecordingObserver {
    label: String,
    events: EventLog,
}

impl Observer for RecordingObserver {
    fn on_server_span_created(
        &self,
        _context: &RequestContext,
        _span: &mut SpanData,
    ) -> Option<Box<dyn SpanObserver>> {
        Some(Box::new(RecordingSpanObserver {
            label: self.label.clone(),
            events: self.events.clone(),
        }))
    }
}

struct RecordingSpanObserver {
    label: String,
    events: EventLog,
}

impl SpanObserver for RecordingSpanObserver {
    fn on_start(&mut self, _span: &SpanData) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(self.label.clone()));
    }

    fn on_set_tag(&mut self, _span: &SpanData, key: &str, _value: &TagValue) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Tag(self.label.clone(), key.to_string()));
    }

    fn on_log(&mut self, _span: &SpanData, name: &str, _payload: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Log(name.to_string()));
    }

    fn on_finish(&mut self, _span: &SpanData, error: Option<&(dyn error::Error + 'static)>) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Finished(self.label.clone(), error.is_some()));
    }

    fn on_child_span_created(&mut self, child: &SpanData) -> Option<Box<dyn SpanObserver>> {
        self.events
            .lock()
            .unwrap()
            .push(Event::ChildCreated(child.name().to_string()));
        Some(Box::new(RecordingSpanObserver {
            label: self.label.clone(),
            events: self.events.clone(),
        }))
    }
}

struct CollectingFlush {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Flush for CollectingFlush {
    fn flush(&self, batch: Vec<Record>) {
        self.records.lock().unwrap().extend(batch);
    }
}

fn collecting_recorder() -> (Recorder, Arc<Mutex<Vec<Record>>>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder::start(
        Arc::new(CollectingFlush {
            records: records.clone(),
        }),
        10_000,
        1,
        100,
        Duration::from_millis(1),
    );
    (recorder, records)
}

fn wait_for_records(records: &Arc<Mutex<Vec<Record>>>, count: usize) -> Vec<Record> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let records = records.lock().unwrap();
            if records.len() >= count {
                return records.clone();
            }
        }
        assert!(
            Instant::now() < deadline,
            "expected {} records to arrive",
            count
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn traced_girder(sample_rate: f64) -> (Girder, Arc<Mutex<Vec<Record>>>) {
    let (recorder, records) = collecting_recorder();
    let mut girder = Girder::new();
    girder.configure_tracing(TracingClient::new("example", sample_rate, recorder));
    (girder, records)
}

fn upstream_info() -> TraceInfo {
    TraceInfo::from_upstream(
        TraceId::from(1234),
        SpanId::from(2345),
        SpanId::from(3456),
        Some(true),
        1,
    )
}

#[derive(Debug)]
struct HandlerError;

impl fmt::Display for HandlerError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("handler failed")
    }
}

impl error::Error for HandlerError {}

#[test]
fn adopts_upstream_trace() {
    let (girder, records) = traced_girder(0.0);
    let context = RequestContext::new();
    let mut span = girder.make_server_span(&context, "example.handle", Some(upstream_info()));

    let info = span.trace_info();
    assert_eq!(info.trace_id(), TraceId::from(1234));
    assert_eq!(info.parent_id(), Some(SpanId::from(2345)));
    assert_eq!(info.span_id(), SpanId::from(3456));
    assert_eq!(info.sampled(), Some(true));
    assert!(info.debug());

    span.start();
    span.finish(None);

    let records = wait_for_records(&records, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trace_id(), TraceId::from(1234));
    assert_eq!(records[0].id(), SpanId::from(3456));
    assert_eq!(records[0].parent_id(), SpanId::from(2345));
}

#[test]
fn generates_new_root_without_upstream() {
    let girder = Girder::new();
    let context = RequestContext::new();
    let span = girder.make_server_span(&context, "example.handle", None);

    let info = span.trace_info();
    assert_eq!(info.trace_id().get(), info.span_id().get());
    assert_ne!(info.span_id().get(), 0);
    assert_eq!(info.parent_id(), None);
    assert_eq!(info.sampled(), None);

    let other = girder.make_server_span(&context, "example.handle", None);
    assert_ne!(other.trace_info().span_id(), info.span_id());
}

#[test]
fn observers_fire_in_order_and_finish_in_reverse() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut girder = Girder::new();
    girder.register(RecordingObserver {
        label: "first".to_string(),
        events: events.clone(),
    });
    girder.register(RecordingObserver {
        label: "second".to_string(),
        events: events.clone(),
    });

    let context = RequestContext::new();
    let mut span = girder.make_server_span(&context, "example.handle", None);
    span.start();
    span.set_tag("http.method", "GET");
    span.finish(None);

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            Event::Started("first".to_string()),
            Event::Started("second".to_string()),
            Event::Tag("first".to_string(), "http.method".to_string()),
            Event::Tag("second".to_string(), "http.method".to_string()),
            Event::Finished("second".to_string(), false),
            Event::Finished("first".to_string(), false),
        ]
    );
}

#[test]
fn children_inherit_trace_identity() {
    let (girder, records) = traced_girder(0.0);
    let context = RequestContext::new();
    let mut server = girder.make_server_span(&context, "example.handle", Some(upstream_info()));
    server.start();

    let mut child = server.make_child("downstream.call");
    let child_info = child.trace_info();
    assert_eq!(child_info.trace_id(), server.trace_info().trace_id());
    assert_eq!(child_info.parent_id(), Some(server.trace_info().span_id()));
    assert_eq!(child_info.sampled(), server.trace_info().sampled());

    child.start();
    child.finish(None);
    server.finish(None);

    let records = wait_for_records(&records, 2);
    let child_record = records
        .iter()
        .find(|r| r.id() == child_info.span_id())
        .expect("child record missing");
    assert_eq!(child_record.trace_id(), TraceId::from(1234));
    assert_eq!(child_record.parent_id(), SpanId::from(3456));
    assert_eq!(
        child_record.annotations().iter().map(|a| a.value()).collect::<Vec<_>>(),
        vec!["cs", "cr"]
    );
}

#[test]
fn child_observers_see_start_before_finish() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut girder = Girder::new();
    girder.register(RecordingObserver {
        label: "root".to_string(),
        events: events.clone(),
    });

    let context = RequestContext::new();
    let mut server = girder.make_server_span(&context, "example.handle", None);
    server.start();
    let mut child = server.make_child("downstream.call");
    child.start();
    child.finish(None);
    server.finish(None);

    let events = events.lock().unwrap();
    let child_started = events
        .iter()
        .position(|e| matches!(e, Event::ChildCreated(_)))
        .unwrap();
    let started = events[child_started + 1..]
        .iter()
        .position(|e| matches!(e, Event::Started(_)))
        .unwrap();
    let finished = events[child_started + 1..]
        .iter()
        .position(|e| matches!(e, Event::Finished(_, _)))
        .unwrap();
    assert!(started < finished);
}

#[test]
fn zero_sample_rate_records_nothing() {
    let (girder, records) = traced_girder(0.0);
    let context = RequestContext::new();
    for _ in 0..100 {
        let mut span = girder.make_server_span(&context, "example.handle", None);
        assert_eq!(span.trace_info().sampled(), Some(false));
        span.start();
        span.finish(None);
    }
    std::thread::sleep(Duration::from_millis(50));
    assert!(records.lock().unwrap().is_empty());
}

#[test]
fn full_sample_rate_records_everything() {
    let (girder, records) = traced_girder(1.0);
    let context = RequestContext::new();
    for _ in 0..100 {
        let mut span = girder.make_server_span(&context, "example.handle", None);
        assert_eq!(span.trace_info().sampled(), Some(true));
        span.start();
        span.finish(None);
    }
    let records = wait_for_records(&records, 100);
    assert_eq!(records.len(), 100);
}

#[test]
fn upstream_decision_is_never_overridden() {
    let (girder, _records) = traced_girder(1.0);
    let context = RequestContext::new();
    let info = TraceInfo::from_upstream(
        TraceId::from(1),
        SpanId::from(2),
        SpanId::from(3),
        Some(false),
        0,
    );
    let span = girder.make_server_span(&context, "example.handle", Some(info));
    assert_eq!(span.trace_info().sampled(), Some(false));
}

#[test]
fn debug_flag_forces_sampling() {
    let (girder, records) = traced_girder(0.0);
    let context = RequestContext::new();
    let mut builder = TraceInfo::builder();
    builder
        .trace_id(TraceId::from(1))
        .parent_id(SpanId::from(2))
        .span_id(SpanId::from(3))
        .debug(true);
    let mut span = girder.make_server_span(&context, "example.handle", Some(builder.build()));
    assert_eq!(span.trace_info().sampled(), Some(true));
    span.start();
    span.finish(None);
    wait_for_records(&records, 1);
}

#[test]
fn error_finish_tags_the_record() {
    let (girder, records) = traced_girder(1.0);
    let context = RequestContext::new();
    let mut span = girder.make_server_span(&context, "example.handle", None);
    span.start();
    span.finish(Some(&HandlerError));

    let records = wait_for_records(&records, 1);
    let error_tag = records[0]
        .binary_annotations()
        .iter()
        .find(|a| a.key() == "error")
        .expect("error tag missing");
    assert_eq!(*error_tag.value(), AnnotationValue::Bool(true));
}

#[test]
fn local_spans_record_their_component() {
    let (girder, records) = traced_girder(1.0);
    let context = RequestContext::new();
    let mut server = girder.make_server_span(&context, "example.handle", None);
    server.start();
    let mut local = server.make_local_child("compute", "example_lib");
    local.start();
    local.finish(None);
    server.finish(None);

    let records = wait_for_records(&records, 2);
    let local_record = records
        .iter()
        .find(|r| r.annotations().is_empty())
        .expect("local record missing");
    let lc = local_record
        .binary_annotations()
        .iter()
        .find(|a| a.key() == "lc")
        .expect("lc annotation missing");
    assert_eq!(*lc.value(), AnnotationValue::String("example_lib".to_string()));
}

#[test]
fn dropping_a_running_span_finishes_it() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut girder = Girder::new();
    girder.register(RecordingObserver {
        label: "root".to_string(),
        events: events.clone(),
    });

    let context = RequestContext::new();
    let mut span = girder.make_server_span(&context, "example.handle", None);
    span.start();
    drop(span);

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            Event::Started("root".to_string()),
            Event::Finished("root".to_string(), false),
        ]
    );
}

struct PanickyObserver;

impl Observer for PanickyObserver {
    fn on_server_span_created(
        &self,
        _context: &RequestContext,
        _span: &mut SpanData,
    ) -> Option<Box<dyn SpanObserver>> {
        Some(Box::new(PanickySpanObserver))
    }
}

struct PanickySpanObserver;

impl SpanObserver for PanickySpanObserver {
    fn on_start(&mut self, _span: &SpanData) {
        panic!("observer bug");
    }
}

#[test]
fn a_failing_observer_does_not_stop_the_rest() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut girder = Girder::new();
    girder.register(PanickyObserver);
    girder.register(RecordingObserver {
        label: "healthy".to_string(),
        events: events.clone(),
    });

    let context = RequestContext::new();
    let mut span = girder.make_server_span(&context, "example.handle", None);
    span.start();
    span.finish(None);

    let events = events.lock().unwrap();
    assert_eq!(events[0], Event::Started("healthy".to_string()));
}

struct CountingFactory {
    made: Arc<Mutex<Vec<String>>>,
}

impl ContextFactory for CountingFactory {
    fn make_object_for_context(
        &self,
        name: &str,
        span: &SpanData,
    ) -> Arc<dyn Any + Send + Sync> {
        self.made.lock().unwrap().push(span.name().to_string());
        Arc::new(format!("{}:{}", name, span.name()))
    }
}

#[test]
fn context_factories_shadow_for_local_spans() {
    let made = Arc::new(Mutex::new(Vec::new()));
    let mut girder = Girder::new();
    girder.add_to_context("client", CountingFactory { made: made.clone() });

    let context = RequestContext::new();
    let mut server = girder.make_server_span(&context, "example.handle", None);
    assert_eq!(
        *context.get::<String>("client").unwrap(),
        "client:example.handle"
    );
    server.start();

    {
        let mut local = server.make_local_child("compute", "example_lib");
        local.start();
        assert_eq!(*context.get::<String>("client").unwrap(), "client:compute");
        local.finish(None);
    }
    assert_eq!(
        *context.get::<String>("client").unwrap(),
        "client:example.handle"
    );

    // client children do not re-materialize context attributes
    let mut client = server.make_child("downstream.call");
    client.start();
    assert_eq!(
        *context.get::<String>("client").unwrap(),
        "client:example.handle"
    );
    client.finish(None);

    server.finish(None);
    assert_eq!(*made.lock().unwrap(), vec!["example.handle", "compute"]);
}

#[test]
fn context_holds_server_span_identity() {
    let girder = Girder::new();
    let context = RequestContext::new();
    let span = girder.make_server_span(&context, "example.handle", Some(upstream_info()));
    assert_eq!(context.trace(), Some(span.trace_info()));
}
