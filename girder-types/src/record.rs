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

//! Serialized span records.
//!
//! A `Record` is the Zipkin v1-compatible wire shape produced when a
//! sampled span finishes. Records are what move through the span recording
//! pipeline: the in-process recorder queue, the inter-process span queue,
//! and the publisher's batches.
use crate::{Endpoint, SpanId, TraceId};
use serde::{Deserialize, Serialize};

/// An annotation event with a time component.
///
/// The core annotations are `"sr"`/`"ss"` for the server side of a request
/// and `"cs"`/`"cr"` for the client side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    endpoint: Endpoint,
    timestamp: u64,
    value: String,
}

impl Annotation {
    /// Creates a new `Annotation`.
    pub fn new(endpoint: Endpoint, timestamp: u64, value: &str) -> Annotation {
        Annotation {
            endpoint,
            timestamp,
            value: value.to_string(),
        }
    }

    /// Returns the endpoint which recorded the annotated event.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the time at which the annotated event occurred, in
    /// microseconds since the UNIX epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the value of the annotation.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// The value of a binary annotation.
///
/// Booleans pass through unchanged; every other tag value is coerced to
/// its string form before reaching the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    /// A boolean value.
    Bool(bool),
    /// A string value.
    String(String),
}

impl From<bool> for AnnotationValue {
    fn from(value: bool) -> AnnotationValue {
        AnnotationValue::Bool(value)
    }
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> AnnotationValue {
        AnnotationValue::String(value.to_string())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> AnnotationValue {
        AnnotationValue::String(value)
    }
}

/// An annotation without a time component, e.g. a URI or request tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryAnnotation {
    key: String,
    value: AnnotationValue,
    endpoint: Endpoint,
}

impl BinaryAnnotation {
    /// Creates a new `BinaryAnnotation`.
    pub fn new(key: &str, value: AnnotationValue, endpoint: Endpoint) -> BinaryAnnotation {
        BinaryAnnotation {
            key: key.to_string(),
            value,
            endpoint,
        }
    }

    /// Returns the key of the annotation.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value of the annotation.
    pub fn value(&self) -> &AnnotationValue {
        &self.value
    }

    /// Returns the endpoint which recorded the annotation.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// A serialized record of one finished span.
///
/// Identifiers serialize as numeric 64-bit values, and an absent parent
/// serializes as `0`, for compatibility with Zipkin v1 collectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    trace_id: TraceId,
    name: String,
    id: SpanId,
    parent_id: SpanId,
    timestamp: u64,
    duration: u64,
    annotations: Vec<Annotation>,
    binary_annotations: Vec<BinaryAnnotation>,
}

impl Record {
    /// Returns a builder used to construct a `Record`.
    pub fn builder() -> Builder {
        Builder {
            trace_id: None,
            name: None,
            id: None,
            parent_id: SpanId::from(0),
            timestamp: 0,
            duration: 0,
            annotations: vec![],
            binary_annotations: vec![],
        }
    }

    /// Returns the ID of the trace this record belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the name of the operation the span represents.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the ID of the recorded span.
    pub fn id(&self) -> SpanId {
        self.id
    }

    /// Returns the ID of the recorded span's parent, `0` for a root span.
    pub fn parent_id(&self) -> SpanId {
        self.parent_id
    }

    /// Returns the start of the span in microseconds since the UNIX epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the duration of the span in microseconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Returns the time annotations recorded on the span.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Returns the binary annotations recorded on the span.
    pub fn binary_annotations(&self) -> &[BinaryAnnotation] {
        &self.binary_annotations
    }
}

/// A builder for `Record`s.
pub struct Builder {
    trace_id: Option<TraceId>,
    name: Option<String>,
    id: Option<SpanId>,
    parent_id: SpanId,
    timestamp: u64,
    duration: u64,
    annotations: Vec<Annotation>,
    binary_annotations: Vec<BinaryAnnotation>,
}

impl Builder {
    /// Sets the trace ID of the record.
    pub fn trace_id(&mut self, trace_id: TraceId) -> &mut Builder {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the name of the record.
    pub fn name(&mut self, name: &str) -> &mut Builder {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the ID of the recorded span.
    pub fn id(&mut self, id: SpanId) -> &mut Builder {
        self.id = Some(id);
        self
    }

    /// Sets the ID of the recorded span's parent.
    ///
    /// Defaults to `0`, the wire form of an absent parent.
    pub fn parent_id(&mut self, parent_id: SpanId) -> &mut Builder {
        self.parent_id = parent_id;
        self
    }

    /// Sets the start of the span in microseconds since the UNIX epoch.
    pub fn timestamp(&mut self, timestamp: u64) -> &mut Builder {
        self.timestamp = timestamp;
        self
    }

    /// Sets the duration of the span in microseconds.
    pub fn duration(&mut self, duration: u64) -> &mut Builder {
        self.duration = duration;
        self
    }

    /// Adds a time annotation to the record.
    pub fn annotation(&mut self, annotation: Annotation) -> &mut Builder {
        self.annotations.push(annotation);
        self
    }

    /// Adds a binary annotation to the record.
    pub fn binary_annotation(&mut self, annotation: BinaryAnnotation) -> &mut Builder {
        self.binary_annotations.push(annotation);
        self
    }

    /// Adds multiple binary annotations to the record.
    pub fn binary_annotations<I>(&mut self, annotations: I) -> &mut Builder
    where
        I: IntoIterator<Item = BinaryAnnotation>,
    {
        self.binary_annotations.extend(annotations);
        self
    }

    /// Constructs a `Record`.
    ///
    /// # Panics
    ///
    /// Panics if `trace_id`, `name`, or `id` was not set.
    pub fn build(&self) -> Record {
        Record {
            trace_id: self.trace_id.expect("trace ID not set"),
            name: self.name.clone().expect("name not set"),
            id: self.id.expect("span ID not set"),
            parent_id: self.parent_id,
            timestamp: self.timestamp,
            duration: self.duration,
            annotations: self.annotations.clone(),
            binary_annotations: self.binary_annotations.clone(),
        }
    }
}
