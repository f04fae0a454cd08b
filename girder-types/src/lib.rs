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

//! Girder is a framework for instrumenting networked backend services.
//! This crate defines the data types shared by the rest of the framework:
//! trace identifiers, sampling flags, trace contexts, and the Zipkin
//! v1-compatible wire records produced by the span recording pipeline.
//!
//! # Serialization
//!
//! `TraceId` and `SpanId` serialize as numeric 64-bit integers, and the
//! record types serialize in the standard Zipkin v1 JSON format.
#![warn(missing_docs)]

#[doc(inline)]
pub use crate::endpoint::Endpoint;
#[doc(inline)]
pub use crate::record::{Annotation, AnnotationValue, BinaryAnnotation, Record};
#[doc(inline)]
pub use crate::sampling_flags::SamplingFlags;
#[doc(inline)]
pub use crate::span_id::SpanId;
#[doc(inline)]
pub use crate::trace_id::TraceId;
#[doc(inline)]
pub use crate::trace_info::TraceInfo;

pub mod endpoint;
pub mod record;
pub mod sampling_flags;
pub mod span_id;
pub mod trace_id;
pub mod trace_info;
