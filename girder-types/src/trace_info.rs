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

//! Trace info.
use crate::sampling_flags;
use crate::{SamplingFlags, SpanId, TraceId};

/// A `TraceInfo` identifies one span's place within a distributed trace.
///
/// It consists of a trace ID, the ID of the parent span, the ID of this
/// span, and flags dealing with the sampling of the trace. The identifiers
/// are sent to remote services on requests, in a standard set of headers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    trace_id: TraceId,
    parent_id: Option<SpanId>,
    span_id: SpanId,
    flags: SamplingFlags,
}

impl TraceInfo {
    /// Returns a builder used to construct a `TraceInfo`.
    pub fn builder() -> Builder {
        Builder {
            trace_id: None,
            parent_id: None,
            span_id: None,
            flags: SamplingFlags::builder(),
        }
    }

    /// Constructs the identity of a request adopted from an upstream
    /// service.
    ///
    /// The upstream caller has already allocated this span's ID and recorded
    /// it as the parent of its own span, so all three identifiers are taken
    /// verbatim.
    pub fn from_upstream(
        trace_id: TraceId,
        parent_id: SpanId,
        span_id: SpanId,
        sampled: Option<bool>,
        flags: u64,
    ) -> TraceInfo {
        let mut builder = TraceInfo::builder();
        builder
            .trace_id(trace_id)
            .parent_id(parent_id)
            .span_id(span_id);
        builder.flags.flags(flags);
        if let Some(sampled) = sampled {
            builder.sampled(sampled);
        }
        builder.build()
    }

    /// Constructs the identity of a child span of this one.
    ///
    /// The child shares this span's trace ID and sampling flags, records
    /// this span as its parent, and takes the supplied fresh span ID.
    pub fn child_of(&self, span_id: SpanId) -> TraceInfo {
        let mut builder = TraceInfo::builder();
        builder
            .trace_id(self.trace_id)
            .parent_id(self.span_id)
            .span_id(span_id)
            .sampling_flags(self.flags);
        builder.build()
    }

    /// Returns the ID of the trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the ID of this span's parent, or `None` for a root span.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    /// Returns the ID of this span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns the sampling flags associated with this trace.
    pub fn sampling_flags(&self) -> SamplingFlags {
        self.flags
    }

    /// Determines if sampling has been requested for this trace.
    ///
    /// A value of `None` indicates that the service handling this request
    /// is responsible for making the decision.
    pub fn sampled(&self) -> Option<bool> {
        self.flags.sampled()
    }

    /// Determines if this trace is in debug mode.
    pub fn debug(&self) -> bool {
        self.flags.debug()
    }
}

/// A builder type for `TraceInfo`s.
pub struct Builder {
    trace_id: Option<TraceId>,
    parent_id: Option<SpanId>,
    span_id: Option<SpanId>,
    flags: sampling_flags::Builder,
}

impl From<TraceInfo> for Builder {
    fn from(info: TraceInfo) -> Builder {
        Builder {
            trace_id: Some(info.trace_id),
            parent_id: info.parent_id,
            span_id: Some(info.span_id),
            flags: info.flags.into(),
        }
    }
}

impl Builder {
    /// Sets the trace ID of this span.
    pub fn trace_id(&mut self, trace_id: TraceId) -> &mut Builder {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the ID of the parent span.
    ///
    /// Defaults to `None`.
    pub fn parent_id(&mut self, parent_id: SpanId) -> &mut Builder {
        self.parent_id = Some(parent_id);
        self
    }

    /// Sets the ID of this span.
    pub fn span_id(&mut self, span_id: SpanId) -> &mut Builder {
        self.span_id = Some(span_id);
        self
    }

    /// Sets the sampling flags for this trace.
    pub fn sampling_flags(&mut self, flags: SamplingFlags) -> &mut Builder {
        self.flags = flags.into();
        self
    }

    /// Sets the sampling request for this trace.
    ///
    /// Defaults to `None`.
    pub fn sampled(&mut self, sampled: bool) -> &mut Builder {
        self.flags.sampled(sampled);
        self
    }

    /// Sets the debug flag for this trace.
    ///
    /// Defaults to `false`.
    pub fn debug(&mut self, debug: bool) -> &mut Builder {
        self.flags.debug(debug);
        self
    }

    /// Constructs a `TraceInfo`.
    ///
    /// # Panics
    ///
    /// Panics if `trace_id` or `span_id` was not set.
    pub fn build(&self) -> TraceInfo {
        TraceInfo {
            trace_id: self.trace_id.expect("trace ID not set"),
            parent_id: self.parent_id,
            span_id: self.span_id.expect("span ID not set"),
            flags: self.flags.build(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_upstream_adopts_identifiers() {
        let info = TraceInfo::from_upstream(
            TraceId::from(1234),
            SpanId::from(2345),
            SpanId::from(3456),
            Some(true),
            1,
        );
        assert_eq!(info.trace_id(), TraceId::from(1234));
        assert_eq!(info.parent_id(), Some(SpanId::from(2345)));
        assert_eq!(info.span_id(), SpanId::from(3456));
        assert_eq!(info.sampled(), Some(true));
        assert!(info.debug());
    }

    #[test]
    fn child_inherits_trace_and_sampling() {
        let mut builder = TraceInfo::builder();
        builder
            .trace_id(TraceId::from(10))
            .span_id(SpanId::from(20))
            .sampled(true);
        let parent = builder.build();

        let child = parent.child_of(SpanId::from(30));
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_eq!(child.parent_id(), Some(parent.span_id()));
        assert_eq!(child.span_id(), SpanId::from(30));
        assert_eq!(child.sampled(), parent.sampled());
    }

    #[test]
    fn undetermined_sampling_by_default() {
        let mut builder = TraceInfo::builder();
        builder.trace_id(TraceId::from(1)).span_id(SpanId::from(1));
        let info = builder.build();
        assert_eq!(info.sampled(), None);
        assert_eq!(info.parent_id(), None);
    }
}
