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

//! HTTP header propagation for Girder trace information.
//!
//! Inbound requests carry their trace identity in either short
//! (`X-Trace`, `Trace`, ...) or B3-prefixed (`X-B3-TraceId`,
//! `B3-TraceId`, ...) headers; integer fields are base-10 decimal.
//! Whether those headers are honored at all is decided by a
//! [`HeaderTrustHandler`], so services at the edge can refuse to adopt
//! identifiers from untrusted clients.
//!
//! Alongside the trace headers, an opaque edge-context payload rides on
//! `X-Edge-Request` and is forwarded verbatim on outbound calls.
#![warn(missing_docs)]

use http::header::{HeaderMap, HeaderValue};
use std::str::FromStr;

use girder_types::{SpanId, TraceId, TraceInfo};

const TRACE_ID_HEADERS: &[&str] = &["X-Trace", "Trace", "X-B3-TraceId", "B3-TraceId"];
const PARENT_SPAN_ID_HEADERS: &[&str] = &["X-Parent", "Parent", "X-B3-ParentSpanId", "B3-ParentSpanId"];
const SPAN_ID_HEADERS: &[&str] = &["X-Span", "Span", "X-B3-SpanId", "B3-SpanId"];
const SAMPLED_HEADERS: &[&str] = &["X-Sampled", "Sampled", "X-B3-Sampled", "B3-Sampled"];
const FLAGS_HEADERS: &[&str] = &["X-Flags", "Flags", "X-B3-Flags", "B3-Flags"];
const EDGE_CONTEXT_HEADERS: &[&str] = &["X-Edge-Request", "Edge-Request"];

/// Deserializes a trace identity from a set of HTTP headers.
///
/// The upstream identity is adopted only when trace ID, parent span ID,
/// and span ID are all present and parse as base-10 unsigned 64-bit
/// integers; otherwise `None` is returned and the caller starts a new
/// root trace. `sampled` is taken as the literal `"1"` when the header is
/// present, and the flags bitfield is adopted when present and parseable.
pub fn get_trace_info(headers: &HeaderMap) -> Option<TraceInfo> {
    let trace_id: TraceId = parse_header(headers, TRACE_ID_HEADERS)?;
    let parent_span_id: SpanId = parse_header(headers, PARENT_SPAN_ID_HEADERS)?;
    let span_id: SpanId = parse_header(headers, SPAN_ID_HEADERS)?;

    let sampled = first_header(headers, SAMPLED_HEADERS).map(|value| value == "1");
    let flags = parse_header::<u64>(headers, FLAGS_HEADERS).unwrap_or(0);

    Some(TraceInfo::from_upstream(
        trace_id,
        parent_span_id,
        span_id,
        sampled,
        flags,
    ))
}

/// Serializes a trace identity into a set of HTTP headers for an outbound
/// call.
///
/// The short header forms are emitted; an absent parent is sent as `0`.
pub fn set_trace_info(info: TraceInfo, headers: &mut HeaderMap) {
    headers.insert(
        "Trace",
        HeaderValue::from_str(&info.trace_id().to_string()).unwrap(),
    );
    let parent_id = info.parent_id().unwrap_or_else(|| SpanId::from(0));
    headers.insert(
        "Parent",
        HeaderValue::from_str(&parent_id.to_string()).unwrap(),
    );
    headers.insert(
        "Span",
        HeaderValue::from_str(&info.span_id().to_string()).unwrap(),
    );

    match info.sampled() {
        Some(true) => {
            headers.insert("Sampled", HeaderValue::from_static("1"));
        }
        Some(false) => {
            headers.insert("Sampled", HeaderValue::from_static("0"));
        }
        None => {
            headers.remove("Sampled");
        }
    }
    let flags = info.sampling_flags().flags();
    if flags != 0 {
        headers.insert(
            "Flags",
            HeaderValue::from_str(&flags.to_string()).unwrap(),
        );
    } else {
        headers.remove("Flags");
    }
}

/// Deserializes the opaque edge-context payload from a set of HTTP
/// headers.
///
/// An empty header value is preserved as an empty payload; `None` means
/// no header arrived.
pub fn get_edge_context(headers: &HeaderMap) -> Option<Vec<u8>> {
    for name in EDGE_CONTEXT_HEADERS {
        if let Some(value) = headers.get(*name) {
            return Some(value.as_bytes().to_vec());
        }
    }
    None
}

/// Serializes the opaque edge-context payload into a set of HTTP headers
/// for an outbound call.
///
/// An absent payload removes the header; an empty payload is forwarded
/// as an empty value.
pub fn set_edge_context(payload: Option<&[u8]>, headers: &mut HeaderMap) {
    match payload {
        Some(payload) => {
            if let Ok(value) = HeaderValue::from_bytes(payload) {
                headers.insert("Edge-Request", value);
            }
        }
        None => {
            headers.remove("Edge-Request");
        }
    }
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

fn parse_header<T>(headers: &HeaderMap, names: &[&str]) -> Option<T>
where
    T: FromStr,
{
    first_header(headers, names).and_then(|value| value.parse().ok())
}

/// Decides whether identity-bearing headers from a request are honored.
///
/// Rejected headers are treated as if they were absent: the trace starts
/// a fresh root, and no edge context is attached.
pub trait HeaderTrustHandler {
    /// Determines if the trace headers of the request should be adopted.
    fn should_trust_trace_headers(&self, headers: &HeaderMap) -> bool;

    /// Determines if the edge-context payload of the request should be
    /// attached.
    fn should_trust_edge_context_payload(&self, headers: &HeaderMap) -> bool;
}

/// A [`HeaderTrustHandler`] with one fixed answer for every request.
///
/// Only trust headers when the service is reachable solely from trusted
/// sources, typically backend-only services behind the edge.
pub struct StaticTrustHandler {
    trust_headers: bool,
}

impl StaticTrustHandler {
    /// Creates a handler which accepts everything (`true`) or rejects
    /// everything (`false`).
    pub fn new(trust_headers: bool) -> StaticTrustHandler {
        StaticTrustHandler { trust_headers }
    }
}

impl HeaderTrustHandler for StaticTrustHandler {
    fn should_trust_trace_headers(&self, _headers: &HeaderMap) -> bool {
        self.trust_headers
    }

    fn should_trust_edge_context_payload(&self, _headers: &HeaderMap) -> bool {
        self.trust_headers
    }
}

/// Extracts the inbound trace identity, gated by a trust handler.
pub fn extract_trace_info<H>(handler: &H, headers: &HeaderMap) -> Option<TraceInfo>
where
    H: HeaderTrustHandler + ?Sized,
{
    if handler.should_trust_trace_headers(headers) {
        get_trace_info(headers)
    } else {
        None
    }
}

/// Extracts the inbound edge-context payload, gated by a trust handler.
pub fn extract_edge_context<H>(handler: &H, headers: &HeaderMap) -> Option<Vec<u8>>
where
    H: HeaderTrustHandler + ?Sized,
{
    if handler.should_trust_edge_context_payload(headers) {
        get_edge_context(headers)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn upstream_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Trace", HeaderValue::from_static("1234"));
        headers.insert("Parent", HeaderValue::from_static("2345"));
        headers.insert("Span", HeaderValue::from_static("3456"));
        headers.insert("Sampled", HeaderValue::from_static("1"));
        headers.insert("Flags", HeaderValue::from_static("1"));
        headers
    }

    #[test]
    fn adopts_short_form_headers() {
        let info = get_trace_info(&upstream_headers()).unwrap();
        assert_eq!(info.trace_id(), TraceId::from(1234));
        assert_eq!(info.parent_id(), Some(SpanId::from(2345)));
        assert_eq!(info.span_id(), SpanId::from(3456));
        assert_eq!(info.sampled(), Some(true));
        assert_eq!(info.sampling_flags().flags(), 1);
    }

    #[test]
    fn adopts_b3_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-B3-TraceId", HeaderValue::from_static("1"));
        headers.insert("X-B3-ParentSpanId", HeaderValue::from_static("2"));
        headers.insert("X-B3-SpanId", HeaderValue::from_static("3"));
        let info = get_trace_info(&headers).unwrap();
        assert_eq!(info.trace_id(), TraceId::from(1));
        assert_eq!(info.parent_id(), Some(SpanId::from(2)));
        assert_eq!(info.span_id(), SpanId::from(3));
        assert_eq!(info.sampled(), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("trace", HeaderValue::from_static("1"));
        headers.insert("parent", HeaderValue::from_static("2"));
        headers.insert("span", HeaderValue::from_static("3"));
        assert!(get_trace_info(&headers).is_some());
    }

    #[test]
    fn missing_field_means_new_root() {
        let mut headers = upstream_headers();
        headers.remove("Parent");
        assert_eq!(get_trace_info(&headers), None);
    }

    #[test]
    fn malformed_field_means_new_root() {
        for (name, value) in [
            ("Trace", "deadbeef"),
            ("Span", "-1"),
            ("Parent", "18446744073709551616"),
        ] {
            let mut headers = upstream_headers();
            headers.insert(name, HeaderValue::from_static(value));
            assert_eq!(get_trace_info(&headers), None, "{} = {}", name, value);
        }
    }

    #[test]
    fn sampled_header_other_than_one_is_false() {
        let mut headers = upstream_headers();
        headers.remove("Flags");
        headers.insert("Sampled", HeaderValue::from_static("0"));
        assert_eq!(get_trace_info(&headers).unwrap().sampled(), Some(false));

        headers.insert("Sampled", HeaderValue::from_static("yes"));
        assert_eq!(get_trace_info(&headers).unwrap().sampled(), Some(false));
    }

    #[test]
    fn absent_sampled_header_is_undetermined() {
        let mut headers = upstream_headers();
        headers.remove("Sampled");
        headers.remove("Flags");
        assert_eq!(get_trace_info(&headers).unwrap().sampled(), None);
    }

    #[test]
    fn outbound_headers_round_trip() {
        let info = TraceInfo::from_upstream(
            TraceId::from(1234),
            SpanId::from(2345),
            SpanId::from(3456),
            Some(true),
            0,
        );
        let mut headers = HeaderMap::new();
        set_trace_info(info, &mut headers);

        assert_eq!(headers.get("Trace").unwrap(), "1234");
        assert_eq!(headers.get("Parent").unwrap(), "2345");
        assert_eq!(headers.get("Span").unwrap(), "3456");
        assert_eq!(headers.get("Sampled").unwrap(), "1");
        assert_eq!(headers.get("Flags"), None);

        assert_eq!(get_trace_info(&headers), Some(info));
    }

    #[test]
    fn outbound_root_emits_zero_parent() {
        let mut builder = TraceInfo::builder();
        builder.trace_id(TraceId::from(10)).span_id(SpanId::from(10));
        let mut headers = HeaderMap::new();
        set_trace_info(builder.build(), &mut headers);
        assert_eq!(headers.get("Parent").unwrap(), "0");
        assert_eq!(headers.get("Sampled"), None);
    }

    #[test]
    fn edge_context_round_trip() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_edge_context(&headers), None);

        headers.insert("X-Edge-Request", HeaderValue::from_static("payload"));
        assert_eq!(get_edge_context(&headers), Some(b"payload".to_vec()));

        let mut outbound = HeaderMap::new();
        set_edge_context(Some(b"payload"), &mut outbound);
        assert_eq!(outbound.get("Edge-Request").unwrap(), "payload");
    }

    #[test]
    fn empty_edge_context_is_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Edge-Request", HeaderValue::from_static(""));
        assert_eq!(get_edge_context(&headers), Some(vec![]));

        let mut outbound = HeaderMap::new();
        set_edge_context(Some(b""), &mut outbound);
        assert_eq!(outbound.get("Edge-Request").unwrap(), "");

        set_edge_context(None, &mut outbound);
        assert_eq!(outbound.get("Edge-Request"), None);
    }

    #[test]
    fn distrusted_headers_are_ignored() {
        let headers = upstream_headers();
        let distrust = StaticTrustHandler::new(false);
        assert_eq!(extract_trace_info(&distrust, &headers), None);
        assert_eq!(extract_edge_context(&distrust, &headers), None);

        let trust = StaticTrustHandler::new(true);
        assert!(extract_trace_info(&trust, &headers).is_some());
    }
}
