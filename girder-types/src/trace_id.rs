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

//! Trace IDs.
use std::error::Error;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// The ID of a trace.
///
/// A trace ID is a 64-bit unsigned integer generated at the root of a trace
/// and propagated unchanged to every span within it. In headers it is
/// rendered as a base-10 decimal string; on the wire it is a numeric value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(u64);

impl TraceId {
    /// Returns the numeric value of the trace ID.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TraceId {
    #[inline]
    fn from(id: u64) -> TraceId {
        TraceId(id)
    }
}

impl From<TraceId> for u64 {
    #[inline]
    fn from(id: TraceId) -> u64 {
        id.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = TraceIdParseError;

    fn from_str(s: &str) -> Result<TraceId, TraceIdParseError> {
        s.parse::<u64>()
            .map(TraceId)
            .map_err(TraceIdParseError)
    }
}

mod serde {
    use crate::trace_id::TraceId;
    use serde::de::{Error, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;

    impl Serialize for TraceId {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            s.serialize_u64(self.0)
        }
    }

    impl<'de> Deserialize<'de> for TraceId {
        fn deserialize<D>(d: D) -> Result<TraceId, D::Error>
        where
            D: Deserializer<'de>,
        {
            d.deserialize_u64(V)
        }
    }

    struct V;

    impl<'de> Visitor<'de> for V {
        type Value = TraceId;

        fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt.write_str("a numeric trace ID")
        }

        fn visit_u64<E>(self, v: u64) -> Result<TraceId, E>
        where
            E: Error,
        {
            Ok(TraceId(v))
        }
    }
}

/// The error returned when parsing a `TraceId` from a string.
#[derive(Debug)]
pub struct TraceIdParseError(ParseIntError);

impl fmt::Display for TraceIdParseError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "error parsing trace ID: {}", self.0)
    }
}

impl Error for TraceIdParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}
