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

//! Span IDs.
use std::error::Error;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// The ID of a span.
///
/// A span ID is a 64-bit unsigned integer, unique within its trace. In
/// headers it is rendered as a base-10 decimal string; on the wire it is a
/// numeric value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Returns the numeric value of the span ID.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SpanId {
    #[inline]
    fn from(id: u64) -> SpanId {
        SpanId(id)
    }
}

impl From<SpanId> for u64 {
    #[inline]
    fn from(id: SpanId) -> u64 {
        id.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = SpanIdParseError;

    fn from_str(s: &str) -> Result<SpanId, SpanIdParseError> {
        s.parse::<u64>().map(SpanId).map_err(SpanIdParseError)
    }
}

mod serde {
    use crate::span_id::SpanId;
    use serde::de::{Error, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;

    impl Serialize for SpanId {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            s.serialize_u64(self.0)
        }
    }

    impl<'de> Deserialize<'de> for SpanId {
        fn deserialize<D>(d: D) -> Result<SpanId, D::Error>
        where
            D: Deserializer<'de>,
        {
            d.deserialize_u64(V)
        }
    }

    struct V;

    impl<'de> Visitor<'de> for V {
        type Value = SpanId;

        fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt.write_str("a numeric span ID")
        }

        fn visit_u64<E>(self, v: u64) -> Result<SpanId, E>
        where
            E: Error,
        {
            Ok(SpanId(v))
        }
    }
}

/// The error returned when parsing a `SpanId` from a string.
#[derive(Debug)]
pub struct SpanIdParseError(ParseIntError);

impl fmt::Display for SpanIdParseError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "error parsing span ID: {}", self.0)
    }
}

impl Error for SpanIdParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}
