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

//! Sampling flags.

/// The bit in the flags field which forces sampling through every
/// downstream service.
pub const FLAG_DEBUG: u64 = 1;

/// Flags used to control sampling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SamplingFlags {
    sampled: Option<bool>,
    flags: u64,
}

impl Default for SamplingFlags {
    fn default() -> SamplingFlags {
        SamplingFlags::builder().build()
    }
}

impl SamplingFlags {
    /// Returns a builder used to construct `SamplingFlags`.
    pub fn builder() -> Builder {
        Builder {
            sampled: None,
            flags: 0,
        }
    }

    /// Determines if sampling has been requested for this trace.
    ///
    /// A value of `None` indicates that the service handling the request is
    /// responsible for making that decision.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// Returns the raw flags bitfield.
    pub fn flags(&self) -> u64 {
        self.flags
    }

    /// Determines if this trace is in debug mode.
    ///
    /// Debug traces are always sampled, regardless of the value of
    /// `sampled()` or any configured sample rate.
    pub fn debug(&self) -> bool {
        self.flags & FLAG_DEBUG != 0
    }
}

/// A builder type for `SamplingFlags`.
pub struct Builder {
    sampled: Option<bool>,
    flags: u64,
}

impl From<SamplingFlags> for Builder {
    fn from(flags: SamplingFlags) -> Builder {
        Builder {
            sampled: flags.sampled,
            flags: flags.flags,
        }
    }
}

impl Builder {
    /// Sets the sampling request for this trace.
    ///
    /// Defaults to `None`.
    pub fn sampled(&mut self, sampled: bool) -> &mut Builder {
        self.sampled = Some(sampled);
        self
    }

    /// Sets the raw flags bitfield.
    ///
    /// Defaults to `0`.
    pub fn flags(&mut self, flags: u64) -> &mut Builder {
        self.flags = flags;
        self
    }

    /// Sets or clears the debug bit.
    pub fn debug(&mut self, debug: bool) -> &mut Builder {
        if debug {
            self.flags |= FLAG_DEBUG;
        } else {
            self.flags &= !FLAG_DEBUG;
        }
        self
    }

    /// Constructs `SamplingFlags`.
    pub fn build(&self) -> SamplingFlags {
        SamplingFlags {
            sampled: if self.flags & FLAG_DEBUG != 0 {
                Some(true)
            } else {
                self.sampled
            },
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let flags = SamplingFlags::default();
        assert_eq!(flags.sampled(), None);
        assert_eq!(flags.flags(), 0);
        assert!(!flags.debug());
    }

    #[test]
    fn debug_forces_sampling() {
        let flags = SamplingFlags::builder().sampled(false).debug(true).build();
        assert_eq!(flags.sampled(), Some(true));
        assert!(flags.debug());
    }

    #[test]
    fn raw_flags_preserved() {
        let flags = SamplingFlags::builder().flags(5).build();
        assert_eq!(flags.flags(), 5);
        assert!(flags.debug());
    }
}
