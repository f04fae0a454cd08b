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

//! Bounded inter-process message queues.
//!
//! The span recording pipeline hands serialized records from service
//! processes to a sidecar publisher through a named, bounded message queue.
//! [`PosixMessageQueue`] is the production implementation, backed by POSIX
//! message queues; [`InMemoryMessageQueue`] provides the same semantics
//! within a single process for tests and for platforms without POSIX
//! queues.
//!
//! Every queue is bounded in both depth and message size, and both `put`
//! and `get` take an optional timeout so that callers on the request path
//! can use a zero timeout and never block.
#![warn(missing_docs)]

#[doc(inline)]
pub use crate::memory::InMemoryMessageQueue;
#[doc(inline)]
pub use crate::posix::PosixMessageQueue;

pub mod memory;
pub mod posix;

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

/// The default maximum number of messages in a span queue.
pub const DEFAULT_MAX_MESSAGES: i64 = 10_000;

/// The default maximum size of a single queued message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: i64 = 102_400;

/// An error returned by a message queue operation.
#[derive(Debug)]
pub enum MessageQueueError {
    /// The queue was full (on put) or empty (on get) for the allowed
    /// duration of the call.
    TimedOut,
    /// The queue's parameters, or a message, were not acceptable.
    InvalidParameters(io::Error),
    /// The operating system rejected the operation.
    Os(io::Error),
}

impl fmt::Display for MessageQueueError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageQueueError::TimedOut => {
                fmt.write_str("timed out waiting for the message queue")
            }
            MessageQueueError::InvalidParameters(err) => write!(
                fmt,
                "{} (check fs.mqueue.{{msg_max,msgsize_max}} sysctls?)",
                err
            ),
            MessageQueueError::Os(err) => write!(fmt, "{} (check `ulimit -q`?)", err),
        }
    }
}

impl StdError for MessageQueueError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MessageQueueError::TimedOut => None,
            MessageQueueError::InvalidParameters(err) | MessageQueueError::Os(err) => Some(err),
        }
    }
}

/// A bounded message queue.
///
/// Implementations are safe to share between concurrent producers and
/// consumers. Dropping a queue handle releases it; for the POSIX variant
/// the queue itself persists in the system namespace until unlinked.
pub trait MessageQueue: Send + Sync {
    /// Returns the name the queue was opened with.
    fn name(&self) -> &str;

    /// Adds a message to the queue.
    ///
    /// If the queue is full, the call blocks up to `timeout` (or forever if
    /// `None`) before failing with [`MessageQueueError::TimedOut`]. A zero
    /// timeout makes the call non-blocking. A message larger than the
    /// queue's maximum message size fails with
    /// [`MessageQueueError::InvalidParameters`].
    fn put(&self, message: &[u8], timeout: Option<Duration>) -> Result<(), MessageQueueError>;

    /// Reads a message from the queue.
    ///
    /// If the queue is empty, the call blocks up to `timeout` (or forever
    /// if `None`) before failing with [`MessageQueueError::TimedOut`].
    fn get(&self, timeout: Option<Duration>) -> Result<Vec<u8>, MessageQueueError>;
}
