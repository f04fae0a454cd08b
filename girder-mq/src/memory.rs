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

//! In-memory message queues.
use crate::{MessageQueue, MessageQueueError};
use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A bounded message queue held in process memory.
///
/// It provides the same depth, message size, and timeout semantics as
/// [`PosixMessageQueue`](crate::PosixMessageQueue) without touching the
/// system namespace, which makes it suitable for tests and for platforms
/// without POSIX message queues.
pub struct InMemoryMessageQueue {
    name: String,
    max_messages: usize,
    max_message_size: usize,
    messages: Mutex<VecDeque<Vec<u8>>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl InMemoryMessageQueue {
    /// Creates a new queue bounded to `max_messages` messages of up to
    /// `max_message_size` bytes each.
    pub fn new(name: &str, max_messages: usize, max_message_size: usize) -> InMemoryMessageQueue {
        InMemoryMessageQueue {
            name: name.to_string(),
            max_messages,
            max_message_size,
            messages: Mutex::new(VecDeque::with_capacity(max_messages)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Returns the number of messages currently queued.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("queue lock poisoned").len()
    }

    /// Determines if the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageQueue for InMemoryMessageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, message: &[u8], timeout: Option<Duration>) -> Result<(), MessageQueueError> {
        if message.len() > self.max_message_size {
            return Err(MessageQueueError::InvalidParameters(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "message of {} bytes exceeds the queue's {} byte limit",
                    message.len(),
                    self.max_message_size
                ),
            )));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut messages = self.messages.lock().expect("queue lock poisoned");
        while messages.len() >= self.max_messages {
            match remaining(deadline) {
                Some(Some(wait)) => {
                    let (guard, result) = self
                        .not_full
                        .wait_timeout(messages, wait)
                        .expect("queue lock poisoned");
                    messages = guard;
                    if result.timed_out() && messages.len() >= self.max_messages {
                        return Err(MessageQueueError::TimedOut);
                    }
                }
                Some(None) => {
                    messages = self.not_full.wait(messages).expect("queue lock poisoned");
                }
                None => return Err(MessageQueueError::TimedOut),
            }
        }
        messages.push_back(message.to_vec());
        self.not_empty.notify_one();
        Ok(())
    }

    fn get(&self, timeout: Option<Duration>) -> Result<Vec<u8>, MessageQueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut messages = self.messages.lock().expect("queue lock poisoned");
        loop {
            if let Some(message) = messages.pop_front() {
                self.not_full.notify_one();
                return Ok(message);
            }
            match remaining(deadline) {
                Some(Some(wait)) => {
                    let (guard, _) = self
                        .not_empty
                        .wait_timeout(messages, wait)
                        .expect("queue lock poisoned");
                    messages = guard;
                }
                Some(None) => {
                    messages = self.not_empty.wait(messages).expect("queue lock poisoned");
                }
                None => return Err(MessageQueueError::TimedOut),
            }
        }
    }
}

/// Returns `None` when the deadline has passed, `Some(Some(d))` when `d`
/// remains, and `Some(None)` when there is no deadline at all.
fn remaining(deadline: Option<Instant>) -> Option<Option<Duration>> {
    match deadline {
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                None
            } else {
                Some(Some(deadline - now))
            }
        }
        None => Some(None),
    }
}
