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

//! POSIX message queues.
use crate::{MessageQueue, MessageQueueError};
use std::ffi::CString;
use std::io;
use std::mem;
use std::time::Duration;

/// An inter-process message queue backed by POSIX message queues.
///
/// `name` must be up to 255 characters consisting of an initial slash,
/// followed by one or more characters, none of which are slashes. The
/// queue is created if it does not already exist and persists in the
/// system namespace until [`unlink`](PosixMessageQueue::unlink)ed.
///
/// Handles may be shared freely between threads; the underlying
/// descriptor's operations are thread-safe and signal-safe.
pub struct PosixMessageQueue {
    mqd: libc::mqd_t,
    name: String,
    max_message_size: usize,
}

unsafe impl Send for PosixMessageQueue {}
unsafe impl Sync for PosixMessageQueue {}

impl PosixMessageQueue {
    /// Opens the named queue, creating it if necessary.
    ///
    /// `max_messages` and `max_message_size` only take effect when the
    /// queue is created; an existing queue keeps its attributes, which are
    /// read back from the descriptor.
    pub fn open(
        name: &str,
        max_messages: i64,
        max_message_size: i64,
    ) -> Result<PosixMessageQueue, MessageQueueError> {
        validate_name(name)?;
        let cname = CString::new(name).map_err(|_| {
            MessageQueueError::InvalidParameters(io::Error::new(
                io::ErrorKind::InvalidInput,
                "queue name contains a NUL byte",
            ))
        })?;

        let mut attr: libc::mq_attr = unsafe { mem::zeroed() };
        attr.mq_maxmsg = max_messages as _;
        attr.mq_msgsize = max_message_size as _;

        let mqd = loop {
            let mqd = unsafe {
                libc::mq_open(
                    cname.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR,
                    0o644 as libc::mode_t,
                    &attr as *const libc::mq_attr,
                )
            };
            if mqd != -1 as libc::mqd_t {
                break mqd;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EINVAL) => return Err(MessageQueueError::InvalidParameters(err)),
                _ => return Err(MessageQueueError::Os(err)),
            }
        };

        // The queue may predate us with different attributes, so trust the
        // descriptor over our arguments.
        let mut effective: libc::mq_attr = unsafe { mem::zeroed() };
        if unsafe { libc::mq_getattr(mqd, &mut effective) } == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::mq_close(mqd) };
            return Err(MessageQueueError::Os(err));
        }

        Ok(PosixMessageQueue {
            mqd,
            name: name.to_string(),
            max_message_size: effective.mq_msgsize as usize,
        })
    }

    /// Returns the maximum size of a message accepted by this queue.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Removes the queue from the system namespace.
    ///
    /// The queue will not be destroyed until the last open handle is
    /// closed.
    pub fn unlink(&self) -> Result<(), MessageQueueError> {
        let cname = CString::new(self.name.as_str()).expect("validated at open");
        if unsafe { libc::mq_unlink(cname.as_ptr()) } == -1 {
            return Err(MessageQueueError::Os(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl MessageQueue for PosixMessageQueue {
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

        let deadline = timeout.map(deadline_from);
        loop {
            let rc = match &deadline {
                Some(deadline) => unsafe {
                    libc::mq_timedsend(
                        self.mqd,
                        message.as_ptr() as *const libc::c_char,
                        message.len(),
                        0,
                        deadline,
                    )
                },
                None => unsafe {
                    libc::mq_send(
                        self.mqd,
                        message.as_ptr() as *const libc::c_char,
                        message.len(),
                        0,
                    )
                },
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Err(MessageQueueError::TimedOut),
                Some(libc::EMSGSIZE) => return Err(MessageQueueError::InvalidParameters(err)),
                _ => return Err(MessageQueueError::Os(err)),
            }
        }
    }

    fn get(&self, timeout: Option<Duration>) -> Result<Vec<u8>, MessageQueueError> {
        let mut buf = vec![0u8; self.max_message_size];
        let deadline = timeout.map(deadline_from);
        loop {
            let n = match &deadline {
                Some(deadline) => unsafe {
                    libc::mq_timedreceive(
                        self.mqd,
                        buf.as_mut_ptr() as *mut libc::c_char,
                        buf.len(),
                        std::ptr::null_mut(),
                        deadline,
                    )
                },
                None => unsafe {
                    libc::mq_receive(
                        self.mqd,
                        buf.as_mut_ptr() as *mut libc::c_char,
                        buf.len(),
                        std::ptr::null_mut(),
                    )
                },
            };
            if n >= 0 {
                buf.truncate(n as usize);
                return Ok(buf);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Err(MessageQueueError::TimedOut),
                _ => return Err(MessageQueueError::Os(err)),
            }
        }
    }
}

impl Drop for PosixMessageQueue {
    fn drop(&mut self) {
        unsafe {
            libc::mq_close(self.mqd);
        }
    }
}

fn validate_name(name: &str) -> Result<(), MessageQueueError> {
    let valid = name.len() > 1
        && name.len() <= 255
        && name.starts_with('/')
        && !name[1..].contains('/');
    if valid {
        Ok(())
    } else {
        Err(MessageQueueError::InvalidParameters(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "queue name {:?} must be a leading slash followed by non-slash characters",
                name
            ),
        )))
    }
}

fn deadline_from(timeout: Duration) -> libc::timespec {
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + libc::c_long::from(timeout.subsec_nanos());
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}
