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

//! Span recording.
//!
//! A [`Recorder`] is the stage between the request path and trace
//! delivery: finished spans are offered to a bounded in-process queue
//! without ever blocking, and a pool of worker threads drains the queue
//! in batches. What a batch becomes depends on the recorder variant:
//! dropped, written to the debug log, POSTed to a collector, or forwarded
//! to the sidecar queue.
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::EndpointAddress;
use girder_mq::{MessageQueue, MessageQueueError, PosixMessageQueue};
use girder_types::Record;

/// The default bound on in-process pending records.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50_000;

/// The in-process queue bound used by the sidecar recorder.
pub const SIDECAR_QUEUE_SIZE: usize = 102_400;

/// The largest serialized record the sidecar queue accepts, in bytes.
pub const MAX_SIDECAR_MESSAGE_SIZE: usize = 102_400;

/// The most records a worker flushes at once.
const MAX_SPAN_BATCH: usize = 100;

/// The most records a worker POSTs to a collector at once.
const MAX_REMOTE_SPAN_BATCH: usize = 20;

/// How long the remote recorder waits for the collector.
const REMOTE_POST_TIMEOUT: Duration = Duration::from_secs(1);

/// Returns the system queue name for a configured queue identifier.
pub fn trace_queue_name(name: &str) -> String {
    format!("/traces-{}", name)
}

/// A bounded, non-blocking consumer of finished span records.
///
/// `send` never blocks the request path: when the queue is full the record
/// is dropped with a warning. Worker I/O failures are logged and never
/// propagate. Dropping the recorder disconnects the queue; workers flush
/// what remains and exit.
pub struct Recorder {
    tx: Sender<Record>,
    dropped: Arc<AtomicU64>,
    flushed: Arc<AtomicU64>,
}

impl Recorder {
    /// Creates a recorder that discards every record.
    pub fn null(max_queue_size: usize, num_workers: usize, batch_wait_interval: Duration) -> Recorder {
        Recorder::start(
            Arc::new(NullFlush),
            max_queue_size,
            num_workers,
            MAX_SPAN_BATCH,
            batch_wait_interval,
        )
    }

    /// Creates a recorder that writes each record to the debug log.
    pub fn logging(
        max_queue_size: usize,
        num_workers: usize,
        batch_wait_interval: Duration,
    ) -> Recorder {
        Recorder::start(
            Arc::new(LoggingFlush),
            max_queue_size,
            num_workers,
            MAX_SPAN_BATCH,
            batch_wait_interval,
        )
    }

    /// Creates a recorder that POSTs batches to an in-process collector
    /// endpoint.
    pub fn remote(
        endpoint: &EndpointAddress,
        max_queue_size: usize,
        num_workers: usize,
        batch_wait_interval: Duration,
    ) -> Result<Recorder, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REMOTE_POST_TIMEOUT)
            .user_agent(concat!("girder/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Recorder::start(
            Arc::new(HttpFlush {
                client,
                url: crate::trace::collector_url(endpoint),
            }),
            max_queue_size,
            num_workers,
            MAX_REMOTE_SPAN_BATCH,
            batch_wait_interval,
        ))
    }

    /// Creates a recorder that forwards each record to the sidecar span
    /// queue `/traces-<queue_name>`.
    pub fn sidecar(
        queue_name: &str,
        num_workers: usize,
        batch_wait_interval: Duration,
    ) -> Result<Recorder, MessageQueueError> {
        let queue = PosixMessageQueue::open(
            &trace_queue_name(queue_name),
            girder_mq::DEFAULT_MAX_MESSAGES,
            girder_mq::DEFAULT_MAX_MESSAGE_SIZE,
        )?;
        Ok(Recorder::sidecar_to(
            Box::new(queue),
            num_workers,
            batch_wait_interval,
        ))
    }

    /// Creates a sidecar recorder writing to an already-open queue.
    pub fn sidecar_to(
        queue: Box<dyn MessageQueue>,
        num_workers: usize,
        batch_wait_interval: Duration,
    ) -> Recorder {
        Recorder::start(
            Arc::new(SidecarFlush { queue }),
            SIDECAR_QUEUE_SIZE,
            num_workers,
            MAX_SPAN_BATCH,
            batch_wait_interval,
        )
    }

    pub(crate) fn start(
        flush: Arc<dyn Flush>,
        max_queue_size: usize,
        num_workers: usize,
        max_span_batch: usize,
        batch_wait_interval: Duration,
    ) -> Recorder {
        let (tx, rx) = crossbeam_channel::bounded(max_queue_size);
        let flushed = Arc::new(AtomicU64::new(0));

        for i in 0..num_workers {
            let worker = Worker {
                rx: rx.clone(),
                flush: flush.clone(),
                flushed: flushed.clone(),
                max_span_batch,
                batch_wait_interval,
            };
            let spawned = thread::Builder::new()
                .name(format!("span-recorder-{}", i))
                .spawn(move || worker.run());
            if let Err(err) = spawned {
                error!("failed to spawn span recorder worker: {}", err);
            }
        }

        Recorder {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            flushed,
        }
    }

    /// Offers a record to the queue without blocking.
    ///
    /// On a full queue the record is dropped and counted.
    pub fn send(&self, record: Record) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("span recording queue is full, dropping record");
        }
    }

    /// Returns the number of records dropped due to a full queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of records handed to the flush stage.
    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }
}

struct Worker {
    rx: Receiver<Record>,
    flush: Arc<dyn Flush>,
    flushed: Arc<AtomicU64>,
    max_span_batch: usize,
    batch_wait_interval: Duration,
}

impl Worker {
    fn run(self) {
        loop {
            let mut batch = Vec::new();
            let mut disconnected = false;
            while batch.len() < self.max_span_batch {
                match self.rx.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            if !batch.is_empty() {
                self.flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.flush.flush(batch);
            } else if disconnected {
                return;
            } else {
                thread::sleep(self.batch_wait_interval);
            }

            if disconnected && self.rx.is_empty() {
                return;
            }
        }
    }
}

pub(crate) trait Flush: Send + Sync {
    fn flush(&self, batch: Vec<Record>);
}

struct NullFlush;

impl Flush for NullFlush {
    fn flush(&self, _batch: Vec<Record>) {}
}

struct LoggingFlush;

impl Flush for LoggingFlush {
    fn flush(&self, batch: Vec<Record>) {
        for record in batch {
            debug!("span recording: {:?}", record);
        }
    }
}

struct HttpFlush {
    client: reqwest::blocking::Client,
    url: String,
}

impl Flush for HttpFlush {
    fn flush(&self, batch: Vec<Record>) {
        let body = match serde_json::to_vec(&batch) {
            Ok(body) => body,
            Err(err) => {
                error!("failed to serialize span batch: {}", err);
                return;
            }
        };
        let result = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send();
        match result {
            Ok(response) if !response.status().is_success() => {
                error!("span collector returned {}", response.status());
            }
            Ok(_) => {}
            Err(err) => error!("error flushing spans: {}", err),
        }
    }
}

struct SidecarFlush {
    queue: Box<dyn MessageQueue>,
}

impl Flush for SidecarFlush {
    fn flush(&self, batch: Vec<Record>) {
        for record in batch {
            let serialized = match serde_json::to_vec(&record) {
                Ok(serialized) => serialized,
                Err(err) => {
                    error!("failed to serialize span record: {}", err);
                    continue;
                }
            };
            if serialized.len() > MAX_SIDECAR_MESSAGE_SIZE {
                error!(
                    "span too large for queue {}: {} bytes exceeds the {} byte limit, \
                     possibly from an excess of tags or child spans",
                    self.queue.name(),
                    serialized.len(),
                    MAX_SIDECAR_MESSAGE_SIZE,
                );
                continue;
            }
            match self.queue.put(&serialized, Some(Duration::from_secs(0))) {
                Ok(()) => {}
                Err(MessageQueueError::TimedOut) => {
                    warn!(
                        "span queue {} is full, is the trace sidecar healthy?",
                        self.queue.name()
                    );
                }
                Err(err) => {
                    error!("failed writing span to queue {}: {}", self.queue.name(), err);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use girder_mq::InMemoryMessageQueue;
    use girder_types::{Record, SpanId, TraceId};
    use std::sync::Mutex;

    fn record(id: u64) -> Record {
        Record::builder()
            .trace_id(TraceId::from(1))
            .name("test")
            .id(SpanId::from(id))
            .build()
    }

    struct CollectingFlush {
        batches: Arc<Mutex<Vec<Vec<Record>>>>,
    }

    impl Flush for CollectingFlush {
        fn flush(&self, batch: Vec<Record>) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    #[test]
    fn overflow_drops_without_blocking() {
        // no workers, so nothing drains the queue
        let recorder = Recorder::start(
            Arc::new(NullFlush),
            2,
            0,
            MAX_SPAN_BATCH,
            Duration::from_millis(10),
        );
        for i in 0..5 {
            recorder.send(record(i));
        }
        assert_eq!(recorder.dropped(), 3);
    }

    #[test]
    fn workers_flush_queued_records() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder::start(
            Arc::new(CollectingFlush {
                batches: batches.clone(),
            }),
            100,
            1,
            MAX_SPAN_BATCH,
            Duration::from_millis(1),
        );
        for i in 0..3 {
            recorder.send(record(i));
        }
        drop(recorder);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let flushed: usize = batches.lock().unwrap().iter().map(Vec::len).sum();
            if flushed == 3 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "records never flushed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn sidecar_drops_oversized_and_overflow_records() {
        let queue = Arc::new(InMemoryMessageQueue::new("/traces-test", 1, 200_000));

        struct SharedQueue(Arc<InMemoryMessageQueue>);
        impl MessageQueue for SharedQueue {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn put(
                &self,
                message: &[u8],
                timeout: Option<Duration>,
            ) -> Result<(), MessageQueueError> {
                self.0.put(message, timeout)
            }
            fn get(&self, timeout: Option<Duration>) -> Result<Vec<u8>, MessageQueueError> {
                self.0.get(timeout)
            }
        }

        let flush = SidecarFlush {
            queue: Box::new(SharedQueue(queue.clone())),
        };

        // the first record fills the queue's single slot; the second
        // overflows and must be dropped without failing the caller
        flush.flush(vec![record(1), record(2)]);
        assert_eq!(queue.len(), 1);

        // a record serializing past the sidecar message limit is dropped
        // before it reaches the queue
        let mut big = Record::builder();
        big.trace_id(TraceId::from(1)).name("test").id(SpanId::from(3));
        big.binary_annotation(girder_types::BinaryAnnotation::new(
            "payload",
            girder_types::AnnotationValue::from("x".repeat(MAX_SIDECAR_MESSAGE_SIZE)),
            girder_types::Endpoint::new("svc", "10.0.0.1"),
        ));
        queue.get(Some(Duration::from_secs(0))).unwrap();
        flush.flush(vec![big.build()]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn sidecar_round_trips_records() {
        let queue = Arc::new(InMemoryMessageQueue::new("/traces-test", 10, 8192));

        struct SharedQueue(Arc<InMemoryMessageQueue>);
        impl MessageQueue for SharedQueue {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn put(
                &self,
                message: &[u8],
                timeout: Option<Duration>,
            ) -> Result<(), MessageQueueError> {
                self.0.put(message, timeout)
            }
            fn get(&self, timeout: Option<Duration>) -> Result<Vec<u8>, MessageQueueError> {
                self.0.get(timeout)
            }
        }

        let flush = SidecarFlush {
            queue: Box::new(SharedQueue(queue.clone())),
        };
        let original = record(7);
        flush.flush(vec![original.clone()]);

        let message = queue.get(Some(Duration::from_secs(0))).unwrap();
        let parsed: Record = serde_json::from_slice(&message).unwrap();
        assert_eq!(parsed, original);
    }
}
