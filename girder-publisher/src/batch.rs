//! Byte- and age-bounded batch accumulators.
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};

/// A batch ready for publishing.
pub struct SerializedBatch {
    /// The number of records in the batch.
    pub item_count: usize,
    /// The records framed as a JSON array.
    pub serialized: Vec<u8>,
}

/// Returned when adding another item would exceed a batch's size or age
/// budget; the current batch should be published and reset.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchFull;

impl fmt::Display for BatchFull {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("batch is full")
    }
}

impl Error for BatchFull {}

/// Accumulates pre-serialized JSON records up to a byte budget.
///
/// Each item costs its own length plus one byte for the separating comma;
/// serialization frames the items as a JSON array without re-parsing
/// them.
pub struct RawJsonBatch {
    max_size: usize,
    items: Vec<Vec<u8>>,
    size: usize,
}

impl RawJsonBatch {
    /// Creates an empty batch bounded to `max_size` serialized bytes.
    pub fn new(max_size: usize) -> RawJsonBatch {
        RawJsonBatch {
            max_size,
            items: vec![],
            size: 2,
        }
    }

    /// Adds an item to the batch. Empty or absent items are ignored.
    pub fn add(&mut self, item: Option<&[u8]>) -> Result<(), BatchFull> {
        let item = match item {
            Some(item) if !item.is_empty() => item,
            _ => return Ok(()),
        };

        let serialized_size = item.len() + 1;
        if self.size + serialized_size > self.max_size {
            return Err(BatchFull);
        }

        self.items.push(item.to_vec());
        self.size += serialized_size;
        Ok(())
    }

    /// Frames the accumulated items as a JSON array.
    pub fn serialize(&self) -> SerializedBatch {
        SerializedBatch {
            item_count: self.items.len(),
            serialized: {
                let mut body = Vec::with_capacity(self.size);
                body.push(b'[');
                for (i, item) in self.items.iter().enumerate() {
                    if i > 0 {
                        body.push(b',');
                    }
                    body.extend_from_slice(item);
                }
                body.push(b']');
                body
            },
        }
    }

    /// Empties the batch.
    pub fn reset(&mut self) {
        self.items.clear();
        self.size = 2;
    }
}

/// Wraps a batch with an age budget, measured from the first `add` after
/// a reset.
pub struct TimeLimitedBatch {
    batch: RawJsonBatch,
    batch_start: Option<Instant>,
    max_age: Duration,
}

impl TimeLimitedBatch {
    /// Wraps `batch`, limiting its age to `max_age`.
    pub fn new(batch: RawJsonBatch, max_age: Duration) -> TimeLimitedBatch {
        TimeLimitedBatch {
            batch,
            batch_start: None,
            max_age,
        }
    }

    /// Returns how long ago the batch's clock started.
    pub fn age(&self) -> Duration {
        self.batch_start
            .map(|start| start.elapsed())
            .unwrap_or(Duration::from_secs(0))
    }

    /// Adds an item to the batch, failing when the batch has aged out
    /// regardless of the item.
    pub fn add(&mut self, item: Option<&[u8]>) -> Result<(), BatchFull> {
        if self.batch_start.is_some() && self.age() >= self.max_age {
            return Err(BatchFull);
        }

        self.batch.add(item)?;

        if self.batch_start.is_none() {
            self.batch_start = Some(Instant::now());
        }
        Ok(())
    }

    /// Frames the accumulated items as a JSON array.
    pub fn serialize(&self) -> SerializedBatch {
        self.batch.serialize()
    }

    /// Empties the batch and stops its clock.
    pub fn reset(&mut self) {
        self.batch.reset();
        self.batch_start = None;
    }
}
