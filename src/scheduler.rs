//! Write scheduler (RFC 9218 urgency buckets)
//!
//! Ready streams sit in one of eight FIFO buckets keyed by urgency. The
//! scheduler always serves the head of the most urgent non-empty bucket.
//! An incremental stream is moved to the back of its bucket after each
//! quantum; a non-incremental one keeps the head until it stops being ready.
//!
//! Priority updates are not pushed into the scheduler. Instead each
//! selection re-reads the current priority and moves the stream if its
//! urgency changed since it was queued.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::types::{Priority, StreamId};

const BUCKETS: usize = Priority::MAX_URGENCY as usize + 1;

/// Urgency-bucketed round-robin scheduler
#[derive(Debug, Default)]
pub struct Scheduler {
    buckets: [VecDeque<StreamId>; BUCKETS],
    /// Bucket each queued stream currently sits in
    queued: HashMap<StreamId, u8>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stream is queued
    pub fn is_scheduled(&self, id: StreamId) -> bool {
        self.queued.contains_key(&id)
    }

    /// Number of queued streams
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Queue a stream at the back of its bucket; no-op if already queued
    pub fn schedule(&mut self, id: StreamId, priority: Priority) {
        if self.queued.contains_key(&id) {
            return;
        }
        let urgency = priority.urgency.min(Priority::MAX_URGENCY);
        self.buckets[urgency as usize].push_back(id);
        self.queued.insert(id, urgency);
        trace!(stream_id = id, urgency, "stream scheduled");
    }

    /// Remove a stream
    pub fn unschedule(&mut self, id: StreamId) {
        if let Some(urgency) = self.queued.remove(&id) {
            self.buckets[urgency as usize].retain(|&queued| queued != id);
        }
    }

    /// The stream to serve next
    ///
    /// `priority_of` reports the current priority of a queued stream; streams
    /// whose urgency moved are re-bucketed before the choice is made, and
    /// streams it no longer knows are dropped.
    pub fn next(&mut self, mut priority_of: impl FnMut(StreamId) -> Option<Priority>) -> Option<StreamId> {
        // Bucket order, then queue order, so moved streams keep their FIFO order
        let queued: Vec<(StreamId, u8)> = self
            .buckets
            .iter()
            .zip(0u8..)
            .flat_map(|(bucket, urgency)| bucket.iter().map(move |&id| (id, urgency)))
            .collect();
        for (id, queued_urgency) in queued {
            let Some(priority) = priority_of(id) else {
                self.unschedule(id);
                continue;
            };
            let urgency = priority.urgency.min(Priority::MAX_URGENCY);
            if urgency != queued_urgency {
                self.unschedule(id);
                self.schedule(id, priority);
                trace!(stream_id = id, urgency, "stream re-bucketed");
            }
        }

        self.buckets.iter().find_map(|bucket| bucket.front().copied())
    }

    /// Move a stream that just used a quantum to the back of its bucket
    pub fn rotate(&mut self, id: StreamId) {
        let Some(&urgency) = self.queued.get(&id) else {
            return;
        };
        let bucket = &mut self.buckets[urgency as usize];
        if let Some(pos) = bucket.iter().position(|&queued| queued == id) {
            bucket.remove(pos);
            bucket.push_back(id);
        }
    }
}
