//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Pending write queue
//!
//! Writes accumulate here between flushes. A flush captures the whole queue at
//! once and the captured [`Batch`] is resolved as a unit.

use crate::action::Completion;
use crate::{ConnectionError, Result};
use bytes::Bytes;
use std::mem;
use tokio::sync::oneshot;

/// One encoded item waiting for a flush
#[derive(Debug)]
pub struct PendingWrite {
    payload: Bytes,
    done: oneshot::Sender<Result<()>>,
}

impl PendingWrite {
    /// Encoded bytes of this write
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn resolve(self, result: Result<()>) {
        let _ = self.done.send(result);
    }
}

/// Ordered writes accumulated since the last capture
///
/// Not synchronized on its own; the owning connection guards it with its lock.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: Vec<PendingWrite>,
    pending_bytes: usize,
}

impl WriteQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write and return the completion that its flush will resolve
    pub fn enqueue(&mut self, payload: Bytes) -> Completion {
        let (done, receiver) = oneshot::channel();
        self.pending_bytes += payload.len();
        self.pending.push(PendingWrite { payload, done });
        Completion::from_receiver(receiver)
    }

    /// Take every queued write, leaving the queue empty
    pub fn capture(&mut self) -> Batch {
        self.pending_bytes = 0;
        Batch {
            writes: mem::take(&mut self.pending),
        }
    }

    /// Fail everything still queued, returning how many writes were failed
    pub fn fail_all(&mut self, error: ConnectionError) -> usize {
        let batch = self.capture();
        let count = batch.len();
        batch.resolve(&Err(error));
        count
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total payload bytes queued
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }
}

/// Writes captured by one flush
#[derive(Debug, Default)]
pub struct Batch {
    writes: Vec<PendingWrite>,
}

impl Batch {
    /// Number of writes in the batch
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Check whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Payloads in enqueue order
    pub fn chunks(&self) -> Vec<Bytes> {
        self.writes.iter().map(|w| w.payload.clone()).collect()
    }

    /// Total payload bytes
    pub fn byte_len(&self) -> usize {
        self.writes.iter().map(|w| w.payload.len()).sum()
    }

    /// Resolve every member write with the same outcome
    pub fn resolve(self, result: &Result<()>) {
        for write in self.writes {
            write.resolve(result.clone());
        }
    }
}
