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

//! Per-connection writer task
//!
//! The writer owns the outbound half of the transport. Commands arrive over
//! an unbounded channel in the order they were issued under the connection
//! lock, so batches reach the transport in capture order.

use crate::queue::Batch;
use crate::{ConnectionError, ConnectionId, Result};
use metrics::counter;
use reactcp_transport::{BoxedWrite, RawWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Commands accepted by the writer task
#[derive(Debug)]
pub(crate) enum WriterCommand {
    /// Write one captured batch
    Transmit {
        batch: Batch,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Shut the transport down and stop
    Shutdown { reply: oneshot::Sender<Result<()>> },
}

type FailureHook = Box<dyn Fn(ConnectionError) + Send + Sync>;

/// Writer actor for a single connection
pub(crate) struct ConnectionWriter {
    id: ConnectionId,
    writer: BoxedWrite,
    commands: mpsc::UnboundedReceiver<WriterCommand>,
    on_failure: FailureHook,
    failed: bool,
}

impl ConnectionWriter {
    pub(crate) fn new(
        id: ConnectionId,
        writer: BoxedWrite,
        commands: mpsc::UnboundedReceiver<WriterCommand>,
        on_failure: FailureHook,
    ) -> Self {
        Self {
            id,
            writer,
            commands,
            on_failure,
            failed: false,
        }
    }

    /// Process commands until shutdown or until every sender is gone
    pub(crate) async fn run(mut self) {
        debug!(connection_id = %self.id, "Writer started");
        while let Some(command) = self.commands.recv().await {
            match command {
                WriterCommand::Transmit { batch, reply } => {
                    let result = self.transmit(&batch).await;
                    batch.resolve(&result);
                    let _ = reply.send(result);
                }
                WriterCommand::Shutdown { reply } => {
                    let result = self.writer.shutdown().await.map_err(ConnectionError::from);
                    if let Err(err) = &result {
                        debug!(connection_id = %self.id, error = %err, "Transport shutdown failed");
                    }
                    let _ = reply.send(result);
                    break;
                }
            }
        }
        debug!(connection_id = %self.id, "Writer stopped");
    }

    async fn transmit(&mut self, batch: &Batch) -> Result<()> {
        if self.failed {
            return Err(ConnectionError::ConnectionClosed);
        }
        let chunks = batch.chunks();
        let bytes = batch.byte_len();
        trace!(connection_id = %self.id, writes = chunks.len(), bytes, "Transmitting batch");
        match self.writer.write_batch(&chunks).await {
            Ok(()) => {
                counter!("reactcp.writes.flushed").increment(chunks.len() as u64);
                counter!("reactcp.bytes.sent").increment(bytes as u64);
                Ok(())
            }
            Err(err) => {
                let err = ConnectionError::from(err);
                error!(connection_id = %self.id, error = %err, "Batch transmission failed");
                counter!("reactcp.flushes.failed").increment(1);
                self.failed = true;
                (self.on_failure)(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WriteQueue;
    use bytes::Bytes;
    use reactcp_transport::{MemorySocket, RawSocket};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    fn spawn_writer(
        socket: MemorySocket,
        failures: Arc<AtomicUsize>,
    ) -> (mpsc::UnboundedSender<WriterCommand>, tokio::task::JoinHandle<()>) {
        let (_reader, writer) = socket.into_boxed_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let hook: FailureHook = Box::new(move |_| {
            failures.fetch_add(1, Ordering::SeqCst);
        });
        let handle = tokio::spawn(ConnectionWriter::new(ConnectionId::new(1), writer, rx, hook).run());
        (tx, handle)
    }

    #[tokio::test]
    async fn test_transmit_and_shutdown() {
        let (local, remote) = MemorySocket::pair(1024);
        let (mut remote, _remote_writer) = remote.into_split();
        let probe = local.probe();
        let (tx, handle) = spawn_writer(local, Arc::new(AtomicUsize::new(0)));

        let mut queue = WriteQueue::new();
        let a = queue.enqueue(Bytes::from_static(b"A"));
        let b = queue.enqueue(Bytes::from_static(b"B"));
        let (reply, flushed) = oneshot::channel();
        tx.send(WriterCommand::Transmit { batch: queue.capture(), reply }).unwrap();
        flushed.await.unwrap().unwrap();
        a.await.unwrap();
        b.await.unwrap();

        let (reply, closed) = oneshot::channel();
        tx.send(WriterCommand::Shutdown { reply }).unwrap();
        closed.await.unwrap().unwrap();
        handle.await.unwrap();

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"AB");
        assert_eq!(probe.batches(), 1);
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_failure_poisons_later_batches() {
        let (local, _remote) = MemorySocket::pair(1024);
        let probe = local.probe();
        probe.fail_writes(true);
        let failures = Arc::new(AtomicUsize::new(0));
        let (tx, _handle) = spawn_writer(local, failures.clone());

        let mut queue = WriteQueue::new();
        let first = queue.enqueue(Bytes::from_static(b"1"));
        let (reply, flushed) = oneshot::channel();
        tx.send(WriterCommand::Transmit { batch: queue.capture(), reply }).unwrap();
        assert!(flushed.await.unwrap().unwrap_err().is_transport_failure());
        assert!(first.await.is_err());

        probe.fail_writes(false);
        let second = queue.enqueue(Bytes::from_static(b"2"));
        let (reply, flushed) = oneshot::channel();
        tx.send(WriterCommand::Transmit { batch: queue.capture(), reply }).unwrap();
        assert!(matches!(flushed.await.unwrap(), Err(ConnectionError::ConnectionClosed)));
        assert!(matches!(second.await, Err(ConnectionError::ConnectionClosed)));

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(probe.batches(), 1);
    }
}
