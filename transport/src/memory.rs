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

//! In-memory transport
//!
//! Sockets built on [`tokio::io::duplex`] pipes. Every socket carries a
//! [`SocketProbe`] that counts the transport calls made through it and can
//! inject write or shutdown failures. Listeners and dialers built by
//! [`network`] count their accept and connect calls the same way.

use crate::{Dialer, Listener, RawSocket, RawWrite};
use async_trait::async_trait;
use bytes::Bytes;
use pin_project_lite::pin_project;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

static NEXT_PORT: AtomicU16 = AtomicU16::new(1);

fn next_addr() -> SocketAddr {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Call accounting and failure injection for one in-memory endpoint
#[derive(Debug, Default)]
pub struct SocketProbe {
    reads: AtomicU64,
    batches: AtomicU64,
    chunks: AtomicU64,
    bytes_written: AtomicU64,
    shutdowns: AtomicU64,
    accepts: AtomicU64,
    connects: AtomicU64,
    fail_writes: AtomicBool,
    fail_shutdown: AtomicBool,
}

impl SocketProbe {
    /// Create a new probe
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of read polls issued against the socket
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write_batch` calls
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of chunks across all batches
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Number of bytes handed to the pipe
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls
    pub fn shutdowns(&self) -> u64 {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Number of `accept` calls (listener probes only)
    pub fn accepts(&self) -> u64 {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls (dialer probes only)
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Total transport interactions of a socket
    pub fn interactions(&self) -> u64 {
        self.reads() + self.batches() + self.shutdowns()
    }

    /// Make every subsequent `write_batch` fail with `BrokenPipe`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `shutdown` fail with `BrokenPipe`
    pub fn fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }
}

/// One end of an in-memory socket pair
#[derive(Debug)]
pub struct MemorySocket {
    stream: DuplexStream,
    probe: Arc<SocketProbe>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl MemorySocket {
    /// Create a connected pair of sockets, each with its own probe
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        let (addr_a, addr_b) = (next_addr(), next_addr());
        (
            Self {
                stream: a,
                probe: SocketProbe::new(),
                local_addr: addr_a,
                peer_addr: addr_b,
            },
            Self {
                stream: b,
                probe: SocketProbe::new(),
                local_addr: addr_b,
                peer_addr: addr_a,
            },
        )
    }

    /// Probe attached to this end
    pub fn probe(&self) -> Arc<SocketProbe> {
        self.probe.clone()
    }
}

impl RawSocket for MemorySocket {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn into_split(self) -> (MemoryReader, MemoryWriter) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            MemoryReader {
                inner: reader,
                probe: self.probe.clone(),
            },
            MemoryWriter {
                inner: writer,
                probe: self.probe,
            },
        )
    }
}

pin_project! {
    /// Read half of a [`MemorySocket`]
    #[derive(Debug)]
    pub struct MemoryReader {
        #[pin]
        inner: ReadHalf<DuplexStream>,
        probe: Arc<SocketProbe>,
    }
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        this.probe.reads.fetch_add(1, Ordering::SeqCst);
        this.inner.poll_read(cx, buf)
    }
}

/// Write half of a [`MemorySocket`]
#[derive(Debug)]
pub struct MemoryWriter {
    inner: WriteHalf<DuplexStream>,
    probe: Arc<SocketProbe>,
}

#[async_trait]
impl RawWrite for MemoryWriter {
    async fn write_batch(&mut self, chunks: &[Bytes]) -> io::Result<()> {
        self.probe.batches.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_writes.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        for chunk in chunks {
            self.inner.write_all(chunk).await?;
            self.probe.chunks.fetch_add(1, Ordering::SeqCst);
            self.probe
                .bytes_written
                .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        }
        trace!(chunks = chunks.len(), "Memory batch written");
        self.inner.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_shutdown.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// Create an in-memory network: a listener and a dialer connected to it
///
/// Every `connect` on the dialer creates a socket pair, returns one end and
/// queues the other for the listener.
pub fn network(capacity: usize) -> (MemoryListener, MemoryDialer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = next_addr();
    let listener = MemoryListener {
        incoming: rx,
        local_addr: addr,
        probe: SocketProbe::new(),
    };
    let dialer = MemoryDialer {
        outgoing: tx,
        capacity,
        probe: SocketProbe::new(),
        last_socket: Arc::new(Mutex::new(None)),
    };
    (listener, dialer)
}

/// Listening end of an in-memory network
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemorySocket>,
    local_addr: SocketAddr,
    probe: Arc<SocketProbe>,
}

impl MemoryListener {
    /// Probe counting `accept` calls
    pub fn probe(&self) -> Arc<SocketProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    type Socket = MemorySocket;

    async fn accept(&mut self) -> io::Result<(MemorySocket, SocketAddr)> {
        self.probe.accepts.fetch_add(1, Ordering::SeqCst);
        match self.incoming.recv().await {
            Some(socket) => {
                let peer_addr = socket.peer_addr;
                Ok((socket, peer_addr))
            }
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Connecting end of an in-memory network
#[derive(Debug, Clone)]
pub struct MemoryDialer {
    outgoing: mpsc::UnboundedSender<MemorySocket>,
    capacity: usize,
    probe: Arc<SocketProbe>,
    last_socket: Arc<Mutex<Option<Arc<SocketProbe>>>>,
}

impl MemoryDialer {
    /// Probe counting `connect` calls
    pub fn probe(&self) -> Arc<SocketProbe> {
        self.probe.clone()
    }

    /// Probe of the server-side end of the most recent connection
    pub async fn last_peer_probe(&self) -> Option<Arc<SocketProbe>> {
        self.last_socket.lock().await.clone()
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Socket = MemorySocket;

    async fn connect(&self, _addr: SocketAddr) -> io::Result<MemorySocket> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = MemorySocket::pair(self.capacity);
        *self.last_socket.lock().await = Some(server.probe());
        self.outgoing
            .send(server)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_pair_batch_and_probe() {
        let (a, b) = MemorySocket::pair(1024);
        let probe = a.probe();
        let (_ra, mut wa) = a.into_split();
        let (mut rb, _wb) = b.into_split();

        wa.write_batch(&[Bytes::from_static(b"A"), Bytes::from_static(b"B")])
            .await
            .unwrap();
        assert_eq!(probe.batches(), 1);
        assert_eq!(probe.chunks(), 2);
        assert_eq!(probe.bytes_written(), 2);

        let mut buf = [0u8; 2];
        rb.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AB");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let (a, _b) = MemorySocket::pair(1024);
        let probe = a.probe();
        let (_ra, mut wa) = a.into_split();

        probe.fail_writes(true);
        let err = wa
            .write_batch(&[Bytes::from_static(b"A")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(probe.chunks(), 0);

        probe.fail_shutdown(true);
        assert!(wa.shutdown().await.is_err());
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_signals_eof() {
        let (a, b) = MemorySocket::pair(1024);
        let (_ra, mut wa) = a.into_split();
        let (mut rb, _wb) = b.into_split();

        wa.shutdown().await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(rb.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_network_accept_connect() {
        let (mut listener, dialer) = network(1024);
        let addr = listener.local_addr().unwrap();

        let client = dialer.connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();

        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(server.peer_addr().unwrap(), client.local_addr().unwrap());
        assert_eq!(dialer.probe().connects(), 1);
        assert_eq!(listener.probe().accepts(), 1);
        assert!(dialer.last_peer_probe().await.is_some());
    }

    #[tokio::test]
    async fn test_dialer_refused_without_listener() {
        let (listener, dialer) = network(1024);
        drop(listener);
        let err = dialer.connect(next_addr()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
