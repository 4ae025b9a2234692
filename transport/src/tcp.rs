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

//! Tokio TCP adapter

use crate::{Dialer, Listener, RawSocket, RawWrite};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

impl RawSocket for TcpStream {
    type Reader = OwnedReadHalf;
    type Writer = TcpWriter;

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = TcpStream::into_split(self);
        (reader, TcpWriter { inner: writer })
    }
}

/// Write half of a TCP socket
///
/// Batches are written with vectored I/O so that one flush maps onto as few
/// system calls as the kernel allows.
#[derive(Debug)]
pub struct TcpWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl RawWrite for TcpWriter {
    async fn write_batch(&mut self, chunks: &[Bytes]) -> io::Result<()> {
        let mut slices: Vec<IoSlice<'_>> = chunks
            .iter()
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| IoSlice::new(chunk))
            .collect();
        let mut remaining = &mut slices[..];
        while !remaining.is_empty() {
            let written = self.inner.write_vectored(remaining).await?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            trace!(written, "Vectored write");
            IoSlice::advance_slices(&mut remaining, written);
        }
        self.inner.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// TCP listener adapter
#[derive(Debug)]
pub struct TcpListenerAdapter {
    inner: TcpListener,
    nodelay: bool,
}

impl TcpListenerAdapter {
    /// Bind a new listener to the given address
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        debug!(local_addr = ?inner.local_addr(), "TCP listener bound");
        Ok(Self {
            inner,
            nodelay: false,
        })
    }

    /// Set `TCP_NODELAY` on every accepted socket
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Listener for TcpListenerAdapter {
    type Socket = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (socket, peer_addr) = self.inner.accept().await?;
        if self.nodelay {
            socket.set_nodelay(true)?;
        }
        Ok((socket, peer_addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// TCP dialer
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    /// Create a new dialer
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on every connected socket
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Socket = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = TcpStream::connect(addr).await?;
        if self.nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(socket)
    }
}
