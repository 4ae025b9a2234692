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

//! Transport traits

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncRead;

/// Type-erased read half of a socket
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Type-erased write half of a socket
pub type BoxedWrite = Box<dyn RawWrite>;

/// Write half of a raw socket
///
/// A batch is transmitted as one unit: the call returns `Ok(())` only once every
/// chunk has been handed to the operating system.
#[async_trait]
pub trait RawWrite: Send + 'static {
    /// Write an ordered batch of chunks
    async fn write_batch(&mut self, chunks: &[Bytes]) -> io::Result<()>;

    /// Shut down the outbound direction of the socket
    async fn shutdown(&mut self) -> io::Result<()>;
}

#[async_trait]
impl RawWrite for Box<dyn RawWrite> {
    async fn write_batch(&mut self, chunks: &[Bytes]) -> io::Result<()> {
        (**self).write_batch(chunks).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown().await
    }
}

/// A connected duplex byte channel
pub trait RawSocket: Send + 'static {
    /// Lazy inbound byte sequence. Finite on transport close, not restartable.
    type Reader: AsyncRead + Send + Unpin + 'static;
    /// Outbound batch writer
    type Writer: RawWrite;

    /// Address of the remote peer
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Address of the local end
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Split the socket into its read and write halves
    fn into_split(self) -> (Self::Reader, Self::Writer);

    /// Split the socket into type-erased halves
    fn into_boxed_split(self) -> (BoxedRead, BoxedWrite)
    where
        Self: Sized,
    {
        let (reader, writer) = self.into_split();
        (Box::new(reader), Box::new(writer))
    }
}

/// Source of inbound sockets
#[async_trait]
pub trait Listener: Send + 'static {
    /// Socket type produced by this listener
    type Socket: RawSocket;

    /// Wait for the next inbound socket
    async fn accept(&mut self) -> io::Result<(Self::Socket, SocketAddr)>;

    /// Address this listener is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Establishes outbound sockets
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Socket type produced by this dialer
    type Socket: RawSocket;

    /// Connect to the given remote address
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Socket>;
}
