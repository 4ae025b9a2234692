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

//! Byte Transport Boundary
//!
//! This crate defines the seam between the reactcp connection engine and the
//! sockets it drives. The engine never touches OS primitives directly; it only
//! speaks to the traits defined here:
//!
//! - [`Listener`] accepts inbound sockets.
//! - [`Dialer`] establishes outbound sockets.
//! - [`RawSocket`] splits a socket into a lazy byte reader and a [`RawWrite`].
//! - [`RawWrite`] transmits ordered batches of byte chunks and shuts down.
//!
//! Two adapters are provided:
//!
//! - [`tcp`]: Tokio TCP sockets.
//! - [`memory`]: In-process duplex pipes with call accounting and failure
//!   injection, for deterministic tests.
//!
//! # Example
//!
//! ```no_run
//! use reactcp_transport::{Dialer, RawSocket, RawWrite, TcpDialer};
//! use bytes::Bytes;
//!
//! # async fn example() -> std::io::Result<()> {
//! let dialer = TcpDialer::new();
//! let socket = dialer.connect("127.0.0.1:4000".parse().unwrap()).await?;
//! let (_reader, mut writer) = RawSocket::into_split(socket);
//! writer.write_batch(&[Bytes::from_static(b"hello")]).await?;
//! writer.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
mod socket;
pub mod tcp;

pub use memory::{MemoryDialer, MemoryListener, MemorySocket, SocketProbe};
pub use socket::{BoxedRead, BoxedWrite, Dialer, Listener, RawSocket, RawWrite};
pub use tcp::{TcpDialer, TcpListenerAdapter, TcpWriter};
