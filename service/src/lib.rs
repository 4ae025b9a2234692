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

//! Reactive TCP Connections
//!
//! This crate layers a backpressure-controlled contract on top of the byte
//! transport defined in `reactcp-transport`:
//!
//! - Inbound content is published to exactly one subscriber, and only as far
//!   as that subscriber has requested.
//! - Writes are deferred. They queue up until a flush captures them and send
//!   them to the transport as one batch. Each write resolves with the flush that
//!   carried it.
//! - Every write-side operation returns a cold [`Action`]; nothing happens
//!   until it is subscribed or awaited.
//! - Closing is coalesced: any number of `close` subscriptions trigger one
//!   shutdown and observe one outcome.
//!
//! # Architecture
//!
//! ```text
//! ConnectionAcceptor / Connector
//!     ↓ (demand-driven)
//! Connection ── content ──> Subscriber
//!     ↓ write / flush
//! WriteQueue → ConnectionWriter → RawWrite
//! ```
//!
//! # Example
//!
//! ```no_run
//! use reactcp_service::{ConnectionConfig, RawConnection, Result};
//! use reactcp_transport::TcpDialer;
//! use reactcp_transport::Dialer;
//! use bytes::Bytes;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<()> {
//! let socket = TcpDialer::new().connect("127.0.0.1:4000".parse().unwrap()).await?;
//! let connection = RawConnection::raw(socket, ConnectionConfig::default())?;
//!
//! let hello = connection.write(Bytes::from_static(b"hello ")).subscribe();
//! let world = connection.write(Bytes::from_static(b"world")).subscribe();
//! connection.flush().await?;
//! hello.await?;
//! world.await?;
//!
//! let mut content = connection.content();
//! while let Some(chunk) = content.next().await {
//!     println!("received {} bytes", chunk?.len());
//! }
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

mod acceptor;
mod action;
mod config;
mod connection;
mod connector;
mod error;
pub mod flow;
mod queue;
mod types;
mod writer;

pub use acceptor::{ConnectionAcceptor, DEFAULT_ACCEPT_BACKOFF};
pub use action::{Action, Completion, SingleShot};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionCodec, RawConnection};
pub use connector::Connector;
pub use error::{ConnectionError, Result};
pub use flow::{Publisher, Subscriber, SubscriberStream, Subscription};
pub use queue::{Batch, PendingWrite, WriteQueue};
pub use types::{ConnectionId, ConnectionState};
