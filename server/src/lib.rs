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

//! Reactive TCP Server
//!
//! Accepts TCP connections under demand and dispatches each one to a
//! [`ConnectionHandler`] on its own task.
//!
//! ```text
//! TcpServer
//!     ↓ start
//! ConnectionAcceptor ──(credit: max_connections)──> Dispatcher
//!     ↓ one task per connection
//! ConnectionHandler::handle(Connection)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use reactcp_server::{ServerConfig, TcpServer, handler_fn};
//! use reactcp_service::RawConnection;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = TcpServer::raw(ServerConfig::new("127.0.0.1:4000".parse()?));
//!     server
//!         .start_and_await(handler_fn(|connection: RawConnection| async move {
//!             let mut content = connection.content();
//!             while let Some(chunk) = content.next().await {
//!                 connection.write_and_flush(chunk?.freeze()).await?;
//!             }
//!             connection.close().await
//!         }))
//!         .await?;
//!     Ok(())
//! }
//! ```

mod config;
mod handler;
mod metrics;
mod server;
mod types;

pub use config::ServerConfig;
pub use handler::{ConnectionHandler, HandlerFn, handler_fn};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use server::TcpServer;
pub use types::{ServerSnapshot, ServerState};
