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

//! # Reactive TCP Client
//!
//! Opens TCP connections on demand. [`TcpClient::connect`] returns a
//! [`Connector`](reactcp_service::Connector) that dials once per unit of
//! requested credit; [`TcpClient::connect_one`] is the common single-shot
//! case.
//!
//! ```no_run
//! use reactcp_client::{ClientConfig, TcpClient};
//! use bytes::Bytes;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TcpClient::raw(ClientConfig::default());
//!     let connection = client.connect_one("127.0.0.1:4000".parse()?).await?;
//!
//!     let hello = connection.write(Bytes::from_static(b"hello ")).subscribe();
//!     let world = connection.write(Bytes::from_static(b"world\n")).subscribe();
//!     connection.flush().await?;
//!     hello.await?;
//!     world.await?;
//!
//!     let mut content = connection.content();
//!     if let Some(reply) = content.next().await {
//!         println!("{:?}", reply?);
//!     }
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;

pub use client::TcpClient;
pub use config::ClientConfig;
