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

//! Line Echo Server Example
//!
//! Accepts connections on port 4000, frames them as newline-delimited text
//! and echoes every line back. Sending `quit` ends the session.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Connect with netcat or the `simple_client` example:
//! ```bash
//! nc localhost 4000
//! ```

use futures::StreamExt;
use reactcp_server::{ServerConfig, TcpServer, handler_fn};
use reactcp_service::{Connection, ConnectionConfig};
use std::time::Duration;
use tokio_util::codec::LinesCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::new("127.0.0.1:4000".parse()?)
        .with_max_connections(100)
        .with_shutdown_timeout(Duration::from_secs(5))
        .with_nodelay(true)
        .with_connection(ConnectionConfig::default().with_prefetch(8));
    let server: TcpServer<LinesCodec, String, String> =
        TcpServer::new(config, LinesCodec::new_with_max_length(4096));

    server
        .start(handler_fn(|connection: Connection<String, String>| async move {
            tracing::info!(
                connection_id = %connection.id(),
                peer = %connection.peer_addr(),
                "Client connected"
            );
            connection
                .write_and_flush("Welcome! Type 'quit' to leave.".to_string())
                .await?;

            let mut lines = connection.content();
            while let Some(line) = lines.next().await {
                let line = line?;
                if line.trim().eq_ignore_ascii_case("quit") {
                    connection.write_and_flush("Goodbye!".to_string()).await?;
                    break;
                }
                connection.write_and_flush(format!("Echo: {line}")).await?;
            }

            tracing::info!(connection_id = %connection.id(), "Client disconnected");
            Ok(())
        }))
        .await?;
    if let Some(addr) = server.local_addr() {
        println!("Listening on {addr}");
    }
    println!("Press Ctrl+C to stop the server");

    tokio::signal::ctrl_c().await?;
    println!("Shutting down server...");
    server.shutdown().await?;

    let drained = server.drain(server.config().shutdown_timeout).await;
    if !drained {
        server.cancel_handlers();
    }
    println!("{}", server.snapshot());

    Ok(())
}
