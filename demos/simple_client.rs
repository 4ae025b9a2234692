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

//! Simple Line Client Example
//!
//! Connects to a line-oriented server, prints every line it sends and
//! forwards each line typed on stdin. Pairs with the `echo_server` example.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example simple_client -- 127.0.0.1:4000
//! ```

use futures::StreamExt;
use reactcp_client::{ClientConfig, TcpClient};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::codec::LinesCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string())
        .parse()?;

    let config = ClientConfig::default()
        .with_connect_timeout(Some(Duration::from_secs(5)))
        .with_nodelay(true);
    let client: TcpClient<LinesCodec, String, String> =
        TcpClient::new(config, LinesCodec::new_with_max_length(4096));

    println!("Connecting to {addr}");
    let connection = client.connect_one(addr).await?;
    println!("Connected as {}. Press Ctrl+D to quit.", connection.id());

    let mut lines = connection.content();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            received = lines.next() => match received {
                Some(Ok(line)) => println!("< {line}"),
                Some(Err(err)) => {
                    eprintln!("Connection failed: {err}");
                    break;
                }
                None => {
                    println!("Server closed the connection");
                    break;
                }
            },
            typed = stdin.next_line() => match typed? {
                Some(line) => connection.write_and_flush(line).await?,
                None => break,
            },
        }
    }

    drop(lines);
    connection.close().await?;
    println!("Disconnected");
    Ok(())
}
