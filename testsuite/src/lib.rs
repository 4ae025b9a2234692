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

//! Shared fixtures for the end-to-end suite

use futures::StreamExt;
use reactcp_client::{ClientConfig, TcpClient};
use reactcp_server::{ServerConfig, TcpServer, handler_fn};
use reactcp_service::{Connection, ConnectionError, Result, Subscriber, Subscription};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodec;

/// Server framing connections as newline-delimited text
pub type LineServer = TcpServer<LinesCodec, String, String>;

/// Client framing connections as newline-delimited text
pub type LineClient = TcpClient<LinesCodec, String, String>;

/// Start a server on an ephemeral port that echoes every line back
pub async fn start_line_echo(config: ServerConfig) -> Result<LineServer> {
    let server = LineServer::new(config, LinesCodec::new());
    server
        .start(handler_fn(|connection: Connection<String, String>| async move {
            let mut lines = connection.content();
            while let Some(line) = lines.next().await {
                connection.write_and_flush(format!("echo {}", line?)).await?;
            }
            Ok::<(), ConnectionError>(())
        }))
        .await?;
    Ok(server)
}

/// Client for [`start_line_echo`] servers
pub fn line_client() -> LineClient {
    LineClient::new(
        ClientConfig::default().with_connect_timeout(Some(Duration::from_secs(5))),
        LinesCodec::new(),
    )
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Signal observed by a [`Collector`]
#[derive(Debug)]
pub enum Observed<T> {
    Next(T),
    Error(ConnectionError),
    Complete,
}

/// Subscriber that forwards every signal to a channel
///
/// Requests `initial` items on subscribe and exposes its subscription so
/// tests can request more or cancel.
pub struct Collector<T> {
    initial: u64,
    signals: mpsc::UnboundedSender<Observed<T>>,
    subscription: mpsc::UnboundedSender<Subscription>,
}

impl<T> Collector<T> {
    /// Create a collector along with its signal and subscription receivers
    pub fn new(
        initial: u64,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Observed<T>>,
        mpsc::UnboundedReceiver<Subscription>,
    ) {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (subscription, subscription_rx) = mpsc::unbounded_channel();
        let collector = Self {
            initial,
            signals,
            subscription,
        };
        (collector, signal_rx, subscription_rx)
    }
}

impl<T: Send + 'static> Subscriber<T> for Collector<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.initial > 0 {
            subscription.request(self.initial);
        }
        let _ = self.subscription.send(subscription);
    }

    fn on_next(&mut self, item: T) {
        let _ = self.signals.send(Observed::Next(item));
    }

    fn on_error(&mut self, error: ConnectionError) {
        let _ = self.signals.send(Observed::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.signals.send(Observed::Complete);
    }
}
