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

//! TCP client

use crate::ClientConfig;
use bytes::{Bytes, BytesMut};
use reactcp_service::{Connection, ConnectionCodec, ConnectionError, Connector, Result};
use reactcp_transport::TcpDialer;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::codec::BytesCodec;
use tracing::{debug, instrument};

/// TCP client
///
/// Hands out [`Connector`]s: demand-driven publishers that open one TCP
/// connection per unit of requested credit.
///
/// # Example
///
/// ```no_run
/// use reactcp_client::{ClientConfig, TcpClient};
/// use bytes::Bytes;
///
/// # async fn example() -> reactcp_service::Result<()> {
/// let client = TcpClient::raw(ClientConfig::default().with_nodelay(true));
/// let connection = client.connect_one("127.0.0.1:4000".parse().unwrap()).await?;
/// connection.write_and_flush(Bytes::from_static(b"ping\n")).await?;
/// connection.close().await
/// # }
/// ```
pub struct TcpClient<C = BytesCodec, R = BytesMut, W = Bytes> {
    config: ClientConfig,
    codec: C,
    dialer: Arc<TcpDialer>,
    _marker: PhantomData<fn() -> (R, W)>,
}

impl TcpClient {
    /// Create a client exchanging raw bytes
    pub fn raw(config: ClientConfig) -> Self {
        Self::new(config, BytesCodec::new())
    }
}

impl<C, R, W> TcpClient<C, R, W>
where
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    /// Create a client framing every connection with `codec`
    pub fn new(config: ClientConfig, codec: C) -> Self {
        let dialer = Arc::new(TcpDialer::new().with_nodelay(config.nodelay));
        Self {
            config,
            codec,
            dialer,
            _marker: PhantomData,
        }
    }

    /// Publisher of connections to `addr`
    ///
    /// Nothing is dialed until a subscriber requests credit.
    pub fn connect(&self, addr: SocketAddr) -> Connector<TcpDialer, C, R, W> {
        Connector::new(
            self.dialer.clone(),
            addr,
            self.codec.clone(),
            self.config.connection.clone(),
        )
        .with_connect_timeout(self.config.connect_timeout)
    }

    /// Open a single connection to `addr`
    #[instrument(skip(self))]
    pub async fn connect_one(&self, addr: SocketAddr) -> Result<Connection<R, W>> {
        self.config
            .validate()
            .map_err(ConnectionError::IllegalState)?;
        let connection = self.connect(addr).connect_one().await?;
        debug!(connection_id = %connection.id(), "Client connection established");
        Ok(connection)
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl<C, R, W> fmt::Debug for TcpClient<C, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("config", &self.config)
            .finish()
    }
}
