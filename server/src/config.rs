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

//! Server configuration

use reactcp_service::ConnectionConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Server configuration
///
/// # Example
///
/// ```
/// use reactcp_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_max_connections(500)
///     .with_shutdown_timeout(Duration::from_secs(5))
///     .with_nodelay(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to. Port 0 picks an ephemeral port.
    pub bind_address: SocketAddr,

    /// Maximum number of connections dispatched to handlers at once
    ///
    /// This is the initial accept credit. Each finished handler returns one
    /// credit, so the listener is not polled while this many handlers run.
    pub max_connections: usize,

    /// How long callers of [`TcpServer::drain`](crate::TcpServer::drain)
    /// should wait for handlers by default
    pub shutdown_timeout: Duration,

    /// Set `TCP_NODELAY` on accepted sockets
    pub nodelay: bool,

    /// Pause after a failed accept
    pub accept_backoff: Duration,

    /// Configuration applied to every accepted connection
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(30),
            nodelay: false,
            accept_backoff: Duration::from_millis(100),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the maximum number of concurrently dispatched connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Set the accept backoff
    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// Set the per-connection configuration
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than 0".to_string());
        }

        self.connection.validate()
    }
}
