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

//! Server lifecycle types

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Lifecycle of a server binding
///
/// A server moves `Created` → `Running` → `Stopped` and never restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet listening
    Created,
    /// Accepting and dispatching connections
    Running,
    /// Shut down; the listener has been released
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a server
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Lifecycle state
    pub state: ServerState,
    /// Bound address, once started
    pub local_addr: Option<SocketAddr>,
    /// Handlers currently running
    pub active_handlers: usize,
    /// Connections accepted since start
    pub connections_accepted: u64,
    /// Time since the server was created
    pub uptime: Duration,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr {
            Some(addr) => write!(
                f,
                "TcpServer {{ state: {}, addr: {}, active: {}, accepted: {}, uptime: {:?} }}",
                self.state, addr, self.active_handlers, self.connections_accepted, self.uptime
            ),
            None => write!(
                f,
                "TcpServer {{ state: {}, active: {}, accepted: {}, uptime: {:?} }}",
                self.state, self.active_handlers, self.connections_accepted, self.uptime
            ),
        }
    }
}
