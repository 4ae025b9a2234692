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

//! Connection configuration

/// Per-connection configuration
///
/// # Example
///
/// ```
/// use reactcp_service::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .with_read_buffer_capacity(16 * 1024)
///     .with_prefetch(32);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Initial capacity of the decode buffer on the read side
    pub read_buffer_capacity: usize,

    /// Items requested at a time by [`Connection::content`](crate::Connection::content)
    pub prefetch: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_capacity: 8192,
            prefetch: 16,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read buffer capacity
    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Set the default prefetch
    pub fn with_prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.read_buffer_capacity == 0 {
            return Err("read_buffer_capacity must be greater than 0".to_string());
        }

        if self.prefetch == 0 {
            return Err("prefetch must be greater than 0".to_string());
        }

        Ok(())
    }
}
