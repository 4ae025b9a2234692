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

//! Lock-free dispatch metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All counters are atomics and can be updated from the accept loop and from
/// handler tasks without locks. Use [`snapshot`](Self::snapshot) for a
/// point-in-time view.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connections
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,

    // Handlers
    active_handlers: AtomicU64,
    handlers_completed: AtomicU64,
    handler_failures: AtomicU64,
    handlers_cancelled: AtomicU64,

    // Errors
    accept_errors: AtomicU64,

    // Timing (stored as nanoseconds)
    total_handler_duration_ns: AtomicU64,

    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            active_handlers: AtomicU64::new(0),
            handlers_completed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            handlers_cancelled: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            total_handler_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a connection delivered by the acceptor
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed without dispatch because the server stopped
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler being started
    pub fn handler_started(&self) {
        self.active_handlers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler returning successfully
    pub fn handler_completed(&self, duration: Duration) {
        self.handler_finished(duration);
        self.handlers_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler returning an error
    pub fn handler_failed(&self, duration: Duration) {
        self.handler_finished(duration);
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler cancelled by the server
    pub fn handler_cancelled(&self, duration: Duration) {
        self.handler_finished(duration);
        self.handlers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn handler_finished(&self, duration: Duration) {
        self.active_handlers.fetch_sub(1, Ordering::Relaxed);
        self.total_handler_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a failed accept
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of handlers currently running
    pub fn active_handlers(&self) -> u64 {
        self.active_handlers.load(Ordering::Relaxed)
    }

    /// Get the total number of accepted connections
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics
    ///
    /// Counters are read one at a time, so a snapshot taken while handlers
    /// finish may be off by one between fields.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_handlers: self.active_handlers.load(Ordering::Relaxed),
            handlers_completed: self.handlers_completed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handlers_cancelled: self.handlers_cancelled.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_handler_duration: self.average_handler_duration(),
        }
    }

    fn average_handler_duration(&self) -> Duration {
        let finished = self.handlers_completed.load(Ordering::Relaxed)
            + self.handler_failures.load(Ordering::Relaxed)
            + self.handlers_cancelled.load(Ordering::Relaxed);
        if finished == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_handler_duration_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / finished)
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Connections delivered by the acceptor
    pub connections_accepted: u64,
    /// Connections closed without dispatch
    pub connections_rejected: u64,
    /// Handlers currently running
    pub active_handlers: u64,
    /// Handlers that returned `Ok`
    pub handlers_completed: u64,
    /// Handlers that returned an error
    pub handler_failures: u64,
    /// Handlers cancelled by the server
    pub handlers_cancelled: u64,
    /// Failed accept calls
    pub accept_errors: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
    /// Mean time from dispatch to handler exit
    pub avg_handler_duration: Duration,
}

impl MetricsSnapshot {
    /// Accepted connections per second
    pub fn accept_rate(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.connections_accepted as f64 / self.uptime.as_secs_f64()
    }

    /// Handlers that have exited for any reason
    pub fn handlers_finished(&self) -> u64 {
        self.handlers_completed + self.handler_failures + self.handlers_cancelled
    }
}
