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

//! TCP server
//!
//! The [`TcpServer`] owns one listening binding. On `start` it binds the
//! configured address, subscribes a dispatcher to a [`ConnectionAcceptor`]
//! and hands every accepted connection to the user's [`ConnectionHandler`]
//! on its own task. The dispatcher requests `max_connections` accepts up
//! front and one more each time a handler finishes, so the listener is never
//! polled while the server is at capacity.

use crate::{ConnectionHandler, ServerConfig, ServerMetrics, ServerSnapshot, ServerState};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use reactcp_service::{
    Connection, ConnectionAcceptor, ConnectionCodec, ConnectionError, ConnectionId, Result,
    Subscriber, Subscription,
};
use reactcp_transport::TcpListenerAdapter;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::BytesCodec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reactive TCP server
///
/// # Example
///
/// ```no_run
/// use reactcp_server::{ServerConfig, TcpServer, handler_fn};
/// use reactcp_service::RawConnection;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = TcpServer::raw(ServerConfig::new("127.0.0.1:4000".parse()?));
///     server
///         .start(handler_fn(|connection: RawConnection| async move {
///             connection.ignore_content();
///             connection.close().await
///         }))
///         .await?;
///
///     // tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct TcpServer<C = BytesCodec, R = BytesMut, W = Bytes> {
    config: ServerConfig,
    codec: C,
    metrics: Arc<ServerMetrics>,
    state: watch::Sender<ServerState>,
    /// Held across start and shutdown so the two never interleave
    binding: tokio::sync::Mutex<Option<ServerBinding>>,
    port: AtomicU16,
    local_addr: Mutex<Option<SocketAddr>>,
    handlers: Arc<HandlerSet>,
    started_at: Instant,
    _marker: PhantomData<fn() -> (R, W)>,
}

/// The live listening endpoint of a running server
struct ServerBinding {
    subscription: Arc<OnceLock<Subscription>>,
    accept_task: JoinHandle<()>,
}

impl TcpServer {
    /// Create a server exchanging raw bytes
    pub fn raw(config: ServerConfig) -> Self {
        Self::new(config, BytesCodec::new())
    }
}

impl<C, R, W> TcpServer<C, R, W>
where
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    /// Create a server
    ///
    /// Nothing is bound until [`start`](Self::start).
    pub fn new(config: ServerConfig, codec: C) -> Self {
        let port = AtomicU16::new(config.bind_address.port());
        Self {
            config,
            codec,
            metrics: Arc::new(ServerMetrics::new()),
            state: watch::channel(ServerState::Created).0,
            binding: tokio::sync::Mutex::new(None),
            port,
            local_addr: Mutex::new(None),
            handlers: Arc::new(HandlerSet::new()),
            started_at: Instant::now(),
            _marker: PhantomData,
        }
    }

    /// Bind the configured address and start dispatching to `handler`
    ///
    /// Fails with [`ConnectionError::IllegalState`] if the server is already
    /// running or has been stopped; the running registration is unaffected.
    pub async fn start<H>(&self, handler: H) -> Result<&Self>
    where
        H: ConnectionHandler<R, W>,
    {
        let mut binding = self.binding.lock().await;
        let state = *self.state.borrow();
        match state {
            ServerState::Created => {}
            ServerState::Running => {
                warn!("Rejecting start: server already running");
                return Err(ConnectionError::IllegalState(
                    "server already running".to_string(),
                ));
            }
            ServerState::Stopped => {
                warn!("Rejecting start: server already stopped");
                return Err(ConnectionError::IllegalState(
                    "server already stopped".to_string(),
                ));
            }
        }
        self.config
            .validate()
            .map_err(ConnectionError::IllegalState)?;

        let listener = TcpListenerAdapter::bind(self.config.bind_address)
            .await?
            .with_nodelay(self.config.nodelay);
        let metrics = self.metrics.clone();
        let acceptor: ConnectionAcceptor<_, C, R, W> = ConnectionAcceptor::new(
            listener,
            self.codec.clone(),
            self.config.connection.clone(),
        )?
        .with_backoff(self.config.accept_backoff)
        .with_error_hook(move |_| metrics.accept_error());
        let local_addr = acceptor.local_addr();

        let subscription = Arc::new(OnceLock::new());
        let dispatcher = Dispatcher {
            handler: Arc::new(handler),
            handlers: self.handlers.clone(),
            metrics: self.metrics.clone(),
            state: self.state.subscribe(),
            credit: self.config.max_connections as u64,
            subscription: subscription.clone(),
            _marker: PhantomData,
        };
        let accept_task = acceptor
            .spawn(Box::new(dispatcher))
            .ok_or(ConnectionError::AlreadySubscribed)?;

        self.port.store(local_addr.port(), Ordering::SeqCst);
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        *binding = Some(ServerBinding {
            subscription,
            accept_task,
        });
        self.state.send_replace(ServerState::Running);

        info!(
            addr = %local_addr,
            max_connections = self.config.max_connections,
            "Server started"
        );
        Ok(self)
    }

    /// Start and wait until the server is shut down
    pub async fn start_and_await<H>(&self, handler: H) -> Result<()>
    where
        H: ConnectionHandler<R, W>,
    {
        self.start(handler).await?;
        self.await_shutdown().await;
        Ok(())
    }

    /// Stop accepting and release the listening socket
    ///
    /// Connections already dispatched keep running; use
    /// [`drain`](Self::drain) or [`cancel_handlers`](Self::cancel_handlers)
    /// to deal with them.
    pub async fn shutdown(&self) -> Result<()> {
        let mut binding = self.binding.lock().await;
        if *self.state.borrow() != ServerState::Running {
            return Err(ConnectionError::IllegalState(
                "server not running".to_string(),
            ));
        }

        info!("Shutting down server");
        self.state.send_replace(ServerState::Stopped);
        if let Some(binding) = binding.take() {
            if let Some(subscription) = binding.subscription.get() {
                subscription.cancel();
            }
            if let Err(err) = binding.accept_task.await {
                error!(error = %err, "Accept loop ended abnormally");
            }
        }

        info!(
            active_handlers = self.handlers.len(),
            "Server shutdown complete"
        );
        Ok(())
    }

    /// Wait until the server reaches [`ServerState::Stopped`]
    pub async fn await_shutdown(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ServerState::Stopped)
            .await;
    }

    /// Wait up to `timeout` for every dispatched handler to finish
    ///
    /// Returns `true` if no handler is left running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.handlers.wait_idle(timeout).await
    }

    /// Cancel every running handler, returning how many were signalled
    ///
    /// A cancelled handler's future is dropped and its connection closed.
    pub fn cancel_handlers(&self) -> usize {
        let cancelled = self.handlers.cancel_all();
        debug!(cancelled, "Cancelling handlers");
        cancelled
    }
}

impl<C, R, W> TcpServer<C, R, W> {
    /// Configured port before start, bound port after
    pub fn server_port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Number of handlers currently running
    pub fn active_handlers(&self) -> usize {
        self.handlers.len()
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            state: self.state(),
            local_addr: self.local_addr(),
            active_handlers: self.handlers.len(),
            connections_accepted: self.metrics.connections_accepted(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl<C, R, W> std::fmt::Debug for TcpServer<C, R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("state", &self.state())
            .field("port", &self.server_port())
            .field("active_handlers", &self.handlers.len())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl<C, R, W> Drop for TcpServer<C, R, W> {
    fn drop(&mut self) {
        if *self.state.borrow() == ServerState::Running {
            warn!("TcpServer dropped while still running");
            self.state.send_replace(ServerState::Stopped);
            if let Some(binding) = self.binding.get_mut().take() {
                if let Some(subscription) = binding.subscription.get() {
                    subscription.cancel();
                }
            }
        }
    }
}

/// In-flight handler tasks, keyed by connection
#[derive(Debug)]
struct HandlerSet {
    tasks: DashMap<ConnectionId, CancellationToken>,
    active: watch::Sender<usize>,
}

impl HandlerSet {
    fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            active: watch::channel(0).0,
        }
    }

    fn insert(&self, id: ConnectionId, token: CancellationToken) {
        self.tasks.insert(id, token);
        self.active.send_modify(|active| *active += 1);
    }

    fn remove(&self, id: ConnectionId) {
        if self.tasks.remove(&id).is_some() {
            self.active
                .send_modify(|active| *active = active.saturating_sub(1));
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.tasks.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut active = self.active.subscribe();
        tokio::time::timeout(timeout, active.wait_for(|active| *active == 0))
            .await
            .is_ok_and(|idle| idle.is_ok())
    }
}

/// Acceptor subscriber that spawns one handler task per connection
struct Dispatcher<H, R, W> {
    handler: Arc<H>,
    handlers: Arc<HandlerSet>,
    metrics: Arc<ServerMetrics>,
    state: watch::Receiver<ServerState>,
    credit: u64,
    subscription: Arc<OnceLock<Subscription>>,
    _marker: PhantomData<fn() -> (R, W)>,
}

impl<H, R, W> Subscriber<Connection<R, W>> for Dispatcher<H, R, W>
where
    H: ConnectionHandler<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(self.credit);
        let _ = self.subscription.set(subscription);
    }

    fn on_next(&mut self, connection: Connection<R, W>) {
        self.metrics.connection_accepted();
        let id = connection.id();
        if *self.state.borrow() == ServerState::Stopped {
            debug!(connection_id = %id, "Server stopped, closing connection");
            self.metrics.connection_rejected();
            drop(connection.close().subscribe());
            return;
        }

        let token = CancellationToken::new();
        self.handlers.insert(id, token.clone());
        self.metrics.handler_started();
        info!(connection_id = %id, peer = %connection.peer_addr(), "Dispatching connection");

        let handler = self.handler.clone();
        let handlers = self.handlers.clone();
        let metrics = self.metrics.clone();
        let subscription = self.subscription.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let closer = connection.clone();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = handler.handle(connection) => Some(result),
            };
            match outcome {
                Some(Ok(())) => {
                    debug!(connection_id = %id, "Handler finished");
                    metrics.handler_completed(started.elapsed());
                }
                Some(Err(err)) => {
                    warn!(connection_id = %id, error = %err, "Handler failed");
                    metrics.handler_failed(started.elapsed());
                }
                None => {
                    debug!(connection_id = %id, "Handler cancelled");
                    metrics.handler_cancelled(started.elapsed());
                }
            }
            drop(closer.close().subscribe());
            handlers.remove(id);
            if let Some(subscription) = subscription.get() {
                subscription.request(1);
            }
        });
    }

    fn on_error(&mut self, error: ConnectionError) {
        error!(error = %error, "Acceptor terminated");
    }

    fn on_complete(&mut self) {
        debug!("Acceptor completed");
    }
}
