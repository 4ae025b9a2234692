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

//! Server-side connection source
//!
//! [`ConnectionAcceptor`] turns a [`Listener`] into a demand-driven publisher
//! of connections. Each unit of demand permits exactly one `accept` call; with
//! no outstanding demand the listener is left alone.

use crate::connection::ConnectionCodec;
use crate::flow::{Publisher, Subscriber, Subscription};
use crate::{Connection, ConnectionConfig, ConnectionError, Result};
use bytes::{Bytes, BytesMut};
use reactcp_transport::Listener;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type ErrorHook = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// Demand-driven publisher of accepted connections
///
/// The listener is handed to the first subscriber and released when that
/// subscription is cancelled. Later subscribers are rejected with
/// [`ConnectionError::AlreadySubscribed`].
pub struct ConnectionAcceptor<L, C, R = BytesMut, W = Bytes> {
    listener: Mutex<Option<L>>,
    local_addr: SocketAddr,
    codec: C,
    config: ConnectionConfig,
    backoff: Duration,
    error_hook: Option<ErrorHook>,
    _marker: PhantomData<fn() -> (R, W)>,
}

impl<L, C, R, W> ConnectionAcceptor<L, C, R, W>
where
    L: Listener,
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    /// Wrap a bound listener
    pub fn new(listener: L, codec: C, config: ConnectionConfig) -> Result<Self> {
        config.validate().map_err(ConnectionError::IllegalState)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            codec,
            config,
            backoff: DEFAULT_ACCEPT_BACKOFF,
            error_hook: None,
            _marker: PhantomData,
        })
    }

    /// Set the pause after a failed accept
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Observe every failed accept, before the backoff
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&io::Error) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe and return the accept loop's task
    ///
    /// Returns `None` when the subscriber was rejected.
    pub fn spawn(
        &self,
        mut subscriber: Box<dyn Subscriber<Connection<R, W>>>,
    ) -> Option<JoinHandle<()>> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            warn!(addr = %self.local_addr, "Acceptor already has a subscriber");
            subscriber.on_subscribe(Subscription::inert());
            subscriber.on_error(ConnectionError::AlreadySubscribed);
            return None;
        };

        let subscription = Subscription::new();
        subscriber.on_subscribe(subscription.clone());
        let accept_loop = AcceptLoop {
            listener,
            subscriber,
            subscription,
            codec: self.codec.clone(),
            config: self.config.clone(),
            backoff: self.backoff,
            error_hook: self.error_hook.clone(),
            local_addr: self.local_addr,
        };
        Some(tokio::spawn(accept_loop.run()))
    }
}

impl<L, C, R, W> Publisher<Connection<R, W>> for ConnectionAcceptor<L, C, R, W>
where
    L: Listener,
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<Connection<R, W>>>) {
        let _ = self.spawn(subscriber);
    }
}

impl<L, C, R, W> fmt::Debug for ConnectionAcceptor<L, C, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAcceptor")
            .field("local_addr", &self.local_addr)
            .field("backoff", &self.backoff)
            .finish()
    }
}

struct AcceptLoop<L, C, R, W> {
    listener: L,
    subscriber: Box<dyn Subscriber<Connection<R, W>>>,
    subscription: Subscription,
    codec: C,
    config: ConnectionConfig,
    backoff: Duration,
    error_hook: Option<ErrorHook>,
    local_addr: SocketAddr,
}

impl<L, C, R, W> AcceptLoop<L, C, R, W>
where
    L: Listener,
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    async fn run(mut self) {
        info!(addr = %self.local_addr, "Accepting connections");
        while self.subscription.acquire().await {
            let accepted = tokio::select! {
                biased;
                _ = self.subscription.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    let connection =
                        match Connection::new(socket, self.codec.clone(), self.config.clone()) {
                            Ok(connection) => connection,
                            Err(err) => {
                                warn!(peer = %peer_addr, error = %err, "Failed to set up accepted connection");
                                self.subscription.restore();
                                continue;
                            }
                        };
                    if self.subscription.is_cancelled() {
                        debug!(connection_id = %connection.id(), "Closing connection accepted during cancellation");
                        drop(connection.close().subscribe());
                        break;
                    }
                    debug!(connection_id = %connection.id(), peer = %peer_addr, "Accepted connection");
                    self.subscriber.on_next(connection);
                }
                Err(err) => {
                    error!(error = %err, "Failed to accept connection");
                    if let Some(hook) = &self.error_hook {
                        hook(&err);
                    }
                    self.subscription.restore();
                    tokio::select! {
                        _ = self.subscription.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
        info!(addr = %self.local_addr, "Accept loop terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawConnection;
    use reactcp_transport::{Dialer, memory};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::codec::BytesCodec;

    enum Event {
        Subscribed(Subscription),
        Next(RawConnection),
        Error(ConnectionError),
    }

    struct Forward(mpsc::UnboundedSender<Event>);

    impl Subscriber<RawConnection> for Forward {
        fn on_subscribe(&mut self, subscription: Subscription) {
            let _ = self.0.send(Event::Subscribed(subscription));
        }

        fn on_next(&mut self, connection: RawConnection) {
            let _ = self.0.send(Event::Next(connection));
        }

        fn on_error(&mut self, error: ConnectionError) {
            let _ = self.0.send(Event::Error(error));
        }

        fn on_complete(&mut self) {}
    }

    #[tokio::test]
    async fn test_second_subscriber_rejected() {
        let (listener, _dialer) = memory::network(1024);
        let acceptor: ConnectionAcceptor<_, _> =
            ConnectionAcceptor::new(listener, BytesCodec::new(), ConnectionConfig::default())
                .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(acceptor.spawn(Box::new(Forward(tx))).is_some());

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(acceptor.spawn(Box::new(Forward(tx))).is_none());
        match rx.try_recv().unwrap() {
            Event::Subscribed(subscription) => assert!(subscription.is_cancelled()),
            _ => panic!("expected on_subscribe first"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::Error(ConnectionError::AlreadySubscribed)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (listener, _dialer) = memory::network(1024);
        let result: Result<ConnectionAcceptor<_, _>> = ConnectionAcceptor::new(
            listener,
            BytesCodec::new(),
            ConnectionConfig::default().with_prefetch(0),
        );
        assert!(result.unwrap_err().is_lifecycle_misuse());
    }

    #[tokio::test]
    async fn test_cancel_releases_listener() {
        let (listener, dialer) = memory::network(1024);
        let acceptor: ConnectionAcceptor<_, _> =
            ConnectionAcceptor::new(listener, BytesCodec::new(), ConnectionConfig::default())
                .unwrap();
        let addr = acceptor.local_addr();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = acceptor.spawn(Box::new(Forward(tx))).unwrap();
        let Some(Event::Subscribed(subscription)) = rx.recv().await else {
            panic!("expected on_subscribe");
        };
        subscription.request(1);
        dialer.connect(addr).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::Next(_))));

        subscription.cancel();
        handle.await.unwrap();
        let err = dialer.connect(addr).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_accept_waits_for_demand() {
        let (listener, dialer) = memory::network(1024);
        let probe = listener.probe();
        let acceptor: Arc<ConnectionAcceptor<_, _>> = Arc::new(
            ConnectionAcceptor::new(listener, BytesCodec::new(), ConnectionConfig::default())
                .unwrap(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.spawn(Box::new(Forward(tx)));
        let Some(Event::Subscribed(subscription)) = rx.recv().await else {
            panic!("expected on_subscribe");
        };
        dialer.connect(acceptor.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.accepts(), 0);

        subscription.request(1);
        assert!(matches!(rx.recv().await, Some(Event::Next(_))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.accepts(), 1);
    }

    #[tokio::test]
    async fn test_accept_errors_are_retried() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (listener, dialer) = memory::network(1024);
        drop(dialer);
        let errors = Arc::new(AtomicUsize::new(0));
        let acceptor: ConnectionAcceptor<_, _> =
            ConnectionAcceptor::new(listener, BytesCodec::new(), ConnectionConfig::default())
                .unwrap()
                .with_backoff(Duration::from_millis(1))
                .with_error_hook({
                    let errors = errors.clone();
                    move |_| {
                        errors.fetch_add(1, Ordering::SeqCst);
                    }
                });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = acceptor.spawn(Box::new(Forward(tx))).unwrap();
        let Some(Event::Subscribed(subscription)) = rx.recv().await else {
            panic!("expected on_subscribe");
        };
        subscription.request(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(errors.load(Ordering::SeqCst) >= 2);

        subscription.cancel();
        handle.await.unwrap();
    }
}
