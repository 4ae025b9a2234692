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

//! Client-side connection source

use crate::connection::ConnectionCodec;
use crate::flow::{Publisher, Subscriber, Subscription};
use crate::{Connection, ConnectionConfig, ConnectionError, Result};
use bytes::{Bytes, BytesMut};
use reactcp_transport::Dialer;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Demand-driven publisher of outbound connections to one address
///
/// Each unit of demand permits one `connect` call. A failed connect is
/// delivered as `on_error` and ends the subscription. Every subscription runs
/// its own connect loop.
pub struct Connector<D, C, R = BytesMut, W = Bytes> {
    dialer: Arc<D>,
    addr: SocketAddr,
    codec: C,
    config: ConnectionConfig,
    connect_timeout: Option<Duration>,
    _marker: PhantomData<fn() -> (R, W)>,
}

impl<D, C: Clone, R, W> Clone for Connector<D, C, R, W> {
    fn clone(&self) -> Self {
        Self {
            dialer: self.dialer.clone(),
            addr: self.addr,
            codec: self.codec.clone(),
            config: self.config.clone(),
            connect_timeout: self.connect_timeout,
            _marker: PhantomData,
        }
    }
}

impl<D, C, R, W> Connector<D, C, R, W>
where
    D: Dialer,
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    /// Create a connector for `addr`
    pub fn new(dialer: Arc<D>, addr: SocketAddr, codec: C, config: ConnectionConfig) -> Self {
        Self {
            dialer,
            addr,
            codec,
            config,
            connect_timeout: None,
            _marker: PhantomData,
        }
    }

    /// Fail connect attempts that take longer than `timeout`
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Remote address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Subscribe and return the connect loop's task
    pub fn spawn(&self, mut subscriber: Box<dyn Subscriber<Connection<R, W>>>) -> JoinHandle<()> {
        let subscription = Subscription::new();
        subscriber.on_subscribe(subscription.clone());
        tokio::spawn(self.clone().connect_loop(subscriber, subscription))
    }

    /// Connect once and return the connection
    pub async fn connect_one(&self) -> Result<Connection<R, W>> {
        let (reply, receiver) = oneshot::channel();
        self.spawn(Box::new(First { reply: Some(reply), subscription: None }));
        receiver
            .await
            .unwrap_or(Err(ConnectionError::ConnectionClosed))
    }

    async fn connect_loop(
        self,
        mut subscriber: Box<dyn Subscriber<Connection<R, W>>>,
        subscription: Subscription,
    ) {
        while subscription.acquire().await {
            let connected = tokio::select! {
                biased;
                _ = subscription.cancelled() => break,
                connected = self.connect() => connected,
            };
            match connected {
                Ok(connection) if subscription.is_cancelled() => {
                    debug!(connection_id = %connection.id(), "Closing connection made during cancellation");
                    drop(connection.close().subscribe());
                    break;
                }
                Ok(connection) => {
                    debug!(connection_id = %connection.id(), addr = %self.addr, "Connected");
                    subscriber.on_next(connection);
                }
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "Connect failed");
                    subscriber.on_error(err);
                    return;
                }
            }
        }
        debug!(addr = %self.addr, "Connect loop terminated");
    }

    async fn connect(&self) -> Result<Connection<R, W>> {
        let attempt = self.dialer.connect(self.addr);
        let socket = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| ConnectionError::Timeout)??,
            None => attempt.await?,
        };
        Connection::new(socket, self.codec.clone(), self.config.clone())
    }
}

impl<D, C, R, W> Publisher<Connection<R, W>> for Connector<D, C, R, W>
where
    D: Dialer,
    C: ConnectionCodec<R, W>,
    R: Send + 'static,
    W: Send + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<Connection<R, W>>>) {
        self.spawn(subscriber);
    }
}

impl<D, C, R, W> fmt::Debug for Connector<D, C, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("addr", &self.addr)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Takes the first connection and stops the loop
struct First<T> {
    reply: Option<oneshot::Sender<Result<T>>>,
    subscription: Option<Subscription>,
}

impl<T: Send + 'static> Subscriber<T> for First<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, item: T) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(item));
        }
    }

    fn on_error(&mut self, error: ConnectionError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn on_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawConnection;
    use reactcp_transport::{Listener, memory};
    use tokio::sync::mpsc;
    use tokio_util::codec::BytesCodec;

    struct Forward(mpsc::UnboundedSender<Result<RawConnection>>, Option<Subscription>);

    impl Subscriber<RawConnection> for Forward {
        fn on_subscribe(&mut self, subscription: Subscription) {
            self.1 = Some(subscription);
        }

        fn on_next(&mut self, connection: RawConnection) {
            let _ = self.0.send(Ok(connection));
        }

        fn on_error(&mut self, error: ConnectionError) {
            let _ = self.0.send(Err(error));
        }

        fn on_complete(&mut self) {}
    }

    #[tokio::test]
    async fn test_connect_one() {
        let (mut listener, dialer) = memory::network(1024);
        let connector: Connector<_, _> = Connector::new(
            Arc::new(dialer.clone()),
            listener.local_addr().unwrap(),
            BytesCodec::new(),
            ConnectionConfig::default(),
        );

        let connection = connector.connect_one().await.unwrap();
        let (_socket, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, connection.local_addr());
        assert_eq!(dialer.probe().connects(), 1);
    }

    #[tokio::test]
    async fn test_connect_error_ends_subscription() {
        let (listener, dialer) = memory::network(1024);
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let connector: Connector<_, _> = Connector::new(
            Arc::new(dialer.clone()),
            addr,
            BytesCodec::new(),
            ConnectionConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new();
        subscription.request(5);
        let mut forward = Forward(tx, None);
        forward.on_subscribe(subscription.clone());
        connector
            .connect_loop(Box::new(forward), subscription)
            .await;

        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
        assert!(rx.recv().await.is_none());
        assert_eq!(dialer.probe().connects(), 1);
    }
}
