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

//! Reactive connection
//!
//! A [`Connection`] wraps one transport socket. Inbound bytes are decoded by
//! the connection's codec and published to a single content subscriber under
//! that subscriber's demand. Outbound items are encoded into the connection's
//! [`WriteQueue`] and only reach the transport when a flush captures them.
//!
//! # Lifecycle
//!
//! ```text
//! Open ──(read cancel | close | transport failure)──> Closing ──(shutdown done)──> Closed
//! ```
//!
//! Writes and flushes issued once the connection left `Open` fail with
//! [`ConnectionError::ConnectionClosed`].

use crate::action::{Action, Completion, SingleShot};
use crate::flow::{self, Publisher, Subscriber, SubscriberStream, Subscription, UNBOUNDED};
use crate::queue::WriteQueue;
use crate::writer::{ConnectionWriter, WriterCommand};
use crate::{ConnectionConfig, ConnectionError, ConnectionId, ConnectionState, Result};
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStream, TryStreamExt};
use metrics::{counter, gauge};
use reactcp_transport::RawSocket;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{BytesCodec, Decoder, Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Codec usable by a connection
///
/// Implemented for every `tokio_util` codec that decodes `R`, encodes `W` and
/// whose errors convert into [`ConnectionError`].
pub trait ConnectionCodec<R, W>: Clone + Send + Sync + 'static {
    /// Decode one item from the front of `src`
    fn decode_item(&mut self, src: &mut BytesMut) -> Result<Option<R>>;

    /// Decode one item once the transport reached end of stream
    fn decode_item_eof(&mut self, src: &mut BytesMut) -> Result<Option<R>>;

    /// Encode one item onto `dst`
    fn encode_item(&mut self, item: W, dst: &mut BytesMut) -> Result<()>;
}

impl<C, R, W> ConnectionCodec<R, W> for C
where
    C: Decoder<Item = R> + Encoder<W> + Clone + Send + Sync + 'static,
    <C as Decoder>::Error: Into<ConnectionError>,
    <C as Encoder<W>>::Error: Into<ConnectionError>,
{
    fn decode_item(&mut self, src: &mut BytesMut) -> Result<Option<R>> {
        Decoder::decode(self, src).map_err(Into::into)
    }

    fn decode_item_eof(&mut self, src: &mut BytesMut) -> Result<Option<R>> {
        Decoder::decode_eof(self, src).map_err(Into::into)
    }

    fn encode_item(&mut self, item: W, dst: &mut BytesMut) -> Result<()> {
        Encoder::encode(self, item, dst).map_err(Into::into)
    }
}

/// Decoder adapter feeding `FramedRead` and counting consumed bytes
struct ItemDecoder<C, R, W> {
    codec: C,
    _marker: PhantomData<fn() -> (R, W)>,
}

impl<C, R, W> ItemDecoder<C, R, W> {
    fn new(codec: C) -> Self {
        Self {
            codec,
            _marker: PhantomData,
        }
    }
}

impl<C, R, W> Decoder for ItemDecoder<C, R, W>
where
    C: ConnectionCodec<R, W>,
{
    type Item = R;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<R>> {
        let before = src.len();
        let item = self.codec.decode_item(src)?;
        counter!("reactcp.bytes.received").increment((before - src.len()) as u64);
        Ok(item)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<R>> {
        let before = src.len();
        let item = self.codec.decode_item_eof(src)?;
        counter!("reactcp.bytes.received").increment((before - src.len()) as u64);
        Ok(item)
    }
}

type Encode<W> = Box<dyn FnMut(W, &mut BytesMut) -> Result<()> + Send>;

/// Single-subscriber read slot, moved out of `Unsubscribed` at most once
enum ReadSlot<R> {
    Unsubscribed(BoxStream<'static, Result<R>>),
    Subscribed,
    Released,
}

/// State guarded by the connection lock
struct Core<R, W> {
    queue: WriteQueue,
    read: ReadSlot<R>,
    encode: Encode<W>,
}

struct Inner<R, W> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    core: Mutex<Core<R, W>>,
    commands: mpsc::UnboundedSender<WriterCommand>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    closer: SingleShot,
    config: ConnectionConfig,
}

impl<R, W> Inner<R, W> {
    fn lock_core(&self) -> MutexGuard<'_, Core<R, W>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl<R, W> Drop for Inner<R, W> {
    fn drop(&mut self) {
        if !self.closer.is_triggered() {
            debug!(connection_id = %self.id, "Connection dropped without close");
            gauge!("reactcp.connections.active").decrement(1.0);
        }
    }
}

/// Handle to one reactive connection
///
/// Cheap to clone; every clone refers to the same connection. `R` is the
/// decoded inbound item and `W` the outbound item accepted by the codec.
pub struct Connection<R, W> {
    inner: Arc<Inner<R, W>>,
}

/// Connection carrying raw bytes in both directions
pub type RawConnection = Connection<BytesMut, Bytes>;

impl<R, W> Clone for Connection<R, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl RawConnection {
    /// Wrap a socket with the pass-through [`BytesCodec`]
    pub fn raw<S: RawSocket>(socket: S, config: ConnectionConfig) -> Result<Self> {
        Self::new(socket, BytesCodec::new(), config)
    }
}

impl<R, W> Connection<R, W>
where
    R: Send + 'static,
    W: Send + 'static,
{
    /// Wrap a connected socket
    ///
    /// Spawns the connection's writer task, so this must be called from
    /// within a Tokio runtime.
    pub fn new<S, C>(socket: S, codec: C, config: ConnectionConfig) -> Result<Self>
    where
        S: RawSocket,
        C: ConnectionCodec<R, W>,
    {
        Self::with_id(ConnectionId::next(), socket, codec, config)
    }

    #[instrument(skip(socket, codec, config), fields(connection_id = %id))]
    fn with_id<S, C>(
        id: ConnectionId,
        socket: S,
        codec: C,
        config: ConnectionConfig,
    ) -> Result<Self>
    where
        S: RawSocket,
        C: ConnectionCodec<R, W>,
    {
        config.validate().map_err(ConnectionError::IllegalState)?;
        let peer_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr()?;
        let (reader, writer) = socket.into_boxed_split();

        let frames = FramedRead::with_capacity(
            reader,
            ItemDecoder::new(codec.clone()),
            config.read_buffer_capacity,
        )
        .boxed();
        let mut encoder = codec;
        let encode: Encode<W> = Box::new(move |item, dst| encoder.encode_item(item, dst));

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Open);
        let inner = Arc::new(Inner {
            id,
            peer_addr,
            local_addr,
            core: Mutex::new(Core {
                queue: WriteQueue::new(),
                read: ReadSlot::Unsubscribed(frames),
                encode,
            }),
            commands,
            state,
            shutdown: CancellationToken::new(),
            closer: SingleShot::new(),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let on_failure = Box::new(move |err: ConnectionError| {
            if let Some(inner) = weak.upgrade() {
                warn!(connection_id = %inner.id, error = %err, "Transport failed, closing connection");
                let connection = Connection { inner };
                drop(connection.trigger_close());
            }
        });
        tokio::spawn(ConnectionWriter::new(id, writer, receiver, on_failure).run());

        counter!("reactcp.connections.total").increment(1);
        gauge!("reactcp.connections.active").increment(1.0);
        info!(peer = %peer_addr, "Connection established");

        Ok(Self { inner })
    }

    /// Attach the single content subscriber
    ///
    /// The first subscriber receives decoded items under its demand. Every
    /// later subscriber is rejected synchronously with an inert subscription
    /// followed by [`ConnectionError::AlreadySubscribed`]. Cancelling the
    /// accepted subscription closes the connection.
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<R>,
    {
        self.attach(Box::new(subscriber), true);
    }

    /// Drain and discard all inbound content
    ///
    /// Requests unbounded demand, ignores read errors and never closes the
    /// connection. Call [`close`](Self::close) to release it.
    pub fn ignore_content(&self) {
        self.attach(Box::new(Discard), false);
    }

    /// Content as a [`Stream`](futures::Stream), requesting
    /// [`ConnectionConfig::prefetch`] items at a time
    ///
    /// Dropping the stream cancels the subscription and closes the connection.
    pub fn content(&self) -> SubscriberStream<R> {
        flow::into_stream(self, self.inner.config.prefetch)
    }

    fn attach(&self, mut subscriber: Box<dyn Subscriber<R>>, closes_connection: bool) {
        let claimed = {
            let mut core = self.inner.lock_core();
            match mem::replace(&mut core.read, ReadSlot::Subscribed) {
                ReadSlot::Unsubscribed(frames) => Ok(frames),
                previous => {
                    let rejection = match previous {
                        ReadSlot::Released => ConnectionError::ConnectionClosed,
                        _ => ConnectionError::AlreadySubscribed,
                    };
                    core.read = previous;
                    Err(rejection)
                }
            }
        };

        let frames = match claimed {
            Ok(frames) => frames,
            Err(rejection) => {
                warn!(connection_id = %self.inner.id, error = %rejection, "Rejecting content subscriber");
                subscriber.on_subscribe(Subscription::inert());
                subscriber.on_error(rejection);
                return;
            }
        };

        debug!(connection_id = %self.inner.id, closes_connection, "Content subscriber attached");
        let subscription = Subscription::new();
        if closes_connection {
            let weak = Arc::downgrade(&self.inner);
            subscription.on_cancel(move || {
                if let Some(inner) = weak.upgrade() {
                    debug!(connection_id = %inner.id, "Content subscription cancelled");
                    drop(Connection { inner }.trigger_close());
                }
            });
        }
        subscriber.on_subscribe(subscription.clone());
        tokio::spawn(
            self.clone()
                .pump(frames, subscriber, subscription, closes_connection),
        );
    }

    /// Deliver decoded items to the subscriber, never reading past demand
    async fn pump(
        self,
        mut frames: BoxStream<'static, Result<R>>,
        mut subscriber: Box<dyn Subscriber<R>>,
        subscription: Subscription,
        closes_connection: bool,
    ) {
        let id = self.inner.id;
        loop {
            let granted = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                granted = subscription.acquire() => granted,
            };
            if !granted {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                _ = subscription.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(item)) => {
                    trace!(connection_id = %id, "Delivering item");
                    subscriber.on_next(item);
                }
                Some(Err(err)) => {
                    warn!(connection_id = %id, error = %err, "Read failed");
                    if !subscription.is_cancelled() {
                        subscriber.on_error(err);
                    }
                    if closes_connection {
                        drop(self.trigger_close());
                    }
                    return;
                }
                None => {
                    debug!(connection_id = %id, "Inbound stream ended");
                    if !subscription.is_cancelled() {
                        subscriber.on_complete();
                    }
                    return;
                }
            }
        }

        // Cancelled subscribers get no terminal signal; a local close completes the rest.
        if !subscription.is_cancelled() {
            subscriber.on_complete();
        }
    }

    /// Encode `item` and enqueue it, failing if the connection left `Open`
    fn try_enqueue(&self, item: W) -> Result<Completion> {
        let mut core = self.inner.lock_core();
        if !self.inner.state().is_open() {
            return Err(ConnectionError::ConnectionClosed);
        }
        let mut buffer = BytesMut::new();
        (core.encode)(item, &mut buffer)?;
        Ok(core.queue.enqueue(buffer.freeze()))
    }

    /// Capture the queue and hand it to the writer
    #[instrument(skip(self), fields(connection_id = %self.inner.id))]
    fn start_flush(&self) -> Completion {
        let mut core = self.inner.lock_core();
        if !self.inner.state().is_open() {
            return Completion::ready(Err(ConnectionError::ConnectionClosed));
        }
        if core.queue.is_empty() {
            return Completion::ready(Ok(()));
        }
        let batch = core.queue.capture();
        debug!(writes = batch.len(), bytes = batch.byte_len(), "Flushing batch");
        let (reply, receiver) = oneshot::channel();
        if self
            .inner
            .commands
            .send(WriterCommand::Transmit { batch, reply })
            .is_err()
        {
            return Completion::ready(Err(ConnectionError::ConnectionClosed));
        }
        Completion::from_receiver(receiver)
    }

    /// Move the connection to `Closing` and shut the transport down once
    #[instrument(skip(self), fields(connection_id = %self.inner.id))]
    fn trigger_close(&self) -> Completion {
        self.inner.closer.run(|| {
            let (receiver, failed) = {
                let mut core = self.inner.lock_core();
                self.inner.state.send_replace(ConnectionState::Closing);
                if matches!(core.read, ReadSlot::Unsubscribed(_)) {
                    core.read = ReadSlot::Released;
                }
                let failed = core.queue.fail_all(ConnectionError::ConnectionClosed);
                let (reply, receiver) = oneshot::channel();
                // A gone writer drops `reply`, which reads as ConnectionClosed.
                let _ = self.inner.commands.send(WriterCommand::Shutdown { reply });
                (receiver, failed)
            };
            self.inner.shutdown.cancel();
            debug!(failed, "Connection closing");

            let inner = self.inner.clone();
            async move {
                let result = Completion::from_receiver(receiver).await;
                inner.state.send_replace(ConnectionState::Closed);
                gauge!("reactcp.connections.active").decrement(1.0);
                info!(connection_id = %inner.id, ok = result.is_ok(), "Connection closed");
                result
            }
        })
    }

    /// Capture every queued write and transmit it as one batch
    ///
    /// Succeeds immediately when nothing is queued.
    pub fn flush(&self) -> Action {
        let connection = self.clone();
        Action::new(move || connection.start_flush())
    }

    /// Write a stream of items
    ///
    /// `source` produces a fresh stream for every subscription. Items are
    /// enqueued one at a time in emission order. A failing source fails the
    /// result at once; items already enqueued stay queued. Otherwise the result
    /// waits for the flushes carrying the items.
    pub fn write_stream<F, S>(&self, source: F) -> Action
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: TryStream<Ok = W> + Send + 'static,
        S::Error: fmt::Display,
    {
        self.stream_action(source, false)
    }

    /// Write a stream of items, flushing once the source completes
    pub fn write_stream_and_flush<F, S>(&self, source: F) -> Action
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: TryStream<Ok = W> + Send + 'static,
        S::Error: fmt::Display,
    {
        self.stream_action(source, true)
    }

    fn stream_action<F, S>(&self, source: F, flush: bool) -> Action
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: TryStream<Ok = W> + Send + 'static,
        S::Error: fmt::Display,
    {
        let connection = self.clone();
        Action::new(move || Completion::spawn(connection.clone().drain_source(source(), flush)))
    }

    async fn drain_source<S>(self, source: S, flush: bool) -> Result<()>
    where
        S: TryStream<Ok = W> + Send,
        S::Error: fmt::Display,
    {
        let mut source = pin!(source.into_stream());
        let mut writes = Vec::new();
        while let Some(item) = source
            .try_next()
            .await
            .map_err(|err| ConnectionError::Source(err.to_string()))?
        {
            writes.push(self.try_enqueue(item)?);
        }
        trace!(connection_id = %self.inner.id, writes = writes.len(), "Write source completed");
        if flush {
            drop(self.start_flush());
        }
        try_join_all(writes).await.map(|_| ())
    }

    /// Shut the connection down
    ///
    /// Only the first subscription triggers the shutdown; every subscription
    /// observes the same outcome. Unflushed writes fail with
    /// [`ConnectionError::ConnectionClosed`], batches already captured by a
    /// flush are transmitted first.
    pub fn close(&self) -> Action {
        let connection = self.clone();
        Action::new(move || connection.trigger_close())
    }

    /// Resolves once the connection reached [`ConnectionState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of writes waiting for a flush
    pub fn pending_writes(&self) -> usize {
        self.inner.lock_core().queue.len()
    }
}

impl<R, W> Connection<R, W>
where
    R: Send + 'static,
    W: Clone + Send + Sync + 'static,
{
    /// Enqueue `item` on every subscription
    ///
    /// The result resolves with the flush that carries the write. An encoding
    /// failure fails the subscription without enqueuing anything.
    pub fn write(&self, item: W) -> Action {
        let connection = self.clone();
        Action::new(move || {
            connection
                .try_enqueue(item.clone())
                .unwrap_or_else(|err| Completion::ready(Err(err)))
        })
    }

    /// Enqueue `item` and flush immediately
    ///
    /// The result reflects only this write.
    pub fn write_and_flush(&self, item: W) -> Action {
        let connection = self.clone();
        Action::new(move || match connection.try_enqueue(item.clone()) {
            Ok(write) => {
                drop(connection.start_flush());
                write
            }
            Err(err) => Completion::ready(Err(err)),
        })
    }
}

impl<R, W> Connection<R, W> {
    /// Unique identifier
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Address of the remote peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Address of the local end
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}

impl<R, W> Publisher<R> for Connection<R, W>
where
    R: Send + 'static,
    W: Send + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<R>>) {
        self.attach(subscriber, true);
    }
}

impl<R, W> fmt::Debug for Connection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Subscriber used by [`Connection::ignore_content`]
struct Discard;

impl<R: Send + 'static> Subscriber<R> for Discard {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, _item: R) {}

    fn on_error(&mut self, error: ConnectionError) {
        trace!(error = %error, "Discarded content failed");
    }

    fn on_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use reactcp_transport::MemorySocket;
    use tokio_util::codec::LinesCodec;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_raw_connection_metadata() {
        let (local, remote) = MemorySocket::pair(1024);
        let expected_peer = remote.local_addr().unwrap();
        let connection = RawConnection::raw(local, ConnectionConfig::default()).unwrap();
        let other = RawConnection::raw(remote, ConnectionConfig::default()).unwrap();

        assert_eq!(connection.peer_addr(), expected_peer);
        assert!(connection.id() < other.id());
        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(connection.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (local, _remote) = MemorySocket::pair(1024);
        let probe = local.probe();
        let err = RawConnection::raw(
            local,
            ConnectionConfig::default().with_read_buffer_capacity(0),
        )
        .unwrap_err();
        assert!(err.is_lifecycle_misuse());
        assert_eq!(probe.interactions(), 0);
    }

    #[tokio::test]
    async fn test_lines_codec_roundtrip() {
        let (local, remote) = MemorySocket::pair(1024);
        let sender: Connection<String, String> =
            Connection::new(local, LinesCodec::new(), ConnectionConfig::default()).unwrap();
        let receiver: Connection<String, String> =
            Connection::new(remote, LinesCodec::new(), ConnectionConfig::default()).unwrap();

        let hello = sender.write("hello".to_string()).subscribe();
        let world = sender.write("world".to_string()).subscribe();
        sender.flush().await.unwrap();
        hello.await.unwrap();
        world.await.unwrap();

        let mut content = receiver.content();
        assert_eq!(content.next().await.unwrap().unwrap(), "hello");
        assert_eq!(content.next().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_write_stream_enqueues_in_order() {
        let (local, _remote) = MemorySocket::pair(1024);
        let connection = RawConnection::raw(local, ConnectionConfig::default()).unwrap();

        let action = connection.write_stream(|| {
            stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"1")),
                Ok(Bytes::from_static(b"2")),
            ])
        });
        let result = action.subscribe();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(connection.pending_writes(), 2);

        connection.flush().await.unwrap();
        result.await.unwrap();
        assert_eq!(connection.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let (local, _remote) = MemorySocket::pair(1024);
        let connection = RawConnection::raw(local, ConnectionConfig::default()).unwrap();
        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.closed().await })
        };

        connection.close().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_subscriber_is_logged() {
        let (local, _remote) = MemorySocket::pair(1024);
        let connection = RawConnection::raw(local, ConnectionConfig::default()).unwrap();
        connection.ignore_content();
        connection.ignore_content();
        assert!(logs_contain("Rejecting content subscriber"));
    }
}
