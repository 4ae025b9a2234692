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

//! Demand-driven publish/subscribe primitives
//!
//! A [`Publisher`] delivers items to a [`Subscriber`] only as far as the
//! subscriber has authorized through its [`Subscription`]. Demand is an
//! explicit credit counter: `request(n)` adds `n` credits, every delivered item
//! consumes one, and a producer with zero credit suspends. `request(u64::MAX)`
//! grants unbounded demand.
//!
//! Signals follow the usual order: exactly one `on_subscribe`, then any number
//! of `on_next`, then at most one of `on_error` or `on_complete`. Nothing is
//! signalled after the subscriber cancels.

use crate::{ConnectionError, Result};
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Demand value meaning "deliver without limit"
pub const UNBOUNDED: u64 = u64::MAX;

/// Receiver of a demand-driven item sequence
pub trait Subscriber<T>: Send + 'static {
    /// Called once, before any other signal
    fn on_subscribe(&mut self, subscription: Subscription);

    /// Called for every delivered item, never beyond outstanding demand
    fn on_next(&mut self, item: T);

    /// Terminal failure signal
    fn on_error(&mut self, error: ConnectionError);

    /// Terminal success signal
    fn on_complete(&mut self);
}

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        (**self).on_subscribe(subscription)
    }

    fn on_next(&mut self, item: T) {
        (**self).on_next(item)
    }

    fn on_error(&mut self, error: ConnectionError) {
        (**self).on_error(error)
    }

    fn on_complete(&mut self) {
        (**self).on_complete()
    }
}

/// Source of a demand-driven item sequence
pub trait Publisher<T> {
    /// Attach a subscriber
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

type CancelHook = Box<dyn FnOnce() + Send>;

struct DemandState {
    credit: Mutex<u64>,
    wakeup: Notify,
    cancel: CancellationToken,
    on_cancel: Mutex<Option<CancelHook>>,
}

impl std::fmt::Debug for DemandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandState")
            .field("credit", &self.credit)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Handle through which a subscriber signals demand or cancels
///
/// Clones share the same credit counter.
#[derive(Debug, Clone)]
pub struct Subscription {
    state: Arc<DemandState>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    /// Create a subscription with zero credit
    pub fn new() -> Self {
        Self {
            state: Arc::new(DemandState {
                credit: Mutex::new(0),
                wakeup: Notify::new(),
                cancel: CancellationToken::new(),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Create a subscription that is already cancelled
    ///
    /// Handed to subscribers that are rejected before any delivery.
    pub fn inert() -> Self {
        let subscription = Self::new();
        subscription.state.cancel.cancel();
        subscription
    }

    /// Authorize delivery of `n` more items
    pub fn request(&self, n: u64) {
        if n == 0 {
            warn!("Ignoring request for zero items");
            return;
        }
        let mut credit = self
            .state
            .credit
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *credit = credit.saturating_add(n);
        trace!(requested = n, outstanding = *credit, "Demand requested");
        drop(credit);
        self.state.wakeup.notify_one();
    }

    /// Stop delivery. Idempotent.
    ///
    /// Side effects bound to the subscription (closing a connection) have
    /// taken place when this returns.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
        let hook = self
            .state
            .on_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Run `hook` exactly once when the subscription is cancelled
    ///
    /// Runs immediately if it already is.
    pub(crate) fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut slot = self
                .state
                .on_cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_cancelled() {
                *slot = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Check whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Credit not yet consumed
    pub fn outstanding(&self) -> u64 {
        *self
            .state
            .credit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for one credit and consume it
    ///
    /// Returns `false` once the subscription is cancelled.
    pub(crate) async fn acquire(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            {
                let mut credit = self
                    .state
                    .credit
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if *credit > 0 {
                    if *credit != UNBOUNDED {
                        *credit -= 1;
                    }
                    return true;
                }
            }
            tokio::select! {
                _ = self.state.wakeup.notified() => {}
                _ = self.state.cancel.cancelled() => return false,
            }
        }
    }

    /// Give back a credit that was acquired but not used for a delivery
    pub(crate) fn restore(&self) {
        let mut credit = self
            .state
            .credit
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *credit = credit.saturating_add(1);
        drop(credit);
        self.state.wakeup.notify_one();
    }

    /// Resolves once the subscription is cancelled
    pub(crate) async fn cancelled(&self) {
        self.state.cancel.cancelled().await
    }
}

enum Signal<T> {
    Subscribed(Subscription),
    Next(T),
    Error(ConnectionError),
    Complete,
}

struct ChannelSubscriber<T> {
    signals: mpsc::UnboundedSender<Signal<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let _ = self.signals.send(Signal::Subscribed(subscription));
    }

    fn on_next(&mut self, item: T) {
        let _ = self.signals.send(Signal::Next(item));
    }

    fn on_error(&mut self, error: ConnectionError) {
        let _ = self.signals.send(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.signals.send(Signal::Complete);
    }
}

/// Adapt a publisher into a [`Stream`]
///
/// The stream requests `prefetch` items whenever it is polled with no demand
/// outstanding, so the publisher never runs further ahead of the consumer than
/// `prefetch` items. Dropping the stream before it terminates cancels the
/// subscription.
pub fn into_stream<T, P>(publisher: &P, prefetch: u64) -> SubscriberStream<T>
where
    T: Send + 'static,
    P: Publisher<T> + ?Sized,
{
    let (signals, receiver) = mpsc::unbounded_channel();
    publisher.subscribe(Box::new(ChannelSubscriber { signals }));
    SubscriberStream {
        receiver,
        subscription: None,
        prefetch: prefetch.max(1),
        outstanding: 0,
        terminated: false,
    }
}

/// [`Stream`] view of a subscription, created by [`into_stream`]
pub struct SubscriberStream<T> {
    receiver: mpsc::UnboundedReceiver<Signal<T>>,
    subscription: Option<Subscription>,
    prefetch: u64,
    outstanding: u64,
    terminated: bool,
}

impl<T> SubscriberStream<T> {
    /// Cancel the underlying subscription
    pub fn cancel(&mut self) {
        self.terminated = true;
        if let Some(subscription) = self.subscription_handle() {
            subscription.cancel();
        }
    }

    fn subscription_handle(&mut self) -> Option<Subscription> {
        if self.subscription.is_none() {
            while let Ok(signal) = self.receiver.try_recv() {
                if let Signal::Subscribed(subscription) = signal {
                    self.subscription = Some(subscription);
                    break;
                }
            }
        }
        self.subscription.clone()
    }
}

impl<T> Stream for SubscriberStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.terminated {
            return Poll::Ready(None);
        }
        loop {
            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(Signal::Subscribed(subscription))) => {
                    this.subscription = Some(subscription);
                }
                Poll::Ready(Some(Signal::Next(item))) => {
                    this.outstanding = this.outstanding.saturating_sub(1);
                    return Poll::Ready(Some(Ok(item)));
                }
                Poll::Ready(Some(Signal::Error(error))) => {
                    this.terminated = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(Signal::Complete)) | Poll::Ready(None) => {
                    this.terminated = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if this.outstanding == 0 {
                        if let Some(subscription) = &this.subscription {
                            subscription.request(this.prefetch);
                            this.outstanding = this.prefetch;
                        }
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<T> Drop for SubscriberStream<T> {
    fn drop(&mut self) {
        if !self.terminated {
            self.cancel();
        }
    }
}

impl<T> std::fmt::Debug for SubscriberStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberStream")
            .field("prefetch", &self.prefetch)
            .field("outstanding", &self.outstanding)
            .field("terminated", &self.terminated)
            .finish()
    }
}
