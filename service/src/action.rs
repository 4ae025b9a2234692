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

//! Deferred operation results
//!
//! Write-side operations on a connection do not run when they are called.
//! They return an [`Action`], a cold description of the effect. Every
//! subscription to an action runs the effect again and yields a fresh
//! [`Completion`] for that run's outcome. [`SingleShot`] is the opposite: the
//! first subscription runs the effect once and every subscription, first
//! included, observes the same cached outcome.

use crate::flow::{Subscriber, Subscription};
use crate::{ConnectionError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Outcome of one subscription to an [`Action`]
///
/// The effect of the subscription has already happened (or continues in a
/// spawned task) by the time the completion exists. Dropping the completion
/// only discards the notification.
#[must_use = "a completion reports the outcome of an effect that already ran"]
pub struct Completion {
    inner: BoxFuture<'static, Result<()>>,
}

impl Completion {
    /// Completion that is already resolved
    pub fn ready(result: Result<()>) -> Self {
        Self::from_future(futures::future::ready(result))
    }

    /// Completion wrapping an arbitrary future
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// Completion resolved through a oneshot channel
    ///
    /// A sender dropped without answering reads as [`ConnectionError::ConnectionClosed`].
    pub(crate) fn from_receiver(receiver: oneshot::Receiver<Result<()>>) -> Self {
        Self::from_future(async move {
            receiver
                .await
                .unwrap_or(Err(ConnectionError::ConnectionClosed))
        })
    }

    /// Run `future` on its own task and complete with its output
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        Self::from_future(async move { handle.await.unwrap_or_else(|err| Err(join_failure(err))) })
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

fn join_failure(err: tokio::task::JoinError) -> ConnectionError {
    io::Error::other(err).into()
}

type Effect = dyn Fn() -> Completion + Send + Sync;

/// Cold, re-triggerable operation
///
/// # Example
///
/// ```no_run
/// # use reactcp_service::{RawConnection, Result};
/// # use bytes::Bytes;
/// # async fn example(connection: RawConnection) -> Result<()> {
/// let write = connection.write(Bytes::from_static(b"ping"));
/// let first = write.subscribe(); // enqueues once
/// let second = write.subscribe(); // enqueues again
/// connection.flush().await?;
/// first.await?;
/// second.await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Action {
    effect: Arc<Effect>,
}

impl Action {
    /// Create an action from an effect
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn() -> Completion + Send + Sync + 'static,
    {
        Self {
            effect: Arc::new(effect),
        }
    }

    /// Action whose every subscription fails with `error`
    pub fn failed(error: ConnectionError) -> Self {
        Self::new(move || Completion::ready(Err(error.clone())))
    }

    /// Run the effect now and return its completion
    pub fn subscribe(&self) -> Completion {
        (self.effect)()
    }

    /// Run the effect now, reporting the outcome to a subscriber
    ///
    /// The subscriber sees `on_subscribe`, then `on_complete` or `on_error`.
    /// Cancelling the subscription suppresses the terminal signal but not the
    /// effect.
    pub fn subscribe_with<S>(&self, mut subscriber: S)
    where
        S: Subscriber<()>,
    {
        let subscription = Subscription::new();
        subscriber.on_subscribe(subscription.clone());
        let completion = self.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = subscription.cancelled() => {}
                result = completion => match result {
                    Ok(()) => subscriber.on_complete(),
                    Err(err) => subscriber.on_error(err),
                },
            }
        });
    }
}

impl IntoFuture for Action {
    type Output = Result<()>;
    type IntoFuture = Completion;

    fn into_future(self) -> Completion {
        self.subscribe()
    }
}

impl IntoFuture for &Action {
    type Output = Result<()>;
    type IntoFuture = Completion;

    fn into_future(self) -> Completion {
        self.subscribe()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}

/// Runs an effect at most once and replays its outcome
#[derive(Default)]
pub struct SingleShot {
    outcome: OnceLock<Shared<BoxFuture<'static, Result<()>>>>,
}

impl SingleShot {
    /// Create an untriggered single-shot
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the effect if nobody has yet and return the shared outcome
    ///
    /// `effect` runs synchronously on the first call only. The future it
    /// returns is spawned, so it makes progress even if no caller polls.
    pub fn run<F, Fut>(&self, effect: F) -> Completion
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let outcome = self
            .outcome
            .get_or_init(|| {
                let handle = tokio::spawn(effect());
                async move { handle.await.unwrap_or_else(|err| Err(join_failure(err))) }
                    .boxed()
                    .shared()
            })
            .clone();
        Completion::from_future(outcome)
    }

    /// Check whether the effect has been triggered
    pub fn is_triggered(&self) -> bool {
        self.outcome.get().is_some()
    }
}

impl fmt::Debug for SingleShot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleShot")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
