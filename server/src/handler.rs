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

//! Connection handlers

use async_trait::async_trait;
use reactcp_service::{Connection, Result};
use std::future::Future;

/// Processes one dispatched connection
///
/// The server spawns the returned future; polling it is what starts the
/// processing. When the server cancels a handler the future is dropped and the
/// connection closed, so handlers should hold the connection's content stream
/// rather than detach work onto other tasks.
///
/// # Example
///
/// ```no_run
/// use reactcp_server::ConnectionHandler;
/// use reactcp_service::{RawConnection, Result};
/// use async_trait::async_trait;
/// use bytes::{Bytes, BytesMut};
/// use futures::StreamExt;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ConnectionHandler<BytesMut, Bytes> for Echo {
///     async fn handle(&self, connection: RawConnection) -> Result<()> {
///         let mut content = connection.content();
///         while let Some(chunk) = content.next().await {
///             connection.write_and_flush(chunk?.freeze()).await?;
///         }
///         connection.close().await
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionHandler<R: Send + 'static, W: Send + 'static>: Send + Sync + 'static {
    /// Process the connection until done
    async fn handle(&self, connection: Connection<R, W>) -> Result<()>;
}

/// Adapter turning an async closure into a [`ConnectionHandler`]
#[derive(Debug, Clone)]
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`ConnectionHandler`]
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut, R, W> ConnectionHandler<R, W> for HandlerFn<F>
where
    F: Fn(Connection<R, W>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
    R: Send + 'static,
    W: Send + 'static,
{
    async fn handle(&self, connection: Connection<R, W>) -> Result<()> {
        (self.0)(connection).await
    }
}
