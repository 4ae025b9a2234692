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

//! Dispatch and lifecycle tests over real TCP sockets

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reactcp_server::{ConnectionHandler, ServerConfig, TcpServer, handler_fn};
use reactcp_service::{ConnectionError, RawConnection};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn echo() -> impl ConnectionHandler<BytesMut, Bytes> {
    handler_fn(|connection: RawConnection| async move {
        let mut content = connection.content();
        while let Some(chunk) = content.next().await {
            connection.write_and_flush(chunk?.freeze()).await?;
        }
        Ok::<(), ConnectionError>(())
    })
}

fn parked() -> impl ConnectionHandler<BytesMut, Bytes> {
    handler_fn(|connection: RawConnection| async move {
        connection.ignore_content();
        connection.closed().await;
        Ok::<(), ConnectionError>(())
    })
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn roundtrip(client: &mut TcpStream, message: &[u8]) -> Vec<u8> {
    client.write_all(message).await.unwrap();
    let mut received = vec![0u8; message.len()];
    client.read_exact(&mut received).await.unwrap();
    received
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let server = TcpServer::raw(ServerConfig::default());
    server.start(echo()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(roundtrip(&mut client, b"hello").await, b"hello");
    assert_eq!(roundtrip(&mut client, b"again").await, b"again");

    drop(client);
    assert!(server.drain(Duration::from_secs(2)).await);
    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.connections_accepted, 1);
    assert_eq!(snapshot.handlers_completed, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_start_keeps_first_handler() {
    let server = TcpServer::raw(ServerConfig::default());
    server.start(echo()).await.unwrap();

    let rejected = server
        .start(handler_fn(|connection: RawConnection| async move {
            connection
                .write_and_flush(Bytes::from_static(b"wrong handler"))
                .await
        }))
        .await;
    assert!(matches!(rejected, Err(ConnectionError::IllegalState(_))));

    let mut client = TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(roundtrip(&mut client, b"ping").await, b"ping");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_max_connections_bounds_accepts() {
    let server = TcpServer::raw(ServerConfig::default().with_max_connections(1));
    server.start(echo()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    assert_eq!(roundtrip(&mut first, b"1").await, b"1");

    // Completes the TCP handshake through the backlog but is not accepted yet
    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(b"2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.metrics().connections_accepted(), 1);
    assert_eq!(server.active_handlers(), 1);

    drop(first);
    let mut received = [0u8; 1];
    second.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"2");
    assert_eq!(server.metrics().connections_accepted(), 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_handlers_closes_connections() {
    let server = TcpServer::raw(ServerConfig::default());
    server.start(parked()).await.unwrap();

    let mut client = TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    eventually(|| server.active_handlers() == 1).await;
    assert!(!server.drain(Duration::from_millis(50)).await);

    assert_eq!(server.cancel_handlers(), 1);
    assert!(server.drain(Duration::from_secs(2)).await);
    assert_eq!(server.metrics().snapshot().handlers_cancelled, 1);

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_keeps_dispatched_connections() {
    let server = TcpServer::raw(ServerConfig::default());
    server.start(echo()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(roundtrip(&mut client, b"before").await, b"before");

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
    assert_eq!(roundtrip(&mut client, b"after").await, b"after");
    assert!(TcpStream::connect(addr).await.is_err());

    drop(client);
    assert!(server.drain(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_handler_failure_is_counted() {
    let server = TcpServer::raw(ServerConfig::default());
    server
        .start(handler_fn(|_connection: RawConnection| async move {
            Err::<(), _>(ConnectionError::IllegalState("refused".to_string()))
        }))
        .await
        .unwrap();

    let mut client = TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();

    assert!(server.drain(Duration::from_secs(2)).await);
    assert_eq!(server.metrics().snapshot().handler_failures, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_and_await_returns_after_shutdown() {
    let server = std::sync::Arc::new(TcpServer::raw(ServerConfig::default()));
    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.start_and_await(parked()).await })
    };

    eventually(|| server.is_running()).await;
    server.shutdown().await.unwrap();
    running.await.unwrap().unwrap();
}
