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

//! Client and server talking over real TCP

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reactcp_client::{ClientConfig, TcpClient};
use reactcp_server::{ServerConfig, TcpServer, handler_fn};
use reactcp_service::{Connection, ConnectionError, ConnectionState, Publisher, RawConnection};
use reactcp_testsuite::{Collector, Observed, eventually, line_client, start_line_echo};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_two_writes_then_flush() {
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<BytesMut>();
    let server = TcpServer::raw(ServerConfig::default());
    server
        .start(handler_fn(move |connection: RawConnection| {
            let received = received_tx.clone();
            async move {
                let mut content = connection.content();
                while let Some(chunk) = content.next().await {
                    let _ = received.send(chunk?);
                }
                Ok::<(), ConnectionError>(())
            }
        }))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let client = TcpClient::raw(ClientConfig::default().with_nodelay(true));
    let connection = client.connect_one(addr).await.unwrap();

    let first = connection.write(Bytes::from_static(b"A")).subscribe();
    let second = connection.write(Bytes::from_static(b"B")).subscribe();
    assert_eq!(connection.pending_writes(), 2);

    connection.flush().await.unwrap();
    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(connection.pending_writes(), 0);

    let mut received = Vec::new();
    while received.len() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), received_rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"AB");

    connection.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_line_echo_roundtrip() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let connection = line_client().connect_one(addr).await.unwrap();
    let mut lines = connection.content();

    connection
        .write_and_flush("hello".to_string())
        .await
        .unwrap();
    assert_eq!(lines.next().await.unwrap().unwrap(), "echo hello");

    let batch = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    connection
        .write_stream_and_flush(move || {
            futures::stream::iter(batch.clone()).map(Ok::<_, ConnectionError>)
        })
        .await
        .unwrap();
    for expected in ["echo one", "echo two", "echo three"] {
        assert_eq!(lines.next().await.unwrap().unwrap(), expected);
    }

    connection.close().await.unwrap();
    assert!(server.drain(Duration::from_secs(2)).await);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut sessions = Vec::new();
    for index in 0..8 {
        sessions.push(tokio::spawn(async move {
            let connection = line_client().connect_one(addr).await.unwrap();
            let mut lines = connection.content();
            for round in 0..4 {
                let message = format!("client {index} round {round}");
                connection.write_and_flush(message.clone()).await.unwrap();
                assert_eq!(lines.next().await.unwrap().unwrap(), format!("echo {message}"));
            }
            connection.close().await.unwrap();
        }));
    }
    for session in sessions {
        session.await.unwrap();
    }

    assert!(server.drain(Duration::from_secs(2)).await);
    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.connections_accepted, 8);
    assert_eq!(snapshot.handlers_completed, 8);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_close_completes_client_content() {
    let server = TcpServer::raw(ServerConfig::default());
    server
        .start(handler_fn(|connection: RawConnection| async move {
            connection
                .write_and_flush(Bytes::from_static(b"bye"))
                .await?;
            Ok::<(), ConnectionError>(())
        }))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let connection = TcpClient::raw(ClientConfig::default())
        .connect_one(addr)
        .await
        .unwrap();
    let mut received = Vec::new();
    let mut content = connection.content();
    while let Some(chunk) = content.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, b"bye");
    assert_eq!(connection.state(), ConnectionState::Open);

    connection.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropping_client_content_closes_both_sides() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let connection = line_client().connect_one(addr).await.unwrap();
    let lines = connection.content();
    eventually(|| server.active_handlers() == 1).await;

    drop(lines);
    tokio::time::timeout(Duration::from_secs(2), connection.closed())
        .await
        .unwrap();
    let err = connection.write("late".to_string()).await.unwrap_err();
    assert!(matches!(err, ConnectionError::ConnectionClosed));

    assert!(server.drain(Duration::from_secs(2)).await);
    assert_eq!(server.metrics().snapshot().handlers_completed, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connector_delivers_requested_connections() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let connector = line_client().connect(addr);
    let (collector, mut signals, mut subscriptions) =
        Collector::<Connection<String, String>>::new(3);
    connector.subscribe(Box::new(collector));

    let mut connections = Vec::new();
    for _ in 0..3 {
        match signals.recv().await.unwrap() {
            Observed::Next(connection) => connections.push(connection),
            other => panic!("unexpected signal: {other:?}"),
        }
    }
    eventually(|| server.metrics().connections_accepted() == 3).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(signals.try_recv().is_err());
    assert_eq!(server.metrics().connections_accepted(), 3);

    let subscription = subscriptions.recv().await.unwrap();
    subscription.cancel();
    for connection in connections {
        connection.close().await.unwrap();
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_twice_keeps_first_handler() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let err = server
        .start(handler_fn(|_connection: Connection<String, String>| async move {
            Err::<(), _>(ConnectionError::IllegalState("replacement".into()))
        }))
        .await
        .unwrap_err();
    assert!(err.is_lifecycle_misuse());

    let connection = line_client().connect_one(addr).await.unwrap();
    let mut lines = connection.content();
    connection.write_and_flush("still".to_string()).await.unwrap();
    assert_eq!(lines.next().await.unwrap().unwrap(), "echo still");

    connection.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_after_shutdown_fails() {
    let server = start_line_echo(ServerConfig::default()).await.unwrap();
    let addr = server.local_addr().unwrap();
    server.shutdown().await.unwrap();
    assert!(!server.is_running());

    let err = line_client().connect_one(addr).await.unwrap_err();
    assert!(err.is_transport_failure());
}
