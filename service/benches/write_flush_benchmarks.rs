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

//! Write/flush throughput over in-memory sockets

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use reactcp_service::{ConnectionConfig, RawConnection, WriteQueue};
use reactcp_transport::MemorySocket;
use std::hint::black_box;
use tokio::runtime::Runtime;

/// Connected pair whose remote end drains everything it receives
fn connection_pair(rt: &Runtime) -> (RawConnection, RawConnection) {
    let _guard = rt.enter();
    let (local, remote) = MemorySocket::pair(256 * 1024);
    let local = RawConnection::raw(local, ConnectionConfig::default()).unwrap();
    let remote = RawConnection::raw(remote, ConnectionConfig::default()).unwrap();
    remote.ignore_content();
    (local, remote)
}

fn bench_write_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_queue");

    group.bench_function("enqueue_capture_64", |b| {
        b.iter(|| {
            let mut queue = WriteQueue::new();
            for _ in 0..64 {
                drop(queue.enqueue(Bytes::from_static(b"payload")));
            }
            black_box(queue.capture())
        })
    });

    group.finish();
}

fn bench_write_flush(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (connection, _remote) = connection_pair(&rt);
    let payload = Bytes::from(vec![b'A'; 128]);
    let mut group = c.benchmark_group("write_flush");

    for writes in [1usize, 16, 256] {
        group.throughput(Throughput::Bytes((writes * payload.len()) as u64));
        group.bench_with_input(BenchmarkId::new("batch", writes), &writes, |b, &writes| {
            b.to_async(&rt).iter(|| async {
                let results: Vec<_> = (0..writes)
                    .map(|_| connection.write(black_box(payload.clone())).subscribe())
                    .collect();
                connection.flush().await.unwrap();
                try_join_all(results).await.unwrap();
            })
        });
    }

    group.bench_function("write_and_flush", |b| {
        b.to_async(&rt).iter(|| async {
            connection
                .write_and_flush(black_box(payload.clone()))
                .await
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_write_queue, bench_write_flush);
criterion_main!(benches);
