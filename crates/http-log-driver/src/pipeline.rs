// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-source pipelines.
//!
//! A pipeline is one reader task feeding a bounded queue and one batcher task
//! draining it into the flusher. Both tasks share a cancellation token that
//! [`Pipeline::shutdown`] fires.
//!
//! # Graceful Shutdown
//!
//! - The reader stops and drops its end of the queue.
//! - The batcher drains what is already queued and flushes it once more.
//! - If the tasks outlive the teardown timeout they are aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::PipelineConfig;
use crate::flusher::Flusher;
use crate::reader::read_frames;
use crate::record::Record;

/// Accumulates records and hands them to the flusher on size or time.
pub struct Batcher {
    rx: Receiver<Record>,
    flusher: Flusher,
    batch_size: usize,
    flush_interval: Duration,
    cancel_token: CancellationToken,
    batch: Vec<Record>,
}

impl Batcher {
    #[must_use]
    pub fn new(rx: Receiver<Record>, flusher: Flusher, cancel_token: CancellationToken) -> Self {
        let batch_size = flusher.config().batch_size;
        let flush_interval = flusher.config().flush_interval;
        Batcher {
            rx,
            flusher,
            batch_size,
            flush_interval,
            cancel_token,
            batch: Vec::new(),
        }
    }

    /// Runs until the queue closes or the pipeline is cancelled.
    ///
    /// Flushes are awaited inline so a pipeline never has more than one
    /// request in flight and batches reach the collector in queue order.
    pub async fn run(mut self) {
        let mut flush_interval = interval(self.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_interval.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("LOGS | Received shutdown signal, draining remaining records");
                    self.drain().await;
                    break;
                }
                record = self.rx.recv() => {
                    let Some(record) = record else {
                        debug!("LOGS | Intake queue closed, flushing remaining records");
                        self.flush().await;
                        break;
                    };
                    self.batch.push(record);
                    if self.batch.len() >= self.batch_size {
                        self.flush().await;
                        flush_interval.reset();
                    }
                }
                _ = flush_interval.tick() => {
                    self.flush().await;
                }
            }
        }
    }

    async fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(record) => {
                    self.batch.push(record);
                    if self.batch.len() >= self.batch_size {
                        self.flush().await;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        self.flusher.flush(batch).await;
    }
}

struct PipelineTasks {
    reader: JoinHandle<()>,
    batcher: JoinHandle<()>,
}

/// A running pipeline for one log source.
pub struct Pipeline {
    source_id: String,
    config: Arc<PipelineConfig>,
    cancel_token: CancellationToken,
    tasks: Mutex<Option<PipelineTasks>>,
    closed: AtomicBool,
}

impl Pipeline {
    /// Spawns the reader and batcher tasks on the current runtime.
    pub fn spawn<R>(source_id: &str, flusher: Flusher, stream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let config = Arc::clone(flusher.config());
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Record>(config.queue_capacity);

        let span = info_span!("pipeline", source = %source_id);
        let reader = tokio::spawn(
            {
                let source_id = source_id.to_string();
                let cancel_token = cancel_token.clone();
                async move {
                    read_frames(&source_id, stream, tx, cancel_token).await;
                }
            }
            .instrument(span.clone()),
        );
        let batcher = tokio::spawn(
            Batcher::new(rx, flusher, cancel_token.clone())
                .run()
                .instrument(span),
        );

        debug!(
            "LOGS | Started pipeline for {source_id} to {}",
            config.endpoint_url
        );

        Pipeline {
            source_id: source_id.to_string(),
            config,
            cancel_token,
            tasks: Mutex::new(Some(PipelineTasks { reader, batcher })),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops both tasks, giving the batcher up to `timeout` for its final
    /// flush. Calling it again is a no-op.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_token.cancel();

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => tasks.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(PipelineTasks {
            mut reader,
            mut batcher,
        }) = tasks
        else {
            return;
        };

        let joined = tokio::time::timeout(timeout, async {
            let _ = (&mut reader).await;
            let _ = (&mut batcher).await;
        })
        .await;

        if joined.is_err() {
            warn!(
                "LOGS | Pipeline for {} did not stop within {} ms, aborting",
                self.source_id,
                timeout.as_millis()
            );
            reader.abort();
            batcher.abort();
        } else {
            debug!("LOGS | Stopped pipeline for {}", self.source_id);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source_id", &self.source_id)
            .field("endpoint_url", &self.config.endpoint_url.as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OPT_BATCH_SIZE, OPT_SENDING_FREQUENCY, OPT_URL};
    use crate::record::{encode_frame, LogEntry};
    use crate::settings::{DriverSettings, RetryStrategy};
    use bytes::Bytes;
    use mockito::{Matcher, Server};
    use std::collections::HashMap;
    use tokio::io::AsyncWriteExt;

    fn flusher(url: &str, batch_size: &str, frequency: &str) -> Flusher {
        let options = HashMap::from([
            (OPT_URL.to_string(), url.to_string()),
            (OPT_BATCH_SIZE.to_string(), batch_size.to_string()),
            (OPT_SENDING_FREQUENCY.to_string(), frequency.to_string()),
        ]);
        let config = Arc::new(PipelineConfig::resolve(&options).unwrap());
        let settings = DriverSettings {
            retry_strategy: RetryStrategy::Immediate(1),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Flusher::new(config, &settings)
    }

    fn record(line: &'static str) -> Record {
        Record::new(line, 0, false)
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_full_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body("a\nb\nc\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(16);
        let cancel_token = CancellationToken::new();
        let batcher = Batcher::new(rx, flusher(&server.url(), "3", "1h"), cancel_token.clone());
        let handle = tokio::spawn(batcher.run());

        for line in ["a", "b", "c"] {
            tx.send(record(line)).await.unwrap();
        }

        // the batch goes out on size alone, long before the hourly tick
        for _ in 0..100 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.assert_async().await;

        cancel_token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_size_trigger_splits_batches() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .match_body("1\n2\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_body("3\n4\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let rest = server
            .mock("POST", "/")
            .match_body("5\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(16);
        let batcher = Batcher::new(rx, flusher(&server.url(), "2", "1h"), CancellationToken::new());
        let handle = tokio::spawn(batcher.run());

        for line in ["1", "2", "3", "4", "5"] {
            tx.send(record(line)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        rest.assert_async().await;
    }

    #[tokio::test]
    async fn test_unbounded_batch_size_allocates_on_demand() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body("x\ny\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let options = HashMap::from([(OPT_URL.to_string(), server.url())]);
        let mut config = PipelineConfig::resolve(&options).unwrap();
        config.batch_size = usize::MAX;
        let flusher = Flusher::new(Arc::new(config), &DriverSettings::default());

        let (tx, rx) = mpsc::channel(16);
        let batcher = Batcher::new(rx, flusher, CancellationToken::new());
        assert_eq!(batcher.batch.capacity(), 0);
        let handle = tokio::spawn(batcher.run());

        tx.send(record("x")).await.unwrap();
        tx.send(record("y")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_ticks_make_no_requests() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let (_tx, rx) = mpsc::channel::<Record>(16);
        let cancel_token = CancellationToken::new();
        let batcher = Batcher::new(rx, flusher(&server.url(), "10", "10ms"), cancel_token.clone());
        let handle = tokio::spawn(batcher.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_token.cancel();
        handle.await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_tick_flushes_partial_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body("only one\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(16);
        let cancel_token = CancellationToken::new();
        let batcher = Batcher::new(rx, flusher(&server.url(), "100", "50ms"), cancel_token.clone());
        let handle = tokio::spawn(batcher.run());

        tx.send(record("only one")).await.unwrap();
        for _ in 0..100 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        cancel_token.cancel();
        handle.await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_drains_queue() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body("queued\nrecords\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(16);
        let cancel_token = CancellationToken::new();
        tx.send(record("queued")).await.unwrap();
        tx.send(record("records")).await.unwrap();
        cancel_token.cancel();

        // cancelled before it ever ran, the batcher still ships what was queued
        Batcher::new(rx, flusher(&server.url(), "100", "1h"), cancel_token)
            .run()
            .await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pipeline_shutdown_flushes_stream() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body("hello\nworld\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (mut host, stream) = tokio::io::duplex(1024);
        let pipeline = Pipeline::spawn("c1", flusher(&server.url(), "100", "1h"), stream);
        assert_eq!(pipeline.source_id(), "c1");
        assert!(!pipeline.is_closed());

        for line in ["hello", "world"] {
            let entry = LogEntry {
                source: "stdout".to_string(),
                time_nano: 0,
                line: Bytes::from_static(line.as_bytes()),
                partial: false,
            };
            host.write_all(&encode_frame(&entry)).await.unwrap();
        }
        // the host closes its end, the batcher flushes what is left
        drop(host);
        for _ in 0..100 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pipeline.shutdown(Duration::from_secs(1)).await;
        assert!(pipeline.is_closed());
        mock.assert_async().await;

        // idempotent
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_delivery() {
        // collector that accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _accept = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let (mut host, stream) = tokio::io::duplex(1024);
        let pipeline = Pipeline::spawn("c1", flusher(&url, "1", "1h"), stream);
        let entry = LogEntry {
            source: "stdout".to_string(),
            time_nano: 0,
            line: Bytes::from_static(b"stuck"),
            partial: false,
        };
        host.write_all(&encode_frame(&entry)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        pipeline.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(pipeline.is_closed());
    }
}
