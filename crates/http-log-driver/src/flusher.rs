// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches to the HTTP collector.
//!
//! ```text
//!   Batch ──> body (one line per record) ──> gzip? ──> POST ──> 2xx?
//!                                                       ^         │ no
//!                                                       └─ retry ─┘
//! ```
//!
//! Delivery is best effort: a batch that still fails once the retry strategy
//! is exhausted is logged and dropped. Failures never reach the reader or the
//! registry.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use bytes::{BufMut, BytesMut};
use flate2::write::GzEncoder;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, error, warn};

use crate::config::PipelineConfig;
use crate::errors::ShippingError;
use crate::http::get_client;
use crate::record::Record;
use crate::settings::{DriverSettings, RetryStrategy};

/// Ships the batches of one pipeline.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    config: Arc<PipelineConfig>,
    retry_strategy: RetryStrategy,
    headers: HeaderMap,
}

impl Flusher {
    #[must_use]
    pub fn new(config: Arc<PipelineConfig>, settings: &DriverSettings) -> Self {
        let client = get_client(&config, settings.request_timeout);
        let headers = build_headers(&config);
        Flusher {
            client,
            config,
            retry_strategy: settings.retry_strategy,
            headers,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    /// Delivers a batch, retrying per the strategy, then discards it.
    ///
    /// Returns whether the collector accepted the batch. An empty batch is a
    /// no-op and makes no request.
    pub async fn flush(&self, batch: Vec<Record>) -> bool {
        if batch.is_empty() {
            return true;
        }

        let records = batch.len();
        let body = match self.build_payload(&batch) {
            Ok(body) => body,
            Err(e) => {
                error!("LOGS | Dropping {records} records: {e}");
                return false;
            }
        };

        match self.send(body).await {
            Ok(()) => {
                debug!(
                    "LOGS | Flushed {records} records to {}",
                    self.config.endpoint_url
                );
                true
            }
            Err(e) => {
                error!("LOGS | Dropping {records} records after failed delivery: {e}");
                false
            }
        }
    }

    /// Serializes the batch and compresses it when enabled.
    pub fn build_payload(&self, batch: &[Record]) -> Result<Vec<u8>, ShippingError> {
        let body = encode_body(batch);
        if !self.config.compression_enabled {
            return Ok(body);
        }
        self.compress(&body)
            .map_err(|e| ShippingError::Payload(format!("failed to compress batch: {e}")))
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            self.config.compression(),
        );
        encoder.write_all(data)?;
        encoder.finish()
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), ShippingError> {
        let body = bytes::Bytes::from(body);
        let max_attempts = self.retry_strategy.attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let time = Instant::now();
            let resp = self
                .client
                .post(self.config.endpoint_url.clone())
                .headers(self.headers.clone())
                .body(body.clone())
                .send()
                .await;
            let elapsed = time.elapsed();

            let failure = match resp {
                Ok(resp) if resp.status().is_success() => {
                    debug!(
                        "LOGS | Collector accepted batch in {} ms",
                        elapsed.as_millis()
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    ShippingError::Destination(Some(status), text)
                }
                Err(e) => ShippingError::Destination(e.status(), e.to_string()),
            };

            if attempts >= max_attempts {
                return Err(failure);
            }

            let delay = self.retry_strategy.delay(attempts);
            warn!(
                "LOGS | Attempt {attempts}/{max_attempts} failed after {} ms: {failure}, retrying in {} ms",
                elapsed.as_millis(),
                delay.as_millis()
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// One line per record, in queue order. Partial records carry no newline so
/// they join the record that completes them.
fn encode_body(batch: &[Record]) -> Vec<u8> {
    let len = batch.iter().map(Record::encoded_len).sum();
    let mut body = BytesMut::with_capacity(len);
    for record in batch {
        body.put_slice(&record.line);
        if !record.partial {
            body.put_u8(b'\n');
        }
    }
    body.to_vec()
}

fn build_headers(config: &PipelineConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    if config.compression_enabled {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    headers
}
