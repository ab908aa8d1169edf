// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decodes the host's log stream into records.
//!
//! The reader is the single producer of a pipeline's intake queue. A full
//! queue blocks the reader instead of dropping records, which pushes back on
//! the host.

use futures::StreamExt;
use prost::Message;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::Sender;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::FrameError;
use crate::record::{LogEntry, Record, FRAME_LENGTH_PREFIX, MAX_FRAME_SIZE};

/// Why a reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The host closed the stream.
    EndOfStream,
    /// The stream could not be read or a frame could not be decoded.
    Failed,
    /// The pipeline is being torn down.
    Cancelled,
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_LENGTH_PREFIX)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Reads frames until the stream ends, fails, or `cancel_token` fires.
///
/// Dropping `tx` on return closes the queue so the batcher can drain it.
pub async fn read_frames<R>(
    source_id: &str,
    stream: R,
    tx: Sender<Record>,
    cancel_token: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FramedRead::new(stream, codec());
    let mut records: u64 = 0;

    let exit = loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => break ReaderExit::Cancelled,
            frame = frames.next() => frame,
        };

        let record = match frame.map(decode) {
            None => break ReaderExit::EndOfStream,
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                error!("LOGS | Stopped reading logs for {source_id}: {e}");
                break ReaderExit::Failed;
            }
        };

        tokio::select! {
            () = cancel_token.cancelled() => break ReaderExit::Cancelled,
            sent = tx.send(record) => {
                if sent.is_err() {
                    // batcher is gone, nothing left to feed
                    break ReaderExit::Cancelled;
                }
                records += 1;
            }
        }
    };

    debug!("LOGS | Reader for {source_id} exited ({exit:?}) after {records} records");
    exit
}

fn decode(frame: std::io::Result<bytes::BytesMut>) -> Result<Record, FrameError> {
    let entry = LogEntry::decode(frame?.freeze())?;
    Ok(Record::from(entry))
}
