// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and their framed wire representation.
//!
//! The host writes one frame per log line: a 4-byte big-endian length
//! followed by a protobuf encoded [`LogEntry`].

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;

/// Largest frame accepted from the host, length prefix excluded.
pub const MAX_FRAME_SIZE: usize = 2 * 1_024 * 1_024;

/// Size of the big-endian length prefix preceding every entry.
pub const FRAME_LENGTH_PREFIX: usize = 4;

/// Log entry as written by the host.
#[derive(Clone, PartialEq, Message)]
pub struct LogEntry {
    /// Name of the producing stream, e.g. `stdout` or `stderr`.
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    #[prost(bytes = "bytes", tag = "3")]
    pub line: Bytes,
    /// Set when the line was split by the host and continues in the next entry.
    #[prost(bool, tag = "4")]
    pub partial: bool,
}

/// A decoded log record travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: Bytes,
    pub time_nano: i64,
    pub partial: bool,
    pub source: String,
}

impl Record {
    pub fn new(line: impl Into<Bytes>, time_nano: i64, partial: bool) -> Self {
        Record {
            line: line.into(),
            time_nano,
            partial,
            source: String::new(),
        }
    }

    /// Bytes this record adds to a request body.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.line.len() + usize::from(!self.partial)
    }
}

impl From<LogEntry> for Record {
    fn from(entry: LogEntry) -> Self {
        Record {
            line: entry.line,
            time_nano: entry.time_nano,
            partial: entry.partial,
            source: entry.source,
        }
    }
}

/// Encodes an entry the way the host frames it on the stream.
#[must_use]
pub fn encode_frame(entry: &LogEntry) -> Bytes {
    let len = entry.encoded_len();
    let mut buf = BytesMut::with_capacity(FRAME_LENGTH_PREFIX + len);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(len as u32);
    // BytesMut grows on demand, encoding cannot run out of space
    let _ = entry.encode(&mut buf);
    buf.freeze()
}
