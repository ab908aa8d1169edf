// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log driver.

use reqwest::StatusCode;

/// Failure to resolve a pipeline configuration.
///
/// Only the collector URL is validated strictly, every other option falls
/// back to its default when it cannot be used.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required option '{0}'")]
    MissingUrl(&'static str),

    #[error("invalid collector url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors returned by the driver registry.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("logging already started for '{0}'")]
    AlreadyStarted(String),

    #[error("failed to set up pipeline for '{source_id}': {source}")]
    Setup {
        source_id: String,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("failed to open log stream '{path}': {source}")]
    StreamOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while decoding frames from a log stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read frame: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode log entry: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Outcome of a single failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// The body could not be built, retrying will not help.
    #[error("failed to prepare payload: {0}")]
    Payload(String),

    /// The collector was unreachable or answered with a non-2xx status.
    #[error("error shipping logs: {1} (status: {0:?})")]
    Destination(Option<StatusCode>, String),
}
