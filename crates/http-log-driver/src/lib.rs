// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log driver that ships per-source log streams to an HTTP collector.
//!
//! Every source the host starts gets its own pipeline:
//!
//! ```text
//!   stream ──> Reader ──> intake queue ──> Batcher ──> Flusher ──> collector
//!              (frames)    (bounded)       (size/time)  (gzip, retry)
//! ```
//!
//! The [`driver::Driver`] registry owns the pipelines and exposes the
//! `start`/`stop` lifecycle to the host.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod driver;
pub mod errors;
pub mod flusher;
pub mod http;
pub mod logger;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod settings;
