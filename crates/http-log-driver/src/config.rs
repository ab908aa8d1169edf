// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-pipeline configuration resolved from the host's log options.
//!
//! The host hands every pipeline a flat map of string options. Only the
//! collector URL is mandatory. Every other option is parsed leniently: a
//! value that is missing, unparsable or out of range resolves to the
//! documented default instead of failing the pipeline, so a typo in a tuning
//! knob never stops logs from flowing.
//!
//! | option                         | default             |
//! |--------------------------------|---------------------|
//! | `http-url`                     | required            |
//! | `http-proxy-url`               | none                |
//! | `http-insecure-skip-verify`    | `false`             |
//! | `http-server-name`             | `""`                |
//! | `http-root-ca-path`            | none                |
//! | `http-gzip-compression`        | `false`             |
//! | `http-gzip-compression-level`  | `6` (0..=9)         |
//! | `http-sending-frequency`       | `2s` (up to 24h)    |
//! | `http-queue-size`              | `4096` (up to 2^20) |
//! | `http-batch-size`              | `1000` (up to 2^16) |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use flate2::Compression;
use reqwest::Url;
use tracing::debug;

use crate::errors::ConfigError;

pub const OPT_URL: &str = "http-url";
pub const OPT_PROXY_URL: &str = "http-proxy-url";
pub const OPT_INSECURE_SKIP_VERIFY: &str = "http-insecure-skip-verify";
pub const OPT_SERVER_NAME: &str = "http-server-name";
pub const OPT_ROOT_CA_PATH: &str = "http-root-ca-path";
pub const OPT_GZIP_COMPRESSION: &str = "http-gzip-compression";
pub const OPT_GZIP_COMPRESSION_LEVEL: &str = "http-gzip-compression-level";
pub const OPT_SENDING_FREQUENCY: &str = "http-sending-frequency";
pub const OPT_QUEUE_SIZE: &str = "http-queue-size";
pub const OPT_BATCH_SIZE: &str = "http-batch-size";

pub const DEFAULT_INSECURE_SKIP_VERIFY: bool = false;
pub const DEFAULT_GZIP_COMPRESSION: bool = false;
pub const DEFAULT_SENDING_FREQUENCY: Duration = Duration::from_secs(2);
pub const DEFAULT_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Highest level accepted by the gzip encoder.
pub const MAX_GZIP_COMPRESSION_LEVEL: u32 = 9;

/// Ceilings on the tuning knobs. Larger values fall back to the defaults.
///
/// The queue bound stays well below what a tokio channel can hold, and the
/// interval bound keeps timer deadlines representable.
pub const MAX_QUEUE_SIZE: usize = 1 << 20;
pub const MAX_BATCH_SIZE: usize = 1 << 16;
pub const MAX_SENDING_FREQUENCY: Duration = Duration::from_secs(24 * 60 * 60);

/// Level used when none (or an unusable one) is configured.
#[must_use]
pub fn default_gzip_compression_level() -> u32 {
    Compression::default().level()
}

/// TLS settings applied to the collector connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Skip certificate verification entirely.
    pub insecure_skip_verify: bool,
    /// Name to verify the collector certificate against. Empty means the URL host.
    pub server_name: String,
    /// Extra PEM bundle trusted in addition to the native roots.
    pub root_ca_path: Option<PathBuf>,
}

/// Fully resolved configuration of a single pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub endpoint_url: Url,
    pub proxy_url: Option<Url>,
    pub tls: TlsConfig,
    pub compression_enabled: bool,
    pub compression_level: u32,
    /// How often accumulated records are flushed.
    pub flush_interval: Duration,
    /// Capacity of the intake queue between reader and batcher.
    pub queue_capacity: usize,
    /// Records per batch before an immediate flush.
    pub batch_size: usize,
}

impl PipelineConfig {
    /// Resolves a pipeline configuration from the host's log options.
    ///
    /// Fails only when the collector URL is missing or unusable; unknown keys
    /// are ignored.
    pub fn resolve(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let endpoint_url = parse_endpoint_url(options)?;

        let proxy_url = lookup(options, OPT_PROXY_URL)
            .and_then(|raw| lenient(OPT_PROXY_URL, raw, Url::parse(raw).ok()));

        let tls = TlsConfig {
            insecure_skip_verify: lookup(options, OPT_INSECURE_SKIP_VERIFY)
                .and_then(|raw| lenient(OPT_INSECURE_SKIP_VERIFY, raw, parse_bool(raw)))
                .unwrap_or(DEFAULT_INSECURE_SKIP_VERIFY),
            server_name: lookup(options, OPT_SERVER_NAME)
                .map(str::to_string)
                .unwrap_or_default(),
            root_ca_path: lookup(options, OPT_ROOT_CA_PATH)
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from),
        };

        let compression_enabled = lookup(options, OPT_GZIP_COMPRESSION)
            .and_then(|raw| lenient(OPT_GZIP_COMPRESSION, raw, parse_bool(raw)))
            .unwrap_or(DEFAULT_GZIP_COMPRESSION);

        let compression_level = lookup(options, OPT_GZIP_COMPRESSION_LEVEL)
            .and_then(|raw| {
                let level = raw
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|level| u32::try_from(level).ok())
                    .filter(|level| *level <= MAX_GZIP_COMPRESSION_LEVEL);
                lenient(OPT_GZIP_COMPRESSION_LEVEL, raw, level)
            })
            .unwrap_or_else(default_gzip_compression_level);

        let flush_interval = lookup(options, OPT_SENDING_FREQUENCY)
            .and_then(|raw| {
                let interval = humantime::parse_duration(raw.trim())
                    .ok()
                    .filter(|interval| {
                        !interval.is_zero() && *interval <= MAX_SENDING_FREQUENCY
                    });
                lenient(OPT_SENDING_FREQUENCY, raw, interval)
            })
            .unwrap_or(DEFAULT_SENDING_FREQUENCY);

        let queue_capacity = lookup(options, OPT_QUEUE_SIZE)
            .and_then(|raw| {
                lenient(OPT_QUEUE_SIZE, raw, parse_positive(raw, MAX_QUEUE_SIZE))
            })
            .unwrap_or(DEFAULT_QUEUE_SIZE);

        let batch_size = lookup(options, OPT_BATCH_SIZE)
            .and_then(|raw| {
                lenient(OPT_BATCH_SIZE, raw, parse_positive(raw, MAX_BATCH_SIZE))
            })
            .unwrap_or(DEFAULT_BATCH_SIZE);

        Ok(PipelineConfig {
            endpoint_url,
            proxy_url,
            tls,
            compression_enabled,
            compression_level,
            flush_interval,
            queue_capacity,
            batch_size,
        })
    }

    /// Gzip level as understood by the encoder.
    #[must_use]
    pub fn compression(&self) -> Compression {
        Compression::new(self.compression_level)
    }
}

fn parse_endpoint_url(options: &HashMap<String, String>) -> Result<Url, ConfigError> {
    let raw = lookup(options, OPT_URL)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or(ConfigError::MissingUrl(OPT_URL))?;

    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn lookup<'a>(options: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    options.get(key).map(String::as_str)
}

/// Passes a parsed value through, noting when the raw input was discarded.
fn lenient<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        debug!("LOGS | Ignoring invalid value '{raw}' for log option '{key}', using default");
    }
    parsed
}

/// Accepts the same spellings as the host's boolean log options.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Parses a count in `1..=max`.
fn parse_positive(raw: &str, max: usize) -> Option<usize> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|value| *value > 0)
        .and_then(|value| usize::try_from(value).ok())
        .filter(|value| *value <= max)
}
