// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of running pipelines, keyed by source identifier.
//!
//! The registry lock only guards structural changes of the map. Resolving the
//! configuration, building the HTTP client and tearing a pipeline down all
//! happen outside of it, so a slow collector never blocks `start` or `stop`
//! for other sources. Client construction reads certificate files and runs on
//! the blocking pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::errors::DriverError;
use crate::flusher::Flusher;
use crate::pipeline::Pipeline;
use crate::settings::DriverSettings;

/// Log driver holding one pipeline per logged source.
#[derive(Debug, Default)]
pub struct Driver {
    settings: DriverSettings,
    pipelines: Mutex<HashMap<String, Arc<Pipeline>>>,
}

impl Driver {
    #[must_use]
    pub fn new(settings: DriverSettings) -> Self {
        Driver {
            settings,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<String, Arc<Pipeline>>> {
        // the map stays consistent even if a holder panicked
        match self.pipelines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts shipping the logs of `source_id`, read from `stream`.
    ///
    /// Fails with [`DriverError::AlreadyStarted`] if the source is already
    /// being logged, leaving the running pipeline untouched, and with
    /// [`DriverError::Config`] if the collector URL is missing or invalid.
    /// Every other option falls back to its default.
    pub async fn start<R>(
        &self,
        source_id: &str,
        options: &HashMap<String, String>,
        stream: R,
    ) -> Result<Arc<Pipeline>, DriverError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if self.contains(source_id) {
            return Err(DriverError::AlreadyStarted(source_id.to_string()));
        }

        let config = Arc::new(PipelineConfig::resolve(options)?);
        let settings = self.settings.clone();
        let flusher = tokio::task::spawn_blocking(move || Flusher::new(config, &settings))
            .await
            .map_err(|source| DriverError::Setup {
                source_id: source_id.to_string(),
                source,
            })?;

        let mut pipelines = self.pipelines();
        if pipelines.contains_key(source_id) {
            return Err(DriverError::AlreadyStarted(source_id.to_string()));
        }
        let pipeline = Arc::new(Pipeline::spawn(source_id, flusher, stream));
        pipelines.insert(source_id.to_string(), Arc::clone(&pipeline));
        drop(pipelines);

        info!("LOGS | Started logging {source_id}");
        Ok(pipeline)
    }

    /// Stops shipping the logs of `source_id`.
    ///
    /// Records already queued get one last flush, bounded by the teardown
    /// timeout. Stopping a source that is not being logged succeeds.
    pub async fn stop(&self, source_id: &str) -> Result<(), DriverError> {
        let removed = self.pipelines().remove(source_id);
        let Some(pipeline) = removed else {
            debug!("LOGS | Stop requested for {source_id}, which is not being logged");
            return Ok(());
        };

        pipeline.shutdown(self.settings.teardown_timeout).await;
        info!("LOGS | Stopped logging {source_id}");
        Ok(())
    }

    /// Stops every pipeline.
    pub async fn shutdown(&self) {
        let pipelines: Vec<_> = self.pipelines().drain().map(|(_, p)| p).collect();
        if pipelines.is_empty() {
            return;
        }
        debug!("LOGS | Shutting down {} pipelines", pipelines.len());

        let timeout = self.settings.teardown_timeout;
        futures::future::join_all(pipelines.iter().map(|p| p.shutdown(timeout))).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines().is_empty()
    }

    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        self.pipelines().contains_key(source_id)
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<Arc<Pipeline>> {
        self.pipelines().get(source_id).cloned()
    }
}

#[cfg(unix)]
mod fifo {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use tokio::net::unix::pipe;

    use super::Driver;
    use crate::errors::DriverError;
    use crate::pipeline::Pipeline;

    /// Opens the named pipe the host writes a source's frames to.
    ///
    /// On Linux the pipe is opened read/write so the stream does not hit EOF
    /// while the host has not yet connected its writer.
    pub fn open_fifo(path: &Path) -> Result<pipe::Receiver, DriverError> {
        let mut options = pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options
            .open_receiver(path)
            .map_err(|source| DriverError::StreamOpen {
                path: path.display().to_string(),
                source,
            })
    }

    impl Driver {
        /// Like [`Driver::start`], reading frames from the FIFO at `path`.
        pub async fn start_fifo(
            &self,
            source_id: &str,
            options: &HashMap<String, String>,
            path: &Path,
        ) -> Result<Arc<Pipeline>, DriverError> {
            if self.contains(source_id) {
                return Err(DriverError::AlreadyStarted(source_id.to_string()));
            }
            let stream = open_fifo(path)?;
            self.start(source_id, options, stream).await
        }
    }
}

#[cfg(unix)]
pub use fifo::open_fifo;
