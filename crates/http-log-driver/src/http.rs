// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for collector connections.
//!
//! Each pipeline owns one client built from its resolved TLS and proxy
//! settings. The client is reused for every batch so connections are pooled.
//!
//! TLS handling:
//! - `insecure_skip_verify` disables certificate verification.
//! - Otherwise certificates are verified against the native roots plus the
//!   optional `root_ca_path` bundle, whether or not a server name is set.
//! - `server_name` verifies the collector certificate against that name
//!   instead of the host in the collector URL.
//!
//! Every setting degrades on its own: a server name rustls rejects, an
//! unreadable bundle or an unusable proxy is logged and skipped while the
//! remaining settings still apply.
//!
//! Loading the native roots reads the filesystem. Build clients off the
//! async worker threads, e.g. with `tokio::task::spawn_blocking`.

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::ClientBuilder;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, error};

use crate::config::{PipelineConfig, TlsConfig};

static NATIVE_ROOTS: OnceLock<RootCertStore> = OnceLock::new();

/// Builds the client used to ship a pipeline's batches.
#[must_use]
pub fn get_client(config: &PipelineConfig, timeout: Duration) -> reqwest::Client {
    match build_client(config, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "LOGS | Failed to build HTTP client: {}, using reqwest defaults",
                e
            );
            reqwest::Client::new()
        }
    }
}

fn build_client(
    config: &PipelineConfig,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    builder = apply_tls(builder, &config.tls);

    if let Some(proxy_url) = &config.proxy_url {
        match reqwest::Proxy::all(proxy_url.clone()) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => error!("LOGS | Ignoring proxy {}: {}", proxy_url, e),
        }
    }

    builder.build()
}

fn apply_tls(builder: ClientBuilder, tls: &TlsConfig) -> ClientBuilder {
    if tls.insecure_skip_verify {
        return builder.use_rustls_tls().danger_accept_invalid_certs(true);
    }

    let roots = root_store(tls);
    let tls_config = match parse_server_name(&tls.server_name) {
        Some(server_name) => {
            tls_config(roots.clone(), Some(server_name)).or_else(|e| {
                error!(
                    "LOGS | Unable to verify against server name '{}': {}, verifying the URL host instead",
                    tls.server_name, e
                );
                tls_config(roots, None)
            })
        }
        None => tls_config(roots, None),
    };

    match tls_config {
        Ok(tls_config) => builder.use_preconfigured_tls(tls_config),
        Err(e) => {
            error!("LOGS | Unable to configure TLS: {}, using reqwest defaults", e);
            builder.use_rustls_tls()
        }
    }
}

fn parse_server_name(raw: &str) -> Option<ServerName<'static>> {
    if raw.is_empty() {
        return None;
    }
    match ServerName::try_from(raw.to_string()) {
        Ok(server_name) => Some(server_name),
        Err(e) => {
            error!("LOGS | Ignoring server name '{}': {}", raw, e);
            None
        }
    }
}

/// Native roots plus the configured bundle, if it can be read.
fn root_store(tls: &TlsConfig) -> RootCertStore {
    let mut roots = native_root_store();
    let Some(path) = &tls.root_ca_path else {
        return roots;
    };

    match load_root_certs(path) {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!(
                "LOGS | Added {added} root certificates from {} ({ignored} ignored)",
                path.display()
            );
        }
        Err(e) => error!(
            "LOGS | Ignoring root CA bundle {}: {}",
            path.display(),
            e
        ),
    }
    roots
}

fn load_root_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Box<dyn Error>> {
    let certs = CertificateDer::pem_file_iter(path)?.collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(format!("no certificates found in {}", path.display()).into());
    }
    Ok(certs)
}

/// Native roots are read once per process.
fn native_root_store() -> RootCertStore {
    NATIVE_ROOTS.get_or_init(load_native_roots).clone()
}

fn load_native_roots() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("LOGS | Failed to load native certificate: {}", err);
    }
    let (added, ignored) = root_store.add_parsable_certificates(native_certs.certs);
    debug!("LOGS | Loaded {added} native root certificates ({ignored} ignored)");
    root_store
}

fn tls_config(
    roots: RootCertStore,
    server_name: Option<ServerName<'static>>,
) -> Result<ClientConfig, Box<dyn Error>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let config = match server_name {
        Some(server_name) => {
            let verifier = ServerNameVerifier::new(server_name, roots, provider)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth()
        }
        None => builder.with_root_certificates(roots).with_no_client_auth(),
    };

    Ok(config)
}

/// Verifies peer certificates against a fixed server name.
#[derive(Debug)]
struct ServerNameVerifier {
    server_name: ServerName<'static>,
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerNameVerifier {
    fn new(
        server_name: ServerName<'static>,
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, Box<dyn Error>> {
        let inner =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
        Ok(Self { server_name, inner })
    }
}

impl ServerCertVerifier for ServerNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            &self.server_name,
            ocsp_response,
            now,
        )
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
