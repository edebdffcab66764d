//! Loads a `rustls::ServerConfig` from the `TLS_CERT`/`TLS_KEY`/`TLS_CA`
//! paths named in §6, and a background task that re-loads them on a poll
//! interval so operators can rotate certificates without a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ingest_core::IngestError;
use rustls::RootCertStore;
use rustls::server::WebPkiClientVerifier;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_util::sync::CancellationToken;

use crate::hot_reload::HotReloadingServerConfig;

pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: Option<&Path>,
) -> Result<rustls::ServerConfig, IngestError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = rustls::ServerConfig::builder();
    let mut config = match ca_path {
        Some(ca) => {
            let roots = load_root_store(ca)?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|err| IngestError::internal(format!("building mTLS client verifier: {err}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|err| IngestError::internal(format!("building TLS server config: {err}")))?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| IngestError::internal(format!("building TLS server config: {err}")))?,
    };
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|err| IngestError::internal(format!("reading TLS_CERT {path:?}: {err}")))?;
    rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| IngestError::internal(format!("parsing TLS_CERT {path:?}: {err}")))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|err| IngestError::internal(format!("reading TLS_KEY {path:?}: {err}")))?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .map_err(|err| IngestError::internal(format!("parsing TLS_KEY {path:?}: {err}")))?
        .ok_or_else(|| IngestError::internal(format!("no private key found in TLS_KEY {path:?}")))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|err| IngestError::internal(format!("reading TLS_CA {path:?}: {err}")))?;
    let certs = rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| IngestError::internal(format!("parsing TLS_CA {path:?}: {err}")))?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|err| IngestError::internal(format!("adding CA cert: {err}")))?;
    }
    Ok(store)
}

/// Background task polling `cert_path`/`key_path` mtimes and swapping a
/// freshly built configuration into `target` when either changes.
pub async fn watch_and_reload(
    target: HotReloadingServerConfig,
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_path: Option<PathBuf>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let mut last_seen = mtime(&cert_path).or_else(|| mtime(&key_path));
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        let current = mtime(&cert_path).or_else(|| mtime(&key_path));
        if current != last_seen {
            match load_server_config(&cert_path, &key_path, ca_path.as_deref()) {
                Ok(config) => {
                    target.replace(Arc::new(config));
                    tracing::info!("TLS configuration reloaded");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "TLS reload failed, keeping previous configuration");
                }
            }
            last_seen = current;
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
