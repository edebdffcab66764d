//! Authenticator (C2).
//!
//! §9 resolves the cyclic dependency between the receiver cache and the
//! external catalogue with an interface: "the receiver depends only on a
//! `SourceResolver` capability ... the catalogue implements it, the cache is
//! a decorator." [`SourceResolver`] is that capability;
//! [`CachingSourceResolver`] is the decorator with the ≤60s staleness
//! window named in §3/§4.4.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use ingest_core::{IngestError, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    Bearer,
    MtlsSubject,
    UdpPort,
}

/// Narrow capability a receiver needs from the external catalogue.
/// Implemented once, for real, by a `CatalogueClient`; decorated with a
/// cache for production use.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn by_api_key(&self, key: &str) -> Result<Source, IngestError>;
    async fn by_bearer(&self, token: &str) -> Result<Source, IngestError>;
    async fn by_subject(&self, subject: &str) -> Result<Source, IngestError>;
    async fn by_udp_port(&self, port: u16) -> Result<Source, IngestError>;
}

/// Resolves a credential to a source, then checks the admission decision
/// that is the authenticator's actual job per §4.2: side-effect-free
/// identity resolution, with allow-list/enabled checks layered on top.
pub async fn authenticate(
    resolver: &dyn SourceResolver,
    kind: CredentialKind,
    credential: &str,
    client_addr: IpAddr,
) -> Result<Source, IngestError> {
    let source = match kind {
        CredentialKind::ApiKey => resolver.by_api_key(credential).await?,
        CredentialKind::Bearer => resolver.by_bearer(credential).await?,
        CredentialKind::MtlsSubject => resolver.by_subject(credential).await?,
        CredentialKind::UdpPort => {
            let port: u16 = credential
                .parse()
                .map_err(|_| IngestError::internal("malformed UDP port credential"))?;
            resolver.by_udp_port(port).await?
        }
    };

    if !source.enabled {
        return Err(IngestError::forbidden(format!("source {} is disabled", source.id)));
    }
    if !source.allowed_clients.is_empty() && !source.allows_client(client_addr) {
        return Err(IngestError::forbidden(format!(
            "client {client_addr} is not in the allow-list for source {}",
            source.id
        )));
    }
    Ok(source)
}

struct CacheEntry {
    source: Source,
    fetched_at: Instant,
}

/// Short-TTL, lazily-invalidated read-through cache in front of any
/// [`SourceResolver`] — typically a `CatalogueClient` backed by an HTTP
/// call to the external catalogue (§1 out of scope; this crate only
/// depends on the trait).
pub struct CachingSourceResolver {
    inner: Arc<dyn SourceResolver>,
    ttl: Duration,
    by_api_key: DashMap<String, CacheEntry>,
    by_bearer: DashMap<String, CacheEntry>,
    by_subject: DashMap<String, CacheEntry>,
    by_udp_port: DashMap<u16, CacheEntry>,
}

impl CachingSourceResolver {
    pub fn new(inner: Arc<dyn SourceResolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            by_api_key: DashMap::new(),
            by_bearer: DashMap::new(),
            by_subject: DashMap::new(),
            by_udp_port: DashMap::new(),
        }
    }

    /// Default ≤60s staleness window (§3, §4.4).
    pub fn with_default_ttl(inner: Arc<dyn SourceResolver>) -> Self {
        Self::new(inner, Duration::from_secs(60))
    }

    fn fresh(&self, fetched_at: Instant) -> bool {
        fetched_at.elapsed() < self.ttl
    }
}

macro_rules! cached_lookup {
    ($self:ident, $map:ident, $key:expr, $fetch:expr) => {{
        if let Some(entry) = $self.$map.get($key) {
            if $self.fresh(entry.fetched_at) {
                return Ok(entry.source.clone());
            }
        }
        let source = $fetch.await?;
        $self.$map.insert(
            $key.to_owned(),
            CacheEntry { source: source.clone(), fetched_at: Instant::now() },
        );
        Ok(source)
    }};
}

#[async_trait]
impl SourceResolver for CachingSourceResolver {
    async fn by_api_key(&self, key: &str) -> Result<Source, IngestError> {
        cached_lookup!(self, by_api_key, key, self.inner.by_api_key(key))
    }

    async fn by_bearer(&self, token: &str) -> Result<Source, IngestError> {
        cached_lookup!(self, by_bearer, token, self.inner.by_bearer(token))
    }

    async fn by_subject(&self, subject: &str) -> Result<Source, IngestError> {
        cached_lookup!(self, by_subject, subject, self.inner.by_subject(subject))
    }

    async fn by_udp_port(&self, port: u16) -> Result<Source, IngestError> {
        if let Some(entry) = self.by_udp_port.get(&port) {
            if self.fresh(entry.fetched_at) {
                return Ok(entry.source.clone());
            }
        }
        let source = self.inner.by_udp_port(port).await?;
        self.by_udp_port.insert(port, CacheEntry { source: source.clone(), fetched_at: Instant::now() });
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::Tier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::Utc;

    struct CountingResolver {
        calls: AtomicUsize,
    }

    fn test_source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            name: id.to_string(),
            api_keys: vec!["K1".into()],
            bearer_subjects: vec![],
            mtls_subject: None,
            allowed_clients: vec!["192.168.1.0/24".parse().unwrap()],
            udp_port: None,
            enabled: true,
            tier: Tier::Community,
            created_at: Utc::now(),
            last_seen: None,
            cache_fetched_at: Instant::now(),
        }
    }

    #[async_trait]
    impl SourceResolver for CountingResolver {
        async fn by_api_key(&self, _key: &str) -> Result<Source, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(test_source("web-application"))
        }
        async fn by_bearer(&self, _token: &str) -> Result<Source, IngestError> {
            Err(IngestError::not_found("bearer"))
        }
        async fn by_subject(&self, _subject: &str) -> Result<Source, IngestError> {
            Err(IngestError::not_found("subject"))
        }
        async fn by_udp_port(&self, _port: u16) -> Result<Source, IngestError> {
            Err(IngestError::not_found("port"))
        }
    }

    #[tokio::test]
    async fn cache_hits_avoid_repeated_catalogue_calls() {
        let counting = Arc::new(CountingResolver { calls: AtomicUsize::new(0) });
        let resolver = CachingSourceResolver::with_default_ttl(counting.clone());
        resolver.by_api_key("K1").await.unwrap();
        resolver.by_api_key("K1").await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s2_client_outside_allow_list_is_forbidden() {
        let counting = Arc::new(CountingResolver { calls: AtomicUsize::new(0) });
        let resolver = CachingSourceResolver::with_default_ttl(counting);
        let err = authenticate(&resolver, CredentialKind::ApiKey, "K1", "10.0.0.5".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn s1_client_inside_allow_list_is_authenticated() {
        let counting = Arc::new(CountingResolver { calls: AtomicUsize::new(0) });
        let resolver = CachingSourceResolver::with_default_ttl(counting);
        let source = authenticate(&resolver, CredentialKind::ApiKey, "K1", "192.168.1.5".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(source.id, "web-application");
    }
}
