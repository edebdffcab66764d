//! Process entry point (§2 "control flow", §6 "exit codes").
//!
//! Startup ordering is the one named in §2: queue reachable → workers up →
//! receivers bind. Shutdown is signal-driven (SIGTERM/SIGINT): the root
//! [`CancellationToken`] is cancelled, every suspending loop observes it
//! within its own deadline, and the process waits up to
//! `SHUTDOWN_DEADLINE_MS` before exiting regardless of stragglers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ingest_core::config::Config;
use ingest_core::observability::{init_tracing, Metrics};
use ingest_core::{ErrorKind, IngestError};
use ingest_gate::{AdmissionTable, CachingSourceResolver, RateLimiterGate, SourceResolver};
use ingest_queue::{QueueBroker, RedisStreamBroker};
use ingest_receiver::catalogue::poll_desired_ports;
use ingest_receiver::health::SinkHealthFlag;
use ingest_receiver::pipeline::{decode_log_record, decode_metric_record};
use ingest_receiver::{CatalogueClient, HealthChecker, Http1Receiver, Http3Receiver, PipelineContext, SyslogReceiver};
use ingest_transport_quic::{server_config_from_rustls, QuicEndpoint};
use ingest_transport_tls::{load_server_config, watch_and_reload, HotReloadingServerConfig};
use ingest_worker::{BatchWorker, DeadLetterWriter, LogSink, MetricSink, WorkerConfig};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

const DEAD_LETTER_STREAM: &str = "dead-letter";
const CATALOGUE_URL_ENV: &str = "CATALOGUE_URL";
const CATALOGUE_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!(error = %err, "fatal startup/runtime error");
            std::process::exit(exit_code_for(&err));
        }
    }
}

/// §6: "0 clean, 1 fatal config error, 2 unrecoverable runtime error."
fn exit_code_for(err: &IngestError) -> i32 {
    match err.kind() {
        ErrorKind::InvalidInput => 1,
        _ => 2,
    }
}

async fn run() -> Result<(), IngestError> {
    let config_path = std::env::var("CONFIG_FILE").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    let token = CancellationToken::new();
    let metrics = Arc::new(Metrics::default());

    // --- queue reachable -------------------------------------------------
    let broker: Arc<dyn QueueBroker> = Arc::new(RedisStreamBroker::connect(&config.queue_url).await?);
    broker.ensure_group(&config.log_stream, &config.log_group, "0").await?;
    broker.ensure_group(&config.metric_stream, &config.metric_group, "0").await?;
    broker.ensure_group(DEAD_LETTER_STREAM, "dead-letter-writers", "0").await?;
    tracing::info!("queue reachable, consumer groups ensured");

    let catalogue_url = std::env::var(CATALOGUE_URL_ENV).unwrap_or_else(|_| "http://127.0.0.1:7000".to_string());
    let catalogue = Arc::new(CatalogueClient::new(catalogue_url, Duration::from_millis(500)));
    let resolver: Arc<dyn SourceResolver> =
        Arc::new(CachingSourceResolver::with_default_ttl(catalogue.clone() as Arc<dyn SourceResolver>));
    let rate_limiter = Arc::new(RateLimiterGate::new(config.rate_tiers.clone()));
    // No admission-rule source is named in §6's configuration table — CIDR
    // rules live in the external catalogue, out of scope per §1. The
    // kernel accelerator (§4.1/§9) is optional and absent here, so
    // userspace admission runs in passthrough mode; the allow-list check
    // inside authentication (§4.2) remains authoritative regardless.
    let admission = Arc::new(AdmissionTable::passthrough());

    let ctx = Arc::new(PipelineContext {
        admission: admission.clone(),
        resolver,
        rate_limiter,
        broker: broker.clone(),
        log_stream: config.log_stream.clone(),
        metric_stream: config.metric_stream.clone(),
        stream_maxlen: config.stream_maxlen,
        enqueue_permits: Arc::new(Semaphore::new(4096)),
        metrics: metrics.clone(),
    });

    // --- workers up --------------------------------------------------------
    let dead_letter = Arc::new(DeadLetterWriter::new(broker.clone(), DEAD_LETTER_STREAM, config.stream_maxlen));
    let sink_health = SinkHealthFlag::new_healthy();

    let log_sink: Arc<dyn ingest_worker::Sink<ingest_core::LogEvent>> =
        Arc::new(LogSink::new(&config.sink_log_url, config.sink_timeout)?);
    let log_worker_config = WorkerConfig {
        stream: config.log_stream.clone(),
        group: config.log_group.clone(),
        consumer: format!("log-worker-{}", std::process::id()),
        batch_size: config.batch_size,
        batch_max_age: config.batch_max_age,
        read_block: config.read_block,
        sink_retry_max: config.sink_retry_max,
        sink_retry_backoff: config.sink_retry_backoff,
        reclaim_idle: config.reclaim_idle,
        reclaim_interval: config.reclaim_interval,
        shutdown_deadline: config.shutdown_deadline,
    };
    let log_worker = BatchWorker::<ingest_core::LogEvent>::new(broker.clone(), dead_letter.clone(), log_worker_config);
    let log_handles = log_worker.spawn(log_sink, decode_log_record, metrics.clone(), token.clone());

    let metric_sink: Arc<dyn ingest_worker::Sink<ingest_core::MetricSample>> =
        Arc::new(MetricSink::new(&config.sink_metric_url, config.sink_timeout));
    let metric_worker_config = WorkerConfig {
        stream: config.metric_stream.clone(),
        group: config.metric_group.clone(),
        consumer: format!("metric-worker-{}", std::process::id()),
        batch_size: config.batch_size,
        batch_max_age: config.batch_max_age,
        read_block: config.read_block,
        sink_retry_max: config.sink_retry_max,
        sink_retry_backoff: config.sink_retry_backoff,
        reclaim_idle: config.reclaim_idle,
        reclaim_interval: config.reclaim_interval,
        shutdown_deadline: config.shutdown_deadline,
    };
    let metric_worker =
        BatchWorker::<ingest_core::MetricSample>::new(broker.clone(), dead_letter.clone(), metric_worker_config);
    let metric_handles = metric_worker.spawn(metric_sink, decode_metric_record, metrics.clone(), token.clone());
    tracing::info!("log and metric workers started");

    // --- receivers bind ------------------------------------------------------
    let health_checker =
        Arc::new(HealthChecker::new(broker.clone(), config.log_stream.clone(), config.log_group.clone(), sink_health.clone()));

    let (tls_acceptor, tls_watch) = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let cert_path = PathBuf::from(cert);
            let key_path = PathBuf::from(key);
            let ca_path = config.tls_ca.as_ref().map(PathBuf::from);
            let initial = load_server_config(&cert_path, &key_path, ca_path.as_deref())?;
            let hot = HotReloadingServerConfig::from_config(initial);
            let watch_handle = tokio::spawn(watch_and_reload(
                hot.clone(),
                cert_path,
                key_path,
                ca_path,
                Duration::from_secs(30),
                token.clone(),
            ));
            (hot, Some(watch_handle))
        }
        _ => {
            return Err(IngestError::invalid_input(
                "TLS_CERT and TLS_KEY must both be set; this service only terminates TLS connections",
            ));
        }
    };

    let http1_bind: SocketAddr = config
        .http1_bind
        .parse()
        .map_err(|err| IngestError::invalid_input(format!("HTTP1_BIND {:?}: {err}", config.http1_bind)))?;
    let http1_receiver = Arc::new(Http1Receiver::new(ctx.clone(), tls_acceptor.clone(), health_checker.clone()));
    let http1_token = token.clone();
    let http1_handle = tokio::spawn(async move {
        if let Err(err) = http1_receiver.serve(http1_bind, http1_token).await {
            tracing::error!(error = %err, "http/1.1 receiver exited");
        }
    });

    let http3_bind: SocketAddr = config
        .http3_bind
        .parse()
        .map_err(|err| IngestError::invalid_input(format!("HTTP3_BIND {:?}: {err}", config.http3_bind)))?;
    let quic_server_config = server_config_from_rustls(tls_acceptor.snapshot())?;
    let quic_endpoint = QuicEndpoint::bind_server(http3_bind, quic_server_config)?;
    let http3_receiver = Arc::new(Http3Receiver::new(quic_endpoint, ctx.clone(), health_checker.clone()));
    let http3_token = token.clone();
    let http3_handle = tokio::spawn(async move {
        if let Err(err) = http3_receiver.serve(http3_token).await {
            tracing::error!(error = %err, "http/3 receiver exited");
        }
    });

    let (ports_tx, ports_rx) = watch::channel(std::collections::BTreeSet::new());
    let poll_handle =
        tokio::spawn(poll_desired_ports(catalogue.clone(), CATALOGUE_POLL_INTERVAL, ports_tx, token.clone()));
    let syslog_receiver = Arc::new(SyslogReceiver::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), ctx.clone()));
    let syslog_token = token.clone();
    let syslog_handle = tokio::spawn(syslog_receiver.run(ports_rx, syslog_token));

    tracing::info!(%http1_bind, %http3_bind, "receivers bound");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    token.cancel();

    let shutdown = async {
        let _ = log_handles.batch_loop.await;
        let _ = log_handles.reclaim_loop.await;
        let _ = metric_handles.batch_loop.await;
        let _ = metric_handles.reclaim_loop.await;
        let _ = http1_handle.await;
        let _ = http3_handle.await;
        let _ = syslog_handle.await;
        let _ = poll_handle.await;
        if let Some(handle) = tls_watch {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(config.shutdown_deadline, shutdown).await.is_err() {
        tracing::warn!("shutdown deadline exceeded; exiting with some tasks still draining");
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
