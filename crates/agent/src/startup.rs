use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use adapters::ebpf::{SteeringError, SteeringProgram};
use adapters::http::run_metrics_server;
use adapters::xdp::{QueueManager, QueueManagerConfig, RingConfig};
use application::packet_pipeline::{PacketPipeline, PipelineOptions, ResponseOptions};
use domain::filter::engine::FilterEngine;
use infrastructure::config::Config;
use infrastructure::constants::{
    GRACEFUL_SHUTDOWN_TIMEOUT, KERNEL_METRICS_INTERVAL, POLL_TIMEOUT_MS, WORKER_CHANNEL_FACTOR,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use infrastructure::rules::load_rules;
use ports::secondary::metrics_port::MetricsPort;

use crate::cli::Cli;

/// Run the agent startup sequence and block until shutdown.
#[allow(clippy::too_many_lines)] // startup is inherently sequential and long
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = Config::load(Path::new(&cli.config))
        .with_context(|| format!("loading config '{}'", cli.config))?;

    // ── 2. Initialize logging (CLI flags take precedence) ───────────
    let mut log_config = config.logging.clone();
    if let Some(ref level) = cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        log_config.format = format.clone();
    }
    init_logging(&log_config, config.performance.disable_log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %cli.config,
        interface = %config.interface,
        "dnsguard agent starting"
    );

    // ── 3. Apply performance knobs ──────────────────────────────────
    if config.performance.cpu_affinity >= 0 {
        let cpu = config.performance.cpu_affinity as usize;
        match adapters::affinity::set_cpu_affinity(cpu) {
            Ok(()) => info!(cpu, "process pinned"),
            Err(e) => warn!(cpu, error = %e, "CPU affinity not applied"),
        }
    }
    if config.performance.single_core {
        info!("single-core mode: one queue, one worker");
    }

    // ── 4. Load rules and build the filter engine ───────────────────
    let loaded = load_rules(Path::new(&config.rules_path))
        .with_context(|| format!("loading rules '{}'", config.rules_path))?;
    let engine = Arc::new(FilterEngine::new(loaded.rules).context("building filter engine")?);
    info!(
        rule_count = engine.len(),
        ip_blacklist = loaded.ip_blacklist.len(),
        "filter engine initialized"
    );

    // ── 5. Metrics registry ─────────────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());

    // ── 6. Load, configure, and attach the steering program ─────────
    let bpf_path = cli
        .bpf
        .clone()
        .unwrap_or_else(|| config.bpf_path.clone());
    if bpf_path.is_empty() {
        bail!("steering program path required: set bpf_path in config or pass --bpf");
    }
    let mut steering =
        SteeringProgram::load(Path::new(&bpf_path)).context("loading steering program")?;
    steering
        .set_dns_ports(&config.effective_dns_ports())
        .context("installing DNS ports")?;
    steering
        .attach(&config.interface)
        .context("attaching steering program")?;

    // ── 7. Create and register queue sockets ────────────────────────
    let qm_config = QueueManagerConfig {
        interface: config.interface.clone(),
        queue_start: config.queue_start,
        queue_count: config.effective_queue_count(),
        num_frames: config.xdp.num_frames,
        frame_size: config.xdp.frame_size,
        rings: RingConfig {
            fill_size: config.xdp.fill_ring_num_descs,
            completion_size: config.xdp.completion_ring_num_descs,
            rx_size: config.xdp.rx_ring_num_descs,
            tx_size: config.xdp.tx_ring_num_descs,
        },
    };
    let queue_manager = match QueueManager::new(&qm_config, &mut steering) {
        Ok(qm) => qm,
        Err(e) => {
            // Leave the interface clean on aborted startup.
            let _ = steering.detach();
            return Err(e).context("creating queue sockets");
        }
    };
    info!(
        queue_start = queue_manager.queue_start(),
        queues = queue_manager.queue_count(),
        "queue sockets ready"
    );

    // ── 8. Cancellation token from signals ──────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 9. Start the packet pipeline ────────────────────────────────
    let num_workers = config.effective_num_workers();
    let pipeline_opts = PipelineOptions {
        num_workers,
        batch_size: config.workers.batch_size.max(1),
        channel_capacity: num_workers * WORKER_CHANNEL_FACTOR,
        poll_timeout_ms: POLL_TIMEOUT_MS,
        response: ResponseOptions {
            block_response: config.response.responds(),
            nxdomain: config.response.nxdomain,
        },
    };
    let pipeline = PacketPipeline::start(
        queue_manager.sockets(),
        pipeline_opts,
        Arc::clone(&engine),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        None,
        cancel_token.clone(),
    );

    // ── 10. Kernel counter folding + metrics endpoint ───────────────
    let steering = Arc::new(Mutex::new(steering));
    let kernel_metrics_handle = spawn_kernel_metrics_loop(
        Arc::clone(&steering),
        Arc::clone(&metrics),
        cancel_token.clone(),
    );

    let exporter_handle: Option<JoinHandle<()>> = if config.metrics.enabled {
        let metrics = Arc::clone(&metrics);
        let listen = config.metrics.listen.clone();
        let path = config.metrics.path.clone();
        let shutdown = cancel_token.clone().cancelled_owned();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, &listen, &path, shutdown).await {
                tracing::error!(error = %e, "metrics endpoint failed");
            }
        }))
    } else {
        None
    };

    info!(
        dns_ports = ?config.effective_dns_ports(),
        workers = num_workers,
        respond = config.response.responds(),
        "agent ready, waiting for shutdown signal"
    );
    cancel_token.cancelled().await;

    // ── 11. Ordered shutdown ────────────────────────────────────────
    info!("shutdown phase 1: stopping receive loops and draining workers");
    tokio::task::spawn_blocking(move || pipeline.join())
        .await
        .context("joining pipeline threads")?;

    info!("shutdown phase 2: stopping background tasks");
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, kernel_metrics_handle).await;
    if let Some(handle) = exporter_handle {
        let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle).await;
    }

    info!("shutdown phase 3: closing queue sockets");
    {
        let mut steering = steering.lock().expect("steering poisoned");
        queue_manager.close(&mut steering);

        info!("shutdown phase 4: detaching steering program");
        if let Err(e) = steering.detach() {
            warn!(error = %e, "detach failed");
        }
    }

    let stats = metrics.snapshot();
    info!(
        received = stats.received,
        allowed = stats.allowed,
        blocked = stats.blocked,
        logged = stats.logged,
        dropped = stats.dropped,
        parse_errors = stats.parse_errors,
        "final stats"
    );
    info!("agent stopped");
    Ok(())
}

/// Periodically fold the steering program's per-CPU counters into the
/// registry gauges. Stops early when the object carries no metrics map.
fn spawn_kernel_metrics_loop(
    steering: Arc<Mutex<SteeringProgram>>,
    metrics: Arc<AgentMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KERNEL_METRICS_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let reading = steering.lock().expect("steering poisoned").read_metrics();
                    match reading {
                        Ok(m) => {
                            metrics.set_kernel_counters(m.total, m.dns, m.redirected, m.blocked, m.passed);
                        }
                        Err(SteeringError::MetricsUnavailable) => break,
                        Err(e) => warn!(error = %e, "kernel metrics read failed"),
                    }
                }
            }
        }
    })
}
