// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// print-agent: accepts raw print jobs over HTTP and delivers them to local
// printers.

use std::process::ExitCode;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use printagent_core::AgentConfig;
use printagent_core::error::Result;
use printagent_print::{
    DispatchSettings, Dispatcher, JobStore, NoDetection, PrinterDetector, PrinterRegistry,
    SystemBackends, SystemDetector, TokioClock,
};
use printagent_security::AuditLog;
use printagent_server::{AgentService, router};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("print agent stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(AgentConfig::load()?);
    info!(
        agent_id = %config.agent_id,
        name = config.display_name(),
        bind = %config.bind_addr,
        "print agent starting"
    );
    if config.token.is_none() {
        warn!("AGENT_TOKEN is not set; authenticated endpoints will refuse every request");
    }

    let store = Arc::new(JobStore::open(&config.db_path)?);
    let audit = Arc::new(AuditLog::open(&config.audit_path, config.agent_id.clone())?);

    for (id, status) in store.recover_interrupted(config.max_retries)? {
        warn!(job_id = %id, %status, "recovered job interrupted by a previous run");
        audit.append("job_recovered", json!({ "job_id": id, "status": status }));
    }

    let detector: Arc<dyn PrinterDetector> = if config.detect_printers {
        Arc::new(SystemDetector)
    } else {
        Arc::new(NoDetection)
    };
    let registry = Arc::new(PrinterRegistry::new(config.printers.clone(), detector));
    // Seeds the names `/health` reports until the next detection.
    let printers = registry.resolve_all().await;
    info!(count = printers.len(), "printers available");

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        registry.clone(),
        Arc::new(SystemBackends::from(config.as_ref())),
        audit.clone(),
        Arc::new(TokioClock),
        DispatchSettings::from(config.as_ref()),
    ));

    // Bind before starting the worker so a port clash fails fast.
    let listener = TcpListener::bind(config.bind_addr).await?;
    let worker = dispatcher.spawn();

    let service = AgentService::new(
        config.clone(),
        store,
        registry,
        audit.clone(),
        worker.status(),
    );

    audit.append(
        "agent_startup",
        json!({
            "name": config.display_name(),
            "bind": config.bind_addr.to_string(),
            "printers": config.printers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        }),
    );
    info!(bind = %config.bind_addr, "listening");

    let served = axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("stopping dispatcher");
    worker.shutdown().await;
    audit.append("agent_shutdown", json!({ "clean": served.is_ok() }));

    served?;
    info!("print agent stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
