// stigmer daemon entry point.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use stigmer_claimcheck::{ClaimCheckManager, Compressor, ObjectStore, S3Config};
use stigmer_daemon::config::DaemonConfig;
use stigmer_daemon::logging;
use stigmer_daemon::manager::{EngineManager, InjectionTargets};
use stigmer_daemon::server::DaemonServices;
use stigmer_storage::{KvEngine, ResourceStore};
use stigmer_temporal::{MemoryEngine, MemoryEngineDialer};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = DaemonConfig::from_env();
    logging::init(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %config.env,
        "stigmer daemon starting"
    );

    // Storage
    if let Some(parent) = Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let kv = KvEngine::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let store = ResourceStore::new(Arc::new(kv));
    tracing::info!(db_path = %config.db_path, "key-value store opened");

    // Claim check
    let claim_check = Arc::new(build_claim_check(&config));
    if claim_check.is_enabled() {
        tracing::info!(
            storage_type = %config.blob_storage.storage_type,
            threshold_bytes = config.claim_check.threshold_bytes,
            ttl_days = config.claim_check.ttl_days,
            "claim check enabled"
        );
    }

    // Controllers + in-process transport (two-phase wiring)
    let services = DaemonServices::new(store, claim_check);
    services
        .start_in_process()
        .await
        .context("failed to start in-process transport")?;

    // Durable engine. The embedded engine serves local mode; the hosted
    // Temporal driver plugs in through the same dialer trait.
    let dialer = Arc::new(MemoryEngineDialer::new(Arc::new(MemoryEngine::new())));
    let manager = EngineManager::new(
        dialer,
        config.temporal.clone(),
        services.runtime.clone(),
        InjectionTargets {
            agent_execution: services.agent_execution.clone(),
            workflow_execution: services.workflow_execution.clone(),
            workflow: services.workflow.clone(),
        },
    );
    manager.start().await;

    // Network listener, last.
    let addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .context("invalid GRPC_PORT")?;
    tracing::info!(addr = %addr, "gRPC server listening");
    services
        .router()
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("gRPC server error")?;

    manager.shutdown().await;
    tracing::info!("stigmer daemon stopped");
    Ok(())
}

fn build_claim_check(config: &DaemonConfig) -> ClaimCheckManager {
    if !config.claim_check.enabled {
        return ClaimCheckManager::disabled();
    }
    let blob = &config.blob_storage;
    let store = match blob.storage_type.as_str() {
        "filesystem" | "fs" => {
            let path = if blob.path.is_empty() {
                Path::new(&config.db_path)
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("claimcheck")
            } else {
                blob.path.clone().into()
            };
            ObjectStore::filesystem(path)
        }
        _ => ObjectStore::s3(S3Config {
            bucket: blob.r2_bucket.clone(),
            endpoint: blob.r2_endpoint.clone(),
            region: blob.r2_region.clone(),
            access_key_id: blob.r2_access_key_id.clone(),
            secret_access_key: blob.r2_secret_access_key.clone(),
        }),
    };
    let compressor = if config.claim_check.compression_enabled {
        Compressor::Gzip
    } else {
        Compressor::NoOp
    };
    ClaimCheckManager::new(
        true,
        config.claim_check.threshold_bytes,
        compressor,
        config.claim_check.ttl_days,
        store,
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
