// Configuration loading from environment variables.
//
// Every knob has a default that works for local development; `.env` files
// are honored via dotenvy at startup.

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Task queue names for the three execution kinds. The `*_stigmer` queues
/// run this daemon's orchestration workflows; the `*_runner` queues are
/// polled by the foreign runtime workers.
#[derive(Debug, Clone)]
pub struct TaskQueues {
    pub agent_execution_stigmer: String,
    pub agent_execution_runner: String,
    pub workflow_execution_stigmer: String,
    pub workflow_execution_runner: String,
    pub workflow_validation_stigmer: String,
    pub workflow_validation_runner: String,
}

impl TaskQueues {
    pub fn from_env() -> Self {
        Self {
            agent_execution_stigmer: env_or(
                "TEMPORAL_AGENT_EXECUTION_STIGMER_TASK_QUEUE",
                "agent_execution_stigmer",
            ),
            agent_execution_runner: env_or(
                "TEMPORAL_AGENT_EXECUTION_RUNNER_TASK_QUEUE",
                "agent_execution_runner",
            ),
            workflow_execution_stigmer: env_or(
                "TEMPORAL_WORKFLOW_EXECUTION_STIGMER_TASK_QUEUE",
                "workflow_execution_stigmer",
            ),
            workflow_execution_runner: env_or(
                "TEMPORAL_WORKFLOW_EXECUTION_RUNNER_TASK_QUEUE",
                "workflow_execution_runner",
            ),
            workflow_validation_stigmer: env_or(
                "TEMPORAL_WORKFLOW_VALIDATION_STIGMER_TASK_QUEUE",
                "workflow_validation_stigmer",
            ),
            workflow_validation_runner: env_or(
                "TEMPORAL_WORKFLOW_VALIDATION_RUNNER_TASK_QUEUE",
                "workflow_validation_runner",
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemporalConfig {
    pub host_port: String,
    pub namespace: String,
    pub task_queues: TaskQueues,
}

impl TemporalConfig {
    pub fn from_env() -> Self {
        Self {
            host_port: env_or("TEMPORAL_HOST_PORT", "localhost:7233"),
            namespace: env_or("TEMPORAL_NAMESPACE", "default"),
            task_queues: TaskQueues::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimCheckConfig {
    pub enabled: bool,
    pub threshold_bytes: usize,
    pub compression_enabled: bool,
    pub ttl_days: u32,
}

impl ClaimCheckConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("CLAIMCHECK_ENABLED", false),
            threshold_bytes: env_parse("CLAIMCHECK_THRESHOLD_BYTES", 51200),
            compression_enabled: env_bool("CLAIMCHECK_COMPRESSION_ENABLED", true),
            ttl_days: env_parse("CLAIMCHECK_TTL_DAYS", 30),
        }
    }
}

/// Object storage for claim check payloads: `r2` (S3-compatible) or
/// `filesystem` with `BLOB_STORAGE_PATH`.
#[derive(Debug, Clone)]
pub struct BlobStorageConfig {
    pub storage_type: String,
    pub path: String,
    pub r2_bucket: String,
    pub r2_endpoint: String,
    pub r2_region: String,
    pub r2_access_key_id: String,
    pub r2_secret_access_key: String,
}

impl BlobStorageConfig {
    pub fn from_env() -> Self {
        Self {
            storage_type: env_or("BLOB_STORAGE_TYPE", "r2"),
            path: env_or("BLOB_STORAGE_PATH", ""),
            r2_bucket: env_or("R2_BUCKET", ""),
            r2_endpoint: env_or("R2_ENDPOINT", ""),
            r2_region: env_or("R2_REGION", "auto"),
            r2_access_key_id: env_or("R2_ACCESS_KEY_ID", ""),
            r2_secret_access_key: env_or("R2_SECRET_ACCESS_KEY", ""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub grpc_port: u16,
    pub db_path: String,
    pub log_level: String,
    pub env: String,
    pub temporal: TemporalConfig,
    pub claim_check: ClaimCheckConfig,
    pub blob_storage: BlobStorageConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            grpc_port: env_parse("GRPC_PORT", 7234),
            db_path: expand_home(&env_or("DB_PATH", "~/.stigmer/stigmer.db")),
            log_level: env_or("LOG_LEVEL", "info"),
            env: env_or("ENV", "local"),
            temporal: TemporalConfig::from_env(),
            claim_check: ClaimCheckConfig::from_env(),
            blob_storage: BlobStorageConfig::from_env(),
        }
    }

    /// "local" switches on pretty-printed logs.
    pub fn is_local(&self) -> bool {
        self.env == "local"
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }
    path.to_string()
}
