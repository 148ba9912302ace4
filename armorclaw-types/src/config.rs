//! Bootstrap configuration for the bridge daemon.
//!
//! Values come from the environment at startup. Only *references* to key
//! material (file paths) are read from the environment, never secret
//! values themselves.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::BridgeError;

/// Configuration the bridge binary assembles at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Control-plane RPC socket path.
    pub socket_path: PathBuf,
    /// Directory for config artifacts workers mount read-only.
    pub config_dir: PathBuf,
    /// Directory under which per-worker secret sockets are created.
    pub secrets_dir: PathBuf,
    /// Keystore database file.
    pub keystore_path: PathBuf,
    /// File holding the hex-encoded keystore master key.
    pub keystore_key_file: PathBuf,
    /// Audit journal file.
    pub audit_path: PathBuf,
    /// File holding the hex-encoded audit HMAC key.
    pub audit_key_file: PathBuf,
    /// Audit retention window in days.
    pub retention_days: u32,
    /// RPC requests per second per bridge.
    pub rpc_rate: f64,
    /// RPC rate-limiter burst size.
    pub rpc_burst: u32,
    /// Hard cap on concurrent RPC connections.
    pub max_connections: usize,
    /// Send a rejection notice to untrusted senders instead of a silent drop.
    pub reject_untrusted: bool,
    /// Restore the legacy "empty allowlist means allow-all" behavior.
    /// New deployments default to deny-all.
    pub allow_any_sender: bool,
    /// Initial trusted sender patterns (exact or `*<sep><domain>`).
    pub trusted_senders: Vec<String>,
    /// Initial trusted room IDs.
    pub trusted_rooms: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/armorclaw/bridge.sock"),
            config_dir: PathBuf::from("/run/armorclaw/configs"),
            secrets_dir: PathBuf::from("/run/armorclaw/secrets"),
            keystore_path: PathBuf::from("/var/lib/armorclaw/keystore.json"),
            keystore_key_file: PathBuf::from("/etc/armorclaw/keystore.key"),
            audit_path: PathBuf::from("/var/lib/armorclaw/audit.jsonl"),
            audit_key_file: PathBuf::from("/etc/armorclaw/audit.key"),
            retention_days: 90,
            rpc_rate: 20.0,
            rpc_burst: 40,
            max_connections: 32,
            reject_untrusted: false,
            allow_any_sender: false,
            trusted_senders: Vec::new(),
            trusted_rooms: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Assemble configuration from `ARMORCLAW_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidInput`] when a numeric or boolean
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, BridgeError> {
        let mut config = Self::default();
        if let Some(v) = env_var("ARMORCLAW_SOCKET") {
            config.socket_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_CONFIG_DIR") {
            config.config_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_SECRETS_DIR") {
            config.secrets_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_KEYSTORE_PATH") {
            config.keystore_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_KEYSTORE_KEY_FILE") {
            config.keystore_key_file = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_AUDIT_PATH") {
            config.audit_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_AUDIT_KEY_FILE") {
            config.audit_key_file = PathBuf::from(v);
        }
        if let Some(v) = env_var("ARMORCLAW_RETENTION_DAYS") {
            config.retention_days = parse_var("ARMORCLAW_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_RPC_RATE") {
            config.rpc_rate = parse_var("ARMORCLAW_RPC_RATE", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_RPC_BURST") {
            config.rpc_burst = parse_var("ARMORCLAW_RPC_BURST", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_MAX_CONNECTIONS") {
            config.max_connections = parse_var("ARMORCLAW_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_REJECT_UNTRUSTED") {
            config.reject_untrusted = parse_bool("ARMORCLAW_REJECT_UNTRUSTED", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_ALLOW_ANY_SENDER") {
            config.allow_any_sender = parse_bool("ARMORCLAW_ALLOW_ANY_SENDER", &v)?;
        }
        if let Some(v) = env_var("ARMORCLAW_TRUSTED_SENDERS") {
            config.trusted_senders = parse_list(&v);
        }
        if let Some(v) = env_var("ARMORCLAW_TRUSTED_ROOMS") {
            config.trusted_rooms = parse_list(&v);
        }
        Ok(config)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, BridgeError> {
    value
        .parse()
        .map_err(|_| BridgeError::InvalidInput(format!("{name}: cannot parse {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, BridgeError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(BridgeError::InvalidInput(format!(
            "{name}: expected boolean, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_paths() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/run/armorclaw/bridge.sock")
        );
        assert!(!config.allow_any_sender);
        assert!(!config.reject_untrusted);
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn list_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_list("*@example.com, @ops:example.com ,,"),
            vec!["*@example.com".to_string(), "@ops:example.com".to_string()]
        );
    }
}
