//! Configuration for the agent service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::error::CryptoError;
use tether_core::{ConnectionInfo, EncryptionKey, ReconnectPolicy};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where the controller listens.
    pub controller: ControllerConfig,
    /// Payload encryption.
    pub security: SecurityConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Audit trail retention.
    pub audit: AuditConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
}

/// Payload encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base64 AES-256 key shared with the controller. Empty = plaintext.
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds.
    pub initial_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
    /// Extra random delay, as a fraction of the current delay.
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Lines and finished sessions older than this are dropped.
    pub retention_secs: u64,
    /// How often retention runs while a connection stays up.
    pub prune_interval_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 42474,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_ms: policy.initial.as_millis() as u64,
            multiplier: policy.multiplier,
            max_ms: policy.max.as_millis() as u64,
            jitter: policy.jitter_ratio,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 60 * 60,
            prune_interval_secs: 60 * 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Default configuration as TOML text (for `--gen-config`).
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.controller.host.clone(), self.controller.port)
    }

    /// Backoff policy, with nonsensical values pulled back into range.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        let initial = Duration::from_millis(r.initial_ms.max(1));
        ReconnectPolicy {
            initial,
            multiplier: if r.multiplier.is_finite() { r.multiplier.max(1.0) } else { 1.0 },
            max: Duration::from_millis(r.max_ms).max(initial),
            jitter_ratio: if r.jitter.is_finite() { r.jitter.clamp(0.0, 1.0) } else { 0.0 },
        }
    }

    pub fn audit_retention(&self) -> Duration {
        Duration::from_secs(self.audit.retention_secs)
    }

    /// Never zero.
    pub fn audit_prune_interval(&self) -> Duration {
        Duration::from_secs(self.audit.prune_interval_secs.max(1))
    }

    /// The configured key, or `None` when the link runs in plaintext.
    pub fn encryption_key(&self) -> Result<Option<EncryptionKey>, CryptoError> {
        let key = self.security.key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        EncryptionKey::from_base64(key).map(Some)
    }
}

// ── Tests ────────────────────────────────────────────────────────
