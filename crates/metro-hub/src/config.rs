//! Server configuration
//!
//! Loaded from JSON (`METROLINK_CONFIG` or `./metrolink.config.json`); every
//! field is optional and falls back to its default. The raw file form is
//! validated once into [`MetroConfig`], which carries typed values only.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use metro_clock::{ProviderKind, ProviderOptions};
use metro_core::{DEFAULT_TEMPO, Quantum, validate_tempo};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "METROLINK_CONFIG";

/// Config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "metrolink.config.json";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias
pub type ConfigResult<T> = Result<T, ConfigError>;

// ═══════════════════════════════════════════════════════════════════════════════
// FILE FORM
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetroConfigFile {
    pub listen_addr: String,
    pub tick_interval_ms: u64,
    pub quantum: u32,
    pub initial_bpm: f64,
    pub provider: ProviderKind,
    pub midi_port: String,
    pub client_queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub handshake_timeout_ms: u64,
    pub include_debug: bool,
    /// 0 disables the periodic status line
    pub status_log_interval_secs: u64,
}

impl Default for MetroConfigFile {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8765".to_string(),
            tick_interval_ms: 20,
            quantum: 4,
            initial_bpm: DEFAULT_TEMPO,
            provider: ProviderKind::Internal,
            midi_port: "loopMIDI".to_string(),
            client_queue_capacity: 64,
            ping_interval_secs: 20,
            ping_timeout_secs: 30,
            close_timeout_secs: 10,
            handshake_timeout_ms: 5000,
            include_debug: false,
            status_log_interval_secs: 1,
        }
    }
}

impl MetroConfigFile {
    /// Locate and read the config file.
    ///
    /// Order: `explicit` path, then `METROLINK_CONFIG`, then
    /// `./metrolink.config.json`. Only the last one may be absent, in which
    /// case defaults are used.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from_path(Path::new(&p));
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load_from_path(&local);
        }

        log::debug!("[Config] No {} found, using defaults", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_cfg: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("[Config] Loaded {:?}", path);
        Ok(file_cfg)
    }

    /// Check every field and convert to typed values.
    pub fn validate(self) -> ConfigResult<MetroConfig> {
        let listen_addr: SocketAddr =
            self.listen_addr
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    field: "listen_addr",
                    reason: format!("'{}': {e}", self.listen_addr),
                })?;

        let quantum = Quantum::new(self.quantum).map_err(|e| ConfigError::Invalid {
            field: "quantum",
            reason: e.to_string(),
        })?;

        let initial_bpm = validate_tempo(self.initial_bpm).map_err(|e| ConfigError::Invalid {
            field: "initial_bpm",
            reason: e.to_string(),
        })?;

        let tick_interval = positive_millis("tick_interval_ms", self.tick_interval_ms)?;
        let handshake_timeout = positive_millis("handshake_timeout_ms", self.handshake_timeout_ms)?;
        let ping_interval = positive_secs("ping_interval_secs", self.ping_interval_secs)?;
        let ping_timeout = positive_secs("ping_timeout_secs", self.ping_timeout_secs)?;
        let close_timeout = positive_secs("close_timeout_secs", self.close_timeout_secs)?;

        if self.client_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "client_queue_capacity",
                reason: "must be at least 1".into(),
            });
        }

        let status_log_interval = match self.status_log_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(MetroConfig {
            listen_addr,
            tick_interval,
            quantum,
            initial_bpm,
            provider: self.provider,
            midi_port: self.midi_port,
            connection: ConnectionSettings {
                queue_capacity: self.client_queue_capacity,
                handshake_timeout,
                ping_interval,
                ping_timeout,
                close_timeout,
            },
            include_debug: self.include_debug,
            status_log_interval,
        })
    }
}

fn positive_millis(field: &'static str, value: u64) -> ConfigResult<Duration> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_millis(value))
}

fn positive_secs(field: &'static str, value: u64) -> ConfigResult<Duration> {
    positive_millis(field, value.saturating_mul(1000))
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATED FORM
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct MetroConfig {
    pub listen_addr: SocketAddr,
    pub tick_interval: Duration,
    pub quantum: Quantum,
    pub initial_bpm: f64,
    pub provider: ProviderKind,
    pub midi_port: String,
    pub connection: ConnectionSettings,
    pub include_debug: bool,
    pub status_log_interval: Option<Duration>,
}

impl MetroConfig {
    /// Options for [`metro_clock::open_provider`]
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            kind: self.provider,
            quantum: self.quantum,
            initial_bpm: self.initial_bpm,
            midi_port: self.midi_port.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MetroConfigFile::default().validate().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8765".parse().unwrap());
        assert_eq!(config.tick_interval, Duration::from_millis(20));
        assert_eq!(config.quantum, Quantum::FOUR);
        assert_eq!(config.initial_bpm, 120.0);
        assert_eq!(config.provider, ProviderKind::Internal);
        assert_eq!(config.connection.queue_capacity, 64);
        assert_eq!(config.connection.ping_interval, Duration::from_secs(20));
        assert_eq!(config.connection.ping_timeout, Duration::from_secs(30));
        assert_eq!(config.connection.close_timeout, Duration::from_secs(10));
        assert_eq!(config.status_log_interval, Some(Duration::from_secs(1)));
        assert!(!config.include_debug);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file: MetroConfigFile =
            serde_json::from_str(r#"{"quantum": 3, "provider": "link"}"#).unwrap();
        let config = file.validate().unwrap();
        assert_eq!(config.quantum.get(), 3);
        assert_eq!(config.provider, ProviderKind::Link);
        assert_eq!(config.listen_addr.port(), 8765);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_str::<MetroConfigFile>(r#"{"quantun": 3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_quantum_rejected() {
        let file = MetroConfigFile {
            quantum: 0,
            ..Default::default()
        };
        assert!(matches!(
            file.validate(),
            Err(ConfigError::Invalid { field: "quantum", .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_addr = MetroConfigFile {
            listen_addr: "localhost".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_addr.validate(),
            Err(ConfigError::Invalid { field: "listen_addr", .. })
        ));

        let bad_tick = MetroConfigFile {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad_tick.validate(),
            Err(ConfigError::Invalid { field: "tick_interval_ms", .. })
        ));

        let bad_bpm = MetroConfigFile {
            initial_bpm: 400.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_bpm.validate(),
            Err(ConfigError::Invalid { field: "initial_bpm", .. })
        ));

        let bad_queue = MetroConfigFile {
            client_queue_capacity: 0,
            ..Default::default()
        };
        assert!(bad_queue.validate().is_err());
    }

    #[test]
    fn test_status_log_disabled_by_zero() {
        let file = MetroConfigFile {
            status_log_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(file.validate().unwrap().status_log_interval, None);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = MetroConfigFile::load(Some(Path::new("/nonexistent/metrolink.json")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_from_path() {
        let path = std::env::temp_dir().join(format!(
            "metrolink-config-test-{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{"listen_addr": "127.0.0.1:9000", "include_debug": true}"#).unwrap();

        let file = MetroConfigFile::load_from_path(&path).unwrap();
        let _ = fs::remove_file(&path);

        let config = file.validate().unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(config.include_debug);
    }

    #[test]
    fn test_provider_options() {
        let config = MetroConfigFile::default().validate().unwrap();
        let options = config.provider_options();
        assert_eq!(options.kind, ProviderKind::Internal);
        assert_eq!(options.midi_port, "loopMIDI");
        assert_eq!(options.quantum, Quantum::FOUR);
    }
}
