//! Server configuration.
//!
//! Configuration comes from the environment by default, or from a YAML
//! file passed on the command line. Environment loading reads every value
//! individually so a partial `.env` works; file loading deserializes the
//! whole document with the same defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),

    /// Configuration file could not be parsed
    #[error("Failed to parse config file {0}: {1}")]
    FileParse(PathBuf, String),

    /// An environment variable held an unusable value
    #[error("Invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// TLS configuration; absent means plain HTTP
    pub tls: Option<TlsConfig>,

    /// OpenAI API key for the provider leg
    pub openai_api_key: Option<String>,
    /// Shared secret validating the telephony platform's signature header
    pub telephony_auth_secret: Option<String>,

    /// Fixed reference time zone for service-hours evaluation
    pub reference_time_zone: String,
    /// Directory file backing the static resolver
    pub directory_path: Option<PathBuf>,
    /// Where call recordings are written
    pub recording_dir: PathBuf,
    /// Hold clip played during suspend/resume handling (mono 8kHz pcm16 WAV)
    pub hold_clip_path: Option<PathBuf>,

    /// Global WebSocket connection cap
    pub max_ws_connections: usize,
    /// Per-IP WebSocket connection cap
    pub max_connections_per_ip: usize,

    /// Comma-separated allowed CORS origins, or "*"
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            openai_api_key: None,
            telephony_auth_secret: None,
            reference_time_zone: "UTC".to_string(),
            directory_path: None,
            recording_dir: PathBuf::from("recordings"),
            hold_clip_path: None,
            max_ws_connections: 1000,
            max_connections_per_ip: 10,
            cors_allowed_origins: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("PORT", port.clone()))?;
        }
        if let (Ok(cert), Ok(key)) = (std::env::var("TLS_CERT_PATH"), std::env::var("TLS_KEY_PATH"))
        {
            config.tls = Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            });
        }
        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        config.telephony_auth_secret = std::env::var("TELEPHONY_AUTH_SECRET").ok();
        if let Ok(zone) = std::env::var("REFERENCE_TIME_ZONE") {
            config.reference_time_zone = zone;
        }
        config.directory_path = std::env::var("DIRECTORY_PATH").ok().map(PathBuf::from);
        if let Ok(dir) = std::env::var("RECORDING_DIR") {
            config.recording_dir = PathBuf::from(dir);
        }
        config.hold_clip_path = std::env::var("HOLD_CLIP_PATH").ok().map(PathBuf::from);
        if let Ok(max) = std::env::var("MAX_WS_CONNECTIONS") {
            config.max_ws_connections = max
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("MAX_WS_CONNECTIONS", max.clone()))?;
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS_PER_IP") {
            config.max_connections_per_ip = max
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("MAX_CONNECTIONS_PER_IP", max.clone()))?;
        }
        config.cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::FileParse(path.to_path_buf(), e.to_string()))
    }

    /// The bind address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS serving is configured.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert!(!config.is_tls_enabled());
        assert_eq!(config.reference_time_zone, "UTC");
        assert_eq!(config.max_ws_connections, 1000);
    }

    #[test]
    fn test_from_file() {
        let yaml = r#"
host: "127.0.0.1"
port: 9090
reference_time_zone: "America/New_York"
directory_path: "directory.yaml"
max_connections_per_ip: 4
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.address(), "127.0.0.1:9090");
        assert_eq!(config.reference_time_zone, "America/New_York");
        assert_eq!(
            config.directory_path.as_deref(),
            Some(Path::new("directory.yaml"))
        );
        assert_eq!(config.max_connections_per_ip, 4);
        // Unset fields keep their defaults
        assert_eq!(config.recording_dir, PathBuf::from("recordings"));
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: not-a-number").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(ConfigError::FileParse(..))
        ));
    }
}
