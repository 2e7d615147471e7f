//! Server configuration loading from file and environment variables.

use pepper_voice::{CaptureConfig, SpeechConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Connection broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Speech pipeline capabilities.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Local microphone capture.
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Network configuration for the HTTP and WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// Address the robot and browsers should be pointed at.
    ///
    /// A wildcard bind is resolved to the interface that carries the default
    /// route, falling back to loopback when there is none.
    pub fn advertised_host(&self) -> IpAddr {
        if !self.host.is_unspecified() {
            return self.host;
        }
        match outbound_interface_ip() {
            Ok(ip) if !ip.is_unspecified() => ip,
            Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(e) => {
                tracing::warn!("could not determine local address: {}", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }
}

/// Connecting a UDP socket sends nothing; it only selects the local route.
fn outbound_interface_ip() -> std::io::Result<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
    Ok(socket.local_addr()?.ip())
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pepper_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Per-connection outbound channel capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Delivery queue wait between polls when empty, in milliseconds.
    #[serde(default = "default_queue_poll_ms")]
    pub queue_poll_ms: u64,

    /// Send a close frame to an Agent replaced by a newer connection.
    #[serde(default = "default_true")]
    pub close_superseded_agent: bool,

    /// Maximum snapshot age for replay; 0 disables the bound.
    #[serde(default)]
    pub snapshot_ttl_secs: u64,

    /// `source` value marking face-detection messages produced by the robot.
    #[serde(default = "default_agent_source")]
    pub agent_source: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_queue_poll_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_agent_source() -> String {
    "pepper_native".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            queue_poll_ms: default_queue_poll_ms(),
            close_superseded_agent: true,
            snapshot_ttl_secs: 0,
            agent_source: default_agent_source(),
        }
    }
}

impl BrokerConfig {
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms.max(1))
    }

    pub fn snapshot_ttl(&self) -> Option<Duration> {
        (self.snapshot_ttl_secs > 0).then(|| Duration::from_secs(self.snapshot_ttl_secs))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PEPPER_HOST` overrides `server.host`
/// - `PEPPER_PORT` overrides `server.port`
/// - `PEPPER_LOG_LEVEL` overrides `logging.level`
/// - `PEPPER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PEPPER_LLM_URL` overrides `speech.llm_url`
/// - `PEPPER_LLM_MODEL` overrides `speech.llm_model`
/// - `PEPPER_WHISPER_MODEL` overrides `speech.whisper_model`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<(Config, ConfigSource), ConfigError> {
    let (mut config, source) = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => (toml::from_str(&contents)?, ConfigSource::File),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Config::default(), ConfigSource::Defaults)
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => (Config::default(), ConfigSource::Defaults),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok((config, source))
}

/// Where the loaded values came from. Loading runs before logging is set up,
/// so the caller reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file was given or it does not exist.
    Defaults,
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PEPPER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PEPPER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("PEPPER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PEPPER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("PEPPER_LLM_URL") {
        config.speech.llm_url = url;
    }
    if let Some(model) = var("PEPPER_LLM_MODEL") {
        config.speech.llm_model = model;
    }
    if let Some(model) = var("PEPPER_WHISPER_MODEL") {
        if !model.trim().is_empty() {
            config.speech.whisper_model = Some(PathBuf::from(model));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let (config, source) = load_config(path.to_str()).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.broker.outbound_buffer, 256);
        assert!(config.broker.close_superseded_agent);
        assert!(config.broker.snapshot_ttl().is_none());
        assert_eq!(config.capture.window_secs, 5);
    }

    #[test]
    fn file_values_are_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 6000

[broker]
snapshot_ttl_secs = 10
close_superseded_agent = false

[speech]
llm_model = "llama3"
min_speech_secs = 1.0
"#
        )
        .unwrap();

        let (config, source) = load_config(file.path().to_str()).unwrap();
        assert_eq!(source, ConfigSource::File);
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.broker.snapshot_ttl(), Some(Duration::from_secs(10)));
        assert!(!config.broker.close_superseded_agent);
        assert_eq!(config.speech.llm_model, "llama3");
        assert_eq!(config.speech.llm_timeout_secs, 30);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn advertised_host_resolves_wildcard_binds() {
        let explicit = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            port: 5001,
        };
        assert_eq!(explicit.advertised_host(), explicit.host);

        let wildcard = ServerConfig::default();
        assert!(wildcard.host.is_unspecified());
        assert!(!wildcard.advertised_host().is_unspecified());
    }

    #[test]
    fn environment_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PEPPER_PORT", "7000"),
            ("PEPPER_HOST", "127.0.0.1"),
            ("PEPPER_LOG_JSON", "1"),
            ("PEPPER_WHISPER_MODEL", "/models/ggml-base.en.bin"),
            ("PEPPER_LLM_URL", "http://llm:11434/api/generate"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert!(config.logging.json);
        assert_eq!(
            config.speech.whisper_model,
            Some(PathBuf::from("/models/ggml-base.en.bin"))
        );
        assert_eq!(config.speech.llm_url, "http://llm:11434/api/generate");
    }
}
