/*!
 * Settings management for TeleGate.
 *
 * Settings are a flat, string-keyed view (`net.channel.type`, `server.port`, ...)
 * layered from built-in defaults, an optional file, environment variables and
 * explicit overrides. Typed accessors never fail for optional keys; the only
 * fallible accessors are the ones backing required settings.
 */
use std::path::Path;

use config::{Config as ConfigLib, Environment, File, Value as ConfigValue};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::types::{NetChannelType, RunType};

/// Transport selection
pub const NET_CHANNEL_TYPE: &str = "net.channel.type";
/// Server or client operation
pub const RUN_TYPE: &str = "run.type";
/// Bind address in server mode
pub const SERVER_HOST: &str = "server.host";
/// Bind port in server mode
pub const SERVER_PORT: &str = "server.port";
/// Serial device name
pub const RXTX_NAME: &str = "rxtx.name";
/// Serial baud rate
pub const RXTX_BAUDRATE: &str = "rxtx.baudrate";
/// Command keyword placed on every move request
pub const MOVE_REQUEST_CMD: &str = "move.request.cmd";
/// Routing target attached to state requests
pub const STATE_REQUEST_TARGET: &str = "state.request.target";
/// Routing target attached to move requests, defaults to the move command
pub const MOVE_REQUEST_TARGET: &str = "move.request.target";
/// Routing target attached to action requests, defaults to the action key
pub const ACTION_REQUEST_TARGET: &str = "action.request.target";
/// Name of the codec resolved from the codec registry
pub const CODEC_NAME: &str = "codec.name";
/// Telegram delimiter for stream transports
pub const FRAME_DELIMITER: &str = "net.frame.delimiter";
/// Maximum telegram length for stream transports
pub const FRAME_MAX_LENGTH: &str = "net.frame.max.length";
/// Receive buffer size for datagram transports
pub const UDP_BUFFER_SIZE: &str = "udp.buffer.size";
/// Remote endpoints dialled in client mode (`name=host:port`)
pub const CLIENT_ENDPOINTS: &str = "client.endpoints";
/// Send attempts before a command is reported as undeliverable
pub const REPEAT_MAX_ATTEMPTS: &str = "repeat.max.attempts";
/// Acknowledgement timeout of the first attempt
pub const REPEAT_ACK_TIMEOUT_MS: &str = "repeat.ack.timeout.ms";
/// Growth factor applied to the timeout after every attempt
pub const REPEAT_BACKOFF_MULTIPLIER: &str = "repeat.backoff.multiplier";
/// Upper bound for a single backoff interval
pub const REPEAT_MAX_BACKOFF_MS: &str = "repeat.max.backoff.ms";
/// Development mode flag
pub const DEV_MODE: &str = "dev.mode";
/// Default log filter
pub const LOG_LEVEL: &str = "log.level";
/// JSON log output
pub const LOG_JSON: &str = "log.json";

const DEFAULT_TCP_HOST: &str = "0.0.0.0";
const DEFAULT_TCP_PORT: i64 = 7070;
const DEFAULT_RXTX_NAME: &str = "COM3";
const DEFAULT_RXTX_BAUDRATE: i64 = 38400;

/// Resolved gateway settings
#[derive(Debug, Clone)]
pub struct Settings {
    inner: ConfigLib,
}

impl Settings {
    /// Settings made of the built-in defaults only
    pub fn defaults() -> Result<Self> {
        SettingsBuilder::new().build()
    }

    /// Settings made of the defaults plus the given overrides
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .iter()
            .fold(SettingsBuilder::new(), |builder, (k, v)| {
                builder.with_override(k.as_ref(), v.as_ref())
            })
            .build()
    }

    /// Get a string setting
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }

    /// Get a string setting or a default
    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    /// Get an integer setting or a default
    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        match self.inner.get_int(key) {
            Ok(v) => v,
            Err(config::ConfigError::NotFound(_)) => default,
            Err(e) => {
                warn!("Setting [{}] is not an integer ({}), using {}", key, e, default);
                default
            }
        }
    }

    /// Get a float setting or a default
    pub fn get_float_or(&self, key: &str, default: f64) -> f64 {
        match self.inner.get_float(key) {
            Ok(v) => v,
            Err(config::ConfigError::NotFound(_)) => default,
            Err(e) => {
                warn!("Setting [{}] is not a number ({}), using {}", key, e, default);
                default
            }
        }
    }

    /// Get a boolean setting or a default
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.inner.get_bool(key) {
            Ok(v) => v,
            Err(config::ConfigError::NotFound(_)) => default,
            Err(e) => {
                warn!("Setting [{}] is not a boolean ({}), using {}", key, e, default);
                default
            }
        }
    }

    /// Get a list setting. Accepts either an array or a comma separated string.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        if let Ok(values) = self.inner.get_array(key) {
            return values
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        self.get_string(key)
            .map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get a setting that must be present and non-blank
    pub fn require_string(&self, key: &str) -> Result<String> {
        match self.get_string(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(Error::config(format!(
                "Setting [{}] is required and must not be empty",
                key
            ))),
        }
    }

    /// Transport selection. An unparseable value falls back to UDP.
    pub fn net_channel_type(&self) -> NetChannelType {
        let raw = self.get_string_or(NET_CHANNEL_TYPE, "UDP");
        match raw.parse::<NetChannelType>() {
            Ok(kind) => kind,
            Err(e) => {
                error!("Invalid {} [{}]: {}, falling back to UDP", NET_CHANNEL_TYPE, raw, e);
                NetChannelType::Udp
            }
        }
    }

    /// Server or client operation. An unparseable value falls back to server.
    pub fn run_type(&self) -> RunType {
        let raw = self.get_string_or(RUN_TYPE, "SERVER");
        match raw.parse::<RunType>() {
            Ok(kind) => kind,
            Err(e) => {
                error!("Invalid {} [{}]: {}, falling back to SERVER", RUN_TYPE, raw, e);
                RunType::Server
            }
        }
    }

    /// Whether the gateway dials out to the vehicles
    pub fn is_client_run_type(&self) -> bool {
        self.run_type() == RunType::Client
    }

    /// Whether the gateway accepts connections from the vehicles
    pub fn is_server_run_type(&self) -> bool {
        self.run_type() == RunType::Server
    }

    /// Bind address; for serial lines this is the device name
    pub fn server_host(&self) -> String {
        match self.net_channel_type() {
            NetChannelType::Tcp | NetChannelType::Udp => {
                self.get_string_or(SERVER_HOST, DEFAULT_TCP_HOST)
            }
            NetChannelType::Rxtx => self.get_string_or(RXTX_NAME, DEFAULT_RXTX_NAME),
        }
    }

    /// Bind port; for serial lines this is the baud rate
    pub fn server_port(&self) -> u32 {
        let (key, default) = match self.net_channel_type() {
            NetChannelType::Tcp | NetChannelType::Udp => (SERVER_PORT, DEFAULT_TCP_PORT),
            NetChannelType::Rxtx => (RXTX_BAUDRATE, DEFAULT_RXTX_BAUDRATE),
        };
        let value = self.get_int_or(key, default);
        u32::try_from(value).unwrap_or_else(|_| {
            warn!("Setting [{}] out of range: {}, using {}", key, value, default);
            default as u32
        })
    }

    /// Command keyword placed on every move request
    pub fn move_request_cmd(&self) -> Result<String> {
        self.require_string(MOVE_REQUEST_CMD).map_err(|_| {
            Error::config(format!(
                "Move command keyword is not configured, set [{}] first",
                MOVE_REQUEST_CMD
            ))
        })
    }

    /// Routing target attached to state requests
    pub fn state_request_target(&self) -> String {
        self.get_string_or(STATE_REQUEST_TARGET, "state")
    }

    /// Routing target attached to move requests, if configured
    pub fn move_request_target(&self) -> Option<String> {
        self.get_string(MOVE_REQUEST_TARGET).filter(|s| !s.trim().is_empty())
    }

    /// Routing target attached to action requests, if configured
    pub fn action_request_target(&self) -> Option<String> {
        self.get_string(ACTION_REQUEST_TARGET).filter(|s| !s.trim().is_empty())
    }

    /// Name of the configured codec
    pub fn codec_name(&self) -> String {
        self.get_string_or(CODEC_NAME, "json")
    }

    /// Telegram delimiter for stream transports
    pub fn frame_delimiter(&self) -> u8 {
        let raw = self.get_string_or(FRAME_DELIMITER, "\n");
        let unescaped = match raw.as_str() {
            "\\n" => "\n",
            "\\r" => "\r",
            "\\0" => "\0",
            other => other,
        };
        match unescaped.as_bytes() {
            [b] => *b,
            _ => {
                warn!("Setting [{}] must be a single byte, using newline", FRAME_DELIMITER);
                b'\n'
            }
        }
    }

    /// Maximum telegram length for stream transports
    pub fn frame_max_length(&self) -> usize {
        self.get_int_or(FRAME_MAX_LENGTH, 64 * 1024).max(1) as usize
    }

    /// Receive buffer size for datagram transports
    pub fn udp_buffer_size(&self) -> usize {
        self.get_int_or(UDP_BUFFER_SIZE, 64 * 1024).max(512) as usize
    }

    /// Remote endpoints dialled in client mode
    pub fn client_endpoints(&self) -> Vec<String> {
        self.get_string_list(CLIENT_ENDPOINTS)
    }

    /// Development mode flag
    pub fn is_dev_mode(&self) -> bool {
        self.get_bool_or(DEV_MODE, false)
    }

    /// Default log filter
    pub fn log_level(&self) -> String {
        self.get_string_or(LOG_LEVEL, "info")
    }

    /// Whether logs are emitted as JSON
    pub fn log_json(&self) -> bool {
        self.get_bool_or(LOG_JSON, false)
    }
}

/// A builder for layering settings sources
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

impl SettingsBuilder {
    /// Create a new SettingsBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settings file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override a single key, taking precedence over every other source
    pub fn with_override<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        let mut builder = ConfigLib::builder();

        for (key, value) in default_values() {
            builder = builder.set_default(key, value)?;
        }

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading settings from {}", config_file);
                builder = builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Settings file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading settings from environment variables with prefix {}", prefix);
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        let inner = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build settings: {}", e)))?;

        info!("Settings loaded successfully");
        Ok(Settings { inner })
    }
}

fn default_values() -> Vec<(&'static str, ConfigValue)> {
    vec![
        (NET_CHANNEL_TYPE, "UDP".into()),
        (RUN_TYPE, "SERVER".into()),
        (CODEC_NAME, "json".into()),
        (STATE_REQUEST_TARGET, "state".into()),
        (REPEAT_MAX_ATTEMPTS, 3i64.into()),
        (REPEAT_ACK_TIMEOUT_MS, 2000i64.into()),
        (REPEAT_BACKOFF_MULTIPLIER, 2.0f64.into()),
        (REPEAT_MAX_BACKOFF_MS, 30_000i64.into()),
        (DEV_MODE, false.into()),
        (LOG_LEVEL, "info".into()),
        (LOG_JSON, false.into()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test_log::test]
    fn test_defaults() {
        let settings = Settings::defaults().unwrap();
        assert_eq!(settings.net_channel_type(), NetChannelType::Udp);
        assert_eq!(settings.run_type(), RunType::Server);
        assert_eq!(settings.server_host(), "0.0.0.0");
        assert_eq!(settings.server_port(), 7070);
        assert_eq!(settings.codec_name(), "json");
        assert_eq!(settings.frame_delimiter(), b'\n');
        assert!(settings.is_server_run_type());
        assert!(!settings.is_dev_mode());
    }

    #[test]
    fn test_move_request_cmd_is_required() {
        let settings = Settings::defaults().unwrap();
        let err = settings.move_request_cmd().unwrap_err();
        assert!(err.is_config());

        let settings = Settings::from_pairs(&[(MOVE_REQUEST_CMD, "   ")]).unwrap();
        assert!(settings.move_request_cmd().unwrap_err().is_config());

        let settings = Settings::from_pairs(&[(MOVE_REQUEST_CMD, "rptmt")]).unwrap();
        assert_eq!(settings.move_request_cmd().unwrap(), "rptmt");
    }

    #[test]
    fn test_invalid_channel_type_falls_back_to_udp() {
        let settings = Settings::from_pairs(&[(NET_CHANNEL_TYPE, "carrier-pigeon")]).unwrap();
        assert_eq!(settings.net_channel_type(), NetChannelType::Udp);

        let settings = Settings::from_pairs(&[(NET_CHANNEL_TYPE, "tcp")]).unwrap();
        assert_eq!(settings.net_channel_type(), NetChannelType::Tcp);
    }

    #[test]
    fn test_serial_host_and_port() {
        let settings = Settings::from_pairs(&[
            (NET_CHANNEL_TYPE, "RXTX"),
            (RXTX_NAME, "/dev/ttyUSB0"),
            (SERVER_PORT, "9999"),
        ])
        .unwrap();

        assert_eq!(settings.server_host(), "/dev/ttyUSB0");
        assert_eq!(settings.server_port(), 38400);
    }

    #[test]
    fn test_string_list() {
        let settings = Settings::from_pairs(&[(
            CLIENT_ENDPOINTS,
            "A001=10.0.0.5:4001, A002=10.0.0.6:4001,",
        )])
        .unwrap();

        assert_eq!(
            settings.client_endpoints(),
            vec!["A001=10.0.0.5:4001".to_string(), "A002=10.0.0.6:4001".to_string()]
        );
    }

    #[test]
    fn test_frame_delimiter_escapes() {
        let settings = Settings::from_pairs(&[(FRAME_DELIMITER, "\\r")]).unwrap();
        assert_eq!(settings.frame_delimiter(), b'\r');

        let settings = Settings::from_pairs(&[(FRAME_DELIMITER, "#")]).unwrap();
        assert_eq!(settings.frame_delimiter(), b'#');

        let settings = Settings::from_pairs(&[(FRAME_DELIMITER, "##")]).unwrap();
        assert_eq!(settings.frame_delimiter(), b'\n');
    }

    #[test]
    fn test_settings_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("telegate.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [net.channel]
                type = "TCP"

                [server]
                port = 6060

                [move.request]
                cmd = "setrout"
            "#,
            )?;
        }

        let settings = SettingsBuilder::new().with_config_file(&file_path).build()?;

        assert_eq!(settings.net_channel_type(), NetChannelType::Tcp);
        assert_eq!(settings.server_port(), 6060);
        assert_eq!(settings.move_request_cmd()?, "setrout");

        Ok(())
    }

    #[test]
    fn test_settings_builder_with_env() -> Result<()> {
        env::set_var("TGCFGTEST__SERVER__HOST", "192.168.1.20");

        let settings = SettingsBuilder::new()
            .with_environment_prefix("tgcfgtest")
            .build()?;

        assert_eq!(settings.server_host(), "192.168.1.20");

        env::remove_var("TGCFGTEST__SERVER__HOST");
        Ok(())
    }

    #[test]
    fn test_overrides_win() -> Result<()> {
        let settings = SettingsBuilder::new()
            .with_override(REPEAT_MAX_ATTEMPTS, "7")
            .with_override(DEV_MODE, "true")
            .build()?;

        assert_eq!(settings.get_int_or(REPEAT_MAX_ATTEMPTS, 3), 7);
        assert!(settings.is_dev_mode());
        assert_eq!(settings.get_int_or("no.such.key", 11), 11);
        Ok(())
    }
}
