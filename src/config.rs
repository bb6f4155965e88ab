//! Client configuration parsing and validation.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::client::{ClientOptions, DispatchMode, DEFAULT_WRITE_QUEUE};
use crate::wire::lines::MAX_LINE_BYTES;
use crate::wire::message::Role;
use crate::{ClientError, Result};

/// Port of the engine's external module listener in the stock configuration.
pub const DEFAULT_PORT: u16 = 5039;

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_write_queue() -> usize {
    DEFAULT_WRITE_QUEUE
}

/// How the client reaches the engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Connect to the engine's TCP listener.
    Tcp {
        /// Listener host name or address.
        #[serde(default = "default_host")]
        host: String,
        /// Listener port.
        #[serde(default = "default_port")]
        port: u16,
    },
    /// Use standard input/output; the engine launched this process.
    Stdio,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Tcp {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Client configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Transport selection.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Role announced on connect.
    #[serde(default)]
    pub role: Role,
    /// Channel to attach to, for channel-bound roles.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Channel type; requires `channel_id`.
    #[serde(default)]
    pub channel_type: Option<String>,
    /// Where subscriber callbacks run.
    #[serde(default)]
    pub dispatch: DispatchMode,
    /// Inbound line length limit in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Depth of the outbound line queue.
    #[serde(default = "default_write_queue")]
    pub write_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            role: Role::default(),
            channel_id: None,
            channel_type: None,
            dispatch: DispatchMode::default(),
            max_line_bytes: MAX_LINE_BYTES,
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Connection options for [`ClientBuilder`](crate::client::ClientBuilder).
    #[must_use]
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            role: self.role,
            channel_id: self.channel_id.clone(),
            channel_type: self.channel_type.clone(),
            dispatch: self.dispatch,
            max_line_bytes: self.max_line_bytes,
            write_queue: self.write_queue,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(ClientError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        if self.write_queue == 0 {
            return Err(ClientError::Config(
                "write_queue must be greater than zero".into(),
            ));
        }

        if let TransportConfig::Tcp { host, .. } = &self.transport {
            if host.trim().is_empty() {
                return Err(ClientError::Config("transport.host must not be empty".into()));
            }
        }

        if self.channel_type.is_some() && self.channel_id.is_none() {
            return Err(ClientError::Config(
                "channel_type requires channel_id".into(),
            ));
        }

        Ok(())
    }
}
