//! Server configuration — a TOML file with defaults for everything
//! except the GitHub OAuth client id.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "estuary.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("`client_id` in section `[auth]` must be set in {path}")]
    MissingClientId { path: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub federation: FederationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address. `0.0.0.0` for all interfaces.
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 2222,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// GitHub device-flow endpoints. Overridable so tests can point the
/// flow at a local stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Client ID of the GitHub OAuth app. Required; the device flow is
    /// useless without it.
    pub client_id: String,
    pub device_code_url: String,
    pub token_url: String,
    pub user_api_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            device_code_url: "https://github.com/login/device/code".into(),
            token_url: "https://github.com/login/oauth/access_token".into(),
            user_api_url: "https://api.github.com/user".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Shown to every user right after they connect.
    pub welcome_message: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            welcome_message: "Welcome to the estuary!".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Other estuary servers to federate with, as `host:port`.
    pub peers: Vec<String>,
}

/// Load and validate a config file.
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: display.clone(),
        source,
    })?;
    if config.auth.client_id.is_empty() {
        return Err(ConfigError::MissingClientId { path: display });
    }
    Ok(config)
}

/// Write a commented default config for the operator to edit.
pub fn write_default(path: impl AsRef<Path>) -> io::Result<()> {
    fs::write(path, DEFAULT_CONFIG.trim_start())
}

const DEFAULT_CONFIG: &str = r#"
# estuary.toml — configuration for an estuary server.

[server]
# The address and port the server listens on.
# Use 0.0.0.0 to listen on all interfaces.
host = "0.0.0.0"
port = 2222

[auth]
# The Client ID of your GitHub OAuth App. REQUIRED.
# Create one here: https://github.com/settings/applications/new
# (enable the Device Flow in the app settings)
client_id = ""

[chat]
# Shown to users after they connect.
welcome_message = "Welcome to the estuary!"

[federation]
# Other estuary servers to federate with.
# peers = ["otherhost:2222", "thirdhost:2222"]
peers = []
"#;
