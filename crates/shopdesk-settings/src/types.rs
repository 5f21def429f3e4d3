//! Settings types. Every struct uses `#[serde(default)]` so a partial
//! settings file only has to name the values it changes.

use serde::{Deserialize, Serialize};

/// Deployment environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Deployment,
    Production,
}

impl Environment {
    /// Deployed environments seed the database on first start.
    pub fn seeds_database(self) -> bool {
        matches!(self, Self::Deployment | Self::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "deployment" => Ok(Self::Deployment),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub env: Environment,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub messenger: MessengerSettings,
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Prefix mounted in front of every API route.
    pub api_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path. `:memory:` opens a throwaway database.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: home_dir().join(".shopdesk").join("shopdesk.db").to_string_lossy().into_owned(),
        }
    }
}

/// Messaging platform webhook and chat agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerSettings {
    /// Token the platform echoes back during webhook verification.
    pub verify_token: String,
    /// Page access token for the Send API.
    pub page_access_token: String,
    /// Base URL of the Graph API.
    pub graph_url: String,
    pub graph_api_version: String,
    /// Base URL of the chat agent service.
    pub agent_url: String,
    /// Store the agent answers on behalf of.
    pub store_id: String,
    /// Quiet period before buffered fragments are forwarded.
    pub debounce_ms: u64,
    /// Timeout for the agent chat call.
    pub agent_timeout_ms: u64,
}

impl Default for MessengerSettings {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            page_access_token: String::new(),
            graph_url: "https://graph.facebook.com".to_string(),
            graph_api_version: "v11.0".to_string(),
            agent_url: "http://127.0.0.1:8001".to_string(),
            store_id: String::new(),
            debounce_ms: 10_000,
            agent_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub(crate) fn home_dir() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
}
