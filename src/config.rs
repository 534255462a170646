use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::connectors::{ConnectionConfig, DatabaseEngine};

const DEFAULT_SQLITE_FILE: &str = "construction_schedule.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Credentials and timeouts for the chat-completions endpoint. Empty values
/// are allowed here; they surface as missing-credential errors on first use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub endpoint: String,
    pub generation_timeout_secs: u64,
    pub summary_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: String::new(),
            generation_timeout_secs: 30,
            summary_timeout_secs: 30,
            health_check_timeout_secs: 10,
        }
    }
}

impl LlmSettings {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.endpoint.trim().is_empty()
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Refuse statements that are not pure reads before they reach the database.
    pub read_only: bool,
    /// Rows printed for a result; the full result is still kept and summarized.
    pub display_row_limit: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            display_row_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub database: ConnectionConfig,
    pub pipeline: PipelineOptions,
}

// ── Secrets file layout ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    #[serde(rename = "AZURE_OPENAI_API_KEY")]
    openai_api_key: Option<String>,
    #[serde(rename = "AZURE_OPENAI_API_ENDPOINT")]
    openai_endpoint: Option<String>,
    azure_openai: Option<LlmSettings>,
    azure_sql: Option<SqlServerSection>,
    sqlite: Option<SqliteSection>,
    pipeline: Option<PipelineOptions>,
}

#[derive(Debug, Deserialize)]
struct SqlServerSection {
    server: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connection_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SqliteSection {
    path: String,
}

/// `tcp:host,1433` -> (`host`, Some(1433))
fn parse_server(server: &str) -> (String, Option<u16>) {
    let server = server.trim().trim_start_matches("tcp:");
    match server.split_once(',') {
        Some((host, port)) => (host.trim().to_string(), port.trim().parse().ok()),
        None => (server.to_string(), None),
    }
}

/// `sqlite:///schedule.db` or `sqlite://schedule.db` -> `schedule.db`
fn parse_sqlite_url(url: &str) -> Result<String, ConfigError> {
    url.strip_prefix("sqlite:///")
        .or_else(|| url.strip_prefix("sqlite://"))
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|p| p.to_string())
        .ok_or_else(|| ConfigError::Invalid(format!("unsupported DATABASE_URL: {}", url)))
}

fn sqlite_config(path: String) -> ConnectionConfig {
    ConnectionConfig {
        engine: DatabaseEngine::Sqlite,
        file_path: Some(path),
        ..Default::default()
    }
}

impl AppConfig {
    /// Load from a TOML secrets file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let secrets: SecretsFile = toml::from_str(text)?;

        let mut llm = secrets.azure_openai.unwrap_or_default();
        if let Some(key) = secrets.openai_api_key {
            llm.api_key = key;
        }
        if let Some(endpoint) = secrets.openai_endpoint {
            llm.endpoint = endpoint;
        }

        let database = match (secrets.azure_sql, secrets.sqlite) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "configure either [azure_sql] or [sqlite], not both".to_string(),
                ))
            }
            (Some(sql), None) => {
                let (host, port) = match sql.server.as_deref() {
                    Some(server) => {
                        let (host, port) = parse_server(server);
                        (Some(host), port)
                    }
                    None => (None, None),
                };
                ConnectionConfig {
                    engine: DatabaseEngine::SqlServer,
                    host,
                    port: sql.port.or(port),
                    database: sql.database,
                    username: sql.username,
                    password: sql.password,
                    connection_string: sql.connection_string,
                    ..Default::default()
                }
            }
            (None, Some(sqlite)) => sqlite_config(sqlite.path),
            (None, None) => sqlite_config(DEFAULT_SQLITE_FILE.to_string()),
        };

        Ok(Self {
            llm,
            database,
            pipeline: secrets.pipeline.unwrap_or_default(),
        })
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup using the environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut llm = LlmSettings {
            api_key: lookup("AZURE_OPENAI_API_KEY").unwrap_or_default(),
            endpoint: lookup("AZURE_OPENAI_API_ENDPOINT").unwrap_or_default(),
            ..Default::default()
        };
        if let Some(secs) = lookup("LLM_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("LLM_TIMEOUT_SECS: {}", secs)))?;
            llm.generation_timeout_secs = secs;
            llm.summary_timeout_secs = secs;
        }

        let database = if let Some(conn_str) = lookup("AZURE_SQL_CONNECTION_STRING") {
            ConnectionConfig {
                engine: DatabaseEngine::SqlServer,
                connection_string: Some(conn_str),
                ..Default::default()
            }
        } else if let Some(server) = lookup("AZURE_SQL_SERVER") {
            let (host, port) = parse_server(&server);
            ConnectionConfig {
                engine: DatabaseEngine::SqlServer,
                host: Some(host),
                port,
                database: lookup("AZURE_SQL_DATABASE"),
                username: lookup("AZURE_SQL_USERNAME"),
                password: lookup("AZURE_SQL_PASSWORD"),
                ..Default::default()
            }
        } else if let Some(url) = lookup("DATABASE_URL") {
            sqlite_config(parse_sqlite_url(&url)?)
        } else {
            sqlite_config(DEFAULT_SQLITE_FILE.to_string())
        };

        let pipeline = PipelineOptions {
            read_only: lookup("SCHEDULE_SQL_READ_ONLY")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ..Default::default()
        };

        Ok(Self {
            llm,
            database,
            pipeline,
        })
    }
}
