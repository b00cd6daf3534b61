//! Configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_DB_PATH: &str = "./data/intake.db";
const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_BLOB_DIR: &str = "./data/uploads";
const DEFAULT_BUCKET: &str = "ppdb";

/// Telegram transport settings. Absent when no bot token is configured.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub allowed_users: Vec<String>,
}

/// Where uploaded documents are stored.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Files under `dir`, served at `public_base`.
    Local { dir: PathBuf, public_base: String },
    /// Supabase-style object storage.
    Http {
        url: String,
        service_key: SecretString,
        bucket: String,
    },
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Allowed CORS origin for the dashboard; any origin when unset.
    pub cors_origin: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub storage: StorageConfig,
    /// JSON list of step definitions loaded into the catalog at startup.
    pub catalog_path: Option<PathBuf>,
    /// Sessions idle longer than this are dropped. `None` keeps them forever.
    pub session_idle: Option<Duration>,
    /// Directory for a daily-rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl IntakeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_port = match get("INTAKE_HTTP_PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "INTAKE_HTTP_PORT".into(),
                message: format!("{raw}: {e}"),
            })?,
            None => DEFAULT_HTTP_PORT,
        };

        let telegram = get("TELEGRAM_BOT_TOKEN").map(|token| TelegramConfig {
            bot_token: SecretString::from(token),
            allowed_users: get("TELEGRAM_ALLOWED_USERS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        });

        let storage = match get("STORAGE_URL") {
            Some(url) => StorageConfig::Http {
                url,
                service_key: SecretString::from(
                    get("STORAGE_SERVICE_KEY")
                        .ok_or_else(|| ConfigError::MissingEnvVar("STORAGE_SERVICE_KEY".into()))?,
                ),
                bucket: get("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            },
            None => StorageConfig::Local {
                dir: PathBuf::from(
                    get("INTAKE_BLOB_DIR").unwrap_or_else(|| DEFAULT_BLOB_DIR.to_string()),
                ),
                public_base: get("INTAKE_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| format!("http://localhost:{http_port}/files")),
            },
        };

        let session_idle = match get("INTAKE_SESSION_IDLE_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
                    key: "INTAKE_SESSION_IDLE_SECS".into(),
                    message: format!("{raw}: {e}"),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            db_path: PathBuf::from(
                get("INTAKE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            ),
            http_port,
            cors_origin: get("INTAKE_CORS_ORIGIN"),
            telegram,
            storage,
            catalog_path: get("INTAKE_CATALOG_PATH").map(PathBuf::from),
            session_idle,
            log_dir: get("INTAKE_LOG_DIR").map(PathBuf::from),
        })
    }
}
