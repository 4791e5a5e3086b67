use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use planrun_core::SyncConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["planrun.toml", "config/planrun.toml"];

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DEMO_STEP_DELAY_MS: u64 = 750;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub sync: SyncConfig,
    pub demo: DemoConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Empty or `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub step_delay_ms: u64,
}

impl DemoConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
            },
            sync: SyncConfig::default(),
            demo: DemoConfig {
                step_delay_ms: DEFAULT_DEMO_STEP_DELAY_MS,
            },
            metadata: ConfigMetadata::default(),
        }
    }
}

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    #[serde(default)]
    pub sync: FileSyncConfig,
    #[serde(default)]
    pub demo: FileDemoConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSyncConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_buffer: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_preview_len: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDemoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_delay_ms: Option<u64>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub queue_capacity: Option<usize>,
    pub max_concurrent_runs: Option<usize>,
    pub demo_step_delay_ms: Option<u64>,
    pub config_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `gather` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            server_host: read("SERVER_HOST"),
            server_port: parse_var("SERVER_PORT", read("SERVER_PORT"))?,
            cors_allowed_origins: read("CORS_ALLOWED_ORIGINS").map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            queue_capacity: parse_var("PLANRUN_QUEUE_CAPACITY", read("PLANRUN_QUEUE_CAPACITY"))?,
            max_concurrent_runs: parse_var(
                "PLANRUN_MAX_CONCURRENT_RUNS",
                read("PLANRUN_MAX_CONCURRENT_RUNS"),
            )?,
            demo_step_delay_ms: parse_var(
                "PLANRUN_DEMO_STEP_DELAY_MS",
                read("PLANRUN_DEMO_STEP_DELAY_MS"),
            )?,
            config_path: read("PLANRUN_CONFIG_PATH").map(PathBuf::from),
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigLoadError> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigLoadError::InvalidEnv { key, value })
    })
    .transpose()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    entries: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(&mut self, message: impl Into<String>, hint: impl Into<String>) {
        self.entries.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.entries.iter()
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
struct ConfigLoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, the TOML file, and the process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(EnvConfig::gather()?)?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose a configuration from an already gathered environment.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = if let Some(explicit) = &self.options.config_path {
            (Some(explicit.clone()), true)
        } else if let Some(from_env) = &env.config_path {
            (Some(from_env.clone()), true)
        } else {
            let found = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
            (found, false)
        };

        let Some(path) = path else {
            return Ok((None, None));
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No planrun.toml detected; using defaults and environment variables",
            "Create planrun.toml or set PLANRUN_CONFIG_PATH to customise the runtime",
        );
    }

    let defaults = Config::default();
    let FileConfig {
        server: file_server,
        cors: file_cors,
        sync: file_sync,
        demo: file_demo,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or(defaults.server.host),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(defaults.server.port),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or(defaults.cors.allowed_origins),
    };

    let sync = SyncConfig {
        queue_capacity: env
            .queue_capacity
            .or(file_sync.queue_capacity)
            .unwrap_or(defaults.sync.queue_capacity),
        subscriber_buffer: file_sync
            .subscriber_buffer
            .unwrap_or(defaults.sync.subscriber_buffer),
        max_concurrent_runs: env
            .max_concurrent_runs
            .or(file_sync.max_concurrent_runs)
            .unwrap_or(defaults.sync.max_concurrent_runs),
        shutdown_grace_ms: file_sync
            .shutdown_grace_ms
            .unwrap_or(defaults.sync.shutdown_grace_ms),
        summary_preview_len: file_sync
            .summary_preview_len
            .unwrap_or(defaults.sync.summary_preview_len),
    };

    for (field, value) in [
        ("sync.queue_capacity", sync.queue_capacity),
        ("sync.subscriber_buffer", sync.subscriber_buffer),
        ("sync.max_concurrent_runs", sync.max_concurrent_runs),
    ] {
        if value == 0 {
            return Err(ConfigLoadError::InvalidValue {
                field,
                reason: "must be at least 1".to_string(),
            });
        }
    }

    if sync.queue_capacity < sync.max_concurrent_runs {
        warnings.push(format!(
            "sync.queue_capacity ({}) is below sync.max_concurrent_runs ({}); push updates will be dropped under load",
            sync.queue_capacity, sync.max_concurrent_runs
        ));
    }

    let demo = DemoConfig {
        step_delay_ms: env
            .demo_step_delay_ms
            .or(file_demo.step_delay_ms)
            .unwrap_or(defaults.demo.step_delay_ms),
    };

    let config = Config {
        server,
        cors,
        sync,
        demo,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    Ok((config, warnings))
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("{field} is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("failed to load .env file")]
    Dotenv(#[from] dotenvy::Error),
}
