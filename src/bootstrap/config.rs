use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];
const DEFAULT_SEARCH_PATHS: [&str; 2] = ["./config", "."];
const ENV_PREFIX: &str = "APP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable configuration snapshot, built once at startup.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub log: LogSettings,
    pub jwt: JwtSettings,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            name: String::new(),
            connect_timeout_secs: 5,
        }
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("name", &self.name)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`, expected `text` or `json`")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JwtSettings {
    pub secret: String,
    pub expiration_hours: u32,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &redacted(&self.secret))
            .field("expiration_hours", &self.expiration_hours)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "<redacted>" }
}

impl Settings {
    /// Loads settings from the default search paths and the process environment.
    pub fn load() -> Result<LoadedSettings, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if LevelFilter::from_str(&self.log.level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "log.level `{}` is not a valid level",
                self.log.level
            )));
        }
        Ok(())
    }
}

/// Settings plus the config file they were read from, if any.
#[derive(Debug)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub source: Option<PathBuf>,
}

/// A configurable key, addressable both by its dotted path and by env var.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Key {
    ServerHost,
    ServerPort,
    ServerShutdownTimeout,
    DbHost,
    DbPort,
    DbUser,
    DbPassword,
    DbName,
    DbConnectTimeout,
    LogLevel,
    LogFormat,
    JwtSecret,
    JwtExpirationHours,
}

impl Key {
    const ALL: [Key; 13] = [
        Key::ServerHost,
        Key::ServerPort,
        Key::ServerShutdownTimeout,
        Key::DbHost,
        Key::DbPort,
        Key::DbUser,
        Key::DbPassword,
        Key::DbName,
        Key::DbConnectTimeout,
        Key::LogLevel,
        Key::LogFormat,
        Key::JwtSecret,
        Key::JwtExpirationHours,
    ];

    fn path(self) -> &'static str {
        match self {
            Key::ServerHost => "server.host",
            Key::ServerPort => "server.port",
            Key::ServerShutdownTimeout => "server.shutdown_timeout_secs",
            Key::DbHost => "database.host",
            Key::DbPort => "database.port",
            Key::DbUser => "database.user",
            Key::DbPassword => "database.password",
            Key::DbName => "database.name",
            Key::DbConnectTimeout => "database.connect_timeout_secs",
            Key::LogLevel => "log.level",
            Key::LogFormat => "log.format",
            Key::JwtSecret => "jwt.secret",
            Key::JwtExpirationHours => "jwt.expiration_hours",
        }
    }

    /// `server.port` binds to `APP_SERVER_PORT`.
    fn prefixed_var(self) -> String {
        format!(
            "{ENV_PREFIX}_{}",
            self.path().replace('.', "_").to_ascii_uppercase()
        )
    }

    fn assign(self, settings: &mut Settings, var: &str, value: &str) -> Result<(), ConfigError> {
        match self {
            Key::ServerHost => settings.server.host = value.to_string(),
            Key::ServerPort => settings.server.port = parse_env(var, value)?,
            Key::ServerShutdownTimeout => {
                settings.server.shutdown_timeout_secs = parse_env(var, value)?
            }
            Key::DbHost => settings.database.host = value.to_string(),
            Key::DbPort => settings.database.port = parse_env(var, value)?,
            Key::DbUser => settings.database.user = value.to_string(),
            Key::DbPassword => settings.database.password = value.to_string(),
            Key::DbName => settings.database.name = value.to_string(),
            Key::DbConnectTimeout => {
                settings.database.connect_timeout_secs = parse_env(var, value)?
            }
            Key::LogLevel => settings.log.level = value.to_string(),
            Key::LogFormat => settings.log.format = parse_env(var, value)?,
            Key::JwtSecret => settings.jwt.secret = value.to_string(),
            Key::JwtExpirationHours => settings.jwt.expiration_hours = parse_env(var, value)?,
        }
        Ok(())
    }
}

/// Unprefixed variables that win over everything else.
const OVERRIDES: [(&str, Key); 11] = [
    ("SERVER_HOST", Key::ServerHost),
    ("SERVER_PORT", Key::ServerPort),
    ("DB_HOST", Key::DbHost),
    ("DB_PORT", Key::DbPort),
    ("DB_USER", Key::DbUser),
    ("DB_PASSWORD", Key::DbPassword),
    ("DB_NAME", Key::DbName),
    ("LOG_LEVEL", Key::LogLevel),
    ("LOG_FORMAT", Key::LogFormat),
    ("JWT_SECRET", Key::JwtSecret),
    ("JWT_EXPIRATION_HOURS", Key::JwtExpirationHours),
];

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Layers defaults, an optional YAML file and the environment into [`Settings`].
///
/// Precedence, lowest first: built-in defaults, `config.yaml` (or
/// `config.yml`) from the first search path that has one, `APP_*` variables,
/// then the fixed override list (`SERVER_PORT`, `DB_HOST`, ...).
/// Empty variables count as unset.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env: HashMap<String, String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let env = env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self {
            search_paths: DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            env,
        }
    }

    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the environment snapshot the loader reads from.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn load(&self) -> Result<LoadedSettings, ConfigError> {
        let source = self.find_file();
        let mut settings = match &source {
            Some(path) => read_file(path)?,
            None => Settings::default(),
        };

        for key in Key::ALL {
            let var = key.prefixed_var();
            if let Some(value) = self.lookup(&var) {
                key.assign(&mut settings, &var, value)?;
            }
        }
        for (var, key) in OVERRIDES {
            if let Some(value) = self.lookup(var) {
                key.assign(&mut settings, var, value)?;
            }
        }

        settings.validate()?;
        Ok(LoadedSettings { settings, source })
    }

    fn lookup(&self, var: &str) -> Option<&str> {
        self.env
            .get(var)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn find_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find_map(|dir| {
            CONFIG_FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
    }
}

fn read_file(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    // An empty document deserializes to null; treat it as "no keys set".
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
