use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid DATABASE_URL: {0}")]
    InvalidDatabaseUrl(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Connection target, pool bounds, timeouts and supervision timings for the
/// database connection manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full DSN. When set it takes precedence over the individual parts below.
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub timezone: String,

    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    pub conn_max_lifetime: Duration,
    pub conn_max_idle_time: Duration,

    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub health_check_timeout: Duration,

    pub retry_attempts: u32,
    pub retry_delay: Duration,

    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
    pub health_cache_ttl: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "postgres".to_string(),
            ssl_mode: "disable".to_string(),
            timezone: "UTC".to_string(),
            max_open_connections: 25,
            max_idle_connections: 5,
            conn_max_lifetime: Duration::from_secs(5 * 60),
            conn_max_idle_time: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            health_cache_ttl: Duration::from_secs(10),
        }
    }
}

impl DatabaseConfig {
    /// Number of connect attempts; a configured zero still makes one attempt.
    pub fn effective_retry_attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    /// Build the postgres connection string. Credentials are percent-encoded by `url`.
    pub fn connection_string(&self) -> Result<String, ConfigError> {
        if let Some(raw) = &self.url {
            let url = url::Url::parse(raw).map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;
            return Ok(url.into());
        }

        let mut url = url::Url::parse(&format!("postgres://{}:{}", self.host, self.port))
            .map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;
        url.set_username(&self.user)
            .map_err(|_| ConfigError::InvalidDatabaseUrl("cannot set username".into()))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| ConfigError::InvalidDatabaseUrl("cannot set password".into()))?;
        }
        url.set_path(&format!("/{}", self.name));
        url.query_pairs_mut().append_pair("sslmode", &self.ssl_mode);
        Ok(url.into())
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted_connection_string(&self) -> String {
        match self.connection_string().and_then(|s| {
            url::Url::parse(&s).map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))
        }) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.into()
            }
            Err(_) => "<invalid database url>".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_open_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_MAX_OPEN_CONNS",
                reason: "must be at least 1".into(),
            });
        }
        for (key, value) in [
            ("DB_HEALTH_INTERVAL", self.health_check_interval),
            ("DB_METRICS_INTERVAL", self.metrics_interval),
            ("DB_HEALTH_TIMEOUT", self.health_check_timeout),
            ("DB_CONNECT_TIMEOUT", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid { key, reason: "must be greater than zero".into() });
            }
        }
        self.connection_string().map(|_| ())
    }
}

impl AppConfig {
    /// Load from the process environment. Malformed values keep their defaults
    /// and come back as warnings for the caller to log.
    pub fn from_env() -> (Self, Vec<ConfigWarning>) {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup. `from_env` is this with `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigWarning>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvOverrides {
            lookup,
            warnings: Vec::new(),
        };

        let environment = match env.get("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        let config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(&mut env);

        (config, env.warnings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }

    fn with_overrides<F>(mut self, env: &mut EnvOverrides<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(v) = env.get("APP_HOST") {
            self.server.host = v;
        }
        env.parsed("APP_PORT", &mut self.server.port);
        env.duration("APP_REQUEST_TIMEOUT", &mut self.server.request_timeout);
        if let Some(v) = env.get("CORS_ORIGINS") {
            self.server.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Logging overrides
        if let Some(v) = env.get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        match env.get("LOG_FORMAT").as_deref() {
            Some("json") => self.logging.format = LogFormat::Json,
            Some("pretty") | Some("text") => self.logging.format = LogFormat::Pretty,
            Some(other) => env.warn("LOG_FORMAT", other, "unknown log format"),
            None => {}
        }

        // Database overrides
        let db = &mut self.database;
        if let Some(v) = env.get("DATABASE_URL").filter(|v| !v.is_empty()) {
            db.url = Some(v);
        }
        if let Some(v) = env.get("DB_HOST") {
            db.host = v;
        }
        env.parsed("DB_PORT", &mut db.port);
        if let Some(v) = env.get("DB_USER") {
            db.user = v;
        }
        if let Some(v) = env.get("DB_PASSWORD") {
            db.password = v;
        }
        if let Some(v) = env.get("DB_NAME") {
            db.name = v;
        }
        if let Some(v) = env.get("DB_SSLMODE") {
            db.ssl_mode = v;
        }
        if let Some(v) = env.get("DB_TIMEZONE").filter(|v| !v.is_empty()) {
            db.timezone = v;
        }
        env.parsed("DB_MAX_OPEN_CONNS", &mut db.max_open_connections);
        env.parsed("DB_MAX_IDLE_CONNS", &mut db.max_idle_connections);
        env.duration("DB_CONN_MAX_LIFETIME", &mut db.conn_max_lifetime);
        env.duration("DB_CONN_MAX_IDLE_TIME", &mut db.conn_max_idle_time);
        env.duration("DB_CONNECT_TIMEOUT", &mut db.connect_timeout);
        env.duration("DB_QUERY_TIMEOUT", &mut db.query_timeout);
        env.duration("DB_HEALTH_TIMEOUT", &mut db.health_check_timeout);
        env.parsed("DB_RETRY_ATTEMPTS", &mut db.retry_attempts);
        env.duration("DB_RETRY_DELAY", &mut db.retry_delay);
        env.duration("DB_HEALTH_INTERVAL", &mut db.health_check_interval);
        env.duration("DB_METRICS_INTERVAL", &mut db.metrics_interval);
        env.duration("DB_HEALTH_CACHE_TTL", &mut db.health_cache_ttl);

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout: Duration::from_secs(30),
                cors_origins: vec!["*".to_string()],
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout: Duration::from_secs(30),
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            database: DatabaseConfig {
                ssl_mode: "require".to_string(),
                ..DatabaseConfig::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout: Duration::from_secs(15),
                cors_origins: Vec::new(),
            },
            database: DatabaseConfig {
                ssl_mode: "require".to_string(),
                retry_attempts: 5,
                retry_delay: Duration::from_secs(2),
                ..DatabaseConfig::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// A config value that could not be used; the default was kept instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ignoring {} for {}: {:?}", self.reason, self.key, self.value)
    }
}

struct EnvOverrides<F> {
    lookup: F,
    warnings: Vec<ConfigWarning>,
}

impl<F> EnvOverrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn warn(&mut self, key: &'static str, value: &str, reason: &'static str) {
        self.warnings.push(ConfigWarning {
            key,
            value: value.to_string(),
            reason,
        });
    }

    fn parsed<T: FromStr>(&mut self, key: &'static str, target: &mut T) {
        if let Some(raw) = self.get(key) {
            match raw.trim().parse() {
                Ok(v) => *target = v,
                Err(_) => self.warn(key, &raw, "malformed value"),
            }
        }
    }

    fn duration(&mut self, key: &'static str, target: &mut Duration) {
        if let Some(raw) = self.get(key) {
            match parse_duration(&raw) {
                Some(v) => *target = v,
                None => self.warn(key, &raw, "malformed duration"),
            }
        }
    }
}

/// Accepts humantime strings ("500ms", "5m", "1h 30m") or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}
