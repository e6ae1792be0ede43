use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "test.deribit.com";
pub const DEFAULT_PORT: &str = "443";
pub const DEFAULT_PATH: &str = "/ws/api/v2";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("tradelink/", env!("CARGO_PKG_VERSION"));
pub const MAX_WORKER_THREADS: usize = 2;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: Secret<String>,
    pub client_secret: Secret<String>,
    pub host: String,
    pub port: String,
    pub path: String,
    /// Deadline for resolve + TCP connect combined
    pub connect_timeout: Duration,
    /// Reactor pool size, clamped to `1..=MAX_WORKER_THREADS`
    pub worker_threads: usize,
    pub user_agent: String,
    /// Skip certificate verification (test endpoints only)
    pub accept_invalid_certs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: Secret::new(String::new()),
            client_secret: Secret::new(String::new()),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            path: DEFAULT_PATH.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            worker_threads: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: false,
        }
    }
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for SessionConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SessionConfig", 9)?;
        state.serialize_field("client_id", "[REDACTED]")?;
        state.serialize_field("client_secret", "[REDACTED]")?;
        state.serialize_field("host", &self.host)?;
        state.serialize_field("port", &self.port)?;
        state.serialize_field("path", &self.path)?;
        state.serialize_field("connect_timeout_secs", &self.connect_timeout.as_secs())?;
        state.serialize_field("worker_threads", &self.worker_threads)?;
        state.serialize_field("user_agent", &self.user_agent)?;
        state.serialize_field("accept_invalid_certs", &self.accept_invalid_certs)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for SessionConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct SessionConfigHelper {
            client_id: String,
            client_secret: String,
            host: Option<String>,
            port: Option<String>,
            path: Option<String>,
            connect_timeout_secs: Option<u64>,
            worker_threads: Option<usize>,
            user_agent: Option<String>,
            #[serde(default)]
            accept_invalid_certs: bool,
        }

        let helper = SessionConfigHelper::deserialize(deserializer)?;
        let defaults = Self::default();
        Ok(Self {
            client_id: Secret::new(helper.client_id),
            client_secret: Secret::new(helper.client_secret),
            host: helper.host.unwrap_or(defaults.host),
            port: helper.port.unwrap_or(defaults.port),
            path: helper.path.unwrap_or(defaults.path),
            connect_timeout: helper
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            worker_threads: clamp_workers(helper.worker_threads.unwrap_or(1)),
            user_agent: helper.user_agent.unwrap_or(defaults.user_agent),
            accept_invalid_certs: helper.accept_invalid_certs,
        })
    }
}

impl SessionConfig {
    /// Create a configuration with client credentials and the default endpoint
    #[must_use]
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id: Secret::new(client_id),
            client_secret: Secret::new(client_secret),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_CLIENT_ID` (e.g., `DERIBIT_CLIENT_ID`)
    /// - `{PREFIX}_CLIENT_SECRET`
    /// - `{PREFIX}_HOST`, `{PREFIX}_PORT`, `{PREFIX}_PATH` (optional)
    /// - `{PREFIX}_CONNECT_TIMEOUT_SECS` (optional, defaults to 30)
    /// - `{PREFIX}_WORKER_THREADS` (optional, defaults to 1)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let client_id_var = var("CLIENT_ID");
        let client_secret_var = var("CLIENT_SECRET");

        let client_id = env::var(&client_id_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(client_id_var))?;
        let client_secret = env::var(&client_secret_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(client_secret_var))?;

        let mut config = Self::new(client_id, client_secret);

        if let Ok(host) = env::var(var("HOST")) {
            config.host = host;
        }
        if let Ok(port) = env::var(var("PORT")) {
            config.port = port;
        }
        if let Ok(path) = env::var(var("PATH")) {
            config.path = path;
        }
        if let Ok(raw) = env::var(var("CONNECT_TIMEOUT_SECS")) {
            let secs = raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    var("CONNECT_TIMEOUT_SECS"),
                    raw
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = env::var(var("WORKER_THREADS")) {
            let workers = raw.parse::<usize>().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "{} must be a positive integer, got '{}'",
                    var("WORKER_THREADS"),
                    raw
                ))
            })?;
            config.worker_threads = clamp_workers(workers);
        }

        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // No .env file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Load configuration trying `.env.local`, `.env.{ENVIRONMENT}`, then `.env`
    ///
    /// Only the first file found is loaded.
    #[cfg(feature = "env-file")]
    pub fn from_env_auto(prefix: &str) -> Result<Self, ConfigError> {
        let env_files = [
            ".env.local".to_string(),
            format!(
                ".env.{}",
                env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
            ),
            ".env".to_string(),
        ];

        for env_file in &env_files {
            match dotenv::from_path(env_file) {
                Ok(_) => break,
                Err(dotenv::Error::Io(io_err))
                    if io_err.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "Failed to load .env file '{}': {}",
                        env_file, e
                    )));
                }
            }
        }

        Self::from_env(prefix)
    }

    /// Check if this configuration has credentials for `public/auth`
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.client_id.expose_secret().is_empty() && !self.client_secret.expose_secret().is_empty()
    }

    /// Set the remote endpoint
    #[must_use]
    pub fn endpoint(mut self, host: &str, port: &str, path: &str) -> Self {
        self.host = host.to_string();
        self.port = port.to_string();
        self.path = path.to_string();
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = clamp_workers(workers);
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Get client id (use carefully - exposes secret)
    pub fn client_id(&self) -> &str {
        self.client_id.expose_secret()
    }

    /// Get client secret (use carefully - exposes secret)
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

fn clamp_workers(workers: usize) -> usize {
    workers.clamp(1, MAX_WORKER_THREADS)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
