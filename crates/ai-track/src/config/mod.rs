use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: &str = "3333";
const DEFAULT_CREDENTIALS_FILE: &str = "serviceAccountKey.json";
const DEFAULT_WEIGHTS_PATH: &str = "model/weights.json";
const DEFAULT_GATEWAY_TIMEOUT_SECS: &str = "10";
const DEFAULT_MIGRATION_PAGE_SIZE: &str = "300";
const MAX_MIGRATION_PAGE_SIZE: u32 = 1000;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration shared by the API server and the migration tool.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub gateway: GatewayConfig,
    pub model: ModelConfig,
    pub migration: MigrationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| DEFAULT_PORT.to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let credentials = match env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
            _ => {
                let fallback = Path::new(DEFAULT_CREDENTIALS_FILE);
                fallback.exists().then(|| fallback.to_path_buf())
            }
        };

        let timeout_secs = env::var("GATEWAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_GATEWAY_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidTimeout)?;

        let weights_path = env::var("MODEL_WEIGHTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WEIGHTS_PATH));

        let page_size = env::var("MIGRATION_PAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_MIGRATION_PAGE_SIZE.to_string())
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidPageSize)
            .and_then(MigrationConfig::validate_page_size)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            gateway: GatewayConfig {
                credentials,
                request_timeout: Duration::from_secs(timeout_secs),
            },
            model: ModelConfig { weights_path },
            migration: MigrationConfig { page_size },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the service-account credentials live and how long a gateway call may take.
///
/// `credentials` is `None` when neither the environment nor the working directory
/// provides a key file; the API then runs without persistence.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub credentials: Option<PathBuf>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub weights_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub page_size: u32,
}

impl MigrationConfig {
    pub fn validate_page_size(page_size: u32) -> Result<u32, ConfigError> {
        if (1..=MAX_MIGRATION_PAGE_SIZE).contains(&page_size) {
            Ok(page_size)
        } else {
            Err(ConfigError::InvalidPageSize)
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTimeout,
    InvalidPageSize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTimeout => {
                write!(f, "GATEWAY_TIMEOUT_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidPageSize => write!(
                f,
                "MIGRATION_PAGE_SIZE must be between 1 and {MAX_MIGRATION_PAGE_SIZE}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidTimeout
            | ConfigError::InvalidPageSize => None,
        }
    }
}
