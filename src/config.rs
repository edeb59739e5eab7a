//! Configuration types.
//!
//! Only `main` reads the process environment (via [`AppConfig::from_env`]);
//! everything else receives these structs through constructors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// HTTP ingestion gateway publishing to Pub/Sub.
    Gateway,
    /// Pub/Sub push endpoint writing to the record store.
    Worker,
    /// Gateway and worker in one process, joined by an in-memory broker.
    Standalone,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gateway" | "api" => Ok(Self::Gateway),
            "worker" => Ok(Self::Worker),
            "standalone" | "all" => Ok(Self::Standalone),
            other => Err(ConfigError::InvalidValue {
                key: "LOG_INGEST_ROLE".into(),
                message: format!("unknown role '{other}' (expected gateway, worker or standalone)"),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gateway => "gateway",
            Self::Worker => "worker",
            Self::Standalone => "standalone",
        };
        write!(f, "{s}")
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Google Pub/Sub publisher settings.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic_id: String,
    /// `host:port` of a Pub/Sub emulator. When set, requests go there over
    /// plain HTTP.
    pub emulator_host: Option<String>,
    /// Static OAuth2 bearer token. Google access tokens expire after about
    /// an hour, so this only suits short runs; use `access_token_file` for a
    /// long-lived gateway.
    pub access_token: Option<SecretString>,
    /// File holding the current bearer token, re-read on every publish so an
    /// external refresher can rotate it. Takes precedence over `access_token`.
    pub access_token_file: Option<PathBuf>,
    /// Upper bound on a single publish call.
    pub timeout: Duration,
}

impl PubSubConfig {
    pub fn new(project_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topic_id: topic_id.into(),
            emulator_host: None,
            access_token: None,
            access_token_file: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Fully-qualified topic name, `projects/{project}/topics/{topic}`.
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic_id)
    }

    /// Base URL of the REST API, without trailing slash.
    pub fn endpoint(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => "https://pubsub.googleapis.com/v1".to_string(),
        }
    }
}

/// Record store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file, or `:memory:` for a throwaway in-memory store.
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/log-ingest.db"),
        }
    }
}

/// Simulated heavy processing: a fixed delay per character, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingDelay {
    pub per_char: Duration,
    pub cap: Duration,
}

impl ProcessingDelay {
    /// No delay at all.
    pub fn none() -> Self {
        Self {
            per_char: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    /// Delay for a text of `chars` characters.
    pub fn for_length(&self, chars: usize) -> Duration {
        let chars = u32::try_from(chars).unwrap_or(u32::MAX);
        self.per_char.saturating_mul(chars).min(self.cap)
    }
}

impl Default for ProcessingDelay {
    fn default() -> Self {
        Self {
            per_char: Duration::from_millis(50),
            cap: Duration::from_secs(30),
        }
    }
}

/// Settings for the in-process broker used in standalone mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// How long a delivery may stay unacknowledged before it is redelivered.
    pub ack_deadline: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(60),
        }
    }
}

/// Everything `main` needs to assemble a process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: Role,
    pub server: ServerConfig,
    /// Required for the gateway role, unused otherwise.
    pub pubsub: Option<PubSubConfig>,
    pub store: StoreConfig,
    pub delay: ProcessingDelay,
    pub broker: BrokerConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let role = match var("LOG_INGEST_ROLE") {
            Some(raw) => raw.parse()?,
            None => Role::Standalone,
        };

        let server = ServerConfig {
            host: var("LOG_INGEST_HOST").unwrap_or_else(|| ServerConfig::default().host),
            port: parse_or(var("PORT"), "PORT", ServerConfig::default().port)?,
        };

        let pubsub = match var("GCP_PROJECT_ID") {
            Some(project_id) => {
                let mut pubsub = PubSubConfig::new(
                    project_id,
                    var("PUBSUB_TOPIC_ID").unwrap_or_else(|| "ingest-topic".to_string()),
                );
                pubsub.emulator_host = var("PUBSUB_EMULATOR_HOST");
                pubsub.access_token = var("PUBSUB_ACCESS_TOKEN").map(SecretString::from);
                pubsub.access_token_file = var("PUBSUB_ACCESS_TOKEN_FILE").map(PathBuf::from);
                pubsub.timeout = Duration::from_secs(parse_or(
                    var("PUBSUB_TIMEOUT_SECS"),
                    "PUBSUB_TIMEOUT_SECS",
                    10u64,
                )?);
                Some(pubsub)
            }
            None if role == Role::Gateway => {
                return Err(ConfigError::MissingEnvVar("GCP_PROJECT_ID".into()));
            }
            None => None,
        };

        let store = StoreConfig {
            db_path: var("LOG_INGEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| StoreConfig::default().db_path),
        };

        let default_delay = ProcessingDelay::default();
        let delay = ProcessingDelay {
            per_char: Duration::from_millis(parse_or(
                var("LOG_INGEST_DELAY_PER_CHAR_MS"),
                "LOG_INGEST_DELAY_PER_CHAR_MS",
                default_delay.per_char.as_millis() as u64,
            )?),
            cap: Duration::from_secs(parse_or(
                var("LOG_INGEST_DELAY_CAP_SECS"),
                "LOG_INGEST_DELAY_CAP_SECS",
                default_delay.cap.as_secs(),
            )?),
        };

        let ack_deadline_secs: u64 = parse_or(
            var("LOG_INGEST_ACK_DEADLINE_SECS"),
            "LOG_INGEST_ACK_DEADLINE_SECS",
            BrokerConfig::default().ack_deadline.as_secs(),
        )?;
        if ack_deadline_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LOG_INGEST_ACK_DEADLINE_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            role,
            server,
            pubsub,
            store,
            delay,
            broker: BrokerConfig {
                ack_deadline: Duration::from_secs(ack_deadline_secs),
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
