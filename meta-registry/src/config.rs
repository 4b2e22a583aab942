use std::ops::Deref;
use std::str::FromStr;

use envconfig::Envconfig;
use url::Url;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8000")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub postgres: PostgresConfig,

    #[envconfig(from = "PG_POOL_MIN", default = "2")]
    pub min_pg_connections: u32,

    #[envconfig(from = "PG_POOL_MAX", default = "20")]
    pub max_pg_connections: u32,

    #[envconfig(from = "PG_ACQUIRE_TIMEOUT_SECS", default = "10")]
    pub pg_acquire_timeout_secs: u64,

    #[envconfig(from = "TRANSACTIONAL", default = "true")]
    pub transactional: FlexBool,

    #[envconfig(from = "MEMORY_STORE", default = "false")]
    pub memory_store: FlexBool,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: FlexBool,

    #[envconfig(from = "MAX_BODY_SIZE", default = "10000000")]
    pub max_body_size: usize,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn database_url(&self) -> String {
        self.postgres.database_url()
    }

    /// The database url with its password masked, safe to log.
    pub fn redacted_database_url(&self) -> String {
        redact_password(&self.database_url())
    }
}

/// Connection settings for the metadata database. `PG_URI` wins over the individual parts.
#[derive(Envconfig, Clone, Debug)]
pub struct PostgresConfig {
    #[envconfig(from = "PG_URI")]
    pub uri: Option<String>,

    #[envconfig(from = "PG_USER", default = "paimon")]
    pub user: String,

    #[envconfig(from = "PG_PASSWORD", default = "paimon123")]
    pub password: String,

    #[envconfig(from = "PG_HOST", default = "postgres")]
    pub host: String,

    #[envconfig(from = "PG_PORT", default = "5432")]
    pub port: u16,

    #[envconfig(from = "PG_DB", default = "paimon_db")]
    pub database: String,
}

impl PostgresConfig {
    pub fn database_url(&self) -> String {
        match self.uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => uri.to_owned(),
            _ => format!(
                "postgresql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.database
            ),
        }
    }
}

fn redact_password(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("***")).is_err() {
                return String::from("<unparseable database url>");
            }
            url.to_string()
        }
        Err(_) => String::from("<unparseable database url>"),
    }
}

/// A boolean that also accepts the usual spellings found in env files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<bool> for FlexBool {
    fn from(value: bool) -> Self {
        FlexBool(value)
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
