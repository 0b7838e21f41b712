use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9100";
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_PG_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend '{other}' (expected memory or postgres)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

// Contact database service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ContactDbConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContactDbConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres: Option<PostgresConfigOverride>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgresConfigOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("parse {name}")),
        Err(_) => Ok(default),
    }
}

impl ContactDbConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("CONTACTDB_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse()
            .with_context(|| "parse CONTACTDB_BIND")?;
        let metrics_bind = std::env::var("CONTACTDB_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse CONTACTDB_METRICS_BIND")?;
        let storage = std::env::var("CONTACTDB_STORAGE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse::<StorageBackend>()
            .with_context(|| "parse CONTACTDB_STORAGE")?;
        let postgres = match std::env::var("CONTACTDB_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse(
                    "CONTACTDB_PG_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                connect_timeout_ms: env_parse(
                    "CONTACTDB_PG_CONNECT_TIMEOUT_MS",
                    DEFAULT_PG_TIMEOUT_MS,
                )?,
                acquire_timeout_ms: env_parse(
                    "CONTACTDB_PG_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CONTACTDB_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CONTACTDB_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ContactDbConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse contactdb config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value
                .parse::<StorageBackend>()
                .with_context(|| "parse storage")?;
        }
        if let Some(pg) = override_cfg.postgres {
            let current = self.postgres.take();
            let url = match (pg.url, current.as_ref()) {
                (Some(url), _) => Some(url),
                (None, Some(current)) => Some(current.url.clone()),
                (None, None) => None,
            };
            self.postgres = url.map(|url| PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(current.as_ref().map(|c| c.max_connections))
                    .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
                connect_timeout_ms: pg
                    .connect_timeout_ms
                    .or(current.as_ref().map(|c| c.connect_timeout_ms))
                    .unwrap_or(DEFAULT_PG_TIMEOUT_MS),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(current.as_ref().map(|c| c.acquire_timeout_ms))
                    .unwrap_or(DEFAULT_PG_TIMEOUT_MS),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("CONTACTDB_STORAGE=postgres requires CONTACTDB_POSTGRES_URL or postgres.url");
        }
        Ok(())
    }
}
