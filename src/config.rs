use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sqlx::sqlite::SqliteSynchronous;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
}

/// Settings for the backing store handle shared by every request.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub consistency: Consistency,
}

/// How far a write must get before the store acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Consistency {
    /// Synced at WAL checkpoints only.
    Normal,
    /// Synced on every commit.
    Full,
    /// Synced on every commit, including the directory entry.
    Extra,
}

impl From<Consistency> for SqliteSynchronous {
    fn from(level: Consistency) -> Self {
        match level {
            Consistency::Normal => SqliteSynchronous::Normal,
            Consistency::Full => SqliteSynchronous::Full,
            Consistency::Extra => SqliteSynchronous::Extra,
        }
    }
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked object gateway over a SQL row store")]
pub struct Args {
    /// Host to bind to (overrides OBJECTDB_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECTDB_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides OBJECTDB_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Store connection pool size (overrides OBJECTDB_MAX_CONNECTIONS)
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Write consistency level (overrides OBJECTDB_CONSISTENCY)
    #[arg(long, value_enum)]
    pub consistency: Option<Consistency>,

    /// Create the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::merge(
            args.host,
            args.port,
            args.database_url,
            args.max_connections,
            args.consistency,
        )?;
        Ok((cfg, args.migrate))
    }

    fn merge(
        host: Option<String>,
        port: Option<u16>,
        database_url: Option<String>,
        max_connections: Option<u32>,
        consistency: Option<Consistency>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("OBJECTDB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("OBJECTDB_PORT", 7070u16)?;
        let env_db = env::var("OBJECTDB_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/objectdb.db".into());
        let env_max_connections = env_or("OBJECTDB_MAX_CONNECTIONS", 8u32)?;
        let env_consistency = env_or("OBJECTDB_CONSISTENCY", Consistency::Full)?;

        // --- Merge ---
        Ok(Self {
            host: host.unwrap_or(env_host),
            port: port.unwrap_or(env_port),
            store: StoreConfig {
                database_url: database_url.unwrap_or(env_db),
                max_connections: max_connections.unwrap_or(env_max_connections).max(1),
                consistency: consistency.unwrap_or(env_consistency),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_parses_case_insensitively() {
        assert_eq!("full".parse::<Consistency>(), Ok(Consistency::Full));
        assert_eq!("EXTRA".parse::<Consistency>(), Ok(Consistency::Extra));
        assert!("quorum".parse::<Consistency>().is_err());
    }

    #[test]
    fn cli_values_win_over_defaults() {
        let cfg = AppConfig::merge(
            Some("127.0.0.1".into()),
            Some(9000),
            Some("sqlite::memory:".into()),
            Some(0),
            Some(Consistency::Normal),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.store.database_url, "sqlite::memory:");
        assert_eq!(cfg.store.max_connections, 1);
        assert_eq!(cfg.store.consistency, Consistency::Normal);
    }

    #[test]
    fn args_parse_consistency_flag() {
        let args = Args::parse_from(["objectdb", "--consistency", "extra", "--migrate"]);
        assert_eq!(args.consistency, Some(Consistency::Extra));
        assert!(args.migrate);
        assert!(args.port.is_none());
    }
}
