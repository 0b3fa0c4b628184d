//! Configuration loading and pool wiring for the CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docket_connection::{Database, PoolConfig};
use docket_driver_sqlite::SqliteConnectionFactory;

/// Where the CLI looks for a config file when none is given
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docket").join("docket.toml"))
}

/// Resolve the effective pool configuration
///
/// An explicit `path` must exist. Without one, the default location is used
/// if present, and built-in defaults otherwise. `database` overrides the
/// storage path from any source.
pub fn load_config(path: Option<&Path>, database: Option<&Path>) -> Result<PoolConfig> {
    let config = match path {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => match default_config_path().filter(|path| path.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using default config file");
                PoolConfig::from_file(&path)
                    .with_context(|| format!("failed to load config from {}", path.display()))?
            }
            None => PoolConfig::default(),
        },
    };

    let config = match database {
        Some(database) => config.with_storage_path(database.to_string_lossy()),
        None => config,
    };
    config.validate().context("invalid pool configuration")?;
    Ok(config)
}

/// Build a [`Database`] backed by SQLite files at the configured path
pub fn open_sqlite(config: PoolConfig) -> Result<Database> {
    let factory = SqliteConnectionFactory::new(config.store_config());
    let database = Database::builder(config)
        .with_factory(factory)
        .build()
        .context("failed to create connection pool")?;
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docket.toml");
        std::fs::write(
            &path,
            "storage_path = \"cases.db\"\nmax_connections = 4\nlow_watermark = 1\n",
        )
        .expect("write config");

        let config = load_config(Some(&path), None).expect("load");
        assert_eq!(config.storage_path(), "cases.db");
        assert_eq!(config.max_connections(), 4);
        assert_eq!(config.low_watermark(), 1);
    }

    #[test]
    fn test_database_flag_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docket.toml");
        std::fs::write(&path, "storage_path = \"cases.db\"\n").expect("write config");

        let config = load_config(Some(&path), Some(Path::new("other.db"))).expect("load");
        assert_eq!(config.storage_path(), "other.db");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(&dir.path().join("absent.toml")), None)
            .expect_err("missing file");
        assert!(err.to_string().contains("failed to load config"));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docket.toml");
        std::fs::write(&path, "max_connections = 0\n").expect("write config");

        assert!(load_config(Some(&path), None).is_err());
    }

    #[tokio::test]
    async fn test_open_sqlite_creates_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docket.db");
        let config = PoolConfig::new(path.to_string_lossy()).with_monitoring(false);

        let database = open_sqlite(config).expect("open");
        let one = database
            .with_connection(|conn| Box::pin(async move { conn.query("SELECT 1", &[]).await }))
            .await
            .expect("query");
        assert_eq!(one.scalar().and_then(docket_core::Value::as_i64), Some(1));
        assert!(path.exists());
        database.shutdown().await;
    }
}
