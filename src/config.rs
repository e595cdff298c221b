//! Test configuration
//!
//! Resolved from serialized defaults, an optional `ormtest.toml`, and
//! `ORMTEST_*` environment variables, later sources winning.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::db::{db_loader, ConnectParams, Database};
use crate::error::Result;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ORMTEST_";

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "ormtest.toml";

/// Setting this variable streams every captured statement at debug level
pub const VERBOSE_VAR: &str = "VERBOSE";

/// Backend selection and connect parameters for the test database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Engine alias: sqlite/sqlite3, mysql, postgres/postgresql
    pub backend: String,
    /// Logical database name
    pub database: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: Option<u32>,
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            database: "ormtest_test".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            max_connections: None,
            verbose: false,
        }
    }
}

impl TestConfig {
    /// Defaults, then `ormtest.toml` if present, then the environment
    pub fn from_env() -> Result<Self> {
        Self::load(Path::new(CONFIG_FILE))
    }

    /// Like [`TestConfig::from_env`] with an explicit file path
    pub fn load(path: &Path) -> Result<Self> {
        Self::extract(Self::figment(path))
    }

    /// The provider chain, exposed so callers can merge overrides
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract from an arbitrary provider chain, reading `VERBOSE` separately
    pub fn extract(figment: Figment) -> Result<Self> {
        let mut config: Self = figment.extract()?;
        config.verbose = verbose_from_env();
        Ok(config)
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            max_connections: self.max_connections,
        }
    }

    /// Build the (unconnected) database handle this config describes
    pub fn database(&self) -> Result<Database> {
        db_loader(&self.backend, &self.database, self.connect_params())
    }
}

/// True when `VERBOSE` is set to a non-empty value
pub fn verbose_from_env() -> bool {
    std::env::var_os(VERBOSE_VAR).is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Engine;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = TestConfig::default();
        assert_eq!(config.backend, "sqlite");
        let db = config.database().unwrap();
        assert_eq!(db.engine(), Engine::Sqlite);
        assert_eq!(db.name(), "ormtest_test.db");
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                backend = "mysql"
                database = "from_file"
                port = 3307
                "#,
            )?;
            jail.set_env("ORMTEST_BACKEND", "PostgreSQL");
            jail.set_env("ORMTEST_USER", "tester");

            let config = TestConfig::from_env().expect("config");
            assert_eq!(config.backend, "PostgreSQL");
            assert_eq!(config.database, "from_file");
            assert_eq!(config.port, Some(3307));
            assert_eq!(config.user.as_deref(), Some("tester"));

            let db = config.database().expect("database");
            assert_eq!(db.engine(), Engine::Postgres);
            assert_eq!(db.url(), "postgres://tester@localhost:3307/from_file");
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_backend_fails_at_load() {
        Jail::expect_with(|jail| {
            jail.set_env("ORMTEST_BACKEND", "oracle");
            let config = TestConfig::from_env().expect("config");
            assert!(config.database().is_err());
            Ok(())
        });
    }
}
