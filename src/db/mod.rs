//! Database module - engine aliases, loader and the connection handle
//!
//! A [`Database`] is a connection target that is opened and closed
//! explicitly. Every statement it executes is logged once on the
//! [`SQL_TARGET`] tracing target before it runs, which is what the query
//! capture in [`crate::harness`] observes.

#[cfg(test)]
pub mod test_utils;

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::any::{AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info, Level};

use crate::error::{Error, Result};
use crate::model::{sort_models, ModelMeta};
use crate::query::{compile, Compile, DefaultRow, ParamStyle, State, Value};

/// Tracing target that receives one event per executed statement
pub const SQL_TARGET: &str = "ormtest::sql";

/// Suffix appended to SQLite database names
pub const SQLITE_SUFFIX: &str = ".db";

/// SQLite in-memory target name
pub const MEMORY: &str = ":memory:";

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    Sqlite,
    MySql,
    Postgres,
}

/// Lowercase alias -> engine
pub const ENGINE_ALIASES: &[(&str, Engine)] = &[
    ("sqlite", Engine::Sqlite),
    ("sqlite3", Engine::Sqlite),
    ("mysql", Engine::MySql),
    ("postgres", Engine::Postgres),
    ("postgresql", Engine::Postgres),
];

impl Engine {
    /// Resolve an engine alias, ignoring case
    pub fn from_alias(alias: &str) -> Result<Self> {
        let lower = alias.to_lowercase();
        ENGINE_ALIASES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, engine)| *engine)
            .ok_or_else(|| Error::UnsupportedEngine(alias.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::MySql => "mysql",
            Engine::Postgres => "postgres",
        }
    }

    /// Whether the target name is a file on disk
    pub fn is_file_based(&self) -> bool {
        matches!(self, Engine::Sqlite)
    }

    /// Compilation state for this engine's dialect
    pub fn state(&self) -> State {
        match self {
            Engine::Sqlite => State::default(),
            Engine::MySql => State::default()
                .with_quote('`')
                .with_default_row(DefaultRow::EmptyLists),
            Engine::Postgres => State::default().with_param(ParamStyle::Numbered),
        }
    }

    fn default_port(&self) -> Option<u16> {
        match self {
            Engine::Sqlite => None,
            Engine::MySql => Some(3306),
            Engine::Postgres => Some(5432),
        }
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_alias(s)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection parameters for server engines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: Option<u32>,
}

/// Resolve `engine` and build a not-yet-connected handle for `name`
///
/// SQLite names that do not already end in `.db` get the suffix appended.
pub fn db_loader(engine: &str, name: &str, params: ConnectParams) -> Result<Database> {
    let engine = Engine::from_alias(engine)?;
    let name = if engine.is_file_based() && !name.ends_with(SQLITE_SUFFIX) {
        format!("{}{}", name, SQLITE_SUFFIX)
    } else {
        name.to_string()
    };
    Ok(Database::new(engine, name, params))
}

/// A handle to a private in-memory SQLite database
pub fn in_memory_db(params: ConnectParams) -> Database {
    Database::new(Engine::Sqlite, MEMORY, params)
}

/// Database handle wrapping an optional connection pool
pub struct Database {
    engine: Engine,
    name: String,
    params: ConnectParams,
    pool: Mutex<Option<AnyPool>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("engine", &self.engine)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Database {
    pub fn new(engine: Engine, name: impl Into<String>, params: ConnectParams) -> Self {
        Self {
            engine,
            name: name.into(),
            params,
            pool: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Target name: file path for SQLite, database name otherwise
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn is_in_memory(&self) -> bool {
        self.engine == Engine::Sqlite && self.name == MEMORY
    }

    /// Connection URL
    pub fn url(&self) -> String {
        self.build_url(self.params.password.as_deref())
    }

    /// Connection URL with the password masked
    pub fn display_url(&self) -> String {
        self.build_url(self.params.password.as_ref().map(|_| "****"))
    }

    fn build_url(&self, password: Option<&str>) -> String {
        match self.engine {
            Engine::Sqlite if self.is_in_memory() => "sqlite::memory:".to_string(),
            Engine::Sqlite => format!("sqlite:{}?mode=rwc", self.name),
            Engine::MySql | Engine::Postgres => {
                let scheme = if self.engine == Engine::MySql {
                    "mysql"
                } else {
                    "postgres"
                };
                let auth = match (&self.params.user, password) {
                    (Some(user), Some(pw)) => format!("{}:{}@", user, pw),
                    (Some(user), None) => format!("{}@", user),
                    _ => String::new(),
                };
                let host = self.params.host.as_deref().unwrap_or("localhost");
                let port = self.params.port.or(self.engine.default_port());
                match port {
                    Some(port) => format!("{}://{}{}:{}/{}", scheme, auth, host, port, self.name),
                    None => format!("{}://{}{}/{}", scheme, auth, host, self.name),
                }
            }
        }
    }

    fn pool_options(&self) -> AnyPoolOptions {
        let options = AnyPoolOptions::new();
        if self.is_in_memory() {
            // Every in-memory connection is its own database.
            options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(self.params.max_connections.unwrap_or(5))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.lock().is_none()
    }

    /// Open the connection
    pub async fn connect(&self) -> Result<()> {
        if !self.is_closed() {
            return Err(Error::AlreadyOpen);
        }
        sqlx::any::install_default_drivers();
        let pool = self.pool_options().connect(&self.url()).await?;

        let mut slot = self.pool.lock();
        if slot.is_some() {
            return Err(Error::AlreadyOpen);
        }
        *slot = Some(pool);
        info!(engine = %self.engine, url = %self.display_url(), "database connection opened");
        Ok(())
    }

    /// Close the connection and wait for every pooled connection to shut
    /// down, returning whether it was open
    pub async fn close(&self) -> bool {
        let pool = self.pool.lock().take();
        match pool {
            Some(pool) => {
                pool.close().await;
                debug!(engine = %self.engine, "database connection closed");
                true
            }
            None => false,
        }
    }

    /// Drop the connection without waiting, returning whether it was open
    ///
    /// For synchronous contexts such as `Drop`. Pooled connections finish
    /// closing in the background, so prefer [`Database::close`].
    pub fn release(&self) -> bool {
        match self.pool.lock().take() {
            Some(pool) => {
                drop(pool);
                debug!(engine = %self.engine, "database connection released");
                true
            }
            None => false,
        }
    }

    fn pool(&self) -> Result<AnyPool> {
        self.pool.lock().clone().ok_or(Error::Closed)
    }

    fn log_statement(sql: &str, params: &[Value]) {
        if tracing::enabled!(target: SQL_TARGET, Level::DEBUG) {
            let params = serde_json::to_string(params).unwrap_or_default();
            debug!(target: SQL_TARGET, params = %params, "{}", sql);
        }
    }

    /// Execute raw SQL, returning the execution result
    pub async fn execute_sql(&self, sql: &str, params: &[Value]) -> Result<AnyQueryResult> {
        let pool = self.pool()?;
        Self::log_statement(sql, params);
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        Ok(query.execute(&pool).await?)
    }

    /// Execute raw SQL, returning the raw rows
    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<AnyRow>> {
        let pool = self.pool()?;
        Self::log_statement(sql, params);
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        Ok(query.fetch_all(&pool).await?)
    }

    /// Execute raw SQL, decoding every column into a [`Value`]
    pub async fn fetch_values(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let rows = self.fetch_all(sql, params).await?;
        rows.iter().map(decode_row).collect()
    }

    /// Compile `query` for this engine and execute it
    pub async fn execute<Q: Compile + ?Sized>(&self, query: &Q) -> Result<AnyQueryResult> {
        let (sql, params) = compile(query, self.engine.state());
        self.execute_sql(&sql, &params).await
    }

    /// Compile `query` for this engine and fetch its rows
    pub async fn fetch<Q: Compile + ?Sized>(&self, query: &Q) -> Result<Vec<Vec<Value>>> {
        let (sql, params) = compile(query, self.engine.state());
        self.fetch_values(&sql, &params).await
    }

    /// Create tables for `models`, referenced tables first
    pub async fn create_tables(&self, models: &[&'static ModelMeta]) -> Result<()> {
        for model in sort_models(models) {
            self.execute_sql(&model.create_table_sql(self.engine, true), &[])
                .await?;
        }
        Ok(())
    }

    /// Drop tables for `models`, referencing tables first
    ///
    /// With `safe`, tables that do not exist are ignored.
    pub async fn drop_tables(&self, models: &[&'static ModelMeta], safe: bool) -> Result<()> {
        for model in sort_models(models).into_iter().rev() {
            self.execute_sql(&model.drop_table_sql(self.engine, safe), &[])
                .await?;
        }
        Ok(())
    }

    /// Names of the tables in the current database/schema
    pub async fn get_tables(&self) -> Result<Vec<String>> {
        let sql = match self.engine {
            Engine::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Engine::MySql => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() ORDER BY table_name"
            }
            Engine::Postgres => {
                "SELECT tablename FROM pg_tables WHERE schemaname = current_schema() ORDER BY tablename"
            }
        };
        let rows = self.fetch_all(sql, &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Error::from))
            .collect()
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.get_tables().await?.iter().any(|t| t == table))
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        self.execute_sql("SELECT 1", &[]).await?;
        Ok(())
    }
}

type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

fn bind_value<'q>(query: AnyQuery<'q>, value: &Value) -> AnyQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bool(v) => query.bind(*v),
    }
}

fn decode_row(row: &AnyRow) -> Result<Vec<Value>> {
    (0..row.len()).map(|i| decode_column(row, i)).collect()
}

fn decode_column(row: &AnyRow, index: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.into());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.into());
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.into());
    }
    Ok(row.try_get::<Option<String>, _>(index)?.into())
}
