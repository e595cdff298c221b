//! ormtest - test harness for SQL model layers
//!
//! Loads a test database from the environment, captures the statements it
//! executes, and manages per-test schemas for a small model layer.

pub mod config;
pub mod db;
pub mod error;
pub mod harness;
pub mod model;
pub mod query;

pub use config::TestConfig;
pub use db::{db_loader, in_memory_db, ConnectParams, Database, Engine};
pub use error::{Error, Result};
pub use harness::{
    requires_models, test_database, BaseTestCase, DatabaseTestCase, ModelTestCase, QueryRecord,
};
pub use model::{Field, Model, ModelMeta};
pub use query::{col, val, Compile, Value};

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}
