//! Common test utilities - shared models and a serial lock for them

#![allow(dead_code)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use ormtest::{in_memory_db, model, ConnectParams, Database, Field};
use tokio::sync::{Mutex, MutexGuard};

model! {
    /// Account owning notes
    pub struct User => "users" {
        Field::auto("id"),
        Field::text("username").unique(),
        Field::boolean("active"),
    }
}

model! {
    /// Note written by a user
    pub struct Note => "note" {
        Field::auto("id"),
        Field::foreign_key("user_id", "users"),
        Field::text("content"),
        Field::real("score").null(),
    }
}

static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialize tests that rebind the shared models
///
/// Model bindings are process-wide, so two tests using `User` at once would
/// see each other's databases.
pub async fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().await
}

/// A fresh, unconnected in-memory database handle
pub fn memory_db() -> Arc<Database> {
    Arc::new(in_memory_db(ConnectParams::default()))
}
