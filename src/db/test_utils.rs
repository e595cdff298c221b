//! Shared test utilities for database operations
//!
//! Provides a connected in-memory handle so unit tests across modules do not
//! each repeat the open/connect dance.

use super::{in_memory_db, ConnectParams, Database};

/// Create a connected private in-memory SQLite database
pub async fn connected_memory_db() -> Database {
    let db = in_memory_db(ConnectParams::default());
    db.connect()
        .await
        .expect("Failed to connect test database");
    db
}
