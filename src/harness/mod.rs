//! Test harness
//!
//! - [`QueryCapture`] - records statements executed while a test runs
//! - [`BaseTestCase`] / [`DatabaseTestCase`] / [`ModelTestCase`] - per-test
//!   setup and teardown
//! - [`requires_models`] - the same schema lifecycle around a single body
//! - [`test_model!`](crate::test_model) - models bound to [`test_database`]
//!   by default
//!
//! # Example
//!
//! ```rust,ignore
//! use ormtest::harness::ModelTestCase;
//!
//! #[tokio::test]
//! async fn test_insert_counts() {
//!     ModelTestCase::run(&[User::meta()], |case| async move {
//!         case.assert_query_count(1, async {
//!             User::meta().execute(&User::meta().insert().row(["huey"])).await.unwrap();
//!         })
//!         .await;
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! The capture is attached to the current thread, so async tests need a
//! current-thread runtime (the `#[tokio::test]` default). Model bindings are
//! process-wide: tests that share models must not run concurrently. The
//! same holds for `setup()`/`run()` on the shared [`test_database`] handle:
//! it is opened once per test case, and a second case opening it while the
//! first is alive fails with `AlreadyOpen`.

mod capture;
mod case;
mod fixture;

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::TestConfig;
use crate::db::Database;
use crate::error::Result;

pub use capture::{QueryCapture, QueryLogLayer, QueryRecord};
pub use case::{BaseTestCase, DatabaseTestCase, ModelTestCase};
pub use fixture::{requires_models, BindingGuard};

static TEST_DATABASE: OnceCell<Arc<Database>> = OnceCell::new();

/// The process-wide test database, loaded once from [`TestConfig::from_env`]
///
/// An unsupported backend fails here, before any test touches the database.
pub fn test_database() -> Result<Arc<Database>> {
    TEST_DATABASE
        .get_or_try_init(|| TestConfig::from_env()?.database().map(Arc::new))
        .cloned()
}
