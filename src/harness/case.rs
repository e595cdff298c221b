//! Test case fixtures
//!
//! Three layers, each wrapping the previous one:
//!
//! - [`BaseTestCase`] attaches a [`QueryCapture`] and offers SQL and
//!   query-count assertions.
//! - [`DatabaseTestCase`] opens the database before capture starts and
//!   closes it after capture stops.
//! - [`ModelTestCase`] binds a set of models to the database and gives them
//!   fresh tables.
//!
//! Teardown that only needs synchronous work happens on drop, so it runs on
//! every exit path. Dropping tables needs the database, which drop cannot
//! await: [`ModelTestCase::run`] owns the test body and tears down whether
//! it returns or panics. With [`ModelTestCase::setup`] the test calls
//! [`ModelTestCase::teardown`] itself, and a panic before that leaves the
//! tables for the next setup's safe drop.
//!
//! `setup()` constructors share the process-wide [`test_database`] handle.
//! A handle is opened once per test case, so a second `setup()` while
//! another case on the same handle is alive fails with
//! [`Error::AlreadyOpen`](crate::Error::AlreadyOpen). Tests using `setup()`
//! must be serialized; `with_database` cases on their own handles need not.

use std::future::Future;
use std::ops::Deref;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use sqlx::any::AnyQueryResult;
use tracing::warn;

use crate::config::verbose_from_env;
use crate::db::Database;
use crate::error::Result;
use crate::model::ModelMeta;
use crate::query::{compile, Compile, State, Value};

use super::capture::{QueryCapture, QueryLogLayer, QueryRecord};
use super::fixture::{requires_models, BindingGuard};
use super::test_database;

/// Query capture plus assertion helpers
pub struct BaseTestCase {
    history: QueryLogLayer,
    capture: Option<QueryCapture>,
}

impl BaseTestCase {
    /// Attach a fresh query capture to the current thread
    pub fn setup() -> Self {
        let capture = QueryCapture::attach(verbose_from_env());
        Self {
            history: capture.log().clone(),
            capture: Some(capture),
        }
    }

    /// Stop capturing; the history stays readable
    pub fn detach(&mut self) {
        self.capture.take();
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Statements captured since setup
    pub fn history(&self) -> Vec<QueryRecord> {
        self.history.records()
    }

    /// Just the SQL text of [`BaseTestCase::history`]
    pub fn history_sql(&self) -> Vec<String> {
        self.history.records().into_iter().map(|r| r.sql).collect()
    }

    /// Assert `query` compiles to `sql` (and `params`, when given)
    #[track_caller]
    pub fn assert_sql<Q: Compile + ?Sized>(&self, query: &Q, sql: &str, params: Option<&[Value]>) {
        self.assert_sql_with(query, State::default(), sql, params);
    }

    /// [`BaseTestCase::assert_sql`] with compilation state overrides
    #[track_caller]
    pub fn assert_sql_with<Q: Compile + ?Sized>(
        &self,
        query: &Q,
        state: State,
        sql: &str,
        params: Option<&[Value]>,
    ) {
        let (qsql, qparams) = compile(query, state);
        assert_eq!(qsql, sql);
        if let Some(params) = params {
            assert_eq!(qparams.as_slice(), params);
        }
    }

    /// Await `block` and assert it executed exactly `expected` statements
    ///
    /// The count is checked once the block completes, whatever it returns.
    /// If the block panics the panic propagates and nothing is asserted.
    pub async fn assert_query_count<F, T>(&self, expected: usize, block: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = self.history.len();
        let output = block.await;
        let executed = self.history.len() - start;
        assert_eq!(
            executed, expected,
            "expected {} queries, {} were executed",
            expected, executed
        );
        output
    }

    /// End the test case
    pub fn teardown(self) {}
}

/// Connection lifecycle around a [`BaseTestCase`]
pub struct DatabaseTestCase {
    base: BaseTestCase,
    database: Arc<Database>,
}

impl DatabaseTestCase {
    /// Set up against the process-wide test database
    ///
    /// Fails with `AlreadyOpen` while another case holds the shared handle.
    pub async fn setup() -> Result<Self> {
        Self::with_database(test_database()?).await
    }

    /// Set up against an explicit database handle
    pub async fn with_database(database: Arc<Database>) -> Result<Self> {
        database.connect().await?;
        let base = BaseTestCase::setup();
        Ok(Self { base, database })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Raw SQL passthrough
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<AnyQueryResult> {
        self.database.execute_sql(sql, params).await
    }

    /// [`requires_models`] against this test case's database
    pub async fn requires_models<F, Fut, T>(&self, models: &[&'static ModelMeta], body: F) -> Result<T>
    where
        F: FnOnce(Arc<Database>) -> Fut,
        Fut: Future<Output = T>,
    {
        requires_models(&self.database, models, body).await
    }

    /// End the test case: detach capture, then close the connection
    pub async fn teardown(mut self) {
        self.base.detach();
        self.database.close().await;
    }
}

impl Deref for DatabaseTestCase {
    type Target = BaseTestCase;

    fn deref(&self) -> &BaseTestCase {
        &self.base
    }
}

impl Drop for DatabaseTestCase {
    fn drop(&mut self) {
        // Closing must not show up in the test's captured statements.
        self.base.detach();
        self.database.release();
    }
}

/// Per-test schema for a declared set of models
pub struct ModelTestCase {
    requires: Vec<&'static ModelMeta>,
    // Field order matters: bindings are restored before the database
    // test case detaches and closes.
    bindings: BindingGuard,
    inner: DatabaseTestCase,
}

impl ModelTestCase {
    /// Set up against the process-wide test database
    ///
    /// Fails with `AlreadyOpen` while another case holds the shared handle.
    pub async fn setup(requires: &[&'static ModelMeta]) -> Result<Self> {
        Self::with_database(test_database()?, requires).await
    }

    /// Set up against an explicit database handle
    pub async fn with_database(
        database: Arc<Database>,
        requires: &[&'static ModelMeta],
    ) -> Result<Self> {
        let inner = DatabaseTestCase::with_database(database).await?;
        let bindings = BindingGuard::bind(requires, inner.database());
        if !requires.is_empty() {
            inner.database().drop_tables(requires, true).await?;
            inner.database().create_tables(requires).await?;
        }
        Ok(Self {
            requires: requires.to_vec(),
            bindings,
            inner,
        })
    }

    pub fn requires(&self) -> &[&'static ModelMeta] {
        &self.requires
    }

    /// Run `body` against a case on the process-wide test database
    ///
    /// See [`ModelTestCase::run_with_database`].
    pub async fn run<F, Fut, T>(requires: &[&'static ModelMeta], body: F) -> Result<T>
    where
        F: FnOnce(Arc<ModelTestCase>) -> Fut,
        Fut: Future<Output = T>,
    {
        Self::run_with_database(test_database()?, requires, body).await
    }

    /// Set up a case, run `body` with it, then tear it down
    ///
    /// Teardown runs whether the body returns or panics. A panic is resumed
    /// once the tables are dropped and the bindings restored; a returned
    /// value is passed through untouched, `Err` included.
    pub async fn run_with_database<F, Fut, T>(
        database: Arc<Database>,
        requires: &[&'static ModelMeta],
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<ModelTestCase>) -> Fut,
        Fut: Future<Output = T>,
    {
        let case = Arc::new(Self::with_database(database, requires).await?);

        let handle = case.clone();
        let outcome = AssertUnwindSafe(async move { body(handle).await })
            .catch_unwind()
            .await;

        let cleanup = case.drop_schema().await;
        // A body that returned its handle keeps the case alive; its bindings
        // and connection are then released when that handle drops.
        if let Ok(case) = Arc::try_unwrap(case) {
            case.finish().await;
        }

        match outcome {
            Ok(value) => {
                cleanup?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = cleanup {
                    warn!(error = %e, "dropping tables after a failed test");
                }
                resume_unwind(panic)
            }
        }
    }

    /// Drop the tables, restore the bindings, then tear down the database
    /// test case
    ///
    /// Bindings are restored even when the drop fails; its error is returned.
    pub async fn teardown(self) -> Result<()> {
        let result = self.drop_schema().await;
        self.finish().await;
        result
    }

    async fn drop_schema(&self) -> Result<()> {
        if self.requires.is_empty() {
            return Ok(());
        }
        self.inner
            .database()
            .drop_tables(&self.requires, true)
            .await
    }

    async fn finish(self) {
        drop(self.bindings);
        self.inner.teardown().await;
    }
}

impl Deref for ModelTestCase {
    type Target = DatabaseTestCase;

    fn deref(&self) -> &DatabaseTestCase {
        &self.inner
    }
}
