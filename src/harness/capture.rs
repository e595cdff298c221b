//! Query log capture
//!
//! A tracing layer that keeps every event on [`SQL_TARGET`] in order. The
//! layer is attached for the current thread only, via
//! [`tracing::subscriber::set_default`], and detached when the
//! [`QueryCapture`] holding the guard is dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use crate::db::SQL_TARGET;

/// One captured statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub sql: String,
    /// Bound parameters as a JSON array
    pub params: String,
    pub level: Level,
}

impl fmt::Display for QueryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {})", self.sql, self.params)
    }
}

#[derive(Default)]
struct RecordVisitor {
    sql: Option<String>,
    params: Option<String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.sql = Some(value.to_string()),
            "params" => self.params = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.sql = Some(format!("{:?}", value)),
            "params" => self.params = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}

/// Layer appending every SQL event to a shared, ordered list
#[derive(Clone, Default)]
pub struct QueryLogLayer {
    records: Arc<Mutex<Vec<QueryRecord>>>,
}

impl QueryLogLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records captured so far
    pub fn records(&self) -> Vec<QueryRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Subscriber> Layer<S> for QueryLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != SQL_TARGET {
            return;
        }
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        self.records.lock().push(QueryRecord {
            sql: visitor.sql.unwrap_or_default(),
            params: visitor.params.unwrap_or_else(|| "[]".to_string()),
            level: *event.metadata().level(),
        });
    }
}

/// A [`QueryLogLayer`] attached to the current thread
///
/// Dropping the capture detaches it; the history stays readable through
/// [`QueryCapture::log`] clones.
pub struct QueryCapture {
    log: QueryLogLayer,
    _guard: DefaultGuard,
}

impl QueryCapture {
    /// Attach a fresh capture with the SQL target at its most detailed level
    ///
    /// With `verbose`, statements are also written to the test output at
    /// debug level.
    pub fn attach(verbose: bool) -> Self {
        let log = QueryLogLayer::new();
        let echo = verbose.then(|| {
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_filter(Targets::new().with_target("ormtest", LevelFilter::DEBUG))
        });
        let subscriber = Registry::default()
            .with(
                log.clone()
                    .with_filter(Targets::new().with_target(SQL_TARGET, LevelFilter::TRACE)),
            )
            .with(echo);
        let guard = tracing::subscriber::set_default(subscriber);
        Self { log, _guard: guard }
    }

    pub fn log(&self) -> &QueryLogLayer {
        &self.log
    }

    /// Detach, returning the history
    pub fn detach(self) -> QueryLogLayer {
        self.log.clone()
    }
}
