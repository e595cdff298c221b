//! Model metadata
//!
//! A model is a unit type with static [`ModelMeta`]: its table, its fields,
//! and the database it is currently bound to. The binding is settable at
//! runtime so fixtures can point a model at a test database and restore it
//! afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::any::AnyQueryResult;
use tracing::warn;

use crate::db::{Database, Engine};
use crate::error::{Error, Result};
use crate::query::{col, compile, Compile, Context, Delete, Insert, Select, Update, Value};

/// Column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Auto-incrementing integer primary key
    AutoId,
    Integer,
    Real,
    Text,
    Boolean,
}

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
    /// Referenced `(table, column)` for foreign keys
    pub references: Option<(&'static str, &'static str)>,
}

impl Field {
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            unique: false,
            references: None,
        }
    }

    pub fn auto(name: &'static str) -> Self {
        Self::new(name, FieldKind::AutoId)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn real(name: &'static str) -> Self {
        Self::new(name, FieldKind::Real)
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// Integer column referencing `table.id`
    pub fn foreign_key(name: &'static str, table: &'static str) -> Self {
        Self {
            references: Some((table, "id")),
            ..Self::new(name, FieldKind::Integer)
        }
    }

    pub fn null(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn column_type(&self, engine: Engine) -> &'static str {
        match (self.kind, engine) {
            (FieldKind::AutoId, Engine::Sqlite) => "INTEGER NOT NULL PRIMARY KEY",
            (FieldKind::AutoId, Engine::MySql) => "INTEGER AUTO_INCREMENT NOT NULL PRIMARY KEY",
            (FieldKind::AutoId, Engine::Postgres) => "SERIAL NOT NULL PRIMARY KEY",
            (FieldKind::Integer, _) => "INTEGER",
            (FieldKind::Real, Engine::MySql) => "DOUBLE PRECISION",
            (FieldKind::Real, _) => "REAL",
            (FieldKind::Text, Engine::Sqlite) => "TEXT",
            (FieldKind::Text, _) => "VARCHAR(255)",
            (FieldKind::Boolean, Engine::Sqlite) => "INTEGER",
            (FieldKind::Boolean, Engine::MySql) => "BOOL",
            (FieldKind::Boolean, Engine::Postgres) => "BOOLEAN",
        }
    }
}

/// Static description of a model plus its current database binding
#[derive(Debug)]
pub struct ModelMeta {
    table_name: &'static str,
    fields: Vec<Field>,
    database: RwLock<Option<Arc<Database>>>,
}

impl ModelMeta {
    pub fn new(table_name: &'static str) -> Self {
        Self {
            table_name,
            fields: Vec::new(),
            database: RwLock::new(None),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Start out bound to `database`
    pub fn with_database(self, database: Arc<Database>) -> Self {
        *self.database.write() = Some(database);
        self
    }

    /// Start out bound to the process-wide test database
    ///
    /// The model stays unbound if the test configuration does not load.
    pub fn with_test_database(self) -> Self {
        match crate::harness::test_database() {
            Ok(database) => self.with_database(database),
            Err(e) => {
                warn!(table = self.table_name, error = %e, "test database unavailable");
                self
            }
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.kind == FieldKind::AutoId)
    }

    /// Tables this model references, excluding itself
    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter_map(|f| f.references.map(|(table, _)| table))
            .filter(move |table| *table != self.table_name)
    }

    /// The database this model currently executes against
    pub fn database(&self) -> Option<Arc<Database>> {
        self.database.read().clone()
    }

    /// Rebind the model, returning the previous binding
    pub fn set_database(&self, database: Option<Arc<Database>>) -> Option<Arc<Database>> {
        std::mem::replace(&mut *self.database.write(), database)
    }

    pub fn is_bound_to(&self, database: &Arc<Database>) -> bool {
        self.database
            .read()
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, database))
    }

    fn bound_database(&self) -> Result<Arc<Database>> {
        self.database().ok_or(Error::Unbound(self.table_name))
    }

    /// CREATE TABLE statement for `engine`
    pub fn create_table_sql(&self, engine: Engine, safe: bool) -> String {
        let mut ctx = Context::new(engine.state());
        ctx.literal("CREATE TABLE ");
        if safe {
            ctx.literal("IF NOT EXISTS ");
        }
        ctx.quoted(self.table_name).literal(" (");
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                ctx.literal(", ");
            }
            ctx.quoted(field.name)
                .literal(" ")
                .literal(field.column_type(engine));
            if field.kind != FieldKind::AutoId && !field.nullable {
                ctx.literal(" NOT NULL");
            }
            if field.unique {
                ctx.literal(" UNIQUE");
            }
        }
        for field in &self.fields {
            if let Some((table, column)) = field.references {
                ctx.literal(", FOREIGN KEY (")
                    .quoted(field.name)
                    .literal(") REFERENCES ")
                    .quoted(table)
                    .literal(" (")
                    .quoted(column)
                    .literal(")");
            }
        }
        ctx.literal(")");
        ctx.query().0
    }

    /// DROP TABLE statement for `engine`
    pub fn drop_table_sql(&self, engine: Engine, safe: bool) -> String {
        let mut ctx = Context::new(engine.state());
        ctx.literal("DROP TABLE ");
        if safe {
            ctx.literal("IF EXISTS ");
        }
        ctx.quoted(self.table_name);
        ctx.query().0
    }

    /// `SELECT * FROM <table>`
    pub fn select(&self) -> Select {
        Select::table(self.table_name)
    }

    /// `INSERT INTO <table> (columns...)` with every non-key column
    pub fn insert(&self) -> Insert {
        Insert::table(self.table_name).columns(
            self.fields
                .iter()
                .filter(|f| f.kind != FieldKind::AutoId)
                .map(|f| f.name),
        )
    }

    pub fn update(&self) -> Update {
        Update::table(self.table_name)
    }

    pub fn delete(&self) -> Delete {
        Delete::table(self.table_name)
    }

    /// Execute a write query against the bound database
    pub async fn execute<Q: Compile + ?Sized>(&self, query: &Q) -> Result<AnyQueryResult> {
        self.bound_database()?.execute(query).await
    }

    /// Execute a read query against the bound database
    pub async fn fetch<Q: Compile + ?Sized>(&self, query: &Q) -> Result<Vec<Vec<Value>>> {
        self.bound_database()?.fetch(query).await
    }

    /// Row count of the model's table in the bound database
    pub async fn count(&self) -> Result<i64> {
        let rows = self.fetch(&Select::count(self.table_name)).await?;
        match rows.first().and_then(|row| row.first()) {
            Some(Value::Int(n)) => Ok(*n),
            _ => Ok(0),
        }
    }

    /// Fetch a single row by primary key
    pub async fn get(&self, id: i64) -> Result<Option<Vec<Value>>> {
        let pk = self.primary_key().map(|f| f.name).unwrap_or("id");
        let rows = self
            .fetch(&self.select().filter(col(pk).eq(id)).limit(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Compile a query against the bound database's dialect
    pub fn sql<Q: Compile + ?Sized>(&self, query: &Q) -> Result<(String, Vec<Value>)> {
        Ok(compile(query, self.bound_database()?.engine().state()))
    }
}

/// A type with static model metadata
pub trait Model {
    fn meta() -> &'static ModelMeta;
}

/// Declare a unit struct implementing [`Model`]
///
/// ```rust,ignore
/// model! {
///     pub struct User => "users" {
///         Field::auto("id"),
///         Field::text("username").unique(),
///     }
/// }
/// ```
#[macro_export]
macro_rules! model {
    (@declare $(#[$attr:meta])* $vis:vis struct $name:ident = $meta:expr) => {
        $(#[$attr])*
        $vis struct $name;

        impl $crate::model::Model for $name {
            fn meta() -> &'static $crate::model::ModelMeta {
                static META: $crate::__private::Lazy<$crate::model::ModelMeta> =
                    $crate::__private::Lazy::new(|| $meta);
                &META
            }
        }
    };
    ($(#[$attr:meta])* $vis:vis struct $name:ident => $table:literal { $($field:expr),* $(,)? }) => {
        $crate::model! {
            @declare $(#[$attr])* $vis struct $name =
                $crate::model::ModelMeta::new($table)$(.field($field))*
        }
    };
}

/// Declare a model whose default binding is the process-wide test database
///
/// Same syntax as [`model!`]. The binding is taken from
/// [`test_database`](crate::harness::test_database) the first time the
/// model's metadata is used; fixtures that rebind it put it back there.
#[macro_export]
macro_rules! test_model {
    ($(#[$attr:meta])* $vis:vis struct $name:ident => $table:literal { $($field:expr),* $(,)? }) => {
        $crate::model! {
            @declare $(#[$attr])* $vis struct $name =
                $crate::model::ModelMeta::new($table)
                    .with_test_database()
                    $(.field($field))*
        }
    };
}

/// Order models so that every model comes after the models it references
///
/// Only references within `models` are considered; self references and
/// cycles do not fail, the first-visited model simply wins.
pub fn sort_models(models: &[&'static ModelMeta]) -> Vec<&'static ModelMeta> {
    let by_name: HashMap<&str, &'static ModelMeta> =
        models.iter().map(|m| (m.table_name, *m)).collect();
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(models.len());

    fn visit(
        model: &'static ModelMeta,
        by_name: &HashMap<&str, &'static ModelMeta>,
        seen: &mut HashSet<&'static str>,
        ordered: &mut Vec<&'static ModelMeta>,
    ) {
        if !seen.insert(model.table_name) {
            return;
        }
        for dep in model.dependencies() {
            if let Some(dep_model) = by_name.get(dep) {
                visit(*dep_model, by_name, seen, ordered);
            }
        }
        ordered.push(model);
    }

    for model in models {
        visit(*model, &by_name, &mut seen, &mut ordered);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory_db;

    crate::model! {
        struct Author => "author" {
            Field::auto("id"),
            Field::text("name").unique(),
        }
    }

    crate::model! {
        struct Book => "book" {
            Field::auto("id"),
            Field::foreign_key("author_id", "author"),
            Field::real("price").null(),
            Field::boolean("in_print"),
        }
    }

    crate::model! {
        struct Review => "review" {
            Field::auto("id"),
            Field::foreign_key("book_id", "book"),
            Field::foreign_key("parent_id", "review").null(),
        }
    }

    #[test]
    fn test_create_table_sql_sqlite() {
        assert_eq!(
            Book::meta().create_table_sql(Engine::Sqlite, true),
            r#"CREATE TABLE IF NOT EXISTS "book" ("id" INTEGER NOT NULL PRIMARY KEY, "author_id" INTEGER NOT NULL, "price" REAL, "in_print" INTEGER NOT NULL, FOREIGN KEY ("author_id") REFERENCES "author" ("id"))"#
        );
    }

    #[test]
    fn test_create_table_sql_mysql() {
        assert_eq!(
            Author::meta().create_table_sql(Engine::MySql, false),
            "CREATE TABLE `author` (`id` INTEGER AUTO_INCREMENT NOT NULL PRIMARY KEY, `name` VARCHAR(255) NOT NULL UNIQUE)"
        );
    }

    #[test]
    fn test_drop_table_sql() {
        assert_eq!(
            Author::meta().drop_table_sql(Engine::Postgres, true),
            r#"DROP TABLE IF EXISTS "author""#
        );
        assert_eq!(
            Author::meta().drop_table_sql(Engine::Sqlite, false),
            r#"DROP TABLE "author""#
        );
    }

    #[test]
    fn test_sort_models_dependencies_first() {
        let sorted = sort_models(&[Review::meta(), Book::meta(), Author::meta()]);
        let names: Vec<_> = sorted.iter().map(|m| m.table_name()).collect();
        assert_eq!(names, vec!["author", "book", "review"]);
    }

    #[test]
    fn test_sort_models_ignores_outside_references() {
        let sorted = sort_models(&[Review::meta()]);
        assert_eq!(sorted.len(), 1);
        assert_eq!(Review::meta().dependencies().collect::<Vec<_>>(), vec!["book"]);
    }

    #[test]
    fn test_insert_skips_auto_id() {
        let row = [Value::Int(1), Value::Null, Value::Bool(true)];
        let (text, params) = compile(&Book::meta().insert().row(row), Default::default());
        assert_eq!(
            text,
            r#"INSERT INTO "book" ("author_id", "price", "in_print") VALUES (?, ?, ?)"#
        );
        assert_eq!(params.len(), 3);
    }

    crate::model! {
        struct Loose => "loose" {
            Field::auto("id"),
            Field::text("label"),
        }
    }

    #[tokio::test]
    async fn test_unbound_model_errors() {
        let meta = Loose::meta();
        assert!(meta.database().is_none());
        let err = meta.count().await.unwrap_err();
        assert!(matches!(err, Error::Unbound("loose")));
    }

    crate::model! {
        struct Swapped => "swapped" {
            Field::auto("id"),
        }
    }

    #[test]
    fn test_set_database_returns_previous() {
        let meta = Swapped::meta();
        let first = Arc::new(in_memory_db(Default::default()));
        let second = Arc::new(in_memory_db(Default::default()));

        assert!(meta.set_database(Some(first.clone())).is_none());
        assert!(meta.is_bound_to(&first));

        let previous = meta.set_database(Some(second.clone())).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert!(meta.is_bound_to(&second));
        assert!(!meta.is_bound_to(&first));

        meta.set_database(None);
        assert!(meta.database().is_none());
    }

    #[test]
    fn test_initial_binding() {
        let db = Arc::new(in_memory_db(Default::default()));
        let meta = ModelMeta::new("pinned")
            .with_database(db.clone())
            .field(Field::auto("id"));
        assert!(meta.is_bound_to(&db));
        assert_eq!(meta.fields().len(), 1);
    }
}
