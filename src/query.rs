//! Query builder
//!
//! Queries compile into a `(text, params)` pair through a [`Context`]. The
//! context's [`State`] decides the placeholder style and identifier quoting,
//! so the same query renders differently per engine.

use serde::Serialize;

/// A bound parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Placeholder style for bound parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?`
    Qmark,
    /// `$1`, `$2`, ...
    Numbered,
    /// `%s`
    Format,
}

/// How an INSERT without rows writes a row of column defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultRow {
    /// `DEFAULT VALUES`
    DefaultValues,
    /// `() VALUES ()`, for MySQL
    EmptyLists,
}

/// Compilation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub param: ParamStyle,
    pub quote: char,
    pub default_row: DefaultRow,
}

impl Default for State {
    fn default() -> Self {
        Self {
            param: ParamStyle::Qmark,
            quote: '"',
            default_row: DefaultRow::DefaultValues,
        }
    }
}

impl State {
    /// Override the placeholder style
    pub fn with_param(mut self, param: ParamStyle) -> Self {
        self.param = param;
        self
    }

    /// Override the identifier quote character
    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_default_row(mut self, default_row: DefaultRow) -> Self {
        self.default_row = default_row;
        self
    }
}

/// Accumulates SQL text and bound parameters
#[derive(Debug)]
pub struct Context {
    state: State,
    sql: String,
    params: Vec<Value>,
}

impl Context {
    pub fn new(state: State) -> Self {
        Self {
            state,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Append raw SQL text
    pub fn literal(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Append a quoted identifier
    pub fn quoted(&mut self, ident: &str) -> &mut Self {
        let q = self.state.quote;
        self.sql.push(q);
        for c in ident.chars() {
            if c == q {
                self.sql.push(q);
            }
            self.sql.push(c);
        }
        self.sql.push(q);
        self
    }

    /// Append a placeholder and bind `value` to it
    pub fn value(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        match self.state.param {
            ParamStyle::Qmark => self.sql.push('?'),
            ParamStyle::Numbered => {
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
            ParamStyle::Format => self.sql.push_str("%s"),
        }
        self
    }

    /// Append a compiled query or expression
    pub fn sql<Q: Compile + ?Sized>(&mut self, node: &Q) -> &mut Self {
        node.compile(self);
        self
    }

    /// Finish compilation
    pub fn query(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    fn comma_list<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.literal(", ");
            }
            each(self, item);
        }
    }
}

/// Anything that renders into a [`Context`]
pub trait Compile {
    fn compile(&self, ctx: &mut Context);
}

/// Compile a query into its SQL text and parameters
pub fn compile<Q: Compile + ?Sized>(query: &Q, state: State) -> (String, Vec<Value>) {
    let mut ctx = Context::new(state);
    ctx.sql(query);
    ctx.query()
}

/// A WHERE-clause expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Value(Value),
    Binary {
        lhs: Box<Expr>,
        op: &'static str,
        rhs: Box<Expr>,
    },
    Logical {
        lhs: Box<Expr>,
        op: &'static str,
        rhs: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Value>,
    },
}

/// Column reference
pub fn col(name: &str) -> Expr {
    Expr::Column(name.to_string())
}

/// Bound value
pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

impl Expr {
    fn binary(self, op: &'static str, rhs: Expr) -> Expr {
        Expr::Binary {
            lhs: Box::new(self),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(self, v: impl Into<Value>) -> Expr {
        self.binary("=", val(v))
    }

    pub fn ne(self, v: impl Into<Value>) -> Expr {
        self.binary("<>", val(v))
    }

    pub fn lt(self, v: impl Into<Value>) -> Expr {
        self.binary("<", val(v))
    }

    pub fn le(self, v: impl Into<Value>) -> Expr {
        self.binary("<=", val(v))
    }

    pub fn gt(self, v: impl Into<Value>) -> Expr {
        self.binary(">", val(v))
    }

    pub fn ge(self, v: impl Into<Value>) -> Expr {
        self.binary(">=", val(v))
    }

    pub fn like(self, pattern: impl Into<Value>) -> Expr {
        self.binary("LIKE", val(pattern))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::Logical {
            lhs: Box::new(self),
            op: "AND",
            rhs: Box::new(rhs),
        }
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Logical {
            lhs: Box::new(self),
            op: "OR",
            rhs: Box::new(rhs),
        }
    }
}

impl Compile for Expr {
    fn compile(&self, ctx: &mut Context) {
        match self {
            Expr::Column(name) => {
                ctx.quoted(name);
            }
            Expr::Value(v) => {
                ctx.value(v.clone());
            }
            Expr::Binary { lhs, op, rhs } => {
                ctx.sql(lhs.as_ref())
                    .literal(" ")
                    .literal(op)
                    .literal(" ")
                    .sql(rhs.as_ref());
            }
            Expr::Logical { lhs, op, rhs } => {
                ctx.literal("(")
                    .sql(lhs.as_ref())
                    .literal(" ")
                    .literal(op)
                    .literal(" ")
                    .sql(rhs.as_ref())
                    .literal(")");
            }
            Expr::IsNull { expr, negated } => {
                ctx.sql(expr.as_ref());
                ctx.literal(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::In { values, .. } if values.is_empty() => {
                // Nothing is in an empty list.
                ctx.literal("0 = 1");
            }
            Expr::In { expr, values } => {
                ctx.sql(expr.as_ref()).literal(" IN (");
                ctx.comma_list(values, |ctx, v| {
                    ctx.value(v.clone());
                });
                ctx.literal(")");
            }
        }
    }
}

fn where_clause(ctx: &mut Context, filter: &Option<Expr>) {
    if let Some(expr) = filter {
        ctx.literal(" WHERE ").sql(expr);
    }
}

/// SELECT query
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    count: bool,
    filter: Option<Expr>,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// `SELECT * FROM table`
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            count: false,
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// `SELECT COUNT(*) FROM table`
    pub fn count(table: &str) -> Self {
        Self {
            count: true,
            ..Self::table(table)
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a filter; repeated calls are AND-ed together
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), false));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), true));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl Compile for Select {
    fn compile(&self, ctx: &mut Context) {
        ctx.literal("SELECT ");
        if self.count {
            ctx.literal("COUNT(*)");
        } else if self.columns.is_empty() {
            ctx.literal("*");
        } else {
            ctx.comma_list(&self.columns, |ctx, c| {
                ctx.quoted(c);
            });
        }
        ctx.literal(" FROM ").quoted(&self.table);
        where_clause(ctx, &self.filter);
        if !self.order_by.is_empty() {
            ctx.literal(" ORDER BY ");
            ctx.comma_list(&self.order_by, |ctx, (c, desc)| {
                ctx.quoted(c);
                if *desc {
                    ctx.literal(" DESC");
                }
            });
        }
        if let Some(limit) = self.limit {
            ctx.literal(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            ctx.literal(&format!(" OFFSET {}", offset));
        }
    }
}

/// INSERT query, one or more rows
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Insert {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }
}

impl Compile for Insert {
    fn compile(&self, ctx: &mut Context) {
        ctx.literal("INSERT INTO ").quoted(&self.table);
        if self.rows.is_empty() {
            // Column names without values would not parse; write one row of
            // defaults instead.
            match ctx.state().default_row {
                DefaultRow::DefaultValues => ctx.literal(" DEFAULT VALUES"),
                DefaultRow::EmptyLists => ctx.literal(" () VALUES ()"),
            };
            return;
        }
        if !self.columns.is_empty() {
            ctx.literal(" (");
            ctx.comma_list(&self.columns, |ctx, c| {
                ctx.quoted(c);
            });
            ctx.literal(")");
        }
        ctx.literal(" VALUES ");
        ctx.comma_list(&self.rows, |ctx, row| {
            ctx.literal("(");
            ctx.comma_list(row, |ctx, v| {
                ctx.value(v.clone());
            });
            ctx.literal(")");
        });
    }
}

/// UPDATE query
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    assignments: Vec<(String, Value)>,
    filter: Option<Expr>,
}

impl Update {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            assignments: Vec::new(),
            filter: None,
        }
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.assignments.push((column.to_string(), value.into()));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }
}

impl Compile for Update {
    fn compile(&self, ctx: &mut Context) {
        ctx.literal("UPDATE ").quoted(&self.table).literal(" SET ");
        ctx.comma_list(&self.assignments, |ctx, (c, v)| {
            ctx.quoted(c).literal(" = ").value(v.clone());
        });
        where_clause(ctx, &self.filter);
    }
}

/// DELETE query
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    filter: Option<Expr>,
}

impl Delete {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }
}

impl Compile for Delete {
    fn compile(&self, ctx: &mut Context) {
        ctx.literal("DELETE FROM ").quoted(&self.table);
        where_clause(ctx, &self.filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql<Q: Compile>(q: &Q) -> (String, Vec<Value>) {
        compile(q, State::default())
    }

    #[test]
    fn test_select_all() {
        let (text, params) = sql(&Select::table("users"));
        assert_eq!(text, r#"SELECT * FROM "users""#);
        assert!(params.is_empty());
    }

    #[test]
    fn test_select_filtered_ordered() {
        let q = Select::table("users")
            .columns(["id", "username"])
            .filter(col("username").eq("huey"))
            .filter(col("id").gt(3))
            .order_by_desc("id")
            .limit(10)
            .offset(20);
        let (text, params) = sql(&q);
        assert_eq!(
            text,
            r#"SELECT "id", "username" FROM "users" WHERE ("username" = ? AND "id" > ?) ORDER BY "id" DESC LIMIT 10 OFFSET 20"#
        );
        assert_eq!(params, vec![Value::from("huey"), Value::Int(3)]);
    }

    #[test]
    fn test_numbered_params() {
        let q = Select::count("users").filter(col("id").in_list([1, 2, 3]));
        let (text, params) = compile(&q, State::default().with_param(ParamStyle::Numbered));
        assert_eq!(
            text,
            r#"SELECT COUNT(*) FROM "users" WHERE "id" IN ($1, $2, $3)"#
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_quote_override_escapes() {
        let q = Delete::table("we`ird").filter(col("a").is_null().or(col("b").is_not_null()));
        let (text, _) = compile(
            &q,
            State::default()
                .with_quote('`')
                .with_param(ParamStyle::Format),
        );
        assert_eq!(
            text,
            "DELETE FROM `we``ird` WHERE (`a` IS NULL OR `b` IS NOT NULL)"
        );
    }

    #[test]
    fn test_insert_multi_row() {
        let q = Insert::table("notes")
            .columns(["content", "pinned"])
            .row([Value::from("a"), Value::from(true)])
            .row([Value::from("b"), Value::Null]);
        let (text, params) = compile(&q, State::default().with_param(ParamStyle::Format));
        assert_eq!(
            text,
            r#"INSERT INTO "notes" ("content", "pinned") VALUES (%s, %s), (%s, %s)"#
        );
        assert_eq!(params[3], Value::Null);
    }

    #[test]
    fn test_insert_default_values() {
        let (text, _) = sql(&Insert::table("notes"));
        assert_eq!(text, r#"INSERT INTO "notes" DEFAULT VALUES"#);
    }

    #[test]
    fn test_insert_without_rows_ignores_columns() {
        let q = Insert::table("notes").columns(["content"]);
        let (text, params) = sql(&q);
        assert_eq!(text, r#"INSERT INTO "notes" DEFAULT VALUES"#);
        assert!(params.is_empty());

        let state = State::default()
            .with_quote('`')
            .with_default_row(DefaultRow::EmptyLists);
        let (text, _) = compile(&q, state);
        assert_eq!(text, "INSERT INTO `notes` () VALUES ()");
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let q = Select::table("users").filter(col("id").in_list(Vec::<i64>::new()));
        let (text, params) = sql(&q);
        assert_eq!(text, r#"SELECT * FROM "users" WHERE 0 = 1"#);
        assert!(params.is_empty());

        let q = Delete::table("users")
            .filter(col("id").in_list(Vec::<i64>::new()).or(col("id").eq(1)));
        assert_eq!(
            sql(&q).0,
            r#"DELETE FROM "users" WHERE (0 = 1 OR "id" = ?)"#
        );
    }

    #[test]
    fn test_update() {
        let q = Update::table("users")
            .set("username", "mickey")
            .filter(col("username").like("h%"));
        let (text, params) = sql(&q);
        assert_eq!(
            text,
            r#"UPDATE "users" SET "username" = ? WHERE "username" LIKE ?"#
        );
        assert_eq!(params, vec![Value::from("mickey"), Value::from("h%")]);
    }

    #[test]
    fn test_value_json_encoding() {
        let params = vec![
            Value::Null,
            Value::Int(1),
            Value::Text("x".into()),
            Value::Bool(false),
        ];
        assert_eq!(
            serde_json::to_string(&params).unwrap(),
            r#"[null,1,"x",false]"#
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
