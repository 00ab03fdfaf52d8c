//! Fluent SQL statement builder
//!
//! A [`QueryBuilder`] accumulates clause fragments and renders one
//! SELECT, INSERT, UPDATE or DELETE statement. Every literal goes through the
//! builder's [`Preparer`], so values are escaped for the target backend.
//!
//! ```
//! use rust_db_toolkit::core::{agent::Agent, escaper::Escaper, query_builder::QueryBuilder};
//!
//! let sql = QueryBuilder::new(Escaper::new(Agent::Mysql))
//!     .table("users")
//!     .select("id,name")
//!     .where_("id = ?", vec![5])
//!     .build()
//!     .unwrap();
//! assert_eq!(sql, "SELECT id,name FROM users WHERE (id = 5)");
//! ```
//!
//! Table names, join targets, `select` field lists, `group_by` and `order_by`
//! expressions are emitted verbatim. Column names passed to `select_columns`,
//! insert rows, update assignments and the convenience predicates are quoted.

mod predicates;

pub use predicates::LikeMode;

use super::agent::Agent;
use super::error::{DatabaseError, Result};
use super::escaper::Escaper;
use super::link::Link;
use super::params::Params;
use super::preparer::Preparer;
use super::result::{FetchedRow, QueryResult, Record};
use std::collections::BTreeMap;

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

/// JOIN types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
    /// FULL OUTER JOIN
    Full,
}

impl JoinType {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Aggregate functions for [`QueryBuilder::aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    fn as_sql(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// Boolean connective placed before a WHERE/HAVING predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// Clause kinds, in rendering order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ClauseKind {
    /// Extra select-list entries: aggregates, JSON shapes, sub-selects
    Columns,
    Join,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
}

impl ClauseKind {
    fn name(&self) -> &'static str {
        match self {
            ClauseKind::Columns => "aggregate/sub-select columns",
            ClauseKind::Join => "JOIN",
            ClauseKind::Where => "WHERE",
            ClauseKind::GroupBy => "GROUP BY",
            ClauseKind::Having => "HAVING",
            ClauseKind::OrderBy => "ORDER BY",
            ClauseKind::Limit => "LIMIT",
        }
    }
}

/// A clause fragment, resolved when the statement is rendered
#[derive(Debug, Clone)]
enum Expr {
    Sql(String),
    Template {
        template: String,
        params: Params,
    },
    Exists {
        negated: bool,
        query: Box<QueryBuilder>,
    },
    Subquery {
        query: Box<QueryBuilder>,
        alias: String,
    },
    Json {
        shape: String,
        pairs: Vec<(String, String)>,
        alias: String,
    },
    Limit {
        limit: usize,
        offset: Option<usize>,
    },
}

#[derive(Debug, Clone)]
struct Fragment {
    connective: Connective,
    expr: Expr,
}

#[derive(Debug, Clone)]
enum Statement {
    /// `None` selects `*` unless extra columns were added
    Select { fields: Option<String> },
    Insert { rows: Vec<Record> },
    Update { assignments: Record },
    Delete,
}

impl Statement {
    fn name(&self) -> &'static str {
        match self {
            Statement::Select { .. } => "SELECT",
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete => "DELETE",
        }
    }
}

/// Fluent statement builder
///
/// A fresh builder is in SELECT mode with no fields, which renders `*`.
/// [`select`](Self::select), [`insert`](Self::insert),
/// [`update`](Self::update) and [`delete`](Self::delete) switch the mode and
/// clear every clause added so far.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    preparer: Preparer,
    table: Option<String>,
    statement: Statement,
    clauses: BTreeMap<ClauseKind, Vec<Fragment>>,
    pending: Connective,
}

impl QueryBuilder {
    /// Create a builder rendering for the escaper's backend
    pub fn new(escaper: Escaper) -> Self {
        Self {
            preparer: Preparer::new(escaper),
            table: None,
            statement: Statement::Select { fields: None },
            clauses: BTreeMap::new(),
            pending: Connective::And,
        }
    }

    pub fn agent(&self) -> Agent {
        self.escaper().agent()
    }

    fn escaper(&self) -> &Escaper {
        self.preparer.escaper()
    }

    /// Set the target table, emitted verbatim
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    fn reset(mut self, statement: Statement) -> Self {
        self.statement = statement;
        self.clauses.clear();
        self.pending = Connective::And;
        self
    }

    /// Start a SELECT with a verbatim field list, e.g. `"id, name"`
    #[must_use]
    pub fn select(self, fields: &str) -> Self {
        let fields = Some(fields.trim().to_string()).filter(|f| !f.is_empty());
        self.reset(Statement::Select { fields })
    }

    /// Start a SELECT of quoted column names
    #[must_use]
    pub fn select_columns<S: AsRef<str>>(self, columns: &[S]) -> Self {
        let fields = if columns.is_empty() {
            None
        } else {
            Some(self.escaper().escape_identifiers(columns))
        };
        self.reset(Statement::Select { fields })
    }

    /// Start a (multi-row) INSERT
    ///
    /// Every row must carry the columns of the first row.
    #[must_use]
    pub fn insert(self, rows: impl IntoIterator<Item = Record>) -> Self {
        let rows = rows.into_iter().collect();
        self.reset(Statement::Insert { rows })
    }

    /// Start a single-row INSERT
    #[must_use]
    pub fn insert_row(self, row: Record) -> Self {
        self.insert([row])
    }

    /// Start an UPDATE setting each column of `assignments`
    #[must_use]
    pub fn update(self, assignments: Record) -> Self {
        self.reset(Statement::Update { assignments })
    }

    /// Start a DELETE
    #[must_use]
    pub fn delete(self) -> Self {
        self.reset(Statement::Delete)
    }

    fn push(mut self, kind: ClauseKind, expr: Expr) -> Self {
        self.clauses.entry(kind).or_default().push(Fragment {
            connective: Connective::And,
            expr,
        });
        self
    }

    fn push_predicate(
        mut self,
        kind: ClauseKind,
        connective: Option<Connective>,
        expr: Expr,
    ) -> Self {
        let pending = std::mem::take(&mut self.pending);
        self.clauses.entry(kind).or_default().push(Fragment {
            connective: connective.unwrap_or(pending),
            expr,
        });
        self
    }

    /// Add a JOIN; `table` and `on` are emitted verbatim
    #[must_use]
    pub fn join(self, join_type: JoinType, table: &str, on: &str) -> Self {
        let sql = format!("{} {} ON {}", join_type.as_sql(), table, on);
        self.push(ClauseKind::Join, Expr::Sql(sql))
    }

    #[must_use]
    pub fn inner_join(self, table: &str, on: &str) -> Self {
        self.join(JoinType::Inner, table, on)
    }

    #[must_use]
    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.join(JoinType::Left, table, on)
    }

    #[must_use]
    pub fn right_join(self, table: &str, on: &str) -> Self {
        self.join(JoinType::Right, table, on)
    }

    /// Add a WHERE predicate template, resolved through the preparer
    ///
    /// The connective defaults to AND, or to whatever the last
    /// [`or`](Self::or)/[`and`](Self::and) call selected.
    #[must_use]
    pub fn where_(self, template: &str, params: impl Into<Params>) -> Self {
        let expr = template_expr(template, params.into());
        self.push_predicate(ClauseKind::Where, None, expr)
    }

    /// Add a WHERE predicate joined with OR
    #[must_use]
    pub fn or_where(self, template: &str, params: impl Into<Params>) -> Self {
        let expr = template_expr(template, params.into());
        self.push_predicate(ClauseKind::Where, Some(Connective::Or), expr)
    }

    /// Add a HAVING predicate template
    #[must_use]
    pub fn having(self, template: &str, params: impl Into<Params>) -> Self {
        let expr = template_expr(template, params.into());
        self.push_predicate(ClauseKind::Having, None, expr)
    }

    /// Add a HAVING predicate joined with OR
    #[must_use]
    pub fn or_having(self, template: &str, params: impl Into<Params>) -> Self {
        let expr = template_expr(template, params.into());
        self.push_predicate(ClauseKind::Having, Some(Connective::Or), expr)
    }

    /// Join the next predicate with OR
    #[must_use]
    pub fn or(mut self) -> Self {
        self.pending = Connective::Or;
        self
    }

    /// Join the next predicate with AND
    #[must_use]
    pub fn and(mut self) -> Self {
        self.pending = Connective::And;
        self
    }

    /// Require a nested query to return rows
    #[must_use]
    pub fn where_exists(self, query: QueryBuilder) -> Self {
        let expr = Expr::Exists {
            negated: false,
            query: Box::new(query),
        };
        self.push_predicate(ClauseKind::Where, None, expr)
    }

    /// Require a nested query to return no rows
    #[must_use]
    pub fn where_not_exists(self, query: QueryBuilder) -> Self {
        let expr = Expr::Exists {
            negated: true,
            query: Box::new(query),
        };
        self.push_predicate(ClauseKind::Where, None, expr)
    }

    /// EXISTS over a raw subquery template
    #[must_use]
    pub fn where_exists_raw(self, subquery: &str, params: impl Into<Params>) -> Self {
        self.where_(&format!("EXISTS ({})", subquery), params)
    }

    /// NOT EXISTS over a raw subquery template
    #[must_use]
    pub fn where_not_exists_raw(self, subquery: &str, params: impl Into<Params>) -> Self {
        self.where_(&format!("NOT EXISTS ({})", subquery), params)
    }

    /// Add verbatim GROUP BY expressions
    #[must_use]
    pub fn group_by<S: AsRef<str>>(self, columns: &[S]) -> Self {
        let sql = columns
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        self.push(ClauseKind::GroupBy, Expr::Sql(sql))
    }

    /// Add an ORDER BY expression, emitted verbatim
    #[must_use]
    pub fn order_by(self, column: &str, direction: OrderDirection) -> Self {
        let sql = format!("{} {}", column, direction.as_sql());
        self.push(ClauseKind::OrderBy, Expr::Sql(sql))
    }

    #[must_use]
    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Asc)
    }

    #[must_use]
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    /// Set the LIMIT, replacing an earlier one
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.clauses.remove(&ClauseKind::Limit);
        self.push(ClauseKind::Limit, Expr::Limit { limit, offset: None })
    }

    /// Set LIMIT and OFFSET, replacing an earlier limit
    #[must_use]
    pub fn limit_offset(mut self, limit: usize, offset: usize) -> Self {
        self.clauses.remove(&ClauseKind::Limit);
        let expr = Expr::Limit {
            limit,
            offset: Some(offset),
        };
        self.push(ClauseKind::Limit, expr)
    }

    /// Cap the LIMIT at one row, keeping any OFFSET
    fn first_only(mut self) -> Self {
        let (limit, offset) = match self.clause(ClauseKind::Limit).last() {
            Some(Fragment {
                expr: Expr::Limit { limit, offset },
                ..
            }) => ((*limit).min(1), *offset),
            _ => (1, None),
        };
        self.clauses.remove(&ClauseKind::Limit);
        self.push(ClauseKind::Limit, Expr::Limit { limit, offset })
    }

    /// Add an aggregate to the select list
    ///
    /// `column` is quoted (`*` passes through); an empty `alias` adds no
    /// `AS` clause.
    #[must_use]
    pub fn aggregate(self, function: AggregateFn, column: &str, alias: &str) -> Self {
        let escaper = *self.escaper();
        let mut sql = format!(
            "{}({})",
            function.as_sql(),
            escaper.escape_identifier(column)
        );
        if !alias.is_empty() {
            sql.push_str(&format!(" AS {}", escaper.escape_identifier(alias)));
        }
        self.push(ClauseKind::Columns, Expr::Sql(sql))
    }

    /// Add a JSON-shaped column to the select list
    ///
    /// `pairs` maps JSON keys to column names. Shape `object` builds one
    /// object per row, shape `array` aggregates those objects into one array.
    /// Any other shape fails when the statement is rendered.
    #[must_use]
    pub fn json(self, shape: &str, pairs: &[(&str, &str)], alias: &str) -> Self {
        let expr = Expr::Json {
            shape: shape.to_string(),
            pairs: pairs
                .iter()
                .map(|(k, c)| (k.to_string(), c.to_string()))
                .collect(),
            alias: alias.to_string(),
        };
        self.push(ClauseKind::Columns, expr)
    }

    /// Add a scalar sub-select to the select list; `alias` must not be empty
    #[must_use]
    pub fn select_subquery(self, query: QueryBuilder, alias: &str) -> Self {
        let expr = Expr::Subquery {
            query: Box::new(query),
            alias: alias.to_string(),
        };
        self.push(ClauseKind::Columns, expr)
    }

    /// Render the statement
    ///
    /// Rendering has no side effects, so calling it twice on an unchanged
    /// builder returns the same text.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::BuilderState`] when no table is set, a clause does
    ///   not fit the statement mode, or a JSON shape is unknown
    /// - Preparer and escaper errors from embedded predicates
    pub fn build(&self) -> Result<String> {
        let table = self
            .table
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DatabaseError::builder_state(format!(
                    "{} statement has no table",
                    self.statement.name()
                ))
            })?;

        match &self.statement {
            Statement::Select { fields } => self.render_select(table, fields.as_deref()),
            Statement::Insert { rows } => self.render_insert(table, rows),
            Statement::Update { assignments } => self.render_update(table, assignments),
            Statement::Delete => {
                self.reject(&[
                    ClauseKind::Columns,
                    ClauseKind::Join,
                    ClauseKind::GroupBy,
                    ClauseKind::Having,
                ])?;
                let mut sql = format!("DELETE FROM {}", table);
                self.render_tail(&mut sql)?;
                Ok(sql)
            }
        }
    }

    /// Render this SELECT wrapped in a row count
    pub fn build_count(&self) -> Result<String> {
        if !matches!(self.statement, Statement::Select { .. }) {
            return Err(DatabaseError::builder_state(format!(
                "cannot count a {} statement",
                self.statement.name()
            )));
        }
        Ok(format!(
            "SELECT COUNT(*) AS aggregate FROM ({}) AS counted",
            self.build()?
        ))
    }

    fn clause(&self, kind: ClauseKind) -> &[Fragment] {
        self.clauses.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    fn reject(&self, kinds: &[ClauseKind]) -> Result<()> {
        match kinds.iter().find(|k| !self.clause(**k).is_empty()) {
            Some(kind) => Err(DatabaseError::builder_state(format!(
                "{} statement cannot take {}",
                self.statement.name(),
                kind.name()
            ))),
            None => Ok(()),
        }
    }

    fn render_select(&self, table: &str, fields: Option<&str>) -> Result<String> {
        let mut columns: Vec<String> = fields.map(str::to_string).into_iter().collect();
        for fragment in self.clause(ClauseKind::Columns) {
            columns.push(self.render_expr(&fragment.expr)?);
        }
        let columns = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, table);
        for fragment in self.clause(ClauseKind::Join) {
            sql.push(' ');
            sql.push_str(&self.render_expr(&fragment.expr)?);
        }
        if let Some(predicates) = self.render_predicates(ClauseKind::Where)? {
            sql.push_str(&format!(" WHERE ({})", predicates));
        }
        let group_by = self.render_list(ClauseKind::GroupBy)?;
        if !group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_by));
        }
        if let Some(predicates) = self.render_predicates(ClauseKind::Having)? {
            sql.push_str(&format!(" HAVING ({})", predicates));
        }
        let order_by = self.render_list(ClauseKind::OrderBy)?;
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by));
        }
        if let Some(limit) = self.clause(ClauseKind::Limit).last() {
            sql.push_str(&format!(" LIMIT {}", self.render_expr(&limit.expr)?));
        }
        Ok(sql)
    }

    fn render_insert(&self, table: &str, rows: &[Record]) -> Result<String> {
        self.reject(&[
            ClauseKind::Columns,
            ClauseKind::Join,
            ClauseKind::Where,
            ClauseKind::GroupBy,
            ClauseKind::Having,
            ClauseKind::OrderBy,
            ClauseKind::Limit,
        ])?;

        let first = rows
            .first()
            .filter(|row| !row.is_empty())
            .ok_or_else(|| DatabaseError::builder_state("INSERT has no values"))?;
        let columns: Vec<&str> = first.keys().collect();
        let escaper = self.escaper();

        let mut tuples = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatabaseError::builder_state(format!(
                    "INSERT row {} has {} column(s), expected {}",
                    idx,
                    row.len(),
                    columns.len()
                )));
            }
            let values = columns
                .iter()
                .map(|column| {
                    let value = row.get(column).ok_or_else(|| {
                        DatabaseError::builder_state(format!(
                            "INSERT row {} has no value for column '{}'",
                            idx, column
                        ))
                    })?;
                    escaper.escape_value(value, None)
                })
                .collect::<Result<Vec<_>>>()?;
            tuples.push(format!("({})", values.join(", ")));
        }

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            escaper.escape_identifiers(&columns),
            tuples.join(", ")
        ))
    }

    fn render_update(&self, table: &str, assignments: &Record) -> Result<String> {
        self.reject(&[
            ClauseKind::Columns,
            ClauseKind::Join,
            ClauseKind::GroupBy,
            ClauseKind::Having,
        ])?;
        if assignments.is_empty() {
            return Err(DatabaseError::builder_state("UPDATE has no assignments"));
        }

        let escaper = self.escaper();
        let set = assignments
            .keys()
            .zip(assignments.values())
            .map(|(column, value)| {
                Ok(format!(
                    "{} = {}",
                    escaper.escape_identifier(column),
                    escaper.escape_value(value, None)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!("UPDATE {} SET {}", table, set.join(", "));
        self.render_tail(&mut sql)?;
        Ok(sql)
    }

    /// WHERE, ORDER BY and LIMIT of UPDATE/DELETE
    fn render_tail(&self, sql: &mut String) -> Result<()> {
        if let Some(predicates) = self.render_predicates(ClauseKind::Where)? {
            sql.push_str(&format!(" WHERE ({})", predicates));
        }

        let order_by = self.render_list(ClauseKind::OrderBy)?;
        let limit = self.clause(ClauseKind::Limit).last();
        if (!order_by.is_empty() || limit.is_some()) && !self.agent().supports_update_limit() {
            return Err(DatabaseError::builder_state(format!(
                "{} does not support ORDER BY/LIMIT on {}",
                self.agent(),
                self.statement.name()
            )));
        }
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", self.render_expr(&limit.expr)?));
        }
        Ok(())
    }

    fn render_list(&self, kind: ClauseKind) -> Result<String> {
        let parts = self
            .clause(kind)
            .iter()
            .map(|fragment| self.render_expr(&fragment.expr))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    fn render_predicates(&self, kind: ClauseKind) -> Result<Option<String>> {
        let fragments = self.clause(kind);
        if fragments.is_empty() {
            return Ok(None);
        }

        let mut out = String::new();
        for (idx, fragment) in fragments.iter().enumerate() {
            if idx > 0 {
                out.push(' ');
                out.push_str(fragment.connective.as_sql());
                out.push(' ');
            }
            out.push_str(&self.render_expr(&fragment.expr)?);
        }
        Ok(Some(out))
    }

    fn render_expr(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Sql(sql) => Ok(sql.clone()),
            Expr::Template { template, params } => self.preparer.prepare(template, params),
            Expr::Exists { negated, query } => Ok(format!(
                "{}EXISTS ({})",
                if *negated { "NOT " } else { "" },
                query.build()?
            )),
            Expr::Subquery { query, alias } => {
                if alias.trim().is_empty() {
                    return Err(DatabaseError::builder_state(
                        "a sub-select column needs an alias",
                    ));
                }
                Ok(format!(
                    "({}) AS {}",
                    query.build()?,
                    self.escaper().escape_identifier(alias)
                ))
            }
            Expr::Json {
                shape,
                pairs,
                alias,
            } => self.render_json(shape, pairs, alias),
            Expr::Limit { limit, offset } => Ok(match offset {
                Some(offset) => format!("{} OFFSET {}", limit, offset),
                None => limit.to_string(),
            }),
        }
    }

    fn render_json(&self, shape: &str, pairs: &[(String, String)], alias: &str) -> Result<String> {
        let escaper = self.escaper();
        let (object_fn, array_fn) = match self.agent() {
            Agent::Mysql => ("JSON_OBJECT", "JSON_ARRAYAGG"),
            Agent::Postgres => ("json_build_object", "json_agg"),
            Agent::Sqlite => ("json_object", "json_group_array"),
        };

        let args = pairs
            .iter()
            .map(|(key, column)| {
                Ok(format!(
                    "{}, {}",
                    escaper.quote(key)?,
                    escaper.escape_identifier(column)
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let object = format!("{}({})", object_fn, args.join(", "));

        let mut sql = match shape.to_ascii_lowercase().as_str() {
            "object" => object,
            "array" => format!("{}({})", array_fn, object),
            other => {
                return Err(DatabaseError::builder_state(format!(
                    "unsupported JSON shape '{}'",
                    other
                )))
            }
        };
        if !alias.is_empty() {
            sql.push_str(&format!(" AS {}", escaper.escape_identifier(alias)));
        }
        Ok(sql)
    }

    /// Fetch the first row of this SELECT
    pub async fn get(&self, link: &Link) -> Result<Option<FetchedRow>> {
        let sql = self.clone().first_only().build()?;
        let result = link.execute_raw(&sql).await?;
        Ok(result.rows.into_iter().next())
    }

    /// Fetch every row of this SELECT
    pub async fn get_all(&self, link: &Link) -> Result<QueryResult> {
        link.execute_raw(&self.build()?).await
    }

    /// Execute this statement, typically an INSERT, UPDATE or DELETE
    pub async fn run(&self, link: &Link) -> Result<QueryResult> {
        link.execute_raw(&self.build()?).await
    }

    /// Count the rows this SELECT would return
    pub async fn count(&self, link: &Link) -> Result<u64> {
        let result = link.execute_raw(&self.build_count()?).await?;
        result
            .first()
            .and_then(|row| row.get("aggregate").or_else(|| row.at(0)))
            .and_then(|value| value.as_long())
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| DatabaseError::other("COUNT(*) returned no value"))
    }
}

fn template_expr(template: &str, params: Params) -> Expr {
    Expr::Template {
        template: template.to_string(),
        params,
    }
}
