//! Convenience WHERE and HAVING predicates
//!
//! Each helper quotes the column, binds the value through the preparer and
//! honours the pending [`or`](QueryBuilder::or)/[`and`](QueryBuilder::and)
//! connective. The `having_*` forms write to HAVING; since the column is
//! quoted as an identifier, they compare against a select-list alias.

use super::{ClauseKind, Expr, Operator, QueryBuilder};
use crate::core::params::Params;
use crate::core::value::DatabaseValue;

/// Where a LIKE pattern may match inside the column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeMode {
    /// `%pattern%`
    #[default]
    Contains,
    /// `pattern%`
    StartsWith,
    /// `%pattern`
    EndsWith,
    /// The whole value, wildcards in the pattern still match literally
    Exact,
}

impl LikeMode {
    fn wrap(&self, escaped: &str) -> String {
        match self {
            LikeMode::Contains => format!("%{}%", escaped),
            LikeMode::StartsWith => format!("{}%", escaped),
            LikeMode::EndsWith => format!("%{}", escaped),
            LikeMode::Exact => escaped.to_string(),
        }
    }
}

impl QueryBuilder {
    fn column(&self, column: &str) -> String {
        self.escaper().escape_identifier(column)
    }

    fn where_expr(self, expr: Expr) -> Self {
        self.push_predicate(ClauseKind::Where, None, expr)
    }

    fn where_template(self, template: String, params: Params) -> Self {
        self.where_expr(Expr::Template { template, params })
    }

    fn compare(self, kind: ClauseKind, column: &str, op: Operator, value: DatabaseValue) -> Self {
        let column = self.column(column);
        let expr = match (op, value.is_null()) {
            (Operator::Eq, true) => Expr::Sql(format!("{} IS NULL", column)),
            (Operator::Ne, true) => Expr::Sql(format!("{} IS NOT NULL", column)),
            _ => Expr::Template {
                template: format!("{} {} ?", column, op.as_sql()),
                params: Params::new().bind(value),
            },
        };
        self.push_predicate(kind, None, expr)
    }

    /// `column <op> value`; a NULL value under `=`/`<>` becomes `IS [NOT] NULL`
    #[must_use]
    pub fn where_op(self, column: &str, op: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.compare(ClauseKind::Where, column, op, value.into())
    }

    #[must_use]
    pub fn where_eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    #[must_use]
    pub fn where_ne(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Ne, value)
    }

    #[must_use]
    pub fn where_gt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Gt, value)
    }

    #[must_use]
    pub fn where_ge(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Ge, value)
    }

    #[must_use]
    pub fn where_lt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Lt, value)
    }

    #[must_use]
    pub fn where_le(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.where_op(column, Operator::Le, value)
    }

    #[must_use]
    pub fn where_null(self, column: &str) -> Self {
        let sql = format!("{} IS NULL", self.column(column));
        self.where_expr(Expr::Sql(sql))
    }

    #[must_use]
    pub fn where_not_null(self, column: &str) -> Self {
        let sql = format!("{} IS NOT NULL", self.column(column));
        self.where_expr(Expr::Sql(sql))
    }

    /// `column IN (...)`; an empty set matches nothing
    #[must_use]
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.membership(ClauseKind::Where, column, values, false)
    }

    /// `column NOT IN (...)`; an empty set matches everything
    #[must_use]
    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.membership(ClauseKind::Where, column, values, true)
    }

    fn membership<I, V>(self, kind: ClauseKind, column: &str, values: I, negated: bool) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values: Vec<DatabaseValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            let always = if negated { "1 = 1" } else { "1 = 0" };
            return self.push_predicate(kind, None, Expr::Sql(always.to_string()));
        }
        let template = format!(
            "{} {}IN (?)",
            self.column(column),
            if negated { "NOT " } else { "" }
        );
        let params = Params::new().bind(DatabaseValue::List(values));
        self.push_predicate(kind, None, Expr::Template { template, params })
    }

    /// `column BETWEEN low AND high`
    #[must_use]
    pub fn where_between(
        self,
        column: &str,
        low: impl Into<DatabaseValue>,
        high: impl Into<DatabaseValue>,
    ) -> Self {
        let template = format!("{} BETWEEN ? AND ?", self.column(column));
        self.where_template(template, Params::new().bind(low).bind(high))
    }

    /// `column LIKE pattern`, with `%`, `_` and `\` in `pattern` matched literally
    #[must_use]
    pub fn where_like(self, column: &str, pattern: &str, mode: LikeMode) -> Self {
        self.like(column, pattern, mode, false)
    }

    #[must_use]
    pub fn where_not_like(self, column: &str, pattern: &str, mode: LikeMode) -> Self {
        self.like(column, pattern, mode, true)
    }

    fn like(self, column: &str, pattern: &str, mode: LikeMode, negated: bool) -> Self {
        let pattern = mode.wrap(&self.escaper().escape_like(pattern));
        let escape = if self.agent().needs_like_escape_clause() {
            " ESCAPE '\\'"
        } else {
            ""
        };
        let template = format!(
            "{} {}LIKE ?{}",
            self.column(column),
            if negated { "NOT " } else { "" },
            escape
        );
        self.where_template(template, Params::new().bind(pattern))
    }

    /// HAVING `column <op> value`, with the same NULL handling as [`where_op`](Self::where_op)
    #[must_use]
    pub fn having_op(self, column: &str, op: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.compare(ClauseKind::Having, column, op, value.into())
    }

    #[must_use]
    pub fn having_eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Eq, value)
    }

    #[must_use]
    pub fn having_ne(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Ne, value)
    }

    #[must_use]
    pub fn having_gt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Gt, value)
    }

    #[must_use]
    pub fn having_ge(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Ge, value)
    }

    #[must_use]
    pub fn having_lt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Lt, value)
    }

    #[must_use]
    pub fn having_le(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.having_op(column, Operator::Le, value)
    }

    #[must_use]
    pub fn having_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.membership(ClauseKind::Having, column, values, false)
    }

    #[must_use]
    pub fn having_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.membership(ClauseKind::Having, column, values, true)
    }

    #[must_use]
    pub fn having_between(
        self,
        column: &str,
        low: impl Into<DatabaseValue>,
        high: impl Into<DatabaseValue>,
    ) -> Self {
        let template = format!("{} BETWEEN ? AND ?", self.column(column));
        let params = Params::new().bind(low).bind(high);
        self.push_predicate(ClauseKind::Having, None, Expr::Template { template, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::Agent;
    use crate::core::error::DatabaseError;
    use crate::core::escaper::Escaper;

    fn builder(agent: Agent) -> QueryBuilder {
        QueryBuilder::new(Escaper::new(agent)).table("users")
    }

    #[test]
    fn test_comparisons_quote_columns() {
        let sql = builder(Agent::Mysql)
            .where_eq("status", "active")
            .where_gt("age", 18)
            .where_le("users.score", 9.5)
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (`status` = 'active' AND `age` > 18 AND `users`.`score` <= 9.5)"
        );
    }

    #[test]
    fn test_or_switch_applies_to_next_predicate_only() {
        let sql = builder(Agent::Postgres)
            .where_eq("a", 1)
            .or()
            .where_eq("b", 2)
            .where_eq("c", 3)
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (\"a\" = 1 OR \"b\" = 2 AND \"c\" = 3)"
        );
    }

    #[test]
    fn test_null_predicates() {
        let sql = builder(Agent::Mysql)
            .where_eq("deleted_at", DatabaseValue::Null)
            .where_not_null("email")
            .where_ne("banned_at", None::<i64>)
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (`deleted_at` IS NULL AND `email` IS NOT NULL AND `banned_at` IS NOT NULL)"
        );
    }

    #[test]
    fn test_in_and_not_in() {
        let sql = builder(Agent::Mysql)
            .where_in("id", vec![1, 2, 3])
            .where_not_in("role", vec!["admin", "bot"])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (`id` IN (1, 2, 3) AND `role` NOT IN ('admin', 'bot'))"
        );
    }

    #[test]
    fn test_empty_in_sets() {
        let sql = builder(Agent::Mysql)
            .where_in("id", Vec::<i32>::new())
            .or()
            .where_not_in("id", Vec::<i32>::new())
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE (1 = 0 OR 1 = 1)");
    }

    #[test]
    fn test_between() {
        let sql = builder(Agent::Sqlite)
            .where_between("age", 18, 65)
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE (\"age\" BETWEEN 18 AND 65)");
    }

    #[test]
    fn test_like_escapes_wildcards() {
        let sql = builder(Agent::Sqlite)
            .where_like("name", "50%_off", LikeMode::StartsWith)
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (\"name\" LIKE '50\\%\\_off%' ESCAPE '\\')"
        );

        // MySQL's default LIKE escape is already the backslash
        let sql = builder(Agent::Mysql)
            .where_not_like("name", "a_b", LikeMode::Contains)
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE (`name` NOT LIKE '%a\\\\_b%')");
    }

    #[test]
    fn test_having_predicates() {
        let sql = QueryBuilder::new(Escaper::new(Agent::Mysql))
            .table("orders")
            .select("user_id, SUM(total) AS spent")
            .group_by(&["user_id"])
            .where_eq("status", "paid")
            .having_gt("spent", 100)
            .or()
            .having_in("user_id", vec![7, 9])
            .having_between("spent", 1, 5000)
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT user_id, SUM(total) AS spent FROM orders WHERE (`status` = 'paid') \
             GROUP BY user_id HAVING (`spent` > 100 OR `user_id` IN (7, 9) \
             AND `spent` BETWEEN 1 AND 5000)"
        );

        let sql = builder(Agent::Postgres)
            .group_by(&["role"])
            .having_eq("role", DatabaseValue::Null)
            .having_not_in("role", Vec::<&str>::new())
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users GROUP BY role HAVING (\"role\" IS NULL AND 1 = 1)"
        );
    }

    #[test]
    fn test_predicate_value_errors_surface_at_build() {
        let err = builder(Agent::Mysql)
            .where_eq("ratio", f64::NAN)
            .build()
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UnsupportedValue(_)));
    }
}
