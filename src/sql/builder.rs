// Abstract SELECT builder serialized through a dialect.
//
// The builder holds already-rendered expression fragments; dialect-specific
// rendering (quoting, truncation, casts) happens before fragments enter the
// builder. What the builder owns is clause assembly and the raw-subquery
// FROM form.

use crate::sql::dialect::Dialect;

#[derive(Debug, Clone)]
enum FromItem {
    Table(String),
    RawSql(String),
}

/// Composable single-SELECT statement.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    dialect: Dialect,
    projections: Vec<String>,
    from: Option<FromItem>,
    predicates: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
}

impl SelectBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            projections: Vec::new(),
            from: None,
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn select(mut self, expr: impl Into<String>) -> Self {
        self.projections.push(expr.into());
        self
    }

    /// FROM a (possibly qualified) table identifier.
    pub fn from_table(mut self, name: &str) -> Self {
        self.from = Some(FromItem::Table(self.dialect.table_ref(name)));
        self
    }

    /// FROM a raw SELECT, wrapped as `( <raw> ) AS d`.
    pub fn from_raw_sql(mut self, sql: &str) -> Self {
        self.from = Some(FromItem::RawSql(sql.trim().trim_end_matches(';').to_string()));
        self
    }

    pub fn and_where(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn group_by(mut self, expr: impl Into<String>) -> Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn build(self) -> String {
        let mut sql = String::with_capacity(128);
        sql.push_str("SELECT ");
        sql.push_str(&self.projections.join(", "));

        match &self.from {
            Some(FromItem::Table(name)) => {
                sql.push_str(" FROM ");
                sql.push_str(name);
            },
            Some(FromItem::RawSql(raw)) => {
                sql.push_str(" FROM (");
                sql.push_str(raw);
                sql.push_str(") AS d");
            },
            None => {},
        }

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        sql
    }
}
