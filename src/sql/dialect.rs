// SQL dialect abstraction
//
// Each supported engine differs in identifier quoting, time-bucket
// truncation, and cast syntax. The composer builds one abstract query and
// serializes it through a `Dialect`, so the same check emits semantically
// equivalent SQL on every engine.

use crate::models::Granularity;

/// Target dialect tag, selected by the datasource `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Snowflake,
    Databricks,
    BigQuery,
    DuckDb,
}

impl Dialect {
    fn quote_pair(&self) -> (char, char) {
        match self {
            Dialect::MySql | Dialect::Databricks | Dialect::BigQuery => ('`', '`'),
            Dialect::Postgres | Dialect::Snowflake | Dialect::DuckDb => ('"', '"'),
        }
    }

    /// Quote one identifier part when it is not a plain word. Plain
    /// lowercase identifiers are left bare so unquoted-name folding rules
    /// keep working on engines that have them.
    pub fn quote_ident(&self, ident: &str) -> String {
        let plain = !ident.is_empty()
            && ident
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !ident.chars().next().is_some_and(|c| c.is_ascii_digit());
        if plain {
            return ident.to_string();
        }
        let (open, close) = self.quote_pair();
        format!("{}{}{}", open, ident.replace(close, &format!("{0}{0}", close)), close)
    }

    /// Render a possibly schema- or catalog-qualified table reference.
    pub fn table_ref(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Cast an expression to a double-precision float, used for the
    /// completeness ratio.
    pub fn cast_double(&self, expr: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST({} AS DOUBLE PRECISION)", expr),
            Dialect::BigQuery => format!("CAST({} AS FLOAT64)", expr),
            Dialect::MySql | Dialect::Snowflake | Dialect::Databricks | Dialect::DuckDb => {
                format!("CAST({} AS DOUBLE)", expr)
            },
        }
    }

    /// Truncate `expr` to the start of the given bucket.
    ///
    /// Engines with a native `DATE_TRUNC` get it directly. MySQL has no
    /// such function and BigQuery's `TIMESTAMP_TRUNC` stops at YEAR, so
    /// both fall back to expression arithmetic for the units they lack.
    pub fn date_trunc(&self, granularity: Granularity, expr: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Snowflake | Dialect::Databricks | Dialect::DuckDb => {
                format!("DATE_TRUNC('{}', {})", granularity.as_str(), expr)
            },
            Dialect::BigQuery => self.bigquery_trunc(granularity, expr),
            Dialect::MySql => self.mysql_trunc(granularity, expr),
        }
    }

    fn bigquery_trunc(&self, granularity: Granularity, expr: &str) -> String {
        let unit = match granularity {
            Granularity::Year => "YEAR",
            Granularity::Quarter => "QUARTER",
            Granularity::Month => "MONTH",
            Granularity::Week => "WEEK(MONDAY)",
            Granularity::Day => "DAY",
            Granularity::Hour => "HOUR",
            Granularity::Minute => "MINUTE",
            Granularity::Second => "SECOND",
            Granularity::Millennium | Granularity::Century | Granularity::Decade => {
                let span = match granularity {
                    Granularity::Millennium => 1000,
                    Granularity::Century => 100,
                    _ => 10,
                };
                return format!(
                    "TIMESTAMP(FORMAT('%04d-01-01', DIV(EXTRACT(YEAR FROM {expr}), {span}) * {span}))"
                );
            },
        };
        format!("TIMESTAMP_TRUNC({}, {})", expr, unit)
    }

    fn mysql_trunc(&self, granularity: Granularity, expr: &str) -> String {
        match granularity {
            Granularity::Millennium => {
                format!("MAKEDATE(YEAR({expr}) - MOD(YEAR({expr}), 1000), 1)")
            },
            Granularity::Century => {
                format!("MAKEDATE(YEAR({expr}) - MOD(YEAR({expr}), 100), 1)")
            },
            Granularity::Decade => {
                format!("MAKEDATE(YEAR({expr}) - MOD(YEAR({expr}), 10), 1)")
            },
            Granularity::Year => format!("MAKEDATE(YEAR({expr}), 1)"),
            Granularity::Quarter => format!(
                "STR_TO_DATE(CONCAT(YEAR({expr}), '-', 3 * QUARTER({expr}) - 2, '-01'), '%Y-%c-%d')"
            ),
            Granularity::Month => {
                format!("STR_TO_DATE(DATE_FORMAT({expr}, '%Y-%m-01'), '%Y-%m-%d')")
            },
            Granularity::Week => {
                format!("DATE_SUB(DATE({expr}), INTERVAL WEEKDAY({expr}) DAY)")
            },
            Granularity::Day => format!("DATE({expr})"),
            Granularity::Hour => format!("DATE_FORMAT({expr}, '%Y-%m-%d %H:00:00')"),
            Granularity::Minute => format!("DATE_FORMAT({expr}, '%Y-%m-%d %H:%i:00')"),
            Granularity::Second => format!("DATE_FORMAT({expr}, '%Y-%m-%d %H:%i:%s')"),
        }
    }
}
