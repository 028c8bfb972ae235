// Engine error types
//
// Every failure is tagged with a kind so the runner can decide between
// aborting the run (Config, store-level Connection) and isolating the
// failure to a single leaf (Compile, Connection, Query).

use thiserror::Error;

/// Classification of an engine failure, mirrored in run summaries and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration document; surfaced at load time, aborts the run.
    Config,
    /// A composer invariant was violated for one leaf; other leaves proceed.
    Compile,
    /// Pool init or authentication failure for a source or the store.
    Connection,
    /// The source returned an error or an unexpected result shape.
    Query,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Compile => "compile",
            ErrorKind::Connection => "connection",
            ErrorKind::Query => "query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WeiserError {
    #[error("config error: {0}")]
    Config(String),

    #[error("compile error for check '{check}': {message}")]
    Compile { check: String, message: String },

    #[error("connection error for '{target}': {message}")]
    Connection { target: String, message: String },

    #[error("query error on '{datasource}': {message} (sql: {sql})")]
    Query {
        datasource: String,
        message: String,
        sql: String,
    },
}

impl WeiserError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn compile(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile { check: check.into(), message: message.into() }
    }

    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection { target: target.into(), message: message.into() }
    }

    pub fn query(
        datasource: impl Into<String>,
        message: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self::Query {
            datasource: datasource.into(),
            message: message.into(),
            sql: sql.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WeiserError::Config(_) => ErrorKind::Config,
            WeiserError::Compile { .. } => ErrorKind::Compile,
            WeiserError::Connection { .. } => ErrorKind::Connection,
            WeiserError::Query { .. } => ErrorKind::Query,
        }
    }
}

pub type WeiserResult<T> = Result<T, WeiserError>;
