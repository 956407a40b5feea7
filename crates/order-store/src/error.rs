use thiserror::Error;

/// Failure categories reported by the store.
///
/// Every kind except [`ErrorKind::Unavailable`] is terminal: repeating the
/// same operation would fail the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested row does not exist.
    NotFound,
    /// A uniqueness constraint rejected the write.
    Duplicate,
    /// A referenced row does not exist, or is still referenced.
    ForeignKeyViolation,
    /// The identifier can never refer to a row.
    InvalidIdentifier,
    /// Required input was missing or empty.
    NilInput,
    /// An update or delete matched nothing.
    NoRowsAffected,
    /// Transport or storage trouble that may clear up on its own.
    Unavailable,
}

impl ErrorKind {
    /// Returns true if retrying cannot help.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorKind::Unavailable)
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::ForeignKeyViolation => "foreign key violation",
            ErrorKind::InvalidIdentifier => "invalid id",
            ErrorKind::NilInput => "nil value",
            ErrorKind::NoRowsAffected => "no rows affected",
            ErrorKind::Unavailable => "storage unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a store operation, tagged with its [`ErrorKind`].
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Creates an error without an underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} does not exist"))
    }

    pub fn invalid_id(id: i64) -> Self {
        Self::new(ErrorKind::InvalidIdentifier, format!("{id} is not a valid id"))
    }

    pub fn nil_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NilInput, message)
    }

    pub fn no_rows_affected(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NoRowsAffected, format!("{what} matched no rows"))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Returns the failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => ErrorKind::Duplicate,
                Some("23503") => ErrorKind::ForeignKeyViolation,
                Some("22P02") => ErrorKind::InvalidIdentifier,
                Some(code) => {
                    tracing::debug!(code, "unclassified database error");
                    ErrorKind::Unavailable
                }
                None => ErrorKind::Unavailable,
            },
            _ => ErrorKind::Unavailable,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::unavailable(format!("migration failed: {err}")).with_source(err)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
