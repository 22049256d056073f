use rust_decimal::Decimal;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure taxonomy of the trade engine. The first four are user-visible and
/// carry stable codes; `Conflict` is retriable at the caller; `Internal`
/// always aborts the enclosing transaction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("{0}")]
  Validation(String),
  #[error("insufficient funds: required {required}, available {available}")]
  InsufficientFunds {
    required: Decimal,
    available: Decimal,
  },
  #[error("{0}")]
  NotFound(String),
  #[error("conflict: {0}")]
  Conflict(String),
  #[error("oracle: {0}")]
  Oracle(String),
  #[error("internal: {0}")]
  Internal(String),
}

impl EngineError {
  pub fn validation(msg: impl Into<String>) -> Self {
    EngineError::Validation(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    EngineError::NotFound(msg.into())
  }

  /// Stable machine-parseable code surfaced to API collaborators.
  pub fn code(&self) -> &'static str {
    match self {
      EngineError::Validation(_) => "validation",
      EngineError::InsufficientFunds { .. } => "insufficient_funds",
      EngineError::NotFound(_) => "not_found",
      EngineError::Conflict(_) => "conflict",
      EngineError::Oracle(_) => "oracle",
      EngineError::Internal(_) => "internal",
    }
  }

  pub fn is_retriable(&self) -> bool {
    matches!(self, EngineError::Conflict(_))
  }
}

impl From<sqlx::Error> for EngineError {
  fn from(e: sqlx::Error) -> Self {
    if let sqlx::Error::Database(db) = &e {
      // serialization_failure / deadlock_detected
      if let Some(code) = db.code() {
        if code == "40001" || code == "40P01" {
          return EngineError::Conflict(db.message().to_string());
        }
      }
    }
    EngineError::Internal(e.to_string())
  }
}
