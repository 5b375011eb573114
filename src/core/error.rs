use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Illegal transaction state: {0}")]
    IllegalTransactionState(String),

    #[error("Transaction timed out after {0} second(s)")]
    Timeout(u32),

    #[error("Write attempted in a read-only transaction: {0}")]
    ReadOnly(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Cannot derive query for {interface}.{method}: {reason}")]
    Derivation {
        interface: String,
        method: String,
        reason: String,
    },

    #[error("Unsupported repository method {interface}.{method}")]
    UnsupportedMethod { interface: String, method: String },

    #[error("Invalid arguments for '{method}': {reason}")]
    InvalidArguments { method: String, reason: String },

    #[error("{entity} with id {id} not found")]
    EntityNotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    IoError(String),

    /// A failure raised by application code running inside a unit of work.
    #[error("{kind}: {message}")]
    Application {
        kind: String,
        message: String,
        recoverable: bool,
    },
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl<T> From<std::sync::PoisonError<T>> for RepoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl RepoError {
    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            kind: kind.into(),
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn recoverable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            kind: kind.into(),
            message: message.into(),
            recoverable: true,
        }
    }
}

// ============================================================================
// Failure classification
// ============================================================================

/// Classification used by rollback rules.
///
/// Kinds are dotted names (`persistence.timeout`, `billing.card_declined`).
/// A rule naming `billing` matches `billing` and every kind below it.
pub trait Failure {
    fn kind(&self) -> &str;

    /// Recoverable-by-contract failures do not roll back under the default policy.
    fn is_recoverable(&self) -> bool {
        false
    }
}

/// True when `rule` names `kind` itself or one of its ancestors.
pub fn kind_matches(rule: &str, kind: &str) -> bool {
    match kind.strip_prefix(rule) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

impl Failure for RepoError {
    fn kind(&self) -> &str {
        match self {
            Self::ParseError(_) => "persistence.parse",
            Self::TableNotFound(_) => "persistence.table_not_found",
            Self::TypeMismatch(_) => "persistence.type_mismatch",
            Self::ConstraintViolation(_) => "persistence.constraint",
            Self::ExecutionError(_) => "persistence.execution",
            Self::UnsupportedOperation(_) => "persistence.unsupported",
            Self::LockError(_) => "persistence.lock",
            Self::WriteConflict(_) => "persistence.conflict",
            Self::Timeout(_) => "persistence.timeout",
            Self::ReadOnly(_) => "persistence.read_only",
            Self::Session(_) => "persistence.session",
            Self::IoError(_) => "persistence.io",
            Self::Serialization(_) => "serialization",
            Self::Configuration(_) => "configuration",
            Self::IllegalTransactionState(_) => "transaction.illegal_state",
            Self::Derivation { .. } => "repository.derivation",
            Self::UnsupportedMethod { .. } => "repository.unsupported_method",
            Self::InvalidArguments { .. } => "repository.invalid_arguments",
            Self::EntityNotFound { .. } => "repository.entity_not_found",
            Self::Application { kind, .. } => kind,
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Application { recoverable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_descendants_only_on_segment_boundary() {
        assert!(kind_matches("billing", "billing"));
        assert!(kind_matches("billing", "billing.card_declined"));
        assert!(!kind_matches("billing", "billingx"));
        assert!(!kind_matches("billing.card", "billing"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(RepoError::Timeout(3).kind(), "persistence.timeout");
        let err = RepoError::recoverable("billing.declined", "card declined");
        assert_eq!(err.kind(), "billing.declined");
        assert!(err.is_recoverable());
        assert!(!RepoError::application("x", "y").is_recoverable());
    }

    #[test]
    fn test_display_names_interface_and_method() {
        let err = RepoError::UnsupportedMethod {
            interface: "UserRepository".into(),
            method: "frobnicate".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported repository method UserRepository.frobnicate"
        );
    }
}
