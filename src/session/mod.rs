// ============================================================================
// Session contract
// ============================================================================
//
// A session is one bound persistence scope: it begins, commits and rolls back
// a physical transaction and runs parameterized statements. The transaction
// manager only talks to sessions through these traits, so any backend that can
// honour them can sit underneath the runtime.
//
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{RepoError, Result, Row, Value};

/// Isolation levels a backend can apply to a physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Whether reads inside a transaction come from a snapshot fixed at first read.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Statement parameters, bound by 1-based position (`$1`) or by name (`:name`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.positional.push(value.into());
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.named.insert(name.into(), value.into());
    }

    pub fn get_positional(&self, position: usize) -> Result<&Value> {
        position
            .checked_sub(1)
            .and_then(|idx| self.positional.get(idx))
            .ok_or_else(|| {
                RepoError::ExecutionError(format!("No value bound for parameter ${}", position))
            })
    }

    pub fn get_named(&self, name: &str) -> Result<&Value> {
        self.named.get(name).ok_or_else(|| {
            RepoError::ExecutionError(format!("No value bound for parameter :{}", name))
        })
    }

    pub fn positional_values(&self) -> &[Value] {
        &self.positional
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// What a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Scalar(Value),
    Updated {
        count: u64,
        generated_key: Option<i64>,
    },
}

impl QueryOutcome {
    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            other => Err(RepoError::ExecutionError(format!(
                "Expected a row set, got {:?}",
                other
            ))),
        }
    }

    /// Reads an aggregate either as a scalar or as the single column of the first row.
    pub fn into_count(self) -> Result<u64> {
        let value = match self {
            Self::Scalar(value) => value,
            Self::Updated { count, .. } => return Ok(count),
            Self::Rows(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.into_values().next())
                .unwrap_or(Value::Integer(0)),
        };
        value
            .as_i64()
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| RepoError::TypeMismatch(format!("Expected a count, got {}", value)))
    }

    pub fn update_count(&self) -> u64 {
        match self {
            Self::Updated { count, .. } => *count,
            Self::Rows(rows) => rows.len() as u64,
            Self::Scalar(_) => 0,
        }
    }

    pub fn generated_key(&self) -> Option<i64> {
        match self {
            Self::Updated { generated_key, .. } => *generated_key,
            _ => None,
        }
    }
}

/// One physical persistence scope.
///
/// State transitions:
/// ```text
/// Open ──begin──> InTransaction ──commit/rollback──> Open ──close──> Closed
/// ```
/// Closing a session that is still in a transaction rolls it back.
pub trait Session: Send {
    fn id(&self) -> u64;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// True while a physical transaction is open on this session.
    fn is_active(&self) -> bool;

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<()>;

    /// Arms a deadline for the current transaction; 0 clears it.
    fn set_timeout(&mut self, seconds: u32) -> Result<()>;

    fn set_read_only(&mut self, read_only: bool) -> Result<()>;

    fn execute(
        &mut self,
        query: &str,
        params: &Params,
        first_result: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<QueryOutcome>;

    /// Pushes statements buffered by the session to the store. Sessions that
    /// run every statement as it arrives have nothing to push.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Opens sessions bound to one physical store.
pub trait SessionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn Session>>;

    fn supports_isolation(&self, level: IsolationLevel) -> bool;
}
