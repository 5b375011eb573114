use std::fmt;

use serde::{Deserialize, Serialize};

/// What a derived query does with the rows it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Select,
    Count,
    /// Count coerced to a boolean (`> 0`).
    Exists,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "select",
            Self::Count => "count",
            Self::Exists => "exists",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `LIKE %value%`
    Contains,
    /// `LIKE value%`
    StartsWith,
    /// `LIKE %value`
    EndsWith,
    /// `LIKE value`, pattern passed through as given.
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Number of bound values the operator consumes.
    pub fn arity(&self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            _ => 1,
        }
    }

    /// Operators whose bound value is wrapped in `%` at binding time.
    pub fn wraps_value(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }

    /// Operators that may carry the `IgnoreCase` modifier.
    pub fn supports_ignore_case(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::NotEq
                | Self::Contains
                | Self::StartsWith
                | Self::EndsWith
                | Self::Like
                | Self::NotLike
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One predicate over a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub property: String,
    pub operator: Operator,
    pub ignore_case: bool,
    /// 0-based index into the method's value arguments; `None` when the
    /// operator consumes nothing.
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
        }
    }
}

/// Typed result of parsing a repository method name.
///
/// Descriptors are immutable once derived and shared freely between
/// threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub entity: String,
    pub operation: Operation,
    pub clauses: Vec<Clause>,
    pub combinator: Combinator,
    pub ordering: Option<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryDescriptor {
    pub fn new(entity: impl Into<String>, operation: Operation) -> Self {
        Self {
            entity: entity.into(),
            operation,
            clauses: Vec::new(),
            combinator: Combinator::And,
            ordering: None,
            limit: None,
            offset: None,
        }
    }

    /// Number of value arguments the query expects.
    pub fn parameter_count(&self) -> usize {
        self.clauses.iter().map(|clause| clause.operator.arity()).sum()
    }

    pub fn is_write(&self) -> bool {
        self.operation == Operation::Delete
    }
}
