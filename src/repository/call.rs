use super::{Entity, Pageable, Sort};
use crate::core::{RepoError, Result, Row, Value};

/// One argument of a repository call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Values(Vec<Value>),
    Entity(Row),
    Entities(Vec<Row>),
    Page(Pageable),
    Sort(Sort),
}

impl Arg {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Values(_) => "value list",
            Self::Entity(_) => "entity",
            Self::Entities(_) => "entity list",
            Self::Page(_) => "page request",
            Self::Sort(_) => "sort",
        }
    }
}

macro_rules! value_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Value(Value::from(value))
                }
            }
        )*
    };
}

value_arg!(i64, i32, f64, bool, String, &str);

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Vec<Value>> for Arg {
    fn from(values: Vec<Value>) -> Self {
        Arg::Values(values)
    }
}

impl From<Row> for Arg {
    fn from(row: Row) -> Self {
        Arg::Entity(row)
    }
}

impl From<Vec<Row>> for Arg {
    fn from(rows: Vec<Row>) -> Self {
        Arg::Entities(rows)
    }
}

impl From<Pageable> for Arg {
    fn from(page: Pageable) -> Self {
        Arg::Page(page)
    }
}

impl From<Sort> for Arg {
    fn from(sort: Sort) -> Self {
        Arg::Sort(sort)
    }
}

/// Builds a `Vec<Arg>` from anything convertible into [`Arg`].
///
/// ```ignore
/// dispatcher.resolve(&mut ctx, "UserRepository", "findByNameAndStatus", args!["Bob", "ACTIVE"])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::repository::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::repository::Arg::from($arg)),+]
    };
}

/// Result of a repository call, shaped by the method's return type.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Unit,
    Count(u64),
    Bool(bool),
    Row(Row),
    Optional(Option<Row>),
    Rows(Vec<Row>),
}

impl Resolved {
    fn mismatch(&self, expected: &str) -> RepoError {
        RepoError::TypeMismatch(format!("Expected {}, got {:?}", expected, self))
    }

    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            Self::Optional(row) => Ok(row.into_iter().collect()),
            Self::Row(row) => Ok(vec![row]),
            other => Err(other.mismatch("rows")),
        }
    }

    pub fn into_optional(self) -> Result<Option<Row>> {
        match self {
            Self::Optional(row) => Ok(row),
            Self::Row(row) => Ok(Some(row)),
            Self::Rows(rows) => Ok(rows.into_iter().next()),
            other => Err(other.mismatch("an optional row")),
        }
    }

    pub fn into_row(self) -> Result<Row> {
        match self {
            Self::Row(row) | Self::Optional(Some(row)) => Ok(row),
            other => Err(other.mismatch("a row")),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(other.mismatch("a count")),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(flag) => Ok(flag),
            other => Err(other.mismatch("a boolean")),
        }
    }

    pub fn into_entity<E: Entity>(self) -> Result<E> {
        E::from_row(self.into_row()?)
    }

    pub fn into_optional_entity<E: Entity>(self) -> Result<Option<E>> {
        self.into_optional()?.map(E::from_row).transpose()
    }

    pub fn into_entities<E: Entity>(self) -> Result<Vec<E>> {
        self.into_rows()?.into_iter().map(E::from_row).collect()
    }
}
