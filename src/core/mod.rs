pub mod error;
pub mod types;
pub mod value;

pub use error::{Failure, RepoError, Result, kind_matches};
pub use types::{Column, Row, TableSchema};
pub use value::{DataType, Value};
