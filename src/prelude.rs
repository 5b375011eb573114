//! Common imports for application code.
//!
//! ```
//! use rustrepo::prelude::*;
//! ```

pub use crate::args;
pub use crate::core::{DataType, Failure, RepoError, Result, Row, TableSchema, Value};
pub use crate::intercept::{
    ProxyError, ProxyFactory, TransactionMetadata, Transactional, TransactionalProxy,
};
pub use crate::repository::{
    Arg, Entity, MethodSignature, Pageable, Repository, RepositoryDefinition, Resolved,
    ReturnShape, Sort,
};
pub use crate::transaction::{
    Isolation, Propagation, TransactionContext, TransactionDescriptor, TransactionManager,
};
pub use crate::{Runtime, RuntimeConfig};
