// ============================================================================
// RustRepo Library
// ============================================================================
//
// Declarative transactions and derived repository queries over a pluggable
// session layer, with an in-memory store as the reference backend.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod intercept;
pub mod prelude;
pub mod query;
pub mod repository;
pub mod session;
pub mod storage;
pub mod transaction;

pub use config::RuntimeConfig;
pub use crate::core::{DataType, Failure, RepoError, Result, Row, TableSchema, Value};
pub use intercept::{
    ProxyError, ProxyFactory, TransactionMetadata, Transactional, TransactionalProxy,
};
pub use repository::{
    Arg, Entity, MethodSignature, Pageable, Repository, RepositoryDefinition,
    RepositoryDispatcher, Resolved, ReturnShape, Sort,
};
pub use session::{IsolationLevel, Params, QueryOutcome, Session, SessionFactory};
pub use storage::{DatabaseStats, MemoryDatabase};
pub use transaction::{
    Isolation, Propagation, TransactionContext, TransactionDescriptor, TransactionManager,
};

use std::sync::Arc;

use tracing::info;

/// Composition root: one store, its transaction manager and every bound
/// repository.
///
/// # Examples
///
/// ```
/// use rustrepo::{DataType, MethodSignature, RepositoryDefinition, ReturnShape, Runtime,
///                RuntimeConfig, TableSchema, args};
///
/// # fn main() -> rustrepo::Result<()> {
/// let runtime = Runtime::builder(RuntimeConfig::default())
///     .table(TableSchema::new("users", "id").required("name", DataType::Text))
///     .repository(
///         RepositoryDefinition::new("UserRepository", "users")
///             .method(MethodSignature::new("countByName", ReturnShape::Count).positional()),
///     )
///     .build()?;
///
/// let mut ctx = runtime.new_context();
/// let dispatcher = runtime.dispatcher();
/// let mut bob = rustrepo::Row::new();
/// bob.insert("name".into(), "Bob".into());
/// dispatcher.resolve(&mut ctx, "UserRepository", "save", args![bob])?;
/// let count = dispatcher
///     .resolve(&mut ctx, "UserRepository", "countByName", args!["Bob"])?
///     .into_count()?;
/// assert_eq!(count, 1);
/// # Ok(())
/// # }
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    database: MemoryDatabase,
    manager: Arc<TransactionManager>,
    dispatcher: Arc<RepositoryDispatcher>,
    proxy_factory: ProxyFactory,
}

impl Runtime {
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            tables: Vec::new(),
            repositories: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<RepositoryDispatcher> {
        &self.dispatcher
    }

    pub fn proxy_factory(&self) -> &ProxyFactory {
        &self.proxy_factory
    }

    /// Typed handle on the repository bound as `interface`.
    pub fn repository<E: Entity>(&self, interface: &str) -> Result<Repository<E>> {
        let binding = self.dispatcher.binding(interface).ok_or_else(|| {
            RepoError::Configuration(format!("Repository {} is not registered", interface))
        })?;
        if binding.entity() != E::TABLE {
            return Err(RepoError::Configuration(format!(
                "Repository {} serves '{}', not '{}'",
                interface,
                binding.entity(),
                E::TABLE
            )));
        }
        Ok(Repository::new(interface, Arc::clone(&self.dispatcher)))
    }

    /// A fresh context for one logical call chain.
    pub fn new_context(&self) -> TransactionContext {
        TransactionContext::new()
    }
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    tables: Vec<TableSchema>,
    repositories: Vec<RepositoryDefinition>,
}

impl RuntimeBuilder {
    pub fn table(mut self, schema: TableSchema) -> Self {
        self.tables.push(schema);
        self
    }

    pub fn entity<E: Entity>(self) -> Self {
        self.table(E::schema())
    }

    pub fn repository(mut self, definition: RepositoryDefinition) -> Self {
        self.repositories.push(definition);
        self
    }

    /// Creates the store and binds every repository. Derivation errors and
    /// configuration errors surface here, before any call is made.
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        let database = MemoryDatabase::with_config(&self.config);
        let table_count = self.tables.len();
        for schema in self.tables {
            database.create_table(schema)?;
        }

        let manager = Arc::new(TransactionManager::new(Arc::new(database.clone())));
        let mut dispatcher = RepositoryDispatcher::new(Arc::clone(&manager));
        let repository_count = self.repositories.len();
        for definition in self.repositories {
            let schema = database.schema(&definition.entity).map_err(|_| {
                RepoError::Configuration(format!(
                    "Repository {} refers to unknown table '{}'",
                    definition.interface, definition.entity
                ))
            })?;
            dispatcher.bind(definition, schema)?;
        }

        info!(
            database = database.name(),
            tables = table_count,
            repositories = repository_count,
            "runtime started"
        );
        Ok(Runtime {
            config: self.config,
            database,
            proxy_factory: ProxyFactory::new(Arc::clone(&manager)),
            manager,
            dispatcher: Arc::new(dispatcher),
        })
    }
}
