pub mod pattern;
pub mod session;
pub mod sql;
pub mod table;

pub use pattern::{PatternCache, escape_like};
pub use session::MemorySession;
pub use table::{Catalog, Change, Table, WriteSet};

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::core::{RepoError, Result, TableSchema};
use crate::session::{IsolationLevel, Session, SessionFactory};
use sql::Statement;

/// Counters of physical session activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn began(&self) {
        self.begins.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn committed(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn rolled_back(&self) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> DatabaseStats {
        DatabaseStats {
            sessions_opened: self.sessions_opened.load(Ordering::SeqCst),
            sessions_closed: self.sessions_closed.load(Ordering::SeqCst),
            begins: self.begins.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
            rollbacks: self.rollbacks.load(Ordering::SeqCst),
        }
    }
}

pub(crate) struct DatabaseInner {
    pub(crate) name: String,
    pub(crate) catalog: RwLock<Arc<Catalog>>,
    sequences: Mutex<HashMap<String, i64>>,
    statements: Mutex<LruCache<String, Arc<Statement>>>,
    pub(crate) patterns: PatternCache,
    pub(crate) default_isolation: IsolationLevel,
    supported_isolation: Vec<IsolationLevel>,
    next_session_id: AtomicU64,
    pub(crate) stats: StatsCounters,
}

impl DatabaseInner {
    /// Parses `sql`, reusing a cached statement when possible.
    pub(crate) fn prepare(&self, sql: &str) -> Result<Arc<Statement>> {
        if let Some(statement) = self.statements.lock()?.get(sql) {
            return Ok(Arc::clone(statement));
        }
        let statement = Arc::new(sql::parse(sql)?);
        self.statements
            .lock()?
            .put(sql.to_string(), Arc::clone(&statement));
        Ok(statement)
    }

    pub(crate) fn current_catalog(&self) -> Result<Arc<Catalog>> {
        Ok(Arc::clone(&*self.catalog.read()?))
    }

    /// Next identity for `table`; never reused, even after rollback.
    pub(crate) fn allocate_id(&self, table: &str) -> Result<i64> {
        let mut sequences = self.sequences.lock()?;
        let next = sequences
            .get_mut(table)
            .ok_or_else(|| RepoError::TableNotFound(table.to_string()))?;
        *next += 1;
        Ok(*next)
    }

    /// Keeps the sequence ahead of explicitly supplied identities.
    pub(crate) fn observe_id(&self, table: &str, id: i64) -> Result<()> {
        let mut sequences = self.sequences.lock()?;
        if let Some(next) = sequences.get_mut(table) {
            *next = (*next).max(id);
        }
        Ok(())
    }

    pub(crate) fn supports(&self, level: IsolationLevel) -> bool {
        self.supported_isolation.contains(&level)
    }
}

/// In-memory store handing out [`MemorySession`]s.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        let statement_capacity =
            NonZeroUsize::new(config.statement_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(DatabaseInner {
                name: config.database.clone(),
                catalog: RwLock::new(Arc::new(Catalog::default())),
                sequences: Mutex::new(HashMap::new()),
                statements: Mutex::new(LruCache::new(statement_capacity)),
                patterns: PatternCache::new(config.pattern_cache_capacity),
                default_isolation: config.default_isolation,
                supported_isolation: config.supported_isolation.clone(),
                next_session_id: AtomicU64::new(1),
                stats: StatsCounters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        let mut catalog = self.inner.catalog.write()?;
        Arc::make_mut(&mut *catalog).create_table(schema)?;
        self.inner.sequences.lock()?.insert(name.clone(), 0);
        debug!(database = %self.inner.name, table = %name, "table created");
        Ok(())
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.current_catalog()?.table_names())
    }

    pub fn schema(&self, table: &str) -> Result<TableSchema> {
        Ok(self.inner.current_catalog()?.get_table(table)?.schema().clone())
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.inner.current_catalog()?.get_table(table)?.len())
    }

    pub fn stats(&self) -> DatabaseStats {
        self.inner.stats.snapshot()
    }

    pub fn cached_statements(&self) -> usize {
        self.inner
            .statements
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    pub fn open_session(&self) -> Result<MemorySession> {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.inner.stats.session_opened();
        debug!(database = %self.inner.name, session = id, "session opened");
        Ok(MemorySession::new(id, Arc::clone(&self.inner)))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for MemoryDatabase {
    fn open(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.open_session()?))
    }

    fn supports_isolation(&self, level: IsolationLevel) -> bool {
        self.inner.supports(level)
    }
}
