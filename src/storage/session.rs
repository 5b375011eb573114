// ============================================================================
// Memory session
// ============================================================================
//
// Writes made inside a transaction are buffered in a private write set and
// published atomically at commit. Reads see that write set laid over either
// the latest committed catalog (READ COMMITTED) or a snapshot fixed at the
// first read of the transaction (REPEATABLE READ, SERIALIZABLE). Under the
// snapshot levels a commit fails if another transaction committed a change to
// a row this one updates or deletes. Statements run outside a transaction
// commit on their own.
//
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::DatabaseInner;
use super::sql::{
    DeleteStmt, EvalContext, InsertStmt, Projection, SelectStmt, Statement, UpdateStmt,
    lookup_column, sort_rows,
};
use super::table::{Catalog, WriteSet};
use crate::core::{RepoError, Result, Row, Value};
use crate::session::{IsolationLevel, Params, QueryOutcome, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    InTransaction,
    Closed,
}

enum PlannedChange {
    Insert(i64, Row),
    Update(i64, Row),
    Delete(i64),
}

pub struct MemorySession {
    id: u64,
    db: Arc<DatabaseInner>,
    state: SessionState,
    isolation: IsolationLevel,
    read_only: bool,
    timeout: u32,
    deadline: Option<Instant>,
    snapshot: Option<Arc<Catalog>>,
    writes: WriteSet,
}

impl MemorySession {
    pub(crate) fn new(id: u64, db: Arc<DatabaseInner>) -> Self {
        let isolation = db.default_isolation;
        Self {
            id,
            db,
            state: SessionState::Open,
            isolation,
            read_only: false,
            timeout: 0,
            deadline: None,
            snapshot: None,
            writes: WriteSet::new(),
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(RepoError::Session(format!("Session {} is closed", self.id)));
        }
        Ok(())
    }

    fn ensure_in_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state != SessionState::InTransaction {
            return Err(RepoError::Session(format!(
                "No active transaction on session {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Resets per-transaction settings once the transaction ends.
    fn end_transaction(&mut self) {
        self.state = SessionState::Open;
        self.writes.clear();
        self.snapshot = None;
        self.isolation = self.db.default_isolation;
        self.read_only = false;
        self.timeout = 0;
        self.deadline = None;
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(RepoError::Timeout(self.timeout));
        }
        Ok(())
    }

    fn base_catalog(&mut self) -> Result<Arc<Catalog>> {
        if self.state == SessionState::InTransaction && self.isolation.uses_snapshot() {
            if let Some(snapshot) = &self.snapshot {
                return Ok(Arc::clone(snapshot));
            }
            let snapshot = self.db.current_catalog()?;
            self.snapshot = Some(Arc::clone(&snapshot));
            return Ok(snapshot);
        }
        self.db.current_catalog()
    }

    fn visible_rows(&mut self, table: &str) -> Result<Vec<(i64, Row)>> {
        let catalog = self.base_catalog()?;
        let table = catalog.get_table(table)?;
        Ok(table.merged(self.writes.changes(table.schema().name())))
    }

    fn filtered_rows(
        &mut self,
        table: &str,
        filter: Option<&super::sql::Predicate>,
        params: &Params,
    ) -> Result<Vec<(i64, Row)>> {
        let rows = self.visible_rows(table)?;
        let ctx = EvalContext {
            params,
            patterns: &self.db.patterns,
        };
        let mut matched = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            let keep = match filter {
                Some(predicate) => predicate.matches(&row, &ctx)?,
                None => true,
            };
            if keep {
                matched.push((id, row));
            }
        }
        Ok(matched)
    }

    fn run_select(
        &mut self,
        select: &SelectStmt,
        params: &Params,
        first_result: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<QueryOutcome> {
        let mut rows = self.filtered_rows(&select.table, select.filter.as_ref(), params)?;

        if select.projection == Projection::Count {
            return Ok(QueryOutcome::Scalar(Value::Integer(rows.len() as i64)));
        }

        sort_rows(&mut rows, &select.order_by)?;

        let ctx = EvalContext {
            params,
            patterns: &self.db.patterns,
        };
        let offset = select
            .offset
            .as_ref()
            .map(|o| o.resolve_count(&ctx))
            .transpose()?
            .unwrap_or(0);
        let limit = select
            .limit
            .as_ref()
            .map(|l| l.resolve_count(&ctx))
            .transpose()?;

        let windowed = rows
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .skip(first_result.unwrap_or(0))
            .take(max_results.unwrap_or(usize::MAX));

        let mut result = Vec::new();
        for (_, row) in windowed {
            let projected = match &select.projection {
                Projection::Columns(columns) => {
                    let mut out = Row::new();
                    for (source, output) in columns {
                        out.insert(output.clone(), lookup_column(&row, source)?.clone());
                    }
                    out
                }
                _ => row,
            };
            result.push(projected);
        }
        Ok(QueryOutcome::Rows(result))
    }

    fn plan_insert(
        &mut self,
        insert: &InsertStmt,
        params: &Params,
    ) -> Result<(Vec<PlannedChange>, Option<i64>)> {
        let catalog = self.base_catalog()?;
        let schema = catalog.get_table(&insert.table)?.schema().clone();
        let mut existing: HashSet<i64> = self
            .visible_rows(&insert.table)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let columns: Vec<String> = if insert.columns.is_empty() {
            schema.columns().iter().map(|c| c.name.clone()).collect()
        } else {
            insert.columns.clone()
        };

        let ctx = EvalContext {
            params,
            patterns: &self.db.patterns,
        };
        let mut planned = Vec::with_capacity(insert.rows.len());
        let mut last_key = None;

        for values in &insert.rows {
            if values.len() != columns.len() {
                return Err(RepoError::ExecutionError(format!(
                    "INSERT has {} columns but {} values",
                    columns.len(),
                    values.len()
                )));
            }
            let mut row = Row::new();
            for (column, operand) in columns.iter().zip(values) {
                row.insert(column.clone(), operand.resolve(None, &ctx)?);
            }

            let id = match row.get(schema.id_column()) {
                None | Some(Value::Null) => self.db.allocate_id(&insert.table)?,
                Some(Value::Integer(id)) => {
                    self.db.observe_id(&insert.table, *id)?;
                    *id
                }
                Some(other) => {
                    return Err(RepoError::TypeMismatch(format!(
                        "Identity column '{}' expects INTEGER, got {}",
                        schema.id_column(),
                        other.type_name()
                    )));
                }
            };
            if !existing.insert(id) {
                return Err(RepoError::ConstraintViolation(format!(
                    "Duplicate key {} = {} in table '{}'",
                    schema.id_column(),
                    id,
                    insert.table
                )));
            }
            row.insert(schema.id_column().to_string(), Value::Integer(id));
            planned.push(PlannedChange::Insert(id, schema.normalize(row)?));
            last_key = Some(id);
        }
        Ok((planned, last_key))
    }

    fn plan_update(&mut self, update: &UpdateStmt, params: &Params) -> Result<Vec<PlannedChange>> {
        let catalog = self.base_catalog()?;
        let schema = catalog.get_table(&update.table)?.schema().clone();
        for (column, _) in &update.assignments {
            if schema.get_column(column).is_none() {
                return Err(RepoError::ExecutionError(format!(
                    "Column '{}' not found in table '{}'",
                    column, update.table
                )));
            }
        }

        let matched = self.filtered_rows(&update.table, update.filter.as_ref(), params)?;
        let ctx = EvalContext {
            params,
            patterns: &self.db.patterns,
        };
        let mut planned = Vec::with_capacity(matched.len());
        for (id, row) in matched {
            let mut updated = row.clone();
            for (column, operand) in &update.assignments {
                updated.insert(column.clone(), operand.resolve(Some(&row), &ctx)?);
            }
            if updated.get(schema.id_column()) != Some(&Value::Integer(id)) {
                return Err(RepoError::UnsupportedOperation(format!(
                    "Identity column '{}' cannot be changed",
                    schema.id_column()
                )));
            }
            planned.push(PlannedChange::Update(id, schema.normalize(updated)?));
        }
        Ok(planned)
    }

    fn plan_delete(&mut self, delete: &DeleteStmt, params: &Params) -> Result<Vec<PlannedChange>> {
        Ok(self
            .filtered_rows(&delete.table, delete.filter.as_ref(), params)?
            .into_iter()
            .map(|(id, _)| PlannedChange::Delete(id))
            .collect())
    }

    /// Buffers changes inside a transaction, or commits them at once outside one.
    fn record(&mut self, table: &str, planned: Vec<PlannedChange>) -> Result<u64> {
        let count = planned.len() as u64;
        let mut autocommit = WriteSet::new();
        let target = if self.state == SessionState::InTransaction {
            &mut self.writes
        } else {
            &mut autocommit
        };
        for change in planned {
            match change {
                PlannedChange::Insert(id, row) => target.record_insert(table, id, row),
                PlannedChange::Update(id, row) => target.record_update(table, id, row),
                PlannedChange::Delete(id) => target.record_delete(table, id),
            }
        }
        if !autocommit.is_empty() {
            self.publish(&autocommit, None)?;
        }
        Ok(count)
    }

    /// Applies `writes` to the committed catalog. With a `snapshot`, rows
    /// changed by other commits since it was taken fail the whole set.
    fn publish(&self, writes: &WriteSet, snapshot: Option<&Catalog>) -> Result<()> {
        let mut catalog = self.db.catalog.write()?;
        if let Some(snapshot) = snapshot {
            catalog.check_conflicts(snapshot, writes)?;
        }
        Arc::make_mut(&mut *catalog).apply(writes)
    }
}

impl Session for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::InTransaction {
            return Err(RepoError::Session(format!(
                "Transaction already active on session {}",
                self.id
            )));
        }
        self.state = SessionState::InTransaction;
        self.writes.clear();
        self.snapshot = None;
        self.db.stats.began();
        debug!(session = self.id, "begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_in_transaction()?;
        let writes = std::mem::take(&mut self.writes);
        let snapshot = self
            .snapshot
            .take()
            .filter(|_| self.isolation.uses_snapshot());
        let published = if writes.is_empty() {
            Ok(())
        } else {
            self.publish(&writes, snapshot.as_deref())
        };
        self.end_transaction();
        match published {
            Ok(()) => {
                self.db.stats.committed();
                debug!(session = self.id, "commit");
                Ok(())
            }
            Err(err) => {
                self.db.stats.rolled_back();
                warn!(session = self.id, error = %err, "commit failed, changes discarded");
                Err(err)
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_in_transaction()?;
        self.end_transaction();
        self.db.stats.rolled_back();
        debug!(session = self.id, "rollback");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        if !self.db.supports(level) {
            return Err(RepoError::Configuration(format!(
                "Isolation level {} is not supported by database '{}'",
                level, self.db.name
            )));
        }
        self.isolation = level;
        Ok(())
    }

    fn set_timeout(&mut self, seconds: u32) -> Result<()> {
        self.ensure_open()?;
        self.timeout = seconds;
        self.deadline = if seconds == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(u64::from(seconds)))
        };
        Ok(())
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.ensure_open()?;
        self.read_only = read_only;
        Ok(())
    }

    fn execute(
        &mut self,
        query: &str,
        params: &Params,
        first_result: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<QueryOutcome> {
        self.ensure_open()?;
        self.check_deadline()?;

        let statement = self.db.prepare(query)?;
        if statement.is_write() && self.read_only {
            return Err(RepoError::ReadOnly(query.to_string()));
        }
        debug!(session = self.id, sql = query, "execute");

        match &*statement {
            Statement::Select(select) => self.run_select(select, params, first_result, max_results),
            Statement::Insert(insert) => {
                let (planned, generated_key) = self.plan_insert(insert, params)?;
                let count = self.record(&insert.table, planned)?;
                Ok(QueryOutcome::Updated {
                    count,
                    generated_key,
                })
            }
            Statement::Update(update) => {
                let planned = self.plan_update(update, params)?;
                let count = self.record(&update.table, planned)?;
                Ok(QueryOutcome::Updated {
                    count,
                    generated_key: None,
                })
            }
            Statement::Delete(delete) => {
                let planned = self.plan_delete(delete, params)?;
                let count = self.record(&delete.table, planned)?;
                Ok(QueryOutcome::Updated {
                    count,
                    generated_key: None,
                })
            }
        }
    }

    /// Statements already run against the write set; this only surfaces a
    /// closed session or an expired deadline.
    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.check_deadline()?;
        debug!(session = self.id, pending = !self.writes.is_empty(), "flush");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state == SessionState::InTransaction {
            self.rollback()?;
        }
        self.state = SessionState::Closed;
        self.db.stats.session_closed();
        debug!(session = self.id, "session closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
