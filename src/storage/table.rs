use std::collections::BTreeMap;

use crate::core::{RepoError, Result, Row, TableSchema};

/// Committed rows of one table, keyed by identity.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn contains(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_id(&self) -> i64 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    /// Rows with pending `changes` laid over them, in identity order.
    pub fn merged(&self, changes: Option<&BTreeMap<i64, Change>>) -> Vec<(i64, Row)> {
        let Some(changes) = changes else {
            return self.rows.iter().map(|(id, row)| (*id, row.clone())).collect();
        };

        let mut view: BTreeMap<i64, Row> = self.rows.clone();
        for (id, change) in changes {
            match change {
                Change::Insert { row } | Change::Update { row } => {
                    view.insert(*id, row.clone());
                }
                Change::Delete => {
                    view.remove(id);
                }
            }
        }
        view.into_iter().collect()
    }

    fn apply(&mut self, id: i64, change: &Change) {
        match change {
            Change::Insert { row } => {
                self.rows.insert(id, row.clone());
            }
            Change::Update { row } => {
                if let Some(existing) = self.rows.get_mut(&id) {
                    *existing = row.clone();
                }
            }
            Change::Delete => {
                self.rows.remove(&id);
            }
        }
    }
}

/// A pending row change recorded by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert { row: Row },
    Update { row: Row },
    Delete,
}

/// Changes made by one transaction, grouped per table and identity.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    tables: BTreeMap<String, BTreeMap<i64, Change>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|changes| changes.is_empty())
    }

    pub fn changes(&self, table: &str) -> Option<&BTreeMap<i64, Change>> {
        self.tables.get(table)
    }

    pub fn record_insert(&mut self, table: &str, id: i64, row: Row) {
        let changes = self.entry(table);
        // Re-inserting a row deleted earlier in the same set replaces the committed row.
        let change = match changes.get(&id) {
            Some(Change::Delete) | Some(Change::Update { .. }) => Change::Update { row },
            _ => Change::Insert { row },
        };
        changes.insert(id, change);
    }

    pub fn record_update(&mut self, table: &str, id: i64, row: Row) {
        let changes = self.entry(table);
        let change = match changes.get(&id) {
            Some(Change::Insert { .. }) => Change::Insert { row },
            _ => Change::Update { row },
        };
        changes.insert(id, change);
    }

    pub fn record_delete(&mut self, table: &str, id: i64) {
        let changes = self.entry(table);
        if let Some(Change::Insert { .. }) = changes.get(&id) {
            changes.remove(&id);
        } else {
            changes.insert(id, Change::Delete);
        }
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    fn entry(&mut self, table: &str) -> &mut BTreeMap<i64, Change> {
        self.tables.entry(table.to_string()).or_default()
    }
}

/// All committed tables.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(RepoError::ExecutionError(format!(
                "Table '{}' already exists",
                name
            )));
        }
        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| RepoError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Fails when a row the write set updates or deletes was changed by
    /// another commit since `snapshot` was taken.
    pub fn check_conflicts(&self, snapshot: &Catalog, writes: &WriteSet) -> Result<()> {
        for (name, changes) in &writes.tables {
            let current = self.get_table(name)?;
            let before = snapshot.get_table(name)?;
            for (id, change) in changes {
                if matches!(change, Change::Insert { .. }) {
                    continue;
                }
                if current.get(*id) != before.get(*id) {
                    return Err(RepoError::WriteConflict(format!(
                        "Row {} = {} in table '{}' was modified by a concurrent transaction",
                        current.schema().id_column(),
                        id,
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies a write set all-or-nothing.
    ///
    /// Inserts whose identity was committed by someone else in the meantime
    /// fail the whole set; updates and deletes of rows that no longer exist
    /// are dropped.
    pub fn apply(&mut self, writes: &WriteSet) -> Result<()> {
        for (name, changes) in &writes.tables {
            let table = self.get_table(name)?;
            for (id, change) in changes {
                if matches!(change, Change::Insert { .. }) && table.contains(*id) {
                    return Err(RepoError::ConstraintViolation(format!(
                        "Duplicate key {} = {} in table '{}'",
                        table.schema().id_column(),
                        id,
                        name
                    )));
                }
            }
        }

        for (name, changes) in &writes.tables {
            if let Some(table) = self.tables.get_mut(name) {
                for (id, change) in changes {
                    table.apply(*id, change);
                }
            }
        }
        Ok(())
    }
}
