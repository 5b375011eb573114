// ============================================================================
// Generic CRUD
// ============================================================================
//
// Operations every repository has without declaring them. Statements are
// rendered once per table when the repository is bound and executed against
// whatever session the dispatcher hands in.
//
// ============================================================================

use super::{Pageable, Sort};
use crate::core::{RepoError, Result, Row, TableSchema, Value};
use crate::query::column_name;
use crate::session::{Params, Session};
use crate::transaction::Access;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudOp {
    Save,
    SaveAll,
    FindById,
    GetById,
    ExistsById,
    FindAll,
    FindAllById,
    Count,
    Delete,
    DeleteById,
    DeleteAll,
    DeleteAllById,
    Flush,
}

impl CrudOp {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "save" | "saveAndFlush" => Self::Save,
            "saveAll" | "saveAllAndFlush" => Self::SaveAll,
            "findById" => Self::FindById,
            "getById" | "getReferenceById" | "getOne" => Self::GetById,
            "existsById" => Self::ExistsById,
            "findAll" => Self::FindAll,
            "findAllById" => Self::FindAllById,
            "count" => Self::Count,
            "delete" => Self::Delete,
            "deleteById" => Self::DeleteById,
            "deleteAll" | "deleteAllInBatch" => Self::DeleteAll,
            "deleteAllById" | "deleteAllByIdInBatch" => Self::DeleteAllById,
            "flush" => Self::Flush,
            _ => return None,
        };
        Some(op)
    }

    pub fn access(&self) -> Access {
        match self {
            Self::Save
            | Self::SaveAll
            | Self::Delete
            | Self::DeleteById
            | Self::DeleteAll
            | Self::DeleteAllById
            | Self::Flush => Access::Write,
            _ => Access::Read,
        }
    }

    /// The `...AndFlush` variants flush the session after their write.
    pub fn flushes(name: &str) -> bool {
        name.ends_with("AndFlush")
    }
}

#[derive(Debug, Clone)]
struct CrudSql {
    select_by_id: String,
    count_by_id: String,
    select_all: String,
    count_all: String,
    insert: String,
    insert_generated: String,
    update: String,
    delete_by_id: String,
    delete_all: String,
}

/// CRUD bound to one table.
#[derive(Debug, Clone)]
pub struct SimpleRepository {
    schema: TableSchema,
    data_columns: Vec<String>,
    sql: CrudSql,
}

impl SimpleRepository {
    pub fn new(schema: TableSchema) -> Self {
        let table = schema.name();
        let id = schema.id_column();
        let data_columns: Vec<String> = schema
            .columns()
            .iter()
            .filter(|column| column.name != id)
            .map(|column| column.name.clone())
            .collect();

        let placeholders = |from: usize, count: usize| {
            (from..from + count)
                .map(|n| format!("${}", n))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let all_columns = std::iter::once(id.to_string())
            .chain(data_columns.iter().cloned())
            .collect::<Vec<_>>();
        let insert_generated = if data_columns.is_empty() {
            format!("INSERT INTO {} ({}) VALUES (NULL)", table, id)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                data_columns.join(", "),
                placeholders(1, data_columns.len())
            )
        };
        let assignments = data_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| format!("{} = ${}", column, idx + 1))
            .collect::<Vec<_>>();

        let sql = CrudSql {
            select_by_id: format!("SELECT * FROM {} WHERE {} = $1", table, id),
            count_by_id: format!("SELECT COUNT(*) FROM {} WHERE {} = $1", table, id),
            select_all: format!("SELECT * FROM {}", table),
            count_all: format!("SELECT COUNT(*) FROM {}", table),
            insert: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                all_columns.join(", "),
                placeholders(1, all_columns.len())
            ),
            insert_generated,
            update: format!(
                "UPDATE {} SET {} WHERE {} = ${}",
                table,
                assignments.join(", "),
                id,
                data_columns.len() + 1
            ),
            delete_by_id: format!("DELETE FROM {} WHERE {} = $1", table, id),
            delete_all: format!("DELETE FROM {}", table),
        };

        Self {
            schema,
            data_columns,
            sql,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Inserts rows without an identifier, updates rows whose identifier
    /// exists and inserts the rest with the identifier they carry.
    pub fn save(&self, session: &mut dyn Session, row: Row) -> Result<Row> {
        let mut row = self.schema.normalize(row)?;
        let id_column = self.schema.id_column();
        let data: Vec<Value> = self
            .data_columns
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect();

        match row.get(id_column).cloned().unwrap_or(Value::Null) {
            Value::Null => {
                let outcome = if self.data_columns.is_empty() {
                    session.execute(&self.sql.insert_generated, &Params::new(), None, None)?
                } else {
                    session.execute(&self.sql.insert_generated, &Params::positional(data), None, None)?
                };
                let key = outcome.generated_key().ok_or_else(|| {
                    RepoError::ExecutionError(format!(
                        "No identifier generated for table '{}'",
                        self.schema.name()
                    ))
                })?;
                row.insert(id_column.to_string(), Value::Integer(key));
            }
            id if self.exists_by_id(session, &id)? => {
                if !self.data_columns.is_empty() {
                    let mut params = Params::positional(data);
                    params.push(id);
                    session.execute(&self.sql.update, &params, None, None)?;
                }
            }
            id => {
                let mut values = vec![id];
                values.extend(data);
                session.execute(&self.sql.insert, &Params::positional(values), None, None)?;
            }
        }
        Ok(row)
    }

    pub fn find_by_id(&self, session: &mut dyn Session, id: &Value) -> Result<Option<Row>> {
        let params = Params::positional(vec![id.clone()]);
        Ok(session
            .execute(&self.sql.select_by_id, &params, None, Some(1))?
            .into_rows()?
            .into_iter()
            .next())
    }

    pub fn exists_by_id(&self, session: &mut dyn Session, id: &Value) -> Result<bool> {
        let params = Params::positional(vec![id.clone()]);
        Ok(session
            .execute(&self.sql.count_by_id, &params, None, None)?
            .into_count()?
            > 0)
    }

    pub fn find_all(
        &self,
        session: &mut dyn Session,
        page: Option<Pageable>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Row>> {
        let mut sql = self.sql.select_all.clone();
        if let Some(sort) = sort
            && !sort.is_unsorted()
        {
            let orders = sort
                .orders()
                .iter()
                .map(|order| {
                    format!("{} {}", column_name(&order.property), order.direction.to_sql())
                })
                .collect::<Vec<_>>();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        let (first, max) = match page {
            Some(page) => (Some(page.offset()), Some(page.size())),
            None => (None, None),
        };
        session.execute(&sql, &Params::new(), first, max)?.into_rows()
    }

    /// Rows for the identifiers that exist, in the order asked for.
    pub fn find_all_by_id(&self, session: &mut dyn Session, ids: &[Value]) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.find_by_id(session, id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn count(&self, session: &mut dyn Session) -> Result<u64> {
        session
            .execute(&self.sql.count_all, &Params::new(), None, None)?
            .into_count()
    }

    pub fn delete(&self, session: &mut dyn Session, row: &Row) -> Result<u64> {
        match row.get(self.schema.id_column()) {
            Some(id) if !id.is_null() => self.delete_by_id(session, id),
            _ => Err(RepoError::InvalidArguments {
                method: "delete".into(),
                reason: format!(
                    "entity has no '{}' identifier",
                    self.schema.id_column()
                ),
            }),
        }
    }

    pub fn delete_by_id(&self, session: &mut dyn Session, id: &Value) -> Result<u64> {
        let params = Params::positional(vec![id.clone()]);
        session
            .execute(&self.sql.delete_by_id, &params, None, None)?
            .into_count()
    }

    pub fn delete_all(&self, session: &mut dyn Session) -> Result<u64> {
        session
            .execute(&self.sql.delete_all, &Params::new(), None, None)?
            .into_count()
    }

    pub fn delete_all_entities(&self, session: &mut dyn Session, rows: &[Row]) -> Result<u64> {
        let mut deleted = 0;
        for row in rows {
            deleted += self.delete(session, row)?;
        }
        Ok(deleted)
    }

    pub fn delete_all_by_id(&self, session: &mut dyn Session, ids: &[Value]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            deleted += self.delete_by_id(session, id)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::MemoryDatabase;

    fn setup() -> (MemoryDatabase, SimpleRepository) {
        let schema = TableSchema::new("users", "id")
            .required("name", DataType::Text)
            .column("age", DataType::Integer);
        let db = MemoryDatabase::new();
        db.create_table(schema.clone()).unwrap();
        (db, SimpleRepository::new(schema))
    }

    fn user(name: &str, age: i64) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row.insert("age".into(), Value::Integer(age));
        row
    }

    #[test]
    fn test_rendered_statements() {
        let (_, repo) = setup();
        assert_eq!(repo.sql.insert_generated, "INSERT INTO users (name, age) VALUES ($1, $2)");
        assert_eq!(repo.sql.insert, "INSERT INTO users (id, name, age) VALUES ($1, $2, $3)");
        assert_eq!(repo.sql.update, "UPDATE users SET name = $1, age = $2 WHERE id = $3");
    }

    #[test]
    fn test_save_insert_update_and_find() {
        let (db, repo) = setup();
        let mut session = db.open_session().unwrap();

        let saved = repo.save(&mut session, user("bob", 30)).unwrap();
        let id = saved.get("id").cloned().unwrap();
        assert_eq!(id, Value::Integer(1));

        let mut changed = saved.clone();
        changed.insert("age".into(), Value::Integer(31));
        repo.save(&mut session, changed).unwrap();

        let found = repo.find_by_id(&mut session, &id).unwrap().unwrap();
        assert_eq!(found.get("age"), Some(&Value::Integer(31)));
        assert_eq!(repo.count(&mut session).unwrap(), 1);

        let mut explicit = user("eve", 22);
        explicit.insert("id".into(), Value::Integer(10));
        repo.save(&mut session, explicit).unwrap();
        assert!(repo.exists_by_id(&mut session, &Value::Integer(10)).unwrap());
        let next = repo.save(&mut session, user("kim", 40)).unwrap();
        assert_eq!(next.get("id"), Some(&Value::Integer(11)));
    }

    #[test]
    fn test_find_all_paged_and_sorted() {
        let (db, repo) = setup();
        let mut session = db.open_session().unwrap();
        for (name, age) in [("c", 3), ("a", 1), ("b", 2)] {
            repo.save(&mut session, user(name, age)).unwrap();
        }
        let sort = Sort::asc("name");
        let page = Pageable::new(1, 2).unwrap();
        let rows = repo.find_all(&mut session, Some(page), Some(&sort)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("c")));

        let rows = repo
            .find_all_by_id(&mut session, &[Value::Integer(3), Value::Integer(99)])
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_deletes() {
        let (db, repo) = setup();
        let mut session = db.open_session().unwrap();
        let a = repo.save(&mut session, user("a", 1)).unwrap();
        repo.save(&mut session, user("b", 2)).unwrap();
        repo.save(&mut session, user("c", 3)).unwrap();

        assert_eq!(repo.delete(&mut session, &a).unwrap(), 1);
        assert!(repo.delete(&mut session, &user("x", 0)).is_err());
        assert_eq!(
            repo.delete_all_by_id(&mut session, &[Value::Integer(2), Value::Integer(42)])
                .unwrap(),
            1
        );
        assert_eq!(repo.delete_all(&mut session).unwrap(), 1);
        assert_eq!(repo.count(&mut session).unwrap(), 0);
    }

    #[test]
    fn test_crud_names() {
        assert_eq!(CrudOp::from_name("saveAll"), Some(CrudOp::SaveAll));
        assert_eq!(CrudOp::from_name("findByName"), None);
        assert_eq!(CrudOp::Save.access(), Access::Write);
        assert_eq!(CrudOp::FindAll.access(), Access::Read);
    }

    #[test]
    fn test_batch_and_flush_aliases() {
        assert_eq!(CrudOp::from_name("saveAndFlush"), Some(CrudOp::Save));
        assert_eq!(CrudOp::from_name("saveAllAndFlush"), Some(CrudOp::SaveAll));
        assert_eq!(CrudOp::from_name("getReferenceById"), Some(CrudOp::GetById));
        assert_eq!(CrudOp::from_name("getOne"), Some(CrudOp::GetById));
        assert_eq!(CrudOp::from_name("deleteAllInBatch"), Some(CrudOp::DeleteAll));
        assert_eq!(
            CrudOp::from_name("deleteAllByIdInBatch"),
            Some(CrudOp::DeleteAllById)
        );
        assert_eq!(CrudOp::from_name("flush"), Some(CrudOp::Flush));
        assert_eq!(CrudOp::Flush.access(), Access::Write);
        assert!(CrudOp::flushes("saveAndFlush"));
        assert!(!CrudOp::flushes("save"));
    }
}
