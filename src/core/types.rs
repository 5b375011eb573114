use std::collections::BTreeMap;

use super::{DataType, RepoError, Result, Value};

/// One record, keyed by column name.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(RepoError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(RepoError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Table layout with a single integer identity column.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    id_column: String,
    columns: Vec<Column>,
}

impl TableSchema {
    /// Creates a schema whose identity column is an INTEGER named `id_column`.
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        let id_column = id_column.into();
        Self {
            name: name.into(),
            columns: vec![Column::new(id_column.clone(), DataType::Integer)],
            id_column,
        }
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type));
        self
    }

    pub fn required(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type).not_null());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    /// Checks every column of `row` exists and fills absent columns with NULL.
    pub fn normalize(&self, mut row: Row) -> Result<Row> {
        for (name, value) in &row {
            let column = self.get_column(name).ok_or_else(|| {
                RepoError::ExecutionError(format!(
                    "Column '{}' not found in table '{}'",
                    name, self.name
                ))
            })?;
            column.validate(value)?;
        }
        for column in &self.columns {
            if !row.contains_key(&column.name) {
                column.validate(&Value::Null)?;
                row.insert(column.name.clone(), Value::Null);
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema::new("users", "id")
            .required("name", DataType::Text)
            .column("age", DataType::Integer)
    }

    #[test]
    fn test_normalize_fills_missing_columns() {
        let mut row = Row::new();
        row.insert("name".into(), Value::from("Bob"));
        let row = users().normalize(row).unwrap();
        assert_eq!(row.get("age"), Some(&Value::Null));
        assert_eq!(row.get("id"), Some(&Value::Null));
    }

    #[test]
    fn test_normalize_rejects_unknown_and_mistyped_columns() {
        let mut row = Row::new();
        row.insert("name".into(), Value::from("Bob"));
        row.insert("nickname".into(), Value::from("B"));
        assert!(matches!(
            users().normalize(row),
            Err(RepoError::ExecutionError(_))
        ));

        let mut row = Row::new();
        row.insert("name".into(), Value::Integer(1));
        assert!(matches!(
            users().normalize(row),
            Err(RepoError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_required_column() {
        assert!(matches!(
            users().normalize(Row::new()),
            Err(RepoError::ConstraintViolation(_))
        ));
    }
}
