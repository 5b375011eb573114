use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{RepoError, Result, Row, TableSchema, Value};

/// A persistent type mapped field-by-field onto a table row.
///
/// Field names are column names. The identifier field should be an
/// `Option<i64>` so unsaved entities serialize it as NULL.
pub trait Entity: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";

    fn schema() -> TableSchema;

    fn to_row(&self) -> Result<Row> {
        let serde_json::Value::Object(fields) = serde_json::to_value(self)? else {
            return Err(RepoError::Serialization(format!(
                "Entity for table '{}' must serialize to an object",
                Self::TABLE
            )));
        };
        fields
            .iter()
            .map(|(name, json)| Ok((name.clone(), Value::from_json(json)?)))
            .collect()
    }

    fn from_row(row: Row) -> Result<Self> {
        let fields = row
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
    }
}
