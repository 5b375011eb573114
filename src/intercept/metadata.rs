use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::transaction::TransactionDescriptor;

/// Transaction attributes of one target type.
///
/// A method-level descriptor wins over the type-level one; methods with
/// neither run without interception.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub type_level: Option<TransactionDescriptor>,
    pub methods: BTreeMap<String, TransactionDescriptor>,
}

impl TransactionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata applying `descriptor` to every method of the type.
    pub fn for_type(descriptor: TransactionDescriptor) -> Self {
        Self {
            type_level: Some(descriptor),
            methods: BTreeMap::new(),
        }
    }

    pub fn method(mut self, name: impl Into<String>, descriptor: TransactionDescriptor) -> Self {
        self.methods.insert(name.into(), descriptor);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn descriptor_for(&self, method: &str) -> Option<&TransactionDescriptor> {
        self.methods.get(method).or(self.type_level.as_ref())
    }

    /// Every descriptor declared, type-level first.
    pub fn descriptors(&self) -> impl Iterator<Item = &TransactionDescriptor> {
        self.type_level.iter().chain(self.methods.values())
    }

    pub fn is_empty(&self) -> bool {
        self.type_level.is_none() && self.methods.is_empty()
    }
}

/// Implemented by types that carry transaction attributes.
pub trait Transactional {
    fn transaction_metadata(&self) -> Result<TransactionMetadata>;
}
