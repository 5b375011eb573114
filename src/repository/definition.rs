use serde::{Deserialize, Serialize};

use crate::core::Result;

/// What a repository method returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnShape {
    /// At most one entity.
    Optional,
    Collection,
    Count,
    Boolean,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParamKind {
    Value,
    Pageable,
    Sort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Name used by `:name` placeholders in a query template.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ParamKind,
}

/// One declared repository method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub returns: ReturnShape,
    /// Explicit query text; bypasses name derivation.
    #[serde(default)]
    pub query: Option<String>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, returns: ReturnShape) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns,
            query: None,
        }
    }

    /// Adds a value parameter bound by `name` in templates.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: Some(name.into()),
            kind: ParamKind::Value,
        });
        self
    }

    /// Adds an unnamed value parameter, bound by position.
    pub fn positional(mut self) -> Self {
        self.params.push(Param {
            name: None,
            kind: ParamKind::Value,
        });
        self
    }

    pub fn pageable(mut self) -> Self {
        self.params.push(Param {
            name: None,
            kind: ParamKind::Pageable,
        });
        self
    }

    pub fn sort(mut self) -> Self {
        self.params.push(Param {
            name: None,
            kind: ParamKind::Sort,
        });
        self
    }

    pub fn query(mut self, template: impl Into<String>) -> Self {
        self.query = Some(template.into());
        self
    }

    pub fn value_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Value)
            .count()
    }

    pub(crate) fn count_kind(&self, kind: ParamKind) -> usize {
        self.params.iter().filter(|p| p.kind == kind).count()
    }
}

/// A repository interface: the entity table it serves and its declared
/// query methods. Generic CRUD methods need no declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDefinition {
    pub interface: String,
    pub entity: String,
    #[serde(default)]
    pub methods: Vec<MethodSignature>,
}

impl RepositoryDefinition {
    pub fn new(interface: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            entity: entity.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, signature: MethodSignature) -> Self {
        self.methods.push(signature);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_builder() {
        let signature = MethodSignature::new("findByStatus", ReturnShape::Collection)
            .positional()
            .pageable()
            .sort();
        assert_eq!(signature.value_params(), 1);
        assert_eq!(signature.count_kind(ParamKind::Pageable), 1);
        assert_eq!(signature.params.len(), 3);
    }

    #[test]
    fn test_definition_from_json() {
        let definition = RepositoryDefinition::from_json(
            r#"{
                "interface": "UserRepository",
                "entity": "users",
                "methods": [
                    { "name": "findByName", "returns": "OPTIONAL", "params": [{ "kind": "VALUE" }] },
                    {
                        "name": "findActive",
                        "returns": "COLLECTION",
                        "query": "SELECT * FROM users WHERE status = :status",
                        "params": [{ "name": "status", "kind": "VALUE" }, { "kind": "PAGEABLE" }]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(definition.methods.len(), 2);
        assert_eq!(definition.methods[0].returns, ReturnShape::Optional);
        assert_eq!(definition.methods[1].params[0].name.as_deref(), Some("status"));
        assert!(definition.methods[1].query.is_some());
    }
}
