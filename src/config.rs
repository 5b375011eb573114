use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{RepoError, Result};
use crate::session::IsolationLevel;

const ENV_PREFIX: &str = "RUSTREPO_";

/// Runtime configuration
///
/// Values are layered: defaults, then a JSON document, then the section of
/// `profiles` named by the active profile, then environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Database name, used in log fields
    pub database: String,

    /// Active profile
    pub profile: Option<String>,

    /// Isolation applied when a transaction asks for the platform default
    pub default_isolation: IsolationLevel,

    /// Isolation levels the backing store accepts
    pub supported_isolation: Vec<IsolationLevel>,

    /// Capacity of the parsed statement cache
    pub statement_cache_capacity: usize,

    /// Capacity of the compiled LIKE pattern cache
    pub pattern_cache_capacity: usize,

    /// Per-profile overrides
    pub profiles: BTreeMap<String, ProfileOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileOverrides {
    pub database: Option<String>,
    pub default_isolation: Option<IsolationLevel>,
    pub supported_isolation: Option<Vec<IsolationLevel>>,
    pub statement_cache_capacity: Option<usize>,
    pub pattern_cache_capacity: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database: "rustrepo".to_string(),
            profile: None,
            default_isolation: IsolationLevel::ReadCommitted,
            supported_isolation: vec![
                IsolationLevel::ReadCommitted,
                IsolationLevel::RepeatableRead,
                IsolationLevel::Serializable,
            ],
            statement_cache_capacity: 128,
            pattern_cache_capacity: 200,
            profiles: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the active profile
    pub fn profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    /// Set the platform default isolation
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Replace the supported isolation levels
    pub fn supported_isolation(mut self, levels: Vec<IsolationLevel>) -> Self {
        self.supported_isolation = levels;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn pattern_cache_capacity(mut self, capacity: usize) -> Self {
        self.pattern_cache_capacity = capacity;
        self
    }

    /// Parse a JSON document and apply its active profile.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepoError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.resolved()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RepoError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `RUSTREPO_*` overrides read through `lookup`.
    ///
    /// A profile supplied here is applied after the overrides so its section wins
    /// over file values, and explicit overrides are re-applied on top.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(profile) = var("PROFILE") {
            self.profile = Some(profile);
            self = self.resolved()?;
        }
        if let Some(database) = var("DATABASE") {
            self.database = database;
        }
        if let Some(level) = var("DEFAULT_ISOLATION") {
            self.default_isolation = parse_isolation(&level)?;
        }
        if let Some(capacity) = var("STATEMENT_CACHE") {
            self.statement_cache_capacity = parse_capacity("STATEMENT_CACHE", &capacity)?;
        }
        if let Some(capacity) = var("PATTERN_CACHE") {
            self.pattern_cache_capacity = parse_capacity("PATTERN_CACHE", &capacity)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Merge the active profile section into the top-level values.
    fn resolved(mut self) -> Result<Self> {
        if let Some(profile) = self.profile.clone() {
            let overrides = self.profiles.get(&profile).cloned().ok_or_else(|| {
                RepoError::Configuration(format!("Unknown profile '{}'", profile))
            })?;
            if let Some(database) = overrides.database {
                self.database = database;
            }
            if let Some(level) = overrides.default_isolation {
                self.default_isolation = level;
            }
            if let Some(levels) = overrides.supported_isolation {
                self.supported_isolation = levels;
            }
            if let Some(capacity) = overrides.statement_cache_capacity {
                self.statement_cache_capacity = capacity;
            }
            if let Some(capacity) = overrides.pattern_cache_capacity {
                self.pattern_cache_capacity = capacity;
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(RepoError::Configuration("database cannot be empty".into()));
        }
        if !self.supported_isolation.contains(&self.default_isolation) {
            return Err(RepoError::Configuration(format!(
                "default isolation {} is not among the supported levels",
                self.default_isolation
            )));
        }
        if self.statement_cache_capacity == 0 || self.pattern_cache_capacity == 0 {
            return Err(RepoError::Configuration(
                "cache capacities must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_isolation(text: &str) -> Result<IsolationLevel> {
    let normalized = text.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "READ_UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
        "READ_COMMITTED" => Ok(IsolationLevel::ReadCommitted),
        "REPEATABLE_READ" => Ok(IsolationLevel::RepeatableRead),
        "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
        _ => Err(RepoError::Configuration(format!(
            "Unknown isolation level '{}'",
            text
        ))),
    }
}

fn parse_capacity(name: &str, text: &str) -> Result<usize> {
    text.trim().parse().map_err(|_| {
        RepoError::Configuration(format!("{}{} must be a number, got '{}'", ENV_PREFIX, name, text))
    })
}
