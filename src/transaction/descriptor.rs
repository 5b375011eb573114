use serde::{Deserialize, Serialize};

use crate::core::{Failure, kind_matches};
use crate::session::IsolationLevel;

/// How a call relates to a unit of work that may already be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active unit of work or start one.
    #[default]
    Required,
    /// Suspend the active unit of work and always start a new one.
    RequiresNew,
    /// Join the active unit of work, otherwise run without one.
    Supports,
    /// Run without a unit of work, suspending any active one.
    NotSupported,
    /// Fail if a unit of work is active.
    Never,
    /// Fail unless a unit of work is active.
    Mandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
    /// Whatever the session is configured with.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    /// Platform level to apply, or `None` to leave the session untouched.
    pub fn platform_level(&self) -> Option<IsolationLevel> {
        match self {
            Self::Default => None,
            Self::ReadUncommitted => Some(IsolationLevel::ReadUncommitted),
            Self::ReadCommitted => Some(IsolationLevel::ReadCommitted),
            Self::RepeatableRead => Some(IsolationLevel::RepeatableRead),
            Self::Serializable => Some(IsolationLevel::Serializable),
        }
    }
}

/// Transaction attributes attached to a call site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionDescriptor {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub read_only: bool,
    /// Seconds; 0 means no timeout.
    pub timeout: u32,
    /// Failure kinds that force a rollback.
    pub rollback_for: Vec<String>,
    /// Failure kinds that commit despite failing. Wins over `rollback_for`.
    pub no_rollback_for: Vec<String>,
}

impl TransactionDescriptor {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn rollback_for(mut self, kind: impl Into<String>) -> Self {
        self.rollback_for.push(kind.into());
        self
    }

    pub fn no_rollback_for(mut self, kind: impl Into<String>) -> Self {
        self.no_rollback_for.push(kind.into());
        self
    }

    /// Rollback rule: `no_rollback_for` first, then `rollback_for` if any,
    /// otherwise roll back unless the failure is recoverable.
    pub fn should_rollback<F: Failure + ?Sized>(&self, failure: &F) -> bool {
        let kind = failure.kind();
        if self.no_rollback_for.iter().any(|rule| kind_matches(rule, kind)) {
            return false;
        }
        if !self.rollback_for.is_empty() {
            return self.rollback_for.iter().any(|rule| kind_matches(rule, kind));
        }
        !failure.is_recoverable()
    }
}
