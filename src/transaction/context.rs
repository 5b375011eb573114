// ============================================================================
// Transaction Context
// ============================================================================
//
// One context per logical call chain, passed explicitly by `&mut`. The entry
// on top of the stack is the current unit of work. Suspended entries are not
// kept here: whoever suspends one pops it and owns it until it is resumed.
//
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::TransactionDescriptor;
use crate::session::{IsolationLevel, Session};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a unit of work, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn next() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// A unit of work owned by the context that started it.
pub struct TransactionEntry {
    id: TransactionId,
    session: Box<dyn Session>,
    descriptor: TransactionDescriptor,
    isolation: Option<IsolationLevel>,
    rollback_only: bool,
}

impl TransactionEntry {
    pub fn new(
        session: Box<dyn Session>,
        descriptor: TransactionDescriptor,
        isolation: Option<IsolationLevel>,
    ) -> Self {
        Self {
            id: TransactionId::next(),
            session,
            descriptor,
            isolation,
            rollback_only: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub(crate) fn into_session(self) -> Box<dyn Session> {
        self.session
    }

    pub fn descriptor(&self) -> &TransactionDescriptor {
        &self.descriptor
    }

    /// Isolation applied at begin; `None` when the session default was kept.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.descriptor.read_only
    }

    pub fn timeout(&self) -> u32 {
        self.descriptor.timeout
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Marks the unit of work so its owner rolls back instead of committing.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }
}

impl fmt::Debug for TransactionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEntry")
            .field("id", &self.id)
            .field("session", &self.session.id())
            .field("propagation", &self.descriptor.propagation)
            .field("isolation", &self.isolation)
            .field("read_only", &self.descriptor.read_only)
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

/// Stack of active units of work for one logical thread of control.
///
/// Contexts are `Send` so they can move with their call chain, but two
/// concurrent chains must never share one.
#[derive(Debug, Default)]
pub struct TransactionContext {
    stack: Vec<TransactionEntry>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TransactionEntry) {
        self.stack.push(entry);
    }

    pub fn pop(&mut self) -> Option<TransactionEntry> {
        self.stack.pop()
    }

    pub fn current(&self) -> Option<&TransactionEntry> {
        self.stack.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut TransactionEntry> {
        self.stack.last_mut()
    }

    pub fn has_active_transaction(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Removes the entry `id` wherever it sits, normally the top.
    pub(crate) fn take(&mut self, id: TransactionId) -> Option<TransactionEntry> {
        let position = self.stack.iter().rposition(|entry| entry.id == id)?;
        Some(self.stack.remove(position))
    }
}
