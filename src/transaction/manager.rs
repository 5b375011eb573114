// ============================================================================
// Transaction Manager
// ============================================================================
//
// Propagation decisions:
//
//   mode           | active unit of work          | none active
//   ---------------+------------------------------+----------------
//   REQUIRED       | join                         | create new
//   REQUIRES_NEW   | suspend, create new, resume  | create new
//   SUPPORTS       | join                         | run bare
//   NOT_SUPPORTED  | suspend, run bare, resume    | run bare
//   NEVER          | IllegalTransactionState      | run bare
//   MANDATORY      | join                         | IllegalTransactionState
//
// A unit of work is committed or rolled back only by the frame that created
// it. Joined frames mark it rollback-only instead.
//
// ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use super::{Propagation, TransactionContext, TransactionDescriptor, TransactionEntry, TransactionId};
use crate::core::{Failure, RepoError, Result};
use crate::session::{Session, SessionFactory};

/// Whether a call outside any unit of work needs a transaction of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

pub struct TransactionManager {
    factory: Arc<dyn SessionFactory>,
}

impl TransactionManager {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    pub fn session_factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// Rejects descriptors the session factory cannot honour.
    pub fn validate(&self, descriptor: &TransactionDescriptor) -> Result<()> {
        if let Some(level) = descriptor.isolation.platform_level()
            && !self.factory.supports_isolation(level)
        {
            return Err(RepoError::Configuration(format!(
                "Isolation level {} is not supported by the session factory",
                level
            )));
        }
        Ok(())
    }

    /// Runs `body` under `descriptor`'s propagation rules.
    ///
    /// Failures from `body` come back unchanged after the rollback rule has
    /// been applied. Failures of the engine itself (propagation violations,
    /// session errors) are converted into `E`.
    pub fn execute_in_transaction<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        descriptor: &TransactionDescriptor,
        body: F,
    ) -> std::result::Result<T, E>
    where
        E: Failure + From<RepoError>,
        F: FnOnce(&mut TransactionContext) -> std::result::Result<T, E>,
    {
        let active = ctx.has_active_transaction();
        match (descriptor.propagation, active) {
            (Propagation::Required | Propagation::Supports | Propagation::Mandatory, true) => {
                self.join(ctx, descriptor, body)
            }
            (Propagation::Required | Propagation::RequiresNew, false) => {
                self.run_new(ctx, descriptor, body)
            }
            (Propagation::RequiresNew, true) => {
                let mut suspension = Suspension::new(ctx);
                self.run_new(suspension.context(), descriptor, body)
            }
            (Propagation::NotSupported, true) => {
                let mut suspension = Suspension::new(ctx);
                body(suspension.context())
            }
            (Propagation::Supports | Propagation::NotSupported | Propagation::Never, false) => {
                body(ctx)
            }
            (Propagation::Never, true) => Err(E::from(RepoError::IllegalTransactionState(
                "Existing transaction found for propagation NEVER".into(),
            ))),
            (Propagation::Mandatory, false) => Err(E::from(RepoError::IllegalTransactionState(
                "No existing transaction found for propagation MANDATORY".into(),
            ))),
        }
    }

    /// Runs `f` against the current session, or a short-lived one when no unit
    /// of work is active. Writes get their own transaction in that case.
    pub fn with_session<T, F>(&self, ctx: &mut TransactionContext, access: Access, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Session) -> Result<T>,
    {
        if let Some(entry) = ctx.current_mut() {
            return f(entry.session_mut());
        }

        match access {
            Access::Write => {
                self.execute_in_transaction(ctx, &TransactionDescriptor::required(), |ctx| {
                    let entry = ctx.current_mut().ok_or_else(|| {
                        RepoError::IllegalTransactionState("No transaction after begin".into())
                    })?;
                    f(entry.session_mut())
                })
            }
            Access::Read => {
                let mut session = self.factory.open()?;
                let result = f(session.as_mut());
                close_quietly(session.as_mut());
                result
            }
        }
    }

    fn join<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        descriptor: &TransactionDescriptor,
        body: F,
    ) -> std::result::Result<T, E>
    where
        E: Failure,
        F: FnOnce(&mut TransactionContext) -> std::result::Result<T, E>,
    {
        if let Some(entry) = ctx.current() {
            debug!(txn = %entry.id(), propagation = ?descriptor.propagation, "joining transaction");
        }
        let result = body(ctx);
        if let Err(failure) = &result
            && let Some(entry) = ctx.current_mut()
            && entry.descriptor().should_rollback(failure)
        {
            debug!(txn = %entry.id(), kind = failure.kind(), "marking transaction rollback-only");
            entry.set_rollback_only();
        }
        result
    }

    fn run_new<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        descriptor: &TransactionDescriptor,
        body: F,
    ) -> std::result::Result<T, E>
    where
        E: Failure + From<RepoError>,
        F: FnOnce(&mut TransactionContext) -> std::result::Result<T, E>,
    {
        let entry = self.begin(descriptor).map_err(E::from)?;
        let id = entry.id();
        ctx.push(entry);

        let mut scope = EntryScope::new(ctx, id);
        let result = body(scope.context());
        let Some(entry) = scope.release() else {
            return Err(E::from(RepoError::IllegalTransactionState(format!(
                "Transaction {} was removed from the context before completion",
                id
            ))));
        };
        self.complete(entry, result)
    }

    /// Opens a session and applies `descriptor` to a fresh transaction on it.
    fn begin(&self, descriptor: &TransactionDescriptor) -> Result<TransactionEntry> {
        let mut session = self.factory.open()?;
        let isolation = descriptor.isolation.platform_level();
        if let Err(err) = configure(session.as_mut(), descriptor) {
            close_quietly(session.as_mut());
            return Err(err);
        }
        let entry = TransactionEntry::new(session, descriptor.clone(), isolation);
        debug!(
            txn = %entry.id(),
            session = entry.session().id(),
            propagation = ?descriptor.propagation,
            isolation = ?isolation,
            read_only = descriptor.read_only,
            timeout = descriptor.timeout,
            "transaction started"
        );
        Ok(entry)
    }

    fn complete<T, E>(
        &self,
        entry: TransactionEntry,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: Failure + From<RepoError>,
    {
        let id = entry.id();
        let rollback_only = entry.is_rollback_only();
        let descriptor = entry.descriptor().clone();
        let mut session = entry.into_session();

        match result {
            Ok(value) => {
                let outcome = if rollback_only {
                    debug!(txn = %id, "rolling back rollback-only transaction");
                    session.rollback()
                } else {
                    session.commit()
                };
                close_quietly(session.as_mut());
                outcome.map_err(E::from)?;
                debug!(txn = %id, committed = !rollback_only, "transaction completed");
                Ok(value)
            }
            Err(failure) => {
                if session.is_active() {
                    let rollback = rollback_only || descriptor.should_rollback(&failure);
                    let outcome = if rollback {
                        session.rollback()
                    } else {
                        session.commit()
                    };
                    match outcome {
                        Ok(()) => debug!(
                            txn = %id,
                            kind = failure.kind(),
                            rolled_back = rollback,
                            "transaction completed after failure"
                        ),
                        Err(err) => warn!(
                            txn = %id,
                            error = %err,
                            "completion after failure did not succeed"
                        ),
                    }
                }
                close_quietly(session.as_mut());
                Err(failure)
            }
        }
    }
}

fn configure(session: &mut dyn Session, descriptor: &TransactionDescriptor) -> Result<()> {
    session.begin()?;
    if let Some(level) = descriptor.isolation.platform_level() {
        session.set_isolation(level)?;
    }
    if descriptor.timeout > 0 {
        session.set_timeout(descriptor.timeout)?;
    }
    if descriptor.read_only {
        session.set_read_only(true)?;
    }
    Ok(())
}

fn close_quietly(session: &mut dyn Session) {
    if let Err(err) = session.close() {
        warn!(session = session.id(), error = %err, "failed to close session");
    }
}

/// Pops the current entry and pushes it back when dropped, unwinding included.
struct Suspension<'a> {
    ctx: &'a mut TransactionContext,
    suspended: Option<TransactionEntry>,
}

impl<'a> Suspension<'a> {
    fn new(ctx: &'a mut TransactionContext) -> Self {
        let suspended = ctx.pop();
        if let Some(entry) = &suspended {
            debug!(txn = %entry.id(), "transaction suspended");
        }
        Self { ctx, suspended }
    }

    fn context(&mut self) -> &mut TransactionContext {
        self.ctx
    }
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.suspended.take() {
            debug!(txn = %entry.id(), "transaction resumed");
            self.ctx.push(entry);
        }
    }
}

/// Owns a freshly pushed entry; if the body unwinds, the entry is removed and
/// its session closed, which rolls the transaction back.
struct EntryScope<'a> {
    ctx: &'a mut TransactionContext,
    id: TransactionId,
    released: bool,
}

impl<'a> EntryScope<'a> {
    fn new(ctx: &'a mut TransactionContext, id: TransactionId) -> Self {
        Self {
            ctx,
            id,
            released: false,
        }
    }

    fn context(&mut self) -> &mut TransactionContext {
        self.ctx
    }

    fn release(mut self) -> Option<TransactionEntry> {
        self.released = true;
        self.ctx.take(self.id)
    }
}

impl Drop for EntryScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(entry) = self.ctx.take(self.id) {
            warn!(txn = %self.id, "transaction abandoned, rolling back");
            let mut session = entry.into_session();
            close_quietly(session.as_mut());
        }
    }
}
