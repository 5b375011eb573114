/// Propagation engine tests
///
/// Every propagation mode, rollback rules, joined-failure handling and the
/// session-level attributes (isolation, read-only, timeout).
/// Run with: cargo test --test propagation_tests

use std::sync::Arc;
use std::time::Duration;

use rustrepo::session::{IsolationLevel, Params, QueryOutcome, Session, SessionFactory};
use rustrepo::transaction::Access;
use rustrepo::{
    DataType, Failure, Isolation, MemoryDatabase, Propagation, RepoError, Result, Runtime,
    RuntimeConfig, TableSchema, TransactionContext, TransactionDescriptor, TransactionManager,
    Value,
};

fn accounts() -> TableSchema {
    TableSchema::new("accounts", "id")
        .required("owner", DataType::Text)
        .column("balance", DataType::Integer)
}

fn runtime() -> Runtime {
    Runtime::builder(RuntimeConfig::default())
        .table(accounts())
        .build()
        .unwrap()
}

fn insert(manager: &TransactionManager, ctx: &mut TransactionContext, owner: &str) -> Result<()> {
    manager.with_session(ctx, Access::Write, |session| {
        session.execute(
            "INSERT INTO accounts (owner, balance) VALUES ($1, $2)",
            &Params::positional(vec![Value::from(owner), Value::Integer(0)]),
            None,
            None,
        )
    })?;
    Ok(())
}

fn count(manager: &TransactionManager, ctx: &mut TransactionContext) -> u64 {
    manager
        .with_session(ctx, Access::Read, |session| {
            session
                .execute("SELECT COUNT(*) FROM accounts", &Params::new(), None, None)?
                .into_count()
        })
        .unwrap()
}

fn descriptor(propagation: Propagation) -> TransactionDescriptor {
    TransactionDescriptor::new(propagation)
}

// ============================================================================
// Propagation modes
// ============================================================================

#[test]
fn test_required_inside_required_commits_once() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            let outer = ctx.current().map(|e| e.id());
            insert(manager, ctx, "alice")?;
            manager.execute_in_transaction(ctx, &descriptor(Propagation::Required), |ctx| {
                assert_eq!(ctx.depth(), 1);
                assert_eq!(ctx.current().map(|e| e.id()), outer);
                insert(manager, ctx, "bob")
            })
        })
        .unwrap();

    let stats = rt.database().stats();
    assert_eq!(stats.begins, 1);
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.rollbacks, 0);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 2);
}

#[test]
fn test_requires_new_uses_second_session_and_restores_outer() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            let outer = ctx.current().map(|e| e.id());
            let outer_session = ctx.current().map(|e| e.session().id());
            insert(manager, ctx, "outer")?;

            manager.execute_in_transaction(ctx, &descriptor(Propagation::RequiresNew), |ctx| {
                assert_eq!(ctx.depth(), 1);
                assert_ne!(ctx.current().map(|e| e.id()), outer);
                assert_ne!(ctx.current().map(|e| e.session().id()), outer_session);
                // The outer insert is not committed yet.
                assert_eq!(count(manager, ctx), 0);
                insert(manager, ctx, "inner")
            })?;

            assert_eq!(ctx.current().map(|e| e.id()), outer);
            assert_eq!(count(manager, ctx), 2);
            Ok::<_, RepoError>(())
        })
        .unwrap();

    let stats = rt.database().stats();
    assert_eq!(stats.sessions_opened, 2);
    assert_eq!(stats.commits, 2);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 2);
}

#[test]
fn test_requires_new_failure_leaves_outer_intact() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            insert(manager, ctx, "outer")?;
            let inner: Result<()> =
                manager.execute_in_transaction(ctx, &descriptor(Propagation::RequiresNew), |ctx| {
                    insert(manager, ctx, "inner")?;
                    Err(RepoError::application("audit.failed", "inner failure"))
                });
            assert!(inner.is_err());
            assert!(!ctx.current().unwrap().is_rollback_only());
            Ok::<_, RepoError>(())
        })
        .unwrap();

    let stats = rt.database().stats();
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.commits, 1);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);
}

#[test]
fn test_supports_joins_or_runs_bare() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let bare = manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Supports), |ctx| {
            Ok::<_, RepoError>(ctx.has_active_transaction())
        })
        .unwrap();
    assert!(!bare);
    assert_eq!(rt.database().stats().begins, 0);

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            let outer = ctx.current().map(|e| e.id());
            manager.execute_in_transaction(ctx, &descriptor(Propagation::Supports), |ctx| {
                assert_eq!(ctx.current().map(|e| e.id()), outer);
                Ok::<_, RepoError>(())
            })
        })
        .unwrap();
    assert_eq!(rt.database().stats().begins, 1);
}

#[test]
fn test_not_supported_suspends_and_resumes() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            let outer = ctx.current().map(|e| e.id());
            insert(manager, ctx, "outer")?;
            manager.execute_in_transaction(ctx, &descriptor(Propagation::NotSupported), |ctx| {
                assert!(!ctx.has_active_transaction());
                // Runs on its own short-lived session, outside the outer unit of work.
                assert_eq!(count(manager, ctx), 0);
                insert(manager, ctx, "bare")
            })?;
            assert_eq!(ctx.current().map(|e| e.id()), outer);
            Ok::<_, RepoError>(())
        })
        .unwrap();

    assert_eq!(rt.database().row_count("accounts").unwrap(), 2);
}

#[test]
fn test_never_fails_only_inside_a_transaction() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Never), |_| {
            Ok::<_, RepoError>(())
        })
        .unwrap();

    let result: Result<()> =
        manager.execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            let err = manager
                .execute_in_transaction(ctx, &descriptor(Propagation::Never), |_| {
                    Ok::<_, RepoError>(())
                })
                .unwrap_err();
            assert!(matches!(err, RepoError::IllegalTransactionState(_)));
            assert_eq!(err.kind(), "transaction.illegal_state");
            Ok(())
        });
    result.unwrap();
}

#[test]
fn test_mandatory_requires_a_transaction() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let err = manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Mandatory), |_| {
            Ok::<_, RepoError>(())
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::IllegalTransactionState(_)));
    assert_eq!(rt.database().stats().sessions_opened, 0);

    manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            manager.execute_in_transaction(ctx, &descriptor(Propagation::Mandatory), |ctx| {
                assert_eq!(ctx.depth(), 1);
                Ok::<_, RepoError>(())
            })
        })
        .unwrap();
}

// ============================================================================
// Rollback rules
// ============================================================================

fn run_failing(rt: &Runtime, descriptor: &TransactionDescriptor, failure: RepoError) -> RepoError {
    let manager = rt.manager();
    let mut ctx = rt.new_context();
    manager
        .execute_in_transaction(&mut ctx, descriptor, |ctx| {
            insert(manager, ctx, "written")?;
            Err::<(), _>(failure)
        })
        .unwrap_err()
}

#[test]
fn test_rollback_for_matches_only_listed_kinds() {
    let rt = runtime();
    let rules = TransactionDescriptor::required().rollback_for("kind_a");

    let err = run_failing(&rt, &rules, RepoError::application("kind_b", "not listed"));
    assert_eq!(err, RepoError::application("kind_b", "not listed"));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);

    run_failing(&rt, &rules, RepoError::application("kind_a", "listed"));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);

    let stats = rt.database().stats();
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.rollbacks, 1);
}

#[test]
fn test_no_rollback_for_commits_unchecked_failure() {
    let rt = runtime();
    let rules = TransactionDescriptor::required().no_rollback_for("kind_a");
    run_failing(&rt, &rules, RepoError::application("kind_a.detail", "unchecked"));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);
}

#[test]
fn test_default_policy() {
    let rt = runtime();
    let rules = TransactionDescriptor::required();
    run_failing(&rt, &rules, RepoError::recoverable("billing.retry", "checked"));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);
    run_failing(&rt, &rules, RepoError::application("billing.crash", "unchecked"));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);
}

#[test]
fn test_joined_failure_marks_outer_rollback_only() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let value = manager
        .execute_in_transaction(&mut ctx, &descriptor(Propagation::Required), |ctx| {
            insert(manager, ctx, "outer")?;
            let inner: Result<()> =
                manager.execute_in_transaction(ctx, &descriptor(Propagation::Required), |_| {
                    Err(RepoError::application("kind_a", "inner failure"))
                });
            assert!(inner.is_err());
            // Marked, but not rolled back yet.
            assert!(ctx.current().unwrap().is_rollback_only());
            assert_eq!(rt.database().stats().rollbacks, 0);
            Ok::<_, RepoError>("swallowed")
        })
        .unwrap();

    assert_eq!(value, "swallowed");
    let stats = rt.database().stats();
    assert_eq!(stats.commits, 0);
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 0);
}

#[test]
fn test_joined_failure_uses_outer_rules() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();
    let outer = TransactionDescriptor::required().no_rollback_for("kind_a");
    let inner = TransactionDescriptor::required().rollback_for("kind_a");

    manager
        .execute_in_transaction(&mut ctx, &outer, |ctx| {
            insert(manager, ctx, "outer")?;
            let _ = manager.execute_in_transaction(ctx, &inner, |_| {
                Err::<(), _>(RepoError::application("kind_a", "inner failure"))
            });
            assert!(!ctx.current().unwrap().is_rollback_only());
            Ok::<_, RepoError>(())
        })
        .unwrap();

    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);
}

// ============================================================================
// Custom failure types
// ============================================================================

#[derive(Debug, PartialEq)]
enum TransferError {
    InsufficientFunds,
    Frozen,
    Repository(RepoError),
}

impl Failure for TransferError {
    fn kind(&self) -> &str {
        match self {
            Self::InsufficientFunds => "transfer.insufficient_funds",
            Self::Frozen => "transfer.frozen",
            Self::Repository(err) => err.kind(),
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientFunds)
    }
}

impl From<RepoError> for TransferError {
    fn from(err: RepoError) -> Self {
        Self::Repository(err)
    }
}

#[test]
fn test_custom_failure_is_returned_unchanged() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
            insert(manager, ctx, "kept")?;
            Err::<(), _>(TransferError::InsufficientFunds)
        })
        .unwrap_err();
    assert_eq!(err, TransferError::InsufficientFunds);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
            insert(manager, ctx, "dropped")?;
            Err::<(), _>(TransferError::Frozen)
        })
        .unwrap_err();
    assert_eq!(err, TransferError::Frozen);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 1);

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::new(Propagation::Mandatory), |_| {
            Ok::<_, TransferError>(())
        })
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Repository(RepoError::IllegalTransactionState(_))
    ));
}

// ============================================================================
// Session attributes
// ============================================================================

#[test]
fn test_repeatable_read_keeps_first_snapshot() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();
    let mut other = rt.new_context();
    let repeatable = TransactionDescriptor::required().isolation(Isolation::RepeatableRead);

    manager
        .execute_in_transaction(&mut ctx, &repeatable, |ctx| {
            let before = count(manager, ctx);
            insert(manager, &mut other, "concurrent")?;
            assert_eq!(count(manager, ctx), before);
            Ok::<_, RepoError>(())
        })
        .unwrap();

    manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
            let before = count(manager, ctx);
            insert(manager, &mut other, "concurrent")?;
            assert_eq!(count(manager, ctx), before + 1);
            Ok::<_, RepoError>(())
        })
        .unwrap();
}

#[test]
fn test_read_only_rejects_writes() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required().read_only(true), |ctx| {
            assert!(ctx.current().unwrap().is_read_only());
            insert(manager, ctx, "nope")
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::ReadOnly(_)));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 0);
}

#[test]
fn test_timeout_fails_the_next_statement() {
    let rt = runtime();
    let manager = rt.manager();
    let mut ctx = rt.new_context();

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required().timeout(1), |ctx| {
            insert(manager, ctx, "early")?;
            std::thread::sleep(Duration::from_millis(1100));
            insert(manager, ctx, "late")
        })
        .unwrap_err();
    assert_eq!(err, RepoError::Timeout(1));
    assert_eq!(rt.database().row_count("accounts").unwrap(), 0);
    assert_eq!(rt.database().stats().rollbacks, 1);
}

#[test]
fn test_unsupported_isolation_fails_before_opening_a_session() {
    let rt = runtime();
    let unsupported = TransactionDescriptor::required().isolation(Isolation::ReadUncommitted);
    assert!(matches!(
        rt.manager().validate(&unsupported),
        Err(RepoError::Configuration(_))
    ));
}

// ============================================================================
// Persistence failures during completion
// ============================================================================

#[derive(Clone, Copy)]
enum Sabotage {
    Commit,
    Rollback,
}

struct SabotagedSession {
    inner: Box<dyn Session>,
    sabotage: Sabotage,
}

impl Session for SabotagedSession {
    fn id(&self) -> u64 {
        self.inner.id()
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        match self.sabotage {
            Sabotage::Commit => Err(RepoError::Session("commit refused".into())),
            Sabotage::Rollback => self.inner.commit(),
        }
    }

    fn rollback(&mut self) -> Result<()> {
        match self.sabotage {
            Sabotage::Rollback => Err(RepoError::Session("rollback refused".into())),
            Sabotage::Commit => self.inner.rollback(),
        }
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.inner.set_isolation(level)
    }

    fn set_timeout(&mut self, seconds: u32) -> Result<()> {
        self.inner.set_timeout(seconds)
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.inner.set_read_only(read_only)
    }

    fn execute(
        &mut self,
        query: &str,
        params: &Params,
        first_result: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<QueryOutcome> {
        self.inner.execute(query, params, first_result, max_results)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

struct SabotagedFactory {
    db: MemoryDatabase,
    sabotage: Sabotage,
}

impl SessionFactory for SabotagedFactory {
    fn open(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(SabotagedSession {
            inner: self.db.open()?,
            sabotage: self.sabotage,
        }))
    }

    fn supports_isolation(&self, level: IsolationLevel) -> bool {
        self.db.supports_isolation(level)
    }
}

fn sabotaged(sabotage: Sabotage) -> (MemoryDatabase, TransactionManager) {
    let db = MemoryDatabase::new();
    db.create_table(accounts()).unwrap();
    let manager = TransactionManager::new(Arc::new(SabotagedFactory {
        db: db.clone(),
        sabotage,
    }));
    (db, manager)
}

#[test]
fn test_failed_rollback_does_not_mask_original_failure() {
    let (db, manager) = sabotaged(Sabotage::Rollback);
    let mut ctx = TransactionContext::new();

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
            insert(&manager, ctx, "lost")?;
            Err::<(), _>(RepoError::application("kind_a", "original"))
        })
        .unwrap_err();

    assert_eq!(err, RepoError::application("kind_a", "original"));
    // Closing the session discards the writes anyway.
    assert_eq!(db.row_count("accounts").unwrap(), 0);
    assert_eq!(db.stats().sessions_closed, 1);
}

#[test]
fn test_failed_commit_surfaces() {
    let (db, manager) = sabotaged(Sabotage::Commit);
    let mut ctx = TransactionContext::new();

    let err = manager
        .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
            insert(&manager, ctx, "lost")
        })
        .unwrap_err();

    assert_eq!(err, RepoError::Session("commit refused".into()));
    assert!(!ctx.has_active_transaction());
    assert_eq!(db.row_count("accounts").unwrap(), 0);
}
