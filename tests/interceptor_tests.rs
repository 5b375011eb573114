/// Method interceptor tests
///
/// A service decorated with a transactional proxy: type-level and method-level
/// attributes, rollback of partial work and pass-through on missing metadata.
/// Run with: cargo test --test interceptor_tests

use serde::{Deserialize, Serialize};

use rustrepo::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: Option<i64>,
    owner: String,
    balance: i64,
}

impl Entity for Account {
    const TABLE: &'static str = "accounts";

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE, Self::ID_COLUMN)
            .required("owner", DataType::Text)
            .column("balance", DataType::Integer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AuditEntry {
    id: Option<i64>,
    message: String,
}

impl Entity for AuditEntry {
    const TABLE: &'static str = "audit_log";

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE, Self::ID_COLUMN).required("message", DataType::Text)
    }
}

const BANK_METADATA: &str = r#"{
    "typeLevel": { "propagation": "REQUIRED" },
    "methods": {
        "record_audit": { "propagation": "REQUIRES_NEW" },
        "total": { "propagation": "SUPPORTS", "readOnly": true }
    }
}"#;

trait Bank {
    fn open_account(&self, ctx: &mut TransactionContext, owner: &str, balance: i64)
    -> Result<Account>;

    fn transfer(&self, ctx: &mut TransactionContext, from: i64, to: i64, amount: i64)
    -> Result<()>;

    fn record_audit(&self, ctx: &mut TransactionContext, message: &str) -> Result<()>;

    fn total(&self, ctx: &mut TransactionContext) -> Result<i64>;
}

struct BankService {
    accounts: Repository<Account>,
    audit: Repository<AuditEntry>,
    metadata: &'static str,
}

impl Transactional for BankService {
    fn transaction_metadata(&self) -> Result<TransactionMetadata> {
        TransactionMetadata::from_json(self.metadata)
    }
}

impl Bank for BankService {
    fn open_account(
        &self,
        ctx: &mut TransactionContext,
        owner: &str,
        balance: i64,
    ) -> Result<Account> {
        self.accounts.save(
            ctx,
            &Account {
                id: None,
                owner: owner.to_string(),
                balance,
            },
        )
    }

    /// Credits first, then checks the source; a failed check leaves the
    /// credit behind unless the call runs in a unit of work.
    fn transfer(&self, ctx: &mut TransactionContext, from: i64, to: i64, amount: i64) -> Result<()> {
        let mut target = self.accounts.get_by_id(ctx, to)?;
        target.balance += amount;
        self.accounts.save(ctx, &target)?;

        let mut source = self.accounts.get_by_id(ctx, from)?;
        if source.balance < amount {
            return Err(RepoError::application(
                "bank.insufficient_funds",
                format!("account {} holds {}", from, source.balance),
            ));
        }
        source.balance -= amount;
        self.accounts.save(ctx, &source)?;
        Ok(())
    }

    fn record_audit(&self, ctx: &mut TransactionContext, message: &str) -> Result<()> {
        self.audit.save(
            ctx,
            &AuditEntry {
                id: None,
                message: message.to_string(),
            },
        )?;
        Ok(())
    }

    fn total(&self, ctx: &mut TransactionContext) -> Result<i64> {
        Ok(self
            .accounts
            .find_all(ctx)?
            .iter()
            .map(|account| account.balance)
            .sum())
    }
}

impl Bank for TransactionalProxy<BankService> {
    fn open_account(
        &self,
        ctx: &mut TransactionContext,
        owner: &str,
        balance: i64,
    ) -> Result<Account> {
        self.invoke(ctx, "open_account", |bank, ctx| bank.open_account(ctx, owner, balance))
    }

    fn transfer(&self, ctx: &mut TransactionContext, from: i64, to: i64, amount: i64) -> Result<()> {
        self.invoke(ctx, "transfer", |bank, ctx| bank.transfer(ctx, from, to, amount))
    }

    fn record_audit(&self, ctx: &mut TransactionContext, message: &str) -> Result<()> {
        self.invoke(ctx, "record_audit", |bank, ctx| bank.record_audit(ctx, message))
    }

    fn total(&self, ctx: &mut TransactionContext) -> Result<i64> {
        self.invoke(ctx, "total", |bank, ctx| bank.total(ctx))
    }
}

fn runtime() -> Runtime {
    Runtime::builder(RuntimeConfig::default())
        .entity::<Account>()
        .entity::<AuditEntry>()
        .repository(RepositoryDefinition::new("AccountRepository", "accounts"))
        .repository(RepositoryDefinition::new("AuditRepository", "audit_log"))
        .build()
        .unwrap()
}

fn service(rt: &Runtime, metadata: &'static str) -> BankService {
    BankService {
        accounts: rt.repository("AccountRepository").unwrap(),
        audit: rt.repository("AuditRepository").unwrap(),
        metadata,
    }
}

fn balance(rt: &Runtime, id: i64) -> i64 {
    let accounts: Repository<Account> = rt.repository("AccountRepository").unwrap();
    accounts
        .get_by_id(&mut rt.new_context(), id)
        .unwrap()
        .balance
}

#[test]
fn test_transfer_commits_both_legs() {
    let rt = runtime();
    let bank = rt.proxy_factory().create_proxy(service(&rt, BANK_METADATA)).unwrap();
    let mut ctx = rt.new_context();

    let alice = bank.open_account(&mut ctx, "alice", 100).unwrap();
    let bob = bank.open_account(&mut ctx, "bob", 0).unwrap();
    let begins = rt.database().stats().begins;

    bank.transfer(&mut ctx, alice.id.unwrap(), bob.id.unwrap(), 40)
        .unwrap();

    assert_eq!(balance(&rt, alice.id.unwrap()), 60);
    assert_eq!(balance(&rt, bob.id.unwrap()), 40);
    // Four statements, one physical transaction.
    assert_eq!(rt.database().stats().begins, begins + 1);
    assert!(!ctx.has_active_transaction());
}

#[test]
fn test_failed_transfer_rolls_back_partial_work() {
    let rt = runtime();
    let bank = rt.proxy_factory().create_proxy(service(&rt, BANK_METADATA)).unwrap();
    let mut ctx = rt.new_context();
    let alice = bank.open_account(&mut ctx, "alice", 100).unwrap().id.unwrap();
    let bob = bank.open_account(&mut ctx, "bob", 0).unwrap().id.unwrap();

    let err = bank.transfer(&mut ctx, alice, bob, 500).unwrap_err();
    assert_eq!(err.kind(), "bank.insufficient_funds");
    assert_eq!(balance(&rt, bob), 0);

    // The undecorated target commits each statement on its own.
    let err = bank.target().transfer(&mut ctx, alice, bob, 500).unwrap_err();
    assert_eq!(err.kind(), "bank.insufficient_funds");
    assert_eq!(balance(&rt, bob), 500);
}

#[test]
fn test_requires_new_method_survives_caller_rollback() {
    let rt = runtime();
    let bank = rt.proxy_factory().create_proxy(service(&rt, BANK_METADATA)).unwrap();
    let audit: Repository<AuditEntry> = rt.repository("AuditRepository").unwrap();
    let mut ctx = rt.new_context();

    let result: Result<()> =
        rt.manager()
            .execute_in_transaction(&mut ctx, &TransactionDescriptor::required(), |ctx| {
                bank.open_account(ctx, "carol", 10)?;
                bank.record_audit(ctx, "carol opened an account")?;
                Err(RepoError::application("bank.rejected", "compliance check failed"))
            });
    assert!(result.is_err());

    let mut ctx = rt.new_context();
    assert_eq!(audit.count(&mut ctx).unwrap(), 1);
    assert_eq!(bank.total(&mut ctx).unwrap(), 0);
    assert_eq!(rt.database().row_count("accounts").unwrap(), 0);
}

#[test]
fn test_method_attributes_override_type_level() {
    let rt = runtime();
    let bank = rt.proxy_factory().create_proxy(service(&rt, BANK_METADATA)).unwrap();
    let metadata = bank.metadata().unwrap();

    let transfer = metadata.descriptor_for("transfer").unwrap();
    assert_eq!(transfer.propagation, Propagation::Required);
    assert!(!transfer.read_only);

    let total = metadata.descriptor_for("total").unwrap();
    assert_eq!(total.propagation, Propagation::Supports);
    assert!(total.read_only);

    // SUPPORTS without a caller transaction runs without one.
    let begins = rt.database().stats().begins;
    assert_eq!(bank.total(&mut rt.new_context()).unwrap(), 0);
    assert_eq!(rt.database().stats().begins, begins);
}

#[test]
fn test_unsupported_isolation_is_rejected_at_creation() {
    let rt = runtime();
    let metadata = TransactionMetadata::new().method(
        "transfer",
        TransactionDescriptor::required().isolation(Isolation::ReadUncommitted),
    );
    let err = rt
        .proxy_factory()
        .create_proxy_with(service(&rt, BANK_METADATA), metadata)
        .err()
        .unwrap();
    assert!(matches!(err.error, RepoError::Configuration(_)));

    // The rejected service is handed back and still usable undecorated.
    let bank = err.into_target();
    let mut ctx = rt.new_context();
    let alice = bank.open_account(&mut ctx, "alice", 100).unwrap();
    assert_eq!(balance(&rt, alice.id.unwrap()), 100);
    let proxy = rt.proxy_factory().create_proxy(bank).unwrap();
    assert!(!proxy.is_pass_through());
}

#[test]
fn test_unreadable_metadata_gives_pass_through_proxy() {
    let rt = runtime();
    let bank = rt
        .proxy_factory()
        .create_proxy(service(&rt, "{ not json"))
        .unwrap();
    assert!(bank.is_pass_through());

    let mut ctx = rt.new_context();
    let alice = bank.open_account(&mut ctx, "alice", 100).unwrap().id.unwrap();
    let bob = bank.open_account(&mut ctx, "bob", 0).unwrap().id.unwrap();
    assert!(bank.transfer(&mut ctx, alice, bob, 500).is_err());
    assert_eq!(balance(&rt, bob), 500);
}

#[test]
fn test_proxies_are_cloneable_when_targets_are() {
    #[derive(Clone)]
    struct Clock;

    impl Transactional for Clock {
        fn transaction_metadata(&self) -> Result<TransactionMetadata> {
            Ok(TransactionMetadata::for_type(
                TransactionDescriptor::new(Propagation::Mandatory),
            ))
        }
    }

    let rt = runtime();
    let proxy = rt.proxy_factory().create_proxy(Clock).unwrap();
    let copy = proxy.clone();
    let err = copy
        .invoke(&mut rt.new_context(), "tick", |_, _| Ok::<_, RepoError>(()))
        .unwrap_err();
    assert!(matches!(err, RepoError::IllegalTransactionState(_)));
}
