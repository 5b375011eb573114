// ============================================================================
// Method interception
// ============================================================================
//
// A `TransactionalProxy<T>` holds the real target plus its transaction
// metadata. The capability trait of the target is implemented for the proxy
// by hand, each method forwarding through `invoke`:
//
//   impl AccountService for TransactionalProxy<AccountServiceImpl> {
//       fn transfer(&self, ctx: &mut TransactionContext, ..) -> Result<(), E> {
//           self.invoke(ctx, "transfer", |target, ctx| target.transfer(ctx, ..))
//       }
//   }
//
// Methods with a descriptor run through the propagation engine; the rest are
// forwarded untouched. Failures of the target come back unchanged.
//
// ============================================================================

pub mod metadata;

pub use metadata::{TransactionMetadata, Transactional};

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{Failure, RepoError, Result};
use crate::transaction::{TransactionContext, TransactionManager};

pub struct TransactionalProxy<T> {
    target: T,
    manager: Arc<TransactionManager>,
    /// `None` for a pass-through proxy.
    metadata: Option<Arc<TransactionMetadata>>,
}

impl<T> TransactionalProxy<T> {
    fn pass_through(target: T, manager: Arc<TransactionManager>) -> Self {
        Self {
            target,
            manager,
            metadata: None,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_inner(self) -> T {
        self.target
    }

    pub fn metadata(&self) -> Option<&TransactionMetadata> {
        self.metadata.as_deref()
    }

    /// True when the proxy forwards every call without interception.
    pub fn is_pass_through(&self) -> bool {
        self.metadata.is_none()
    }

    /// Calls `method` on the target, inside a unit of work when the method
    /// carries transaction metadata.
    pub fn invoke<R, E, F>(
        &self,
        ctx: &mut TransactionContext,
        method: &str,
        call: F,
    ) -> std::result::Result<R, E>
    where
        E: Failure + From<RepoError>,
        F: FnOnce(&T, &mut TransactionContext) -> std::result::Result<R, E>,
    {
        let descriptor = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.descriptor_for(method));

        match descriptor {
            Some(descriptor) => {
                debug!(
                    target_type = type_name::<T>(),
                    method,
                    propagation = ?descriptor.propagation,
                    "intercepting transactional call"
                );
                let target = &self.target;
                self.manager
                    .execute_in_transaction(ctx, descriptor, |ctx| call(target, ctx))
            }
            None => call(&self.target, ctx),
        }
    }
}

impl<T: Clone> Clone for TransactionalProxy<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            manager: Arc::clone(&self.manager),
            metadata: self.metadata.clone(),
        }
    }
}

/// A proxy that could not be created, handing the target back.
#[derive(Error)]
#[error("{error}")]
pub struct ProxyError<T> {
    pub error: RepoError,
    pub target: T,
}

impl<T> ProxyError<T> {
    pub fn into_target(self) -> T {
        self.target
    }
}

impl<T> fmt::Debug for ProxyError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyError")
            .field("error", &self.error)
            .field("target", &type_name::<T>())
            .finish()
    }
}

impl<T> From<ProxyError<T>> for RepoError {
    fn from(err: ProxyError<T>) -> Self {
        err.error
    }
}

/// Wraps targets in [`TransactionalProxy`] decorators.
#[derive(Clone)]
pub struct ProxyFactory {
    manager: Arc<TransactionManager>,
}

impl ProxyFactory {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    /// Wraps `target` using the metadata it reports.
    ///
    /// If the metadata cannot be obtained the target is still returned, wrapped
    /// in a pass-through proxy. Isolation levels the session factory cannot
    /// apply are a configuration error that hands the target back.
    pub fn create_proxy<T: Transactional>(
        &self,
        target: T,
    ) -> std::result::Result<TransactionalProxy<T>, ProxyError<T>> {
        match target.transaction_metadata() {
            Ok(metadata) => self.create_proxy_with(target, metadata),
            Err(err) => {
                warn!(
                    target_type = type_name::<T>(),
                    error = %err,
                    "transaction metadata unavailable, calls will not be intercepted"
                );
                Ok(TransactionalProxy::pass_through(
                    target,
                    Arc::clone(&self.manager),
                ))
            }
        }
    }

    /// Wraps `target` with explicitly supplied metadata.
    pub fn create_proxy_with<T>(
        &self,
        target: T,
        metadata: TransactionMetadata,
    ) -> std::result::Result<TransactionalProxy<T>, ProxyError<T>> {
        if let Err(error) = self.validate(&metadata) {
            return Err(ProxyError { error, target });
        }
        debug!(
            target_type = type_name::<T>(),
            methods = metadata.methods.len(),
            type_level = metadata.type_level.is_some(),
            "transactional proxy created"
        );
        Ok(TransactionalProxy {
            target,
            manager: Arc::clone(&self.manager),
            metadata: Some(Arc::new(metadata)),
        })
    }

    /// Checks every descriptor in `metadata` against the session factory.
    pub fn validate(&self, metadata: &TransactionMetadata) -> Result<()> {
        for descriptor in metadata.descriptors() {
            self.manager.validate(descriptor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, TableSchema};
    use crate::storage::MemoryDatabase;
    use crate::transaction::{Isolation, TransactionDescriptor};

    struct Target {
        metadata: Result<TransactionMetadata>,
    }

    impl Transactional for Target {
        fn transaction_metadata(&self) -> Result<TransactionMetadata> {
            self.metadata.clone()
        }
    }

    fn factory() -> (MemoryDatabase, ProxyFactory) {
        let db = MemoryDatabase::new();
        db.create_table(TableSchema::new("t", "id").column("v", DataType::Text))
            .unwrap();
        let manager = Arc::new(TransactionManager::new(Arc::new(db.clone())));
        (db, ProxyFactory::new(manager))
    }

    #[test]
    fn test_annotated_method_runs_in_transaction() {
        let (db, factory) = factory();
        let proxy = factory
            .create_proxy(Target {
                metadata: Ok(TransactionMetadata::new()
                    .method("write", TransactionDescriptor::required())),
            })
            .unwrap();
        let mut ctx = TransactionContext::new();

        let depth = proxy
            .invoke(&mut ctx, "write", |_, ctx| Ok::<_, RepoError>(ctx.depth()))
            .unwrap();
        assert_eq!(depth, 1);
        let depth = proxy
            .invoke(&mut ctx, "read", |_, ctx| Ok::<_, RepoError>(ctx.depth()))
            .unwrap();
        assert_eq!(depth, 0);
        assert_eq!(db.stats().begins, 1);
    }

    #[test]
    fn test_metadata_failure_gives_pass_through() {
        let (db, factory) = factory();
        let proxy = factory
            .create_proxy(Target {
                metadata: Err(RepoError::Configuration("unreadable".into())),
            })
            .unwrap();
        assert!(proxy.is_pass_through());
        let mut ctx = TransactionContext::new();
        let depth = proxy
            .invoke(&mut ctx, "write", |_, ctx| Ok::<_, RepoError>(ctx.depth()))
            .unwrap();
        assert_eq!(depth, 0);
        assert_eq!(db.stats().sessions_opened, 0);
    }

    #[test]
    fn test_unsupported_isolation_is_fatal() {
        let (_, factory) = factory();
        let result = factory.create_proxy(Target {
            metadata: Ok(TransactionMetadata::for_type(
                TransactionDescriptor::required().isolation(Isolation::ReadUncommitted),
            )),
        });
        let err = result.err().unwrap();
        assert!(matches!(err.error, RepoError::Configuration(_)));
        assert!(err.into_target().metadata.is_ok());
    }

    #[test]
    fn test_validate_without_a_target() {
        let (_, factory) = factory();
        let good = TransactionMetadata::new().method("write", TransactionDescriptor::required());
        assert!(factory.validate(&good).is_ok());

        let bad = TransactionMetadata::new().method(
            "write",
            TransactionDescriptor::required().isolation(Isolation::ReadUncommitted),
        );
        let err: RepoError = factory
            .create_proxy_with(Target { metadata: Ok(bad.clone()) }, bad)
            .err()
            .unwrap()
            .into();
        assert!(matches!(err, RepoError::Configuration(_)));
    }
}
