pub mod call;
pub mod crud;
pub mod definition;
pub mod dispatcher;
pub mod entity;
pub mod paging;

pub use call::{Arg, Resolved};
pub use crud::{CrudOp, SimpleRepository};
pub use definition::{MethodSignature, Param, ParamKind, RepositoryDefinition, ReturnShape};
pub use dispatcher::{RepositoryBinding, RepositoryDispatcher};
pub use entity::Entity;
pub use paging::{Pageable, Sort};

use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::{Result, Value};
use crate::transaction::TransactionContext;

/// Typed handle on one bound repository interface.
///
/// Every method goes through [`RepositoryDispatcher::resolve`], so typed and
/// untyped callers share routing and transaction behaviour.
pub struct Repository<E: Entity> {
    interface: String,
    dispatcher: Arc<RepositoryDispatcher>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            interface: self.interface.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub(crate) fn new(interface: impl Into<String>, dispatcher: Arc<RepositoryDispatcher>) -> Self {
        Self {
            interface: interface.into(),
            dispatcher,
            _entity: PhantomData,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Calls any repository method by name.
    pub fn call(
        &self,
        ctx: &mut TransactionContext,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Resolved> {
        self.dispatcher.resolve(ctx, &self.interface, method, args)
    }

    /// Calls a method returning a collection.
    pub fn find(&self, ctx: &mut TransactionContext, method: &str, args: Vec<Arg>) -> Result<Vec<E>> {
        self.call(ctx, method, args)?.into_entities()
    }

    /// Calls a method returning at most one entity.
    pub fn find_one(
        &self,
        ctx: &mut TransactionContext,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Option<E>> {
        self.call(ctx, method, args)?.into_optional_entity()
    }

    pub fn save(&self, ctx: &mut TransactionContext, entity: &E) -> Result<E> {
        self.call(ctx, "save", vec![Arg::Entity(entity.to_row()?)])?
            .into_entity()
    }

    pub fn save_and_flush(&self, ctx: &mut TransactionContext, entity: &E) -> Result<E> {
        self.call(ctx, "saveAndFlush", vec![Arg::Entity(entity.to_row()?)])?
            .into_entity()
    }

    pub fn save_all(&self, ctx: &mut TransactionContext, entities: &[E]) -> Result<Vec<E>> {
        let rows = entities
            .iter()
            .map(Entity::to_row)
            .collect::<Result<Vec<_>>>()?;
        self.call(ctx, "saveAll", vec![Arg::Entities(rows)])?
            .into_entities()
    }

    pub fn find_by_id(&self, ctx: &mut TransactionContext, id: impl Into<Value>) -> Result<Option<E>> {
        self.find_one(ctx, "findById", vec![Arg::Value(id.into())])
    }

    pub fn get_by_id(&self, ctx: &mut TransactionContext, id: impl Into<Value>) -> Result<E> {
        self.call(ctx, "getById", vec![Arg::Value(id.into())])?
            .into_entity()
    }

    pub fn exists_by_id(&self, ctx: &mut TransactionContext, id: impl Into<Value>) -> Result<bool> {
        self.call(ctx, "existsById", vec![Arg::Value(id.into())])?
            .into_bool()
    }

    pub fn find_all(&self, ctx: &mut TransactionContext) -> Result<Vec<E>> {
        self.find(ctx, "findAll", Vec::new())
    }

    pub fn find_all_paged(
        &self,
        ctx: &mut TransactionContext,
        page: Pageable,
        sort: Option<Sort>,
    ) -> Result<Vec<E>> {
        let mut args = vec![Arg::Page(page)];
        args.extend(sort.map(Arg::Sort));
        self.find(ctx, "findAll", args)
    }

    pub fn find_all_sorted(&self, ctx: &mut TransactionContext, sort: Sort) -> Result<Vec<E>> {
        self.find(ctx, "findAll", vec![Arg::Sort(sort)])
    }

    pub fn find_all_by_id(&self, ctx: &mut TransactionContext, ids: Vec<Value>) -> Result<Vec<E>> {
        self.find(ctx, "findAllById", vec![Arg::Values(ids)])
    }

    pub fn count(&self, ctx: &mut TransactionContext) -> Result<u64> {
        self.call(ctx, "count", Vec::new())?.into_count()
    }

    pub fn delete(&self, ctx: &mut TransactionContext, entity: &E) -> Result<()> {
        self.call(ctx, "delete", vec![Arg::Entity(entity.to_row()?)])?;
        Ok(())
    }

    pub fn delete_by_id(&self, ctx: &mut TransactionContext, id: impl Into<Value>) -> Result<()> {
        self.call(ctx, "deleteById", vec![Arg::Value(id.into())])?;
        Ok(())
    }

    pub fn delete_all(&self, ctx: &mut TransactionContext) -> Result<()> {
        self.call(ctx, "deleteAll", Vec::new())?;
        Ok(())
    }

    pub fn delete_all_by_id(&self, ctx: &mut TransactionContext, ids: Vec<Value>) -> Result<()> {
        self.call(ctx, "deleteAllById", vec![Arg::Values(ids)])?;
        Ok(())
    }

    pub fn flush(&self, ctx: &mut TransactionContext) -> Result<()> {
        self.call(ctx, "flush", Vec::new())?;
        Ok(())
    }
}
