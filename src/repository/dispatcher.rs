// ============================================================================
// Repository dispatch
// ============================================================================
//
// Routing order for a call `interface.method(args)`:
//
//   1. the method declares a query template   -> run the template
//   2. the method name is a generic CRUD name  -> SimpleRepository
//   3. otherwise                               -> derived query
//
// Declared methods are routed and derived once, when the repository is bound.
// Undeclared names are derived per call with the shape implied by their
// prefix.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    Arg, CrudOp, MethodSignature, Pageable, ParamKind, RepositoryDefinition, Resolved,
    ReturnShape, SimpleRepository, Sort,
};
use crate::core::{RepoError, Result, Row, TableSchema, Value};
use crate::query::{self, Operation, Order, QueryDescriptor};
use crate::session::{Params, QueryOutcome};
use crate::transaction::{Access, TransactionContext, TransactionManager};

#[derive(Debug, Clone)]
enum Route {
    Template {
        signature: MethodSignature,
        template: String,
        access: Access,
    },
    Crud(CrudOp),
    Derived {
        signature: MethodSignature,
        descriptor: QueryDescriptor,
    },
}

/// A repository interface bound to its table, with every declared method
/// routed.
#[derive(Debug)]
pub struct RepositoryBinding {
    interface: String,
    crud: SimpleRepository,
    routes: HashMap<String, Route>,
}

impl RepositoryBinding {
    /// Routes every declared method, deriving queries eagerly.
    pub fn bind(definition: RepositoryDefinition, schema: TableSchema) -> Result<Self> {
        if definition.entity != schema.name() {
            return Err(RepoError::Configuration(format!(
                "Repository {} is declared for '{}' but bound to table '{}'",
                definition.interface,
                definition.entity,
                schema.name()
            )));
        }

        let interface = definition.interface;
        let mut routes = HashMap::with_capacity(definition.methods.len());
        for signature in definition.methods {
            let name = signature.name.clone();
            if routes.contains_key(&name) {
                return Err(RepoError::Configuration(format!(
                    "Method {}.{} is declared more than once",
                    interface, name
                )));
            }
            let route = route_for(&interface, schema.name(), signature)?;
            routes.insert(name, route);
        }

        info!(
            interface = %interface,
            entity = schema.name(),
            methods = routes.len(),
            "repository bound"
        );
        Ok(Self {
            interface,
            crud: SimpleRepository::new(schema),
            routes,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn entity(&self) -> &str {
        self.crud.schema().name()
    }

    pub fn schema(&self) -> &TableSchema {
        self.crud.schema()
    }

    /// The derived query of a declared method.
    pub fn descriptor(&self, method: &str) -> Option<&QueryDescriptor> {
        match self.routes.get(method) {
            Some(Route::Derived { descriptor, .. }) => Some(descriptor),
            _ => None,
        }
    }

    pub fn declared_methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

fn route_for(interface: &str, entity: &str, signature: MethodSignature) -> Result<Route> {
    let fail = |reason: String| RepoError::Derivation {
        interface: interface.to_string(),
        method: signature.name.clone(),
        reason,
    };
    if signature.count_kind(ParamKind::Pageable) > 1 || signature.count_kind(ParamKind::Sort) > 1
    {
        return Err(fail("at most one page request and one sort are allowed".into()));
    }

    if let Some(template) = &signature.query {
        if signature.count_kind(ParamKind::Sort) > 0 {
            return Err(fail("query templates define their own ordering".into()));
        }
        let access = if template
            .trim_start()
            .get(..6)
            .is_some_and(|keyword| keyword.eq_ignore_ascii_case("select"))
        {
            Access::Read
        } else {
            Access::Write
        };
        let template = template.clone();
        return Ok(Route::Template {
            signature,
            template,
            access,
        });
    }

    if let Some(op) = CrudOp::from_name(&signature.name) {
        return Ok(Route::Crud(op));
    }

    let descriptor = query::derive(interface, entity, &signature.name)?;
    if !shape_allowed(descriptor.operation, signature.returns) {
        return Err(fail(format!(
            "a {} query cannot return {:?}",
            descriptor.operation, signature.returns
        )));
    }
    if signature.value_params() != descriptor.parameter_count() {
        return Err(fail(format!(
            "declares {} value parameter(s) but the name binds {}",
            signature.value_params(),
            descriptor.parameter_count()
        )));
    }
    if descriptor.operation != Operation::Select
        && signature
            .params
            .iter()
            .any(|p| p.kind != ParamKind::Value)
    {
        return Err(fail(format!(
            "page and sort parameters only apply to select queries, not {}",
            descriptor.operation
        )));
    }
    Ok(Route::Derived {
        signature,
        descriptor,
    })
}

fn shape_allowed(operation: Operation, shape: ReturnShape) -> bool {
    matches!(
        (operation, shape),
        (Operation::Select, ReturnShape::Optional | ReturnShape::Collection)
            | (Operation::Count, ReturnShape::Count)
            | (Operation::Exists, ReturnShape::Boolean)
            | (Operation::Delete, ReturnShape::Void | ReturnShape::Count)
    )
}

/// Shape of an undeclared derived method, implied by its prefix.
fn implied_shape(descriptor: &QueryDescriptor) -> ReturnShape {
    match descriptor.operation {
        Operation::Select if descriptor.limit == Some(1) => ReturnShape::Optional,
        Operation::Select => ReturnShape::Collection,
        Operation::Count | Operation::Delete => ReturnShape::Count,
        Operation::Exists => ReturnShape::Boolean,
    }
}

/// Routes repository calls for every bound interface.
pub struct RepositoryDispatcher {
    manager: Arc<TransactionManager>,
    bindings: HashMap<String, Arc<RepositoryBinding>>,
}

impl RepositoryDispatcher {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            bindings: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn bind(&mut self, definition: RepositoryDefinition, schema: TableSchema) -> Result<()> {
        self.register(RepositoryBinding::bind(definition, schema)?)
    }

    pub fn register(&mut self, binding: RepositoryBinding) -> Result<()> {
        if self.bindings.contains_key(binding.interface()) {
            return Err(RepoError::Configuration(format!(
                "Repository {} is already registered",
                binding.interface()
            )));
        }
        self.bindings
            .insert(binding.interface().to_string(), Arc::new(binding));
        Ok(())
    }

    pub fn binding(&self, interface: &str) -> Option<&RepositoryBinding> {
        self.bindings.get(interface).map(Arc::as_ref)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Resolves and runs `interface.method(args)`.
    ///
    /// Runs inside the current unit of work when `ctx` has one; otherwise
    /// reads use a short-lived session and writes a short-lived transaction.
    pub fn resolve(
        &self,
        ctx: &mut TransactionContext,
        interface: &str,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Resolved> {
        let binding = self
            .bindings
            .get(interface)
            .ok_or_else(|| RepoError::UnsupportedMethod {
                interface: interface.to_string(),
                method: method.to_string(),
            })?;

        match binding.routes.get(method) {
            Some(Route::Template {
                signature,
                template,
                access,
            }) => self.run_template(ctx, signature, template, *access, args),
            Some(Route::Crud(op)) => self.run_crud(ctx, binding, *op, method, args),
            Some(Route::Derived {
                signature,
                descriptor,
            }) => self.run_derived(ctx, method, descriptor, signature.returns, args),
            None => {
                if let Some(op) = CrudOp::from_name(method) {
                    return self.run_crud(ctx, binding, op, method, args);
                }
                let descriptor = query::derive(interface, binding.entity(), method)?;
                let shape = implied_shape(&descriptor);
                self.run_derived(ctx, method, &descriptor, shape, args)
            }
        }
    }

    fn run_template(
        &self,
        ctx: &mut TransactionContext,
        signature: &MethodSignature,
        template: &str,
        access: Access,
        args: Vec<Arg>,
    ) -> Result<Resolved> {
        let method = signature.name.as_str();
        if args.iter().any(|arg| matches!(arg, Arg::Sort(_))) {
            return Err(invalid(method, "query templates define their own ordering"));
        }
        if args.len() != signature.params.len() {
            return Err(invalid(
                method,
                format!(
                    "expected {} argument(s), got {}",
                    signature.params.len(),
                    args.len()
                ),
            ));
        }

        let mut params = Params::new();
        let mut page = None;
        for (param, arg) in signature.params.iter().zip(args) {
            match (param.kind, arg) {
                (ParamKind::Value, Arg::Value(value)) => match &param.name {
                    Some(name) => params.insert(name.clone(), value),
                    None => params.push(value),
                },
                (ParamKind::Pageable, Arg::Page(p)) => page = Some(p),
                (kind, arg) => {
                    return Err(invalid(
                        method,
                        format!("expected a {:?} argument, got a {}", kind, arg.kind_name()),
                    ));
                }
            }
        }

        let (first, max) = match page {
            Some(page) => (Some(page.offset()), Some(page.size())),
            None => (None, None),
        };
        debug!(method, sql = template, "executing query template");
        let outcome = self.manager.with_session(ctx, access, |session| {
            session.execute(template, &params, first, max)
        })?;
        adapt(signature.returns, outcome)
    }

    fn run_derived(
        &self,
        ctx: &mut TransactionContext,
        method: &str,
        descriptor: &QueryDescriptor,
        shape: ReturnShape,
        args: Vec<Arg>,
    ) -> Result<Resolved> {
        let call = CallArgs::split(method, args)?;
        if call.values.len() != descriptor.parameter_count() {
            return Err(invalid(
                method,
                format!(
                    "expected {} argument(s), got {}",
                    descriptor.parameter_count(),
                    call.values.len()
                ),
            ));
        }
        if descriptor.operation != Operation::Select && (call.page.is_some() || call.sort.is_some())
        {
            return Err(invalid(
                method,
                format!("page and sort only apply to select queries, not {}", descriptor.operation),
            ));
        }

        let orders: Vec<Order> = match &call.sort {
            Some(sort) => {
                sort.validate(method)?;
                sort.orders().to_vec()
            }
            None => Vec::new(),
        };
        let sql = query::render(descriptor, &orders);
        let params = query::bind(descriptor, call.values)?;
        let (first, max) = match call.page {
            Some(page) => {
                let (first, max) = page.window(descriptor.limit);
                (Some(first), Some(max))
            }
            None => (descriptor.offset, descriptor.limit),
        };
        let access = if descriptor.is_write() {
            Access::Write
        } else {
            Access::Read
        };

        debug!(method, sql = %sql, "executing derived query");
        let outcome = self.manager.with_session(ctx, access, |session| {
            session.execute(&sql, &params, first, max)
        })?;
        adapt(shape, outcome)
    }

    fn run_crud(
        &self,
        ctx: &mut TransactionContext,
        binding: &RepositoryBinding,
        op: CrudOp,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Resolved> {
        let repo = &binding.crud;
        let access = op.access();
        let manager = &self.manager;
        let flush = CrudOp::flushes(method);

        match op {
            CrudOp::Save => {
                let row = expect_entity(method, args)?;
                manager
                    .with_session(ctx, access, |session| {
                        let saved = repo.save(session, row)?;
                        if flush {
                            session.flush()?;
                        }
                        Ok(saved)
                    })
                    .map(Resolved::Row)
            }
            CrudOp::SaveAll => {
                let rows = expect_entities(method, args)?;
                manager
                    .with_session(ctx, access, |session| {
                        let saved = rows
                            .into_iter()
                            .map(|row| repo.save(session, row))
                            .collect::<Result<Vec<_>>>()?;
                        if flush {
                            session.flush()?;
                        }
                        Ok(saved)
                    })
                    .map(Resolved::Rows)
            }
            CrudOp::FindById => {
                let id = expect_value(method, args)?;
                manager
                    .with_session(ctx, access, |session| repo.find_by_id(session, &id))
                    .map(Resolved::Optional)
            }
            CrudOp::GetById => {
                let id = expect_value(method, args)?;
                manager
                    .with_session(ctx, access, |session| repo.find_by_id(session, &id))?
                    .map(Resolved::Row)
                    .ok_or_else(|| RepoError::EntityNotFound {
                        entity: binding.entity().to_string(),
                        id: id.to_string(),
                    })
            }
            CrudOp::ExistsById => {
                let id = expect_value(method, args)?;
                manager
                    .with_session(ctx, access, |session| repo.exists_by_id(session, &id))
                    .map(Resolved::Bool)
            }
            CrudOp::FindAll => {
                let call = CallArgs::split(method, args)?;
                if !call.values.is_empty() {
                    return Err(invalid(method, "only a page request and a sort are accepted"));
                }
                if let Some(sort) = &call.sort {
                    sort.validate(method)?;
                }
                manager
                    .with_session(ctx, access, |session| {
                        repo.find_all(session, call.page, call.sort.as_ref())
                    })
                    .map(Resolved::Rows)
            }
            CrudOp::FindAllById => {
                let ids = expect_values(method, args)?;
                manager
                    .with_session(ctx, access, |session| repo.find_all_by_id(session, &ids))
                    .map(Resolved::Rows)
            }
            CrudOp::Count => {
                expect_none(method, args)?;
                manager
                    .with_session(ctx, access, |session| repo.count(session))
                    .map(Resolved::Count)
            }
            CrudOp::Delete => {
                let row = expect_entity(method, args)?;
                manager.with_session(ctx, access, |session| repo.delete(session, &row))?;
                Ok(Resolved::Unit)
            }
            CrudOp::DeleteById => {
                let id = expect_value(method, args)?;
                manager.with_session(ctx, access, |session| repo.delete_by_id(session, &id))?;
                Ok(Resolved::Unit)
            }
            CrudOp::DeleteAll => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (None, _) => {
                        manager.with_session(ctx, access, |session| repo.delete_all(session))?;
                    }
                    (Some(Arg::Entities(rows)), None) => {
                        manager.with_session(ctx, access, |session| {
                            repo.delete_all_entities(session, &rows)
                        })?;
                    }
                    _ => {
                        return Err(invalid(method, "expected no argument or an entity list"));
                    }
                }
                Ok(Resolved::Unit)
            }
            CrudOp::DeleteAllById => {
                let ids = expect_values(method, args)?;
                manager.with_session(ctx, access, |session| {
                    repo.delete_all_by_id(session, &ids)
                })?;
                Ok(Resolved::Unit)
            }
            CrudOp::Flush => {
                expect_none(method, args)?;
                manager.with_session(ctx, access, |session| session.flush())?;
                Ok(Resolved::Unit)
            }
        }
    }
}

/// Value arguments plus the optional page request and sort of one call.
struct CallArgs {
    values: Vec<Value>,
    page: Option<Pageable>,
    sort: Option<Sort>,
}

impl CallArgs {
    fn split(method: &str, args: Vec<Arg>) -> Result<Self> {
        let mut call = CallArgs {
            values: Vec::with_capacity(args.len()),
            page: None,
            sort: None,
        };
        for arg in args {
            match arg {
                Arg::Value(value) => call.values.push(value),
                Arg::Page(page) if call.page.is_none() => call.page = Some(page),
                Arg::Sort(sort) if call.sort.is_none() => call.sort = Some(sort),
                other => {
                    return Err(invalid(
                        method,
                        format!("unexpected {} argument", other.kind_name()),
                    ));
                }
            }
        }
        Ok(call)
    }
}

fn adapt(shape: ReturnShape, outcome: QueryOutcome) -> Result<Resolved> {
    Ok(match shape {
        ReturnShape::Optional => Resolved::Optional(outcome.into_rows()?.into_iter().next()),
        ReturnShape::Collection => Resolved::Rows(outcome.into_rows()?),
        ReturnShape::Count => Resolved::Count(outcome.into_count()?),
        ReturnShape::Boolean => Resolved::Bool(outcome.into_count()? > 0),
        ReturnShape::Void => Resolved::Unit,
    })
}

fn invalid(method: &str, reason: impl Into<String>) -> RepoError {
    RepoError::InvalidArguments {
        method: method.to_string(),
        reason: reason.into(),
    }
}

fn single(method: &str, args: Vec<Arg>) -> Result<Arg> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg),
        _ => Err(invalid(method, "expected exactly one argument")),
    }
}

fn expect_none(method: &str, args: Vec<Arg>) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(invalid(method, "expected no arguments"))
    }
}

fn expect_value(method: &str, args: Vec<Arg>) -> Result<Value> {
    match single(method, args)? {
        Arg::Value(value) => Ok(value),
        other => Err(invalid(method, format!("expected a value, got a {}", other.kind_name()))),
    }
}

fn expect_values(method: &str, args: Vec<Arg>) -> Result<Vec<Value>> {
    match single(method, args)? {
        Arg::Values(values) => Ok(values),
        other => Err(invalid(
            method,
            format!("expected a value list, got a {}", other.kind_name()),
        )),
    }
}

fn expect_entity(method: &str, args: Vec<Arg>) -> Result<Row> {
    match single(method, args)? {
        Arg::Entity(row) => Ok(row),
        other => Err(invalid(method, format!("expected an entity, got a {}", other.kind_name()))),
    }
}

fn expect_entities(method: &str, args: Vec<Arg>) -> Result<Vec<Row>> {
    match single(method, args)? {
        Arg::Entities(rows) => Ok(rows),
        other => Err(invalid(
            method,
            format!("expected an entity list, got a {}", other.kind_name()),
        )),
    }
}
