// ============================================================================
// SQL text adapter
// ============================================================================
//
// Parses statement text with sqlparser (PostgreSQL dialect) and lowers it to
// the small statement model the memory session evaluates. Placeholders are
// `$n` (1-based position) and `:name`.
//
// ============================================================================

use std::cmp::Ordering;

use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::core::{RepoError, Result, Row, Value};
use crate::session::Params;
use crate::storage::pattern::PatternCache;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Self::Select(s) => &s.table,
            Self::Insert(s) => &s.table,
            Self::Update(s) => &s.table,
            Self::Delete(s) => &s.table,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Select(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub table: String,
    pub projection: Projection,
    pub filter: Option<Predicate>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<Operand>,
    pub offset: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    /// (source column, output name)
    Columns(Vec<(String, String)>),
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Operand>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Operand)>,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
    Positional(usize),
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Like {
        operand: Operand,
        pattern: Operand,
        negated: bool,
        case_insensitive: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Truth(Operand),
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parse(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| RepoError::ParseError(e.to_string()))?;
    if statements.len() != 1 {
        return Err(RepoError::ParseError(format!(
            "Expected exactly one statement, got {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        sql_ast::Statement::Query(query) => Ok(Statement::Select(convert_query(*query)?)),
        sql_ast::Statement::Insert(insert) => Ok(Statement::Insert(convert_insert(insert)?)),
        sql_ast::Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => Ok(Statement::Update(convert_update(table, assignments, selection)?)),
        sql_ast::Statement::Delete(delete) => Ok(Statement::Delete(convert_delete(delete)?)),
        other => Err(RepoError::UnsupportedOperation(format!(
            "Statement type not supported: {}",
            other
        ))),
    }
}

fn convert_query(query: sql_ast::Query) -> Result<SelectStmt> {
    let order_by = convert_order_by(query.order_by)?;
    let (limit, offset) = convert_limit_clause(query.limit_clause)?;

    let sql_ast::SetExpr::Select(select) = *query.body else {
        return Err(RepoError::UnsupportedOperation(
            "Only SELECT queries supported".into(),
        ));
    };
    let select = *select;

    if select.from.len() != 1 || !select.from[0].joins.is_empty() {
        return Err(RepoError::UnsupportedOperation(
            "SELECT must read from exactly one table".into(),
        ));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    Ok(SelectStmt {
        table,
        projection: convert_projection(select.projection)?,
        filter: select.selection.map(convert_predicate).transpose()?,
        order_by,
        limit,
        offset,
    })
}

fn convert_projection(items: Vec<sql_ast::SelectItem>) -> Result<Projection> {
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        let (expr, alias) = match item {
            sql_ast::SelectItem::Wildcard(_) | sql_ast::SelectItem::QualifiedWildcard(..) => {
                return Ok(Projection::All);
            }
            sql_ast::SelectItem::UnnamedExpr(expr) => (expr, None),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value)),
            #[allow(unreachable_patterns)]
            other => {
                return Err(RepoError::UnsupportedOperation(format!(
                    "Unsupported select item: {}",
                    other
                )));
            }
        };
        if let sql_ast::Expr::Function(func) = &expr
            && func.name.to_string().eq_ignore_ascii_case("count")
        {
            return Ok(Projection::Count);
        }
        match convert_operand(expr)? {
            Operand::Column(name) => {
                let output = alias.unwrap_or_else(|| name.clone());
                columns.push((name, output));
            }
            other => {
                return Err(RepoError::UnsupportedOperation(format!(
                    "Only column projections supported, got {:?}",
                    other
                )));
            }
        }
    }
    Ok(Projection::Columns(columns))
}

fn convert_order_by(order_by: Option<sql_ast::OrderBy>) -> Result<Vec<OrderKey>> {
    let Some(order_by) = order_by else {
        return Ok(Vec::new());
    };
    match order_by.kind {
        sql_ast::OrderByKind::Expressions(exprs) => exprs
            .into_iter()
            .map(|order| match convert_operand(order.expr)? {
                Operand::Column(column) => Ok(OrderKey {
                    column,
                    descending: order.options.asc.map(|asc| !asc).unwrap_or(false),
                }),
                other => Err(RepoError::UnsupportedOperation(format!(
                    "ORDER BY supports columns only, got {:?}",
                    other
                ))),
            })
            .collect(),
        sql_ast::OrderByKind::All(_) => Err(RepoError::UnsupportedOperation(
            "ORDER BY ALL not supported".into(),
        )),
    }
}

fn convert_limit_clause(
    clause: Option<sql_ast::LimitClause>,
) -> Result<(Option<Operand>, Option<Operand>)> {
    match clause {
        None => Ok((None, None)),
        Some(sql_ast::LimitClause::LimitOffset { limit, offset, .. }) => Ok((
            limit.map(convert_operand).transpose()?,
            offset.map(|o| convert_operand(o.value)).transpose()?,
        )),
        Some(sql_ast::LimitClause::OffsetCommaLimit { offset, limit }) => Ok((
            Some(convert_operand(limit)?),
            Some(convert_operand(offset)?),
        )),
    }
}

fn convert_insert(insert: sql_ast::Insert) -> Result<InsertStmt> {
    let table = insert.table.to_string();
    let columns = insert.columns.into_iter().map(|id| id.value).collect();

    let Some(source) = insert.source else {
        return Err(RepoError::UnsupportedOperation(
            "INSERT requires a VALUES clause".into(),
        ));
    };
    let sql_ast::SetExpr::Values(values) = *source.body else {
        return Err(RepoError::UnsupportedOperation(
            "Only VALUES clause supported".into(),
        ));
    };
    let rows = values
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(convert_operand).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;

    Ok(InsertStmt {
        table,
        columns,
        rows,
    })
}

fn convert_update(
    table: sql_ast::TableWithJoins,
    assignments: Vec<sql_ast::Assignment>,
    selection: Option<sql_ast::Expr>,
) -> Result<UpdateStmt> {
    let table = table_factor_name(&table.relation)?;
    let assignments = assignments
        .into_iter()
        .map(|assign| {
            let column = match assign.target {
                sql_ast::AssignmentTarget::ColumnName(name) => name
                    .0
                    .last()
                    .map(|part| part.to_string())
                    .ok_or_else(|| RepoError::ParseError("Empty column name".into()))?,
                _ => {
                    return Err(RepoError::UnsupportedOperation(
                        "Only simple column names supported in UPDATE".into(),
                    ));
                }
            };
            Ok((column, convert_operand(assign.value)?))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(UpdateStmt {
        table,
        assignments,
        filter: selection.map(convert_predicate).transpose()?,
    })
}

fn convert_delete(delete: sql_ast::Delete) -> Result<DeleteStmt> {
    let tables = match delete.from {
        sql_ast::FromTable::WithFromKeyword(tables) => tables,
        sql_ast::FromTable::WithoutKeyword(tables) => tables,
    };
    let Some(first) = tables.first() else {
        return Err(RepoError::ParseError("DELETE requires a table".into()));
    };
    Ok(DeleteStmt {
        table: table_factor_name(&first.relation)?,
        filter: delete.selection.map(convert_predicate).transpose()?,
    })
}

fn table_factor_name(factor: &sql_ast::TableFactor) -> Result<String> {
    match factor {
        sql_ast::TableFactor::Table { name, .. } => name
            .0
            .last()
            .map(|part| part.to_string())
            .ok_or_else(|| RepoError::ParseError("Invalid table name".into())),
        _ => Err(RepoError::UnsupportedOperation(
            "Complex table references not supported".into(),
        )),
    }
}

fn convert_predicate(expr: sql_ast::Expr) -> Result<Predicate> {
    use sql_ast::BinaryOperator as SqlOp;

    match expr {
        sql_ast::Expr::Nested(inner) => convert_predicate(*inner),
        sql_ast::Expr::BinaryOp { left, op, right } => {
            let op = match op {
                SqlOp::And => {
                    return Ok(Predicate::And(
                        Box::new(convert_predicate(*left)?),
                        Box::new(convert_predicate(*right)?),
                    ));
                }
                SqlOp::Or => {
                    return Ok(Predicate::Or(
                        Box::new(convert_predicate(*left)?),
                        Box::new(convert_predicate(*right)?),
                    ));
                }
                SqlOp::Eq => CompareOp::Eq,
                SqlOp::NotEq => CompareOp::NotEq,
                SqlOp::Lt => CompareOp::Lt,
                SqlOp::LtEq => CompareOp::LtEq,
                SqlOp::Gt => CompareOp::Gt,
                SqlOp::GtEq => CompareOp::GtEq,
                other => {
                    return Err(RepoError::UnsupportedOperation(format!(
                        "Unsupported binary operator: {}",
                        other
                    )));
                }
            };
            Ok(Predicate::Compare {
                left: convert_operand(*left)?,
                op,
                right: convert_operand(*right)?,
            })
        }
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(convert_predicate(*expr)?))),
        sql_ast::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Predicate::Like {
            operand: convert_operand(*expr)?,
            pattern: convert_operand(*pattern)?,
            negated,
            case_insensitive: false,
        }),
        sql_ast::Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Predicate::Like {
            operand: convert_operand(*expr)?,
            pattern: convert_operand(*pattern)?,
            negated,
            case_insensitive: true,
        }),
        sql_ast::Expr::IsNull(expr) => Ok(Predicate::IsNull {
            operand: convert_operand(*expr)?,
            negated: false,
        }),
        sql_ast::Expr::IsNotNull(expr) => Ok(Predicate::IsNull {
            operand: convert_operand(*expr)?,
            negated: true,
        }),
        other => Ok(Predicate::Truth(convert_operand(other)?)),
    }
}

fn convert_operand(expr: sql_ast::Expr) -> Result<Operand> {
    match expr {
        sql_ast::Expr::Identifier(ident) => Ok(Operand::Column(ident.value)),
        sql_ast::Expr::CompoundIdentifier(idents) => idents
            .into_iter()
            .last()
            .map(|ident| Operand::Column(ident.value))
            .ok_or_else(|| RepoError::ParseError("Empty identifier".into())),
        sql_ast::Expr::Nested(inner) => convert_operand(*inner),
        sql_ast::Expr::Value(value) => convert_value(value.value),
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Minus,
            expr,
        } => match convert_operand(*expr)? {
            Operand::Literal(Value::Integer(i)) => Ok(Operand::Literal(Value::Integer(-i))),
            Operand::Literal(Value::Float(f)) => Ok(Operand::Literal(Value::Float(-f))),
            other => Err(RepoError::UnsupportedOperation(format!(
                "Cannot negate {:?}",
                other
            ))),
        },
        other => Err(RepoError::UnsupportedOperation(format!(
            "Unsupported expression: {}",
            other
        ))),
    }
}

fn convert_value(value: sql_ast::Value) -> Result<Operand> {
    let literal = match value {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::Integer(i)
            } else {
                n.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RepoError::TypeMismatch(format!("Invalid number: {}", n)))?
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            Value::Text(s)
        }
        sql_ast::Value::Boolean(b) => Value::Boolean(b),
        sql_ast::Value::Null => Value::Null,
        sql_ast::Value::Placeholder(placeholder) => return convert_placeholder(&placeholder),
        other => {
            return Err(RepoError::UnsupportedOperation(format!(
                "Unsupported value: {}",
                other
            )));
        }
    };
    Ok(Operand::Literal(literal))
}

fn convert_placeholder(placeholder: &str) -> Result<Operand> {
    if let Some(position) = placeholder.strip_prefix('$') {
        return position
            .parse::<usize>()
            .ok()
            .filter(|p| *p > 0)
            .map(Operand::Positional)
            .ok_or_else(|| RepoError::ParseError(format!("Invalid placeholder {}", placeholder)));
    }
    if let Some(name) = placeholder.strip_prefix(':')
        && !name.is_empty()
    {
        return Ok(Operand::Named(name.to_string()));
    }
    Err(RepoError::ParseError(format!(
        "Unsupported placeholder {}",
        placeholder
    )))
}

// ============================================================================
// Evaluation
// ============================================================================

/// Shared state expressions need while being evaluated.
pub struct EvalContext<'a> {
    pub params: &'a Params,
    pub patterns: &'a PatternCache,
}

impl Operand {
    pub fn resolve(&self, row: Option<&Row>, ctx: &EvalContext<'_>) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Positional(position) => ctx.params.get_positional(*position).cloned(),
            Self::Named(name) => ctx.params.get_named(name).cloned(),
            Self::Column(name) => {
                let row = row.ok_or_else(|| {
                    RepoError::ExecutionError(format!("Column '{}' is not allowed here", name))
                })?;
                lookup_column(row, name).cloned()
            }
        }
    }

    /// Resolves a LIMIT/OFFSET operand.
    pub fn resolve_count(&self, ctx: &EvalContext<'_>) -> Result<usize> {
        let value = self.resolve(None, ctx)?;
        value
            .as_i64()
            .filter(|n| *n >= 0)
            .map(|n| n as usize)
            .ok_or_else(|| {
                RepoError::ExecutionError(format!("Expected a non-negative count, got {}", value))
            })
    }
}

pub fn lookup_column<'r>(row: &'r Row, name: &str) -> Result<&'r Value> {
    row.get(name)
        .or_else(|| {
            row.iter()
                .find(|(column, _)| column.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .ok_or_else(|| RepoError::ExecutionError(format!("Column '{}' not found", name)))
}

impl Predicate {
    /// Three-valued evaluation; `None` is SQL UNKNOWN.
    pub fn eval(&self, row: &Row, ctx: &EvalContext<'_>) -> Result<Option<bool>> {
        match self {
            Self::Compare { left, op, right } => {
                let left = left.resolve(Some(row), ctx)?;
                let right = right.resolve(Some(row), ctx)?;
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                let ordering = left.compare(&right)?;
                Ok(Some(match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                }))
            }
            Self::Like {
                operand,
                pattern,
                negated,
                case_insensitive,
            } => {
                let value = operand.resolve(Some(row), ctx)?;
                let pattern = pattern.resolve(Some(row), ctx)?;
                let (Value::Text(text), Value::Text(pattern)) = (&value, &pattern) else {
                    if value.is_null() || pattern.is_null() {
                        return Ok(None);
                    }
                    return Err(RepoError::TypeMismatch(format!(
                        "LIKE requires text operands, got {} and {}",
                        value.type_name(),
                        pattern.type_name()
                    )));
                };
                let matched = ctx.patterns.matches(text, pattern, !case_insensitive)?;
                Ok(Some(matched != *negated))
            }
            Self::IsNull { operand, negated } => {
                let is_null = operand.resolve(Some(row), ctx)?.is_null();
                Ok(Some(is_null != *negated))
            }
            Self::And(left, right) => {
                let left = left.eval(row, ctx)?;
                if left == Some(false) {
                    return Ok(Some(false));
                }
                match (left, right.eval(row, ctx)?) {
                    (_, Some(false)) => Ok(Some(false)),
                    (Some(true), Some(true)) => Ok(Some(true)),
                    _ => Ok(None),
                }
            }
            Self::Or(left, right) => {
                let left = left.eval(row, ctx)?;
                if left == Some(true) {
                    return Ok(Some(true));
                }
                match (left, right.eval(row, ctx)?) {
                    (_, Some(true)) => Ok(Some(true)),
                    (Some(false), Some(false)) => Ok(Some(false)),
                    _ => Ok(None),
                }
            }
            Self::Not(inner) => Ok(inner.eval(row, ctx)?.map(|b| !b)),
            Self::Truth(operand) => match operand.resolve(Some(row), ctx)? {
                Value::Null => Ok(None),
                Value::Boolean(b) => Ok(Some(b)),
                other => Err(RepoError::TypeMismatch(format!(
                    "Expected a boolean condition, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    pub fn matches(&self, row: &Row, ctx: &EvalContext<'_>) -> Result<bool> {
        Ok(self.eval(row, ctx)? == Some(true))
    }
}

/// Stable sort by the given keys; NULLs sort last ascending.
pub fn sort_rows(rows: &mut [(i64, Row)], keys: &[OrderKey]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    for (_, row) in rows.iter() {
        for key in keys {
            lookup_column(row, &key.column)?;
        }
    }
    rows.sort_by(|(_, a), (_, b)| {
        for key in keys {
            let left = lookup_column(a, &key.column).unwrap_or(&Value::Null);
            let right = lookup_column(b, &key.column).unwrap_or(&Value::Null);
            let ordering = left.compare(right).unwrap_or(Ordering::Equal);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}
