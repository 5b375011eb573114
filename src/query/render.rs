use super::{Clause, Operation, Operator, Order, QueryDescriptor, column_name};
use crate::core::{RepoError, Result, Value};
use crate::session::Params;
use crate::storage::escape_like;

/// Renders `descriptor` as SQL text with `$n` placeholders.
///
/// `sort` orders are appended after the name-derived ordering and only apply
/// to selects. Limits are not rendered; they travel as first/max results.
pub fn render(descriptor: &QueryDescriptor, sort: &[Order]) -> String {
    let mut sql = match descriptor.operation {
        Operation::Select => format!("SELECT * FROM {}", descriptor.entity),
        Operation::Count | Operation::Exists => {
            format!("SELECT COUNT(*) FROM {}", descriptor.entity)
        }
        Operation::Delete => format!("DELETE FROM {}", descriptor.entity),
    };

    if !descriptor.clauses.is_empty() {
        let separator = format!(" {} ", descriptor.combinator.to_sql());
        let conditions: Vec<String> = descriptor.clauses.iter().map(render_clause).collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(&separator));
    }

    if descriptor.operation == Operation::Select {
        let orders: Vec<String> = descriptor
            .ordering
            .iter()
            .chain(sort)
            .map(|order| format!("{} {}", column_name(&order.property), order.direction.to_sql()))
            .collect();
        if !orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
    }

    sql
}

fn render_clause(clause: &Clause) -> String {
    let column = column_name(&clause.property);
    let placeholder = clause
        .slot
        .map(|slot| format!("${}", slot + 1))
        .unwrap_or_default();
    let like = if clause.ignore_case { "ILIKE" } else { "LIKE" };

    match clause.operator {
        Operator::Eq if clause.ignore_case => format!("{} ILIKE {}", column, placeholder),
        Operator::Eq => format!("{} = {}", column, placeholder),
        Operator::NotEq if clause.ignore_case => format!("{} NOT ILIKE {}", column, placeholder),
        Operator::NotEq => format!("{} <> {}", column, placeholder),
        Operator::Gt => format!("{} > {}", column, placeholder),
        Operator::Gte => format!("{} >= {}", column, placeholder),
        Operator::Lt => format!("{} < {}", column, placeholder),
        Operator::Lte => format!("{} <= {}", column, placeholder),
        Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Like => {
            format!("{} {} {}", column, like, placeholder)
        }
        Operator::NotLike => format!("{} NOT {} {}", column, like, placeholder),
        Operator::IsNull => format!("{} IS NULL", column),
        Operator::IsNotNull => format!("{} IS NOT NULL", column),
    }
}

/// Binds method arguments to the descriptor's slots, wrapping pattern values.
pub fn bind(descriptor: &QueryDescriptor, values: Vec<Value>) -> Result<Params> {
    let expected = descriptor.parameter_count();
    if values.len() != expected {
        return Err(RepoError::ExecutionError(format!(
            "Query on '{}' expects {} argument(s), got {}",
            descriptor.entity,
            expected,
            values.len()
        )));
    }

    let mut values = values.into_iter();
    let mut params = Params::new();
    for clause in descriptor.clauses.iter().filter(|c| c.slot.is_some()) {
        let Some(value) = values.next() else { break };
        params.push(wrap(clause, value));
    }
    Ok(params)
}

fn wrap(clause: &Clause, value: Value) -> Value {
    let text = match &value {
        Value::Null => return value,
        Value::Text(text) => text.clone(),
        other => other.to_string(),
    };
    match clause.operator {
        Operator::Contains => Value::Text(format!("%{}%", escape_like(&text))),
        Operator::StartsWith => Value::Text(format!("{}%", escape_like(&text))),
        Operator::EndsWith => Value::Text(format!("%{}", escape_like(&text))),
        Operator::Eq | Operator::NotEq if clause.ignore_case => Value::Text(escape_like(&text)),
        _ => value,
    }
}
