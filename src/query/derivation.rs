// ============================================================================
// Method-name derivation
// ============================================================================
//
// Grammar, over camel-case words:
//
//   method    := prefix remainder
//   prefix    := findBy | findAllBy | (findFirst | findTop) [digits] [By]
//              | countBy | existsBy | deleteBy | removeBy
//   remainder := [predicate] [OrderBy property [Asc | Desc]]
//   predicate := clause ((And | Or) clause)*
//   clause    := property [operator] [IgnoreCase]
//
// `And`, `Or` and `OrderBy` only count as keywords when they are whole words
// with words on both sides, so `orderNumber` or `organization` stay intact.
//
// ============================================================================

use tracing::debug;

use super::{Clause, Combinator, Direction, Operation, Operator, Order, QueryDescriptor};
use crate::core::{RepoError, Result};

/// Operator suffixes, longest first so `NotNull` wins over `Null` and `Not`.
const OPERATOR_SUFFIXES: &[(&[&str], Operator)] = &[
    (&["Is", "Not", "Null"], Operator::IsNotNull),
    (&["Not", "Null"], Operator::IsNotNull),
    (&["Is", "Null"], Operator::IsNull),
    (&["Null"], Operator::IsNull),
    (&["Greater", "Than", "Equal"], Operator::Gte),
    (&["Greater", "Than"], Operator::Gt),
    (&["Less", "Than", "Equal"], Operator::Lte),
    (&["Less", "Than"], Operator::Lt),
    (&["Not", "Like"], Operator::NotLike),
    (&["Like"], Operator::Like),
    (&["Containing"], Operator::Contains),
    (&["Starting", "With"], Operator::StartsWith),
    (&["Ending", "With"], Operator::EndsWith),
    (&["Is", "Not"], Operator::NotEq),
    (&["Not"], Operator::NotEq),
    (&["Equals"], Operator::Eq),
    (&["Is"], Operator::Eq),
];

/// Derives a query for `method` declared on `interface`, reading `entity`.
///
/// Names without a known prefix are [`RepoError::UnsupportedMethod`]; names
/// with a known prefix but a malformed remainder are
/// [`RepoError::Derivation`].
pub fn derive(interface: &str, entity: &str, method: &str) -> Result<QueryDescriptor> {
    let fail = |reason: String| RepoError::Derivation {
        interface: interface.to_string(),
        method: method.to_string(),
        reason,
    };

    let (operation, limit, remainder) =
        split_prefix(method, &fail)?.ok_or_else(|| RepoError::UnsupportedMethod {
            interface: interface.to_string(),
            method: method.to_string(),
        })?;

    if let Some(first) = remainder.chars().next()
        && !first.is_ascii_uppercase()
    {
        return Err(fail(format!(
            "expected a capitalised property after the prefix, found '{}'",
            remainder
        )));
    }
    if let Some(bad) = remainder.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(fail(format!("unexpected character '{}'", bad)));
    }

    let words = camel_words(remainder);
    let (predicate, ordering) = split_ordering(&words, &fail)?;

    let mut descriptor = QueryDescriptor::new(entity, operation);
    descriptor.limit = limit;
    descriptor.ordering = ordering;

    if !predicate.is_empty() {
        let (segments, combinator) = split_segments(predicate, &fail)?;
        descriptor.combinator = combinator;
        let mut next_slot = 0;
        for segment in segments {
            let clause = parse_clause(segment, next_slot, &fail)?;
            next_slot += clause.operator.arity();
            descriptor.clauses.push(clause);
        }
    }

    if descriptor.ordering.is_some() && operation != Operation::Select {
        return Err(fail(format!("OrderBy is not allowed on a {} query", operation)));
    }

    debug!(
        interface,
        method,
        operation = %descriptor.operation,
        clauses = descriptor.clauses.len(),
        limit = ?descriptor.limit,
        "derived query"
    );
    Ok(descriptor)
}

/// Maps a property name to its column: `createdAt` becomes `created_at`.
pub fn column_name(property: &str) -> String {
    let mut column = String::with_capacity(property.len() + 4);
    let mut previous: Option<char> = None;
    for ch in property.chars() {
        if ch.is_ascii_uppercase() {
            if previous.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                column.push('_');
            }
            column.push(ch.to_ascii_lowercase());
        } else {
            column.push(ch);
        }
        previous = Some(ch);
    }
    column
}

type Prefix<'a> = (Operation, Option<usize>, &'a str);

fn split_prefix<'a>(
    method: &'a str,
    fail: &dyn Fn(String) -> RepoError,
) -> Result<Option<Prefix<'a>>> {
    for keyword in ["findFirst", "findTop"] {
        if let Some(rest) = method.strip_prefix(keyword) {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let (digits, rest) = rest.split_at(digits_end);
            let limit = if digits.is_empty() {
                1
            } else {
                digits
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| fail(format!("invalid result limit '{}'", digits)))?
            };
            let rest = match rest.strip_prefix("By") {
                Some(rest) => rest,
                None if rest.is_empty() => rest,
                None => return Err(fail(format!("expected 'By' after '{}{}'", keyword, digits))),
            };
            return Ok(Some((Operation::Select, Some(limit), rest)));
        }
    }

    const PREFIXES: &[(&str, Operation)] = &[
        ("findAllBy", Operation::Select),
        ("findBy", Operation::Select),
        ("countBy", Operation::Count),
        ("existsBy", Operation::Exists),
        ("deleteBy", Operation::Delete),
        ("removeBy", Operation::Delete),
    ];
    Ok(PREFIXES.iter().find_map(|(prefix, operation)| {
        method
            .strip_prefix(prefix)
            .map(|rest| (*operation, None, rest))
    }))
}

/// Splits `s` before every uppercase letter.
fn camel_words(s: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    for (idx, ch) in s.char_indices() {
        if ch.is_ascii_uppercase() && idx > start {
            words.push(&s[start..idx]);
            start = idx;
        }
    }
    if start < s.len() {
        words.push(&s[start..]);
    }
    words
}

fn split_ordering<'w>(
    words: &'w [&'w str],
    fail: &dyn Fn(String) -> RepoError,
) -> Result<(&'w [&'w str], Option<Order>)> {
    if words.ends_with(&["Order", "By"]) {
        return Err(fail("OrderBy must name a property".into()));
    }
    let Some(at) = words
        .windows(3)
        .position(|w| w[0] == "Order" && w[1] == "By")
    else {
        return Ok((words, None));
    };

    let mut property = &words[at + 2..];
    let direction = match property.last().copied() {
        Some("Asc") => Direction::Asc,
        Some("Desc") => Direction::Desc,
        _ => Direction::Asc,
    };
    if matches!(property.last().copied(), Some("Asc" | "Desc")) {
        property = &property[..property.len() - 1];
    }
    if property.is_empty() {
        return Err(fail("OrderBy must name a property".into()));
    }
    if property.iter().any(|w| *w == "And" || *w == "Or") {
        return Err(fail("only one OrderBy property is supported".into()));
    }

    Ok((
        &words[..at],
        Some(Order {
            property: property_name(property),
            direction,
        }),
    ))
}

fn split_segments<'w>(
    words: &'w [&'w str],
    fail: &dyn Fn(String) -> RepoError,
) -> Result<(Vec<&'w [&'w str]>, Combinator)> {
    let mut segments = Vec::new();
    let mut combinator = None;
    let mut start = 0;

    for (idx, word) in words.iter().enumerate() {
        let token = match *word {
            "And" => Combinator::And,
            "Or" => Combinator::Or,
            _ => continue,
        };
        if idx == start || idx + 1 == words.len() {
            continue;
        }
        match combinator {
            Some(existing) if existing != token => {
                return Err(fail("mixing And and Or is not supported".into()));
            }
            _ => combinator = Some(token),
        }
        segments.push(&words[start..idx]);
        start = idx + 1;
    }
    segments.push(&words[start..]);

    Ok((segments, combinator.unwrap_or_default()))
}

fn parse_clause(
    words: &[&str],
    slot: usize,
    fail: &dyn Fn(String) -> RepoError,
) -> Result<Clause> {
    let (words, ignore_case) = match strip_words(words, &["Ignore", "Case"]) {
        Some(rest) => (rest, true),
        None => (words, false),
    };

    let (mut property, operator) = OPERATOR_SUFFIXES
        .iter()
        .find_map(|(suffix, operator)| strip_words(words, suffix).map(|rest| (rest, *operator)))
        .unwrap_or((words, Operator::Eq));

    // `NameIsGreaterThan` reads the same as `NameGreaterThan`.
    if property.len() > 1 && property.last() == Some(&"Is") {
        property = &property[..property.len() - 1];
    }
    if property.is_empty() {
        return Err(fail(format!("clause '{}' names no property", words.concat())));
    }
    if ignore_case && !operator.supports_ignore_case() {
        return Err(fail(format!(
            "IgnoreCase cannot be applied to {:?} on '{}'",
            operator,
            property_name(property)
        )));
    }

    Ok(Clause {
        property: property_name(property),
        operator,
        ignore_case,
        slot: (operator.arity() > 0).then_some(slot),
    })
}

/// Returns the words before `suffix` when `words` ends with it and at least
/// one word remains.
fn strip_words<'w>(words: &'w [&'w str], suffix: &[&str]) -> Option<&'w [&'w str]> {
    if words.len() > suffix.len() && words.ends_with(suffix) {
        Some(&words[..words.len() - suffix.len()])
    } else {
        None
    }
}

fn property_name(words: &[&str]) -> String {
    let joined = words.concat();
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
