use serde::{Deserialize, Serialize};

use crate::core::{RepoError, Result};
use crate::query::{Direction, Order};

/// A page request: zero-based page index and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PageRequest")]
pub struct Pageable {
    page: usize,
    size: usize,
}

#[derive(Deserialize)]
struct PageRequest {
    page: i64,
    size: i64,
}

impl TryFrom<PageRequest> for Pageable {
    type Error = RepoError;

    fn try_from(request: PageRequest) -> Result<Self> {
        Self::new(request.page, request.size)
    }
}

impl Pageable {
    pub fn new(page: i64, size: i64) -> Result<Self> {
        if page < 0 {
            return Err(RepoError::InvalidArguments {
                method: "Pageable".into(),
                reason: "page index must not be less than zero".into(),
            });
        }
        if size < 1 {
            return Err(RepoError::InvalidArguments {
                method: "Pageable".into(),
                reason: "page size must not be less than one".into(),
            });
        }
        Ok(Self {
            page: page as usize,
            size: size as usize,
        })
    }

    pub fn of_size(size: i64) -> Result<Self> {
        Self::new(0, size)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            size: self.size,
        }
    }

    /// First/max results for this page under an optional result limit.
    pub fn window(&self, limit: Option<usize>) -> (usize, usize) {
        let max = match limit {
            Some(limit) => limit.min(self.size),
            None => self.size,
        };
        (self.offset(), max)
    }
}

/// Ordering requested at call time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn by(property: impl Into<String>, direction: Direction) -> Self {
        Self {
            orders: vec![Order {
                property: property.into(),
                direction,
            }],
        }
    }

    pub fn asc(property: impl Into<String>) -> Self {
        Self::by(property, Direction::Asc)
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::by(property, Direction::Desc)
    }

    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }

    /// Sort properties end up in query text, so they must be plain identifiers.
    pub(crate) fn validate(&self, method: &str) -> Result<()> {
        for order in &self.orders {
            let valid = order
                .property
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && order
                    .property
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(RepoError::InvalidArguments {
                    method: method.to_string(),
                    reason: format!("invalid sort property '{}'", order.property),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pageable_validation() {
        assert!(Pageable::new(-1, 10).is_err());
        assert!(Pageable::new(0, 0).is_err());
        let page = Pageable::new(2, 10).unwrap();
        assert_eq!(page.offset(), 20);
        assert_eq!(page.next().page(), 3);
    }

    #[test]
    fn test_deserialized_pages_are_validated() {
        let page: Pageable = serde_json::from_str(r#"{"page":3,"size":25}"#).unwrap();
        assert_eq!(page, Pageable::new(3, 25).unwrap());

        let err = serde_json::from_str::<Pageable>(r#"{"page":0,"size":0}"#).unwrap_err();
        assert!(err.to_string().contains("page size must not be less than one"));
        assert!(serde_json::from_str::<Pageable>(r#"{"page":-1,"size":5}"#).is_err());
    }

    #[test]
    fn test_window_combines_with_limit() {
        let page = Pageable::new(1, 10).unwrap();
        assert_eq!(page.window(None), (10, 10));
        assert_eq!(page.window(Some(3)), (10, 3));
        assert_eq!(page.window(Some(50)), (10, 10));
    }

    #[test]
    fn test_sort_properties() {
        let sort = Sort::desc("createdAt").and(Sort::asc("name"));
        assert_eq!(sort.orders().len(), 2);
        assert!(sort.validate("findAll").is_ok());
        assert!(Sort::asc("name; DROP").validate("findAll").is_err());
        assert!(Sort::default().is_unsorted());
    }
}
