use serde_json::Value;

use crate::error::StoreResult;
use crate::record::Record;

use super::expr::Expr;
use super::order::{compare_by, orders_to_sql, Order};

static MATCH_ALL: Expr = Expr::True;

/// Options of a `select`/`remove_all`/`listen` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    pub query: Option<Expr>,
    pub order: Vec<Order>,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Canonical signature of a select: `(query sql, limit, skip, order sql)`.
/// Two logically identical selects produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectKey {
    pub query: String,
    pub limit: Option<usize>,
    pub skip: usize,
    pub order: String,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: Expr) -> Self {
        self.query = Some(query);
        self
    }

    /// Appends a sort clause.
    pub fn with_order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The query, `True` when none was given.
    pub fn query(&self) -> &Expr {
        self.query.as_ref().unwrap_or(&MATCH_ALL)
    }

    pub fn is_paged(&self) -> bool {
        self.skip > 0 || self.limit.is_some()
    }

    /// Same query and order without skip/limit.
    pub fn unpaged(&self) -> SelectOptions {
        SelectOptions {
            query: self.query.clone(),
            order: self.order.clone(),
            skip: 0,
            limit: None,
        }
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        self.query().matches(value)
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        match &self.query {
            None => true,
            Some(query) => record.to_value().map(|v| query.matches(&v)).unwrap_or(false),
        }
    }

    /// Filter then stable-sort, without paging.
    pub fn filter_sorted<R: Record>(&self, records: impl IntoIterator<Item = R>) -> StoreResult<Vec<R>> {
        let mut rows = Vec::new();
        for record in records {
            let value = record.to_value()?;
            if self.matches_value(&value) {
                rows.push((value, record));
            }
        }
        if !self.order.is_empty() {
            rows.sort_by(|(a, _), (b, _)| compare_by(&self.order, a, b));
        }
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }

    /// Applies skip and limit to an already filtered, ordered sequence.
    pub fn page<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let items = items.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }

    /// Filter, stable sort, skip, limit.
    pub fn apply<R: Record>(&self, records: impl IntoIterator<Item = R>) -> StoreResult<Vec<R>> {
        Ok(self.page(self.filter_sorted(records)?))
    }

    pub fn select_key(&self) -> SelectKey {
        SelectKey {
            query: self.query().clone().normalize().to_sql(),
            limit: self.limit,
            skip: self.skip,
            order: orders_to_sql(&self.order),
        }
    }
}
