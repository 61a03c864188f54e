use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::{compare_values, lookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// One sort clause. A `Vec<Order>` compares lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Order {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Order {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let left = lookup(a, &self.field).unwrap_or(&Value::Null);
        let right = lookup(b, &self.field).unwrap_or(&Value::Null);
        let ordering = compare_values(left, right);
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

pub fn compare_by(orders: &[Order], a: &Value, b: &Value) -> Ordering {
    orders
        .iter()
        .map(|order| order.compare(a, b))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// `a ASC, b DESC`
pub fn orders_to_sql(orders: &[Order]) -> String {
    orders
        .iter()
        .map(|order| match order.direction {
            Direction::Asc => format!("{} ASC", order.field),
            Direction::Desc => format!("{} DESC", order.field),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `a,-b`
pub fn orders_to_mql(orders: &[Order]) -> String {
    orders
        .iter()
        .map(|order| match order.direction {
            Direction::Asc => order.field.clone(),
            Direction::Desc => format!("-{}", order.field),
        })
        .collect::<Vec<_>>()
        .join(",")
}
