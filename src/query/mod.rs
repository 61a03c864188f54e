//! Query expressions, ordering, and select options.

mod expr;
mod options;
mod order;
mod value;

pub use expr::{
    and, contains, contains_ic, eq, gt, gte, has, in_set, lt, lte, neq, not, or, starts_with,
    Expr,
};
pub use options::{SelectKey, SelectOptions};
pub use order::{compare_by, orders_to_mql, orders_to_sql, Direction, Order};
pub use value::{compare_values, lookup, values_equal};
