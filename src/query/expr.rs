use std::fmt;
use std::mem::discriminant;

use serde_json::Value;

use super::value::{compare_values, is_empty, lookup, values_equal};

static NULL: Value = Value::Null;

/// Predicate over a record's JSON form.
///
/// Field names are dotted paths. A missing field reads as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    True,
    False,
    Eq(String, Value),
    Neq(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    /// Substring for strings, membership for arrays.
    Contains(String, Value),
    ContainsIc(String, String),
    StartsWith(String, String),
    /// Field is present and non-empty.
    Has(String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Eq(field.into(), value.into())
}

pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Neq(field.into(), value.into())
}

pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Lt(field.into(), value.into())
}

pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Lte(field.into(), value.into())
}

pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Gt(field.into(), value.into())
}

pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Gte(field.into(), value.into())
}

pub fn in_set<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
    Expr::In(field.into(), values.into_iter().map(Into::into).collect())
}

pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Contains(field.into(), value.into())
}

pub fn contains_ic(field: impl Into<String>, needle: impl Into<String>) -> Expr {
    Expr::ContainsIc(field.into(), needle.into())
}

pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Expr {
    Expr::StartsWith(field.into(), prefix.into())
}

pub fn has(field: impl Into<String>) -> Expr {
    Expr::Has(field.into())
}

pub fn and(children: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::And(children.into_iter().collect())
}

pub fn or(children: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Or(children.into_iter().collect())
}

pub fn not(child: Expr) -> Expr {
    Expr::Not(Box::new(child))
}

fn field<'a>(record: &'a Value, path: &str) -> &'a Value {
    lookup(record, path).unwrap_or(&NULL)
}

fn compare(record: &Value, path: &str, value: &Value, accept: fn(std::cmp::Ordering) -> bool) -> bool {
    let actual = field(record, path);
    if actual.is_null() || discriminant(actual) != discriminant(value) {
        return false;
    }
    accept(compare_values(actual, value))
}

fn text_matches(actual: &Value, test: &dyn Fn(&str) -> bool) -> bool {
    match actual {
        Value::String(s) => test(s),
        Value::Array(items) => items.iter().any(|item| item.as_str().is_some_and(test)),
        _ => false,
    }
}

fn push_unique(terms: &mut Vec<Expr>, term: Expr) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

fn collapse(mut terms: Vec<Expr>, empty: Expr, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    match terms.len() {
        0 => empty,
        1 => terms.remove(0),
        _ => wrap(terms),
    }
}

/// Folds `Eq`/`In` disjuncts on the same field into one `In`.
fn merge_equalities(terms: Vec<Expr>) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(terms.len());
    for term in terms {
        let (name, values) = match term {
            Expr::Eq(name, value) => (name, vec![value]),
            Expr::In(name, values) => (name, values),
            other => {
                out.push(other);
                continue;
            }
        };
        let existing = out
            .iter()
            .position(|t| matches!(t, Expr::Eq(f, _) | Expr::In(f, _) if *f == name));
        match existing {
            Some(pos) => {
                let merged = match std::mem::replace(&mut out[pos], Expr::False) {
                    Expr::Eq(f, first) => {
                        let mut all = vec![first];
                        all.extend(values);
                        Expr::In(f, all)
                    }
                    Expr::In(f, mut all) => {
                        all.extend(values);
                        Expr::In(f, all)
                    }
                    other => other,
                };
                out[pos] = merged.normalize();
            }
            None => out.push(Expr::In(name, values).normalize()),
        }
    }
    out
}

fn quote_sql(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_sql(s),
        other => quote_sql(&other.to_string()),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mql_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let bare = !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/'));
            if bare {
                s.clone()
            } else {
                format!("\"{}\"", s.replace('"', "\\\""))
            }
        }
        other => other.to_string(),
    }
}

impl Expr {
    pub fn matches(&self, record: &Value) -> bool {
        use std::cmp::Ordering;
        match self {
            Expr::True => true,
            Expr::False => false,
            Expr::Eq(f, v) => values_equal(field(record, f), v),
            Expr::Neq(f, v) => !values_equal(field(record, f), v),
            Expr::Lt(f, v) => compare(record, f, v, |o| o == Ordering::Less),
            Expr::Lte(f, v) => compare(record, f, v, |o| o != Ordering::Greater),
            Expr::Gt(f, v) => compare(record, f, v, |o| o == Ordering::Greater),
            Expr::Gte(f, v) => compare(record, f, v, |o| o != Ordering::Less),
            Expr::In(f, values) => {
                let actual = field(record, f);
                values.iter().any(|v| values_equal(actual, v))
            }
            Expr::Contains(f, v) => match field(record, f) {
                Value::String(s) => v.as_str().is_some_and(|needle| s.contains(needle)),
                Value::Array(items) => items.iter().any(|item| values_equal(item, v)),
                _ => false,
            },
            Expr::ContainsIc(f, needle) => {
                let needle = needle.to_lowercase();
                text_matches(field(record, f), &|s: &str| s.to_lowercase().contains(&needle))
            }
            Expr::StartsWith(f, prefix) => {
                text_matches(field(record, f), &|s: &str| s.starts_with(prefix.as_str()))
            }
            Expr::Has(f) => !is_empty(field(record, f)),
            Expr::And(children) => children.iter().all(|c| c.matches(record)),
            Expr::Or(children) => children.iter().any(|c| c.matches(record)),
            Expr::Not(child) => !child.matches(record),
        }
    }

    /// Canonical form of the expression; evaluates identically.
    pub fn normalize(self) -> Expr {
        match self {
            Expr::And(children) => {
                let mut terms = Vec::new();
                for child in children {
                    match child.normalize() {
                        Expr::True => {}
                        Expr::False => return Expr::False,
                        Expr::And(inner) => inner.into_iter().for_each(|t| push_unique(&mut terms, t)),
                        other => push_unique(&mut terms, other),
                    }
                }
                collapse(terms, Expr::True, Expr::And)
            }
            Expr::Or(children) => {
                let mut terms = Vec::new();
                for child in children {
                    match child.normalize() {
                        Expr::False => {}
                        Expr::True => return Expr::True,
                        Expr::Or(inner) => inner.into_iter().for_each(|t| push_unique(&mut terms, t)),
                        other => push_unique(&mut terms, other),
                    }
                }
                collapse(merge_equalities(terms), Expr::False, Expr::Or)
            }
            Expr::Not(child) => match child.normalize() {
                Expr::True => Expr::False,
                Expr::False => Expr::True,
                Expr::Not(inner) => *inner,
                Expr::Eq(f, v) => Expr::Neq(f, v),
                Expr::Neq(f, v) => Expr::Eq(f, v),
                Expr::And(terms) => Expr::Or(terms.into_iter().map(not).collect()).normalize(),
                Expr::Or(terms) => Expr::And(terms.into_iter().map(not).collect()).normalize(),
                other => not(other),
            },
            Expr::In(f, values) => {
                let mut unique: Vec<Value> = Vec::with_capacity(values.len());
                for value in values {
                    if !unique.iter().any(|u| values_equal(u, &value)) {
                        unique.push(value);
                    }
                }
                match unique.len() {
                    0 => Expr::False,
                    1 => Expr::Eq(f, unique.remove(0)),
                    _ => Expr::In(f, unique),
                }
            }
            other => other,
        }
    }

    /// Folds constant sub-trees, leaving everything else as written.
    pub fn partial_eval(self) -> Expr {
        match self {
            Expr::And(children) => {
                let mut terms = Vec::new();
                for child in children {
                    match child.partial_eval() {
                        Expr::True => {}
                        Expr::False => return Expr::False,
                        other => terms.push(other),
                    }
                }
                collapse(terms, Expr::True, Expr::And)
            }
            Expr::Or(children) => {
                let mut terms = Vec::new();
                for child in children {
                    match child.partial_eval() {
                        Expr::False => {}
                        Expr::True => return Expr::True,
                        other => terms.push(other),
                    }
                }
                collapse(terms, Expr::False, Expr::Or)
            }
            Expr::Not(child) => match child.partial_eval() {
                Expr::True => Expr::False,
                Expr::False => Expr::True,
                other => not(other),
            },
            other => other,
        }
    }

    /// True when every leaf predicate is accepted by `supported`.
    pub fn supported_by<F: Fn(&Expr) -> bool>(&self, supported: &F) -> bool {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                children.iter().all(|c| c.supported_by(supported))
            }
            Expr::Not(child) => child.supported_by(supported),
            leaf => supported(leaf),
        }
    }

    /// Splits the normalized expression into the conjuncts a backend can
    /// evaluate and the residual that must be applied locally.
    pub fn split<F: Fn(&Expr) -> bool>(&self, supported: F) -> (Expr, Option<Expr>) {
        let terms = match self.clone().normalize() {
            Expr::And(terms) => terms,
            other => vec![other],
        };
        let (remote, local): (Vec<Expr>, Vec<Expr>) =
            terms.into_iter().partition(|t| t.supported_by(&supported));
        let remote = collapse(remote, Expr::True, Expr::And);
        let residual = if local.is_empty() {
            None
        } else {
            Some(collapse(local, Expr::True, Expr::And))
        };
        (remote, residual)
    }

    pub fn to_sql(&self) -> String {
        match self {
            Expr::True => "TRUE".to_string(),
            Expr::False => "FALSE".to_string(),
            Expr::Eq(f, v) => format!("{} = {}", f, sql_literal(v)),
            Expr::Neq(f, v) => format!("{} <> {}", f, sql_literal(v)),
            Expr::Lt(f, v) => format!("{} < {}", f, sql_literal(v)),
            Expr::Lte(f, v) => format!("{} <= {}", f, sql_literal(v)),
            Expr::Gt(f, v) => format!("{} > {}", f, sql_literal(v)),
            Expr::Gte(f, v) => format!("{} >= {}", f, sql_literal(v)),
            Expr::In(f, values) => {
                let items: Vec<String> = values.iter().map(sql_literal).collect();
                format!("{} IN ({})", f, items.join(", "))
            }
            Expr::Contains(f, v) => {
                format!("{} LIKE {}", f, quote_sql(&format!("%{}%", plain_text(v))))
            }
            Expr::ContainsIc(f, needle) => {
                format!("UPPER({}) LIKE UPPER({})", f, quote_sql(&format!("%{}%", needle)))
            }
            Expr::StartsWith(f, prefix) => {
                format!("{} LIKE {}", f, quote_sql(&format!("{}%", prefix)))
            }
            Expr::Has(f) => format!("{} IS NOT NULL", f),
            Expr::And(children) => {
                let parts: Vec<String> = children.iter().map(Expr::to_sql).collect();
                format!("({})", parts.join(" AND "))
            }
            Expr::Or(children) => {
                let parts: Vec<String> = children.iter().map(Expr::to_sql).collect();
                format!("({})", parts.join(" OR "))
            }
            Expr::Not(child) => format!("NOT ({})", child.to_sql()),
        }
    }

    /// Issue-tracker query language rendering. `None` when the expression
    /// cannot be expressed; `Some("")` matches everything.
    pub fn to_mql(&self) -> Option<String> {
        match self {
            Expr::True => Some(String::new()),
            Expr::False => None,
            Expr::Eq(f, v) => Some(format!("{}={}", f, mql_value(v))),
            Expr::Neq(f, v) => Some(format!("-{}={}", f, mql_value(v))),
            Expr::Lt(f, v) => Some(format!("{}<{}", f, mql_value(v))),
            Expr::Lte(f, v) => Some(format!("{}<={}", f, mql_value(v))),
            Expr::Gt(f, v) => Some(format!("{}>{}", f, mql_value(v))),
            Expr::Gte(f, v) => Some(format!("{}>={}", f, mql_value(v))),
            Expr::In(f, values) => {
                let items: Vec<String> = values.iter().map(mql_value).collect();
                Some(format!("{}={}", f, items.join(",")))
            }
            Expr::Contains(f, v) => Some(format!("{}:{}", f, mql_value(v))),
            Expr::ContainsIc(f, needle) => {
                Some(format!("{}:{}", f, mql_value(&Value::String(needle.clone()))))
            }
            Expr::StartsWith(..) => None,
            Expr::Has(f) => Some(format!("has:{}", f)),
            Expr::And(children) => {
                let parts = children
                    .iter()
                    .map(Expr::to_mql)
                    .collect::<Option<Vec<String>>>()?;
                let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
                Some(parts.join(" "))
            }
            Expr::Or(children) => {
                let parts = children
                    .iter()
                    .map(Expr::to_mql)
                    .collect::<Option<Vec<String>>>()?;
                Some(format!("({})", parts.join(" OR ")))
            }
            Expr::Not(child) => {
                let inner = child.to_mql()?;
                match child.as_ref() {
                    Expr::And(_) => Some(format!("-({})", inner)),
                    _ => Some(format!("-{}", inner)),
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}
