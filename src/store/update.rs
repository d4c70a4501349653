use crate::model::{ReservationId, ReservationStatus, ResourceId, Timestamp};
use crate::time::format_for_store;

/// A bind parameter. Timestamps are carried pre-rendered in the store format
/// and cast server-side, so no caller ever formats one by hand.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Timestamp(String),
    IntList(Vec<i64>),
    TextList(Vec<String>),
}

impl SqlValue {
    pub fn timestamp(t: Timestamp) -> Self {
        SqlValue::Timestamp(format_for_store(t))
    }

    fn placeholder(&self, n: usize) -> String {
        match self {
            SqlValue::Timestamp(_) => format!("${n}::timestamp"),
            _ => format!("${n}"),
        }
    }
}

impl From<ResourceId> for SqlValue {
    fn from(v: ResourceId) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<&[ReservationId]> for SqlValue {
    fn from(v: &[ReservationId]) -> Self {
        SqlValue::IntList(v.to_vec())
    }
}

impl From<&[ReservationStatus]> for SqlValue {
    fn from(v: &[ReservationStatus]) -> Self {
        SqlValue::TextList(v.iter().map(|s| s.as_str().to_string()).collect())
    }
}

/// Conditional `UPDATE` assembled from `(column, value)` pairs.
///
/// Column names are `&'static str` so only identifiers written in source can
/// reach the statement text; values always travel as numbered parameters.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: &'static str,
    sets: Vec<(&'static str, SqlValue)>,
    conditions: Vec<Condition>,
    returning: Option<&'static str>,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(&'static str, SqlValue),
    Lt(&'static str, SqlValue),
    AnyOf(&'static str, SqlValue),
    /// `(a < $n OR b < $n)` sharing one parameter.
    EitherLt(&'static str, &'static str, SqlValue),
    EitherNotNull(&'static str, &'static str),
}

impl UpdateBuilder {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
            conditions: Vec::new(),
            returning: None,
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.sets.push((column, value.into()));
        self
    }

    pub fn set_null(mut self, column: &'static str) -> Self {
        self.sets.push((column, SqlValue::Null));
        self
    }

    pub fn where_eq(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Eq(column, value.into()));
        self
    }

    pub fn where_lt(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Lt(column, value.into()));
        self
    }

    pub fn where_any(mut self, column: &'static str, values: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::AnyOf(column, values.into()));
        self
    }

    pub fn where_either_lt(mut self, a: &'static str, b: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::EitherLt(a, b, value.into()));
        self
    }

    pub fn where_either_not_null(mut self, a: &'static str, b: &'static str) -> Self {
        self.conditions.push(Condition::EitherNotNull(a, b));
        self
    }

    pub fn returning(mut self, column: &'static str) -> Self {
        self.returning = Some(column);
        self
    }

    /// Render the statement and its parameters in bind order.
    pub fn build(&self) -> (String, Vec<SqlValue>) {
        let mut params = Vec::with_capacity(self.sets.len() + self.conditions.len());
        let push = |v: &SqlValue, params: &mut Vec<SqlValue>| {
            params.push(v.clone());
            v.placeholder(params.len())
        };

        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|(col, v)| match v {
                SqlValue::Null => format!("{col} = NULL"),
                v => format!("{col} = {}", push(v, &mut params)),
            })
            .collect();

        let conds: Vec<String> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Eq(col, v) => format!("{col} = {}", push(v, &mut params)),
                Condition::Lt(col, v) => format!("{col} < {}", push(v, &mut params)),
                Condition::AnyOf(col, v) => format!("{col} = ANY({})", push(v, &mut params)),
                Condition::EitherLt(a, b, v) => {
                    let p = push(v, &mut params);
                    format!("({a} < {p} OR {b} < {p})")
                }
                Condition::EitherNotNull(a, b) => format!("({a} IS NOT NULL OR {b} IS NOT NULL)"),
            })
            .collect();

        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        if !conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        if let Some(col) = self.returning {
            sql.push_str(" RETURNING ");
            sql.push_str(col);
        }
        (sql, params)
    }
}
