//! Aggregation object model with local evaluation for the cache phase of
//! `group`. The network phase ships the same aggregation to the backend's
//! `_group` endpoint.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::error::{Result, TideStoreError};
use crate::query::get_field_value;

/// How grouped entities reduce to a row value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reducer {
    /// Number of entities per group, reported as `count`.
    Count,
    /// Sum of a numeric field, reported as `sum`.
    Sum(String),
    /// Minimum of a field, reported as `min`.
    Min(String),
    /// Maximum of a field, reported as `max`.
    Max(String),
    /// Mean of a numeric field, reported as `average`.
    Average(String),
}

/// Group-by aggregation over a collection.
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Fields whose value tuple identifies a group. Empty → one global group.
    pub key: Vec<String>,
    pub reducer: Reducer,
}

impl Aggregation {
    pub fn count<I, S>(key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            reducer: Reducer::Count,
        }
    }

    pub fn sum<I, S>(key: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            reducer: Reducer::Sum(field.into()),
        }
    }

    pub fn min<I, S>(key: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            reducer: Reducer::Min(field.into()),
        }
    }

    pub fn max<I, S>(key: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            reducer: Reducer::Max(field.into()),
        }
    }

    pub fn average<I, S>(key: I, field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            reducer: Reducer::Average(field.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let field = match &self.reducer {
            Reducer::Count => return Ok(()),
            Reducer::Sum(f) | Reducer::Min(f) | Reducer::Max(f) | Reducer::Average(f) => f,
        };
        if field.is_empty() {
            return Err(TideStoreError::InvalidArgument(
                "aggregation reduce field must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Evaluate the aggregation over a local entity snapshot. Rows carry the
    /// key fields plus the reducer result, ordered by key tuple.
    pub fn process(&self, entities: &[Value]) -> Result<Vec<Value>> {
        self.validate()?;

        let mut groups: BTreeMap<String, (Map<String, Value>, Vec<&Value>)> = BTreeMap::new();
        for entity in entities {
            let mut key_obj = Map::new();
            for field in &self.key {
                let v = get_field_value(entity, field)
                    .cloned()
                    .unwrap_or(Value::Null);
                key_obj.insert(field.clone(), v);
            }
            let key = Value::Object(key_obj.clone()).to_string();
            groups
                .entry(key)
                .or_insert_with(|| (key_obj, Vec::new()))
                .1
                .push(entity);
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (_, (key_obj, members)) in groups {
            let mut row = key_obj;
            match &self.reducer {
                Reducer::Count => {
                    row.insert("count".to_string(), json!(members.len()));
                }
                Reducer::Sum(field) => {
                    row.insert("sum".to_string(), json!(numeric_sum(&members, field)));
                }
                Reducer::Average(field) => {
                    let (sum, n) = numeric_sum_count(&members, field);
                    let avg = if n == 0 { 0.0 } else { sum / n as f64 };
                    row.insert("average".to_string(), json!(avg));
                }
                Reducer::Min(field) => {
                    let v = extreme(&members, field, std::cmp::Ordering::Less);
                    row.insert("min".to_string(), v);
                }
                Reducer::Max(field) => {
                    let v = extreme(&members, field, std::cmp::Ordering::Greater);
                    row.insert("max".to_string(), v);
                }
            }
            rows.push(Value::Object(row));
        }
        Ok(rows)
    }
}

fn numeric_sum(members: &[&Value], field: &str) -> f64 {
    numeric_sum_count(members, field).0
}

fn numeric_sum_count(members: &[&Value], field: &str) -> (f64, usize) {
    let mut sum = 0.0;
    let mut n = 0;
    for m in members {
        if let Some(v) = get_field_value(m, field).and_then(Value::as_f64) {
            sum += v;
            n += 1;
        }
    }
    (sum, n)
}

fn extreme(members: &[&Value], field: &str, keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for m in members {
        let Some(v) = get_field_value(m, field) else {
            continue;
        };
        if v.is_null() {
            continue;
        }
        best = match best {
            None => Some(v),
            Some(b) => {
                if crate::query::compare_values(v, b) == keep {
                    Some(v)
                } else {
                    Some(b)
                }
            }
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
