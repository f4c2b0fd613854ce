//! Query object model with local MongoDB-style evaluation.
//!
//! The core itself only builds two queries — "ids ∈ {…}" and "empty" — but
//! both the entity store and the network gateway execute arbitrary caller
//! queries with identical semantics, so the local evaluator implements the
//! common operator set with array lifting.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{Result, TideStoreError};
use crate::types::ID_FIELD;

// ============================================================================
// Sort
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortEntry {
    pub field: String,
    pub direction: SortDirection,
}

// ============================================================================
// Query
// ============================================================================

/// Filter, sort, and pagination over a collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// MongoDB-style filter object.
    pub filter: Option<Value>,
    pub sort: Option<Vec<SortEntry>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// The query matching every entity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The query matching entities whose id is in `ids`.
    pub fn ids_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = ids.into_iter().map(|s| Value::String(s.into())).collect();
        let mut cond = Map::new();
        cond.insert("$in".to_string(), Value::Array(ids));
        let mut filter = Map::new();
        filter.insert(ID_FIELD.to_string(), Value::Object(cond));
        Self::new(Value::Object(filter))
    }

    /// True when no filter, sort, or pagination is set.
    pub fn is_unfiltered(&self) -> bool {
        let filter_empty = match &self.filter {
            None => true,
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        };
        filter_empty && self.sort.is_none() && self.limit.is_none() && self.skip.is_none()
    }

    /// If this query is exactly an "ids ∈ {…}" restriction, return the ids.
    pub fn restricted_ids(&self) -> Option<Vec<String>> {
        let filter = self.filter.as_ref()?.as_object()?;
        if filter.len() != 1 {
            return None;
        }
        let cond = filter.get(ID_FIELD)?.as_object()?;
        if cond.len() != 1 {
            return None;
        }
        let ids = cond.get("$in")?.as_array()?;
        ids.iter()
            .map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(SortEntry {
            field: field.into(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(SortEntry {
            field: field.into(),
            direction: SortDirection::Desc,
        });
        self
    }

    /// Reject filters that are not objects. Operator errors surface lazily
    /// during evaluation.
    pub fn validate(&self) -> Result<()> {
        match &self.filter {
            None | Some(Value::Object(_)) => Ok(()),
            Some(other) => Err(TideStoreError::InvalidArgument(format!(
                "query filter must be an object, got {other}"
            ))),
        }
    }

    /// Evaluate the filter against a single entity.
    pub fn matches(&self, entity: &Value) -> Result<bool> {
        match &self.filter {
            None => Ok(true),
            Some(filter) => evaluate_filter(filter, entity),
        }
    }

    /// Filter, sort, and paginate a result set.
    pub fn apply(&self, entities: Vec<Value>) -> Result<Vec<Value>> {
        let mut matched = Vec::with_capacity(entities.len());
        for entity in entities {
            if self.matches(&entity)? {
                matched.push(entity);
            }
        }

        if let Some(sort) = &self.sort {
            matched.sort_by(|a, b| {
                for entry in sort {
                    let va = get_field_value(a, &entry.field).unwrap_or(&Value::Null);
                    let vb = get_field_value(b, &entry.field).unwrap_or(&Value::Null);
                    let ord = match entry.direction {
                        SortDirection::Asc => compare_values(va, vb),
                        SortDirection::Desc => compare_values(vb, va),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = self.skip.unwrap_or(0);
        let mut out: Vec<Value> = matched.into_iter().skip(skip).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

// ============================================================================
// Value comparison
// ============================================================================

/// Compare two JSON values for ordering. Nulls sort to the end, numbers by
/// f64, strings by codepoint, cross-type by rank.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

// ============================================================================
// Field path resolution
// ============================================================================

/// Get a nested value using a dot-separated path. `None` if any segment is
/// missing or a parent is not an object.
pub fn get_field_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// True if `value` is a non-empty object where all keys start with `$`.
fn is_operator(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) if !obj.is_empty() => obj.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

// ============================================================================
// Filter evaluation
// ============================================================================

fn evaluate_filter(filter: &Value, entity: &Value) -> Result<bool> {
    let obj = match filter.as_object() {
        Some(o) => o,
        None => {
            return Err(TideStoreError::InvalidArgument(format!(
                "query filter must be an object, got {filter}"
            )))
        }
    };

    for (key, condition) in obj {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = expect_clauses(key, condition)?;
                let mut all = true;
                for clause in clauses {
                    if !evaluate_filter(clause, entity)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let clauses = expect_clauses(key, condition)?;
                let mut any = false;
                for clause in clauses {
                    if evaluate_filter(clause, entity)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            _ if key.starts_with('$') => {
                return Err(TideStoreError::InvalidArgument(format!(
                    "unknown top-level operator: {key}"
                )))
            }
            field => {
                let value = get_field_value(entity, field).unwrap_or(&Value::Null);
                evaluate_condition(value, condition)?
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn expect_clauses<'a>(op: &str, condition: &'a Value) -> Result<&'a Vec<Value>> {
    condition.as_array().ok_or_else(|| {
        TideStoreError::InvalidArgument(format!("{op} expects an array of clauses"))
    })
}

/// Evaluate one field condition: either an operator object or an implicit
/// equality. Arrays lift: a scalar condition matches if any element matches.
fn evaluate_condition(value: &Value, condition: &Value) -> Result<bool> {
    if is_operator(condition) {
        for (op, operand) in condition.as_object().expect("checked above") {
            if !evaluate_lifted_operator(value, op, operand)? {
                return Ok(false);
            }
        }
        Ok(true)
    } else {
        // Implicit equality, with array lifting.
        if value == condition {
            return Ok(true);
        }
        if let Value::Array(elements) = value {
            return Ok(elements.iter().any(|e| e == condition));
        }
        Ok(false)
    }
}

fn evaluate_lifted_operator(value: &Value, op: &str, operand: &Value) -> Result<bool> {
    if let Value::Array(elements) = value {
        // Negated operators require the whole array (and every element) to
        // miss; everything else matches if the array or any element does.
        if matches!(op, "$ne" | "$nin") {
            if !evaluate_scalar_operator(value, op, operand)? {
                return Ok(false);
            }
            for element in elements {
                if !evaluate_scalar_operator(element, op, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        if evaluate_scalar_operator(value, op, operand)? {
            return Ok(true);
        }
        for element in elements {
            if evaluate_scalar_operator(element, op, operand)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    evaluate_scalar_operator(value, op, operand)
}

fn evaluate_scalar_operator(value: &Value, op: &str, operand: &Value) -> Result<bool> {
    match op {
        "$eq" => Ok(value == operand),
        "$ne" => Ok(value != operand),
        "$gt" => {
            if value.is_null() || operand.is_null() {
                return Ok(false);
            }
            Ok(compare_values(value, operand) == Ordering::Greater)
        }
        "$gte" => {
            if value.is_null() || operand.is_null() {
                return Ok(false);
            }
            Ok(compare_values(value, operand) != Ordering::Less)
        }
        "$lt" => {
            if value.is_null() || operand.is_null() {
                return Ok(false);
            }
            Ok(compare_values(value, operand) == Ordering::Less)
        }
        "$lte" => {
            if value.is_null() || operand.is_null() {
                return Ok(false);
            }
            Ok(compare_values(value, operand) != Ordering::Greater)
        }
        "$in" => {
            let candidates = operand.as_array().ok_or_else(|| {
                TideStoreError::InvalidArgument("$in expects an array".to_string())
            })?;
            Ok(candidates.iter().any(|c| c == value))
        }
        "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                TideStoreError::InvalidArgument("$nin expects an array".to_string())
            })?;
            Ok(!candidates.iter().any(|c| c == value))
        }
        "$exists" => {
            let wanted = operand.as_bool().ok_or_else(|| {
                TideStoreError::InvalidArgument("$exists expects a boolean".to_string())
            })?;
            Ok(!value.is_null() == wanted)
        }
        "$regex" => {
            let pattern = operand.as_str().ok_or_else(|| {
                TideStoreError::InvalidArgument("$regex expects a string".to_string())
            })?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| TideStoreError::InvalidArgument(format!("invalid regex: {e}")))?;
            Ok(value.as_str().is_some_and(|s| re.is_match(s)))
        }
        other => Err(TideStoreError::InvalidArgument(format!(
            "unknown operator: {other}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
