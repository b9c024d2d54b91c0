//! # Query Engine
//!
//! Executes a [`QueryPlan`] against the records a [`ResourceReader`] supplies.
//!
//! The [`QueryEngine`] trait is the seam an executor calls through; the
//! [`InMemoryEngine`] is the reference implementation. It evaluates the plan
//! row by row:
//!
//! - **Base relation**: one row per subject record, bound to the subject alias
//! - **Lateral unnest**: one row per element of a repeating element, or a
//!   single empty row when there are none
//! - **Reference joins**: hash indexes from record id, and from the ids that a
//!   reference field points at for the reverse direction
//! - **Subqueries**: evaluated once, indexed by subject identity and looked up
//!   for each outer row
//! - **Value sets**: membership checks against the materialised expansion
//!
//! Predicates use three-valued logic: an unknown operand yields
//! [`Value::Null`], and a row passes a filter only when it evaluates to true.

use atrius_path_compiler::{
    Aggregate, Alias, CompareOp, Expr, Join, JoinTarget, QueryPlan, ResourceReader, SubPlan,
    ValueSetCache,
};
use atrius_path_support::{
    Coding, QueryError, QueryResult, Value, parse_date_prefix, parse_date_time, parse_time,
};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// The rows produced by executing a plan: grouping columns first, then one
/// column per aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Executes relational plans.
pub trait QueryEngine: Send + Sync {
    fn execute(
        &self,
        plan: &QueryPlan,
        reader: &dyn ResourceReader,
        value_sets: &ValueSetCache,
    ) -> QueryResult<ResultSet>;
}

/// Reference engine that evaluates plans over in-memory records.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryEngine;

impl InMemoryEngine {
    pub fn new() -> Self {
        InMemoryEngine
    }
}

impl QueryEngine for InMemoryEngine {
    fn execute(
        &self,
        plan: &QueryPlan,
        reader: &dyn ResourceReader,
        value_sets: &ValueSetCache,
    ) -> QueryResult<ResultSet> {
        let mut evaluation = Evaluation::new(reader, value_sets);
        let rows = evaluation.relation(&plan.subject, &plan.joins)?;
        let total = rows.len();

        let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
        let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
        for row in &rows {
            if !passes(&plan.filters, row)? {
                continue;
            }
            let key = plan
                .groupings
                .iter()
                .map(|g| evaluate(g, row))
                .collect::<QueryResult<Vec<_>>>()?;
            let slot = match index.get(&key) {
                Some(slot) => *slot,
                None => {
                    let accumulators = plan.aggregations.iter().map(Accumulator::new).collect();
                    groups.push((key.clone(), accumulators));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            for (accumulator, aggregate) in groups[slot].1.iter_mut().zip(&plan.aggregations) {
                accumulator.add(evaluate(aggregate.expr(), row)?);
            }
        }

        // Without groupings an aggregate query yields one row even over no input.
        if groups.is_empty() && plan.groupings.is_empty() {
            groups.push((Vec::new(), plan.aggregations.iter().map(Accumulator::new).collect()));
        }
        debug!(rows = total, groups = groups.len(), "Executed plan");

        let columns = plan
            .groupings
            .iter()
            .map(|g| g.to_string())
            .chain(plan.aggregations.iter().map(|a| a.to_string()))
            .collect();
        let rows = groups
            .into_iter()
            .map(|(mut key, accumulators)| {
                key.extend(accumulators.into_iter().map(Accumulator::finish));
                key
            })
            .collect();
        Ok(ResultSet { columns, rows })
    }
}

type Row = HashMap<Alias, Value>;

/// Running state of one aggregate within one group.
enum Accumulator {
    Count(i64),
    CountDistinct(HashSet<Value>),
    First(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(aggregate: &Aggregate) -> Self {
        match aggregate {
            Aggregate::Count(_) => Accumulator::Count(0),
            Aggregate::CountDistinct(_) => Accumulator::CountDistinct(HashSet::new()),
            Aggregate::First(_) => Accumulator::First(None),
            Aggregate::Max(_) => Accumulator::Max(None),
        }
    }

    fn add(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::CountDistinct(seen) => {
                seen.insert(value);
            }
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            Accumulator::Max(max) => {
                if max.as_ref().is_none_or(|current| value > *current) {
                    *max = Some(value);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Integer(n),
            Accumulator::CountDistinct(seen) => Value::Integer(seen.len() as i64),
            Accumulator::First(value) | Accumulator::Max(value) => value.unwrap_or(Value::Null),
        }
    }
}

/// Per-execution state: indexes and subquery results are built on first use.
struct Evaluation<'a> {
    reader: &'a dyn ResourceReader,
    value_sets: &'a ValueSetCache,
    by_id: HashMap<String, Arc<HashMap<String, JsonValue>>>,
    referrers: HashMap<(String, Vec<String>, String), Arc<HashMap<String, Vec<JsonValue>>>>,
    subqueries: HashMap<Alias, Arc<HashMap<Value, Value>>>,
    value_set_indexes: HashMap<String, Arc<ExpansionIndex>>,
}

impl<'a> Evaluation<'a> {
    fn new(reader: &'a dyn ResourceReader, value_sets: &'a ValueSetCache) -> Self {
        Evaluation {
            reader,
            value_sets,
            by_id: HashMap::new(),
            referrers: HashMap::new(),
            subqueries: HashMap::new(),
            value_set_indexes: HashMap::new(),
        }
    }

    /// The subject's base relation extended with `joins`, which must be in
    /// dependency order.
    fn relation(&mut self, subject: &Alias, joins: &[Join]) -> QueryResult<Vec<Row>> {
        let base = self.reader.read(subject.name())?;
        let mut rows: Vec<Row> = base
            .records
            .iter()
            .map(|record| {
                let mut row = Row::new();
                row.insert(subject.clone(), Value::Json(record.resource.clone()));
                row
            })
            .collect();
        for join in joins {
            rows = self.apply(join, rows)?;
        }
        Ok(rows)
    }

    fn apply(&mut self, join: &Join, rows: Vec<Row>) -> QueryResult<Vec<Row>> {
        let alias = &join.alias;
        let mut out = Vec::with_capacity(rows.len());
        match &join.target {
            JoinTarget::Unnest { source } => {
                for row in rows {
                    match evaluate(source, &row)? {
                        Value::Json(JsonValue::Array(items)) if !items.is_empty() => {
                            for item in &items {
                                out.push(bind(&row, alias, Value::from_json(item)));
                            }
                        }
                        Value::Json(JsonValue::Array(_)) | Value::Null => {
                            out.push(bind(&row, alias, Value::Null));
                        }
                        single => out.push(bind(&row, alias, single)),
                    }
                }
            }
            JoinTarget::Resolve {
                record_type,
                reference,
            } => {
                let index = self.records_by_id(record_type)?;
                for row in rows {
                    let target = reference_key(&evaluate(reference, &row)?, record_type)
                        .and_then(|id| index.get(&id))
                        .map(|resource| Value::Json(resource.clone()))
                        .unwrap_or(Value::Null);
                    out.push(bind(&row, alias, target));
                }
            }
            JoinTarget::ReverseResolve {
                record_type,
                field,
                anchor_type,
                anchor,
            } => {
                let index = self.referrers(record_type, field, anchor_type)?;
                for row in rows {
                    let matches = match evaluate(anchor, &row)? {
                        Value::String(id) => index.get(&id),
                        _ => None,
                    };
                    match matches {
                        Some(referrers) => {
                            for referrer in referrers {
                                out.push(bind(&row, alias, Value::Json(referrer.clone())));
                            }
                        }
                        None => out.push(bind(&row, alias, Value::Null)),
                    }
                }
            }
            JoinTarget::Subquery { plan, key } => {
                let table = self.subquery(alias, plan)?;
                for row in rows {
                    let value = table
                        .get(&evaluate(key, &row)?)
                        .cloned()
                        .unwrap_or(Value::Null);
                    out.push(bind(&row, alias, value));
                }
            }
            JoinTarget::ValueSet { table, coding } => {
                let index = self.value_set(table)?;
                for row in rows {
                    let matched = codings_of(&evaluate(coding, &row)?)
                        .into_iter()
                        .find(|c| index.contains(c))
                        .map(Value::Coding)
                        .unwrap_or(Value::Null);
                    out.push(bind(&row, alias, matched));
                }
            }
        }
        Ok(out)
    }

    fn value_set(&mut self, table: &str) -> QueryResult<Arc<ExpansionIndex>> {
        if let Some(index) = self.value_set_indexes.get(table) {
            return Ok(index.clone());
        }
        let expansion = self.value_sets.get(table).ok_or_else(|| {
            QueryError::Execution(format!("Value set table {} has not been materialised", table))
        })?;
        let index = Arc::new(ExpansionIndex::new(&expansion.codings));
        debug!(table, codes = index.members.len(), "Indexed value set expansion");
        self.value_set_indexes.insert(table.to_string(), index.clone());
        Ok(index)
    }

    fn records_by_id(&mut self, record_type: &str) -> QueryResult<Arc<HashMap<String, JsonValue>>> {
        if let Some(index) = self.by_id.get(record_type) {
            return Ok(index.clone());
        }
        let relation = self.reader.read(record_type)?;
        let index: HashMap<String, JsonValue> = relation
            .records
            .iter()
            .map(|r| (r.id.clone(), r.resource.clone()))
            .collect();
        debug!(record_type, records = index.len(), "Indexed records by id");
        let index = Arc::new(index);
        self.by_id.insert(record_type.to_string(), index.clone());
        Ok(index)
    }

    /// Records of `record_type` keyed by the `anchor_type` id their `field`
    /// points at. A record appears once under each distinct id it refers to.
    fn referrers(
        &mut self,
        record_type: &str,
        field: &[String],
        anchor_type: &str,
    ) -> QueryResult<Arc<HashMap<String, Vec<JsonValue>>>> {
        let key = (record_type.to_string(), field.to_vec(), anchor_type.to_string());
        if let Some(index) = self.referrers.get(&key) {
            return Ok(index.clone());
        }
        let relation = self.reader.read(record_type)?;
        let mut index: HashMap<String, Vec<JsonValue>> = HashMap::new();
        for record in relation.records.iter() {
            let mut ids: Vec<String> = references_at(&record.resource, field)
                .into_iter()
                .filter_map(|r| reference_key(&Value::from_json(r), anchor_type))
                .collect();
            ids.sort();
            ids.dedup();
            for id in ids {
                index.entry(id).or_default().push(record.resource.clone());
            }
        }
        debug!(record_type, anchor_type, targets = index.len(), "Indexed reverse references");
        let index = Arc::new(index);
        self.referrers.insert(key, index.clone());
        Ok(index)
    }

    /// Evaluates a per-identity subquery into a map from identity to value.
    fn subquery(&mut self, alias: &Alias, plan: &SubPlan) -> QueryResult<Arc<HashMap<Value, Value>>> {
        if let Some(table) = self.subqueries.get(alias) {
            return Ok(table.clone());
        }
        let identity = Expr::column(plan.subject.clone(), vec!["id".to_string()]);
        let mut groups: HashMap<Value, Accumulator> = HashMap::new();
        for row in self.relation(&plan.subject, &plan.joins)? {
            let key = evaluate(&identity, &row)?;
            let value = evaluate(plan.aggregate.expr(), &row)?;
            groups
                .entry(key)
                .or_insert_with(|| Accumulator::new(&plan.aggregate))
                .add(value);
        }
        let table: HashMap<Value, Value> = groups
            .into_iter()
            .map(|(key, accumulator)| (key, accumulator.finish()))
            .collect();
        debug!(alias = %alias, keys = table.len(), "Evaluated subquery");
        let table = Arc::new(table);
        self.subqueries.insert(alias.clone(), table.clone());
        Ok(table)
    }
}

/// Expansion codes keyed by (system, code), with the versions listed for each.
struct ExpansionIndex {
    members: HashMap<(String, String), Vec<Option<String>>>,
}

impl ExpansionIndex {
    fn new(codings: &[Coding]) -> Self {
        let mut members: HashMap<(String, String), Vec<Option<String>>> = HashMap::new();
        for coding in codings {
            if let (Some(system), Some(code)) = (&coding.system, &coding.code) {
                members
                    .entry((system.clone(), code.clone()))
                    .or_default()
                    .push(coding.version.clone());
            }
        }
        ExpansionIndex { members }
    }

    /// Coded equality against any member: versions only matter when both
    /// sides have one.
    fn contains(&self, coding: &Coding) -> bool {
        let (Some(system), Some(code)) = (&coding.system, &coding.code) else {
            return false;
        };
        self.members
            .get(&(system.clone(), code.clone()))
            .is_some_and(|versions| {
                versions.iter().any(|version| match (version, &coding.version) {
                    (Some(member), Some(wanted)) => member == wanted,
                    _ => true,
                })
            })
    }
}

fn bind(row: &Row, alias: &Alias, value: Value) -> Row {
    let mut row = row.clone();
    row.insert(alias.clone(), value);
    row
}

fn passes(filters: &[Expr], row: &Row) -> QueryResult<bool> {
    for filter in filters {
        if evaluate(filter, row)?.as_bool() != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates a scalar expression against one row.
fn evaluate(expr: &Expr, row: &Row) -> QueryResult<Value> {
    Ok(match expr {
        Expr::Column { alias, path } => {
            let bound = row.get(alias).ok_or_else(|| {
                QueryError::Internal(format!("Alias {} is not bound in this relation", alias))
            })?;
            path.iter().fold(bound.clone(), |value, name| field(&value, name))
        }
        Expr::Field { base, name } => field(&evaluate(base, row)?, name),
        Expr::Literal(value) => value.clone(),
        Expr::Compare { op, left, right } => {
            compare(*op, &evaluate(left, row)?, &evaluate(right, row)?)
        }
        Expr::CodingEquals(left, right) => {
            let (left, right) = (evaluate(left, row)?, evaluate(right, row)?);
            match (left.as_coding(), right.as_coding()) {
                (Some(left), Some(right)) => truth(left.equals(&right)),
                _ => Value::Null,
            }
        }
        Expr::AnyCodingEquals { concept, coding } => {
            let Some(coding) = evaluate(coding, row)?.as_coding() else {
                return Ok(Value::Null);
            };
            let mut result = None;
            for member in codings_of(&evaluate(concept, row)?) {
                match member.equals(&coding) {
                    Some(true) => return Ok(Value::Boolean(true)),
                    Some(false) => result = Some(false),
                    None => {}
                }
            }
            truth(result)
        }
        Expr::And(left, right) => {
            let (left, right) = (boolean(left, row)?, boolean(right, row)?);
            match (left, right) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            }
        }
        Expr::Or(left, right) => {
            let (left, right) = (boolean(left, row)?, boolean(right, row)?);
            match (left, right) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        Expr::Xor(left, right) => match (boolean(left, row)?, boolean(right, row)?) {
            (Some(left), Some(right)) => Value::Boolean(left != right),
            _ => Value::Null,
        },
        Expr::Implies(left, right) => {
            let (left, right) = (boolean(left, row)?, boolean(right, row)?);
            match (left, right) {
                (Some(false), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(true), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        Expr::Not(inner) => truth(boolean(inner, row)?.map(|b| !b)),
        Expr::ToDate(inner) => evaluate(inner, row)?
            .as_date()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Expr::DateFormat { value, pattern } => date_format(&evaluate(value, row)?, pattern),
        Expr::IsNotNull(inner) => Value::Boolean(!evaluate(inner, row)?.is_null()),
        Expr::Case {
            when,
            then,
            otherwise,
        } => {
            if boolean(when, row)? == Some(true) {
                evaluate(then, row)?
            } else {
                evaluate(otherwise, row)?
            }
        }
        Expr::Coalesce(items) => {
            for item in items {
                let value = evaluate(item, row)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Value::Null
        }
        Expr::ReferenceKey {
            reference,
            record_type,
        } => reference_key(&evaluate(reference, row)?, record_type)
            .map(Value::String)
            .unwrap_or(Value::Null),
        Expr::RefersTo {
            reference,
            record_type,
            id,
        } => match evaluate(id, row)? {
            Value::String(id) => {
                let reference = evaluate(reference, row)?;
                let json = reference.to_json();
                Value::Boolean(
                    references_at(&json, &[])
                        .into_iter()
                        .any(|r| reference_key(&Value::from_json(r), record_type).as_ref() == Some(&id)),
                )
            }
            _ => Value::Null,
        },
    })
}

fn boolean(expr: &Expr, row: &Row) -> QueryResult<Option<bool>> {
    Ok(evaluate(expr, row)?.as_bool())
}

fn truth(value: Option<bool>) -> Value {
    value.map(Value::Boolean).unwrap_or(Value::Null)
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    match op {
        CompareOp::Equal => truth(left.equals(right)),
        CompareOp::NotEqual => truth(left.equals(right).map(|b| !b)),
        _ => truth(left.compare(right).map(|ordering| op.test(ordering))),
    }
}

/// A member of a structured value. Coded values expose their parts.
fn field(value: &Value, name: &str) -> Value {
    match value {
        Value::Json(JsonValue::Object(object)) => {
            object.get(name).map(Value::from_json).unwrap_or(Value::Null)
        }
        Value::Coding(coding) => {
            let part = match name {
                "system" => &coding.system,
                "version" => &coding.version,
                "code" => &coding.code,
                "display" => &coding.display,
                _ => return Value::Null,
            };
            part.clone().map(Value::String).unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// The codings a value carries: itself if it is a Coding, or the `coding`
/// array of a CodeableConcept.
fn codings_of(value: &Value) -> Vec<Coding> {
    match value {
        Value::Json(json @ JsonValue::Object(object)) => match object.get("coding") {
            Some(JsonValue::Array(codings)) => codings.iter().filter_map(Coding::from_json).collect(),
            Some(_) => Vec::new(),
            None => Coding::from_json(json).into_iter().collect(),
        },
        Value::Coding(coding) => vec![coding.clone()],
        _ => Vec::new(),
    }
}

/// Every value found at `path` below `json`, flattening arrays on the way.
fn references_at<'j>(json: &'j JsonValue, path: &[String]) -> Vec<&'j JsonValue> {
    match json {
        JsonValue::Array(items) => items.iter().flat_map(|item| references_at(item, path)).collect(),
        JsonValue::Null => Vec::new(),
        _ => match path.split_first() {
            None => vec![json],
            Some((head, rest)) => json
                .get(head)
                .map(|child| references_at(child, rest))
                .unwrap_or_default(),
        },
    }
}

/// The id a reference points at, when it points at a `record_type` record.
///
/// Accepts relative (`Patient/123`) and absolute references, with or
/// without a trailing `_history/<version>`.
pub fn reference_key(reference: &Value, record_type: &str) -> Option<String> {
    let text = match reference {
        Value::Json(json) => json.get("reference")?.as_str()?.to_string(),
        Value::String(text) => text.clone(),
        _ => return None,
    };
    let mut segments: Vec<&str> = text.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 4 && segments[segments.len() - 2] == "_history" {
        segments.truncate(segments.len() - 2);
    }
    match segments.as_slice() {
        [.., kind, id] if *kind == record_type => Some((*id).to_string()),
        _ => None,
    }
}

/// Formats a temporal value, or gives no value when the pattern asks for a
/// field the value does not have.
fn date_format(value: &Value, pattern: &str) -> Value {
    let mut out = String::new();
    let written = match value {
        Value::Date(date) => write!(out, "{}", date.format(pattern)),
        Value::DateTime(date_time) => write!(out, "{}", date_time.format(pattern)),
        Value::Time(time) => write!(out, "{}", time.format(pattern)),
        Value::String(text) => {
            if let Some(date_time) = parse_date_time(text).filter(|_| text.contains('T')) {
                write!(out, "{}", date_time.format(pattern))
            } else if let Some(date) = parse_date_prefix(text) {
                write!(out, "{}", date.format(pattern))
            } else if let Some(time) = parse_time(text) {
                write!(out, "{}", time.format(pattern))
            } else {
                return Value::Null;
            }
        }
        _ => return Value::Null,
    };
    match written {
        Ok(()) => Value::String(out),
        Err(_) => Value::Null,
    }
}
