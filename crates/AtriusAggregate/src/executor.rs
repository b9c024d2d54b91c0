//! # Aggregate Executor
//!
//! Drives one request through its states:
//!
//! ```text
//! Received -> Validated -> Compiled -> Planned -> Executed -> Shaped
//! ```
//!
//! Every transition is logged. A failure in any state ends the request with
//! the error of that state; errors raised while compiling name the
//! sub-expression that failed. All expressions of a request are compiled with
//! one [`CompilationContext`], so they share aliases and joins.

use atrius_path_compiler::{
    Alias, CompilationContext, CompiledExpression, QueryPlan, ResourceReader, compile,
};
use atrius_path_support::{
    QueryResult, Value, ValueKind, parse_date_prefix, parse_date_time, parse_time,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::ResultSet;
use crate::planner::{self, CompiledRequest};
use crate::request::AggregateRequest;
use crate::response::{AggregateResponse, ResultGrouping};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Received,
    Validated,
    Compiled,
    Planned,
    Executed,
    Shaped,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Executes aggregate requests against one reader.
pub struct AggregateExecutor {
    config: EngineConfig,
    reader: Arc<dyn ResourceReader>,
}

/// One request on its way through the states.
struct Execution<'a> {
    request: &'a AggregateRequest,
    state: ExecutionState,
}

impl<'a> Execution<'a> {
    fn new(request: &'a AggregateRequest) -> Self {
        info!(
            subject = %request.subject,
            aggregations = request.aggregations.len(),
            groupings = request.groupings.len(),
            filters = request.filters.len(),
            "Received aggregate request"
        );
        Execution {
            request,
            state: ExecutionState::Received,
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug!(subject = %self.request.subject, from = %self.state, to = %next, "Request state changed");
        self.state = next;
    }

    /// Runs one step, logging a failure against the current state.
    fn step<T>(&mut self, result: QueryResult<T>, next: ExecutionState) -> QueryResult<T> {
        match result {
            Ok(value) => {
                self.advance(next);
                Ok(value)
            }
            Err(error) => {
                warn!(subject = %self.request.subject, state = %self.state, error = %error, "Aggregate request failed");
                Err(error)
            }
        }
    }
}

impl AggregateExecutor {
    pub fn new(config: EngineConfig, reader: Arc<dyn ResourceReader>) -> Self {
        AggregateExecutor { config, reader }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates, compiles and plans a request without executing it.
    pub fn explain(&self, request: &AggregateRequest) -> QueryResult<QueryPlan> {
        let mut execution = Execution::new(request);
        let (_, plan) = self.prepare(&mut execution)?;
        Ok(plan)
    }

    pub fn execute(&self, request: &AggregateRequest) -> QueryResult<AggregateResponse> {
        let mut execution = Execution::new(request);
        let (compiled, plan) = self.prepare(&mut execution)?;

        let result = self
            .config
            .engine()
            .execute(&plan, self.reader.as_ref(), self.config.value_set_cache());
        let result = execution.step(result, ExecutionState::Executed)?;

        let response = shape(request, &compiled, result);
        let response = execution.step(Ok(response), ExecutionState::Shaped)?;
        info!(subject = %request.subject, groupings = response.groupings.len(), "Completed aggregate request");
        Ok(response)
    }

    fn prepare(&self, execution: &mut Execution<'_>) -> QueryResult<(CompiledRequest, QueryPlan)> {
        let request = execution.request;
        execution.step(request.validate(), ExecutionState::Validated)?;

        let compiled = self.compile(request);
        let compiled = execution.step(compiled, ExecutionState::Compiled)?;

        let plan = planner::plan(&Alias::root(&request.subject), &compiled);
        let plan = execution.step(plan, ExecutionState::Planned)?;
        debug!(plan = %plan, "Query plan");
        Ok((compiled, plan))
    }

    fn compile(&self, request: &AggregateRequest) -> QueryResult<CompiledRequest> {
        let mut ctx = CompilationContext::new(
            self.config.compiler(),
            &request.subject,
            self.reader.available_record_types(),
        )?;
        let mut compiled = CompiledRequest::default();
        for filter in &request.filters {
            let filter = compile(filter, &mut ctx)?;
            planner::check_filter(&filter)?;
            compiled.filters.push(filter);
        }
        for grouping in &request.groupings {
            let grouping = compile(&grouping.expression, &mut ctx)?;
            planner::check_grouping(&grouping)?;
            compiled.groupings.push(grouping);
        }
        for aggregation in &request.aggregations {
            let aggregation = compile(&aggregation.expression, &mut ctx)?;
            planner::check_aggregation(&aggregation)?;
            compiled.aggregations.push(aggregation);
        }
        Ok(compiled)
    }
}

/// The FHIR type a grouping or result is reported as.
fn response_type(expression: &CompiledExpression) -> String {
    if expression.kind == ValueKind::Coding {
        return "Coding".to_string();
    }
    match expression.type_code.as_deref() {
        Some(code) if !code.is_empty() && expression.kind != ValueKind::Null => code.to_string(),
        _ => match expression.kind {
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Decimal => "decimal",
            ValueKind::Date => "date",
            ValueKind::DateTime => "dateTime",
            ValueKind::Time => "time",
            _ => "string",
        }
        .to_string(),
    }
}

/// Converts an engine value to the logical type of its expression.
///
/// Temporal values are grouped on their stored text, so a partial date such
/// as `1980-01` is reported at its stored precision: text is converted only
/// when the typed value renders back to the same text.
fn typed(value: Value, kind: ValueKind) -> Option<Value> {
    if value.is_null() {
        return None;
    }
    Some(match (kind, value) {
        (ValueKind::Date | ValueKind::DateTime | ValueKind::Time, Value::String(text)) => {
            let converted = match kind {
                ValueKind::Date => parse_date_prefix(&text).map(Value::Date),
                ValueKind::DateTime => parse_date_time(&text).map(Value::DateTime),
                _ => parse_time(&text).map(Value::Time),
            };
            match converted {
                Some(converted) if converted.to_json().as_str() == Some(text.as_str()) => converted,
                _ => Value::String(text),
            }
        }
        (ValueKind::Decimal, Value::Integer(i)) => Value::Decimal(Decimal::from(i)),
        (ValueKind::Coding, value) => value.as_coding().map(Value::Coding)?,
        (_, value) => value,
    })
}

fn shape(request: &AggregateRequest, compiled: &CompiledRequest, result: ResultSet) -> AggregateResponse {
    let kinds: Vec<ValueKind> = compiled.groupings.iter().map(|g| g.kind).collect();
    let result_kinds: Vec<ValueKind> = compiled
        .aggregations
        .iter()
        .map(|a| a.kind)
        .collect();
    let width = kinds.len();

    let groupings = result
        .rows
        .into_iter()
        .map(|row| {
            let mut cells = row.into_iter();
            let labels = kinds
                .iter()
                .zip(cells.by_ref().take(width))
                .map(|(kind, value)| typed(value, *kind))
                .collect();
            let results = result_kinds
                .iter()
                .zip(cells)
                .map(|(kind, value)| typed(value, *kind))
                .collect();
            ResultGrouping { labels, results }
        })
        .collect();

    let mut response = AggregateResponse {
        columns: request
            .groupings
            .iter()
            .chain(&request.aggregations)
            .map(|e| e.display().to_string())
            .collect(),
        label_types: compiled.groupings.iter().map(response_type).collect(),
        result_types: compiled.aggregations.iter().map(response_type).collect(),
        groupings,
    };
    response.sort();
    response
}
