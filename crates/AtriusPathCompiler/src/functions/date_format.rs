//! `dateFormat(pattern)`.
//!
//! Patterns use the familiar letter runs (`yyyy-MM-dd`, `HH:mm:ss`) with
//! quoted literal text, and are translated to a chrono format string when the
//! expression is compiled. A pattern that cannot be translated is a request
//! error rather than a failure during execution.

use atrius_path_support::{QueryError, QueryResult, ValueKind};
use chrono::format::{Item, StrftimeItems};

use super::FunctionInput;
use crate::context::CompilationContext;
use crate::expression::{CompiledExpression, Shape};
use crate::plan::Expr;

fn field(letter: char, width: usize) -> Option<&'static str> {
    Some(match (letter, width) {
        ('y', 2) => "%y",
        ('y', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('d', 1) => "%-d",
        ('d', 2) => "%d",
        ('H', 1) => "%-H",
        ('H', 2) => "%H",
        ('h', 1) => "%-I",
        ('h', 2) => "%I",
        ('m', 1) => "%-M",
        ('m', 2) => "%M",
        ('s', 1) => "%-S",
        ('s', 2) => "%S",
        ('S', 3) => "%3f",
        ('a', 1) => "%p",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('Z', _) => "%z",
        ('X', _) => "%:z",
        _ => return None,
    })
}

/// Translates a date pattern into a chrono format string.
pub fn translate_pattern(pattern: &str) -> Result<String, String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i] == c {
                i += 1;
            }
            let width = i - start;
            let directive = field(c, width)
                .ok_or_else(|| format!("unknown pattern field '{}'", chars[start..i].iter().collect::<String>()))?;
            out.push_str(directive);
            continue;
        }
        match c {
            '\'' => {
                i += 1;
                if chars.get(i) == Some(&'\'') {
                    out.push('\'');
                    i += 1;
                    continue;
                }
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted text".to_string()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            out.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some('%') => {
                            out.push_str("%%");
                            i += 1;
                        }
                        Some(other) => {
                            out.push(*other);
                            i += 1;
                        }
                    }
                }
            }
            '%' => {
                out.push_str("%%");
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    if StrftimeItems::new(&out).any(|item| item == Item::Error) {
        return Err(format!("'{}' is not a valid format", out));
    }
    Ok(out)
}

pub fn date_format_function(
    ctx: &mut CompilationContext,
    call: FunctionInput<'_>,
) -> QueryResult<CompiledExpression> {
    let usage = "dateFormat function accepts one argument of type String";
    let pattern = call.string_argument(ctx, usage)?;
    let input = &call.input;
    if !matches!(
        input.kind,
        ValueKind::Date | ValueKind::DateTime | ValueKind::Time
    ) {
        return Err(QueryError::Type(format!(
            "Input to dateFormat function is of unsupported type: {}",
            call.source
        )));
    }
    let format = translate_pattern(&pattern).map_err(|reason| {
        QueryError::InvalidArgument(format!(
            "Invalid format string passed to dateFormat: {} ({}): {}",
            pattern, reason, call.source
        ))
    })?;

    Ok(CompiledExpression {
        source: call.source.clone(),
        kind: ValueKind::String,
        type_code: Some("string".to_string()),
        cardinality: input.cardinality,
        literal: None,
        shape: Shape::Primitive,
        value: Expr::DateFormat {
            value: Box::new(input.value.clone()),
            pattern: format,
        },
        joins: input.joins.clone(),
        aggregate: None,
        origin: input.origin.clone(),
    })
}
