//! Relational plan model.
//!
//! Compiled expressions describe their value as an [`Expr`] over the aliases of
//! a subject-anchored relation; the planner assembles those into a
//! [`QueryPlan`]. Every plan type renders to SQL-like text, which is what the
//! CLI prints for `--explain` and what tests compare against.

use atrius_path_support::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::join::{Alias, Join};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "!=",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
        }
    }

    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Equal | CompareOp::NotEqual)
    }

    /// Applies the operator to the result of comparing left with right.
    pub fn test(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Equal => ordering == Equal,
            CompareOp::NotEqual => ordering != Equal,
            CompareOp::Less => ordering == Less,
            CompareOp::LessOrEqual => ordering != Greater,
            CompareOp::Greater => ordering == Greater,
            CompareOp::GreaterOrEqual => ordering != Less,
        }
    }
}

/// A scalar expression evaluated against one row of a relation.
///
/// Structured values (codings, concepts, whole records) are single columns;
/// [`Expr::Field`] and [`Expr::Column`] paths step into them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// The value bound to `alias`, followed down `path`.
    Column { alias: Alias, path: Vec<String> },
    /// A member of a structured value.
    Field { base: Box<Expr>, name: String },
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Coded equality; unknown when either side lacks a system or code.
    CodingEquals(Box<Expr>, Box<Expr>),
    /// True when any coding of a concept has coded equality with `coding`.
    AnyCodingEquals { concept: Box<Expr>, coding: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Truncates a date or dateTime to a calendar date.
    ToDate(Box<Expr>),
    /// Formats a temporal value with a chrono format string.
    DateFormat { value: Box<Expr>, pattern: String },
    IsNotNull(Box<Expr>),
    Case {
        when: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Coalesce(Vec<Expr>),
    /// The id a reference points at, if it points at `record_type`.
    ReferenceKey { reference: Box<Expr>, record_type: String },
    /// Whether a reference points at the `record_type` record with the given id.
    RefersTo {
        reference: Box<Expr>,
        record_type: String,
        id: Box<Expr>,
    },
}

impl Expr {
    pub fn column(alias: Alias, path: Vec<String>) -> Expr {
        Expr::Column { alias, path }
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn null() -> Expr {
        Expr::Literal(Value::Null)
    }

    /// Steps into a member of this value.
    ///
    /// Columns extend their path; a masked value (`CASE WHEN c THEN v ELSE
    /// NULL`) keeps its mask and navigates the masked value.
    pub fn navigate(&self, name: &str) -> Expr {
        match self {
            Expr::Column { alias, path } => {
                let mut path = path.clone();
                path.push(name.to_string());
                Expr::Column {
                    alias: alias.clone(),
                    path,
                }
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } if matches!(**otherwise, Expr::Literal(Value::Null)) => Expr::Case {
                when: when.clone(),
                then: Box::new(then.navigate(name)),
                otherwise: otherwise.clone(),
            },
            other => Expr::Field {
                base: Box::new(other.clone()),
                name: name.to_string(),
            },
        }
    }

    /// Every alias this expression reads.
    pub fn aliases(&self) -> BTreeSet<Alias> {
        let mut out = BTreeSet::new();
        self.collect_aliases(&mut out);
        out
    }

    fn collect_aliases(&self, out: &mut BTreeSet<Alias>) {
        match self {
            Expr::Column { alias, .. } => {
                out.insert(alias.clone());
            }
            Expr::Literal(_) => {}
            Expr::Field { base, .. } => base.collect_aliases(out),
            Expr::Compare { left, right, .. }
            | Expr::CodingEquals(left, right)
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::Xor(left, right)
            | Expr::Implies(left, right) => {
                left.collect_aliases(out);
                right.collect_aliases(out);
            }
            Expr::AnyCodingEquals { concept, coding } => {
                concept.collect_aliases(out);
                coding.collect_aliases(out);
            }
            Expr::Not(inner)
            | Expr::ToDate(inner)
            | Expr::IsNotNull(inner)
            | Expr::DateFormat { value: inner, .. }
            | Expr::ReferenceKey {
                reference: inner, ..
            } => inner.collect_aliases(out),
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                when.collect_aliases(out);
                then.collect_aliases(out);
                otherwise.collect_aliases(out);
            }
            Expr::Coalesce(items) => {
                for item in items {
                    item.collect_aliases(out);
                }
            }
            Expr::RefersTo { reference, id, .. } => {
                reference.collect_aliases(out);
                id.collect_aliases(out);
            }
        }
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("NULL"),
        Value::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        Value::Integer(_) | Value::Decimal(_) => write!(f, "{}", value),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        Value::Date(_) => write!(f, "DATE '{}'", value),
        Value::DateTime(_) => write!(f, "TIMESTAMP '{}'", value),
        Value::Time(_) => write!(f, "TIME '{}'", value),
        Value::Coding(c) => write!(f, "CODING('{}')", c),
        Value::Json(j) => write!(f, "JSON '{}'", j),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { alias, path } => {
                write!(f, "{}", alias)?;
                for segment in path {
                    write!(f, ".{}", segment)?;
                }
                Ok(())
            }
            Expr::Field { base, name } => write!(f, "({}).{}", base, name),
            Expr::Literal(value) => write_literal(f, value),
            Expr::Compare { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::CodingEquals(left, right) => write!(f, "CODING_EQUALS({}, {})", left, right),
            Expr::AnyCodingEquals { concept, coding } => {
                write!(f, "ANY_CODING_EQUALS({}, {})", concept, coding)
            }
            Expr::And(left, right) => write!(f, "({} AND {})", left, right),
            Expr::Or(left, right) => write!(f, "({} OR {})", left, right),
            Expr::Xor(left, right) => write!(f, "({} XOR {})", left, right),
            Expr::Implies(left, right) => write!(f, "({} IMPLIES {})", left, right),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::ToDate(inner) => write!(f, "TO_DATE({})", inner),
            Expr::DateFormat { value, pattern } => {
                write!(f, "DATE_FORMAT({}, '{}')", value, pattern)
            }
            Expr::IsNotNull(inner) => write!(f, "{} IS NOT NULL", inner),
            Expr::Case {
                when,
                then,
                otherwise,
            } => write!(f, "CASE WHEN {} THEN {} ELSE {} END", when, then, otherwise),
            Expr::Coalesce(items) if items.len() == 2 => {
                write!(f, "IFNULL({}, {})", items[0], items[1])
            }
            Expr::Coalesce(items) => {
                f.write_str("COALESCE(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Expr::ReferenceKey {
                reference,
                record_type,
            } => write!(f, "REFERENCE_KEY({}, '{}')", reference, record_type),
            Expr::RefersTo {
                reference,
                record_type,
                id,
            } => write!(f, "REFERS_TO({}, '{}', {})", reference, record_type, id),
        }
    }
}

/// Aggregate functions, applied per group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// Non-null values.
    Count(Expr),
    /// Distinct non-null values.
    CountDistinct(Expr),
    /// The first non-null value in row order.
    First(Expr),
    /// The greatest non-null value.
    Max(Expr),
}

impl Aggregate {
    pub fn expr(&self) -> &Expr {
        match self {
            Aggregate::Count(e)
            | Aggregate::CountDistinct(e)
            | Aggregate::First(e)
            | Aggregate::Max(e) => e,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count(e) => write!(f, "COUNT({})", e),
            Aggregate::CountDistinct(e) => write!(f, "COUNT(DISTINCT {})", e),
            Aggregate::First(e) => write!(f, "FIRST({})", e),
            Aggregate::Max(e) => write!(f, "MAX({})", e),
        }
    }
}

/// A per-identity subquery: `SELECT subject.id AS key, aggregate ... GROUP BY subject.id`.
///
/// It is correlated with the outer relation through the subject identity, so
/// it contributes at most one row per subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubPlan {
    pub subject: Alias,
    pub joins: Vec<Join>,
    pub aggregate: Aggregate,
}

impl fmt::Display for SubPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SELECT {}.id AS key, {} AS value FROM {} AS {}",
            self.subject,
            self.aggregate,
            self.subject.name(),
            self.subject
        )?;
        for join in &self.joins {
            write!(f, " {}", join)?;
        }
        write!(f, " GROUP BY {}.id", self.subject)
    }
}

/// The full relational plan for an aggregate request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub subject: Alias,
    /// Joins in dependency order.
    pub joins: Vec<Join>,
    /// Predicates ANDed before grouping.
    pub filters: Vec<Expr>,
    pub groupings: Vec<Expr>,
    pub aggregations: Vec<Aggregate>,
    /// Value-set tables the joins read.
    pub value_sets: Vec<String>,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<String> = self
            .groupings
            .iter()
            .map(|g| g.to_string())
            .chain(self.aggregations.iter().map(|a| a.to_string()))
            .collect();
        writeln!(f, "SELECT {}", columns.join(", "))?;
        write!(f, "FROM {} AS {}", self.subject.name(), self.subject)?;
        for join in &self.joins {
            write!(f, "\n{}", join)?;
        }
        if !self.filters.is_empty() {
            let filters: Vec<String> = self.filters.iter().map(|e| e.to_string()).collect();
            write!(f, "\nWHERE {}", filters.join(" AND "))?;
        }
        if !self.groupings.is_empty() {
            let groupings: Vec<String> = self.groupings.iter().map(|e| e.to_string()).collect();
            write!(f, "\nGROUP BY {}", groupings.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> Alias {
        Alias::root("Patient")
    }

    #[test]
    fn test_navigate_extends_column_paths() {
        let name = Expr::column(patient(), vec!["name".into()]);
        assert_eq!(name.navigate("given").to_string(), "Patient.name.given");
    }

    #[test]
    fn test_navigate_keeps_mask() {
        let masked = Expr::Case {
            when: Box::new(Expr::literal(true)),
            then: Box::new(Expr::column(patient(), vec![])),
            otherwise: Box::new(Expr::null()),
        };
        let Expr::Case { then, .. } = masked.navigate("gender") else {
            panic!("mask lost");
        };
        assert_eq!(then.to_string(), "Patient.gender");
    }

    #[test]
    fn test_aliases_are_collected() {
        let expr = Expr::And(
            Box::new(Expr::IsNotNull(Box::new(Expr::column(patient(), vec![])))),
            Box::new(Expr::column(Alias::root("Condition"), vec!["code".into()])),
        );
        let aliases: Vec<String> = expr.aliases().iter().map(|a| a.to_string()).collect();
        assert_eq!(aliases, vec!["Condition", "Patient"]);
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(Expr::literal("o'k").to_string(), "'o''k'");
        assert_eq!(Expr::null().to_string(), "NULL");
        assert_eq!(
            Expr::Coalesce(vec![Expr::column(patient(), vec![]), Expr::literal(0i64)]).to_string(),
            "IFNULL(Patient, 0)"
        );
    }

    #[test]
    fn test_compare_op_test() {
        use std::cmp::Ordering;
        assert!(CompareOp::LessOrEqual.test(Ordering::Equal));
        assert!(!CompareOp::Greater.test(Ordering::Equal));
        assert!(CompareOp::NotEqual.test(Ordering::Less));
        assert!(CompareOp::Less.is_ordering());
        assert!(!CompareOp::Equal.is_ordering());
    }
}
