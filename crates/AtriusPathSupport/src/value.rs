//! Values, coded values and the logical type system shared by compiler and engine.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::QueryError;

/// The logical type of a compiled expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Boolean,
    Integer,
    Decimal,
    String,
    Date,
    DateTime,
    Time,
    /// A coded value: system, code and optional version and display.
    Coding,
    /// A whole record, or a reference to one.
    Reference,
    /// A structured element with no scalar interpretation, e.g. a HumanName.
    Complex,
    /// The empty literal `{}`.
    Null,
}

impl ValueKind {
    /// Kinds that may be used with `<`, `<=`, `>` and `>=`.
    pub fn is_orderable(self) -> bool {
        matches!(
            self,
            ValueKind::String
                | ValueKind::Integer
                | ValueKind::Decimal
                | ValueKind::Date
                | ValueKind::DateTime
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Decimal)
    }

    /// Date and dateTime, which compare at date granularity.
    pub fn is_date_like(self) -> bool {
        matches!(self, ValueKind::Date | ValueKind::DateTime)
    }

    /// Whether two kinds may meet on either side of an equality operator.
    pub fn is_comparable_with(self, other: ValueKind) -> bool {
        self == other
            || self == ValueKind::Null
            || other == ValueKind::Null
            || (self.is_numeric() && other.is_numeric())
            || (self.is_date_like() && other.is_date_like())
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Boolean => "Boolean",
            ValueKind::Integer => "Integer",
            ValueKind::Decimal => "Decimal",
            ValueKind::String => "String",
            ValueKind::Date => "Date",
            ValueKind::DateTime => "DateTime",
            ValueKind::Time => "Time",
            ValueKind::Coding => "Coding",
            ValueKind::Reference => "Reference",
            ValueKind::Complex => "Complex",
            ValueKind::Null => "Null",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an expression denotes at most one value per subject, or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    Singular,
    Collection,
}

impl Cardinality {
    /// Cardinality after stepping from `self` to an element of cardinality `next`.
    ///
    /// Once a path becomes a collection it stays one.
    pub fn then(self, next: Cardinality) -> Cardinality {
        match (self, next) {
            (Cardinality::Singular, Cardinality::Singular) => Cardinality::Singular,
            _ => Cardinality::Collection,
        }
    }

    pub fn is_singular(self) -> bool {
        self == Cardinality::Singular
    }
}

/// A controlled-vocabulary term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Coding {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Parses a coding literal of the form `system|code` or `system|version|code`.
    pub fn parse_literal(text: &str) -> Result<Coding, QueryError> {
        let tokens: Vec<&str> = text.split('|').collect();
        match tokens.as_slice() {
            [system, code] if !system.is_empty() && !code.is_empty() => {
                Ok(Coding::new(*system, *code))
            }
            [system, version, code]
                if !system.is_empty() && !version.is_empty() && !code.is_empty() =>
            {
                Ok(Coding::new(*system, *code).with_version(*version))
            }
            _ => Err(QueryError::InvalidArgument(
                "Coding literal must be of form [system]|[code] or [system]|[version]|[code]"
                    .to_string(),
            )),
        }
    }

    /// Coded equality.
    ///
    /// Returns `None` when either side lacks a system or a code. The version is
    /// only compared when both sides carry one; display never participates.
    pub fn equals(&self, other: &Coding) -> Option<bool> {
        let (Some(system), Some(code)) = (&self.system, &self.code) else {
            return None;
        };
        let (Some(other_system), Some(other_code)) = (&other.system, &other.code) else {
            return None;
        };
        if system != other_system || code != other_code {
            return Some(false);
        }
        match (&self.version, &other.version) {
            (Some(version), Some(other_version)) => Some(version == other_version),
            _ => Some(true),
        }
    }

    /// Reads a FHIR Coding JSON object. Returns `None` for anything that is not an object.
    pub fn from_json(json: &serde_json::Value) -> Option<Coding> {
        let object = json.as_object()?;
        let field = |name: &str| object.get(name).and_then(|v| v.as_str()).map(String::from);
        Some(Coding {
            system: field("system"),
            version: field("version"),
            code: field("code"),
            display: field("display"),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let system = self.system.as_deref().unwrap_or("");
        let code = self.code.as_deref().unwrap_or("");
        match &self.version {
            Some(version) => write!(f, "{}|{}|{}", system, version, code),
            None => write!(f, "{}|{}", system, code),
        }
    }
}

/// A single cell value.
///
/// Literals in compiled expressions and the values produced by executing a plan
/// share this type. Structured values (complex elements and whole records) stay
/// as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Time(NaiveTime),
    Coding(Coding),
    Json(serde_json::Value),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Time(_) => ValueKind::Time,
            Value::Coding(_) => ValueKind::Coding,
            Value::Json(_) => ValueKind::Complex,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Maps a JSON value onto the closest primitive value.
    ///
    /// Strings stay strings: the JSON form of a FHIR date is indistinguishable
    /// from a string, so temporal interpretation happens at comparison time.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Decimal::from_str(&n.to_string())
                        .map(Value::Decimal)
                        .unwrap_or_else(|_| Value::Json(json.clone()))
                }
            }
            other => Value::Json(other.clone()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::to_value(d).unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(_) | Value::DateTime(_) | Value::Time(_) => {
                serde_json::Value::String(self.to_string())
            }
            Value::Coding(c) => c.to_json(),
            Value::Json(j) => j.clone(),
        }
    }

    /// Interprets the value as a coded value, reading JSON Coding objects too.
    pub fn as_coding(&self) -> Option<Coding> {
        match self {
            Value::Coding(c) => Some(c.clone()),
            Value::Json(j) => Coding::from_json(j),
            _ => None,
        }
    }

    /// Truncates the value to a calendar date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date_naive()),
            Value::String(s) => parse_date_prefix(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            Value::String(s) => parse_time(s),
            _ => None,
        }
    }

    /// Value comparison used by the comparison operators.
    ///
    /// Returns `None` when either side is null or the two values cannot be ordered
    /// against each other. Strings are coerced when the other side is temporal.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Value::Decimal(a), Value::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Time(_), _) | (_, Value::Time(_)) => {
                Some(self.as_time()?.cmp(&other.as_time()?))
            }
            (Value::Date(_) | Value::DateTime(_), _) | (_, Value::Date(_) | Value::DateTime(_)) => {
                Some(self.as_date()?.cmp(&other.as_date()?))
            }
            _ => None,
        }
    }

    /// Equality with three-valued semantics: `None` means unknown.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(left), Some(right)) = (self.as_coding(), other.as_coding()) {
            if matches!(self, Value::Coding(_)) || matches!(other, Value::Coding(_)) {
                return left.equals(&right);
            }
        }
        match self.compare(other) {
            Some(ordering) => Some(ordering == Ordering::Equal),
            None => Some(self == other),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Decimal(_) => 3,
            Value::String(_) => 4,
            Value::Date(_) => 5,
            Value::DateTime(_) => 6,
            Value::Time(_) => 7,
            Value::Coding(_) => 8,
            Value::Json(_) => 9,
        }
    }
}

impl Eq for Value {}

/// A total order for sorting and grouping. Not the comparison operator semantics;
/// see [`Value::compare`] for those.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Coding(a), Value::Coding(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::String(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Coding(c) => c.hash(state),
            Value::Json(j) => j.to_string().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Coding(c) => write!(f, "{}", c),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Coding> for Value {
    fn from(value: Coding) -> Self {
        Value::Coding(value)
    }
}

/// Parses the date portion of a FHIR date or dateTime string.
///
/// Partial dates are filled in with the first month and day, so `1980` reads as
/// 1980-01-01.
pub fn parse_date_prefix(text: &str) -> Option<NaiveDate> {
    let date_part = text.split('T').next()?;
    let mut parts = date_part.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    let day: u32 = match parts.next() {
        Some(d) => d.get(..2).unwrap_or(d).parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parses a FHIR dateTime. A missing offset is read as UTC; a date without a
/// time reads as midnight.
pub fn parse_date_time(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(utc.from_utc_datetime(&naive));
        }
    }
    let date = parse_date_prefix(text)?;
    Some(utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Parses a FHIR time, accepting hour-only and hour-minute precision.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let padded = match text.len() {
        2 => format!("{}:00:00", text),
        5 => format!("{}:00", text),
        _ => text.to_string(),
    };
    NaiveTime::parse_from_str(&padded, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(&padded, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coding_equality_truth_table() {
        let a_x = Coding::new("A", "X");
        let b_x = Coding::new("B", "X");
        let a_x_v1 = Coding::new("A", "X").with_version("1");
        let a_x_v2 = Coding::new("A", "X").with_version("2");
        let no_system = Coding {
            code: Some("X".into()),
            ..Default::default()
        };
        let no_code = Coding {
            system: Some("A".into()),
            ..Default::default()
        };

        assert_eq!(a_x.equals(&a_x), Some(true));
        assert_eq!(a_x.equals(&b_x), Some(false));
        assert_eq!(a_x_v1.equals(&a_x), Some(true));
        assert_eq!(a_x.equals(&a_x_v1), Some(true));
        assert_eq!(a_x_v1.equals(&a_x_v2), Some(false));
        assert_eq!(no_system.equals(&a_x), None);
        assert_eq!(a_x.equals(&no_code), None);
        assert_eq!(no_code.equals(&no_system), None);
    }

    #[test]
    fn test_display_is_ignored_by_coded_equality() {
        let left = Coding::new("A", "X").with_display("One");
        let right = Coding::new("A", "X").with_display("Two");
        assert_eq!(left.equals(&right), Some(true));
    }

    #[test]
    fn test_parse_coding_literal() {
        let coding = Coding::parse_literal("http://snomed.info/sct|373882004").unwrap();
        assert_eq!(coding.system.as_deref(), Some("http://snomed.info/sct"));
        assert_eq!(coding.code.as_deref(), Some("373882004"));
        assert_eq!(coding.version, None);

        let versioned = Coding::parse_literal("http://loinc.org|2.67|8867-4").unwrap();
        assert_eq!(versioned.version.as_deref(), Some("2.67"));
        assert_eq!(versioned.code.as_deref(), Some("8867-4"));

        assert!(Coding::parse_literal("http://loinc.org").is_err());
        assert!(Coding::parse_literal("a|b|c|d").is_err());
    }

    #[test]
    fn test_json_coding_compares_with_literal() {
        let json = serde_json::json!({"system": "A", "code": "X", "display": "Ex"});
        let stored = Value::from_json(&json);
        assert_eq!(stored.equals(&Value::Coding(Coding::new("A", "X"))), Some(true));
        assert_eq!(stored.equals(&Value::Coding(Coding::new("B", "X"))), Some(false));
    }

    #[test]
    fn test_partial_dates_compare_at_day_granularity() {
        assert_eq!(
            parse_date_prefix("1980"),
            NaiveDate::from_ymd_opt(1980, 1, 1)
        );
        assert_eq!(
            parse_date_prefix("2010-03-04T10:11:12+10:00"),
            NaiveDate::from_ymd_opt(2010, 3, 4)
        );
        let stored = Value::String("1985-06-01".into());
        let literal = Value::Date(NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
        assert_eq!(stored.compare(&literal), Some(Ordering::Greater));
    }

    #[test]
    fn test_null_comparisons_are_unknown() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).equals(&Value::Null), None);
    }

    #[test]
    fn test_numeric_comparison_across_integer_and_decimal() {
        let decimal = Value::Decimal(Decimal::from_str("2.5").unwrap());
        assert_eq!(Value::Integer(2).compare(&decimal), Some(Ordering::Less));
        assert_eq!(Value::Integer(3).compare(&decimal), Some(Ordering::Greater));
    }

    #[test]
    fn test_cardinality_is_one_way() {
        use Cardinality::*;
        assert_eq!(Singular.then(Singular), Singular);
        assert_eq!(Singular.then(Collection), Collection);
        assert_eq!(Collection.then(Singular), Collection);
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(parse_time("14"), NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(parse_time("14:30"), NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(parse_time("14:30:05"), NaiveTime::from_hms_opt(14, 30, 5));
    }
}
