//! # Path Expression Parser
//!
//! Parses the text of a path expression into an abstract syntax tree. The grammar
//! is the full FHIRPath expression grammar: constructs the compiler does not
//! support (arithmetic, polarity, indexers, `is`/`as`, union, quantities) are
//! still parsed here so that the compiler can reject them with a message naming
//! the construct rather than a generic syntax error.
//!
//! ## Key Types
//!
//! - [`Expression`]: any expression node
//! - [`Term`]: literals, invocations, external constants and parenthesised terms
//! - [`Invocation`]: member access, function calls and `$this`/`$index`/`$total`
//! - [`Literal`]: literal values, including coding literals
//!
//! ## Examples
//!
//! ```rust
//! use atrius_path_compiler::parser::{parse, Expression};
//!
//! let expr = parse("reverseResolve(Condition.subject).code.coding.count()").unwrap();
//! assert!(matches!(expr, Expression::Invocation(_, _)));
//!
//! let expr = parse("birthDate > @1980 and birthDate < @1990").unwrap();
//! assert!(matches!(expr, Expression::And(_, _)));
//! ```
//!
//! ## Precedence
//!
//! From tightest to loosest:
//!
//! 1. Postfix invocation (`.`) and indexer (`[]`)
//! 2. Polarity (`+`, `-`)
//! 3. Multiplicative (`*`, `/`, `div`, `mod`)
//! 4. Additive (`+`, `-`, `&`)
//! 5. Union (`|`)
//! 6. Inequality (`<`, `<=`, `>`, `>=`)
//! 7. Type (`is`, `as`)
//! 8. Equality (`=`, `~`, `!=`, `!~`)
//! 9. Membership (`in`, `contains`)
//! 10. `and`
//! 11. `or`, `xor`
//! 12. `implies`
//!
//! ## Literal Syntax
//!
//! - **Strings**: `'text with \'escapes\''`
//! - **Numbers**: `42` (integer), `3.14` (decimal)
//! - **Booleans**: `true`, `false`
//! - **Dates**: `@2024-01-15`, `@2024-01`, `@2024`
//! - **DateTimes**: `@2024-01-15T14:30:00Z`, `@2024-01-15T14:30:00-05:00`
//! - **Times**: `@T14:30:00`, `@T14:30:00.123`
//! - **Quantities**: `5 'mg'`, `3 days`
//! - **Codings**: `http://snomed.info/sct|373882004`, `http://loinc.org|2.67|8867-4`
//! - **Empty**: `{}`

use atrius_path_support::value::{parse_date_prefix, parse_date_time, parse_time};
use atrius_path_support::{Coding, QueryError, QueryResult};
use chumsky::Parser;
use chumsky::error::Rich;
use chumsky::prelude::*;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A literal value appearing in an expression.
///
/// Temporal literals keep their source text; they are converted to values by
/// the compiler, which knows the precision the comparison needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// The empty value, `{}`
    Null,
    Boolean(bool),
    String(String),
    /// Decimal numbers (with a decimal point)
    Number(Decimal),
    Integer(i64),
    /// Date literal text without the leading `@`, e.g. `2022-01`
    Date(String),
    /// DateTime literal text without the leading `@`
    DateTime(String),
    /// Time literal text without the leading `@T`
    Time(String),
    /// A numeric value and a unit, such as `5 'mg'`
    Quantity(Decimal, String),
    /// An unquoted coding literal, such as `http://snomed.info/sct|373882004`
    Coding(Coding),
}

/// An expression node.
///
/// Operator variants keep the operator token so that the compiler can resolve
/// it against its closed operator set and report unsupported tokens verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Term(Term),

    /// An invocation on the result of another expression
    /// (e.g. `name.given` or `code.coding.count()`)
    Invocation(Box<Expression>, Invocation),

    /// `name[0]`
    Indexer(Box<Expression>, Box<Expression>),

    /// `-5` or `+value`
    Polarity(char, Box<Expression>),

    Multiplicative(Box<Expression>, String, Box<Expression>),

    Additive(Box<Expression>, String, Box<Expression>),

    /// `value is Integer` or `value as Quantity`
    Type(Box<Expression>, String, TypeSpecifier),

    Union(Box<Expression>, Box<Expression>),

    /// `<`, `<=`, `>`, `>=`
    Inequality(Box<Expression>, String, Box<Expression>),

    /// `=`, `!=`, `~`, `!~`
    Equality(Box<Expression>, String, Box<Expression>),

    /// `in`, `contains`
    Membership(Box<Expression>, String, Box<Expression>),

    And(Box<Expression>, Box<Expression>),

    /// `or` and `xor`
    Or(Box<Expression>, String, Box<Expression>),

    Implies(Box<Expression>, Box<Expression>),
}

/// A type name used by `is` and `as`, optionally namespace qualified.
///
/// `FHIR.Patient` is `QualifiedIdentifier("FHIR", Some("Patient"))` and a bare
/// `Boolean` is `QualifiedIdentifier("Boolean", None)`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpecifier {
    QualifiedIdentifier(String, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A member access, function call or special identifier
    Invocation(Invocation),
    Literal(Literal),
    /// An environment variable reference such as `%resource`
    ExternalConstant(String),
    Parenthesized(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Member(String),
    Function(String, Vec<Expression>),
    /// `$this`
    This,
    /// `$index`
    Index,
    /// `$total`
    Total,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "{{}}"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Literal::Number(d) => write!(f, "{}", d),
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Date(d) => write!(f, "@{}", d),
            Literal::DateTime(dt) => write!(f, "@{}", dt),
            Literal::Time(t) => write!(f, "@T{}", t),
            Literal::Quantity(d, u) => write!(f, "{} '{}'", d, u),
            Literal::Coding(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for TypeSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpecifier::QualifiedIdentifier(namespace, Some(name)) => {
                write!(f, "{}.{}", namespace, name)
            }
            TypeSpecifier::QualifiedIdentifier(name, None) => f.write_str(name),
        }
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[Expression]) -> fmt::Result {
    for (i, argument) in arguments.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", argument)?;
    }
    Ok(())
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Member(name) => f.write_str(name),
            Invocation::Function(name, arguments) => {
                write!(f, "{}(", name)?;
                write_arguments(f, arguments)?;
                f.write_str(")")
            }
            Invocation::This => f.write_str("$this"),
            Invocation::Index => f.write_str("$index"),
            Invocation::Total => f.write_str("$total"),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Invocation(invocation) => write!(f, "{}", invocation),
            Term::Literal(literal) => write!(f, "{}", literal),
            Term::ExternalConstant(name) => write!(f, "%{}", name),
            Term::Parenthesized(inner) => write!(f, "({})", inner),
        }
    }
}

/// Renders the expression back to canonical source text.
///
/// Used for diagnostics: every compiled node records the text of the
/// sub-expression it was compiled from.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Term(term) => write!(f, "{}", term),
            Expression::Invocation(base, invocation) => write!(f, "{}.{}", base, invocation),
            Expression::Indexer(base, index) => write!(f, "{}[{}]", base, index),
            Expression::Polarity(op, operand) => write!(f, "{}{}", op, operand),
            Expression::Multiplicative(l, op, r)
            | Expression::Additive(l, op, r)
            | Expression::Inequality(l, op, r)
            | Expression::Equality(l, op, r)
            | Expression::Membership(l, op, r)
            | Expression::Or(l, op, r) => write!(f, "{} {} {}", l, op, r),
            Expression::Type(operand, op, type_spec) => {
                write!(f, "{} {} {}", operand, op, type_spec)
            }
            Expression::Union(l, r) => write!(f, "{} | {}", l, r),
            Expression::And(l, r) => write!(f, "{} and {}", l, r),
            Expression::Implies(l, r) => write!(f, "{} implies {}", l, r),
        }
    }
}

/// Parses expression text, mapping grammar failures to [`QueryError::Parse`].
pub fn parse(text: &str) -> QueryResult<Expression> {
    parser().parse(text).into_result().map_err(|errors| {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        QueryError::Parse {
            expression: text.to_string(),
            message,
        }
    })
}

/// Whitespace and comments between tokens: `// ...` to the end of the line
/// and `/* ... */`.
fn trivia<'src>() -> impl Parser<'src, &'src str, (), extra::Err<Rich<'src, char>>> + Clone {
    choice((
        text::whitespace().at_least(1).ignored(),
        just("//")
            .then(any().and_is(text::newline().or(end()).not()).repeated())
            .ignored(),
        just("/*")
            .then(any().and_is(just("*/").not()).repeated())
            .then(just("*/"))
            .ignored(),
    ))
    .repeated()
    .ignored()
}

/// Wraps a parser so that it skips surrounding whitespace and comments.
fn custom_padded<'src, T, P>(
    parser: P,
) -> impl Parser<'src, &'src str, T, extra::Err<Rich<'src, char>>> + Clone
where
    P: Parser<'src, &'src str, T, extra::Err<Rich<'src, char>>> + Clone,
{
    parser.padded_by(trivia())
}

/// Builds the expression parser.
///
/// The parser consumes the whole input; trailing text is an error.
pub fn parser<'src>()
-> impl Parser<'src, &'src str, Expression, extra::Err<Rich<'src, char>>> + Clone + 'src {
    // Escape sequences inside quoted strings and delimited identifiers.
    let esc = just('\\').ignore_then(choice((
        just('`').to('`'),
        just('\'').to('\''),
        just('\\').to('\\'),
        just('/').to('/'),
        just('f').to('\u{000C}'),
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('"').to('"'),
        // \uXXXX
        just('u').ignore_then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit())
                .repeated()
                .exactly(4)
                .collect::<String>()
                .try_map(
                    |digits: String, span| match u32::from_str_radix(&digits, 16) {
                        Ok(code) => match char::from_u32(code) {
                            Some(c) => Ok(c),
                            None => Err(Rich::custom(span, "Invalid Unicode code point")),
                        },
                        Err(_) => Err(Rich::custom(span, "Invalid hex digits")),
                    },
                ),
        ),
    )));

    macro_rules! padded {
        ($p:expr) => {
            custom_padded($p)
        };
    }

    let digits = |min: usize| {
        any()
            .filter(|c: &char| c.is_ascii_digit())
            .repeated()
            .at_least(min)
            .collect::<String>()
    };
    let fixed_digits = |count: usize| {
        any()
            .filter(|c: &char| c.is_ascii_digit())
            .repeated()
            .exactly(count)
            .collect::<String>()
    };

    // LITERALS

    let null = just('{').then(just('}')).to(Literal::Null);

    // Tried before identifiers.
    let boolean = choice((
        text::keyword("true").to(Literal::Boolean(true)),
        text::keyword("false").to(Literal::Boolean(false)),
    ))
    .boxed();

    let quoted = just('\'')
        .ignore_then(none_of("\\\'").or(esc).repeated().collect::<String>())
        .then_ignore(just('\''));

    let string = quoted.clone().map(Literal::String).boxed();

    // Coding literal: a URI scheme, then segments separated by `|`. The first
    // segment may contain `//`, so this must be tried before anything padded.
    let coding_char = any().filter(|c: &char| {
        !c.is_whitespace() && !matches!(c, '|' | '(' | ')' | ',' | '[' | ']' | '\'' | '`')
    });
    let scheme = any()
        .filter(|c: &char| c.is_ascii_alphabetic())
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
                .repeated()
                .collect::<String>(),
        )
        .map(|(first, rest): (char, String)| format!("{}{}", first, rest));
    let coding = scheme
        .then_ignore(just(':'))
        .then(coding_char.repeated().at_least(1).collect::<String>())
        .then(
            just('|')
                .ignore_then(coding_char.repeated().at_least(1).collect::<String>())
                .repeated()
                .at_least(1)
                .collect::<Vec<String>>(),
        )
        .try_map(|((scheme, rest), segments), span| {
            let text = format!("{}:{}|{}", scheme, rest, segments.join("|"));
            Coding::parse_literal(&text)
                .map(Literal::Coding)
                .map_err(|e| Rich::custom(span, e.to_string()))
        })
        .boxed();

    let integer = digits(1).try_map(|digits: String, span| match i64::from_str(&digits) {
        Ok(n) => Ok(Literal::Integer(n)),
        Err(_) => Err(Rich::custom(span, format!("Invalid integer: {}", digits))),
    });
    let integer = padded!(integer);

    // <digits>.<digits>
    let decimal = digits(1)
        .then_ignore(just('.'))
        .then(digits(1))
        .try_map(|(i, d), span| {
            let text = format!("{}.{}", i, d);
            Decimal::from_str(&text).map_err(|_| Rich::custom(span, format!("Invalid number: {}", text)))
        });
    let number = decimal.clone().map(Literal::Number).padded_by(trivia());

    // HH(:mm(:ss(.fff)?)?)?
    let time_format = fixed_digits(2)
        .then(
            just(':')
                .ignore_then(fixed_digits(2))
                .then(
                    just(':')
                        .ignore_then(fixed_digits(2))
                        .then(
                            just('.')
                                .ignore_then(
                                    any()
                                        .filter(|c: &char| c.is_ascii_digit())
                                        .repeated()
                                        .at_least(1)
                                        .at_most(3)
                                        .collect::<String>(),
                                )
                                .or_not(),
                        )
                        .or_not(),
                )
                .or_not(),
        )
        .map(|(hours, rest)| {
            let mut result = hours;
            if let Some((minutes, seconds_part)) = rest {
                result.push(':');
                result.push_str(&minutes);
                if let Some((seconds, fraction)) = seconds_part {
                    result.push(':');
                    result.push_str(&seconds);
                    if let Some(fraction) = fraction {
                        result.push('.');
                        result.push_str(&fraction);
                    }
                }
            }
            result
        });

    // 'Z' or (+|-)HH:mm
    let timezone_format = just('Z').to("Z".to_string()).or(one_of("+-")
        .then(fixed_digits(2))
        .then_ignore(just(':'))
        .then(fixed_digits(2))
        .map(|((sign, hour), minute): ((char, String), String)| {
            format!("{}{}:{}", sign, hour, minute)
        }));

    // YYYY(-MM(-DD)?)?
    let date_format = fixed_digits(4)
        .then(
            just('-')
                .ignore_then(fixed_digits(2))
                .then(just('-').ignore_then(fixed_digits(2)).or_not())
                .or_not(),
        )
        .map(|(year, month_part)| {
            let mut date = year;
            if let Some((month, day)) = month_part {
                date.push('-');
                date.push_str(&month);
                if let Some(day) = day {
                    date.push('-');
                    date.push_str(&day);
                }
            }
            date
        })
        .boxed();

    // Quantity units: calendar keywords or quoted UCUM strings.
    let unit_keyword = choice((
        text::keyword("years").to("years".to_string()),
        text::keyword("year").to("year".to_string()),
        text::keyword("months").to("months".to_string()),
        text::keyword("month").to("month".to_string()),
        text::keyword("weeks").to("weeks".to_string()),
        text::keyword("week").to("week".to_string()),
        text::keyword("days").to("days".to_string()),
        text::keyword("day").to("day".to_string()),
        text::keyword("hours").to("hours".to_string()),
        text::keyword("hour").to("hour".to_string()),
        text::keyword("minutes").to("minutes".to_string()),
        text::keyword("minute").to("minute".to_string()),
        text::keyword("seconds").to("seconds".to_string()),
        text::keyword("second").to("second".to_string()),
        text::keyword("milliseconds").to("milliseconds".to_string()),
        text::keyword("millisecond").to("millisecond".to_string()),
    ));
    let unit = choice((unit_keyword, quoted.clone())).boxed().padded_by(trivia());

    // Number, required whitespace, unit.
    let quantity = choice((
        decimal
            .clone()
            .then_ignore(text::whitespace().at_least(1))
            .then(unit.clone())
            .map(|(d, u)| Literal::Quantity(d, u)),
        digits(1)
            .try_map(|digits: String, span| {
                i64::from_str(&digits)
                    .map_err(|_| Rich::custom(span, format!("Invalid integer: {}", digits)))
            })
            .then_ignore(text::whitespace().at_least(1))
            .then(unit)
            .map(|(i, u)| Literal::Quantity(Decimal::from(i), u)),
    ));

    // @Date T Time [Timezone]
    let datetime_literal = just('@')
        .ignore_then(date_format.clone())
        .then_ignore(just('T'))
        .then(time_format)
        .then(timezone_format.clone().or_not())
        .try_map(|((date, time), tz), span| {
            let text = match tz {
                Some(tz) => format!("{}T{}{}", date, time, tz),
                None => format!("{}T{}", date, time),
            };
            match parse_date_time(&text) {
                Some(_) => Ok(Literal::DateTime(text)),
                None => Err(Rich::custom(span, format!("Invalid datetime format: {}", text))),
            }
        });

    // @Date T
    let partial_datetime_literal = just('@')
        .ignore_then(date_format.clone())
        .then_ignore(just('T'))
        .try_map(|date, span| match parse_date_prefix(&date) {
            Some(_) => Ok(Literal::DateTime(format!("{}T", date))),
            None => Err(Rich::custom(
                span,
                format!("Invalid partial datetime format: {}T", date),
            )),
        });

    // @T Time, never with a timezone
    let time_literal = just('@')
        .ignore_then(just('T').ignore_then(time_format).then(timezone_format.or_not()))
        .try_map(|(time, tz), span| {
            if tz.is_some() {
                Err(Rich::custom(span, "Time literal cannot have a timezone offset"))
            } else {
                match parse_time(&time) {
                    Some(_) => Ok(Literal::Time(time)),
                    None => Err(Rich::custom(span, format!("Invalid time format: {}", time))),
                }
            }
        });

    let date_literal = just('@')
        .ignore_then(date_format)
        .try_map(|date, span| match parse_date_prefix(&date) {
            Some(_) => Ok(Literal::Date(date)),
            None => Err(Rich::custom(span, format!("Invalid date format: {}", date))),
        });

    // Quantity before plain numbers, the most specific temporal form first.
    let literal = choice((
        padded!(null),
        padded!(coding),
        padded!(boolean),
        padded!(string),
        padded!(quantity),
        number,
        integer,
        padded!(datetime_literal),
        padded!(partial_datetime_literal),
        padded!(time_literal),
        padded!(date_literal),
    ))
    .map(Term::Literal);

    // ([A-Za-z] | '_')([A-Za-z0-9] | '_')*
    let standard_identifier = any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, rest): (char, Vec<char>)| {
            let mut s = first.to_string();
            s.extend(rest);
            s
        })
        .padded_by(trivia());

    // `...`
    let delimited_identifier = just('`')
        .ignore_then(none_of("`").or(esc).repeated().collect::<String>())
        .then_ignore(just('`'))
        .padded_by(trivia());

    // Keywords are allowed wherever an identifier is expected.
    let identifier = choice((
        standard_identifier,
        delimited_identifier,
        text::keyword("as").to(String::from("as")),
        text::keyword("contains").to(String::from("contains")),
        text::keyword("in").to(String::from("in")),
        text::keyword("is").to(String::from("is")),
        text::keyword("true").to(String::from("true")),
        text::keyword("false").to(String::from("false")),
    ));

    let qualified_identifier = identifier
        .clone()
        .then(just('.').ignore_then(identifier.clone()).or_not())
        .map(|(first, second)| match second {
            Some(name) => TypeSpecifier::QualifiedIdentifier(first, Some(name)),
            None => TypeSpecifier::QualifiedIdentifier(first, None),
        })
        .boxed();
    let qualified_identifier = padded!(qualified_identifier);

    let external_constant = just('%')
        .ignore_then(choice((identifier.clone(), quoted.clone())))
        .map(Term::ExternalConstant)
        .padded_by(trivia());

    recursive(|expr| {
        let arguments = expr
            .clone()
            .separated_by(just(',').padded_by(trivia()))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded_by(trivia()), just(')').padded_by(trivia()));

        let atom = choice((
            literal.clone().map(Expression::Term).boxed(),
            external_constant.clone().map(Expression::Term).boxed(),
            // Function call before plain identifier.
            identifier
                .clone()
                .then(arguments.clone())
                .map(|(name, params)| {
                    Expression::Term(Term::Invocation(Invocation::Function(name, params)))
                })
                .boxed(),
            choice((
                identifier.clone().map(Invocation::Member),
                just("$this").to(Invocation::This),
                just("$index").to(Invocation::Index),
                just("$total").to(Invocation::Total),
            ))
            .map(Term::Invocation)
            .map(Expression::Term)
            .boxed(),
            expr.clone()
                .boxed()
                .delimited_by(just('(').padded_by(trivia()), just(')').padded_by(trivia()))
                .map(|inner| Expression::Term(Term::Parenthesized(Box::new(inner))))
                .boxed(),
        ))
        .padded_by(trivia());

        // `.member`, `.fn(args)` and `[index]`
        let postfix_op = choice((
            just('.')
                .ignore_then(identifier.clone().then(arguments.boxed().or_not()))
                .map(|(name, params)| {
                    let invocation = match params {
                        Some(params) => Invocation::Function(name, params),
                        None => Invocation::Member(name),
                    };
                    Box::new(move |left: Expression| {
                        Expression::Invocation(Box::new(left), invocation.clone())
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
            expr.clone()
                .delimited_by(just('[').padded_by(trivia()), just(']').padded_by(trivia()))
                .map(|index| {
                    Box::new(move |left: Expression| {
                        Expression::Indexer(Box::new(left), Box::new(index.clone()))
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
        ))
        .boxed();

        let atom_with_postfix = atom
            .then(postfix_op.repeated().collect::<Vec<_>>())
            .map(|(left, ops)| ops.into_iter().fold(left, |acc, op| op(acc)));

        let prefix_op = choice((just('+').to('+'), just('-').to('-'))).padded_by(trivia());
        let polarity = prefix_op
            .repeated()
            .collect::<Vec<_>>()
            .then(atom_with_postfix)
            .map(|(ops, operand)| {
                ops.into_iter()
                    .rev()
                    .fold(operand, |acc, op| Expression::Polarity(op, Box::new(acc)))
            });

        let op_mul = choice((
            just('*').to("*"),
            just('/').to("/"),
            text::keyword("div").to("div"),
            text::keyword("mod").to("mod"),
        ))
        .padded_by(trivia());
        let multiplicative = polarity
            .clone()
            .then(op_mul.then(polarity).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Multiplicative(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let op_add = choice((just('+').to("+"), just('-').to("-"), just('&').to("&"))).padded_by(trivia());
        let additive = multiplicative
            .clone()
            .then(op_add.then(multiplicative).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Additive(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let union = additive
            .clone()
            .then(just('|').padded_by(trivia()).then(additive).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (_, right)| {
                    Expression::Union(Box::new(acc), Box::new(right))
                })
            });

        let op_ineq = choice((
            just("<=").to("<="),
            just("<").to("<"),
            just(">=").to(">="),
            just(">").to(">"),
        ))
        .padded_by(trivia());
        let inequality = union
            .clone()
            .then(op_ineq.then(union).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Inequality(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let op_type = choice((text::keyword("is").to("is"), text::keyword("as").to("as"))).padded_by(trivia());
        let type_expr = inequality
            .clone()
            .then(
                op_type
                    .then(qualified_identifier.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, type_spec)| {
                    Expression::Type(Box::new(acc), op.to_string(), type_spec)
                })
            });

        let op_eq = choice((
            just("=").to("="),
            just("~").to("~"),
            just("!=").to("!="),
            just("!~").to("!~"),
        ))
        .padded_by(trivia());
        let equality = type_expr
            .clone()
            .boxed()
            .then(op_eq.then(type_expr.boxed()).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Equality(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let op_mem = choice((
            text::keyword("in").to("in"),
            text::keyword("contains").to("contains"),
        ))
        .padded_by(trivia());
        let membership = equality
            .clone()
            .boxed()
            .then(op_mem.then(equality.boxed()).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Membership(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let logical_and = membership
            .clone()
            .boxed()
            .then(
                text::keyword("and")
                    .padded_by(trivia())
                    .then(membership.boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (_, right)| {
                    Expression::And(Box::new(acc), Box::new(right))
                })
            });

        let op_or = choice((text::keyword("or").to("or"), text::keyword("xor").to("xor"))).padded_by(trivia());
        let logical_or = logical_and
            .clone()
            .boxed()
            .then(op_or.then(logical_and.boxed()).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Or(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        logical_or
            .clone()
            .boxed()
            .then(
                text::keyword("implies")
                    .padded_by(trivia())
                    .then(logical_or.boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (_, right)| {
                    Expression::Implies(Box::new(acc), Box::new(right))
                })
            })
    })
    .then_ignore(end())
}
