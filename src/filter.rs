//! The facet-filter subset of the Algolia `filters` language understood by the
//! local index: `attr:value`, `attr:"quoted value"`, `NOT`, `AND`, `OR` and
//! parentheses. `AND` binds tighter than `OR`.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, opt, value, verify},
    error::ErrorKind,
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair, terminated},
    IResult,
};

use crate::error::{NoteSearchError, Result};

const MAX_FILTER_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, value: String },
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Evaluates the filter against a stored record. Matching is exact and
    /// case-sensitive; array attributes match when any element matches.
    pub fn matches(&self, record: &serde_json::Map<String, serde_json::Value>) -> bool {
        match self {
            Filter::Equals { field, value } => match lookup(record, field) {
                Some(serde_json::Value::Array(items)) => {
                    items.iter().any(|item| value_equals(item, value))
                }
                Some(v) => value_equals(v, value),
                None => false,
            },
            Filter::Not(inner) => !inner.matches(record),
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

/// Dotted attribute lookup (`meta.owner`).
fn lookup<'a>(
    record: &'a serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Option<&'a serde_json::Value> {
    let mut parts = field.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn value_equals(stored: &serde_json::Value, expected: &str) -> bool {
    match stored {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Number(n) => n.to_string() == expected,
        serde_json::Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

/// Parses `input`. Parentheses and `NOT` may nest at most
/// `MAX_FILTER_DEPTH` levels; deeper input is rejected before recursing.
pub fn parse_filter(input: &str) -> Result<Filter> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NoteSearchError::InvalidFilter("empty filter".to_string()));
    }
    let (_, filter) = all_consuming(delimited(multispace0, |i| or_expr(i, 0), multispace0))(
        trimmed,
    )
    .map_err(|e| match e {
        nom::Err::Failure(ref err) if err.code == ErrorKind::TooLarge => {
            NoteSearchError::InvalidFilter(format!(
                "filter nesting exceeds {} levels",
                MAX_FILTER_DEPTH
            ))
        }
        e => NoteSearchError::InvalidFilter(format!("{}: {}", input, e)),
    })?;
    Ok(filter)
}

fn or_expr(input: &str, depth: usize) -> IResult<&str, Filter> {
    map(
        separated_list1(keyword("OR"), |i| and_expr(i, depth)),
        |mut items: Vec<Filter>| {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Filter::Or(items)
            }
        },
    )(input)
}

fn and_expr(input: &str, depth: usize) -> IResult<&str, Filter> {
    map(
        separated_list1(keyword("AND"), |i| unary(i, depth)),
        |mut items: Vec<Filter>| {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Filter::And(items)
            }
        },
    )(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(multispace1, tag_no_case(word), multispace1)
}

fn unary(input: &str, depth: usize) -> IResult<&str, Filter> {
    if depth > MAX_FILTER_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    alt((
        map(
            preceded(terminated(tag_no_case("NOT"), multispace1), |i| {
                unary(i, depth + 1)
            }),
            |f| Filter::Not(Box::new(f)),
        ),
        delimited(
            terminated(char('('), multispace0),
            |i| or_expr(i, depth + 1),
            preceded(multispace0, char(')')),
        ),
        facet,
    ))(input)
}

fn facet(input: &str) -> IResult<&str, Filter> {
    map(
        separated_pair(
            attribute,
            delimited(multispace0, char(':'), multispace0),
            facet_value,
        ),
        |(field, value)| Filter::Equals {
            field: field.to_string(),
            value,
        },
    )(input)
}

fn attribute(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == '-'),
        |s: &str| !s.eq_ignore_ascii_case("NOT"),
    )(input)
}

fn facet_value(input: &str) -> IResult<&str, String> {
    alt((quoted, map(bare, |s: &str| s.to_string())))(input)
}

fn bare(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')' && c != '"')(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            )),
            |s: Option<String>| s.unwrap_or_default(),
        ),
        char('"'),
    )(input)
}

/// Quotes a facet value when it contains anything beyond `[A-Za-z0-9_-]`.
pub fn quote_facet_value(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
