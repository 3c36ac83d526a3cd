//! Filter criteria
//!
//! A [`Criteria`] is a boolean tree of [`Criterion`] leaves. Each leaf
//! compares one object path against an optional value using an
//! [`Operator`]. Trees are turned into SQL by [`CriteriaCompiler`].

pub mod compiler;

pub use compiler::{CompiledCriteria, CriteriaCompiler, SelectedSql, SortDirection};

use crate::error::{DbError, DbResult, SyntaxError};
use crate::path::{object_path, ObjectPath};
use crate::selection::TimeConstraintType;
use crate::value::Value;
use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, i64 as integer, multispace0, multispace1},
    combinator::{all_consuming, cut, map, map_res, rest, verify},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Lesser,
    LesserOrEqual,
    Substr,
    SubstrNocase,
    NotSubstr,
    NotSubstrNocase,
    Regex,
    RegexNocase,
    NotRegex,
    NotRegexNocase,
    Null,
    NotNull,
    EqualNocase,
    NotEqualNocase,
}

impl Operator {
    pub const ALL: [Operator; 18] = [
        Self::Equal,
        Self::NotEqual,
        Self::Greater,
        Self::GreaterOrEqual,
        Self::Lesser,
        Self::LesserOrEqual,
        Self::Substr,
        Self::SubstrNocase,
        Self::NotSubstr,
        Self::NotSubstrNocase,
        Self::Regex,
        Self::RegexNocase,
        Self::NotRegex,
        Self::NotRegexNocase,
        Self::Null,
        Self::NotNull,
        Self::EqualNocase,
        Self::NotEqualNocase,
    ];

    pub fn is_nocase(self) -> bool {
        matches!(
            self,
            Self::SubstrNocase
                | Self::NotSubstrNocase
                | Self::RegexNocase
                | Self::NotRegexNocase
                | Self::EqualNocase
                | Self::NotEqualNocase
        )
    }

    /// The case-sensitive operator with the same meaning
    pub fn case_sensitive(self) -> Self {
        match self {
            Self::SubstrNocase => Self::Substr,
            Self::NotSubstrNocase => Self::NotSubstr,
            Self::RegexNocase => Self::Regex,
            Self::NotRegexNocase => Self::NotRegex,
            Self::EqualNocase => Self::Equal,
            Self::NotEqualNocase => Self::NotEqual,
            other => other,
        }
    }

    pub fn is_substring(self) -> bool {
        matches!(
            self,
            Self::Substr | Self::SubstrNocase | Self::NotSubstr | Self::NotSubstrNocase
        )
    }

    /// False only for the NULL tests
    pub fn needs_value(self) -> bool {
        !matches!(self, Self::Null | Self::NotNull)
    }

    /// Textual form used by the criteria syntax (`alert.messageid == 'x'`)
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Lesser => "<",
            Self::LesserOrEqual => "<=",
            Self::Substr => "<>",
            Self::SubstrNocase => "<>*",
            Self::NotSubstr => "!<>",
            Self::NotSubstrNocase => "!<>*",
            Self::Regex => "~",
            Self::RegexNocase => "~*",
            Self::NotRegex => "!~",
            Self::NotRegexNocase => "!~*",
            Self::Null => "IS NULL",
            Self::NotNull => "IS NOT NULL",
            Self::EqualNocase => "==*",
            Self::NotEqualNocase => "!=*",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equal => "equal",
            Self::NotEqual => "not equal",
            Self::Greater => "greater",
            Self::GreaterOrEqual => "greater or equal",
            Self::Lesser => "lesser",
            Self::LesserOrEqual => "lesser or equal",
            Self::Substr => "substr",
            Self::SubstrNocase => "substr nocase",
            Self::NotSubstr => "not substr",
            Self::NotSubstrNocase => "not substr nocase",
            Self::Regex => "regex",
            Self::RegexNocase => "regex nocase",
            Self::NotRegex => "not regex",
            Self::NotRegexNocase => "not regex nocase",
            Self::Null => "null",
            Self::NotNull => "not null",
            Self::EqualNocase => "equal nocase",
            Self::NotEqualNocase => "not equal nocase",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Operator {
    type Err = DbError;

    /// Parse an operator symbol. `=` is accepted as `==`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "=" {
            return Ok(Self::Equal);
        }
        Self::ALL
            .iter()
            .copied()
            .filter(|op| !matches!(op, Self::Null | Self::NotNull))
            .find(|op| op.symbol() == s)
            .ok_or_else(|| DbError::InvalidValue(format!("unknown operator '{}'", s)))
    }
}

/// Right-hand side of a criterion
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionValue {
    Value(Value),
    /// Match on calendar components, e.g. `hour = 3 AND wday = 1`
    BrokenDownTime {
        parts: Vec<(TimeConstraintType, i32)>,
        gmt_offset: i32,
    },
}

impl From<Value> for CriterionValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// One `path OP value` test
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub path: ObjectPath,
    pub operator: Operator,
    pub value: Option<CriterionValue>,
}

impl Criterion {
    pub fn new(path: ObjectPath, operator: Operator, value: Option<CriterionValue>) -> Self {
        Self {
            path,
            operator,
            value,
        }
    }
}

/// Boolean tree of criteria
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    Criterion(Criterion),
    And(Box<Criteria>, Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
    Not(Box<Criteria>),
}

impl Criteria {
    /// `path OP value`
    pub fn compare(path: &str, operator: Operator, value: impl Into<Value>) -> DbResult<Self> {
        Ok(Self::Criterion(Criterion::new(
            path.parse()?,
            operator,
            Some(CriterionValue::Value(value.into())),
        )))
    }

    /// `path IS NULL`
    pub fn is_null(path: &str) -> DbResult<Self> {
        Ok(Self::Criterion(Criterion::new(
            path.parse()?,
            Operator::Null,
            None,
        )))
    }

    /// `path IS NOT NULL`
    pub fn is_not_null(path: &str) -> DbResult<Self> {
        Ok(Self::Criterion(Criterion::new(
            path.parse()?,
            Operator::NotNull,
            None,
        )))
    }

    /// Compare calendar components of a time path
    pub fn broken_down_time(
        path: &str,
        operator: Operator,
        parts: Vec<(TimeConstraintType, i32)>,
        gmt_offset: i32,
    ) -> DbResult<Self> {
        Ok(Self::Criterion(Criterion::new(
            path.parse()?,
            operator,
            Some(CriterionValue::BrokenDownTime { parts, gmt_offset }),
        )))
    }

    pub fn and(self, other: Criteria) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Criteria) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Parse a single `path OP value` filter as typed on the command line.
    ///
    /// The value is taken as an integer when it parses as one, as a string
    /// otherwise; surrounding quotes are removed. `path` alone means
    /// NOT NULL and `!path` means NULL.
    pub fn parse_filter(text: &str) -> DbResult<Self> {
        if text.trim().is_empty() {
            return Err(SyntaxError::new(0, "", "empty filter").into());
        }

        match all_consuming(delimited(multispace0, filter, multispace0))(text) {
            Ok((_, criteria)) => Ok(criteria),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(filter_error(text, e.input).into())
            }
            Err(nom::Err::Incomplete(_)) => Err(filter_error(text, "").into()),
        }
    }

    /// Every criterion leaf, left to right
    pub fn leaves(&self) -> Vec<&Criterion> {
        match self {
            Self::Criterion(c) => vec![c],
            Self::And(a, b) | Self::Or(a, b) => {
                let mut leaves = a.leaves();
                leaves.extend(b.leaves());
                leaves
            }
            Self::Not(c) => c.leaves(),
        }
    }
}

fn filter(input: &str) -> IResult<&str, Criteria> {
    alt((
        map(
            tuple((
                object_path,
                preceded(multispace1, filter_operator),
                preceded(multispace0, cut(filter_value)),
            )),
            |(path, operator, value)| {
                Criteria::Criterion(Criterion::new(path, operator, Some(value.into())))
            },
        ),
        map(preceded(char('!'), object_path), |path| {
            Criteria::Criterion(Criterion::new(path, Operator::Null, None))
        }),
        map(object_path, |path| {
            Criteria::Criterion(Criterion::new(path, Operator::NotNull, None))
        }),
    ))(input)
}

fn filter_operator(input: &str) -> IResult<&str, Operator> {
    map_res(take_while1(|c: char| "=!<>~*".contains(c)), |op: &str| {
        op.parse::<Operator>()
    })(input)
}

/// Quoted string, integer, or the bare remainder as a string
fn filter_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(whole(quoted('\'')), |s: &str| Value::String(s.to_string())),
        map(whole(quoted('"')), |s: &str| Value::String(s.to_string())),
        map(whole(integer), Value::Integer),
        map(verify(rest, |s: &str| !s.trim().is_empty()), |s: &str| {
            Value::String(s.trim().to_string())
        }),
    ))(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(char(quote), take_while(move |c: char| c != quote), char(quote))
}

/// `parser` followed by nothing but whitespace
fn whole<'a, O, F>(parser: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    all_consuming(terminated(parser, multispace0))
}

fn filter_error(input: &str, remaining: &str) -> SyntaxError {
    let position = input.len() - remaining.len();
    match remaining.split_whitespace().next() {
        Some(token) => SyntaxError::new(position, token, "unexpected token"),
        None => SyntaxError::new(position, "", "unexpected end of input"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_symbols_roundtrip() {
        for op in Operator::ALL {
            if op.needs_value() {
                assert_eq!(op.symbol().parse::<Operator>().unwrap(), op);
            }
        }
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Equal);
        assert!("=>".parse::<Operator>().is_err());
    }

    #[test]
    fn test_case_sensitive_counterpart() {
        assert_eq!(Operator::EqualNocase.case_sensitive(), Operator::Equal);
        assert_eq!(Operator::NotRegexNocase.case_sensitive(), Operator::NotRegex);
        assert_eq!(Operator::Greater.case_sensitive(), Operator::Greater);
        assert!(Operator::SubstrNocase.is_nocase());
        assert!(!Operator::Substr.is_nocase());
    }

    #[test]
    fn test_parse_filter() {
        let criteria = Criteria::parse_filter("alert.messageid == 'abc def'").unwrap();
        let leaf = criteria.leaves()[0];
        assert_eq!(leaf.operator, Operator::Equal);
        assert_eq!(
            leaf.value,
            Some(CriterionValue::Value(Value::String("abc def".into())))
        );

        let criteria = Criteria::parse_filter("alert.assessment.impact.severity <> high").unwrap();
        assert_eq!(criteria.leaves()[0].operator, Operator::Substr);

        let criteria = Criteria::parse_filter("heartbeat.heartbeat_interval   >=  600").unwrap();
        assert_eq!(
            criteria.leaves()[0].value,
            Some(CriterionValue::Value(Value::Integer(600)))
        );
    }

    #[test]
    fn test_parse_filter_null_forms() {
        let criteria = Criteria::parse_filter("alert.analyzer.name").unwrap();
        assert_eq!(criteria.leaves()[0].operator, Operator::NotNull);

        let criteria = Criteria::parse_filter("!alert.analyzer.name").unwrap();
        assert_eq!(criteria.leaves()[0].operator, Operator::Null);
        assert_eq!(criteria.leaves()[0].value, None);
    }

    #[test]
    fn test_parse_filter_errors() {
        assert!(Criteria::parse_filter("").is_err());
        assert!(Criteria::parse_filter("alert.messageid ==").is_err());
        assert!(Criteria::parse_filter("alert..x == 1").is_err());
        assert!(Criteria::parse_filter("!alert.messageid == 1").is_err());
        assert!(Criteria::parse_filter("alert.messageid => 1").is_err());
    }

    #[test]
    fn test_parse_filter_error_position() {
        match Criteria::parse_filter("alert.messageid ==") {
            Err(DbError::Syntax(e)) => {
                assert_eq!(e.position, 18);
                assert_eq!(e.message, "unexpected end of input");
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }

        match Criteria::parse_filter("alert.messageid => 1") {
            Err(DbError::Syntax(e)) => {
                assert_eq!(e.position, 16);
                assert_eq!(e.token, "=>");
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_values() {
        let value = |text: &str| {
            Criteria::parse_filter(text).unwrap().leaves()[0]
                .value
                .clone()
        };

        assert_eq!(
            value("alert.messageid = \"42\""),
            Some(CriterionValue::Value(Value::String("42".into())))
        );
        assert_eq!(
            value("alert.source.service.port ==-1 "),
            Some(CriterionValue::Value(Value::Integer(-1)))
        );
        assert_eq!(
            value("alert.classification.text <>* port scan "),
            Some(CriterionValue::Value(Value::String("port scan".into())))
        );
        assert_eq!(
            value("alert.messageid == 12ab"),
            Some(CriterionValue::Value(Value::String("12ab".into())))
        );
    }

    #[test]
    fn test_tree_builders() {
        let a = Criteria::is_null("alert.messageid").unwrap();
        let b = Criteria::compare("alert.analyzer.name", Operator::Equal, "x").unwrap();
        let tree = a.and(b).negate();

        assert!(matches!(tree, Criteria::Not(_)));
        assert_eq!(tree.leaves().len(), 2);
    }
}
