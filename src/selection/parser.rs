//! Selection language parser
//!
//! # Grammar
//!
//! ```text
//! selection := item (',' item)*
//! item      := term ('/' flag)*
//! flag      := order_asc | asc | order_desc | desc | group_by
//! term      := agg '(' (time_term | path) ')' | time_term | path
//! agg       := min | max | avg | std | sum | count
//! time_term := extract '(' unit FROM path [timezone offset] ')'
//!            | interval '(' path ',' literal ',' interval_unit ')'
//! ```
//!
//! # Examples
//!
//! ```text
//! alert.classification.text/group_by, count(alert.messageid)/order_desc
//! extract(hour FROM alert.create_time timezone +02:00)/group_by
//! max(interval(alert.create_time, 3, day))
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{cut, map, map_res, not, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use crate::error::SyntaxError;
use crate::path::object_path;
use crate::selection::ast::*;

/// Parse a comma separated selection
pub fn parse_selection(input: &str) -> Result<PathSelection, SyntaxError> {
    let items = run(input, separated_list1(ws(char(',')), selected_item))?;

    let mut selection = PathSelection::new();
    for item in items {
        selection.add(item);
    }
    Ok(selection)
}

/// Parse exactly one selected path
pub fn parse_selected_path(input: &str) -> Result<SelectedPath, SyntaxError> {
    run(input, selected_item)
}

/// Run `parser` over the whole input and convert nom failures into a
/// positioned [`SyntaxError`].
fn run<'a, O, F>(input: &'a str, mut parser: F) -> Result<O, SyntaxError>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    if input.trim().is_empty() {
        return Err(SyntaxError::new(0, "", "empty selection"));
    }

    match parser(input) {
        Ok((remaining, output)) => {
            let remaining = remaining.trim_start();
            if remaining.is_empty() {
                Ok(output)
            } else {
                Err(error_at(input, remaining))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(error_at(input, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(error_at(input, "")),
    }
}

fn error_at(input: &str, remaining: &str) -> SyntaxError {
    let position = input.len() - remaining.len();
    let token = offending_token(remaining);

    if token.is_empty() {
        SyntaxError::new(position, "", "unexpected end of input")
    } else {
        SyntaxError::new(position, token, "unexpected token")
    }
}

/// The word (or single punctuation character) starting `remaining`
fn offending_token(remaining: &str) -> &str {
    let end = remaining
        .find(|c: char| c.is_whitespace() || "(),/".contains(c))
        .unwrap_or(remaining.len());

    if end > 0 {
        &remaining[..end]
    } else {
        remaining
            .chars()
            .next()
            .map(|c| &remaining[..c.len_utf8()])
            .unwrap_or("")
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Match `kw` only when it is not the prefix of a longer word
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(satisfy(is_word_char)))
}

fn selected_item(input: &str) -> IResult<&str, SelectedPath> {
    let (input, _) = multispace0(input)?;
    let (mut input, mut selected) = term(input)?;

    loop {
        let (rest, slash) = opt(ws(char('/')))(input)?;
        if slash.is_none() {
            break;
        }

        let (after, flag) = cut(selection_flag)(rest)?;
        if selected.flags.contains(flag) || conflicting_order(selected.flags, flag) {
            return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Verify)));
        }

        selected.flags |= flag;
        input = after;
    }

    Ok((input, selected))
}

fn conflicting_order(current: SelectionFlags, flag: SelectionFlags) -> bool {
    let order = SelectionFlags::ORDER_ASC | SelectionFlags::ORDER_DESC;
    order.contains(flag) && current.intersects(order)
}

fn selection_flag(input: &str) -> IResult<&str, SelectionFlags> {
    alt((
        value(
            SelectionFlags::ORDER_ASC,
            alt((keyword("order_asc"), keyword("asc"))),
        ),
        value(
            SelectionFlags::ORDER_DESC,
            alt((keyword("order_desc"), keyword("desc"))),
        ),
        value(SelectionFlags::GROUP_BY, keyword("group_by")),
    ))(input)
}

fn term(input: &str) -> IResult<&str, SelectedPath> {
    alt((aggregate, time_term, plain_path))(input)
}

fn plain_path(input: &str) -> IResult<&str, SelectedPath> {
    map(object_path, |path| {
        SelectedPath::new(path, SelectionFlags::empty())
    })(input)
}

fn aggregate_function(input: &str) -> IResult<&str, SelectionFlags> {
    alt((
        value(SelectionFlags::MIN, keyword("min")),
        value(SelectionFlags::MAX, keyword("max")),
        value(SelectionFlags::AVG, keyword("avg")),
        value(SelectionFlags::STD, keyword("std")),
        value(SelectionFlags::SUM, keyword("sum")),
        value(SelectionFlags::COUNT, keyword("count")),
    ))(input)
}

/// `count(alert.messageid)`. A bare `min` not followed by `(` is a path.
fn aggregate(input: &str) -> IResult<&str, SelectedPath> {
    let (input, flag) = aggregate_function(input)?;
    let (input, _) = ws(char('('))(input)?;
    let (input, mut selected) = cut(alt((time_term, plain_path)))(input)?;
    let (input, _) = cut(ws(char(')')))(input)?;

    selected.flags |= flag;
    Ok((input, selected))
}

fn time_term(input: &str) -> IResult<&str, SelectedPath> {
    alt((extract, interval))(input)
}

fn extract(input: &str) -> IResult<&str, SelectedPath> {
    let (input, _) = keyword("extract")(input)?;
    let (input, _) = ws(char('('))(input)?;
    cut(extract_body)(input)
}

fn extract_body(input: &str) -> IResult<&str, SelectedPath> {
    let (input, unit) = time_unit(input)?;
    let (input, _) = ws(alt((keyword("FROM"), keyword("from"))))(input)?;
    let (input, path) = object_path(input)?;
    let (input, offset) = opt(preceded(ws(keyword("timezone")), gmt_offset))(input)?;
    let (input, _) = ws(char(')'))(input)?;

    Ok((
        input,
        SelectedPath::new(path, SelectionFlags::empty())
            .with_time_constraint(unit, offset.unwrap_or(0)),
    ))
}

fn interval(input: &str) -> IResult<&str, SelectedPath> {
    let (input, _) = keyword("interval")(input)?;
    let (input, _) = ws(char('('))(input)?;
    cut(interval_body)(input)
}

fn interval_body(input: &str) -> IResult<&str, SelectedPath> {
    let (input, path) = object_path(input)?;
    let (input, _) = ws(char(','))(input)?;
    let (input, literal) = interval_literal(input)?;
    let (input, _) = ws(char(','))(input)?;
    let (input, unit) = interval_unit(input)?;
    let (input, _) = ws(char(')'))(input)?;

    Ok((
        input,
        SelectedPath::new(path, SelectionFlags::empty()).with_interval(literal, unit),
    ))
}

fn time_unit(input: &str) -> IResult<&str, TimeConstraintType> {
    alt((
        value(TimeConstraintType::Year, keyword("year")),
        value(TimeConstraintType::Quarter, keyword("quarter")),
        value(TimeConstraintType::Month, keyword("month")),
        value(TimeConstraintType::Yday, keyword("yday")),
        value(TimeConstraintType::Mday, keyword("mday")),
        value(TimeConstraintType::Mday, keyword("day")),
        value(TimeConstraintType::Wday, keyword("wday")),
        value(TimeConstraintType::Hour, keyword("hour")),
        value(TimeConstraintType::Min, keyword("min")),
        value(TimeConstraintType::Sec, keyword("sec")),
        value(TimeConstraintType::Msec, keyword("msec")),
        value(TimeConstraintType::Usec, keyword("usec")),
    ))(input)
}

fn interval_unit(input: &str) -> IResult<&str, IntervalUnit> {
    alt((
        value(IntervalUnit::Year, keyword("year")),
        value(IntervalUnit::Quarter, keyword("quarter")),
        value(IntervalUnit::Month, keyword("month")),
        value(IntervalUnit::Week, keyword("week")),
        value(IntervalUnit::Day, keyword("day")),
        value(IntervalUnit::Hour, keyword("hour")),
        value(IntervalUnit::Min, keyword("min")),
        value(IntervalUnit::Sec, keyword("sec")),
    ))(input)
}

/// Signed integer, or a quoted SQL expression kept verbatim
fn interval_literal(input: &str) -> IResult<&str, String> {
    alt((
        map(recognize(pair(opt(char('-')), digit1)), str::to_string),
        map(
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
            str::to_string,
        ),
        map(
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            str::to_string,
        ),
    ))(input)
}

fn number(input: &str) -> IResult<&str, i32> {
    map_res(digit1, str::parse::<i32>)(input)
}

/// `±HH:MM`, or a signed number of seconds east of UTC
fn gmt_offset(input: &str) -> IResult<&str, i32> {
    let (input, sign) = opt(alt((char('+'), char('-'))))(input)?;
    let (input, seconds) = alt((
        map(
            verify(
                pair(number, preceded(char(':'), number)),
                |&(h, m): &(i32, i32)| h <= 23 && m <= 59,
            ),
            |(h, m)| h * 3600 + m * 60,
        ),
        verify(number, |s: &i32| *s <= 86_400),
    ))(input)?;

    Ok((input, if sign == Some('-') { -seconds } else { seconds }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ObjectPath;

    fn path(s: &str) -> ObjectPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_plain_path() {
        let selected = parse_selected_path("alert.messageid").unwrap();
        assert_eq!(selected.path, path("alert.messageid"));
        assert!(selected.flags.is_empty());
        assert_eq!(selected.time_constraint, None);
    }

    #[test]
    fn test_aggregates_and_flags() {
        let selection = parse_selection("min(a), max(b)/order_desc").unwrap();
        assert_eq!(selection.len(), 2);

        let first = selection.get(0).unwrap();
        assert_eq!(first.column_index(), 0);
        assert_eq!(first.path, path("a"));
        assert_eq!(first.flags, SelectionFlags::MIN);

        let second = selection.get(1).unwrap();
        assert_eq!(second.column_index(), 1);
        assert_eq!(second.path, path("b"));
        assert!(second.flags.contains(SelectionFlags::MAX));
        assert!(second.flags.contains(SelectionFlags::ORDER_DESC));
    }

    #[test]
    fn test_every_aggregate() {
        for (text, flag) in [
            ("min(a)", SelectionFlags::MIN),
            ("max(a)", SelectionFlags::MAX),
            ("avg(a)", SelectionFlags::AVG),
            ("std(a)", SelectionFlags::STD),
            ("sum(a)", SelectionFlags::SUM),
            ("count(a)", SelectionFlags::COUNT),
        ] {
            assert_eq!(parse_selected_path(text).unwrap().flags, flag, "{}", text);
        }
    }

    #[test]
    fn test_flag_aliases() {
        let selected = parse_selected_path("alert.messageid / group_by / asc").unwrap();
        assert_eq!(
            selected.flags,
            SelectionFlags::GROUP_BY | SelectionFlags::ORDER_ASC
        );

        let selected = parse_selected_path("alert.messageid/desc").unwrap();
        assert_eq!(selected.flags, SelectionFlags::ORDER_DESC);
    }

    #[test]
    fn test_keyword_prefix_is_a_path() {
        let selected = parse_selected_path("minimum.value").unwrap();
        assert_eq!(selected.path, path("minimum.value"));
        assert!(selected.flags.is_empty());

        let selected = parse_selected_path("count").unwrap();
        assert_eq!(selected.path, path("count"));
    }

    #[test]
    fn test_extract() {
        let selected =
            parse_selected_path("extract(hour FROM alert.create_time)/group_by").unwrap();
        assert_eq!(selected.path, path("alert.create_time"));
        assert_eq!(selected.time_constraint, Some(TimeConstraintType::Hour));
        assert_eq!(selected.gmt_offset, 0);
        assert_eq!(selected.flags, SelectionFlags::GROUP_BY);

        let selected = parse_selected_path("extract(day from alert.create_time)").unwrap();
        assert_eq!(selected.time_constraint, Some(TimeConstraintType::Mday));
    }

    #[test]
    fn test_extract_timezone() {
        let selected =
            parse_selected_path("extract(hour FROM alert.create_time timezone +02:00)").unwrap();
        assert_eq!(selected.gmt_offset, 7200);

        let selected =
            parse_selected_path("extract(wday FROM alert.create_time timezone -3600)").unwrap();
        assert_eq!(selected.gmt_offset, -3600);
        assert_eq!(selected.time_constraint, Some(TimeConstraintType::Wday));

        assert!(parse_selected_path("extract(hour FROM a timezone +25:00)").is_err());
    }

    #[test]
    fn test_interval_literals() {
        let selected = parse_selected_path("interval(alert.create_time, 3, day)").unwrap();
        let interval = selected.interval.unwrap();
        assert_eq!(interval.value, "3");
        assert_eq!(interval.unit, IntervalUnit::Day);

        let selected = parse_selected_path("interval(alert.create_time, 'now()', hour)").unwrap();
        assert_eq!(selected.interval.unwrap().value, "now()");

        let selected = parse_selected_path("interval(a, -2, week)").unwrap();
        assert_eq!(selected.interval.unwrap().value, "-2");
    }

    #[test]
    fn test_aggregate_of_time_term() {
        let selected =
            parse_selected_path("count(extract(month FROM alert.create_time))/order_asc").unwrap();
        assert_eq!(
            selected.flags,
            SelectionFlags::COUNT | SelectionFlags::ORDER_ASC
        );
        assert_eq!(selected.time_constraint, Some(TimeConstraintType::Month));
    }

    #[test]
    fn test_empty_input() {
        let err = parse_selection("   ").unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.message, "empty selection");
    }

    #[test]
    fn test_unknown_aggregate_reports_position() {
        let err = parse_selection("alert.messageid, median(a)").unwrap_err();
        assert_eq!(err.position, 23);
        assert_eq!(err.token, "(");
    }

    #[test]
    fn test_unknown_flag() {
        let err = parse_selection("a/sideways").unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(err.token, "sideways");
    }

    #[test]
    fn test_conflicting_flags() {
        let err = parse_selection("a/order_asc/order_desc").unwrap_err();
        assert_eq!(err.token, "order_desc");
        assert!(parse_selection("a/group_by/group_by").is_err());
    }

    #[test]
    fn test_unclosed_parenthesis() {
        let err = parse_selection("min(a").unwrap_err();
        assert_eq!(err.position, 5);
        assert_eq!(err.message, "unexpected end of input");
    }

    #[test]
    fn test_bad_time_unit() {
        let err = parse_selection("extract(decade FROM a)").unwrap_err();
        assert_eq!(err.position, 8);
        assert_eq!(err.token, "decade");
    }

    #[test]
    fn test_trailing_comma() {
        let err = parse_selection("a, b,").unwrap_err();
        assert_eq!(err.position, 4);
        assert_eq!(err.token, ",");
    }
}
