//! SQL dialects
//!
//! A [`SqlDialect`] turns abstract constraints into SQL text for one
//! relational backend. It never touches a connection: every builder is a
//! pure string transformation, so dialects can be tested and shared freely.
//!
//! The defaults follow PostgreSQL syntax; [`PostgresDialect`] only has to
//! supply its operator table and time extraction.

use crate::criteria::Operator;
use crate::error::{DbError, DbResult};
use crate::selection::{IntervalUnit, TimeConstraintType};

/// Dialect-specific SQL fragment builders
pub trait SqlDialect: Send + Sync {
    /// Dialect name, e.g. `pgsql`
    fn name(&self) -> &'static str;

    /// Quote a string literal
    fn escape(&self, input: &str) -> DbResult<String> {
        quote_literal(input)
    }

    /// Quote a binary literal. Must be reversible by [`unescape_binary`].
    ///
    /// [`unescape_binary`]: SqlDialect::unescape_binary
    fn escape_binary(&self, input: &[u8]) -> String {
        format!("'\\x{}'", to_hex(input))
    }

    /// Decode binary data read back from a result field (`\x<hex>`)
    fn unescape_binary(&self, input: &str) -> DbResult<Vec<u8>> {
        let hex = input
            .strip_prefix("\\x")
            .ok_or_else(|| DbError::InvalidValue("binary data must start with \\x".to_string()))?;
        from_hex(hex)
    }

    /// Native SQL for an operator, if the dialect has one
    fn operator_string(&self, operator: Operator) -> Option<&'static str>;

    /// `field OP value`.
    ///
    /// Case-insensitive operators without a native form are expressed by
    /// folding both operands with `lower()`.
    fn build_constraint(
        &self,
        field: &str,
        operator: Operator,
        value: Option<&str>,
    ) -> DbResult<String> {
        fold_case_constraint(self, field, operator, value)
    }

    /// Extract a calendar component from a time expression, shifting it by
    /// `gmt_offset` seconds first (whole hours).
    fn build_time_extract(
        &self,
        field: &str,
        unit: TimeConstraintType,
        gmt_offset: i32,
    ) -> String;

    /// `extract(field) OP value`.
    ///
    /// Weekday values are given zero-based and compared one-based.
    fn build_time_constraint(
        &self,
        field: &str,
        unit: TimeConstraintType,
        operator: Operator,
        value: i32,
        gmt_offset: i32,
    ) -> DbResult<String> {
        let op = self
            .operator_string(operator)
            .ok_or(DbError::UnknownOperator(operator))?;

        let value = match unit {
            TimeConstraintType::Wday => value % 7 + 1,
            _ => value,
        };

        Ok(format!(
            "{} {} {}",
            self.build_time_extract(field, unit, gmt_offset),
            op,
            value
        ))
    }

    /// `field + amount * unit` for an integer amount
    fn interval_multiply(&self, field: &str, amount: i64, unit: IntervalUnit) -> DbResult<String> {
        Ok(format!(
            "({} + ({} * INTERVAL '1 {}'))",
            field,
            amount,
            pg_interval_unit(unit)
        ))
    }

    /// `field + INTERVAL 'literal unit'` for anything that is not an integer
    fn interval_add_literal(
        &self,
        field: &str,
        literal: &str,
        unit: IntervalUnit,
    ) -> DbResult<String> {
        let interval = self.escape(&format!("{} {}", literal, pg_interval_unit(unit)))?;
        Ok(format!("({} + INTERVAL {})", field, interval))
    }

    /// Shift a time expression by `literal` units.
    ///
    /// A literal that is entirely an integer selects the multiplicative
    /// form, anything else is handed to the additive form.
    fn build_time_interval(
        &self,
        field: &str,
        literal: &str,
        unit: IntervalUnit,
    ) -> DbResult<String> {
        match literal.trim().parse::<i64>() {
            Ok(amount) => self.interval_multiply(field, amount, unit),
            Err(_) => self.interval_add_literal(field, literal, unit),
        }
    }

    /// ` LIMIT l OFFSET o`, ` LIMIT l`, ` LIMIT ALL OFFSET o` or nothing
    fn build_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => format!(" LIMIT ALL OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}

/// Shared body of [`SqlDialect::build_constraint`], callable from overrides.
pub fn fold_case_constraint<D: SqlDialect + ?Sized>(
    dialect: &D,
    field: &str,
    operator: Operator,
    value: Option<&str>,
) -> DbResult<String> {
    if let Some(op) = dialect.operator_string(operator) {
        return Ok(match value {
            Some(v) => format!("{} {} {}", field, op, v),
            None => format!("{} {}", field, op),
        });
    }

    if operator.is_nocase() {
        if let Some(op) = dialect.operator_string(operator.case_sensitive()) {
            let value = value.ok_or_else(|| {
                DbError::InvalidValue(format!("operator '{}' requires a value", operator))
            })?;
            return Ok(format!("lower({}) {} lower({})", field, op, value));
        }
    }

    Err(DbError::UnknownOperator(operator))
}

/// Standard SQL string literal: wrap in single quotes, double inner quotes
pub fn quote_literal(input: &str) -> DbResult<String> {
    if input.contains('\0') {
        return Err(DbError::InvalidValue(
            "string literal contains a NUL byte".to_string(),
        ));
    }
    Ok(format!("'{}'", input.replace('\'', "''")))
}

pub(crate) fn to_hex(input: &[u8]) -> String {
    input.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn from_hex(hex: &str) -> DbResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(DbError::InvalidValue("odd-length hex data".to_string()));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| DbError::InvalidValue(format!("invalid hex data '{}'", hex)))
        })
        .collect()
}

fn pg_interval_unit(unit: IntervalUnit) -> &'static str {
    match unit {
        IntervalUnit::Year => "YEAR",
        IntervalUnit::Quarter => "QUARTER",
        IntervalUnit::Month => "MONTH",
        IntervalUnit::Week => "WEEK",
        IntervalUnit::Day => "DAY",
        IntervalUnit::Hour => "HOUR",
        IntervalUnit::Min => "MINUTE",
        IntervalUnit::Sec => "SECOND",
    }
}

/// PostgreSQL syntax
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "pgsql"
    }

    fn operator_string(&self, operator: Operator) -> Option<&'static str> {
        let op = match operator {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Lesser => "<",
            Operator::LesserOrEqual => "<=",
            Operator::Substr => "LIKE",
            Operator::SubstrNocase => "ILIKE",
            Operator::NotSubstr => "NOT LIKE",
            Operator::NotSubstrNocase => "NOT ILIKE",
            Operator::Regex => "~",
            Operator::RegexNocase => "~*",
            Operator::NotRegex => "!~",
            Operator::NotRegexNocase => "!~*",
            Operator::Null => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
            Operator::EqualNocase | Operator::NotEqualNocase => return None,
        };
        Some(op)
    }

    fn build_time_extract(
        &self,
        field: &str,
        unit: TimeConstraintType,
        gmt_offset: i32,
    ) -> String {
        let source = if gmt_offset == 0 {
            field.to_string()
        } else {
            format!("{} + INTERVAL '{} HOUR'", field, gmt_offset / 3600)
        };

        let unit = match unit {
            TimeConstraintType::Year => "YEAR",
            TimeConstraintType::Quarter => "QUARTER",
            TimeConstraintType::Month => "MONTH",
            TimeConstraintType::Yday => "DOY",
            TimeConstraintType::Mday => "DAY",
            TimeConstraintType::Wday => "DOW",
            TimeConstraintType::Hour => "HOUR",
            TimeConstraintType::Min => "MINUTE",
            TimeConstraintType::Sec => "SECOND",
            TimeConstraintType::Msec => "MILLISECOND",
            TimeConstraintType::Usec => "MICROSECOND",
        };

        format!("EXTRACT({} FROM {})", unit, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_offset() {
        let d = PostgresDialect;
        assert_eq!(d.build_limit_offset(Some(5), Some(10)), " LIMIT 5 OFFSET 10");
        assert_eq!(d.build_limit_offset(Some(5), None), " LIMIT 5");
        assert_eq!(d.build_limit_offset(None, Some(10)), " LIMIT ALL OFFSET 10");
        assert_eq!(d.build_limit_offset(None, None), "");
        assert_eq!(d.build_limit_offset(Some(0), Some(0)), " LIMIT 0 OFFSET 0");
    }

    #[test]
    fn test_wday_is_remapped() {
        let d = PostgresDialect;
        let sql = d
            .build_time_constraint("t.time", TimeConstraintType::Wday, Operator::Equal, 0, 0)
            .unwrap();
        assert_eq!(sql, "EXTRACT(DOW FROM t.time) = 1");

        let sql = d
            .build_time_constraint("t.time", TimeConstraintType::Wday, Operator::Equal, 6, 0)
            .unwrap();
        assert_eq!(sql, "EXTRACT(DOW FROM t.time) = 7");

        let sql = d
            .build_time_constraint("t.time", TimeConstraintType::Hour, Operator::Lesser, 6, 0)
            .unwrap();
        assert_eq!(sql, "EXTRACT(HOUR FROM t.time) < 6");
    }

    #[test]
    fn test_time_constraint_unknown_operator() {
        let d = PostgresDialect;
        let err = d
            .build_time_constraint("t.time", TimeConstraintType::Year, Operator::EqualNocase, 1, 0)
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownOperator(Operator::EqualNocase)));
    }

    #[test]
    fn test_time_extract_with_offset() {
        let d = PostgresDialect;
        assert_eq!(
            d.build_time_extract("t.time", TimeConstraintType::Hour, 0),
            "EXTRACT(HOUR FROM t.time)"
        );
        assert_eq!(
            d.build_time_extract("t.time", TimeConstraintType::Hour, 7200),
            "EXTRACT(HOUR FROM t.time + INTERVAL '2 HOUR')"
        );
        assert_eq!(
            d.build_time_extract("t.time", TimeConstraintType::Yday, -3600),
            "EXTRACT(DOY FROM t.time + INTERVAL '-1 HOUR')"
        );
    }

    #[test]
    fn test_time_interval_forms() {
        let d = PostgresDialect;
        assert_eq!(
            d.build_time_interval("t.time", "3", IntervalUnit::Day).unwrap(),
            "(t.time + (3 * INTERVAL '1 DAY'))"
        );
        assert_eq!(
            d.build_time_interval("t.time", "now()", IntervalUnit::Day).unwrap(),
            "(t.time + INTERVAL 'now() DAY')"
        );
        assert_eq!(
            d.build_time_interval("t.time", "3x", IntervalUnit::Min).unwrap(),
            "(t.time + INTERVAL '3x MINUTE')"
        );
    }

    #[test]
    fn test_time_interval_literal_is_quoted() {
        let d = PostgresDialect;
        assert_eq!(
            d.build_time_interval("t.time", "1' DAY'); DROP TABLE x; --", IntervalUnit::Day)
                .unwrap(),
            "(t.time + INTERVAL '1'' DAY''); DROP TABLE x; -- DAY')"
        );
        assert!(matches!(
            d.build_time_interval("t.time", "1\0", IntervalUnit::Day),
            Err(DbError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_constraint_nocase_fallback() {
        let d = PostgresDialect;
        assert_eq!(
            d.build_constraint("a.b", Operator::EqualNocase, Some("'X'")).unwrap(),
            "lower(a.b) = lower('X')"
        );
        assert_eq!(
            d.build_constraint("a.b", Operator::NotEqualNocase, Some("'X'")).unwrap(),
            "lower(a.b) != lower('X')"
        );
        assert_eq!(
            d.build_constraint("a.b", Operator::SubstrNocase, Some("'%x%'")).unwrap(),
            "a.b ILIKE '%x%'"
        );
        assert_eq!(d.build_constraint("a.b", Operator::Null, None).unwrap(), "a.b IS NULL");
    }

    #[test]
    fn test_escape() {
        let d = PostgresDialect;
        assert_eq!(d.escape("it's").unwrap(), "'it''s'");
        assert_eq!(d.escape("").unwrap(), "''");
        assert!(d.escape("a\0b").is_err());
    }

    #[test]
    fn test_binary_escape_is_reversible() {
        let d = PostgresDialect;
        let data = [0u8, 1, 0x7f, 0xff, b'\''];
        let escaped = d.escape_binary(&data);
        assert_eq!(escaped, "'\\x00017fff27'");

        let stored = escaped.trim_matches('\'');
        assert_eq!(d.unescape_binary(stored).unwrap(), data);
        assert!(d.unescape_binary("00").is_err());
        assert!(d.unescape_binary("\\x0").is_err());
        assert!(d.unescape_binary("\\xzz").is_err());
    }
}
