//! Criteria → SQL
//!
//! Pure translation: resolves every path through the [`MappingIndex`] and
//! asks the [`SqlDialect`] for the matching fragments. Nothing here touches
//! a connection.

use crate::criteria::{Criteria, Criterion, CriterionValue, Operator};
use crate::error::{DbError, DbResult};
use crate::mapping::{MappingEntry, MappingIndex};
use crate::selection::{SelectedPath, SelectionFlags};
use crate::sql::SqlDialect;
use crate::value::{sql_timestamp, Value};
use std::fmt;

/// A WHERE clause body plus the mapping entries it reads
#[derive(Debug, Clone)]
pub struct CompiledCriteria<'a> {
    pub sql: String,
    pub entries: Vec<&'a MappingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// SQL for one selected column
#[derive(Debug, Clone)]
pub struct SelectedSql<'a> {
    /// Projection expression
    pub expr: String,
    /// Expression to group by, when the column is grouped
    pub group_by: Option<String>,
    pub order: Option<(String, SortDirection)>,
    pub entry: &'a MappingEntry,
}

const LIKE_ESCAPE: char = '\\';

/// Match `text` literally inside a LIKE pattern
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern
}

/// Compiles criteria and selected paths for one mapping and dialect
pub struct CriteriaCompiler<'a> {
    index: &'a MappingIndex,
    dialect: &'a dyn SqlDialect,
}

impl<'a> CriteriaCompiler<'a> {
    pub fn new(index: &'a MappingIndex, dialect: &'a dyn SqlDialect) -> Self {
        Self { index, dialect }
    }

    /// Compile a criteria tree. AND/OR nodes are always parenthesized.
    pub fn compile(&self, criteria: &Criteria) -> DbResult<CompiledCriteria<'a>> {
        let mut entries = Vec::new();
        let sql = self.compile_node(criteria, &mut entries)?;
        Ok(CompiledCriteria { sql, entries })
    }

    fn compile_node(
        &self,
        criteria: &Criteria,
        entries: &mut Vec<&'a MappingEntry>,
    ) -> DbResult<String> {
        match criteria {
            Criteria::Criterion(c) => self.compile_criterion(c, entries),
            Criteria::And(a, b) => Ok(format!(
                "({} AND {})",
                self.compile_node(a, entries)?,
                self.compile_node(b, entries)?
            )),
            Criteria::Or(a, b) => Ok(format!(
                "({} OR {})",
                self.compile_node(a, entries)?,
                self.compile_node(b, entries)?
            )),
            Criteria::Not(c) => Ok(format!("NOT ({})", self.compile_node(c, entries)?)),
        }
    }

    fn compile_criterion(
        &self,
        criterion: &Criterion,
        entries: &mut Vec<&'a MappingEntry>,
    ) -> DbResult<String> {
        let entry = self.index.resolve(&criterion.path)?;
        let field = entry.sql_expression();
        let operator = criterion.operator;

        let predicate = match (&criterion.value, operator.needs_value()) {
            (_, false) => self.dialect.build_constraint(&field, operator, None)?,
            (None, true) => {
                return Err(DbError::InvalidValue(format!(
                    "operator '{}' on {} requires a value",
                    operator, criterion.path
                )))
            }
            (Some(CriterionValue::Value(value)), true) => {
                let literal = self.literal(value, operator)?;
                let constraint = self.dialect.build_constraint(&field, operator, Some(&literal))?;
                if operator.is_substring() {
                    format!("{} ESCAPE '{}'", constraint, LIKE_ESCAPE)
                } else {
                    constraint
                }
            }
            (Some(CriterionValue::BrokenDownTime { parts, gmt_offset }), true) => {
                self.broken_down_time(&field, operator, parts, *gmt_offset)?
            }
        };

        entries.push(entry);

        Ok(match entry.condition() {
            Some(condition) => format!("({} AND {})", predicate, condition),
            None => predicate,
        })
    }

    fn broken_down_time(
        &self,
        field: &str,
        operator: Operator,
        parts: &[(crate::selection::TimeConstraintType, i32)],
        gmt_offset: i32,
    ) -> DbResult<String> {
        if parts.is_empty() {
            return Err(DbError::InvalidValue(
                "broken-down time without components".to_string(),
            ));
        }

        let fragments = parts
            .iter()
            .map(|(unit, value)| {
                self.dialect
                    .build_time_constraint(field, *unit, operator, *value, gmt_offset)
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(if fragments.len() == 1 {
            fragments.into_iter().collect()
        } else {
            format!("({})", fragments.join(" AND "))
        })
    }

    /// Escape a value for comparison with `operator`
    fn literal(&self, value: &Value, operator: Operator) -> DbResult<String> {
        if operator.is_substring() {
            return self
                .dialect
                .escape(&format!("%{}%", like_pattern(&value.to_string())));
        }

        let pattern = matches!(
            operator,
            Operator::Regex | Operator::RegexNocase | Operator::NotRegex | Operator::NotRegexNocase
        );

        match value {
            _ if pattern => self.dialect.escape(&value.to_string()),
            Value::String(s) => self.dialect.escape(s),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(x) if x.is_finite() => Ok(x.to_string()),
            Value::Float(x) => Err(DbError::InvalidValue(format!("cannot compare against {}", x))),
            Value::Time(t) => self.dialect.escape(&sql_timestamp(t)),
            Value::Binary(b) => Ok(self.dialect.escape_binary(b)),
        }
    }

    /// Projection, grouping and ordering SQL for one selected column.
    ///
    /// The time extraction applies first, then the interval shift, then
    /// the aggregate function.
    pub fn compile_selected(&self, selected: &SelectedPath) -> DbResult<SelectedSql<'a>> {
        let entry = self.index.resolve(&selected.path)?;
        let mut expr = entry.sql_expression();

        if let Some(unit) = selected.time_constraint {
            expr = self
                .dialect
                .build_time_extract(&expr, unit, selected.gmt_offset);
        }

        if let Some(interval) = &selected.interval {
            expr = self
                .dialect
                .build_time_interval(&expr, &interval.value, interval.unit)?;
        }

        let group_by = selected
            .flags
            .contains(SelectionFlags::GROUP_BY)
            .then(|| expr.clone());

        if let Some(aggregate) = selected.flags.aggregate() {
            expr = format!("{}({})", aggregate_function(aggregate)?, expr);
        }

        let order = if selected.flags.contains(SelectionFlags::ORDER_ASC) {
            Some((expr.clone(), SortDirection::Asc))
        } else if selected.flags.contains(SelectionFlags::ORDER_DESC) {
            Some((expr.clone(), SortDirection::Desc))
        } else {
            None
        };

        Ok(SelectedSql {
            expr,
            group_by,
            order,
            entry,
        })
    }
}

fn aggregate_function(flag: SelectionFlags) -> DbResult<&'static str> {
    let name = match flag {
        f if f == SelectionFlags::MIN => "MIN",
        f if f == SelectionFlags::MAX => "MAX",
        f if f == SelectionFlags::AVG => "AVG",
        f if f == SelectionFlags::STD => "STDDEV",
        f if f == SelectionFlags::COUNT => "COUNT",
        f if f == SelectionFlags::SUM => "SUM",
        other => {
            return Err(DbError::InvalidValue(format!(
                "more than one aggregate function in {:?}",
                other
            )))
        }
    };
    Ok(name)
}
