//! Path selection types
//!
//! A [`PathSelection`] is the projection list of a values query: an ordered
//! list of [`SelectedPath`], each naming an object path plus the aggregate,
//! grouping, ordering and time transformations applied to it.

use crate::path::ObjectPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitwise-combinable selection flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SelectionFlags(u32);

impl SelectionFlags {
    pub const MIN: Self = Self(0x01);
    pub const MAX: Self = Self(0x02);
    pub const AVG: Self = Self(0x04);
    pub const STD: Self = Self(0x08);
    pub const COUNT: Self = Self(0x10);
    pub const GROUP_BY: Self = Self(0x20);
    pub const ORDER_ASC: Self = Self(0x40);
    pub const ORDER_DESC: Self = Self(0x80);
    pub const SUM: Self = Self(0x100);

    /// Every aggregate function flag
    pub const AGGREGATES: Self = Self(0x01 | 0x02 | 0x04 | 0x08 | 0x10 | 0x100);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::MIN, "MIN"),
        (Self::MAX, "MAX"),
        (Self::AVG, "AVG"),
        (Self::STD, "STD"),
        (Self::COUNT, "COUNT"),
        (Self::GROUP_BY, "GROUP_BY"),
        (Self::ORDER_ASC, "ORDER_ASC"),
        (Self::ORDER_DESC, "ORDER_DESC"),
        (Self::SUM, "SUM"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// The aggregate function flag, if any
    pub fn aggregate(self) -> Option<Self> {
        let bits = self.0 & Self::AGGREGATES.0;
        (bits != 0).then_some(Self(bits))
    }
}

impl BitOr for SelectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SelectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SelectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "SelectionFlags(empty)")
        } else {
            write!(f, "SelectionFlags({})", names.join(" | "))
        }
    }
}

/// Calendar component extracted from a time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeConstraintType {
    Year,
    Quarter,
    Month,
    /// Day of year, 1-based
    Yday,
    /// Day of month
    Mday,
    /// Day of week
    Wday,
    Hour,
    Min,
    Sec,
    Msec,
    Usec,
}

impl fmt::Display for TimeConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Quarter => "quarter",
            Self::Month => "month",
            Self::Yday => "yday",
            Self::Mday => "mday",
            Self::Wday => "wday",
            Self::Hour => "hour",
            Self::Min => "min",
            Self::Sec => "sec",
            Self::Msec => "msec",
            Self::Usec => "usec",
        };
        write!(f, "{}", name)
    }
}

/// Unit of an interval shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Min,
    Sec,
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Quarter => "quarter",
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Min => "min",
            Self::Sec => "sec",
        };
        write!(f, "{}", name)
    }
}

/// `field + literal * unit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Integer literal or SQL expression
    pub value: String,
    pub unit: IntervalUnit,
}

/// One column of a values query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPath {
    pub path: ObjectPath,
    pub flags: SelectionFlags,
    pub time_constraint: Option<TimeConstraintType>,
    /// Seconds east of UTC applied before extracting
    pub gmt_offset: i32,
    pub interval: Option<TimeInterval>,
    column_index: usize,
}

impl SelectedPath {
    pub fn new(path: ObjectPath, flags: SelectionFlags) -> Self {
        Self {
            path,
            flags,
            time_constraint: None,
            gmt_offset: 0,
            interval: None,
            column_index: 0,
        }
    }

    /// Select a calendar component of the path instead of its value
    pub fn with_time_constraint(mut self, unit: TimeConstraintType, gmt_offset: i32) -> Self {
        self.time_constraint = Some(unit);
        self.gmt_offset = gmt_offset;
        self
    }

    pub fn with_interval(mut self, value: impl Into<String>, unit: IntervalUnit) -> Self {
        self.interval = Some(TimeInterval {
            value: value.into(),
            unit,
        });
        self
    }

    /// Position in the owning selection, assigned on insertion
    pub fn column_index(&self) -> usize {
        self.column_index
    }

    /// Parse a single selected path, e.g. `count(alert.create_time)/order_desc`
    pub fn parse(text: &str) -> Result<Self, crate::error::SyntaxError> {
        super::parser::parse_selected_path(text)
    }
}

/// Ordered projection list.
///
/// Shared behind an `Arc` by the query call and its
/// [`ValuesResult`](crate::ValuesResult), so column indexes stay valid for the
/// lifetime of the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSelection {
    selected: Vec<SelectedPath>,
}

impl PathSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a selection string, e.g. `"min(a), max(b)/order_desc"`
    pub fn compile(text: &str) -> Result<Self, crate::error::SyntaxError> {
        super::parser::parse_selection(text)
    }

    /// Append a selected path, returning its column index
    pub fn add(&mut self, mut selected: SelectedPath) -> usize {
        let index = self.selected.len();
        selected.column_index = index;
        self.selected.push(selected);
        index
    }

    pub fn get(&self, index: usize) -> Option<&SelectedPath> {
        self.selected.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SelectedPath> {
        self.selected.iter()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Whether any column carries an aggregate function
    pub fn has_aggregate(&self) -> bool {
        self.selected.iter().any(|s| s.flags.aggregate().is_some())
    }
}

impl<'a> IntoIterator for &'a PathSelection {
    type Item = &'a SelectedPath;
    type IntoIter = std::slice::Iter<'a, SelectedPath>;

    fn into_iter(self) -> Self::IntoIter {
        self.selected.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ObjectPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_flags_combine() {
        let flags = SelectionFlags::COUNT | SelectionFlags::ORDER_DESC;
        assert!(flags.contains(SelectionFlags::COUNT));
        assert!(flags.contains(SelectionFlags::ORDER_DESC));
        assert!(!flags.contains(SelectionFlags::GROUP_BY));
        assert_eq!(flags.bits(), 0x90);
        assert_eq!(flags.aggregate(), Some(SelectionFlags::COUNT));
        assert_eq!(SelectionFlags::GROUP_BY.aggregate(), None);
    }

    #[test]
    fn test_flags_debug() {
        let flags = SelectionFlags::MIN | SelectionFlags::GROUP_BY;
        assert_eq!(format!("{:?}", flags), "SelectionFlags(MIN | GROUP_BY)");
        assert_eq!(format!("{:?}", SelectionFlags::empty()), "SelectionFlags(empty)");
    }

    #[test]
    fn test_column_index_follows_insertion() {
        let mut selection = PathSelection::new();
        let a = selection.add(SelectedPath::new(path("alert.messageid"), SelectionFlags::empty()));
        let b = selection.add(SelectedPath::new(
            path("alert.create_time"),
            SelectionFlags::MAX,
        ));

        assert_eq!((a, b), (0, 1));
        assert_eq!(selection.get(1).unwrap().column_index(), 1);
        assert_eq!(selection.len(), 2);
        assert!(selection.has_aggregate());
    }

    #[test]
    fn test_builders() {
        let selected = SelectedPath::new(path("alert.create_time"), SelectionFlags::GROUP_BY)
            .with_time_constraint(TimeConstraintType::Hour, 3600)
            .with_interval("2", IntervalUnit::Day);

        assert_eq!(selected.time_constraint, Some(TimeConstraintType::Hour));
        assert_eq!(selected.gmt_offset, 3600);
        assert_eq!(
            selected.interval,
            Some(TimeInterval {
                value: "2".to_string(),
                unit: IntervalUnit::Day
            })
        );
    }
}
