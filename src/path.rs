//! IDMEF object paths
//!
//! An [`ObjectPath`] names one field of the abstract event schema, e.g.
//! `alert.create_time` or `alert.source(0).node.address(*).address`.
//! Paths are totally ordered so they can key the mapping index.

use crate::error::DbError;
use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit1, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// List index attached to a path element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathIndex {
    /// Explicit position; negative values count from the end
    Position(i32),
    /// `*`, any element of the list
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub name: String,
    pub index: Option<PathIndex>,
}

/// A dotted path into the event schema.
///
/// Ordering compares elements pairwise (name, then index); a strict prefix
/// sorts before any of its extensions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath {
    elements: Vec<PathElement>,
}

impl ObjectPath {
    /// Parse a path string
    pub fn new(path: &str) -> Result<Self, DbError> {
        path.parse()
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// First element name (`alert`, `heartbeat`)
    pub fn root(&self) -> &str {
        &self.elements[0].name
    }

    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    /// Same path with every list index removed.
    ///
    /// Mapping entries are declared on index-free paths, so lookups go
    /// through this form.
    pub fn normalized(&self) -> ObjectPath {
        ObjectPath {
            elements: self
                .elements
                .iter()
                .map(|e| PathElement {
                    name: e.name.clone(),
                    index: None,
                })
                .collect(),
        }
    }

    pub fn has_indexes(&self) -> bool {
        self.elements.iter().any(|e| e.index.is_some())
    }

    /// Append a child element
    pub fn child(&self, name: &str) -> Result<ObjectPath, DbError> {
        format!("{}.{}", self, name).parse()
    }
}

impl FromStr for ObjectPath {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(object_path)(s) {
            Ok((_, path)) => Ok(path),
            Err(_) => Err(DbError::InvalidValue(format!("invalid object path '{}'", s))),
        }
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = DbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", element.name)?;
            match element.index {
                Some(PathIndex::Position(n)) => write!(f, "({})", n)?,
                Some(PathIndex::Any) => write!(f, "(*)")?,
                None => {}
            }
        }
        Ok(())
    }
}

/// Parse an object path at the start of `input`.
///
/// Shared with the selection-language parser.
pub(crate) fn object_path(input: &str) -> IResult<&str, ObjectPath> {
    map(separated_list1(char('.'), path_element), |elements| ObjectPath {
        elements,
    })(input)
}

fn path_element(input: &str) -> IResult<&str, PathElement> {
    let (input, name) = element_name(input)?;
    let (input, index) = opt(delimited(char('('), path_index, char(')')))(input)?;

    Ok((
        input,
        PathElement {
            name: name.to_string(),
            index,
        },
    ))
}

fn element_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn path_index(input: &str) -> IResult<&str, PathIndex> {
    alt((
        value(PathIndex::Any, char('*')),
        map_res(recognize(preceded(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i32>().map(PathIndex::Position)
        }),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let path: ObjectPath = "alert.create_time".parse().unwrap();
        assert_eq!(path.depth(), 2);
        assert_eq!(path.root(), "alert");
        assert_eq!(path.to_string(), "alert.create_time");
    }

    #[test]
    fn test_parse_indexed_path() {
        let path: ObjectPath = "alert.source(0).node.address(*).address".parse().unwrap();
        assert_eq!(path.elements()[1].index, Some(PathIndex::Position(0)));
        assert_eq!(path.elements()[3].index, Some(PathIndex::Any));
        assert_eq!(path.to_string(), "alert.source(0).node.address(*).address");

        let last: ObjectPath = "alert.target(-1).node.name".parse().unwrap();
        assert_eq!(last.elements()[1].index, Some(PathIndex::Position(-1)));
    }

    #[test]
    fn test_normalized_drops_indexes() {
        let path: ObjectPath = "alert.source(0).node.address(*).address".parse().unwrap();
        assert!(path.has_indexes());
        assert_eq!(
            path.normalized().to_string(),
            "alert.source.node.address.address"
        );
        assert!(!path.normalized().has_indexes());
    }

    #[test]
    fn test_invalid_paths() {
        assert!("".parse::<ObjectPath>().is_err());
        assert!("alert.".parse::<ObjectPath>().is_err());
        assert!(".alert".parse::<ObjectPath>().is_err());
        assert!("alert.source(x)".parse::<ObjectPath>().is_err());
        assert!("alert create_time".parse::<ObjectPath>().is_err());
        assert!("9alert".parse::<ObjectPath>().is_err());
    }

    #[test]
    fn test_ordering() {
        let a: ObjectPath = "alert".parse().unwrap();
        let b: ObjectPath = "alert.analyzer".parse().unwrap();
        let c: ObjectPath = "alert.create_time".parse().unwrap();
        let d: ObjectPath = "heartbeat".parse().unwrap();

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(c.cmp(&"alert.create_time".parse().unwrap()), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_serializes_as_string() {
        let path: ObjectPath = "alert.source(0).node.name".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"alert.source(0).node.name\"");

        let back: ObjectPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<ObjectPath>("\"alert.\"").is_err());
    }

    #[test]
    fn test_child() {
        let root: ObjectPath = "alert".parse().unwrap();
        assert_eq!(root.child("messageid").unwrap().to_string(), "alert.messageid");
    }
}
