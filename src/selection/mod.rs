//! Path Selection
//!
//! Compiles the selection language of values queries into a
//! [`PathSelection`].

pub mod ast;
pub mod parser;

pub use ast::{
    IntervalUnit, PathSelection, SelectedPath, SelectionFlags, TimeConstraintType, TimeInterval,
};
pub use parser::{parse_selected_path, parse_selection};

impl std::str::FromStr for PathSelection {
    type Err = crate::error::SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_selection(s)
    }
}

impl std::str::FromStr for SelectedPath {
    type Err = crate::error::SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_selected_path(s)
    }
}
