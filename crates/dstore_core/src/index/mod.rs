//! Index definitions and the in-memory projections that serve queries.
//!
//! Builtin indexes always exist: one per kind (keys in key order) and one
//! per `(kind, property)` that can be walked in either direction. Composite
//! definitions must be registered before a query may use them.

mod projection;

pub use projection::{Cell, CompositeIndex, KindIndex, PropertyIndex};

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Sort direction of one index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One column of an index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexColumn {
    /// Property name.
    pub property: String,
    /// Sort direction.
    pub direction: Direction,
}

impl IndexColumn {
    /// Ascending column.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    /// Descending column.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexDefinition {
    /// Kind the index covers.
    pub kind: String,
    /// Whether rows are keyed by every ancestor of the entity.
    pub ancestor: bool,
    /// Columns, most significant first.
    pub sort_by: Vec<IndexColumn>,
}

impl IndexDefinition {
    /// A definition with no columns.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: false,
            sort_by: Vec::new(),
        }
    }

    /// Makes this an ancestor index.
    #[must_use]
    pub fn with_ancestor(mut self) -> Self {
        self.ancestor = true;
        self
    }

    /// Appends an ascending column.
    #[must_use]
    pub fn asc(mut self, property: impl Into<String>) -> Self {
        self.sort_by.push(IndexColumn::asc(property));
        self
    }

    /// Appends a descending column.
    #[must_use]
    pub fn desc(mut self, property: impl Into<String>) -> Self {
        self.sort_by.push(IndexColumn::desc(property));
        self
    }

    /// True for definitions the store maintains without registration.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        !self.ancestor && self.sort_by.len() <= 1
    }

    /// Checks that the definition can be registered.
    ///
    /// # Errors
    ///
    /// Rejects empty kinds, empty or meta property names and repeated
    /// columns.
    pub fn validate(&self) -> CoreResult<()> {
        if self.kind.is_empty() {
            return Err(CoreError::invalid_operation("index definition has no kind"));
        }
        for (i, column) in self.sort_by.iter().enumerate() {
            if column.property.is_empty() || crate::property::is_meta(&column.property) {
                return Err(CoreError::invalid_operation(format!(
                    "index on {} has an invalid column {:?}",
                    self.kind, column.property
                )));
            }
            if self.sort_by[..i].iter().any(|c| c.property == column.property) {
                return Err(CoreError::invalid_operation(format!(
                    "index on {} repeats column {:?}",
                    self.kind, column.property
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        let mut sep = "";
        if self.ancestor {
            write!(f, "ancestor")?;
            sep = ", ";
        }
        for column in &self.sort_by {
            let sign = match column.direction {
                Direction::Ascending => "",
                Direction::Descending => "-",
            };
            write!(f, "{sep}{sign}{}", column.property)?;
            sep = ", ";
        }
        write!(f, ")")
    }
}
