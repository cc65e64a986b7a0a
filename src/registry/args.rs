//! Captured step arguments and their typed accessors.

use super::RegistryError;
use indexmap::IndexMap;
use std::any::type_name;
use std::fmt::Display;
use std::str::FromStr;

/// A Gherkin data table attached to a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    rows: Vec<Vec<String>>,
}

impl DataTable {
    /// Wrap raw table rows; the first row is treated as the header.
    #[must_use]
    pub const fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// All rows, header included.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// The header row, if the table has any rows.
    #[must_use]
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// Body rows keyed by header cell.
    ///
    /// Cells beyond the header width are dropped; missing cells read as empty.
    #[must_use]
    pub fn records(&self) -> Vec<IndexMap<String, String>> {
        let Some((header, body)) = self.rows.split_first() else {
            return Vec::new();
        };
        body.iter()
            .map(|row| {
                header
                    .iter()
                    .enumerate()
                    .map(|(i, key)| (key.clone(), row.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }
}

/// Arguments captured from a step line.
///
/// Index `0` is the first capture group; the whole-match group is not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepArgs {
    captures: Vec<Option<String>>,
    table: Option<DataTable>,
    doc_string: Option<String>,
}

impl StepArgs {
    /// Build arguments from raw captures.
    #[must_use]
    pub const fn new(captures: Vec<Option<String>>) -> Self {
        Self {
            captures,
            table: None,
            doc_string: None,
        }
    }

    /// Attach a data table.
    #[must_use]
    pub fn with_table(mut self, table: Option<DataTable>) -> Self {
        self.table = table;
        self
    }

    /// Attach a doc string.
    #[must_use]
    pub fn with_doc_string(mut self, doc_string: Option<String>) -> Self {
        self.doc_string = doc_string;
        self
    }

    /// Number of capture groups.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.captures.len()
    }

    /// Return `true` when the pattern has no capture groups.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Borrow capture `index` if the group participated in the match.
    #[must_use]
    pub fn optional(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(Option::as_deref)
    }

    /// Read capture `index` as an owned string.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Capture`] when the group is absent.
    pub fn string(&self, index: usize) -> Result<String, RegistryError> {
        self.optional(index)
            .map(str::to_owned)
            .ok_or_else(|| RegistryError::Capture {
                index,
                value: None,
                target: type_name::<String>(),
                message: String::from("the group did not participate in the match"),
            })
    }

    /// Parse capture `index` into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Capture`] when the group is absent or the text
    /// does not parse as `T`.
    pub fn parse<T>(&self, index: usize) -> Result<T, RegistryError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.optional(index).ok_or_else(|| RegistryError::Capture {
            index,
            value: None,
            target: type_name::<T>(),
            message: String::from("the group did not participate in the match"),
        })?;
        raw.trim().parse::<T>().map_err(|err| RegistryError::Capture {
            index,
            value: Some(raw.to_owned()),
            target: type_name::<T>(),
            message: err.to_string(),
        })
    }

    /// The step's data table, if any.
    #[must_use]
    pub const fn table(&self) -> Option<&DataTable> {
        self.table.as_ref()
    }

    /// The step's doc string, if any.
    #[must_use]
    pub fn doc_string(&self) -> Option<&str> {
        self.doc_string.as_deref()
    }
}
