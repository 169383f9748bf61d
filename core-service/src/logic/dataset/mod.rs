//! Dataset Module - historical air-quality records for training
//!
//! Loads a CSV file into a numeric table with cleaned column names.
//! Non-numeric and missing cells are kept as `None`; the training pipeline
//! decides which rows it can use.

pub mod record;
pub mod reader;


use std::collections::HashMap;

use thiserror::Error;

pub use reader::DatasetReader;
pub use record::{clean_header, parse_cell, parse_timestamp, parse_timestamp_with, Record};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("columns {} collide after header cleaning", .0.join(", "))]
    DuplicateColumn(Vec<String>),

    #[error("dataset has no header row")]
    NoHeader,
}

/// A loaded dataset: cleaned column names plus one `Record` per row
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    timestamp_column: Option<String>,
    records: Vec<Record>,
}

impl Dataset {
    pub(crate) fn new(
        columns: Vec<String>,
        timestamp_column: Option<String>,
        records: Vec<Record>,
    ) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { columns, index, timestamp_column, records }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Cleaned name of the timestamp column, when the dataset has one
    pub fn timestamp_column(&self) -> Option<&str> {
        self.timestamp_column.as_deref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.records.iter().map(|r| r.get(idx)).collect())
    }
}
