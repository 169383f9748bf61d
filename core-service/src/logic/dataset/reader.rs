use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::record::{clean_header, parse_cell, parse_timestamp_with, Record};
use super::{Dataset, DatasetError};
use crate::constants::DEFAULT_TIMESTAMP_COLUMN;

/// CSV loader for historical datasets
#[derive(Debug, Clone)]
pub struct DatasetReader {
    timestamp_column: String,
    delimiter: u8,
    day_first: bool,
}

impl Default for DatasetReader {
    fn default() -> Self {
        Self {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            delimiter: b',',
            day_first: false,
        }
    }
}

impl DatasetReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the timestamp column (compared after header cleaning)
    pub fn timestamp_column(mut self, name: &str) -> Self {
        self.timestamp_column = clean_header(name);
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Read ambiguous numeric dates day first (`31/01/2024`)
    pub fn day_first(mut self, day_first: bool) -> Self {
        self.day_first = day_first;
        self
    }

    pub fn read_path(&self, path: &Path) -> Result<Dataset, DatasetError> {
        log::info!("Reading dataset {}", path.display());
        let file = File::open(path)?;
        self.read(file)
    }

    pub fn read<R: Read>(&self, input: R) -> Result<Dataset, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(DatasetError::NoHeader);
        }

        let columns: Vec<String> = headers.iter().map(clean_header).collect();
        check_unique(&headers, &columns)?;

        let ts_idx = columns.iter().position(|c| *c == self.timestamp_column);
        let timestamp_column = ts_idx.map(|i| columns[i].clone());

        let mut records = Vec::new();
        let mut short_rows = 0usize;
        for row in reader.records() {
            let row = row?;
            if row.len() < columns.len() {
                short_rows += 1;
            }
            let values = (0..columns.len())
                .map(|i| match ts_idx {
                    Some(t) if t == i => None,
                    _ => row.get(i).and_then(parse_cell),
                })
                .collect();
            let timestamp = ts_idx
                .and_then(|i| row.get(i))
                .and_then(|cell| parse_timestamp_with(cell, self.day_first));
            records.push(Record { timestamp, values });
        }

        if short_rows > 0 {
            log::warn!("{} rows have fewer cells than the header; missing cells read as empty", short_rows);
        }
        log::info!(
            "Loaded {} rows x {} columns (timestamp column: {})",
            records.len(),
            columns.len(),
            timestamp_column.as_deref().unwrap_or("none")
        );

        Ok(Dataset::new(columns, timestamp_column, records))
    }
}

fn check_unique(raw: &csv::StringRecord, cleaned: &[String]) -> Result<(), DatasetError> {
    let mut seen: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (raw, clean) in raw.iter().zip(cleaned) {
        seen.entry(clean.as_str()).or_default().push(raw);
    }
    let collisions: Vec<String> = seen
        .into_values()
        .filter(|raws| raws.len() > 1)
        .flatten()
        .map(|r| format!("'{}'", r))
        .collect();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(DatasetError::DuplicateColumn(collisions))
    }
}
