//! Row sources
//!
//! The engine reads rows through [`RowSource`]; where the rows come from is
//! up to the implementation. Two are provided: [`InMemoryRowSource`] and
//! [`CsvRowSource`] (first record is the header, cells parsed with
//! [`Value::parse_cell`]). Row ids are 1-based record numbers, which is what
//! [`RowRange`] addresses.

use crate::error::{EngineError, Result};
use crate::job::RowRange;
use crate::value::{InputRow, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_common::TallyError;
use tracing::debug;

pub type RowIter = Box<dyn Iterator<Item = Result<InputRow>> + Send>;

pub trait RowSource: Send + Sync {
    fn columns(&self) -> Result<Vec<String>>;

    /// Number of rows, when cheaply known
    fn expected_rows(&self) -> Result<Option<u64>>;

    /// Rows within `range`, or all rows
    fn open(&self, range: Option<RowRange>) -> Result<RowIter>;
}

fn restrict<I>(rows: I, range: Option<RowRange>) -> RowIter
where
    I: Iterator<Item = Result<InputRow>> + Send + 'static,
{
    match range {
        None => Box::new(rows),
        Some(range) => {
            let skipped = rows.skip(range.first_row.saturating_sub(1) as usize);
            match range.max_rows {
                Some(max) => Box::new(skipped.take(max as usize)),
                None => Box::new(skipped),
            }
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRowSource {
    columns: Vec<String>,
    rows: Arc<Vec<InputRow>>,
}

impl InMemoryRowSource {
    pub fn new<I, S>(columns: I, rows: Vec<InputRow>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Arc::new(rows),
        }
    }

    /// Build rows from value tuples, numbering them from 1
    pub fn from_values<I, S>(columns: I, records: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(i, values)| InputRow::from_pairs(i as u64 + 1, columns.iter().cloned().zip(values)))
            .collect();
        Self {
            columns,
            rows: Arc::new(rows),
        }
    }
}

impl RowSource for InMemoryRowSource {
    fn columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    fn expected_rows(&self) -> Result<Option<u64>> {
        Ok(Some(self.rows.len() as u64))
    }

    fn open(&self, range: Option<RowRange>) -> Result<RowIter> {
        let rows = Arc::clone(&self.rows);
        let iter = (0..rows.len()).filter_map(move |i| rows.get(i).cloned().map(Ok));
        Ok(restrict(iter, range))
    }
}

/// Rows of a headed CSV file
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    path: PathBuf,
}

impl CsvRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<csv::Reader<std::fs::File>> {
        csv::Reader::from_path(&self.path).map_err(|e| {
            EngineError::Datastore(format!("cannot open {}: {}", self.path.display(), e))
        })
    }
}

impl RowSource for CsvRowSource {
    fn columns(&self) -> Result<Vec<String>> {
        let mut reader = self.reader()?;
        let headers = reader.headers().map_err(TallyError::from)?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    fn expected_rows(&self) -> Result<Option<u64>> {
        let mut reader = self.reader()?;
        let mut count = 0_u64;
        for record in reader.records() {
            record.map_err(TallyError::from)?;
            count += 1;
        }
        debug!(path = %self.path.display(), rows = count, "Counted CSV rows");
        Ok(Some(count))
    }

    fn open(&self, range: Option<RowRange>) -> Result<RowIter> {
        let mut reader = self.reader()?;
        let columns: Vec<String> = reader
            .headers()
            .map_err(TallyError::from)?
            .iter()
            .map(str::to_string)
            .collect();

        let rows = reader.into_records().enumerate().map(move |(i, record)| -> Result<InputRow> {
            let record = record.map_err(TallyError::from)?;
            Ok(InputRow::from_pairs(
                i as u64 + 1,
                columns.iter().cloned().zip(record.iter().map(Value::parse_cell)),
            ))
        });
        Ok(restrict(rows, range))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ids(iter: RowIter) -> Vec<u64> {
        iter.map(|r| r.unwrap().id()).collect()
    }

    #[test]
    fn test_in_memory_range() {
        let source = InMemoryRowSource::from_values(
            ["n"],
            (1..=5).map(|n| vec![Value::Integer(n)]).collect(),
        );
        assert_eq!(source.expected_rows().unwrap(), Some(5));
        assert_eq!(ids(source.open(None).unwrap()), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(source.open(Some(RowRange::new(2, Some(2)))).unwrap()), vec![2, 3]);
        assert_eq!(ids(source.open(Some(RowRange::new(4, None))).unwrap()), vec![4, 5]);
    }

    #[test]
    fn test_csv_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,age").unwrap();
        writeln!(file, "Ada,36").unwrap();
        writeln!(file, "Linus,").unwrap();
        writeln!(file, "Grace,85").unwrap();

        let source = CsvRowSource::new(file.path());
        assert_eq!(source.columns().unwrap(), vec!["name", "age"]);
        assert_eq!(source.expected_rows().unwrap(), Some(3));

        let rows: Vec<InputRow> = source
            .open(Some(RowRange::new(2, None)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id(), 2);
        assert_eq!(rows[0].get("age"), Some(&Value::Null));
        assert_eq!(rows[1].get("age"), Some(&Value::Integer(85)));
    }

    #[test]
    fn test_missing_csv_is_datastore_error() {
        let source = CsvRowSource::new("/nonexistent/rows.csv");
        assert!(matches!(source.expected_rows(), Err(EngineError::Datastore(_))));
    }
}
