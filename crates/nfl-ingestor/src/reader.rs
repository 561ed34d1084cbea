//! CSV row source
//!
//! Reads the game file lazily, one header-keyed [`RawRow`] at a time. The
//! file is never loaded into memory as a whole. Malformed rows are skipped;
//! an I/O failure is yielded once as [`ReaderError::Read`] and ends the rows.

use csv::{ReaderBuilder, StringRecord};
use nfl_common::RawRow;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("NFL data file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to open {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to read CSV header: {0}")]
    Header(#[from] csv::Error),

    #[error("Failed to read CSV file after {rows} rows: {source}")]
    Read {
        rows: u64,
        #[source]
        source: csv::Error,
    },
}

/// Iterator over the data rows of a CSV source
pub struct CsvRows<R> {
    reader: csv::Reader<R>,
    headers: StringRecord,
    record: StringRecord,
    rows_seen: u64,
    failed: bool,
}

/// Open the game file at `path`
pub fn open_rows(path: &Path) -> Result<CsvRows<File>, ReaderError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ReaderError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ReaderError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    info!(path = %path.display(), "Reading NFL data");
    CsvRows::from_reader(file)
}

impl<R: Read> CsvRows<R> {
    /// Wrap any reader whose first line is the header row
    pub fn from_reader(source: R) -> Result<Self, ReaderError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let headers = reader.headers()?.clone();

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
            rows_seen: 0,
            failed: false,
        })
    }

    /// Number of data rows consumed so far, including skipped ones
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    fn to_row(&self) -> RawRow {
        self.headers
            .iter()
            .zip(self.record.iter())
            .map(|(column, value)| (column.trim(), value))
            .collect()
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<RawRow, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    self.rows_seen += 1;
                    return Some(Ok(self.to_row()));
                },
                Ok(false) => {
                    info!(rows = self.rows_seen, "Finished reading CSV file");
                    return None;
                },
                Err(e) if e.is_io_error() => {
                    self.failed = true;
                    return Some(Err(ReaderError::Read {
                        rows: self.rows_seen,
                        source: e,
                    }));
                },
                Err(e) => {
                    self.rows_seen += 1;
                    let line = e.position().map(|p| p.line());
                    warn!(error = %e, line, "Skipping malformed CSV row");
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use nfl_common::record::columns;
    use std::io::Write;

    /// Serves `data`, then fails every later read
    struct FailingAfter {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for FailingAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("disk went away")),
                n => Ok(n),
            }
        }
    }

    fn collect_ok<R: Read>(rows: CsvRows<R>) -> Vec<RawRow> {
        rows.collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_rows_are_keyed_by_header() {
        let data = "Game ID,Date,Away Team,Home Team\n5001,20230910,Bills,Jets\n";
        let rows = collect_ok(CsvRows::from_reader(data.as_bytes()).unwrap());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(columns::GAME_ID), Some("5001"));
        assert_eq!(rows[0].get(columns::HOME_TEAM), Some("Jets"));
    }

    #[test]
    fn test_short_row_leaves_columns_absent() {
        let data = "Game ID,Date,Away Team,Home Team,Over Open\n5002,20230910,Bills\n";
        let rows = collect_ok(CsvRows::from_reader(data.as_bytes()).unwrap());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(columns::AWAY_TEAM), Some("Bills"));
        assert_eq!(rows[0].get(columns::HOME_TEAM), None);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let mut data = b"Game ID,Date,Away Team,Home Team\n".to_vec();
        data.extend_from_slice(b"5003,20230910,\xff\xfe,Jets\n");
        data.extend_from_slice(b"5004,20230917,Bills,Raiders\n");

        let mut rows = CsvRows::from_reader(data.as_slice()).unwrap();
        let collected: Vec<RawRow> = rows.by_ref().collect::<Result<_, _>>().unwrap();

        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].get(columns::GAME_ID), Some("5004"));
        assert_eq!(rows.rows_seen(), 2);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_rows(&dir.path().join("nope.csv")).err().unwrap();
        assert!(matches!(err, ReaderError::NotFound { .. }));
    }

    #[test]
    fn test_open_rows_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Game ID,Date,Away Team,Home Team").unwrap();
        writeln!(file, "5001,20230910,Bills,Jets").unwrap();
        writeln!(file, "5002,20230910,Eagles,Patriots").unwrap();

        let rows = collect_ok(open_rows(file.path()).unwrap());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_io_error_is_yielded_then_rows_end() {
        let source = FailingAfter {
            data: io::Cursor::new(b"Game ID,Date,Away Team,Home Team\n5001,20230910,Bills,Jets\n".to_vec()),
        };
        let mut rows = CsvRows::from_reader(source).unwrap();

        assert_eq!(rows.next().unwrap().unwrap().get(columns::GAME_ID), Some("5001"));
        let err = rows.next().unwrap().unwrap_err();
        assert!(matches!(err, ReaderError::Read { rows: 1, .. }));
        assert!(rows.next().is_none());
    }
}
