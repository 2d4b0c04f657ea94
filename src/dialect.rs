use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use tracing::{info, warn};

use crate::config::{BadRowPolicy, OutputDelimiter};
use crate::error::DwcaError;
use crate::meta::TableMeta;
use crate::pipeline::CancelToken;

/// Ordered, positionally addressed fields of one line.
pub type Row = Vec<String>;

const PROGRESS_EVERY: u64 = 100_000;

/// How a delimited file is laid out and how to treat rows of the wrong width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    /// `None` reads and writes fields verbatim, quotes included.
    pub quote: Option<u8>,
    pub skip_header: bool,
    pub policy: BadRowPolicy,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: Some(b'"'),
            skip_header: false,
            policy: BadRowPolicy::Error,
        }
    }
}

impl Dialect {
    pub fn from_table(table: &TableMeta) -> Self {
        Self {
            delimiter: table.delimiter(),
            quote: table.quote(),
            skip_header: table.skips_header(),
            policy: BadRowPolicy::Error,
        }
    }

    /// Dialect of the files the normalizer writes.
    pub fn output(delimiter: OutputDelimiter) -> Self {
        let quote = match delimiter {
            OutputDelimiter::Csv => Some(b'"'),
            OutputDelimiter::Tsv => None,
        };
        Self {
            delimiter: delimiter.byte(),
            quote,
            skip_header: true,
            policy: BadRowPolicy::Error,
        }
    }

    pub fn with_policy(mut self, policy: BadRowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

pub struct DialectReader {
    path: PathBuf,
    label: String,
    dialect: Dialect,
    reader: csv::Reader<File>,
    record: ByteRecord,
    expected: Option<usize>,
    skipped: u64,
}

impl DialectReader {
    pub fn open(path: &Path, dialect: Dialect) -> Result<Self, DwcaError> {
        let file = File::open(path).map_err(|err| DwcaError::FileRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(dialect.delimiter)
            .terminator(Terminator::CRLF);
        match dialect.quote {
            Some(quote) => {
                builder.quote(quote);
            }
            None => {
                builder.quoting(false);
            }
        }

        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let mut reader = Self {
            path: path.to_path_buf(),
            label,
            dialect,
            reader: builder.from_reader(file),
            record: ByteRecord::new(),
            expected: None,
            skipped: 0,
        };

        if dialect.skip_header && reader.read_record()? {
            reader.expected = Some(reader.record.len());
        }
        Ok(reader)
    }

    /// Rows dropped so far under [`BadRowPolicy::Skip`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn expected_fields(&self) -> Option<usize> {
        self.expected
    }

    fn read_record(&mut self) -> Result<bool, DwcaError> {
        self.reader
            .read_byte_record(&mut self.record)
            .map_err(|err| DwcaError::FileRead {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }

    fn line(&self) -> u64 {
        self.record
            .position()
            .map(|position| position.line())
            .unwrap_or_default()
    }

    pub fn next_row(&mut self) -> Result<Option<Row>, DwcaError> {
        loop {
            if !self.read_record()? {
                return Ok(None);
            }
            let found = self.record.len();
            let expected = *self.expected.get_or_insert(found);
            let mut row: Row = self
                .record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect();

            if found == expected {
                return Ok(Some(row));
            }

            let line = self.line();
            match self.dialect.policy {
                BadRowPolicy::Error => {
                    return Err(DwcaError::BadRow {
                        file: self.label.clone(),
                        line,
                        expected,
                        found,
                    });
                }
                BadRowPolicy::Skip => {
                    warn!(
                        file = %self.label,
                        line,
                        expected,
                        found,
                        "wrong number of fields, skipping row"
                    );
                    self.skipped += 1;
                }
                BadRowPolicy::Process => {
                    warn!(
                        file = %self.label,
                        line,
                        expected,
                        found,
                        "wrong number of fields, processing the row anyway"
                    );
                    row.resize(expected, String::new());
                    return Ok(Some(row));
                }
            }
        }
    }

    pub fn read_slice(&mut self, offset: usize, limit: usize) -> Result<Vec<Row>, DwcaError> {
        let mut rows = Vec::new();
        let mut seen = 0usize;
        while limit == 0 || rows.len() < limit {
            let Some(row) = self.next_row()? else {
                break;
            };
            seen += 1;
            if seen <= offset {
                continue;
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Pushes every remaining row into `tx`, blocking while the queue is full.
    pub fn stream(&mut self, tx: &Sender<Row>, cancel: &CancelToken) -> Result<u64, DwcaError> {
        let mut count = 0u64;
        while let Some(row) = self.next_row()? {
            if cancel.is_cancelled() {
                return Err(DwcaError::Cancelled);
            }
            tx.send(row).map_err(|_| DwcaError::Cancelled)?;
            count += 1;
            if count % PROGRESS_EVERY == 0 {
                info!(file = %self.label, lines = count, "streaming rows");
            }
        }
        info!(file = %self.label, lines = count, skipped = self.skipped, "finished reading");
        Ok(count)
    }
}

impl Iterator for DialectReader {
    type Item = Result<Row, DwcaError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

pub struct DialectWriter {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    rows: u64,
}

impl DialectWriter {
    /// Creates the file and writes the header line.
    pub fn create(path: &Path, dialect: &Dialect, headers: &[String]) -> Result<Self, DwcaError> {
        let file = File::create(path).map_err(|err| DwcaError::FileWrite {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let mut builder = WriterBuilder::new();
        builder
            .delimiter(dialect.delimiter)
            .flexible(true)
            .terminator(Terminator::Any(b'\n'));
        match dialect.quote {
            Some(quote) => {
                builder.quote(quote).quote_style(QuoteStyle::Necessary);
            }
            None => {
                builder.quote_style(QuoteStyle::Never);
            }
        }

        let mut writer = Self {
            path: path.to_path_buf(),
            writer: builder.from_writer(BufWriter::new(file)),
            rows: 0,
        };
        writer.write_fields(headers)?;
        Ok(writer)
    }

    fn write_fields(&mut self, fields: &[String]) -> Result<(), DwcaError> {
        self.writer
            .write_record(fields)
            .map_err(|err| DwcaError::FileWrite {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }

    pub fn write_row(&mut self, row: &[String]) -> Result<(), DwcaError> {
        self.write_fields(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered output and returns the number of data rows written.
    pub fn finish(mut self) -> Result<u64, DwcaError> {
        self.writer.flush().map_err(|err| DwcaError::FileWrite {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_seeds_expected_width() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("taxa.tsv");
        std::fs::write(&path, "id\tname\trank\n1\tAves\tclass\n").unwrap();
        let dialect = Dialect {
            delimiter: b'\t',
            quote: None,
            skip_header: true,
            policy: BadRowPolicy::Error,
        };
        let mut reader = DialectReader::open(&path, dialect).unwrap();
        assert_eq!(reader.expected_fields(), Some(3));
        let rows = reader.read_slice(0, 0).unwrap();
        assert_eq!(rows, vec![vec!["1", "Aves", "class"]]);
    }

    #[test]
    fn unquoted_dialect_keeps_quote_characters() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("taxa.tsv");
        std::fs::write(&path, "1\t\"Aves\" Linnaeus\n").unwrap();
        let dialect = Dialect {
            delimiter: b'\t',
            quote: None,
            ..Dialect::default()
        };
        let mut reader = DialectReader::open(&path, dialect).unwrap();
        let row = reader.next_row().unwrap().unwrap();
        assert_eq!(row[1], "\"Aves\" Linnaeus");
    }

    #[test]
    fn writer_emits_header_then_rows() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.csv");
        let dialect = Dialect::output(OutputDelimiter::Csv);
        let mut writer =
            DialectWriter::create(&path, &dialect, &["id".to_string(), "name".to_string()])
                .unwrap();
        writer
            .write_row(&["1".to_string(), "Homo sapiens Linnaeus, 1758".to_string()])
            .unwrap();
        assert_eq!(writer.finish().unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,name\n1,\"Homo sapiens Linnaeus, 1758\"\n");
    }
}
