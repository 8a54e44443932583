//! Output sinks for projected rows.

use std::io::Write;

use serde::ser::{SerializeMap, Serializer};
use thiserror::Error;

/// Errors raised while writing rows.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Row width does not match the header.
    #[error("row has {actual} columns, header has {expected}")]
    RowWidth { expected: usize, actual: usize },
}

/// Receives a header followed by rows.
pub trait RowSink {
    fn write_header(&mut self, header: &[&str]) -> Result<(), SinkError>;
    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError>;
    /// Flush buffered output.
    fn finish(&mut self) -> Result<(), SinkError>;
    /// Rows written so far, header excluded.
    fn rows_written(&self) -> usize;
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn write_header(&mut self, header: &[&str]) -> Result<(), SinkError> {
        (**self).write_header(header)
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        (**self).write_row(row)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }

    fn rows_written(&self) -> usize {
        (**self).rows_written()
    }
}

/// Comma-separated output with a header line.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
            rows: 0,
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_header(&mut self, header: &[&str]) -> Result<(), SinkError> {
        self.writer.write_record(header)?;
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.writer.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows
    }
}

/// One JSON object per line, keyed by the header in column order.
pub struct JsonLinesSink<W: Write> {
    out: W,
    header: Vec<String>,
    rows: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header: Vec::new(),
            rows: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for JsonLinesSink<W> {
    fn write_header(&mut self, header: &[&str]) -> Result<(), SinkError> {
        self.header = header.iter().map(|h| h.to_string()).collect();
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        if row.len() != self.header.len() {
            return Err(SinkError::RowWidth {
                expected: self.header.len(),
                actual: row.len(),
            });
        }
        let mut ser = serde_json::Serializer::new(&mut self.out);
        let mut map = ser.serialize_map(Some(row.len()))?;
        for (column, value) in self.header.iter().zip(row) {
            map.serialize_entry(column, value)?;
        }
        map.end()?;
        self.out.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows
    }
}

/// Collects rows in memory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VecSink {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowSink for VecSink {
    fn write_header(&mut self, header: &[&str]) -> Result<(), SinkError> {
        self.header = header.iter().map(|h| h.to_string()).collect();
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), SinkError> {
        self.rows.push(row.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows.len()
    }
}
