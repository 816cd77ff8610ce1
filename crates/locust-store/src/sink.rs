//! Delimited-text fact writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use locust_core::{FactRow, FactSink};

use crate::error::{Result, StoreError};

pub const FACT_COLUMNS: [&str; 5] = ["factID", "measureID", "dateID", "locationID", "value"];

/// Writes fact rows as delimited text, header first. `|` by default.
pub struct DelimitedFactWriter<W: Write> {
    out: W,
    delimiter: char,
    header_written: bool,
}

impl<W: Write> DelimitedFactWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, delimiter: '|', header_written: false }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self) -> std::io::Result<()> {
        let d = self.delimiter.to_string();
        writeln!(self.out, "{}", FACT_COLUMNS.join(&d))?;
        self.header_written = true;
        Ok(())
    }
}

impl DelimitedFactWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FactSink for DelimitedFactWriter<W> {
    fn write_facts(&mut self, rows: &[FactRow]) -> locust_core::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        let d = self.delimiter;
        for r in rows {
            writeln!(
                self.out,
                "{}{d}{}{d}{}{d}{}{d}{}",
                r.fact_id, r.measure_id, r.date_id, r.location_id, r.value
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}
