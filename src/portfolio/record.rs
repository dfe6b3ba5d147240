use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::position::ClosedPosition;
use crate::error::{Result, SimError};

//Appends closed round trips to csv for reporting. The log is write-only, nothing reads it
//back into a simulation.
pub struct TransactionLog<W: Write> {
    writer: csv::Writer<W>,
    written: usize,
}

impl TransactionLog<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let writer = csv::Writer::from_path(path).map_err(|e| {
            SimError::data_unavailable(format!("cannot write {}: {}", path.display(), e))
        })?;
        Ok(Self { writer, written: 0 })
    }
}

impl<W: Write> TransactionLog<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            written: 0,
        }
    }

    pub fn append(&mut self, closed: &ClosedPosition) -> Result<()> {
        self.writer
            .serialize(closed)
            .map_err(|e| SimError::data_unavailable(format!("cannot record {}: {}", closed.symbol, e)))?;
        self.written += 1;
        Ok(())
    }

    pub fn append_all<'a>(&mut self, closed: impl IntoIterator<Item = &'a ClosedPosition>) -> Result<()> {
        for record in closed {
            self.append(record)?;
        }
        self.flush()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| SimError::data_unavailable(format!("cannot flush transaction log: {}", e)))
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| SimError::data_unavailable(format!("cannot close transaction log: {}", e)))
    }
}
