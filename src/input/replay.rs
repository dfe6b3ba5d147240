use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::DeserializeRecordsIntoIter;

use super::{Tick, TickFeed};
use crate::error::{Result, SimError};

/// Replays ticks recorded in a CSV file.
///
/// The file has a header row naming the [Tick] fields, only `time` is required:
///
/// ```text
/// time,bid,ask,bid_size,ask_size,last,last_size,volume
/// 1704724200,189.10,189.12,300,200,189.11,100,100
/// ```
///
/// Rows must already be in time order, a row that goes backwards is reported by the cursor
/// reading this feed.
pub struct CsvReplay<R: Read> {
    rows: DeserializeRecordsIntoIter<R, Tick>,
    line: usize,
}

impl CsvReplay<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path).map_err(|e| {
            SimError::data_unavailable(format!("could not open {}: {}", path.display(), e))
        })?;
        Ok(Self::from_csv(reader))
    }
}

impl<R: Read> CsvReplay<R> {
    pub fn from_reader(reader: R) -> Self {
        Self::from_csv(
            csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(reader),
        )
    }

    fn from_csv(reader: csv::Reader<R>) -> Self {
        Self {
            rows: reader.into_deserialize(),
            line: 1,
        }
    }
}

impl<R: Read + Send> TickFeed for CsvReplay<R> {
    fn next(&mut self) -> Result<Option<Tick>> {
        self.line += 1;
        match self.rows.next() {
            None => Ok(None),
            Some(Ok(mut tick)) => {
                if *tick.last_trade_time == 0 {
                    tick.last_trade_time = tick.time;
                }
                Ok(Some(tick))
            }
            Some(Err(e)) => Err(SimError::data_unavailable(format!(
                "bad tick row at line {}: {}",
                self.line, e
            ))),
        }
    }
}
