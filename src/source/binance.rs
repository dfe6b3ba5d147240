use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;

use log::{debug, info};

use super::{Bar, HistoricalDataSource, PeriodUnit};
use crate::clock::DateTime;
use crate::error::{Result, SimError};
use crate::instrument::Instrument;

const DAY: i64 = 86_400;

/// Historical klines from the public Binance spot archive.
///
/// The archive publishes one zipped csv per symbol, interval and day. Requests are served by
/// downloading every day the window touches, days are cached for the lifetime of the source.
/// Days that the archive has no file for are treated as empty.
pub struct BinanceHistory {
    base_url: String,
    cache: Mutex<HashMap<String, Vec<Bar>>>,
}

impl Default for BinanceHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceHistory {
    pub fn new() -> Self {
        Self::with_base_url("https://data.binance.vision/data/spot/daily/klines")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(unit: PeriodUnit) -> Result<&'static str> {
        match unit {
            PeriodUnit::Second => Ok("1s"),
            PeriodUnit::Minute => Ok("1m"),
            PeriodUnit::FiveMinutes => Ok("5m"),
            PeriodUnit::FifteenMinutes => Ok("15m"),
            PeriodUnit::ThirtyMinutes => Ok("30m"),
            PeriodUnit::Hour => Ok("1h"),
            PeriodUnit::Day => Ok("1d"),
            PeriodUnit::Week => Ok("1w"),
            PeriodUnit::Month => Ok("1mo"),
            other => Err(SimError::data_unavailable(format!(
                "binance has no klines for {:?}",
                other
            ))),
        }
    }

    pub fn url(&self, symbol: &str, interval: &str, day: DateTime) -> String {
        let date = day.to_offset().date();
        format!(
            "{base}/{symbol}/{interval}/{symbol}-{interval}-{year}-{month:02}-{day:02}.zip",
            base = self.base_url,
            symbol = symbol,
            interval = interval,
            year = date.year(),
            month = u8::from(date.month()),
            day = date.day(),
        )
    }

    fn day_bars(&self, url: &str) -> Result<Vec<Bar>> {
        if let Some(bars) = self.cache.lock().unwrap().get(url) {
            return Ok(bars.clone());
        }
        let bars = download(url)?;
        self.cache
            .lock()
            .unwrap()
            .insert(url.to_string(), bars.clone());
        Ok(bars)
    }
}

/// Days, as midnight UTC, that intersect `[start, end)`.
fn days_between(start: DateTime, end: DateTime) -> Vec<DateTime> {
    if end <= start {
        return Vec::new();
    }
    let first = start.div_euclid(DAY);
    let last = (*end - 1).div_euclid(DAY);
    (first..=last).map(|day| DateTime::from(day * DAY)).collect()
}

fn download(url: &str) -> Result<Vec<Bar>> {
    info!("SOURCE: Downloading {}", url);
    let unavailable = |e: reqwest::Error| SimError::data_unavailable(format!("{}: {}", url, e));
    let resp = reqwest::blocking::get(url).map_err(unavailable)?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        debug!("SOURCE: No archive at {}", url);
        return Ok(Vec::new());
    }
    if !resp.status().is_success() {
        return Err(SimError::data_unavailable(format!(
            "{} returned {}",
            url,
            resp.status()
        )));
    }
    let contents = resp.bytes().map_err(unavailable)?;
    unpack(contents.to_vec())
}

/// Reads every csv inside a kline archive.
pub fn unpack(archive: Vec<u8>) -> Result<Vec<Bar>> {
    let bad_zip = |e: zip::result::ZipError| SimError::data_unavailable(format!("bad archive: {}", e));
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(bad_zip)?;
    let mut bars = Vec::new();
    for i in 0..zip.len() {
        let file = zip.by_index(i).map_err(bad_zip)?;
        bars.extend(parse_klines(file));
    }
    bars.sort_by_key(|bar| bar.time);
    Ok(bars)
}

/// Parses Binance kline rows.
///
/// Columns are open time, open, high, low, close, volume, close time and then fields that are
/// not used here. Open time is in milliseconds, newer archives use microseconds. Rows that do
/// not parse, including header rows, are skipped.
pub fn parse_klines<R: Read>(reader: R) -> Vec<Bar> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut bars = Vec::new();
    for row in rdr.records().flatten() {
        if row.len() < 6 {
            continue;
        }
        let parsed = (
            row[0].parse::<i64>(),
            row[1].parse::<f64>(),
            row[2].parse::<f64>(),
            row[3].parse::<f64>(),
            row[4].parse::<f64>(),
            row[5].parse::<f64>(),
        );
        if let (Ok(open_time), Ok(open), Ok(high), Ok(low), Ok(close), Ok(volume)) = parsed {
            let secs = if open_time > 100_000_000_000_000 {
                open_time / 1_000_000
            } else {
                open_time / 1_000
            };
            bars.push(Bar {
                time: secs.into(),
                open,
                high,
                low,
                close,
                volume,
            });
        }
    }
    bars
}

impl HistoricalDataSource for BinanceHistory {
    fn get_historical_data(
        &self,
        instrument: &Instrument,
        end: DateTime,
        num_periods: usize,
        unit: PeriodUnit,
    ) -> Result<Vec<Bar>> {
        if instrument.symbol.is_empty() {
            return Err(SimError::invalid_instrument(instrument.to_string()));
        }
        let interval = Self::interval(unit)?;
        let start = end.plus(-(num_periods as i64) * unit.secs());
        let mut res = Vec::new();
        for day in days_between(start, end) {
            let url = self.url(&instrument.symbol, interval, day);
            res.extend(
                self.day_bars(&url)?
                    .into_iter()
                    .filter(|bar| bar.time >= start && bar.time < end),
            );
        }
        Ok(res)
    }
}
