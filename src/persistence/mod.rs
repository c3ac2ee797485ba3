use crate::models::Candle;
use crate::Result;
use csv::Writer;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// `{SYMBOL}_data.csv` inside `dir`
pub fn snapshot_path(dir: &Path, symbol: &str) -> PathBuf {
    dir.join(format!("{}_data.csv", symbol))
}

/// One snapshot row; prices and EMA carry two decimals
#[derive(Debug, Serialize)]
struct SnapshotRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Open")]
    open: String,
    #[serde(rename = "High")]
    high: String,
    #[serde(rename = "Low")]
    low: String,
    #[serde(rename = "Close")]
    close: String,
    #[serde(rename = "Volume")]
    volume: u64,
    #[serde(rename = "EMA")]
    ema: String,
}

impl SnapshotRow {
    fn new(candle: &Candle, ema: f64) -> Self {
        Self {
            timestamp: candle.timestamp.format("%Y-%m-%dT%H:%M:%S%z").to_string(),
            open: format!("{:.2}", candle.open),
            high: format!("{:.2}", candle.high),
            low: format!("{:.2}", candle.low),
            close: format!("{:.2}", candle.close),
            volume: candle.volume,
            ema: format!("{:.2}", ema),
        }
    }
}

/// Write candles with their EMA as CSV
///
/// A candle without a matching EMA value gets `0.00`.
pub fn write_snapshot<W: io::Write>(out: W, candles: &[Candle], ema: &[f64]) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    for (i, candle) in candles.iter().enumerate() {
        let ema = ema.get(i).copied().unwrap_or(0.0);
        writer.serialize(SnapshotRow::new(candle, ema))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a market data snapshot for one symbol
pub fn save_snapshot(dir: &Path, symbol: &str, candles: &[Candle], ema: &[f64]) -> Result<PathBuf> {
    if candles.is_empty() {
        return Err(format!("No candle data to save for {}", symbol).into());
    }

    let path = snapshot_path(dir, symbol);
    write_snapshot(std::fs::File::create(&path)?, candles, ema)?;

    tracing::debug!("Saved {} records to {}", candles.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn candle(ts: &str, close: f64) -> Candle {
        Candle {
            timestamp: DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z").unwrap(),
            open: 100.0,
            high: 101.234,
            low: 99.5,
            close,
            volume: 1200,
            open_interest: None,
        }
    }

    #[test]
    fn test_write_snapshot() {
        let candles = vec![
            candle("2025-07-18T09:15:00+0530", 100.5),
            candle("2025-07-18T09:20:00+0530", 101.0),
        ];
        let mut out = Vec::new();
        write_snapshot(&mut out, &candles, &[100.5]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Timestamp,Open,High,Low,Close,Volume,EMA");
        assert_eq!(
            lines[1],
            "2025-07-18T09:15:00+0530,100.00,101.23,99.50,100.50,1200,100.50"
        );
        assert!(lines[2].ends_with(",0.00"));
    }

    #[test]
    fn test_save_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let candles = vec![candle("2025-07-18T09:15:00+0530", 100.0)];

        let path = save_snapshot(dir.path(), "INFY", &candles, &[100.0]).unwrap();
        assert_eq!(path, dir.path().join("INFY_data.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][4], "100.00");

        assert!(save_snapshot(dir.path(), "TCS", &[], &[]).is_err());
    }
}
