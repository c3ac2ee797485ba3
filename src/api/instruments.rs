use crate::models::{Instrument, TradeSetting};
use anyhow::Context;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Installed when every instruments endpoint fails
const FALLBACK_SYMBOLS: &[&str] = &[
    "RELIANCE",
    "TCS",
    "HDFCBANK",
    "INFY",
    "ICICIBANK",
    "HINDUNILVR",
    "ITC",
    "SBIN",
    "BHARTIARTL",
    "KOTAKBANK",
];
const FALLBACK_TOKEN_BASE: u64 = 1_000_000;

/// How an instrument refresh ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentRefresh {
    /// Cache rebuilt from the broker's instrument dump
    Live { count: usize },
    /// Endpoints failed but a previously saved `instruments.csv` was reused
    Saved { count: usize },
    /// Every endpoint failed; the cache holds placeholder tokens and
    /// historical data requests are expected to fail
    Degraded { count: usize },
}

impl InstrumentRefresh {
    pub fn is_degraded(&self) -> bool {
        matches!(self, InstrumentRefresh::Degraded { .. })
    }
}

/// Symbol -> instrument mapping, rebuilt on every refresh
#[derive(Debug, Clone, Default)]
pub struct InstrumentCache {
    by_symbol: HashMap<String, Instrument>,
}

impl InstrumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instruments(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        let by_symbol = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        Self { by_symbol }
    }

    /// Placeholder instruments for the most liquid NSE equities
    pub fn fallback() -> Self {
        Self::from_instruments(FALLBACK_SYMBOLS.iter().enumerate().map(|(i, symbol)| {
            Instrument {
                token: (FALLBACK_TOKEN_BASE + i as u64).to_string(),
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                exchange: "NSE".to_string(),
                instrument_type: "EQ".to_string(),
            }
        }))
    }

    /// Parse the broker's CSV instrument dump, keeping NSE equities only
    pub fn parse_dump(text: &str) -> Option<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut total = 0;
        let mut instruments: Vec<Instrument> = Vec::new();
        for result in reader.deserialize::<DumpRow>() {
            total += 1;
            match result {
                Ok(row) if row.exchange == "NSE" && row.instrument_type == "EQ" => {
                    instruments.push(row.into())
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping instrument row: {}", e),
            }
        }

        tracing::info!(
            "Parsed {} NSE equity instruments out of {} rows",
            instruments.len(),
            total
        );

        if instruments.is_empty() {
            return None;
        }
        Some(Self::from_instruments(instruments))
    }

    /// Broker token for a symbol, also trying the `NSE:` prefixed key
    pub fn token(&self, symbol: &str) -> Option<&str> {
        self.by_symbol
            .get(symbol)
            .or_else(|| self.by_symbol.get(&format!("NSE:{}", symbol)))
            .map(|i| i.token.as_str())
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.token(symbol).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Settings whose symbol is tradable, in settings order
    ///
    /// Symbols missing from the cache are excluded with a warning.
    pub fn watch_list(&self, settings: &[TradeSetting]) -> Vec<TradeSetting> {
        let watched: Vec<TradeSetting> = settings
            .iter()
            .filter(|s| {
                let known = self.contains(&s.symbol);
                if !known {
                    tracing::warn!(
                        symbol = %s.symbol,
                        "Symbol not found in instruments, excluding from watch list"
                    );
                }
                known
            })
            .cloned()
            .collect();

        tracing::info!(
            "Found {} symbols in instruments out of {} trade settings",
            watched.len(),
            settings.len()
        );

        watched
    }

    /// Write the cache in the saved instruments format
    pub fn save_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut instruments: Vec<&Instrument> = self.by_symbol.values().collect();
        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut writer = Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for instrument in instruments {
            writer.serialize(SavedRow::from(instrument))?;
        }
        writer.flush()?;

        tracing::info!("Saved {} instruments to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a cache written by [`InstrumentCache::save_csv`]
    pub fn load_csv(path: &Path) -> anyhow::Result<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut instruments: Vec<Instrument> = Vec::new();
        for result in reader.deserialize::<SavedRow>() {
            let row = result.with_context(|| format!("Bad row in {}", path.display()))?;
            instruments.push(row.into());
        }

        let cache = Self::from_instruments(instruments);
        tracing::info!("Loaded {} instruments from {}", cache.len(), path.display());
        Ok(cache)
    }
}

/// Row of the broker's instrument dump; other columns are ignored
#[derive(Debug, Deserialize)]
struct DumpRow {
    instrument_token: String,
    tradingsymbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    exchange: String,
    #[serde(default)]
    instrument_type: String,
}

impl From<DumpRow> for Instrument {
    fn from(row: DumpRow) -> Self {
        Instrument {
            token: row.instrument_token,
            symbol: row.tradingsymbol,
            name: row.name,
            exchange: row.exchange,
            instrument_type: row.instrument_type,
        }
    }
}

/// Row of the saved `instruments.csv`
#[derive(Debug, Serialize, Deserialize)]
struct SavedRow {
    instrument_token: String,
    tradingsymbol: String,
    name: String,
    exchange: String,
    instrument_type: String,
    segment: String,
    lot_size: u32,
    tick_size: f64,
}

impl From<&Instrument> for SavedRow {
    fn from(i: &Instrument) -> Self {
        SavedRow {
            instrument_token: i.token.clone(),
            tradingsymbol: i.symbol.clone(),
            name: i.name.clone(),
            exchange: i.exchange.clone(),
            instrument_type: i.instrument_type.clone(),
            segment: "NSE".to_string(),
            lot_size: 1,
            tick_size: 0.05,
        }
    }
}

impl From<SavedRow> for Instrument {
    fn from(row: SavedRow) -> Self {
        Instrument {
            token: row.instrument_token,
            symbol: row.tradingsymbol,
            name: row.name,
            exchange: row.exchange,
            instrument_type: row.instrument_type,
        }
    }
}
