//! Runtime configuration, credentials and per-symbol trade settings

use crate::models::{Timeframe, TradeSetting};
use chrono::NaiveTime;
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} not found in credentials file")]
    MissingField(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
}

/// Top-level configuration, layered from `kitebot.toml` and `KITEBOT__*` env vars
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub files: FileConfig,
    pub market: MarketConfig,
    pub polling: PollingConfig,
    pub broker: BrokerConfig,
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "kitebot.toml";
    pub const ENV_PREFIX: &'static str = "KITEBOT";

    /// Load configuration; a missing file falls back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.market.hours()?;
        if self.broker.requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "broker.requests_per_second must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub credentials: PathBuf,
    pub trade_settings: PathBuf,
    pub instruments: PathBuf,
    pub order_log: PathBuf,
    pub session: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            credentials: PathBuf::from("Credential.csv"),
            trade_settings: PathBuf::from("TradeSettings.csv"),
            instruments: PathBuf::from("instruments.csv"),
            order_log: PathBuf::from("OrderLog.txt"),
            session: PathBuf::from("session.json"),
        }
    }
}

/// Trading session window, exchange-local `HH:MM`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub open: String,
    pub close: String,
    pub closed_sleep_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            open: "09:15".to_string(),
            close: "15:30".to_string(),
            closed_sleep_secs: 300,
        }
    }
}

impl MarketConfig {
    /// Parsed `(open, close)` times
    pub fn hours(&self) -> Result<(NaiveTime, NaiveTime), ConfigError> {
        let parse = |value: &str, name: &str| {
            NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
                ConfigError::Invalid(format!("market.{} '{}': {}", name, value, e))
            })
        };
        let open = parse(&self.open, "open")?;
        let close = parse(&self.close, "close")?;
        if open >= close {
            return Err(ConfigError::Invalid(format!(
                "market opens at {} but closes at {}",
                open, close
            )));
        }
        Ok((open, close))
    }
}

/// Cadence of the polling loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub symbol_pacing_ms: u64,
    pub cycle_delay_secs: u64,
    pub lookback_hours: i64,
    pub monitor_lookback_minutes: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            symbol_pacing_ms: 100,
            cycle_delay_secs: 10,
            lookback_hours: 240, // 10 days
            monitor_lookback_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub login_url: String,
    pub exchange: String,
    pub product: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.kite.trade".to_string(),
            login_url: "https://kite.zerodha.com/connect/login".to_string(),
            exchange: "NSE".to_string(),
            product: "MIS".to_string(), // Intraday
            timeout_secs: 30,
            requests_per_second: 3,
        }
    }
}

/// API key pair issued by the broker
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `KEY,VALUE` credentials; `API_KEY` and `API_SECRET` are required
pub fn load_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let credentials = parse_credentials(&read(path)?)?;
    tracing::info!(api_key = %credentials.api_key, "Credentials loaded");
    Ok(credentials)
}

#[derive(Debug, Deserialize)]
struct CredentialRow {
    key: String,
    value: String,
}

pub fn parse_credentials(text: &str) -> Result<Credentials, ConfigError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut api_key = None;
    let mut api_secret = None;

    for record in reader.records() {
        let record = record?;
        let Ok(row) = record.deserialize::<CredentialRow>(None) else {
            continue;
        };
        match row.key.as_str() {
            "API_KEY" => api_key = Some(row.value),
            "API_SECRET" => api_secret = Some(row.value),
            _ => {}
        }
    }

    Ok(Credentials {
        api_key: api_key.ok_or(ConfigError::MissingField("API_KEY"))?,
        api_secret: api_secret.ok_or(ConfigError::MissingField("API_SECRET"))?,
    })
}

/// Load `symbol,quantity,timeframe,ema_period` rows (first line is a header)
pub fn load_trade_settings(path: &Path) -> Result<Vec<TradeSetting>, ConfigError> {
    let settings = parse_trade_settings(&read(path)?);
    tracing::info!("Loaded {} trade settings", settings.len());
    Ok(settings)
}

/// One `TradeSettings.csv` row, read by position
#[derive(Debug, Deserialize)]
struct SettingRow {
    symbol: String,
    quantity: u32,
    timeframe: String,
    ema_period: usize,
}

impl TryFrom<SettingRow> for TradeSetting {
    type Error = String;

    fn try_from(row: SettingRow) -> Result<Self, Self::Error> {
        if row.symbol.is_empty() {
            return Err("empty symbol".to_string());
        }
        let timeframe: Timeframe = row.timeframe.parse()?;
        if row.quantity == 0 || row.ema_period == 0 {
            return Err(format!(
                "{}: quantity and ema_period must be positive",
                row.symbol
            ));
        }

        Ok(TradeSetting {
            symbol: row.symbol,
            quantity: row.quantity,
            timeframe,
            ema_period: row.ema_period,
        })
    }
}

/// Parse trade settings, skipping malformed rows with a warning
pub fn parse_trade_settings(text: &str) -> Vec<TradeSetting> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut settings = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping trade setting: {}", e);
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let parsed = record
            .deserialize::<SettingRow>(None)
            .map_err(|e| e.to_string())
            .and_then(TradeSetting::try_from);
        match parsed {
            Ok(setting) => settings.push(setting),
            Err(reason) => tracing::warn!(line, "Skipping trade setting: {}", reason),
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let text = "API_KEY, abc123\nAPI_SECRET,s3cret\nUSER,ignored\n";
        let creds = parse_credentials(text).unwrap();
        assert_eq!(creds.api_key, "abc123");
        assert_eq!(creds.api_secret, "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_parse_credentials_missing_secret() {
        let err = parse_credentials("API_KEY,abc\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("API_SECRET")));
    }

    #[test]
    fn test_parse_credentials_quoted_value() {
        let text = "API_KEY,\"ab,c\"\nAPI_SECRET,\"say \"\"hi\"\"\"\n";
        let creds = parse_credentials(text).unwrap();
        assert_eq!(creds.api_key, "ab,c");
        assert_eq!(creds.api_secret, "say \"hi\"");
    }

    #[test]
    fn test_parse_trade_settings() {
        let text = "Symbol,Quantity,Timeframe,EMA\nINFY,10,5minute,20\n\nTCS,5,15minute,9\n";
        let settings = parse_trade_settings(text);

        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0].symbol, "INFY");
        assert_eq!(settings[0].quantity, 10);
        assert_eq!(settings[0].timeframe, Timeframe::FiveMinute);
        assert_eq!(settings[1].ema_period, 9);
        assert_eq!(settings[1].timeframe, Timeframe::FifteenMinute);
    }

    #[test]
    fn test_parse_trade_settings_skips_bad_rows() {
        let text = "header\nINFY,ten,5minute,20\nTCS,0,5minute,20\nSBIN,1,7minute,20\nITC,1,day,50\nX,1\n";
        let settings = parse_trade_settings(text);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].symbol, "ITC");
    }

    #[test]
    fn test_parse_trade_settings_quoted_fields() {
        let text = "Symbol,Quantity,Timeframe,EMA\n\"M&M\", 3 ,\"minute\",\"14\"\n";
        let settings = parse_trade_settings(text);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].symbol, "M&M");
        assert_eq!(settings[0].quantity, 3);
        assert_eq!(settings[0].timeframe, Timeframe::Minute);
        assert_eq!(settings[0].ema_period, 14);
    }

    #[test]
    fn test_market_hours_parsing() {
        let market = MarketConfig::default();
        let (open, close) = market.hours().unwrap();
        assert_eq!(open, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());

        let inverted = MarketConfig {
            open: "15:30".to_string(),
            close: "09:15".to_string(),
            ..Default::default()
        };
        assert!(inverted.hours().is_err());
    }

    #[test]
    fn test_load_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.polling.lookback_hours, 240);
        assert_eq!(config.broker.exchange, "NSE");
        assert_eq!(config.files.order_log, PathBuf::from("OrderLog.txt"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kitebot.toml");
        std::fs::write(
            &path,
            "[market]\nopen = \"13:40\"\n\n[polling]\ncycle_delay_secs = 30\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.market.open, "13:40");
        assert_eq!(config.market.close, "15:30");
        assert_eq!(config.polling.cycle_delay_secs, 30);
        assert_eq!(config.polling.symbol_pacing_ms, 100);
    }
}
