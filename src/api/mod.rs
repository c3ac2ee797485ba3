pub mod instruments;
pub mod kite;

pub use instruments::{InstrumentCache, InstrumentRefresh};
pub use kite::{KiteClient, KiteSession};

use crate::models::{BracketLeg, Candle, Timeframe};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Failure kinds reported by the broker collaborator
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no data returned for {0}")]
    EmptyData(String),

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("unknown instrument {0}")]
    UnknownInstrument(String),

    #[error("failed to decode broker response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BrokerError::Decode(e.to_string())
        } else {
            BrokerError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Decode(e.to_string())
    }
}

/// Broker operations the engine depends on
///
/// Every call is awaited to completion before the next one is issued, so at
/// most one request is outstanding at a time.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Candles for `symbol` between `from` and `to` (exchange-local), oldest first
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Candle>, BrokerError>;

    /// Submit one bracket leg and return the broker's order id
    async fn place_bracket_leg(&self, leg: &BracketLeg) -> Result<String, BrokerError>;

    /// Broker token for a tradable symbol
    fn resolve_instrument_token(&self, symbol: &str) -> Option<String>;
}
