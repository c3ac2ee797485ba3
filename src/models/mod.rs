use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candlestick as returned by the broker, exchange-local timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub open_interest: Option<u64>,
}

/// Candle interval accepted by the historical data endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    Minute,
    ThreeMinute,
    #[default]
    FiveMinute,
    TenMinute,
    FifteenMinute,
    ThirtyMinute,
    SixtyMinute,
    Day,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute => "minute",
            Timeframe::ThreeMinute => "3minute",
            Timeframe::FiveMinute => "5minute",
            Timeframe::TenMinute => "10minute",
            Timeframe::FifteenMinute => "15minute",
            Timeframe::ThirtyMinute => "30minute",
            Timeframe::SixtyMinute => "60minute",
            Timeframe::Day => "day",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minute" => Ok(Timeframe::Minute),
            "3minute" => Ok(Timeframe::ThreeMinute),
            "5minute" => Ok(Timeframe::FiveMinute),
            "10minute" => Ok(Timeframe::TenMinute),
            "15minute" => Ok(Timeframe::FifteenMinute),
            "30minute" => Ok(Timeframe::ThirtyMinute),
            "60minute" => Ok(Timeframe::SixtyMinute),
            "day" => Ok(Timeframe::Day),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// Per-symbol trading parameters, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSetting {
    pub symbol: String,
    pub quantity: u32,
    pub timeframe: Timeframe,
    pub ema_period: usize,
}

impl TradeSetting {
    pub const DEFAULT_QUANTITY: u32 = 1;
    pub const DEFAULT_EMA_PERIOD: usize = 20;

    /// Setting used for a symbol that has no row in the settings file
    pub fn fallback(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: Self::DEFAULT_QUANTITY,
            timeframe: Timeframe::default(),
            ema_period: Self::DEFAULT_EMA_PERIOD,
        }
    }
}

/// Tradable instrument from the broker's instrument dump
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub token: String,
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub instrument_type: String,
}

/// Trade direction, also used as the transaction type of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Side of the protective legs that close a position opened in this direction
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    StopLoss,
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::StopLoss => "SL",
            OrderKind::Limit => "LIMIT",
        }
    }
}

/// Which part of a bracket an order belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LegRole {
    Entry,
    StopLoss,
    Target,
}

impl LegRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegRole::Entry => "ENTRY",
            LegRole::StopLoss => "STOPLOSS",
            LegRole::Target => "TARGET",
        }
    }
}

/// One order of a bracket, as submitted to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BracketLeg {
    pub symbol: String,
    pub side: Direction,
    pub kind: OrderKind,
    pub role: LegRole,
    pub price: f64,
    pub quantity: u32,
}

impl BracketLeg {
    pub fn entry(signal: &TradeSignal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            side: signal.direction,
            kind: OrderKind::Market,
            role: LegRole::Entry,
            price: signal.entry_price,
            quantity: signal.quantity,
        }
    }

    pub fn stop_loss(signal: &TradeSignal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            side: signal.direction.opposite(),
            kind: OrderKind::StopLoss,
            role: LegRole::StopLoss,
            price: signal.stop_loss,
            quantity: signal.quantity,
        }
    }

    pub fn target(signal: &TradeSignal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            side: signal.direction.opposite(),
            kind: OrderKind::Limit,
            role: LegRole::Target,
            price: signal.target,
            quantity: signal.quantity,
        }
    }
}

/// Directional trade with its bracket levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub quantity: u32,
}
