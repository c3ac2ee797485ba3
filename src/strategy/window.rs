use crate::models::Candle;

/// One candle of a window paired with the EMA value at the same index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ema: f64,
}

impl WindowBar {
    pub fn new(candle: &Candle, ema: f64) -> Self {
        Self {
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            ema,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.open < self.close
    }

    pub fn is_bearish(&self) -> bool {
        self.open > self.close
    }
}

/// The three most recent candles of a series, with their EMA values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreeCandleWindow {
    pub oldest: WindowBar,
    pub middle: WindowBar,
    pub latest: WindowBar,
}

impl ThreeCandleWindow {
    pub const LEN: usize = 3;

    /// Extract the trailing window from a candle series and its EMA series
    ///
    /// Returns `None` when the series are not index-aligned or hold fewer
    /// than three points. That is an insufficient-data state, not an error.
    pub fn from_series(candles: &[Candle], ema: &[f64]) -> Option<Self> {
        if candles.len() != ema.len() || candles.len() < Self::LEN {
            return None;
        }

        let n = candles.len();
        let window = Self {
            oldest: WindowBar::new(&candles[n - 3], ema[n - 3]),
            middle: WindowBar::new(&candles[n - 2], ema[n - 2]),
            latest: WindowBar::new(&candles[n - 1], ema[n - 1]),
        };

        tracing::debug!(
            oldest = %candles[n - 3].timestamp,
            middle = %candles[n - 2].timestamp,
            latest = %candles[n - 1].timestamp,
            "Extracted window from {} candles",
            n
        );

        Some(window)
    }
}
