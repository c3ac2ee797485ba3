// Trading strategy module
pub mod three_candle;
pub mod window;

pub use three_candle::{analyze_window, ThreeCandleStrategy, REWARD_RISK_RATIO};
pub use window::{ThreeCandleWindow, WindowBar};

use crate::models::{Candle, TradeSetting, TradeSignal};

/// Result of running a strategy over one symbol's candles
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// Not enough aligned candle/EMA points; evaluation skipped this cycle
    InsufficientData { candles: usize },
    /// Pattern not matched
    NoSignal,
    Signal(TradeSignal),
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from a symbol's candles, oldest first
    fn generate_signal(&self, setting: &TradeSetting, candles: &[Candle]) -> SignalOutcome;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
