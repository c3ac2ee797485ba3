use super::{SignalOutcome, Strategy, ThreeCandleWindow};
use crate::indicators::calculate_ema;
use crate::models::{Candle, Direction, TradeSetting, TradeSignal};

/// Target distance as a multiple of the entry-to-stop distance
pub const REWARD_RISK_RATIO: f64 = 2.0;

/// Three-candle EMA continuation pattern
///
/// BUY when the two older candles are bullish and closed above their EMA,
/// the latest candle closes above its EMA and breaks the middle candle's
/// high. SELL is the mirror image. The stop sits beyond the extreme of the
/// two older candles and the target is placed at a fixed 2:1 reward:risk.
#[derive(Debug, Clone, Default)]
pub struct ThreeCandleStrategy;

impl ThreeCandleStrategy {
    pub fn new() -> Self {
        Self
    }

    fn extract_prices(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.close).collect()
    }
}

impl Strategy for ThreeCandleStrategy {
    fn generate_signal(&self, setting: &TradeSetting, candles: &[Candle]) -> SignalOutcome {
        let prices = Self::extract_prices(candles);
        let ema = calculate_ema(&prices, setting.ema_period);

        let Some(window) = ThreeCandleWindow::from_series(candles, &ema) else {
            return SignalOutcome::InsufficientData {
                candles: candles.len(),
            };
        };

        match analyze_window(&setting.symbol, &window, setting.quantity) {
            Some(signal) => SignalOutcome::Signal(signal),
            None => SignalOutcome::NoSignal,
        }
    }

    fn name(&self) -> &str {
        "ThreeCandleStrategy"
    }

    fn min_candles_required(&self) -> usize {
        ThreeCandleWindow::LEN
    }
}

/// Apply the pattern rules to a window. BUY is checked first.
pub fn analyze_window(
    symbol: &str,
    window: &ThreeCandleWindow,
    quantity: u32,
) -> Option<TradeSignal> {
    let ThreeCandleWindow {
        oldest,
        middle,
        latest,
    } = window;

    let buy_conditions = [
        oldest.is_bullish(),
        middle.is_bullish(),
        middle.close > middle.ema,
        oldest.close > oldest.ema,
        latest.close > latest.ema,
        latest.close > middle.high,
    ];

    if buy_conditions.iter().all(|&x| x) {
        let entry = latest.close;
        let stop = middle.low.min(oldest.low);
        let target = entry + REWARD_RISK_RATIO * (entry - stop);

        tracing::info!(
            symbol = %symbol,
            entry,
            stop,
            target,
            "BUY signal"
        );

        return Some(TradeSignal {
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            entry_price: entry,
            stop_loss: stop,
            target,
            quantity,
        });
    }

    let sell_conditions = [
        oldest.is_bearish(),
        middle.is_bearish(),
        middle.close < middle.ema,
        oldest.close < oldest.ema,
        latest.close < latest.ema,
        latest.close < middle.low,
    ];

    if sell_conditions.iter().all(|&x| x) {
        let entry = latest.close;
        let stop = middle.high.max(oldest.high);
        let target = entry - REWARD_RISK_RATIO * (stop - entry);

        tracing::info!(
            symbol = %symbol,
            entry,
            stop,
            target,
            "SELL signal"
        );

        return Some(TradeSignal {
            symbol: symbol.to_string(),
            direction: Direction::Sell,
            entry_price: entry,
            stop_loss: stop,
            target,
            quantity,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;
    use crate::strategy::WindowBar;
    use chrono::{DateTime, Duration};

    fn bar(open: f64, high: f64, low: f64, close: f64, ema: f64) -> WindowBar {
        WindowBar {
            open,
            high,
            low,
            close,
            ema,
        }
    }

    fn buy_window() -> ThreeCandleWindow {
        ThreeCandleWindow {
            oldest: bar(92.0, 97.0, 90.0, 96.0, 91.0),
            middle: bar(96.0, 99.0, 95.0, 98.0, 93.0),
            latest: bar(98.0, 101.0, 97.0, 100.0, 95.0),
        }
    }

    fn sell_window() -> ThreeCandleWindow {
        ThreeCandleWindow {
            oldest: bar(108.0, 110.0, 103.0, 104.0, 109.0),
            middle: bar(104.0, 105.0, 101.0, 102.0, 107.0),
            latest: bar(102.0, 103.0, 99.0, 100.0, 105.0),
        }
    }

    #[test]
    fn test_buy_signal_levels() {
        let signal = analyze_window("XYZ", &buy_window(), 10).unwrap();

        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.entry_price, 100.0);
        assert_eq!(signal.stop_loss, 90.0);
        assert_eq!(signal.target, 120.0);
        assert_eq!(signal.quantity, 10);
        assert_eq!(signal.symbol, "XYZ");
    }

    #[test]
    fn test_sell_signal_levels() {
        let signal = analyze_window("XYZ", &sell_window(), 1).unwrap();

        assert_eq!(signal.direction, Direction::Sell);
        assert_eq!(signal.entry_price, 100.0);
        assert_eq!(signal.stop_loss, 110.0);
        assert_eq!(signal.target, 80.0);
    }

    #[test]
    fn test_mixed_direction_candles_no_signal() {
        let mut window = buy_window();
        // Middle candle turns bearish
        window.middle = bar(98.0, 99.0, 95.0, 96.0, 93.0);
        assert!(analyze_window("XYZ", &window, 1).is_none());
    }

    #[test]
    fn test_buy_requires_break_of_middle_high() {
        let mut window = buy_window();
        window.latest = bar(98.0, 99.5, 97.0, 98.5, 95.0);
        assert!(analyze_window("XYZ", &window, 1).is_none());
    }

    #[test]
    fn test_buy_requires_closes_above_ema() {
        let mut window = buy_window();
        window.oldest.ema = 97.0;
        assert!(analyze_window("XYZ", &window, 1).is_none());
    }

    #[test]
    fn test_sell_requires_break_of_middle_low() {
        let mut window = sell_window();
        window.latest.close = 101.5;
        assert!(analyze_window("XYZ", &window, 1).is_none());
    }

    #[test]
    fn test_reward_is_twice_risk() {
        let signal = analyze_window("XYZ", &buy_window(), 1).unwrap();
        let risk = signal.entry_price - signal.stop_loss;
        let reward = signal.target - signal.entry_price;
        assert_eq!(reward, REWARD_RISK_RATIO * risk);
    }

    fn series(bars: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = DateTime::parse_from_rfc3339("2025-07-18T09:15:00+05:30").unwrap();
        bars.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open,
                high,
                low,
                close,
                volume: 500,
                open_interest: None,
            })
            .collect()
    }

    fn setting(ema_period: usize) -> TradeSetting {
        TradeSetting {
            symbol: "XYZ".to_string(),
            quantity: 3,
            timeframe: Timeframe::FiveMinute,
            ema_period,
        }
    }

    #[test]
    fn test_strategy_insufficient_data() {
        let candles = series(&[(10.0, 11.0, 9.0, 10.5), (10.5, 11.5, 10.0, 11.0)]);
        let outcome = ThreeCandleStrategy::new().generate_signal(&setting(20), &candles);
        assert_eq!(outcome, SignalOutcome::InsufficientData { candles: 2 });
    }

    #[test]
    fn test_strategy_buy_from_series() {
        // Flat base drags the EMA well below the rising closes
        let mut bars = vec![(80.0, 80.5, 79.5, 80.0); 10];
        bars.push((92.0, 97.0, 90.0, 96.0));
        bars.push((96.0, 99.0, 95.0, 98.0));
        bars.push((98.0, 101.0, 97.0, 100.0));
        let candles = series(&bars);

        match ThreeCandleStrategy::new().generate_signal(&setting(20), &candles) {
            SignalOutcome::Signal(signal) => {
                assert_eq!(signal.direction, Direction::Buy);
                assert_eq!(signal.stop_loss, 90.0);
                assert_eq!(signal.target, 120.0);
                assert_eq!(signal.quantity, 3);
            }
            other => panic!("expected BUY signal, got {:?}", other),
        }
    }

    #[test]
    fn test_strategy_no_signal_on_flat_series() {
        let candles = series(&vec![(100.0, 100.5, 99.5, 100.0); 30]);
        let outcome = ThreeCandleStrategy::new().generate_signal(&setting(20), &candles);
        assert_eq!(outcome, SignalOutcome::NoSignal);
    }
}
