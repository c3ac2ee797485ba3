// Market-hours gated polling loop
pub mod clock;

pub use clock::{Clock, MarketHours, SystemClock};

use crate::api::{Broker, BrokerError};
use crate::config::{AppConfig, ConfigError};
use crate::execution::{EvaluateOutcome, MonitorOutcome, PositionManager};
use crate::models::TradeSetting;
use crate::strategy::{SignalOutcome, Strategy};
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cadence and session window of the loop
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub hours: MarketHours,
    pub symbol_pacing: Duration,
    pub cycle_delay: Duration,
    pub closed_sleep: Duration,
    pub lookback: chrono::Duration,
    pub monitor_lookback: chrono::Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            hours: MarketHours::from_config(&config.market)?,
            symbol_pacing: Duration::from_millis(config.polling.symbol_pacing_ms),
            cycle_delay: Duration::from_secs(config.polling.cycle_delay_secs),
            closed_sleep: Duration::from_secs(config.market.closed_sleep_secs),
            lookback: chrono::Duration::hours(config.polling.lookback_hours),
            monitor_lookback: chrono::Duration::minutes(config.polling.monitor_lookback_minutes),
        })
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            hours: MarketHours::default(),
            symbol_pacing: Duration::from_millis(100),
            cycle_delay: Duration::from_secs(10),
            closed_sleep: Duration::from_secs(300),
            lookback: chrono::Duration::hours(240),
            monitor_lookback: chrono::Duration::minutes(10),
        }
    }
}

/// Counters for one pass over the watch list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Watched symbols visited, including ones skipped for an open position
    /// or too little data
    pub symbols_evaluated: usize,
    pub signals_generated: usize,
    pub positions_opened: usize,
    pub positions_closed: usize,
}

/// What happened to one watched symbol in a cycle
#[derive(Debug)]
pub enum SymbolOutcome {
    HasPosition,
    InsufficientData { candles: usize },
    NoSignal,
    Signal(EvaluateOutcome),
    FetchFailed(BrokerError),
}

pub struct Scheduler {
    broker: Arc<dyn Broker>,
    strategy: Box<dyn Strategy>,
    positions: PositionManager,
    watch_list: Vec<TradeSetting>,
    settings: SchedulerSettings,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        broker: Arc<dyn Broker>,
        strategy: Box<dyn Strategy>,
        positions: PositionManager,
        watch_list: Vec<TradeSetting>,
        settings: SchedulerSettings,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            broker,
            strategy,
            positions,
            watch_list,
            settings,
            shutdown,
        }
    }

    /// Stop the loop when `true` is published on this channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run cycles until shutdown, returning how many cycles completed
    pub async fn run(&mut self, clock: &dyn Clock) -> usize {
        tracing::info!(
            strategy = self.strategy.name(),
            symbols = self.watch_list.len(),
            open = %self.settings.hours.open,
            close = %self.settings.hours.close,
            "Scheduler starting"
        );

        let mut cycles = 0;
        while !self.stopping() {
            let now = clock.now();

            if !self.settings.hours.is_open(now.time()) {
                tracing::info!(
                    time = %now.format("%H:%M:%S"),
                    "Market closed, sleeping {:?}",
                    self.settings.closed_sleep
                );
                if !self.pause(self.settings.closed_sleep).await {
                    break;
                }
                continue;
            }

            let report = self.run_cycle(now).await;
            cycles += 1;
            tracing::info!(
                symbols = report.symbols_evaluated,
                signals = report.signals_generated,
                opened = report.positions_opened,
                closed = report.positions_closed,
                open_positions = self.positions.len(),
                "Cycle complete"
            );

            if !self.pause(self.settings.cycle_delay).await {
                break;
            }
        }

        tracing::info!(cycles, "Scheduler stopped");
        cycles
    }

    /// Sleep unless shutdown arrives first; returns false when stopping
    async fn pause(&mut self, duration: Duration) -> bool {
        if !duration.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                changed = self.shutdown.changed() => {
                    // Sender gone: nobody can request shutdown any more
                    if changed.is_err() {
                        tokio::time::sleep(duration).await;
                    }
                }
            }
        }
        !self.stopping()
    }

    /// One pass: monitor open positions, then evaluate every watched symbol
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport {
            positions_closed: self.monitor_positions(now).await,
            ..Default::default()
        };

        let watch_list = self.watch_list.clone();
        for (i, setting) in watch_list.iter().enumerate() {
            if self.stopping() {
                tracing::info!("Shutdown requested, abandoning cycle");
                break;
            }
            if i > 0 && !self.settings.symbol_pacing.is_zero() {
                tokio::time::sleep(self.settings.symbol_pacing).await;
            }

            report.symbols_evaluated += 1;

            match self.process_symbol(setting, now).await {
                SymbolOutcome::Signal(outcome) => {
                    report.signals_generated += 1;
                    if let EvaluateOutcome::Placed { .. } = outcome {
                        report.positions_opened += 1;
                    }
                }
                SymbolOutcome::FetchFailed(e) => {
                    tracing::warn!(symbol = %setting.symbol, "Failed to fetch candles: {}", e);
                }
                SymbolOutcome::InsufficientData { candles } => {
                    tracing::debug!(symbol = %setting.symbol, candles, "Not enough candles");
                }
                SymbolOutcome::HasPosition | SymbolOutcome::NoSignal => {}
            }
        }

        report
    }

    async fn process_symbol(&mut self, setting: &TradeSetting, now: NaiveDateTime) -> SymbolOutcome {
        if self.positions.has_open_position(&setting.symbol) {
            return SymbolOutcome::HasPosition;
        }

        let from = now - self.settings.lookback;
        let candles = match self
            .broker
            .fetch_candles(&setting.symbol, setting.timeframe, from, now)
            .await
        {
            Ok(candles) => candles,
            Err(BrokerError::EmptyData(_)) => {
                return SymbolOutcome::InsufficientData { candles: 0 };
            }
            Err(e) => return SymbolOutcome::FetchFailed(e),
        };

        if candles.len() < self.strategy.min_candles_required() {
            return SymbolOutcome::InsufficientData {
                candles: candles.len(),
            };
        }

        match self.strategy.generate_signal(setting, &candles) {
            SignalOutcome::InsufficientData { candles } => {
                SymbolOutcome::InsufficientData { candles }
            }
            SignalOutcome::NoSignal => SymbolOutcome::NoSignal,
            SignalOutcome::Signal(signal) => {
                let outcome = self
                    .positions
                    .evaluate(self.broker.as_ref(), &signal, now)
                    .await;
                SymbolOutcome::Signal(outcome)
            }
        }
    }

    /// Check every open position against its latest close
    async fn monitor_positions(&mut self, now: NaiveDateTime) -> usize {
        let mut closed = 0;
        let from = now - self.settings.monitor_lookback;

        for symbol in self.positions.open_symbols() {
            let timeframe = self
                .watch_list
                .iter()
                .find(|s| s.symbol == symbol)
                .map(|s| s.timeframe)
                .unwrap_or_default();

            let price = match self.broker.fetch_candles(&symbol, timeframe, from, now).await {
                Ok(candles) => match candles.last() {
                    Some(latest) => latest.close,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Failed to fetch price for monitoring: {}", e);
                    continue;
                }
            };

            if let MonitorOutcome::Closed(_) = self.positions.monitor(&symbol, price, now) {
                closed += 1;
            }
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BracketLeg, Candle, Timeframe, TradeSignal};
    use crate::strategy::ThreeCandleStrategy;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlatBroker;

    #[async_trait]
    impl Broker for FlatBroker {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _from: NaiveDateTime,
            _to: NaiveDateTime,
        ) -> Result<Vec<Candle>, BrokerError> {
            let timestamp = DateTime::parse_from_rfc3339("2025-07-18T10:00:00+05:30").unwrap();
            Ok(vec![
                Candle {
                    timestamp,
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 0,
                    open_interest: None,
                };
                5
            ])
        }

        async fn place_bracket_leg(&self, _leg: &BracketLeg) -> Result<String, BrokerError> {
            Err(BrokerError::Network("unreachable".to_string()))
        }

        fn resolve_instrument_token(&self, _symbol: &str) -> Option<String> {
            None
        }
    }

    /// Needs more candles than `FlatBroker` serves; counts every call
    struct HungryStrategy {
        calls: Arc<AtomicUsize>,
    }

    impl Strategy for HungryStrategy {
        fn generate_signal(&self, _setting: &TradeSetting, _candles: &[Candle]) -> SignalOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            SignalOutcome::Signal(TradeSignal {
                symbol: "INFY".to_string(),
                direction: crate::models::Direction::Buy,
                entry_price: 100.0,
                stop_loss: 90.0,
                target: 120.0,
                quantity: 1,
            })
        }

        fn name(&self) -> &str {
            "hungry"
        }

        fn min_candles_required(&self) -> usize {
            10
        }
    }

    /// Requests shutdown once `now` has been read `limit` times
    struct CountingClock {
        at: NaiveDateTime,
        calls: AtomicUsize,
        limit: usize,
        stop: watch::Sender<bool>,
    }

    impl Clock for CountingClock {
        fn now(&self) -> NaiveDateTime {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                let _ = self.stop.send(true);
            }
            self.at
        }
    }

    fn scheduler(settings: SchedulerSettings) -> Scheduler {
        Scheduler::new(
            Arc::new(FlatBroker),
            Box::new(ThreeCandleStrategy::new()),
            PositionManager::default(),
            vec![TradeSetting::fallback("INFY"), TradeSetting::fallback("TCS")],
            settings,
        )
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            symbol_pacing: Duration::ZERO,
            cycle_delay: Duration::from_millis(1),
            closed_sleep: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 18)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_flat_market_yields_no_signals() {
        let mut scheduler = scheduler(fast_settings());
        let report = scheduler.run_cycle(at(10, 0)).await;

        assert_eq!(
            report,
            CycleReport {
                symbols_evaluated: 2,
                ..Default::default()
            }
        );
        assert!(scheduler.positions().is_empty());
    }

    #[tokio::test]
    async fn test_short_series_skips_strategy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(
            Arc::new(FlatBroker),
            Box::new(HungryStrategy {
                calls: calls.clone(),
            }),
            PositionManager::default(),
            vec![TradeSetting::fallback("INFY")],
            fast_settings(),
        );

        let report = scheduler.run_cycle(at(10, 0)).await;
        assert_eq!(report.symbols_evaluated, 1);
        assert_eq!(report.signals_generated, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let setting = TradeSetting::fallback("INFY");
        assert!(matches!(
            scheduler.process_symbol(&setting, at(10, 5)).await,
            SymbolOutcome::InsufficientData { candles: 5 }
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let clock = CountingClock {
            at: at(10, 0),
            calls: AtomicUsize::new(0),
            limit: 2,
            stop: tx,
        };

        let mut scheduler = scheduler(fast_settings()).with_shutdown(rx);
        let cycles = scheduler.run(&clock).await;
        assert_eq!(cycles, 2);
    }

    #[tokio::test]
    async fn test_closed_market_runs_no_cycles() {
        let (tx, rx) = watch::channel(false);
        let clock = CountingClock {
            at: at(20, 0),
            calls: AtomicUsize::new(0),
            limit: 3,
            stop: tx,
        };

        let mut scheduler = scheduler(fast_settings()).with_shutdown(rx);
        assert_eq!(scheduler.run(&clock).await, 0);
        assert_eq!(clock.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let mut scheduler = scheduler(fast_settings()).with_shutdown(rx);
        assert_eq!(scheduler.run(&SystemClock).await, 0);
    }

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig::default();
        let settings = SchedulerSettings::from_config(&config).unwrap();
        assert_eq!(settings.symbol_pacing, Duration::from_millis(100));
        assert_eq!(settings.cycle_delay, Duration::from_secs(10));
        assert_eq!(settings.lookback, chrono::Duration::hours(240));
        assert_eq!(settings.hours, MarketHours::default());
    }
}
