use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use super::journal::OrderJournal;
use crate::api::{Broker, BrokerError};
use crate::models::{BracketLeg, Direction, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLossHit,
    TargetHit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLossHit => "STOPLOSS_HIT",
            ExitReason::TargetHit => "TARGET_HIT",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a live position stands in its bracket placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    EntryPlaced,
    StopLossPlaced,
    TargetPlaced,
    BracketActive,
}

#[derive(Debug)]
pub enum EvaluateOutcome {
    Placed { entry_order_id: String },
    /// Entry order failed; no position was created
    Rejected(BrokerError),
    /// Symbol already holds a position; the signal is discarded
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Unchanged,
    Closed(ExitReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub entry_order_id: String,
    pub stop_loss_order_id: Option<String>,
    pub target_order_id: Option<String>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub quantity: u32,
    pub stop_loss_placed: bool,
    pub target_placed: bool,
}

impl Position {
    fn opened(signal: &TradeSignal, entry_order_id: String) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_order_id,
            stop_loss_order_id: None,
            target_order_id: None,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            target: signal.target,
            quantity: signal.quantity,
            stop_loss_placed: false,
            target_placed: false,
        }
    }

    pub fn state(&self) -> PositionState {
        match (self.stop_loss_placed, self.target_placed) {
            (false, false) => PositionState::EntryPlaced,
            (true, false) => PositionState::StopLossPlaced,
            (false, true) => PositionState::TargetPlaced,
            (true, true) => PositionState::BracketActive,
        }
    }

    /// Closure test against the latest close; the stop is checked first
    pub fn exit_reason(&self, price: f64) -> Option<ExitReason> {
        let (stop_hit, target_hit) = match self.direction {
            Direction::Buy => (price <= self.stop_loss, price >= self.target),
            Direction::Sell => (price >= self.stop_loss, price <= self.target),
        };

        if stop_hit {
            Some(ExitReason::StopLossHit)
        } else if target_hit {
            Some(ExitReason::TargetHit)
        } else {
            None
        }
    }
}

/// Owns the live positions, at most one per symbol
///
/// Price monitoring on the client side decides closure. Broker-side bracket
/// legs are placed best-effort and their failure leaves the position open.
#[derive(Debug, Default)]
pub struct PositionManager {
    positions: BTreeMap<String, Position>,
    journal: OrderJournal,
}

impl PositionManager {
    pub fn new(journal: OrderJournal) -> Self {
        Self {
            positions: BTreeMap::new(),
            journal,
        }
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn get_open_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Open positions ordered by symbol
    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Act on a signal: place the entry, then the stop-loss and target legs
    pub async fn evaluate(
        &mut self,
        broker: &dyn Broker,
        signal: &TradeSignal,
        now: NaiveDateTime,
    ) -> EvaluateOutcome {
        if self.has_open_position(&signal.symbol) {
            tracing::info!(
                symbol = %signal.symbol,
                direction = %signal.direction,
                "Position already open, discarding signal"
            );
            return EvaluateOutcome::Skipped;
        }

        let entry = BracketLeg::entry(signal);
        let entry_order_id = match broker.place_bracket_leg(&entry).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    "Entry order failed: {}",
                    e
                );
                return EvaluateOutcome::Rejected(e);
            }
        };

        self.journal.record_leg(now, &entry, &entry_order_id);
        tracing::info!(
            kind = "SIGNAL_ACCEPTED",
            symbol = %signal.symbol,
            direction = %signal.direction,
            price = signal.entry_price,
            stop_loss = signal.stop_loss,
            target = signal.target,
            quantity = signal.quantity,
            timestamp = %now,
            order_id = %entry_order_id,
            "Entry order placed"
        );

        let mut position = Position::opened(signal, entry_order_id.clone());

        let stop_leg = BracketLeg::stop_loss(signal);
        if let Some(id) = self.place_protective_leg(broker, &stop_leg, now).await {
            position.stop_loss_order_id = Some(id);
            position.stop_loss_placed = true;
        }

        let target_leg = BracketLeg::target(signal);
        if let Some(id) = self.place_protective_leg(broker, &target_leg, now).await {
            position.target_order_id = Some(id);
            position.target_placed = true;
        }

        if position.state() != PositionState::BracketActive {
            tracing::warn!(
                symbol = %position.symbol,
                state = ?position.state(),
                "Bracket incomplete, monitoring client-side only"
            );
        }

        self.positions.insert(position.symbol.clone(), position);
        EvaluateOutcome::Placed { entry_order_id }
    }

    async fn place_protective_leg(
        &self,
        broker: &dyn Broker,
        leg: &BracketLeg,
        now: NaiveDateTime,
    ) -> Option<String> {
        match broker.place_bracket_leg(leg).await {
            Ok(id) => {
                self.journal.record_leg(now, leg, &id);
                tracing::info!(
                    symbol = %leg.symbol,
                    price = leg.price,
                    order_id = %id,
                    "{} order placed",
                    leg.role.as_str()
                );
                Some(id)
            }
            Err(e) => {
                tracing::warn!(
                    symbol = %leg.symbol,
                    price = leg.price,
                    "{} order failed: {}",
                    leg.role.as_str(),
                    e
                );
                None
            }
        }
    }

    /// Check the latest close against the position's stop and target
    pub fn monitor(&mut self, symbol: &str, price: f64, now: NaiveDateTime) -> MonitorOutcome {
        let Some(reason) = self
            .positions
            .get(symbol)
            .and_then(|p| p.exit_reason(price))
        else {
            return MonitorOutcome::Unchanged;
        };

        if let Some(position) = self.positions.remove(symbol) {
            tracing::info!(
                kind = reason.as_str(),
                symbol = %symbol,
                direction = %position.direction,
                price = price,
                timestamp = %now,
                order_id = %position.entry_order_id,
                "Position closed"
            );
        }
        self.journal.record_closure(now, reason.as_str(), symbol, price);

        MonitorOutcome::Closed(reason)
    }
}
