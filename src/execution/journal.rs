use crate::models::BracketLeg;
use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only text log of order legs and position closures
///
/// Write failures are reported through `tracing` and otherwise ignored, so a
/// full disk never interrupts trading.
#[derive(Debug, Clone, Default)]
pub struct OrderJournal {
    path: Option<PathBuf>,
}

impl OrderJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Journal that discards every record
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `time | ROLE | SIDE | SYMBOL | Price: p | Qty: q | Order ID: id`
    pub fn record_leg(&self, at: NaiveDateTime, leg: &BracketLeg, order_id: &str) {
        self.append(&format!(
            "{} | {} | {} | {} | Price: {:.2} | Qty: {} | Order ID: {}",
            at.format(TIMESTAMP_FORMAT),
            leg.role.as_str(),
            leg.side,
            leg.symbol,
            leg.price,
            leg.quantity,
            order_id
        ));
    }

    /// `time | STOPLOSS_HIT | SYMBOL | Price: p`
    pub fn record_closure(&self, at: NaiveDateTime, kind: &str, symbol: &str, price: f64) {
        self.append(&format!(
            "{} | {} | {} | Price: {:.2}",
            at.format(TIMESTAMP_FORMAT),
            kind,
            symbol,
            price
        ));
    }

    fn append(&self, line: &str) {
        let Some(path) = &self.path else {
            return;
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));

        if let Err(e) = result {
            tracing::warn!("Failed to write order log {}: {}", path.display(), e);
        }
    }
}
