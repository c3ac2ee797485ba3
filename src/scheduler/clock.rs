use crate::config::{ConfigError, MarketConfig};
use chrono::{Local, NaiveDateTime, NaiveTime};

/// Source of exchange-local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Host local time; the host is expected to run in the exchange's timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Trading session window, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl MarketHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn from_config(config: &MarketConfig) -> Result<Self, ConfigError> {
        let (open, close) = config.hours()?;
        Ok(Self::new(open, close))
    }

    pub fn is_open(&self, time: NaiveTime) -> bool {
        time >= self.open && time <= self.close
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        // NSE cash session
        Self {
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
        }
    }
}
