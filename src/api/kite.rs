use super::{Broker, BrokerError, InstrumentCache, InstrumentRefresh};
use crate::config::{BrokerConfig, Credentials};
use crate::models::{BracketLeg, Candle, LegRole, OrderKind, Timeframe};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const KITE_VERSION: &str = "3";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const INSTRUMENT_DUMP_HEADER: &str = "instrument_token,exchange_token";

type KiteRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Access token issued by the session exchange
///
/// Kite tokens expire overnight, so a persisted session is only reused on
/// the trading day it was created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KiteSession {
    pub access_token: String,
    pub user_id: String,
    pub created_on: NaiveDate,
}

impl KiteSession {
    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.created_on == day && !self.access_token.is_empty()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write session to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session from {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct KiteResponse<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    access_token: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct LtpData {
    last_price: f64,
}

// ============== Implementation ==============

/// Kite Connect REST client
pub struct KiteClient {
    client: Client,
    config: BrokerConfig,
    credentials: Credentials,
    session: Option<KiteSession>,
    instruments: RwLock<InstrumentCache>,
    rate_limiter: Arc<KiteRateLimiter>,
}

impl KiteClient {
    pub fn new(credentials: Credentials, config: BrokerConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let per_second = NonZeroU32::new(config.requests_per_second)
            .context("requests_per_second must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            config,
            credentials,
            session: None,
            instruments: RwLock::new(InstrumentCache::new()),
            rate_limiter,
        })
    }

    /// Browser URL where the user signs in to obtain a request token
    pub fn login_url(&self) -> String {
        format!(
            "{}?v={}&api_key={}",
            self.config.login_url, KITE_VERSION, self.credentials.api_key
        )
    }

    /// SHA-256 of `api_key + request_token + api_secret`, hex encoded
    pub fn checksum(&self, request_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.credentials.api_key.as_bytes());
        hasher.update(request_token.as_bytes());
        hasher.update(self.credentials.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Exchange a request token for an access token
    pub async fn generate_session(
        &mut self,
        request_token: &str,
        today: NaiveDate,
    ) -> Result<KiteSession, BrokerError> {
        let request_token = request_token.trim();
        if request_token.is_empty() {
            return Err(BrokerError::Auth("request token is required".to_string()));
        }

        let form = [
            ("api_key", self.credentials.api_key.clone()),
            ("request_token", request_token.to_string()),
            ("checksum", self.checksum(request_token)),
        ];

        let url = format!("{}/session/token", self.config.base_url);
        let request = self
            .client
            .post(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .form(&form);

        let data: SessionData = match self.send(request).await? {
            Ok(data) => data,
            Err(reason) => return Err(BrokerError::Auth(reason)),
        };

        let session = KiteSession {
            access_token: data.access_token,
            user_id: data.user_id,
            created_on: today,
        };

        tracing::info!(user_id = %session.user_id, "Session token generated");
        self.session = Some(session.clone());
        Ok(session)
    }

    pub fn set_session(&mut self, session: KiteSession) {
        self.session = Some(session);
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// Snapshot of the instrument cache
    pub fn instruments(&self) -> InstrumentCache {
        self.instruments
            .read()
            .map(|cache| cache.clone())
            .unwrap_or_default()
    }

    pub fn set_instruments(&self, cache: InstrumentCache) {
        match self.instruments.write() {
            Ok(mut guard) => *guard = cache,
            Err(e) => tracing::error!("Instrument cache lock poisoned: {}", e),
        }
    }

    /// Rebuild the instrument cache from the broker's instrument dumps
    ///
    /// Tries the exchange dump, the full dump and the F&O dump in turn. When
    /// all of them fail the fallback instruments are installed and the result
    /// is reported as degraded rather than as an error.
    pub async fn refresh_instruments(&self) -> InstrumentRefresh {
        let urls = [
            format!("{}/instruments/{}", self.config.base_url, self.config.exchange),
            format!("{}/instruments", self.config.base_url),
            format!("{}/instruments/NFO", self.config.base_url),
        ];

        for url in &urls {
            tracing::info!("Fetching instruments from {}", url);

            match self.fetch_instrument_dump(url).await {
                Ok(Some(cache)) => {
                    let count = cache.len();
                    self.set_instruments(cache);
                    tracing::info!("Loaded {} instruments from {}", count, url);
                    return InstrumentRefresh::Live { count };
                }
                Ok(None) => {
                    tracing::warn!("No usable instruments in response from {}", url);
                }
                Err(e) => {
                    tracing::warn!("Instrument fetch from {} failed: {}", url, e);
                }
            }
        }

        tracing::error!("Failed to fetch instruments from all URLs, using fallback list");
        let cache = InstrumentCache::fallback();
        let count = cache.len();
        self.set_instruments(cache);
        InstrumentRefresh::Degraded { count }
    }

    /// Refresh instruments and keep `path` in step with the result
    ///
    /// A live refresh is written to `path`. When every endpoint fails, a
    /// non-empty cache previously saved at `path` replaces the placeholder
    /// list, and the saved file is never overwritten by placeholders.
    pub async fn sync_instruments(&self, path: &Path) -> InstrumentRefresh {
        let refresh = self.refresh_instruments().await;

        if let InstrumentRefresh::Live { .. } = refresh {
            if let Err(e) = self.instruments().save_csv(path) {
                tracing::warn!("Failed to save instruments: {}", e);
            }
            return refresh;
        }

        match InstrumentCache::load_csv(path) {
            Ok(saved) if !saved.is_empty() => {
                let count = saved.len();
                self.set_instruments(saved);
                tracing::warn!(
                    "⚠️  Using {} saved instruments from {}, tokens may be stale",
                    count,
                    path.display()
                );
                InstrumentRefresh::Saved { count }
            }
            Ok(_) => {
                tracing::warn!("Saved instruments at {} are empty", path.display());
                refresh
            }
            Err(e) => {
                tracing::warn!("No saved instruments to fall back on: {:#}", e);
                refresh
            }
        }
    }

    async fn fetch_instrument_dump(&self, url: &str) -> Result<Option<InstrumentCache>, BrokerError> {
        let request = self.authorized(self.client.get(url))?;
        self.rate_limiter.until_ready().await;

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "instrument dump"));
        }

        let body = response.text().await?;
        if !body.starts_with(INSTRUMENT_DUMP_HEADER) {
            return Ok(None);
        }
        Ok(InstrumentCache::parse_dump(&body))
    }

    /// Last traded price for a symbol on the configured exchange
    pub async fn get_ltp(&self, symbol: &str) -> Result<f64, BrokerError> {
        let key = format!("{}:{}", self.config.exchange, symbol);
        let url = format!("{}/quote/ltp", self.config.base_url);
        let request = self.authorized(self.client.get(&url).query(&[("i", &key)]))?;

        let mut data: HashMap<String, LtpData> = self
            .send(request)
            .await?
            .map_err(|reason| BrokerError::Rejected { reason })?;

        data.remove(&key)
            .map(|quote| quote.last_price)
            .ok_or(BrokerError::EmptyData(key))
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, BrokerError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| BrokerError::Auth("not logged in".to_string()))?;

        Ok(request.header("X-Kite-Version", KITE_VERSION).header(
            "Authorization",
            format!("token {}:{}", self.credentials.api_key, session.access_token),
        ))
    }

    /// Send a request and unwrap the `{status, data}` envelope
    ///
    /// The outer error covers transport, auth and decoding failures. The
    /// inner `Err` carries the broker's message for an API-level refusal so
    /// the caller can classify it.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Result<T, String>, BrokerError> {
        self.rate_limiter.until_ready().await;
        let response = request.send().await?;
        decode_envelope(response).await
    }
}

async fn decode_envelope<T: DeserializeOwned>(
    response: Response,
) -> Result<Result<T, String>, BrokerError> {
    let status = response.status();
    let body = response.text().await?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BrokerError::Auth(format!("HTTP {}: {}", status, body)));
    }
    if status.is_server_error() {
        return Err(status_error(status, &body));
    }

    let envelope: KiteResponse<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => return Err(status_error(status, &body)),
        Err(e) => return Err(e.into()),
    };

    if envelope.error_type.as_deref() == Some("TokenException") {
        return Err(BrokerError::Auth(
            envelope.message.unwrap_or_else(|| "token rejected".to_string()),
        ));
    }

    if envelope.status != "success" {
        return Ok(Err(envelope
            .message
            .unwrap_or_else(|| format!("HTTP {}", status))));
    }

    envelope
        .data
        .map(Ok)
        .ok_or_else(|| BrokerError::Decode("response has no data field".to_string()))
}

fn status_error(status: StatusCode, context: &str) -> BrokerError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        BrokerError::Auth(format!("HTTP {}", status))
    } else {
        BrokerError::Network(format!("HTTP {} for {}", status, context))
    }
}

/// Convert `[timestamp, open, high, low, close, volume, oi?]` rows
fn parse_candles(rows: Vec<Vec<serde_json::Value>>) -> Result<Vec<Candle>, BrokerError> {
    rows.into_iter().map(parse_candle).collect()
}

fn parse_candle(row: Vec<serde_json::Value>) -> Result<Candle, BrokerError> {
    if row.len() < 6 {
        return Err(BrokerError::Decode(format!(
            "candle has {} fields, expected at least 6",
            row.len()
        )));
    }

    let number = |i: usize| {
        row[i]
            .as_f64()
            .ok_or_else(|| BrokerError::Decode(format!("candle field {} is not a number", i)))
    };

    let timestamp = row[0]
        .as_str()
        .ok_or_else(|| BrokerError::Decode("candle timestamp is not a string".to_string()))
        .and_then(parse_timestamp)?;

    Ok(Candle {
        timestamp,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)? as u64,
        open_interest: row.get(6).and_then(|v| v.as_f64()).map(|oi| oi as u64),
    })
}

/// Kite timestamps look like `2025-07-18T11:58:12+0530`
fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, BrokerError> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|e| BrokerError::Decode(format!("timestamp '{}': {}", raw, e)))
}

fn format_price(price: f64) -> String {
    format!("{:.2}", price)
}

#[async_trait]
impl Broker for KiteClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Candle>, BrokerError> {
        let token = self
            .resolve_instrument_token(symbol)
            .ok_or_else(|| BrokerError::UnknownInstrument(symbol.to_string()))?;

        let url = format!(
            "{}/instruments/historical/{}/{}",
            self.config.base_url, token, timeframe
        );
        let query = [
            ("from", from.format(DATE_FORMAT).to_string()),
            ("to", to.format(DATE_FORMAT).to_string()),
            ("oi", "1".to_string()),
        ];
        let request = self.authorized(self.client.get(&url).query(&query))?;

        tracing::debug!(symbol = %symbol, %timeframe, "Fetching historical data");

        let data: HistoricalData = self
            .send(request)
            .await?
            .map_err(|reason| BrokerError::Rejected { reason })?;

        if data.candles.is_empty() {
            return Err(BrokerError::EmptyData(symbol.to_string()));
        }

        parse_candles(data.candles)
    }

    async fn place_bracket_leg(&self, leg: &BracketLeg) -> Result<String, BrokerError> {
        let tag = match leg.role {
            LegRole::Entry => format!("TradingBot_{}", leg.side),
            LegRole::StopLoss => "TradingBot_SL".to_string(),
            LegRole::Target => "TradingBot_TARGET".to_string(),
        };

        let mut form = vec![
            ("tradingsymbol", leg.symbol.clone()),
            ("exchange", self.config.exchange.clone()),
            ("transaction_type", leg.side.to_string()),
            ("order_type", leg.kind.as_str().to_string()),
            ("quantity", leg.quantity.to_string()),
            ("product", self.config.product.clone()),
            ("validity", "DAY".to_string()),
            ("tag", tag),
        ];
        match leg.kind {
            OrderKind::Market => {}
            OrderKind::Limit => form.push(("price", format_price(leg.price))),
            OrderKind::StopLoss => {
                form.push(("price", format_price(leg.price)));
                form.push(("trigger_price", format_price(leg.price)));
            }
        }

        let url = format!("{}/orders/regular", self.config.base_url);
        let request = self.authorized(self.client.post(&url).form(&form))?;

        tracing::info!(
            symbol = %leg.symbol,
            side = %leg.side,
            kind = leg.kind.as_str(),
            price = leg.price,
            quantity = leg.quantity,
            "Placing {} order",
            leg.role.as_str()
        );

        let data: OrderData = self
            .send(request)
            .await?
            .map_err(|reason| BrokerError::Rejected { reason })?;

        Ok(data.order_id)
    }

    fn resolve_instrument_token(&self, symbol: &str) -> Option<String> {
        self.instruments
            .read()
            .ok()?
            .token(symbol)
            .map(str::to_string)
    }
}
