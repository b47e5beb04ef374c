//! FX sub-pipeline: provider variants, cache mediation, conversion math.
//!
//! Providers are sealed variants behind one dispatch type. `Disabled`
//! fails every call; `Web` reads pair rates from the same chart endpoint
//! used for bars, via the `{BASE}{TARGET}=X` symbol convention.

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::FxConfig;
use crate::ctx::Ctx;
use crate::decimal::Decimal;
use crate::errors::FeedError;
use crate::httpx::HttpEngine;
use crate::models::{BarBatch, QuoteSnapshot};
use crate::normalize::scale_for_currency;
use crate::yahoo::chart::{chart_url, decode_chart, ChartEnvelope};
use crate::yahoo::quote::quote_query;

pub use cache::{FxCache, FxEntry, FxKey};

/// Rates for one lookup, plus the provider's data time.
#[derive(Debug, Clone)]
pub struct FxQuote {
    pub rates: HashMap<String, Decimal>,
    pub as_of: DateTime<Utc>,
    /// Underlying transport requests performed.
    pub attempts: u32,
}

/// Per-conversion provenance handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxMeta {
    pub provider: String,
    pub attempts: u32,
    pub backoff_profile: String,
    pub cache_hit: bool,
    pub stale: bool,
    pub as_of: DateTime<Utc>,
}

/// Web provider: one chart fetch per requested pair.
#[derive(Debug)]
pub struct WebFxProvider {
    engine: Arc<HttpEngine>,
    rate_scale: u32,
}

impl WebFxProvider {
    pub fn new(engine: Arc<HttpEngine>, rate_scale: u32) -> Self {
        Self { engine, rate_scale }
    }

    async fn pair_rate(
        &self,
        ctx: &Ctx,
        base: &str,
        target: &str,
        at: DateTime<Utc>,
    ) -> Result<(Decimal, Option<i64>), FeedError> {
        let pair = format!("{base}{target}=X");
        let query = quote_query(&pair, at);
        let url = chart_url(self.engine.base_url(), &query);
        let envelope: ChartEnvelope = self.engine.get_json(ctx, &url, &pair).await?;
        let result = decode_chart(envelope, "/v8/finance/chart")?;
        let meta = &result.meta;
        let price = meta
            .regular_market_price
            .or(meta.previous_close)
            .or(meta.chart_previous_close)
            .ok_or_else(|| FeedError::Malformed {
                endpoint: "/v8/finance/chart".to_string(),
                message: format!("no usable rate for {pair}"),
            })?;
        Ok((
            Decimal::from_f64(price, self.rate_scale)?,
            meta.regular_market_time,
        ))
    }

    pub async fn rates(
        &self,
        ctx: &Ctx,
        base: &str,
        targets: &[String],
        at: DateTime<Utc>,
    ) -> Result<FxQuote, FeedError> {
        let mut rates = HashMap::with_capacity(targets.len());
        let mut as_of = at;
        let mut attempts = 0u32;
        for target in targets {
            if target.eq_ignore_ascii_case(base) {
                rates.insert(target.to_uppercase(), Decimal::new(1, 0)?);
                continue;
            }
            let (rate, market_time) = self.pair_rate(ctx, base, target, at).await?;
            attempts += 1;
            if let Some(epoch) = market_time {
                if let chrono::LocalResult::Single(t) =
                    chrono::TimeZone::timestamp_opt(&Utc, epoch, 0)
                {
                    as_of = as_of.min(t);
                }
            }
            rates.insert(target.to_uppercase(), rate);
        }
        Ok(FxQuote {
            rates,
            as_of,
            attempts,
        })
    }
}

/// Sealed provider dispatch.
#[derive(Debug)]
pub enum FxProvider {
    Disabled,
    Web(WebFxProvider),
}

impl FxProvider {
    pub fn id(&self) -> &'static str {
        match self {
            FxProvider::Disabled => "none",
            FxProvider::Web(_) => "web",
        }
    }

    pub async fn rates(
        &self,
        ctx: &Ctx,
        base: &str,
        targets: &[String],
        at: DateTime<Utc>,
    ) -> Result<FxQuote, FeedError> {
        match self {
            FxProvider::Disabled => Err(FeedError::FxUnavailable {
                message: "fx provider is `none`; set the provider to `web` (or supply \
                          another provider) to enable currency conversion"
                    .to_string(),
            }),
            FxProvider::Web(provider) => provider.rates(ctx, base, targets, at).await,
        }
    }
}

/// Cache-mediated FX entry point used by the conversion variants.
#[derive(Debug)]
pub struct FxService {
    provider: FxProvider,
    cache: FxCache,
    cache_ttl: chrono::Duration,
    rate_scale: u32,
    timeout: Duration,
    backoff_profile: String,
}

impl FxService {
    pub fn new(config: &FxConfig, provider: FxProvider) -> Self {
        let ttl = Duration::from_millis(config.cache_ttl_ms);
        Self {
            provider,
            cache: FxCache::new(ttl),
            cache_ttl: chrono::Duration::milliseconds(config.cache_ttl_ms as i64),
            rate_scale: config.rate_scale,
            timeout: Duration::from_millis(config.timeout_ms),
            backoff_profile: format!(
                "{}ms*2^k<= {}ms +-{:.0}%",
                config.http.backoff_base_ms,
                config.http.max_delay_ms,
                config.http.backoff_jitter * 100.0
            ),
        }
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    /// Whether a real provider is configured. Conversion variants check
    /// this up front so a `none` provider fails before any fetch.
    pub fn is_enabled(&self) -> bool {
        !matches!(self.provider, FxProvider::Disabled)
    }

    pub fn rate_scale(&self) -> u32 {
        self.rate_scale
    }

    /// Rates for `base` against `targets` at time `at`, via the cache.
    pub async fn rates(
        &self,
        ctx: &Ctx,
        base: &str,
        targets: &[String],
        at: DateTime<Utc>,
    ) -> Result<(HashMap<String, Decimal>, FxMeta), FeedError> {
        let key = FxKey::new(base, targets, at);
        let now = Utc::now();

        if let Some(entry) = self.cache.get(&key, now) {
            debug!(base, "fx_cache_hit");
            let stale = now - entry.as_of > self.cache_ttl;
            return Ok((
                entry.rates,
                FxMeta {
                    provider: self.provider.id().to_string(),
                    attempts: 0,
                    backoff_profile: self.backoff_profile.clone(),
                    cache_hit: true,
                    stale,
                    as_of: entry.as_of,
                },
            ));
        }

        let call_ctx = ctx.child_timeout(self.timeout);
        let quote = self
            .provider
            .rates(&call_ctx, base, key.targets(), at)
            .await?;
        self.cache
            .insert(key, quote.rates.clone(), quote.as_of, now);
        let stale = now - quote.as_of > self.cache_ttl;
        Ok((
            quote.rates,
            FxMeta {
                provider: self.provider.id().to_string(),
                attempts: quote.attempts,
                backoff_profile: self.backoff_profile.clone(),
                cache_hit: false,
                stale,
                as_of: quote.as_of,
            },
        ))
    }
}

/// One converted monetary value at the target currency's scale.
pub fn convert_decimal(
    value: Decimal,
    rate: Decimal,
    target_currency: &str,
) -> Result<Decimal, FeedError> {
    value.mul_round(rate, scale_for_currency(target_currency))
}

/// Convert every monetary field of a bar batch in place. Volumes are
/// never converted.
pub fn convert_bar_batch(
    batch: &mut BarBatch,
    rate: Decimal,
    target_currency: &str,
) -> Result<(), FeedError> {
    for bar in &mut batch.bars {
        bar.open = convert_decimal(bar.open, rate, target_currency)?;
        bar.high = convert_decimal(bar.high, rate, target_currency)?;
        bar.low = convert_decimal(bar.low, rate, target_currency)?;
        bar.close = convert_decimal(bar.close, rate, target_currency)?;
        bar.currency_code = target_currency.to_string();
    }
    for dividend in &mut batch.dividends {
        dividend.amount = convert_decimal(dividend.amount, rate, target_currency)?;
        dividend.currency_code = target_currency.to_string();
    }
    Ok(())
}

/// Convert every fundamentals line in place.
pub fn convert_fundamentals(
    snapshot: &mut crate::models::FundamentalsSnapshot,
    rate: Decimal,
    target_currency: &str,
) -> Result<(), FeedError> {
    for line in &mut snapshot.lines {
        line.value = convert_decimal(line.value, rate, target_currency)?;
        line.currency_code = target_currency.to_string();
    }
    Ok(())
}

/// Convert the monetary fields of a market snapshot in place.
pub fn convert_market(
    market: &mut crate::models::MarketData,
    rate: Decimal,
    target_currency: &str,
) -> Result<(), FeedError> {
    for field in [&mut market.regular_market_price, &mut market.previous_close] {
        if let Some(value) = field {
            *value = convert_decimal(*value, rate, target_currency)?;
        }
    }
    market.currency_code = Some(target_currency.to_string());
    Ok(())
}

/// Convert every monetary field of a quote in place.
pub fn convert_quote(
    quote: &mut QuoteSnapshot,
    rate: Decimal,
    target_currency: &str,
) -> Result<(), FeedError> {
    for field in [
        &mut quote.bid,
        &mut quote.ask,
        &mut quote.regular_market_price,
        &mut quote.regular_market_high,
        &mut quote.regular_market_low,
    ] {
        if let Some(value) = field {
            *value = convert_decimal(*value, rate, target_currency)?;
        }
    }
    quote.currency_code = target_currency.to_string();
    Ok(())
}
