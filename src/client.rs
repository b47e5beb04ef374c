//! Client facade: the composition root wiring the HTTP engine, decoders,
//! normalizer, FX sub-pipeline, and publish layer behind one operation per
//! endpoint. The facade is reentrant; all shared state lives in the named
//! caches it owns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{FeedConfig, FxProviderKind};
use crate::ctx::Ctx;
use crate::decimal::Decimal;
use crate::emit::{encode_bars, encode_fundamentals, encode_quote, PayloadKind};
use crate::errors::FeedError;
use crate::fx::{
    convert_bar_batch, convert_fundamentals, convert_market, convert_quote, FxMeta, FxProvider,
    FxService, WebFxProvider,
};
use crate::httpx::HttpEngine;
use crate::models::{
    AdjustmentPolicy, BarBatch, CompanyInfo, FundamentalsSnapshot, Interval, MarketData, Meta,
    QuoteSnapshot,
};
use crate::normalize;
use crate::publish::{PublishBackend, PublishPlan, PublishReceipt, Publisher};
use crate::yahoo::chart::{chart_url, decode_chart, ChartEnvelope, ChartQuery, ChartResult};
use crate::yahoo::fundamentals::{decode_fundamentals, fundamentals_url, QuoteSummaryEnvelope};
use crate::yahoo::quote::{quote_query, synthesize};

pub struct FeedClient {
    config: FeedConfig,
    engine: Arc<HttpEngine>,
    fx: FxService,
    publisher: Publisher,
}

impl FeedClient {
    /// Build with the default (log-only) publish backend.
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        Self::with_backend(config, PublishBackend::Log)
    }

    /// Build with an explicit publish backend; the seam tests and
    /// embedders use to capture published frames.
    pub fn with_backend(config: FeedConfig, backend: PublishBackend) -> Result<Self, FeedError> {
        config.validate()?;
        let engine = Arc::new(HttpEngine::new(config.http.clone())?);

        // The FX provider runs its own engine with its own budget.
        let provider = match config.fx.provider {
            FxProviderKind::None => FxProvider::Disabled,
            FxProviderKind::Web => {
                let fx_engine = Arc::new(HttpEngine::new(config.fx.http.clone())?);
                FxProvider::Web(WebFxProvider::new(fx_engine, config.fx.rate_scale))
            }
        };
        let fx = FxService::new(&config.fx, provider);

        let publisher = Publisher::new(config.publish.clone(), config.schema_major(), backend)?;

        info!(
            base_url = %config.http.base_url,
            fx_provider = config.fx.provider.as_str(),
            publish_enabled = config.publish.enabled,
            "feed_client_ready"
        );
        Ok(Self {
            config,
            engine,
            fx,
            publisher,
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn engine(&self) -> &HttpEngine {
        &self.engine
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn meta(&self, run_id: &str) -> Meta {
        Meta {
            run_id: run_id.to_string(),
            source: self.config.source.clone(),
            producer: self.config.producer.clone(),
            schema_version: self.config.schema_version.clone(),
        }
    }

    fn ensure_interval_allowed(&self, interval: Interval) -> Result<(), FeedError> {
        if !self.config.markets.allowed_intervals.contains(&interval) {
            return Err(FeedError::Validation {
                message: format!(
                    "interval {} is not in the allowed set for this profile",
                    interval.as_str()
                ),
            });
        }
        Ok(())
    }

    fn policy_for(&self, adjusted: bool) -> Result<AdjustmentPolicy, FeedError> {
        if !adjusted {
            return Ok(AdjustmentPolicy::Raw);
        }
        match self.config.markets.default_adjustment_policy {
            AdjustmentPolicy::Raw => Err(FeedError::Validation {
                message: "adjusted bars requested but the default adjustment policy is raw"
                    .to_string(),
            }),
            policy => Ok(policy),
        }
    }

    fn validate_currency(code: &str) -> Result<(), FeedError> {
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(FeedError::Validation {
                message: format!("currency code {code:?} must be three uppercase letters"),
            });
        }
        Ok(())
    }

    async fn fetch_chart(
        &self,
        ctx: &Ctx,
        query: &ChartQuery,
    ) -> Result<ChartResult, FeedError> {
        let url = chart_url(self.engine.base_url(), query);
        let envelope: ChartEnvelope = self.engine.get_json(ctx, &url, &query.symbol).await?;
        decode_chart(envelope, "/v8/finance/chart")
    }

    async fn bars(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        adjusted: bool,
        run_id: &str,
    ) -> Result<BarBatch, FeedError> {
        self.ensure_interval_allowed(interval)?;
        if start >= end {
            return Err(FeedError::Validation {
                message: format!("start {start} must precede end {end}"),
            });
        }
        let policy = self.policy_for(adjusted)?;
        let query = ChartQuery {
            symbol: symbol.to_string(),
            period1: start.timestamp(),
            period2: end.timestamp(),
            interval,
        };
        let result = self.fetch_chart(ctx, &query).await?;
        normalize::bars_from_chart(&result, interval, policy, self.meta(run_id), Utc::now())
    }

    pub async fn daily_bars(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        run_id: &str,
    ) -> Result<BarBatch, FeedError> {
        self.bars(ctx, symbol, start, end, Interval::OneDay, adjusted, run_id)
            .await
    }

    pub async fn weekly_bars(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        run_id: &str,
    ) -> Result<BarBatch, FeedError> {
        self.bars(ctx, symbol, start, end, Interval::OneWeek, adjusted, run_id)
            .await
    }

    pub async fn monthly_bars(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        run_id: &str,
    ) -> Result<BarBatch, FeedError> {
        self.bars(ctx, symbol, start, end, Interval::OneMonth, adjusted, run_id)
            .await
    }

    pub async fn intraday_bars(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        run_id: &str,
    ) -> Result<BarBatch, FeedError> {
        if !interval.is_intraday() {
            return Err(FeedError::Validation {
                message: format!("{} is not an intraday interval", interval.as_str()),
            });
        }
        // Intraday series are never adjustment-adjusted.
        self.bars(ctx, symbol, start, end, interval, false, run_id).await
    }

    pub async fn quote(
        &self,
        ctx: &Ctx,
        symbol: &str,
        run_id: &str,
    ) -> Result<QuoteSnapshot, FeedError> {
        let now = Utc::now();
        let query = quote_query(symbol, now);
        let result = self.fetch_chart(ctx, &query).await?;
        let raw = synthesize(&result);
        normalize::quote_from_chart(&raw, self.meta(run_id), now)
    }

    pub async fn fundamentals(
        &self,
        ctx: &Ctx,
        symbol: &str,
        run_id: &str,
    ) -> Result<FundamentalsSnapshot, FeedError> {
        let url = fundamentals_url(self.engine.base_url(), symbol);
        let envelope: QuoteSummaryEnvelope = self.engine.get_json(ctx, &url, symbol).await?;
        let statements = decode_fundamentals(envelope, "/v10/finance/quoteSummary")?;
        // The quarterly modules do not carry a currency; statements are
        // reported in the filer's currency, USD for the covered venues.
        normalize::fundamentals_from_statements(
            symbol,
            &statements,
            "USD",
            self.meta(run_id),
            Utc::now(),
        )
    }

    pub async fn company_info(
        &self,
        ctx: &Ctx,
        symbol: &str,
        run_id: &str,
    ) -> Result<CompanyInfo, FeedError> {
        let query = quote_query(symbol, Utc::now());
        let result = self.fetch_chart(ctx, &query).await?;
        Ok(normalize::company_from_chart(&result, self.meta(run_id)))
    }

    pub async fn market_data(
        &self,
        ctx: &Ctx,
        symbol: &str,
        run_id: &str,
    ) -> Result<MarketData, FeedError> {
        let query = quote_query(symbol, Utc::now());
        let result = self.fetch_chart(ctx, &query).await?;
        normalize::market_from_chart(&result, self.meta(run_id), Utc::now())
    }

    /// Conversion was requested: fail before any fetch when no provider
    /// is configured.
    fn ensure_fx_available(&self) -> Result<(), FeedError> {
        if !self.fx.is_enabled() {
            return Err(FeedError::FxUnavailable {
                message: "fx provider is `none`; set the provider to `web` (or supply \
                          another provider) to enable currency conversion"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Rate for `base -> target` via the FX sub-pipeline.
    async fn rate_for(
        &self,
        ctx: &Ctx,
        base: &str,
        target: &str,
        at: DateTime<Utc>,
    ) -> Result<(Decimal, FxMeta), FeedError> {
        let targets = vec![target.to_string()];
        let (rates, fx_meta) = self.fx.rates(ctx, base, &targets, at).await?;
        let rate = rates
            .get(&target.to_uppercase())
            .copied()
            .ok_or_else(|| FeedError::Malformed {
                endpoint: "/v8/finance/chart".to_string(),
                message: format!("fx provider returned no rate for {base}->{target}"),
            })?;
        Ok((rate, fx_meta))
    }

    /// Synthetic FX meta for the no-op conversion (already in target
    /// currency).
    fn identity_fx_meta(&self) -> FxMeta {
        FxMeta {
            provider: self.fx.provider_id().to_string(),
            attempts: 0,
            backoff_profile: String::new(),
            cache_hit: false,
            stale: false,
            as_of: Utc::now(),
        }
    }

    /// Convert a fetched batch in place; no-op (identity meta) when it is
    /// already in the target currency.
    async fn convert_batch(
        &self,
        ctx: &Ctx,
        batch: &mut BarBatch,
        target_currency: &str,
    ) -> Result<FxMeta, FeedError> {
        let base = match batch.bars.first() {
            Some(bar) => bar.currency_code.clone(),
            None => return Ok(self.identity_fx_meta()),
        };
        if base == target_currency {
            return Ok(self.identity_fx_meta());
        }
        let (rate, fx_meta) = self.rate_for(ctx, &base, target_currency, Utc::now()).await?;
        convert_bar_batch(batch, rate, target_currency)?;
        Ok(fx_meta)
    }

    async fn bars_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        adjusted: bool,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(BarBatch, FxMeta), FeedError> {
        Self::validate_currency(target_currency)?;
        self.ensure_fx_available()?;
        let mut batch = self
            .bars(ctx, symbol, start, end, interval, adjusted, run_id)
            .await?;
        let fx_meta = self.convert_batch(ctx, &mut batch, target_currency).await?;
        Ok((batch, fx_meta))
    }

    pub async fn daily_bars_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(BarBatch, FxMeta), FeedError> {
        self.bars_converted(
            ctx,
            symbol,
            start,
            end,
            Interval::OneDay,
            adjusted,
            target_currency,
            run_id,
        )
        .await
    }

    pub async fn weekly_bars_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(BarBatch, FxMeta), FeedError> {
        self.bars_converted(
            ctx,
            symbol,
            start,
            end,
            Interval::OneWeek,
            adjusted,
            target_currency,
            run_id,
        )
        .await
    }

    pub async fn monthly_bars_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjusted: bool,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(BarBatch, FxMeta), FeedError> {
        self.bars_converted(
            ctx,
            symbol,
            start,
            end,
            Interval::OneMonth,
            adjusted,
            target_currency,
            run_id,
        )
        .await
    }

    pub async fn intraday_bars_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(BarBatch, FxMeta), FeedError> {
        if !interval.is_intraday() {
            return Err(FeedError::Validation {
                message: format!("{} is not an intraday interval", interval.as_str()),
            });
        }
        self.bars_converted(ctx, symbol, start, end, interval, false, target_currency, run_id)
            .await
    }

    pub async fn quote_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(QuoteSnapshot, FxMeta), FeedError> {
        Self::validate_currency(target_currency)?;
        self.ensure_fx_available()?;
        let mut quote = self.quote(ctx, symbol, run_id).await?;
        if quote.currency_code == target_currency {
            return Ok((quote, self.identity_fx_meta()));
        }
        let base = quote.currency_code.clone();
        let (rate, fx_meta) = self.rate_for(ctx, &base, target_currency, Utc::now()).await?;
        convert_quote(&mut quote, rate, target_currency)?;
        Ok((quote, fx_meta))
    }

    pub async fn fundamentals_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(FundamentalsSnapshot, FxMeta), FeedError> {
        Self::validate_currency(target_currency)?;
        self.ensure_fx_available()?;
        let mut snapshot = self.fundamentals(ctx, symbol, run_id).await?;
        let base = match snapshot.lines.first() {
            Some(line) => line.currency_code.clone(),
            None => return Ok((snapshot, self.identity_fx_meta())),
        };
        if base == target_currency {
            return Ok((snapshot, self.identity_fx_meta()));
        }
        let (rate, fx_meta) = self.rate_for(ctx, &base, target_currency, Utc::now()).await?;
        convert_fundamentals(&mut snapshot, rate, target_currency)?;
        Ok((snapshot, fx_meta))
    }

    pub async fn market_data_converted(
        &self,
        ctx: &Ctx,
        symbol: &str,
        target_currency: &str,
        run_id: &str,
    ) -> Result<(MarketData, FxMeta), FeedError> {
        Self::validate_currency(target_currency)?;
        self.ensure_fx_available()?;
        let mut market = self.market_data(ctx, symbol, run_id).await?;
        let base = match &market.currency_code {
            Some(code) => code.clone(),
            None => return Ok((market, self.identity_fx_meta())),
        };
        if base == target_currency {
            return Ok((market, self.identity_fx_meta()));
        }
        let (rate, fx_meta) = self.rate_for(ctx, &base, target_currency, Utc::now()).await?;
        convert_market(&mut market, rate, target_currency)?;
        Ok((market, fx_meta))
    }

    fn ensure_publish_enabled(&self) -> Result<(), FeedError> {
        if !self.config.publish.enabled {
            return Err(FeedError::Validation {
                message: "publishing is disabled; enable it in the publish configuration"
                    .to_string(),
            });
        }
        Ok(())
    }

    pub async fn publish_bars(
        &self,
        ctx: &Ctx,
        batch: &BarBatch,
    ) -> Result<PublishReceipt, FeedError> {
        self.ensure_publish_enabled()?;
        let payload = encode_bars(batch)?;
        self.publisher
            .publish(ctx, PayloadKind::Bars, &batch.security, &batch.meta, &payload)
            .await
    }

    pub async fn publish_quote(
        &self,
        ctx: &Ctx,
        quote: &QuoteSnapshot,
    ) -> Result<PublishReceipt, FeedError> {
        self.ensure_publish_enabled()?;
        let payload = encode_quote(quote)?;
        self.publisher
            .publish(ctx, PayloadKind::Quotes, &quote.security, &quote.meta, &payload)
            .await
    }

    pub async fn publish_fundamentals(
        &self,
        ctx: &Ctx,
        snapshot: &FundamentalsSnapshot,
    ) -> Result<PublishReceipt, FeedError> {
        self.ensure_publish_enabled()?;
        let payload = encode_fundamentals(snapshot)?;
        self.publisher
            .publish(
                ctx,
                PayloadKind::Fundamentals,
                &snapshot.security,
                &snapshot.meta,
                &payload,
            )
            .await
    }

    /// Dry-run: full publish plan, no wire send.
    pub fn preview_bars(&self, batch: &BarBatch) -> Result<PublishPlan, FeedError> {
        let payload = encode_bars(batch)?;
        Ok(self
            .publisher
            .preview(PayloadKind::Bars, &batch.security, &batch.meta, &payload))
    }

    pub fn preview_quote(&self, quote: &QuoteSnapshot) -> Result<PublishPlan, FeedError> {
        let payload = encode_quote(quote)?;
        Ok(self
            .publisher
            .preview(PayloadKind::Quotes, &quote.security, &quote.meta, &payload))
    }

    pub fn preview_fundamentals(
        &self,
        snapshot: &FundamentalsSnapshot,
    ) -> Result<PublishPlan, FeedError> {
        let payload = encode_fundamentals(snapshot)?;
        Ok(self.publisher.preview(
            PayloadKind::Fundamentals,
            &snapshot.security,
            &snapshot.meta,
            &payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Security;
    use chrono::TimeZone;

    fn client() -> FeedClient {
        FeedClient::new(FeedConfig::default()).unwrap()
    }

    fn sample_batch(client: &FeedClient) -> BarBatch {
        BarBatch {
            security: Security::new("AAPL").with_mic("XNAS").unwrap(),
            interval: Interval::OneDay,
            adjustment_policy: AdjustmentPolicy::SplitDividend,
            bars: Vec::new(),
            dividends: Vec::new(),
            splits: Vec::new(),
            meta: client.meta("run-1"),
        }
    }

    #[tokio::test]
    async fn test_interval_gating_default_profile() {
        let client = client();
        let ctx = Ctx::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();
        // Default profile allows only 1d.
        let err = client
            .weekly_bars(&ctx, "AAPL", start, end, true, "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_intraday_rejects_calendar_interval() {
        let client = client();
        let ctx = Ctx::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let err = client
            .intraday_bars(&ctx, "AAPL", start, end, Interval::OneDay, "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_bad_range_rejected() {
        let client = client();
        let ctx = Ctx::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let err = client
            .daily_bars(&ctx, "AAPL", start, end, true, "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_conversion_rejects_bad_currency() {
        let client = client();
        let ctx = Ctx::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let err = client
            .daily_bars_converted(&ctx, "AAPL", start, end, true, "usd", "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_conversion_with_none_provider_fails_before_fetch() {
        let client = client();
        let ctx = Ctx::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let err = client
            .daily_bars_converted(&ctx, "AAPL", start, end, true, "USD", "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::FxUnavailable { .. }));
        // Nothing reached the engine.
        assert_eq!(client.engine().metrics().snapshot().attempts, 0);
    }

    #[tokio::test]
    async fn test_publish_disabled_by_default() {
        let client = client();
        let ctx = Ctx::background();
        let batch = sample_batch(&client);
        let err = client.publish_bars(&ctx, &batch).await.unwrap_err();
        assert!(matches!(err, FeedError::Validation { .. }));
    }

    #[test]
    fn test_preview_works_while_publish_disabled() {
        let client = client();
        let batch = sample_batch(&client);
        let plan = client.preview_bars(&batch).unwrap();
        assert_eq!(plan.topic, "equifeed.bars.v1.dev");
        assert_eq!(plan.partition_key, "XNAS.AAPL");
        assert_eq!(plan.chunk_sizes.len(), 1);
    }

    #[test]
    fn test_adjusted_with_raw_default_policy_rejected() {
        let mut config = FeedConfig::default();
        config.markets.default_adjustment_policy = AdjustmentPolicy::Raw;
        let client = FeedClient::new(config).unwrap();
        assert!(client.policy_for(true).is_err());
        assert_eq!(client.policy_for(false).unwrap(), AdjustmentPolicy::Raw);
    }
}
