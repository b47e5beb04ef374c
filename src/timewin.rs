//! UTC bar-window construction and validation.
//!
//! Upstream timestamps mark the close of a trading session. Daily windows
//! are anchored to the UTC midnight of the trading day so that
//! `end - start` is exactly 24h for every daily bar, independent of the
//! venue's local close time.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, TimeZone, Utc};

use crate::errors::FeedError;
use crate::models::{Bar, BarBatch, Interval};

/// Start/end/event triple for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
}

fn utc_from_epoch(epoch: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| FeedError::Validation {
            message: format!("epoch {epoch} is not a valid UTC timestamp"),
        })
}

fn midnight_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), 0, 0, 0)
        .single()
        .expect("midnight of a valid date is always valid")
}

/// Daily window for a session-close timestamp. A close stamped exactly at
/// midnight belongs to the prior day, so the trading day is taken from
/// `close - 1s`.
pub fn daily_window(close_epoch: i64) -> Result<BarWindow, FeedError> {
    let close = utc_from_epoch(close_epoch)?;
    let start = midnight_of(close - ChronoDuration::seconds(1));
    let end = start + ChronoDuration::hours(24);
    Ok(BarWindow {
        start,
        end,
        event_time: end,
    })
}

/// Window for any supported cadence. Intraday timestamps mark the bar
/// open; daily/weekly/monthly timestamps mark the session close.
pub fn window_for(interval: Interval, epoch: i64) -> Result<BarWindow, FeedError> {
    match interval {
        Interval::OneDay => daily_window(epoch),
        Interval::OneWeek => {
            let start = midnight_of(utc_from_epoch(epoch)?);
            let end = start + ChronoDuration::days(7);
            Ok(BarWindow {
                start,
                end,
                event_time: end,
            })
        }
        Interval::OneMonth => {
            let start = midnight_of(utc_from_epoch(epoch)?);
            let end = start
                .checked_add_months(Months::new(1))
                .ok_or_else(|| FeedError::Validation {
                    message: format!("monthly window overflows for epoch {epoch}"),
                })?;
            Ok(BarWindow {
                start,
                end,
                event_time: end,
            })
        }
        intraday => {
            let start = utc_from_epoch(epoch)?;
            let span = intraday
                .fixed_duration()
                .expect("intraday intervals have a fixed duration");
            let end = start + ChronoDuration::from_std(span).expect("interval spans are small");
            Ok(BarWindow {
                start,
                end,
                event_time: end,
            })
        }
    }
}

/// Enforce the per-bar window invariants. Daily bars must span exactly 24h
/// with `event_time == end`.
pub fn validate_bar(bar: &Bar, interval: Interval) -> Result<(), FeedError> {
    if bar.end <= bar.start {
        return Err(FeedError::Validation {
            message: format!("bar end {} not after start {}", bar.end, bar.start),
        });
    }
    if interval == Interval::OneDay {
        if bar.end - bar.start != ChronoDuration::hours(24) {
            return Err(FeedError::Validation {
                message: format!(
                    "daily bar window is {}s, expected 86400s",
                    (bar.end - bar.start).num_seconds()
                ),
            });
        }
        if bar.event_time != bar.end {
            return Err(FeedError::Validation {
                message: "daily bar event_time must equal end".to_string(),
            });
        }
    }
    if bar.adjusted != (bar.adjustment_policy != crate::models::AdjustmentPolicy::Raw) {
        return Err(FeedError::Validation {
            message: "adjusted flag inconsistent with adjustment policy".to_string(),
        });
    }
    Ok(())
}

/// Batch-level invariants: shared policy, strictly increasing starts.
pub fn validate_batch(batch: &BarBatch) -> Result<(), FeedError> {
    let mut prev: Option<DateTime<Utc>> = None;
    for bar in &batch.bars {
        validate_bar(bar, batch.interval)?;
        if bar.adjustment_policy != batch.adjustment_policy {
            return Err(FeedError::Validation {
                message: "bars in a batch must share the adjustment policy".to_string(),
            });
        }
        if let Some(p) = prev {
            if bar.start <= p {
                return Err(FeedError::Validation {
                    message: format!(
                        "bar starts must be strictly increasing ({} after {})",
                        bar.start, p
                    ),
                });
            }
        }
        prev = Some(bar.start);
    }
    Ok(())
}
