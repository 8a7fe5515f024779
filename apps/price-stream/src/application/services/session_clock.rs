//! US trading calendar cache.
//!
//! Session computation needs to know which dates trade. The calendar is
//! fetched through the [`TradingCalendar`] port for a short window starting
//! at today's Eastern date and cached until the date rolls over. A failed
//! fetch yields [`TradingDays::Unavailable`] and is retried after a short
//! delay rather than on every call.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::application::ports::TradingCalendar;
use crate::domain::exchange::US;
use crate::domain::session::{SessionStatus, TradingDays, compute_session_status};

/// Days of calendar fetched beyond today.
const LOOKAHEAD_DAYS: i64 = 14;

/// Delay before retrying a failed calendar fetch.
const RETRY_AFTER: TimeDelta = TimeDelta::seconds(60);

#[derive(Debug, Clone)]
enum Cached {
    Known { date: NaiveDate, days: TradingDays },
    Unavailable { until: DateTime<Utc> },
}

/// Cached view of the US trading calendar.
pub struct SessionClock {
    calendar: Arc<dyn TradingCalendar>,
    cache: Mutex<Option<Cached>>,
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("cache", &*self.cache.lock())
            .finish_non_exhaustive()
    }
}

impl SessionClock {
    /// Create a clock backed by a calendar port.
    #[must_use]
    pub fn new(calendar: Arc<dyn TradingCalendar>) -> Self {
        Self {
            calendar,
            cache: Mutex::new(None),
        }
    }

    /// Trading days around `now`, from cache when fresh.
    pub async fn trading_days(&self, now: DateTime<Utc>) -> TradingDays {
        let today = now.with_timezone(&US.hours.timezone).date_naive();

        let cached = self.cache.lock().clone();
        match cached {
            Some(Cached::Known { date, days }) if date == today => return days,
            Some(Cached::Unavailable { until }) if now < until => {
                return TradingDays::Unavailable;
            }
            _ => {}
        }

        let end = today + TimeDelta::days(LOOKAHEAD_DAYS);
        let (entry, days) = match self.calendar.trading_days(today, end).await {
            Ok(dates) => {
                let days = TradingDays::Known(dates.into_iter().collect());
                (
                    Cached::Known {
                        date: today,
                        days: days.clone(),
                    },
                    days,
                )
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Trading calendar unavailable, assuming today trades"
                );
                (
                    Cached::Unavailable {
                        until: now + RETRY_AFTER,
                    },
                    TradingDays::Unavailable,
                )
            }
        };

        *self.cache.lock() = Some(entry);
        days
    }

    /// Global US session status at `now`, with the calendar used.
    pub async fn us_status(&self, now: DateTime<Utc>) -> (SessionStatus, TradingDays) {
        let days = self.trading_days(now).await;
        let status = compute_session_status(&US.hours, now, &days);
        (status, days)
    }
}
