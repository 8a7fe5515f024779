//! Trading Session Status
//!
//! Computes the trading phase of a venue from wall-clock time in the
//! venue's timezone and a view of its trading calendar.
//!
//! # US equities (Eastern Time)
//!
//! | Window          | Status        |
//! |-----------------|---------------|
//! | 04:00 - 09:30   | `pre-market`  |
//! | 09:30 - 16:00   | `open`        |
//! | 16:00 - 20:00   | `after-hours` |
//! | otherwise       | `overnight`   |
//!
//! Non-trading days are `closed`. Venues without extended hours report
//! `closed` outside their core session.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Trading phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketState {
    /// Core session.
    Open,
    /// Non-trading day, or outside hours on a venue without extended hours.
    Closed,
    /// Extended session before the open.
    PreMarket,
    /// Extended session after the close.
    AfterHours,
    /// Trading day, outside all sessions.
    Overnight,
}

impl MarketState {
    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::PreMarket => "pre-market",
            Self::AfterHours => "after-hours",
            Self::Overnight => "overnight",
        }
    }

    /// Human readable description.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Open => "Market is open",
            Self::Closed => "Market is closed",
            Self::PreMarket => "Pre-market trading",
            Self::AfterHours => "After-hours trading",
            Self::Overnight => "Overnight, market opens next trading day",
        }
    }
}

/// Session status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Current phase.
    pub status: MarketState,
    /// Display message.
    pub message: String,
    /// Start of the next core session, if known.
    pub next_open: Option<DateTime<Utc>>,
    /// End of the current or next core session, if known.
    pub next_close: Option<DateTime<Utc>>,
}

impl SessionStatus {
    /// Whether two snapshots describe the same phase.
    ///
    /// Only `(status, message)` participate; open/close times drift as the
    /// clock advances and must not trigger a rebroadcast.
    #[must_use]
    pub fn same_phase(&self, other: &Self) -> bool {
        self.status == other.status && self.message == other.message
    }
}

/// Session hours for a venue, as minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    /// Venue timezone.
    pub timezone: Tz,
    /// Start of the pre-market session.
    pub pre_market_start: u32,
    /// Core session open.
    pub open: u32,
    /// Core session close.
    pub close: u32,
    /// End of the after-hours session.
    pub after_hours_end: u32,
}

impl SessionHours {
    /// US equities, Eastern Time, with extended hours.
    pub const US_EQUITIES: Self = Self {
        timezone: chrono_tz::America::New_York,
        pre_market_start: 4 * 60,
        open: 9 * 60 + 30,
        close: 16 * 60,
        after_hours_end: 20 * 60,
    };

    /// Core-session-only hours.
    #[must_use]
    pub const fn core(timezone: Tz, open: u32, close: u32) -> Self {
        Self {
            timezone,
            pre_market_start: open,
            open,
            close,
            after_hours_end: close,
        }
    }

    /// Whether the venue has pre-market or after-hours sessions.
    #[must_use]
    pub const fn has_extended_hours(&self) -> bool {
        self.pre_market_start < self.open || self.after_hours_end > self.close
    }
}

/// What is known about the trading calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingDays {
    /// Known trading dates, covering some window around today.
    Known(BTreeSet<NaiveDate>),
    /// Calendar could not be fetched. Today is assumed to trade.
    Unavailable,
    /// No calendar for this venue. Monday to Friday trade.
    Weekdays,
}

impl TradingDays {
    /// Whether `date` is a trading day.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        match self {
            Self::Known(days) => days.contains(&date),
            Self::Unavailable => true,
            Self::Weekdays => is_weekday(date),
        }
    }

    /// First trading day strictly after `date`.
    #[must_use]
    pub fn next_trading_day_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Known(days) => date
                .succ_opt()
                .and_then(|from| days.range(from..).next().copied()),
            Self::Unavailable | Self::Weekdays => {
                let mut day = date.succ_opt()?;
                while !is_weekday(day) {
                    day = day.succ_opt()?;
                }
                Some(day)
            }
        }
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

// =============================================================================
// Computation
// =============================================================================

/// Compute the session status at `now`.
#[must_use]
pub fn compute_session_status(
    hours: &SessionHours,
    now: DateTime<Utc>,
    days: &TradingDays,
) -> SessionStatus {
    let local = now.with_timezone(&hours.timezone);
    let today = local.date_naive();
    let minute = local.hour() * 60 + local.minute();

    let next_day = days.next_trading_day_after(today);
    let today_open = local_instant(hours, today, hours.open);
    let today_close = local_instant(hours, today, hours.close);
    let next_open = next_day.and_then(|d| local_instant(hours, d, hours.open));
    let next_close = next_day.and_then(|d| local_instant(hours, d, hours.close));

    if !days.is_trading_day(today) {
        return status(MarketState::Closed, next_open, next_close);
    }

    if minute < hours.open {
        let state = if minute >= hours.pre_market_start && hours.pre_market_start < hours.open {
            MarketState::PreMarket
        } else if hours.has_extended_hours() {
            MarketState::Overnight
        } else {
            MarketState::Closed
        };
        return status(state, today_open, today_close);
    }

    if minute < hours.close {
        return status(MarketState::Open, next_open, today_close);
    }

    let state = if minute < hours.after_hours_end {
        MarketState::AfterHours
    } else if hours.has_extended_hours() {
        MarketState::Overnight
    } else {
        MarketState::Closed
    };
    status(state, next_open, next_close)
}

fn status(
    state: MarketState,
    next_open: Option<DateTime<Utc>>,
    next_close: Option<DateTime<Utc>>,
) -> SessionStatus {
    SessionStatus {
        status: state,
        message: state.message().to_string(),
        next_open,
        next_close,
    }
}

fn local_instant(hours: &SessionHours, date: NaiveDate, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)?;
    hours
        .timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    // 2026-03-10 is a Tuesday. US daylight saving (EDT, UTC-4) began 2026-03-08.
    fn et(hour: u32, minute: u32) -> DateTime<Utc> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 10, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> TradingDays {
        TradingDays::Known(
            [date(2026, 3, 10), date(2026, 3, 11), date(2026, 3, 13)]
                .into_iter()
                .collect(),
        )
    }

    #[test_case(3, 59 => MarketState::Overnight ; "before pre-market")]
    #[test_case(4, 0 => MarketState::PreMarket ; "pre-market start")]
    #[test_case(9, 29 => MarketState::PreMarket ; "just before open")]
    #[test_case(9, 30 => MarketState::Open ; "open bell")]
    #[test_case(15, 59 => MarketState::Open ; "just before close")]
    #[test_case(16, 0 => MarketState::AfterHours ; "close bell")]
    #[test_case(19, 59 => MarketState::AfterHours ; "late after-hours")]
    #[test_case(20, 0 => MarketState::Overnight ; "after-hours end")]
    fn us_thresholds(hour: u32, minute: u32) -> MarketState {
        compute_session_status(&SessionHours::US_EQUITIES, et(hour, minute), &calendar()).status
    }

    #[test]
    fn non_trading_day_is_closed() {
        let now = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 12, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let status = compute_session_status(&SessionHours::US_EQUITIES, now, &calendar());
        assert_eq!(status.status, MarketState::Closed);
        assert_eq!(status.next_open, Some(et(9, 30) + chrono::TimeDelta::days(3)));
    }

    #[test]
    fn unavailable_calendar_assumes_trading_day() {
        // Saturday, but the calendar could not be fetched
        let now = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 14, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let status =
            compute_session_status(&SessionHours::US_EQUITIES, now, &TradingDays::Unavailable);
        assert_eq!(status.status, MarketState::Open);
    }

    #[test]
    fn open_reports_today_close_and_next_open() {
        let status =
            compute_session_status(&SessionHours::US_EQUITIES, et(10, 0), &calendar());
        assert_eq!(status.next_close, Some(et(16, 0)));
        assert_eq!(status.next_open, Some(et(9, 30) + chrono::TimeDelta::days(1)));
        assert_eq!(status.message, "Market is open");
    }

    #[test]
    fn pre_market_reports_today_open() {
        let status = compute_session_status(&SessionHours::US_EQUITIES, et(5, 0), &calendar());
        assert_eq!(status.next_open, Some(et(9, 30)));
    }

    #[test]
    fn core_only_venue_closed_outside_hours() {
        let hours = SessionHours::core(chrono_tz::Europe::London, 8 * 60, 16 * 60 + 30);
        let before = chrono_tz::Europe::London
            .with_ymd_and_hms(2026, 3, 10, 7, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let during = chrono_tz::Europe::London
            .with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let after = chrono_tz::Europe::London
            .with_ymd_and_hms(2026, 3, 10, 17, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let days = TradingDays::Weekdays;
        assert_eq!(compute_session_status(&hours, before, &days).status, MarketState::Closed);
        assert_eq!(compute_session_status(&hours, during, &days).status, MarketState::Open);
        assert_eq!(compute_session_status(&hours, after, &days).status, MarketState::Closed);
    }

    #[test]
    fn weekday_fallback_skips_weekend() {
        let friday = date(2026, 3, 13);
        assert_eq!(
            TradingDays::Weekdays.next_trading_day_after(friday),
            Some(date(2026, 3, 16))
        );
    }

    #[test]
    fn same_phase_ignores_times() {
        let a = compute_session_status(&SessionHours::US_EQUITIES, et(10, 0), &calendar());
        let b = compute_session_status(&SessionHours::US_EQUITIES, et(10, 2), &calendar());
        assert!(a.same_phase(&b));
    }

    #[test]
    fn market_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&MarketState::PreMarket).unwrap(),
            "\"pre-market\""
        );
        assert_eq!(
            serde_json::to_string(&MarketState::AfterHours).unwrap(),
            "\"after-hours\""
        );
    }
}
