//! Exchange Metadata
//!
//! Infers the listing venue of a symbol from its suffix (`VOD.L`,
//! `SHOP.TO`, ...) and exposes the venue's currency and session hours.
//! Symbols without a recognised suffix are treated as US equities.

use chrono::{DateTime, Utc};

use super::session::{SessionHours, SessionStatus, TradingDays, compute_session_status};

/// Static description of a listing venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// ISO 10383 market identifier.
    pub mic: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Symbol suffix without the dot. Empty for the US default.
    pub suffix: &'static str,
    /// ISO 4217 currency code.
    pub currency: &'static str,
    /// Currency display symbol.
    pub currency_symbol: &'static str,
    /// Session hours.
    pub hours: SessionHours,
}

impl Exchange {
    /// Whether this is the US default venue.
    #[must_use]
    pub const fn is_us(&self) -> bool {
        self.suffix.is_empty()
    }

    /// Session status for this venue.
    ///
    /// US symbols use the supplied calendar; other venues fall back to a
    /// Monday-Friday calendar.
    #[must_use]
    pub fn session_status(&self, now: DateTime<Utc>, us_days: &TradingDays) -> SessionStatus {
        if self.is_us() {
            compute_session_status(&self.hours, now, us_days)
        } else {
            compute_session_status(&self.hours, now, &TradingDays::Weekdays)
        }
    }
}

/// US equities venue.
pub const US: Exchange = Exchange {
    mic: "XNYS",
    name: "US Equities",
    suffix: "",
    currency: "USD",
    currency_symbol: "$",
    hours: SessionHours::US_EQUITIES,
};

static INTERNATIONAL: [Exchange; 6] = [
    Exchange {
        mic: "XLON",
        name: "London Stock Exchange",
        suffix: "L",
        currency: "GBP",
        currency_symbol: "£",
        hours: SessionHours::core(chrono_tz::Europe::London, 8 * 60, 16 * 60 + 30),
    },
    Exchange {
        mic: "XTSE",
        name: "Toronto Stock Exchange",
        suffix: "TO",
        currency: "CAD",
        currency_symbol: "C$",
        hours: SessionHours::core(chrono_tz::America::Toronto, 9 * 60 + 30, 16 * 60),
    },
    Exchange {
        mic: "XETR",
        name: "XETRA",
        suffix: "DE",
        currency: "EUR",
        currency_symbol: "€",
        hours: SessionHours::core(chrono_tz::Europe::Berlin, 9 * 60, 17 * 60 + 30),
    },
    Exchange {
        mic: "XPAR",
        name: "Euronext Paris",
        suffix: "PA",
        currency: "EUR",
        currency_symbol: "€",
        hours: SessionHours::core(chrono_tz::Europe::Paris, 9 * 60, 17 * 60 + 30),
    },
    Exchange {
        mic: "XHKG",
        name: "Hong Kong Stock Exchange",
        suffix: "HK",
        currency: "HKD",
        currency_symbol: "HK$",
        hours: SessionHours::core(chrono_tz::Asia::Hong_Kong, 9 * 60 + 30, 16 * 60),
    },
    Exchange {
        mic: "XTKS",
        name: "Tokyo Stock Exchange",
        suffix: "T",
        currency: "JPY",
        currency_symbol: "¥",
        hours: SessionHours::core(chrono_tz::Asia::Tokyo, 9 * 60, 15 * 60 + 30),
    },
];

/// Resolve the venue for a symbol.
#[must_use]
pub fn exchange_for(symbol: &str) -> &'static Exchange {
    symbol
        .rsplit_once('.')
        .and_then(|(_, suffix)| {
            INTERNATIONAL
                .iter()
                .find(|exchange| exchange.suffix.eq_ignore_ascii_case(suffix))
        })
        .unwrap_or(&US)
}
