//! Price Validation
//!
//! Decides whether an incoming price observation may replace the canonical
//! price for its symbol, and whether the change is worth broadcasting.
//!
//! # Rules
//!
//! - **Trades** are always accepted and always broadcast. Each trade is
//!   appended to a bounded per-symbol window.
//! - **Quotes** are accepted outright when no canonical price exists.
//!   Otherwise a quote deviating from the mean of recent trades by more
//!   than `max_quote_deviation` is rejected. A surviving quote only writes
//!   the cache (and broadcasts) when it moves the price by more than
//!   `min_change` in absolute terms.
//! - **Polls** must be positive, must not be older than the last stream
//!   write for the symbol, and only broadcast when the price differs.
//!
//! The validator owns the canonical cache: no other component writes it.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use super::market_data::{ObservationSource, PriceObservation, Symbol};

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds used by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Number of recent trades kept per symbol.
    pub trade_window: usize,
    /// Trades older than this are ignored when averaging.
    pub trade_max_age: TimeDelta,
    /// Maximum relative deviation of a quote from the recent trade mean.
    pub max_quote_deviation: Decimal,
    /// Relative change versus canonical that is logged as suspicious.
    pub large_change_threshold: Decimal,
    /// Absolute price delta below which a quote is treated as noise.
    pub min_change: Decimal,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            trade_window: 10,
            trade_max_age: TimeDelta::seconds(30),
            max_quote_deviation: Decimal::new(5, 3),
            large_change_threshold: Decimal::new(2, 2),
            min_change: Decimal::new(1, 3),
        }
    }
}

// =============================================================================
// Verdicts
// =============================================================================

/// Why an observation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Quote strays too far from recent trades.
    #[error("quote {quote} deviates {deviation} from recent trade mean {reference}")]
    QuoteDeviation {
        /// Offending quote price.
        quote: Decimal,
        /// Mean of recent trades.
        reference: Decimal,
        /// Relative deviation.
        deviation: Decimal,
    },

    /// Price is zero or negative.
    #[error("non-positive price {0}")]
    NonPositive(Decimal),

    /// A stream update landed after the poll was issued.
    #[error("poll superseded by stream update at {0}")]
    Superseded(DateTime<Utc>),
}

impl Rejection {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::QuoteDeviation { .. } => "deviation",
            Self::NonPositive(_) => "non_positive",
            Self::Superseded(_) => "superseded",
        }
    }
}

/// Outcome of validating one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Observation accepted. `broadcast` is false when the cache was left
    /// untouched because the change was below the noise floor.
    Accepted {
        /// Whether the canonical price changed and viewers must be told.
        broadcast: bool,
    },
    /// Observation dropped.
    Rejected(Rejection),
}

impl Verdict {
    /// Whether a broadcast should follow.
    #[must_use]
    pub const fn should_broadcast(&self) -> bool {
        matches!(self, Self::Accepted { broadcast: true })
    }
}

/// Current canonical price for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalEntry {
    /// Last accepted price.
    pub price: Decimal,
    /// Source of the last write.
    pub source: ObservationSource,
    /// Observation time of the last write.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Per-symbol history
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct TradeSample {
    price: Decimal,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SymbolHistory {
    trades: VecDeque<TradeSample>,
}

impl SymbolHistory {
    fn push_trade(&mut self, price: Decimal, at: DateTime<Utc>, window: usize) {
        if window == 0 {
            return;
        }
        while self.trades.len() >= window {
            self.trades.pop_front();
        }
        self.trades.push_back(TradeSample { price, at });
    }

    fn recent_trade_mean(&self, now: DateTime<Utc>, max_age: TimeDelta) -> Option<Decimal> {
        let (sum, count) = self
            .trades
            .iter()
            .filter(|sample| now.signed_duration_since(sample.at) <= max_age)
            .fold((Decimal::ZERO, 0_u32), |(sum, count), sample| {
                (sum + sample.price, count + 1)
            });

        if count == 0 {
            None
        } else {
            sum.checked_div(Decimal::from(count))
        }
    }
}

/// Relative distance of `value` from `base`. `None` when `base` is not positive.
fn relative_change(value: Decimal, base: Decimal) -> Option<Decimal> {
    if base <= Decimal::ZERO {
        return None;
    }
    (value - base).abs().checked_div(base)
}

// =============================================================================
// Validator
// =============================================================================

/// Stateful price validator and owner of the canonical price cache.
#[derive(Debug, Default)]
pub struct PriceValidator {
    config: ValidationConfig,
    history: HashMap<Symbol, SymbolHistory>,
    canonical: HashMap<Symbol, CanonicalEntry>,
}

impl PriceValidator {
    /// Create a validator with the given thresholds.
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            canonical: HashMap::new(),
        }
    }

    /// Validate an observation, writing the canonical cache on accept.
    pub fn decide(&mut self, observation: &PriceObservation) -> Verdict {
        match observation.source {
            ObservationSource::Trade => self.accept_trade(observation),
            ObservationSource::Quote => self.check_quote(observation),
            ObservationSource::Poll => self.check_poll(observation),
        }
    }

    fn accept_trade(&mut self, obs: &PriceObservation) -> Verdict {
        let window = self.config.trade_window;
        self.history
            .entry(obs.symbol.clone())
            .or_default()
            .push_trade(obs.price, obs.observed_at, window);
        self.write(obs);
        Verdict::Accepted { broadcast: true }
    }

    fn check_quote(&mut self, obs: &PriceObservation) -> Verdict {
        if obs.price <= Decimal::ZERO {
            return Verdict::Rejected(Rejection::NonPositive(obs.price));
        }

        let current = self.canonical.get(&obs.symbol).map(|entry| entry.price);
        let Some(current) = current else {
            self.write(obs);
            return Verdict::Accepted { broadcast: true };
        };

        if let Some(reference) = self
            .history
            .get(&obs.symbol)
            .and_then(|h| h.recent_trade_mean(obs.observed_at, self.config.trade_max_age))
            && let Some(deviation) = relative_change(obs.price, reference)
            && deviation > self.config.max_quote_deviation
        {
            tracing::warn!(
                symbol = %obs.symbol,
                quote = %obs.price,
                trade_mean = %reference,
                deviation = %deviation,
                "Rejecting stale quote"
            );
            return Verdict::Rejected(Rejection::QuoteDeviation {
                quote: obs.price,
                reference,
                deviation,
            });
        }

        if let Some(change) = relative_change(obs.price, current)
            && change > self.config.large_change_threshold
        {
            tracing::warn!(
                symbol = %obs.symbol,
                previous = %current,
                quote = %obs.price,
                change = %change,
                "Large quote move"
            );
        }

        if (obs.price - current).abs() > self.config.min_change {
            self.write(obs);
            Verdict::Accepted { broadcast: true }
        } else {
            Verdict::Accepted { broadcast: false }
        }
    }

    fn check_poll(&mut self, obs: &PriceObservation) -> Verdict {
        if obs.price <= Decimal::ZERO {
            return Verdict::Rejected(Rejection::NonPositive(obs.price));
        }

        if let Some(entry) = self.canonical.get(&obs.symbol) {
            if entry.source.is_stream() && entry.updated_at > obs.observed_at {
                return Verdict::Rejected(Rejection::Superseded(entry.updated_at));
            }
            if entry.price == obs.price {
                return Verdict::Accepted { broadcast: false };
            }
        }

        self.write(obs);
        Verdict::Accepted { broadcast: true }
    }

    fn write(&mut self, obs: &PriceObservation) {
        self.canonical.insert(
            obs.symbol.clone(),
            CanonicalEntry {
                price: obs.price,
                source: obs.source,
                updated_at: obs.observed_at,
            },
        );
    }

    /// Canonical price for a symbol.
    #[must_use]
    pub fn canonical_price(&self, symbol: &str) -> Option<Decimal> {
        self.canonical.get(symbol).map(|entry| entry.price)
    }

    /// All cached prices, sorted by symbol.
    #[must_use]
    pub fn canonical_prices(&self) -> Vec<(Symbol, Decimal)> {
        let mut prices: Vec<_> = self
            .canonical
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.price))
            .collect();
        prices.sort_by(|a, b| a.0.cmp(&b.0));
        prices
    }

    /// Number of trades currently held in a symbol's window.
    #[must_use]
    pub fn trade_window_len(&self, symbol: &str) -> usize {
        self.history.get(symbol).map_or(0, |h| h.trades.len())
    }

    /// Drop all history and the cached price for a symbol.
    pub fn forget(&mut self, symbol: &str) {
        self.history.remove(symbol);
        self.canonical.remove(symbol);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    #[test]
    fn trade_always_accepted_and_broadcast() {
        let mut v = PriceValidator::default();
        let verdict = v.decide(&PriceObservation::trade("AAPL", dec("187.20"), at(0)));
        assert_eq!(verdict, Verdict::Accepted { broadcast: true });
        assert_eq!(v.canonical_price("AAPL"), Some(dec("187.20")));
    }

    #[test]
    fn first_quote_seeds_cache() {
        let mut v = PriceValidator::default();
        let verdict = v.decide(&PriceObservation::quote("MSFT", dec("410.00"), at(0)));
        assert!(verdict.should_broadcast());
        assert_eq!(v.canonical_price("MSFT"), Some(dec("410.00")));
    }

    #[test]
    fn deviant_quote_rejected() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(0)));

        let verdict = v.decide(&PriceObservation::quote("AAPL", dec("100.60"), at(5)));

        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection::QuoteDeviation { .. })
        ));
        assert!(!verdict.should_broadcast());
        assert_eq!(v.canonical_price("AAPL"), Some(dec("100.00")));
    }

    #[test]
    fn quote_within_deviation_accepted() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(0)));

        let verdict = v.decide(&PriceObservation::quote("AAPL", dec("100.40"), at(5)));

        assert_eq!(verdict, Verdict::Accepted { broadcast: true });
        assert_eq!(v.canonical_price("AAPL"), Some(dec("100.40")));
    }

    #[test]
    fn sub_threshold_quote_accepted_without_broadcast() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.0005"), at(0)));

        let verdict = v.decide(&PriceObservation::quote("AAPL", dec("100.0010"), at(1)));

        assert_eq!(verdict, Verdict::Accepted { broadcast: false });
        assert_eq!(v.canonical_price("AAPL"), Some(dec("100.0005")));
    }

    #[test]
    fn stale_trades_do_not_gate_quotes() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(0)));

        // 31s later the trade is outside the averaging window
        let verdict = v.decide(&PriceObservation::quote("AAPL", dec("101.00"), at(31)));

        assert_eq!(verdict, Verdict::Accepted { broadcast: true });
        assert_eq!(v.canonical_price("AAPL"), Some(dec("101.00")));
    }

    #[test]
    fn large_move_still_accepted_without_recent_trades() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::quote("TSLA", dec("200.00"), at(0)));

        let verdict = v.decide(&PriceObservation::quote("TSLA", dec("220.00"), at(1)));

        assert!(verdict.should_broadcast());
        assert_eq!(v.canonical_price("TSLA"), Some(dec("220.00")));
    }

    #[test]
    fn trade_window_is_bounded() {
        let mut v = PriceValidator::default();
        for i in 0..25 {
            v.decide(&PriceObservation::trade("AAPL", dec("100"), at(i)));
        }
        assert_eq!(v.trade_window_len("AAPL"), 10);
    }

    #[test]
    fn non_positive_quote_rejected() {
        let mut v = PriceValidator::default();
        let verdict = v.decide(&PriceObservation::quote("AAPL", Decimal::ZERO, at(0)));
        assert_eq!(verdict, Verdict::Rejected(Rejection::NonPositive(Decimal::ZERO)));
        assert_eq!(v.canonical_price("AAPL"), None);
    }

    #[test]
    fn poll_rejected_when_stream_wrote_later() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(10)));

        let verdict = v.decide(&PriceObservation::poll("AAPL", dec("99.00"), at(5)));

        assert_eq!(verdict, Verdict::Rejected(Rejection::Superseded(at(10))));
        assert_eq!(v.canonical_price("AAPL"), Some(dec("100.00")));
    }

    #[test]
    fn poll_newer_than_stream_wins() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(0)));

        let verdict = v.decide(&PriceObservation::poll("AAPL", dec("99.00"), at(5)));

        assert!(verdict.should_broadcast());
        assert_eq!(v.canonical_price("AAPL"), Some(dec("99.00")));
    }

    #[test]
    fn unchanged_poll_not_broadcast() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::poll("AAPL", dec("99.00"), at(0)));

        let verdict = v.decide(&PriceObservation::poll("AAPL", dec("99.00"), at(1)));

        assert_eq!(verdict, Verdict::Accepted { broadcast: false });
    }

    #[test]
    fn forget_clears_history_and_price() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("AAPL", dec("100.00"), at(0)));
        v.forget("AAPL");
        assert_eq!(v.canonical_price("AAPL"), None);
        assert_eq!(v.trade_window_len("AAPL"), 0);
    }

    #[test]
    fn canonical_prices_sorted() {
        let mut v = PriceValidator::default();
        v.decide(&PriceObservation::trade("TSLA", dec("1"), at(0)));
        v.decide(&PriceObservation::trade("AAPL", dec("2"), at(0)));
        let symbols: Vec<_> = v.canonical_prices().into_iter().map(|(s, _)| s).collect();
        assert_eq!(symbols, vec!["AAPL", "TSLA"]);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Trade(i64),
        Quote(i64),
        Poll(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1_i64..10_000_000).prop_map(Step::Trade),
            (0_i64..10_000_000).prop_map(Step::Quote),
            (0_i64..10_000_000).prop_map(Step::Poll),
        ]
    }

    proptest! {
        #[test]
        fn trade_always_updates_canonical(
            history in proptest::collection::vec(step(), 0..40),
            final_cents in 1_i64..10_000_000,
        ) {
            let mut v = PriceValidator::default();
            for (i, s) in history.iter().enumerate() {
                let when = at(i64::try_from(i).unwrap());
                let obs = match s {
                    Step::Trade(c) => PriceObservation::trade("SYM", Decimal::new(*c, 2), when),
                    Step::Quote(c) => PriceObservation::quote("SYM", Decimal::new(*c, 2), when),
                    Step::Poll(c) => PriceObservation::poll("SYM", Decimal::new(*c, 2), when),
                };
                v.decide(&obs);
            }

            let price = Decimal::new(final_cents, 2);
            let verdict = v.decide(&PriceObservation::trade("SYM", price, at(100)));

            prop_assert_eq!(verdict, Verdict::Accepted { broadcast: true });
            prop_assert_eq!(v.canonical_price("SYM"), Some(price));
        }
    }
}
