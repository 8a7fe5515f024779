//! Fallback REST Poller
//!
//! Safety net that keeps prices flowing while the upstream stream is not
//! authenticated. On every tick, while the US session is open, it fetches
//! the latest price of each subscribed symbol through the [`PriceSource`]
//! port and reports prices that changed since its last pass.
//!
//! The poller never writes the canonical cache. Its results are sent to
//! the engine as `poll` observations and go through the validator like
//! any other source. Each completed pass is reported so the engine can
//! stop a poller whose overlap with a live stream is no longer needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::engine::EngineCommand;
use super::session_clock::SessionClock;
use crate::application::ports::PriceSource;
use crate::domain::exchange::exchange_for;
use crate::domain::market_data::{PriceObservation, Symbol};
use crate::domain::session::MarketState;
use crate::infrastructure::metrics::{self, PollOutcome};

/// Periodic REST price fetcher.
pub struct FallbackPoller {
    source: Arc<dyn PriceSource>,
    clock: Arc<SessionClock>,
    symbols: watch::Receiver<Vec<Symbol>>,
    engine: mpsc::Sender<EngineCommand>,
    interval: Duration,
    generation: u64,
    last: HashMap<Symbol, Decimal>,
    now: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPoller")
            .field("interval", &self.interval)
            .field("generation", &self.generation)
            .field("tracked", &self.last.len())
            .finish_non_exhaustive()
    }
}

impl FallbackPoller {
    /// Create a poller for one activation of the fallback path.
    #[must_use]
    pub fn new(
        source: Arc<dyn PriceSource>,
        clock: Arc<SessionClock>,
        symbols: watch::Receiver<Vec<Symbol>>,
        engine: mpsc::Sender<EngineCommand>,
        interval: Duration,
        generation: u64,
    ) -> Self {
        Self {
            source,
            clock,
            symbols,
            engine,
            interval,
            generation,
            last: HashMap::new(),
            now: Utc::now,
        }
    }

    /// Replace the wall clock.
    #[must_use]
    pub const fn with_now(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Run until cancelled or the engine goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(generation = self.generation, "Fallback poller started");
        metrics::set_poller_active(true);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.poll_once().await {
                        break;
                    }
                }
            }
        }

        metrics::set_poller_active(false);
        tracing::info!(generation = self.generation, "Fallback poller stopped");
    }

    /// One pass. Returns false once the engine can no longer be reached.
    async fn poll_once(&mut self) -> bool {
        let requested_at = (self.now)();
        let (status, days) = self.clock.us_status(requested_at).await;

        if status.status == MarketState::Open {
            let symbols = self.symbols.borrow_and_update().clone();
            self.last.retain(|symbol, _| symbols.contains(symbol));

            let fetches = symbols.iter().map(|symbol| {
                let source = Arc::clone(&self.source);
                async move { (symbol, source.latest_price(symbol).await) }
            });

            for (symbol, result) in join_all(fetches).await {
                let price = match result {
                    Ok(Some(price)) if price > Decimal::ZERO => {
                        metrics::record_poll_fetch(PollOutcome::Price);
                        price
                    }
                    Ok(_) => {
                        metrics::record_poll_fetch(PollOutcome::Empty);
                        continue;
                    }
                    Err(e) => {
                        metrics::record_poll_fetch(PollOutcome::Failed);
                        tracing::warn!(symbol = %symbol, error = %e, "Fallback fetch failed");
                        continue;
                    }
                };

                if self.last.get(symbol) == Some(&price) {
                    continue;
                }
                self.last.insert(symbol.clone(), price);

                let session = exchange_for(symbol).session_status(requested_at, &days);
                let cmd = EngineCommand::Polled {
                    observation: PriceObservation::poll(symbol.clone(), price, requested_at),
                    session,
                };
                if self.engine.send(cmd).await.is_err() {
                    return false;
                }
            }
        } else {
            tracing::trace!(status = status.status.as_str(), "Skipping poll outside core hours");
        }

        let done = EngineCommand::PollCycleCompleted {
            generation: self.generation,
        };
        self.engine.send(done).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone};
    use mockall::predicate::eq;

    use super::*;
    use crate::application::ports::{MarketDataError, MockPriceSource, MockTradingCalendar};

    // Tuesday 2026-03-10, 11:00 ET
    fn tuesday_late_morning() -> DateTime<Utc> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 10, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn weekday_clock() -> Arc<SessionClock> {
        let mut calendar = MockTradingCalendar::new();
        calendar.expect_trading_days().returning(|start, end| {
            Ok(start
                .iter_days()
                .take_while(|d| *d <= end)
                .filter(|d| !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun))
                .collect())
        });
        Arc::new(SessionClock::new(Arc::new(calendar)))
    }

    fn closed_clock() -> Arc<SessionClock> {
        let mut calendar = MockTradingCalendar::new();
        calendar.expect_trading_days().returning(|_, _| Ok(vec![]));
        Arc::new(SessionClock::new(Arc::new(calendar)))
    }

    fn poller(
        source: MockPriceSource,
        clock: Arc<SessionClock>,
        symbols: Vec<&str>,
    ) -> (FallbackPoller, mpsc::Receiver<EngineCommand>, watch::Sender<Vec<Symbol>>) {
        let (tx, rx) = mpsc::channel(16);
        let (symbols_tx, symbols_rx) =
            watch::channel(symbols.into_iter().map(str::to_string).collect());
        let poller = FallbackPoller::new(
            Arc::new(source),
            clock,
            symbols_rx,
            tx,
            Duration::from_secs(1),
            7,
        )
        .with_now(tuesday_late_morning);
        (poller, rx, symbols_tx)
    }

    #[tokio::test]
    async fn closed_session_skips_fetch_but_completes_pass() {
        let mut source = MockPriceSource::new();
        source.expect_latest_price().never();
        let (mut poller, mut rx, _symbols) = poller(source, closed_clock(), vec!["AAPL"]);

        assert!(poller.poll_once().await);

        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::PollCycleCompleted { generation: 7 }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_session_reports_changed_prices_only() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest_price()
            .with(eq("AAPL"))
            .returning(|_| Ok(Some(Decimal::new(18720, 2))));
        source
            .expect_latest_price()
            .with(eq("MSFT"))
            .returning(|_| Err(MarketDataError::Request("timeout".to_string())));
        source
            .expect_latest_price()
            .with(eq("ZERO"))
            .returning(|_| Ok(Some(Decimal::ZERO)));
        let (mut poller, mut rx, _symbols) =
            poller(source, weekday_clock(), vec!["AAPL", "MSFT", "ZERO"]);

        assert!(poller.poll_once().await);
        match rx.try_recv().unwrap() {
            EngineCommand::Polled { observation, session } => {
                assert_eq!(observation.symbol, "AAPL");
                assert_eq!(observation.price, Decimal::new(18720, 2));
                assert_eq!(session.status, MarketState::Open);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::PollCycleCompleted { .. }
        ));

        // Same price on the next pass is not reported again
        assert!(poller.poll_once().await);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::PollCycleCompleted { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn engine_gone_stops_poller() {
        let source = MockPriceSource::new();
        let (mut poller, rx, _symbols) = poller(source, closed_clock(), vec![]);
        drop(rx);

        assert!(!poller.poll_once().await);
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let source = MockPriceSource::new();
        let (poller, _rx, _symbols) = poller(source, closed_clock(), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        poller.run(cancel).await;
    }
}
