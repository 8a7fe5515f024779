//! Market Session Monitor
//!
//! Periodically computes the global US session status and hands it to the
//! engine. The first computation happens immediately on start. Change
//! detection and broadcasting are the engine's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::EngineCommand;
use super::session_clock::SessionClock;

/// Session status ticker.
#[derive(Debug)]
pub struct SessionMonitor {
    clock: Arc<SessionClock>,
    engine: mpsc::Sender<EngineCommand>,
    interval: Duration,
}

impl SessionMonitor {
    /// Create a monitor that reports every `interval`.
    #[must_use]
    pub const fn new(
        clock: Arc<SessionClock>,
        engine: mpsc::Sender<EngineCommand>,
        interval: Duration,
    ) -> Self {
        Self {
            clock,
            engine,
            interval,
        }
    }

    /// Run until cancelled or the engine goes away.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(interval_secs = self.interval.as_secs(), "Session monitor started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (status, days) = self.clock.us_status(Utc::now()).await;
                    let cmd = EngineCommand::SessionComputed { status, days };
                    if self.engine.send(cmd).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Session monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MarketDataError, MockTradingCalendar};
    use crate::domain::session::TradingDays;

    fn clock() -> Arc<SessionClock> {
        let mut calendar = MockTradingCalendar::new();
        calendar
            .expect_trading_days()
            .returning(|_, _| Err(MarketDataError::Request("offline".to_string())));
        Arc::new(SessionClock::new(Arc::new(calendar)))
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_then_periodic() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let monitor = SessionMonitor::new(clock(), tx, Duration::from_secs(120));
        let task = tokio::spawn(monitor.run(cancel.clone()));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            EngineCommand::SessionComputed {
                days: TradingDays::Unavailable,
                ..
            }
        ));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineCommand::SessionComputed { .. }
        ));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_engine_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let monitor = SessionMonitor::new(clock(), tx, Duration::from_secs(120));

        // Returns on its own once the first send fails
        monitor.run(CancellationToken::new()).await;
    }
}
