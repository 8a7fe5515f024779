//! Price Stream Engine
//!
//! Single owner of all mutable distribution state:
//! - the subscription registry
//! - the price validator and its canonical cache
//! - the fanout set of open viewers
//! - the last broadcast session status and the US trading calendar view
//! - the upstream authentication epoch
//! - the fallback poller and session monitor lifecycles
//!
//! Every input arrives as an [`EngineCommand`] and is applied by
//! [`Engine::handle`], which never awaits. I/O lives in the tasks that feed
//! the queue: the upstream connector, viewer sessions, the poller, the
//! monitor and on-demand REST lookups.
//!
//! # Poller lifecycle
//!
//! ```text
//! subscription set 0 -> 1        start (even while authenticated)
//! upstream authenticated         stop
//! first pass done while authed   stop
//! upstream lost, set non-empty   start
//! subscription set -> 0          stop
//! last viewer gone, set empty    stop
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::fallback_poller::FallbackPoller;
use super::session_clock::SessionClock;
use super::session_monitor::SessionMonitor;
use crate::application::ports::{PriceSource, UpstreamCommand, UpstreamEvent};
use crate::domain::events::{
    MarketStatusEvent, MarketUpdateEvent, PriceSnapshot, PriceUpdate, ServerEvent,
};
use crate::domain::exchange::exchange_for;
use crate::domain::market_data::{PriceObservation, Symbol, normalize_symbol};
use crate::domain::session::{SessionStatus, TradingDays};
use crate::domain::subscription::{ClientId, RegistryChange, SubscriptionRegistry};
use crate::domain::validation::{PriceValidator, ValidationConfig, Verdict};
use crate::infrastructure::broadcast::{ClientSender, Fanout};
use crate::infrastructure::metrics;

// =============================================================================
// Commands
// =============================================================================

/// Input to the engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// A viewer connected.
    ClientConnected {
        /// Viewer id.
        client: ClientId,
        /// Outbound queue.
        sender: ClientSender,
    },
    /// A viewer disconnected.
    ClientDisconnected {
        /// Viewer id.
        client: ClientId,
    },
    /// A viewer subscribed to a symbol.
    Subscribe {
        /// Viewer id.
        client: ClientId,
        /// Raw symbol as sent by the viewer.
        symbol: String,
    },
    /// A viewer unsubscribed from a symbol.
    Unsubscribe {
        /// Viewer id.
        client: ClientId,
        /// Raw symbol as sent by the viewer.
        symbol: String,
    },
    /// Event from the upstream connector.
    Upstream(UpstreamEvent),
    /// Price fetched by the fallback poller.
    Polled {
        /// Poll observation.
        observation: PriceObservation,
        /// Venue session status at request time.
        session: SessionStatus,
    },
    /// The fallback poller finished a pass.
    PollCycleCompleted {
        /// Poller activation that finished the pass.
        generation: u64,
    },
    /// The session monitor computed the global status.
    SessionComputed {
        /// Global US status.
        status: SessionStatus,
        /// Calendar used.
        days: TradingDays,
    },
    /// On-demand price lookup.
    PriceQuery {
        /// Raw symbol.
        symbol: String,
        /// Reply channel.
        reply: oneshot::Sender<Option<Decimal>>,
    },
}

/// Engine is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("engine stopped")]
pub struct EngineStopped;

// =============================================================================
// Inputs
// =============================================================================

/// The engine's two input queues.
///
/// Cancellation always wins. When both queues have work, the queue polled
/// first alternates on every call, so a burst on one side cannot hold the
/// other back for more than one input.
#[derive(Debug)]
struct EngineInputs {
    commands: mpsc::Receiver<EngineCommand>,
    upstream_events: mpsc::Receiver<UpstreamEvent>,
    commands_first: bool,
}

impl EngineInputs {
    const fn new(
        commands: mpsc::Receiver<EngineCommand>,
        upstream_events: mpsc::Receiver<UpstreamEvent>,
    ) -> Self {
        Self {
            commands,
            upstream_events,
            commands_first: false,
        }
    }

    /// Next input, or `None` on cancellation or once both queues close.
    async fn next(&mut self, cancel: &CancellationToken) -> Option<EngineCommand> {
        self.commands_first = !self.commands_first;

        if self.commands_first {
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                Some(cmd) = self.commands.recv() => Some(cmd),
                Some(event) = self.upstream_events.recv() => Some(EngineCommand::Upstream(event)),
                else => None,
            }
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                Some(event) = self.upstream_events.recv() => Some(EngineCommand::Upstream(event)),
                Some(cmd) = self.commands.recv() => Some(cmd),
                else => None,
            }
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Counters published by the engine for health reporting.
#[derive(Debug, Default)]
pub struct EngineStats {
    clients: AtomicUsize,
    symbols: AtomicUsize,
    subscriptions: AtomicUsize,
    poller_active: AtomicBool,
    monitor_active: AtomicBool,
    stream_authenticated: AtomicBool,
    broadcasts: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    /// Open viewers.
    pub clients: usize,
    /// Symbols in the subscription set.
    pub symbols: usize,
    /// Client-symbol pairs across all viewers.
    pub subscriptions: usize,
    /// Fallback poller running.
    pub poller_active: bool,
    /// Session monitor running.
    pub monitor_active: bool,
    /// Engine has seen the current upstream authentication.
    pub stream_authenticated: bool,
    /// Events broadcast since start.
    pub broadcasts: u64,
}

impl EngineStats {
    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            clients: self.clients.load(Ordering::Relaxed),
            symbols: self.symbols.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            poller_active: self.poller_active.load(Ordering::Relaxed),
            monitor_active: self.monitor_active.load(Ordering::Relaxed),
            stream_authenticated: self.stream_authenticated.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable sender side of the engine queue.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    stats: Arc<EngineStats>,
}

impl EngineHandle {
    /// Create the engine queue.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Self {
            tx,
            stats: Arc::new(EngineStats::default()),
        };
        (handle, rx)
    }

    /// Raw command sender.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<EngineCommand> {
        self.tx.clone()
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueue a command.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn send(&self, cmd: EngineCommand) -> Result<(), EngineStopped> {
        self.tx.send(cmd).await.map_err(|_| EngineStopped)
    }

    /// Register a viewer.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn connect(&self, client: ClientId, sender: ClientSender) -> Result<(), EngineStopped> {
        self.send(EngineCommand::ClientConnected { client, sender })
            .await
    }

    /// Deregister a viewer.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn disconnect(&self, client: ClientId) -> Result<(), EngineStopped> {
        self.send(EngineCommand::ClientDisconnected { client }).await
    }

    /// Subscribe a viewer to a symbol.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn subscribe(&self, client: ClientId, symbol: String) -> Result<(), EngineStopped> {
        self.send(EngineCommand::Subscribe { client, symbol }).await
    }

    /// Unsubscribe a viewer from a symbol.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn unsubscribe(&self, client: ClientId, symbol: String) -> Result<(), EngineStopped> {
        self.send(EngineCommand::Unsubscribe { client, symbol }).await
    }

    /// Current price for a symbol, from cache or a REST lookup.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` if the engine has shut down.
    pub async fn query_price(&self, symbol: &str) -> Result<Option<Decimal>, EngineStopped> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::PriceQuery {
            symbol: symbol.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineStopped)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Validator thresholds.
    pub validation: ValidationConfig,
    /// Fallback poller tick.
    pub poll_interval: Duration,
    /// Session monitor tick.
    pub session_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            poll_interval: Duration::from_secs(1),
            session_interval: Duration::from_secs(120),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The distribution engine actor.
pub struct Engine {
    config: EngineConfig,
    registry: SubscriptionRegistry,
    validator: PriceValidator,
    fanout: Fanout,
    upstream: mpsc::UnboundedSender<UpstreamCommand>,
    epoch: Option<u64>,
    session: Option<SessionStatus>,
    us_days: TradingDays,
    symbols_tx: watch::Sender<Vec<Symbol>>,
    poller: Option<CancellationToken>,
    poll_generation: u64,
    monitor: Option<CancellationToken>,
    source: Arc<dyn PriceSource>,
    clock: Arc<SessionClock>,
    commands: mpsc::Sender<EngineCommand>,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("epoch", &self.epoch)
            .field("symbols", &self.registry.len())
            .field("clients", &self.fanout.len())
            .field("poller_active", &self.poller.is_some())
            .field("monitor_active", &self.monitor.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine fed by `handle`'s queue.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn PriceSource>,
        clock: Arc<SessionClock>,
        upstream: mpsc::UnboundedSender<UpstreamCommand>,
        handle: &EngineHandle,
        cancel: CancellationToken,
    ) -> Self {
        let (symbols_tx, _) = watch::channel(Vec::new());
        Self {
            validator: PriceValidator::new(config.validation.clone()),
            config,
            registry: SubscriptionRegistry::new(),
            fanout: Fanout::new(),
            upstream,
            epoch: None,
            session: None,
            us_days: TradingDays::Unavailable,
            symbols_tx,
            poller: None,
            poll_generation: 0,
            monitor: None,
            source,
            clock,
            commands: handle.sender(),
            stats: handle.stats(),
            cancel,
        }
    }

    /// Process commands and upstream events until cancelled.
    pub async fn run(
        mut self,
        commands: mpsc::Receiver<EngineCommand>,
        upstream_events: mpsc::Receiver<UpstreamEvent>,
    ) {
        tracing::info!("Engine started");
        let cancel = self.cancel.clone();
        let mut inputs = EngineInputs::new(commands, upstream_events);

        while let Some(cmd) = inputs.next(&cancel).await {
            self.handle(cmd);
        }

        self.stop_poller();
        self.stop_monitor();
        self.publish_stats();
        tracing::info!("Engine stopped");
    }

    /// Apply one command.
    pub fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::ClientConnected { client, sender } => {
                self.on_client_connected(client, sender);
            }
            EngineCommand::ClientDisconnected { client } => self.on_client_disconnected(client),
            EngineCommand::Subscribe { client, symbol } => self.on_subscribe(client, &symbol),
            EngineCommand::Unsubscribe { client, symbol } => self.on_unsubscribe(client, &symbol),
            EngineCommand::Upstream(event) => self.on_upstream(event),
            EngineCommand::Polled {
                observation,
                session,
            } => self.on_polled(observation, session),
            EngineCommand::PollCycleCompleted { generation } => {
                self.on_poll_cycle_completed(generation);
            }
            EngineCommand::SessionComputed { status, days } => {
                self.on_session_computed(status, days);
            }
            EngineCommand::PriceQuery { symbol, reply } => self.on_price_query(&symbol, reply),
        }
        self.publish_stats();
    }

    // -------------------------------------------------------------------------
    // Viewers
    // -------------------------------------------------------------------------

    fn on_client_connected(&mut self, client: ClientId, sender: ClientSender) {
        if !self.fanout.add(client, sender) {
            tracing::warn!(client, "Client id reused, replacing sender");
        }
        tracing::info!(client, clients = self.fanout.len(), "Client connected");

        if self.monitor.is_none() {
            self.start_monitor();
        }

        if let Some(status) = &self.session {
            let event = ServerEvent::MarketStatus(MarketStatusEvent::new(status.clone(), Utc::now()));
            self.fanout.send_to(client, &event);
        }

        let prices = self.validator.canonical_prices();
        if !prices.is_empty() {
            let data = prices
                .iter()
                .map(|(symbol, price)| PriceSnapshot::new(symbol, *price, exchange_for(symbol)))
                .collect();
            let event = ServerEvent::MarketUpdate(MarketUpdateEvent { data });
            self.fanout.send_to(client, &event);
        }
    }

    fn on_client_disconnected(&mut self, client: ClientId) {
        self.fanout.remove(client);
        let change = self.registry.remove_client(client);
        self.apply_removals(&change);

        tracing::info!(
            client,
            clients = self.fanout.len(),
            released = change.removed.len(),
            "Client disconnected"
        );

        if self.fanout.is_empty() {
            self.stop_monitor();
            if self.registry.is_empty() {
                self.stop_poller();
            }
        }
    }

    fn on_subscribe(&mut self, client: ClientId, raw: &str) {
        let Some(symbol) = normalize_symbol(raw) else {
            tracing::debug!(client, "Ignoring empty symbol");
            return;
        };

        let change = self.registry.subscribe(client, &symbol);
        tracing::debug!(client, symbol = %symbol, "Subscribed");

        if change.became_active {
            self.start_poller();
        }

        if !change.added.is_empty() {
            if let Some(epoch) = self.epoch {
                self.send_upstream(UpstreamCommand::subscribe(epoch, change.added));
            }
            self.publish_symbols();
        }

        if let Some(price) = self.validator.canonical_price(&symbol) {
            let event = self.price_event(&symbol, price, Utc::now(), None);
            self.fanout.send_to(client, &event);
        }
    }

    fn on_unsubscribe(&mut self, client: ClientId, raw: &str) {
        let Some(symbol) = normalize_symbol(raw) else {
            return;
        };
        let change = self.registry.unsubscribe(client, &symbol);
        tracing::debug!(client, symbol = %symbol, "Unsubscribed");
        self.apply_removals(&change);
    }

    fn apply_removals(&mut self, change: &RegistryChange) {
        if change.removed.is_empty() {
            return;
        }

        for symbol in &change.removed {
            self.validator.forget(symbol);
        }
        if let Some(epoch) = self.epoch {
            self.send_upstream(UpstreamCommand::unsubscribe(epoch, change.removed.clone()));
        }
        if change.became_empty {
            self.stop_poller();
        }
        self.publish_symbols();
    }

    // -------------------------------------------------------------------------
    // Upstream
    // -------------------------------------------------------------------------

    fn on_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Connected => tracing::debug!("Upstream connected"),
            UpstreamEvent::Authenticated { epoch } => self.on_authenticated(epoch),
            UpstreamEvent::Observation(observation) => {
                if self.registry.contains(&observation.symbol) {
                    self.apply_observation(&observation, None);
                } else {
                    tracing::trace!(symbol = %observation.symbol, "Observation for unsubscribed symbol");
                }
            }
            UpstreamEvent::Disconnected => self.on_stream_lost(),
            UpstreamEvent::Backoff { attempt, delay } => {
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "Upstream backing off");
            }
            UpstreamEvent::Fatal { reason } => {
                tracing::error!(reason = %reason, "Upstream stream gave up");
                self.on_stream_lost();
            }
        }
    }

    fn on_authenticated(&mut self, epoch: u64) {
        if self.epoch == Some(epoch) {
            return;
        }
        self.epoch = Some(epoch);
        self.stop_poller();

        let symbols = self.registry.symbols();
        tracing::info!(epoch, symbols = symbols.len(), "Upstream authenticated, resubscribing");
        if !symbols.is_empty() {
            self.send_upstream(UpstreamCommand::subscribe(epoch, symbols));
        }
    }

    fn on_stream_lost(&mut self) {
        self.epoch = None;
        if !self.registry.is_empty() {
            self.start_poller();
        }
    }

    fn send_upstream(&self, cmd: UpstreamCommand) {
        if self.upstream.send(cmd).is_err() {
            tracing::warn!("Upstream connector gone, dropping subscription command");
        }
    }

    // -------------------------------------------------------------------------
    // Prices
    // -------------------------------------------------------------------------

    fn on_polled(&mut self, observation: PriceObservation, session: SessionStatus) {
        if !self.registry.contains(&observation.symbol) {
            tracing::debug!(symbol = %observation.symbol, "Discarding late poll result");
            return;
        }
        self.apply_observation(&observation, Some(session));
    }

    fn apply_observation(&mut self, obs: &PriceObservation, session: Option<SessionStatus>) {
        match self.validator.decide(obs) {
            Verdict::Rejected(rejection) => {
                metrics::record_rejection(obs.source.as_str(), rejection.reason());
                tracing::debug!(
                    symbol = %obs.symbol,
                    source = obs.source.as_str(),
                    reason = %rejection,
                    "Observation rejected"
                );
            }
            Verdict::Accepted { broadcast: false } => {}
            Verdict::Accepted { broadcast: true } => {
                let event = self.price_event(&obs.symbol, obs.price, obs.observed_at, session);
                self.broadcast(&event);
            }
        }
    }

    fn price_event(
        &self,
        symbol: &str,
        price: Decimal,
        at: chrono::DateTime<Utc>,
        session: Option<SessionStatus>,
    ) -> ServerEvent {
        let exchange = exchange_for(symbol);
        let session = session.unwrap_or_else(|| exchange.session_status(at, &self.us_days));
        ServerEvent::Price(PriceUpdate::new(symbol, price, exchange, session, at))
    }

    fn on_price_query(&self, raw: &str, reply: oneshot::Sender<Option<Decimal>>) {
        let Some(symbol) = normalize_symbol(raw) else {
            let _ = reply.send(None);
            return;
        };

        if let Some(price) = self.validator.canonical_price(&symbol) {
            let _ = reply.send(Some(price));
            return;
        }

        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let price = match source.latest_price(&symbol).await {
                Ok(price) => price.filter(|p| *p > Decimal::ZERO),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Price lookup failed");
                    None
                }
            };
            let _ = reply.send(price);
        });
    }

    fn broadcast(&mut self, event: &ServerEvent) {
        let report = self.fanout.broadcast(event);
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        if report.removed > 0 {
            tracing::debug!(removed = report.removed, "Dropped closed clients during broadcast");
        }
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    fn on_session_computed(&mut self, status: SessionStatus, days: TradingDays) {
        self.us_days = days;

        let changed = self
            .session
            .as_ref()
            .is_none_or(|previous| !previous.same_phase(&status));
        if changed {
            tracing::info!(status = status.status.as_str(), "Market session changed");
            let event = ServerEvent::MarketStatus(MarketStatusEvent::new(status.clone(), Utc::now()));
            self.broadcast(&event);
        }
        self.session = Some(status);
    }

    // -------------------------------------------------------------------------
    // Background tasks
    // -------------------------------------------------------------------------

    fn on_poll_cycle_completed(&mut self, generation: u64) {
        if generation == self.poll_generation && self.poller.is_some() && self.epoch.is_some() {
            tracing::info!(generation, "Stream live after overlap pass, stopping poller");
            self.stop_poller();
        }
    }

    fn start_poller(&mut self) {
        if self.poller.is_some() {
            return;
        }
        self.poll_generation += 1;
        let token = self.cancel.child_token();
        let poller = FallbackPoller::new(
            Arc::clone(&self.source),
            Arc::clone(&self.clock),
            self.symbols_tx.subscribe(),
            self.commands.clone(),
            self.config.poll_interval,
            self.poll_generation,
        );
        tokio::spawn(poller.run(token.clone()));
        self.poller = Some(token);
    }

    fn stop_poller(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
    }

    fn start_monitor(&mut self) {
        let token = self.cancel.child_token();
        let monitor = SessionMonitor::new(
            Arc::clone(&self.clock),
            self.commands.clone(),
            self.config.session_interval,
        );
        tokio::spawn(monitor.run(token.clone()));
        self.monitor = Some(token);
    }

    fn stop_monitor(&mut self) {
        if let Some(token) = self.monitor.take() {
            token.cancel();
        }
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    fn publish_symbols(&self) {
        self.symbols_tx.send_replace(self.registry.symbols());
    }

    fn publish_stats(&self) {
        let registry = self.registry.stats();
        self.stats.clients.store(self.fanout.len(), Ordering::Relaxed);
        self.stats.symbols.store(registry.symbols, Ordering::Relaxed);
        self.stats
            .subscriptions
            .store(registry.total_subscriptions, Ordering::Relaxed);
        self.stats
            .poller_active
            .store(self.poller.is_some(), Ordering::Relaxed);
        self.stats
            .monitor_active
            .store(self.monitor.is_some(), Ordering::Relaxed);
        self.stats
            .stream_authenticated
            .store(self.epoch.is_some(), Ordering::Relaxed);
        metrics::set_clients(self.fanout.len());
        metrics::set_subscriptions(registry.symbols);
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Current upstream epoch, if authenticated.
    #[must_use]
    pub const fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    /// Whether the fallback poller is running.
    #[must_use]
    pub const fn poller_active(&self) -> bool {
        self.poller.is_some()
    }

    /// Whether the session monitor is running.
    #[must_use]
    pub const fn monitor_active(&self) -> bool {
        self.monitor.is_some()
    }

    /// Canonical price for a symbol.
    #[must_use]
    pub fn canonical_price(&self, symbol: &str) -> Option<Decimal> {
        self.validator.canonical_price(symbol)
    }

    /// Aggregate subscription set.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.registry.symbols()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::application::ports::{MarketDataError, MockPriceSource, MockTradingCalendar};
    use crate::domain::session::MarketState;
    use crate::infrastructure::broadcast::{ClientReceiver, client_channel};

    struct Fixture {
        engine: Engine,
        upstream: mpsc::UnboundedReceiver<UpstreamCommand>,
        handle: EngineHandle,
        _commands: mpsc::Receiver<EngineCommand>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut source = MockPriceSource::new();
            source.expect_latest_price().returning(|_| Ok(None));
            Self::with_source(source)
        }

        fn with_source(source: MockPriceSource) -> Self {
            let mut calendar = MockTradingCalendar::new();
            calendar.expect_trading_days().returning(|_, _| Ok(vec![]));
            let clock = Arc::new(SessionClock::new(Arc::new(calendar)));
            let (handle, commands) = EngineHandle::channel(256);
            let (up_tx, up_rx) = mpsc::unbounded_channel();
            let engine = Engine::new(
                EngineConfig::default(),
                Arc::new(source),
                clock,
                up_tx,
                &handle,
                CancellationToken::new(),
            );
            Self {
                engine,
                upstream: up_rx,
                handle,
                _commands: commands,
            }
        }

        fn connect(&mut self, client: ClientId) -> ClientReceiver {
            let (sender, rx) = client_channel();
            self.engine
                .handle(EngineCommand::ClientConnected { client, sender });
            rx
        }

        fn subscribe(&mut self, client: ClientId, symbol: &str) {
            self.engine.handle(EngineCommand::Subscribe {
                client,
                symbol: symbol.to_string(),
            });
        }

        fn unsubscribe(&mut self, client: ClientId, symbol: &str) {
            self.engine.handle(EngineCommand::Unsubscribe {
                client,
                symbol: symbol.to_string(),
            });
        }

        fn upstream(&mut self, event: UpstreamEvent) {
            self.engine.handle(EngineCommand::Upstream(event));
        }

        fn drain_upstream(&mut self) -> Vec<UpstreamCommand> {
            let mut out = Vec::new();
            while let Ok(cmd) = self.upstream.try_recv() {
                out.push(cmd);
            }
            out
        }
    }

    fn frames(rx: &mut ClientReceiver) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn trade(symbol: &str, cents: i64) -> UpstreamEvent {
        UpstreamEvent::Observation(PriceObservation::trade(
            symbol,
            Decimal::new(cents, 2),
            Utc::now(),
        ))
    }

    fn quote(symbol: &str, cents: i64) -> UpstreamEvent {
        UpstreamEvent::Observation(PriceObservation::quote(
            symbol,
            Decimal::new(cents, 2),
            Utc::now(),
        ))
    }

    fn status(state: MarketState) -> SessionStatus {
        SessionStatus {
            status: state,
            message: state.message().to_string(),
            next_open: None,
            next_close: None,
        }
    }

    #[tokio::test]
    async fn poller_follows_stream_state() {
        let mut f = Fixture::new();
        let _rx = f.connect(1);

        f.subscribe(1, "AAPL");
        assert!(f.engine.poller_active());

        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });
        assert!(!f.engine.poller_active());

        f.upstream(UpstreamEvent::Disconnected);
        assert!(f.engine.poller_active());
        assert_eq!(f.engine.epoch(), None);
    }

    #[tokio::test]
    async fn empty_set_does_not_restart_poller_on_disconnect() {
        let mut f = Fixture::new();
        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });
        f.upstream(UpstreamEvent::Disconnected);
        assert!(!f.engine.poller_active());
    }

    #[tokio::test]
    async fn reauthentication_resubscribes_once() {
        let mut f = Fixture::new();
        f.subscribe(1, "MSFT");
        f.subscribe(2, "aapl");
        assert!(f.drain_upstream().is_empty());

        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });
        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });
        assert_eq!(
            f.drain_upstream(),
            vec![UpstreamCommand::subscribe(
                1,
                vec!["AAPL".to_string(), "MSFT".to_string()]
            )]
        );

        f.upstream(UpstreamEvent::Disconnected);
        f.upstream(UpstreamEvent::Authenticated { epoch: 2 });
        assert_eq!(
            f.drain_upstream(),
            vec![UpstreamCommand::subscribe(
                2,
                vec!["AAPL".to_string(), "MSFT".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn subscribe_while_authenticated_sends_delta() {
        let mut f = Fixture::new();
        f.upstream(UpstreamEvent::Authenticated { epoch: 3 });

        f.subscribe(1, "AAPL");
        f.subscribe(2, "AAPL");

        assert_eq!(
            f.drain_upstream(),
            vec![UpstreamCommand::subscribe(3, vec!["AAPL".to_string()])]
        );
    }

    #[tokio::test]
    async fn overlap_poller_stops_after_first_pass() {
        let mut f = Fixture::new();
        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });

        f.subscribe(1, "AAPL");
        assert!(f.engine.poller_active());

        f.engine
            .handle(EngineCommand::PollCycleCompleted { generation: 0 });
        assert!(f.engine.poller_active());

        f.engine
            .handle(EngineCommand::PollCycleCompleted { generation: 1 });
        assert!(!f.engine.poller_active());
    }

    #[tokio::test]
    async fn poll_pass_without_stream_keeps_poller() {
        let mut f = Fixture::new();
        f.subscribe(1, "AAPL");

        f.engine
            .handle(EngineCommand::PollCycleCompleted { generation: 1 });

        assert!(f.engine.poller_active());
    }

    #[tokio::test]
    async fn last_unsubscribe_stops_poller_and_forgets_price() {
        let mut f = Fixture::new();
        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });
        f.subscribe(1, "AAPL");
        f.upstream(trade("AAPL", 18720));
        f.drain_upstream();

        f.unsubscribe(1, "AAPL");

        assert!(!f.engine.poller_active());
        assert_eq!(f.engine.canonical_price("AAPL"), None);
        assert_eq!(
            f.drain_upstream(),
            vec![UpstreamCommand::unsubscribe(1, vec!["AAPL".to_string()])]
        );
    }

    #[tokio::test]
    async fn trade_broadcast_to_viewers() {
        let mut f = Fixture::new();
        let mut rx1 = f.connect(1);
        let mut rx2 = f.connect(2);
        f.subscribe(1, "VOD.L");

        f.upstream(trade("VOD.L", 7215));

        let a = frames(&mut rx1);
        let b = frames(&mut rx2);
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_eq!(a[0]["type"], "price");
        assert_eq!(a[0]["symbol"], "VOD.L");
        assert_eq!(a[0]["currency"], "GBP");
    }

    #[tokio::test]
    async fn unsubscribed_observations_ignored() {
        let mut f = Fixture::new();
        let mut rx = f.connect(1);

        f.upstream(trade("TSLA", 25000));

        assert!(frames(&mut rx).is_empty());
        assert_eq!(f.engine.canonical_price("TSLA"), None);
    }

    #[tokio::test]
    async fn deviant_quote_not_broadcast() {
        let mut f = Fixture::new();
        let mut rx = f.connect(1);
        f.subscribe(1, "AAPL");
        f.upstream(trade("AAPL", 10000));
        frames(&mut rx);

        f.upstream(quote("AAPL", 10060));

        assert!(frames(&mut rx).is_empty());
        assert_eq!(f.engine.canonical_price("AAPL"), Some(Decimal::new(10000, 2)));
    }

    #[tokio::test]
    async fn identical_session_status_broadcast_once() {
        let mut f = Fixture::new();
        let mut rx = f.connect(1);

        for _ in 0..2 {
            f.engine.handle(EngineCommand::SessionComputed {
                status: status(MarketState::Open),
                days: TradingDays::Unavailable,
            });
        }
        f.engine.handle(EngineCommand::SessionComputed {
            status: status(MarketState::AfterHours),
            days: TradingDays::Unavailable,
        });

        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["data"]["status"], "open");
        assert_eq!(sent[1]["data"]["status"], "after-hours");
    }

    #[tokio::test]
    async fn new_viewer_gets_snapshot() {
        let mut f = Fixture::new();
        let _rx1 = f.connect(1);
        f.subscribe(1, "AAPL");
        f.upstream(trade("AAPL", 18720));
        f.engine.handle(EngineCommand::SessionComputed {
            status: status(MarketState::Open),
            days: TradingDays::Unavailable,
        });

        let mut rx2 = f.connect(2);

        let sent = frames(&mut rx2);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["type"], "market-status");
        assert_eq!(sent[1]["type"], "market-update");
        assert_eq!(sent[1]["data"][0]["symbol"], "AAPL");
    }

    #[tokio::test]
    async fn subscribing_to_cached_symbol_sends_price() {
        let mut f = Fixture::new();
        let _rx1 = f.connect(1);
        let mut rx2 = f.connect(2);
        f.subscribe(1, "AAPL");
        f.upstream(trade("AAPL", 18720));
        frames(&mut rx2);

        f.subscribe(2, "AAPL");

        let sent = frames(&mut rx2);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "price");
    }

    #[tokio::test]
    async fn monitor_follows_viewers() {
        let mut f = Fixture::new();
        let _rx1 = f.connect(1);
        let _rx2 = f.connect(2);
        assert!(f.engine.monitor_active());
        f.subscribe(1, "AAPL");

        f.engine
            .handle(EngineCommand::ClientDisconnected { client: 1 });
        assert!(f.engine.monitor_active());
        assert!(f.engine.symbols().is_empty());

        f.engine
            .handle(EngineCommand::ClientDisconnected { client: 2 });
        assert!(!f.engine.monitor_active());
        assert!(!f.engine.poller_active());
    }

    #[tokio::test]
    async fn late_poll_for_removed_symbol_discarded() {
        let mut f = Fixture::new();
        let mut rx = f.connect(1);

        f.engine.handle(EngineCommand::Polled {
            observation: PriceObservation::poll("AAPL", Decimal::new(18720, 2), Utc::now()),
            session: status(MarketState::Open),
        });

        assert!(frames(&mut rx).is_empty());
        assert_eq!(f.engine.canonical_price("AAPL"), None);
    }

    #[tokio::test]
    async fn poll_carries_supplied_session() {
        let mut f = Fixture::new();
        let mut rx = f.connect(1);
        f.subscribe(1, "AAPL");

        f.engine.handle(EngineCommand::Polled {
            observation: PriceObservation::poll("AAPL", Decimal::new(18720, 2), Utc::now()),
            session: status(MarketState::Open),
        });

        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["marketState"], "open");
    }

    #[tokio::test]
    async fn stats_reflect_state() {
        let mut f = Fixture::new();
        let _rx = f.connect(1);
        let _other = f.connect(2);
        f.subscribe(1, "AAPL");
        f.subscribe(1, "MSFT");
        f.subscribe(2, "AAPL");
        f.upstream(UpstreamEvent::Authenticated { epoch: 1 });

        let stats = f.handle.stats().snapshot();
        assert_eq!(stats.clients, 2);
        assert_eq!(stats.symbols, 2);
        assert_eq!(stats.subscriptions, 3);
        assert!(stats.stream_authenticated);
        assert!(!stats.poller_active);
        assert!(stats.monitor_active);
    }

    #[tokio::test]
    async fn price_query_served_from_cache() {
        let mut f = Fixture::new();
        f.subscribe(1, "AAPL");
        f.upstream(trade("AAPL", 18720));

        let (reply, rx) = oneshot::channel();
        f.engine.handle(EngineCommand::PriceQuery {
            symbol: "aapl".to_string(),
            reply,
        });

        assert_eq!(rx.await.unwrap(), Some(Decimal::new(18720, 2)));
    }

    #[tokio::test]
    async fn price_query_falls_back_to_rest() {
        let mut source = MockPriceSource::new();
        source
            .expect_latest_price()
            .returning(|symbol| match symbol {
                "MSFT" => Ok(Some(Decimal::new(41000, 2))),
                "BAD" => Err(MarketDataError::Request("timeout".to_string())),
                _ => Ok(Some(Decimal::ZERO)),
            });
        let mut f = Fixture::with_source(source);

        let mut ask = |symbol: &str| {
            let (reply, rx) = oneshot::channel();
            f.engine.handle(EngineCommand::PriceQuery {
                symbol: symbol.to_string(),
                reply,
            });
            rx
        };
        let msft = ask("MSFT");
        let bad = ask("BAD");
        let zero = ask("ZERO");

        assert_eq!(msft.await.unwrap(), Some(Decimal::new(41000, 2)));
        assert_eq!(bad.await.unwrap(), None);
        assert_eq!(zero.await.unwrap(), None);
    }

    #[tokio::test]
    async fn command_not_starved_by_upstream_burst() {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        for _ in 0..32 {
            events_tx.try_send(UpstreamEvent::Disconnected).unwrap();
        }
        cmd_tx
            .try_send(EngineCommand::ClientDisconnected { client: 7 })
            .unwrap();

        let cancel = CancellationToken::new();
        let mut inputs = EngineInputs::new(cmd_rx, events_rx);
        let first = inputs.next(&cancel).await.unwrap();
        let second = inputs.next(&cancel).await.unwrap();

        let taken = [first, second]
            .iter()
            .filter(|cmd| matches!(cmd, EngineCommand::ClientDisconnected { client: 7 }))
            .count();
        assert_eq!(taken, 1);
    }

    #[tokio::test]
    async fn inputs_drain_one_side_and_end_when_both_close() {
        let (events_tx, events_rx) = mpsc::channel(4);
        let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(4);
        events_tx.try_send(UpstreamEvent::Disconnected).unwrap();
        events_tx.try_send(UpstreamEvent::Disconnected).unwrap();
        drop(events_tx);
        drop(cmd_tx);

        let cancel = CancellationToken::new();
        let mut inputs = EngineInputs::new(cmd_rx, events_rx);
        for _ in 0..2 {
            let input = inputs.next(&cancel).await;
            assert!(matches!(
                input,
                Some(EngineCommand::Upstream(UpstreamEvent::Disconnected))
            ));
        }
        assert!(inputs.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let f = Fixture::new();
        let cancel = f.engine.cancel.clone();
        let (_events_tx, events_rx) = mpsc::channel(1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        cancel.cancel();
        f.engine.run(cmd_rx, events_rx).await;
    }
}
