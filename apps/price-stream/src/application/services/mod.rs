//! Application Services
//!
//! - `Engine`: Single-owner actor applying every state transition
//! - `FallbackPoller`: REST safety net while the stream is down
//! - `SessionMonitor`: Periodic global session status
//! - `SessionClock`: Cached US trading calendar

mod engine;
mod fallback_poller;
mod session_clock;
mod session_monitor;

pub use engine::{
    Engine, EngineCommand, EngineConfig, EngineHandle, EngineSnapshot, EngineStats, EngineStopped,
};
pub use fallback_poller::FallbackPoller;
pub use session_clock::SessionClock;
pub use session_monitor::SessionMonitor;
