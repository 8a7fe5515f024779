//! Alpaca Adapters
//!
//! - **Stream**: Stock trades and quotes over WebSocket (JSON codec)
//! - **REST**: Latest price cascade and trading calendar

pub mod auth;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;

pub use auth::{AuthError, AuthHandler, AuthState};
pub use codec::{CodecError, DecodedFrame, JsonCodec};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{AlpacaRestClient, RestError};
pub use stream::{
    ConnectorSnapshot, ConnectorStatus, StreamConnector, StreamConnectorConfig, StreamError,
};
