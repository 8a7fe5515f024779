//! Stream Codec Module
//!
//! JSON decoding and encoding for Alpaca's stock stream.
//!
//! Alpaca usually batches messages into a JSON array. Some control
//! messages arrive as a single object. Each element is dispatched on its
//! `T` discriminant. A bad element is set aside without discarding the
//! rest of its batch; only a frame that is not JSON at all is rejected.

use super::messages::{
    ErrorMessage, StockQuoteMessage, StockTradeMessage, StreamMessage, SubscriptionMessage,
    SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one text frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Elements that decoded cleanly, in frame order.
    pub messages: Vec<StreamMessage>,
    /// Elements that failed to decode.
    pub rejected: Vec<CodecError>,
}

impl DecodedFrame {
    fn push(&mut self, result: Result<StreamMessage, CodecError>) {
        match result {
            Ok(message) => self.messages.push(message),
            Err(e) => self.rejected.push(e),
        }
    }
}

/// JSON codec for the stock stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON array or object.
    /// Elements that fail to decode are reported in
    /// [`DecodedFrame::rejected`].
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        let mut frame = DecodedFrame::default();

        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    frame.push(Self::decode_value(item));
                }
            }
            serde_json::Value::Object(_) => frame.push(Self::decode_value(value)),
            other => {
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got {}",
                    json_kind(&other)
                )));
            }
        }

        Ok(frame)
    }

    fn decode_value(value: serde_json::Value) -> Result<StreamMessage, CodecError> {
        let msg_type = value
            .get("T")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let message = match msg_type.as_deref() {
            Some("success") => StreamMessage::Success(serde_json::from_value::<SuccessMessage>(value)?),
            Some("error") => StreamMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            Some("subscription") => {
                StreamMessage::Subscription(serde_json::from_value::<SubscriptionMessage>(value)?)
            }
            Some("q") => StreamMessage::Quote(serde_json::from_value::<StockQuoteMessage>(value)?),
            Some("t") => StreamMessage::Trade(serde_json::from_value::<StockTradeMessage>(value)?),
            Some(other) => StreamMessage::Unknown(other.to_string()),
            None => {
                return Err(CodecError::InvalidFormat(
                    "message without T discriminant".to_string(),
                ));
            }
        };

        Ok(message)
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
