//! The mutable value threaded through one dispatch chain.
//!
//! Every subscriber receives the same [`HandlerPayload`] by `&mut` and edits
//! it in place. Wire shape:
//!
//! ```json
//! {
//!   "data": {},
//!   "result": null,
//!   "error": { "message": "...", "key": "...", "stack": null, "meta": null },
//!   "stopProcessing": false,
//!   "sessionId": "2f1c..."
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::SessionId;

/// Key of the error synthesized when a subscriber stops the chain silently.
pub const EVENT_PROCESSING_STOPPED: &str = "EVENT_PROCESSING_STOPPED";

/// Key of the error recorded when a subscriber returns `Err`.
pub const EVENT_HANDLER_FAILED: &str = "EVENT_HANDLER_FAILED";

/// Error attached to a payload by a subscriber or by the event service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{key}: {message}")]
pub struct HandlerError {
    pub message: String,
    pub key: String,
    pub stack: Option<String>,
    pub meta: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: key.into(),
            stack: None,
            meta: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Default error for a chain stopped without an explanation.
    pub fn processing_stopped() -> Self {
        Self::new("Event processing stopped", EVENT_PROCESSING_STOPPED)
    }

    /// Error recorded for a subscriber that failed. The stack carries the
    /// full `anyhow` chain.
    pub fn handler_failed(err: &anyhow::Error) -> Self {
        Self::new(err.to_string(), EVENT_HANDLER_FAILED).with_stack(format!("{err:?}"))
    }
}

/// Shared, in-place mutated state of one trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerPayload {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<HandlerError>,
    #[serde(default)]
    pub stop_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl HandlerPayload {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Record `error` and stop the chain after the current subscriber.
    pub fn stop_with(&mut self, error: HandlerError) {
        self.error = Some(error);
        self.stop_processing = true;
    }

    /// Stop the chain after the current subscriber.
    pub fn stop(&mut self) {
        self.stop_processing = true;
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
