//! Delivery layer interface
//!
//! A [`Transport`] resolves recorded sample types into [`Sink`]s and creates
//! the task handles that receive lifecycle requests. Sinks are resolved once,
//! when a port is created, and reused for every sample of that port.

mod memory;

pub use memory::{MemoryTransport, PublishedSample};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A decoded sample, ready to publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(Value);

impl Sample {
    /// Wrap a decoded value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Decoded value
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consume the sample, returning the decoded value
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Integer value of a task status sample
    pub fn as_status_code(&self) -> Option<i64> {
        match &self.0 {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<Value> for Sample {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Errors raised while turning raw bytes into a [`Sample`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No decoder is registered for the type
    #[error("no decoder for type {0}")]
    UnknownType(String),

    /// The bytes do not form a valid sample
    #[error("malformed sample: {0}")]
    Malformed(String),

    /// The sample ended early
    #[error("truncated sample ({0} bytes)")]
    Truncated(usize),
}

/// Decode-and-publish capability bound to one port
pub trait Sink: Send + Sync {
    /// Channel the sink publishes to
    fn channel(&self) -> &str;

    /// Whether anything downstream is attached to the channel
    fn has_consumer(&self) -> bool;

    /// Decode raw recorded bytes
    fn decode(&self, raw: &[u8]) -> std::result::Result<Sample, DecodeError>;

    /// Publish a decoded sample on the channel
    fn publish(&self, sample: Sample);
}

/// Lifecycle requests accepted by a replayed task
///
/// Requests are fire-and-forget; the router logs failures and moves on.
pub trait TaskHandle: Send + Sync {
    /// Name the task is exposed under
    fn name(&self) -> &str;

    /// Request configuration
    fn configure(&self) -> Result<()>;

    /// Request start
    fn start(&self) -> Result<()>;

    /// Request stop
    fn stop(&self) -> Result<()>;
}

/// Factory for sinks and task handles
pub trait Transport: Send + Sync {
    /// Expose a task under `name`. `None` when the task cannot be created.
    fn create_task(&self, name: &str) -> Option<Arc<dyn TaskHandle>>;

    /// Resolve `type_name` and create a sink publishing on `channel`.
    /// `None` when the type is unknown or has no decoder.
    fn create_sink(&self, type_name: &str, channel: &str) -> Option<Box<dyn Sink>>;
}
