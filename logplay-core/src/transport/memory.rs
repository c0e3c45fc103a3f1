//! In-process transport
//!
//! Decodes JSON-encoded samples for a fixed set of registered types, records
//! everything published per channel and every lifecycle request per task.
//! Consumers are simulated by attaching to a channel name.

use super::{DecodeError, Sample, Sink, TaskHandle, Transport};
use crate::error::{ReplayError, Result};
use crate::router::LifecycleAction;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A sample captured on a channel
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedSample {
    /// Channel the sample was published on
    pub channel: String,
    /// The published sample
    pub sample: Sample,
}

#[derive(Debug, Default)]
struct TransportState {
    known_types: BTreeSet<String>,
    consumers: HashMap<String, usize>,
    published: Vec<PublishedSample>,
    lifecycle: HashMap<String, Vec<LifecycleAction>>,
    rejected_tasks: HashSet<String>,
    failing_tasks: HashSet<String>,
}

/// Transport that keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MemoryTransport {
    /// Create a transport with no known types
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that can decode the given types
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = Self::new();
        for type_name in types {
            transport.register_type(type_name);
        }
        transport
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `type_name` decodable
    pub fn register_type(&self, type_name: impl Into<String>) {
        self.lock().known_types.insert(type_name.into());
    }

    /// Attach a consumer to `channel`
    pub fn attach_consumer(&self, channel: impl Into<String>) {
        *self.lock().consumers.entry(channel.into()).or_default() += 1;
    }

    /// Detach one consumer from `channel`
    pub fn detach_consumer(&self, channel: &str) {
        let mut state = self.lock();
        if let Some(count) = state.consumers.get_mut(channel) {
            *count = count.saturating_sub(1);
        }
    }

    /// Refuse task creation for `name`
    pub fn reject_task(&self, name: impl Into<String>) {
        self.lock().rejected_tasks.insert(name.into());
    }

    /// Make lifecycle requests to `name` fail
    pub fn fail_lifecycle(&self, name: impl Into<String>) {
        self.lock().failing_tasks.insert(name.into());
    }

    /// Everything published so far, in publication order
    pub fn published(&self) -> Vec<PublishedSample> {
        self.lock().published.clone()
    }

    /// Samples published on one channel
    pub fn published_on(&self, channel: &str) -> Vec<Sample> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.channel == channel)
            .map(|p| p.sample.clone())
            .collect()
    }

    /// Lifecycle requests received by task `name`
    pub fn lifecycle_requests(&self, name: &str) -> Vec<LifecycleAction> {
        self.lock().lifecycle.get(name).cloned().unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn create_task(&self, name: &str) -> Option<Arc<dyn TaskHandle>> {
        let mut state = self.lock();
        if state.rejected_tasks.contains(name) {
            return None;
        }
        state.lifecycle.entry(name.to_string()).or_default();

        Some(Arc::new(MemoryTask {
            name: name.to_string(),
            transport: self.clone(),
        }))
    }

    fn create_sink(&self, type_name: &str, channel: &str) -> Option<Box<dyn Sink>> {
        if !self.lock().known_types.contains(type_name) {
            return None;
        }

        Some(Box::new(MemorySink {
            channel: channel.to_string(),
            transport: self.clone(),
        }))
    }
}

struct MemorySink {
    channel: String,
    transport: MemoryTransport,
}

impl Sink for MemorySink {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn has_consumer(&self) -> bool {
        self.transport
            .lock()
            .consumers
            .get(&self.channel)
            .is_some_and(|count| *count > 0)
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<Sample, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Truncated(0));
        }
        serde_json::from_slice(raw)
            .map(Sample::new)
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn publish(&self, sample: Sample) {
        self.transport.lock().published.push(PublishedSample {
            channel: self.channel.clone(),
            sample,
        });
    }
}

struct MemoryTask {
    name: String,
    transport: MemoryTransport,
}

impl MemoryTask {
    fn request(&self, action: LifecycleAction) -> Result<()> {
        let mut state = self.transport.lock();
        if state.failing_tasks.contains(&self.name) {
            return Err(ReplayError::Other(format!(
                "task {} refused {:?}",
                self.name, action
            )));
        }
        state
            .lifecycle
            .entry(self.name.clone())
            .or_default()
            .push(action);
        Ok(())
    }
}

impl TaskHandle for MemoryTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self) -> Result<()> {
        self.request(LifecycleAction::Configure)
    }

    fn start(&self) -> Result<()> {
        self.request(LifecycleAction::Start)
    }

    fn stop(&self) -> Result<()> {
        self.request(LifecycleAction::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_type_has_no_sink() {
        let transport = MemoryTransport::with_types(["int"]);
        assert!(transport.create_sink("int", "t.state").is_some());
        assert!(transport.create_sink("/base/Pose", "t.pose").is_none());
    }

    #[test]
    fn test_consumer_attachment() {
        let transport = MemoryTransport::with_types(["int"]);
        let sink = transport.create_sink("int", "t.state").unwrap();
        assert!(!sink.has_consumer());

        transport.attach_consumer("t.state");
        assert!(sink.has_consumer());

        transport.detach_consumer("t.state");
        assert!(!sink.has_consumer());
    }

    #[test]
    fn test_decode_and_publish() {
        let transport = MemoryTransport::with_types(["int"]);
        let sink = transport.create_sink("int", "t.state").unwrap();

        let sample = sink.decode(b"5").unwrap();
        assert_eq!(sample.value(), &json!(5));
        sink.publish(sample);

        assert_eq!(transport.published_on("t.state"), vec![Sample::new(json!(5))]);
        assert!(matches!(sink.decode(b""), Err(DecodeError::Truncated(0))));
        assert!(matches!(sink.decode(b"{oops"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_lifecycle_recording() {
        let transport = MemoryTransport::new();
        let task = transport.create_task("follower").unwrap();
        task.configure().unwrap();
        task.start().unwrap();

        assert_eq!(
            transport.lifecycle_requests("follower"),
            vec![LifecycleAction::Configure, LifecycleAction::Start]
        );

        transport.fail_lifecycle("follower");
        assert!(task.stop().is_err());

        transport.reject_task("ghost");
        assert!(transport.create_task("ghost").is_none());
    }
}
