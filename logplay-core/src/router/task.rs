//! Replayed tasks and their ports

use super::lifecycle::{LifecycleState, TaskStatus};
use super::DeliveryOutcome;
use crate::config::LifecycleConfig;
use crate::log::{LogIndex, SampleLocation, StreamInfo};
use crate::transport::{Sink, TaskHandle, Transport};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A typed delivery endpoint owned by a task
pub struct Port {
    name: String,
    type_name: String,
    stream_name: String,
    active: bool,
    sink: Box<dyn Sink>,
}

impl Port {
    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recorded sample type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Stream feeding this port
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Whether samples are replayed on this port
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("active", &self.active)
            .field("channel", &self.sink.channel())
            .finish()
    }
}

/// A logical replay target
pub struct ReplayTask {
    display_name: String,
    original_name: String,
    state: LifecycleState,
    handle: Option<Arc<dyn TaskHandle>>,
    ports: Vec<Port>,
    pending_activation: HashMap<String, bool>,
}

impl ReplayTask {
    /// Create a task for the recorded `original_name`.
    ///
    /// The display name is `prefix + renaming` when a renaming is given and
    /// `prefix + original_name` otherwise.
    pub(crate) fn new(
        original_name: &str,
        prefix: &str,
        renaming: Option<&str>,
        transport: &dyn Transport,
    ) -> Self {
        let display_name = format!("{}{}", prefix, renaming.unwrap_or(original_name));
        let handle = transport.create_task(&display_name);

        if handle.is_some() {
            info!(task = %display_name, original = original_name, "Created replay task");
        } else {
            warn!(
                task = %display_name,
                "Could not create task handle; lifecycle requests will be skipped"
            );
        }

        Self {
            display_name,
            original_name: original_name.to_string(),
            state: LifecycleState::default(),
            handle,
            ports: Vec::new(),
            pending_activation: HashMap::new(),
        }
    }

    /// Name the task is exposed under
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Recorded task name used for stream matching
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Advisory lifecycle state
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    /// Ports in creation order
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub(crate) fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    /// Bind `stream` to the port `port_name`, creating the port on first use.
    ///
    /// Returns `None` when the transport has no sink for the stream's type.
    pub(crate) fn add_port(
        &mut self,
        port_name: &str,
        stream: &StreamInfo,
        transport: &dyn Transport,
    ) -> Option<usize> {
        if let Some(existing) = self.port_index(port_name) {
            debug!(task = %self.display_name, port = port_name, "Reusing port for stream");
            return Some(existing);
        }

        let channel = format!("{}.{}", self.display_name, port_name);
        let Some(sink) = transport.create_sink(&stream.type_name, &channel) else {
            warn!(
                stream = %stream.name,
                type_name = %stream.type_name,
                "Cannot replay stream: no decoder for its type"
            );
            return None;
        };

        let active = self.pending_activation.remove(port_name).unwrap_or(true);
        self.ports.push(Port {
            name: port_name.to_string(),
            type_name: stream.type_name.clone(),
            stream_name: stream.name.clone(),
            active,
            sink,
        });

        debug!(task = %self.display_name, port = port_name, active, "Added port");
        Some(self.ports.len() - 1)
    }

    /// Enable or disable replay on a port.
    ///
    /// Returns `false` when the port does not exist yet; the flag is kept and
    /// applied once the port is created.
    pub(crate) fn set_port_active(&mut self, port_name: &str, active: bool) -> bool {
        match self.port_index(port_name) {
            Some(idx) => {
                self.ports[idx].active = active;
                true
            }
            None => {
                self.pending_activation.insert(port_name.to_string(), active);
                false
            }
        }
    }

    /// `(port, type)` pairs of all ports
    pub fn port_collection(&self) -> Vec<(String, String)> {
        self.ports
            .iter()
            .map(|p| (p.name.clone(), p.type_name.clone()))
            .collect()
    }

    pub(crate) fn can_replay(&self, port: usize) -> bool {
        self.ports.get(port).is_some_and(|p| p.active)
    }

    /// Decode and publish one sample on `port`
    pub(crate) fn replay(
        &mut self,
        port: usize,
        index: &dyn LogIndex,
        location: SampleLocation,
        lifecycle: &LifecycleConfig,
    ) -> DeliveryOutcome {
        let Some(target) = self.ports.get(port) else {
            return DeliveryOutcome::Suppressed;
        };

        if !target.active {
            return DeliveryOutcome::Suppressed;
        }

        if !target.sink.has_consumer() {
            return DeliveryOutcome::SkippedNoConsumer;
        }

        let raw = match index.read_sample(location.stream, location.position) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    stream = %target.stream_name,
                    position = location.position,
                    "Could not read sample: {}", e
                );
                return DeliveryOutcome::DecodeFailed;
            }
        };

        let sample = match target.sink.decode(&raw) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    stream = %target.stream_name,
                    position = location.position,
                    "Ignoring corrupt sample: {}", e
                );
                return DeliveryOutcome::DecodeFailed;
            }
        };

        if target.name == lifecycle.status_port {
            match sample.as_status_code() {
                Some(code) => self.apply_status(TaskStatus::from(code), lifecycle),
                None => warn!(task = %self.display_name, "Status sample is not an integer"),
            }
        }

        self.ports[port].sink.publish(sample);
        DeliveryOutcome::Delivered
    }

    fn apply_status(&mut self, status: TaskStatus, lifecycle: &LifecycleConfig) {
        match status.lifecycle_state() {
            Some(state) => self.state = state,
            None => warn!(
                task = %self.display_name,
                code = status.code(),
                "Unrecognized task status code"
            ),
        }

        let Some(action) = status.action(lifecycle.unknown_status_starts_task) else {
            return;
        };

        match &self.handle {
            Some(handle) => action.apply(handle.as_ref()),
            None => debug!(task = %self.display_name, ?action, "No task handle, request dropped"),
        }
    }
}

impl fmt::Debug for ReplayTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayTask")
            .field("display_name", &self.display_name)
            .field("original_name", &self.original_name)
            .field("state", &self.state)
            .field("ports", &self.ports)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{MemoryLog, LogLoader, StreamId, Timestamp};
    use crate::router::LifecycleAction;
    use crate::transport::MemoryTransport;

    fn status_log(codes: &[i64]) -> std::sync::Arc<dyn LogIndex> {
        let samples = codes
            .iter()
            .enumerate()
            .map(|(i, c)| (Timestamp::from_millis(i as i64), c.to_string().into_bytes()))
            .collect();
        MemoryLog::new()
            .with_stream("t.log", StreamInfo::new("worker.state", "int"), samples)
            .load(&["t.log".into()], &mut |_| true)
            .unwrap()
    }

    fn location(index: &dyn LogIndex, i: usize) -> SampleLocation {
        let loc = index.sample_at(i).unwrap();
        assert_eq!(loc.stream, StreamId(0));
        loc
    }

    #[test]
    fn test_display_name() {
        let transport = MemoryTransport::new();
        let plain = ReplayTask::new("follower", "", None, &transport);
        let prefixed = ReplayTask::new("follower", "sim/", None, &transport);
        let renamed = ReplayTask::new("follower", "sim/", Some("leader"), &transport);

        assert_eq!(plain.display_name(), "follower");
        assert_eq!(prefixed.display_name(), "sim/follower");
        assert_eq!(renamed.display_name(), "sim/leader");
        assert_eq!(renamed.original_name(), "follower");
    }

    #[test]
    fn test_add_port_requires_known_type() {
        let transport = MemoryTransport::with_types(["int"]);
        let mut task = ReplayTask::new("worker", "", None, &transport);

        let state = StreamInfo::new("worker.state", "int");
        let pose = StreamInfo::new("worker.pose", "/base/Pose");

        assert_eq!(task.add_port("state", &state, &transport), Some(0));
        assert_eq!(task.add_port("pose", &pose, &transport), None);
        assert_eq!(task.add_port("state", &state, &transport), Some(0));
        assert_eq!(task.ports().len(), 1);
    }

    #[test]
    fn test_pending_activation_applies_on_creation() {
        let transport = MemoryTransport::with_types(["int"]);
        let mut task = ReplayTask::new("worker", "", None, &transport);

        assert!(!task.set_port_active("state", false));
        task.add_port("state", &StreamInfo::new("worker.state", "int"), &transport);

        assert!(!task.ports()[0].is_active());
        assert!(task.set_port_active("state", true));
        assert!(task.ports()[0].is_active());
    }

    #[test]
    fn test_status_samples_drive_lifecycle() {
        let transport = MemoryTransport::with_types(["int"]);
        transport.attach_consumer("worker.state");
        let index = status_log(&[0, 5, 4, 2]);
        let lifecycle = LifecycleConfig::default();

        let mut task = ReplayTask::new("worker", "", None, &transport);
        let port = task
            .add_port("state", &StreamInfo::new("worker.state", "int"), &transport)
            .unwrap();

        let expected = [
            LifecycleState::Unconfigured,
            LifecycleState::Running,
            LifecycleState::Stopped,
            LifecycleState::Error,
        ];
        for (i, state) in expected.iter().enumerate() {
            let outcome = task.replay(port, index.as_ref(), location(index.as_ref(), i), &lifecycle);
            assert_eq!(outcome, DeliveryOutcome::Delivered);
            assert_eq!(task.lifecycle_state(), *state);
        }

        assert_eq!(
            transport.lifecycle_requests("worker"),
            vec![
                LifecycleAction::Configure,
                LifecycleAction::Start,
                LifecycleAction::Stop
            ]
        );
        assert_eq!(transport.published_on("worker.state").len(), 4);
    }

    #[test]
    fn test_unknown_status_code() {
        let transport = MemoryTransport::with_types(["int"]);
        transport.attach_consumer("worker.state");
        let index = status_log(&[5, 77]);

        let mut task = ReplayTask::new("worker", "", None, &transport);
        let port = task
            .add_port("state", &StreamInfo::new("worker.state", "int"), &transport)
            .unwrap();

        let lifecycle = LifecycleConfig::default();
        task.replay(port, index.as_ref(), location(index.as_ref(), 0), &lifecycle);
        task.replay(port, index.as_ref(), location(index.as_ref(), 1), &lifecycle);

        // state is kept, no extra request
        assert_eq!(task.lifecycle_state(), LifecycleState::Running);
        assert_eq!(
            transport.lifecycle_requests("worker"),
            vec![LifecycleAction::Start]
        );

        let compat = LifecycleConfig {
            unknown_status_starts_task: true,
            ..LifecycleConfig::default()
        };
        task.replay(port, index.as_ref(), location(index.as_ref(), 1), &compat);
        assert_eq!(
            transport.lifecycle_requests("worker"),
            vec![LifecycleAction::Start, LifecycleAction::Start]
        );
    }

    #[test]
    fn test_failed_lifecycle_request_is_not_fatal() {
        let transport = MemoryTransport::with_types(["int"]);
        transport.attach_consumer("worker.state");
        transport.fail_lifecycle("worker");
        let index = status_log(&[5]);

        let mut task = ReplayTask::new("worker", "", None, &transport);
        let port = task
            .add_port("state", &StreamInfo::new("worker.state", "int"), &transport)
            .unwrap();

        let outcome = task.replay(
            port,
            index.as_ref(),
            location(index.as_ref(), 0),
            &LifecycleConfig::default(),
        );
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(task.lifecycle_state(), LifecycleState::Running);
    }
}
