//! Task/port routing
//!
//! The router maps recorded stream identities onto replay tasks and ports.
//! Topology is built while the log index is constructed: each stream offered
//! by the loader is matched against the whitelist, its task is found or
//! created (by original recorded name), and a port with a bound sink is
//! created for it. Streams whose type cannot be resolved are dropped on
//! their own; the rest of their task is unaffected.
//!
//! Delivery of a global sample index resolves the owning port, checks that
//! the port is active and has a consumer, decodes and publishes the sample,
//! and feeds status samples into the task lifecycle.

mod lifecycle;
mod task;

pub use lifecycle::{LifecycleAction, LifecycleState, TaskStatus};
pub use task::{Port, ReplayTask};

use crate::config::LifecycleConfig;
use crate::error::{ReplayError, Result};
use crate::log::{LogIndex, LogLoader, StreamInfo, Timestamp, split_stream_name};
use crate::transport::Transport;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Task display name mapped to its `(port, type)` pairs
pub type TaskCollection = BTreeMap<String, Vec<(String, String)>>;

/// Result of delivering one global sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Decoded and published
    Delivered,
    /// Nothing is attached downstream, decoding was skipped
    SkippedNoConsumer,
    /// The port is disabled or the stream has no bound port
    Suppressed,
    /// The recorded bytes could not be read or decoded
    DecodeFailed,
    /// No sample exists at the index
    Unavailable,
}

impl DeliveryOutcome {
    /// Whether the sample counts as replayed.
    ///
    /// Skipping for lack of a consumer is a successful no-op.
    pub fn is_replayed(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Delivered | DeliveryOutcome::SkippedNoConsumer
        )
    }
}

/// Anything that can deliver samples of the global sequence
pub trait SampleDelivery: Send + Sync {
    /// Deliver the sample at `index`
    fn deliver(&self, index: usize) -> DeliveryOutcome;
}

/// Stream name and capture time of a global sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Stream the sample belongs to
    pub stream_name: String,
    /// Capture time
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortRef {
    task: usize,
    port: usize,
}

#[derive(Default)]
struct RouterState {
    prefix: String,
    renamings: BTreeMap<String, String>,
    tasks: Vec<ReplayTask>,
    stream_ports: HashMap<String, PortRef>,
    bindings: Vec<Option<PortRef>>,
    index: Option<Arc<dyn LogIndex>>,
}

impl RouterState {
    fn new(prefix: &str, renamings: &BTreeMap<String, String>) -> Self {
        Self {
            prefix: prefix.to_string(),
            renamings: renamings.clone(),
            ..Self::default()
        }
    }

    /// Find the task recorded as `original_name`, creating it on first use.
    ///
    /// Matching uses the original name, never the display name, so a
    /// renaming is applied exactly once.
    fn find_or_create_task(&mut self, original_name: &str, transport: &dyn Transport) -> usize {
        if let Some(idx) = self
            .tasks
            .iter()
            .position(|t| t.original_name() == original_name)
        {
            return idx;
        }

        let renaming = self.renamings.get(original_name).map(String::as_str);
        let task = ReplayTask::new(original_name, &self.prefix, renaming, transport);
        self.tasks.push(task);
        self.tasks.len() - 1
    }

    fn include_stream(
        &mut self,
        stream: &StreamInfo,
        whitelist: &[Regex],
        transport: &dyn Transport,
    ) -> bool {
        debug!(stream = %stream.name, "Checking stream");

        let Some((task_name, port_name)) = split_stream_name(&stream.name) else {
            warn!(stream = %stream.name, "Skipping stream without <task>.<port> name");
            return false;
        };

        if !whitelist.is_empty() && !whitelist.iter().any(|re| re.is_match(task_name)) {
            info!(stream = %stream.name, "Skipping non-whitelisted stream");
            return false;
        }

        if let Some(model) = &stream.task_model {
            debug!(stream = %stream.name, model = %model, "Stream task model");
        }

        let task = self.find_or_create_task(task_name, transport);
        match self.tasks[task].add_port(port_name, stream, transport) {
            Some(port) => {
                self.stream_ports
                    .insert(stream.name.clone(), PortRef { task, port });
                true
            }
            None => false,
        }
    }

    fn locate(&self, index: usize) -> Option<(PortRef, crate::log::SampleLocation)> {
        let location = self.index.as_ref()?.sample_at(index)?;
        let port = self.bindings.get(location.stream.index()).copied().flatten()?;
        Some((port, location))
    }
}

/// Routes replayed samples to tasks and ports
pub struct Router {
    transport: Arc<dyn Transport>,
    lifecycle: LifecycleConfig,
    state: Mutex<RouterState>,
}

impl Router {
    /// Create a router with no session loaded
    pub fn new(transport: Arc<dyn Transport>, lifecycle: LifecycleConfig) -> Self {
        Self {
            transport,
            lifecycle,
            state: Mutex::new(RouterState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index `files` and build the task/port topology.
    ///
    /// All previous tasks, ports and activation flags are discarded. Whitelist
    /// entries are regular expressions that must match the whole task name;
    /// an empty whitelist admits every stream.
    ///
    /// # Errors
    ///
    /// Fails on an invalid whitelist pattern or when the index cannot be
    /// built. The router is left empty in that case.
    pub fn initialize(
        &self,
        loader: &dyn LogLoader,
        files: &[PathBuf],
        prefix: &str,
        whitelist: &[String],
        renamings: &BTreeMap<String, String>,
    ) -> Result<()> {
        *self.lock() = RouterState::default();

        let patterns = compile_whitelist(whitelist)?;
        let transport = Arc::clone(&self.transport);
        let mut fresh = RouterState::new(prefix, renamings);

        let index = loader.load(files, &mut |stream| {
            fresh.include_stream(stream, &patterns, transport.as_ref())
        })?;

        let bindings = index
            .streams()
            .into_iter()
            .map(|(_, info)| fresh.stream_ports.get(&info.name).copied())
            .collect();
        fresh.bindings = bindings;

        info!(
            files = files.len(),
            tasks = fresh.tasks.len(),
            samples = index.sample_count(),
            "Router initialized"
        );

        fresh.index = Some(index);
        *self.lock() = fresh;
        Ok(())
    }

    /// Index built by the last successful [`Router::initialize`]
    pub fn index(&self) -> Option<Arc<dyn LogIndex>> {
        self.lock().index.clone()
    }

    /// Number of samples in the global sequence
    pub fn sample_count(&self) -> usize {
        self.lock()
            .index
            .as_ref()
            .map_or(0, |index| index.sample_count())
    }

    /// Enable or disable replay for one port.
    ///
    /// `task_name` may carry the session prefix and may be a display name.
    /// Unknown tasks are created; unknown ports remember the flag until the
    /// port exists. Returns whether an existing port was updated.
    pub fn activate_replay_for_port(&self, task_name: &str, port_name: &str, enabled: bool) -> bool {
        let mut state = self.lock();

        let task = match state.tasks.iter().position(|t| t.display_name() == task_name) {
            Some(idx) => idx,
            None => {
                let original = if state.prefix.is_empty() {
                    task_name.to_string()
                } else {
                    task_name
                        .strip_prefix(state.prefix.as_str())
                        .unwrap_or(task_name)
                        .to_string()
                };
                state.find_or_create_task(&original, self.transport.as_ref())
            }
        };

        let updated = state.tasks[task].set_port_active(port_name, enabled);
        debug!(
            task = task_name,
            port = port_name,
            enabled,
            updated,
            "Port replay activation"
        );
        updated
    }

    /// Snapshot of all tasks with at least one port
    pub fn task_snapshot(&self) -> TaskCollection {
        self.lock()
            .tasks
            .iter()
            .filter(|t| !t.ports().is_empty())
            .map(|t| (t.display_name().to_string(), t.port_collection()))
            .collect()
    }

    /// Advisory lifecycle state of a task by display name
    pub fn lifecycle_state(&self, task_name: &str) -> Option<LifecycleState> {
        self.lock()
            .tasks
            .iter()
            .find(|t| t.display_name() == task_name)
            .map(|t| t.lifecycle_state())
    }

    /// Stream name and timestamp of the sample at `index`
    pub fn sample_metadata(&self, index: usize) -> Option<SampleMetadata> {
        let state = self.lock();
        let log = state.index.as_ref()?;
        let location = log.sample_at(index)?;
        let stream = log.stream(location.stream)?;

        Some(SampleMetadata {
            stream_name: stream.name.clone(),
            timestamp: location.timestamp,
        })
    }

    /// Whether the sample at `index` would be replayed: its port exists and
    /// is active
    pub fn can_replay(&self, index: usize) -> bool {
        let state = self.lock();
        state
            .locate(index)
            .is_some_and(|(port, _)| state.tasks[port.task].can_replay(port.port))
    }

    /// Deliver the sample at `index`.
    ///
    /// Per-sample faults are reported through the outcome, never as errors.
    pub fn deliver(&self, index: usize) -> DeliveryOutcome {
        let mut state = self.lock();

        let Some(log) = state.index.clone() else {
            return DeliveryOutcome::Unavailable;
        };
        if index >= log.sample_count() {
            return DeliveryOutcome::Unavailable;
        }

        let Some((port, location)) = state.locate(index) else {
            return DeliveryOutcome::Suppressed;
        };

        state.tasks[port.task].replay(port.port, log.as_ref(), location, &self.lifecycle)
    }
}

impl SampleDelivery for Router {
    fn deliver(&self, index: usize) -> DeliveryOutcome {
        Router::deliver(self, index)
    }
}

fn compile_whitelist(entries: &[String]) -> Result<Vec<Regex>> {
    entries
        .iter()
        .map(|entry| {
            Regex::new(&format!("^(?:{})$", entry)).map_err(|e| {
                ReplayError::Configuration(format!("invalid whitelist pattern {:?}: {}", entry, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{MemoryLog, StreamInfo, Timestamp};
    use crate::transport::MemoryTransport;

    fn samples(count: usize, offset_ms: i64, payload: &str) -> Vec<(Timestamp, Vec<u8>)> {
        (0..count)
            .map(|i| {
                (
                    Timestamp::from_millis(i as i64 * 10 + offset_ms),
                    payload.as_bytes().to_vec(),
                )
            })
            .collect()
    }

    fn fixture() -> (MemoryLog, MemoryTransport) {
        let log = MemoryLog::new()
            .with_stream("arm.log", StreamInfo::new("arm.joints", "/base/Joints"), samples(3, 0, r#"{"q":[0.1]}"#))
            .with_stream("arm.log", StreamInfo::new("arm.state", "int"), samples(2, 5, "5"))
            .with_stream("arm.log", StreamInfo::new("arm.camera", "/base/Frame"), samples(4, 1, "{}"))
            .with_stream("base.log", StreamInfo::new("base.odometry", "/base/Pose"), samples(2, 2, "{}"));
        let transport = MemoryTransport::with_types(["/base/Joints", "int", "/base/Pose"]);
        (log, transport)
    }

    fn router(transport: &MemoryTransport) -> Router {
        Router::new(Arc::new(transport.clone()), LifecycleConfig::default())
    }

    fn all_files() -> Vec<PathBuf> {
        vec!["arm.log".into(), "base.log".into()]
    }

    #[test]
    fn test_unknown_type_excludes_only_that_stream() {
        let (log, transport) = fixture();
        let router = router(&transport);
        router
            .initialize(&log, &all_files(), "", &[], &BTreeMap::new())
            .unwrap();

        // camera frames are not decodable and take no slots
        assert_eq!(router.sample_count(), 3 + 2 + 2);

        let snapshot = router.task_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot["arm"],
            vec![
                ("joints".to_string(), "/base/Joints".to_string()),
                ("state".to_string(), "int".to_string())
            ]
        );
    }

    #[test]
    fn test_whitelist_is_anchored_regex() {
        let (log, transport) = fixture();
        let router = router(&transport);

        router
            .initialize(&log, &all_files(), "", &["ba.*".to_string()], &BTreeMap::new())
            .unwrap();
        assert_eq!(router.task_snapshot().keys().collect::<Vec<_>>(), vec!["base"]);

        router
            .initialize(&log, &all_files(), "", &["as".to_string()], &BTreeMap::new())
            .unwrap();
        assert!(router.task_snapshot().is_empty());
        assert_eq!(router.sample_count(), 0);
    }

    #[test]
    fn test_invalid_whitelist_is_configuration_error() {
        let (log, transport) = fixture();
        let router = router(&transport);
        let result = router.initialize(&log, &all_files(), "", &["(".to_string()], &BTreeMap::new());
        assert!(matches!(result, Err(ReplayError::Configuration(_))));
        assert_eq!(router.sample_count(), 0);
    }

    #[test]
    fn test_failed_initialize_leaves_router_empty() {
        let (log, transport) = fixture();
        let router = router(&transport);
        router
            .initialize(&log, &all_files(), "", &[], &BTreeMap::new())
            .unwrap();

        let result = router.initialize(&log, &["nope.log".into()], "", &[], &BTreeMap::new());
        assert!(matches!(result, Err(ReplayError::Setup(_))));
        assert_eq!(router.sample_count(), 0);
        assert!(router.task_snapshot().is_empty());
        assert_eq!(router.deliver(0), DeliveryOutcome::Unavailable);
    }

    #[test]
    fn test_prefix_and_activation() {
        let (log, transport) = fixture();
        transport.attach_consumer("sim/arm.joints");
        let router = router(&transport);
        router
            .initialize(&log, &all_files(), "sim/", &[], &BTreeMap::new())
            .unwrap();

        assert!(router.task_snapshot().contains_key("sim/arm"));
        assert_eq!(router.deliver(0), DeliveryOutcome::Delivered);

        // prefixed and bare names resolve to the same task
        assert!(router.activate_replay_for_port("sim/arm", "joints", false));
        assert_eq!(router.deliver(0), DeliveryOutcome::Suppressed);
        assert!(!router.can_replay(0));

        assert!(router.activate_replay_for_port("arm", "joints", true));
        assert_eq!(router.deliver(0), DeliveryOutcome::Delivered);
        assert_eq!(router.task_snapshot().len(), 2);
    }

    #[test]
    fn test_no_consumer_skips_decoding() {
        let (log, transport) = fixture();
        let router = router(&transport);
        router
            .initialize(&log, &all_files(), "", &[], &BTreeMap::new())
            .unwrap();

        let outcome = router.deliver(0);
        assert_eq!(outcome, DeliveryOutcome::SkippedNoConsumer);
        assert!(outcome.is_replayed());
        assert!(transport.published().is_empty());
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let log = MemoryLog::new().with_stream(
            "bad.log",
            StreamInfo::new("arm.state", "int"),
            vec![(Timestamp::from_millis(0), b"not-json".to_vec())],
        );
        let transport = MemoryTransport::with_types(["int"]);
        transport.attach_consumer("arm.state");
        let router = router(&transport);
        router
            .initialize(&log, &["bad.log".into()], "", &[], &BTreeMap::new())
            .unwrap();

        assert_eq!(router.deliver(0), DeliveryOutcome::DecodeFailed);
        assert_eq!(router.deliver(1), DeliveryOutcome::Unavailable);
    }

    #[test]
    fn test_sample_metadata() {
        let (log, transport) = fixture();
        let router = router(&transport);
        router
            .initialize(&log, &all_files(), "", &[], &BTreeMap::new())
            .unwrap();

        let first = router.sample_metadata(0).unwrap();
        assert_eq!(first.stream_name, "arm.joints");
        assert_eq!(first.timestamp, Timestamp::from_millis(0));

        let second = router.sample_metadata(1).unwrap();
        assert_eq!(second.stream_name, "base.odometry");
        assert!(router.sample_metadata(100).is_none());
    }

    #[test]
    fn test_renaming_keeps_original_for_matching() {
        let (log, transport) = fixture();
        let router = router(&transport);
        let renamings = BTreeMap::from([("arm".to_string(), "manipulator".to_string())]);
        router
            .initialize(&log, &all_files(), "", &[], &renamings)
            .unwrap();

        let snapshot = router.task_snapshot();
        assert!(snapshot.contains_key("manipulator"));
        assert!(!snapshot.contains_key("arm"));
        // both arm streams landed on the single renamed task
        assert_eq!(snapshot["manipulator"].len(), 2);

        assert!(router.activate_replay_for_port("manipulator", "state", false));
        assert_eq!(router.task_snapshot().len(), 2);
    }
}
