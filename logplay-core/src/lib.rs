//! # Logplay - Paced Replay of Recorded Data Streams
//!
//! Logplay replays samples captured from a component system back into live
//! delivery channels:
//! - Time-merged global sample sequence over any number of log files
//! - Task/port routing with whitelisting, prefixing and renaming
//! - Lazy sink creation per recorded type
//! - Task lifecycle requests driven by recorded status samples
//! - Background playback at the recorded pace, scaled by a speed factor
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logplay_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let log = MemoryLog::new().with_stream(
//!         "robot.log",
//!         StreamInfo::new("arm.state", "int"),
//!         vec![(Timestamp::from_millis(0), b"5".to_vec())],
//!     );
//!     let transport = MemoryTransport::with_types(["int"]);
//!
//!     let config = ReplayConfig::new().with_files(["robot.log"]);
//!     let mut session = ReplaySession::new(Arc::new(log), Arc::new(transport), config);
//!     session.initialize_from_config().await?;
//!
//!     session.player()?.play()?;
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **log**: log index provider interface and an in-memory provider
//! - **transport**: sink and task handle interfaces and an in-memory transport
//! - **router**: maps streams to tasks and ports, delivers single samples
//! - **player**: background scheduler pacing delivery of the global sequence
//! - **session**: initialize/reset facade over router and player

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod log;
pub mod player;
pub mod router;
pub mod session;
pub mod transport;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LifecycleConfig, PlaybackConfig, ReplayConfig};
    pub use crate::error::{ReplayError, Result};
    pub use crate::log::{
        LogIndex, LogLoader, MemoryLog, MemoryLogIndex, SampleLocation, StreamId, StreamInfo,
        Timestamp,
    };
    pub use crate::player::{PlaybackStatus, Player, PlayerPhase};
    pub use crate::router::{
        DeliveryOutcome, LifecycleAction, LifecycleState, Router, SampleDelivery, SampleMetadata,
        TaskCollection, TaskStatus,
    };
    pub use crate::session::ReplaySession;
    pub use crate::transport::{
        DecodeError, MemoryTransport, PublishedSample, Sample, Sink, TaskHandle, Transport,
    };
}
