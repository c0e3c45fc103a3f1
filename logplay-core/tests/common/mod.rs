//! Shared fixture: one `trajectory_follower` recording with three ports
//!
//! - `follower_data`: 400 samples at 5ms + i * 10ms
//! - `motion_command`: 400 samples at i * 10ms
//! - `state`: 49 status samples at 7ms + i * 100ms
//!
//! 849 samples in total. Global index 250 is `motion_command` sample 119.

#![allow(dead_code)]

use logplay_core::prelude::*;
use serde_json::json;
use std::path::PathBuf;

pub const LOG_FILE: &str = "trajectory_follower_Logger.0.log";
pub const TASK: &str = "trajectory_follower";
pub const FOLLOWER_DATA_TYPE: &str = "/trajectory_follower/FollowerData";
pub const MOTION_COMMAND_TYPE: &str = "/base/commands/Motion2D";
pub const MOTION_COMMAND_INDEX: usize = 250;
pub const SAMPLE_COUNT: usize = 849;

pub fn files() -> Vec<PathBuf> {
    vec![PathBuf::from(LOG_FILE)]
}

fn encode(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Status codes: configure, start, keep running, stop at the end
fn status_code(i: i64) -> i64 {
    match i {
        0 => 0,
        48 => 4,
        _ => 5,
    }
}

pub fn trajectory_log() -> MemoryLog {
    let follower_data = (0..400)
        .map(|i| {
            let ts = Timestamp::from_micros(5_000 + i * 10_000);
            (ts, encode(json!({ "distance_error": 0.01 * i as f64, "heading_error": 0.0 })))
        })
        .collect();

    let motion_command = (0..400)
        .map(|i| {
            let ts = Timestamp::from_millis(i * 10);
            (ts, encode(json!({ "translation": 0.5, "rotation": 0.001 * i as f64 })))
        })
        .collect();

    let state = (0..49)
        .map(|i| {
            let ts = Timestamp::from_millis(7 + i * 100);
            (ts, encode(json!(status_code(i))))
        })
        .collect();

    MemoryLog::new()
        .with_stream(
            LOG_FILE,
            StreamInfo::new("trajectory_follower.follower_data", FOLLOWER_DATA_TYPE)
                .with_task_model("trajectory_follower::Task"),
            follower_data,
        )
        .with_stream(
            LOG_FILE,
            StreamInfo::new("trajectory_follower.motion_command", MOTION_COMMAND_TYPE)
                .with_task_model("trajectory_follower::Task"),
            motion_command,
        )
        .with_stream(
            LOG_FILE,
            StreamInfo::new("trajectory_follower.state", "int")
                .with_task_model("trajectory_follower::Task"),
            state,
        )
}

/// Transport knowing all fixture types, with a consumer on the motion
/// command channel
pub fn transport() -> MemoryTransport {
    let transport = MemoryTransport::with_types([FOLLOWER_DATA_TYPE, MOTION_COMMAND_TYPE, "int"]);
    transport.attach_consumer("trajectory_follower.motion_command");
    transport
}
