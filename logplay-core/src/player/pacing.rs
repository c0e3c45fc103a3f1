//! Per-tick pacing arithmetic
//!
//! All quantities are microseconds. The recorded delta is the distance
//! between the previous and the next sample's capture time; the elapsed time
//! is the wall-clock time since the previous tick finished delivering.

use std::time::Duration;

/// What to do before delivering the next sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TickPlan {
    /// Time left to wait before delivery
    pub wait: Duration,
    /// New actual-speed reading, if this tick produces one
    pub actual_speed: Option<f64>,
    /// The recorded delta was negative
    pub out_of_order: bool,
}

/// Plan one tick.
///
/// A negative recorded delta means the samples are out of order: deliver
/// immediately and leave the speed reading alone. When delivery of the
/// previous tick already used up more than the scheduled wait, the reading
/// is the achieved ratio of recorded to elapsed time.
pub(crate) fn plan_tick(recorded_delta: i64, speed_factor: f64, elapsed: i64) -> TickPlan {
    if recorded_delta < 0 {
        return TickPlan {
            wait: Duration::ZERO,
            actual_speed: None,
            out_of_order: true,
        };
    }

    let scheduled = (recorded_delta as f64 / speed_factor) as i64;

    if elapsed < scheduled {
        TickPlan {
            wait: Duration::from_micros((scheduled - elapsed) as u64),
            actual_speed: Some(speed_factor),
            out_of_order: false,
        }
    } else if elapsed == scheduled {
        TickPlan {
            wait: Duration::ZERO,
            actual_speed: Some(speed_factor),
            out_of_order: false,
        }
    } else {
        let elapsed = elapsed.max(1);
        TickPlan {
            wait: Duration::ZERO,
            actual_speed: Some(recorded_delta as f64 / elapsed as f64),
            out_of_order: false,
        }
    }
}
