//! Headless replay example
//!
//! Builds a small synthetic recording in memory, replays it at four times the
//! recorded pace and prints what reached the attached channels.
//!
//! Run with `RUST_LOG=logplay_core=debug` to follow every delivery.

use logplay_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn recording() -> MemoryLog {
    let commands = (0..50)
        .map(|i| {
            let value = serde_json::json!({ "translation": 0.1 * i as f64, "rotation": 0.0 });
            (Timestamp::from_millis(i * 20), value.to_string().into_bytes())
        })
        .collect();

    let states = [(0, 0), (5, 5), (900, 4)]
        .into_iter()
        .map(|(ms, code)| (Timestamp::from_millis(ms), code.to_string().into_bytes()))
        .collect();

    MemoryLog::new()
        .with_stream(
            "base.0.log",
            StreamInfo::new("base.motion_command", "/base/commands/Motion2D"),
            commands,
        )
        .with_stream("base.0.log", StreamInfo::new("base.state", "int"), states)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Headless Replay Example");
    println!("=======================\n");

    let transport = MemoryTransport::with_types(["/base/commands/Motion2D", "int"]);
    transport.attach_consumer("replay/base.motion_command");
    transport.attach_consumer("replay/base.state");

    let config = ReplayConfig::new()
        .with_files(["base.0.log"])
        .with_prefix("replay/")
        .with_speed(4.0);
    config.validate()?;

    let mut session = ReplaySession::new(
        Arc::new(recording()),
        Arc::new(transport.clone()),
        config,
    );
    session.initialize_from_config().await?;

    println!("Loaded {} samples", session.sample_count());
    for (task, ports) in session.task_snapshot() {
        println!("  task {}", task);
        for (port, type_name) in ports {
            println!("    {} ({})", port, type_name);
        }
    }

    let player = session.player()?;
    player.play()?;

    while !player.has_finished() {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = player.status();
        println!(
            "  index {:>3}/{}  actual speed {:.2}",
            status.current_index,
            status.sample_count.saturating_sub(1),
            status.actual_speed
        );
    }

    println!(
        "\nPublished {} samples, lifecycle requests: {:?}",
        transport.published().len(),
        transport.lifecycle_requests("replay/base")
    );

    session.shutdown().await;
    Ok(())
}
