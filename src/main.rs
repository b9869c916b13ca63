//! Spatial Controller
//!
//! Runs the gesture engine against a simulated room: a user calibrates the
//! devices, points at two of them and dims everything.
//!
//! Usage: `spatial-controller [config.json|config.xml] [--quick]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use spatial_controller::calibration::{CalibrationStore, Station};
use spatial_controller::config::CalibrationConfig;
use spatial_controller::engine::{EngineState, GestureEngine};
use spatial_controller::geometry::Vector3;
use spatial_controller::sim::SimulatedRoom;
use spatial_controller::telemetry::{init_logging, LogConfig};
use spatial_controller::tracker::UserId;
use spatial_controller::ControllerConfig;

const USER: UserId = 1;
const DEMO_LENGTH: Duration = Duration::from_secs(10);

fn demo_room() -> SimulatedRoom {
    SimulatedRoom::new()
        .with_device(2, Vector3::new(1200.0, 900.0, 3500.0))
        .with_device(3, Vector3::new(-1400.0, 300.0, 3000.0))
        .with_device(5, Vector3::new(200.0, 1500.0, 4200.0))
        .with_station(Station::A, Vector3::new(900.0, 0.0, 3000.0))
        .with_station(Station::B, Vector3::new(-700.0, 0.0, 1500.0))
}

/// Move the simulated user through the demo gestures.
fn act(room: &SimulatedRoom, elapsed: Duration) {
    let head_y = room.head_y(USER).unwrap_or(0.0);
    let secs = elapsed.as_secs_f64();

    if secs < 3.0 {
        room.point_at_device(USER, 2);
    } else if secs < 6.0 {
        room.lower_hands(USER);
        room.point_at_device(USER, 3);
    } else if secs < 7.0 {
        room.hold_hands_at(USER, head_y + 300.0);
    } else if secs < 9.0 {
        // Lower both hands 600 mm over two seconds
        room.hold_hands_at(USER, head_y + 300.0 - (secs - 7.0) * 300.0);
    } else {
        room.lower_hands(USER);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = match init_logging(&LogConfig::default()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Spatial Controller v{}", env!("CARGO_PKG_VERSION"));

    let mut config_path = None;
    let mut quick = false;
    for arg in std::env::args().skip(1) {
        if arg == "--quick" {
            quick = true;
        } else {
            config_path = Some(PathBuf::from(arg));
        }
    }

    let mut config = match config_path.or_else(ControllerConfig::default_path) {
        Some(path) => ControllerConfig::load_or_default(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    if quick {
        config.calibration = CalibrationConfig {
            on_divergence: config.calibration.on_divergence,
            ..CalibrationConfig::immediate()
        };
    }

    let room = Arc::new(demo_room());
    room.set_jitter(5.0);
    room.place_user(USER, Vector3::new(0.0, 0.0, 2500.0));

    let store = CalibrationStore::new(config.calibration_file.clone());
    let mut interval = tokio::time::interval(config.tick_interval());
    let mut engine = GestureEngine::new(room.context(), config, Instant::now());
    let snapshot = engine.ray_snapshot();

    tracing::info!("Engine started in state {}", engine.state());

    let mut ready_since: Option<Instant> = None;
    let mut last_state = engine.state();

    loop {
        interval.tick().await;
        let now = Instant::now();

        if let Some(since) = ready_since {
            let elapsed = now.duration_since(since);
            if elapsed > DEMO_LENGTH {
                break;
            }
            act(&room, elapsed);
        }

        let report = engine.tick(now);

        if report.state != last_state {
            tracing::info!("Engine state: {} -> {}", last_state, report.state);
            last_state = report.state;
        }
        if ready_since.is_none() && report.state == EngineState::Ready {
            ready_since = Some(now);
        }

        for (device, on) in &report.toggled {
            tracing::info!(device, "Device switched {}", if *on { "on" } else { "off" });
        }
        if let Some(level) = report.dim_level {
            tracing::debug!(level, "Dimming");
        }
        if let Some(rays) = snapshot.get() {
            tracing::trace!(user = rays.user, left = ?rays.left, right = ?rays.right, "Pointers");
        }
    }

    for target in engine.targets() {
        tracing::info!(
            device = target.id(),
            on = room.is_on(target.id()),
            level = room.level(target.id()).unwrap_or(0),
            "Final device state"
        );
    }
    if store.exists() {
        tracing::info!("Calibration kept in {}", store.path().display());
    }

    Ok(())
}
