//! Configuration and serialization module.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default calibration file name, relative to the working directory.
pub const CALIBRATION_DATA_FILE: &str = "calibration.txt";

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "SpatialController", default)]
pub struct ControllerConfig {
    /// Gesture check interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Where calibrated device positions are stored.
    pub calibration_file: PathBuf,
    /// Minimum joint confidence for a reading to be used.
    pub min_joint_confidence: f32,
    pub focus: FocusConfig,
    pub geometry: GeometryConfig,
    pub calibration: CalibrationConfig,
    pub dimming: DimmingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            calibration_file: PathBuf::from(CALIBRATION_DATA_FILE),
            min_joint_confidence: 0.5,
            focus: FocusConfig::default(),
            geometry: GeometryConfig::default(),
            calibration: CalibrationConfig::default(),
            dimming: DimmingConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Platform location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spatial-controller").join("config.json"))
    }

    /// Load from JSON (`.json`) or XML (any other extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        if is_json(path) {
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid JSON config {}", path.display()))
        } else {
            quick_xml::de::from_str(&contents)
                .with_context(|| format!("Invalid XML config {}", path.display()))
        }
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save as JSON or XML, chosen by extension like [`ControllerConfig::load`].
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            quick_xml::se::to_string(self)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// Timing of the focus/debounce state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Minimum sustained focus before a toggle.
    pub activation_window_ms: u64,
    /// Minimum gap between two toggles of the same device.
    pub debounce_window_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            activation_window_ms: 400,
            debounce_window_ms: 2000,
        }
    }
}

impl FocusConfig {
    pub fn activation_window(&self) -> Duration {
        Duration::from_millis(self.activation_window_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

/// Distance tolerances, in tracker units (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Largest gap between two calibration rays that still counts as converging.
    pub max_calibration_distance: f64,
    /// Largest distance between a pointer ray and a device that still targets it.
    pub max_command_distance: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            max_calibration_distance: 250.0,
            max_command_distance: 300.0,
        }
    }
}

/// What to do with a device whose two calibration rays do not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DivergencePolicy {
    /// Place the device at the origin and keep going.
    #[default]
    UseOrigin,
    /// Leave the device uncalibrated.
    Skip,
}

/// Calibration protocol timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Wait after a device turns on before sampling starts.
    pub settle_ms: u64,
    /// Length of the sampling window.
    pub sampling_window_ms: u64,
    /// Joint samples taken per second during the window.
    pub samples_per_second: u32,
    /// Wait after sampling before the device turns off.
    pub hold_ms: u64,
    /// Time given to walk to a new station.
    pub relocation_ms: u64,
    /// Pause before each device.
    pub between_devices_ms: u64,
    /// Slack allowed on top of the protocol's nominal length before the
    /// session is abandoned.
    pub timeout_ms: u64,
    pub on_divergence: DivergencePolicy,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            settle_ms: 4000,
            sampling_window_ms: 3000,
            samples_per_second: 4,
            hold_ms: 2000,
            relocation_ms: 3000,
            between_devices_ms: 2000,
            timeout_ms: 60_000,
            on_divergence: DivergencePolicy::UseOrigin,
        }
    }
}

impl CalibrationConfig {
    /// Configuration with every wait set to zero and a single sample per position.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            sampling_window_ms: 0,
            samples_per_second: 1,
            hold_ms: 0,
            relocation_ms: 0,
            between_devices_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn relocation(&self) -> Duration {
        Duration::from_millis(self.relocation_ms)
    }

    pub fn between_devices(&self) -> Duration {
        Duration::from_millis(self.between_devices_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Nominal time one device takes at one station.
    pub fn per_device(&self) -> Duration {
        Duration::from_millis(
            self.between_devices_ms + self.settle_ms + self.sampling_window_ms + self.hold_ms,
        )
    }

    /// Deadline for a whole session over `devices` devices: both stations at
    /// their nominal length plus the timeout slack.
    pub fn session_budget(&self, devices: usize) -> Duration {
        let per_device = self
            .per_device()
            .saturating_mul(u32::try_from(devices).unwrap_or(u32::MAX));
        let station = self.relocation().saturating_add(per_device);
        station.saturating_mul(2).saturating_add(self.timeout())
    }

    /// Number of samples per position (at least one).
    pub fn sample_count(&self) -> usize {
        let count = self.sampling_window_ms * u64::from(self.samples_per_second) / 1000;
        count.max(1) as usize
    }

    /// Gap between consecutive samples.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_window_ms / self.sample_count() as u64)
    }
}

/// Two-handed dimming gesture sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimmingConfig {
    pub enabled: bool,
    /// How close in height the hands (and hands and shoulders) must be.
    pub vertical_tolerance: f64,
    /// Vertical travel that spans the full 0-100% range.
    pub total_dimming_distance: f64,
}

impl Default for DimmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vertical_tolerance: 100.0,
            total_dimming_distance: 600.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.focus.activation_window(), Duration::from_millis(400));
        assert_eq!(config.focus.debounce_window(), Duration::from_secs(2));
        assert_eq!(config.calibration_file, PathBuf::from("calibration.txt"));
        assert_eq!(config.calibration.on_divergence, DivergencePolicy::UseOrigin);
    }

    #[test]
    fn test_sample_schedule() {
        let calibration = CalibrationConfig::default();
        assert_eq!(calibration.sample_count(), 12);
        assert_eq!(calibration.sample_interval(), Duration::from_millis(250));

        let immediate = CalibrationConfig::immediate();
        assert_eq!(immediate.sample_count(), 1);
        assert_eq!(immediate.sample_interval(), Duration::ZERO);
    }

    #[test]
    fn test_session_budget_scales_with_devices() {
        let calibration = CalibrationConfig::default();
        assert_eq!(calibration.per_device(), Duration::from_secs(11));
        // Two stations of 3 s + 14 x 11 s, plus 60 s slack
        assert_eq!(calibration.session_budget(14), Duration::from_secs(374));
        assert!(calibration.session_budget(40) > calibration.session_budget(14));
        assert_eq!(calibration.session_budget(0), Duration::from_secs(66));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "tick_interval_ms": 20, "focus": { "debounce_window_ms": 500 } }"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.focus.debounce_window_ms, 500);
        assert_eq!(config.focus.activation_window_ms, 400);
        assert_eq!(config.dimming, DimmingConfig::default());
    }

    #[test]
    fn test_json_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "spatial-controller-config-{}.json",
            std::process::id()
        ));

        let mut config = ControllerConfig::default();
        config.geometry.max_command_distance = 120.0;
        config.calibration.on_divergence = DivergencePolicy::Skip;
        config.save(&path).unwrap();

        let loaded = ControllerConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.geometry.max_command_distance, 120.0);
        assert_eq!(loaded.calibration.on_divergence, DivergencePolicy::Skip);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("spatial-controller-does-not-exist.json");
        let config = ControllerConfig::load_or_default(&path).unwrap();
        assert_eq!(config.tick_interval_ms, 50);
    }
}
