//! Persistence of calibrated device positions.
//!
//! The file is a flat list of four-line groups, one per device:
//!
//! ```text
//! <device id>
//! <x>
//! <y>
//! <z>
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::device::DeviceId;
use crate::geometry::Vector3;

/// One calibrated device position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRecord {
    pub device: DeviceId,
    pub position: Vector3,
}

impl CalibrationRecord {
    pub fn new(device: DeviceId, position: Vector3) -> Self {
        Self { device, position }
    }
}

/// Errors reading or validating a calibration file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No calibration file at {0}")]
    NotFound(PathBuf),
    #[error("Calibration file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Record for device {0} is incomplete")]
    Truncated(DeviceId),
    #[error("Device {0} appears more than once")]
    DuplicateDevice(DeviceId),
    #[error("Stored devices {stored:?} do not match live devices {live:?}")]
    DeviceSetMismatch {
        stored: Vec<DeviceId>,
        live: Vec<DeviceId>,
    },
}

/// Write records in the four-line format.
///
/// Coordinates use shortest round-trip formatting so they reload exactly.
pub fn write_records<W: Write>(
    mut writer: W,
    records: &[CalibrationRecord],
) -> std::io::Result<()> {
    for record in records {
        writeln!(writer, "{}", record.device)?;
        writeln!(writer, "{}", record.position.x)?;
        writeln!(writer, "{}", record.position.y)?;
        writeln!(writer, "{}", record.position.z)?;
    }
    writer.flush()
}

/// Read records until end of input.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<CalibrationRecord>, StoreError> {
    let mut lines = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push((index + 1, trimmed.to_string()));
        }
    }

    let mut records = Vec::with_capacity(lines.len() / 4);
    let mut seen = BTreeSet::new();

    for group in lines.chunks(4) {
        let (id_line, id_text) = &group[0];
        let device: DeviceId = id_text.parse().map_err(|e| StoreError::Parse {
            line: *id_line,
            message: format!("invalid device id '{}': {}", id_text, e),
        })?;

        if group.len() < 4 {
            return Err(StoreError::Truncated(device));
        }
        if !seen.insert(device) {
            return Err(StoreError::DuplicateDevice(device));
        }

        let coordinate = |(line, text): &(usize, String)| -> Result<f64, StoreError> {
            text.parse().map_err(|e| StoreError::Parse {
                line: *line,
                message: format!("invalid coordinate '{}': {}", text, e),
            })
        };

        records.push(CalibrationRecord {
            device,
            position: Vector3::new(
                coordinate(&group[1])?,
                coordinate(&group[2])?,
                coordinate(&group[3])?,
            ),
        });
    }

    Ok(records)
}

/// Calibration file on disk.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Overwrite the file with `records`.
    pub fn save(&self, records: &[CalibrationRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        write_records(BufWriter::new(file), records)?;
        tracing::info!("Saved {} device position(s) to {}", records.len(), self.path.display());
        Ok(())
    }

    /// Read every record in the file.
    pub fn load(&self) -> Result<Vec<CalibrationRecord>, StoreError> {
        if !self.exists() {
            return Err(StoreError::NotFound(self.path.clone()));
        }
        let file = File::open(&self.path)?;
        read_records(BufReader::new(file))
    }

    /// Load, accepting the file only if it covers exactly the `live` devices.
    pub fn load_matching(&self, live: &[DeviceId]) -> Result<Vec<CalibrationRecord>, StoreError> {
        let records = self.load()?;

        let stored: BTreeSet<DeviceId> = records.iter().map(|r| r.device).collect();
        let live_set: BTreeSet<DeviceId> = live.iter().copied().collect();
        if stored != live_set {
            return Err(StoreError::DeviceSetMismatch {
                stored: stored.into_iter().collect(),
                live: live_set.into_iter().collect(),
            });
        }

        Ok(records)
    }
}
