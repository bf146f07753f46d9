//! Scan configuration, stored as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use ledmap_core::{FillGapsParams, TimeoutParams};
use ledmap_detector::DetectorParams;
use ledmap_sfm::{CameraModel, CommandEngine, SfmParams};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("start LED {start} is after end LED {end}")]
    InvalidRange { start: u32, end: u32 },
}

/// Everything a scanning session needs. Missing JSON fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory holding the 2D maps of every view and the 3D map.
    pub output_dir: PathBuf,
    /// Camera source: a frame file or a directory of frames.
    pub device: PathBuf,
    /// Exposure requested while scanning.
    pub exposure: i32,
    pub threshold: u8,
    pub backend: String,
    /// Address of the LED server for backends that need one.
    pub server: Option<String>,
    /// First LED to scan.
    pub led_start: u32,
    /// LED after the last one to scan, capped by the backend's LED count.
    pub led_end: u32,
    /// Largest run of missing LEDs that gap filling interpolates.
    pub max_fill: u32,
    pub check_movement: bool,
    pub camera_fov_deg: f64,
    pub camera_model: CameraModel,
    /// External reconstruction command, `program [args...]`.
    pub sfm_command: Option<String>,
    pub darkness_timeout_sec: f64,
    pub timeout: TimeoutParams,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let detector = DetectorParams::default();
        let sfm = SfmParams::default();
        Self {
            output_dir: PathBuf::from("."),
            device: PathBuf::from("frames"),
            exposure: detector.dark_exposure,
            threshold: detector.threshold,
            backend: "dummy".to_string(),
            server: None,
            led_start: 0,
            led_end: 10_000,
            max_fill: sfm.fill_gaps.max_missing,
            check_movement: detector.check_movement,
            camera_fov_deg: sfm.camera_fov_deg,
            camera_model: sfm.camera_model,
            sfm_command: None,
            darkness_timeout_sec: detector.darkness_timeout_sec,
            timeout: TimeoutParams::default(),
        }
    }
}

impl ScanConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject an output path that is not a directory and an inverted LED range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.output_dir.is_dir() {
            return Err(ConfigError::NotADirectory(self.output_dir.clone()));
        }
        if self.led_start > self.led_end {
            return Err(ConfigError::InvalidRange {
                start: self.led_start,
                end: self.led_end,
            });
        }
        Ok(())
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            threshold: self.threshold,
            dark_exposure: self.exposure,
            darkness_timeout_sec: self.darkness_timeout_sec,
            check_movement: self.check_movement,
            ..DetectorParams::default()
        }
    }

    pub fn sfm_params(&self) -> SfmParams {
        SfmParams {
            camera_fov_deg: self.camera_fov_deg,
            camera_model: self.camera_model,
            fill_gaps: FillGapsParams {
                max_missing: self.max_fill,
                ..FillGapsParams::default()
            },
            ..SfmParams::default()
        }
    }

    pub fn engine(&self) -> Option<CommandEngine> {
        self.sfm_command.as_deref().and_then(CommandEngine::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        fs::write(&path, r#"{ "threshold": 200, "led_end": 50, "sfm_command": "mapper --fast" }"#)
            .unwrap();

        let config = ScanConfig::load_json(&path).unwrap();
        assert_eq!(config.threshold, 200);
        assert_eq!(config.led_end, 50);
        assert_eq!(config.backend, "dummy");
        assert_eq!(config.max_fill, 5);
        assert_eq!(config.detector_params().threshold, 200);
        let engine = config.engine().unwrap();
        assert_eq!(engine.program, PathBuf::from("mapper"));
        assert_eq!(engine.args, vec!["--fast".to_string()]);
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        let config = ScanConfig {
            server: Some("10.0.0.2:7777".into()),
            camera_model: CameraModel::SimpleRadial,
            check_movement: false,
            ..ScanConfig::default()
        };
        config.write_json(&path).unwrap();

        let loaded = ScanConfig::load_json(&path).unwrap();
        assert_eq!(loaded.server.as_deref(), Some("10.0.0.2:7777"));
        assert_eq!(loaded.sfm_params().camera_model, CameraModel::SimpleRadial);
        assert!(!loaded.detector_params().check_movement);
    }

    #[test]
    fn validation_rejects_bad_paths_and_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "").unwrap();

        let config = ScanConfig {
            output_dir: file,
            ..ScanConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NotADirectory(_))));

        let config = ScanConfig {
            output_dir: dir.path().to_path_buf(),
            led_start: 10,
            led_end: 5,
            ..ScanConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { start: 10, end: 5 })
        ));

        let config = ScanConfig {
            output_dir: dir.path().to_path_buf(),
            ..ScanConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
