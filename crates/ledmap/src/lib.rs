//! High-level facade for the `ledmap-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates
//! - the worker topology of a mapping session: a detector worker owning the
//!   camera and LED backend, a reconstruction worker and a file writer
//! - [`Scanner`], which wires the workers and scans one viewpoint at a time
//! - [`ScanConfig`], the JSON session configuration
//!
//! ## Quickstart
//!
//! ```no_run
//! use ledmap::detector::BackendRegistry;
//! use ledmap::{ScanConfig, Scanner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScanConfig {
//!     output_dir: "maps".into(),
//!     device: "frames".into(),
//!     ..ScanConfig::default()
//! };
//! let mut scanner = Scanner::new(config, &BackendRegistry::default())?;
//! let outcome = scanner.scan_view()?;
//! println!("view finished: {outcome:?}");
//! scanner.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `ledmap::core`: LED types, map algebra, CSV map I/O, adaptive timeout.
//! - `ledmap::vision`: blob extraction and camera capability.
//! - `ledmap::detector`: LED backends and the acquisition state machine.
//! - `ledmap::sfm`: feature database, reconstruction engines, model parsing.

pub use ledmap_core as core;
pub use ledmap_detector as detector;
pub use ledmap_sfm as sfm;
pub use ledmap_vision as vision;

pub use ledmap_core::{Led2D, Led3D, LedInfo, LedState};
pub use ledmap_detector::{DetectionEvent, DetectionRequest, ViewOutcome};

mod config;
mod detector_worker;
mod file_writer;
mod scanner;
mod sfm_worker;
pub mod worker;

pub use config::{ConfigError, ScanConfig};
pub use detector_worker::{DetectorChannels, DetectorWorker};
pub use file_writer::{FileWriterWorker, FLUSH_TICK, MAP_3D_FILE};
pub use scanner::{Scanner, CLOSE_TIMEOUT};
pub use sfm_worker::{SfmOutputs, SfmWorker};

#[derive(thiserror::Error, Debug)]
pub enum ScannerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load existing maps: {0}")]
    Maps(#[from] ledmap_core::MapIoError),
    #[error(transparent)]
    Detector(#[from] ledmap_detector::DetectorError),
    #[error("failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0} worker exited unexpectedly")]
    WorkerGone(&'static str),
    #[error("no LEDs to scan in {start}..{end}")]
    EmptyRange { start: u32, end: u32 },
}
