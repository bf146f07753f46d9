//! Structure-from-motion glue for LED mapping.
//!
//! The solver itself is external. This crate turns 2D LED observations into a
//! feature database where LED index is feature identity, runs an
//! [`SfmEngine`], parses the binary sparse model it leaves behind and cleans the
//! result into a 3D LED map.

use std::path::PathBuf;

mod database;
mod engine;
mod model;
mod reconstruct;

pub use database::{
    populate, CameraEntry, CameraModel, FeatureDatabase, ImageEntry, ImagePair, MapperOptions,
    SfmParams,
};
pub use engine::{CommandEngine, NoEngine, SfmEngine, DATABASE_FILE};
pub use model::{
    load_model, model_to_leds, read_images_binary, read_points3d_binary, write_images_binary,
    write_points3d_binary, ModelImage, ModelPoint2D, ModelPoint3D, TrackElement, IMAGES_FILE,
    POINTS_FILE,
};
pub use reconstruct::{reconstruct, MAX_MODELS};

#[derive(thiserror::Error, Debug)]
pub enum SfmError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no observed LEDs to reconstruct from")]
    NoObservations,
    #[error("corrupt model file {path}: {reason}")]
    CorruptModel { path: PathBuf, reason: String },
    #[error("failed to launch {program}: {source}")]
    EngineLaunch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
