//! Core types and utilities for LED 3D mapping.
//!
//! This crate holds the data model (2D detections, reconstructed LEDs, camera
//! views), the geometric post-processing of reconstructed maps, CSV map
//! persistence and the adaptive response timeout. It does not depend on any
//! camera, LED backend or reconstruction engine.

mod image;
mod io;
mod led;
mod led_map;
mod logger;
mod timeout;

pub use image::{GrayImage, GrayImageView};
pub use io::{
    load_2d_map, load_3d_map, load_all_2d_maps, write_2d_map, write_3d_map, MapIoError,
    HEADER_2D, HEADER_3D,
};
pub use led::{colors, Led2D, Led3D, LedInfo, LedState, Point2D, Point3D, Rgb, View};
pub use led_map::{
    add_normals, combine_2d_3d, connected_leds, fill_gap, fill_gaps, get_distance, get_gap,
    get_led, get_leds, get_leds_with_view, get_next, get_view_ids, inter_led_distance,
    last_view, max_led_id, median, merge, recenter, remove_duplicates, rescale, view_overlap,
    FillGapsParams, HasLedId,
};
pub use timeout::{percentile, AdaptiveTimeout, TimeoutParams};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
