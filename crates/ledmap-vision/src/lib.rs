//! Vision primitives for locating a lit LED in a camera frame.
//!
//! A frame is thresholded (pixels at or below the threshold are dropped),
//! split into 8-connected blobs, and the blob with the largest integrated
//! brightness is reported as the LED. Coordinates are normalized by the frame
//! width so that every camera produces points in the same square space.
//!
//! Frames come from a [`Camera`]. With the default `image` feature a
//! [`FrameDirectoryCamera`] replays PNG/JPEG captures from disk.

mod blob;
mod camera;

pub use blob::{find_blobs, find_led_in_image, normalize, Blob};
pub use camera::{Camera, CameraError};

#[cfg(feature = "image")]
pub use camera::{gray_from_luma, FrameDirectoryCamera};
