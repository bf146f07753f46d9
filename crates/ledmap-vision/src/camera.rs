use std::path::PathBuf;

use ledmap_core::GrayImage;

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("camera source {path} not found")]
    NotFound { path: PathBuf },
    #[error("no frames in {path}")]
    NoFrames { path: PathBuf },
    #[error("truncated frame: {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },
    #[error("camera disconnected: {0}")]
    Disconnected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// A source of grayscale frames.
///
/// Exposure control is optional: sources that cannot change exposure keep
/// the default no-op implementations.
pub trait Camera {
    fn read(&mut self) -> Result<GrayImage, CameraError>;

    /// Switch to a fixed low exposure so only lit LEDs survive thresholding.
    fn set_dark(&mut self, _exposure: i32) -> Result<(), CameraError> {
        Ok(())
    }

    /// Restore automatic exposure.
    fn reset(&mut self) -> Result<(), CameraError> {
        Ok(())
    }
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn read(&mut self) -> Result<GrayImage, CameraError> {
        (**self).read()
    }

    fn set_dark(&mut self, exposure: i32) -> Result<(), CameraError> {
        (**self).set_dark(exposure)
    }

    fn reset(&mut self) -> Result<(), CameraError> {
        (**self).reset()
    }
}

#[cfg(feature = "image")]
pub use frames::{gray_from_luma, FrameDirectoryCamera};

#[cfg(feature = "image")]
mod frames {
    use std::fs;
    use std::path::{Path, PathBuf};

    use ledmap_core::GrayImage;
    use log::{debug, info};

    use super::{Camera, CameraError};

    const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

    /// Convert an `image::GrayImage` into the owned core frame type.
    pub fn gray_from_luma(img: image::GrayImage) -> GrayImage {
        let (width, height) = (img.width() as usize, img.height() as usize);
        GrayImage {
            width,
            height,
            data: img.into_raw(),
        }
    }

    /// Replays captured frames from disk, cycling forever.
    ///
    /// `path` may be a single image or a directory; directory entries with an image
    /// extension are played in filename order.
    #[derive(Debug)]
    pub struct FrameDirectoryCamera {
        frames: Vec<PathBuf>,
        next: usize,
    }

    impl FrameDirectoryCamera {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, CameraError> {
            let path = path.as_ref();
            info!("opening frame source {}", path.display());
            if !path.exists() {
                return Err(CameraError::NotFound {
                    path: path.to_path_buf(),
                });
            }

            let frames = if path.is_dir() {
                let mut frames: Vec<PathBuf> = fs::read_dir(path)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| is_frame(p))
                    .collect();
                frames.sort();
                frames
            } else {
                vec![path.to_path_buf()]
            };

            if frames.is_empty() {
                return Err(CameraError::NoFrames {
                    path: path.to_path_buf(),
                });
            }
            debug!("{} frames in {}", frames.len(), path.display());
            Ok(Self { frames, next: 0 })
        }

        pub fn frame_count(&self) -> usize {
            self.frames.len()
        }
    }

    fn is_frame(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                FRAME_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
    }

    impl Camera for FrameDirectoryCamera {
        fn read(&mut self) -> Result<GrayImage, CameraError> {
            let path = &self.frames[self.next % self.frames.len()];
            self.next = (self.next + 1) % self.frames.len();
            let img = image::open(path)?.to_luma8();
            Ok(gray_from_luma(img))
        }
    }
}
