//! LED observations and reconstructed LED points.

use std::collections::BTreeSet;
use std::ops::{Add, Mul};

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Camera pose recovered by reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub view_id: u32,
    /// Camera centre in map coordinates.
    pub position: Vector3<f64>,
    /// Camera-to-map rotation.
    pub rotation: Matrix3<f64>,
}

impl View {
    pub fn new(view_id: u32, position: Vector3<f64>, rotation: Matrix3<f64>) -> Self {
        Self {
            view_id,
            position,
            rotation,
        }
    }
}

/// Normalized image-plane detection.
///
/// `u` is the horizontal coordinate divided by the frame width. `v` is shifted by
/// half the width/height difference before the same division, so both axes share
/// one scale and the frame is centred in a square `[0, 1] x [0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub position: Point2<f64>,
    /// Pixel outline of the blob that produced this detection, for debug overlays.
    #[serde(default)]
    pub contour: Vec<Point2<f32>>,
}

impl Point2D {
    pub fn new(u: f64, v: f64) -> Self {
        Self {
            position: Point2::new(u, v),
            contour: Vec::new(),
        }
    }

    pub fn with_contour(u: f64, v: f64, contour: Vec<Point2<f32>>) -> Self {
        Self {
            position: Point2::new(u, v),
            contour,
        }
    }

    #[inline]
    pub fn u(&self) -> f64 {
        self.position.x
    }

    #[inline]
    pub fn v(&self) -> f64 {
        self.position.y
    }

    /// Euclidean distance in normalized image units.
    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.position - other.position).norm()
    }
}

/// One requested LED in one viewpoint. `point == None` means it was not seen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Led2D {
    pub led_id: u32,
    pub view_id: u32,
    pub point: Option<Point2D>,
}

impl Led2D {
    pub fn new(led_id: u32, view_id: u32, point: Point2D) -> Self {
        Self {
            led_id,
            view_id,
            point: Some(point),
        }
    }

    pub fn missing(led_id: u32, view_id: u32) -> Self {
        Self {
            led_id,
            view_id,
            point: None,
        }
    }
}

/// Position, normal and reprojection error of a reconstructed LED.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub position: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub error: f64,
}

impl Default for Point3D {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            normal: Vector3::zeros(),
            error: 0.0,
        }
    }
}

impl Point3D {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Add for Point3D {
    type Output = Point3D;

    fn add(self, other: Point3D) -> Point3D {
        Point3D {
            position: self.position + other.position,
            normal: self.normal + other.normal,
            error: self.error + other.error,
        }
    }
}

impl Mul<f64> for Point3D {
    type Output = Point3D;

    fn mul(self, s: f64) -> Point3D {
        Point3D {
            position: self.position * s,
            normal: self.normal * s,
            error: self.error * s,
        }
    }
}

/// Provenance flags of a reconstructed LED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedState {
    /// Synthesized by gap filling, never observed.
    Interpolated,
    /// Mean of several reconstruction tracks sharing one id.
    Merged,
}

/// Display classification of an LED, most specific first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedInfo {
    None,
    Reconstructed,
    Interpolated,
    Merged,
    Detected,
    Unreconstructable,
}

pub type Rgb = [u8; 3];

pub mod colors {
    use super::Rgb;

    pub const RED: Rgb = [255, 0, 0];
    pub const GREEN: Rgb = [0, 255, 0];
    pub const BLUE: Rgb = [0, 0, 255];
    pub const ORANGE: Rgb = [255, 165, 0];
    pub const AQUA: Rgb = [0, 255, 255];
    pub const BLACK: Rgb = [0, 0, 0];
}

impl LedInfo {
    pub fn color(self) -> Rgb {
        match self {
            LedInfo::Reconstructed => colors::GREEN,
            LedInfo::Interpolated | LedInfo::Merged => colors::AQUA,
            LedInfo::Detected => colors::ORANGE,
            LedInfo::Unreconstructable => colors::RED,
            LedInfo::None => colors::BLUE,
        }
    }
}

/// A reconstructed (or synthesized) LED.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Led3D {
    pub led_id: u32,
    pub point: Point3D,
    /// Cameras that observed this LED.
    pub views: Vec<View>,
    /// 2D observations attached by [`crate::combine_2d_3d`].
    #[serde(default)]
    pub detections: Vec<Led2D>,
    #[serde(default)]
    pub state: BTreeSet<LedState>,
}

impl Led3D {
    pub fn new(led_id: u32) -> Self {
        Self {
            led_id,
            point: Point3D::default(),
            views: Vec::new(),
            detections: Vec::new(),
            state: BTreeSet::new(),
        }
    }

    pub fn at(led_id: u32, x: f64, y: f64, z: f64) -> Self {
        let mut led = Self::new(led_id);
        led.point.position = Vector3::new(x, y, z);
        led
    }

    pub fn add_state(&mut self, state: LedState) {
        self.state.insert(state);
    }

    pub fn has_state(&self, state: LedState) -> bool {
        self.state.contains(&state)
    }

    /// True when reconstruction placed this LED somewhere other than the origin.
    pub fn has_position(&self) -> bool {
        self.point.position.iter().any(|&c| c != 0.0)
    }

    pub fn info(&self) -> LedInfo {
        if self.has_state(LedState::Interpolated) {
            return LedInfo::Interpolated;
        }
        if self.has_state(LedState::Merged) {
            return LedInfo::Merged;
        }
        if self.has_position() || !self.views.is_empty() {
            return LedInfo::Reconstructed;
        }
        match self.detections.len() {
            0 => LedInfo::None,
            1 => LedInfo::Detected,
            _ => LedInfo::Unreconstructable,
        }
    }

    pub fn color(&self) -> Rgb {
        self.info().color()
    }
}
