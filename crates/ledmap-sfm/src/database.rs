//! Feature database handed to the reconstruction engine.
//!
//! Every viewpoint becomes one image whose keypoint `i` is the observation of
//! LED `i`, so feature identity is LED identity and two images match wherever
//! both saw the same LED. No descriptors are involved.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use ledmap_core::{FillGapsParams, Led2D};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::SfmError;

/// Intrinsics model of the synthetic camera shared by every view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraModel {
    /// `f, cx, cy`
    #[default]
    SimplePinhole,
    /// `f, cx, cy, k`
    SimpleRadial,
}

impl CameraModel {
    /// Numeric model id used in the engine's binary formats.
    pub fn model_id(self) -> u32 {
        match self {
            CameraModel::SimplePinhole => 0,
            CameraModel::SimpleRadial => 2,
        }
    }
}

/// Incremental mapper thresholds, relaxed for sparse LED features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapperOptions {
    pub min_num_matches: u32,
    pub abs_pose_min_num_inliers: u32,
    pub init_min_num_inliers: u32,
    pub ignore_two_view_tracks: bool,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            min_num_matches: 9,
            abs_pose_min_num_inliers: 9,
            init_min_num_inliers: 50,
            ignore_two_view_tracks: false,
        }
    }
}

/// Reconstruction parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SfmParams {
    /// Normalized coordinates are multiplied by this to look like pixels.
    pub feature_scale: f64,
    /// Horizontal field of view of the synthetic camera (degrees).
    pub camera_fov_deg: f64,
    pub camera_model: CameraModel,
    pub mapper: MapperOptions,
    pub fill_gaps: FillGapsParams,
    /// Inter-LED distance of the published map.
    pub target_inter_distance: f64,
}

impl Default for SfmParams {
    fn default() -> Self {
        Self {
            feature_scale: 2000.0,
            camera_fov_deg: 60.0,
            camera_model: CameraModel::default(),
            mapper: MapperOptions::default(),
            fill_gaps: FillGapsParams::default(),
            target_inter_distance: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub camera_id: u32,
    pub model: CameraModel,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

impl CameraEntry {
    /// Square camera of side `feature_scale` with the principal point in the middle.
    pub fn synthetic(params: &SfmParams) -> Self {
        let size = params.feature_scale;
        let c = size / 2.0;
        let f = c / (params.camera_fov_deg.to_radians() / 2.0).tan();
        let intrinsics = match params.camera_model {
            CameraModel::SimplePinhole => vec![f, c, c],
            CameraModel::SimpleRadial => vec![f, c, c, 0.0],
        };
        Self {
            camera_id: 1,
            model: params.camera_model,
            width: size.round() as u32,
            height: size.round() as u32,
            params: intrinsics,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub image_id: u32,
    pub camera_id: u32,
    pub view_id: u32,
    pub name: String,
    /// Keypoint `i` is LED `i` in scaled pixel coordinates; `[0, 0]` when unseen.
    pub keypoints: Vec<[f64; 2]>,
}

/// Keypoint correspondences between two images, as `[idx_1, idx_2]` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePair {
    pub image_id_1: u32,
    pub image_id_2: u32,
    pub matches: Vec<[u32; 2]>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureDatabase {
    pub camera: CameraEntry,
    pub images: Vec<ImageEntry>,
    pub pairs: Vec<ImagePair>,
    pub mapper: MapperOptions,
}

impl FeatureDatabase {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SfmError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the database to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SfmError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn view_id(&self, image_id: u32) -> Option<u32> {
        self.images
            .iter()
            .find(|image| image.image_id == image_id)
            .map(|image| image.view_id)
    }
}

/// Build the database from every observed detection.
///
/// Images are numbered from 1 in ascending view order. Unobserved LEDs are ignored.
pub fn populate(leds: &[Led2D], params: &SfmParams) -> Result<FeatureDatabase, SfmError> {
    let mut views: BTreeMap<u32, BTreeMap<u32, [f64; 2]>> = BTreeMap::new();
    for led in leds {
        if let Some(point) = &led.point {
            views.entry(led.view_id).or_default().insert(
                led.led_id,
                [point.u() * params.feature_scale, point.v() * params.feature_scale],
            );
        }
    }
    if views.is_empty() {
        return Err(SfmError::NoObservations);
    }

    let keypoint_count = views
        .values()
        .filter_map(|features| features.keys().next_back())
        .max()
        .map_or(0, |&max_id| max_id as usize + 1);

    let camera = CameraEntry::synthetic(params);
    let images: Vec<ImageEntry> = views
        .iter()
        .enumerate()
        .map(|(index, (&view_id, features))| {
            let mut keypoints = vec![[0.0, 0.0]; keypoint_count];
            for (&led_id, &xy) in features {
                keypoints[led_id as usize] = xy;
            }
            ImageEntry {
                image_id: index as u32 + 1,
                camera_id: camera.camera_id,
                view_id,
                name: view_id.to_string(),
                keypoints,
            }
        })
        .collect();

    let observed: Vec<BTreeSet<u32>> = views
        .values()
        .map(|features| features.keys().copied().collect())
        .collect();

    let mut pairs = Vec::new();
    for i in 0..images.len() {
        for j in i + 1..images.len() {
            let matches: Vec<[u32; 2]> = observed[i]
                .intersection(&observed[j])
                .map(|&led_id| [led_id, led_id])
                .collect();
            if !matches.is_empty() {
                pairs.push(ImagePair {
                    image_id_1: images[i].image_id,
                    image_id_2: images[j].image_id,
                    matches,
                });
            }
        }
    }

    debug!(
        "feature database: {} images, {} keypoints each, {} matched pairs",
        images.len(),
        keypoint_count,
        pairs.len()
    );

    Ok(FeatureDatabase {
        camera,
        images,
        pairs,
        mapper: params.mapper.clone(),
    })
}
