use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use ledmap_core::{inter_led_distance, Led2D, LedInfo, Point2D};
use ledmap_sfm::{
    reconstruct, write_images_binary, write_points3d_binary, CommandEngine, FeatureDatabase,
    ModelImage, ModelPoint2D, ModelPoint3D, NoEngine, SfmEngine, SfmError, SfmParams,
    TrackElement, IMAGES_FILE, POINTS_FILE,
};
use nalgebra::Vector3;

/// Places LED `i` at `(2i, 0, 0)` (skipping `missing`) and writes a second,
/// smaller model that must lose against the first.
struct LineEngine {
    missing: Vec<u32>,
}

impl LineEngine {
    fn write_model(
        &self,
        database: &FeatureDatabase,
        dir: &Path,
        led_ids: &[u32],
    ) -> Result<(), SfmError> {
        fs::create_dir_all(dir)?;
        let images: Vec<ModelImage> = database
            .images
            .iter()
            .map(|image| ModelImage {
                image_id: image.image_id,
                qvec: [1.0, 0.0, 0.0, 0.0],
                tvec: Vector3::new(-(image.image_id as f64), 0.0, 10.0),
                camera_id: image.camera_id,
                name: image.name.clone(),
                points2d: Vec::<ModelPoint2D>::new(),
            })
            .collect();
        let points: Vec<ModelPoint3D> = led_ids
            .iter()
            .map(|&led_id| ModelPoint3D {
                point3d_id: led_id as u64 + 1,
                xyz: Vector3::new(2.0 * led_id as f64 + 3.0, 0.0, 0.0),
                rgb: [0, 0, 0],
                error: 0.1,
                track: database
                    .images
                    .iter()
                    .map(|image| TrackElement {
                        image_id: image.image_id,
                        point2d_idx: led_id,
                    })
                    .collect(),
            })
            .collect();
        write_images_binary(&images, dir.join(IMAGES_FILE))?;
        write_points3d_binary(&points, dir.join(POINTS_FILE))
    }
}

impl SfmEngine for LineEngine {
    fn run(&self, database: &FeatureDatabase, workspace: &Path) -> Result<(), SfmError> {
        let all: Vec<u32> = (0..8).filter(|id| !self.missing.contains(id)).collect();
        self.write_model(database, &workspace.join("0"), &all[..2])?;
        self.write_model(database, &workspace.join("1"), &all)
    }
}

fn observations(views: u32, leds: u32) -> Vec<Led2D> {
    (0..views)
        .flat_map(|view_id| {
            (0..leds).map(move |led_id| {
                Led2D::new(
                    led_id,
                    view_id,
                    Point2D::new(0.1 + led_id as f64 * 0.05, 0.2 + view_id as f64 * 0.01),
                )
            })
        })
        .collect()
}

#[test]
fn largest_model_is_cleaned_and_rescaled() {
    let engine = LineEngine { missing: vec![4] };
    let leds = reconstruct(&observations(3, 8), &engine, &SfmParams::default()).unwrap();

    let ids: Vec<u32> = leds.iter().map(|led| led.led_id).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert_eq!(leds[4].info(), LedInfo::Interpolated);
    assert_relative_eq!(inter_led_distance(&leds).unwrap(), 1.0, epsilon = 1e-9);

    // median of 0..=7 at unit spacing
    assert_relative_eq!(leds[0].point.position.x, -3.5, epsilon = 1e-9);
    assert_eq!(leds[0].views.len(), 3);
    // unit normals scaled by the target spacing
    assert_relative_eq!(leds[2].point.normal.norm(), 1.0, epsilon = 1e-9);
    assert!(leds[2].point.normal.z < 0.0);
    assert_relative_eq!(leds[2].point.error, 0.05, epsilon = 1e-9);
}

#[test]
fn single_view_is_not_reconstructed() {
    let engine = LineEngine { missing: vec![] };
    let leds = reconstruct(&observations(1, 8), &engine, &SfmParams::default()).unwrap();
    assert!(leds.is_empty());

    let mut unseen = observations(1, 4);
    unseen.push(Led2D::missing(0, 1));
    assert!(reconstruct(&unseen, &engine, &SfmParams::default())
        .unwrap()
        .is_empty());
}

#[test]
fn engine_without_output_gives_empty_map() {
    let leds = reconstruct(&observations(2, 8), &NoEngine, &SfmParams::default()).unwrap();
    assert!(leds.is_empty());
}

#[test]
fn missing_engine_binary_is_an_error() {
    let engine = CommandEngine::new("/nonexistent/ledmap-sfm-engine");
    let err = reconstruct(&observations(2, 4), &engine, &SfmParams::default()).unwrap_err();
    assert!(matches!(err, SfmError::EngineLaunch { .. }));
}

#[test]
fn command_line_is_split_into_program_and_args() {
    let engine = CommandEngine::parse("colmap-runner --fast  --gpu").unwrap();
    assert_eq!(engine.program, Path::new("colmap-runner"));
    assert_eq!(engine.args, ["--fast", "--gpu"]);
    assert!(CommandEngine::parse("   ").is_none());
}
