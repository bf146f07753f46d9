//! Binary sparse-model files (`images.bin`, `points3D.bin`) and their
//! conversion to LEDs.
//!
//! All values are little-endian. `images.bin`: `u64` image count, then per image
//! `i32` id, `4 x f64` rotation quaternion (w, x, y, z), `3 x f64` translation,
//! `i32` camera id, NUL-terminated name, `u64` point count and per point
//! `f64 x, f64 y, i64 point3D id`. `points3D.bin`: `u64` point count, then per
//! point `u64` id, `3 x f64` position, `3 x u8` colour, `f64` error, `u64` track
//! length and per track element `i32` image id, `i32` keypoint index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ledmap_core::{remove_duplicates, Led3D, View};
use log::debug;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::database::FeatureDatabase;
use crate::SfmError;

pub const IMAGES_FILE: &str = "images.bin";
pub const POINTS_FILE: &str = "points3D.bin";

/// A registered image: world-to-camera pose.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelImage {
    pub image_id: u32,
    /// `(w, x, y, z)`
    pub qvec: [f64; 4],
    pub tvec: Vector3<f64>,
    pub camera_id: u32,
    pub name: String,
    pub points2d: Vec<ModelPoint2D>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelPoint2D {
    pub x: f64,
    pub y: f64,
    /// `-1` when the keypoint was not triangulated.
    pub point3d_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackElement {
    pub image_id: u32,
    pub point2d_idx: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelPoint3D {
    pub point3d_id: u64,
    pub xyz: Vector3<f64>,
    pub rgb: [u8; 3],
    pub error: f64,
    pub track: Vec<TrackElement>,
}

impl ModelImage {
    /// World-to-camera rotation.
    pub fn rotation(&self) -> Matrix3<f64> {
        let [w, x, y, z] = self.qvec;
        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
            .to_rotation_matrix()
            .into_inner()
    }

    /// Camera pose in map coordinates: centre `-R^T t` and rotation `R^T`.
    pub fn to_view(&self, view_id: u32) -> View {
        let rotation = self.rotation().transpose();
        View::new(view_id, -(rotation * self.tvec), rotation)
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> SfmError {
    SfmError::CorruptModel {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_f64x3<R: Read>(r: &mut R) -> std::io::Result<Vector3<f64>> {
    Ok(Vector3::new(
        r.read_f64::<LittleEndian>()?,
        r.read_f64::<LittleEndian>()?,
        r.read_f64::<LittleEndian>()?,
    ))
}

fn read_id<R: Read>(r: &mut R, path: &Path, what: &str) -> Result<u32, SfmError> {
    let raw = r.read_i32::<LittleEndian>()?;
    u32::try_from(raw).map_err(|_| corrupt(path, format!("negative {what} {raw}")))
}

fn read_name<R: Read>(r: &mut R, path: &Path) -> Result<String, SfmError> {
    let mut bytes = Vec::new();
    loop {
        match r.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| corrupt(path, "image name is not UTF-8"))
}

// Counts come from the file; cap preallocation so a corrupt header cannot
// request an absurd buffer.
fn capacity(count: u64) -> usize {
    count.min(1 << 16) as usize
}

pub fn read_images_binary(path: impl AsRef<Path>) -> Result<BTreeMap<u32, ModelImage>, SfmError> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path)?);
    let count = r.read_u64::<LittleEndian>()?;

    let mut images = BTreeMap::new();
    for _ in 0..count {
        let image_id = read_id(&mut r, path, "image id")?;
        let mut qvec = [0.0; 4];
        for q in &mut qvec {
            *q = r.read_f64::<LittleEndian>()?;
        }
        let tvec = read_f64x3(&mut r)?;
        let camera_id = read_id(&mut r, path, "camera id")?;
        let name = read_name(&mut r, path)?;

        let n_points = r.read_u64::<LittleEndian>()?;
        let mut points2d = Vec::with_capacity(capacity(n_points));
        for _ in 0..n_points {
            points2d.push(ModelPoint2D {
                x: r.read_f64::<LittleEndian>()?,
                y: r.read_f64::<LittleEndian>()?,
                point3d_id: r.read_i64::<LittleEndian>()?,
            });
        }

        images.insert(
            image_id,
            ModelImage {
                image_id,
                qvec,
                tvec,
                camera_id,
                name,
                points2d,
            },
        );
    }
    Ok(images)
}

pub fn read_points3d_binary(path: impl AsRef<Path>) -> Result<Vec<ModelPoint3D>, SfmError> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path)?);
    let count = r.read_u64::<LittleEndian>()?;

    let mut points = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        let point3d_id = r.read_u64::<LittleEndian>()?;
        let xyz = read_f64x3(&mut r)?;
        let mut rgb = [0u8; 3];
        r.read_exact(&mut rgb)?;
        let error = r.read_f64::<LittleEndian>()?;

        let track_len = r.read_u64::<LittleEndian>()?;
        let mut track = Vec::with_capacity(capacity(track_len));
        for _ in 0..track_len {
            track.push(TrackElement {
                image_id: read_id(&mut r, path, "track image id")?,
                point2d_idx: read_id(&mut r, path, "keypoint index")?,
            });
        }

        points.push(ModelPoint3D {
            point3d_id,
            xyz,
            rgb,
            error,
            track,
        });
    }
    Ok(points)
}

pub fn write_images_binary(
    images: &[ModelImage],
    path: impl AsRef<Path>,
) -> Result<(), SfmError> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u64::<LittleEndian>(images.len() as u64)?;
    for image in images {
        w.write_i32::<LittleEndian>(image.image_id as i32)?;
        for q in image.qvec {
            w.write_f64::<LittleEndian>(q)?;
        }
        for t in image.tvec.iter() {
            w.write_f64::<LittleEndian>(*t)?;
        }
        w.write_i32::<LittleEndian>(image.camera_id as i32)?;
        w.write_all(image.name.as_bytes())?;
        w.write_u8(0)?;
        w.write_u64::<LittleEndian>(image.points2d.len() as u64)?;
        for p in &image.points2d {
            w.write_f64::<LittleEndian>(p.x)?;
            w.write_f64::<LittleEndian>(p.y)?;
            w.write_i64::<LittleEndian>(p.point3d_id)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn write_points3d_binary(
    points: &[ModelPoint3D],
    path: impl AsRef<Path>,
) -> Result<(), SfmError> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u64::<LittleEndian>(points.len() as u64)?;
    for point in points {
        w.write_u64::<LittleEndian>(point.point3d_id)?;
        for c in point.xyz.iter() {
            w.write_f64::<LittleEndian>(*c)?;
        }
        w.write_all(&point.rgb)?;
        w.write_f64::<LittleEndian>(point.error)?;
        w.write_u64::<LittleEndian>(point.track.len() as u64)?;
        for element in &point.track {
            w.write_i32::<LittleEndian>(element.image_id as i32)?;
            w.write_i32::<LittleEndian>(element.point2d_idx as i32)?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Convert a parsed model to LEDs, one raw entry per 3D point.
///
/// The LED id is the keypoint index of the first track element. Views come from
/// every image in the track; their ids are resolved through `database`, falling
/// back to the numeric image name.
pub fn model_to_leds(
    images: &BTreeMap<u32, ModelImage>,
    points: &[ModelPoint3D],
    database: &FeatureDatabase,
) -> Vec<Led3D> {
    let views: BTreeMap<u32, View> = images
        .values()
        .filter_map(|image| {
            let view_id = database
                .view_id(image.image_id)
                .or_else(|| image.name.parse().ok())?;
            Some((image.image_id, image.to_view(view_id)))
        })
        .collect();

    points
        .iter()
        .filter_map(|point| {
            let first = point.track.first()?;
            let mut led = Led3D::new(first.point2d_idx);
            led.point.position = point.xyz;
            led.point.error = point.error;
            let mut seen = Vec::new();
            for element in &point.track {
                if seen.contains(&element.image_id) {
                    continue;
                }
                seen.push(element.image_id);
                if let Some(view) = views.get(&element.image_id) {
                    led.views.push(view.clone());
                }
            }
            Some(led)
        })
        .collect()
}

/// Load the model in `dir` as a deduplicated LED map.
pub fn load_model(dir: impl AsRef<Path>, database: &FeatureDatabase) -> Result<Vec<Led3D>, SfmError> {
    let dir = dir.as_ref();
    let images = read_images_binary(dir.join(IMAGES_FILE))?;
    let points = read_points3d_binary(dir.join(POINTS_FILE))?;
    let raw = model_to_leds(&images, &points, database);
    let raw_count = raw.len();
    let leds = remove_duplicates(raw);
    debug!(
        "model {}: {} images, {} points, {} LEDs",
        dir.display(),
        images.len(),
        raw_count,
        leds.len()
    );
    Ok(leds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{populate, SfmParams};
    use approx::assert_relative_eq;
    use ledmap_core::{Led2D, LedState, Point2D};

    fn image(image_id: u32, name: &str, qvec: [f64; 4], t: [f64; 3]) -> ModelImage {
        ModelImage {
            image_id,
            qvec,
            tvec: Vector3::from(t),
            camera_id: 1,
            name: name.to_string(),
            points2d: vec![ModelPoint2D {
                x: 10.0,
                y: 20.0,
                point3d_id: -1,
            }],
        }
    }

    fn point(id: u64, xyz: [f64; 3], track: &[(u32, u32)]) -> ModelPoint3D {
        ModelPoint3D {
            point3d_id: id,
            xyz: Vector3::from(xyz),
            rgb: [255, 255, 255],
            error: 0.5,
            track: track
                .iter()
                .map(|&(image_id, point2d_idx)| TrackElement {
                    image_id,
                    point2d_idx,
                })
                .collect(),
        }
    }

    fn database() -> FeatureDatabase {
        let leds = vec![
            Led2D::new(0, 4, Point2D::new(0.1, 0.1)),
            Led2D::new(0, 9, Point2D::new(0.2, 0.1)),
        ];
        populate(&leds, &SfmParams::default()).unwrap()
    }

    #[test]
    fn images_file_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(IMAGES_FILE);
        let written = vec![
            image(1, "4", [1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 5.0]),
            image(2, "9", [0.5f64.sqrt(), 0.0, 0.5f64.sqrt(), 0.0], [1.0, 2.0, 3.0]),
        ];
        write_images_binary(&written, &path).unwrap();

        let read = read_images_binary(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[&2], written[1]);
    }

    #[test]
    fn truncated_points_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POINTS_FILE);
        write_points3d_binary(&[point(1, [0.0; 3], &[(1, 0), (2, 0)])], &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(read_points3d_binary(&path), Err(SfmError::Io(_))));
    }

    #[test]
    fn camera_centre_is_inverted_translation() {
        // 90 deg about y: R maps x -> -z
        let img = image(1, "4", [0.5f64.sqrt(), 0.0, 0.5f64.sqrt(), 0.0], [0.0, 0.0, 5.0]);
        let view = img.to_view(4);
        let r = img.rotation();
        // the camera centre maps to the origin of the camera frame
        let in_camera = r * view.position + img.tvec;
        assert_relative_eq!(in_camera.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(view.rotation, r.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn leds_take_id_from_first_keypoint_and_views_from_track() {
        let images: BTreeMap<u32, ModelImage> = [
            (1, image(1, "4", [1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 5.0])),
            (2, image(2, "9", [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 5.0])),
        ]
        .into_iter()
        .collect();
        let points = vec![
            point(10, [1.0, 2.0, 3.0], &[(1, 7), (2, 7)]),
            point(11, [0.0, 0.0, 0.0], &[]),
        ];

        let leds = model_to_leds(&images, &points, &database());

        assert_eq!(leds.len(), 1);
        assert_eq!(leds[0].led_id, 7);
        assert_eq!(leds[0].point.error, 0.5);
        let view_ids: Vec<u32> = leds[0].views.iter().map(|v| v.view_id).collect();
        assert_eq!(view_ids, [4, 9]);
        assert_eq!(leds[0].views[1].position, Vector3::new(-1.0, 0.0, -5.0));
    }

    #[test]
    fn load_model_merges_split_tracks() {
        let dir = tempfile::tempdir().unwrap();
        write_images_binary(
            &[
                image(1, "4", [1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 5.0]),
                image(2, "9", [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 5.0]),
            ],
            dir.path().join(IMAGES_FILE),
        )
        .unwrap();
        write_points3d_binary(
            &[
                point(1, [0.0, 0.0, 0.0], &[(1, 0), (2, 0)]),
                point(2, [1.0, 0.0, 0.0], &[(1, 0)]),
                point(3, [2.0, 0.0, 0.0], &[(2, 1), (1, 1)]),
            ],
            dir.path().join(POINTS_FILE),
        )
        .unwrap();

        let leds = load_model(dir.path(), &database()).unwrap();

        assert_eq!(leds.len(), 2);
        assert_eq!(leds[0].point.position, Vector3::new(0.5, 0.0, 0.0));
        assert_eq!(leds[0].point.error, 1.0);
        assert!(leds[0].has_state(LedState::Merged));
        assert_eq!(leds[0].views.len(), 3);
        assert!(leds[1].state.is_empty());
    }
}
