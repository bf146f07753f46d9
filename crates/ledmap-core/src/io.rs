//! CSV persistence of 2D and 3D LED maps.
//!
//! 2D maps are `index,u,v`, 3D maps are `index,x,y,z,xn,yn,zn,error`. A file is
//! only accepted when its header matches exactly; malformed data rows are
//! skipped with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use nalgebra::Vector3;

use crate::led::{Led2D, Led3D, Point2D};

pub const HEADER_2D: &str = "index,u,v";
pub const HEADER_3D: &str = "index,x,y,z,xn,yn,zn,error";

#[derive(thiserror::Error, Debug)]
pub enum MapIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{path} is not a .csv file")]
    NotCsv { path: PathBuf },
    #[error("{path} has header {found:?}, expected {expected:?}")]
    InvalidHeader {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },
}

fn check_extension(path: &Path) -> Result<(), MapIoError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(()),
        _ => Err(MapIoError::NotCsv {
            path: path.to_path_buf(),
        }),
    }
}

// Body lines of a CSV whose first line must equal `expected`.
fn read_rows(path: &Path, expected: &'static str) -> Result<Vec<String>, MapIoError> {
    check_extension(path)?;
    let raw = fs::read_to_string(path)?;
    let mut lines = raw.lines();
    let header = lines.next().unwrap_or_default().trim();
    if header != expected {
        return Err(MapIoError::InvalidHeader {
            path: path.to_path_buf(),
            found: header.to_string(),
            expected,
        });
    }
    Ok(lines.map(str::to_string).collect())
}

fn parse_2d_row(line: &str) -> Option<(u32, f64, f64)> {
    let mut fields = line.trim().split(',');
    let index = fields.next()?.trim().parse().ok()?;
    let u = fields.next()?.trim().parse().ok()?;
    let v = fields.next()?.trim().parse().ok()?;
    Some((index, u, v))
}

fn parse_3d_row(line: &str) -> Option<Led3D> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() < 8 {
        return None;
    }
    let led_id = fields[0].parse().ok()?;
    let mut values = [0.0f64; 7];
    for (slot, field) in values.iter_mut().zip(&fields[1..8]) {
        *slot = field.parse().ok()?;
    }
    let mut led = Led3D::new(led_id);
    led.point.position = Vector3::new(values[0], values[1], values[2]);
    led.point.normal = Vector3::new(values[3], values[4], values[5]);
    led.point.error = values[6];
    Some(led)
}

/// Load one view's detections. Unparseable rows are skipped.
pub fn load_2d_map(path: impl AsRef<Path>, view_id: u32) -> Result<Vec<Led2D>, MapIoError> {
    let path = path.as_ref();
    let rows = read_rows(path, HEADER_2D)?;
    let mut leds = Vec::with_capacity(rows.len());
    for (i, line) in rows.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_2d_row(line) {
            Some((index, u, v)) => leds.push(Led2D::new(index, view_id, Point2D::new(u, v))),
            None => warn!("failed to read line {} of {}: {line}", i + 1, path.display()),
        }
    }
    Ok(leds)
}

/// Write the observed detections of one view, sorted by id.
pub fn write_2d_map(leds: &[Led2D], path: impl AsRef<Path>) -> Result<(), MapIoError> {
    let mut observed: Vec<(u32, &Point2D)> = leds
        .iter()
        .filter_map(|led| led.point.as_ref().map(|p| (led.led_id, p)))
        .collect();
    observed.sort_by_key(|(id, _)| *id);

    let mut lines = vec![HEADER_2D.to_string()];
    lines.extend(
        observed
            .into_iter()
            .map(|(id, p)| format!("{id},{:.6},{:.6}", p.u(), p.v())),
    );
    fs::write(path, lines.join("\n"))?;
    Ok(())
}

pub fn load_3d_map(path: impl AsRef<Path>) -> Result<Vec<Led3D>, MapIoError> {
    let path = path.as_ref();
    let rows = read_rows(path, HEADER_3D)?;
    let mut leds = Vec::with_capacity(rows.len());
    for (i, line) in rows.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_3d_row(line) {
            Some(led) => leds.push(led),
            None => warn!("failed to read line {} of {}: {line}", i + 1, path.display()),
        }
    }
    Ok(leds)
}

pub fn write_3d_map(leds: &[Led3D], path: impl AsRef<Path>) -> Result<(), MapIoError> {
    let mut sorted: Vec<&Led3D> = leds.iter().collect();
    sorted.sort_by_key(|led| led.led_id);

    let mut lines = vec![HEADER_3D.to_string()];
    for led in sorted {
        let p = &led.point;
        lines.push(format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            led.led_id,
            p.position.x,
            p.position.y,
            p.position.z,
            p.normal.x,
            p.normal.y,
            p.normal.z,
            p.error
        ));
    }
    fs::write(path, lines.join("\n"))?;
    Ok(())
}

/// Load every valid 2D map in `directory`.
///
/// Files are visited in filename order and valid maps get consecutive view ids
/// starting at 0; invalid files are skipped.
pub fn load_all_2d_maps(directory: impl AsRef<Path>) -> Result<Vec<Led2D>, MapIoError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut leds = Vec::new();
    let mut view_id = 0;
    for path in paths {
        match load_2d_map(&path, view_id) {
            Ok(view) => {
                leds.extend(view);
                view_id += 1;
            }
            Err(MapIoError::Io(err)) => return Err(MapIoError::Io(err)),
            Err(_) => continue,
        }
    }
    Ok(leds)
}
