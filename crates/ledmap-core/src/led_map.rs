//! Geometric algebra over LED collections.
//!
//! All distance-based decisions are made relative to the *inter-LED distance*:
//! the median spacing between LEDs with consecutive ids. Medians are used for
//! spacing and centring so that a single bad triangulation cannot drag the
//! whole map; means are used only when merging duplicates of one LED.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::led::{Led2D, Led3D, LedState, View};

/// Anything indexed by LED id.
pub trait HasLedId {
    fn led_id(&self) -> u32;
}

impl HasLedId for Led2D {
    fn led_id(&self) -> u32 {
        self.led_id
    }
}

impl HasLedId for Led3D {
    fn led_id(&self) -> u32 {
        self.led_id
    }
}

/// First LED with `led_id`, if any.
pub fn get_led<T: HasLedId>(leds: &[T], led_id: u32) -> Option<&T> {
    leds.iter().find(|led| led.led_id() == led_id)
}

/// Every LED with `led_id`.
pub fn get_leds<T: HasLedId>(leds: &[T], led_id: u32) -> Vec<&T> {
    leds.iter().filter(|led| led.led_id() == led_id).collect()
}

/// The LED with the smallest id strictly greater than `led`'s, `None` at the end.
pub fn get_next<'a, T: HasLedId>(led: &T, leds: &'a [T]) -> Option<&'a T> {
    let id = led.led_id();
    leds.iter()
        .filter(|other| other.led_id() > id)
        .min_by_key(|other| other.led_id())
}

pub fn get_gap<A: HasLedId, B: HasLedId>(a: &A, b: &B) -> u32 {
    a.led_id().abs_diff(b.led_id())
}

pub fn get_distance(a: &Led3D, b: &Led3D) -> f64 {
    (a.point.position - b.point.position).norm()
}

pub fn get_view_ids(leds: &[Led2D]) -> BTreeSet<u32> {
    leds.iter().map(|led| led.view_id).collect()
}

pub fn get_leds_with_view(leds: &[Led2D], view_id: u32) -> Vec<&Led2D> {
    leds.iter().filter(|led| led.view_id == view_id).collect()
}

/// Highest view id present, `None` for an empty list.
pub fn last_view(leds: &[Led2D]) -> Option<u32> {
    leds.iter().map(|led| led.view_id).max()
}

pub fn max_led_id<T: HasLedId>(leds: &[T]) -> Option<u32> {
    leds.iter().map(HasLedId::led_id).max()
}

/// Median of `values`, averaging the two middle elements for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

// First LED per id, ordered by id.
fn by_id(leds: &[Led3D]) -> BTreeMap<u32, &Led3D> {
    let mut map = BTreeMap::new();
    for led in leds {
        map.entry(led.led_id).or_insert(led);
    }
    map
}

fn consecutive_pairs(leds: &[Led3D]) -> Vec<(&Led3D, &Led3D)> {
    let ordered: Vec<&Led3D> = by_id(leds).into_values().collect();
    ordered
        .windows(2)
        .filter(|w| w[1].led_id - w[0].led_id == 1)
        .map(|w| (w[0], w[1]))
        .collect()
}

/// Median distance between LEDs whose ids differ by exactly one.
///
/// `None` when no two consecutive ids are present.
pub fn inter_led_distance(leds: &[Led3D]) -> Option<f64> {
    let distances: Vec<f64> = consecutive_pairs(leds)
        .into_iter()
        .map(|(a, b)| get_distance(a, b))
        .collect();
    median(&distances)
}

/// Scale the map so that the inter-LED distance becomes `target_inter_distance`.
///
/// LED positions, errors and camera positions are multiplied by the scale; non-zero
/// normals are renormalized to length `target_inter_distance`. Returns the applied
/// scale, or `None` (map untouched) when the inter-LED distance is undefined or zero.
pub fn rescale(leds: &mut [Led3D], target_inter_distance: f64) -> Option<f64> {
    let distance = inter_led_distance(leds)?;
    if distance <= f64::EPSILON {
        return None;
    }
    let scale = target_inter_distance / distance;

    for led in leds.iter_mut() {
        led.point.position *= scale;
        led.point.error *= scale;
        let norm = led.point.normal.norm();
        if norm > f64::EPSILON {
            led.point.normal = led.point.normal / norm * target_inter_distance;
        }
        for view in &mut led.views {
            view.position *= scale;
        }
    }

    Some(scale)
}

/// Move the component-wise median LED position to the origin.
///
/// Camera positions are shifted by the same offset. Returns the removed centre.
pub fn recenter(leds: &mut [Led3D]) -> Option<Vector3<f64>> {
    let axis = |k: usize| -> Option<f64> {
        let values: Vec<f64> = leds.iter().map(|led| led.point.position[k]).collect();
        median(&values)
    };
    let center = Vector3::new(axis(0)?, axis(1)?, axis(2)?);

    for led in leds.iter_mut() {
        led.point.position -= center;
        for view in &mut led.views {
            view.position -= center;
        }
    }

    Some(center)
}

/// Gap filling limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FillGapsParams {
    /// Largest run of missing ids that may be synthesized.
    pub max_missing: u32,
    /// Allowed relative deviation of the per-slot spacing from the inter-LED distance.
    pub max_distance_error: f64,
}

impl Default for FillGapsParams {
    fn default() -> Self {
        Self {
            max_missing: 5,
            max_distance_error: 0.2,
        }
    }
}

fn union_views(a: &[View], b: &[View]) -> Vec<View> {
    let mut seen = HashSet::new();
    a.iter()
        .chain(b)
        .filter(|view| seen.insert(view.view_id))
        .cloned()
        .collect()
}

/// Linearly interpolate every id strictly between `start` and `end`.
pub fn fill_gap(start: &Led3D, end: &Led3D) -> Vec<Led3D> {
    if end.led_id <= start.led_id + 1 {
        return Vec::new();
    }
    let missing = end.led_id - start.led_id - 1;
    let views = union_views(&start.views, &end.views);

    (1..=missing)
        .map(|offset| {
            let fraction = offset as f64 / (missing + 1) as f64;
            let mut led = Led3D::new(start.led_id + offset);
            led.point = start.point * (1.0 - fraction) + end.point * fraction;
            led.views = views.clone();
            led.add_state(LedState::Interpolated);
            led
        })
        .collect()
}

/// Synthesize LEDs in short gaps whose spacing is consistent with the rest of the map.
///
/// The per-slot spacing of a gap must lie strictly within
/// `(1 ± max_distance_error) * inter_led_distance`. When the map has no consecutive
/// ids the unit spacing of a rescaled map is used as reference. Existing LEDs are
/// never moved; the result stays sorted by id. Returns the number of LEDs added.
pub fn fill_gaps(leds: &mut Vec<Led3D>, params: &FillGapsParams) -> usize {
    let reference = inter_led_distance(leds).unwrap_or(1.0);
    let min_distance = reference * (1.0 - params.max_distance_error);
    let max_distance = reference * (1.0 + params.max_distance_error);

    let mut new_leds = Vec::new();
    {
        let ordered: Vec<&Led3D> = by_id(leds).into_values().collect();
        for pair in ordered.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let gap = end.led_id - start.led_id - 1;
            if gap == 0 || gap > params.max_missing {
                continue;
            }
            let distance_per_slot = get_distance(start, end) / (gap + 1) as f64;
            if min_distance < distance_per_slot && distance_per_slot < max_distance {
                new_leds.extend(fill_gap(start, end));
            }
        }
    }

    let added = new_leds.len();
    if added > 0 {
        debug!("filled {added} LEDs");
        leds.extend(new_leds);
        leds.sort_by_key(|led| led.led_id);
    }
    added
}

/// Merge reconstructions of one LED.
///
/// A single LED is returned unchanged. Several LEDs produce one LED tagged
/// [`LedState::Merged`] with mean position and normal, summed error and the
/// concatenated views. Returns `None` for an empty slice or mixed ids.
pub fn merge(leds: &[Led3D]) -> Option<Led3D> {
    let first = leds.first()?;
    if leds.len() == 1 {
        return Some(first.clone());
    }
    if leds.iter().any(|led| led.led_id != first.led_id) {
        return None;
    }

    let n = leds.len() as f64;
    let mut merged = Led3D::new(first.led_id);
    merged.point.position = leds.iter().map(|led| led.point.position).sum::<Vector3<f64>>() / n;
    merged.point.normal = leds.iter().map(|led| led.point.normal).sum::<Vector3<f64>>() / n;
    merged.point.error = leds.iter().map(|led| led.point.error).sum();
    merged.views = leds.iter().flat_map(|led| led.views.iter().cloned()).collect();
    merged.detections = leds
        .iter()
        .flat_map(|led| led.detections.iter().cloned())
        .collect();
    merged.add_state(LedState::Merged);
    Some(merged)
}

/// Reduce the map to at most one LED per id, sorted by id.
pub fn remove_duplicates(leds: Vec<Led3D>) -> Vec<Led3D> {
    let total = leds.len();
    let mut groups: BTreeMap<u32, Vec<Led3D>> = BTreeMap::new();
    for led in leds {
        groups.entry(led.led_id).or_default().push(led);
    }

    let merged: Vec<Led3D> = groups
        .into_values()
        .filter_map(|group| merge(&group))
        .collect();

    if merged.len() < total {
        debug!("merged {} duplicate LEDs", total - merged.len());
    }
    merged
}

/// Consecutive-id pairs closer than `max_ratio * inter_led_distance`.
///
/// These are the strip segments a viewer draws; missing pairs mark implausible jumps.
pub fn connected_leds(leds: &[Led3D], max_ratio: f64) -> Vec<(u32, u32)> {
    let Some(distance) = inter_led_distance(leds) else {
        return Vec::new();
    };
    consecutive_pairs(leds)
        .into_iter()
        .filter(|(a, b)| get_distance(a, b) < distance * max_ratio)
        .map(|(a, b)| (a.led_id, b.led_id))
        .collect()
}

/// Point each LED's normal towards the cameras that saw it.
///
/// The normal is the normalized mean of unit vectors from the LED to each view.
/// LEDs without usable views keep their normal.
pub fn add_normals(leds: &mut [Led3D]) {
    for led in leds.iter_mut() {
        let sum: Vector3<f64> = led
            .views
            .iter()
            .filter_map(|view| (view.position - led.point.position).try_normalize(1e-12))
            .sum();
        if let Some(normal) = sum.try_normalize(1e-12) {
            led.point.normal = normal;
        }
    }
}

/// Attach 2D observations to the 3D map, adding position-less LEDs for ids that
/// were detected but never reconstructed.
pub fn combine_2d_3d(leds_2d: &[Led2D], leds_3d: &[Led3D]) -> Vec<Led3D> {
    let mut combined = leds_3d.to_vec();
    let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, led) in combined.iter().enumerate() {
        index.entry(led.led_id).or_default().push(i);
    }

    for led_2d in leds_2d.iter().filter(|led| led.point.is_some()) {
        let slots = index.entry(led_2d.led_id).or_insert_with(|| {
            combined.push(Led3D::new(led_2d.led_id));
            vec![combined.len() - 1]
        });
        for &i in slots.iter() {
            combined[i].detections.push(led_2d.clone());
        }
    }

    combined.sort_by_key(|led| led.led_id);
    combined
}

/// How many of `view_id`'s detections made it into the 3D map, and which percentage.
pub fn view_overlap(leds_2d: &[Led2D], leds_3d: &[Led3D], view_id: u32) -> (usize, u32) {
    if leds_2d.is_empty() || leds_3d.is_empty() {
        return (0, 0);
    }
    let ids_3d: HashSet<u32> = leds_3d.iter().map(|led| led.led_id).collect();
    let ids_view: HashSet<u32> = get_leds_with_view(leds_2d, view_id)
        .into_iter()
        .filter(|led| led.point.is_some())
        .map(|led| led.led_id)
        .collect();
    if ids_view.is_empty() {
        return (0, 0);
    }
    let overlap = ids_view.intersection(&ids_3d).count();
    (overlap, (overlap * 100 / ids_view.len()) as u32)
}
