use ledmap_core::{add_normals, fill_gaps, get_view_ids, recenter, rescale, Led2D, Led3D};
use log::{debug, info};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::database::{populate, SfmParams};
use crate::engine::SfmEngine;
use crate::model::{load_model, POINTS_FILE};
use crate::SfmError;

/// Largest number of model directories inspected after a run.
pub const MAX_MODELS: usize = 10;

/// Reconstruct a cleaned 3D map from every observation so far.
///
/// Returns an empty map when fewer than two views observed anything or when
/// the engine left no model. Among several models the one with most LEDs wins.
/// The result is merged to one LED per id, given normals towards its cameras,
/// rescaled to `target_inter_distance`, gap-filled and recentred.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(leds_2d, engine, params), fields(observations = leds_2d.len()))
)]
pub fn reconstruct<E: SfmEngine + ?Sized>(
    leds_2d: &[Led2D],
    engine: &E,
    params: &SfmParams,
) -> Result<Vec<Led3D>, SfmError> {
    let observed: Vec<Led2D> = leds_2d
        .iter()
        .filter(|led| led.point.is_some())
        .cloned()
        .collect();
    let view_count = get_view_ids(&observed).len();
    if view_count < 2 {
        debug!("{view_count} view(s) with detections, not reconstructing");
        return Ok(Vec::new());
    }

    let database = populate(&observed, params)?;
    let workspace = tempfile::tempdir()?;
    engine.run(&database, workspace.path())?;

    let mut best: Vec<Led3D> = Vec::new();
    for map_id in 0..MAX_MODELS {
        let dir = workspace.path().join(map_id.to_string());
        if !dir.join(POINTS_FILE).exists() {
            break;
        }
        let leds = load_model(&dir, &database)?;
        debug!("model {map_id} reconstructed {} LEDs", leds.len());
        if leds.len() > best.len() {
            best = leds;
        }
    }

    if best.is_empty() {
        info!("reconstruction from {view_count} views produced no model");
        return Ok(best);
    }

    add_normals(&mut best);
    rescale(&mut best, params.target_inter_distance);
    let filled = fill_gaps(&mut best, &params.fill_gaps);
    recenter(&mut best);

    info!(
        "reconstructed {} LEDs ({filled} interpolated) from {view_count} views",
        best.len()
    );
    Ok(best)
}
