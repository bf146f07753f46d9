//! Reconstruction worker.
//!
//! Accumulates every detection and, once the input goes idle after a viewpoint
//! ended, reconstructs the whole map from scratch and republishes it. Point
//! identity is not stable between engine runs, so nothing is patched
//! incrementally.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use ledmap_core::{combine_2d_3d, get_view_ids, view_overlap, Led2D, Led3D};
use ledmap_detector::DetectionEvent;
use ledmap_sfm::{reconstruct, SfmEngine, SfmParams};
use log::{debug, error, info, warn};

use crate::worker::{ExitEvent, Fanout, WorkerHandle, TICK};
use crate::ScannerError;

/// Where reconstructed maps go.
#[derive(Debug, Default)]
pub struct SfmOutputs {
    /// The reconstructed map as is.
    pub maps: Vec<Sender<Vec<Led3D>>>,
    /// The map combined with every 2D detection, for LED colour feedback.
    pub feedback: Vec<Sender<Vec<Led3D>>>,
}

#[derive(Debug)]
pub struct SfmWorker {
    handle: WorkerHandle,
}

impl SfmWorker {
    /// Start reconstructing from `seed` (the 2D maps of earlier sessions) and
    /// every event received on `input`.
    pub fn spawn<E>(
        engine: E,
        params: SfmParams,
        seed: Vec<Led2D>,
        input: Receiver<DetectionEvent>,
        outputs: SfmOutputs,
    ) -> Result<Self, ScannerError>
    where
        E: SfmEngine + Send + 'static,
    {
        let handle = WorkerHandle::spawn("sfm", move |exit| {
            let state = Observations::new(seed);
            run(&engine, &params, state, &exit, input, outputs);
        })?;
        Ok(Self { handle })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn join(&mut self) {
        self.handle.join();
    }

    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.handle.terminate(timeout)
    }
}

/// Detections accumulated so far.
#[derive(Debug, Default)]
struct Observations {
    leds: Vec<Led2D>,
    /// A viewpoint ended or was dropped since the last reconstruction.
    dirty: bool,
}

impl Observations {
    fn new(seed: Vec<Led2D>) -> Self {
        let leds: Vec<Led2D> = seed.into_iter().filter(|led| led.point.is_some()).collect();
        let dirty = !leds.is_empty();
        Self { leds, dirty }
    }

    fn apply(&mut self, event: DetectionEvent) {
        match event {
            DetectionEvent::Detect(led) => {
                if led.point.is_some() {
                    self.leds.push(led);
                }
            }
            DetectionEvent::Skip(_) => {}
            DetectionEvent::Done(_) => self.dirty = true,
            DetectionEvent::Delete(view_id) | DetectionEvent::Fail { view_id } => {
                let before = self.leds.len();
                self.leds.retain(|led| led.view_id != view_id);
                let dropped = before - self.leds.len();
                if dropped > 0 {
                    debug!("dropped {dropped} detections of view {view_id}");
                    self.dirty = true;
                }
            }
        }
    }
}

fn run<E: SfmEngine>(
    engine: &E,
    params: &SfmParams,
    mut state: Observations,
    exit: &ExitEvent,
    input: Receiver<DetectionEvent>,
    outputs: SfmOutputs,
) {
    let mut maps = Fanout::new(outputs.maps);
    let mut feedback = Fanout::new(outputs.feedback);

    while !exit.is_set() {
        match input.recv_timeout(TICK) {
            Ok(event) => state.apply(event),
            Err(RecvTimeoutError::Timeout) => {
                if state.dirty {
                    state.dirty = false;
                    let map = reconstruct_logged(engine, params, &state.leds);
                    feedback.send(combine_2d_3d(&state.leds, &map));
                    maps.send(map);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("detection channel closed");
                break;
            }
        }
    }
}

fn reconstruct_logged<E: SfmEngine>(engine: &E, params: &SfmParams, leds: &[Led2D]) -> Vec<Led3D> {
    let map = match reconstruct(leds, engine, params) {
        Ok(map) => map,
        Err(err) => {
            error!("reconstruction failed: {err}");
            return Vec::new();
        }
    };
    if map.is_empty() {
        warn!("no 3D map from {} detections", leds.len());
        return map;
    }
    for view_id in get_view_ids(leds) {
        let (count, percent) = view_overlap(leds, &map, view_id);
        info!("view {view_id}: {count} LEDs in the map ({percent}%)");
    }
    map
}
