//! Persists 2D maps per viewpoint and the latest 3D map.
//!
//! Detections are buffered and written when the inputs go idle for one flush
//! tick, so a fast scan does not rewrite the same file for every LED.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use crossbeam::channel::{never, Receiver};
use crossbeam::select;
use ledmap_core::{write_2d_map, write_3d_map, Led2D, Led3D, MapIoError};
use ledmap_detector::DetectionEvent;
use log::{debug, error, info, warn};

use crate::worker::{ExitEvent, WorkerHandle};
use crate::ScannerError;

/// Idle time after which buffered maps are written.
pub const FLUSH_TICK: Duration = Duration::from_secs(1);

/// File name of the 3D map inside the output directory.
pub const MAP_3D_FILE: &str = "led_map_3d.csv";

#[derive(Debug)]
pub struct FileWriterWorker {
    handle: WorkerHandle,
}

impl FileWriterWorker {
    pub fn spawn(
        output_dir: impl Into<PathBuf>,
        events: Receiver<DetectionEvent>,
        maps: Receiver<Vec<Led3D>>,
        flush_tick: Duration,
    ) -> Result<Self, ScannerError> {
        let mut files = MapFiles::new(output_dir.into());
        let handle = WorkerHandle::spawn("file-writer", move |exit| {
            run(&mut files, &exit, events, maps, flush_tick);
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

fn run(
    files: &mut MapFiles,
    exit: &ExitEvent,
    events: Receiver<DetectionEvent>,
    mut maps: Receiver<Vec<Led3D>>,
    flush_tick: Duration,
) {
    while !exit.is_set() {
        select! {
            recv(events) -> event => match event {
                Ok(event) => files.apply(event),
                Err(_) => {
                    debug!("detection channel closed");
                    break;
                }
            },
            recv(maps) -> map => match map {
                Ok(map) => files.set_map(map),
                Err(_) => maps = never(),
            },
            default(flush_tick) => files.flush_logged(),
        }
    }
    for event in events.try_iter() {
        files.apply(event);
    }
    for map in maps.try_iter() {
        files.set_map(map);
    }
    files.flush_logged();
}

#[derive(Debug)]
struct ViewFile {
    path: PathBuf,
    leds: Vec<Led2D>,
    dirty: bool,
    complete: bool,
}

/// Buffered state of the output directory.
#[derive(Debug)]
struct MapFiles {
    dir: PathBuf,
    views: BTreeMap<u32, ViewFile>,
    map_3d: Option<Vec<Led3D>>,
}

impl MapFiles {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            views: BTreeMap::new(),
            map_3d: None,
        }
    }

    /// A fresh `led_map_2d_<timestamp>.csv` path, suffixed when already taken.
    fn next_2d_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let taken = |path: &Path| path.exists() || self.views.values().any(|v| v.path == path);
        let mut path = self.dir.join(format!("led_map_2d_{stamp}.csv"));
        let mut suffix = 1;
        while taken(&path) {
            path = self.dir.join(format!("led_map_2d_{stamp}_{suffix}.csv"));
            suffix += 1;
        }
        path
    }

    fn apply(&mut self, event: DetectionEvent) {
        match event {
            DetectionEvent::Detect(led) => {
                if !self.views.contains_key(&led.view_id) {
                    let path = self.next_2d_path();
                    self.views.insert(
                        led.view_id,
                        ViewFile {
                            path,
                            leds: Vec::new(),
                            dirty: false,
                            complete: false,
                        },
                    );
                }
                if let Some(view) = self.views.get_mut(&led.view_id) {
                    view.leds.push(led);
                    view.dirty = true;
                }
            }
            DetectionEvent::Skip(_) => {}
            DetectionEvent::Done(view_id) => {
                if let Some(view) = self.views.get_mut(&view_id) {
                    view.complete = true;
                }
            }
            DetectionEvent::Delete(view_id) | DetectionEvent::Fail { view_id } => {
                self.discard(view_id)
            }
        }
    }

    fn discard(&mut self, view_id: u32) {
        let Some(view) = self.views.remove(&view_id) else {
            return;
        };
        match fs::remove_file(&view.path) {
            Ok(()) => info!("removed {}", view.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {err}", view.path.display()),
        }
    }

    fn set_map(&mut self, map: Vec<Led3D>) {
        if map.is_empty() {
            debug!("empty 3D map, keeping the previous file");
            return;
        }
        self.map_3d = Some(map);
    }

    fn flush(&mut self) -> Result<(), MapIoError> {
        for view in self.views.values_mut().filter(|view| view.dirty) {
            write_2d_map(&view.leds, &view.path)?;
            view.dirty = false;
            debug!("wrote {} LEDs to {}", view.leds.len(), view.path.display());
        }
        self.views.retain(|_, view| !view.complete);

        if let Some(map) = self.map_3d.take() {
            let path = self.dir.join(MAP_3D_FILE);
            write_3d_map(&map, &path)?;
            info!("wrote {} LEDs to {}", map.len(), path.display());
        }
        Ok(())
    }

    fn flush_logged(&mut self) {
        if let Err(err) = self.flush() {
            error!("failed to write maps: {err}");
        }
    }
}
