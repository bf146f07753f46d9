//! Session driver: wires the workers together and scans viewpoint by viewpoint.

use std::ops::Range;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use ledmap_core::{last_view, load_all_2d_maps, Led3D};
use ledmap_detector::{BackendError, DetectionEvent, DetectionRequest, LedBackend, ViewOutcome};
use ledmap_sfm::SfmEngine;
use ledmap_vision::{Camera, CameraError};
use log::{debug, info, warn};

use crate::config::ScanConfig;
use crate::detector_worker::{DetectorChannels, DetectorWorker};
use crate::file_writer::{FileWriterWorker, FLUSH_TICK};
use crate::sfm_worker::{SfmOutputs, SfmWorker};
use crate::worker::{ExitEvent, TICK};
use crate::ScannerError;

/// Join timeout of each worker on [`Scanner::close`].
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Detections between two progress log lines.
const PROGRESS_EVERY: u32 = 25;

/// Detection, reconstruction and file writing workers of one mapping session.
#[derive(Debug)]
pub struct Scanner {
    config: ScanConfig,
    requests: Sender<DetectionRequest>,
    updates: Receiver<DetectionEvent>,
    map_updates: Receiver<Vec<Led3D>>,
    latest_map: Option<Vec<Led3D>>,
    detector: DetectorWorker,
    sfm: SfmWorker,
    file_writer: FileWriterWorker,
    led_range: Range<u32>,
    current_view: u32,
    interrupt: ExitEvent,
}

impl Scanner {
    /// Start a session on real hardware: frames from `config.device` and the
    /// backend registered as `config.backend`.
    #[cfg(feature = "image")]
    pub fn new(
        config: ScanConfig,
        registry: &ledmap_detector::BackendRegistry,
    ) -> Result<Self, ScannerError> {
        let device = config.device.clone();
        let backend = config.backend.clone();
        let server = config.server.clone();
        let registry = registry.clone();
        let engine: Box<dyn SfmEngine + Send> = match config.engine() {
            Some(engine) => Box::new(engine),
            None => Box::new(ledmap_sfm::NoEngine),
        };
        Self::with_hardware(
            config,
            move || ledmap_vision::FrameDirectoryCamera::open(device),
            move || registry.create(&backend, server.as_deref()),
            engine,
        )
    }

    /// Start a session with explicit camera and backend constructors.
    ///
    /// 2D maps already in the output directory seed the reconstruction and the
    /// scan continues after their last view.
    pub fn with_hardware<C, B, FC, FB, E>(
        config: ScanConfig,
        open_camera: FC,
        open_backend: FB,
        engine: E,
    ) -> Result<Self, ScannerError>
    where
        C: Camera + 'static,
        B: LedBackend + 'static,
        FC: FnOnce() -> Result<C, CameraError> + Send + 'static,
        FB: FnOnce() -> Result<B, BackendError> + Send + 'static,
        E: SfmEngine + Send + 'static,
    {
        config.validate()?;

        let seed = load_all_2d_maps(&config.output_dir)?;
        let current_view = last_view(&seed).map_or(0, |view| view + 1);
        if !seed.is_empty() {
            info!(
                "resuming with {} detections, next view {current_view}",
                seed.len()
            );
        }

        let (requests, requests_rx) = channel::unbounded();
        let (updates_tx, updates) = channel::unbounded();
        let (sfm_tx, sfm_rx) = channel::unbounded();
        let (writer_tx, writer_rx) = channel::unbounded();
        let (writer_maps_tx, writer_maps_rx) = channel::unbounded();
        let (feedback_tx, feedback_rx) = channel::unbounded();
        let (maps_tx, map_updates) = channel::unbounded();

        let file_writer = FileWriterWorker::spawn(
            config.output_dir.clone(),
            writer_rx,
            writer_maps_rx,
            FLUSH_TICK,
        )?;
        let sfm = SfmWorker::spawn(
            engine,
            config.sfm_params(),
            seed,
            sfm_rx,
            SfmOutputs {
                maps: vec![writer_maps_tx, maps_tx],
                feedback: vec![feedback_tx],
            },
        )?;
        let detector = DetectorWorker::spawn(
            open_camera,
            open_backend,
            config.detector_params(),
            config.timeout.clone(),
            DetectorChannels {
                requests: requests_rx,
                maps: feedback_rx,
                outputs: vec![writer_tx, sfm_tx, updates_tx],
            },
        )?;

        let led_count = u32::try_from(detector.led_count()).unwrap_or(u32::MAX);
        let led_range = config.led_start..config.led_end.min(led_count);
        info!(
            "scanning LEDs {}..{} of {led_count}",
            led_range.start, led_range.end
        );

        Ok(Self {
            config,
            requests,
            updates,
            map_updates,
            latest_map: None,
            detector,
            sfm,
            file_writer,
            led_range,
            current_view,
            interrupt: ExitEvent::new(),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// LEDs requested for every viewpoint.
    pub fn led_range(&self) -> Range<u32> {
        self.led_range.clone()
    }

    /// Abort scans once `interrupt` is set, e.g. from a Ctrl-C handler.
    ///
    /// An interrupted scan stops the detector, which switches every LED off,
    /// and reports [`ViewOutcome::Failed`]. Later scans fail the same way.
    pub fn set_interrupt(&mut self, interrupt: ExitEvent) {
        self.interrupt = interrupt;
    }

    /// View id the next scan will use.
    pub fn current_view(&self) -> u32 {
        self.current_view
    }

    /// Scan one viewpoint and wait for its outcome.
    ///
    /// The view id advances only when the viewpoint completed cleanly; a failed
    /// or deleted viewpoint is retried under the same id.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip(self), fields(view = self.current_view))
    )]
    pub fn scan_view(&mut self) -> Result<ViewOutcome, ScannerError> {
        if self.led_range.is_empty() {
            return Err(ScannerError::EmptyRange {
                start: self.led_range.start,
                end: self.led_range.end,
            });
        }
        let view_id = self.current_view;
        if self.interrupt.is_set() {
            self.detector.stop();
            warn!("session interrupted, view {view_id} not scanned");
            return Ok(ViewOutcome::Failed);
        }
        let request = DetectionRequest::new(self.led_range.start, self.led_range.end, view_id);
        self.requests
            .send(request)
            .map_err(|_| ScannerError::WorkerGone("detector"))?;

        let total = request.len();
        let mut detected = 0;
        let mut skipped = 0;
        loop {
            if self.interrupt.is_set() {
                self.detector.stop();
            }
            let event = match self.updates.recv_timeout(TICK) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) if self.detector.is_running() => continue,
                Err(_) if self.interrupt.is_set() => {
                    warn!("view {view_id} interrupted");
                    return Ok(ViewOutcome::Failed);
                }
                Err(_) => return Err(ScannerError::WorkerGone("detector")),
            };
            match &event {
                DetectionEvent::Detect(_) => detected += 1,
                DetectionEvent::Skip(led_id) => {
                    debug!("LED {led_id} not seen");
                    skipped += 1;
                }
                _ => {}
            }
            if (detected + skipped) % PROGRESS_EVERY == 0 && !event.is_terminal() {
                info!("view {view_id}: {}/{total} LEDs, {detected} detected", detected + skipped);
            }
            if let Some(outcome) = ViewOutcome::from_event(&event) {
                if outcome == ViewOutcome::Done {
                    self.current_view += 1;
                }
                info!("view {view_id} {outcome:?}: {detected} detected, {skipped} skipped");
                return Ok(outcome);
            }
        }
    }

    /// Most recent 3D map published by the reconstruction worker.
    pub fn latest_map(&mut self) -> Option<&[Led3D]> {
        while let Ok(map) = self.map_updates.try_recv() {
            self.latest_map = Some(map);
        }
        self.latest_map.as_deref()
    }

    /// Wait up to `timeout` for the next published 3D map.
    pub fn wait_for_map(&mut self, timeout: Duration) -> Option<&[Led3D]> {
        if let Ok(map) = self.map_updates.recv_timeout(timeout) {
            self.latest_map = Some(map);
        }
        self.latest_map()
    }

    /// Stop every worker. The detector switches the LEDs off before it exits.
    pub fn close(mut self) {
        self.detector.stop();
        self.sfm.stop();
        self.file_writer.stop();
        self.detector.terminate(CLOSE_TIMEOUT);
        self.sfm.terminate(CLOSE_TIMEOUT);
        self.file_writer.terminate(CLOSE_TIMEOUT);
        info!("scanner closed");
    }
}
