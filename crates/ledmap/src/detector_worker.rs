//! Detector worker: owns the camera and the LED backend for its whole life.

use std::time::Duration;

use crossbeam::channel::{self, never, Receiver, Sender};
use crossbeam::select;
use ledmap_core::{Led3D, TimeoutParams};
use ledmap_detector::{
    BackendError, DetectionEvent, DetectionRequest, Detector, DetectorError, DetectorParams,
    LedBackend,
};
use ledmap_vision::{Camera, CameraError};
use log::{debug, error, info, warn};

use crate::worker::{ExitEvent, Fanout, WorkerHandle, TICK};
use crate::ScannerError;

/// Channels wired to the detector worker.
#[derive(Debug)]
pub struct DetectorChannels {
    /// Viewpoint scan requests, one processed at a time.
    pub requests: Receiver<DetectionRequest>,
    /// Maps shown on buffer-capable backends between scans.
    pub maps: Receiver<Vec<Led3D>>,
    /// Every event is copied to each of these.
    pub outputs: Vec<Sender<DetectionEvent>>,
}

#[derive(Debug)]
pub struct DetectorWorker {
    handle: WorkerHandle,
    led_count: usize,
}

impl DetectorWorker {
    /// Start the worker and wait until its hardware is open.
    ///
    /// `open_camera` and `open_backend` run on the worker thread. Their failure
    /// is returned here and the worker exits.
    pub fn spawn<C, B, FC, FB>(
        open_camera: FC,
        open_backend: FB,
        params: DetectorParams,
        timeout: TimeoutParams,
        channels: DetectorChannels,
    ) -> Result<Self, ScannerError>
    where
        C: Camera + 'static,
        B: LedBackend + 'static,
        FC: FnOnce() -> Result<C, CameraError> + Send + 'static,
        FB: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = channel::bounded::<Result<usize, DetectorError>>(1);

        let handle = WorkerHandle::spawn("detector", move |exit| {
            let opened = open_camera()
                .map_err(DetectorError::from)
                .and_then(|camera| Ok((camera, open_backend()?)));
            let detector = match opened {
                Ok((camera, backend)) => Detector::new(camera, backend, params, timeout),
                Err(err) => {
                    error!("failed to open hardware: {err}");
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            info!("hardware ready, {} LEDs", detector.led_count());
            let _ = ready_tx.send(Ok(detector.led_count()));
            run(detector, &exit, channels);
        })?;

        match ready_rx.recv() {
            Ok(Ok(led_count)) => Ok(Self { handle, led_count }),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(ScannerError::WorkerGone("detector")),
        }
    }

    /// Number of LEDs reported by the backend at startup.
    pub fn led_count(&self) -> usize {
        self.led_count
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

fn run<C: Camera, B: LedBackend>(
    mut detector: Detector<C, B>,
    exit: &ExitEvent,
    channels: DetectorChannels,
) {
    let DetectorChannels {
        requests,
        mut maps,
        outputs,
    } = channels;
    let mut outputs = Fanout::new(outputs);

    while !exit.is_set() {
        select! {
            recv(requests) -> request => match request {
                Ok(request) => scan(&mut detector, request, exit, &mut outputs),
                Err(_) => {
                    debug!("request channel closed");
                    break;
                }
            },
            recv(maps) -> map => match map {
                Ok(mut leds) => {
                    while let Ok(newer) = maps.try_recv() {
                        leds = newer;
                    }
                    match detector.show_map(&leds) {
                        Ok(true) => debug!("showing map of {} LEDs", leds.len()),
                        Ok(false) => {}
                        Err(err) => warn!("failed to show map: {err}"),
                    }
                }
                Err(_) => maps = never(),
            },
            default(TICK) => {}
        }
    }

    info!("switching all LEDs off");
    if let Err(err) = detector.all_off() {
        error!("failed to switch LEDs off: {err}");
    }
    if let Err(err) = detector.reset_camera() {
        warn!("failed to reset camera: {err}");
    }
}

fn scan<C: Camera, B: LedBackend>(
    detector: &mut Detector<C, B>,
    request: DetectionRequest,
    exit: &ExitEvent,
    outputs: &mut Fanout<DetectionEvent>,
) {
    let view_id = request.view_id;
    let result = detector.scan_view(request, || exit.is_set(), |event| outputs.send(event));
    if let Err(err) = result {
        error!("view {view_id} aborted: {err}");
        outputs.send(DetectionEvent::Fail { view_id });
    }
    if let Err(err) = detector.reset_camera() {
        warn!("failed to reset camera: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledmap_core::{colors, LedState};
    use ledmap_detector::synthetic::{Scene, SyntheticCamera, SyntheticRig};
    use ledmap_detector::{DummyBackend, ViewOutcome};
    use std::time::Instant;

    fn fast_params() -> DetectorParams {
        DetectorParams {
            darkness_timeout_sec: 0.05,
            ..DetectorParams::default()
        }
    }

    fn fast_timeout() -> TimeoutParams {
        TimeoutParams {
            default_timeout_sec: 0.05,
            ..TimeoutParams::default()
        }
    }

    struct Wired {
        worker: DetectorWorker,
        requests: Sender<DetectionRequest>,
        maps: Sender<Vec<Led3D>>,
        events: Receiver<DetectionEvent>,
        copies: Receiver<DetectionEvent>,
    }

    fn wire(rig: &SyntheticRig, buffered: bool) -> Wired {
        let (requests, requests_rx) = channel::unbounded();
        let (maps, maps_rx) = channel::unbounded();
        let (events_tx, events) = channel::unbounded();
        let (copies_tx, copies) = channel::unbounded();
        let camera = rig.camera();
        let backend = if buffered {
            rig.buffered_backend()
        } else {
            rig.backend()
        };
        let worker = DetectorWorker::spawn(
            move || Ok(camera),
            move || Ok(backend),
            fast_params(),
            fast_timeout(),
            DetectorChannels {
                requests: requests_rx,
                maps: maps_rx,
                outputs: vec![events_tx, copies_tx],
            },
        )
        .unwrap();
        Wired {
            worker,
            requests,
            maps,
            events,
            copies,
        }
    }

    fn collect_view(events: &Receiver<DetectionEvent>) -> Vec<DetectionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = events.recv_timeout(Duration::from_secs(10)).unwrap();
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                return seen;
            }
        }
    }

    #[test]
    fn scan_events_reach_every_output() {
        let rig = SyntheticRig::new(Scene::grid(6, 96, 64));
        rig.scene().positions[3] = None;
        let mut wired = wire(&rig, false);
        assert_eq!(wired.worker.led_count(), 6);

        wired.requests.send(DetectionRequest::new(0, 6, 2)).unwrap();
        let events = collect_view(&wired.events);
        let copies = collect_view(&wired.copies);

        assert_eq!(events, copies);
        assert_eq!(events.len(), 7);
        assert_eq!(events[3], DetectionEvent::Skip(3));
        assert_eq!(events.last(), Some(&DetectionEvent::Done(2)));
        assert_eq!(
            ViewOutcome::from_event(events.last().unwrap()),
            Some(ViewOutcome::Done)
        );

        wired.worker.stop();
        wired.worker.join();
        assert!(!wired.worker.is_running());
        assert!((0..6).all(|id| !rig.scene().is_lit(id)));
        assert_eq!(rig.scene().exposure, None);
    }

    #[test]
    fn ambient_light_fails_the_view() {
        let rig = SyntheticRig::new(Scene::grid(4, 96, 64));
        rig.scene().ambient = Some((80, 50));
        let wired = wire(&rig, false);

        wired.requests.send(DetectionRequest::new(0, 4, 0)).unwrap();
        let events = collect_view(&wired.events);
        assert_eq!(events, vec![DetectionEvent::Fail { view_id: 0 }]);
    }

    #[test]
    fn maps_are_shown_on_buffered_backends() {
        let rig = SyntheticRig::new(Scene::grid(4, 96, 64));
        let wired = wire(&rig, true);

        let mut led = Led3D::at(1, 0.0, 1.0, 0.0);
        led.add_state(LedState::Interpolated);
        wired.maps.send(vec![led.clone()]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while rig.scene().last_buffer.is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let buffer = rig.scene().last_buffer.clone().unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer[1], led.color());
        assert_eq!(buffer[0], colors::BLACK);
    }

    #[test]
    fn views_after_a_shown_map_still_complete() {
        let rig = SyntheticRig::new(Scene::grid(4, 96, 64));
        let wired = wire(&rig, true);

        wired.requests.send(DetectionRequest::new(0, 4, 0)).unwrap();
        let first = collect_view(&wired.events);
        assert_eq!(first.last(), Some(&DetectionEvent::Done(0)));

        wired.maps.send(vec![Led3D::at(1, 0.0, 1.0, 0.0)]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !rig.scene().is_lit(1) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(rig.scene().is_lit(1));

        wired.requests.send(DetectionRequest::new(0, 4, 1)).unwrap();
        let second = collect_view(&wired.events);
        assert_eq!(second.last(), Some(&DetectionEvent::Done(1)));
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn hardware_failure_is_reported_at_start() {
        let (_requests, requests_rx) = channel::unbounded();
        let (_maps, maps_rx) = channel::unbounded();
        let result = DetectorWorker::spawn(
            || -> Result<SyntheticCamera, CameraError> {
                Err(CameraError::NotFound {
                    path: "/dev/null/camera".into(),
                })
            },
            || Ok(DummyBackend),
            fast_params(),
            fast_timeout(),
            DetectorChannels {
                requests: requests_rx,
                maps: maps_rx,
                outputs: Vec::new(),
            },
        );
        assert!(matches!(
            result,
            Err(ScannerError::Detector(DetectorError::Camera(
                CameraError::NotFound { .. }
            )))
        ));
    }
}
