//! Per-LED flash/detect/verify state machine.
//!
//! For every LED the detector waits for a dark frame, switches the LED on,
//! polls frames until a blob appears or the adaptive timeout expires, switches
//! the LED off, and waits for darkness again before the next LED.

use std::time::{Duration, Instant};

use ledmap_core::{colors, AdaptiveTimeout, Led2D, Led3D, Point2D, TimeoutParams};
use ledmap_vision::{find_led_in_image, Camera, CameraError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::backend::{self, BackendError, LedBackend};
use crate::event::{DetectionEvent, DetectionRequest, ViewOutcome};

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Detector tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Pixels at or below this value are ignored.
    pub threshold: u8,
    /// Camera exposure used while scanning; lower is darker.
    pub dark_exposure: i32,
    /// Bound on a single wait for a frame without any blob (seconds).
    pub darkness_timeout_sec: f64,
    /// Re-detect a reference LED after each viewpoint.
    pub check_movement: bool,
    /// Drift, in percent of the frame width, above which a viewpoint is discarded.
    pub movement_threshold_percent: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 128,
            dark_exposure: -10,
            darkness_timeout_sec: 3.0,
            check_movement: true,
            movement_threshold_percent: 1.0,
        }
    }
}

impl DetectorParams {
    pub fn darkness_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.darkness_timeout_sec.max(0.0))
    }
}

/// Owns one camera and one backend for its whole lifetime.
pub struct Detector<C, B> {
    camera: C,
    backend: B,
    timeout: AdaptiveTimeout,
    params: DetectorParams,
}

impl<C: Camera, B: LedBackend> Detector<C, B> {
    pub fn new(camera: C, backend: B, params: DetectorParams, timeout: TimeoutParams) -> Self {
        Self {
            camera,
            backend,
            timeout: AdaptiveTimeout::new(timeout),
            params,
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn timeout(&self) -> &AdaptiveTimeout {
        &self.timeout
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn led_count(&self) -> usize {
        self.backend.led_count()
    }

    /// Grab one frame and look for a lit LED in it.
    ///
    /// A frame shorter than its dimensions is an error, never a dark frame.
    pub fn find_led(&mut self) -> Result<Option<Point2D>, DetectorError> {
        let frame = self.camera.read()?;
        let expected = frame.width * frame.height;
        if frame.data.len() < expected {
            return Err(CameraError::Truncated {
                expected,
                actual: frame.data.len(),
            }
            .into());
        }
        Ok(find_led_in_image(&frame.view(), self.params.threshold))
    }

    /// Poll frames until one has no blob. `false` when `timeout` elapsed first.
    pub fn wait_for_darkness(&mut self, timeout: Duration) -> Result<bool, DetectorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.find_led()?.is_none() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    // At least one frame is examined even when the deadline already passed.
    fn poll_until(&mut self, deadline: Instant) -> Result<Option<Point2D>, DetectorError> {
        loop {
            if let Some(point) = self.find_led()? {
                return Ok(Some(point));
            }
            if Instant::now() > deadline {
                return Ok(None);
            }
        }
    }

    /// Flash `led_id` and locate it.
    ///
    /// The LED is always switched off again, whether it was found, timed out or
    /// the camera failed. After a successful detection the darkness wait is
    /// repeated until the frame is dark, re-sending the off-command every time,
    /// since a stuck LED would corrupt every later detection.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn enable_and_find_led(
        &mut self,
        led_id: u32,
        view_id: u32,
    ) -> Result<Led2D, DetectorError> {
        let darkness_timeout = self.params.darkness_timeout();

        if !self.wait_for_darkness(darkness_timeout)? {
            warn!("frame not dark before LED {led_id}, skipping it");
            return Ok(Led2D::missing(led_id, view_id));
        }

        let start = Instant::now();
        self.backend.set_led(led_id, true)?;

        let found = self.poll_until(start + self.timeout.timeout());
        let elapsed = start.elapsed();
        let off = self.backend.set_led(led_id, false);
        let point = found?;
        off?;

        let Some(point) = point else {
            debug!("LED {led_id} not seen within {:?}", self.timeout.timeout());
            return Ok(Led2D::missing(led_id, view_id));
        };

        self.timeout.add_sample(elapsed);

        while !self.wait_for_darkness(darkness_timeout)? {
            warn!("LED {led_id} still visible after switching off, resending");
            self.backend.set_led(led_id, false)?;
        }

        Ok(Led2D::new(led_id, view_id, point))
    }

    /// Drift in percent of the frame width between the first re-detectable LED
    /// of `detections` and its original position.
    ///
    /// 100 when none of them can be found again, 0 when there is nothing to compare.
    pub fn camera_motion(&mut self, detections: &[Led2D]) -> Result<f64, DetectorError> {
        let mut compared = false;
        for original in detections {
            let Some(original_point) = &original.point else {
                continue;
            };
            compared = true;
            let again = self.enable_and_find_led(original.led_id, original.view_id)?;
            if let Some(point) = again.point {
                return Ok(original_point.distance(&point) * 100.0);
            }
        }
        Ok(if compared { 100.0 } else { 0.0 })
    }

    /// Scan one viewpoint and report every step through `emit`.
    ///
    /// `exit` is polled between LEDs; an interrupted viewpoint ends with `Fail`.
    pub fn scan_view<E, X>(
        &mut self,
        request: DetectionRequest,
        exit: X,
        mut emit: E,
    ) -> Result<ViewOutcome, DetectorError>
    where
        E: FnMut(DetectionEvent),
        X: Fn() -> bool,
    {
        let view_id = request.view_id;
        info!(
            "scanning view {view_id}, LEDs {}..{}",
            request.led_from, request.led_to
        );
        if self.backend.capabilities().set_leds {
            // Clears a map shown between viewpoints.
            backend::all_off(&mut self.backend)?;
        }
        self.camera.set_dark(self.params.dark_exposure)?;

        if !self.wait_for_darkness(self.params.darkness_timeout())? {
            warn!("light detected before scanning view {view_id}, aborting it");
            emit(DetectionEvent::Fail { view_id });
            return Ok(ViewOutcome::Failed);
        }

        let mut detections = Vec::new();
        for led_id in request.led_from..request.led_to {
            if exit() {
                warn!("view {view_id} interrupted at LED {led_id}");
                emit(DetectionEvent::Fail { view_id });
                return Ok(ViewOutcome::Failed);
            }
            let led = self.enable_and_find_led(led_id, view_id)?;
            if led.point.is_some() {
                emit(DetectionEvent::Detect(led.clone()));
                detections.push(led);
            } else {
                emit(DetectionEvent::Skip(led_id));
            }
        }

        if self.params.check_movement {
            let motion = self.camera_motion(&detections)?;
            if motion > self.params.movement_threshold_percent {
                warn!("camera moved {motion:.2}% during view {view_id}, discarding it");
                emit(DetectionEvent::Delete(view_id));
                return Ok(ViewOutcome::Deleted);
            }
            debug!("view {view_id} movement {motion:.3}%");
        }

        info!(
            "view {view_id} done, {} of {} LEDs detected",
            detections.len(),
            request.len()
        );
        emit(DetectionEvent::Done(view_id));
        Ok(ViewOutcome::Done)
    }

    /// Show the state of a map on a buffer-capable backend.
    ///
    /// Every LED takes its [`Led3D::color`], LEDs absent from the map are black.
    /// Returns `false` when the backend has no buffer.
    pub fn show_map(&mut self, leds: &[Led3D]) -> Result<bool, DetectorError> {
        if !self.backend.capabilities().set_leds {
            return Ok(false);
        }
        let mut buffer = vec![colors::BLACK; self.backend.led_count()];
        for led in leds {
            if let Some(slot) = buffer.get_mut(led.led_id as usize) {
                *slot = led.color();
            }
        }
        self.backend.set_leds(&buffer)?;
        Ok(true)
    }

    pub fn all_off(&mut self) -> Result<(), DetectorError> {
        backend::all_off(&mut self.backend)?;
        Ok(())
    }

    /// Return the camera to automatic exposure.
    pub fn reset_camera(&mut self) -> Result<(), DetectorError> {
        self.camera.reset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{Scene, SyntheticRig};
    use approx::assert_relative_eq;
    use ledmap_core::Led3D;

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

    fn rig(count: usize) -> SyntheticRig {
        SyntheticRig::new(Scene::grid(count, 128, 96))
    }

    fn detector(rig: &SyntheticRig) -> Detector<impl Camera, impl LedBackend> {
        Detector::new(rig.camera(), rig.backend(), fast_params(), fast_timeout())
    }

    #[test]
    fn finds_lit_led_at_its_position() {
        let rig = rig(4);
        let mut det = detector(&rig);

        let led = det.enable_and_find_led(2, 5).unwrap();

        assert_eq!((led.led_id, led.view_id), (2, 5));
        let point = led.point.unwrap();
        let (u, v) = rig.scene().expected(2).unwrap();
        assert_relative_eq!(point.u(), u);
        assert_relative_eq!(point.v(), v);
        assert!(!rig.scene().is_lit(2));
        assert_eq!(det.timeout().sample_count(), 1);
    }

    #[test]
    fn timed_out_led_is_still_switched_off() {
        let rig = rig(4);
        rig.scene().positions[1] = None;
        let mut det = detector(&rig);

        let led = det.enable_and_find_led(1, 0).unwrap();

        assert!(led.point.is_none());
        let scene = rig.scene();
        assert_eq!(scene.on_commands, 1);
        assert!(scene.off_commands >= 1);
        assert!(!scene.is_lit(1));
        drop(scene);
        assert_eq!(det.timeout().sample_count(), 0);
    }

    #[test]
    fn ambient_light_skips_led_without_lighting_it() {
        let rig = rig(4);
        rig.scene().ambient = Some((100, 80));
        let mut det = detector(&rig);

        let led = det.enable_and_find_led(0, 0).unwrap();

        assert!(led.point.is_none());
        assert_eq!(rig.scene().on_commands, 0);
    }

    #[test]
    fn dropped_off_commands_are_resent() {
        let rig = rig(4);
        rig.scene().drop_off_commands = 2;
        let mut det = detector(&rig);

        let led = det.enable_and_find_led(3, 0).unwrap();

        assert!(led.point.is_some());
        let scene = rig.scene();
        assert_eq!(scene.off_commands, 3);
        assert!(!scene.is_lit(3));
    }

    #[test]
    fn slow_led_is_found_within_default_timeout() {
        let rig = rig(2);
        rig.scene().latency = Duration::from_millis(20);
        let mut det = Detector::new(
            rig.camera(),
            rig.backend(),
            fast_params(),
            TimeoutParams::default(),
        );

        let led = det.enable_and_find_led(0, 0).unwrap();

        assert!(led.point.is_some());
        assert_eq!(det.timeout().estimate_secs(), 1.0);
    }

    #[test]
    fn scan_view_reports_each_led_then_done() {
        let rig = rig(5);
        rig.scene().positions[3] = None;
        let mut det = detector(&rig);
        let mut events = Vec::new();

        let outcome = det
            .scan_view(DetectionRequest::new(1, 5, 2), || false, |e| events.push(e))
            .unwrap();

        assert_eq!(outcome, ViewOutcome::Done);
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], DetectionEvent::Detect(l) if l.led_id == 1 && l.view_id == 2));
        assert!(matches!(&events[1], DetectionEvent::Detect(l) if l.led_id == 2));
        assert_eq!(events[2], DetectionEvent::Skip(3));
        assert!(matches!(&events[3], DetectionEvent::Detect(l) if l.led_id == 4));
        assert_eq!(events[4], DetectionEvent::Done(2));
        assert_eq!(rig.scene().exposure, Some(-10));
    }

    #[test]
    fn light_before_scan_fails_the_view() {
        let rig = rig(3);
        rig.scene().ambient = Some((100, 80));
        let mut det = detector(&rig);
        let mut events = Vec::new();

        let outcome = det
            .scan_view(DetectionRequest::new(0, 3, 7), || false, |e| events.push(e))
            .unwrap();

        assert_eq!(outcome, ViewOutcome::Failed);
        assert_eq!(events, vec![DetectionEvent::Fail { view_id: 7 }]);
        assert_eq!(rig.scene().on_commands, 0);
    }

    #[test]
    fn camera_movement_deletes_the_view() {
        let rig = rig(4);
        rig.scene().move_after = Some((3, (20, 0)));
        let mut det = detector(&rig);
        let mut events = Vec::new();

        let outcome = det
            .scan_view(DetectionRequest::new(0, 4, 0), || false, |e| events.push(e))
            .unwrap();

        assert_eq!(outcome, ViewOutcome::Deleted);
        assert_eq!(events.last(), Some(&DetectionEvent::Delete(0)));
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn movement_check_can_be_disabled() {
        let rig = rig(4);
        rig.scene().move_after = Some((3, (20, 0)));
        let mut det = Detector::new(
            rig.camera(),
            rig.backend(),
            DetectorParams {
                check_movement: false,
                ..fast_params()
            },
            fast_timeout(),
        );

        let outcome = det
            .scan_view(DetectionRequest::new(0, 4, 0), || false, |_| {})
            .unwrap();

        assert_eq!(outcome, ViewOutcome::Done);
    }

    #[test]
    fn motion_is_full_when_nothing_is_found_again() {
        let rig = rig(2);
        let mut det = detector(&rig);
        let first = det.enable_and_find_led(0, 0).unwrap();
        rig.scene().positions[0] = None;

        assert_eq!(det.camera_motion(&[first]).unwrap(), 100.0);
        assert_eq!(det.camera_motion(&[Led2D::missing(1, 0)]).unwrap(), 0.0);
    }

    #[test]
    fn interrupted_scan_fails_the_view() {
        let rig = rig(3);
        let mut det = detector(&rig);
        let mut events = Vec::new();

        let outcome = det
            .scan_view(DetectionRequest::new(0, 3, 1), || true, |e| events.push(e))
            .unwrap();

        assert_eq!(outcome, ViewOutcome::Failed);
        assert_eq!(events, vec![DetectionEvent::Fail { view_id: 1 }]);
    }

    #[test]
    fn show_map_paints_known_leds_and_blacks_the_rest() {
        let rig = rig(3);
        let mut det = Detector::new(
            rig.camera(),
            rig.buffered_backend(),
            fast_params(),
            fast_timeout(),
        );

        assert!(det.show_map(&[Led3D::at(1, 1.0, 0.0, 0.0)]).unwrap());
        assert_eq!(
            rig.scene().last_buffer.clone().unwrap(),
            vec![colors::BLACK, colors::GREEN, colors::BLACK]
        );

        det.all_off().unwrap();
        assert_eq!(rig.scene().last_buffer.clone().unwrap(), vec![colors::BLACK; 3]);

        let mut plain = detector(&rig);
        assert!(!plain.show_map(&[Led3D::at(1, 1.0, 0.0, 0.0)]).unwrap());
    }

    #[test]
    fn shown_map_is_cleared_before_the_next_view() {
        let rig = rig(4);
        let mut det = Detector::new(
            rig.camera(),
            rig.buffered_backend(),
            fast_params(),
            fast_timeout(),
        );
        let request = DetectionRequest::new(0, 4, 0);
        assert_eq!(det.scan_view(request, || false, |_| {}).unwrap(), ViewOutcome::Done);

        assert!(det.show_map(&[Led3D::at(1, 1.0, 0.0, 0.0)]).unwrap());
        assert!(rig.scene().is_lit(1));

        let request = DetectionRequest::new(0, 4, 1);
        assert_eq!(det.scan_view(request, || false, |_| {}).unwrap(), ViewOutcome::Done);
        assert!((0..4).all(|id| !rig.scene().is_lit(id)));
    }

    struct TruncatedCamera;

    impl Camera for TruncatedCamera {
        fn read(&mut self) -> Result<ledmap_core::GrayImage, CameraError> {
            Ok(ledmap_core::GrayImage {
                width: 8,
                height: 8,
                data: vec![0; 10],
            })
        }
    }

    #[test]
    fn truncated_frame_is_not_dark() {
        let rig = rig(2);
        let mut det = Detector::new(TruncatedCamera, rig.backend(), fast_params(), fast_timeout());

        let err = det.wait_for_darkness(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            DetectorError::Camera(CameraError::Truncated {
                expected: 64,
                actual: 10
            })
        ));
        assert!(det
            .scan_view(DetectionRequest::new(0, 2, 0), || false, |_| {})
            .is_err());
        assert_eq!(rig.scene().on_commands, 0);
    }
}
