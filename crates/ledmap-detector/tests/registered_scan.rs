use std::time::Duration;

use ledmap_core::TimeoutParams;
use ledmap_detector::synthetic::{Scene, SyntheticRig};
use ledmap_detector::{
    BackendRegistry, Capabilities, DetectionEvent, DetectionRequest, Detector, DetectorParams,
    LedBackend, ViewOutcome,
};

fn registry_with(rig: &SyntheticRig) -> BackendRegistry {
    let mut registry = BackendRegistry::default();
    let shared = rig.clone();
    registry
        .register("synthetic", Capabilities::default(), move |_| {
            Ok(Box::new(shared.backend()))
        })
        .unwrap();
    registry
}

#[test]
fn full_view_through_registered_backend() {
    let rig = SyntheticRig::new(Scene::grid(12, 160, 120));
    rig.scene().latency = Duration::from_millis(2);
    let backend = registry_with(&rig).create("synthetic", None).unwrap();
    assert_eq!(backend.led_count(), 12);

    let mut detector = Detector::new(
        rig.camera(),
        backend,
        DetectorParams {
            darkness_timeout_sec: 0.1,
            ..DetectorParams::default()
        },
        TimeoutParams::default(),
    );

    let mut events = Vec::new();
    let outcome = detector
        .scan_view(DetectionRequest::new(0, 12, 4), || false, |e| events.push(e))
        .unwrap();

    assert_eq!(outcome, ViewOutcome::Done);
    let detected: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            DetectionEvent::Detect(led) => Some(led.led_id),
            _ => None,
        })
        .collect();
    assert_eq!(detected, (0..12).collect::<Vec<_>>());
    assert_eq!(events.last(), Some(&DetectionEvent::Done(4)));

    // 12 scan samples plus the movement re-check, so the estimate adapted
    // from its 1 s default to a few milliseconds.
    assert_eq!(detector.timeout().sample_count(), 13);
    assert!(detector.timeout().estimate_secs() < 0.5);

    let scene = rig.scene();
    assert_eq!(scene.on_commands, 13);
    assert!(scene.off_commands >= 13);
}
