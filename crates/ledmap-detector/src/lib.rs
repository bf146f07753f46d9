//! LED acquisition: backend capability, backend registry and the per-LED
//! flash/detect/verify state machine.
//!
//! [`Detector`] is single-threaded and owns its camera and backend; running it
//! on a worker thread and fanning its [`DetectionEvent`]s out to consumers is
//! left to the caller.
//!
//! ```no_run
//! use ledmap_core::TimeoutParams;
//! use ledmap_detector::synthetic::{Scene, SyntheticRig};
//! use ledmap_detector::{DetectionRequest, Detector, DetectorParams};
//!
//! let rig = SyntheticRig::new(Scene::grid(8, 128, 96));
//! let mut detector = Detector::new(
//!     rig.camera(),
//!     rig.backend(),
//!     DetectorParams::default(),
//!     TimeoutParams::default(),
//! );
//! let outcome = detector
//!     .scan_view(DetectionRequest::new(0, 8, 0), || false, |event| println!("{event:?}"))
//!     .unwrap();
//! println!("{outcome:?}");
//! ```

mod backend;
mod detector;
mod event;
pub mod synthetic;

pub use backend::{
    all_off, Backend, BackendError, BackendFactory, BackendRegistry, Capabilities, DummyBackend,
    LedBackend,
};
pub use detector::{Detector, DetectorError, DetectorParams};
pub use event::{DetectionEvent, DetectionRequest, ViewOutcome};
