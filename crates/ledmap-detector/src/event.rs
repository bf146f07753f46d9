use ledmap_core::Led2D;
use serde::{Deserialize, Serialize};

/// Request to scan `led_from..led_to` from viewpoint `view_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub led_from: u32,
    pub led_to: u32,
    pub view_id: u32,
}

impl DetectionRequest {
    pub fn new(led_from: u32, led_to: u32, view_id: u32) -> Self {
        Self {
            led_from,
            led_to,
            view_id,
        }
    }

    pub fn len(&self) -> u32 {
        self.led_to.saturating_sub(self.led_from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result stream of a viewpoint scan.
///
/// Within one viewpoint `Detect`/`Skip` arrive in ascending LED order and
/// exactly one of `Fail`, `Done` or `Delete` terminates the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DetectionEvent {
    /// The LED was found.
    Detect(Led2D),
    /// The LED was requested but not seen.
    Skip(u32),
    /// Unexpected light before the scan; nothing of this viewpoint was recorded.
    Fail { view_id: u32 },
    /// Viewpoint complete and the camera held still.
    Done(u32),
    /// Viewpoint complete but the camera moved; discard its data.
    Delete(u32),
}

impl DetectionEvent {
    /// True for the variants that end a viewpoint.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DetectionEvent::Fail { .. } | DetectionEvent::Done(_) | DetectionEvent::Delete(_)
        )
    }
}

/// How a viewpoint scan ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewOutcome {
    Done,
    Deleted,
    Failed,
}

impl ViewOutcome {
    pub fn from_event(event: &DetectionEvent) -> Option<Self> {
        match event {
            DetectionEvent::Done(_) => Some(ViewOutcome::Done),
            DetectionEvent::Delete(_) => Some(ViewOutcome::Deleted),
            DetectionEvent::Fail { .. } => Some(ViewOutcome::Failed),
            DetectionEvent::Detect(_) | DetectionEvent::Skip(_) => None,
        }
    }
}
