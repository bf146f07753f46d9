//! Hardware-free camera and backend sharing one simulated LED scene.
//!
//! The backend switches LEDs in the scene, either one at a time or through a
//! full colour buffer, and the camera renders every lit LED as a small bright
//! square. Latency, ambient light, dropped commands and camera
//! movement can be injected to exercise the acquisition state machine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ledmap_core::{colors, GrayImage, Rgb};
use ledmap_vision::{normalize, Camera, CameraError};

use crate::backend::{BackendError, Capabilities, LedBackend};

const HALF_SIZE: usize = 2;

#[derive(Debug)]
pub struct Scene {
    pub width: usize,
    pub height: usize,
    /// Pixel position of each LED, `None` for LEDs hidden from the camera.
    pub positions: Vec<Option<(usize, usize)>>,
    /// Time between an on-command and the LED showing up in frames.
    pub latency: Duration,
    /// Constant light source not controlled by the backend.
    pub ambient: Option<(usize, usize)>,
    /// Number of upcoming off-commands the simulated driver silently drops.
    pub drop_off_commands: u32,
    /// Camera shift in pixels applied once `led_id` has been switched off.
    pub move_after: Option<(u32, (usize, usize))>,
    pub offset: (usize, usize),
    pub on_commands: usize,
    pub off_commands: usize,
    pub frames_read: usize,
    pub exposure: Option<i32>,
    pub last_buffer: Option<Vec<Rgb>>,
    lit: BTreeMap<u32, Instant>,
}

impl Scene {
    /// `count` visible LEDs laid out on a grid inside a `width x height` frame.
    pub fn grid(count: usize, width: usize, height: usize) -> Self {
        let spacing = 12;
        let cols = (width.saturating_sub(2 * spacing) / spacing).max(1);
        let positions = (0..count)
            .map(|i| Some((spacing + (i % cols) * spacing, spacing + (i / cols) * spacing)))
            .collect();
        Self {
            width,
            height,
            positions,
            latency: Duration::ZERO,
            ambient: None,
            drop_off_commands: 0,
            move_after: None,
            offset: (0, 0),
            on_commands: 0,
            off_commands: 0,
            frames_read: 0,
            exposure: None,
            last_buffer: None,
            lit: BTreeMap::new(),
        }
    }

    /// Normalized position at which the camera sees `led_id` without movement.
    pub fn expected(&self, led_id: u32) -> Option<(f64, f64)> {
        let (x, y) = self.positions.get(led_id as usize).copied().flatten()?;
        Some(normalize(x as f64, y as f64, self.width, self.height))
    }

    pub fn is_lit(&self, led_id: u32) -> bool {
        self.lit.contains_key(&led_id)
    }

    fn render(&self) -> GrayImage {
        let mut img = GrayImage::new(self.width, self.height);
        let now = Instant::now();
        let visible = self
            .lit
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.latency)
            .filter_map(|(id, _)| self.positions.get(*id as usize).copied().flatten())
            .map(|(x, y)| (x + self.offset.0, y + self.offset.1));
        for (x, y) in visible.chain(self.ambient) {
            img.fill_rect(
                x.saturating_sub(HALF_SIZE),
                y.saturating_sub(HALF_SIZE),
                x + HALF_SIZE + 1,
                y + HALF_SIZE + 1,
                255,
            );
        }
        img
    }
}

/// Shared handle on a [`Scene`].
#[derive(Clone, Debug)]
pub struct SyntheticRig {
    scene: Arc<Mutex<Scene>>,
}

impl SyntheticRig {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene: Arc::new(Mutex::new(scene)),
        }
    }

    /// Lock the scene. A poisoned lock still yields the scene.
    pub fn scene(&self) -> MutexGuard<'_, Scene> {
        self.scene.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn camera(&self) -> SyntheticCamera {
        SyntheticCamera { rig: self.clone() }
    }

    pub fn backend(&self) -> SyntheticBackend {
        SyntheticBackend {
            rig: self.clone(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn buffered_backend(&self) -> SyntheticBackend {
        SyntheticBackend {
            rig: self.clone(),
            capabilities: Capabilities {
                set_leds: true,
                ..Capabilities::default()
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    rig: SyntheticRig,
}

impl Camera for SyntheticCamera {
    fn read(&mut self) -> Result<GrayImage, CameraError> {
        let mut scene = self.rig.scene();
        scene.frames_read += 1;
        Ok(scene.render())
    }

    fn set_dark(&mut self, exposure: i32) -> Result<(), CameraError> {
        self.rig.scene().exposure = Some(exposure);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CameraError> {
        self.rig.scene().exposure = None;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    rig: SyntheticRig,
    capabilities: Capabilities,
}

impl LedBackend for SyntheticBackend {
    fn led_count(&self) -> usize {
        self.rig.scene().positions.len()
    }

    fn set_led(&mut self, led_id: u32, on: bool) -> Result<(), BackendError> {
        let mut scene = self.rig.scene();
        if on {
            scene.on_commands += 1;
            scene.lit.insert(led_id, Instant::now());
            return Ok(());
        }

        scene.off_commands += 1;
        if scene.drop_off_commands > 0 {
            scene.drop_off_commands -= 1;
            return Ok(());
        }
        scene.lit.remove(&led_id);
        if let Some((trigger, offset)) = scene.move_after {
            if trigger == led_id {
                scene.offset = offset;
                scene.move_after = None;
            }
        }
        Ok(())
    }

    fn set_leds(&mut self, buffer: &[Rgb]) -> Result<(), BackendError> {
        if !self.capabilities.set_leds {
            return Err(BackendError::Unsupported {
                operation: "set_leds",
            });
        }
        let mut scene = self.rig.scene();
        let now = Instant::now();
        for (led_id, color) in (0u32..).zip(buffer) {
            if *color == colors::BLACK {
                scene.lit.remove(&led_id);
            } else {
                scene.lit.entry(led_id).or_insert(now);
            }
        }
        scene.last_buffer = Some(buffer.to_vec());
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_frames_get_a_single_column() {
        let scene = Scene::grid(3, 16, 64);
        assert_eq!(scene.positions, vec![Some((12, 12)), Some((12, 24)), Some((12, 36))]);
    }

    #[test]
    fn coloured_buffer_entries_light_their_leds() {
        let rig = SyntheticRig::new(Scene::grid(3, 96, 64));
        let mut backend = rig.buffered_backend();

        backend
            .set_leds(&[colors::BLACK, colors::GREEN, colors::BLACK])
            .unwrap();
        assert!(rig.scene().is_lit(1));
        assert!(!rig.scene().is_lit(0));
        assert!(rig.camera().read().unwrap().view().max() > 0);

        backend.set_leds(&[colors::BLACK; 3]).unwrap();
        assert!((0..3).all(|id| !rig.scene().is_lit(id)));
        assert!(rig.backend().set_leds(&[colors::BLACK; 3]).is_err());
    }
}
