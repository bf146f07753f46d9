//! LED backend capability and the registered-factory table.
//!
//! A backend drives physical LEDs. Every backend can report its LED count and
//! switch a single LED; writing a whole colour buffer is optional and declared
//! through [`LedBackend::capabilities`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ledmap_core::{colors, Rgb};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("unknown backend {name:?}, available: {available:?}")]
    UnknownBackend {
        name: String,
        available: Vec<String>,
    },
    #[error("backend {0:?} is already registered")]
    Duplicate(String),
    #[error("invalid backend name {0:?}")]
    InvalidName(String),
    #[error("backend {name:?} requires a server address")]
    MissingServer { name: String },
    #[error("backend does not support {operation}")]
    Unsupported { operation: &'static str },
    #[error("backend connection failed: {0}")]
    Connection(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Optional abilities of a backend, fixed at registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Accepts a full RGB buffer through [`LedBackend::set_leds`].
    pub set_leds: bool,
    /// Must be constructed with a server address.
    pub requires_server: bool,
}

/// Uniform LED driver.
pub trait LedBackend {
    fn led_count(&self) -> usize;

    fn set_led(&mut self, led_id: u32, on: bool) -> Result<(), BackendError>;

    /// Write one colour per LED. Only called when [`Capabilities::set_leds`] is set.
    fn set_leds(&mut self, _buffer: &[Rgb]) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            operation: "set_leds",
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

impl<B: LedBackend + ?Sized> LedBackend for Box<B> {
    fn led_count(&self) -> usize {
        (**self).led_count()
    }

    fn set_led(&mut self, led_id: u32, on: bool) -> Result<(), BackendError> {
        (**self).set_led(led_id, on)
    }

    fn set_leds(&mut self, buffer: &[Rgb]) -> Result<(), BackendError> {
        (**self).set_leds(buffer)
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}

/// Switch every LED off, through the buffer when the backend has one.
pub fn all_off<B: LedBackend + ?Sized>(backend: &mut B) -> Result<(), BackendError> {
    let count = backend.led_count();
    if backend.capabilities().set_leds {
        return backend.set_leds(&vec![colors::BLACK; count]);
    }
    for led_id in 0..count as u32 {
        backend.set_led(led_id, false)?;
    }
    Ok(())
}

/// Backend that has no LEDs and ignores every command.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyBackend;

impl LedBackend for DummyBackend {
    fn led_count(&self) -> usize {
        0
    }

    fn set_led(&mut self, _led_id: u32, _on: bool) -> Result<(), BackendError> {
        Ok(())
    }
}

fn dummy_factory(_server: Option<&str>) -> Result<Box<dyn LedBackend + Send>, BackendError> {
    Ok(Box::new(DummyBackend))
}

/// A constructed backend together with the capabilities it was registered with.
pub struct Backend {
    name: String,
    capabilities: Capabilities,
    inner: Box<dyn LedBackend + Send>,
}

impl Backend {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl LedBackend for Backend {
    fn led_count(&self) -> usize {
        self.inner.led_count()
    }

    fn set_led(&mut self, led_id: u32, on: bool) -> Result<(), BackendError> {
        self.inner.set_led(led_id, on)
    }

    fn set_leds(&mut self, buffer: &[Rgb]) -> Result<(), BackendError> {
        if !self.capabilities.set_leds {
            return Err(BackendError::Unsupported {
                operation: "set_leds",
            });
        }
        self.inner.set_leds(buffer)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

pub type BackendFactory =
    dyn Fn(Option<&str>) -> Result<Box<dyn LedBackend + Send>, BackendError> + Send + Sync;

#[derive(Clone)]
struct Registration {
    capabilities: Capabilities,
    factory: Arc<BackendFactory>,
}

/// Backends available by name.
///
/// Cloning is cheap; factories are shared.
#[derive(Clone)]
pub struct BackendRegistry {
    entries: BTreeMap<String, Registration>,
}

impl Default for BackendRegistry {
    /// Registry holding the built-in `dummy` backend.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.entries.insert(
            "dummy".to_string(),
            Registration {
                capabilities: Capabilities::default(),
                factory: Arc::new(dummy_factory),
            },
        );
        registry
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register `factory` under `name`.
    ///
    /// Names are lowercase ASCII (`a-z`, `0-9`, `-`, `_`) and unique.
    pub fn register<F>(
        &mut self,
        name: &str,
        capabilities: Capabilities,
        factory: F,
    ) -> Result<(), BackendError>
    where
        F: Fn(Option<&str>) -> Result<Box<dyn LedBackend + Send>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        if !valid_name(name) {
            return Err(BackendError::InvalidName(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(BackendError::Duplicate(name.to_string()));
        }
        debug!("registered backend {name} {capabilities:?}");
        self.entries.insert(
            name.to_string(),
            Registration {
                capabilities,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn capabilities(&self, name: &str) -> Option<Capabilities> {
        self.entries.get(name).map(|r| r.capabilities)
    }

    /// Construct the backend registered as `name`.
    pub fn create(&self, name: &str, server: Option<&str>) -> Result<Backend, BackendError> {
        let registration =
            self.entries
                .get(name)
                .ok_or_else(|| BackendError::UnknownBackend {
                    name: name.to_string(),
                    available: self.names(),
                })?;
        let server = server.filter(|s| !s.is_empty());
        if registration.capabilities.requires_server && server.is_none() {
            return Err(BackendError::MissingServer {
                name: name.to_string(),
            });
        }
        let inner = (registration.factory)(server)?;
        Ok(Backend {
            name: name.to_string(),
            capabilities: registration.capabilities,
            inner,
        })
    }
}
