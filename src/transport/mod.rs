//! Command transports.
//!
//! Every device module talks to the bus through one capability,
//! [`CommandTransport::send_command`], keyed by a [`DeviceHandle`]. Three
//! implementations are provided:
//!
//! - [`SerialTransport`]: a direct serial line to the controller
//! - [`HubPropertyTransport`]: relays through the hub's `SerialCommand` /
//!   `SerialResponse` property pair of a device core
//! - [`MockTransport`]: scripted replies and a call log for tests
//!
//! Modules that address the same hub must share one transport instance
//! ([`SharedTransport`]). The transport owns the lock that keeps a single
//! exchange in flight on the bus.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::RigResult;

pub mod hub;
pub mod mock;
pub mod serial;

pub use hub::{HubPropertyTransport, PropertyBus};
pub use mock::MockTransport;
pub use serial::{SerialPortIO, SerialTransport};

/// Backing library name that marks a simulated device.
pub const DEMO_LIBRARY_MARKER: &str = "DemoCamera";

/// Reference to a connected device.
///
/// The connection itself is owned by the transport. Handles are cheap to
/// clone and carry only what is needed to address the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    label: String,
    card_address: Option<String>,
    library: String,
}

impl DeviceHandle {
    /// Handle for `label`, backed by the device adapter `library`.
    pub fn new(label: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            card_address: None,
            library: library.into(),
        }
    }

    /// Prefix commands with a card address (`"32"` -> `"32 LK"`).
    pub fn with_card_address(mut self, address: impl Into<String>) -> Self {
        self.card_address = Some(address.into());
        self
    }

    /// Device label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Card address prefixed to commands, if any.
    pub fn card_address(&self) -> Option<&str> {
        self.card_address.as_deref()
    }

    /// Device adapter library.
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Whether the device is backed by the simulation library.
    pub fn is_demo(&self) -> bool {
        self.library.contains(DEMO_LIBRARY_MARKER)
    }

    /// Command text as it goes on the wire, without the terminator.
    pub fn frame(&self, command: &str) -> String {
        match &self.card_address {
            Some(addr) => format!("{addr} {command}"),
            None => command.to_string(),
        }
    }
}

/// Send one command to a device and return its reply.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send `command` to the device behind `handle` and wait for the reply.
    ///
    /// Fails with [`crate::RigError::Transport`] when the channel errors or
    /// the read times out. The reply is returned unchecked; use
    /// [`crate::codec::check_failure`] to detect rejections.
    async fn send_command(&self, handle: &DeviceHandle, command: &str) -> RigResult<String>;

    /// Prepare the transport for a burst of commands that may repeat.
    ///
    /// Hubs that suppress repeated identical commands disable that behaviour
    /// here. The default does nothing.
    async fn begin_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        Ok(())
    }

    /// Undo [`CommandTransport::begin_batch`].
    async fn end_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        Ok(())
    }
}

/// Transport shared by every module addressing the same bus.
pub type SharedTransport = Arc<dyn CommandTransport>;
