//! Hub-relayed transport.
//!
//! A device core exposes the Tiger hub as a device with two properties:
//! writing `SerialCommand` sends a command line, reading `SerialResponse`
//! returns the controller's answer. The pair must not interleave with another
//! exchange, so both happen under one lock.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{CommandTransport, DeviceHandle};
use crate::error::RigResult;

/// Property written to send a command.
pub const SERIAL_COMMAND_PROPERTY: &str = "SerialCommand";
/// Property read to collect the reply.
pub const SERIAL_RESPONSE_PROPERTY: &str = "SerialResponse";
/// Hub property that drops a command identical to the previous one.
pub const ONLY_SEND_ON_CHANGE_PROPERTY: &str = "OnlySendSerialCommandOnChange";

/// Property access of the device core that owns the hub connection.
#[async_trait]
pub trait PropertyBus: Send + Sync {
    /// Set `property` of `device` to `value`.
    async fn set_property(&self, device: &str, property: &str, value: &str) -> RigResult<()>;

    /// Read `property` of `device`.
    async fn get_property(&self, device: &str, property: &str) -> RigResult<String>;
}

#[derive(Default)]
struct BatchState {
    depth: u32,
    restore_to: Option<String>,
}

/// Transport relaying commands through the hub's property pair.
pub struct HubPropertyTransport {
    bus: Arc<dyn PropertyBus>,
    hub_label: String,
    exchange: Mutex<()>,
    batch: Mutex<BatchState>,
}

impl HubPropertyTransport {
    /// Relay through `bus` to the hub named `hub_label`.
    pub fn new(bus: Arc<dyn PropertyBus>, hub_label: impl Into<String>) -> Self {
        Self {
            bus,
            hub_label: hub_label.into(),
            exchange: Mutex::new(()),
            batch: Mutex::new(BatchState::default()),
        }
    }

    /// Hub the commands go to.
    pub fn hub_label(&self) -> &str {
        &self.hub_label
    }
}

#[async_trait]
impl CommandTransport for HubPropertyTransport {
    #[instrument(skip(self, handle), fields(hub = %self.hub_label, device = %handle.label()), err)]
    async fn send_command(&self, handle: &DeviceHandle, command: &str) -> RigResult<String> {
        let framed = handle.frame(command);
        let _guard = self.exchange.lock().await;

        self.bus
            .set_property(&self.hub_label, SERIAL_COMMAND_PROPERTY, &framed)
            .await?;
        let reply = self
            .bus
            .get_property(&self.hub_label, SERIAL_RESPONSE_PROPERTY)
            .await?;

        debug!(command = %framed, reply = %reply, "Hub exchange");
        Ok(reply.trim().to_string())
    }

    async fn begin_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        let mut batch = self.batch.lock().await;
        if batch.depth == 0 {
            let current = self
                .bus
                .get_property(&self.hub_label, ONLY_SEND_ON_CHANGE_PROPERTY)
                .await?;
            if current == "Yes" {
                self.bus
                    .set_property(&self.hub_label, ONLY_SEND_ON_CHANGE_PROPERTY, "No")
                    .await?;
                batch.restore_to = Some(current);
            }
        }
        batch.depth += 1;
        Ok(())
    }

    async fn end_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        let mut batch = self.batch.lock().await;
        batch.depth = batch.depth.saturating_sub(1);
        if batch.depth == 0 {
            if let Some(original) = batch.restore_to.take() {
                debug!(hub = %self.hub_label, value = %original, "Restoring repeat suppression");
                self.bus
                    .set_property(&self.hub_label, ONLY_SEND_ON_CHANGE_PROPERTY, &original)
                    .await?;
            }
        }
        Ok(())
    }
}
