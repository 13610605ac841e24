//! Programmable logic card (PLogic).
//!
//! The card is programmed through the hub. A position (logic cell or
//! physical output) is selected with `M E=<addr>`, then edited with
//! card-addressed commands:
//! - `<card>CCA X=<n>`: load preset `n`
//! - `<card>CCA Y=<type> Z=<config>`: cell type and configuration
//! - `<card>CCA Z=<source>`: configuration alone, which routes an output
//! - `<card>CCB X=<in1> Y=<in2> Z=<in3>`: cell inputs
//! - `<card>SS Z`: save settings to the card

use tracing::{debug, instrument};

use crate::codec::{card_address, Codec};
use crate::error::{RigError, RigResult};

/// Source address wired to ground.
pub const GROUND: u32 = 0;
/// Input address that always reads high.
pub const LOGIC_HIGH: u32 = 1;
/// Configuration of a constant cell that outputs high.
pub const CONSTANT_HIGH_CONFIG: u32 = 5;

/// Logic cell type codes (`CCA Y=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellType {
    /// Constant output
    Constant = 0,
    /// One-shot pulse
    OneShot = 8,
    /// Delayed one-shot
    Delay = 9,
    /// One-shot that ignores trigger edges until its pulse completes.
    OneShotNrt = 14,
    /// Delay that ignores edges until its pulse completes
    DelayNrt = 15,
}

impl CellType {
    /// Code sent as `CCA Y=`.
    pub fn code(self) -> u8 {
        self as u8
    }
}

const INPUT_FIELDS: [char; 4] = ['X', 'Y', 'Z', 'F'];

/// PLogic command module, bound to the hub and one card address.
#[derive(Clone)]
pub struct PLogicCommands {
    codec: Codec,
    address: String,
}

impl PLogicCommands {
    /// `card_label` is the compound label of the card; its last `:` field is
    /// the card address (`"PLogic:E:36"` -> `36`).
    pub fn new(hub: Codec, card_label: &str) -> RigResult<Self> {
        let address = card_address(card_label)?.to_string();
        Ok(Self {
            codec: hub,
            address,
        })
    }

    /// Card address prefixed to cell edits.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hub codec used by the card.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    async fn send(&self, command: &str) -> RigResult<()> {
        self.codec.execute(command).await?;
        Ok(())
    }

    /// Select the cell or output edited by the following commands.
    pub async fn select(&self, position: u32) -> RigResult<()> {
        self.send(&format!("M E={position}")).await
    }

    /// Load a firmware preset (`CCA X=`).
    #[instrument(skip(self), fields(card = %self.address), err)]
    pub async fn load_preset(&self, preset: u32) -> RigResult<()> {
        self.send(&format!("{}CCA X={preset}", self.address)).await
    }

    /// Set the type and configuration of the selected cell.
    pub async fn configure_cell(&self, cell_type: CellType, config: u32) -> RigResult<()> {
        self.send(&format!(
            "{}CCA Y={} Z={config}",
            self.address,
            cell_type.code()
        ))
        .await
    }

    /// Set the configuration (or, for an output, the source) of the selected position.
    pub async fn set_source(&self, source: u32) -> RigResult<()> {
        self.send(&format!("{}CCA Z={source}", self.address)).await
    }

    /// Wire up to four inputs of the selected cell.
    pub async fn set_cell_inputs(&self, inputs: &[u32]) -> RigResult<()> {
        if inputs.is_empty() || inputs.len() > INPUT_FIELDS.len() {
            return Err(RigError::invalid_parameter(
                "inputs",
                format!("a cell takes 1-4 inputs, got {}", inputs.len()),
            ));
        }
        let fields: Vec<String> = INPUT_FIELDS
            .iter()
            .zip(inputs)
            .map(|(field, addr)| format!("{field}={addr}"))
            .collect();
        self.send(&format!("{}CCB {}", self.address, fields.join(" ")))
            .await
    }

    /// Persist the current programming on the card.
    #[instrument(skip(self), fields(card = %self.address), err)]
    pub async fn save(&self) -> RigResult<()> {
        self.send(&format!("{}SS Z", self.address)).await
    }

    /// Select `cell`, set its type and configuration, then its inputs.
    #[instrument(skip(self), fields(card = %self.address), err)]
    pub async fn program_cell(
        &self,
        cell: u32,
        cell_type: CellType,
        config: u32,
        inputs: &[u32],
    ) -> RigResult<()> {
        self.select(cell).await?;
        self.configure_cell(cell_type, config).await?;
        self.set_cell_inputs(inputs).await?;
        debug!(cell, ?cell_type, config, ?inputs, "Cell programmed");
        Ok(())
    }

    /// Drive physical output `output` from `source`.
    #[instrument(skip(self), fields(card = %self.address), err)]
    pub async fn route_output(&self, output: u32, source: u32) -> RigResult<()> {
        self.select(output).await?;
        self.set_source(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeviceHandle, MockTransport};
    use std::sync::Arc;

    fn plogic(mock: &Arc<MockTransport>) -> PLogicCommands {
        let hub = Codec::new(mock.clone(), DeviceHandle::new("TigerCommHub", "ASITiger"));
        PLogicCommands::new(hub, "PLogic:E:36").unwrap()
    }

    #[tokio::test]
    async fn program_cell_selects_then_configures() {
        let mock = Arc::new(MockTransport::new());
        let card = plogic(&mock);

        card.program_cell(11, CellType::OneShotNrt, 40, &[41, 192, 0])
            .await
            .unwrap();

        assert_eq!(
            mock.calls(),
            vec!["M E=11", "36CCA Y=14 Z=40", "36CCB X=41 Y=192 Z=0"]
        );
    }

    #[tokio::test]
    async fn route_preset_and_save() {
        let mock = Arc::new(MockTransport::new());
        let card = plogic(&mock);

        card.load_preset(30).await.unwrap();
        card.route_output(35, GROUND).await.unwrap();
        card.save().await.unwrap();

        assert_eq!(
            mock.calls(),
            vec!["36CCA X=30", "M E=35", "36CCA Z=0", "36SS Z"]
        );
    }

    #[tokio::test]
    async fn input_count_is_bounded() {
        let mock = Arc::new(MockTransport::new());
        let card = plogic(&mock);
        assert!(card.set_cell_inputs(&[]).await.is_err());
        assert!(card.set_cell_inputs(&[1, 2, 3, 4, 5]).await.is_err());
        card.set_cell_inputs(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(mock.calls(), vec!["36CCB X=1 Y=2 Z=3 F=4"]);
    }

    #[test]
    fn card_address_comes_from_label() {
        let mock = Arc::new(MockTransport::new());
        let hub = Codec::new(mock, DeviceHandle::new("TigerCommHub", "ASITiger"));
        assert_eq!(
            PLogicCommands::new(hub.clone(), "PLogic:E:36").unwrap().address(),
            "36"
        );
        assert!(matches!(
            PLogicCommands::new(hub, "PLogic"),
            Err(RigError::InvalidDeviceLabel { .. })
        ));
    }
}
