//! Assembled rig: every command module bound to one shared transport.

use std::sync::Arc;

use tracing::info;

use crate::acquisition::AcquisitionSequencer;
use crate::codec::Codec;
use crate::config::RigConfig;
use crate::error::RigResult;
use crate::error_recovery::RetryPolicy;
use crate::hardware::{
    AutofocusCommands, FocusTracker, GalvoCommands, PiezoCommands, StageCommands,
};
use crate::settings::{AcquisitionSettings, HardwareConstants};
use crate::transport::{DeviceHandle, SharedTransport};
use crate::trigger::TriggerSequencer;

/// The command modules of one Tiger controller.
///
/// Hub-relayed modules (piezo, galvo, stage, logic card) share one hub codec;
/// the autofocus unit gets its own card-addressed codec on the same
/// transport, so every exchange is serialized by a single bus lock.
pub struct Rig {
    hub: Codec,
    piezo: PiezoCommands,
    galvo: GalvoCommands,
    stage: StageCommands,
    focus: FocusTracker,
    triggers: TriggerSequencer,
    sequencer: Arc<AcquisitionSequencer>,
}

impl Rig {
    /// Build every module on `transport`. Fails if `hw` does not validate.
    pub fn new(
        transport: SharedTransport,
        hw: HardwareConstants,
        settings: AcquisitionSettings,
        retry: RetryPolicy,
    ) -> RigResult<Self> {
        hw.validate()?;

        let hub = Codec::new(
            transport.clone(),
            DeviceHandle::new(&hw.hub_label, &hw.library),
        )
        .with_retry(retry.clone());

        let piezo = PiezoCommands::new(
            hub.clone(),
            &DeviceHandle::new(&hw.piezo_label, &hw.library),
        )?;

        let mut crisp_handle = DeviceHandle::new(&hw.autofocus_label, &hw.library);
        if let Some(address) = &hw.autofocus_card_address {
            crisp_handle = crisp_handle.with_card_address(address);
        }
        let crisp = Codec::new(transport, crisp_handle).with_retry(retry);
        let focus = FocusTracker::new(AutofocusCommands::new(crisp));

        let galvo = GalvoCommands::new(hub.clone());
        let stage = StageCommands::new(hub.clone());
        let triggers = TriggerSequencer::new(hub.clone(), hw.clone())?;
        let sequencer = Arc::new(AcquisitionSequencer::new(
            triggers.clone(),
            stage.clone(),
            galvo.clone(),
            hw.clone(),
            settings,
        ));

        info!(
            hub = %hw.hub_label,
            library = %hw.library,
            plogic = %triggers.plogic().address(),
            "Rig assembled"
        );

        Ok(Self {
            hub,
            piezo,
            galvo,
            stage,
            focus,
            triggers,
            sequencer,
        })
    }

    /// Assemble from a loaded configuration.
    pub fn from_config(transport: SharedTransport, config: &RigConfig) -> RigResult<Self> {
        Self::new(
            transport,
            config.hardware.clone(),
            config.acquisition.clone(),
            config.transport.retry.clone(),
        )
    }

    /// Codec of the hub, for raw commands.
    pub fn hub(&self) -> &Codec {
        &self.hub
    }

    /// Piezo focus stage.
    pub fn piezo(&self) -> &PiezoCommands {
        &self.piezo
    }

    /// Galvo scanner.
    pub fn galvo(&self) -> &GalvoCommands {
        &self.galvo
    }

    /// Motorized stage.
    pub fn stage(&self) -> &StageCommands {
        &self.stage
    }

    /// Autofocus tracker; its commands are reachable through it.
    pub fn focus(&self) -> &FocusTracker {
        &self.focus
    }

    /// Logic-card trigger programming.
    pub fn triggers(&self) -> &TriggerSequencer {
        &self.triggers
    }

    /// Acquisition sequencer, shareable with other tasks.
    pub fn sequencer(&self) -> Arc<AcquisitionSequencer> {
        Arc::clone(&self.sequencer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use crate::hardware::PiezoMode;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn modules_share_one_transport() {
        let mock = Arc::new(MockTransport::new());
        mock.set_reply("PZ P?", ":A P=1");
        mock.set_reply("32 LK X?", ":A X=12");
        let rig = Rig::from_config(mock.clone(), &RigConfig::default()).unwrap();

        assert!(rig.hub().shares_transport(rig.triggers().plogic().codec()));
        assert_eq!(
            rig.piezo().operating_mode().await.unwrap(),
            PiezoMode::ClosedLoopExternal
        );
        rig.focus().state().await.unwrap();
        rig.triggers().enable_live_laser().await.unwrap();

        assert_eq!(mock.calls(), vec!["PZ P?", "32 LK X?", "36CCA X=12"]);
    }

    #[test]
    fn rejects_unaddressable_logic_card() {
        let mock = Arc::new(MockTransport::new());
        let hw = HardwareConstants {
            plogic_label: "PLogic".to_string(),
            ..Default::default()
        };
        let result = Rig::new(
            mock,
            hw,
            AcquisitionSettings::default(),
            RetryPolicy::none(),
        );
        assert!(matches!(result, Err(RigError::InvalidDeviceLabel { .. })));
    }

    #[tokio::test]
    async fn demo_library_skips_piezo_query() {
        let mock = Arc::new(MockTransport::new());
        let hw = HardwareConstants {
            library: crate::transport::DEMO_LIBRARY_MARKER.to_string(),
            ..Default::default()
        };
        let rig = Rig::new(
            mock.clone(),
            hw,
            AcquisitionSettings::default(),
            RetryPolicy::none(),
        )
        .unwrap();

        assert_eq!(
            rig.piezo().operating_mode().await.unwrap(),
            PiezoMode::ClosedLoopInternal
        );
        assert!(mock.calls().is_empty());
    }
}
