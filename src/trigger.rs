//! Camera/laser trigger programming on the logic card.
//!
//! For every camera exposure the card fires two non-retriggerable one-shot
//! pulses from the external trigger TTL, both timed by the 4 kHz clock:
//!
//! ```text
//! trigger TTL ──┬──▶ [camera cell: NRT one-shot, exposure ticks] ──▶ BNC1 (camera)
//!               └──▶ [laser cell:  NRT one-shot, trigger ticks ]  ──▶ laser preset
//! always-on cell (constant high) ──▶ BNC3 (global shutter, while open)
//! ```
//!
//! Every routine runs inside a transport batch so the hub does not drop
//! repeated identical commands.

use tracing::{info, instrument};

use crate::codec::Codec;
use crate::error::{RigError, RigResult};
use crate::hardware::plogic::{CellType, PLogicCommands, CONSTANT_HIGH_CONFIG, GROUND, LOGIC_HIGH};
use crate::settings::{AcquisitionSettings, HardwareConstants};

/// Largest pulse width the card's one-shot counter accepts.
pub const MAX_PULSE_TICKS: u32 = 65_535;

/// Programs and toggles the trigger logic.
#[derive(Clone)]
pub struct TriggerSequencer {
    plogic: PLogicCommands,
    hw: HardwareConstants,
}

impl TriggerSequencer {
    /// Bind to the logic card named in `hw`, sending through `hub`.
    pub fn new(hub: Codec, hw: HardwareConstants) -> RigResult<Self> {
        let plogic = PLogicCommands::new(hub, &hw.plogic_label)?;
        Ok(Self { plogic, hw })
    }

    /// Logic card the sequencer programs.
    pub fn plogic(&self) -> &PLogicCommands {
        &self.plogic
    }

    /// Pulse width in clock ticks for `duration_ms`, truncated.
    pub fn pulse_ticks(&self, duration_ms: f64) -> RigResult<u32> {
        let ticks = (duration_ms * self.hw.pulses_per_ms).trunc();
        if !ticks.is_finite() || ticks < 1.0 || ticks > f64::from(MAX_PULSE_TICKS) {
            return Err(RigError::invalid_parameter(
                "pulse_duration",
                format!(
                    "{duration_ms} ms is {ticks} ticks at {} ticks/ms, must be 1-{MAX_PULSE_TICKS}",
                    self.hw.pulses_per_ms
                ),
            ));
        }
        Ok(ticks as u32)
    }

    async fn program_always_on_cell(&self) -> RigResult<()> {
        self.plogic
            .program_cell(
                self.hw.plogic_always_on_cell,
                CellType::Constant,
                CONSTANT_HIGH_CONFIG,
                &[LOGIC_HIGH],
            )
            .await
    }

    /// Program synchronized camera and laser NRT pulses for `settings`.
    ///
    /// Order: always-on cell, laser preset and camera cell, laser cell,
    /// camera cell routed to BNC1, save.
    #[instrument(skip(self, settings), fields(exposure_ms = settings.exposure_ms), err)]
    pub async fn program_nrt_pulses(&self, settings: &AcquisitionSettings) -> RigResult<()> {
        let camera_ticks = self.pulse_ticks(settings.exposure_ms)?;
        let laser_ticks = self.pulse_ticks(settings.trigger_duration_ms)?;
        let inputs = [
            self.hw.plogic_trigger_ttl_addr,
            self.hw.plogic_4khz_clock_addr,
            GROUND,
        ];

        self.plogic
            .codec()
            .batch(|| async {
                self.program_always_on_cell().await?;

                self.plogic
                    .load_preset(self.hw.plogic_laser_preset_num)
                    .await?;
                self.plogic
                    .program_cell(
                        self.hw.plogic_camera_cell,
                        CellType::OneShotNrt,
                        camera_ticks,
                        &inputs,
                    )
                    .await?;

                self.plogic
                    .program_cell(
                        self.hw.plogic_laser_on_cell,
                        CellType::OneShotNrt,
                        laser_ticks,
                        &inputs,
                    )
                    .await?;

                self.plogic
                    .route_output(self.hw.plogic_bnc1_addr, self.hw.plogic_camera_cell)
                    .await?;
                self.plogic.save().await
            })
            .await?;

        info!(camera_ticks, laser_ticks, "Logic card programmed for NRT pulses");
        Ok(())
    }

    /// Drive BNC3 high from the always-on cell.
    #[instrument(skip(self), err)]
    pub async fn open_global_shutter(&self) -> RigResult<()> {
        self.plogic
            .codec()
            .batch(|| async {
                self.program_always_on_cell().await?;
                self.plogic
                    .route_output(self.hw.plogic_bnc3_addr, self.hw.plogic_always_on_cell)
                    .await?;
                self.plogic.save().await
            })
            .await?;
        info!("Global shutter open");
        Ok(())
    }

    /// Route BNC3 to ground.
    #[instrument(skip(self), err)]
    pub async fn close_global_shutter(&self) -> RigResult<()> {
        self.plogic
            .codec()
            .batch(|| async {
                self.plogic
                    .route_output(self.hw.plogic_bnc3_addr, GROUND)
                    .await?;
                self.plogic.save().await
            })
            .await?;
        info!("Global shutter closed");
        Ok(())
    }

    /// Load the live/snap laser preset.
    #[instrument(skip(self), err)]
    pub async fn enable_live_laser(&self) -> RigResult<()> {
        self.plogic
            .load_preset(self.hw.plogic_live_mode_preset)
            .await?;
        info!("Live laser enabled");
        Ok(())
    }

    /// Load the idle laser preset after live/snap.
    #[instrument(skip(self), err)]
    pub async fn disable_live_laser(&self) -> RigResult<()> {
        self.plogic
            .load_preset(self.hw.plogic_idle_mode_preset)
            .await?;
        info!("Live laser disabled");
        Ok(())
    }
}
