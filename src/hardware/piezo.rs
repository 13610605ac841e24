//! Piezo focus stage.
//!
//! Commands are relayed by the hub and addressed by the piezo's axis letter:
//! - `PZ {axis}?` / `PZ {axis}={code}`: operating mode
//! - `MA {axis}?` / `MA {axis}={code}`: maintain (overshoot) algorithm
//! - `PZC`: run the piezo calibration
//! - `PZINFO`: firmware and calibration info

use tracing::{info, instrument};

use crate::codec::{AxisLabel, Codec};
use crate::error::{RigError, RigResult};
use crate::transport::DeviceHandle;

/// Piezo closed/open loop operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PiezoMode {
    /// Closed loop, internal input
    ClosedLoopInternal = 0,
    /// Closed loop, external input
    ClosedLoopExternal = 1,
    /// Open loop, internal input
    OpenLoopInternal = 2,
    /// Open loop, external input
    OpenLoopExternal = 3,
}

impl PiezoMode {
    /// Code sent as `PZ {axis}=`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a reported code; unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::ClosedLoopInternal),
            1 => Some(Self::ClosedLoopExternal),
            2 => Some(Self::OpenLoopInternal),
            3 => Some(Self::OpenLoopExternal),
            _ => None,
        }
    }
}

/// Algorithm used to hold position after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PiezoMaintainMode {
    /// Firmware default
    Default = 0,
    /// Overshoot correction
    OvershootAlgorithm = 1,
}

impl PiezoMaintainMode {
    /// Code sent as `MA {axis}=`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a reported code; unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Default),
            1 => Some(Self::OvershootAlgorithm),
            _ => None,
        }
    }
}

/// Piezo command module.
pub struct PiezoCommands {
    codec: Codec,
    axis: AxisLabel,
    demo: bool,
}

impl PiezoCommands {
    /// Bind to the piezo described by `piezo`, sending through `hub`.
    ///
    /// The axis comes from the piezo's compound label and the simulation flag
    /// from its backing library.
    pub fn new(hub: Codec, piezo: &DeviceHandle) -> RigResult<Self> {
        let axis = AxisLabel::from_compound(piezo.label())?;
        Ok(Self {
            codec: hub,
            axis,
            demo: piezo.is_demo(),
        })
    }

    /// Axis letter the piezo answers to.
    pub fn axis(&self) -> &AxisLabel {
        &self.axis
    }

    /// Whether the piezo is simulated.
    pub fn is_demo(&self) -> bool {
        self.demo
    }

    /// Current operating mode. A simulated piezo always reports closed loop
    /// internal without touching the bus.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn operating_mode(&self) -> RigResult<PiezoMode> {
        if self.demo {
            return Ok(PiezoMode::ClosedLoopInternal);
        }
        let command = format!("PZ {}?", self.axis);
        let code = self.codec.query_int(&command).await?;
        PiezoMode::from_code(code).ok_or_else(|| RigError::unexpected(command, code.to_string()))
    }

    /// Switch the operating mode.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn set_operating_mode(&self, mode: PiezoMode) -> RigResult<()> {
        self.codec
            .execute(&format!("PZ {}={}", self.axis, mode.code()))
            .await?;
        Ok(())
    }

    /// Current maintain algorithm.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn maintain_mode(&self) -> RigResult<PiezoMaintainMode> {
        let command = format!("MA {}?", self.axis);
        let code = self.codec.query_int(&command).await?;
        PiezoMaintainMode::from_code(code)
            .ok_or_else(|| RigError::unexpected(command, code.to_string()))
    }

    /// Switch the maintain algorithm.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn set_maintain_mode(&self, mode: PiezoMaintainMode) -> RigResult<()> {
        self.codec
            .execute(&format!("MA {}={}", self.axis, mode.code()))
            .await?;
        Ok(())
    }

    /// Start the piezo calibration routine.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn run_calibration(&self) -> RigResult<()> {
        self.codec.execute("PZC").await?;
        info!(axis = %self.axis, "Piezo calibration started");
        Ok(())
    }

    /// Raw info text reported by the piezo card.
    #[instrument(skip(self), fields(axis = %self.axis), err)]
    pub async fn info(&self) -> RigResult<String> {
        self.codec.execute("PZINFO").await
    }
}
