//! Galvo scanner and scan-synchronized laser control.
//!
//! The scanner card is addressed through the hub; every command names the
//! axis it applies to.

use tracing::instrument;

use crate::codec::{format_float, AxisLabel, Codec};
use crate::error::{RigError, RigResult};

/// Waveform of a single-axis scan (`SAM M=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GalvoScanMode {
    /// Sawtooth sweep
    Sawtooth = 0,
    /// Triangle sweep
    Triangle = 1,
    /// Sawtooth sweep, one per TTL pulse
    SawtoothTtlGated = 2,
    /// Triangle sweep, one per TTL pulse
    TriangleTtlGated = 3,
}

impl GalvoScanMode {
    /// Code sent as `SAM M=`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a reported code; unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Sawtooth),
            1 => Some(Self::Triangle),
            2 => Some(Self::SawtoothTtlGated),
            3 => Some(Self::TriangleTtlGated),
            _ => None,
        }
    }
}

/// Laser output behaviour during a scan (`LASER X=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GalvoLaserMode {
    /// Laser off
    Off = 0,
    /// Laser on while the scan runs
    OnDuringScan = 4,
}

impl GalvoLaserMode {
    /// Code sent as `LASER X=`.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Physical BNC input used to modulate the laser (`LASER Y=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TtlInput {
    /// BNC input 1
    Bnc1 = 1,
    /// BNC input 2
    Bnc2 = 2,
    /// BNC input 3
    Bnc3 = 3,
    /// BNC input 4
    Bnc4 = 4,
}

impl TryFrom<u8> for TtlInput {
    type Error = RigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Bnc1),
            2 => Ok(Self::Bnc2),
            3 => Ok(Self::Bnc3),
            4 => Ok(Self::Bnc4),
            other => Err(RigError::invalid_parameter(
                "ttl_input",
                format!("must be 1-4, got {other}"),
            )),
        }
    }
}

/// Reported single-axis scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleAxisMode {
    /// Waveform
    pub mode: GalvoScanMode,
    /// Whether the scan is running
    pub enabled: bool,
}

/// Galvo command module, bound to the hub.
#[derive(Clone)]
pub struct GalvoCommands {
    codec: Codec,
}

impl GalvoCommands {
    /// Bind to the hub codec.
    pub fn new(hub: Codec) -> Self {
        Self { codec: hub }
    }

    /// Set the single-axis waveform and start or stop it.
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn set_single_axis_mode(
        &self,
        axis: &AxisLabel,
        mode: GalvoScanMode,
        enabled: bool,
    ) -> RigResult<()> {
        self.codec
            .execute(&format!(
                "{axis}SAM M={} Z={}",
                mode.code(),
                u8::from(enabled)
            ))
            .await?;
        Ok(())
    }

    /// Mode and enable flag; the reply lists them as the last two values
    /// (`:A 1 1` or `:A M=1 Z=1`).
    #[instrument(skip(self), fields(axis = %axis), err)]
    pub async fn single_axis_mode(&self, axis: &AxisLabel) -> RigResult<SingleAxisMode> {
        let command = format!("{axis}SAM?");
        let reply = self.codec.execute(&command).await?;

        let values: Vec<i64> = reply
            .split_whitespace()
            .filter_map(|token| {
                let value = token.rsplit('=').next().unwrap_or(token);
                value.parse::<f64>().ok().map(|v| v.trunc() as i64)
            })
            .collect();
        let [mode, enabled] = values.as_slice() else {
            return Err(RigError::unexpected(command, reply));
        };
        let mode = GalvoScanMode::from_code(*mode)
            .ok_or_else(|| RigError::unexpected(command.clone(), reply.clone()))?;
        Ok(SingleAxisMode {
            mode,
            enabled: *enabled != 0,
        })
    }

    /// Scan amplitude (mV).
    pub async fn set_amplitude(&self, axis: &AxisLabel, millivolts: f64) -> RigResult<()> {
        self.set_axis_param(axis, 'A', millivolts).await
    }

    /// Scan amplitude (mV).
    pub async fn amplitude(&self, axis: &AxisLabel) -> RigResult<f64> {
        self.axis_param(axis, 'A').await
    }

    /// Scan offset (mV).
    pub async fn set_offset(&self, axis: &AxisLabel, millivolts: f64) -> RigResult<()> {
        self.set_axis_param(axis, 'O', millivolts).await
    }

    /// Scan offset (mV).
    pub async fn offset(&self, axis: &AxisLabel) -> RigResult<f64> {
        self.axis_param(axis, 'O').await
    }

    /// Scan period (ms).
    pub async fn set_period(&self, axis: &AxisLabel, period_ms: u32) -> RigResult<()> {
        self.codec
            .execute(&format!("{axis}SAP F={period_ms}"))
            .await?;
        Ok(())
    }

    /// Scan period (ms).
    pub async fn period(&self, axis: &AxisLabel) -> RigResult<u32> {
        let command = format!("{axis}SAP?");
        let value = self.codec.query_int(&command).await?;
        u32::try_from(value).map_err(|_| RigError::unexpected(command, value.to_string()))
    }

    /// Raster scan: `lines` fast sweeps stepping the slow axis from start to end.
    #[instrument(skip(self), err)]
    pub async fn setup_raster_scan(
        &self,
        fast_axis: &AxisLabel,
        slow_axis: &AxisLabel,
        slow_start_mv: f64,
        slow_end_mv: f64,
        lines: u32,
    ) -> RigResult<()> {
        self.codec
            .execute(&format!(
                "SCANR {fast_axis} {slow_axis} S={} E={} N={lines}",
                format_float(slow_start_mv),
                format_float(slow_end_mv)
            ))
            .await?;
        Ok(())
    }

    /// Vertical scan of `lines_per_scan` lines from `start_mv` to `end_mv`.
    #[instrument(skip(self), err)]
    pub async fn setup_vertical_scan(
        &self,
        axis: &AxisLabel,
        start_mv: f64,
        end_mv: f64,
        lines_per_scan: u32,
    ) -> RigResult<()> {
        self.codec
            .execute(&format!(
                "SCANV {axis} S={} E={} N={lines_per_scan}",
                format_float(start_mv),
                format_float(end_mv)
            ))
            .await?;
        Ok(())
    }

    /// Arm (`SCAN A=1`) or disarm (`SCAN A=0`) the configured scan.
    #[instrument(skip(self), err)]
    pub async fn arm_scan(&self, armed: bool) -> RigResult<()> {
        self.codec
            .execute(&format!("SCAN A={}", u8::from(armed)))
            .await?;
        Ok(())
    }

    /// Halt any running scan.
    #[instrument(skip(self), err)]
    pub async fn halt(&self) -> RigResult<()> {
        self.codec.execute("\\ ").await?;
        Ok(())
    }

    /// Laser behaviour during scans.
    #[instrument(skip(self), err)]
    pub async fn set_laser_mode(&self, mode: GalvoLaserMode) -> RigResult<()> {
        self.codec
            .execute(&format!("LASER X={}", mode.code()))
            .await?;
        Ok(())
    }

    /// Modulate the laser from one of the four BNC inputs.
    #[instrument(skip(self), err)]
    pub async fn set_laser_ttl_modulation(&self, input: TtlInput) -> RigResult<()> {
        self.codec
            .execute(&format!("LASER Y={}", input as u8))
            .await?;
        Ok(())
    }

    async fn set_axis_param(&self, axis: &AxisLabel, param: char, value: f64) -> RigResult<()> {
        self.codec
            .execute(&format!("{axis}SA{param} F={}", format_float(value)))
            .await?;
        Ok(())
    }

    async fn axis_param(&self, axis: &AxisLabel, param: char) -> RigResult<f64> {
        self.codec.query_f64(&format!("{axis}SA{param}?")).await
    }
}
