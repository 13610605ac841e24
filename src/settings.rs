//! Acquisition settings and fixed hardware constants.
//!
//! Both are plain serde values. [`crate::config::RigConfig`] loads them, but
//! any caller can build them directly.

use serde::{Deserialize, Serialize};

use crate::codec::{card_address, AxisLabel};
use crate::error::{RigError, RigResult};

/// Parameters of one acquisition run.
///
/// Immutable once handed to the acquisition sequencer for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Camera exposure per frame (ms)
    pub exposure_ms: f64,
    /// Distance between slices (µm)
    pub step_size_um: f64,
    /// Number of slices per volume
    pub num_slices: u32,
    /// Focus stage position at the middle of the stack (µm)
    pub center_position_um: f64,
    /// Laser trigger pulse duration (ms)
    pub trigger_duration_ms: f64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            exposure_ms: 10.0,
            step_size_um: 1.0,
            num_slices: 3,
            center_position_um: -31.0,
            trigger_duration_ms: 10.0,
        }
    }
}

impl AcquisitionSettings {
    /// Settings for a run started at `exposure_ms`.
    ///
    /// The laser pulse always matches the camera exposure for a triggered run.
    pub fn with_exposure(&self, exposure_ms: f64) -> Self {
        Self {
            exposure_ms,
            trigger_duration_ms: exposure_ms,
            ..self.clone()
        }
    }

    /// Stage positions of every slice, centered on `center_position_um`.
    pub fn slice_positions_um(&self) -> Vec<f64> {
        let half_span = (f64::from(self.num_slices) - 1.0) / 2.0;
        (0..self.num_slices)
            .map(|i| self.center_position_um + (f64::from(i) - half_span) * self.step_size_um)
            .collect()
    }

    /// Validate the settings before they reach the hardware.
    pub fn validate(&self) -> RigResult<()> {
        let positive = [
            ("exposure_ms", self.exposure_ms),
            ("step_size_um", self.step_size_um),
            ("trigger_duration_ms", self.trigger_duration_ms),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(RigError::invalid_parameter(
                    name,
                    format!("must be a positive number, got {value}"),
                ));
            }
        }
        if self.num_slices == 0 {
            return Err(RigError::invalid_parameter(
                "num_slices",
                "at least one slice is required",
            ));
        }
        if !self.center_position_um.is_finite() {
            return Err(RigError::invalid_parameter(
                "center_position_um",
                "must be finite",
            ));
        }
        Ok(())
    }
}

/// How the stage is armed while preparing a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageArming {
    /// The stage is not touched by the sequencer.
    #[default]
    None,
    /// Hardware z-stack (`ZS`), started during prepare and stopped in cleanup.
    ZStack,
    /// Slice positions loaded into the ring buffer and played back on TTL.
    RingBuffer,
}

/// Device labels, card addresses and logic-cell numbers of the rig.
///
/// Read-only for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConstants {
    /// Hub device relaying serial commands to the cards
    pub hub_label: String,
    /// Device adapter library backing the rig ("DemoCamera" for simulation)
    pub library: String,
    /// Compound label of the piezo focus stage, `prefix:axis`
    pub piezo_label: String,
    /// Autofocus device label
    pub autofocus_label: String,
    /// Card address of the autofocus unit
    pub autofocus_card_address: Option<String>,
    /// Logic card label; the part after the last `:` is its card address
    pub plogic_label: String,
    /// Input address of the external trigger TTL
    pub plogic_trigger_ttl_addr: u32,
    /// Address of the 4 kHz clock
    pub plogic_4khz_clock_addr: u32,
    /// Cell driving the laser
    pub plogic_laser_on_cell: u32,
    /// Cell driving the camera trigger
    pub plogic_camera_cell: u32,
    /// Cell held constantly high for the global shutter
    pub plogic_always_on_cell: u32,
    /// Output address of BNC1 (camera trigger)
    pub plogic_bnc1_addr: u32,
    /// Output address of BNC3 (global shutter)
    pub plogic_bnc3_addr: u32,
    /// Logic clock ticks per millisecond
    pub pulses_per_ms: f64,
    /// Laser preset loaded for a triggered run
    pub plogic_laser_preset_num: u32,
    /// Laser preset for live/snap mode
    pub plogic_live_mode_preset: u32,
    /// Laser preset when live/snap stops
    pub plogic_idle_mode_preset: u32,
    /// Stage arming used by the acquisition sequencer
    pub stage_arming: StageArming,
    /// Axis loaded into the ring buffer
    pub ring_buffer_axis: String,
    /// Ring buffer TTL trigger mode (1..=3)
    pub ring_buffer_ttl_mode: u8,
    /// Arm a one-sweep-per-slice galvo scan while preparing a run
    pub arm_galvo_scan: bool,
    /// Scanner axis swept across the slices
    pub galvo_axis: String,
    /// Peak-to-peak sweep amplitude (mV), centered on zero
    pub galvo_amplitude_mv: f64,
}

impl Default for HardwareConstants {
    fn default() -> Self {
        Self {
            hub_label: "TigerCommHub".to_string(),
            library: "ASITiger".to_string(),
            piezo_label: "PiezoStage:P".to_string(),
            autofocus_label: "CRISP".to_string(),
            autofocus_card_address: Some("32".to_string()),
            plogic_label: "PLogic:E:36".to_string(),
            plogic_trigger_ttl_addr: 41,
            plogic_4khz_clock_addr: 192,
            plogic_laser_on_cell: 10,
            plogic_camera_cell: 11,
            plogic_always_on_cell: 12,
            plogic_bnc1_addr: 33,
            plogic_bnc3_addr: 35,
            pulses_per_ms: 4.0,
            plogic_laser_preset_num: 30,
            plogic_live_mode_preset: 12,
            plogic_idle_mode_preset: 10,
            stage_arming: StageArming::None,
            ring_buffer_axis: "P".to_string(),
            ring_buffer_ttl_mode: 1,
            arm_galvo_scan: false,
            galvo_axis: "A".to_string(),
            galvo_amplitude_mv: 500.0,
        }
    }
}

impl HardwareConstants {
    /// Card address of the logic card (`"PLogic:E:36"` -> `"36"`).
    pub fn plogic_address(&self) -> RigResult<&str> {
        card_address(&self.plogic_label)
    }

    /// Validate constants that the firmware would otherwise reject mid-run.
    pub fn validate(&self) -> RigResult<()> {
        self.plogic_address()?;
        if !self.pulses_per_ms.is_finite() || self.pulses_per_ms <= 0.0 {
            return Err(RigError::invalid_parameter(
                "pulses_per_ms",
                format!("must be positive, got {}", self.pulses_per_ms),
            ));
        }
        if !(1..=3).contains(&self.ring_buffer_ttl_mode) {
            return Err(RigError::invalid_parameter(
                "ring_buffer_ttl_mode",
                format!("must be 1-3, got {}", self.ring_buffer_ttl_mode),
            ));
        }
        if self.hub_label.is_empty() {
            return Err(RigError::invalid_parameter("hub_label", "must not be empty"));
        }
        if self.arm_galvo_scan {
            AxisLabel::new(&self.galvo_axis)?;
            if !self.galvo_amplitude_mv.is_finite() || self.galvo_amplitude_mv <= 0.0 {
                return Err(RigError::invalid_parameter(
                    "galvo_amplitude_mv",
                    format!("must be positive, got {}", self.galvo_amplitude_mv),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_exposure_sets_matching_trigger_duration() {
        let base = AcquisitionSettings::default();
        let run = base.with_exposure(25.0);
        assert_eq!(run.exposure_ms, 25.0);
        assert_eq!(run.trigger_duration_ms, 25.0);
        assert_eq!(run.num_slices, base.num_slices);
    }

    #[test]
    fn slice_positions_are_centered() {
        let settings = AcquisitionSettings {
            num_slices: 3,
            step_size_um: 1.0,
            center_position_um: -31.0,
            ..Default::default()
        };
        assert_eq!(settings.slice_positions_um(), vec![-32.0, -31.0, -30.0]);

        let even = AcquisitionSettings {
            num_slices: 2,
            step_size_um: 2.0,
            center_position_um: 0.0,
            ..Default::default()
        };
        assert_eq!(even.slice_positions_um(), vec![-1.0, 1.0]);
    }

    #[test]
    fn rejects_degenerate_settings() {
        assert!(AcquisitionSettings::default().validate().is_ok());

        let zero_slices = AcquisitionSettings {
            num_slices: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_slices.validate(),
            Err(RigError::InvalidParameter { .. })
        ));

        let negative_exposure = AcquisitionSettings {
            exposure_ms: -1.0,
            ..Default::default()
        };
        assert!(negative_exposure.validate().is_err());
    }

    #[test]
    fn galvo_scan_is_checked_only_when_armed() {
        let unarmed = HardwareConstants {
            galvo_amplitude_mv: -1.0,
            ..Default::default()
        };
        assert!(unarmed.validate().is_ok());

        let armed = HardwareConstants {
            arm_galvo_scan: true,
            ..unarmed
        };
        assert!(matches!(
            armed.validate(),
            Err(RigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn plogic_address_is_last_label_part() {
        let hw = HardwareConstants::default();
        assert_eq!(hw.plogic_address().unwrap(), "36");

        let bad = HardwareConstants {
            plogic_label: "PLogic".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad.plogic_address(),
            Err(RigError::InvalidDeviceLabel { .. })
        ));
    }
}
