//! CRISP focus-lock unit.
//!
//! Commands go straight to the autofocus card. The unit runs its own control
//! loop; this module only issues actions (lock, calibrate, dither) and reads
//! back the state the firmware reports. No transition graph is enforced here.

use std::fmt;
use tracing::{debug, instrument};

use crate::codec::{format_float, parse_tagged, Codec};
use crate::error::{RigError, RigResult};

/// State of the focus-lock control loop, as reported by `LK X?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AutofocusState {
    /// Loop idle
    Idle = 3,
    /// Log amplifier calibration
    LogAmpCal = 4,
    /// Dithering to find the error slope
    Dithering = 5,
    /// Gain calibration
    GainCal = 6,
    /// Calibrated, ready to lock
    Ready = 7,
    /// In focus
    InFocus = 8,
    /// Focal plane found
    FocalPlaneFound = 9,
    /// Monitoring without correcting
    Monitoring = 10,
    /// Moving toward focus
    Focusing = 11,
    /// Locked and tracking
    InLock = 12,
    /// Lock lost recently, recovering
    FocusLostRecently = 13,
    /// Out of focus
    OutOfFocus = 14,
    /// Lock lost
    FocusLost = 15,
}

impl AutofocusState {
    /// Numeric code reported by `LK X?`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a reported code; unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            3 => Some(Self::Idle),
            4 => Some(Self::LogAmpCal),
            5 => Some(Self::Dithering),
            6 => Some(Self::GainCal),
            7 => Some(Self::Ready),
            8 => Some(Self::InFocus),
            9 => Some(Self::FocalPlaneFound),
            10 => Some(Self::Monitoring),
            11 => Some(Self::Focusing),
            12 => Some(Self::InLock),
            13 => Some(Self::FocusLostRecently),
            14 => Some(Self::OutOfFocus),
            15 => Some(Self::FocusLost),
            _ => None,
        }
    }

    /// Operator-facing description of the state.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LogAmpCal => "log amp calibration",
            Self::Dithering => "dithering",
            Self::GainCal => "gain calibration",
            Self::Ready => "ready",
            Self::InFocus => "in focus",
            Self::FocalPlaneFound => "focal plane found",
            Self::Monitoring => "monitoring",
            Self::Focusing => "focusing",
            Self::InLock => "in lock",
            Self::FocusLostRecently => "focus lost recently",
            Self::OutOfFocus => "out of focus",
            Self::FocusLost => "focus lost",
        }
    }
}

impl fmt::Display for AutofocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Autofocus command module, bound to the CRISP card.
#[derive(Clone)]
pub struct AutofocusCommands {
    codec: Codec,
}

impl AutofocusCommands {
    /// Wrap the card-addressed codec of the autofocus unit.
    pub fn new(crisp: Codec) -> Self {
        Self { codec: crisp }
    }

    /// `LK {param}?` and the value of its `param=value` reply.
    async fn query_param(&self, param: &str) -> RigResult<String> {
        self.codec
            .query_tagged(&format!("LK {param}?"), param)
            .await
    }

    async fn action(&self, command: &str) -> RigResult<()> {
        self.codec.execute(command).await?;
        debug!(device = %self.codec.handle().label(), command, "Autofocus action sent");
        Ok(())
    }

    /// Current loop state (`LK X?`).
    #[instrument(skip(self), err)]
    pub async fn state(&self) -> RigResult<AutofocusState> {
        let reply = self.codec.execute("LK X?").await?;
        parse_state_reply(&reply)
    }

    /// Focus signal to noise ratio (`LK Y?`).
    #[instrument(skip(self), err)]
    pub async fn signal_to_noise(&self) -> RigResult<f64> {
        let raw = self.query_param("Y").await?;
        raw.parse::<f64>()
            .map_err(|_| RigError::unexpected("Y", raw.clone()))
    }

    /// Engage the focus lock.
    #[instrument(skip(self), err)]
    pub async fn lock(&self) -> RigResult<()> {
        self.action("LK").await
    }

    /// Release the lock (`UL`).
    #[instrument(skip(self), err)]
    pub async fn unlock(&self) -> RigResult<()> {
        self.action("UL").await
    }

    /// Take the current position as the new focus offset.
    #[instrument(skip(self), err)]
    pub async fn reset_offset(&self) -> RigResult<()> {
        self.action("LK X=10").await
    }

    /// Run the log amplifier calibration.
    #[instrument(skip(self), err)]
    pub async fn calibrate_log_amp(&self) -> RigResult<()> {
        self.action("LK X=2").await
    }

    /// Run the gain calibration.
    #[instrument(skip(self), err)]
    pub async fn calibrate_gain(&self) -> RigResult<()> {
        self.action("LK X=4").await
    }

    /// Start dithering.
    #[instrument(skip(self), err)]
    pub async fn dither(&self) -> RigResult<()> {
        self.action("LK X=3").await
    }

    /// Set the loop gain (`G K=`).
    pub async fn set_gain(&self, gain: u32) -> RigResult<()> {
        self.codec.execute(&format!("G K={gain}")).await?;
        Ok(())
    }

    /// Loop gain.
    pub async fn gain(&self) -> RigResult<u32> {
        self.query_u32("G K?").await
    }

    /// Set the LED intensity in percent.
    pub async fn set_led_intensity(&self, intensity: u32) -> RigResult<()> {
        self.codec.execute(&format!("L I={intensity}")).await?;
        Ok(())
    }

    /// LED intensity in percent.
    pub async fn led_intensity(&self) -> RigResult<u32> {
        self.query_u32("L I?").await
    }

    /// Number of samples averaged per error reading.
    pub async fn set_averaging(&self, samples: u32) -> RigResult<()> {
        self.codec.execute(&format!("NA F={samples}")).await?;
        Ok(())
    }

    /// Samples averaged per reading.
    pub async fn averaging(&self) -> RigResult<u32> {
        self.query_u32("NA F?").await
    }

    /// Lock range (µm).
    pub async fn set_lock_range(&self, range_um: f64) -> RigResult<()> {
        self.codec
            .execute(&format!("LR F={}", format_float(range_um)))
            .await?;
        Ok(())
    }

    /// Lock range (µm).
    pub async fn lock_range(&self) -> RigResult<f64> {
        self.codec.query_f64("LR F?").await
    }

    /// Maximum motor steps moved while searching for focus.
    pub async fn set_autofocus_limit(&self, steps: u32) -> RigResult<()> {
        self.codec.execute(&format!("AL N={steps}")).await?;
        Ok(())
    }

    /// Autofocus travel limit.
    pub async fn autofocus_limit(&self) -> RigResult<u32> {
        self.query_u32("AL N?").await
    }

    async fn query_u32(&self, command: &str) -> RigResult<u32> {
        let value = self.codec.query_int(command).await?;
        u32::try_from(value).map_err(|_| RigError::unexpected(command, value.to_string()))
    }
}

/// Parse a `LK X?` reply (`"X=12"` -> `InLock`).
pub fn parse_state_reply(reply: &str) -> RigResult<AutofocusState> {
    let raw = parse_tagged("X", reply)?;
    raw.parse::<f64>()
        .ok()
        .and_then(|v| AutofocusState::from_code(v.trunc() as i64))
        .ok_or_else(|| RigError::unexpected("X", reply))
}
