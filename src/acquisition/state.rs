//! Lifecycle states of an acquisition run and the events published on each
//! transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Acquisition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No run in progress, ready to start
    Idle,
    /// Programming triggers, opening the shutter, arming the stage
    Preparing,
    /// Hardware armed, frames being triggered
    Acquiring,
    /// Run suspended by the host; hardware stays armed
    Paused,
    /// Closing the shutter and disarming the stage
    CleaningUp,
    /// Run completed and cleaned up
    Finished,
    /// Run cancelled and cleaned up
    Cancelled,
    /// Run faulted; cleanup has run
    Error,
}

impl AcquisitionState {
    /// A run has ended in this state; the next start begins from idle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Error)
    }

    /// Hardware may be armed in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Acquiring | Self::Paused | Self::CleaningUp
        )
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "idle"),
            AcquisitionState::Preparing => write!(f, "preparing"),
            AcquisitionState::Acquiring => write!(f, "acquiring"),
            AcquisitionState::Paused => write!(f, "paused"),
            AcquisitionState::CleaningUp => write!(f, "cleaning up"),
            AcquisitionState::Finished => write!(f, "finished"),
            AcquisitionState::Cancelled => write!(f, "cancelled"),
            AcquisitionState::Error => write!(f, "error"),
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionEvent {
    /// Run the transition belongs to; `None` before the first run
    pub run_id: Option<Uuid>,
    /// State left
    pub from: AcquisitionState,
    /// State entered
    pub to: AcquisitionState,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// Fault description when entering [`AcquisitionState::Error`]
    pub message: Option<String>,
}
