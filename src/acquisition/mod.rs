//! Acquisition sequencing.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start ┌───────────┐ ready ┌───────────┐ finish ┌─────────────┐ ok ┌──────────┐
//! │ Idle │──────▶│ Preparing │──────▶│ Acquiring │───────▶│ CleaningUp  │───▶│ Finished │
//! └──────┘       └───────────┘       └───────────┘        └─────────────┘    └──────────┘
//!                      │          pause │    ▲ resume        ▲       │
//!                      │                ▼    │               │       ├──▶ Cancelled
//!                      │             ┌────────┐              │       └──▶ Error
//!                      │             │ Paused │──────────────┤
//!                      │             └────────┘  cancel/fault│
//!                      └─────────────────────────────────────┘
//! ```
//!
//! Cleanup closes the global shutter and disarms the stage on every path out
//! of a run, exactly once per attempt.

pub mod sequencer;
pub mod state;

pub use sequencer::AcquisitionSequencer;
pub use state::{AcquisitionEvent, AcquisitionState};
