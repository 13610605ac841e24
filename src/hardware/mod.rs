//! Typed command modules for the cards on the Tiger controller.
//!
//! Each module wraps a [`crate::codec::Codec`] bound to a single device and
//! exposes its command vocabulary as async methods. Protocol errors are
//! propagated to the caller unchanged.

pub mod autofocus;
pub mod focus_tracker;
pub mod galvo;
pub mod piezo;
pub mod plogic;
pub mod stage;

pub use autofocus::{AutofocusCommands, AutofocusState};
pub use focus_tracker::{FocusSnapshot, FocusTracker};
pub use galvo::{GalvoCommands, GalvoLaserMode, GalvoScanMode, SingleAxisMode, TtlInput};
pub use piezo::{PiezoCommands, PiezoMaintainMode, PiezoMode};
pub use plogic::{CellType, PLogicCommands};
pub use stage::{HoldingPowerMode, RingBufferTtlMode, StageCommands};
