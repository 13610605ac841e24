//! # Tiger Rig
//!
//! Command layer and acquisition sequencing for a microscope built around an
//! ASI Tiger controller: a piezo focus stage, a CRISP autofocus unit, a
//! scanning galvo, an XY/Z stage and a programmable logic card that times
//! camera and laser pulses.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the `send_command` capability and its serial, hub
//!   property and mock implementations.
//! - **`codec`**: command framing, the `:N` failure sentinel and reply
//!   parsing, bound to one device per [`codec::Codec`].
//! - **`hardware`**: typed command modules for each card, plus the autofocus
//!   state tracker.
//! - **`trigger`**: logic-card programs for NRT camera/laser pulses and the
//!   global shutter.
//! - **`acquisition`**: the run lifecycle state machine.
//! - **`config`**, **`settings`**: Figment-loaded configuration, acquisition
//!   settings and hardware constants.
//! - **`error`**, **`error_recovery`**: `RigError` and bounded retry.
//! - **`logging`**: tracing subscriber setup.

pub mod acquisition;
pub mod codec;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod rig;
pub mod settings;
pub mod transport;
pub mod trigger;

pub use error::{RigError, RigResult};
pub use rig::Rig;
