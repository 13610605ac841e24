//! Acquisition sequencer - drives one triggered run through its lifecycle.
//!
//! The host acquisition engine notifies the sequencer when a sequence starts
//! and finishes; the sequencer prepares the rig, keeps track of the run and
//! always leaves the hardware disarmed when the run ends.
//!
//! # Usage
//!
//! ```rust,ignore
//! let sequencer = AcquisitionSequencer::new(triggers, stage, galvo, hw, settings);
//! let mut events = sequencer.subscribe();
//!
//! sequencer.on_sequence_started(20.0).await?;   // Idle -> Preparing -> Acquiring
//! sequencer.on_sequence_finished(None).await?;  // -> CleaningUp -> Finished
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{} -> {}", event.from, event.to);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::state::{AcquisitionEvent, AcquisitionState};
use crate::codec::AxisLabel;
use crate::error::{RigError, RigResult};
use crate::hardware::{GalvoCommands, RingBufferTtlMode, StageCommands};
use crate::settings::{AcquisitionSettings, HardwareConstants, StageArming};
use crate::trigger::TriggerSequencer;

/// Per-attempt bookkeeping, guarded by the transition lock.
#[derive(Default)]
struct RunContext {
    run_id: Option<Uuid>,
    settings: Option<AcquisitionSettings>,
    sequence_id: Option<String>,
    cleanup_done: bool,
    last_error: Option<String>,
}

enum Prepared {
    Ready,
    Cancelled,
}

/// The acquisition state machine.
///
/// Every handler takes the transition lock for its whole duration, so
/// handlers never interleave. [`AcquisitionSequencer::cancel`] raises its
/// flag before waiting for the lock, which lets an in-flight prepare stop at
/// its next checkpoint.
pub struct AcquisitionSequencer {
    triggers: TriggerSequencer,
    stage: StageCommands,
    galvo: GalvoCommands,
    hw: HardwareConstants,
    base_settings: AcquisitionSettings,

    /// Current state, readable without waiting for a transition
    state: RwLock<AcquisitionState>,

    /// Transition lock and run bookkeeping
    run_context: Mutex<RunContext>,

    cancel_requested: AtomicBool,

    event_sender: broadcast::Sender<AcquisitionEvent>,
}

impl AcquisitionSequencer {
    /// `settings` is the template for every run; the start signal supplies
    /// the exposure.
    pub fn new(
        triggers: TriggerSequencer,
        stage: StageCommands,
        galvo: GalvoCommands,
        hw: HardwareConstants,
        settings: AcquisitionSettings,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(64);

        Self {
            triggers,
            stage,
            galvo,
            hw,
            base_settings: settings,
            state: RwLock::new(AcquisitionState::Idle),
            run_context: Mutex::new(RunContext::default()),
            cancel_requested: AtomicBool::new(false),
            event_sender,
        }
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.event_sender.subscribe()
    }

    /// Current state.
    pub async fn state(&self) -> AcquisitionState {
        *self.state.read().await
    }

    /// Template every run's settings are derived from.
    pub fn base_settings(&self) -> &AcquisitionSettings {
        &self.base_settings
    }

    /// Id of the current or most recent run. Waits for an in-flight
    /// transition.
    pub async fn run_id(&self) -> Option<Uuid> {
        self.run_context.lock().await.run_id
    }

    /// Settings of the current or most recent run.
    pub async fn run_settings(&self) -> Option<AcquisitionSettings> {
        self.run_context.lock().await.settings.clone()
    }

    /// Sequence id reported when the most recent run finished.
    pub async fn sequence_id(&self) -> Option<String> {
        self.run_context.lock().await.sequence_id.clone()
    }

    /// Cause of the most recent fault, if the last run ended in error.
    pub async fn last_error(&self) -> Option<String> {
        self.run_context.lock().await.last_error.clone()
    }

    /// The host started a sequence with `exposure_ms` per frame.
    ///
    /// Returns [`AcquisitionState::Acquiring`] once the rig is armed, or
    /// [`AcquisitionState::Cancelled`] if a cancel arrived while preparing.
    #[instrument(skip(self), err)]
    pub async fn on_sequence_started(&self, exposure_ms: f64) -> RigResult<AcquisitionState> {
        let mut ctx = self.run_context.lock().await;

        let current = *self.state.read().await;
        if current.is_terminal() {
            self.transition(&ctx, AcquisitionState::Idle, None).await;
        } else if current.is_active() {
            return Err(invalid_transition(current, "start"));
        }

        self.cancel_requested.store(false, Ordering::SeqCst);
        let settings = self.base_settings.with_exposure(exposure_ms);
        *ctx = RunContext {
            run_id: Some(Uuid::new_v4()),
            settings: Some(settings.clone()),
            ..Default::default()
        };
        self.transition(&ctx, AcquisitionState::Preparing, None)
            .await;

        match self.prepare(&settings).await {
            Ok(Prepared::Ready) => {
                self.transition(&ctx, AcquisitionState::Acquiring, None)
                    .await;
                Ok(AcquisitionState::Acquiring)
            }
            Ok(Prepared::Cancelled) => {
                self.clean_up_into(&mut ctx, AcquisitionState::Cancelled)
                    .await
            }
            Err(cause) => Err(self
                .fail(&mut ctx, AcquisitionState::Preparing, cause)
                .await),
        }
    }

    /// The host finished the sequence.
    ///
    /// A paused run may finish too: the host can end a sequence without
    /// resuming it first, and the run still goes through cleanup.
    #[instrument(skip(self), err)]
    pub async fn on_sequence_finished(
        &self,
        sequence_id: Option<&str>,
    ) -> RigResult<AcquisitionState> {
        let mut ctx = self.run_context.lock().await;
        let current = *self.state.read().await;
        match current {
            AcquisitionState::Acquiring | AcquisitionState::Paused => {
                ctx.sequence_id = sequence_id.map(str::to_owned);
                self.clean_up_into(&mut ctx, AcquisitionState::Finished)
                    .await
            }
            _ => Err(invalid_transition(current, "finish")),
        }
    }

    /// Suspend the run; the hardware stays armed.
    #[instrument(skip(self), err)]
    pub async fn pause(&self) -> RigResult<AcquisitionState> {
        let ctx = self.run_context.lock().await;
        let current = *self.state.read().await;
        if current != AcquisitionState::Acquiring {
            return Err(invalid_transition(current, "pause"));
        }
        self.transition(&ctx, AcquisitionState::Paused, None).await;
        Ok(AcquisitionState::Paused)
    }

    /// Continue a paused run.
    #[instrument(skip(self), err)]
    pub async fn resume(&self) -> RigResult<AcquisitionState> {
        let ctx = self.run_context.lock().await;
        let current = *self.state.read().await;
        if current != AcquisitionState::Paused {
            return Err(invalid_transition(current, "resume"));
        }
        self.transition(&ctx, AcquisitionState::Acquiring, None)
            .await;
        Ok(AcquisitionState::Acquiring)
    }

    /// Cancel the current run.
    ///
    /// Does nothing when no run is active and returns the unchanged state.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self) -> RigResult<AcquisitionState> {
        self.cancel_requested.store(true, Ordering::SeqCst);

        let mut ctx = self.run_context.lock().await;
        let current = *self.state.read().await;
        let result = match current {
            AcquisitionState::Acquiring | AcquisitionState::Paused => {
                self.clean_up_into(&mut ctx, AcquisitionState::Cancelled)
                    .await
            }
            _ => {
                debug!(state = %current, "No active run to cancel");
                Ok(current)
            }
        };
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    /// Report an unrecoverable fault from outside the rig (camera, host).
    ///
    /// Cleans up and enters [`AcquisitionState::Error`] with `reason` as the
    /// recorded cause.
    #[instrument(skip(self), err)]
    pub async fn fault(&self, reason: &str) -> RigResult<AcquisitionState> {
        let mut ctx = self.run_context.lock().await;
        let current = *self.state.read().await;
        if !matches!(
            current,
            AcquisitionState::Acquiring | AcquisitionState::Paused
        ) {
            return Err(invalid_transition(current, "fault"));
        }

        error!(state = %current, reason, "External fault reported");
        if let Err(err) = self.cleanup(&mut ctx).await {
            error!(error = %err, "Cleanup after fault failed");
        }
        self.enter_error(&mut ctx, reason.to_string()).await;
        Ok(AcquisitionState::Error)
    }

    fn cancel_checkpoint(&self, next_step: &str) -> bool {
        let requested = self.cancel_requested.load(Ordering::SeqCst);
        if requested {
            info!(next_step, "Cancel observed while preparing");
        }
        requested
    }

    async fn prepare(&self, settings: &AcquisitionSettings) -> RigResult<Prepared> {
        settings.validate()?;

        if self.cancel_checkpoint("program triggers") {
            return Ok(Prepared::Cancelled);
        }
        self.triggers.program_nrt_pulses(settings).await?;

        if self.cancel_checkpoint("open shutter") {
            return Ok(Prepared::Cancelled);
        }
        self.triggers.open_global_shutter().await?;

        if self.cancel_checkpoint("arm stage") {
            return Ok(Prepared::Cancelled);
        }
        match self.hw.stage_arming {
            StageArming::None => {}
            StageArming::ZStack => {
                self.stage
                    .setup_z_stack(settings.step_size_um, settings.num_slices)
                    .await?;
                self.stage.start_z_stack().await?;
            }
            StageArming::RingBuffer => {
                let axis = AxisLabel::new(&self.hw.ring_buffer_axis)?;
                let mode = RingBufferTtlMode::new(self.hw.ring_buffer_ttl_mode)?;
                self.stage.clear_ring_buffer().await?;
                for position in settings.slice_positions_um() {
                    if self.cancel_checkpoint("load ring buffer") {
                        return Ok(Prepared::Cancelled);
                    }
                    self.stage
                        .load_ring_buffer(&[(axis.clone(), position)])
                        .await?;
                }
                self.stage.set_ring_buffer_ttl_mode(mode).await?;
            }
        }

        if self.hw.arm_galvo_scan {
            if self.cancel_checkpoint("arm galvo") {
                return Ok(Prepared::Cancelled);
            }
            let axis = AxisLabel::new(&self.hw.galvo_axis)?;
            let half = self.hw.galvo_amplitude_mv / 2.0;
            self.galvo
                .setup_vertical_scan(&axis, -half, half, settings.num_slices)
                .await?;
            self.galvo.arm_scan(true).await?;
        }

        if self.cancel_checkpoint("acquire") {
            return Ok(Prepared::Cancelled);
        }
        Ok(Prepared::Ready)
    }

    /// Disarm the galvo, close the shutter and disarm the stage, once per
    /// attempt.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    async fn cleanup(&self, ctx: &mut RunContext) -> RigResult<()> {
        if ctx.cleanup_done {
            return Ok(());
        }
        ctx.cleanup_done = true;
        self.transition(ctx, AcquisitionState::CleaningUp, None)
            .await;

        let mut first_error = None;

        if let Err(err) = self.galvo.arm_scan(false).await {
            error!(error = %err, "Failed to disarm galvo scan");
            first_error = Some(err);
        }

        if let Err(err) = self.triggers.close_global_shutter().await {
            error!(error = %err, "Failed to close global shutter");
            first_error = first_error.or(Some(err));
        }

        let disarm = match self.hw.stage_arming {
            StageArming::None => Ok(()),
            StageArming::ZStack => self.stage.stop_z_stack().await,
            StageArming::RingBuffer => self.stage.clear_ring_buffer().await,
        };
        if let Err(err) = disarm {
            error!(error = %err, arming = ?self.hw.stage_arming, "Failed to disarm stage");
            first_error = first_error.or(Some(err));
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn clean_up_into(
        &self,
        ctx: &mut RunContext,
        terminal: AcquisitionState,
    ) -> RigResult<AcquisitionState> {
        match self.cleanup(ctx).await {
            Ok(()) => {
                self.transition(ctx, terminal, None).await;
                Ok(terminal)
            }
            Err(cause) => Err(self
                .fail(ctx, AcquisitionState::CleaningUp, cause)
                .await),
        }
    }

    /// Clean up after `cause`, enter the error state and wrap the cause.
    async fn fail(
        &self,
        ctx: &mut RunContext,
        during: AcquisitionState,
        cause: RigError,
    ) -> RigError {
        error!(state = %during, error = %cause, "Acquisition fault");
        if let Err(err) = self.cleanup(ctx).await {
            error!(error = %err, "Cleanup after fault failed");
        }
        self.enter_error(ctx, cause.to_string()).await;
        RigError::AcquisitionFault {
            state: during.to_string(),
            source: Box::new(cause),
        }
    }

    async fn enter_error(&self, ctx: &mut RunContext, message: String) {
        ctx.last_error = Some(message.clone());
        self.transition(ctx, AcquisitionState::Error, Some(message))
            .await;
    }

    async fn transition(&self, ctx: &RunContext, to: AcquisitionState, message: Option<String>) {
        let from = std::mem::replace(&mut *self.state.write().await, to);
        info!(run_id = ?ctx.run_id, %from, %to, "Acquisition state changed");

        let _ = self.event_sender.send(AcquisitionEvent {
            run_id: ctx.run_id,
            from,
            to,
            timestamp: Utc::now(),
            message,
        });
    }
}

fn invalid_transition(state: AcquisitionState, event: &str) -> RigError {
    RigError::InvalidTransition {
        state: state.to_string(),
        event: event.to_string(),
    }
}
