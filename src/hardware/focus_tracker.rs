//! Observation layer over the autofocus unit.
//!
//! The firmware decides how the focus loop moves between states. The tracker
//! only reads: callers issue an action on [`AutofocusCommands`] and then poll
//! here until the loop settles where they expect.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::autofocus::{AutofocusCommands, AutofocusState};
use crate::error::{RigError, RigResult};

/// State and signal quality read together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusSnapshot {
    /// Loop state
    pub state: AutofocusState,
    /// Focus signal to noise ratio
    pub signal_to_noise: f64,
}

/// Polls the autofocus unit.
pub struct FocusTracker {
    commands: AutofocusCommands,
    poll_interval: Duration,
}

impl FocusTracker {
    /// Track `commands`, polling every 100 ms.
    pub fn new(commands: AutofocusCommands) -> Self {
        Self {
            commands,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Override the polling interval used by the wait helpers.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Autofocus commands, for actions and tuning.
    pub fn commands(&self) -> &AutofocusCommands {
        &self.commands
    }

    /// Current loop state.
    pub async fn state(&self) -> RigResult<AutofocusState> {
        self.commands.state().await
    }

    /// State and signal to noise ratio, read back to back.
    pub async fn snapshot(&self) -> RigResult<FocusSnapshot> {
        let state = self.commands.state().await?;
        let signal_to_noise = self.commands.signal_to_noise().await?;
        Ok(FocusSnapshot {
            state,
            signal_to_noise,
        })
    }

    /// Whether the loop reports [`AutofocusState::InLock`].
    pub async fn is_locked(&self) -> RigResult<bool> {
        Ok(self.commands.state().await? == AutofocusState::InLock)
    }

    /// Poll until the loop reports `target` or `timeout` elapses.
    ///
    /// The state is read at least once, even with a zero timeout.
    #[instrument(skip(self), fields(target = %target), err)]
    pub async fn wait_for_state(
        &self,
        target: AutofocusState,
        timeout: Duration,
    ) -> RigResult<AutofocusState> {
        let deadline = Instant::now() + timeout;
        let mut last = self.commands.state().await?;
        loop {
            if last == target {
                debug!(state = %last, "Autofocus reached target state");
                return Ok(last);
            }
            if Instant::now() >= deadline {
                warn!(expected = %target, last = %last, "Autofocus wait timed out");
                return Err(RigError::FocusTimeout {
                    expected: target,
                    last,
                });
            }
            sleep(self.poll_interval).await;
            let next = self.commands.state().await?;
            if next != last {
                debug!(from = %last, to = %next, "Autofocus state changed");
            }
            last = next;
        }
    }

    /// Engage the lock and wait for the loop to report it.
    pub async fn lock_and_wait(&self, timeout: Duration) -> RigResult<()> {
        self.commands.lock().await?;
        self.wait_for_state(AutofocusState::InLock, timeout).await?;
        info!("Focus locked");
        Ok(())
    }
}
