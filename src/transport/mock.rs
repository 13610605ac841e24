//! Mock transport for testing
//!
//! Stands in for the controller without requiring hardware. It provides:
//! - Scripted replies per exact command line
//! - Simulated latency
//! - Controllable failure injection
//! - Call logging for test verification

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use super::{CommandTransport, DeviceHandle};
use crate::error::{RigError, RigResult};

/// Reply the controller gives to an accepted command without data.
pub const ACK: &str = ":A";

/// Mock controller.
///
/// Commands are matched on the framed line (card address included).
/// One-shot replies queued with [`MockTransport::queue_reply`] take
/// precedence over persistent ones set with [`MockTransport::set_reply`].
/// Anything else is answered with [`ACK`].
///
/// # Example
///
/// ```
/// use tiger_rig::transport::{CommandTransport, DeviceHandle, MockTransport};
///
/// # tokio_test_block_on(async {
/// let mock = MockTransport::new();
/// mock.set_reply("PZ P?", ":A P=3");
/// let hub = DeviceHandle::new("TigerCommHub", "ASITiger");
/// assert_eq!(mock.send_command(&hub, "PZ P?").await.unwrap(), ":A P=3");
/// assert_eq!(mock.calls(), vec!["PZ P?".to_string()]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MockTransport {
    replies: Mutex<HashMap<String, String>>,
    queued: Mutex<HashMap<String, VecDeque<String>>>,
    failing: Mutex<HashSet<String>>,
    should_fail_next: AtomicBool,
    latency: Mutex<Duration>,
    call_log: Mutex<Vec<String>>,
    batches_begun: AtomicU32,
    batches_ended: AtomicU32,
}

impl MockTransport {
    /// Create a mock that acknowledges everything instantly.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            should_fail_next: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            call_log: Mutex::new(Vec::new()),
            batches_begun: AtomicU32::new(0),
            batches_ended: AtomicU32::new(0),
        }
    }

    /// Set simulated latency per exchange.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Answer `command` with `reply` every time.
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.replies
            .lock()
            .insert(command.to_string(), reply.to_string());
    }

    /// Answer the next `command` with `reply`, once.
    pub fn queue_reply(&self, command: &str, reply: &str) {
        self.queued
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Make every send of `command` fail with a transport error.
    pub fn fail_on(&self, command: &str) {
        self.failing.lock().insert(command.to_string());
    }

    /// Trigger a transport failure on the next exchange, whatever it is.
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Get a copy of the call log for verification
    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    /// Number of times `command` was sent.
    pub fn count(&self, command: &str) -> usize {
        self.call_log
            .lock()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Clear the call log
    pub fn clear_calls(&self) {
        self.call_log.lock().clear();
    }

    /// Number of `(begin_batch, end_batch)` calls seen.
    pub fn batch_counts(&self) -> (u32, u32) {
        (
            self.batches_begun.load(Ordering::SeqCst),
            self.batches_ended.load(Ordering::SeqCst),
        )
    }

    fn reply_for(&self, line: &str) -> String {
        if let Some(reply) = self.queued.lock().get_mut(line).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.replies
            .lock()
            .get(line)
            .cloned()
            .unwrap_or_else(|| ACK.to_string())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandTransport for MockTransport {
    async fn send_command(&self, handle: &DeviceHandle, command: &str) -> RigResult<String> {
        let line = handle.frame(command);
        self.call_log.lock().push(line.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.should_fail_next.swap(false, Ordering::SeqCst) || self.failing.lock().contains(&line)
        {
            return Err(RigError::transport(handle.label(), "mock transport failure"));
        }

        Ok(self.reply_for(&line))
    }

    async fn begin_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        self.batches_begun.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end_batch(&self, _handle: &DeviceHandle) -> RigResult<()> {
        self.batches_ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> DeviceHandle {
        DeviceHandle::new("TigerCommHub", "ASITiger")
    }

    #[tokio::test]
    async fn queued_replies_take_precedence() {
        let mock = MockTransport::new();
        mock.set_reply("LK X?", ":A X=3");
        mock.queue_reply("LK X?", ":A X=12");

        assert_eq!(mock.send_command(&hub(), "LK X?").await.unwrap(), ":A X=12");
        assert_eq!(mock.send_command(&hub(), "LK X?").await.unwrap(), ":A X=3");
        assert_eq!(mock.send_command(&hub(), "UL").await.unwrap(), ACK);
        assert_eq!(mock.count("LK X?"), 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let mock = MockTransport::new();
        mock.trigger_failure();
        assert!(mock.send_command(&hub(), "ZS S=1").await.is_err());
        assert!(mock.send_command(&hub(), "ZS S=1").await.is_ok());

        mock.fail_on("ZS S=0");
        assert!(matches!(
            mock.send_command(&hub(), "ZS S=0").await,
            Err(RigError::Transport { .. })
        ));
        assert_eq!(mock.calls().len(), 3);
    }
}
