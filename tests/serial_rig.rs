//! End-to-end tests over a simulated serial line.
//!
//! A task on the far end of a `tokio::io::duplex` pipe plays the controller:
//! it reads `\r`-terminated commands and answers with `\r\n`-terminated
//! replies, the way the Tiger firmware does.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use tiger_rig::acquisition::AcquisitionState;
use tiger_rig::config::RigConfig;
use tiger_rig::error::AsiErrorCode;
use tiger_rig::error_recovery::RetryPolicy;
use tiger_rig::hardware::{AutofocusState, PiezoMaintainMode, PiezoMode};
use tiger_rig::transport::SerialTransport;
use tiger_rig::{Rig, RigError};

/// Scripted controller; unknown commands are acknowledged, silent ones get
/// no reply at all, late ones are answered after a delay.
struct FakeController {
    replies: HashMap<&'static str, &'static str>,
    silent: Vec<&'static str>,
    late: HashMap<&'static str, Duration>,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeController {
    fn new(replies: &[(&'static str, &'static str)]) -> Self {
        Self {
            replies: replies.iter().copied().collect(),
            silent: Vec::new(),
            late: HashMap::new(),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn silent_on(mut self, command: &'static str) -> Self {
        self.silent.push(command);
        self
    }

    fn late_on(mut self, command: &'static str, delay: Duration) -> Self {
        self.late.insert(command, delay);
        self
    }

    fn spawn(self, stream: DuplexStream) -> Arc<Mutex<Vec<String>>> {
        let received = self.received.clone();
        tokio::spawn(async move {
            let mut stream = BufReader::new(stream);
            let mut line = Vec::new();
            loop {
                line.clear();
                match stream.read_until(b'\r', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let command = String::from_utf8_lossy(&line).trim().to_string();
                self.received.lock().push(command.clone());
                if self.silent.iter().any(|s| *s == command) {
                    continue;
                }
                if let Some(delay) = self.late.get(command.as_str()) {
                    tokio::time::sleep(*delay).await;
                }
                let reply = self.replies.get(command.as_str()).copied().unwrap_or(":A");
                if stream
                    .get_mut()
                    .write_all(format!("{reply}\r\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        received
    }
}

fn serial_rig(controller: FakeController, retry: RetryPolicy) -> (Rig, Arc<Mutex<Vec<String>>>) {
    let (host, device) = duplex(1024);
    let received = controller.spawn(device);
    let transport = SerialTransport::new(Box::new(host), "sim", Duration::from_millis(200));

    let mut config = RigConfig::default();
    config.transport.retry = retry;
    let rig = Rig::from_config(Arc::new(transport), &config).unwrap();
    (rig, received)
}

#[tokio::test]
async fn queries_round_trip_over_the_line() {
    let controller = FakeController::new(&[
        ("PZ P?", ":A P=2"),
        ("32 LK X?", ":A X=12"),
        ("32 LK Y?", ":A Y=37.5"),
    ]);
    let (rig, received) = serial_rig(controller, RetryPolicy::none());

    assert_eq!(
        rig.piezo().operating_mode().await.unwrap(),
        PiezoMode::OpenLoopInternal
    );
    let snapshot = rig.focus().snapshot().await.unwrap();
    assert_eq!(snapshot.state, AutofocusState::InLock);
    assert_eq!(snapshot.signal_to_noise, 37.5);

    assert_eq!(
        *received.lock(),
        vec!["PZ P?", "32 LK X?", "32 LK Y?"]
    );
}

#[tokio::test]
async fn rejection_carries_controller_code() {
    let controller = FakeController::new(&[("BOGUS", ":N-1")]);
    let (rig, _) = serial_rig(controller, RetryPolicy::none());

    match rig.hub().execute("BOGUS").await {
        Err(RigError::DeviceCommand { code, reply, .. }) => {
            assert_eq!(code, AsiErrorCode::UnknownCommand);
            assert_eq!(reply, ":N-1");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn silence_times_out_and_is_retried() {
    let controller = FakeController::new(&[]).silent_on("32 LK X?");
    let retry = RetryPolicy {
        max_attempts: 1,
        backoff_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
    };
    let (rig, received) = serial_rig(controller, retry);

    let err = rig.focus().state().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(
        received.lock().iter().filter(|c| *c == "32 LK X?").count(),
        2
    );
}

#[tokio::test]
async fn triggered_run_over_serial() {
    let (rig, received) = serial_rig(FakeController::new(&[]), RetryPolicy::none());
    let sequencer = rig.sequencer();

    assert_eq!(
        sequencer.on_sequence_started(15.0).await.unwrap(),
        AcquisitionState::Acquiring
    );
    assert_eq!(
        sequencer.on_sequence_finished(None).await.unwrap(),
        AcquisitionState::Finished
    );

    let received = received.lock();
    // 15 ms at 4 ticks/ms for both camera and laser
    assert_eq!(received.iter().filter(|c| *c == "36CCA Y=14 Z=60").count(), 2);
    assert_eq!(received.iter().filter(|c| *c == "36CCA Z=0").count(), 1);
    assert_eq!(received.last().map(String::as_str), Some("36SS Z"));
}

#[tokio::test(start_paused = true)]
async fn late_reply_does_not_answer_the_next_query() {
    let controller = FakeController::new(&[("MA P?", ":A P=1"), ("PZ P?", ":A P=3")])
        .late_on("MA P?", Duration::from_millis(300));
    let (rig, received) = serial_rig(controller, RetryPolicy::none());

    let err = rig.piezo().maintain_mode().await.unwrap_err();
    assert!(err.is_transient());

    assert_eq!(
        rig.piezo().operating_mode().await.unwrap(),
        PiezoMode::OpenLoopExternal
    );
    assert_eq!(*received.lock(), vec!["MA P?", "PZ P?"]);
}

#[tokio::test]
async fn modules_sharing_the_line_never_cross_replies() {
    let controller = FakeController::new(&[
        ("PZ P?", ":A P=2"),
        ("MA P?", ":A P=0"),
        ("32 LK X?", ":A X=12"),
        ("32 LK Y?", ":A Y=37.5"),
    ]);
    let (rig, _) = serial_rig(controller, RetryPolicy::none());

    for _ in 0..8 {
        let (mode, maintain, state, snr) = tokio::join!(
            rig.piezo().operating_mode(),
            rig.piezo().maintain_mode(),
            rig.focus().state(),
            rig.focus().commands().signal_to_noise(),
        );
        assert_eq!(mode.unwrap(), PiezoMode::OpenLoopInternal);
        assert_eq!(maintain.unwrap(), PiezoMaintainMode::Default);
        assert_eq!(state.unwrap(), AutofocusState::InLock);
        assert_eq!(snr.unwrap(), 37.5);
    }
}
