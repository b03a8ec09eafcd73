//! Proximity card read integration tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiosk_voice::companion::{CheckReadResponse, MockOptions, PollReply, ReaderStatus};
use kiosk_voice::{
    Error, PollPolicy, ProximityDevice, ProximityReadController, ReadState, Result,
};

mod common;
use common::{client_for, spawn_mock};

const IDM: &str = "04AB12CD34EF5678";

/// Reader that answers checks from a script, then reports `waiting`
#[derive(Default)]
struct ScriptedReader {
    begin_fails: bool,
    replies: Mutex<VecDeque<Result<PollReply>>>,
    begins: AtomicUsize,
    checks: AtomicUsize,
}

impl ScriptedReader {
    fn new(replies: Vec<Result<PollReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProximityDevice for ScriptedReader {
    async fn begin_read(&self, _timeout_secs: u32) -> Result<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.begin_fails {
            return Err(Error::ReadError("Already reading".to_string()));
        }
        Ok(())
    }

    async fn check(&self) -> Result<PollReply> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(status(ReaderStatus::Waiting, None)))
    }
}

fn status(status: ReaderStatus, idm: Option<&str>) -> PollReply {
    PollReply::Status(CheckReadResponse {
        status,
        idm: idm.map(ToString::to_string),
    })
}

fn controller(reader: &Arc<ScriptedReader>) -> ProximityReadController {
    ProximityReadController::new(reader.clone(), PollPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_exact_budget() {
    let reader = ScriptedReader::new(Vec::new());
    let controller = controller(&reader);

    let err = controller.read(1).await.unwrap_err();

    assert!(matches!(err, Error::ReadTimeout));
    assert_eq!(reader.checks(), 2);
    assert_eq!(controller.state(), ReadState::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_success_on_first_poll() {
    let reader = ScriptedReader::new(vec![Ok(status(ReaderStatus::Success, Some(IDM)))]);
    let controller = controller(&reader);

    let idm = controller.read(30).await.unwrap();

    assert_eq!(idm, IDM);
    assert_eq!(reader.checks(), 1);
    assert_eq!(controller.state(), ReadState::Success(IDM.to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_begin_failure_skips_polling() {
    let reader = Arc::new(ScriptedReader {
        begin_fails: true,
        ..ScriptedReader::default()
    });
    let controller = controller(&reader);

    let err = controller.read(5).await.unwrap_err();

    assert!(matches!(err, Error::ReadError(_)));
    assert_eq!(reader.checks(), 0);
    assert!(matches!(controller.state(), ReadState::Error(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reader_timeout_ends_early() {
    let reader = ScriptedReader::new(vec![
        Ok(status(ReaderStatus::Reading, None)),
        Ok(status(ReaderStatus::Timeout, None)),
    ]);
    let controller = controller(&reader);

    assert!(matches!(controller.read(30).await, Err(Error::ReadTimeout)));
    assert_eq!(reader.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let reader = ScriptedReader::new(vec![
        Ok(PollReply::Transient("503 Service Unavailable".to_string())),
        Ok(PollReply::Transient("request timed out".to_string())),
        Ok(status(ReaderStatus::Success, Some(IDM))),
    ]);
    let controller = controller(&reader);

    assert_eq!(controller.read(30).await.unwrap(), IDM);
    assert_eq!(reader.checks(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_use_budget() {
    let reader = ScriptedReader::new(vec![
        Ok(PollReply::Transient("503 Service Unavailable".to_string())),
        Ok(PollReply::Transient("503 Service Unavailable".to_string())),
        Ok(status(ReaderStatus::Success, Some(IDM))),
    ]);
    let controller = controller(&reader);

    assert!(matches!(controller.read(1).await, Err(Error::ReadTimeout)));
    assert_eq!(reader.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_success_without_idm_keeps_polling() {
    let reader = ScriptedReader::new(vec![
        Ok(status(ReaderStatus::Success, None)),
        Ok(status(ReaderStatus::Success, Some(IDM))),
    ]);
    let controller = controller(&reader);

    assert_eq!(controller.read(30).await.unwrap(), IDM);
    assert_eq!(reader.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_failure_stops_polling() {
    let reader = ScriptedReader::new(vec![
        Ok(status(ReaderStatus::Waiting, None)),
        Err(Error::Protocol("unreadable status body".to_string())),
    ]);
    let controller = controller(&reader);

    let err = controller.read(30).await.unwrap_err();
    assert!(matches!(err, Error::ReadError(_)));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(reader.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_terminal_state() {
    let reader = ScriptedReader::new(vec![
        Ok(status(ReaderStatus::Timeout, None)),
        Ok(status(ReaderStatus::Success, Some(IDM))),
    ]);
    let controller = controller(&reader);

    assert!(controller.read(5).await.is_err());
    assert_eq!(controller.read(5).await.unwrap(), IDM);
    assert_eq!(reader.begins.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_sees_polling() {
    let reader = ScriptedReader::new(Vec::new());
    let controller = controller(&reader);
    let mut states = controller.subscribe();

    controller.start(2).unwrap();
    states
        .wait_for(|s| matches!(s, ReadState::Polling { .. }))
        .await
        .unwrap();

    let outcome = controller.wait().await;
    assert_eq!(outcome, ReadState::Timeout);
    assert_eq!(reader.checks(), 4);
}

#[tokio::test]
async fn test_reads_card_from_mock_companion() {
    let mock = spawn_mock(MockOptions {
        card_delay: Duration::from_millis(150),
        check_failures: 1,
        ..MockOptions::default()
    })
    .await;
    let policy = PollPolicy {
        interval: Duration::from_millis(50),
        max_attempts: 100,
    };
    let controller = ProximityReadController::new(Arc::new(client_for(&mock)), policy);

    let idm = controller.read(3).await.unwrap();

    assert_eq!(idm, IDM);
    let counters = mock.mock().counters();
    assert_eq!(counters.start_read.load(Ordering::SeqCst), 1);
    assert!(counters.check_read.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_mock_rejects_overlapping_reads() {
    let mock = spawn_mock(MockOptions {
        card_delay: Duration::from_secs(60),
        ..MockOptions::default()
    })
    .await;
    let client = client_for(&mock);

    client.start_read(10).await.unwrap();
    let err = client.start_read(10).await.unwrap_err();
    assert!(matches!(err, Error::ReadError(_)));

    let policy = PollPolicy {
        interval: Duration::from_millis(20),
        max_attempts: 5,
    };
    let controller = ProximityReadController::new(Arc::new(client), policy);
    assert!(matches!(controller.read(1).await, Err(Error::ReadError(_))));
}
