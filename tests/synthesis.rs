//! Speech output integration tests

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiosk_voice::companion::{CompanionClient, MockOptions};
use kiosk_voice::synthesis::{RemoteSpeech, SpeechBackend};
use kiosk_voice::{CapabilityProbe, Result, SpeechOutputDispatcher, SynthesisEngine};

mod common;
use common::{client_for, spawn_mock};

/// Local synthesizer stand-in that records what it was asked to say
#[derive(Default)]
struct LocalRecorder {
    spoken: Mutex<Vec<String>>,
}

impl LocalRecorder {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechBackend for LocalRecorder {
    fn engine(&self) -> SynthesisEngine {
        SynthesisEngine::Local
    }

    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn cancel(&self) {}
}

fn dispatcher(
    client: &CompanionClient,
    local: &Arc<LocalRecorder>,
) -> SpeechOutputDispatcher {
    SpeechOutputDispatcher::new(
        Some(Arc::new(RemoteSpeech::new(client.clone()))),
        Some(local.clone()),
    )
}

#[tokio::test]
async fn test_remote_speaks_sanitized_text() {
    let mock = spawn_mock(MockOptions::default()).await;
    let client = client_for(&mock);
    let local = Arc::new(LocalRecorder::default());
    let dispatcher = dispatcher(&client, &local);

    dispatcher.initialize(&CapabilityProbe::new(Some(client))).await;
    assert_eq!(dispatcher.current_engine(), SynthesisEngine::Remote);

    let engine = dispatcher
        .speak("<p>受付は<b>2階</b>です🎉</p>")
        .await
        .unwrap();

    assert_eq!(engine, Some(SynthesisEngine::Remote));
    assert_eq!(mock.mock().spoken(), vec!["受付は2階です"]);
    assert!(local.spoken().is_empty());
}

#[tokio::test]
async fn test_remote_failure_falls_back_per_request() {
    let mock = spawn_mock(MockOptions {
        speak_fails: true,
        ..MockOptions::default()
    })
    .await;
    let client = client_for(&mock);
    let local = Arc::new(LocalRecorder::default());
    let dispatcher = dispatcher(&client, &local);
    dispatcher.initialize(&CapabilityProbe::new(Some(client))).await;

    let first = dispatcher.speak("いらっしゃいませ").await.unwrap();
    assert_eq!(first, Some(SynthesisEngine::Local));
    assert_eq!(mock.mock().counters().speak.load(Ordering::SeqCst), 1);

    // Still tries the companion first
    assert_eq!(dispatcher.current_engine(), SynthesisEngine::Remote);
    let second = dispatcher.speak("少々お待ちください").await.unwrap();
    assert_eq!(second, Some(SynthesisEngine::Local));
    assert_eq!(mock.mock().counters().speak.load(Ordering::SeqCst), 2);

    assert_eq!(
        local.spoken(),
        vec!["いらっしゃいませ", "少々お待ちください"]
    );
}

#[tokio::test]
async fn test_unreachable_companion_goes_local() {
    let client = CompanionClient::from_url("http://127.0.0.1:1").unwrap();
    let local = Arc::new(LocalRecorder::default());
    let dispatcher = dispatcher(&client, &local);

    dispatcher.initialize(&CapabilityProbe::new(Some(client))).await;
    assert_eq!(dispatcher.current_engine(), SynthesisEngine::Local);

    let engine = dispatcher.speak("こんにちは").await.unwrap();
    assert_eq!(engine, Some(SynthesisEngine::Local));
    assert_eq!(dispatcher.last_engine(), Some(SynthesisEngine::Local));
}
