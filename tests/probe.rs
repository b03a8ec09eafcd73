//! Capability probe integration tests

use std::time::{Duration, Instant};

use kiosk_voice::companion::{CompanionClient, MockOptions};
use kiosk_voice::config::CompanionConfig;
use kiosk_voice::{CapabilityProbe, Probe};
use tokio::net::TcpListener;

mod common;
use common::{client_for, spawn_mock};

#[tokio::test]
async fn test_reachable_companion() {
    let mock = spawn_mock(MockOptions::default()).await;
    let snapshot = CapabilityProbe::new(Some(client_for(&mock))).probe().await;

    assert!(snapshot.companion_reachable);
    assert!(snapshot.companion_recognizer);
    assert!(snapshot.remote_recognition());
}

#[tokio::test]
async fn test_companion_without_recognizer() {
    let mock = spawn_mock(MockOptions {
        recognizer_available: false,
        ..MockOptions::default()
    })
    .await;
    let snapshot = CapabilityProbe::new(Some(client_for(&mock))).probe().await;

    assert!(snapshot.companion_reachable);
    assert!(!snapshot.companion_recognizer);
    assert!(!snapshot.remote_recognition());
}

#[tokio::test]
async fn test_silent_companion_times_out() {
    // Accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = CompanionClient::new(&CompanionConfig {
        url: format!("http://{addr}"),
        proximity_url: None,
        probe_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_secs(30),
    })
    .unwrap();

    let started = Instant::now();
    let snapshot = CapabilityProbe::new(Some(client)).probe().await;

    assert!(!snapshot.companion_reachable);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_refused_connection() {
    let client = CompanionClient::from_url("http://127.0.0.1:1").unwrap();
    let snapshot = CapabilityProbe::new(Some(client)).probe().await;

    assert!(!snapshot.companion_reachable);
    assert!(!snapshot.companion_recognizer);
}

#[cfg(unix)]
#[tokio::test]
async fn test_native_recognizer_on_path() {
    let snapshot = CapabilityProbe::new(None)
        .with_native_command(Some("sh".to_string()))
        .probe()
        .await;

    assert!(snapshot.native_supported);
}
