//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;

use kiosk_voice::audio::CHUNK_FRAMES;
use kiosk_voice::companion::{CompanionClient, MockCompanion, MockHandle, MockOptions};

/// Start a mock companion on an ephemeral local port
pub async fn spawn_mock(options: MockOptions) -> MockHandle {
    MockCompanion::new(options)
        .spawn(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to start mock companion")
}

/// Client pointed at a running mock
#[must_use]
pub fn client_for(mock: &MockHandle) -> CompanionClient {
    CompanionClient::from_url(&mock.url()).expect("invalid mock url")
}

/// A quiet tone lasting exactly `chunks` chunks at 16 kHz
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tone(chunks: usize) -> Vec<f32> {
    (0..chunks * CHUNK_FRAMES)
        .map(|i| (i as f32 * 0.05).sin() * 0.2)
        .collect()
}
