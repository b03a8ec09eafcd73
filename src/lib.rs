//! Kiosk Voice - Adaptive speech and proximity-card I/O for kiosk assistants
//!
//! This library provides the input/output edge of a kiosk assistant:
//! - Speech recognition that picks the best engine available at runtime
//!   (companion device, platform recognizer, or on-device model)
//! - Speech output through the companion's speaker or a local synthesizer
//! - Contactless card reads through the companion's reader
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Kiosk application                   │
//! └──────────┬──────────────────┬──────────────┬────────┘
//!            │                  │              │
//! ┌──────────▼─────────┐ ┌──────▼───────┐ ┌────▼────────┐
//! │ SpeechInput        │ │ SpeechOutput │ │ Proximity   │
//! │ Orchestrator       │ │ Dispatcher   │ │ Controller  │
//! │ Remote│Native│Emb. │ │ Remote│Local │ │ poll loop   │
//! └──────────┬─────────┘ └──────┬───────┘ └────┬────────┘
//!            │   CapabilityProbe │              │
//! ┌──────────▼──────────────────▼──────────────▼────────┐
//! │      Companion device (HTTP + WebSocket)  │ Mic/TTS  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod companion;
pub mod config;
pub mod error;
pub mod probe;
pub mod proximity;
pub mod recognition;
pub mod synthesis;

pub use config::Config;
pub use error::{Error, Result};
pub use probe::{CapabilityProbe, CapabilitySnapshot, Probe};
pub use proximity::{PollPolicy, ProximityDevice, ProximityReadController, ReadState};
pub use recognition::{
    RecognitionBackend, RecognitionEvent, SessionState, SpeechInputOrchestrator, Strategy,
};
pub use synthesis::{SpeechOutputDispatcher, SynthesisEngine};
