//! Companion device access
//!
//! The companion is the local network peer that hosts the streaming
//! recognizer, a speaker and the proximity card reader.

mod client;
pub mod mock;
pub mod types;

pub use client::{CompanionClient, PollReply};
pub use mock::{MockCompanion, MockHandle, MockOptions};
pub use types::{CheckReadResponse, HealthResponse, ReaderStatus, StreamMessage};
