//! Configuration management
//!
//! Values resolve with priority: environment → config file → defaults.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use file::{KioskConfigFile, config_file_path, load_config_file};

/// Default companion base URL
pub const DEFAULT_COMPANION_URL: &str = "http://localhost:8000";

/// Default local synthesizers, tried in order
const DEFAULT_LOCAL_TTS: &[&str] = &["espeak-ng", "espeak", "say", "spd-say"];

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Companion device endpoints
    pub companion: CompanionConfig,

    /// Speech recognition
    pub recognition: RecognitionConfig,

    /// Speech synthesis
    pub synthesis: SynthesisConfig,

    /// Proximity card reader
    pub proximity: ProximityConfig,
}

/// Companion device configuration
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Base URL for health, speech and recognition endpoints
    pub url: String,

    /// Base URL for the card reader endpoints (defaults to `url`)
    pub proximity_url: Option<String>,

    /// Upper bound on a health check
    pub probe_timeout: Duration,

    /// Upper bound on any other companion request
    pub request_timeout: Duration,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Packaged acoustic model directory
    pub model_path: PathBuf,

    /// Platform recognizer executable (name or path)
    pub native_command: Option<String>,

    /// Extra arguments for the platform recognizer
    pub native_args: Vec<String>,

    /// Keep the platform recognizer running across turns
    pub native_continuous: bool,

    /// Language tag handed to platform facilities
    pub language: String,

    /// Capture processing hints
    pub capture: CaptureHints,
}

/// Best-effort capture processing requests
///
/// The host may ignore any of these; absence is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Local synthesizer executables, tried in order
    pub local_commands: Vec<String>,

    /// Voice passed to the local synthesizer
    pub voice: Option<String>,
}

/// Proximity reader configuration
#[derive(Debug, Clone, Copy)]
pub struct ProximityConfig {
    /// Interval between status polls
    pub poll_interval: Duration,

    /// Cap on status polls per read
    pub max_attempts: u32,

    /// Read timeout used when the caller doesn't give one
    pub default_timeout_secs: u32,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 60,
            default_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the process environment and config file
    #[must_use]
    pub fn load() -> Self {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an environment lookup
    #[must_use]
    pub fn from_sources<F>(file: KioskConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let companion = CompanionConfig {
            url: env("KIOSK_COMPANION_URL")
                .or(file.companion.url)
                .unwrap_or_else(|| DEFAULT_COMPANION_URL.to_string()),
            proximity_url: env("KIOSK_PROXIMITY_URL").or(file.companion.proximity_url),
            probe_timeout: Duration::from_millis(
                parse_env(&env, "KIOSK_PROBE_TIMEOUT_MS")
                    .or(file.companion.probe_timeout_ms)
                    .unwrap_or(3000),
            ),
            request_timeout: Duration::from_millis(
                file.companion.request_timeout_ms.unwrap_or(5000),
            ),
        };

        let recognition = RecognitionConfig {
            model_path: env("KIOSK_MODEL_PATH")
                .map(PathBuf::from)
                .or(file.recognition.model_path)
                .unwrap_or_else(default_model_path),
            native_command: env("KIOSK_NATIVE_STT").or(file.recognition.native_command),
            native_args: file.recognition.native_args.unwrap_or_default(),
            native_continuous: env("KIOSK_NATIVE_STT_CONTINUOUS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(file.recognition.native_continuous)
                .unwrap_or(false),
            language: env("KIOSK_LANGUAGE")
                .or(file.recognition.language)
                .unwrap_or_else(|| "ja-JP".to_string()),
            capture: CaptureHints {
                echo_cancellation: file.recognition.echo_cancellation.unwrap_or(true),
                noise_suppression: file.recognition.noise_suppression.unwrap_or(true),
                auto_gain_control: file.recognition.auto_gain_control.unwrap_or(true),
            },
        };

        let synthesis = SynthesisConfig {
            local_commands: env("KIOSK_LOCAL_TTS")
                .map(|v| vec![v])
                .or(file.synthesis.local_commands)
                .unwrap_or_else(|| DEFAULT_LOCAL_TTS.iter().map(ToString::to_string).collect()),
            voice: file.synthesis.voice,
        };

        let defaults = ProximityConfig::default();
        let proximity = ProximityConfig {
            poll_interval: parse_env(&env, "KIOSK_NFC_INTERVAL_MS")
                .or(file.proximity.poll_interval_ms)
                .filter(|ms| *ms > 0)
                .map_or(defaults.poll_interval, Duration::from_millis),
            max_attempts: parse_env(&env, "KIOSK_NFC_MAX_ATTEMPTS")
                .or(file.proximity.max_attempts)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            default_timeout_secs: parse_env(&env, "KIOSK_NFC_TIMEOUT_SECS")
                .or(file.proximity.timeout_secs)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.default_timeout_secs),
        };

        Self {
            companion,
            recognition,
            synthesis,
            proximity,
        }
    }

    /// Base URL for the card reader endpoints
    #[must_use]
    pub fn proximity_url(&self) -> &str {
        self.companion
            .proximity_url
            .as_deref()
            .unwrap_or(&self.companion.url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(KioskConfigFile::default(), |_| None)
    }
}

/// Default model location (`~/.local/share/kiosk-voice/models/...` on Linux)
fn default_model_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "kiosk-voice").map_or_else(
        || PathBuf::from("models/vosk-model-small-ja-0.22"),
        |d| d.data_dir().join("models").join("vosk-model-small-ja-0.22"),
    )
}

/// Parse a numeric environment value, ignoring garbage
fn parse_env<T, F>(env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid numeric setting");
            None
        }
    }
}
