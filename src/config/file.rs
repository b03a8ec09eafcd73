//! TOML configuration file loading
//!
//! Supports `~/.config/kiosk-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct KioskConfigFile {
    /// Companion device endpoints
    #[serde(default)]
    pub companion: CompanionFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Proximity card reader configuration
    #[serde(default)]
    pub proximity: ProximityFileConfig,
}

/// Companion device configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompanionFileConfig {
    /// Base URL (e.g. "http://raspberrypi.local:8000")
    pub url: Option<String>,

    /// Separate base URL for the card reader service, if it runs apart
    pub proximity_url: Option<String>,

    /// Health check timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Directory of the packaged acoustic model
    pub model_path: Option<PathBuf>,

    /// Platform recognizer executable
    pub native_command: Option<String>,

    /// Extra arguments for the platform recognizer
    pub native_args: Option<Vec<String>>,

    /// Keep the platform recognizer running across turns
    pub native_continuous: Option<bool>,

    /// BCP-47 language tag (e.g. "ja-JP")
    pub language: Option<String>,

    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Local synthesizer executables, tried in order
    pub local_commands: Option<Vec<String>>,

    /// Voice passed to the local synthesizer
    pub voice: Option<String>,
}

/// Proximity reader configuration
#[derive(Debug, Default, Deserialize)]
pub struct ProximityFileConfig {
    /// Status poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Maximum number of status polls per read
    pub max_attempts: Option<u32>,

    /// Default read timeout in seconds
    pub timeout_secs: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `KioskConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> KioskConfigFile {
    let Some(path) = config_file_path() else {
        return KioskConfigFile::default();
    };

    if !path.exists() {
        return KioskConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                KioskConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            KioskConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/kiosk-voice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kiosk-voice").join("config.toml"))
}
