//! Local synthesizer process

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{SpeechBackend, SynthesisEngine};
use crate::probe::find_executable;
use crate::{Error, Result};

/// Speaks by running a synthesizer executable (`espeak-ng`, `say`, ...)
///
/// At most one utterance plays at a time; a new one kills the previous.
#[derive(Debug)]
pub struct CommandSpeech {
    program: PathBuf,
    voice: Option<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    #[must_use]
    pub const fn new(program: PathBuf, voice: Option<String>) -> Self {
        Self {
            program,
            voice,
            current: Mutex::const_new(None),
        }
    }

    /// Use the first candidate found on this machine
    #[must_use]
    pub fn detect(candidates: &[String], voice: Option<String>) -> Option<Self> {
        let program = candidates.iter().find_map(|c| find_executable(c))?;
        tracing::debug!(program = %program.display(), "local synthesizer found");
        Some(Self::new(program, voice))
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether an utterance is still playing
    pub async fn is_speaking(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Arguments for the known synthesizers; unknown ones just get the text
fn build_args(program: &Path, voice: Option<&str>, text: &str) -> Vec<String> {
    let name = program
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let mut args = Vec::new();
    if let Some(voice) = voice {
        match name {
            "espeak" | "espeak-ng" | "say" => {
                args.push("-v".to_string());
                args.push(voice.to_string());
            }
            "spd-say" => {
                args.push("-l".to_string());
                args.push(voice.to_string());
            }
            _ => {}
        }
    }
    args.push(text.to_string());
    args
}

#[async_trait]
impl SpeechBackend for CommandSpeech {
    fn engine(&self) -> SynthesisEngine {
        SynthesisEngine::Local
    }

    async fn speak(&self, text: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(mut previous) = current.take() {
            let _ = previous.kill().await;
        }

        let child = Command::new(&self.program)
            .args(build_args(&self.program, self.voice.as_deref(), text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Tts(format!(
                    "failed to run {}: {e}",
                    self.program.display()
                ))
            })?;

        *current = Some(child);
        Ok(())
    }

    async fn cancel(&self) {
        if let Some(mut child) = self.current.lock().await.take() {
            let _ = child.kill().await;
            tracing::debug!("local speech cancelled");
        }
    }

    async fn wait(&self) {
        let child = self.current.lock().await.take();
        if let Some(mut child) = child
            && let Err(e) = child.wait().await
        {
            tracing::warn!(error = %e, "local synthesizer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_espeak_voice_args() {
        assert_eq!(
            build_args(Path::new("/usr/bin/espeak-ng"), Some("ja"), "こんにちは"),
            vec!["-v", "ja", "こんにちは"]
        );
    }

    #[test]
    fn test_spd_say_language() {
        assert_eq!(
            build_args(Path::new("spd-say"), Some("ja"), "はい"),
            vec!["-l", "ja", "はい"]
        );
    }

    #[test]
    fn test_unknown_program_gets_text_only() {
        assert_eq!(
            build_args(Path::new("/opt/tts/speak"), Some("ja"), "はい"),
            vec!["はい"]
        );
    }

    #[test]
    fn test_detect_skips_missing() {
        let candidates = vec!["kiosk-voice-no-such-tts".to_string()];
        assert!(CommandSpeech::detect(&candidates, None).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_utterance_replaces_previous() {
        let Some(program) = find_executable("sleep") else {
            return;
        };
        let speech = CommandSpeech::new(program, None);

        speech.speak("30").await.unwrap();
        assert!(speech.is_speaking().await);

        speech.speak("30").await.unwrap();
        assert!(speech.is_speaking().await);

        speech.cancel().await;
        assert!(!speech.is_speaking().await);
    }
}
