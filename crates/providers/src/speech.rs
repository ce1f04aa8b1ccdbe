//! Speech input via a local transcription command.
//!
//! Audio arrives as a recorded file and a whisper-style CLI turns it
//! into text. The command gets the audio path as its only argument and
//! must print the transcript on stdout.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("transcription service unreachable: {0}")]
    ServiceUnreachable(String),
    #[error("transcription failed: {0}")]
    Other(String),
}

/// Source of transcribed user speech.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String, SpeechError>;
}

/// Transcriber that shells out to a local speech-to-text command.
pub struct CommandTranscriber {
    program: String,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String, SpeechError> {
        let output = Command::new(&self.program)
            .arg(audio)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SpeechError::ServiceUnreachable(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Other(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(SpeechError::NoSpeech);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_missing_program_is_unreachable() {
        let t = CommandTranscriber::new("definitely-not-a-real-transcriber");
        let err = t.transcribe(&PathBuf::from("audio.wav")).await.unwrap_err();
        assert!(matches!(err, SpeechError::ServiceUnreachable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_output_reads_as_no_speech() {
        // `true` exits zero and prints nothing
        let t = CommandTranscriber::new("true");
        let err = t.transcribe(&PathBuf::from("audio.wav")).await.unwrap_err();
        assert!(matches!(err, SpeechError::NoSpeech));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_becomes_transcript() {
        // echo stands in for a real transcriber
        let t = CommandTranscriber::new("echo");
        let text = t.transcribe(&PathBuf::from("sort a list")).await.unwrap();
        assert_eq!(text, "sort a list");
    }
}
