use std::process::Command;
use tracing::info;

use crate::error::{Result, SubtitleError};
use crate::scheduler::{JobCommand, ProcessCommand};
use super::{TranscriptionBackend, TranscriptionRequest};

/// `transcribe_anything` command-line program
pub struct TranscribeAnything {
    binary_path: String,
}

impl TranscribeAnything {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build the invocation for `request`; the card is chosen by the scheduler
    pub fn command(&self, request: &TranscriptionRequest) -> ProcessCommand {
        ProcessCommand::new(
            &self.binary_path,
            format!("Transcription of {}", request.source.display()),
        )
        .path_arg(&request.source)
        .arg("--device")
        .arg("cuda")
        .arg("--model")
        .arg(request.model.as_str())
        .arg("--language")
        .arg(&request.language)
        .arg("--output_dir")
        .path_arg(&request.output_dir)
        // scratch files land next to the transcript
        .current_dir(&request.output_dir)
    }
}

impl TranscriptionBackend for TranscribeAnything {
    fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("--help")
            .output()
            .map_err(|e| SubtitleError::Transcription(format!("{} not found: {}", self.binary_path, e)))?;

        if output.status.success() {
            info!("{} is available", self.binary_path);
            Ok(())
        } else {
            Err(SubtitleError::Transcription(format!("{} --help failed", self.binary_path)))
        }
    }

    fn job(&self, request: &TranscriptionRequest) -> Box<dyn JobCommand> {
        Box::new(self.command(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::WhisperModel;
    use std::path::PathBuf;

    #[test]
    fn test_command_arguments() {
        let backend = TranscribeAnything::new("transcribe_anything");
        let request = TranscriptionRequest {
            source: PathBuf::from("/videos/talk.mp4"),
            model: WhisperModel::Medium,
            language: "en".to_string(),
            output_dir: PathBuf::from("/videos/text_talk/en"),
        };

        let cmd = backend.command(&request);
        assert_eq!(
            cmd.args,
            vec![
                "/videos/talk.mp4",
                "--device",
                "cuda",
                "--model",
                "medium",
                "--language",
                "en",
                "--output_dir",
                "/videos/text_talk/en"
            ]
        );
        assert_eq!(cmd.current_dir, Some(PathBuf::from("/videos/text_talk/en")));
        assert_eq!(request.transcript_path(), PathBuf::from("/videos/text_talk/en/out.srt"));
    }
}
