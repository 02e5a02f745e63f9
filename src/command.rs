use crate::classify::{StreamDirective, StreamPlan};
use crate::error::CommandError;
use std::path::Path;

/// Fragments the encoder command line is assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    pub base: String,
    pub video_encode: String,
    pub audio_encode: String,
    pub video_copy: String,
    pub audio_copy: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            base: "ffmpeg -loglevel error -hide_banner -hwaccel auto -i".to_string(),
            video_encode: "-c:v libx264 -preset faster -crf 23 -vf \"scale=-1:'min(1080,ih)'\""
                .to_string(),
            audio_encode: "-c:a aac -ac 2 -b:a 192k".to_string(),
            video_copy: "-c:v copy".to_string(),
            audio_copy: "-c:a copy".to_string(),
        }
    }
}

impl CommandTemplates {
    fn video_segment(&self, directive: StreamDirective) -> &str {
        match directive {
            StreamDirective::Copy => self.video_copy.trim(),
            StreamDirective::Encode => self.video_encode.trim(),
        }
    }

    fn audio_segment(&self, directive: StreamDirective) -> &str {
        match directive {
            StreamDirective::Copy => self.audio_copy.trim(),
            StreamDirective::Encode => self.audio_encode.trim(),
        }
    }

    /// `<base> "<input>" <video> <audio> "<output>"`
    pub fn build(
        &self,
        input: &Path,
        plan: &StreamPlan,
        temp_output: &Path,
    ) -> Result<String, CommandError> {
        let input = quote(input)?;
        let output = quote(temp_output)?;
        let parts = [
            self.base.trim(),
            input.as_str(),
            self.video_segment(plan.video),
            self.audio_segment(plan.audio),
            output.as_str(),
        ];
        Ok(parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn quote(path: &Path) -> Result<String, CommandError> {
    let text = crate::scanner::normalize_path(path);
    if text.contains('"') {
        return Err(CommandError::QuoteInPath(text));
    }
    Ok(format!("\"{}\"", text))
}
