//! Track metadata via `mediainfo --Output=JSON`.

use crate::error::ProbeError;
use log::debug;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other(String),
}

impl TrackKind {
    fn from_label(label: &str) -> Self {
        match label {
            "Video" => TrackKind::Video,
            "Audio" => TrackKind::Audio,
            other => TrackKind::Other(other.to_string()),
        }
    }
}

/// One stream inside a media file, as reported by the prober.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub kind: TrackKind,
    pub format: Option<String>,
    pub bit_rate: Option<u64>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
}

impl TrackDescriptor {
    pub fn video(format: &str, bit_rate: u64, height: u32) -> Self {
        Self {
            kind: TrackKind::Video,
            format: Some(format.to_string()),
            bit_rate: Some(bit_rate),
            height: Some(height),
            channels: None,
        }
    }

    pub fn audio(format: &str, channels: u32) -> Self {
        Self {
            kind: TrackKind::Audio,
            format: Some(format.to_string()),
            bit_rate: None,
            height: None,
            channels: Some(channels),
        }
    }
}

/// Source of track metadata for a file.
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError>;
}

impl<P: MediaProbe + ?Sized> MediaProbe for &P {
    fn probe(&self, path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError> {
        (**self).probe(path)
    }
}

/// Runs the `mediainfo` CLI and decodes its JSON report.
#[derive(Debug, Clone)]
pub struct MediaInfoProbe {
    program: PathBuf,
}

impl MediaInfoProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for MediaInfoProbe {
    fn default() -> Self {
        Self::new("mediainfo")
    }
}

impl MediaProbe for MediaInfoProbe {
    fn probe(&self, path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError> {
        debug!("Calculating MediaInfo for: {}", path.display());
        let output = Command::new(&self.program)
            .arg("--Output=JSON")
            .arg(path)
            .output()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    ProbeError::ToolNotFound(self.program.display().to_string())
                } else {
                    ProbeError::Io {
                        path: path.to_path_buf(),
                        source: err,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(ProbeError::ToolFailed {
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_mediainfo_json(path, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct MediaInfoOutput {
    media: Option<MediaInfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoMedia {
    #[serde(default)]
    track: Vec<MediaInfoTrack>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoTrack {
    #[serde(rename = "@type")]
    track_type: String,
    #[serde(rename = "Format")]
    format: Option<String>,
    #[serde(rename = "BitRate")]
    bit_rate: Option<String>,
    #[serde(rename = "Height")]
    height: Option<String>,
    #[serde(rename = "Channels")]
    channels: Option<String>,
}

/// Decode a mediainfo JSON report. A report without any video or audio
/// track is treated as unparseable.
pub fn parse_mediainfo_json(path: &Path, raw: &[u8]) -> Result<Vec<TrackDescriptor>, ProbeError> {
    let unparseable = |reason: String| ProbeError::Unparseable {
        path: path.to_path_buf(),
        reason,
    };

    let output: MediaInfoOutput =
        serde_json::from_slice(raw).map_err(|err| unparseable(err.to_string()))?;
    let media = output
        .media
        .ok_or_else(|| unparseable("report has no media section".to_string()))?;

    let tracks: Vec<TrackDescriptor> = media
        .track
        .into_iter()
        .map(|track| TrackDescriptor {
            kind: TrackKind::from_label(&track.track_type),
            format: track.format,
            bit_rate: track.bit_rate.as_deref().and_then(parse_numeric),
            height: track.height.as_deref().and_then(parse_numeric),
            channels: track.channels.as_deref().and_then(parse_numeric),
        })
        .collect();

    if !tracks
        .iter()
        .any(|t| matches!(t.kind, TrackKind::Video | TrackKind::Audio))
    {
        return Err(unparseable("no video or audio tracks".to_string()));
    }

    Ok(tracks)
}

// mediainfo reports numbers as strings, sometimes with a unit suffix
// ("1080 pixels") or as a list for multi-layout fields ("6 / 2").
fn parse_numeric<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.split(['/', ' '])
        .find(|part| !part.is_empty())
        .and_then(|n| n.trim().parse().ok())
}
