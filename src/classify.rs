//! Decides whether a file needs converting and which streams to re-encode.

use crate::error::ProbeError;
use crate::probe::{MediaProbe, TrackDescriptor, TrackKind};
use crate::scanner::MediaFile;
use clap::ValueEnum;
use log::{debug, warn};
use serde::Deserialize;

/// What to do with a target-extension file whose metadata cannot be read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Leave the file alone.
    #[default]
    Skip,
    /// Queue the file and fully re-encode it.
    Convert,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StreamDirective {
    Copy,
    Encode,
}

/// Thresholds every file is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRules {
    pub target_extension: String,
    pub force_extensions: Vec<String>,
    pub max_video_bitrate: u64,
    pub max_video_height: u32,
    pub video_codec: String,
    pub max_audio_channels: u32,
    pub audio_codec: String,
    pub on_probe_failure: ProbeFailurePolicy,
}

impl Default for ConversionRules {
    fn default() -> Self {
        Self {
            target_extension: "mp4".to_string(),
            force_extensions: vec!["rmvb".to_string(), "mkv".to_string(), "avi".to_string()],
            max_video_bitrate: 7_000_000,
            max_video_height: 1080,
            video_codec: "AVC".to_string(),
            max_audio_channels: 2,
            audio_codec: "AAC".to_string(),
            on_probe_failure: ProbeFailurePolicy::Skip,
        }
    }
}

impl ConversionRules {
    pub fn is_forced(&self, file: &MediaFile) -> bool {
        file.extension()
            .is_some_and(|ext| self.force_extensions.iter().any(|forced| *forced == ext))
    }

    pub fn is_target(&self, file: &MediaFile) -> bool {
        file.extension()
            .is_some_and(|ext| ext == self.target_extension)
    }

    /// Reasons the video track breaks a threshold; empty when it conforms.
    pub fn video_violations(&self, track: &TrackDescriptor) -> Vec<String> {
        let mut reasons = Vec::new();
        let format = track.format.as_deref().unwrap_or("");
        if !format.starts_with(&self.video_codec) {
            reasons.push(format!(
                "video codec '{}' does not match required {}",
                format, self.video_codec
            ));
        }
        if let Some(bit_rate) = track.bit_rate {
            if bit_rate > self.max_video_bitrate {
                reasons.push(format!(
                    "video bitrate {} bps exceeds limit {} bps",
                    bit_rate, self.max_video_bitrate
                ));
            }
        }
        if let Some(height) = track.height {
            if height > self.max_video_height {
                reasons.push(format!(
                    "video height {} exceeds limit {}",
                    height, self.max_video_height
                ));
            }
        }
        reasons
    }

    /// Reasons the audio track breaks a threshold; empty when it conforms.
    pub fn audio_violations(&self, track: &TrackDescriptor) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(channels) = track.channels {
            if channels > self.max_audio_channels {
                reasons.push(format!(
                    "audio has {} channels, limit is {}",
                    channels, self.max_audio_channels
                ));
            }
        }
        let format = track.format.as_deref().unwrap_or("");
        if !format.starts_with(&self.audio_codec) {
            reasons.push(format!(
                "audio codec '{}' does not match required {}",
                format, self.audio_codec
            ));
        }
        reasons
    }
}

/// Per-stream directives plus the reasons behind them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPlan {
    pub video: StreamDirective,
    pub audio: StreamDirective,
    pub reasons: Vec<String>,
}

impl Default for StreamPlan {
    fn default() -> Self {
        Self {
            video: StreamDirective::Copy,
            audio: StreamDirective::Copy,
            reasons: Vec::new(),
        }
    }
}

impl StreamPlan {
    fn encode_everything(reason: String) -> Self {
        Self {
            video: StreamDirective::Encode,
            audio: StreamDirective::Encode,
            reasons: vec![reason],
        }
    }

    pub fn any_encode(&self) -> bool {
        self.video == StreamDirective::Encode || self.audio == StreamDirective::Encode
    }
}

/// Promote each stream type to `Encode` when any of its tracks breaks a threshold.
pub fn classify_tracks(tracks: &[TrackDescriptor], rules: &ConversionRules) -> StreamPlan {
    let mut plan = StreamPlan::default();
    for track in tracks {
        match track.kind {
            TrackKind::Video => {
                let reasons = rules.video_violations(track);
                if !reasons.is_empty() {
                    plan.video = StreamDirective::Encode;
                    plan.reasons.extend(reasons);
                }
            }
            TrackKind::Audio => {
                let reasons = rules.audio_violations(track);
                if !reasons.is_empty() {
                    plan.audio = StreamDirective::Encode;
                    plan.reasons.extend(reasons);
                }
            }
            TrackKind::Other(_) => {}
        }
    }
    plan
}

/// Outcome of classifying one file with a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub needs_conversion: bool,
    pub plan: StreamPlan,
}

impl Assessment {
    fn skip() -> Self {
        Self {
            needs_conversion: false,
            plan: StreamPlan::default(),
        }
    }
}

pub struct Classifier<'a, P> {
    rules: &'a ConversionRules,
    prober: P,
}

impl<'a, P: MediaProbe> Classifier<'a, P> {
    pub fn new(rules: &'a ConversionRules, prober: P) -> Self {
        Self { rules, prober }
    }

    pub fn rules(&self) -> &ConversionRules {
        self.rules
    }

    /// Forced extensions always convert; target-extension files convert when
    /// any stream breaks a threshold; everything else is left alone.
    pub fn needs_conversion(&self, file: &MediaFile) -> bool {
        if self.rules.is_forced(file) {
            return true;
        }
        if !self.rules.is_target(file) {
            return false;
        }
        match self.prober.probe(file.path()) {
            Ok(tracks) => classify_tracks(&tracks, self.rules).any_encode(),
            Err(err) => self.probe_failed(file, &err) == ProbeFailurePolicy::Convert,
        }
    }

    /// Copy/Copy unless a stream breaks its thresholds.
    pub fn classify_streams(&self, file: &MediaFile) -> StreamPlan {
        match self.prober.probe(file.path()) {
            Ok(tracks) => classify_tracks(&tracks, self.rules),
            Err(err) => self.plan_for_probe_failure(file, &err),
        }
    }

    /// `needs_conversion` and `classify_streams` sharing one probe.
    pub fn assess(&self, file: &MediaFile) -> Assessment {
        let forced = self.rules.is_forced(file);
        if !forced && !self.rules.is_target(file) {
            return Assessment::skip();
        }

        let plan = match self.prober.probe(file.path()) {
            Ok(tracks) => classify_tracks(&tracks, self.rules),
            Err(err) => {
                let policy = self.probe_failed(file, &err);
                if !forced && policy == ProbeFailurePolicy::Skip {
                    return Assessment::skip();
                }
                self.plan_for_probe_failure(file, &err)
            }
        };

        let needs_conversion = forced || plan.any_encode();
        if needs_conversion {
            debug!(
                "{} queued (video: {:?}, audio: {:?})",
                file.display(),
                plan.video,
                plan.audio
            );
        }
        Assessment {
            needs_conversion,
            plan,
        }
    }

    fn probe_failed(&self, file: &MediaFile, err: &ProbeError) -> ProbeFailurePolicy {
        warn!("Unable to read metadata for {}: {}", file.display(), err);
        self.rules.on_probe_failure
    }

    fn plan_for_probe_failure(&self, file: &MediaFile, err: &ProbeError) -> StreamPlan {
        match self.rules.on_probe_failure {
            ProbeFailurePolicy::Skip => StreamPlan::default(),
            ProbeFailurePolicy::Convert => StreamPlan::encode_everything(format!(
                "metadata for {} could not be read: {}",
                file.display(),
                err
            )),
        }
    }
}
