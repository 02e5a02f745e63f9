use crate::classify::{ConversionRules, ProbeFailurePolicy};
use crate::command::CommandTemplates;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "MEDIA_NORMALIZE_CONFIG";
const APP_DIR: &str = "media-normalize";
const DEFAULT_LOG_FILE: &str = "media-normalize.log";

/// Where a configuration file was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Cli(path) | ConfigSource::Env(path) | ConfigSource::Default(path) => path,
        }
    }
}

/// Bitrates may be given as plain integers or as strings such as `"7M"`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BitrateSetting {
    Number(u64),
    Text(String),
}

impl BitrateSetting {
    pub fn bits_per_second(&self) -> Result<u64> {
        match self {
            BitrateSetting::Number(value) => Ok(*value),
            BitrateSetting::Text(text) => parse_bitrate(text).map_err(|err| anyhow!(err)),
        }
    }
}

/// On-disk configuration. Every key is optional; missing keys keep the
/// built-in default.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target_extension: Option<String>,
    pub watched_folders: Option<Vec<PathBuf>>,
    pub exclude: Option<Vec<String>>,
    pub max_video_bitrate: Option<BitrateSetting>,
    pub max_video_height: Option<u32>,
    pub video_codec: Option<String>,
    pub force_convert_extensions: Option<Vec<String>>,
    pub max_audio_channels: Option<u32>,
    pub audio_codec: Option<String>,
    pub encoder_base_command: Option<String>,
    pub video_encode_args: Option<String>,
    pub audio_encode_args: Option<String>,
    pub video_copy_args: Option<String>,
    pub audio_copy_args: Option<String>,
    pub delete_originals: Option<bool>,
    pub dry_run: Option<bool>,
    pub temp_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub on_probe_failure: Option<ProbeFailurePolicy>,
    pub mediainfo_path: Option<PathBuf>,
}

impl FileConfig {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }
}

/// Fully resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub watched_folders: Vec<PathBuf>,
    pub exclude: BTreeSet<String>,
    pub rules: ConversionRules,
    pub templates: CommandTemplates,
    pub delete_originals: bool,
    pub dry_run: bool,
    pub temp_file: Option<PathBuf>,
    pub log_file: PathBuf,
    pub mediainfo_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watched_folders: Vec::new(),
            exclude: BTreeSet::new(),
            rules: ConversionRules::default(),
            templates: CommandTemplates::default(),
            delete_originals: true,
            dry_run: false,
            temp_file: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            mediainfo_path: PathBuf::from("mediainfo"),
        }
    }
}

impl Settings {
    /// Overlay every key present in `cfg`.
    pub fn apply_file_config(&mut self, cfg: &FileConfig) -> Result<()> {
        if let Some(ext) = cfg.target_extension.as_deref() {
            self.rules.target_extension = normalize_extension(ext);
        }
        if let Some(folders) = cfg.watched_folders.as_ref() {
            self.watched_folders = folders.clone();
        }
        if let Some(exclude) = cfg.exclude.as_ref() {
            self.exclude = exclude.iter().cloned().collect();
        }
        if let Some(bitrate) = cfg.max_video_bitrate.as_ref() {
            self.rules.max_video_bitrate = bitrate
                .bits_per_second()
                .context("Invalid max_video_bitrate in configuration")?;
        }
        if let Some(height) = cfg.max_video_height {
            self.rules.max_video_height = height;
        }
        if let Some(codec) = cfg.video_codec.as_ref() {
            self.rules.video_codec = codec.clone();
        }
        if let Some(exts) = cfg.force_convert_extensions.as_ref() {
            self.rules.force_extensions = exts.iter().map(|e| normalize_extension(e)).collect();
        }
        if let Some(channels) = cfg.max_audio_channels {
            self.rules.max_audio_channels = channels;
        }
        if let Some(codec) = cfg.audio_codec.as_ref() {
            self.rules.audio_codec = codec.clone();
        }
        if let Some(base) = cfg.encoder_base_command.as_ref() {
            self.templates.base = base.clone();
        }
        if let Some(args) = cfg.video_encode_args.as_ref() {
            self.templates.video_encode = args.clone();
        }
        if let Some(args) = cfg.audio_encode_args.as_ref() {
            self.templates.audio_encode = args.clone();
        }
        if let Some(args) = cfg.video_copy_args.as_ref() {
            self.templates.video_copy = args.clone();
        }
        if let Some(args) = cfg.audio_copy_args.as_ref() {
            self.templates.audio_copy = args.clone();
        }
        if let Some(delete) = cfg.delete_originals {
            self.delete_originals = delete;
        }
        if let Some(dry_run) = cfg.dry_run {
            self.dry_run = dry_run;
        }
        if let Some(temp) = cfg.temp_file.as_ref() {
            self.temp_file = Some(temp.clone());
        }
        if let Some(log_file) = cfg.log_file.as_ref() {
            self.log_file = log_file.clone();
        }
        if let Some(policy) = cfg.on_probe_failure {
            self.rules.on_probe_failure = policy;
        }
        if let Some(mediainfo) = cfg.mediainfo_path.as_ref() {
            self.mediainfo_path = mediainfo.clone();
        }
        Ok(())
    }

    /// The shared temporary output every encode writes to.
    pub fn temp_output(&self) -> PathBuf {
        match &self.temp_file {
            Some(path) => path.clone(),
            None => env::temp_dir().join(format!(
                "media-normalize-temp.{}",
                self.rules.target_extension
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rules.target_extension.is_empty() {
            bail!("target_extension must not be empty");
        }
        if self.watched_folders.is_empty() {
            bail!("No folders to scan. Pass one or more FOLDER arguments or set watched_folders in the configuration file.");
        }
        if self.templates.base.trim().is_empty() {
            bail!("encoder_base_command must not be empty");
        }
        let temp = self.temp_output();
        if temp.to_string_lossy().contains('"') {
            bail!(
                "Temporary output path '{}' must not contain double quotes",
                temp.display()
            );
        }
        Ok(())
    }
}

/// Lower-cases and strips any leading dots.
pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Locate and parse the configuration file, if any.
pub fn load(path_override: Option<&Path>) -> Result<Option<(FileConfig, ConfigSource)>> {
    let mut candidates = Vec::new();

    if let Some(path) = path_override {
        if !path.exists() {
            bail!("Configuration file '{}' does not exist", path.display());
        }
        candidates.push(ConfigSource::Cli(path.to_path_buf()));
    } else {
        if let Some(env_path) = env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            candidates.push(ConfigSource::Env(PathBuf::from(env_path)));
        }
        candidates.extend(default_config_candidates().into_iter().map(ConfigSource::Default));
    }

    for candidate in candidates {
        let path = candidate.path();
        if path.as_os_str().is_empty() || !path.exists() {
            continue;
        }

        let contents = fs::read_to_string(path).with_context(|| {
            format!("Failed to read configuration file at {}", path.display())
        })?;
        let cfg = FileConfig::parse(&contents, path)?;
        return Ok(Some((cfg, candidate)));
    }

    Ok(None)
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let mut push_unique = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if !path.as_os_str().is_empty() && seen.insert(path.clone()) {
            out.push(path);
        }
    };

    if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME").filter(|val| !val.is_empty()) {
        let mut path = PathBuf::from(xdg_config);
        path.push(APP_DIR);
        path.push("config.toml");
        push_unique(path, &mut out);
    }

    if let Some(home) = env::var_os("HOME").filter(|val| !val.is_empty()) {
        let mut path = PathBuf::from(home);
        path.push(".config");
        path.push(APP_DIR);
        path.push("config.toml");
        push_unique(path, &mut out);
    }

    if let Ok(current_dir) = env::current_dir() {
        push_unique(current_dir.join(format!("{APP_DIR}.toml")), &mut out);
    }

    push_unique(PathBuf::from(format!("/etc/{APP_DIR}/config.toml")), &mut out);

    out
}

/// Parse a bitrate such as `7000000`, `7M`, `4800k` or `5.5mbps` into bits per second.
pub fn parse_bitrate(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("Bitrate value cannot be empty".to_string());
    }

    let lower = trimmed.to_ascii_lowercase().replace(' ', "");
    let mut split_idx = lower.len();
    for (idx, ch) in lower.char_indices() {
        if !(ch.is_ascii_digit() || ch == '.' || ch == ',' || ch == '_') {
            split_idx = idx;
            break;
        }
    }

    let (number_str, suffix) = lower.split_at(split_idx);
    if number_str.is_empty() {
        return Err(format!("Failed to parse bitrate '{}': missing number", input));
    }

    let numeric = number_str.replace([',', '_'], "");
    let value: f64 = numeric
        .parse()
        .map_err(|_| format!("Failed to parse bitrate '{}': invalid number", input))?;

    let mut normalized_suffix = suffix.to_string();
    for trailing in ["/s", "ps", "bps", "bits", "bit"] {
        if normalized_suffix.ends_with(trailing) {
            let new_len = normalized_suffix.len() - trailing.len();
            normalized_suffix.truncate(new_len);
        }
    }

    let multiplier = match normalized_suffix.as_str() {
        "" | "b" => 1u64,
        "k" | "kb" | "kbit" => 1_000,
        "m" | "mb" | "mbit" => 1_000_000,
        "g" | "gb" | "gbit" => 1_000_000_000,
        other => {
            return Err(format!(
                "Failed to parse bitrate '{}': unsupported suffix '{}'. Use plain numbers or k/m/g suffixes.",
                input, other
            ));
        }
    };

    let bits_per_second = (value * multiplier as f64).round();
    if bits_per_second <= 0.0 {
        return Err(format!(
            "Failed to parse bitrate '{}': value must be positive",
            input
        ));
    }

    Ok(bits_per_second as u64)
}
