use anyhow::{Context, Result};
use clap::{value_parser, Parser};
use log::{info, warn};
use media_normalize::config::{self, normalize_extension, parse_bitrate, ConfigSource, Settings};
use media_normalize::executor::remove_stale_output;
use media_normalize::pipeline::{FileOutcome, RunSummary, EXIT_CANCELLED};
use media_normalize::{CancelToken, MediaInfoProbe, Pipeline, ProbeFailurePolicy, ShellRunner};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folders to scan (overrides watched_folders from the configuration file)
    #[arg(value_parser = value_parser!(PathBuf), value_name = "FOLDER")]
    folders: Vec<PathBuf>,

    /// Path to the configuration file
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    config_file: Option<PathBuf>,

    /// Subdirectory names to skip at any depth (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',', value_name = "NAME")]
    exclude: Option<Vec<String>>,

    /// Container extension every converted file ends up with (e.g. mp4, m4v)
    #[arg(long = "target-extension", value_name = "EXTENSION")]
    target_extension: Option<String>,

    /// Extensions that are always converted (comma separated or repeated)
    #[arg(long = "force-extension", value_delimiter = ',', value_name = "EXTENSION")]
    force_extensions: Option<Vec<String>>,

    /// Maximum video bitrate before re-encoding (e.g. 7M, 4800k, 5.5mbps)
    #[arg(long, value_parser = parse_bitrate)]
    max_video_bitrate: Option<u64>,

    /// Maximum video height in lines before re-encoding
    #[arg(long)]
    max_video_height: Option<u32>,

    /// Required video codec prefix as reported by mediainfo (e.g. AVC)
    #[arg(long)]
    video_codec: Option<String>,

    /// Maximum audio channel count before re-encoding
    #[arg(long)]
    max_audio_channels: Option<u32>,

    /// Required audio codec prefix as reported by mediainfo (e.g. AAC)
    #[arg(long)]
    audio_codec: Option<String>,

    /// Delete the source file after a successful conversion. Pass --delete-originals=false to keep sources.
    #[arg(
        long = "delete-originals",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    delete_originals: Option<bool>,

    /// Only print the encoder commands that would run
    #[arg(
        long = "dry-run",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    dry_run: Option<bool>,

    /// Shared temporary file every encode writes to
    #[arg(long = "temp-file", value_parser = value_parser!(PathBuf))]
    temp_file: Option<PathBuf>,

    /// Append-only run log
    #[arg(long = "log-file", value_parser = value_parser!(PathBuf))]
    log_file: Option<PathBuf>,

    /// mediainfo executable used to read track metadata
    #[arg(long = "mediainfo", value_parser = value_parser!(PathBuf))]
    mediainfo: Option<PathBuf>,

    /// What to do with target-extension files whose metadata cannot be read
    #[arg(long = "on-probe-failure", value_enum)]
    on_probe_failure: Option<ProbeFailurePolicy>,

    /// Mirror log lines to stderr
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn apply_to(&self, settings: &mut Settings) {
        if !self.folders.is_empty() {
            settings.watched_folders = self.folders.clone();
        }
        if let Some(exclude) = self.exclude.as_ref() {
            settings.exclude = exclude.iter().cloned().collect();
        }
        if let Some(ext) = self.target_extension.as_deref() {
            settings.rules.target_extension = normalize_extension(ext);
        }
        if let Some(exts) = self.force_extensions.as_ref() {
            settings.rules.force_extensions = exts.iter().map(|e| normalize_extension(e)).collect();
        }
        if let Some(bitrate) = self.max_video_bitrate {
            settings.rules.max_video_bitrate = bitrate;
        }
        if let Some(height) = self.max_video_height {
            settings.rules.max_video_height = height;
        }
        if let Some(codec) = self.video_codec.as_ref() {
            settings.rules.video_codec = codec.clone();
        }
        if let Some(channels) = self.max_audio_channels {
            settings.rules.max_audio_channels = channels;
        }
        if let Some(codec) = self.audio_codec.as_ref() {
            settings.rules.audio_codec = codec.clone();
        }
        if let Some(delete) = self.delete_originals {
            settings.delete_originals = delete;
        }
        if let Some(dry_run) = self.dry_run {
            settings.dry_run = dry_run;
        }
        if let Some(temp) = self.temp_file.as_ref() {
            settings.temp_file = Some(temp.clone());
        }
        if let Some(log_file) = self.log_file.as_ref() {
            settings.log_file = log_file.clone();
        }
        if let Some(mediainfo) = self.mediainfo.as_ref() {
            settings.mediainfo_path = mediainfo.clone();
        }
        if let Some(policy) = self.on_probe_failure {
            settings.rules.on_probe_failure = policy;
        }
    }
}

fn resolve_settings(args: &Args) -> Result<(Settings, Option<ConfigSource>)> {
    let mut settings = Settings::default();
    let loaded = config::load(args.config_file.as_deref())?;
    let source = match loaded {
        Some((cfg, source)) => {
            settings
                .apply_file_config(&cfg)
                .with_context(|| format!("Invalid configuration in {}", source.path().display()))?;
            Some(source)
        }
        None => None,
    };
    args.apply_to(&mut settings);
    settings.validate()?;
    Ok((settings, source))
}

/// First signal: cancel and let the pipeline stop the encoder gracefully.
/// Second signal: kill the encoder group, drop the temp output and exit.
fn install_signal_handler(cancel: &CancelToken, settings: &Settings) {
    let token = cancel.clone();
    let temp_output = (!settings.dry_run).then(|| settings.temp_output());
    let result = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            token.kill_active();
            if let Some(temp) = temp_output.as_deref() {
                remove_stale_output(temp);
            }
            log::logger().flush();
            process::exit(EXIT_CANCELLED);
        }
        println!("\nReceived termination signal, stopping after cleanup...");
        token.cancel();
    });
    if let Err(err) = result {
        warn!("Failed to install signal handler: {}", err);
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "[Media Check] Execution took {} ms",
        summary.convert_duration.as_millis()
    );
    println!(
        "Scanned {} files ({} unreadable entries), skipped {}, queued {}, converted {}, failed {}",
        summary.scanned,
        summary.scan_errors,
        summary.scanned.saturating_sub(summary.queued),
        summary.queued,
        summary.converted(),
        summary.failed()
    );
    for report in &summary.reports {
        match &report.outcome {
            FileOutcome::Converted(done) => {
                info!("Converted {} -> {}", report.file, done.output.display())
            }
            FileOutcome::EncodeFailed { code: Some(code) } => {
                println!("  failed: {} (exit status {})", report.file, code)
            }
            FileOutcome::EncodeFailed { code: None } => {
                println!("  failed: {} (encoder did not finish)", report.file)
            }
            FileOutcome::FinalizeFailed(reason) | FileOutcome::Rejected(reason) => {
                println!("  failed: {} ({})", report.file, reason)
            }
            FileOutcome::Planned(_) | FileOutcome::Cancelled => {}
        }
    }
    if summary.cancelled {
        println!("Run cancelled before all files were processed.");
    }

    let commands = summary.commands();
    if !commands.is_empty() {
        println!();
        for command in commands {
            println!("{}", command);
        }
    }
}

fn main() -> Result<()> {
    // clap exits with 2 on usage errors, which is reserved for failed files
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            process::exit(1);
        }
        Err(err) => err.exit(),
    };
    let (settings, source) = resolve_settings(&args)?;

    media_normalize::logging::init(&settings.log_file, args.verbose);
    match &source {
        Some(ConfigSource::Env(path)) => info!(
            "Loaded configuration from '{}' (via {}).",
            path.display(),
            config::CONFIG_ENV_VAR
        ),
        Some(source) => info!("Loaded configuration from '{}'.", source.path().display()),
        None => info!("No configuration file found; using defaults and CLI flags."),
    }
    if settings.dry_run {
        info!("Dry run: no encoder will be started and no file will be changed.");
    }

    let cancel = CancelToken::new();
    install_signal_handler(&cancel, &settings);

    let pipeline = Pipeline::new(
        &settings,
        MediaInfoProbe::new(&settings.mediainfo_path),
        ShellRunner,
        cancel,
    );
    let summary = pipeline.run();
    print_summary(&summary);

    let code = summary.exit_code();
    info!("Run finished with exit code {}", code);
    log::logger().flush();
    process::exit(code);
}
