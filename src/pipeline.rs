//! Scan, classify, encode and finalize, one file at a time.

use crate::classify::{Classifier, StreamPlan};
use crate::config::Settings;
use crate::executor::{remove_stale_output, CancelToken, EncodeOutcome, EncodeRunner};
use crate::finalize::{self, Finalized};
use crate::probe::MediaProbe;
use crate::scanner::{self, MediaFile};
use log::{debug, error, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURES: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Dry-run: the command that would have been executed.
    Planned(String),
    Converted(Finalized),
    EncodeFailed { code: Option<i32> },
    FinalizeFailed(String),
    Rejected(String),
    Cancelled,
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileOutcome::EncodeFailed { .. } | FileOutcome::FinalizeFailed(_) | FileOutcome::Rejected(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub file: MediaFile,
    pub plan: StreamPlan,
    pub outcome: FileOutcome,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub scanned: usize,
    pub scan_errors: usize,
    pub queued: usize,
    pub reports: Vec<FileReport>,
    pub cancelled: bool,
    pub scan_duration: Duration,
    pub convert_duration: Duration,
}

impl RunSummary {
    /// Dry-run commands in queue order.
    pub fn commands(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter_map(|report| match &report.outcome {
                FileOutcome::Planned(cmd) => Some(cmd.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn converted(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, FileOutcome::Converted(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.failed() > 0 {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }
}

pub struct Pipeline<'a, P, R> {
    settings: &'a Settings,
    prober: P,
    runner: R,
    cancel: CancelToken,
}

impl<'a, P: MediaProbe, R: EncodeRunner> Pipeline<'a, P, R> {
    pub fn new(settings: &'a Settings, prober: P, runner: R, cancel: CancelToken) -> Self {
        Self {
            settings,
            prober,
            runner,
            cancel,
        }
    }

    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        let started = Instant::now();
        let queue = self.scan(&mut summary);
        summary.scan_duration = started.elapsed();
        say(format!(
            "[Directory Scan] Execution took {} ms",
            summary.scan_duration.as_millis()
        ));
        info!("=====Scan Complete=====");
        say(format!(
            "Total files scanned: {}, queued for conversion: {}",
            summary.scanned, summary.queued
        ));

        let started = Instant::now();
        let temp_output = self.settings.temp_output();
        for (file, plan) in queue {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let outcome = self.process(&file, &plan, &temp_output);
            if outcome == FileOutcome::Cancelled {
                summary.cancelled = true;
            }
            summary.reports.push(FileReport {
                file,
                plan,
                outcome,
            });
            if summary.cancelled {
                break;
            }
        }
        summary.convert_duration = started.elapsed();

        if summary.cancelled {
            warn!("Run cancelled; remaining files were not processed");
        }
        summary
    }

    fn scan(&self, summary: &mut RunSummary) -> Vec<(MediaFile, StreamPlan)> {
        let mut scan = scanner::scan(&self.settings.watched_folders, &self.settings.exclude);
        // a temp output left behind inside a watched folder is not library media
        let temp = MediaFile::new(scanner::absolute(&self.settings.temp_output()));
        scan.files.retain(|file| {
            let keep = *file != temp;
            if !keep {
                debug!("Ignoring temporary output {}", file);
            }
            keep
        });
        summary.scanned = scan.files.len();
        summary.scan_errors = scan.errors;

        let classifier = Classifier::new(&self.settings.rules, &self.prober);
        let mut queue = Vec::new();
        for file in scan.files {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let assessment = classifier.assess(&file);
            if !assessment.needs_conversion {
                continue;
            }
            if assessment.plan.reasons.is_empty() {
                say(format!("Queued {} (remux only)", file));
            } else {
                say(format!("Queued {}: {}", file, assessment.plan.reasons.join("; ")));
            }
            queue.push((file, assessment.plan));
        }
        summary.queued = queue.len();
        queue
    }

    fn process(&self, file: &MediaFile, plan: &StreamPlan, temp_output: &Path) -> FileOutcome {
        let command = match self.settings.templates.build(file.path(), plan, temp_output) {
            Ok(command) => command,
            Err(err) => {
                error!("Skipping {}: {}", file, err);
                return FileOutcome::Rejected(err.to_string());
            }
        };

        if self.settings.dry_run {
            return FileOutcome::Planned(command);
        }

        remove_stale_output(temp_output);
        say(format!("Encoding {}", file));
        info!("Running: {}", command);

        match self.runner.run(&command, &self.cancel) {
            Ok(EncodeOutcome::Success) => {
                say("File processed successfully".to_string());
                match finalize::finalize(
                    file.path(),
                    temp_output,
                    &self.settings.rules.target_extension,
                    self.settings.delete_originals,
                ) {
                    Ok(done) => FileOutcome::Converted(done),
                    Err(err) => {
                        error!("{}", err);
                        FileOutcome::FinalizeFailed(err.to_string())
                    }
                }
            }
            Ok(EncodeOutcome::Failed { code }) => {
                let code_text = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                error!("Encoding {} failed (exit status {})", file, code_text);
                say(format!("Convert failed for {}", file));
                FileOutcome::EncodeFailed { code }
            }
            Ok(EncodeOutcome::Cancelled) => {
                remove_stale_output(temp_output);
                FileOutcome::Cancelled
            }
            Err(err) => {
                error!("{}", err);
                FileOutcome::EncodeFailed { code: None }
            }
        }
    }
}

fn say(message: String) {
    println!("{}", message);
    info!("{}", message);
}
