//! Runs encoder command lines through the platform shell.

use crate::error::EncodeError;
use log::{debug, info, warn};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Shared flag flipped by the signal handler. Also tracks the process group
/// of the encoder currently running so a forced shutdown can reach it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    active_group: Arc<AtomicI32>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Process group of the running encoder, if any.
    pub fn active_group(&self) -> Option<i32> {
        match self.active_group.load(Ordering::SeqCst) {
            0 => None,
            pgid => Some(pgid),
        }
    }

    fn set_active_group(&self, pgid: i32) {
        self.active_group.store(pgid, Ordering::SeqCst);
    }

    fn clear_active_group(&self) {
        self.active_group.store(0, Ordering::SeqCst);
    }

    /// SIGKILL the running encoder's process group, skipping the grace period.
    pub fn kill_active(&self) {
        if let Some(pgid) = self.active_group() {
            warn!("Killing encoder process group {}", pgid);
            kill_group(pgid, Signal::Kill);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Success,
    Failed { code: Option<i32> },
    Cancelled,
}

/// Something that can run one encoder command to completion.
pub trait EncodeRunner {
    fn run(&self, command: &str, cancel: &CancelToken) -> Result<EncodeOutcome, EncodeError>;
}

impl<R: EncodeRunner + ?Sized> EncodeRunner for &R {
    fn run(&self, command: &str, cancel: &CancelToken) -> Result<EncodeOutcome, EncodeError> {
        (**self).run(command, cancel)
    }
}

/// Runs commands with `sh -c` (`cmd /C` on Windows), logging every output line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl EncodeRunner for ShellRunner {
    fn run(&self, command: &str, cancel: &CancelToken) -> Result<EncodeOutcome, EncodeError> {
        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // the child leads its own group, so its pid is the pgid
        cancel.set_active_group(child.id() as i32);

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(log_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(log_lines(stderr, "stderr"));
        }

        let outcome = supervise(&mut child, cancel);
        cancel.clear_active_group();
        for reader in readers {
            let _ = reader.join();
        }

        let outcome = outcome?;
        debug!("Convert returned: {:?}", outcome);
        Ok(outcome)
    }
}

fn supervise(child: &mut Child, cancel: &CancelToken) -> Result<EncodeOutcome, EncodeError> {
    loop {
        if let Some(status) = child.try_wait().map_err(EncodeError::Wait)? {
            return Ok(if status.success() {
                EncodeOutcome::Success
            } else {
                EncodeOutcome::Failed {
                    code: status.code(),
                }
            });
        }
        if cancel.is_cancelled() {
            terminate(child)?;
            return Ok(EncodeOutcome::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Ask the encoder to stop, then kill it once the grace period runs out.
fn terminate(child: &mut Child) -> Result<(), EncodeError> {
    info!("Stopping encoder (pid {})", child.id());
    signal_group(child, Signal::Term);

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if child.try_wait().map_err(EncodeError::Wait)?.is_some() {
            // the shell may be gone while something it started ignored SIGTERM
            #[cfg(unix)]
            kill_group(child.id() as i32, Signal::Kill);
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    warn!("Encoder did not exit after SIGTERM; killing it");
    signal_group(child, Signal::Kill);
    if let Err(err) = child.kill() {
        if err.kind() != ErrorKind::InvalidInput {
            return Err(EncodeError::Wait(err));
        }
    }
    child.wait().map_err(EncodeError::Wait)?;
    Ok(())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    // own process group so the encoder can be signalled as a unit
    cmd.process_group(0);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    kill_group(child.id() as i32, signal);
}

#[cfg(windows)]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_group(pgid: i32, signal: Signal) {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) with a negative pid only signals the process group we created.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signo) };
    if rc != 0 {
        debug!(
            "Failed to signal encoder process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

// Windows children have no process group to signal.
#[cfg(windows)]
fn kill_group(_pgid: i32, _signal: Signal) {}

fn log_lines<R: Read + Send + 'static>(stream: R, label: &'static str) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.split(b'\n') {
            match line {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let text = text.trim_end();
                    if !text.is_empty() {
                        debug!("[encoder {}] {}", label, text);
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// Best-effort removal of a stale temporary output.
pub fn remove_stale_output(path: &Path) {
    if !path.exists() {
        return;
    }
    info!("Deleting {}", path.display());
    if let Err(err) = std::fs::remove_file(path) {
        warn!(
            "There was an issue deleting {}: {}",
            path.display(),
            err
        );
    }
}
