use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writer behind the logger: appends to the run log and optionally echoes to stderr.
pub struct RunLogWriter {
    file: File,
    echo: bool,
}

impl RunLogWriter {
    pub fn open(path: &Path, echo: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create log directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self { file, echo })
    }
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.echo {
            let _ = io::stderr().write_all(buf);
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Install the global logger. `RUST_LOG` overrides the default `debug` filter.
/// Falls back to stderr when the log file cannot be opened.
pub fn init(log_file: &Path, verbose: bool) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("debug"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}",
            buf.timestamp_seconds(),
            record.level(),
            record.args()
        )
    });

    let open_err = match RunLogWriter::open(log_file, verbose) {
        Ok(writer) => {
            builder.target(Target::Pipe(Box::new(writer)));
            None
        }
        Err(err) => {
            builder.target(Target::Stderr);
            Some(err)
        }
    };

    if builder.try_init().is_err() {
        return;
    }

    if let Some(err) = open_err {
        warn!("{:#}; logging to stderr instead", err);
    }
    info!("######### media_normalize {} started", env!("CARGO_PKG_VERSION"));
}
