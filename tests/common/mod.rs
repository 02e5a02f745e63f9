#![allow(dead_code)]

use assert_cmd::prelude::*;
use std::error::Error;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Prints `<fixtures>/<basename>.json`, or a report mediainfo gives for unknown data.
const FAKE_MEDIAINFO: &str = r#"#!/bin/sh
for last; do :; done
name=$(basename "$last")
if [ -f "__FIXTURES__/$name.json" ]; then
    cat "__FIXTURES__/$name.json"
else
    echo '{"media": null}'
fi
"#;

/// Records its arguments, fails for inputs containing "broken", otherwise
/// writes a marker into the output path (the last argument).
const FAKE_ENCODER: &str = r#"#!/bin/sh
echo "$*" >> "__CALLS__"
input=""
prev=""
for arg; do
    if [ "$prev" = "-i" ]; then input="$arg"; fi
    prev="$arg"
    last="$arg"
done
echo "fake encoder reading $input" >&2
case "$input" in
    *broken*) echo "cannot decode $input" >&2; exit 1 ;;
esac
printf 'encoded:%s' "$(basename "$input")" > "$last"
"#;

/// Like the fake encoder, but writes a partial output, records its pid and
/// keeps running. With `__IGNORE_TERM__` set to `trap '' TERM` it also
/// ignores SIGTERM (the ignore survives the exec).
const SLOW_ENCODER: &str = r#"#!/bin/sh
echo "$*" >> "__CALLS__"
for arg; do last="$arg"; done
printf 'partial' > "$last"
__IGNORE_TERM__
echo $$ > "__PIDFILE__"
exec sleep 30
"#;

pub struct Sandbox {
    pub tmp: TempDir,
    pub library: PathBuf,
    pub fixtures: PathBuf,
    pub calls: PathBuf,
    pub temp_output: PathBuf,
    pub log_file: PathBuf,
    pub config: PathBuf,
    mediainfo: PathBuf,
    encoder: PathBuf,
}

impl Sandbox {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let tmp = TempDir::new()?;
        let root = tmp.path().to_path_buf();
        let library = root.join("library");
        let fixtures = root.join("fixtures");
        let bin = root.join("bin");
        fs::create_dir_all(&library)?;
        fs::create_dir_all(&fixtures)?;
        fs::create_dir_all(&bin)?;

        let calls = root.join("encoder-calls.txt");
        let mediainfo = bin.join("fake-mediainfo");
        let encoder = bin.join("fake-ffmpeg");
        write_script(
            &mediainfo,
            &FAKE_MEDIAINFO.replace("__FIXTURES__", &fixtures.to_string_lossy()),
        )?;
        write_script(
            &encoder,
            &FAKE_ENCODER.replace("__CALLS__", &calls.to_string_lossy()),
        )?;

        let sandbox = Self {
            library,
            fixtures,
            calls,
            temp_output: root.join("work").join("temp.mp4"),
            log_file: root.join("logs").join("media-normalize.log"),
            config: root.join("config.toml"),
            mediainfo,
            encoder,
            tmp,
        };
        fs::create_dir_all(sandbox.temp_output.parent().unwrap())?;
        sandbox.write_config("")?;
        Ok(sandbox)
    }

    /// Config pointing the encoder at the stub script, plus `extra` TOML lines.
    pub fn write_config(&self, extra: &str) -> Result<(), Box<dyn Error>> {
        let contents = format!(
            "encoder_base_command = \"{} -i\"\n{}",
            self.encoder.display(),
            extra
        );
        fs::write(&self.config, contents)?;
        Ok(())
    }

    /// Swap the encoder for one that blocks; returns the file its pid lands in.
    pub fn use_slow_encoder(&self, ignore_term: bool) -> Result<PathBuf, Box<dyn Error>> {
        let pid_file = self.tmp.path().join("encoder.pid");
        let script = self.tmp.path().join("bin").join("slow-ffmpeg");
        let body = SLOW_ENCODER
            .replace("__CALLS__", &self.calls.to_string_lossy())
            .replace("__PIDFILE__", &pid_file.to_string_lossy())
            .replace("__IGNORE_TERM__", if ignore_term { "trap '' TERM" } else { "" });
        write_script(&script, &body)?;
        fs::write(
            &self.config,
            format!("encoder_base_command = \"{} -i\"\n", script.display()),
        )?;
        Ok(pid_file)
    }

    /// Create a media file in the library, with an optional mediainfo report.
    pub fn add_media(&self, relative: &str, report: Option<String>) -> Result<PathBuf, Box<dyn Error>> {
        let path = self.library.join(relative);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, format!("original:{relative}"))?;
        if let Some(report) = report {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            fs::write(self.fixtures.join(format!("{name}.json")), report)?;
        }
        Ok(path)
    }

    /// The binary with every path redirected into the sandbox.
    pub fn command(&self) -> Result<Command, Box<dyn Error>> {
        let mut cmd = Command::cargo_bin("media_normalize")?;
        cmd.current_dir(self.tmp.path())
            .env_remove("MEDIA_NORMALIZE_CONFIG")
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("RUST_LOG")
            .env("HOME", self.tmp.path())
            .arg("--config-file")
            .arg(&self.config)
            .arg("--mediainfo")
            .arg(&self.mediainfo)
            .arg("--temp-file")
            .arg(&self.temp_output)
            .arg("--log-file")
            .arg(&self.log_file)
            .arg(&self.library);
        Ok(cmd)
    }

    pub fn encoder_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.library.join(relative)).unwrap_or_default()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.library.join(relative).exists()
    }

    pub fn log(&self) -> String {
        fs::read_to_string(&self.log_file).unwrap_or_default()
    }
}

fn write_script(path: &Path, body: &str) -> Result<(), Box<dyn Error>> {
    fs::write(path, body)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// A mediainfo JSON report with one video and one audio track.
pub fn report(video: (&str, u64, u32), audio: (&str, u32)) -> String {
    format!(
        r#"{{"media": {{"@ref": "x", "track": [
  {{"@type": "General", "Format": "MPEG-4"}},
  {{"@type": "Video", "Format": "{}", "BitRate": "{}", "Height": "{}"}},
  {{"@type": "Audio", "Format": "{}", "Channels": "{}"}}
]}}}}"#,
        video.0, video.1, video.2, audio.0, audio.1
    )
}

pub fn conforming_report() -> String {
    report(("AVC", 5_000_000, 720), ("AAC", 2))
}
