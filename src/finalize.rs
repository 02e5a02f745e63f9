//! Swaps a successful encode into the library.

use crate::error::FinalizeError;
use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the encoded output should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputName {
    /// `<source stem>.<target ext>`; replaces the original when originals are deleted.
    Replace(PathBuf),
    /// A fresh name chosen because the plain target would collide with the kept original.
    Disambiguated(PathBuf),
}

impl OutputName {
    pub fn path(&self) -> &Path {
        match self {
            OutputName::Replace(path) | OutputName::Disambiguated(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub output: PathBuf,
    pub source_removed: bool,
}

/// `movie.mkv` -> `movie.mp4`.
pub fn target_path(source: &Path, target_extension: &str) -> PathBuf {
    source.with_extension(target_extension)
}

/// Decide the output name. With originals kept, a target equal to the source
/// (or already occupied) gets a `.new` marker, numbered until it is free.
pub fn output_name(source: &Path, target_extension: &str, delete_originals: bool) -> OutputName {
    let target = target_path(source, target_extension);
    if delete_originals || (target != source && !target.exists()) {
        return OutputName::Replace(target);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("output"));
    let parent = source.parent().unwrap_or_else(|| Path::new(""));

    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            format!("{stem}.new.{target_extension}")
        } else {
            format!("{stem}.new.{attempt}.{target_extension}")
        };
        let candidate = parent.join(name);
        if candidate != source && !candidate.exists() {
            return OutputName::Disambiguated(candidate);
        }
        attempt += 1;
    }
}

/// Delete the original when asked, then move the encoded output into place.
/// A failed delete is logged and does not stop the rename.
pub fn finalize(
    source: &Path,
    temp_output: &Path,
    target_extension: &str,
    delete_originals: bool,
) -> Result<Finalized, FinalizeError> {
    let name = output_name(source, target_extension, delete_originals);

    // never drop the original when there is nothing to replace it with
    if !temp_output.is_file() {
        return Err(FinalizeError::Rename {
            from: temp_output.to_path_buf(),
            to: name.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "encoded output is missing"),
        });
    }

    let mut source_removed = false;
    if delete_originals {
        match delete(source) {
            Ok(()) => source_removed = true,
            Err(err) => warn!("{}", err),
        }
    }

    move_file(temp_output, name.path())?;
    Ok(Finalized {
        output: name.path().to_path_buf(),
        source_removed,
    })
}

pub fn delete(path: &Path) -> Result<(), FinalizeError> {
    info!("Deleting {}", path.display());
    fs::remove_file(path).map_err(|source| FinalizeError::Delete {
        path: path.to_path_buf(),
        source,
    })
}

/// Rename, falling back to copy + remove when the paths are on different filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<(), FinalizeError> {
    info!("Moving {} to {}", from.display(), to.display());
    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if !from.exists() {
        return Err(FinalizeError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: rename_err,
        });
    }

    warn!(
        "Rename of {} failed ({}); copying instead",
        from.display(),
        rename_err
    );
    fs::copy(from, to).map_err(|source| FinalizeError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    if let Err(err) = fs::remove_file(from) {
        warn!("There was an issue deleting {}: {}", from.display(), err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn target_path_replaces_only_the_last_extension() {
        assert_eq!(
            target_path(Path::new("/m/show.s01e01.mkv"), "mp4"),
            PathBuf::from("/m/show.s01e01.mp4")
        );
        assert_eq!(target_path(Path::new("/m/noext"), "mp4"), PathBuf::from("/m/noext.mp4"));
    }

    #[test]
    fn delete_then_rename_replaces_original() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        let temp = dir.path().join("temp.mp4");
        fs::write(&source, b"original").unwrap();
        fs::write(&temp, b"encoded").unwrap();

        let done = finalize(&source, &temp, "mp4", true).unwrap();

        assert!(!source.exists());
        assert!(!temp.exists());
        assert_eq!(done.output, dir.path().join("movie.mp4"));
        assert!(done.source_removed);
        assert_eq!(fs::read(&done.output).unwrap(), b"encoded");
    }

    #[test]
    fn same_name_is_overwritten_when_deleting_originals() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let temp = dir.path().join("temp.mp4");
        fs::write(&source, b"original").unwrap();
        fs::write(&temp, b"encoded").unwrap();

        let done = finalize(&source, &temp, "mp4", true).unwrap();
        assert_eq!(done.output, source);
        assert_eq!(fs::read(&source).unwrap(), b"encoded");
    }

    #[test]
    fn kept_original_with_same_name_gets_a_distinct_output() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let temp = dir.path().join("temp.mp4");
        fs::write(&source, b"original").unwrap();
        fs::write(&temp, b"encoded").unwrap();

        let done = finalize(&source, &temp, "mp4", false).unwrap();

        assert_ne!(done.output, source);
        assert_eq!(done.output, dir.path().join("clip.new.mp4"));
        assert_eq!(fs::read(&source).unwrap(), b"original");
        assert_eq!(fs::read(&done.output).unwrap(), b"encoded");
        assert!(!done.source_removed);
    }

    #[test]
    fn disambiguation_skips_names_already_taken() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, b"original").unwrap();
        fs::write(dir.path().join("clip.new.mp4"), b"previous run").unwrap();

        let name = output_name(&source, "mp4", false);
        assert_eq!(
            name,
            OutputName::Disambiguated(dir.path().join("clip.new.2.mp4"))
        );
    }

    #[test]
    fn kept_original_with_other_extension_renames_directly() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.avi");
        let temp = dir.path().join("temp.mp4");
        fs::write(&source, b"original").unwrap();
        fs::write(&temp, b"encoded").unwrap();

        let done = finalize(&source, &temp, "mp4", false).unwrap();
        assert_eq!(done.output, dir.path().join("movie.mp4"));
        assert!(source.exists());
    }

    #[test]
    fn failed_delete_does_not_abort_rename() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("vanished.mkv");
        let temp = dir.path().join("temp.mp4");
        fs::write(&temp, b"encoded").unwrap();

        let done = finalize(&source, &temp, "mp4", true).unwrap();
        assert!(!done.source_removed);
        assert!(dir.path().join("vanished.mp4").exists());
    }

    #[test]
    fn missing_temp_output_is_a_rename_error() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"original").unwrap();

        let err = finalize(&source, &dir.path().join("absent.mp4"), "mp4", true).unwrap_err();
        assert!(matches!(err, FinalizeError::Rename { .. }));
        assert!(source.exists());
    }
}
