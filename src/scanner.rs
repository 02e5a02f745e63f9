//! Directory walk producing candidate media files.

use log::{info, warn};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A discovered file. Paths are kept with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    path: PathBuf,
}

impl MediaFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: PathBuf::from(normalize_path(path.as_ref())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn display(&self) -> std::path::Display<'_> {
        self.path.display()
    }
}

impl fmt::Display for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Files found under the roots plus how many entries could not be read.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<MediaFile>,
    pub errors: usize,
}

/// Walk every root, skipping directories whose name is in `exclude`.
/// Unreadable entries and missing roots are logged and counted.
pub fn scan(roots: &[PathBuf], exclude: &BTreeSet<String>) -> ScanResult {
    let mut result = ScanResult::default();

    for root in roots {
        let root = absolute(root);
        info!("Searching for files in {}", normalize_path(&root));
        if !root.exists() {
            warn!("Scan root {} does not exist, skipping", root.display());
            result.errors += 1;
            continue;
        }

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !exclude.contains(name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error walking directory: {}", err);
                    result.errors += 1;
                    continue;
                }
            };
            // links are not followed, but a link to a regular file still counts
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if is_file {
                result.files.push(MediaFile::new(entry.path()));
            }
        }
    }

    result
}

pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn names(result: &ScanResult, root: &Path) -> Vec<String> {
        let root = normalize_path(root);
        result
            .files
            .iter()
            .map(|f| {
                normalize_path(f.path())
                    .trim_start_matches(&root)
                    .trim_start_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn excluded_names_are_pruned_at_every_depth() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a/movie.mkv"));
        touch(&root.join("a/Extras/bonus.mkv"));
        touch(&root.join("Extras/trailer.mkv"));
        touch(&root.join("b/c/Extras/deep.mkv"));
        touch(&root.join("b/c/episode.mp4"));
        // only directory names are excluded, not files
        touch(&root.join("b/Extras"));

        let exclude: BTreeSet<String> = ["Extras".to_string()].into();
        let result = scan(&[root.to_path_buf()], &exclude);

        assert_eq!(
            names(&result, root),
            vec!["a/movie.mkv", "b/Extras", "b/c/episode.mp4"]
        );
        assert_eq!(result.errors, 0);
    }

    #[test]
    fn order_is_stable_across_runs_and_roots() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        touch(&first.join("z.mkv"));
        touch(&first.join("a.mkv"));
        touch(&second.join("m.avi"));

        let roots = vec![second.clone(), first.clone()];
        let one = scan(&roots, &BTreeSet::new());
        let two = scan(&roots, &BTreeSet::new());
        assert_eq!(one.files, two.files);
        assert!(one.files[0].path().ends_with("m.avi"));
        assert!(one.files[1].path().ends_with("a.mkv"));
        assert!(one.files[2].path().ends_with("z.mkv"));
    }

    #[test]
    fn missing_root_is_counted_not_fatal() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("ok.mkv"));
        let roots = vec![dir.path().join("gone"), dir.path().to_path_buf()];
        let result = scan(&roots, &BTreeSet::new());
        assert_eq!(result.errors, 1);
        assert_eq!(result.files.len(), 1);
    }

    #[test]
    fn media_file_normalizes_separators_and_extension() {
        let file = MediaFile::new(Path::new("C:\\media\\Movie.MKV"));
        assert_eq!(normalize_path(file.path()), "C:/media/Movie.MKV");
        assert_eq!(file.extension().as_deref(), Some("mkv"));
        assert_eq!(MediaFile::new("/m/noext").extension(), None);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_listed() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store");
        let lib = dir.path().join("lib");
        touch(&store.join("real.mkv"));
        fs::create_dir_all(&lib).unwrap();
        std::os::unix::fs::symlink(store.join("real.mkv"), lib.join("linked.mkv")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.mkv"), lib.join("dangling.mkv")).unwrap();

        let result = scan(&[lib.clone()], &BTreeSet::new());
        assert_eq!(names(&result, &lib), vec!["linked.mkv"]);
    }

    #[test]
    fn emitted_paths_are_absolute() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("x.mkv"));
        let result = scan(&[dir.path().to_path_buf()], &BTreeSet::new());
        assert!(result.files.iter().all(|f| f.path().is_absolute()));
    }
}
