use crate::config::ArtifactConfig;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Finds artifact files by name suffix
///
/// Scanning has no side effects: the same roots can be scanned any number of times,
/// from any number of tasks.
#[derive(Clone, Debug)]
pub struct ArtifactScanner {
    suffix: String,
    max_depth: usize,
}

impl ArtifactScanner {
    /// Create a scanner from configuration
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            suffix: config.suffix.to_ascii_lowercase(),
            max_depth: config.max_depth.max(1),
        }
    }

    /// Lazily yield every artifact file under `roots`
    ///
    /// Names are matched case-insensitively against the configured suffix. A depth of 1
    /// looks only at the files directly inside each root. Roots that do not exist yield
    /// nothing; unreadable entries are logged and skipped.
    pub fn scan<'a>(&'a self, roots: &'a [PathBuf]) -> impl Iterator<Item = PathBuf> + 'a {
        roots.iter().flat_map(move |root| self.scan_root(root))
    }

    fn scan_root<'a>(&'a self, root: &Path) -> impl Iterator<Item = PathBuf> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    // A missing root surfaces here on the first call
                    if e.io_error().map(|io| io.kind()) != Some(std::io::ErrorKind::NotFound) {
                        tracing::warn!(error = %e, "skipping unreadable scan entry");
                    }
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| self.matches(entry.file_name()))
            .map(|entry| entry.into_path())
    }

    fn matches(&self, name: &std::ffi::OsStr) -> bool {
        name.to_str()
            .is_some_and(|n| n.to_ascii_lowercase().ends_with(&self.suffix) && !n.starts_with('.'))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scanner(max_depth: usize) -> ArtifactScanner {
        ArtifactScanner::new(&ArtifactConfig {
            max_depth,
            ..ArtifactConfig::default()
        })
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"ply").unwrap();
    }

    #[test]
    fn finds_suffix_matches_case_insensitively() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.ply"));
        touch(&dir.path().join("B.PLY"));
        touch(&dir.path().join("photo.jpg"));
        touch(&dir.path().join("notes.ply.txt"));

        let roots = vec![dir.path().to_path_buf()];
        let found: Vec<_> = scanner(1).scan(&roots).collect();
        assert_eq!(found, vec![dir.path().join("B.PLY"), dir.path().join("a.ply")]);
    }

    #[test]
    fn depth_one_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("top.ply"));
        touch(&dir.path().join("nested").join("deep.ply"));

        let roots = vec![dir.path().to_path_buf()];
        assert_eq!(scanner(1).scan(&roots).count(), 1);
        assert_eq!(scanner(2).scan(&roots).count(), 2);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().join("absent")];
        assert_eq!(scanner(1).scan(&roots).count(), 0);
    }

    #[test]
    fn scan_is_repeatable_and_spans_roots() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        touch(&first.path().join("one.ply"));
        touch(&second.path().join("two.ply"));

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let scanner = scanner(1);
        let a: Vec<_> = scanner.scan(&roots).collect();
        let b: Vec<_> = scanner.scan(&roots).collect();
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn partial_uploads_are_not_artifacts() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join(".mesh.ply.1234.part"));
        touch(&dir.path().join(".hidden.ply"));

        let roots = vec![dir.path().to_path_buf()];
        assert_eq!(scanner(1).scan(&roots).count(), 0);
    }
}
