// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Discovers the candidate paths for a poll cycle.
pub trait FileFinder: Send {
    /// List the paths that should be tailed right now.
    fn find_files(&self) -> Result<Vec<PathBuf>>;
}

/// GlobFileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct GlobFileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl GlobFileFinder {
    /// Create a new finder, rejecting malformed patterns up front.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }
}

impl FileFinder for GlobFileFinder {
    fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    // Unreadable directory entries should not hide the rest
                    Err(e) => {
                        tracing::debug!(path = ?e.path(), "Skipping unreadable glob entry: {}", e);
                        continue;
                    }
                };

                if path.is_dir() {
                    continue;
                }

                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["test1.log", "test2.log", "other.txt", "ignored.log"] {
            fs::write(dir.path().join(name), format!("content of {}", name)).unwrap();
        }
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_finder_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/ignored.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![include], vec![exclude]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(
            !files
                .iter()
                .any(|p| p.file_name().unwrap() == "ignored.log")
        );
    }

    #[test]
    fn test_finder_no_duplicates() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern.clone(), pattern], vec![]).unwrap();

        assert_eq!(finder.find_files().unwrap().len(), 3);
    }

    #[test]
    fn test_finder_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested.log")).unwrap();
        fs::write(dir.path().join("real.log"), "x").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files, vec![dir.path().join("real.log")]);
    }

    #[test]
    fn test_finder_discovers_new_files() {
        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        assert!(finder.find_files().unwrap().is_empty());

        fs::write(dir.path().join("first.log"), "first log entry").unwrap();
        assert_eq!(finder.find_files().unwrap().len(), 1);
    }

    #[test]
    fn test_finder_invalid_pattern() {
        let result = GlobFileFinder::new(vec!["/var/log/[".to_string()], vec![]);
        assert!(matches!(result, Err(Error::InvalidGlob(_))));

        let result = GlobFileFinder::new(vec!["/var/log/*.log".to_string()], vec!["[".into()]);
        assert!(matches!(result, Err(Error::InvalidGlob(_))));
    }
}
