//! Source fetching: shallow clones and archive extraction.
//!
//! Both paths land in an exclusive scratch directory backed by
//! `tempfile::TempDir`, so temporary space is released on every exit
//! path, including errors and panics. Archive extraction rejects
//! absolute paths, `..` segments, symlinks, and submissions over the
//! configured uncompressed size cap.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use git2::FetchOptions;
use tempfile::TempDir;
use tracing::info;

use crate::core::errors::{KvasirError, Result};
use crate::core::models::{RepoSource, Repository};

/// A fetched source tree rooted in exclusive scratch space.
///
/// Dropping the value removes the scratch directory.
#[derive(Debug)]
pub struct FetchedTree {
    scratch: TempDir,
    /// Commit SHA for cloned repositories
    pub commit: Option<String>,
}

impl FetchedTree {
    /// Root of the fetched tree.
    pub fn root(&self) -> &Path {
        self.scratch.path()
    }
}

/// Clones remote repositories and unpacks uploaded archives.
pub struct SourceFetcher {
    scratch_root: PathBuf,
    size_cap: u64,
}

impl SourceFetcher {
    /// Create a fetcher writing under `scratch_root`.
    pub fn new(scratch_root: PathBuf, size_cap: u64) -> Self {
        Self {
            scratch_root,
            size_cap,
        }
    }

    /// Fetch the repository's source into scratch space.
    ///
    /// Blocking: run via `spawn_blocking` from async contexts.
    pub fn fetch(&self, repo: &Repository) -> Result<FetchedTree> {
        fs::create_dir_all(&self.scratch_root)?;
        let scratch = TempDir::with_prefix_in(format!("kvasir-{}-", repo.id), &self.scratch_root)?;

        let commit = match repo.source {
            RepoSource::Remote => {
                let url = repo.origin_url.as_deref().ok_or_else(|| {
                    KvasirError::validation_field("remote repository has no URL", "origin_url")
                })?;
                Some(self.clone_remote(url, repo.branch.as_deref(), scratch.path())?)
            }
            RepoSource::Upload => {
                let archive = repo.archive_path.as_deref().ok_or_else(|| {
                    KvasirError::validation_field("upload has no archive path", "archive_path")
                })?;
                self.extract_archive(Path::new(archive), scratch.path())?;
                None
            }
        };

        Ok(FetchedTree { scratch, commit })
    }

    /// Shallow-clone the requested branch; absent branches fail.
    fn clone_remote(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<String> {
        info!(url, ?branch, "cloning repository");

        let mut fetch_options = FetchOptions::new();
        fetch_options.depth(1);

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = branch {
            builder.branch(branch);
        }

        let cloned = builder.clone(url, dest)?;
        let head = cloned.head()?;
        let commit = head
            .peel_to_commit()
            .map(|c| c.id().to_string())
            .map_err(|e| KvasirError::validation(format!("clone has no commit: {e}")))?;

        // The work tree is what gets analysed; the .git directory only
        // inflates discovery.
        let _ = fs::remove_dir_all(dest.join(".git"));
        Ok(commit)
    }

    /// Unpack a zip archive with traversal and size guards.
    fn extract_archive(&self, archive_path: &Path, dest: &Path) -> Result<()> {
        info!(archive = %archive_path.display(), "extracting archive");

        let file = fs::File::open(archive_path).map_err(|e| {
            KvasirError::validation_field(format!("cannot open archive: {e}"), "archive_path")
        })?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut total_uncompressed: u64 = 0;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;

            // Zip-slip guard: enclosed_name rejects absolute paths and
            // `..` segments.
            let relative = entry.enclosed_name().ok_or_else(|| {
                KvasirError::validation_field(
                    format!("archive entry escapes the root: {}", entry.name()),
                    "archive",
                )
            })?;

            if is_symlink(&entry) {
                return Err(KvasirError::validation_field(
                    format!("archive contains a symlink: {}", entry.name()),
                    "archive",
                ));
            }

            total_uncompressed = total_uncompressed.saturating_add(entry.size());
            if total_uncompressed > self.size_cap {
                return Err(KvasirError::validation_field(
                    format!(
                        "uncompressed size exceeds the {} byte cap",
                        self.size_cap
                    ),
                    "archive",
                ));
            }

            let target = dest.join(&relative);
            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = fs::File::create(&target)?;
            // Copy with an explicit bound: the declared size has been
            // checked, but the stream is not trusted to match it.
            let mut limited = (&mut entry).take(self.size_cap);
            std::io::copy(&mut limited, &mut out)?;
        }

        Ok(())
    }
}

fn is_symlink(entry: &zip::read::ZipFile<'_>) -> bool {
    entry
        .unix_mode()
        .is_some_and(|mode| mode & 0o170000 == 0o120000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn fetcher(cap: u64) -> (SourceFetcher, TempDir) {
        let root = TempDir::new().unwrap();
        (SourceFetcher::new(root.path().to_path_buf(), cap), root)
    }

    fn write_zip(entries: &[(&str, &str)]) -> PathBuf {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upload.zip");
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        // Leak the dir so the archive survives until the test reads it.
        std::mem::forget(dir);
        path
    }

    fn upload_repo(archive: &Path) -> Repository {
        Repository {
            id: uuid::Uuid::new_v4(),
            name: "up".to_string(),
            source: RepoSource::Upload,
            origin_url: None,
            branch: None,
            archive_path: Some(archive.to_string_lossy().into_owned()),
            status: crate::core::models::RepoStatus::Pending,
            file_count: 0,
            symbol_count: 0,
            stars: None,
            primary_language: None,
            last_commit: None,
            error_message: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_extract_simple_archive() {
        let archive = write_zip(&[("src/app.py", "def f(): pass\n"), ("README", "hi\n")]);
        let (fetcher, _root) = fetcher(1024 * 1024);

        let tree = fetcher.fetch(&upload_repo(&archive)).unwrap();
        assert!(tree.root().join("src/app.py").exists());
        assert!(tree.root().join("README").exists());
        assert!(tree.commit.is_none());
    }

    #[test]
    fn test_scratch_released_on_drop() {
        let archive = write_zip(&[("a.py", "x = 1\n")]);
        let (fetcher, _root) = fetcher(1024 * 1024);

        let tree = fetcher.fetch(&upload_repo(&archive)).unwrap();
        let root_path = tree.root().to_path_buf();
        assert!(root_path.exists());
        drop(tree);
        assert!(!root_path.exists());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let archive = write_zip(&[("../escape.py", "evil\n")]);
        let (fetcher, _root) = fetcher(1024 * 1024);

        let err = fetcher.fetch(&upload_repo(&archive)).unwrap_err();
        assert!(matches!(err, KvasirError::Validation { .. }));
    }

    #[test]
    fn test_size_cap_enforced() {
        let big = "x".repeat(4096);
        let archive = write_zip(&[("big.py", &big)]);
        let (fetcher, _root) = fetcher(1024);

        let err = fetcher.fetch(&upload_repo(&archive)).unwrap_err();
        assert!(err.to_string().contains("cap"));
    }

    #[test]
    fn test_missing_archive_is_validation_error() {
        let (fetcher, _root) = fetcher(1024);
        let err = fetcher
            .fetch(&upload_repo(Path::new("/nonexistent/x.zip")))
            .unwrap_err();
        assert!(matches!(err, KvasirError::Validation { .. }));
    }
}
