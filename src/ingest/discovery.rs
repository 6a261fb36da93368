//! File discovery over a fetched source tree.
//!
//! Walks the tree, prunes vendored and generated directories, detects
//! the language per file, skips binaries and files over the size
//! threshold, and captures content plus a sha256 checksum.

use std::fs;
use std::io::Read;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::errors::Result;
use crate::lang::{self, Language};

/// Directory name patterns pruned from the walk.
const SKIP_DIR_PATTERNS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "build",
    "dist",
    "target",
    "*.egg-info",
];

static SKIP_DIRS: Lazy<GlobSet> = Lazy::new(|| {
    let mut builder = GlobSetBuilder::new();
    for pattern in SKIP_DIR_PATTERNS {
        builder.add(Glob::new(pattern).expect("invalid skip pattern"));
    }
    builder.build().expect("invalid skip set")
});

/// A source file accepted for ingestion.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// POSIX-normalised path relative to the tree root
    pub path: String,
    pub language: Language,
    pub byte_size: u64,
    pub line_count: usize,
    pub sha256: String,
    pub content: String,
}

/// Walk `root` and return every parseable source file.
pub fn discover(root: &Path, max_file_bytes: u64) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| !should_skip(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("walk error, skipping entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
        if metadata.len() > max_file_bytes {
            debug!("skipping oversized file: {}", entry.path().display());
            continue;
        }

        let mut head = [0u8; 8192];
        let head_len = match fs::File::open(entry.path()).and_then(|mut f| f.read(&mut head)) {
            Ok(n) => n,
            Err(e) => {
                debug!("cannot read {}: {e}", entry.path().display());
                continue;
            }
        };

        let Some(language) = lang::detect(entry.path(), &head[..head_len]) else {
            continue;
        };

        let bytes = match fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("cannot read {}: {e}", entry.path().display());
                continue;
            }
        };
        let sha256 = hex_digest(&bytes);
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let line_count = content.lines().count();

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(DiscoveredFile {
            path: relative,
            language,
            byte_size: metadata.len(),
            line_count,
            sha256,
            content,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn should_skip(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir() && SKIP_DIRS.is_match(Path::new(entry.file_name()))
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Most frequent language across discovered files, for repo metadata.
pub fn primary_language(files: &[DiscoveredFile]) -> Option<Language> {
    let mut counts: std::collections::HashMap<Language, usize> = std::collections::HashMap::new();
    for file in files {
        *counts.entry(file.language).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(language, count)| (*count, language.as_str().len()))
        .map(|(language, _)| language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discovery_finds_supported_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/app.py", b"def f(): pass\n");
        write(dir.path(), "lib/io.c", b"int x;\n");
        write(dir.path(), "PAYROLL.cbl", b"       PROGRAM-ID. PAYROLL.\n");
        write(dir.path(), "boot.s", b"_start:\n    ret\n");
        write(dir.path(), "README.md", b"# docs\n");

        let files = discover(dir.path(), 1024 * 1024).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["PAYROLL.cbl", "boot.s", "lib/io.c", "src/app.py"]);
    }

    #[test]
    fn test_vendored_dirs_pruned() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app.py", b"x = 1\n");
        write(dir.path(), ".git/config.py", b"ignored\n");
        write(dir.path(), "node_modules/dep/index.py", b"ignored\n");
        write(dir.path(), "pkg.egg-info/meta.py", b"ignored\n");

        let files = discover(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "app.py");
    }

    #[test]
    fn test_binary_and_oversized_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "blob.py", b"\x00\x01\x02binary");
        write(dir.path(), "big.py", "x = 1\n".repeat(200).as_bytes());
        write(dir.path(), "ok.py", b"x = 1\n");

        let files = discover(dir.path(), 64).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ok.py");
    }

    #[test]
    fn test_checksum_and_line_count() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", b"x = 1\ny = 2\n");

        let files = discover(dir.path(), 1024).unwrap();
        assert_eq!(files[0].line_count, 2);
        assert_eq!(files[0].sha256.len(), 64);
        assert_eq!(files[0].byte_size, 12);
    }

    #[test]
    fn test_primary_language() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", b"x = 1\n");
        write(dir.path(), "b.py", b"y = 2\n");
        write(dir.path(), "c.c", b"int z;\n");

        let files = discover(dir.path(), 1024).unwrap();
        assert_eq!(primary_language(&files), Some(Language::Python));
        assert_eq!(primary_language(&[]), None);
    }
}
