//! Config/Template Writer
//!
//! Persists file content handed over by stages (make.conf fragments,
//! package.use overrides, fstab entries, timezone). Stages supply only the
//! semantic content from `templates`; this module owns the file I/O.

use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Writes configuration files on behalf of stages.
pub trait ConfigWriter {
    /// Replace the file's content, creating parent directories as needed.
    fn write(&mut self, path: &Path, content: &str) -> Result<()>;

    /// Append to the file, creating it (and parents) if missing.
    fn append(&mut self, path: &Path, content: &str) -> Result<()>;

    /// Whether `path` exists (used to pick between target and host paths).
    fn exists(&self, path: &Path) -> bool;
}

/// Writer backed by the real filesystem.
#[derive(Debug, Default)]
pub struct FsWriter {
    dry_run: bool,
}

impl FsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log-only writer for `--dry-run`.
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    fn prepare(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl ConfigWriter for FsWriter {
    fn write(&mut self, path: &Path, content: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!(path = %path.display(), bytes = content.len(), "[DRY RUN] write skipped");
            return Ok(());
        }
        self.prepare(path)?;
        fs::write(path, content)?;
        tracing::info!(path = %path.display(), "wrote file");
        Ok(())
    }

    fn append(&mut self, path: &Path, content: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!(path = %path.display(), bytes = content.len(), "[DRY RUN] append skipped");
            return Ok(());
        }
        self.prepare(path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())?;
        tracing::info!(path = %path.display(), "appended to file");
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("etc/portage/package.use/00cpu-flags");

        let mut writer = FsWriter::new();
        writer.write(&path, "*/* CPU_FLAGS_X86: sse2\n").expect("write");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "*/* CPU_FLAGS_X86: sse2\n"
        );
        assert!(writer.exists(&path));
    }

    #[test]
    fn test_append_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("make.conf");

        let mut writer = FsWriter::new();
        writer.append(&path, "A=1\n").expect("first");
        writer.append(&path, "B=2\n").expect("second");

        assert_eq!(fs::read_to_string(&path).expect("read"), "A=1\nB=2\n");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("etc/timezone");

        let mut writer = FsWriter::dry_run();
        writer.write(&path, "Europe/Berlin\n").expect("dry write");
        assert!(!path.exists());
    }
}
