//! Collaborator interfaces the buffer core consumes, and the owning
//! context record that bundles them.
//!
//! Everything here is an interface to machinery that lives outside this
//! workspace: the diagnostics manager, the unsaved-files store used by
//! out-of-process tooling, per-file settings, filesystem metadata, language
//! detection, and the version-control layer. The buffer talks to all of
//! them through `Rc<dyn ...>` handles on a single thread.

use std::{
  io,
  path::Path,
  rc::Rc,
  sync::Arc,
  time::SystemTime,
};

use async_trait::async_trait;
use crucible_core::{
  DiagnosticSet,
  FileId,
};
use crucible_vcs::ChangeMonitor;
use ropey::Rope;
use tokio_util::sync::CancellationToken;

use crate::{
  buffer::BufferId,
  extension::{
    ExtensionRegistry,
    LanguageId,
  },
};

/// Publishes per-file diagnostic sets under monotonically increasing
/// sequence numbers. The buffer compares sequence numbers before pulling to
/// skip redundant reapplication.
pub trait DiagnosticsManager {
  fn sequence_for_file(&self, file: &FileId) -> u64;
  fn diagnostics_for_file(&self, file: &FileId) -> Arc<DiagnosticSet>;
}

/// Receives the latest buffer content for files with unsaved edits, keyed
/// by file identity. Compilers and linters read from here instead of disk.
pub trait UnsavedFilesStore {
  fn update(&self, file: &FileId, content: &Arc<[u8]>);
}

/// Per-file editor settings, as far as the buffer core cares about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSettings {
  pub insert_trailing_newline:  bool,
  pub trim_trailing_whitespace: bool,
}

impl Default for FileSettings {
  fn default() -> Self {
    Self {
      insert_trailing_newline:  true,
      trim_trailing_whitespace: false,
    }
  }
}

#[async_trait(?Send)]
pub trait FileSettingsProvider {
  async fn load_settings(
    &self,
    file: &FileId,
    cancel: CancellationToken,
  ) -> anyhow::Result<FileSettings>;
}

/// Filesystem facts about the bound file, for read-only and
/// changed-on-volume tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
  pub modified:  Option<SystemTime>,
  pub can_write: bool,
}

pub trait FileInfoProvider {
  fn query_info(&self, file: &FileId) -> io::Result<FileInfo>;
}

/// [`FileInfoProvider`] backed by `std::fs`.
pub struct DiskFileInfo;

impl FileInfoProvider for DiskFileInfo {
  fn query_info(&self, file: &FileId) -> io::Result<FileInfo> {
    let metadata = std::fs::metadata(file.path())?;
    Ok(FileInfo {
      modified:  metadata.modified().ok(),
      can_write: !metadata.permissions().readonly(),
    })
  }
}

/// Guesses a language id from the file identity and the first line of
/// content (shebangs, emacs-style markers, plain file extensions).
pub trait LanguageDetector {
  fn guess(&self, file: &FileId, first_line: &str) -> Option<LanguageId>;
}

/// The version-control side of the context: a working directory for title
/// derivation and a change-monitor factory. Absent entirely for buffers
/// outside any repository.
pub trait Vcs {
  fn workdir(&self) -> &Path;

  /// A monitor classifying `file`'s lines, seeded with the current document
  /// text. `None` when the file is not under version control.
  fn monitor_for(&self, file: &FileId, doc: Rope) -> Option<Rc<dyn ChangeMonitor>>;
}

/// The buffer's owner. `reclaim` is invoked when the grace timer fires;
/// the manager removes the buffer from its live set and drops it.
pub trait BufferManager {
  fn reclaim(&self, buffer: BufferId);
}

/// Everything a buffer needs from its surroundings. Owned by the
/// application; buffers keep an `Rc` back-reference that the owner severs
/// explicitly via [`Buffer::on_context_destroyed`](crate::Buffer::on_context_destroyed)
/// during shutdown.
pub struct Context {
  pub diagnostics:   Rc<dyn DiagnosticsManager>,
  pub unsaved_files: Rc<dyn UnsavedFilesStore>,
  pub settings:      Rc<dyn FileSettingsProvider>,
  pub file_info:     Rc<dyn FileInfoProvider>,
  pub extensions:    Rc<dyn ExtensionRegistry>,
  pub manager:       Rc<dyn BufferManager>,
  pub languages:     Option<Rc<dyn LanguageDetector>>,
  pub vcs:           Option<Rc<dyn Vcs>>,
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn disk_file_info_reads_metadata() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"content").unwrap();

    let info = DiskFileInfo
      .query_info(&FileId::new(tmp.path()))
      .unwrap();
    assert!(info.can_write);
    assert!(info.modified.is_some());
  }

  #[test]
  fn disk_file_info_fails_for_missing_file() {
    let missing = FileId::new("/nonexistent/definitely/not/here.rs");
    assert!(DiskFileInfo.query_info(&missing).is_err());
  }
}
