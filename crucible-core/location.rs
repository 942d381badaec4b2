//! Stable source coordinates, independent of any live buffer.

use std::{
  fmt,
  path::{
    Path,
    PathBuf,
  },
  sync::Arc,
};

use serde::{
  Deserialize,
  Serialize,
};

/// Identity of a file as tooling sees it. Compared by path; cheap to clone
/// so it can ride along in every [`SourceLocation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Arc<Path>);

impl FileId {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self(Arc::from(path.as_ref()))
  }

  pub fn path(&self) -> &Path {
    &self.0
  }
}

impl From<PathBuf> for FileId {
  fn from(path: PathBuf) -> Self {
    Self(Arc::from(path.as_path()))
  }
}

impl From<&Path> for FileId {
  fn from(path: &Path) -> Self {
    Self(Arc::from(path))
  }
}

impl fmt::Display for FileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.display().fmt(f)
  }
}

impl Serialize for FileId {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.0.as_ref().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FileId {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    PathBuf::deserialize(deserializer).map(FileId::from)
  }
}

/// A position inside one file. `line` and `column` are 0-based; `column`
/// counts chars from the line start and `offset` counts chars from the
/// file start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
  pub file:   FileId,
  pub line:   usize,
  pub column: usize,
  pub offset: usize,
}

impl SourceLocation {
  pub fn new(file: FileId, line: usize, column: usize, offset: usize) -> Self {
    Self {
      file,
      line,
      column,
      offset,
    }
  }
}

/// A begin/end pair of locations. `begin` and `end` are not required to be
/// ordered; consumers that need a line span use [`SourceRange::line_span`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
  pub begin: SourceLocation,
  pub end:   SourceLocation,
}

impl SourceRange {
  pub fn new(begin: SourceLocation, end: SourceLocation) -> Self {
    Self { begin, end }
  }

  /// Inclusive `(first, last)` line pair covered by this range.
  pub fn line_span(&self) -> (usize, usize) {
    (
      self.begin.line.min(self.end.line),
      self.begin.line.max(self.end.line),
    )
  }
}
