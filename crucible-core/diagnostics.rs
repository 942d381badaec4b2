//! Diagnostic values as published by compilers and linters.

use std::sync::Arc;

use serde::{
  Deserialize,
  Serialize,
};

use crate::location::{
  FileId,
  SourceLocation,
  SourceRange,
};

/// Severity of a [`Diagnostic`]. The variant order is the severity order:
/// `max` over a line yields the most severe entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Ignored,
  Note,
  Deprecated,
  Warning,
  Error,
  Fatal,
}

/// One reported issue. Owned by a [`DiagnosticSet`]; read-only afterwards.
///
/// `location` is the primary position (where the caret goes); `ranges` are
/// the spans the report covers. Either may be absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
  pub severity: Severity,
  pub location: Option<SourceLocation>,
  pub ranges:   Vec<SourceRange>,
  pub message:  String,
}

impl Diagnostic {
  pub fn new(severity: Severity, message: impl Into<String>) -> Self {
    Self {
      severity,
      location: None,
      ranges: Vec::new(),
      message: message.into(),
    }
  }

  pub fn with_location(mut self, location: SourceLocation) -> Self {
    self.location = Some(location);
    self
  }

  pub fn with_range(mut self, range: SourceRange) -> Self {
    self.ranges.push(range);
    self
  }
}

/// All diagnostics for one file at one point in time.
///
/// Published whole by the diagnostics manager under a per-file sequence
/// number that only ever grows; a buffer compares sequence numbers to skip
/// redundant reapplication and swaps the whole set atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSet {
  file:     FileId,
  sequence: u64,
  items:    Vec<Diagnostic>,
}

impl DiagnosticSet {
  pub fn new(file: FileId, sequence: u64, items: Vec<Diagnostic>) -> Arc<Self> {
    Arc::new(Self {
      file,
      sequence,
      items,
    })
  }

  pub fn empty(file: FileId, sequence: u64) -> Arc<Self> {
    Self::new(file, sequence, Vec::new())
  }

  pub fn file(&self) -> &FileId {
    &self.file
  }

  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
    self.items.iter()
  }

  pub fn get(&self, index: usize) -> Option<&Diagnostic> {
    self.items.get(index)
  }
}
