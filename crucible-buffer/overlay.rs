//! The diagnostics overlay: maps a published [`DiagnosticSet`] onto live
//! buffer coordinates.
//!
//! Two artifacts are derived from every applied set. The severity line
//! cache answers "what is the worst thing on line N" in O(1) for gutter
//! rendering, and the tag spans are the char ranges the view should
//! underline. Both are rebuilt wholesale on every new set; diagnostics
//! arrive file-at-a-time, so incremental patching buys nothing.

use std::{
  collections::HashMap,
  ops::Range,
  sync::Arc,
};

use crucible_core::{
  Diagnostic,
  DiagnosticSet,
  FileId,
  LineFlags,
  Severity,
  position,
};
use ropey::Rope;

/// Visual class of a tag span. One per severity bucket; `Ignored`
/// diagnostics produce no tag at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
  Note,
  Deprecated,
  Warning,
  Error,
}

impl TagKind {
  fn for_severity(severity: Severity) -> Option<TagKind> {
    match severity {
      Severity::Fatal | Severity::Error => Some(TagKind::Error),
      Severity::Warning => Some(TagKind::Warning),
      Severity::Deprecated => Some(TagKind::Deprecated),
      Severity::Note => Some(TagKind::Note),
      Severity::Ignored => None,
    }
  }
}

/// A char range to be underlined, valid for the buffer revision the set was
/// applied against. Edits invalidate spans; the buffer re-applies the
/// overlay rather than patching them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpan {
  pub range: Range<usize>,
  pub kind:  TagKind,
}

#[derive(Default)]
pub struct DiagnosticsOverlay {
  set:           Option<Arc<DiagnosticSet>>,
  line_severity: HashMap<usize, Severity>,
  tags:          Vec<TagSpan>,
}

impl DiagnosticsOverlay {
  /// Applies a new set. Returns `false` without touching anything when
  /// `set` is the already-applied snapshot (same identity); otherwise the
  /// cache and tags are rebuilt and `true` is returned so the buffer can
  /// notify.
  pub fn set_diagnostics(
    &mut self,
    text: &Rope,
    file: Option<&FileId>,
    set: Arc<DiagnosticSet>,
    tags_enabled: bool,
  ) -> bool {
    if let Some(current) = &self.set {
      if Arc::ptr_eq(current, &set) {
        return false;
      }
    }

    self.line_severity.clear();
    self.tags.clear();
    for diagnostic in set.iter() {
      self.apply(text, file, diagnostic, tags_enabled);
    }
    self.set = Some(set);
    true
  }

  /// Rebuilds the cache and tags from the currently applied set, e.g. after
  /// edits moved the text or the highlight toggle flipped.
  pub fn reapply(&mut self, text: &Rope, file: Option<&FileId>, tags_enabled: bool) {
    let Some(set) = self.set.clone() else {
      return;
    };
    self.line_severity.clear();
    self.tags.clear();
    for diagnostic in set.iter() {
      self.apply(text, file, diagnostic, tags_enabled);
    }
  }

  /// Drops the applied set entirely (file rebinds, teardown).
  pub fn clear(&mut self) {
    self.set = None;
    self.line_severity.clear();
    self.tags.clear();
  }

  pub fn set(&self) -> Option<&Arc<DiagnosticSet>> {
    self.set.as_ref()
  }

  pub fn has_diagnostics(&self) -> bool {
    self.set.as_ref().is_some_and(|set| !set.is_empty())
  }

  pub fn severity_for_line(&self, line: usize) -> Option<Severity> {
    self.line_severity.get(&line).copied()
  }

  pub fn tags(&self) -> &[TagSpan] {
    &self.tags
  }

  fn apply(&mut self, text: &Rope, file: Option<&FileId>, diagnostic: &Diagnostic, tags_enabled: bool) {
    let Some(kind) = TagKind::for_severity(diagnostic.severity) else {
      return;
    };

    if let Some(location) = &diagnostic.location {
      // a diagnostic whose primary location belongs to another file is not
      // ours; drop it silently
      if file.is_some_and(|file| &location.file != file) {
        return;
      }

      self.cache_lines(location.line, location.line, diagnostic.severity);

      let begin = position::resolve(text, location);
      let (begin, end) = if position::ends_line(text, begin) {
        (begin.saturating_sub(1), begin)
      } else {
        (begin, position::line_end_char(text, text.char_to_line(begin)))
      };
      if tags_enabled && begin < end {
        self.tags.push(TagSpan {
          range: begin..end,
          kind,
        });
      }
    }

    for range in &diagnostic.ranges {
      let (first, last) = range.line_span();
      self.cache_lines(first, last, diagnostic.severity);

      let mut begin = position::resolve(text, &range.begin);
      let mut end = position::resolve(text, &range.end);
      if begin > end {
        std::mem::swap(&mut begin, &mut end);
      }
      if begin == end {
        // zero-width after resolution: widen one char so the tag is visible
        if !position::ends_line(text, end) {
          end += 1;
        } else {
          begin = begin.saturating_sub(1);
        }
      }
      if tags_enabled && begin < end {
        self.tags.push(TagSpan {
          range: begin..end,
          kind,
        });
      }
    }
  }

  fn cache_lines(&mut self, first: usize, last: usize, severity: Severity) {
    for line in first..=last {
      let entry = self.line_severity.entry(line).or_insert(severity);
      if severity > *entry {
        *entry = severity;
      }
    }
  }

  /// Among diagnostics whose primary location falls on the same line as
  /// `char_idx`, the one nearest by absolute char distance. Lines without a
  /// diagnostic flag short-circuit to `None`.
  pub fn diagnostic_near(&self, text: &Rope, char_idx: usize) -> Option<&Diagnostic> {
    let set = self.set.as_ref()?;
    let char_idx = char_idx.min(text.len_chars());
    let line = text.char_to_line(char_idx);

    let severity = self.severity_for_line(line)?;
    if !LineFlags::from_severity(severity).has_diagnostics() {
      return None;
    }

    let mut nearest = None;
    let mut nearest_distance = usize::MAX;
    for diagnostic in set.iter() {
      let Some(location) = &diagnostic.location else {
        continue;
      };
      let position = position::resolve(text, location);
      if text.char_to_line(position) != line {
        continue;
      }
      let distance = position.abs_diff(char_idx);
      if distance < nearest_distance {
        nearest_distance = distance;
        nearest = Some(diagnostic);
      }
    }
    nearest
  }
}
