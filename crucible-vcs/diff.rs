use std::{
  collections::BTreeMap,
  sync::Arc,
};

use imara_diff::{
  Algorithm,
  IndentHeuristic,
  IndentLevel,
  InternedInput,
};
use parking_lot::{
  Mutex,
  RwLock,
  RwLockReadGuard,
};
use ropey::Rope;

pub use imara_diff::Hunk;

use crucible_core::LineChange;

pub(crate) const ALGORITHM: Algorithm = Algorithm::Histogram;

// Beyond these sizes the diff is not worth its latency; the handle degrades
// to "no changes" instead.
const MAX_DIFF_LINES: usize = 64 * u16::MAX as usize;
// cap average line length to 128 for files with MAX_DIFF_LINES
const MAX_DIFF_BYTES: usize = MAX_DIFF_LINES * 128;

#[derive(Clone, Debug, Default)]
struct DiffInner {
  base:  Rope,
  doc:   Rope,
  hunks: Vec<Hunk>,
}

struct DiffState {
  base:         Rope,
  doc:          Rope,
  pending_base: Option<Rope>,
  pending_doc:  Option<Rope>,
  diff_alloc:   imara_diff::Diff,
}

impl DiffState {
  fn new(base: Rope, doc: Rope) -> Self {
    let mut state = Self {
      base,
      doc,
      pending_base: None,
      pending_doc: None,
      diff_alloc: imara_diff::Diff::default(),
    };
    state.recompute();
    state
  }

  fn oversized(&self) -> bool {
    self.base.len_lines() > MAX_DIFF_LINES
      || self.doc.len_lines() > MAX_DIFF_LINES
      || self.base.len_bytes() + self.doc.len_bytes() > MAX_DIFF_BYTES
  }

  fn recompute(&mut self) {
    if self.oversized() {
      self.diff_alloc = imara_diff::Diff::default();
      return;
    }

    let before = self.base.to_string();
    let after = self.doc.to_string();
    let input = InternedInput::new(before.as_str(), after.as_str());
    self.diff_alloc.compute_with(
      ALGORITHM,
      &input.before,
      &input.after,
      input.interner.num_tokens(),
    );
    self.diff_alloc.postprocess_with(
      &input.before,
      &input.after,
      IndentHeuristic::new(|token| IndentLevel::for_ascii_line(input.interner[token].bytes(), 4)),
    );
  }

  /// Applies queued texts and recomputes. Returns whether anything changed.
  fn flush_pending(&mut self) -> bool {
    let mut dirty = false;
    if let Some(base) = self.pending_base.take() {
      self.base = base;
      dirty = true;
    }
    if let Some(doc) = self.pending_doc.take() {
      self.doc = doc;
      dirty = true;
    }
    if dirty {
      self.recompute();
    }
    dirty
  }

  fn snapshot(&self) -> DiffInner {
    DiffInner {
      base:  self.base.clone(),
      doc:   self.doc.clone(),
      hunks: self.diff_alloc.hunks().collect(),
    }
  }
}

/// An incrementally updatable line diff between a version-control base text
/// and a live document.
///
/// Updates are queued by [`update_document`](DiffHandle::update_document) /
/// [`update_base`](DiffHandle::update_base) and take effect at the next
/// [`poll`](DiffHandle::poll); readers always see a complete snapshot.
#[derive(Clone)]
pub struct DiffHandle {
  state:    Arc<Mutex<DiffState>>,
  snapshot: Arc<RwLock<DiffInner>>,
}

impl DiffHandle {
  pub fn new(base: Rope, doc: Rope) -> DiffHandle {
    let state = DiffState::new(base, doc);
    let snapshot = Arc::new(RwLock::new(state.snapshot()));
    DiffHandle {
      state: Arc::new(Mutex::new(state)),
      snapshot,
    }
  }

  /// Queues a new revision of the live document.
  pub fn update_document(&self, doc: Rope) {
    self.state.lock().pending_doc = Some(doc);
  }

  /// Queues a new version-control base text.
  pub fn update_base(&self, base: Rope) {
    self.state.lock().pending_base = Some(base);
  }

  /// Recomputes hunks for all queued updates.
  ///
  /// Returns `true` if a new snapshot was published.
  pub fn poll(&self) -> bool {
    let mut state = self.state.lock();
    if !state.flush_pending() {
      return false;
    }
    let snapshot = state.snapshot();
    drop(state);
    *self.snapshot.write() = snapshot;
    true
  }

  /// Applies queued updates and returns the resulting diff for reading.
  pub fn load(&self) -> Diff<'_> {
    let _ = self.poll();
    Diff {
      inner: self.snapshot.read(),
    }
  }
}

/// A read snapshot of the diff: hunks sorted ascending, non-overlapping.
pub struct Diff<'a> {
  inner: RwLockReadGuard<'a, DiffInner>,
}

impl Diff<'_> {
  pub fn base(&self) -> &Rope {
    &self.inner.base
  }

  pub fn doc(&self) -> &Rope {
    &self.inner.doc
  }

  pub fn hunks(&self) -> &[Hunk] {
    &self.inner.hunks
  }

  pub fn is_empty(&self) -> bool {
    self.inner.hunks.is_empty()
  }

  /// The hunk covering `line` of the live document, if any. A pure removal
  /// covers the single line that now sits where the removed lines were.
  fn hunk_at(&self, line: u32) -> Option<&Hunk> {
    let hunks = &self.inner.hunks;
    let idx = match hunks.binary_search_by_key(&line, |hunk| hunk.after.start) {
      Ok(pos) => pos,
      Err(0) => return None,
      Err(pos) => pos - 1,
    };
    let hunk = &hunks[idx];
    if hunk.after.contains(&line) || (hunk.is_pure_removal() && hunk.after.start == line) {
      Some(hunk)
    } else {
      None
    }
  }

  /// Classifies one line of the live document.
  pub fn change_for_line(&self, line: usize) -> LineChange {
    let line = u32::try_from(line).unwrap_or(u32::MAX);
    match self.hunk_at(line) {
      Some(hunk) if hunk.is_pure_insertion() => LineChange::Added,
      Some(hunk) if hunk.is_pure_removal() => LineChange::Deleted,
      Some(_) => LineChange::Changed,
      None => LineChange::None,
    }
  }

  /// Classifies every line in `start_line..end_line` that differs from the
  /// base. Lines that are unchanged are absent from the result.
  pub fn changes_in_range(&self, start_line: usize, end_line: usize) -> BTreeMap<usize, LineChange> {
    let mut out = BTreeMap::new();
    if start_line >= end_line {
      return out;
    }

    for hunk in &self.inner.hunks {
      if hunk.is_pure_removal() {
        let line = hunk.after.start as usize;
        if (start_line..end_line).contains(&line) {
          out.insert(line, LineChange::Deleted);
        }
        continue;
      }

      let change = if hunk.is_pure_insertion() {
        LineChange::Added
      } else {
        LineChange::Changed
      };
      let from = (hunk.after.start as usize).max(start_line);
      let to = (hunk.after.end as usize).min(end_line);
      for line in from..to {
        out.insert(line, change);
      }
    }
    out
  }
}
