//! The buffer entity: a mutable text container plus every piece of derived
//! state the IDE hangs off it.
//!
//! A buffer is created bound to a [`Context`] and (usually later) a file.
//! From then on it continuously ingests diagnostic sets, classifies lines
//! against version control, lazily snapshots its content for out-of-process
//! tooling, and counts view holds until the owner reclaims it. All of that
//! happens on one thread; async collaborator calls are the only suspension
//! points.

use std::{
  cell::Cell,
  ops::Range,
  rc::Rc,
  sync::Arc,
  time::{
    Instant,
    SystemTime,
  },
};

use crucible_core::{
  Diagnostic,
  DiagnosticSet,
  FileId,
  LineChange,
  LineFlags,
  SourceLocation,
  position,
};
use crucible_event::{
  HookRegistry,
  HookToken,
};
use crucible_vcs::ChangeMonitor;
use ropey::Rope;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
  context::{
    Context,
    FileInfo,
    FileSettings,
  },
  extension::{
    Capability,
    ExtensionBindings,
    ExtensionError,
    LanguageId,
    Symbol,
    TextEdit,
  },
  lifecycle::{
    Lifecycle,
    LifecycleState,
  },
  overlay::{
    DiagnosticsOverlay,
    TagSpan,
  },
};

slotmap::new_key_type! {
  /// Key of a buffer in its manager's live set.
  pub struct BufferId;
}

/// Boolean properties with change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
  HasDiagnostics,
  ReadOnly,
  ChangedOnVolume,
  HighlightDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
  CursorMoved { line: usize, column: usize },
  LineFlagsChanged,
  Loaded,
  Saved,
  Destroyed,
  TitleChanged,
  PropertyChanged(Property),
}

#[derive(Debug, Error)]
pub enum BufferError {
  #[error("the current language lacks a symbol resolver")]
  NoSymbolResolver,
  #[error("the current language lacks a rename provider")]
  NoRenameProvider,
  #[error("buffer is not bound to a file")]
  Unbound,
  #[error(transparent)]
  Extension(#[from] ExtensionError),
}

pub struct Buffer {
  id:                    BufferId,
  context:               Option<Rc<Context>>,
  file:                  Option<FileId>,
  language:              Option<LanguageId>,
  text:                  Rope,
  cursor:                usize,
  overlay:               DiagnosticsOverlay,
  diagnostics_sequence:  u64,
  content:               Option<Arc<[u8]>>,
  settings:              FileSettings,
  change_monitor:        Option<Rc<dyn ChangeMonitor>>,
  monitor_token:         Option<HookToken>,
  monitor_dirty:         Rc<Cell<bool>>,
  extensions:            ExtensionBindings,
  lifecycle:             Lifecycle,
  title:                 Option<String>,
  read_only:             bool,
  changed_on_volume:     bool,
  highlight_diagnostics: bool,
  loading:               bool,
  mtime:                 Option<SystemTime>,
  change_count:          u64,
  hooks:                 HookRegistry<BufferEvent>,
}

impl Buffer {
  pub fn new(id: BufferId, context: Rc<Context>) -> Self {
    let extensions = ExtensionBindings::new(
      Some(context.extensions.adapter(Capability::SymbolResolver)),
      Some(context.extensions.adapter(Capability::RenameProvider)),
    );
    Self {
      id,
      context: Some(context),
      file: None,
      language: None,
      text: Rope::new(),
      cursor: 0,
      overlay: DiagnosticsOverlay::default(),
      diagnostics_sequence: 0,
      content: None,
      settings: FileSettings::default(),
      change_monitor: None,
      monitor_token: None,
      monitor_dirty: Rc::new(Cell::new(false)),
      extensions,
      lifecycle: Lifecycle::new(),
      title: None,
      read_only: false,
      changed_on_volume: false,
      highlight_diagnostics: true,
      loading: false,
      mtime: None,
      change_count: 0,
      hooks: HookRegistry::new(),
    }
  }

  pub fn id(&self) -> BufferId {
    self.id
  }

  pub fn file(&self) -> Option<&FileId> {
    self.file.as_ref()
  }

  pub fn language(&self) -> Option<&LanguageId> {
    self.language.as_ref()
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }

  pub fn title(&self) -> Option<&str> {
    self.title.as_deref()
  }

  pub fn read_only(&self) -> bool {
    self.read_only
  }

  pub fn changed_on_volume(&self) -> bool {
    self.changed_on_volume
  }

  pub fn highlight_diagnostics(&self) -> bool {
    self.highlight_diagnostics
  }

  pub fn has_diagnostics(&self) -> bool {
    self.overlay.has_diagnostics()
  }

  pub fn diagnostics(&self) -> Option<&Arc<DiagnosticSet>> {
    self.overlay.set()
  }

  pub fn diagnostic_tags(&self) -> &[TagSpan] {
    self.overlay.tags()
  }

  pub fn change_count(&self) -> u64 {
    self.change_count
  }

  pub fn settings(&self) -> FileSettings {
    self.settings
  }

  pub fn loading(&self) -> bool {
    self.loading
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn hold_count(&self) -> u32 {
    self.lifecycle.hold_count()
  }

  pub fn connect(&mut self, handler: impl FnMut(&BufferEvent) + 'static) -> HookToken {
    self.hooks.connect(handler)
  }

  pub fn disconnect(&mut self, token: HookToken) {
    self.hooks.disconnect(token);
  }

  // ---- file binding ----

  /// Binds the buffer to a file. Rebinding tears the previous change
  /// monitor down, recomputes the title, and drops the applied diagnostics
  /// (the next manager notification repopulates them for the new file).
  pub fn set_file(&mut self, file: FileId) {
    if self.file.as_ref() == Some(&file) {
      return;
    }
    self.file = Some(file);
    self.diagnostics_sequence = 0;
    self.overlay.clear();
    self.reload_change_monitor();
    self.update_title();
  }

  fn update_title(&mut self) {
    let title = self.file.as_ref().map(|file| {
      let path = file.path();
      self
        .context
        .as_ref()
        .and_then(|context| context.vcs.as_ref())
        .and_then(|vcs| path.strip_prefix(vcs.workdir()).ok())
        .map(|relative| relative.display().to_string())
        .unwrap_or_else(|| path.display().to_string())
    });
    if title != self.title {
      self.title = title;
      self.hooks.emit(&BufferEvent::TitleChanged);
    }
  }

  /// Re-acquires the change monitor for the current context and file. The
  /// previous monitor's subscription is torn down first so stale change
  /// notifications cannot fire against the new file.
  pub fn reload_change_monitor(&mut self) {
    if let (Some(monitor), Some(token)) = (self.change_monitor.take(), self.monitor_token.take()) {
      monitor.disconnect_changed(token);
    }
    self.monitor_dirty = Rc::new(Cell::new(false));

    let Some(context) = self.context.clone() else {
      return;
    };
    let Some(vcs) = context.vcs.clone() else {
      return;
    };
    let Some(file) = self.file.clone() else {
      return;
    };
    if let Some(monitor) = vcs.monitor_for(&file, self.text.clone()) {
      let dirty = Rc::clone(&self.monitor_dirty);
      self.monitor_token = Some(monitor.connect_changed(Box::new(move || dirty.set(true))));
      self.change_monitor = Some(monitor);
    }
  }

  /// Drains pending change-monitor notifications into a `LineFlagsChanged`
  /// emission. Driven by the owner's event loop.
  pub fn poll_change_monitor(&mut self) -> bool {
    if self.monitor_dirty.take() {
      self.hooks.emit(&BufferEvent::LineFlagsChanged);
      true
    } else {
      false
    }
  }

  // ---- language ----

  /// Assigns the language id and rebinds language-keyed extensions. Always
  /// pushed through the registry, even for the current id.
  pub fn set_language(&mut self, language: Option<LanguageId>) {
    self.language = language;
    self.extensions.rebind(self.language.as_ref());
  }

  fn detect_language(&mut self) {
    let Some(context) = self.context.clone() else {
      return;
    };
    let Some(detector) = context.languages.clone() else {
      return;
    };
    let Some(file) = self.file.clone() else {
      return;
    };
    let end = position::line_end_char(&self.text, 0);
    let first_line = self.text.slice(..end).to_string();
    if let Some(language) = detector.guess(&file, &first_line) {
      if self.language.as_ref() != Some(&language) {
        self.set_language(Some(language));
      }
    }
  }

  // ---- editing ----

  /// Replaces the whole text, as the load path does. Runs the usual
  /// mutation bookkeeping but no language re-detection; that happens when
  /// loading finishes.
  pub fn set_text(&mut self, text: Rope) {
    self.text = text;
    self.cursor = self.cursor.min(self.text.len_chars());
    self.mark_edited();
  }

  pub fn insert(&mut self, char_idx: usize, text: &str) {
    if text.is_empty() {
      return;
    }
    let char_idx = char_idx.min(self.text.len_chars());
    // a newline completing the first line is the earliest moment content-
    // based language detection can work; mirror that here
    let check_language = self.text.char_to_line(char_idx) == 0
      && position::ends_line(&self.text, char_idx)
      && text.contains('\n');

    self.text.insert(char_idx, text);
    self.cursor = char_idx + text.chars().count();
    self.mark_edited();

    if check_language && !self.loading {
      self.detect_language();
    }
  }

  pub fn delete(&mut self, range: Range<usize>) {
    let len = self.text.len_chars();
    let start = range.start.min(len);
    let end = range.end.min(len);
    if start >= end {
      return;
    }
    self.text.remove(start..end);
    self.cursor = start;
    self.mark_edited();
  }

  fn mark_edited(&mut self) {
    self.change_count += 1;
    self.content = None;
    if let Some(monitor) = &self.change_monitor {
      monitor.update_document(self.text.clone());
    }
    self.emit_cursor_moved();
  }

  pub fn cursor(&self) -> usize {
    self.cursor
  }

  pub fn set_cursor(&mut self, char_idx: usize) {
    let char_idx = char_idx.min(self.text.len_chars());
    if char_idx != self.cursor {
      self.cursor = char_idx;
      self.emit_cursor_moved();
    }
  }

  fn emit_cursor_moved(&mut self) {
    let line = self.text.char_to_line(self.cursor);
    let column = self.cursor - self.text.line_to_char(line);
    self.hooks.emit(&BufferEvent::CursorMoved { line, column });
  }

  /// The insert position as a [`SourceLocation`], when a file is bound.
  pub fn insert_location(&self) -> Option<SourceLocation> {
    self.location_at(self.cursor)
  }

  pub fn location_at(&self, char_idx: usize) -> Option<SourceLocation> {
    let file = self.file.clone()?;
    Some(position::capture(&self.text, file, char_idx))
  }

  /// The word under `char_idx` (alphanumerics and `_`), also matching when
  /// the position sits just past its last char.
  pub fn word_at(&self, char_idx: usize) -> Option<(Range<usize>, String)> {
    let len = self.text.len_chars();
    let char_idx = char_idx.min(len);
    let is_word = |c: char| c.is_alphanumeric() || c == '_';

    let on_word = char_idx < len && is_word(self.text.char(char_idx));
    if !on_word && (char_idx == 0 || !is_word(self.text.char(char_idx - 1))) {
      return None;
    }

    let mut start = char_idx;
    while start > 0 && is_word(self.text.char(start - 1)) {
      start -= 1;
    }
    let mut end = char_idx;
    while end < len && is_word(self.text.char(end)) {
      end += 1;
    }
    Some((start..end, self.text.slice(start..end).to_string()))
  }

  /// Strips trailing spaces and tabs. With a change monitor bound, only
  /// lines that differ from the version-control baseline are touched;
  /// otherwise every line is.
  pub fn trim_trailing_whitespace(&mut self) {
    let last = self.text.len_lines().saturating_sub(1);
    for line in (0..=last).rev() {
      let change = match &self.change_monitor {
        Some(monitor) => monitor.change_for_line(line),
        None => LineChange::Changed,
      };
      if change == LineChange::None {
        continue;
      }

      let start = self.text.line_to_char(line);
      let end = position::line_end_char(&self.text, line);
      let mut trim_from = end;
      while trim_from > start {
        let ch = self.text.char(trim_from - 1);
        if ch == ' ' || ch == '\t' {
          trim_from -= 1;
        } else {
          break;
        }
      }
      if trim_from < end {
        self.delete(trim_from..end);
      }
    }
  }

  // ---- diagnostics ----

  /// Pulls from the diagnostics manager if its per-file sequence advanced.
  /// Wired to the manager's `changed` notification by the owner.
  pub fn refresh_diagnostics(&mut self) {
    let Some(context) = self.context.clone() else {
      return;
    };
    let Some(file) = self.file.clone() else {
      return;
    };

    let sequence = context.diagnostics.sequence_for_file(&file);
    if sequence == self.diagnostics_sequence {
      return;
    }
    let set = context.diagnostics.diagnostics_for_file(&file);
    self.diagnostics_sequence = sequence;
    self.set_diagnostics(set);
  }

  /// Applies a diagnostic set. Reapplying the identical snapshot is a
  /// no-op; anything else rebuilds the overlay and notifies.
  pub fn set_diagnostics(&mut self, set: Arc<DiagnosticSet>) {
    let had_diagnostics = self.overlay.has_diagnostics();
    let changed = self.overlay.set_diagnostics(
      &self.text,
      self.file.as_ref(),
      set,
      self.highlight_diagnostics,
    );
    if !changed {
      return;
    }
    self.hooks.emit(&BufferEvent::LineFlagsChanged);
    if had_diagnostics != self.overlay.has_diagnostics() {
      self
        .hooks
        .emit(&BufferEvent::PropertyChanged(Property::HasDiagnostics));
    }
  }

  /// Re-derives the overlay against the current text, e.g. after edits
  /// shifted the tagged spans.
  pub fn reapply_diagnostics(&mut self) {
    self
      .overlay
      .reapply(&self.text, self.file.as_ref(), self.highlight_diagnostics);
    self.hooks.emit(&BufferEvent::LineFlagsChanged);
  }

  pub fn set_highlight_diagnostics(&mut self, enabled: bool) {
    if self.highlight_diagnostics == enabled {
      return;
    }
    self.highlight_diagnostics = enabled;
    self
      .overlay
      .reapply(&self.text, self.file.as_ref(), enabled);
    self
      .hooks
      .emit(&BufferEvent::PropertyChanged(Property::HighlightDiagnostics));
  }

  pub fn diagnostic_near(&self, char_idx: usize) -> Option<&Diagnostic> {
    self.overlay.diagnostic_near(&self.text, char_idx)
  }

  pub fn line_change(&self, line: usize) -> LineChange {
    match &self.change_monitor {
      Some(monitor) => monitor.change_for_line(line),
      None => LineChange::None,
    }
  }

  /// Severity bucket and change state of one line, merged for the gutter.
  pub fn line_flags(&self, line: usize) -> LineFlags {
    let mut flags = self
      .overlay
      .severity_for_line(line)
      .map(LineFlags::from_severity)
      .unwrap_or_default();
    flags |= LineFlags::from_change(self.line_change(line));
    flags
  }

  // ---- content snapshot ----

  /// The buffer content as one immutable byte snapshot.
  ///
  /// Cheap when nothing changed since the last call: the cached snapshot is
  /// returned by reference. After an edit the text is rematerialized, the
  /// implicit trailing newline appended when configured, and the result
  /// pushed to the unsaved-files store so out-of-process tooling reads
  /// current content.
  pub fn content(&mut self) -> Arc<[u8]> {
    if let Some(content) = &self.content {
      return Arc::clone(content);
    }

    let mut bytes = Vec::with_capacity(self.text.len_bytes() + 1);
    for chunk in self.text.chunks() {
      bytes.extend_from_slice(chunk.as_bytes());
    }
    if self.settings.insert_trailing_newline {
      bytes.push(b'\n');
    }
    let content: Arc<[u8]> = bytes.into();
    self.content = Some(Arc::clone(&content));

    if let (Some(context), Some(file)) = (&self.context, &self.file) {
      context.unsaved_files.update(file, &content);
    }
    content
  }

  /// Forces a store push without keeping the bytes around.
  pub fn sync_to_unsaved_files(&mut self) {
    let _ = self.content();
  }

  // ---- settings ----

  /// Loads per-file settings from the provider. A cancelled load settles
  /// without mutating buffer state; a failed one is logged and keeps the
  /// current settings.
  pub async fn reload_file_settings(&mut self, cancel: CancellationToken) {
    let Some(context) = self.context.clone() else {
      return;
    };
    let Some(file) = self.file.clone() else {
      return;
    };

    match context.settings.load_settings(&file, cancel.clone()).await {
      Ok(settings) => {
        if cancel.is_cancelled() || settings == self.settings {
          return;
        }
        self.settings = settings;
        // the trailing-newline policy participates in the snapshot
        self.content = None;
      },
      Err(err) => {
        log::debug!("failed to load settings for {file}: {err:#}");
      },
    }
  }

  // ---- volume tracking ----

  pub fn set_mtime(&mut self, mtime: Option<SystemTime>) {
    self.mtime = mtime;
  }

  /// Compares the provider's view of the file against recorded state.
  /// Latches `changed_on_volume` on an mtime mismatch; once latched,
  /// further checks are skipped until a save or reload clears it. Provider
  /// failure degrades to "no live monitoring".
  pub fn check_for_volume_change(&mut self) {
    if self.changed_on_volume {
      return;
    }
    let Some(context) = self.context.clone() else {
      return;
    };
    let Some(file) = self.file.clone() else {
      return;
    };

    match context.file_info.query_info(&file) {
      Ok(info) => self.apply_file_info(info),
      Err(err) => {
        log::debug!("failed to query file info for {file}: {err}");
      },
    }
  }

  fn apply_file_info(&mut self, info: FileInfo) {
    self.set_read_only(!info.can_write);
    if let (Some(recorded), Some(current)) = (self.mtime, info.modified) {
      if recorded != current {
        self.set_changed_on_volume(true);
      }
    }
  }

  fn set_read_only(&mut self, read_only: bool) {
    if self.read_only != read_only {
      self.read_only = read_only;
      self
        .hooks
        .emit(&BufferEvent::PropertyChanged(Property::ReadOnly));
    }
  }

  fn set_changed_on_volume(&mut self, changed: bool) {
    if self.changed_on_volume != changed {
      self.changed_on_volume = changed;
      self
        .hooks
        .emit(&BufferEvent::PropertyChanged(Property::ChangedOnVolume));
    }
  }

  // ---- load/save protocol ----

  /// Set by the manager around a load. Clearing it emits `Loaded`, re-runs
  /// language detection against the loaded content, and asks the change
  /// monitor to refetch its baseline.
  pub fn set_loading(&mut self, loading: bool) {
    if self.loading == loading {
      return;
    }
    self.loading = loading;
    if !loading {
      self.hooks.emit(&BufferEvent::Loaded);
      self.detect_language();
      if let Some(monitor) = &self.change_monitor {
        monitor.reload();
      }
    }
  }

  /// Records a completed save: new modification time, volume state back in
  /// sync, `Saved` emitted.
  pub fn mark_saved(&mut self, mtime: Option<SystemTime>) {
    self.mtime = mtime;
    self.set_changed_on_volume(false);
    self.hooks.emit(&BufferEvent::Saved);
  }

  // ---- extensions ----

  pub async fn symbol_at(
    &self,
    char_idx: usize,
    cancel: CancellationToken,
  ) -> Result<Symbol, BufferError> {
    let resolver = self
      .extensions
      .symbol_resolver()
      .ok_or(BufferError::NoSymbolResolver)?;
    let location = self.location_at(char_idx).ok_or(BufferError::Unbound)?;
    Ok(resolver.lookup_symbol(location, cancel).await?)
  }

  pub async fn rename_at(
    &self,
    char_idx: usize,
    new_name: &str,
    cancel: CancellationToken,
  ) -> Result<Vec<TextEdit>, BufferError> {
    let provider = self
      .extensions
      .rename_provider()
      .ok_or(BufferError::NoRenameProvider)?;
    let location = self.location_at(char_idx).ok_or(BufferError::Unbound)?;
    Ok(provider.rename(location, new_name, cancel).await?)
  }

  // ---- lifecycle ----

  pub fn hold(&mut self) {
    self.lifecycle.hold();
  }

  pub fn release(&mut self) {
    let has_context = self.context.is_some();
    self.lifecycle.release(Instant::now(), has_context);
  }

  /// Checks the reclamation grace timer. When it fires, detaches the
  /// extension bindings, hands the buffer to its manager for removal, and
  /// emits `Destroyed`.
  pub fn poll_reclaim(&mut self, now: Instant) -> bool {
    if !self.lifecycle.poll_reclaim(now) {
      return false;
    }
    self.extensions.detach();
    if let Some(context) = &self.context {
      context.manager.reclaim(self.id);
    }
    self.hooks.emit(&BufferEvent::Destroyed);
    true
  }

  /// The owning context is going away. Severs the back-reference and
  /// cancels any pending reclamation; the owner's shutdown sequence is
  /// responsible for actually dropping the buffer.
  pub fn on_context_destroyed(&mut self) {
    self.context = None;
    self.lifecycle.cancel_pending();
    // with no context there is no VCS either; this tears the subscription
    // down and acquires nothing
    self.reload_change_monitor();
  }
}

#[cfg(test)]
mod tests {
  use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    path::PathBuf,
    time::Duration,
  };

  use async_trait::async_trait;
  use crucible_core::{
    Severity,
    SourceLocation,
  };
  use crucible_vcs::ChangeMonitor;
  use futures_executor::block_on;
  use slotmap::SlotMap;

  use super::*;
  use crate::{
    context::{
      DiagnosticsManager,
      FileInfoProvider,
      FileSettingsProvider,
      LanguageDetector,
      UnsavedFilesStore,
      Vcs,
    },
    extension::{
      Extension,
      ExtensionAdapter,
      ExtensionRegistry,
      SymbolResolver,
    },
  };

  // ---- collaborator stubs ----

  #[derive(Default)]
  struct StubDiagnostics {
    sets:  RefCell<HashMap<FileId, Arc<DiagnosticSet>>>,
    pulls: Cell<u32>,
  }

  impl StubDiagnostics {
    fn publish(&self, set: Arc<DiagnosticSet>) {
      self.sets.borrow_mut().insert(set.file().clone(), set);
    }
  }

  impl DiagnosticsManager for StubDiagnostics {
    fn sequence_for_file(&self, file: &FileId) -> u64 {
      self.sets.borrow().get(file).map_or(0, |set| set.sequence())
    }

    fn diagnostics_for_file(&self, file: &FileId) -> Arc<DiagnosticSet> {
      self.pulls.set(self.pulls.get() + 1);
      self
        .sets
        .borrow()
        .get(file)
        .cloned()
        .unwrap_or_else(|| DiagnosticSet::empty(file.clone(), 0))
    }
  }

  #[derive(Default)]
  struct StubUnsaved {
    updates: RefCell<Vec<(FileId, Vec<u8>)>>,
  }

  impl UnsavedFilesStore for StubUnsaved {
    fn update(&self, file: &FileId, content: &Arc<[u8]>) {
      self
        .updates
        .borrow_mut()
        .push((file.clone(), content.to_vec()));
    }
  }

  struct StubSettings {
    settings: Cell<FileSettings>,
  }

  #[async_trait(?Send)]
  impl FileSettingsProvider for StubSettings {
    async fn load_settings(
      &self,
      _file: &FileId,
      _cancel: CancellationToken,
    ) -> anyhow::Result<FileSettings> {
      Ok(self.settings.get())
    }
  }

  #[derive(Default)]
  struct StubFileInfo {
    info: RefCell<Option<FileInfo>>,
  }

  impl FileInfoProvider for StubFileInfo {
    fn query_info(&self, _file: &FileId) -> io::Result<FileInfo> {
      match *self.info.borrow() {
        Some(info) => Ok(info),
        None => Err(io::Error::from(io::ErrorKind::NotFound)),
      }
    }
  }

  struct StubDetector {
    language: LanguageId,
    marker:   &'static str,
  }

  impl LanguageDetector for StubDetector {
    fn guess(&self, _file: &FileId, first_line: &str) -> Option<LanguageId> {
      first_line
        .contains(self.marker)
        .then(|| self.language.clone())
    }
  }

  #[derive(Default)]
  struct StubMonitor {
    changes:     RefCell<HashMap<usize, LineChange>>,
    changed:     RefCell<HookRegistry<()>>,
    reloads:     Cell<u32>,
    updates:     Cell<u32>,
    disconnects: Cell<u32>,
  }

  impl StubMonitor {
    fn fire_changed(&self) {
      self.changed.borrow_mut().emit(&());
    }
  }

  impl ChangeMonitor for StubMonitor {
    fn reload(&self) {
      self.reloads.set(self.reloads.get() + 1);
    }

    fn change_for_line(&self, line: usize) -> LineChange {
      self
        .changes
        .borrow()
        .get(&line)
        .copied()
        .unwrap_or_default()
    }

    fn update_document(&self, _text: Rope) {
      self.updates.set(self.updates.get() + 1);
    }

    fn connect_changed(&self, mut handler: Box<dyn FnMut()>) -> HookToken {
      self.changed.borrow_mut().connect(move |()| handler())
    }

    fn disconnect_changed(&self, token: HookToken) {
      self.disconnects.set(self.disconnects.get() + 1);
      self.changed.borrow_mut().disconnect(token);
    }
  }

  struct StubVcs {
    workdir:  PathBuf,
    monitors: RefCell<Vec<Rc<StubMonitor>>>,
  }

  impl StubVcs {
    fn new(workdir: impl Into<PathBuf>) -> Rc<Self> {
      Rc::new(Self {
        workdir:  workdir.into(),
        monitors: RefCell::new(Vec::new()),
      })
    }

    fn monitor(&self, index: usize) -> Rc<StubMonitor> {
      Rc::clone(&self.monitors.borrow()[index])
    }
  }

  impl Vcs for StubVcs {
    fn workdir(&self) -> &std::path::Path {
      &self.workdir
    }

    fn monitor_for(&self, _file: &FileId, _doc: Rope) -> Option<Rc<dyn ChangeMonitor>> {
      let monitor = Rc::new(StubMonitor::default());
      self.monitors.borrow_mut().push(Rc::clone(&monitor));
      Some(monitor)
    }
  }

  struct NullAdapter;

  impl ExtensionAdapter for NullAdapter {
    fn set_language(&self, _language: Option<&LanguageId>) {}

    fn extension(&self) -> Option<Extension> {
      None
    }
  }

  struct NullRegistry;

  impl ExtensionRegistry for NullRegistry {
    fn adapter(&self, _capability: Capability) -> Rc<dyn ExtensionAdapter> {
      Rc::new(NullAdapter)
    }
  }

  struct StubResolver;

  #[async_trait(?Send)]
  impl SymbolResolver for StubResolver {
    async fn lookup_symbol(
      &self,
      location: SourceLocation,
      _cancel: CancellationToken,
    ) -> Result<Symbol, ExtensionError> {
      Ok(Symbol {
        name: "answer".into(),
        location,
      })
    }
  }

  struct ResolverAdapter;

  impl ExtensionAdapter for ResolverAdapter {
    fn set_language(&self, _language: Option<&LanguageId>) {}

    fn extension(&self) -> Option<Extension> {
      Some(Extension::SymbolResolver(Rc::new(StubResolver)))
    }
  }

  struct ResolverRegistry;

  impl ExtensionRegistry for ResolverRegistry {
    fn adapter(&self, capability: Capability) -> Rc<dyn ExtensionAdapter> {
      match capability {
        Capability::SymbolResolver => Rc::new(ResolverAdapter),
        Capability::RenameProvider => Rc::new(NullAdapter),
      }
    }
  }

  #[derive(Default)]
  struct StubManager {
    reclaimed: RefCell<Vec<BufferId>>,
  }

  impl crate::context::BufferManager for StubManager {
    fn reclaim(&self, buffer: BufferId) {
      self.reclaimed.borrow_mut().push(buffer);
    }
  }

  // ---- fixture ----

  struct World {
    context:     Rc<Context>,
    diagnostics: Rc<StubDiagnostics>,
    unsaved:     Rc<StubUnsaved>,
    settings:    Rc<StubSettings>,
    file_info:   Rc<StubFileInfo>,
    manager:     Rc<StubManager>,
    vcs:         Option<Rc<StubVcs>>,
  }

  impl World {
    fn build(
      vcs: Option<Rc<StubVcs>>,
      detector: Option<Rc<StubDetector>>,
      extensions: Rc<dyn ExtensionRegistry>,
    ) -> World {
      let diagnostics = Rc::new(StubDiagnostics::default());
      let unsaved = Rc::new(StubUnsaved::default());
      let settings = Rc::new(StubSettings {
        settings: Cell::new(FileSettings::default()),
      });
      let file_info = Rc::new(StubFileInfo::default());
      let manager = Rc::new(StubManager::default());
      let context = Rc::new(Context {
        diagnostics: diagnostics.clone(),
        unsaved_files: unsaved.clone(),
        settings: settings.clone(),
        file_info: file_info.clone(),
        extensions,
        manager: manager.clone(),
        languages: detector.map(|detector| detector as Rc<dyn LanguageDetector>),
        vcs: vcs.clone().map(|vcs| vcs as Rc<dyn Vcs>),
      });
      World {
        context,
        diagnostics,
        unsaved,
        settings,
        file_info,
        manager,
        vcs,
      }
    }

    fn plain() -> World {
      Self::build(None, None, Rc::new(NullRegistry))
    }

    fn with_vcs(workdir: &str) -> World {
      Self::build(Some(StubVcs::new(workdir)), None, Rc::new(NullRegistry))
    }

    fn buffer(&self) -> Buffer {
      Buffer::new(buffer_id(), Rc::clone(&self.context))
    }
  }

  fn buffer_id() -> BufferId {
    let mut keys: SlotMap<BufferId, ()> = SlotMap::with_key();
    keys.insert(())
  }

  fn file() -> FileId {
    FileId::new("/repo/src/main.rs")
  }

  fn record(buffer: &mut Buffer) -> Rc<RefCell<Vec<BufferEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    buffer.connect(move |event| sink.borrow_mut().push(event.clone()));
    events
  }

  fn count(events: &[BufferEvent], wanted: &BufferEvent) -> usize {
    events.iter().filter(|event| *event == wanted).count()
  }

  fn error_at(line: usize, column: usize) -> Diagnostic {
    Diagnostic::new(Severity::Error, "expected `;`")
      .with_location(SourceLocation::new(file(), line, column, 0))
  }

  // ---- content snapshot ----

  #[test]
  fn content_appends_newline_caches_and_syncs() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("abc"));

    let first = buffer.content();
    assert_eq!(&*first, b"abc\n");
    assert!(Arc::ptr_eq(&first, &buffer.content()));
    assert_eq!(world.unsaved.updates.borrow().len(), 1);

    buffer.insert(3, "!");
    let second = buffer.content();
    assert_eq!(&*second, b"abc!\n");
    assert_eq!(world.unsaved.updates.borrow().len(), 2);
    assert_eq!(world.unsaved.updates.borrow()[1].1, b"abc!\n");
  }

  #[test]
  fn content_without_file_skips_the_store() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_text(Rope::from_str("abc"));

    assert_eq!(&*buffer.content(), b"abc\n");
    assert!(world.unsaved.updates.borrow().is_empty());
  }

  #[test]
  fn settings_control_the_trailing_newline() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("abc"));

    world.settings.settings.set(FileSettings {
      insert_trailing_newline:  false,
      trim_trailing_whitespace: false,
    });
    block_on(buffer.reload_file_settings(CancellationToken::new()));
    assert_eq!(&*buffer.content(), b"abc");
  }

  #[test]
  fn cancelled_settings_load_settles_without_mutation() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());

    world.settings.settings.set(FileSettings {
      insert_trailing_newline:  false,
      trim_trailing_whitespace: true,
    });
    let cancel = CancellationToken::new();
    cancel.cancel();
    block_on(buffer.reload_file_settings(cancel));

    assert_eq!(buffer.settings(), FileSettings::default());
  }

  // ---- diagnostics ----

  #[test]
  fn error_diagnostic_flags_its_line_and_answers_nearby() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("l0\nl1\nl2\nline threeeee\nl4\n"));

    buffer.set_diagnostics(DiagnosticSet::new(file(), 1, vec![error_at(3, 5)]));

    assert!(buffer.line_flags(3).contains(LineFlags::ERROR));
    assert_eq!(buffer.line_flags(4), LineFlags::empty());

    let near = buffer.text().line_to_char(3) + 7;
    assert!(buffer.diagnostic_near(near).is_some());
    let line4 = buffer.text().line_to_char(4);
    assert!(buffer.diagnostic_near(line4).is_none());
  }

  #[test]
  fn refresh_pulls_only_when_the_sequence_advances() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));
    let events = record(&mut buffer);

    world
      .diagnostics
      .publish(DiagnosticSet::new(file(), 1, vec![error_at(0, 3)]));
    buffer.refresh_diagnostics();
    buffer.refresh_diagnostics();

    assert_eq!(world.diagnostics.pulls.get(), 1);
    assert_eq!(count(&events.borrow(), &BufferEvent::LineFlagsChanged), 1);

    // an equivalent set under a new sequence still notifies
    world
      .diagnostics
      .publish(DiagnosticSet::new(file(), 2, vec![error_at(0, 3)]));
    buffer.refresh_diagnostics();
    assert_eq!(world.diagnostics.pulls.get(), 2);
    assert_eq!(count(&events.borrow(), &BufferEvent::LineFlagsChanged), 2);
  }

  #[test]
  fn identical_snapshot_identity_is_a_noop() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));
    let events = record(&mut buffer);

    let set = DiagnosticSet::new(file(), 1, vec![error_at(0, 3)]);
    buffer.set_diagnostics(Arc::clone(&set));
    buffer.set_diagnostics(set);

    assert_eq!(count(&events.borrow(), &BufferEvent::LineFlagsChanged), 1);
    assert_eq!(
      count(
        &events.borrow(),
        &BufferEvent::PropertyChanged(Property::HasDiagnostics)
      ),
      1
    );
  }

  #[test]
  fn rebinding_the_file_drops_applied_diagnostics() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));
    buffer.set_diagnostics(DiagnosticSet::new(file(), 1, vec![error_at(0, 0)]));
    assert!(buffer.has_diagnostics());

    buffer.set_file(FileId::new("/repo/src/other.rs"));
    assert!(!buffer.has_diagnostics());
    assert_eq!(buffer.line_flags(0), LineFlags::empty());
  }

  #[test]
  fn highlight_toggle_drops_and_restores_tags() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));
    buffer.set_diagnostics(DiagnosticSet::new(file(), 1, vec![error_at(0, 3)]));
    assert!(!buffer.diagnostic_tags().is_empty());

    buffer.set_highlight_diagnostics(false);
    assert!(buffer.diagnostic_tags().is_empty());
    // the severity cache survives; only the visual layer is off
    assert!(buffer.line_flags(0).contains(LineFlags::ERROR));

    buffer.set_highlight_diagnostics(true);
    assert!(!buffer.diagnostic_tags().is_empty());
  }

  // ---- change monitor ----

  #[test]
  fn line_flags_merge_severity_and_change_state() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("a\nb\nc\n"));

    let vcs = world.vcs.as_ref().unwrap();
    vcs
      .monitor(0)
      .changes
      .borrow_mut()
      .insert(1, LineChange::Changed);
    buffer.set_diagnostics(DiagnosticSet::new(file(), 1, vec![
      Diagnostic::new(Severity::Warning, "w")
        .with_location(SourceLocation::new(file(), 1, 0, 0)),
    ]));

    assert_eq!(
      buffer.line_flags(1),
      LineFlags::WARNING | LineFlags::CHANGED
    );
    assert_eq!(buffer.line_flags(2), LineFlags::empty());
  }

  #[test]
  fn rebinding_tears_down_the_previous_monitor() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());

    let vcs = world.vcs.as_ref().unwrap();
    let first = vcs.monitor(0);
    buffer.set_file(FileId::new("/repo/src/other.rs"));

    assert_eq!(first.disconnects.get(), 1);
    assert_eq!(vcs.monitors.borrow().len(), 2);
  }

  #[test]
  fn edits_feed_the_monitor_and_polls_surface_changes() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());
    let events = record(&mut buffer);

    buffer.insert(0, "hello");
    let monitor = world.vcs.as_ref().unwrap().monitor(0);
    assert_eq!(monitor.updates.get(), 1);

    monitor.fire_changed();
    assert!(buffer.poll_change_monitor());
    assert!(!buffer.poll_change_monitor());
    assert_eq!(count(&events.borrow(), &BufferEvent::LineFlagsChanged), 1);
  }

  #[test]
  fn finishing_a_load_reloads_the_monitor_baseline() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());
    let events = record(&mut buffer);

    buffer.set_loading(true);
    buffer.set_text(Rope::from_str("loaded\n"));
    buffer.set_loading(false);

    assert_eq!(count(&events.borrow(), &BufferEvent::Loaded), 1);
    assert_eq!(world.vcs.as_ref().unwrap().monitor(0).reloads.get(), 1);
  }

  // ---- lifecycle ----

  #[test]
  fn reclamation_fires_after_the_grace_period() {
    let world = World::plain();
    let mut buffer = world.buffer();
    let events = record(&mut buffer);

    buffer.hold();
    buffer.release();
    assert_eq!(buffer.lifecycle_state(), LifecycleState::PendingReclamation);

    assert!(!buffer.poll_reclaim(Instant::now()));
    assert!(buffer.poll_reclaim(Instant::now() + Duration::from_secs(2)));
    assert_eq!(buffer.lifecycle_state(), LifecycleState::Reclaimed);
    assert_eq!(world.manager.reclaimed.borrow().as_slice(), &[buffer.id()]);
    assert_eq!(count(&events.borrow(), &BufferEvent::Destroyed), 1);
  }

  #[test]
  fn a_new_hold_cancels_pending_reclamation() {
    let world = World::plain();
    let mut buffer = world.buffer();

    buffer.hold();
    buffer.release();
    buffer.hold();

    assert_eq!(buffer.lifecycle_state(), LifecycleState::Active);
    assert_eq!(buffer.hold_count(), 1);
    assert!(!buffer.poll_reclaim(Instant::now() + Duration::from_secs(10)));
    assert!(world.manager.reclaimed.borrow().is_empty());
  }

  #[test]
  #[should_panic(expected = "released without a matching hold")]
  fn release_without_hold_fails_fast() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.release();
  }

  #[test]
  fn context_loss_cancels_reclamation_without_reclaiming() {
    let world = World::plain();
    let mut buffer = world.buffer();

    buffer.hold();
    buffer.release();
    buffer.on_context_destroyed();

    assert!(!buffer.poll_reclaim(Instant::now() + Duration::from_secs(10)));
    assert!(world.manager.reclaimed.borrow().is_empty());
  }

  // ---- volume tracking ----

  #[test]
  fn mtime_mismatch_latches_changed_on_volume() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    let events = record(&mut buffer);

    let recorded = SystemTime::UNIX_EPOCH;
    buffer.set_mtime(Some(recorded));
    *world.file_info.info.borrow_mut() = Some(FileInfo {
      modified:  Some(recorded + Duration::from_secs(60)),
      can_write: false,
    });

    buffer.check_for_volume_change();
    assert!(buffer.changed_on_volume());
    assert!(buffer.read_only());
    assert_eq!(
      count(
        &events.borrow(),
        &BufferEvent::PropertyChanged(Property::ChangedOnVolume)
      ),
      1
    );

    // latched: later checks are skipped entirely
    *world.file_info.info.borrow_mut() = Some(FileInfo {
      modified:  Some(recorded),
      can_write: true,
    });
    buffer.check_for_volume_change();
    assert!(buffer.changed_on_volume());
    assert!(buffer.read_only());
  }

  #[test]
  fn file_info_failure_degrades_quietly() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    let events = record(&mut buffer);

    buffer.set_mtime(Some(SystemTime::UNIX_EPOCH));
    buffer.check_for_volume_change();

    assert!(!buffer.changed_on_volume());
    assert!(events.borrow().is_empty());
  }

  #[test]
  fn saving_clears_the_volume_flag() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());

    buffer.set_mtime(Some(SystemTime::UNIX_EPOCH));
    *world.file_info.info.borrow_mut() = Some(FileInfo {
      modified:  Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1)),
      can_write: true,
    });
    buffer.check_for_volume_change();
    assert!(buffer.changed_on_volume());

    let events = record(&mut buffer);
    buffer.mark_saved(Some(SystemTime::now()));
    assert!(!buffer.changed_on_volume());
    assert_eq!(count(&events.borrow(), &BufferEvent::Saved), 1);
  }

  // ---- title ----

  #[test]
  fn title_is_workdir_relative_when_possible() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());
    assert_eq!(buffer.title(), Some("src/main.rs"));

    buffer.set_file(FileId::new("/elsewhere/lib.rs"));
    assert_eq!(buffer.title(), Some("/elsewhere/lib.rs"));
  }

  // ---- editing helpers ----

  #[test]
  fn edits_track_cursor_and_change_count() {
    let world = World::plain();
    let mut buffer = world.buffer();
    let events = record(&mut buffer);

    buffer.insert(0, "ab\ncd");
    assert_eq!(buffer.cursor(), 5);
    assert_eq!(buffer.change_count(), 1);
    assert_eq!(
      events.borrow().last(),
      Some(&BufferEvent::CursorMoved { line: 1, column: 2 })
    );

    buffer.delete(2..5);
    assert_eq!(buffer.text().to_string(), "ab");
    assert_eq!(buffer.cursor(), 2);
    assert_eq!(buffer.change_count(), 2);
  }

  #[test]
  fn completing_the_first_line_detects_the_language() {
    let detector = Rc::new(StubDetector {
      language: LanguageId::new("python"),
      marker:   "#!/usr/bin/env python",
    });
    let world = World::build(None, Some(detector), Rc::new(NullRegistry));
    let mut buffer = world.buffer();
    buffer.set_file(file());

    buffer.insert(0, "#!/usr/bin/env python");
    assert_eq!(buffer.language(), None);

    buffer.insert(buffer.text().len_chars(), "\n");
    assert_eq!(buffer.language(), Some(&LanguageId::new("python")));
  }

  #[test]
  fn trim_respects_the_change_monitor() {
    let world = World::with_vcs("/repo");
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("untouched  \nedited\t \n"));

    world
      .vcs
      .as_ref()
      .unwrap()
      .monitor(0)
      .changes
      .borrow_mut()
      .insert(1, LineChange::Changed);

    buffer.trim_trailing_whitespace();
    assert_eq!(buffer.text().to_string(), "untouched  \nedited\n");
  }

  #[test]
  fn trim_without_monitor_touches_every_line() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_text(Rope::from_str("one  \ntwo\t\n"));

    buffer.trim_trailing_whitespace();
    assert_eq!(buffer.text().to_string(), "one\ntwo\n");
  }

  #[test]
  fn word_at_finds_identifiers() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_text(Rope::from_str("let foo_bar = 1;\n"));

    let (range, word) = buffer.word_at(6).unwrap();
    assert_eq!(word, "foo_bar");
    assert_eq!(range, 4..11);

    // just past the last char still matches
    assert_eq!(buffer.word_at(11).unwrap().1, "foo_bar");
    assert!(buffer.word_at(13).is_none());
  }

  // ---- extensions ----

  #[test]
  fn symbol_lookup_without_resolver_is_not_supported() {
    let world = World::plain();
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));

    let result = block_on(buffer.symbol_at(3, CancellationToken::new()));
    assert!(matches!(result, Err(BufferError::NoSymbolResolver)));
  }

  #[test]
  fn symbol_lookup_goes_through_the_bound_resolver() {
    let world = World::build(None, None, Rc::new(ResolverRegistry));
    let mut buffer = world.buffer();
    buffer.set_file(file());
    buffer.set_text(Rope::from_str("fn main() {}\n"));

    let symbol = block_on(buffer.symbol_at(3, CancellationToken::new())).unwrap();
    assert_eq!(symbol.name, "answer");
    assert_eq!(symbol.location.column, 3);
  }

  #[test]
  fn symbol_lookup_without_file_is_unbound() {
    let world = World::build(None, None, Rc::new(ResolverRegistry));
    let buffer = world.buffer();

    let result = block_on(buffer.symbol_at(0, CancellationToken::new()));
    assert!(matches!(result, Err(BufferError::Unbound)));
  }

  #[test]
  fn reclaimed_buffer_loses_its_resolver() {
    let world = World::build(None, None, Rc::new(ResolverRegistry));
    let mut buffer = world.buffer();
    buffer.set_file(file());

    buffer.hold();
    buffer.release();
    assert!(buffer.poll_reclaim(Instant::now() + Duration::from_secs(2)));

    let result = block_on(buffer.symbol_at(0, CancellationToken::new()));
    assert!(matches!(result, Err(BufferError::NoSymbolResolver)));
  }
}
