//! Line-change classification against a version-control baseline.
//!
//! The buffer core never talks to a VCS directly. It holds a
//! [`ChangeMonitor`]: something that can say, per live buffer line, whether
//! the line is added, changed, or shadowed by a deletion relative to the
//! committed file. [`DiffChangeMonitor`] is the standard implementation,
//! diffing the live text against a base fetched from a [`DiffBaseProvider`]
//! (the actual VCS binding, injected by the application).

use std::{
  cell::RefCell,
  rc::Rc,
};

use anyhow::Result;
use crucible_core::{
  FileId,
  LineChange,
};
use crucible_event::{
  HookRegistry,
  HookToken,
};
use ropey::Rope;

mod diff;
mod worker;

pub use diff::{
  Diff,
  DiffHandle,
  Hunk,
};
pub use worker::{
  DiffUpdate,
  DiffUpdateHook,
};

/// Fetches the unedited content of a file from version control, as a base
/// for diffing. Implemented by the application's VCS binding.
pub trait DiffBaseProvider {
  fn diff_base(&self, file: &FileId) -> Result<Vec<u8>>;
}

/// Classifies live buffer lines against a version-control baseline.
///
/// Monitors are keyed to one file. A buffer that rebinds to another file
/// tears its monitor down (disconnecting its `changed` subscription first)
/// and acquires a fresh one.
pub trait ChangeMonitor {
  /// Re-fetches the baseline. Failure degrades to "no changes" and is not
  /// surfaced to the caller.
  fn reload(&self);

  fn change_for_line(&self, line: usize) -> LineChange;

  /// Feeds the current document text after an edit.
  fn update_document(&self, text: Rope);

  fn connect_changed(&self, handler: Box<dyn FnMut()>) -> HookToken;

  fn disconnect_changed(&self, token: HookToken);
}

/// [`ChangeMonitor`] over a [`DiffHandle`], with the base text supplied by
/// a [`DiffBaseProvider`].
pub struct DiffChangeMonitor {
  file:     FileId,
  provider: Rc<dyn DiffBaseProvider>,
  handle:   DiffHandle,
  changed:  RefCell<HookRegistry<()>>,
}

impl DiffChangeMonitor {
  /// Creates a monitor for `file` seeded with the current document text and
  /// immediately loads the baseline. If the provider has no base for the
  /// file (untracked, VCS error), every line reads as unchanged until a
  /// later [`reload`](ChangeMonitor::reload) succeeds.
  pub fn new(file: FileId, provider: Rc<dyn DiffBaseProvider>, doc: Rope) -> Self {
    let monitor = Self {
      file,
      provider,
      handle: DiffHandle::new(doc.clone(), doc),
      changed: RefCell::new(HookRegistry::new()),
    };
    monitor.reload();
    monitor
  }

  pub fn file(&self) -> &FileId {
    &self.file
  }

  pub fn handle(&self) -> &DiffHandle {
    &self.handle
  }

  fn publish(&self) {
    if self.handle.poll() {
      self.changed.borrow_mut().emit(&());
    }
  }
}

impl ChangeMonitor for DiffChangeMonitor {
  fn reload(&self) {
    match self.provider.diff_base(&self.file) {
      Ok(bytes) => {
        let base = Rope::from_str(&String::from_utf8_lossy(&bytes));
        self.handle.update_base(base);
        self.publish();
      },
      Err(err) => {
        log::debug!("no diff base for {}: {err:#}", self.file);
      },
    }
  }

  fn change_for_line(&self, line: usize) -> LineChange {
    self.handle.load().change_for_line(line)
  }

  fn update_document(&self, text: Rope) {
    self.handle.update_document(text);
    self.publish();
  }

  fn connect_changed(&self, mut handler: Box<dyn FnMut()>) -> HookToken {
    self.changed.borrow_mut().connect(move |()| handler())
  }

  fn disconnect_changed(&self, token: HookToken) {
    self.changed.borrow_mut().disconnect(token);
  }
}
