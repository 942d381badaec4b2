//! Debounced background recomputation for a [`DiffHandle`].
//!
//! Buffer edits arrive faster than diffs are worth recomputing. The hook
//! queues every text revision into the handle immediately (so a direct
//! `load` is never stale) but delays the publish step until the burst has
//! settled.

use std::sync::Arc;

use crucible_event::AsyncHook;
use ropey::Rope;
use tokio::{
  sync::{
    Notify,
    mpsc::Sender,
  },
  time::{
    Duration,
    Instant,
  },
};

use crate::diff::DiffHandle;

const RECOMPUTE_DEBOUNCE: Duration = Duration::from_millis(96);

/// One queued text revision: the live document or the diff base.
pub struct DiffUpdate {
  pub text:    Rope,
  pub is_base: bool,
}

pub struct DiffUpdateHook {
  handle: DiffHandle,
  notify: Arc<Notify>,
}

impl DiffUpdateHook {
  /// Spawns the hook, returning the channel edits should be sent on.
  /// `notify` fires after every published recompute.
  pub fn spawn(handle: DiffHandle, notify: Arc<Notify>) -> Sender<DiffUpdate> {
    AsyncHook::spawn(DiffUpdateHook { handle, notify })
  }
}

impl AsyncHook for DiffUpdateHook {
  type Event = DiffUpdate;

  fn handle_event(&mut self, event: DiffUpdate, deadline: Option<Instant>) -> Option<Instant> {
    if event.is_base {
      self.handle.update_base(event.text);
    } else {
      self.handle.update_document(event.text);
    }
    // keep one deadline per burst instead of sliding it on every keystroke,
    // so a steady typist still sees the gutter update
    Some(deadline.unwrap_or_else(|| Instant::now() + RECOMPUTE_DEBOUNCE))
  }

  fn finish_debounce(&mut self) {
    if self.handle.poll() {
      self.notify.notify_waiters();
    }
  }
}

#[cfg(test)]
mod tests {
  use crucible_core::LineChange;
  use crucible_event::send_blocking;

  use super::*;

  #[tokio::test(start_paused = true)]
  async fn burst_publishes_once_settled() {
    let handle = DiffHandle::new(Rope::from_str("a\n"), Rope::from_str("a\n"));
    let notify = Arc::new(Notify::new());
    let tx = DiffUpdateHook::spawn(handle.clone(), Arc::clone(&notify));

    let notified = notify.notified();
    tokio::pin!(notified);
    // register interest before the worker publishes; notify_waiters does
    // not wake late subscribers
    notified.as_mut().enable();

    send_blocking(&tx, DiffUpdate {
      text:    Rope::from_str("a\nb\n"),
      is_base: false,
    });
    send_blocking(&tx, DiffUpdate {
      text:    Rope::from_str("a\nb\nc\n"),
      is_base: false,
    });

    tokio::task::yield_now().await;
    tokio::time::advance(RECOMPUTE_DEBOUNCE + Duration::from_millis(1)).await;
    notified.await;

    let diff = handle.load();
    assert_eq!(diff.change_for_line(1), LineChange::Added);
    assert_eq!(diff.change_for_line(2), LineChange::Added);
  }
}
