//! Debounced async event handlers.

use std::time::Duration;

use futures_executor::block_on;
use tokio::{
  sync::mpsc::{
    self,
    Sender,
    error::TrySendError,
  },
  time::{
    Instant,
    sleep_until,
  },
};

/// How long a synchronous sender may block on a full channel before the
/// event is dropped. Dropping an event is recoverable; stalling the event
/// loop is not.
const FULL_CHANNEL_GRACE: Duration = Duration::from_millis(2);

const CHANNEL_CAPACITY: usize = 128;

/// A handler that runs on a background tokio task and coalesces bursts of
/// events before acting on them.
///
/// `handle_event` is called for every event as it arrives and decides the
/// debounce deadline: return `None` to act immediately (or to keep waiting
/// for more input), or a new/extended [`Instant`] to postpone the work.
/// When the deadline passes without further events, `finish_debounce` runs.
pub trait AsyncHook: Send + 'static + Sized {
  type Event: Send + 'static;

  fn handle_event(&mut self, event: Self::Event, deadline: Option<Instant>) -> Option<Instant>;

  fn finish_debounce(&mut self);

  fn spawn(self) -> Sender<Self::Event> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    // Hooks spawned outside a runtime (plain unit tests) get a dead channel
    // rather than a panic.
    if tokio::runtime::Handle::try_current().is_ok() {
      tokio::spawn(drive(self, rx));
    }
    tx
  }
}

async fn drive<H: AsyncHook>(mut hook: H, mut rx: mpsc::Receiver<H::Event>) {
  let mut deadline: Option<Instant> = None;
  loop {
    let event = match deadline {
      Some(due) => {
        tokio::select! {
          event = rx.recv() => event,
          _ = sleep_until(due) => {
            hook.finish_debounce();
            deadline = None;
            continue;
          },
        }
      },
      None => rx.recv().await,
    };
    let Some(event) = event else {
      // all senders gone; flush any pending work before exiting
      if deadline.is_some() {
        hook.finish_debounce();
      }
      break;
    };
    deadline = hook.handle_event(event, deadline);
  }
}

/// Send from synchronous code, blocking at most [`FULL_CHANNEL_GRACE`] on a
/// full channel. Events that still do not fit are dropped.
pub fn send_blocking<T>(tx: &Sender<T>, event: T) {
  match tx.try_send(event) {
    Ok(()) => {},
    Err(TrySendError::Full(event)) => {
      let _ = block_on(tx.send_timeout(event, FULL_CHANNEL_GRACE));
    },
    Err(TrySendError::Closed(_)) => {
      log::warn!("event dropped: receiver task has exited");
    },
  }
}

/// Non-blocking send. Returns whether the event was accepted.
pub fn try_send<T>(tx: &Sender<T>, event: T) -> bool {
  tx.try_send(event).is_ok()
}
