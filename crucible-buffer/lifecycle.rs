//! Hold/release reference counting with deferred reclamation.
//!
//! Views hold the buffer while they display it. When the last hold is
//! released the buffer does not die immediately: a grace period lets
//! "close one view, open another on the same buffer" patterns reuse the
//! loaded state instead of discarding and reloading it.

use std::time::{
  Duration,
  Instant,
};

pub const RECLAIM_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Active,
  PendingReclamation,
  Reclaimed,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
  generation: u64,
  due:        Instant,
}

/// The lifecycle state machine. Time is injected by the caller: the owner's
/// event loop passes `now` into [`release`](Lifecycle::release) and polls
/// [`poll_reclaim`](Lifecycle::poll_reclaim), so the whole machine stays
/// deterministic and single-threaded.
#[derive(Debug)]
pub struct Lifecycle {
  hold_count: u32,
  state:      LifecycleState,
  generation: u64,
  deadline:   Option<Deadline>,
  grace:      Duration,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::with_grace(RECLAIM_GRACE)
  }

  pub fn with_grace(grace: Duration) -> Self {
    Self {
      hold_count: 0,
      state: LifecycleState::Active,
      generation: 0,
      deadline: None,
      grace,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn hold_count(&self) -> u32 {
    self.hold_count
  }

  /// Takes a hold. Cancels a pending reclamation and returns the machine to
  /// `Active`.
  pub fn hold(&mut self) {
    self.hold_count += 1;
    self.cancel_pending();
  }

  /// Drops a hold. When the count reaches zero and the buffer is still
  /// bound to a context, schedules reclamation after the grace period.
  ///
  /// Releasing with no outstanding hold is a caller bug, not a recoverable
  /// condition.
  pub fn release(&mut self, now: Instant, has_context: bool) {
    assert!(
      self.hold_count > 0,
      "buffer released without a matching hold"
    );
    self.hold_count -= 1;

    if self.hold_count == 0 && has_context && self.deadline.is_none() {
      self.generation += 1;
      self.deadline = Some(Deadline {
        generation: self.generation,
        due:        now + self.grace,
      });
      self.state = LifecycleState::PendingReclamation;
    }
  }

  /// Checks the grace timer. Returns `true` exactly once, when a scheduled
  /// deadline of the current generation has passed; the machine is then
  /// `Reclaimed`.
  pub fn poll_reclaim(&mut self, now: Instant) -> bool {
    let Some(deadline) = self.deadline else {
      return false;
    };
    if deadline.generation != self.generation || now < deadline.due {
      return false;
    }
    self.deadline = None;
    self.state = LifecycleState::Reclaimed;
    true
  }

  /// Cancels any scheduled reclamation. Idempotent; used by `hold` and by
  /// context teardown (where reclamation is the owner's shutdown problem,
  /// not the timer's).
  pub fn cancel_pending(&mut self) {
    self.generation += 1;
    self.deadline = None;
    if self.state == LifecycleState::PendingReclamation {
      self.state = LifecycleState::Active;
    }
  }
}
