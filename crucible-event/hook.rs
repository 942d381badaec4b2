//! Synchronous callback registry with explicit subscription tokens.
//!
//! Registries are owned by the emitting entity and run on its thread; there
//! is no locking and no delivery queue. Handlers must not call back into
//! the emitter while `emit` is running.

/// Identifies one subscription. Returned by [`HookRegistry::connect`] and
/// consumed by [`HookRegistry::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken(u64);

pub struct HookRegistry<E> {
  next:     u64,
  handlers: Vec<(u64, Box<dyn FnMut(&E)>)>,
}

impl<E> Default for HookRegistry<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E> HookRegistry<E> {
  pub fn new() -> Self {
    Self {
      next:     0,
      handlers: Vec::new(),
    }
  }

  pub fn connect(&mut self, handler: impl FnMut(&E) + 'static) -> HookToken {
    let token = HookToken(self.next);
    self.next += 1;
    self.handlers.push((token.0, Box::new(handler)));
    token
  }

  /// Removes one subscription. Disconnecting an already-removed token is a
  /// no-op and returns `false`, so teardown paths can run twice safely.
  pub fn disconnect(&mut self, token: HookToken) -> bool {
    let before = self.handlers.len();
    self.handlers.retain(|(id, _)| *id != token.0);
    self.handlers.len() != before
  }

  /// Invokes every handler, in connection order.
  pub fn emit(&mut self, event: &E) {
    for (_, handler) in &mut self.handlers {
      handler(event);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    cell::RefCell,
    rc::Rc,
  };

  use super::*;

  #[test]
  fn emit_reaches_handlers_in_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut hooks = HookRegistry::new();

    for tag in ["first", "second"] {
      let seen = Rc::clone(&seen);
      hooks.connect(move |n: &u32| seen.borrow_mut().push((tag, *n)));
    }

    hooks.emit(&7);
    assert_eq!(&*seen.borrow(), &[("first", 7), ("second", 7)]);
  }

  #[test]
  fn disconnect_is_idempotent() {
    let mut hooks = HookRegistry::<()>::new();
    let token = hooks.connect(|_| {});
    assert!(hooks.disconnect(token));
    assert!(!hooks.disconnect(token));
    assert!(hooks.is_empty());
  }

  #[test]
  fn disconnected_handler_stops_firing() {
    let count = Rc::new(RefCell::new(0));
    let mut hooks = HookRegistry::new();
    let token = {
      let count = Rc::clone(&count);
      hooks.connect(move |_: &()| *count.borrow_mut() += 1)
    };

    hooks.emit(&());
    hooks.disconnect(token);
    hooks.emit(&());
    assert_eq!(*count.borrow(), 1);
  }
}
