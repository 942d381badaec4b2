//! Event plumbing for the crucible workspace.
//!
//! Two mechanisms live here. [`hook::HookRegistry`] is a synchronous,
//! single-threaded callback registry: the explicit replacement for a
//! property/signal object system, used for buffer change notifications.
//! [`debounce::AsyncHook`] is the asynchronous side: a background task that
//! coalesces bursts of events (keystrokes, file events) before acting on
//! them.

pub mod debounce;
pub mod hook;

pub use debounce::{
  AsyncHook,
  send_blocking,
  try_send,
};
pub use hook::{
  HookRegistry,
  HookToken,
};
