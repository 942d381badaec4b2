//! The crucible buffer entity.
//!
//! This crate is the consistency core of the editor: it keeps asynchronous,
//! file-scoped facts (diagnostics, version-control change data, unsaved
//! content) coherent with a live, mutable text buffer. The widget layer,
//! plugin loading, and build-system wiring all live elsewhere and interact
//! with this crate only through the collaborator interfaces in
//! [`context`] and the events emitted by [`Buffer`].

pub mod buffer;
pub mod context;
pub mod extension;
pub mod lifecycle;
pub mod overlay;

pub use buffer::{
  Buffer,
  BufferError,
  BufferEvent,
  BufferId,
  Property,
};
pub use context::{
  Context,
  FileInfo,
  FileSettings,
};
pub use extension::{
  Capability,
  Extension,
  LanguageId,
  Symbol,
  TextEdit,
};
pub use lifecycle::{
  Lifecycle,
  LifecycleState,
  RECLAIM_GRACE,
};
pub use overlay::{
  DiagnosticsOverlay,
  TagKind,
  TagSpan,
};
