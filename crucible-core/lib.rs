//! Source coordinates and the diagnostic data model shared by every
//! crucible crate.
//!
//! Nothing in here owns a buffer: these are the value types that flow
//! between the diagnostics manager, the change monitor, and the buffer
//! entity, plus the pure coordinate math that maps them onto a live
//! [`ropey::Rope`].

pub mod diagnostics;
pub mod line_flags;
pub mod location;
pub mod position;

pub use diagnostics::{
  Diagnostic,
  DiagnosticSet,
  Severity,
};
pub use line_flags::{
  LineChange,
  LineFlags,
};
pub use location::{
  FileId,
  SourceLocation,
  SourceRange,
};
