//! Per-line presentation flags: diagnostic severity buckets merged with
//! version-control change state.

use serde::{
  Deserialize,
  Serialize,
};

use crate::diagnostics::Severity;

/// How a buffer line compares against the version-control baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineChange {
  #[default]
  None,
  Added,
  Changed,
  Deleted,
}

bitflags::bitflags! {
  /// Transient bitset handed to gutter/margin renderers. Computed on demand
  /// from the severity cache and the change monitor; never stored.
  #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
  pub struct LineFlags: u8 {
    const ERROR   = 1 << 0;
    const WARNING = 1 << 1;
    const NOTE    = 1 << 2;
    const ADDED   = 1 << 3;
    const CHANGED = 1 << 4;
    const DELETED = 1 << 5;

    const DIAGNOSTICS = Self::ERROR.bits() | Self::WARNING.bits() | Self::NOTE.bits();
  }
}

impl LineFlags {
  /// Bucket a severity into its flag bit. `Fatal` folds into `ERROR` and
  /// `Deprecated` into `WARNING`; `Ignored` contributes nothing.
  pub fn from_severity(severity: Severity) -> LineFlags {
    match severity {
      Severity::Fatal | Severity::Error => LineFlags::ERROR,
      Severity::Warning | Severity::Deprecated => LineFlags::WARNING,
      Severity::Note => LineFlags::NOTE,
      Severity::Ignored => LineFlags::empty(),
    }
  }

  pub fn from_change(change: LineChange) -> LineFlags {
    match change {
      LineChange::Added => LineFlags::ADDED,
      LineChange::Changed => LineFlags::CHANGED,
      LineChange::Deleted => LineFlags::DELETED,
      LineChange::None => LineFlags::empty(),
    }
  }

  pub fn has_diagnostics(self) -> bool {
    self.intersects(LineFlags::DIAGNOSTICS)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn severity_buckets() {
    assert_eq!(LineFlags::from_severity(Severity::Fatal), LineFlags::ERROR);
    assert_eq!(LineFlags::from_severity(Severity::Error), LineFlags::ERROR);
    assert_eq!(
      LineFlags::from_severity(Severity::Deprecated),
      LineFlags::WARNING
    );
    assert_eq!(LineFlags::from_severity(Severity::Note), LineFlags::NOTE);
    assert!(LineFlags::from_severity(Severity::Ignored).is_empty());
  }

  #[test]
  fn change_bits_do_not_count_as_diagnostics() {
    let flags = LineFlags::from_change(LineChange::Added) | LineFlags::NOTE;
    assert!(flags.has_diagnostics());
    assert!(!LineFlags::from_change(LineChange::Deleted).has_diagnostics());
  }
}
