//! Conversion between [`SourceLocation`] values and live char positions in
//! a mutable [`Rope`].
//!
//! Out-of-bounds input never fails: the line clamps to the last line of the
//! buffer and the column clamps to the end of that line (excluding its
//! terminating newline). Tooling routinely reports locations against a
//! slightly stale revision of the file, so clamping beats erroring here.

use ropey::Rope;

use crate::location::{
  FileId,
  SourceLocation,
};

/// Char index of the end of `line`, before its line break.
pub fn line_end_char(text: &Rope, line: usize) -> usize {
  let line = line.min(text.len_lines().saturating_sub(1));
  let start = text.line_to_char(line);
  let slice = text.line(line);
  let mut len = slice.len_chars();
  if len > 0 && slice.char(len - 1) == '\n' {
    len -= 1;
  }
  if len > 0 && slice.char(len - 1) == '\r' {
    len -= 1;
  }
  start + len
}

/// Whether `char_idx` sits at the end of its line (on the line break, or at
/// the end of the buffer).
pub fn ends_line(text: &Rope, char_idx: usize) -> bool {
  let char_idx = char_idx.min(text.len_chars());
  if char_idx == text.len_chars() {
    return true;
  }
  char_idx == line_end_char(text, text.char_to_line(char_idx))
}

/// Resolve `location` to a char index in `text`, clamping per the module
/// policy. Only line and column participate; the recorded absolute offset
/// is ignored because it goes stale first under edits.
pub fn resolve(text: &Rope, location: &SourceLocation) -> usize {
  let line = location.line.min(text.len_lines().saturating_sub(1));
  let start = text.line_to_char(line);
  let end = line_end_char(text, line);
  (start + location.column).min(end)
}

/// Capture the current line, column, and absolute offset at `char_idx` as an
/// immutable [`SourceLocation`] belonging to `file`.
pub fn capture(text: &Rope, file: FileId, char_idx: usize) -> SourceLocation {
  let char_idx = char_idx.min(text.len_chars());
  let line = text.char_to_line(char_idx);
  let column = char_idx - text.line_to_char(line);
  SourceLocation::new(file, line, column, char_idx)
}
