//! Rope-backed text buffer with line/offset addressing and change notification.
//!
//! The layout core treats the buffer as an external collaborator: a mutable character
//! sequence addressed by **character offsets** (Unicode scalar values) and **1-based
//! line numbers**, with a version counter and structured change events. This module
//! provides a concrete implementation over [`ropey::Rope`] so the core is testable
//! without a host editor.
//!
//! Change notification uses an explicit observer list with deterministic
//! unsubscribe ([`ListenerId`]), not ad hoc callbacks; listeners are invoked in
//! subscription order after every edit.

use ropey::Rope;
use std::sync::Arc;

/// A line's position within the buffer: a half-open char-offset range plus its
/// 1-based line number.
///
/// The range excludes the trailing newline. `LineSpan`s are derived from the
/// buffer's current state and become stale after any edit at or before the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    /// Char offset of the first character of the line.
    pub offset: usize,
    /// Length of the line in chars, excluding the line terminator.
    pub length: usize,
    /// 1-based line number.
    pub line_number: usize,
}

impl LineSpan {
    /// Exclusive end offset of the line content.
    pub fn end_offset(&self) -> usize {
        self.offset + self.length
    }

    /// Returns `true` if `offset` lies within `[self.offset, self.end_offset())`.
    pub fn contains(&self, offset: usize) -> bool {
        self.offset <= offset && offset < self.end_offset()
    }
}

/// A structured description of a single buffer edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferChange {
    /// Char offset where the edit took place.
    pub offset: usize,
    /// Number of chars removed at `offset`.
    pub removed: usize,
    /// Number of chars inserted at `offset`.
    pub inserted: usize,
    /// 1-based number of the first line affected by the edit.
    pub first_line: usize,
    /// Net change in line count (`+n` for inserted newlines, `-n` for deleted).
    pub line_delta: isize,
    /// Buffer version before the edit.
    pub old_version: u64,
    /// Buffer version after the edit.
    pub new_version: u64,
}

impl BufferChange {
    /// Signed change in char count.
    pub fn char_delta(&self) -> isize {
        self.inserted as isize - self.removed as isize
    }
}

/// Callback invoked after every buffer edit.
pub type ChangeListener = Box<dyn FnMut(&BufferChange) + Send>;

/// Handle returned by [`TextBuffer::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A versioned, mutable character sequence with line addressing.
pub struct TextBuffer {
    rope: Rope,
    version: u64,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
}

impl TextBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::from_text("")
    }

    /// Create a buffer from initial text.
    pub fn from_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            version: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Current buffer version. Incremented by every edit.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Total line count. An empty buffer has one (empty) line.
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Total char count.
    pub fn char_count(&self) -> usize {
        self.rope.len_chars()
    }

    /// Get the span of a 1-based line number. Out-of-range line numbers clamp to
    /// the nearest valid line.
    pub fn line_span(&self, line_number: usize) -> LineSpan {
        let line_number = line_number.clamp(1, self.line_count());
        let idx = line_number - 1;
        let start = self.rope.line_to_char(idx);
        let end = if idx + 1 < self.rope.len_lines() {
            self.rope.line_to_char(idx + 1)
        } else {
            self.rope.len_chars()
        };
        let mut length = end - start;
        // Exclude the line terminator.
        if length > 0 && self.rope.char(start + length - 1) == '\n' {
            length -= 1;
            if length > 0 && self.rope.char(start + length - 1) == '\r' {
                length -= 1;
            }
        }
        LineSpan {
            offset: start,
            length,
            line_number,
        }
    }

    /// Text of a 1-based line, excluding the line terminator.
    pub fn line_text(&self, line_number: usize) -> String {
        let span = self.line_span(line_number);
        self.slice(span.offset, span.end_offset())
    }

    /// Substring by char-offset range. Offsets clamp to the buffer length.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let len = self.rope.len_chars();
        let start = start.min(len);
        let end = end.clamp(start, len);
        self.rope.slice(start..end).to_string()
    }

    /// 1-based line number containing `offset`. Offsets past the end clamp to the
    /// last line.
    pub fn offset_to_line(&self, offset: usize) -> usize {
        let offset = offset.min(self.rope.len_chars());
        self.rope.char_to_line(offset) + 1
    }

    /// (1-based line, 1-based column) for a char offset.
    pub fn offset_to_location(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.rope.len_chars());
        let line_idx = self.rope.char_to_line(offset);
        let column = offset - self.rope.line_to_char(line_idx) + 1;
        (line_idx + 1, column)
    }

    /// Char start offsets of every line, in order. Shared with background workers
    /// as an immutable snapshot.
    pub fn line_start_offsets(&self) -> Arc<Vec<usize>> {
        let starts = (0..self.rope.len_lines())
            .map(|i| self.rope.line_to_char(i))
            .collect();
        Arc::new(starts)
    }

    /// Full buffer text.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Insert `text` at `offset` (clamped), returning the change record.
    pub fn insert(&mut self, offset: usize, text: &str) -> BufferChange {
        let offset = offset.min(self.rope.len_chars());
        let first_line = self.offset_to_line(offset);
        let lines_before = self.rope.len_lines();
        self.rope.insert(offset, text);
        let change = BufferChange {
            offset,
            removed: 0,
            inserted: text.chars().count(),
            first_line,
            line_delta: self.rope.len_lines() as isize - lines_before as isize,
            old_version: self.version,
            new_version: self.version + 1,
        };
        self.commit(change)
    }

    /// Remove the char range `[start, end)` (clamped), returning the change record.
    pub fn remove(&mut self, start: usize, end: usize) -> BufferChange {
        let len = self.rope.len_chars();
        let start = start.min(len);
        let end = end.clamp(start, len);
        let first_line = self.offset_to_line(start);
        let lines_before = self.rope.len_lines();
        self.rope.remove(start..end);
        let change = BufferChange {
            offset: start,
            removed: end - start,
            inserted: 0,
            first_line,
            line_delta: self.rope.len_lines() as isize - lines_before as isize,
            old_version: self.version,
            new_version: self.version + 1,
        };
        self.commit(change)
    }

    fn commit(&mut self, change: BufferChange) -> BufferChange {
        self.version = change.new_version;
        for (_, listener) in self.listeners.iter_mut() {
            listener(&change);
        }
        change
    }

    /// Subscribe to change events. Listeners run in subscription order.
    pub fn subscribe(&mut self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if the id was already removed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_line_span_basics() {
        let buffer = TextBuffer::from_text("first\nsecond\nthird");
        assert_eq!(buffer.line_count(), 3);

        let l1 = buffer.line_span(1);
        assert_eq!((l1.offset, l1.length, l1.line_number), (0, 5, 1));

        let l2 = buffer.line_span(2);
        assert_eq!((l2.offset, l2.length), (6, 6));

        let l3 = buffer.line_span(3);
        assert_eq!((l3.offset, l3.length), (13, 5));
        assert_eq!(buffer.line_text(2), "second");
    }

    #[test]
    fn test_line_span_clamps_out_of_range() {
        let buffer = TextBuffer::from_text("a\nb");
        assert_eq!(buffer.line_span(0).line_number, 1);
        assert_eq!(buffer.line_span(99).line_number, 2);
    }

    #[test]
    fn test_crlf_excluded_from_length() {
        let buffer = TextBuffer::from_text("ab\r\ncd");
        assert_eq!(buffer.line_span(1).length, 2);
        assert_eq!(buffer.line_text(1), "ab");
    }

    #[test]
    fn test_insert_reports_delta() {
        let mut buffer = TextBuffer::from_text("hello world");
        let change = buffer.insert(5, "\nmid\n");
        assert_eq!(change.offset, 5);
        assert_eq!(change.inserted, 5);
        assert_eq!(change.line_delta, 2);
        assert_eq!(change.first_line, 1);
        assert_eq!(buffer.version(), 1);
        assert_eq!(buffer.line_count(), 3);
    }

    #[test]
    fn test_remove_across_lines() {
        let mut buffer = TextBuffer::from_text("one\ntwo\nthree");
        let change = buffer.remove(2, 9);
        assert_eq!(change.removed, 7);
        assert_eq!(change.line_delta, -2);
        assert_eq!(buffer.text(), "onhree");
    }

    #[test]
    fn test_offset_to_location() {
        let buffer = TextBuffer::from_text("ab\ncd");
        assert_eq!(buffer.offset_to_location(0), (1, 1));
        assert_eq!(buffer.offset_to_location(4), (2, 2));
        assert_eq!(buffer.offset_to_line(3), 2);
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let buffer = TextBuffer::from_text("héllo\nwörld");
        assert_eq!(buffer.line_span(1).length, 5);
        assert_eq!(buffer.line_span(2).offset, 6);
        assert_eq!(buffer.slice(1, 2), "é");
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut buffer = TextBuffer::from_text("x");

        let sink = Arc::clone(&seen);
        let id = buffer.subscribe(Box::new(move |change| {
            sink.lock().unwrap().push(change.new_version);
        }));

        buffer.insert(0, "a");
        buffer.remove(0, 1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        assert!(buffer.unsubscribe(id));
        assert!(!buffer.unsubscribe(id));
        buffer.insert(0, "b");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_line_start_offsets_snapshot() {
        let buffer = TextBuffer::from_text("aa\nbbb\nc");
        assert_eq!(*buffer.line_start_offsets(), vec![0, 3, 7]);
    }
}
