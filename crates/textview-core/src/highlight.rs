//! Syntax highlight spans and asynchronous highlight coordination.
//!
//! A [`HighlightSource`] produces, per line, an ordered list of scope-tagged
//! [`ColoredSpan`]s that tile the line exactly. Sources may be slow: they run
//! off the interactive thread and deliver results through an mpsc channel.
//!
//! The [`HighlightCoordinator`] is the single reconciliation point between that
//! background work and the owner-thread layout cache:
//!
//! - a layout request first waits a short, bounded time for the line's result;
//! - on timeout the line renders with a single default-scope span and the
//!   receiver is parked, so rendering never blocks indefinitely;
//! - [`HighlightCoordinator::poll_completions`] later drains finished results on
//!   the owner thread and reports which lines need re-layout;
//! - at most one request is in flight per line, and a cancellation epoch rotated
//!   on purge prevents stale results from being published.

use crate::buffer::LineSpan;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::time::Duration;

/// An interned syntax scope tag (e.g. `"string.quoted"`). The empty scope is the
/// default/plain style.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    /// Create a scope from its dotted name.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The default (plain) scope.
    pub fn empty() -> Self {
        Self(Arc::from(""))
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the default scope.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::empty()
    }
}

/// A scope-tagged sub-range of a line, in **line-relative char offsets**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColoredSpan {
    /// Char offset relative to the line start.
    pub offset: usize,
    /// Length in chars.
    pub length: usize,
    /// Syntax scope used for style lookup.
    pub scope: Scope,
}

impl ColoredSpan {
    /// Create a span.
    pub fn new(offset: usize, length: usize, scope: Scope) -> Self {
        Self {
            offset,
            length,
            scope,
        }
    }

    /// Exclusive end offset.
    pub fn end_offset(&self) -> usize {
        self.offset + self.length
    }
}

/// The normalized highlight result for one line: spans tiling `[0, line_len)`
/// exactly, ordered, non-overlapping, gaps filled with the default scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpans {
    spans: Vec<ColoredSpan>,
    line_len: usize,
}

impl LineSpans {
    /// Normalize raw spans into an exact tiling of `[0, line_len)`.
    ///
    /// Spans are clipped to the line, sorted by offset, overlaps resolved in
    /// favor of the earlier span, and gaps filled with the default scope. An
    /// empty line tiles to an empty span list.
    pub fn tile(mut raw: Vec<ColoredSpan>, line_len: usize) -> Self {
        raw.retain(|s| s.offset < line_len && s.length > 0);
        raw.sort_by_key(|s| s.offset);

        let mut spans = Vec::with_capacity(raw.len() + 1);
        let mut cursor = 0usize;
        for span in raw {
            let start = span.offset.max(cursor);
            let end = span.end_offset().min(line_len);
            if start >= end {
                continue;
            }
            if start > cursor {
                spans.push(ColoredSpan::new(cursor, start - cursor, Scope::empty()));
            }
            spans.push(ColoredSpan::new(start, end - start, span.scope));
            cursor = end;
        }
        if cursor < line_len {
            spans.push(ColoredSpan::new(cursor, line_len - cursor, Scope::empty()));
        }
        Self { spans, line_len }
    }

    /// A single default-scope span covering the whole line.
    pub fn plain(line_len: usize) -> Self {
        Self::tile(Vec::new(), line_len)
    }

    /// The tiling span list.
    pub fn spans(&self) -> &[ColoredSpan] {
        &self.spans
    }

    /// Line length this tiling covers.
    pub fn line_len(&self) -> usize {
        self.line_len
    }

    /// Clip the tiling to the line-relative sub-range `[offset, offset+length)`,
    /// splitting boundary spans. Used for partial-line layout of fold parts.
    pub fn trim(&self, offset: usize, length: usize) -> Vec<ColoredSpan> {
        let end = offset + length;
        let mut result = Vec::new();
        for span in &self.spans {
            if span.end_offset() <= offset {
                continue;
            }
            if span.offset >= end {
                break;
            }
            let start = span.offset.max(offset);
            let stop = span.end_offset().min(end);
            result.push(ColoredSpan::new(start, stop - start, span.scope.clone()));
        }
        result
    }
}

/// Shared cancellation flag checked by background work before publishing.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a fresh, uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A completed highlight computation, sent back over the request's channel.
#[derive(Debug)]
pub struct HighlightReply {
    line_number: usize,
    line_offset: usize,
    spans: LineSpans,
    epoch: u64,
}

/// One highlight request handed to a [`HighlightSource`].
///
/// The source computes spans for the full line text and calls
/// [`finish`](HighlightRequest::finish) (on any thread). Dropping the request
/// without finishing counts as a failed computation; the line will be
/// re-requested on its next layout.
pub struct HighlightRequest {
    line: LineSpan,
    text: String,
    cancel: CancelFlag,
    epoch: u64,
    reply: Sender<HighlightReply>,
}

impl HighlightRequest {
    /// The line being highlighted.
    pub fn line(&self) -> LineSpan {
        self.line
    }

    /// Full line text (without the line terminator).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Cancellation flag; long computations should check it periodically.
    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Publish the result. `raw` spans are in line-relative char offsets and are
    /// normalized into an exact tiling before delivery.
    pub fn finish(self, raw: Vec<ColoredSpan>) {
        let reply = HighlightReply {
            line_number: self.line.line_number,
            line_offset: self.line.offset,
            spans: LineSpans::tile(raw, self.line.length),
            epoch: self.epoch,
        };
        // The receiver disappears on purge; nothing to do then.
        let _ = self.reply.send(reply);
    }
}

/// An asynchronous producer of colored spans, one line at a time.
pub trait HighlightSource: Send {
    /// Begin highlighting. Implementations may compute synchronously and call
    /// [`HighlightRequest::finish`] before returning, or hand the request to a
    /// worker thread.
    fn request_highlight(&self, request: HighlightRequest);
}

/// A [`HighlightSource`] that answers every line with default-scope spans.
/// Useful as a stand-in when no grammar is configured.
#[derive(Debug, Default)]
pub struct PlainHighlightSource;

impl HighlightSource for PlainHighlightSource {
    fn request_highlight(&self, request: HighlightRequest) {
        request.finish(Vec::new());
    }
}

/// Cached spans for one line, valid only while the line identity matches.
#[derive(Debug)]
struct CachedSpans {
    offset: usize,
    length: usize,
    spans: LineSpans,
}

/// Owner-thread coordinator between layout and background highlighting.
pub struct HighlightCoordinator {
    source: Box<dyn HighlightSource>,
    cached: HashMap<usize, CachedSpans>,
    pending: HashMap<usize, Receiver<HighlightReply>>,
    cancel: CancelFlag,
    epoch: u64,
}

impl HighlightCoordinator {
    /// Create a coordinator over a highlight source.
    pub fn new(source: Box<dyn HighlightSource>) -> Self {
        Self {
            source,
            cached: HashMap::new(),
            pending: HashMap::new(),
            cancel: CancelFlag::new(),
            epoch: 0,
        }
    }

    /// Spans for `line`, clipped to the line-relative sub-range
    /// `[sub_offset, sub_offset+sub_length)`.
    ///
    /// Waits at most `timeout` for a fresh computation. Returns the spans and a
    /// flag that is `false` when the result is the provisional default-scope
    /// fallback (the real result will arrive through
    /// [`poll_completions`](Self::poll_completions)).
    pub fn highlighted_line(
        &mut self,
        line: LineSpan,
        text: &str,
        sub_offset: usize,
        sub_length: usize,
        timeout: Duration,
    ) -> (Vec<ColoredSpan>, bool) {
        if let Some(cached) = self.cached.get(&line.line_number)
            && cached.offset == line.offset
            && cached.length == line.length
        {
            return (cached.spans.trim(sub_offset, sub_length), true);
        }

        // One in-flight request per line.
        if self.pending.contains_key(&line.line_number) {
            return (Self::plain_spans(sub_offset, sub_length), false);
        }

        let (tx, rx) = channel();
        self.source.request_highlight(HighlightRequest {
            line,
            text: text.to_string(),
            cancel: self.cancel.clone(),
            epoch: self.epoch,
            reply: tx,
        });

        match rx.recv_timeout(timeout) {
            Ok(reply) => {
                let spans = reply.spans.clone();
                self.store(reply);
                (spans.trim(sub_offset, sub_length), true)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.pending.insert(line.line_number, rx);
                (Self::plain_spans(sub_offset, sub_length), false)
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Source dropped the request; degrade to plain and retry later.
                log::warn!(
                    "highlight source dropped request for line {}",
                    line.line_number
                );
                (Self::plain_spans(sub_offset, sub_length), false)
            }
        }
    }

    fn plain_spans(sub_offset: usize, sub_length: usize) -> Vec<ColoredSpan> {
        if sub_length == 0 {
            Vec::new()
        } else {
            vec![ColoredSpan::new(sub_offset, sub_length, Scope::empty())]
        }
    }

    fn store(&mut self, reply: HighlightReply) {
        if reply.epoch != self.epoch {
            return;
        }
        self.cached.insert(
            reply.line_number,
            CachedSpans {
                offset: reply.line_offset,
                length: reply.spans.line_len(),
                spans: reply.spans,
            },
        );
    }

    /// Drain finished background computations, store their results, and return
    /// the line numbers whose layout must be regenerated.
    pub fn poll_completions(&mut self) -> Vec<usize> {
        let mut completed = Vec::new();
        let mut finished_keys = Vec::new();
        for (&line_number, rx) in self.pending.iter() {
            match rx.try_recv() {
                Ok(reply) => {
                    finished_keys.push((line_number, Some(reply)));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    finished_keys.push((line_number, None));
                }
            }
        }
        for (line_number, reply) in finished_keys {
            self.pending.remove(&line_number);
            if let Some(reply) = reply {
                let fresh = reply.epoch == self.epoch;
                self.store(reply);
                if fresh {
                    completed.push(line_number);
                }
            }
        }
        completed.sort_unstable();
        completed
    }

    /// Returns `true` if a computation for `line_number` is still in flight.
    pub fn is_pending(&self, line_number: usize) -> bool {
        self.pending.contains_key(&line_number)
    }

    /// Drop cached and pending results for every line at or after `first_line`.
    /// Called after a buffer edit, which shifts offsets and line numbers.
    pub fn invalidate_from(&mut self, first_line: usize) {
        self.cached.retain(|&line, _| line < first_line);
        self.pending.retain(|&line, _| line < first_line);
    }

    /// Drop the cached result for a single line.
    pub fn invalidate_line(&mut self, line_number: usize) {
        self.cached.remove(&line_number);
    }

    /// Drop everything and rotate the cancellation epoch, so in-flight
    /// computations from before the purge can never publish.
    pub fn purge(&mut self) {
        self.cancel.cancel();
        self.cancel = CancelFlag::new();
        self.epoch += 1;
        self.cached.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn span(offset: usize, length: usize, scope: &str) -> ColoredSpan {
        ColoredSpan::new(offset, length, Scope::new(scope))
    }

    fn line(offset: usize, length: usize, line_number: usize) -> LineSpan {
        LineSpan {
            offset,
            length,
            line_number,
        }
    }

    /// Asserts the tiling invariant: contiguous cover of [0, len) with no gaps
    /// or overlaps.
    fn assert_tiles(spans: &LineSpans) {
        let mut cursor = 0;
        for s in spans.spans() {
            assert_eq!(s.offset, cursor, "gap or overlap at {}", cursor);
            assert!(s.length > 0);
            cursor = s.end_offset();
        }
        assert_eq!(cursor, spans.line_len());
    }

    #[test]
    fn test_tile_fills_gaps_and_clips() {
        let tiled = LineSpans::tile(vec![span(2, 3, "kw"), span(8, 10, "str")], 12);
        assert_tiles(&tiled);
        assert_eq!(tiled.spans().len(), 4);
        assert_eq!(tiled.spans()[0].scope, Scope::empty());
        assert_eq!(tiled.spans()[1].scope, Scope::new("kw"));
        assert_eq!(tiled.spans()[3].length, 4); // 8..12, clipped
    }

    #[test]
    fn test_tile_resolves_overlaps_in_favor_of_earlier() {
        let tiled = LineSpans::tile(vec![span(0, 5, "a"), span(3, 4, "b")], 8);
        assert_tiles(&tiled);
        assert_eq!(tiled.spans()[0], span(0, 5, "a"));
        assert_eq!(tiled.spans()[1], span(5, 2, "b"));
    }

    #[test]
    fn test_tile_empty_line() {
        let tiled = LineSpans::tile(vec![span(0, 3, "a")], 0);
        assert!(tiled.spans().is_empty());
    }

    #[test]
    fn test_trim_splits_boundary_spans() {
        let tiled = LineSpans::tile(vec![span(0, 4, "a"), span(4, 4, "b")], 8);
        let trimmed = tiled.trim(2, 4);
        assert_eq!(trimmed, vec![span(2, 2, "a"), span(4, 2, "b")]);
    }

    #[test]
    fn test_synchronous_source_completes_in_wait() {
        let mut coord = HighlightCoordinator::new(Box::new(PlainHighlightSource));
        let (spans, is_final) =
            coord.highlighted_line(line(0, 5, 1), "hello", 0, 5, Duration::from_millis(10));
        assert!(is_final);
        assert_eq!(spans, vec![span(0, 5, "")]);
    }

    /// Source that replies on a worker thread after a delay.
    struct SlowSource {
        delay: Duration,
    }

    impl HighlightSource for SlowSource {
        fn request_highlight(&self, request: HighlightRequest) {
            let delay = self.delay;
            thread::spawn(move || {
                thread::sleep(delay);
                if request.cancel().is_cancelled() {
                    return;
                }
                let len = request.line().length;
                request.finish(vec![ColoredSpan::new(0, len, Scope::new("kw"))]);
            });
        }
    }

    #[test]
    fn test_timeout_falls_back_then_converges() {
        let mut coord = HighlightCoordinator::new(Box::new(SlowSource {
            delay: Duration::from_millis(60),
        }));
        let l = line(0, 4, 1);

        let (spans, is_final) = coord.highlighted_line(l, "text", 0, 4, Duration::from_millis(5));
        assert!(!is_final);
        assert_eq!(spans, vec![span(0, 4, "")]);
        assert!(coord.is_pending(1));

        // A second request while pending must not issue a duplicate.
        let (_, is_final) = coord.highlighted_line(l, "text", 0, 4, Duration::from_millis(1));
        assert!(!is_final);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(coord.poll_completions(), vec![1]);
        assert!(!coord.is_pending(1));

        let (spans, is_final) = coord.highlighted_line(l, "text", 0, 4, Duration::from_millis(1));
        assert!(is_final);
        assert_eq!(spans, vec![span(0, 4, "kw")]);
    }

    #[test]
    fn test_purge_rotates_epoch_and_discards_stale() {
        let mut coord = HighlightCoordinator::new(Box::new(SlowSource {
            delay: Duration::from_millis(40),
        }));
        let l = line(0, 4, 1);
        let (_, is_final) = coord.highlighted_line(l, "text", 0, 4, Duration::from_millis(5));
        assert!(!is_final);

        coord.purge();
        thread::sleep(Duration::from_millis(100));
        // Stale reply must not resurface after the purge.
        assert!(coord.poll_completions().is_empty());
        assert!(!coord.is_pending(1));
    }

    #[test]
    fn test_invalidate_from_drops_shifted_lines() {
        let mut coord = HighlightCoordinator::new(Box::new(PlainHighlightSource));
        for n in 1..=3 {
            let l = line((n - 1) * 10, 5, n);
            coord.highlighted_line(l, "abcde", 0, 5, Duration::from_millis(5));
        }
        coord.invalidate_from(2);
        // Line 1 still cached, lines 2-3 recomputed on demand.
        assert!(coord.cached.contains_key(&1));
        assert!(!coord.cached.contains_key(&2));
        assert!(!coord.cached.contains_key(&3));
    }
}
