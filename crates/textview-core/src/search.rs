//! Text search and the background search-result index.
//!
//! The low-level APIs search a UTF-8 `&str` using **character offsets** (not
//! byte offsets) for all public inputs/outputs, supporting plain substring
//! search (escaped and compiled into a regex), regex search, and optional
//! whole-word matching.
//!
//! [`SearchIndex`] keeps the full match set for a document current without
//! blocking the layout thread: every refresh cancels the in-flight scan and
//! starts a worker over an immutable text snapshot. The worker also diffs the
//! new match set against the previous one to compute which visible lines need
//! redrawing: when the match counts are equal it compares position by position
//! (typically a no-op after an edit that shifted nothing), otherwise it
//! unions the line coverage of both sets.

use crate::highlight::CancelFlag;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;
use thiserror::Error;

/// Options that control how search is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// If `true`, performs a case-sensitive search.
    pub case_sensitive: bool,
    /// If `true`, matches only whole words (alphanumeric and `_`).
    pub whole_word: bool,
    /// If `true`, treats the query as a regex pattern.
    pub regex: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            whole_word: false,
            regex: false,
        }
    }
}

/// A search query plus its options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    /// The pattern text. An empty pattern matches nothing.
    pub pattern: String,
    /// Matching options.
    pub options: SearchOptions,
}

impl SearchQuery {
    /// Plain substring query with default options.
    pub fn plain(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            options: SearchOptions::default(),
        }
    }
}

/// A match returned by the search APIs, expressed as a half-open character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Inclusive start character offset.
    pub start: usize,
    /// Exclusive end character offset.
    pub end: usize,
}

impl SearchMatch {
    /// Returns the length of the match in characters.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the match is empty.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns `true` if the match overlaps the half-open char range.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Search errors.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The provided regex pattern failed to compile.
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

#[derive(Debug)]
struct CharIndex {
    char_to_byte: Vec<usize>,
    text_len: usize,
}

impl CharIndex {
    fn new(text: &str) -> Self {
        let mut char_to_byte: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        char_to_byte.push(text.len());
        Self {
            char_to_byte,
            text_len: text.len(),
        }
    }

    fn char_count(&self) -> usize {
        self.char_to_byte.len().saturating_sub(1)
    }

    fn byte_to_char(&self, byte_offset: usize) -> usize {
        let clamped = byte_offset.min(self.text_len);
        match self.char_to_byte.binary_search(&clamped) {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }

    fn char_at(&self, text: &str, char_offset: usize) -> Option<char> {
        if char_offset >= self.char_count() {
            return None;
        }
        let start = self.char_to_byte[char_offset];
        let end = self.char_to_byte[char_offset + 1];
        text.get(start..end)?.chars().next()
    }
}

fn compile_search_regex(query: &SearchQuery) -> Result<Regex, SearchError> {
    let pattern = if query.options.regex {
        query.pattern.clone()
    } else {
        regex::escape(&query.pattern)
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(!query.options.case_sensitive)
        .multi_line(true)
        .build()
        .map_err(SearchError::from)
}

fn is_word_char(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

fn is_whole_word(text: &str, index: &CharIndex, m: SearchMatch) -> bool {
    if m.is_empty() {
        return false;
    }
    let before = if m.start == 0 {
        None
    } else {
        index.char_at(text, m.start - 1)
    };
    let after = index.char_at(text, m.end);
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

/// Find all occurrences of `query` in `text`, in order.
///
/// Returns an empty list for an empty pattern. Empty matches are skipped. A
/// set `cancel` flag aborts the scan and returns the matches found so far.
pub fn find_all(
    text: &str,
    query: &SearchQuery,
    cancel: Option<&CancelFlag>,
) -> Result<Vec<SearchMatch>, SearchError> {
    if query.pattern.is_empty() {
        return Ok(Vec::new());
    }

    let re = compile_search_regex(query)?;
    let index = CharIndex::new(text);

    let mut matches: Vec<SearchMatch> = Vec::new();
    for m in re.find_iter(text) {
        if matches.len() % 256 == 0 && cancel.is_some_and(|c| c.is_cancelled()) {
            break;
        }
        let candidate = SearchMatch {
            start: index.byte_to_char(m.start()),
            end: index.byte_to_char(m.end()),
        };
        if candidate.is_empty() {
            continue;
        }
        if query.options.whole_word && !is_whole_word(text, &index, candidate) {
            continue;
        }
        matches.push(candidate);
    }
    Ok(matches)
}

/// 1-based line number containing a char offset, given sorted line starts.
fn offset_to_line(line_starts: &[usize], offset: usize) -> usize {
    line_starts.partition_point(|s| *s <= offset).max(1)
}

/// Lines covered by a match, clamped to the visible window; pushed into `out`.
fn cover_lines(
    line_starts: &[usize],
    m: SearchMatch,
    visible: (usize, usize),
    out: &mut Vec<usize>,
) {
    let first = offset_to_line(line_starts, m.start);
    let last = offset_to_line(line_starts, m.end.saturating_sub(1).max(m.start));
    let (vis_first, vis_last) = visible;
    for line in first.max(vis_first)..=last.min(vis_last) {
        out.push(line);
    }
}

/// Which visible lines changed appearance between two match sets.
///
/// Equal counts: position-by-position fine diff (an unchanged set yields no
/// redraws). Unequal counts: coarse union of both sets' line coverage.
fn reconcile_redraw(
    line_starts: &[usize],
    old: &[SearchMatch],
    new: &[SearchMatch],
    visible: (usize, usize),
) -> Vec<usize> {
    let mut lines = Vec::new();
    if old.len() == new.len() {
        for (a, b) in old.iter().zip(new) {
            if a != b {
                cover_lines(line_starts, *a, visible, &mut lines);
                cover_lines(line_starts, *b, visible, &mut lines);
            }
        }
    } else {
        for m in old.iter().chain(new) {
            cover_lines(line_starts, *m, visible, &mut lines);
        }
    }
    lines.sort_unstable();
    lines.dedup();
    lines
}

struct WorkerResult {
    generation: u64,
    matches: Vec<SearchMatch>,
    redraw_lines: Vec<usize>,
    error: Option<SearchError>,
}

/// A completed background scan, ready to apply on the owner thread.
#[derive(Debug)]
pub struct SearchUpdate {
    /// Visible lines whose search decoration changed.
    pub redraw_lines: Vec<usize>,
}

/// Asynchronously maintained set of all matches in a document.
///
/// All mutation happens on the owner thread; scans run on short-lived worker
/// threads over immutable snapshots. The installed match set is always
/// internally consistent, though it may lag the buffer until the next
/// completed scan.
pub struct SearchIndex {
    query: SearchQuery,
    matches: Arc<Vec<SearchMatch>>,
    cancel: CancelFlag,
    generation: u64,
    inflight: Option<Receiver<WorkerResult>>,
    last_error: Option<SearchError>,
    /// Redraws produced synchronously (query cleared), drained by `poll`.
    pending_redraw: Vec<usize>,
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIndex {
    /// Create an index with no query.
    pub fn new() -> Self {
        Self {
            query: SearchQuery::default(),
            matches: Arc::new(Vec::new()),
            cancel: CancelFlag::new(),
            generation: 0,
            inflight: None,
            last_error: None,
            pending_redraw: Vec::new(),
        }
    }

    /// The active query.
    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    /// Change the active query without rescanning; callers follow up with
    /// [`SearchIndex::refresh`].
    pub fn set_query(&mut self, query: SearchQuery) {
        self.query = query;
    }

    /// The installed match set, sorted by start offset.
    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    /// Whether a background scan is still running.
    pub fn is_pending(&self) -> bool {
        self.inflight.is_some()
    }

    /// The error from the most recent scan, if it failed (e.g. bad regex).
    pub fn last_error(&self) -> Option<&SearchError> {
        self.last_error.as_ref()
    }

    /// Start a scan over a text snapshot, cancelling any scan in flight.
    ///
    /// `visible` is the inclusive 1-based line window used to filter the
    /// redraw set. An empty pattern clears matches synchronously; the lines
    /// previously covered by matches become the redraw set.
    pub fn refresh(
        &mut self,
        text: String,
        line_starts: Arc<Vec<usize>>,
        visible: (usize, usize),
    ) {
        self.cancel.cancel();
        self.cancel = CancelFlag::new();
        self.generation += 1;
        self.inflight = None;

        if self.query.pattern.is_empty() {
            let old = Arc::clone(&self.matches);
            self.pending_redraw = reconcile_redraw(&line_starts, &old, &[], visible);
            self.matches = Arc::new(Vec::new());
            self.last_error = None;
            return;
        }

        let (tx, rx): (Sender<WorkerResult>, Receiver<WorkerResult>) = channel();
        let query = self.query.clone();
        let cancel = self.cancel.clone();
        let generation = self.generation;
        let old = Arc::clone(&self.matches);
        thread::spawn(move || {
            let (matches, error) = match find_all(&text, &query, Some(&cancel)) {
                Ok(matches) => (matches, None),
                Err(err) => (Vec::new(), Some(err)),
            };
            if cancel.is_cancelled() {
                return;
            }
            let redraw_lines = reconcile_redraw(&line_starts, &old, &matches, visible);
            // The owner may have dropped the receiver after a newer refresh.
            let _ = tx.send(WorkerResult {
                generation,
                matches,
                redraw_lines,
                error,
            });
        });
        self.inflight = Some(rx);
    }

    /// Install a completed scan, if one has arrived.
    ///
    /// Returns the redraw set for the owner to repaint. Non-blocking.
    pub fn poll(&mut self) -> Option<SearchUpdate> {
        if !self.pending_redraw.is_empty() {
            return Some(SearchUpdate {
                redraw_lines: std::mem::take(&mut self.pending_redraw),
            });
        }
        let rx = self.inflight.as_ref()?;
        match rx.try_recv() {
            Ok(result) if result.generation == self.generation => {
                self.inflight = None;
                self.matches = Arc::new(result.matches);
                self.last_error = result.error;
                Some(SearchUpdate {
                    redraw_lines: result.redraw_lines,
                })
            }
            Ok(_) => None, // stale generation, keep waiting
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("search worker exited without a result");
                self.inflight = None;
                None
            }
        }
    }

    /// Block until the in-flight scan (if any) completes and install it.
    /// Intended for tests and synchronous hosts.
    pub fn wait(&mut self) -> Option<SearchUpdate> {
        if !self.pending_redraw.is_empty() || self.inflight.is_none() {
            return self.poll();
        }
        let rx = self.inflight.take()?;
        match rx.recv() {
            Ok(result) if result.generation == self.generation => {
                self.matches = Arc::new(result.matches);
                self.last_error = result.error;
                Some(SearchUpdate {
                    redraw_lines: result.redraw_lines,
                })
            }
            _ => None,
        }
    }

    /// The first installed match overlapping the half-open char range.
    pub fn first_match_in(&self, start: usize, end: usize) -> Option<SearchMatch> {
        // Matches are sorted by start and non-empty, so candidates begin at
        // the first match whose end exceeds `start`.
        let idx = self.matches.partition_point(|m| m.end <= start);
        self.matches[idx..]
            .iter()
            .take_while(|m| m.start < end)
            .find(|m| m.overlaps(start, end))
            .copied()
    }

    /// All installed matches overlapping the half-open char range.
    pub fn matches_in(&self, start: usize, end: usize) -> &[SearchMatch] {
        let lo = self.matches.partition_point(|m| m.end <= start);
        let hi = self.matches.partition_point(|m| m.start < end);
        &self.matches[lo.min(hi)..hi]
    }
}
