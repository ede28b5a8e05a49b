//! The per-line layout cache.
//!
//! A [`LayoutEntry`] bundles everything a renderer needs for one visual line:
//! the displayed text, its shaped form, the styled spans it was built from,
//! and measured extents. Entries are expensive (shaping, styling, marker
//! transforms), so they are cached per line number and validated by an
//! identity key rather than explicit invalidation alone: if the line's
//! offset, length, marker count, or clamped selection changed since the entry
//! was built, the cached entry is stale and rebuilt on access.
//!
//! Lines carrying preedit (input-method composition) text bypass the cache
//! entirely: their displayed text is a splice that exists only during
//! composition, held in a dedicated single-entry slot.

use crate::buffer::LineSpan;
use crate::highlight::ColoredSpan;
use crate::shape::{ShapedLine, StyleRun};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Identity of a cached layout. A mismatch on any field means the cached
/// entry no longer describes the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryKey {
    /// Char offset of the line start.
    pub offset: usize,
    /// Line length in chars.
    pub length: usize,
    /// Number of markers attached to the line.
    pub marker_count: usize,
    /// Selection start, clamped to the line and line-relative; `(0, 0)` when
    /// the selection misses the line.
    pub selection_start: usize,
    /// Selection end, clamped like `selection_start`.
    pub selection_end: usize,
}

impl EntryKey {
    /// Build the identity key for a line under the given absolute selection.
    pub fn new(line: LineSpan, marker_count: usize, selection: Option<(usize, usize)>) -> Self {
        let (selection_start, selection_end) = clamp_selection(line, selection);
        Self {
            offset: line.offset,
            length: line.length,
            marker_count,
            selection_start,
            selection_end,
        }
    }
}

/// Clamp an absolute selection range to a line, returning line-relative
/// offsets; `(0, 0)` when the selection does not touch the line.
pub fn clamp_selection(line: LineSpan, selection: Option<(usize, usize)>) -> (usize, usize) {
    let Some((start, end)) = selection else {
        return (0, 0);
    };
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    let line_end = line.end_offset();
    if end <= line.offset || start >= line_end {
        return (0, 0);
    }
    let s = start.max(line.offset) - line.offset;
    let e = end.min(line_end) - line.offset;
    if s == e { (0, 0) } else { (s, e) }
}

/// A fully built visual line, ready to draw.
pub struct LayoutEntry {
    /// 1-based line number this entry was built for.
    pub line_number: usize,
    /// Displayed text: the laid-out sub-range of the line, with any preedit
    /// text already spliced in.
    pub text: String,
    /// Backend-shaped form of `text`.
    pub shaped: Box<dyn ShapedLine>,
    /// Line-relative colored spans the styling was derived from.
    pub spans: Vec<ColoredSpan>,
    /// Final byte-indexed style runs applied to the shaped text.
    pub runs: Vec<StyleRun>,
    /// Pixel width of the leading whitespace, used for virtual indentation.
    pub indent_width: f64,
    /// Measured pixel width.
    pub width: f64,
    /// Measured pixel height.
    pub height: f64,
    /// Selection and ruler segmentation of the displayed text.
    pub segments: Vec<Segment>,
    /// `false` while the styles are the provisional fallback (highlight still
    /// pending, or the styling budget was exceeded). Provisional entries are
    /// replaced when the real styles arrive.
    pub is_final_styles: bool,
    /// `true` when the entry is eligible for arithmetic geometry shortcuts:
    /// a monospaced font and single-byte-per-char displayed text.
    pub fast_path: bool,
    /// Cache revision at build time. Changes whenever the entry is rebuilt,
    /// letting callers detect idempotent hits.
    pub revision: u64,
}

/// One run of displayed text between selection and ruler boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Start char offset into the displayed text.
    pub start: usize,
    /// Exclusive end char offset.
    pub end: usize,
    /// Whether this run lies inside the selection.
    pub selected: bool,
}

/// Split `[0, length)` at the selection boundaries and, when a vertical ruler
/// is shown, at the ruler column, so the renderer can paint each run's
/// background in one rectangle without crossing the ruler line.
///
/// `selection` is line-relative and clamped (as produced by
/// [`clamp_selection`]); `ruler_column` is the 1-based column of the ruler.
pub fn split_segments(
    length: usize,
    selection: (usize, usize),
    ruler_column: Option<usize>,
) -> Vec<Segment> {
    if length == 0 {
        return Vec::new();
    }
    let mut cuts = vec![0, length];
    let (sel_start, sel_end) = selection;
    if sel_start < sel_end {
        cuts.push(sel_start.min(length));
        cuts.push(sel_end.min(length));
    }
    if let Some(column) = ruler_column {
        let cut = column.saturating_sub(1);
        if cut > 0 && cut < length {
            cuts.push(cut);
        }
    }
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .map(|w| Segment {
            start: w[0],
            end: w[1],
            selected: sel_start < sel_end && w[0] >= sel_start && w[1] <= sel_end.min(length),
        })
        .collect()
}

/// Pixel width of the line's leading whitespace.
///
/// Tabs advance to the next tab stop; the scan ends at the first
/// non-whitespace char. Used to place virtual-space carets on empty lines at
/// the surrounding indentation.
pub fn indent_width(text: &str, char_width: f64, tab_width: usize) -> f64 {
    let tab_width = tab_width.max(1);
    let mut cells = 0usize;
    for ch in text.chars() {
        match ch {
            ' ' => cells += 1,
            '\t' => cells += tab_width - (cells % tab_width),
            _ => break,
        }
    }
    cells as f64 * char_width
}

/// Per-line cache of built layouts.
///
/// Keyed by 1-based line number. Every access validates the stored
/// [`EntryKey`]; stale entries are treated as misses and replaced.
pub struct LayoutCache {
    slots: HashMap<usize, (EntryKey, LayoutEntry)>,
    uncached_slot: Option<(usize, LayoutEntry)>,
    revision: u64,
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            uncached_slot: None,
            revision: 0,
        }
    }

    /// Monotonic counter bumped whenever a freshly built entry is stored.
    /// A repeated lookup returning an entry with the same revision proves the
    /// cache served it without rebuilding.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of cached lines (excluding the uncached slot).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The cached entry for a line, if its identity still matches.
    pub fn get(&self, line_number: usize, key: &EntryKey) -> Option<&LayoutEntry> {
        self.slots
            .get(&line_number)
            .filter(|(stored, _)| stored == key)
            .map(|(_, entry)| entry)
    }

    /// Whether a valid (identity-matching) entry exists for a line.
    pub fn contains(&self, line_number: usize, key: &EntryKey) -> bool {
        self.get(line_number, key).is_some()
    }

    /// Remove and return the entry for a line if its identity still matches.
    /// Callers re-[`insert`](Self::insert) after use; the revision is kept.
    pub fn take(&mut self, line_number: usize, key: &EntryKey) -> Option<LayoutEntry> {
        if self
            .slots
            .get(&line_number)
            .is_some_and(|(stored, _)| stored == key)
        {
            self.slots.remove(&line_number).map(|(_, entry)| entry)
        } else {
            None
        }
    }

    /// Store an entry under its identity key, returning a reference to it.
    ///
    /// Freshly built entries (revision 0) are stamped with a new revision;
    /// entries taken out and re-inserted keep theirs.
    pub fn insert(&mut self, line_number: usize, key: EntryKey, mut entry: LayoutEntry) -> &LayoutEntry {
        if entry.revision == 0 {
            self.revision += 1;
            entry.revision = self.revision;
        }
        match self.slots.entry(line_number) {
            Entry::Occupied(mut occupied) => {
                occupied.insert((key, entry));
                &occupied.into_mut().1
            }
            Entry::Vacant(vacant) => &vacant.insert((key, entry)).1,
        }
    }

    /// Store a preedit (composition) layout in the single uncached slot,
    /// replacing whatever it held.
    pub fn insert_uncached(&mut self, line_number: usize, mut entry: LayoutEntry) -> &LayoutEntry {
        if entry.revision == 0 {
            self.revision += 1;
            entry.revision = self.revision;
        }
        &self.uncached_slot.insert((line_number, entry)).1
    }

    /// Remove and return the uncached-slot entry if it belongs to
    /// `line_number`.
    pub fn take_uncached(&mut self, line_number: usize) -> Option<LayoutEntry> {
        if self
            .uncached_slot
            .as_ref()
            .is_some_and(|(line, _)| *line == line_number)
        {
            self.uncached_slot.take().map(|(_, entry)| entry)
        } else {
            None
        }
    }

    /// The uncached-slot entry, if it belongs to `line_number`.
    pub fn get_uncached(&self, line_number: usize) -> Option<&LayoutEntry> {
        self.uncached_slot
            .as_ref()
            .filter(|(line, _)| *line == line_number)
            .map(|(_, entry)| entry)
    }

    /// Drop the cached entry for one line (uncached slot included).
    pub fn invalidate_line(&mut self, line_number: usize) {
        self.slots.remove(&line_number);
        if self
            .uncached_slot
            .as_ref()
            .is_some_and(|(line, _)| *line == line_number)
        {
            self.uncached_slot = None;
        }
    }

    /// Drop every entry at or after `first_line`. Edits shift offsets and
    /// line numbers of all following lines, so their identities are void.
    pub fn invalidate_from(&mut self, first_line: usize) {
        self.slots.retain(|&line, _| line < first_line);
        if self
            .uncached_slot
            .as_ref()
            .is_some_and(|(line, _)| *line >= first_line)
        {
            self.uncached_slot = None;
        }
    }

    /// Drop entries outside the inclusive line window. Called on scroll.
    pub fn evict_outside(&mut self, first_line: usize, last_line: usize) {
        self.slots
            .retain(|&line, _| first_line <= line && line <= last_line);
    }

    /// Drop everything.
    pub fn purge(&mut self) {
        self.slots.clear();
        self.uncached_slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{MonospaceShaper, TextShaper};

    fn line(offset: usize, length: usize, line_number: usize) -> LineSpan {
        LineSpan {
            offset,
            length,
            line_number,
        }
    }

    fn entry(line_number: usize, text: &str) -> LayoutEntry {
        let shaper = MonospaceShaper::with_cell_size(10.0, 20.0, 4);
        let mut shaped = shaper.shape_line();
        shaped.set_text(text);
        let (width, height) = shaped.measure();
        LayoutEntry {
            line_number,
            text: text.to_string(),
            shaped,
            spans: Vec::new(),
            runs: Vec::new(),
            indent_width: 0.0,
            width,
            height,
            segments: Vec::new(),
            is_final_styles: true,
            fast_path: true,
            revision: 0,
        }
    }

    #[test]
    fn test_clamp_selection() {
        let l = line(10, 5, 2); // covers [10, 15)
        assert_eq!(clamp_selection(l, None), (0, 0));
        assert_eq!(clamp_selection(l, Some((0, 8))), (0, 0));
        assert_eq!(clamp_selection(l, Some((0, 12))), (0, 2));
        assert_eq!(clamp_selection(l, Some((12, 14))), (2, 4));
        assert_eq!(clamp_selection(l, Some((12, 99))), (2, 5));
        // Reversed ranges normalize.
        assert_eq!(clamp_selection(l, Some((14, 12))), (2, 4));
        // Zero-width after clamping means no selection on this line.
        assert_eq!(clamp_selection(l, Some((15, 20))), (0, 0));
    }

    #[test]
    fn test_identity_mismatch_is_miss() {
        let mut cache = LayoutCache::new();
        let l = line(0, 5, 1);
        let key = EntryKey::new(l, 0, None);
        cache.insert(1, key, entry(1, "hello"));
        assert!(cache.get(1, &key).is_some());

        // Same line number, different length: stale.
        let moved = EntryKey::new(line(0, 6, 1), 0, None);
        assert!(cache.get(1, &moved).is_none());

        // Marker count participates in identity.
        let marked = EntryKey::new(l, 1, None);
        assert!(cache.get(1, &marked).is_none());

        // Selection participates in identity.
        let selected = EntryKey::new(l, 0, Some((1, 3)));
        assert!(cache.get(1, &selected).is_none());
    }

    #[test]
    fn test_revision_detects_rebuild() {
        let mut cache = LayoutCache::new();
        let key = EntryKey::new(line(0, 5, 1), 0, None);
        cache.insert(1, key, entry(1, "hello"));
        let first = cache.get(1, &key).map(|e| e.revision);
        let second = cache.get(1, &key).map(|e| e.revision);
        assert_eq!(first, second);

        cache.insert(1, key, entry(1, "hello"));
        let third = cache.get(1, &key).map(|e| e.revision);
        assert_ne!(first, third);
    }

    #[test]
    fn test_invalidate_from_keeps_earlier_lines() {
        let mut cache = LayoutCache::new();
        for n in 1..=5 {
            let key = EntryKey::new(line(n * 10, 5, n), 0, None);
            cache.insert(n, key, entry(n, "x"));
        }
        cache.invalidate_from(3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(2, &EntryKey::new(line(20, 5, 2), 0, None)).is_some());
    }

    #[test]
    fn test_evict_outside_window() {
        let mut cache = LayoutCache::new();
        for n in 1..=10 {
            let key = EntryKey::new(line(n * 10, 5, n), 0, None);
            cache.insert(n, key, entry(n, "x"));
        }
        cache.evict_outside(4, 6);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_uncached_slot_single_occupancy() {
        let mut cache = LayoutCache::new();
        cache.insert_uncached(2, entry(2, "composing"));
        assert!(cache.get_uncached(2).is_some());
        assert!(cache.get_uncached(3).is_none());

        cache.insert_uncached(5, entry(5, "other"));
        assert!(cache.get_uncached(2).is_none());
        assert!(cache.get_uncached(5).is_some());

        cache.invalidate_line(5);
        assert!(cache.get_uncached(5).is_none());
    }

    #[test]
    fn test_split_segments_selection_and_ruler() {
        // Selection [2, 8) on a 10-char line with a ruler at column 6
        // (boundary after 5 chars).
        let segments = split_segments(10, (2, 8), Some(6));
        assert_eq!(
            segments,
            vec![
                Segment { start: 0, end: 2, selected: false },
                Segment { start: 2, end: 5, selected: true },
                Segment { start: 5, end: 8, selected: true },
                Segment { start: 8, end: 10, selected: false },
            ]
        );
    }

    #[test]
    fn test_split_segments_no_selection() {
        assert_eq!(
            split_segments(4, (0, 0), None),
            vec![Segment { start: 0, end: 4, selected: false }]
        );
        assert!(split_segments(0, (0, 0), Some(3)).is_empty());
    }

    #[test]
    fn test_indent_width_tabs_and_spaces() {
        assert_eq!(indent_width("    x", 10.0, 4), 40.0);
        assert_eq!(indent_width("\tx", 10.0, 4), 40.0);
        assert_eq!(indent_width("  \tx", 10.0, 4), 40.0);
        assert_eq!(indent_width("x  ", 10.0, 4), 0.0);
        assert_eq!(indent_width("", 10.0, 4), 0.0);
    }
}
