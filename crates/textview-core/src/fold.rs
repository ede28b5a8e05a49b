//! Collapsible text regions (code folding).
//!
//! Folds are half-open char-offset ranges with a placeholder string shown in
//! place of the collapsed text. A collapsed fold hides every line that starts
//! inside it; the line containing the fold start renders its leading text, the
//! placeholder, then whatever follows the fold end, possibly chaining into the
//! next collapsed fold on the same visual row.
//!
//! The set is kept sorted by start offset (outer-before-inner for nested
//! folds) so geometry walks can binary-search the next collapsed fold.

use crate::buffer::BufferChange;

/// One foldable region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSegment {
    /// Char offset of the first folded char.
    pub offset: usize,
    /// Exclusive char end offset.
    pub end_offset: usize,
    /// Whether the region is currently collapsed.
    pub collapsed: bool,
    /// Text rendered in place of the collapsed region, e.g. `"..."`.
    pub placeholder: String,
}

impl FoldSegment {
    /// Create an expanded fold with the conventional `"..."` placeholder.
    pub fn new(offset: usize, end_offset: usize) -> Self {
        Self {
            offset,
            end_offset,
            collapsed: false,
            placeholder: "...".to_string(),
        }
    }

    /// Length in chars.
    pub fn length(&self) -> usize {
        self.end_offset.saturating_sub(self.offset)
    }

    /// Returns `true` if `offset` lies within `[self.offset, self.end_offset)`.
    pub fn contains(&self, offset: usize) -> bool {
        self.offset <= offset && offset < self.end_offset
    }
}

/// Sorted collection of fold segments.
#[derive(Debug, Clone, Default)]
pub struct FoldSet {
    folds: Vec<FoldSegment>,
}

impl FoldSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// All folds, sorted by start offset.
    pub fn iter(&self) -> impl Iterator<Item = &FoldSegment> {
        self.folds.iter()
    }

    /// Number of folds.
    pub fn len(&self) -> usize {
        self.folds.len()
    }

    /// Whether the set holds no folds.
    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    /// Add a fold. Degenerate (empty) segments are ignored; a segment with the
    /// same range replaces the existing one.
    pub fn add(&mut self, segment: FoldSegment) {
        if segment.length() == 0 {
            return;
        }
        let at = self.insertion_point(segment.offset, segment.end_offset);
        match self.folds.get_mut(at) {
            Some(existing)
                if existing.offset == segment.offset
                    && existing.end_offset == segment.end_offset =>
            {
                *existing = segment;
            }
            _ => self.folds.insert(at, segment),
        }
    }

    /// Remove the fold with exactly this range. Returns `false` if absent.
    pub fn remove(&mut self, offset: usize, end_offset: usize) -> bool {
        let before = self.folds.len();
        self.folds
            .retain(|f| !(f.offset == offset && f.end_offset == end_offset));
        self.folds.len() != before
    }

    /// Collapse or expand the fold with exactly this range. Returns `true` if
    /// the fold exists and its state changed.
    pub fn set_collapsed(&mut self, offset: usize, end_offset: usize, collapsed: bool) -> bool {
        for fold in &mut self.folds {
            if fold.offset == offset && fold.end_offset == end_offset {
                if fold.collapsed == collapsed {
                    return false;
                }
                fold.collapsed = collapsed;
                return true;
            }
        }
        false
    }

    /// The first collapsed fold whose start lies in `[from, limit)`.
    ///
    /// Geometry walks call this repeatedly, restarting `from` at each fold's
    /// end offset, to stitch a visual row out of fold-separated text runs.
    pub fn next_collapsed_from(&self, from: usize, limit: usize) -> Option<&FoldSegment> {
        let start = self.folds.partition_point(|f| f.offset < from);
        self.folds[start..]
            .iter()
            .find(|f| f.collapsed && f.offset < limit)
    }

    /// The outermost collapsed fold containing `offset`, if any.
    pub fn collapsed_containing(&self, offset: usize) -> Option<&FoldSegment> {
        // Sorted by start, so the outermost container sorts earliest.
        self.folds
            .iter()
            .take_while(|f| f.offset <= offset)
            .find(|f| f.collapsed && f.contains(offset))
    }

    /// Shift fold offsets to track a buffer edit.
    ///
    /// Folds whose content is entirely removed are dropped; folds partially
    /// overlapping the removed range shrink to the surviving text. An
    /// insertion strictly inside a fold grows it.
    pub fn adjust_for_change(&mut self, change: &BufferChange) {
        let edit_start = change.offset;
        let removed_end = edit_start + change.removed;
        for fold in &mut self.folds {
            fold.offset = adjust_offset(fold.offset, edit_start, removed_end, change.inserted);
            fold.end_offset = adjust_end(fold.end_offset, edit_start, removed_end, change.inserted);
        }
        self.folds.retain(|f| f.length() > 0);
        self.folds
            .sort_by(|a, b| (a.offset, b.end_offset).cmp(&(b.offset, a.end_offset)));
    }

    fn insertion_point(&self, offset: usize, end_offset: usize) -> usize {
        // Order: by start ascending, then by end descending (outer first).
        self.folds
            .partition_point(|f| (f.offset, end_offset).cmp(&(offset, f.end_offset)).is_lt())
    }
}

fn adjust_offset(offset: usize, edit_start: usize, removed_end: usize, inserted: usize) -> usize {
    if offset <= edit_start {
        offset
    } else if offset <= removed_end {
        edit_start + inserted
    } else {
        offset - (removed_end - edit_start) + inserted
    }
}

fn adjust_end(end: usize, edit_start: usize, removed_end: usize, inserted: usize) -> usize {
    if end < edit_start {
        end
    } else if end <= removed_end {
        edit_start
    } else {
        end - (removed_end - edit_start) + inserted
    }
}
