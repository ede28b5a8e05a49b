//! The text view model: owner-thread coordination of layout, heights,
//! folding, markers, search, and geometry queries.
//!
//! [`TextViewModel`] is the single mutable owner of all view state. Hosts
//! drive it from one thread: edits go through [`insert`](TextViewModel::insert)
//! and [`remove`](TextViewModel::remove), background work (highlighting,
//! search) is drained by [`pump`](TextViewModel::pump), and the renderer pulls
//! built lines with [`get_or_create_layout`](TextViewModel::get_or_create_layout)
//! and asks geometry questions with
//! [`point_to_location`](TextViewModel::point_to_location) and
//! [`location_to_point`](TextViewModel::location_to_point).
//!
//! Geometry is fold-aware: a visual row stitches together the text runs
//! around collapsed folds and their placeholders, so an x/y point maps to the
//! document location a user would expect even when most of the row's text is
//! hidden.

use crate::buffer::{BufferChange, LineSpan, TextBuffer};
use crate::context::RenderContext;
use crate::fold::{FoldSegment, FoldSet};
use crate::height::HeightIndex;
use crate::highlight::{HighlightCoordinator, HighlightSource};
use crate::layout::{
    EntryKey, LayoutCache, LayoutEntry, clamp_selection, indent_width, split_segments,
};
use crate::marker::{ChunkMarker, LineMarker, MarkerId, MarkerSet};
use crate::search::{SearchIndex, SearchQuery};
use crate::shape::{StyleRun, TextShaper, Utf8IndexMapper};
use std::collections::BTreeSet;
use std::time::Instant;

/// A caret position: 1-based line and 1-based char column.
///
/// With virtual space enabled the column may exceed the line length + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentLocation {
    /// 1-based line number.
    pub line: usize,
    /// 1-based char column.
    pub column: usize,
}

impl DocumentLocation {
    /// Create a location.
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Input-method composition text shown inline while the user composes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Preedit {
    line: usize,
    /// 1-based char column the composition is anchored at.
    column: usize,
    text: String,
}

/// The central view model. See the module docs.
pub struct TextViewModel {
    buffer: TextBuffer,
    shaper: Box<dyn TextShaper>,
    context: RenderContext,
    highlights: HighlightCoordinator,
    cache: LayoutCache,
    heights: HeightIndex,
    folds: FoldSet,
    markers: MarkerSet,
    search: SearchIndex,
    preedit: Option<Preedit>,
    selection: Option<(usize, usize)>,
    /// Inclusive 1-based visible line window.
    viewport: (usize, usize),
    redraw: BTreeSet<usize>,
}

impl TextViewModel {
    /// Create a model over initial text, a shaping backend, and a highlight
    /// source.
    pub fn new(
        text: &str,
        shaper: Box<dyn TextShaper>,
        highlight_source: Box<dyn HighlightSource>,
        context: RenderContext,
    ) -> Self {
        let buffer = TextBuffer::from_text(text);
        let default_height = shaper.metrics().line_height();
        let heights = HeightIndex::new(default_height, buffer.line_count());
        Self {
            buffer,
            shaper,
            context,
            highlights: HighlightCoordinator::new(highlight_source),
            cache: LayoutCache::new(),
            heights,
            folds: FoldSet::new(),
            markers: MarkerSet::new(),
            search: SearchIndex::new(),
            preedit: None,
            selection: None,
            viewport: (1, 1),
            redraw: BTreeSet::new(),
        }
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    /// The render context in effect.
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Replace the render context (theme or options changed). All cached
    /// layouts are style-dependent, so this purges them.
    pub fn set_context(&mut self, context: RenderContext) {
        self.context = context;
        self.purge_layout_cache();
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Insert text at a char offset and reconcile all derived state.
    pub fn insert(&mut self, offset: usize, text: &str) -> BufferChange {
        let change = self.buffer.insert(offset, text);
        self.reconcile(&change);
        change
    }

    /// Remove a char range and reconcile all derived state.
    pub fn remove(&mut self, start: usize, end: usize) -> BufferChange {
        let change = self.buffer.remove(start, end);
        self.reconcile(&change);
        change
    }

    fn reconcile(&mut self, change: &BufferChange) {
        // Offsets and line numbers after the edit point are shifted, so
        // everything from the first affected line forward is void.
        self.cache.invalidate_from(change.first_line);
        self.highlights.invalidate_from(change.first_line);

        if change.line_delta > 0 {
            self.heights
                .insert_lines(change.first_line + 1, change.line_delta as usize);
        } else if change.line_delta < 0 {
            self.heights
                .remove_lines(change.first_line + 1, (-change.line_delta) as usize);
        }

        self.folds.adjust_for_change(change);
        self.markers
            .adjust_for_line_delta(change.first_line, change.line_delta);
        self.refresh_fold_heights();

        if self.preedit.as_ref().is_some_and(|p| p.line >= change.first_line) {
            self.preedit = None;
        }

        let (_, last) = self.viewport;
        for line in change.first_line..=last.max(change.first_line) {
            self.redraw.insert(line);
        }

        if !self.search.query().pattern.is_empty() {
            self.refresh_search();
        }
    }

    // ------------------------------------------------------------------
    // Background reconciliation
    // ------------------------------------------------------------------

    /// Drain completed background work (highlighting, search) and queue the
    /// affected lines for redraw. Call once per frame or on idle.
    pub fn pump(&mut self) {
        for line in self.highlights.poll_completions() {
            self.cache.invalidate_line(line);
            self.redraw.insert(line);
        }
        if let Some(update) = self.search.poll() {
            self.redraw.extend(update.redraw_lines);
        }
    }

    /// Lines queued for redraw since the last call, in order.
    pub fn take_redraw_lines(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.redraw).into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    /// The built layout for a line, reusing the cached entry when its
    /// identity (offset, length, marker count, clamped selection) still
    /// matches.
    ///
    /// Lines carrying preedit text are rebuilt into the single uncached slot
    /// instead.
    pub fn get_or_create_layout(&mut self, line_number: usize) -> &LayoutEntry {
        let line = self.buffer.line_span(line_number);
        let n = line.line_number;

        if self.preedit.as_ref().is_some_and(|p| p.line == n) {
            let entry = match self.cache.take_uncached(n) {
                Some(entry) => entry,
                None => self.build_layout(line, 0, line.length),
            };
            return self.cache.insert_uncached(n, entry);
        }

        let key = EntryKey::new(line, self.markers.count_on(n), self.selection);
        let entry = match self.cache.take(n, &key) {
            Some(entry) => entry,
            None => self.build_layout(line, 0, line.length),
        };
        self.cache.insert(n, key, entry)
    }

    /// The cached layout for a line, without building. `None` on miss or
    /// stale identity.
    pub fn get_layout(&self, line_number: usize) -> Option<&LayoutEntry> {
        let line = self.buffer.line_span(line_number);
        let n = line.line_number;
        if self.preedit.as_ref().is_some_and(|p| p.line == n) {
            return self.cache.get_uncached(n);
        }
        let key = EntryKey::new(line, self.markers.count_on(n), self.selection);
        self.cache.get(n, &key)
    }

    /// Build a layout for a sub-range of a line without caching it. Used for
    /// the text runs between collapsed folds on a visual row.
    pub fn layout_line_part(
        &mut self,
        line_number: usize,
        sub_offset: usize,
        sub_length: usize,
    ) -> LayoutEntry {
        let line = self.buffer.line_span(line_number);
        let sub_offset = sub_offset.min(line.length);
        let sub_length = sub_length.min(line.length - sub_offset);
        self.build_layout(line, sub_offset, sub_length)
    }

    /// Drop one line's cached layout and spans, forcing a rebuild on next
    /// access. Hosts call this when out-of-band state rendered into the line
    /// changes.
    pub fn force_invalidate_line(&mut self, line_number: usize) {
        self.cache.invalidate_line(line_number);
        self.highlights.invalidate_line(line_number);
        self.redraw.insert(line_number);
    }

    /// Drop all cached layouts and highlight results. In-flight highlight
    /// computations are cancelled and can never publish.
    pub fn purge_layout_cache(&mut self) {
        self.cache.purge();
        self.highlights.purge();
        let (first, last) = self.viewport;
        for line in first..=last {
            self.redraw.insert(line);
        }
    }

    fn build_layout(&mut self, line: LineSpan, sub_offset: usize, sub_length: usize) -> LayoutEntry {
        let started = Instant::now();
        let options = self.context.options.clone();
        let n = line.line_number;
        let line_text = self.buffer.line_text(n);

        let (mut spans, highlight_final) = self.highlights.highlighted_line(
            line,
            &line_text,
            sub_offset,
            sub_length,
            options.highlight_wait,
        );
        // Make spans relative to the laid-out sub-range.
        for span in &mut spans {
            span.offset -= sub_offset;
        }

        for marker in self.markers.chunk_markers_on(n) {
            marker.transform_spans(&mut spans, sub_length);
        }

        let mut text: String = char_slice(&line_text, sub_offset, sub_length);

        // Splice preedit text into the displayed text; spans after the
        // anchor shift right.
        let preedit_range = self
            .preedit
            .as_ref()
            .filter(|p| p.line == n && sub_offset == 0 && sub_length == line.length)
            .map(|p| {
                let anchor = (p.column - 1).min(text.chars().count());
                let plen = p.text.chars().count();
                let mut spliced: String = char_slice(&text, 0, anchor);
                spliced.push_str(&p.text);
                spliced.push_str(&char_slice(&text, anchor, usize::MAX));
                text = spliced;
                for span in &mut spans {
                    if span.offset >= anchor {
                        span.offset += plen;
                    } else if span.end_offset() > anchor {
                        span.length += plen;
                    }
                }
                (anchor, anchor + plen)
            });

        let foreground_override = self
            .markers
            .chunk_markers_on(n)
            .filter_map(|m| m.foreground_override())
            .last();

        // Resolve spans to byte-indexed style runs, giving up past the
        // budget: a pathological line renders unstyled rather than stalling
        // the frame.
        let mut runs: Vec<StyleRun> = Vec::with_capacity(spans.len());
        let mut mapper = Utf8IndexMapper::new();
        let mut styled = true;
        for span in &spans {
            if started.elapsed() > options.styling_budget {
                log::debug!("styling budget exceeded on line {}, rendering plain", n);
                styled = false;
                break;
            }
            let style = self.context.theme.style_for(&span.scope);
            let start = mapper.char_to_byte(&text, span.offset.min(text.chars().count()));
            let end = mapper.char_to_byte(&text, span.end_offset().min(text.chars().count()));
            if start >= end {
                // Tiling guarantees valid spans; only a marker transform can
                // produce an empty or out-of-range one.
                log::warn!(
                    "skipping inconsistent span {}..{} on line {}",
                    span.offset,
                    span.end_offset(),
                    n
                );
                continue;
            }
            runs.push(StyleRun {
                start,
                end,
                foreground: foreground_override.unwrap_or(style.foreground),
                bold: style.bold,
                italic: style.italic,
                underline: style.underline,
            });
        }
        if !styled {
            let style = self.context.theme.default_style();
            runs.clear();
            if !text.is_empty() {
                runs.push(StyleRun {
                    start: 0,
                    end: text.len(),
                    foreground: style.foreground,
                    bold: false,
                    italic: false,
                    underline: false,
                });
            }
        }
        if let Some((start, end)) = preedit_range {
            underline_range(&mut runs, &text, start, end);
        }

        let mut shaped = self.shaper.shape_line();
        shaped.set_text(&text);
        shaped.set_style_runs(&runs);
        let (width, height) = shaped.measure();

        let metrics = self.shaper.metrics();
        let full_line = sub_offset == 0 && sub_length == line.length;
        if full_line {
            let effective = self.markers.effective_line_height(n, height);
            if self.is_line_hidden(n) {
                self.heights.set_line_height(n, 0.0);
            } else {
                self.heights.set_line_height(n, effective);
            }
        }

        // Arithmetic width/height shortcuts are only sound when every char
        // occupies exactly one single-byte cell.
        let fast_path = metrics.is_monospace && text.is_ascii();

        let sel = clamp_selection(line, self.selection);
        let sub_end = sub_offset + sub_length;
        let sel_in_sub = if sel.0 < sel.1 && sel.0 < sub_end && sel.1 > sub_offset {
            (
                sel.0.max(sub_offset) - sub_offset,
                sel.1.min(sub_end) - sub_offset,
            )
        } else {
            (0, 0)
        };
        let segments = split_segments(
            text.chars().count(),
            sel_in_sub,
            if full_line { options.ruler_column } else { None },
        );

        LayoutEntry {
            line_number: n,
            text,
            shaped,
            spans,
            runs,
            indent_width: indent_width(&line_text, metrics.char_width, options.tab_width),
            width,
            height,
            segments,
            is_final_styles: highlight_final && styled,
            fast_path,
            revision: 0,
        }
    }

    // ------------------------------------------------------------------
    // Viewport, selection, preedit
    // ------------------------------------------------------------------

    /// Set the inclusive visible line window.
    ///
    /// Cached layouts further than a retention margin plus one page outside
    /// the window are evicted.
    pub fn set_viewport(&mut self, first_line: usize, last_line: usize) {
        let first_line = first_line.max(1);
        let last_line = last_line.max(first_line);
        self.viewport = (first_line, last_line);
        let page = last_line - first_line + 1;
        let slack = self.context.options.retention_margin + page;
        self.cache
            .evict_outside(first_line.saturating_sub(slack).max(1), last_line + slack);
    }

    /// The visible line window.
    pub fn viewport(&self) -> (usize, usize) {
        self.viewport
    }

    /// Set the selection as an absolute char range (any order), or `None`.
    /// Lines whose clamped selection changes are stale by identity and queued
    /// for redraw.
    pub fn set_selection(&mut self, selection: Option<(usize, usize)>) {
        if self.selection == selection {
            return;
        }
        let mut affected = BTreeSet::new();
        for sel in [self.selection, selection].into_iter().flatten() {
            let (start, end) = if sel.0 <= sel.1 { sel } else { (sel.1, sel.0) };
            let first = self.buffer.offset_to_line(start);
            let last = self.buffer.offset_to_line(end);
            for line in first..=last {
                affected.insert(line);
            }
        }
        self.selection = selection;
        self.redraw.extend(affected);
    }

    /// The current selection.
    pub fn selection(&self) -> Option<(usize, usize)> {
        self.selection
    }

    /// Show composition text at a location. The line's layout moves to the
    /// uncached slot until the composition ends.
    pub fn set_preedit(&mut self, location: DocumentLocation, text: &str) {
        let line = location.line.clamp(1, self.buffer.line_count());
        if let Some(previous) = self.preedit.take() {
            self.cache.invalidate_line(previous.line);
            self.redraw.insert(previous.line);
        }
        self.preedit = Some(Preedit {
            line,
            column: location.column.max(1),
            text: text.to_string(),
        });
        self.cache.invalidate_line(line);
        self.redraw.insert(line);
    }

    /// End composition, restoring normal cached layout for the line.
    pub fn clear_preedit(&mut self) {
        if let Some(preedit) = self.preedit.take() {
            self.cache.invalidate_line(preedit.line);
            self.redraw.insert(preedit.line);
        }
    }

    // ------------------------------------------------------------------
    // Folding
    // ------------------------------------------------------------------

    /// Add a foldable region.
    pub fn add_fold(&mut self, segment: FoldSegment) {
        let collapsed = segment.collapsed;
        let start_line = self.buffer.offset_to_line(segment.offset);
        self.folds.add(segment);
        if collapsed {
            self.on_fold_toggled(start_line);
        }
    }

    /// Remove the fold with exactly this char range.
    pub fn remove_fold(&mut self, offset: usize, end_offset: usize) -> bool {
        let removed = self.folds.remove(offset, end_offset);
        if removed {
            self.on_fold_toggled(self.buffer.offset_to_line(offset));
        }
        removed
    }

    /// Collapse or expand a fold. Returns `true` if the state changed.
    pub fn set_fold_collapsed(
        &mut self,
        offset: usize,
        end_offset: usize,
        collapsed: bool,
    ) -> bool {
        if !self.folds.set_collapsed(offset, end_offset, collapsed) {
            return false;
        }
        self.on_fold_toggled(self.buffer.offset_to_line(offset));
        true
    }

    /// The folds currently registered.
    pub fn folds(&self) -> &FoldSet {
        &self.folds
    }

    fn on_fold_toggled(&mut self, start_line: usize) {
        self.refresh_fold_heights();
        // The fold's display row stitches different text now, and every row
        // below it moved vertically.
        self.cache.invalidate_line(start_line);
        let (_, last) = self.viewport;
        for line in start_line..=last.max(start_line) {
            self.redraw.insert(line);
        }
    }

    /// Recompute which lines are hidden by collapsed folds, zeroing their
    /// heights so vertical geometry skips them.
    fn refresh_fold_heights(&mut self) {
        let default = self.shaper.metrics().line_height();
        // Lines previously zeroed must be restored when their fold expands;
        // walk every line touched by any fold.
        let touched: Vec<(usize, usize)> = self
            .folds
            .iter()
            .map(|f| {
                (
                    self.buffer.offset_to_line(f.offset),
                    self.buffer.offset_to_line(f.end_offset),
                )
            })
            .collect();
        for (start_line, end_line) in touched {
            for line in start_line..=end_line {
                let height = if self.is_line_hidden(line) {
                    0.0
                } else {
                    let measured = self
                        .get_layout(line)
                        .map(|e| e.height)
                        .unwrap_or(default);
                    self.markers.effective_line_height(line, measured)
                };
                self.heights.set_line_height(line, height);
            }
        }
    }

    /// Whether a line is hidden behind a collapsed fold (it starts strictly
    /// inside one).
    pub fn is_line_hidden(&self, line_number: usize) -> bool {
        let start = self.buffer.line_span(line_number).offset;
        self.folds
            .collapsed_containing(start)
            .is_some_and(|f| f.offset < start)
    }

    /// The display row for a line: the line itself when visible, otherwise
    /// the start line of the outermost collapsed fold hiding it.
    pub fn visible_line_of(&self, line_number: usize) -> usize {
        let start = self.buffer.line_span(line_number).offset;
        match self.folds.collapsed_containing(start) {
            Some(fold) if fold.offset < start => self.buffer.offset_to_line(fold.offset),
            _ => line_number,
        }
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    /// Attach a chunk marker; the line's cached layout goes stale by identity.
    pub fn add_chunk_marker(&mut self, line_number: usize, marker: Box<dyn ChunkMarker>) -> MarkerId {
        let id = self.markers.add_chunk_marker(line_number, marker);
        self.redraw.insert(line_number);
        id
    }

    /// Attach a line marker; the line's cached layout goes stale by identity.
    pub fn add_line_marker(&mut self, line_number: usize, marker: Box<dyn LineMarker>) -> MarkerId {
        let id = self.markers.add_line_marker(line_number, marker);
        self.redraw.insert(line_number);
        id
    }

    /// Detach a marker.
    pub fn remove_marker(&mut self, id: MarkerId) {
        if let Some(line) = self.markers.remove(id) {
            self.redraw.insert(line);
        }
    }

    /// The marker set.
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Set the search query and start a background rescan.
    pub fn set_search_query(&mut self, query: SearchQuery) {
        self.search.set_query(query);
        self.refresh_search();
    }

    /// Restart the background search over the current buffer contents.
    pub fn refresh_search(&mut self) {
        self.search.refresh(
            self.buffer.text(),
            self.buffer.line_start_offsets(),
            self.viewport,
        );
    }

    /// The search index (installed matches, pending state).
    pub fn search(&self) -> &SearchIndex {
        &self.search
    }

    /// Block until the in-flight search scan lands, queueing its redraws.
    /// Intended for tests and synchronous hosts.
    pub fn wait_for_search(&mut self) {
        if let Some(update) = self.search.wait() {
            self.redraw.extend(update.redraw_lines);
        }
    }

    // ------------------------------------------------------------------
    // Vertical geometry
    // ------------------------------------------------------------------

    /// Y pixel coordinate of the top of a line's display row.
    pub fn line_to_y(&self, line_number: usize) -> f64 {
        self.heights.line_to_y(self.visible_line_of(line_number))
    }

    /// 1-based line at a y pixel coordinate. Lines hidden by collapsed folds
    /// are skipped; a y on a folded row resolves to the fold's start line.
    /// Out-of-range y clamps to the nearest visible row, even when the
    /// document ends in a collapsed fold.
    pub fn y_to_line(&self, y: f64) -> usize {
        self.visible_line_of(self.heights.y_to_line(y))
    }

    /// Height of a line's display row (0 for hidden lines).
    pub fn line_height(&self, line_number: usize) -> f64 {
        self.heights.line_height(line_number)
    }

    /// Total pixel height of the document with current folds.
    pub fn total_height(&self) -> f64 {
        self.heights.total_height()
    }

    // ------------------------------------------------------------------
    // Point <-> location
    // ------------------------------------------------------------------

    /// The document location at a pixel point.
    ///
    /// Walks the visual row at `y`: text runs between collapsed folds are
    /// laid out and hit-tested in turn; a hit on a fold placeholder resolves
    /// to the fold start in its first half and the fold end in its second
    /// half. With `snap`, a hit inside a grapheme rounds to the nearest
    /// boundary. Past the end of the row, the column clamps to the line end
    /// unless virtual space is enabled, in which case it extends by whole
    /// cells.
    pub fn point_to_location(&mut self, x: f64, y: f64, snap: bool) -> DocumentLocation {
        let start_line = self.y_to_line(y);
        let mut line = self.buffer.line_span(start_line);
        let mut run_start = line.offset;
        let mut x_remaining = x.max(0.0);
        let char_width = self.shaper.metrics().char_width;
        let virtual_space = self.context.options.virtual_space;

        loop {
            let line_end = line.end_offset();
            let fold = self
                .folds
                .next_collapsed_from(run_start, line_end)
                .map(|f| (f.offset, f.end_offset, f.placeholder.clone()));

            let run_end = fold.as_ref().map(|f| f.0).unwrap_or(line_end);
            let part = self.layout_line_part(
                line.line_number,
                run_start - line.offset,
                run_end - run_start,
            );

            if x_remaining < part.width || fold.is_none() {
                let hit = part.shaped.x_to_index(x_remaining);
                if !hit.is_inside {
                    let mut column = (run_end - line.offset) + 1;
                    if virtual_space && fold.is_none() {
                        let beyond = (x_remaining - part.width).max(0.0);
                        column += (beyond / char_width).round() as usize;
                    }
                    return DocumentLocation::new(line.line_number, column);
                }
                let byte = if snap {
                    let lead = part.shaped.index_to_x(hit.byte_index);
                    let trail = part.shaped.index_to_x(hit.next_byte_index);
                    if x_remaining - lead > trail - x_remaining {
                        hit.next_byte_index
                    } else {
                        hit.byte_index
                    }
                } else {
                    hit.byte_index
                };
                let char_idx = Utf8IndexMapper::byte_to_char(&part.text, byte);
                let column = (run_start - line.offset) + char_idx + 1;
                return DocumentLocation::new(line.line_number, column);
            }
            x_remaining -= part.width;

            // The placeholder. First half maps to the fold start, second half
            // to the fold end.
            let (fold_offset, fold_end, placeholder) = match fold {
                Some(f) => f,
                None => return DocumentLocation::new(line.line_number, line.length + 1),
            };
            let placeholder_width = self.measure_text(&placeholder);
            if x_remaining < placeholder_width {
                let offset = if x_remaining < placeholder_width / 2.0 {
                    fold_offset
                } else {
                    fold_end
                };
                let (l, c) = self.buffer.offset_to_location(offset);
                return DocumentLocation::new(l, c);
            }
            x_remaining -= placeholder_width;

            // Resume after the fold, possibly on a later line.
            let (l, _) = self.buffer.offset_to_location(fold_end);
            line = self.buffer.line_span(l);
            run_start = fold_end;
        }
    }

    /// The pixel point (top-left of the caret cell) for a document location.
    ///
    /// Locations hidden inside a collapsed fold map to the start of the
    /// fold's placeholder on its display row.
    pub fn location_to_point(&mut self, location: DocumentLocation) -> (f64, f64) {
        let line = self.buffer.line_span(location.line);
        let column = location.column.max(1);
        let target = line.offset + (column - 1).min(line.length);
        let char_width = self.shaper.metrics().char_width;

        let row_line = self.visible_line_of(location.line);
        let y = self.heights.line_to_y(row_line);

        let mut walk_line = self.buffer.line_span(row_line);
        let mut run_start = walk_line.offset;
        let mut x = 0.0;

        loop {
            let line_end = walk_line.end_offset();
            let fold = self
                .folds
                .next_collapsed_from(run_start, line_end)
                .map(|f| (f.offset, f.end_offset, f.placeholder.clone()));
            let run_end = fold.as_ref().map(|f| f.0).unwrap_or(line_end);

            if walk_line.line_number == location.line
                && target >= run_start
                && (target < run_end || (fold.is_none() && target == run_end))
            {
                let part = self.layout_line_part(
                    walk_line.line_number,
                    run_start - walk_line.offset,
                    run_end - run_start,
                );
                let mut mapper = Utf8IndexMapper::new();
                let byte = mapper.char_to_byte(&part.text, target - run_start);
                let mut px = x + part.shaped.index_to_x(byte);
                if self.context.options.virtual_space && column > line.length + 1 {
                    px += (column - 1 - line.length) as f64 * char_width;
                }
                return (px, y);
            }

            let (fold_offset, fold_end, placeholder) = match fold {
                Some(f) => f,
                None => {
                    // Location past this row's reach; clamp to row end.
                    let part = self.layout_line_part(
                        walk_line.line_number,
                        run_start - walk_line.offset,
                        run_end - run_start,
                    );
                    return (x + part.width, y);
                }
            };

            let part = self.layout_line_part(
                walk_line.line_number,
                run_start - walk_line.offset,
                fold_offset - run_start,
            );
            x += part.width;

            if target >= fold_offset && target < fold_end {
                // Hidden inside the collapsed fold: the placeholder start.
                return (x, y);
            }
            x += self.measure_text(&placeholder);

            let (l, _) = self.buffer.offset_to_location(fold_end);
            walk_line = self.buffer.line_span(l);
            run_start = fold_end;
        }
    }

    /// X pixel coordinate of a 1-based column on a line.
    ///
    /// Columns beyond the line end return the line width extended by whole
    /// cells when virtual space is enabled; on an empty line the virtual
    /// caret instead sits at the surrounding indentation width.
    pub fn column_to_x(&mut self, line_number: usize, column: usize) -> f64 {
        let line = self.buffer.line_span(line_number);
        let column = column.max(1);
        if self.context.options.virtual_space && line.length == 0 && column > 1 {
            return self.virtual_indent_x(line.line_number);
        }
        self.location_to_point(DocumentLocation::new(line.line_number, column))
            .0
    }

    /// Indentation width of the nearest non-blank line above, used to place
    /// the virtual caret on blank lines.
    fn virtual_indent_x(&self, line_number: usize) -> f64 {
        let metrics = self.shaper.metrics();
        for n in (1..line_number).rev() {
            let text = self.buffer.line_text(n);
            if !text.trim().is_empty() {
                return indent_width(&text, metrics.char_width, self.context.options.tab_width);
            }
        }
        0.0
    }

    fn measure_text(&self, text: &str) -> f64 {
        let mut shaped = self.shaper.shape_line();
        shaped.set_text(text);
        shaped.measure().0
    }
}

/// Chars `[start, start+len)` of `text` as an owned string.
fn char_slice(text: &str, start: usize, len: usize) -> String {
    text.chars().skip(start).take(len).collect()
}

/// Force `underline` on the style runs covering byte range `[start, end)`
/// (char indices translated by the caller's splice bookkeeping).
fn underline_range(runs: &mut Vec<StyleRun>, text: &str, start_char: usize, end_char: usize) {
    let mut mapper = Utf8IndexMapper::new();
    let start = mapper.char_to_byte(text, start_char);
    let end = mapper.char_to_byte(text, end_char);
    if start >= end {
        return;
    }
    let mut result: Vec<StyleRun> = Vec::with_capacity(runs.len() + 2);
    for run in runs.drain(..) {
        if run.end <= start || run.start >= end {
            result.push(run);
            continue;
        }
        if run.start < start {
            result.push(StyleRun {
                end: start,
                ..run.clone()
            });
        }
        result.push(StyleRun {
            start: run.start.max(start),
            end: run.end.min(end),
            underline: true,
            ..run.clone()
        });
        if run.end > end {
            result.push(StyleRun { start: end, ..run });
        }
    }
    *runs = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Color, RenderOptions, Theme};
    use crate::highlight::{ColoredSpan, PlainHighlightSource, Scope};
    use crate::shape::MonospaceShaper;

    fn model(text: &str) -> TextViewModel {
        TextViewModel::new(
            text,
            Box::new(MonospaceShaper::with_cell_size(10.0, 20.0, 4)),
            Box::new(PlainHighlightSource),
            RenderContext::default(),
        )
    }

    fn model_with_options(text: &str, options: RenderOptions) -> TextViewModel {
        TextViewModel::new(
            text,
            Box::new(MonospaceShaper::with_cell_size(10.0, 20.0, 4)),
            Box::new(PlainHighlightSource),
            RenderContext::new(Theme::monochrome(Color::BLACK), options),
        )
    }

    #[test]
    fn test_layout_hit_is_idempotent() {
        let mut m = model("hello\nworld");
        let first = m.get_or_create_layout(1).revision;
        let second = m.get_or_create_layout(1).revision;
        assert_eq!(first, second);
    }

    #[test]
    fn test_edit_invalidates_following_lines_only() {
        let mut m = model("aaa\nbbb\nccc");
        let r1 = m.get_or_create_layout(1).revision;
        let _ = m.get_or_create_layout(2);
        let r3 = m.get_or_create_layout(3).revision;

        // Edit on line 2 shifts line 3; line 1 is untouched.
        m.insert(5, "x");
        assert_eq!(m.get_or_create_layout(1).revision, r1);
        assert_ne!(m.get_or_create_layout(3).revision, r3);
        assert_eq!(m.get_or_create_layout(2).text, "bxbb");
    }

    #[test]
    fn test_selection_changes_identity() {
        let mut m = model("abcdef");
        let r1 = m.get_or_create_layout(1).revision;
        m.set_selection(Some((1, 4)));
        let entry = m.get_or_create_layout(1);
        assert_ne!(entry.revision, r1);
        let selected: Vec<_> = entry.segments.iter().filter(|s| s.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!((selected[0].start, selected[0].end), (1, 4));
    }

    #[test]
    fn test_preedit_goes_to_uncached_slot() {
        let mut m = model("abc\ndef");
        let _ = m.get_or_create_layout(1);
        m.set_preedit(DocumentLocation::new(1, 2), "XY");
        let entry = m.get_or_create_layout(1);
        assert_eq!(entry.text, "aXYbc");
        // Underline marks the composition range.
        assert!(entry.runs.iter().any(|r| r.underline && r.start == 1 && r.end == 3));

        m.clear_preedit();
        assert_eq!(m.get_or_create_layout(1).text, "abc");
    }

    #[test]
    fn test_line_heights_follow_edits() {
        let mut m = model("a\nb\nc");
        assert_eq!(m.total_height(), 60.0);
        m.insert(1, "\nx\ny");
        assert_eq!(m.buffer().line_count(), 5);
        assert_eq!(m.total_height(), 100.0);
        m.remove(0, 4);
        assert_eq!(m.total_height(), 60.0);
    }

    #[test]
    fn test_collapsed_fold_hides_lines() {
        // "fn f() {\n  a\n  b\n}\nnext"
        let mut m = model("fn f() {\n  a\n  b\n}\nnext");
        let brace = 7; // offset of '{'
        let close = m.buffer().text().find('}').unwrap();
        m.add_fold(FoldSegment::new(brace, close + 1));
        assert_eq!(m.total_height(), 100.0);

        m.set_fold_collapsed(brace, close + 1, true);
        assert!(m.is_line_hidden(2));
        assert!(m.is_line_hidden(3));
        assert!(m.is_line_hidden(4));
        assert!(!m.is_line_hidden(1));
        assert!(!m.is_line_hidden(5));
        // Rows: line 1 (with placeholder) and line 5.
        assert_eq!(m.total_height(), 40.0);
        assert_eq!(m.visible_line_of(3), 1);
        assert_eq!(m.y_to_line(25.0), 5);
        assert_eq!(m.line_to_y(5), 20.0);

        m.set_fold_collapsed(brace, close + 1, false);
        assert_eq!(m.total_height(), 100.0);
        assert!(!m.is_line_hidden(3));
    }

    #[test]
    fn test_point_to_location_plain() {
        let mut m = model("hello\nworld");
        assert_eq!(m.point_to_location(0.0, 0.0, false), DocumentLocation::new(1, 1));
        assert_eq!(m.point_to_location(25.0, 5.0, false), DocumentLocation::new(1, 3));
        assert_eq!(m.point_to_location(12.0, 30.0, false), DocumentLocation::new(2, 2));
        // Past the line end clamps without virtual space.
        assert_eq!(m.point_to_location(400.0, 0.0, false), DocumentLocation::new(1, 6));
    }

    #[test]
    fn test_point_to_location_snaps() {
        let mut m = model("abc");
        // 17px is past the midpoint of the second 10px cell.
        assert_eq!(m.point_to_location(17.0, 0.0, true), DocumentLocation::new(1, 3));
        assert_eq!(m.point_to_location(13.0, 0.0, true), DocumentLocation::new(1, 2));
    }

    #[test]
    fn test_point_to_location_virtual_space() {
        let mut m = model_with_options(
            "ab",
            RenderOptions {
                virtual_space: true,
                ..Default::default()
            },
        );
        // 2 chars wide = 20px; 52px is 3 cells past the end.
        assert_eq!(m.point_to_location(52.0, 0.0, false), DocumentLocation::new(1, 6));
    }

    #[test]
    fn test_location_round_trip_multibyte() {
        let mut m = model("héllo");
        let (x, y) = m.location_to_point(DocumentLocation::new(1, 3));
        assert_eq!((x, y), (20.0, 0.0));
        assert_eq!(m.point_to_location(x, y, false), DocumentLocation::new(1, 3));
    }

    #[test]
    fn test_folded_row_geometry() {
        // Line 1: "head{", fold over "{...}" spanning to line 3 "}tail".
        let text = "head{\nhidden\n}tail";
        let mut m = model(text);
        let open = 4;
        let close = text.find('}').unwrap();
        let mut fold = FoldSegment::new(open, close + 1);
        fold.collapsed = true;
        m.add_fold(fold);

        // Row: "head" (40px) + "..." (30px) + "tail".
        // A point in the first half of the placeholder maps to the fold start.
        let loc = m.point_to_location(41.0, 0.0, false);
        assert_eq!(loc, DocumentLocation::new(1, 5));
        // Second half maps past the fold.
        let loc = m.point_to_location(69.0, 0.0, false);
        assert_eq!(loc, DocumentLocation::new(3, 2));
        // Text after the fold on the stitched row.
        let loc = m.point_to_location(75.0, 0.0, false);
        assert_eq!(loc, DocumentLocation::new(3, 2));

        // location_to_point walks the same row.
        let (x, _) = m.location_to_point(DocumentLocation::new(3, 3));
        assert_eq!(x, 40.0 + 30.0 + 10.0);
        // A hidden location lands on the placeholder.
        let (x, y) = m.location_to_point(DocumentLocation::new(2, 3));
        assert_eq!((x, y), (40.0, 0.0));
    }

    #[test]
    fn test_column_to_x_virtual_indent_on_empty_line() {
        let mut m = model_with_options(
            "    indented\n\nnext",
            RenderOptions {
                virtual_space: true,
                ..Default::default()
            },
        );
        // Line 2 is blank; its virtual caret sits at the indentation of the
        // nearest non-blank line above.
        assert_eq!(m.column_to_x(2, 5), 40.0);
        // A non-empty line resolves through the normal path.
        assert_eq!(m.column_to_x(1, 5), 40.0);
    }

    #[test]
    fn test_scroll_eviction_keeps_margin_and_page() {
        let text = (1..=100).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let mut m = model(&text);
        m.set_viewport(1, 10);
        for line in 1..=40 {
            let _ = m.get_or_create_layout(line);
        }
        // Jump far away: everything outside the new window + slack is gone.
        m.set_viewport(60, 69);
        assert!(m.get_layout(1).is_none());
        assert!(m.get_layout(40).is_none());

        // Lines inside the retained window survive a small scroll.
        let _ = m.get_or_create_layout(60);
        let r60 = m.get_or_create_layout(60).revision;
        m.set_viewport(62, 71);
        assert_eq!(m.get_or_create_layout(60).revision, r60);
    }

    #[test]
    fn test_search_marks_redraw_lines() {
        let mut m = model("foo\nbar\nfoo");
        m.set_viewport(1, 3);
        m.take_redraw_lines();
        m.set_search_query(SearchQuery::plain("foo"));
        m.wait_for_search();
        let redraw = m.take_redraw_lines();
        assert_eq!(redraw, vec![1, 3]);
        assert_eq!(m.search().matches().len(), 2);
    }

    #[test]
    fn test_force_invalidate_line_rebuilds() {
        let mut m = model("abc");
        let r1 = m.get_or_create_layout(1).revision;
        m.force_invalidate_line(1);
        assert_ne!(m.get_or_create_layout(1).revision, r1);
    }

    #[test]
    fn test_marker_count_changes_identity() {
        struct Noop;
        impl ChunkMarker for Noop {
            fn transform_spans(&self, _spans: &mut Vec<ColoredSpan>, _len: usize) {}
        }
        let mut m = model("abc");
        let r1 = m.get_or_create_layout(1).revision;
        let id = m.add_chunk_marker(1, Box::new(Noop));
        let r2 = m.get_or_create_layout(1).revision;
        assert_ne!(r1, r2);
        m.remove_marker(id);
        assert_ne!(m.get_or_create_layout(1).revision, r2);
    }

    #[test]
    fn test_inconsistent_marker_span_is_skipped() {
        struct Broken;
        impl ChunkMarker for Broken {
            fn transform_spans(&self, spans: &mut Vec<ColoredSpan>, _line_len: usize) {
                // Way past the end of the line.
                spans.push(ColoredSpan::new(99, 5, Scope::new("broken")));
            }
        }
        let mut m = model("abc");
        m.add_chunk_marker(1, Box::new(Broken));
        let entry = m.get_or_create_layout(1);
        // The bad span is dropped; the rest of the layout is unaffected.
        assert!(entry.is_final_styles);
        assert_eq!(entry.text, "abc");
        assert!(entry.runs.iter().all(|r| r.end <= entry.text.len()));
    }

    #[test]
    fn test_marker_line_height_override() {
        struct Tall;
        impl LineMarker for Tall {
            fn line_height(&self, _default: f64) -> Option<f64> {
                Some(44.0)
            }
        }
        let mut m = model("a\nb");
        m.add_line_marker(1, Box::new(Tall));
        let _ = m.get_or_create_layout(1);
        assert_eq!(m.line_height(1), 44.0);
        assert_eq!(m.line_to_y(2), 44.0);
    }
}
