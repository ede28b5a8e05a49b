//! Line-attached markers that influence layout and styling.
//!
//! Markers come in two capabilities. A [`ChunkMarker`] rewrites the colored
//! span list of its line before styling (diagnostics squiggles, diff
//! coloring, link underlines). A [`LineMarker`] overrides whole-line
//! presentation (custom height, row background). Both are host-defined trait
//! objects; the core only calls through the seams.
//!
//! Markers on a line are applied in insertion order. The per-line marker
//! count participates in cached-layout identity, so adding or removing a
//! marker invalidates that line's cached layout on the next identity check
//! without an explicit invalidation call.

use crate::context::Color;
use crate::highlight::ColoredSpan;
use std::collections::BTreeMap;

/// Rewrites a line's colored spans before theme resolution.
pub trait ChunkMarker {
    /// Transform the line-relative span list in place. `line_len` is the
    /// line's length in chars; spans must keep tiling `[0, line_len)`.
    fn transform_spans(&self, spans: &mut Vec<ColoredSpan>, line_len: usize);

    /// Foreground applied to the whole line after theme resolution, if any.
    fn foreground_override(&self) -> Option<Color> {
        None
    }
}

/// Overrides whole-line presentation.
pub trait LineMarker {
    /// Replacement pixel height for the line, if the marker changes it.
    fn line_height(&self, default_height: f64) -> Option<f64> {
        let _ = default_height;
        None
    }

    /// Row background color, if any.
    fn background(&self) -> Option<Color> {
        None
    }
}

/// Handle for removing a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(u64);

enum Marker {
    Chunk(Box<dyn ChunkMarker>),
    Line(Box<dyn LineMarker>),
}

/// All markers in a view, grouped by 1-based line number.
#[derive(Default)]
pub struct MarkerSet {
    by_line: BTreeMap<usize, Vec<(MarkerId, Marker)>>,
    next_id: u64,
}

impl MarkerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a chunk marker to a line.
    pub fn add_chunk_marker(&mut self, line_number: usize, marker: Box<dyn ChunkMarker>) -> MarkerId {
        self.push(line_number, Marker::Chunk(marker))
    }

    /// Attach a line marker to a line.
    pub fn add_line_marker(&mut self, line_number: usize, marker: Box<dyn LineMarker>) -> MarkerId {
        self.push(line_number, Marker::Line(marker))
    }

    fn push(&mut self, line_number: usize, marker: Marker) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.by_line.entry(line_number).or_default().push((id, marker));
        id
    }

    /// Detach a marker. Returns the line it was attached to, or `None` if the
    /// id was already removed.
    pub fn remove(&mut self, id: MarkerId) -> Option<usize> {
        let mut found = None;
        for (line, markers) in self.by_line.iter_mut() {
            if let Some(pos) = markers.iter().position(|(mid, _)| *mid == id) {
                markers.remove(pos);
                found = Some(*line);
                break;
            }
        }
        if let Some(line) = found {
            if self.by_line.get(&line).is_some_and(|m| m.is_empty()) {
                self.by_line.remove(&line);
            }
        }
        found
    }

    /// Number of markers on a line. Part of cached-layout identity.
    pub fn count_on(&self, line_number: usize) -> usize {
        self.by_line.get(&line_number).map(|m| m.len()).unwrap_or(0)
    }

    /// Chunk markers on a line, in insertion order.
    pub fn chunk_markers_on(&self, line_number: usize) -> impl Iterator<Item = &dyn ChunkMarker> {
        self.by_line
            .get(&line_number)
            .into_iter()
            .flatten()
            .filter_map(|(_, m)| match m {
                Marker::Chunk(marker) => Some(marker.as_ref()),
                Marker::Line(_) => None,
            })
    }

    /// Line markers on a line, in insertion order.
    pub fn line_markers_on(&self, line_number: usize) -> impl Iterator<Item = &dyn LineMarker> {
        self.by_line
            .get(&line_number)
            .into_iter()
            .flatten()
            .filter_map(|(_, m)| match m {
                Marker::Line(marker) => Some(marker.as_ref()),
                Marker::Chunk(_) => None,
            })
    }

    /// Effective height of a line: the last line marker overriding the height
    /// wins, matching application order.
    pub fn effective_line_height(&self, line_number: usize, default_height: f64) -> f64 {
        let mut height = default_height;
        for marker in self.line_markers_on(line_number) {
            if let Some(h) = marker.line_height(default_height) {
                height = h;
            }
        }
        height
    }

    /// Re-home markers after lines were inserted or removed at `first_line`.
    ///
    /// With a negative delta, markers on deleted lines are dropped.
    pub fn adjust_for_line_delta(&mut self, first_line: usize, line_delta: isize) {
        if line_delta == 0 {
            return;
        }
        let moved: Vec<(usize, Vec<(MarkerId, Marker)>)> = {
            let keys: Vec<usize> = self
                .by_line
                .range(first_line + 1..)
                .map(|(line, _)| *line)
                .collect();
            keys.into_iter()
                .filter_map(|line| self.by_line.remove(&line).map(|m| (line, m)))
                .collect()
        };
        for (line, markers) in moved {
            let new_line = line as isize + line_delta;
            if new_line <= first_line as isize {
                continue; // line was deleted
            }
            self.by_line
                .entry(new_line as usize)
                .or_default()
                .extend(markers);
        }
    }

    /// Lines carrying at least one marker, in order.
    pub fn marked_lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_line.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::Scope;

    struct Tint(Color);

    impl ChunkMarker for Tint {
        fn transform_spans(&self, spans: &mut Vec<ColoredSpan>, _line_len: usize) {
            for span in spans {
                span.scope = Scope::new("marker.tint");
            }
        }

        fn foreground_override(&self) -> Option<Color> {
            Some(self.0)
        }
    }

    struct TallLine(f64);

    impl LineMarker for TallLine {
        fn line_height(&self, _default: f64) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn test_count_and_remove() {
        let mut set = MarkerSet::new();
        let a = set.add_chunk_marker(3, Box::new(Tint(Color::BLACK)));
        let b = set.add_line_marker(3, Box::new(TallLine(40.0)));
        assert_eq!(set.count_on(3), 2);
        assert_eq!(set.remove(a), Some(3));
        assert_eq!(set.count_on(3), 1);
        assert_eq!(set.remove(a), None);
        assert_eq!(set.remove(b), Some(3));
        assert_eq!(set.count_on(3), 0);
    }

    #[test]
    fn test_effective_line_height_last_wins() {
        let mut set = MarkerSet::new();
        set.add_line_marker(1, Box::new(TallLine(30.0)));
        set.add_line_marker(1, Box::new(TallLine(45.0)));
        assert_eq!(set.effective_line_height(1, 20.0), 45.0);
        assert_eq!(set.effective_line_height(2, 20.0), 20.0);
    }

    #[test]
    fn test_adjust_shifts_and_drops() {
        let mut set = MarkerSet::new();
        set.add_chunk_marker(2, Box::new(Tint(Color::BLACK)));
        set.add_chunk_marker(5, Box::new(Tint(Color::WHITE)));
        set.add_chunk_marker(8, Box::new(Tint(Color::BLACK)));

        // Three lines deleted after line 3: lines 4..=6 vanish.
        set.adjust_for_line_delta(3, -3);
        assert_eq!(set.count_on(2), 1);
        assert_eq!(set.count_on(5), 1); // was line 8
        assert_eq!(set.marked_lines().collect::<Vec<_>>(), vec![2, 5]);

        // Two lines inserted at line 1.
        set.adjust_for_line_delta(1, 2);
        assert_eq!(set.marked_lines().collect::<Vec<_>>(), vec![4, 7]);
    }

    #[test]
    fn test_chunk_markers_in_insertion_order() {
        let mut set = MarkerSet::new();
        set.add_chunk_marker(1, Box::new(Tint(Color::rgb(1, 0, 0))));
        set.add_chunk_marker(1, Box::new(Tint(Color::rgb(2, 0, 0))));
        let overrides: Vec<_> = set
            .chunk_markers_on(1)
            .map(|m| m.foreground_override())
            .collect();
        assert_eq!(
            overrides,
            vec![Some(Color::rgb(1, 0, 0)), Some(Color::rgb(2, 0, 0))]
        );
    }
}
