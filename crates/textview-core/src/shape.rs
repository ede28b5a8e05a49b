//! Text shaping abstraction and the monospace fast-path implementation.
//!
//! Toolkit shaping backends (Pango, HarfBuzz, platform APIs) own opaque shaped
//! layout objects; the core talks to them only through [`TextShaper`] and
//! [`ShapedLine`]. Geometry is expressed in pixels; indices handed to a shaped
//! line are **UTF-8 byte indices**, translated from char indices through
//! [`Utf8IndexMapper`].
//!
//! [`MonospaceShaper`] is a complete arithmetic backend: cell widths follow
//! UAX #11 (via `unicode-width`), tabs expand to the next tab stop, and hit
//! testing works on grapheme-cluster boundaries. It doubles as the fast path
//! for monospaced fonts and as the shaping backend in headless tests.

use crate::context::Color;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Font geometry used for default line heights and monospace cell math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    /// Distance from baseline to the top of the tallest glyph.
    pub ascent: f64,
    /// Distance from baseline to the bottom of the deepest glyph.
    pub descent: f64,
    /// Advance width of one cell. Meaningful only for monospaced fonts.
    pub char_width: f64,
    /// Whether every single-cell glyph shares `char_width`.
    pub is_monospace: bool,
}

impl FontMetrics {
    /// Default line height: ascent plus descent.
    pub fn line_height(&self) -> f64 {
        self.ascent + self.descent
    }
}

/// A styled byte range handed to the shaping backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRun {
    /// Start byte index (inclusive).
    pub start: usize,
    /// End byte index (exclusive).
    pub end: usize,
    /// Foreground color.
    pub foreground: Color,
    /// Bold weight.
    pub bold: bool,
    /// Italic slant.
    pub italic: bool,
    /// Underline.
    pub underline: bool,
}

/// Result of an x-coordinate hit test against a shaped line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitPosition {
    /// Byte index of the grapheme containing the point (or the text length if
    /// the point lies past the end).
    pub byte_index: usize,
    /// Byte index of the following grapheme boundary.
    pub next_byte_index: usize,
    /// `true` if the point fell inside the shaped text.
    pub is_inside: bool,
}

/// An opaque shaped line owned by the shaping backend.
///
/// Implementations must release any native resources on drop.
pub trait ShapedLine {
    /// Replace the line's text, discarding previous shaping.
    fn set_text(&mut self, text: &str);
    /// Replace the style runs (byte-indexed; need not tile the text).
    fn set_style_runs(&mut self, runs: &[StyleRun]);
    /// Pixel width and height of the shaped text.
    fn measure(&self) -> (f64, f64);
    /// Leading x pixel position of the grapheme at `byte_index`; the total
    /// width when `byte_index` is at or past the end.
    fn index_to_x(&self, byte_index: usize) -> f64;
    /// Hit test an x pixel position.
    fn x_to_index(&self, x: f64) -> HitPosition;
}

/// Factory for [`ShapedLine`]s plus the font geometry they shape with.
pub trait TextShaper {
    /// Create an empty shaped line.
    fn shape_line(&self) -> Box<dyn ShapedLine>;
    /// Font geometry.
    fn metrics(&self) -> FontMetrics;
}

/// Arithmetic shaper for monospaced fonts.
#[derive(Debug, Clone)]
pub struct MonospaceShaper {
    metrics: FontMetrics,
    tab_width: usize,
}

impl MonospaceShaper {
    /// Create a shaper with explicit metrics and tab stop width (in cells).
    pub fn new(metrics: FontMetrics, tab_width: usize) -> Self {
        Self {
            metrics,
            tab_width: tab_width.max(1),
        }
    }

    /// A shaper with simple integral metrics, convenient for tests.
    pub fn with_cell_size(char_width: f64, line_height: f64, tab_width: usize) -> Self {
        Self::new(
            FontMetrics {
                ascent: line_height * 0.8,
                descent: line_height * 0.2,
                char_width,
                is_monospace: true,
            },
            tab_width,
        )
    }
}

impl TextShaper for MonospaceShaper {
    fn shape_line(&self) -> Box<dyn ShapedLine> {
        Box::new(MonospaceLine {
            cells: Vec::new(),
            total_cells: 0,
            text_len: 0,
            cell_width: self.metrics.char_width,
            line_height: self.metrics.line_height(),
            tab_width: self.tab_width,
        })
    }

    fn metrics(&self) -> FontMetrics {
        self.metrics
    }
}

/// One grapheme cluster in a monospace-shaped line.
#[derive(Debug, Clone, Copy)]
struct Cell {
    byte_index: usize,
    byte_len: usize,
    start_cell: usize,
    width_cells: usize,
}

struct MonospaceLine {
    cells: Vec<Cell>,
    total_cells: usize,
    text_len: usize,
    cell_width: f64,
    line_height: f64,
    tab_width: usize,
}

impl MonospaceLine {
    fn cell_at_byte(&self, byte_index: usize) -> Option<&Cell> {
        let idx = self
            .cells
            .partition_point(|c| c.byte_index + c.byte_len <= byte_index);
        self.cells.get(idx)
    }
}

impl ShapedLine for MonospaceLine {
    fn set_text(&mut self, text: &str) {
        self.cells.clear();
        self.text_len = text.len();
        let mut cell = 0usize;
        for (byte_index, grapheme) in text.grapheme_indices(true) {
            let width = if grapheme == "\t" {
                self.tab_width - (cell % self.tab_width)
            } else {
                grapheme.width()
            };
            self.cells.push(Cell {
                byte_index,
                byte_len: grapheme.len(),
                start_cell: cell,
                width_cells: width,
            });
            cell += width;
        }
        self.total_cells = cell;
    }

    fn set_style_runs(&mut self, _runs: &[StyleRun]) {
        // Styles never change monospace geometry.
    }

    fn measure(&self) -> (f64, f64) {
        (self.total_cells as f64 * self.cell_width, self.line_height)
    }

    fn index_to_x(&self, byte_index: usize) -> f64 {
        if byte_index >= self.text_len {
            return self.total_cells as f64 * self.cell_width;
        }
        match self.cell_at_byte(byte_index) {
            Some(cell) => cell.start_cell as f64 * self.cell_width,
            None => self.total_cells as f64 * self.cell_width,
        }
    }

    fn x_to_index(&self, x: f64) -> HitPosition {
        if x < 0.0 {
            return HitPosition {
                byte_index: 0,
                next_byte_index: self.cells.first().map(|c| c.byte_len).unwrap_or(0),
                is_inside: !self.cells.is_empty(),
            };
        }
        let target_cell = (x / self.cell_width).floor() as usize;
        let idx = self
            .cells
            .partition_point(|c| c.start_cell + c.width_cells.max(1) <= target_cell);
        match self.cells.get(idx) {
            Some(cell) if target_cell < self.total_cells => HitPosition {
                byte_index: cell.byte_index,
                next_byte_index: cell.byte_index + cell.byte_len,
                is_inside: true,
            },
            _ => HitPosition {
                byte_index: self.text_len,
                next_byte_index: self.text_len,
                is_inside: false,
            },
        }
    }
}

/// Monotonic char-index to UTF-8 byte-index translation.
///
/// Amortized O(1) when queried with non-decreasing char indices within one
/// text; an out-of-order query falls back to an O(n) rescan from the start.
/// Callers should prefer ascending-order queries within a line.
#[derive(Debug, Clone, Default)]
pub struct Utf8IndexMapper {
    cursor_char: usize,
    cursor_byte: usize,
}

impl Utf8IndexMapper {
    /// Create a mapper positioned at the start of a line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte index of the char at `char_index` in `text`.
    ///
    /// `char_index` may equal the char count (maps to `text.len()`); indices
    /// beyond that are a caller contract violation and are debug-asserted.
    pub fn char_to_byte(&mut self, text: &str, char_index: usize) -> usize {
        if char_index < self.cursor_char {
            self.cursor_char = 0;
            self.cursor_byte = 0;
        }
        let mut remaining = char_index - self.cursor_char;
        let mut byte = self.cursor_byte;
        let mut chars = text[byte..].chars();
        while remaining > 0 {
            match chars.next() {
                Some(ch) => {
                    byte += ch.len_utf8();
                    remaining -= 1;
                }
                None => {
                    debug_assert!(false, "char index {} beyond text length", char_index);
                    break;
                }
            }
        }
        self.cursor_char = char_index - remaining;
        self.cursor_byte = byte;
        byte
    }

    /// Char index of the byte at `byte_index` (rounded down to a char
    /// boundary).
    pub fn byte_to_char(text: &str, byte_index: usize) -> usize {
        let mut byte_index = byte_index.min(text.len());
        while byte_index > 0 && !text.is_char_boundary(byte_index) {
            byte_index -= 1;
        }
        text[..byte_index].chars().count()
    }
}
