//! Immutable render context: theme, font-independent options, and colors.
//!
//! Layout never reads mutable globals; callers resolve a [`RenderContext`] once
//! per frame and pass it into every layout call. Changing the context (theme or
//! options) requires a full layout-cache purge.

use crate::highlight::Scope;
use std::time::Duration;

/// An opaque 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Create a color from channels.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// White.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
}

/// Resolved visual style for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    /// Foreground color.
    pub foreground: Color,
    /// Background color, if different from the view background.
    pub background: Option<Color>,
    /// Bold weight.
    pub bold: bool,
    /// Italic slant.
    pub italic: bool,
    /// Underline.
    pub underline: bool,
}

impl Style {
    /// A plain style with the given foreground.
    pub fn plain(foreground: Color) -> Self {
        Self {
            foreground,
            background: None,
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

/// Scope-to-style lookup table with longest-prefix matching.
///
/// A rule for `"string"` matches `"string.quoted"`; among matching rules the
/// longest scope name wins. Unmatched scopes fall back to the default style.
#[derive(Debug, Clone)]
pub struct Theme {
    default_style: Style,
    rules: Vec<(String, Style)>,
}

impl Theme {
    /// Create a theme from a default style and scope rules.
    pub fn new(default_style: Style, rules: Vec<(String, Style)>) -> Self {
        Self {
            default_style,
            rules,
        }
    }

    /// A monochrome theme (everything renders in the default style).
    pub fn monochrome(foreground: Color) -> Self {
        Self::new(Style::plain(foreground), Vec::new())
    }

    /// Style for a scope.
    pub fn style_for(&self, scope: &Scope) -> Style {
        if scope.is_empty() {
            return self.default_style;
        }
        let name = scope.name();
        let mut best: Option<&(String, Style)> = None;
        for rule in &self.rules {
            let prefix = rule.0.as_str();
            let matches = name == prefix
                || (name.len() > prefix.len()
                    && name.starts_with(prefix)
                    && name.as_bytes()[prefix.len()] == b'.');
            if matches && best.is_none_or(|b| prefix.len() > b.0.len()) {
                best = Some(rule);
            }
        }
        best.map(|(_, style)| *style).unwrap_or(self.default_style)
    }

    /// The default (plain) style.
    pub fn default_style(&self) -> Style {
        self.default_style
    }
}

/// Options affecting layout and geometry, captured as an immutable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Tab stop width in cells.
    pub tab_width: usize,
    /// Vertical ruler column (1-based), if shown. Selection runs crossing the
    /// ruler are split at it so the renderer can draw both sides separately.
    pub ruler_column: Option<usize>,
    /// Allow caret/selection columns beyond the physical line end.
    pub virtual_space: bool,
    /// Per-line styling time budget; exceeding it re-shapes the line as a
    /// single unstyled run.
    pub styling_budget: Duration,
    /// Bounded synchronous wait on background highlighting.
    pub highlight_wait: Duration,
    /// Lines kept cached above and below the viewport before scroll eviction.
    pub retention_margin: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            tab_width: 4,
            ruler_column: None,
            virtual_space: false,
            styling_budget: Duration::from_millis(50),
            highlight_wait: Duration::from_millis(100),
            retention_margin: 5,
        }
    }
}

/// The immutable per-frame context handed into layout calls.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Scope-to-style lookup.
    pub theme: Theme,
    /// Option snapshot.
    pub options: RenderOptions,
}

impl RenderContext {
    /// Create a context.
    pub fn new(theme: Theme, options: RenderOptions) -> Self {
        Self { theme, options }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(
            Theme::monochrome(Color::BLACK),
            RenderOptions::default(),
        )
    }
}
