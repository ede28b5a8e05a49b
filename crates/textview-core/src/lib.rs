#![warn(missing_docs)]
//! TextView Core - Headless Line Layout and Rendering Cache for Text Editors
//!
//! # Overview
//!
//! `textview-core` is the layout heart of a text editor view: it turns buffer
//! lines into cached, shaped, styled visual lines and answers geometry
//! questions about them. It does not draw anything, assuming the upper layer
//! provides a shaping backend ([`TextShaper`]) and consumes [`LayoutEntry`]s.
//! Slow syntax highlighting and whole-document search run in the background
//! and reconcile into the cache without ever blocking a frame.
//!
//! # Core Features
//!
//! - **Identity-Keyed Layout Cache**: per-line entries validated by offset,
//!   length, marker count and selection, O(1) hit path
//! - **Non-Uniform Line Heights**: balanced positional tree, O(log n)
//!   `line -> y` / `y -> line`
//! - **Bounded Highlight Waits**: at most one short synchronous wait per
//!   line; late results converge through idle polling
//! - **Background Search Index**: cancel-and-restart workers with fine/coarse
//!   redraw reconciliation
//! - **Fold-Aware Geometry**: point/location mapping walks collapsed folds
//!   and their placeholders, with optional virtual space
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  TextViewModel (owner thread)               │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  Geometry (point <-> location, folds)       │  ← Hit Testing
//! ├─────────────────────────────────────────────┤
//! │  Layout Cache & Height Index                │  ← Visual Lines
//! ├─────────────────────────────────────────────┤
//! │  Highlight / Search Coordination (workers)  │  ← Background Work
//! ├─────────────────────────────────────────────┤
//! │  Text Buffer (Rope-based)                   │  ← Text Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use textview_core::{
//!     DocumentLocation, MonospaceShaper, PlainHighlightSource, RenderContext, TextViewModel,
//! };
//!
//! let mut view = TextViewModel::new(
//!     "fn main() {\n    println!(\"Hello\");\n}\n",
//!     Box::new(MonospaceShaper::with_cell_size(8.0, 16.0, 4)),
//!     Box::new(PlainHighlightSource),
//!     RenderContext::default(),
//! );
//!
//! view.set_viewport(1, 4);
//! let entry = view.get_or_create_layout(2);
//! assert!(entry.width > 0.0);
//!
//! // Geometry round-trip.
//! let location = view.point_to_location(32.0, 20.0, false);
//! assert_eq!(location, DocumentLocation::new(2, 5));
//! ```
//!
//! # Module Description
//!
//! - [`buffer`] - rope-backed text buffer with line addressing and change events
//! - [`highlight`] - colored spans and async highlight coordination
//! - [`layout`] - the identity-keyed per-line layout cache
//! - [`shape`] - shaping backend seam and the monospace implementation
//! - [`height`] - O(log n) non-uniform line height index
//! - [`search`] - search engine and the background search index
//! - [`fold`] - collapsible regions
//! - [`marker`] - line-attached layout/styling markers
//! - [`context`] - theme, colors, and render options
//! - [`view`] - the owner-thread view model and geometry queries
//!
//! # Threading Model
//!
//! All state lives on one owner thread behind `&mut TextViewModel`.
//! Highlighting and search run on worker threads over immutable snapshots and
//! hand results back through channels; cancellation flags and epochs make
//! stale results inert. Callers drain finished work with
//! [`TextViewModel::pump`] and repaint the lines it reports.

pub mod buffer;
pub mod context;
pub mod fold;
pub mod height;
pub mod highlight;
pub mod layout;
pub mod marker;
pub mod search;
pub mod shape;
pub mod view;

pub use buffer::{BufferChange, ChangeListener, LineSpan, ListenerId, TextBuffer};
pub use context::{Color, RenderContext, RenderOptions, Style, Theme};
pub use fold::{FoldSegment, FoldSet};
pub use height::HeightIndex;
pub use highlight::{
    CancelFlag, ColoredSpan, HighlightCoordinator, HighlightRequest, HighlightSource, LineSpans,
    PlainHighlightSource, Scope,
};
pub use layout::{EntryKey, LayoutCache, LayoutEntry, Segment};
pub use marker::{ChunkMarker, LineMarker, MarkerId, MarkerSet};
pub use search::{
    SearchError, SearchIndex, SearchMatch, SearchOptions, SearchQuery, SearchUpdate, find_all,
};
pub use shape::{
    FontMetrics, HitPosition, MonospaceShaper, ShapedLine, StyleRun, TextShaper, Utf8IndexMapper,
};
pub use view::{DocumentLocation, TextViewModel};
