//! `textview-highlight-simple` - Simple (regex-based) highlight source for `textview-core`.
//!
//! This crate is intended for lightweight formats (JSON/INI/etc.) where a full
//! grammar or language server is unnecessary. Rules run per line, so the
//! highlighter plugs directly into `textview-core`'s per-line
//! [`HighlightSource`] seam, either synchronously or on a worker thread.

use regex::Regex;
use std::sync::Arc;
use std::thread;
use textview_core::highlight::{ColoredSpan, HighlightRequest, HighlightSource, Scope};

/// A single regex highlighting rule.
#[derive(Debug, Clone)]
pub struct RegexRule {
    regex: Regex,
    scope: Scope,
    capture_group: Option<usize>,
}

impl RegexRule {
    /// Create a rule tagging every match of `pattern` with `scope`.
    pub fn new(pattern: &str, scope: Scope) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            scope,
            capture_group: None,
        })
    }

    /// Highlight only a capture group of each match.
    ///
    /// Example (INI key):
    /// - pattern: `^\\s*([^=\\s]+)\\s*=`
    /// - capture_group: `1` (the key)
    pub fn with_capture_group(mut self, group: usize) -> Self {
        self.capture_group = Some(group);
        self
    }

    /// The scope this rule tags matches with.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// A simple regex-based syntax highlighter.
///
/// Designed for simple formats (JSON/INI/etc.). It is *not* intended to be a
/// full parser.
#[derive(Debug, Clone)]
pub struct RegexHighlighter {
    rules: Vec<RegexRule>,
}

impl RegexHighlighter {
    /// Create a highlighter from rules; earlier rules win on overlap.
    pub fn new(rules: Vec<RegexRule>) -> Self {
        Self { rules }
    }

    /// The rule list.
    pub fn rules(&self) -> &[RegexRule] {
        &self.rules
    }

    /// Run all rules over one line, returning line-relative char-offset
    /// spans. Overlaps are left to the caller's tiling to resolve.
    pub fn highlight_line(&self, line_text: &str) -> Vec<ColoredSpan> {
        let mut spans = Vec::new();
        for rule in &self.rules {
            if let Some(group) = rule.capture_group {
                for caps in rule.regex.captures_iter(line_text) {
                    let Some(m) = caps.get(group) else {
                        continue;
                    };
                    if let Some(span) =
                        span_from_match(line_text, m.start(), m.end(), rule.scope.clone())
                    {
                        spans.push(span);
                    }
                }
            } else {
                for m in rule.regex.find_iter(line_text) {
                    if let Some(span) =
                        span_from_match(line_text, m.start(), m.end(), rule.scope.clone())
                    {
                        spans.push(span);
                    }
                }
            }
        }
        spans
    }

    /// A small default JSON grammar (strings, numbers, booleans, null).
    pub fn json_default() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            // JSON string (single-line, handles escapes)
            RegexRule::new(r#""(?:\\.|[^"\\])*""#, Scope::new("string.quoted.json"))?,
            // JSON number
            RegexRule::new(
                r#"-?(?:0|[1-9]\d*)(?:\.\d+)?(?:[eE][+-]?\d+)?"#,
                Scope::new("constant.numeric.json"),
            )?,
            // JSON boolean / null
            RegexRule::new(r#"\b(?:true|false)\b"#, Scope::new("constant.language.boolean"))?,
            RegexRule::new(r#"\bnull\b"#, Scope::new("constant.language.null"))?,
        ]))
    }

    /// A small default INI grammar (section, key, comment).
    pub fn ini_default() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            // Section header: [section]
            RegexRule::new(r#"^\s*\[([^\]]+)\]\s*$"#, Scope::new("entity.name.section.ini"))?
                .with_capture_group(1),
            // Key: key = value
            RegexRule::new(r#"^\s*([^=\s]+)\s*="#, Scope::new("variable.other.key.ini"))?
                .with_capture_group(1),
            // Comment: ;... or #...
            RegexRule::new(r#"^\s*[;#].*$"#, Scope::new("comment.line.ini"))?,
        ]))
    }
}

fn span_from_match(
    line_text: &str,
    match_start_byte: usize,
    match_end_byte: usize,
    scope: Scope,
) -> Option<ColoredSpan> {
    if match_start_byte >= match_end_byte || match_end_byte > line_text.len() {
        return None;
    }

    let start = line_text[..match_start_byte].chars().count();
    let end = line_text[..match_end_byte].chars().count();
    if start >= end {
        return None;
    }

    Some(ColoredSpan::new(start, end - start, scope))
}

/// A [`HighlightSource`] running a [`RegexHighlighter`] per line.
///
/// By default requests are answered synchronously on the calling thread,
/// which is plenty for regex rules. [`threaded`](Self::threaded) answers on a
/// spawned worker instead, exercising the caller's bounded-wait path; useful
/// for very large rule sets or as a stand-in for slower sources in tests.
#[derive(Debug, Clone)]
pub struct RegexHighlightSource {
    highlighter: Arc<RegexHighlighter>,
    threaded: bool,
}

impl RegexHighlightSource {
    /// Create a synchronous source.
    pub fn new(highlighter: RegexHighlighter) -> Self {
        Self {
            highlighter: Arc::new(highlighter),
            threaded: false,
        }
    }

    /// Answer each request on a spawned worker thread.
    pub fn threaded(highlighter: RegexHighlighter) -> Self {
        Self {
            highlighter: Arc::new(highlighter),
            threaded: true,
        }
    }

    /// The underlying highlighter.
    pub fn highlighter(&self) -> &RegexHighlighter {
        &self.highlighter
    }
}

impl HighlightSource for RegexHighlightSource {
    fn request_highlight(&self, request: HighlightRequest) {
        if self.threaded {
            let highlighter = Arc::clone(&self.highlighter);
            thread::spawn(move || {
                if request.cancel().is_cancelled() {
                    return;
                }
                let spans = highlighter.highlight_line(request.text());
                request.finish(spans);
            });
        } else {
            let spans = self.highlighter.highlight_line(request.text());
            request.finish(spans);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_strings_and_numbers() {
        let highlighter = RegexHighlighter::json_default().unwrap();
        let spans = highlighter.highlight_line(r#"{ "key": "值", "n": 12, "ok": true, "x": null }"#);

        // Expect at least the 4 quoted strings and a number/keyword.
        assert!(spans.len() >= 6);
        assert!(spans.iter().any(|s| s.scope == Scope::new("string.quoted.json")));
        assert!(spans.iter().any(|s| s.scope == Scope::new("constant.numeric.json")));
    }

    #[test]
    fn test_json_multibyte_offsets_are_chars() {
        let highlighter = RegexHighlighter::json_default().unwrap();
        let spans = highlighter.highlight_line(r#""值值": 7"#);
        let string = spans
            .iter()
            .find(|s| s.scope == Scope::new("string.quoted.json"))
            .unwrap();
        assert_eq!((string.offset, string.length), (0, 4));
    }

    #[test]
    fn test_ini_capture_groups() {
        let highlighter = RegexHighlighter::ini_default().unwrap();

        let section = highlighter.highlight_line("[core]");
        assert!(section.iter().any(|s| s.scope == Scope::new("entity.name.section.ini")));
        assert_eq!(section[0].offset, 1); // inside the brackets

        let key = highlighter.highlight_line("name = value");
        assert!(key.iter().any(|s| s.scope == Scope::new("variable.other.key.ini")));
        assert_eq!((key[0].offset, key[0].length), (0, 4));

        let comment = highlighter.highlight_line("; note");
        assert!(comment.iter().any(|s| s.scope == Scope::new("comment.line.ini")));
    }
}
