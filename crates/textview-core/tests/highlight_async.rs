use std::thread;
use std::time::Duration;
use textview_core::highlight::{ColoredSpan, HighlightRequest, HighlightSource, Scope};
use textview_core::{MonospaceShaper, RenderContext, RenderOptions, TextViewModel};

/// A source that answers from a worker thread after a fixed delay, tagging
/// the whole line with one scope.
struct DelayedSource {
    delay: Duration,
}

impl HighlightSource for DelayedSource {
    fn request_highlight(&self, request: HighlightRequest) {
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            if request.cancel().is_cancelled() {
                return;
            }
            let len = request.line().length;
            request.finish(vec![ColoredSpan::new(0, len, Scope::new("keyword"))]);
        });
    }
}

fn slow_model(text: &str, delay_ms: u64, wait_ms: u64) -> TextViewModel {
    let options = RenderOptions {
        highlight_wait: Duration::from_millis(wait_ms),
        ..Default::default()
    };
    TextViewModel::new(
        text,
        Box::new(MonospaceShaper::with_cell_size(10.0, 20.0, 4)),
        Box::new(DelayedSource {
            delay: Duration::from_millis(delay_ms),
        }),
        RenderContext::new(textview_core::Theme::monochrome(textview_core::Color::BLACK), options),
    )
}

#[test]
fn test_slow_highlight_converges_through_pump() {
    let mut view = slow_model("first\nsecond", 80, 5);
    view.set_viewport(1, 2);
    view.take_redraw_lines();

    // First layout times out and renders provisionally.
    let entry = view.get_or_create_layout(1);
    assert!(!entry.is_final_styles);
    assert_eq!(entry.spans.len(), 1);
    assert!(entry.spans[0].scope.is_empty());

    // A rebuild while the computation is in flight must not spawn a second
    // request; it keeps serving the provisional result.
    view.force_invalidate_line(1);
    assert!(!view.get_or_create_layout(1).is_final_styles);

    // Once the worker finishes, pump reports the line and the next layout is
    // final.
    thread::sleep(Duration::from_millis(160));
    view.pump();
    let redraw = view.take_redraw_lines();
    assert!(redraw.contains(&1));

    let entry = view.get_or_create_layout(1);
    assert!(entry.is_final_styles);
    assert_eq!(entry.spans[0].scope, Scope::new("keyword"));
}

#[test]
fn test_fast_highlight_is_final_immediately() {
    let mut view = slow_model("short", 5, 100);
    let entry = view.get_or_create_layout(1);
    assert!(entry.is_final_styles);
    assert_eq!(entry.spans[0].scope, Scope::new("keyword"));
}

#[test]
fn test_purge_discards_in_flight_results() {
    let mut view = slow_model("alpha\nbeta", 60, 5);
    view.set_viewport(1, 2);
    assert!(!view.get_or_create_layout(1).is_final_styles);

    view.purge_layout_cache();
    thread::sleep(Duration::from_millis(150));
    view.pump();

    // The pre-purge result was cancelled; the rebuilt layout starts another
    // computation from scratch.
    let entry = view.get_or_create_layout(1);
    assert!(!entry.is_final_styles);
    thread::sleep(Duration::from_millis(150));
    view.pump();
    assert!(view.get_or_create_layout(1).is_final_styles);
}

#[test]
fn test_edit_reissues_highlight_for_changed_lines() {
    let mut view = slow_model("aaa\nbbb", 5, 100);
    let _ = view.get_or_create_layout(2);
    assert!(view.get_or_create_layout(2).is_final_styles);

    // The edit shifts line 2's offsets; the stale spans must not be reused.
    view.insert(0, "x");
    let entry = view.get_or_create_layout(2);
    assert!(entry.is_final_styles);
    assert_eq!(entry.spans[0].length, 3);
}
