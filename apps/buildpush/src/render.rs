//! Terminal rendering of push events.

use std::time::Duration;

use buildpush_push::{PushEvent, PushState, PushSummary};
use buildpush_transfer::format_bytes;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

/// Resolution of the progress bar.
const BAR_LENGTH: u64 = 1000;

pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_LENGTH);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {percent:>3}% {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Drives `bar` from the event stream until it closes.
///
/// Returns the summary when the push completed.
pub async fn render(mut events: mpsc::Receiver<PushEvent>, bar: ProgressBar) -> Option<PushSummary> {
    let mut completed = None;

    while let Some(event) = events.recv().await {
        match event {
            PushEvent::State(PushState::Uploading) => {
                bar.reset();
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            PushEvent::State(state) => {
                tracing::debug!(state = state.label(), "push state");
                bar.set_message(state.label());
            }
            PushEvent::Progress(snapshot) => {
                bar.set_position(bar_position(snapshot.fraction));
                bar.set_message(snapshot.label);
            }
            PushEvent::Completed(summary) => {
                bar.finish_and_clear();
                completed = Some(summary);
            }
            PushEvent::Failed { .. } => bar.abandon(),
        }
    }

    completed
}

fn bar_position(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64
}

/// The statistics printed after a successful push.
pub fn summary_lines(summary: &PushSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Pushed build {}: {} ({})",
        summary.build_id,
        format_bytes(summary.source_size),
        summary.source_stats
    )];

    if summary.reused_bytes > 0 {
        lines.push(format!(
            "Re-used {:.2}% of old, added {} fresh data",
            summary.reuse_percent(),
            format_bytes(summary.fresh_bytes)
        ));
    } else {
        lines.push(format!("Added {} fresh data", format_bytes(summary.fresh_bytes)));
    }

    let patch = format_bytes(summary.patch_size);
    match summary.savings_percent() {
        Some(savings) => lines.push(format!("{patch} patch ({savings:.2}% savings)")),
        None => lines.push(format!("{patch} patch (no savings)")),
    }

    lines
}
