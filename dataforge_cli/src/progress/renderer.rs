//! Progress rendering for the CLI
//!
//! Turns the engine's progress feeds into terminal progress bars. Bars draw
//! to stderr so stdout stays clean for results.

use super::utils::format_elapsed;
use colored::*;
use dataforge_core::progress::FeedStatus;
use dataforge_core::{ProgressEvent, Subscription};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {prefix:.bold} {msg}";

const CHUNK_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Drain a progress feed into a renderer, returning the last event seen
pub async fn render_feed(
    mut subscription: Subscription,
    mut renderer: FeedRenderer,
) -> Option<ProgressEvent> {
    let mut last = None;
    while let Some(event) = subscription.next().await {
        renderer.handle_event(&event);
        last = Some(event);
    }
    renderer.finish(last.as_ref());
    last
}

/// Progress bar following one dataset or job feed
pub struct FeedRenderer {
    bar: ProgressBar,
    last_step: Option<String>,
    started: Instant,
}

impl FeedRenderer {
    /// Create a renderer; a hidden one still tracks state but draws nothing
    pub fn new(label: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(100)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(style(BAR_TEMPLATE));
        bar.set_prefix(label.to_string());
        if visible {
            bar.enable_steady_tick(Duration::from_millis(120));
        }
        Self {
            bar,
            last_step: None,
            started: Instant::now(),
        }
    }

    /// Apply one feed event
    pub fn handle_event(&mut self, event: &ProgressEvent) {
        self.bar.set_position(u64::from(event.progress));
        if let Some(step) = &event.step
            && self.last_step.as_ref() != Some(step)
        {
            log::debug!("{} entered step {step}", event.key);
            self.last_step = Some(step.clone());
        }
        self.bar.set_message(event.message.clone());
    }

    /// Current bar position, in percent
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finish the bar with a status-colored summary
    pub fn finish(self, last: Option<&ProgressEvent>) {
        let Some(event) = last else {
            self.bar.finish_and_clear();
            return;
        };
        let status = match event.status {
            FeedStatus::Ready | FeedStatus::Completed => format!("✓ {}", event.status).green(),
            FeedStatus::Cancelled => format!("⊘ {}", event.status).yellow(),
            FeedStatus::Failed => format!("✗ {}", event.status).red(),
            _ => event.status.as_str().normal(),
        };
        let elapsed = format_elapsed(self.elapsed().as_secs_f64());
        self.bar
            .finish_with_message(format!("{status} {} ({elapsed})", event.message));
    }
}

/// Bar counting uploaded chunks
pub fn chunk_bar(total_chunks: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total_chunks as u64);
    bar.set_style(style(CHUNK_TEMPLATE));
    bar
}

/// Print a one-line status message to stderr
pub fn show_status(message: &str) {
    eprintln!("{} {}", "→".green(), message);
}
