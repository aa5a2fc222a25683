//! Progress reporting for the CLI
//!
//! Renders the engine's dataset and job feeds as terminal progress bars.

pub mod renderer;
pub mod utils;

pub use renderer::{FeedRenderer, chunk_bar, render_feed, show_status};
pub use utils::{format_bytes, format_duration, format_elapsed, format_row_rate};
