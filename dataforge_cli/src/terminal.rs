//! Terminal capability detection
//!
//! Results go to stdout and progress bars to stderr, so the two streams are
//! checked separately: `dataforge run data.csv --output json > job.json`
//! still draws progress while writing clean JSON.

use is_terminal::IsTerminal;
use std::env;
use std::io::{stderr, stdout};

/// Environment variables set by common CI runners
const CI_MARKERS: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "BUILD_NUMBER",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "TF_BUILD",
];

/// What the process can draw on its output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalCaps {
    pub stdout_tty: bool,
    pub stderr_tty: bool,
    pub ci: bool,
    pub dumb: bool,
}

impl TerminalCaps {
    /// Inspect the current process
    pub fn detect() -> Self {
        Self {
            stdout_tty: stdout().is_terminal(),
            stderr_tty: stderr().is_terminal(),
            ci: is_ci_environment(),
            dumb: matches!(env::var("TERM").as_deref(), Ok("dumb")),
        }
    }

    /// Animated bars need a watched, capable stderr
    pub fn progress(&self) -> bool {
        self.stderr_tty && !self.ci && !self.dumb
    }

    /// Colors on stdout, subject to configuration and `NO_COLOR`
    pub fn color(&self, configured: bool, no_color: bool) -> bool {
        configured && !no_color && self.stdout_tty && !self.dumb
    }
}

/// Detect if running in a CI environment
fn is_ci_environment() -> bool {
    CI_MARKERS.iter().any(|var| env::var_os(var).is_some())
}

/// Determine if progress bars should be shown by default
pub fn should_show_progress_by_default() -> bool {
    TerminalCaps::detect().progress()
}

/// Whether colored output should be used, honoring `NO_COLOR`
pub fn should_use_color(configured: bool) -> bool {
    TerminalCaps::detect().color(configured, env::var_os("NO_COLOR").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tty() -> TerminalCaps {
        TerminalCaps {
            stdout_tty: true,
            stderr_tty: true,
            ci: false,
            dumb: false,
        }
    }

    #[test]
    fn test_progress_follows_stderr_only() {
        let piped_stdout = TerminalCaps {
            stdout_tty: false,
            ..tty()
        };
        assert!(piped_stdout.progress());
        assert!(!piped_stdout.color(true, false));
    }

    #[test]
    fn test_ci_and_dumb_terminals_get_no_progress() {
        assert!(!TerminalCaps { ci: true, ..tty() }.progress());
        assert!(!TerminalCaps { dumb: true, ..tty() }.progress());
    }

    #[test]
    fn test_color_respects_configuration_and_no_color() {
        assert!(tty().color(true, false));
        assert!(!tty().color(false, false));
        assert!(!tty().color(true, true));
        assert!(!should_use_color(false));
    }
}
