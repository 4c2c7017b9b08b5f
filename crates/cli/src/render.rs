//! Terminal output for a running turn.

use std::io::Write;

use oi_core::ToolCallStatus;
use oi_engine::RenderSink;
use tracing::debug;

/// Streams response text to stdout and tool activity to stderr.
#[derive(Debug)]
pub struct TerminalSink {
    quiet: bool,
    at_line_start: bool,
    wrote: bool,
}

impl TerminalSink {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            at_line_start: true,
            wrote: false,
        }
    }

    /// End the output with a newline if the response did not.
    pub fn finish(&mut self) {
        if self.wrote && !self.at_line_start {
            self.push("\n");
        }
    }
}

impl RenderSink for TerminalSink {
    fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(chunk.as_bytes()).and_then(|()| out.flush()) {
            debug!(error = %e, "Failed to write to stdout");
            return;
        }
        self.wrote = true;
        self.at_line_start = chunk.ends_with('\n');
    }

    fn tool_status(&mut self, status: &ToolCallStatus) {
        if self.quiet {
            return;
        }
        // The status text opens with its own newline
        eprint!("{status}");
        self.at_line_start = true;
    }
}
