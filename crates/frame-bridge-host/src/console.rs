//! Console host function implementation.
//!
//! Backs the `puts` import. Each line printed by the guest is:
//! 1. Stored in the [`HostContext`], keeping at most `max_console_lines`
//! 2. Emitted via `tracing`, tagged with the session
//! 3. Echoed to stdout when enabled

use std::time::Instant;

use frame_bridge_core::{ConsoleLine, HostContext};
use tracing::info;

/// Host implementation of guest console output.
pub struct ConsoleHost;

impl ConsoleHost {
    /// Print a line from the guest.
    pub fn puts(ctx: &mut HostContext, message: &str) {
        ctx.console.push_back(ConsoleLine {
            message: message.to_string(),
            timestamp: Instant::now(),
        });
        while ctx.console.len() > ctx.max_console_lines() {
            ctx.console.pop_front();
        }

        let session_id = &ctx.session_id;
        info!(session_id, guest_output = true, "{}", message);

        if ctx.echo_console() {
            println!("{message}");
        }
    }

    /// Text of every line printed so far.
    pub fn lines(ctx: &HostContext) -> impl Iterator<Item = &str> {
        ctx.console.iter().map(|line| line.message.as_str())
    }
}
