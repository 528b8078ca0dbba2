//! Console sink - logs all messages for testing and debugging
//!
//! Useful for validating a byte stream decode without hardware attached.

use tracing::info;

use crate::drivers::MidiSink;
use crate::midi::{format_hex, MidiMessage};

/// How many sysex bytes to show before eliding the rest.
const SYSEX_LOG_LIMIT: usize = 24;

/// ConsoleSink logs every delivered message instead of playing it.
pub struct ConsoleSink {
    /// Delivery counter for debugging
    delivered: u64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { delivered: 0 }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn play_msg(&mut self, msg: &[u8]) {
        self.delivered += 1;
        let parsed = MidiMessage::parse(msg)
            .map(|m| format!(" => {}", m))
            .unwrap_or_default();
        info!("🎹 [#{}] {}{}", self.delivered, format_hex(msg), parsed);
    }

    fn play_sysex(&mut self, sysex: &[u8]) {
        self.delivered += 1;
        let shown = &sysex[..sysex.len().min(SYSEX_LOG_LIMIT)];
        let ellipsis = if sysex.len() > SYSEX_LOG_LIMIT { " …" } else { "" };
        info!(
            "🎛  [#{}] SysEx {} bytes | {}{}",
            self.delivered,
            sysex.len(),
            format_hex(shown),
            ellipsis
        );
    }

    fn close(&mut self) {
        info!("console sink closed after {} messages", self.delivered);
    }
}
