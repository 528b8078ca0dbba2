//! Output sinks for decoded MIDI messages
//!
//! A sink is the downstream device the gateway delivers to: a real MIDI
//! output port, the console (for development without hardware), or nothing.
//! Selection follows the configured device name, with `auto` probing for a
//! usable port and falling back to the null sink.

use thiserror::Error;
use tracing::{info, warn};

pub mod console;
pub mod midiport;

pub use console::ConsoleSink;
pub use midiport::MidiPortSink;

/// Errors produced while opening an output device.
#[derive(Debug, Error)]
pub enum SinkError {
    /// No output port matched the configured pattern.
    #[error("output port '{0}' not found")]
    PortNotFound(String),
    /// Backend specific failure with additional context.
    #[error("midi backend error: {0}")]
    Backend(String),
}

/// Sink receiving completed messages from the gateway.
///
/// Both delivery methods are synchronous and must not block indefinitely;
/// a stalled sink stalls the whole decode path. Send failures are the
/// sink's problem to log, never the gateway's to handle.
pub trait MidiSink: Send {
    /// Sink name for logs (e.g. "none", "console", a port name).
    fn name(&self) -> &str;

    /// Deliver a complete channel-voice or realtime message.
    fn play_msg(&mut self, msg: &[u8]);

    /// Deliver a complete system-exclusive message, 0xF0 and 0xF7 included.
    fn play_sysex(&mut self, sysex: &[u8]);

    /// Release the underlying device.
    fn close(&mut self) {}
}

/// Sink that discards everything. Decoding upstream proceeds as usual.
#[derive(Debug, Default)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn name(&self) -> &str {
        "none"
    }

    fn play_msg(&mut self, _msg: &[u8]) {}

    fn play_sysex(&mut self, _sysex: &[u8]) {}
}

/// Open the sink named by `device`, falling back rather than failing.
///
/// * `port`: a real output port matched by `conf` (substring or index);
///   if it cannot be opened the failure is logged and selection falls
///   through to `auto`.
/// * `console`: log-only sink. Never chosen automatically.
/// * `none`: the null sink.
/// * `auto` / `default`: first usable output port, else the null sink.
pub fn open_sink(device: &str, conf: &str) -> Box<dyn MidiSink> {
    match device {
        "none" => Box::new(NullSink),
        "console" => Box::new(ConsoleSink::new()),
        "port" => match MidiPortSink::open(conf) {
            Ok(sink) => {
                info!("MIDI: opened device: {}", sink.name());
                Box::new(sink)
            }
            Err(e) => {
                warn!("MIDI: can't open device 'port' with config '{}': {}", conf, e);
                open_default(conf)
            }
        },
        "auto" | "default" => open_default(conf),
        other => {
            warn!("MIDI: can't find device '{}', using default handler", other);
            open_default(conf)
        }
    }
}

fn open_default(conf: &str) -> Box<dyn MidiSink> {
    match MidiPortSink::open(conf) {
        Ok(sink) => {
            info!("MIDI: opened device: {}", sink.name());
            Box::new(sink)
        }
        Err(e) => {
            info!("MIDI: no output port available ({}), output disabled", e);
            Box::new(NullSink)
        }
    }
}
