//! Synth GW - MIDI output gateway for emulated DOS-era programs
//!
//! Decodes a raw outgoing MIDI byte stream into discrete, well-formed
//! messages and delivers them to a pluggable sink, pacing system-exclusive
//! traffic for synthesizers that need settling time between messages.

pub mod capture;
pub mod config;
pub mod drivers;
pub mod gateway;
pub mod midi;
pub mod pacing;

pub use capture::CaptureHook;
pub use drivers::MidiSink;
pub use gateway::{MidiGateway, SYSEX_CAPACITY};
pub use pacing::CancelToken;
