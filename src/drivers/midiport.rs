//! Real MIDI output port sink backed by midir
//!
//! Ports are matched by case-insensitive substring or numeric index, the
//! same convention used for port patterns everywhere in the CLI.

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::{debug, warn};

use crate::drivers::{MidiSink, SinkError};

/// Sink delivering to a hardware or virtual MIDI output port.
pub struct MidiPortSink {
    port_name: String,
    conn: Option<MidiOutputConnection>,
}

impl MidiPortSink {
    /// Open the first output port matching `pattern` (substring or index).
    pub fn open(pattern: &str) -> Result<Self, SinkError> {
        let midi_out =
            MidiOutput::new("synth-gw").map_err(|e| SinkError::Backend(e.to_string()))?;

        let port = find_output_port(&midi_out, pattern)
            .ok_or_else(|| SinkError::PortNotFound(pattern.to_string()))?;

        let port_name = midi_out
            .port_name(&port)
            .unwrap_or_else(|_| pattern.to_string());

        let conn = midi_out
            .connect(&port, "synth-gw-out")
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        debug!("MIDI port opened: '{}'", port_name);
        Ok(Self {
            port_name,
            conn: Some(conn),
        })
    }

    fn send(&mut self, bytes: &[u8]) {
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.send(bytes) {
                warn!("MIDI send to '{}' failed: {}", self.port_name, e);
            }
        }
    }
}

impl MidiSink for MidiPortSink {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn play_msg(&mut self, msg: &[u8]) {
        self.send(msg);
    }

    fn play_sysex(&mut self, sysex: &[u8]) {
        self.send(sysex);
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            debug!("MIDI port closed: '{}'", self.port_name);
        }
    }
}

/// Find an output port by numeric index or case-insensitive name substring.
/// An empty pattern matches the first available port.
fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<MidiOutputPort> {
    if let Ok(index) = pattern.parse::<usize>() {
        return midi_out.ports().into_iter().nth(index);
    }

    let needle = pattern.to_lowercase();
    midi_out.ports().into_iter().find(|port| {
        midi_out
            .port_name(port)
            .map(|name| name.to_lowercase().contains(&needle))
            .unwrap_or(false)
    })
}

/// Names of all available MIDI output ports, in index order.
pub fn list_output_ports() -> Result<Vec<String>, SinkError> {
    let midi_out = MidiOutput::new("synth-gw-list").map_err(|e| SinkError::Backend(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|port| {
            midi_out
                .port_name(port)
                .unwrap_or_else(|_| "<unknown>".to_string())
        })
        .collect())
}
