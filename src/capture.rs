//! Capture hooks for recording the outgoing message stream
//!
//! A capture hook receives a copy of every message the gateway delivers.
//! `LogCapture` prints a sniffer-style trace line per message; `FileCapture`
//! appends the raw bytes to a file, producing a stream that can later be
//! played back through the gateway.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::midi::{format_hex, MidiMessage};

/// Optional observer mirroring delivered messages.
///
/// Capture failure is never an error the decode path sees; implementations
/// log and carry on.
pub trait CaptureHook: Send {
    /// Record a channel-voice or realtime message.
    fn record_msg(&mut self, msg: &[u8]);

    /// Record a system-exclusive message, 0xF0 and 0xF7 included.
    fn record_sysex(&mut self, sysex: &[u8]);
}

/// Capture hook that traces each message.
///
/// Format: `[timestamp] OUT | HEX => PARSED`
pub struct LogCapture {
    start_time: Instant,
}

impl LogCapture {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    fn trace_line(&self, data: &[u8]) {
        let timestamp_ms = self.start_time.elapsed().as_millis() as u64;
        let parsed = MidiMessage::parse(data)
            .map(|m| format!(" => {}", m))
            .unwrap_or_default();
        info!("[{:08}ms] OUT | {}{}", timestamp_ms, format_hex(data), parsed);
    }
}

impl Default for LogCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureHook for LogCapture {
    fn record_msg(&mut self, msg: &[u8]) {
        self.trace_line(msg);
    }

    fn record_sysex(&mut self, sysex: &[u8]) {
        self.trace_line(sysex);
    }
}

/// Capture hook appending raw message bytes to a file.
pub struct FileCapture {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl FileCapture {
    /// Create (truncating) the capture file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("failed to create capture file {}", path.display()))?;
        debug!("capturing raw MIDI output to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Bytes recorded so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn append(&mut self, bytes: &[u8]) {
        // Flush per message so a crash mid-run loses at most one message
        let result = self.writer.write_all(bytes);
        let result = result.and_then(|_| self.writer.flush());
        match result {
            Ok(()) => self.bytes_written += bytes.len() as u64,
            Err(e) => warn!("capture write to {} failed: {}", self.path.display(), e),
        }
    }
}

impl CaptureHook for FileCapture {
    fn record_msg(&mut self, msg: &[u8]) {
        self.append(msg);
    }

    fn record_sysex(&mut self, sysex: &[u8]) {
        self.append(sysex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_capture_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.syx");

        let mut capture = FileCapture::create(&path).unwrap();
        capture.record_msg(&[0x90, 60, 100]);
        capture.record_sysex(&[0xF0, 0x41, 0x10, 0xF7]);
        assert_eq!(capture.bytes_written(), 7);
        drop(capture);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0x90, 60, 100, 0xF0, 0x41, 0x10, 0xF7]);
    }

    #[test]
    fn test_file_capture_bad_path_errors() {
        let result = FileCapture::create("/nonexistent-dir/capture.syx");
        assert!(result.is_err());
    }

    #[test]
    fn test_log_capture_accepts_messages() {
        let mut capture = LogCapture::new();
        capture.record_msg(&[0xF8]);
        capture.record_sysex(&[0xF0, 0xF7]);
    }
}
