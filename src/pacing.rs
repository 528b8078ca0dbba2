//! Sysex pacing for buffer-constrained synthesizers
//!
//! Early Roland MT-32 units drop or corrupt data when sysex messages arrive
//! faster than they can be digested. When pacing is enabled, every completed
//! sysex message opens a delay window during which further output is held
//! back. Window lengths come from an ordered rule table for known command
//! classes, with a transfer-rate formula as the fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

/// Millisecond time source.
///
/// The gateway never reads the wall clock directly; injecting the clock
/// keeps delay windows measurable in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed on a monotonic scale.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for the given number of milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// Monotonic clock backed by [`Instant`].
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Shared cancellation flag for interrupting a pacing wait from another
/// thread. Clone freely; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// A named pacing override: first matching rule wins.
pub struct DelayRule {
    pub name: &'static str,
    pub matches: fn(&[u8]) -> bool,
    pub delay_ms: u64,
}

/// Overrides for command classes whose settling time the transfer-rate
/// formula misjudges, measured against real hardware. Order matters.
pub static DELAY_RULES: [DelayRule; 3] = [
    DelayRule {
        name: "all parameters reset",
        matches: |buf| buf.get(5) == Some(&0x7F),
        delay_ms: 290,
    },
    DelayRule {
        // Display-area writes as issued by Viking Child
        name: "display address 10 00 04",
        matches: |buf| matches!(buf.get(5..8), Some(&[0x10, 0x00, 0x04])),
        delay_ms: 145,
    },
    DelayRule {
        // System-area writes as issued by Dark Sun
        name: "system address 10 00 01",
        matches: |buf| matches!(buf.get(5..8), Some(&[0x10, 0x00, 0x01])),
        delay_ms: 30,
    },
];

/// Serial MIDI transfer rate in bytes per millisecond (31250 baud, 10 bits
/// per byte on the wire).
const MIDI_BYTES_PER_MS: f64 = 3.125;

/// Minimum fallback delay. Some programs issue long runs of tiny sysex
/// messages that individually would round down to nothing.
const MIN_FALLBACK_DELAY_MS: u64 = 40;

/// Upper bound on a single pacing sleep slice. The wait re-checks the
/// cancellation token between slices, so this bounds abort latency.
const MAX_SLEEP_SLICE_MS: u64 = 20;

/// Compute the pacing delay for a completed sysex message.
///
/// Rules are tried in order; the transfer-rate formula (with its floor)
/// applies when none match. The floor does not apply to rule hits.
pub fn sysex_delay_ms(buf: &[u8]) -> u64 {
    for rule in &DELAY_RULES {
        if (rule.matches)(buf) {
            trace!(rule = rule.name, delay_ms = rule.delay_ms, "sysex delay rule hit");
            return rule.delay_ms;
        }
    }
    let computed = ((buf.len() as f64 * 1.25) / MIDI_BYTES_PER_MS) as u64 + 2;
    computed.max(MIN_FALLBACK_DELAY_MS)
}

/// Pacing gate: tracks the delay window opened by the last sysex message
/// and blocks the caller until it has elapsed.
pub struct SysexPacer {
    clock: Arc<dyn Clock>,
    delay_ms: u64,
    /// Timestamp the current window began; `None` means pacing is disabled
    /// for this gateway's lifetime.
    window_start: Option<u64>,
}

impl SysexPacer {
    /// Create a pacer. Enabling pacing is a construction-time decision;
    /// a disabled pacer never blocks and never arms.
    pub fn new(clock: Arc<dyn Clock>, enabled: bool) -> Self {
        let window_start = enabled.then(|| clock.now_ms());
        Self {
            clock,
            delay_ms: 0,
            window_start,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window_start.is_some()
    }

    /// Delay assigned to the current window, in milliseconds.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Block until the current delay window has elapsed.
    ///
    /// Sleeps in bounded slices, re-checking `cancel` between slices so an
    /// external abort is observed within [`MAX_SLEEP_SLICE_MS`] rather than
    /// after a full window (which can run to 290 ms).
    pub fn block_until_ready(&self, cancel: &CancelToken) {
        let Some(start) = self.window_start else {
            return;
        };
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let elapsed = self.clock.now_ms().saturating_sub(start);
            if elapsed >= self.delay_ms {
                return;
            }
            let remaining = self.delay_ms - elapsed;
            self.clock.sleep_ms(remaining.min(MAX_SLEEP_SLICE_MS));
        }
    }

    /// Open the next delay window for a just-sent sysex message. No-op when
    /// pacing is disabled.
    pub fn arm(&mut self, buf: &[u8]) {
        if self.window_start.is_none() {
            return;
        }
        self.delay_ms = sysex_delay_ms(buf);
        self.window_start = Some(self.clock.now_ms());
        trace!(delay_ms = self.delay_ms, len = buf.len(), "sysex delay window armed");
    }
}
