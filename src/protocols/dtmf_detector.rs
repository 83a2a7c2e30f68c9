//! Telephone-event key press detection
//!
//! A single key press is carried by many RTP packets sharing one RTP
//! timestamp: continuation packets while the key is held, then (usually
//! three) end-of-event packets. [`DtmfDetector`] collapses that train into a
//! single detected symbol, reported on the first end-of-event packet.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::dtmf::{digit_to_symbol, DtmfEvent};

/// One-slot, read-and-clear register holding the last detected symbol.
///
/// Cloning yields another handle to the same slot, so a collector task can
/// poll while the receive loop writes. An unread symbol is overwritten by
/// the next detection.
#[derive(Debug, Clone, Default)]
pub struct DetectedSymbolLatch {
    slot: Arc<Mutex<Option<char>>>,
}

impl DetectedSymbolLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, symbol: char) {
        if let Some(unread) = self.slot.lock().replace(symbol) {
            debug!("Overwriting unread DTMF symbol {:?} with {:?}", unread, symbol);
        }
    }

    /// Returns the pending symbol, if any, and clears the slot
    pub fn read(&self) -> Option<char> {
        self.slot.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Press {
    digit: u8,
    timestamp: u32,
}

/// Per-stream key press state machine
#[derive(Debug, Default)]
pub struct DtmfDetector {
    current: Option<Press>,
    terminal_reported: bool,
    latch: DetectedSymbolLatch,
    detected: u64,
}

impl DtmfDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one decoded event together with the RTP timestamp of the packet
    /// that carried it. Must be called in packet arrival order.
    pub fn process_event(&mut self, event: &DtmfEvent, timestamp: u32) {
        trace!(
            "Processing DTMF event: digit={}, end={}, duration={}, ts={}",
            event.digit, event.end_of_event, event.duration, timestamp
        );

        let press = Press {
            digit: event.digit,
            timestamp,
        };

        if self.current != Some(press) {
            self.current = Some(press);
            self.terminal_reported = false;

            if event.end_of_event {
                self.report(event);
                debug!("New DTMF event with immediate end: {:?}", event.symbol());
            }
            return;
        }

        match (event.end_of_event, self.terminal_reported) {
            (true, false) => {
                self.report(event);
                debug!(
                    "DTMF end event processed: {:?}, duration={}",
                    event.symbol(),
                    event.duration
                );
            }
            (true, true) => {
                trace!("Ignoring duplicate DTMF end event for digit {}", event.digit);
            }
            (false, _) => {}
        }
    }

    fn report(&mut self, event: &DtmfEvent) {
        self.latch.set(digit_to_symbol(event.digit));
        self.terminal_reported = true;
        self.detected += 1;
    }

    /// Returns the last detected symbol and clears it
    pub fn read_detected(&self) -> Option<char> {
        self.latch.read()
    }

    /// Handle for polling detections from another task or thread
    pub fn latch(&self) -> DetectedSymbolLatch {
        self.latch.clone()
    }

    /// Number of key presses detected since creation
    pub fn detected_count(&self) -> u64 {
        self.detected
    }
}
