//! RFC 2833/4733 telephone-event payload handling
//!
//! A telephone-event payload is four bytes:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     event     |E|R| volume    |          duration             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::{DtmfConfig, RtpConfig};

/// Size of a telephone-event payload on the wire
pub const EVENT_PAYLOAD_LEN: usize = 4;

/// Symbol reported for event codes outside the keypad table
pub const UNKNOWN_SYMBOL: char = '\0';

const END_OF_EVENT_BIT: u8 = 0x80;
const VOLUME_MASK: u8 = 0x3F;

const SYMBOLS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', 'A', 'B', 'C', 'D',
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DtmfDecodeError {
    #[error("malformed telephone-event payload: {len} bytes, need 4")]
    MalformedPayload { len: usize },
}

/// A decoded telephone-event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfEvent {
    pub digit: u8,
    pub end_of_event: bool,
    pub volume: u8,
    pub duration: u16,
}

impl DtmfEvent {
    pub fn new(digit: u8, end_of_event: bool, volume: u8, duration: u16) -> Self {
        Self {
            digit,
            end_of_event,
            volume,
            duration,
        }
    }

    /// Decodes the first four bytes of `data`. Trailing bytes are ignored and
    /// the digit code is not range checked.
    pub fn decode(mut data: &[u8]) -> Result<Self, DtmfDecodeError> {
        if data.len() < EVENT_PAYLOAD_LEN {
            return Err(DtmfDecodeError::MalformedPayload { len: data.len() });
        }

        let digit = data.get_u8();
        let flags = data.get_u8();
        let duration = data.get_u16();

        Ok(Self {
            digit,
            end_of_event: flags & END_OF_EVENT_BIT != 0,
            volume: flags & 0x7F,
            duration,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EVENT_PAYLOAD_LEN);
        buf.put_u8(self.digit);

        // The R bit is always sent as zero
        let mut flags = self.volume & VOLUME_MASK;
        if self.end_of_event {
            flags |= END_OF_EVENT_BIT;
        }
        buf.put_u8(flags);
        buf.put_u16(self.duration);

        buf.freeze()
    }

    pub fn symbol(&self) -> char {
        digit_to_symbol(self.digit)
    }
}

/// Maps an event code to its keypad symbol, or [`UNKNOWN_SYMBOL`]
pub fn digit_to_symbol(code: u8) -> char {
    SYMBOLS
        .get(code as usize)
        .copied()
        .unwrap_or(UNKNOWN_SYMBOL)
}

pub fn symbol_to_digit(symbol: char) -> Option<u8> {
    let upper = symbol.to_ascii_uppercase();
    SYMBOLS
        .iter()
        .position(|&s| s == upper)
        .map(|idx| idx as u8)
}

/// Parameters for building the packet train of a single key press, all
/// durations in RTP timestamp units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfSendParams {
    pub volume: u8,
    pub duration: u16,
    pub interval: u16,
    pub redundancy: u8,
}

impl DtmfSendParams {
    pub fn from_config(dtmf: &DtmfConfig, rtp: &RtpConfig) -> Self {
        Self {
            volume: dtmf.volume,
            duration: ms_to_units(dtmf.duration_ms, rtp.clock_rate),
            interval: ms_to_units(rtp.ptime_ms, rtp.clock_rate),
            redundancy: dtmf.redundancy,
        }
    }
}

fn ms_to_units(ms: u32, clock_rate: u32) -> u16 {
    let units = u64::from(ms) * u64::from(clock_rate) / 1000;
    u16::try_from(units).unwrap_or(u16::MAX)
}

/// Builder for the events that make up one key press
pub struct DtmfEventSequence;

impl DtmfEventSequence {
    /// Continuation packets every `interval` until `duration` is reached,
    /// followed by `redundancy` identical end packets.
    pub fn for_press(digit: u8, params: &DtmfSendParams) -> Vec<DtmfEvent> {
        let total = params.duration.max(1);
        let step = params.interval.max(1);
        let mut events = Vec::new();

        let mut elapsed: u16 = 0;
        loop {
            elapsed = elapsed.saturating_add(step);
            if elapsed >= total {
                break;
            }
            events.push(DtmfEvent::new(digit, false, params.volume, elapsed));
        }

        if events.is_empty() {
            events.push(DtmfEvent::new(digit, false, params.volume, total));
        }

        for _ in 0..params.redundancy.max(1) {
            events.push(DtmfEvent::new(digit, true, params.volume, total));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let event = DtmfEvent::decode(&[0x05, 0x8A, 0x03, 0x20]).unwrap();
        assert_eq!(event.digit, 5);
        assert!(event.end_of_event);
        assert_eq!(event.volume, 10);
        assert_eq!(event.duration, 800);
        assert_eq!(event.symbol(), '5');

        let event = DtmfEvent::decode(&[0x0B, 0x0A, 0x00, 0xA0, 0xFF]).unwrap();
        assert_eq!(event.digit, 11);
        assert!(!event.end_of_event);
        assert_eq!(event.duration, 160);
    }

    #[test]
    fn test_decode_short_payload() {
        assert_eq!(
            DtmfEvent::decode(&[0x01, 0x80, 0x00]),
            Err(DtmfDecodeError::MalformedPayload { len: 3 })
        );
        assert!(DtmfEvent::decode(&[]).is_err());
    }

    #[test]
    fn test_encode_event() {
        let event = DtmfEvent::new(10, true, 10, 1280);
        assert_eq!(event.encode().as_ref(), &[0x0A, 0x8A, 0x05, 0x00]);

        let decoded = DtmfEvent::decode(&event.encode()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_encode_clears_reserved_bit() {
        let event = DtmfEvent::new(1, false, 0x7F, 160);
        assert_eq!(event.encode()[1], 0x3F);
    }

    #[test]
    fn test_symbol_mapping() {
        let mapped: String = (0..16).map(digit_to_symbol).collect();
        assert_eq!(mapped, "0123456789*#ABCD");
        assert_eq!(digit_to_symbol(16), UNKNOWN_SYMBOL);
        assert_eq!(digit_to_symbol(255), UNKNOWN_SYMBOL);

        assert_eq!(symbol_to_digit('#'), Some(11));
        assert_eq!(symbol_to_digit('c'), Some(14));
        assert_eq!(symbol_to_digit('X'), None);
    }

    #[test]
    fn test_press_sequence() {
        let params = DtmfSendParams {
            volume: 10,
            duration: 800,
            interval: 160,
            redundancy: 3,
        };
        let events = DtmfEventSequence::for_press(1, &params);

        let durations: Vec<u16> = events.iter().map(|e| e.duration).collect();
        assert_eq!(durations, vec![160, 320, 480, 640, 800, 800, 800]);
        assert_eq!(events.iter().filter(|e| e.end_of_event).count(), 3);
        assert!(events[..4].iter().all(|e| !e.end_of_event));
    }

    #[test]
    fn test_press_shorter_than_interval() {
        let params = DtmfSendParams {
            volume: 10,
            duration: 100,
            interval: 160,
            redundancy: 0,
        };
        let events = DtmfEventSequence::for_press(7, &params);
        assert_eq!(
            events,
            vec![
                DtmfEvent::new(7, false, 10, 100),
                DtmfEvent::new(7, true, 10, 100),
            ]
        );
    }

    #[test]
    fn test_params_from_config() {
        let dtmf = DtmfConfig::default();
        let rtp = RtpConfig::default();
        let params = DtmfSendParams::from_config(&dtmf, &rtp);
        assert_eq!(params.duration, 800);
        assert_eq!(params.interval, 160);
        assert_eq!(params.redundancy, 3);

        assert_eq!(ms_to_units(60_000, 48_000), u16::MAX);
    }
}
