//! Passthrough reader that watches for telephone-events

use std::io::{self, Read};

use tracing::warn;

use super::dtmf::DtmfEvent;
use super::dtmf_detector::{DetectedSymbolLatch, DtmfDetector};
use super::rtp::{PacketTiming, RtpHeader};

/// What a received packet turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    Media,
    Event,
    Malformed,
}

/// Feeds `payload` to the detector when the packet carries the negotiated
/// telephone-event payload type. Malformed payloads are logged and dropped.
pub(crate) fn inspect_packet(
    detector: &mut DtmfDetector,
    dtmf_payload_type: u8,
    header: &RtpHeader,
    payload: &[u8],
) -> PacketDisposition {
    if header.payload_type != dtmf_payload_type {
        return PacketDisposition::Media;
    }

    match DtmfEvent::decode(payload) {
        Ok(event) => {
            detector.process_event(&event, header.timestamp);
            PacketDisposition::Event
        }
        Err(e) => {
            warn!(
                "Failed to decode DTMF event: {} (seq={}, payload={})",
                e,
                header.sequence_number,
                hex::encode(payload)
            );
            PacketDisposition::Malformed
        }
    }
}

/// Wraps a media reader, handing every byte through unchanged while
/// detecting key presses in packets of the DTMF payload type
pub struct DtmfReader<R> {
    inner: R,
    payload_type: u8,
    detector: DtmfDetector,
}

impl<R> DtmfReader<R> {
    pub fn new(payload_type: u8, inner: R) -> Self {
        Self {
            inner,
            payload_type,
            detector: DtmfDetector::new(),
        }
    }

    /// Kept so older call sites still build; presses of any length are
    /// reported.
    #[deprecated(note = "DTMF presses are no longer filtered by duration")]
    pub fn with_min_duration(self, _min_duration: u16) -> Self {
        self
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Returns the last detected symbol and clears it
    pub fn read_dtmf(&self) -> Option<char> {
        self.detector.read_detected()
    }

    pub fn latch(&self) -> DetectedSymbolLatch {
        self.detector.latch()
    }

    pub fn detector(&self) -> &DtmfDetector {
        &self.detector
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + PacketTiming> Read for DtmfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let previous = self.inner.packet_header().copied();

            match self.inner.read(buf) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    if let Some(header) = self.inner.packet_header().copied() {
                        inspect_packet(&mut self.detector, self.payload_type, &header, &buf[..n]);
                    }
                    return Ok(n);
                }
                // An empty packet was consumed; inspect it and go on to the next
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    match self.inner.packet_header().copied() {
                        Some(header) if Some(header) != previous => {
                            inspect_packet(&mut self.detector, self.payload_type, &header, &[]);
                        }
                        _ => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: PacketTiming> PacketTiming for DtmfReader<R> {
    fn packet_header(&self) -> Option<&RtpHeader> {
        self.inner.packet_header()
    }
}
