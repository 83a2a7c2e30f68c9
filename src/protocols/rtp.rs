//! RTP (Real-time Transport Protocol) implementation

use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::{DtmfConfig, RtpConfig};
use crate::protocols::dtmf::{symbol_to_digit, DtmfEventSequence, DtmfSendParams};
use crate::protocols::dtmf_detector::{DetectedSymbolLatch, DtmfDetector};
use crate::protocols::dtmf_reader::{inspect_packet, PacketDisposition};
use crate::{Error, Result};

const MAX_DATAGRAM_SIZE: usize = 2048;

/// Fixed header fields of a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Read-only view of the header of the most recently read packet
pub trait PacketTiming {
    fn packet_header(&self) -> Option<&RtpHeader>;
}

/// RTP packet structure
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub version: u8,
    /// Set on decode when the packet was padded; the padding is stripped
    pub padding: bool,
    /// Set on decode when the sender used a header extension. The extension
    /// itself is skipped, and [`RtpPacket::encode`] never writes one.
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_list: Vec<u32>,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc_list: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn header(&self) -> RtpHeader {
        RtpHeader {
            marker: self.marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        }
    }

    /// Serializes the fixed header, CSRC list and payload. The X and P bits
    /// are always clear, so a decoded packet that carried an extension or
    /// padding re-encodes without them.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + (self.csrc_list.len() * 4) + self.payload.len());

        // First byte: V(2) + P(1) + X(1) + CC(4), no padding or extension
        let first_byte = (self.version << 6) | (self.csrc_list.len() as u8 & 0x0F);
        buf.put_u8(first_byte);

        // Second byte: M(1) + PT(7)
        let second_byte = (if self.marker { 1 << 7 } else { 0 }) | (self.payload_type & 0x7F);
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc_list {
            buf.put_u32(*csrc);
        }

        buf.put(self.payload.clone());

        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::rtp("RTP packet too short"));
        }

        let first_byte = data.get_u8();
        let version = (first_byte >> 6) & 0x03;
        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0F;

        if version != 2 {
            return Err(Error::rtp("Invalid RTP version"));
        }

        let second_byte = data.get_u8();
        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7F;

        let sequence_number = data.get_u16();
        let timestamp = data.get_u32();
        let ssrc = data.get_u32();

        let mut csrc_list = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if data.remaining() < 4 {
                return Err(Error::rtp("Invalid CSRC list"));
            }
            csrc_list.push(data.get_u32());
        }

        // Extension header contents are skipped
        if extension {
            if data.remaining() < 4 {
                return Err(Error::rtp("Invalid extension header"));
            }
            let _profile = data.get_u16();
            let extension_length = data.get_u16() as usize * 4;

            if data.remaining() < extension_length {
                return Err(Error::rtp("Invalid extension length"));
            }
            data.advance(extension_length);
        }

        let payload = if padding && !data.is_empty() {
            let padding_length = data[data.len() - 1] as usize;
            if padding_length == 0 || padding_length > data.len() {
                return Err(Error::rtp("Invalid padding length"));
            }
            data.slice(0..data.len() - padding_length)
        } else {
            data
        };

        Ok(Self {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc_list,
            payload,
        })
    }
}

/// Reads one RTP datagram per call from `inner` and hands out its payload,
/// remembering the header for [`PacketTiming`] consumers.
///
/// `Ok(0)` only ever means the transport is exhausted. A packet without
/// payload is reported as [`io::ErrorKind::Interrupted`] after its header is
/// recorded, so retrying callers such as `read_exact` move on to the next
/// packet.
pub struct RtpPacketReader<T> {
    inner: T,
    buffer: Vec<u8>,
    header: Option<RtpHeader>,
}

impl<T> RtpPacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            header: None,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Read for RtpPacketReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.inner.read(&mut self.buffer)?;
        if size == 0 {
            return Ok(0);
        }

        let packet = RtpPacket::decode(Bytes::copy_from_slice(&self.buffer[..size]))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if packet.payload.is_empty() {
            self.header = Some(packet.header());
            trace!("Read RTP packet without payload: PT={}, Seq={}",
                packet.payload_type, packet.sequence_number);
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "RTP packet carried no payload",
            ));
        }

        if packet.payload.len() > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "read buffer of {} bytes too small for {} byte RTP payload",
                    buf.len(),
                    packet.payload.len()
                ),
            ));
        }

        buf[..packet.payload.len()].copy_from_slice(&packet.payload);
        self.header = Some(packet.header());

        trace!("Read RTP packet: PT={}, Seq={}, TS={}",
            packet.payload_type, packet.sequence_number, packet.timestamp);

        Ok(packet.payload.len())
    }
}

impl<T> PacketTiming for RtpPacketReader<T> {
    fn packet_header(&self) -> Option<&RtpHeader> {
        self.header.as_ref()
    }
}

/// RTP stream statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RtpStreamStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_lost: u32,
    pub invalid_packets: u64,
    pub dtmf_packets: u64,
    pub malformed_dtmf_packets: u64,
    pub digits_detected: u64,
    pub last_sequence: Option<u16>,
    pub last_timestamp: u32,
}

impl RtpStreamStats {
    pub fn update_received(&mut self, packet: &RtpPacket) {
        self.packets_received += 1;
        self.bytes_received += packet.payload.len() as u64;

        // Gaps of more than half the sequence space are reordering, not loss
        if let Some(last) = self.last_sequence {
            let gap = packet.sequence_number.wrapping_sub(last.wrapping_add(1));
            if gap != 0 && gap < 0x8000 {
                self.packets_lost += u32::from(gap);
            }
        }

        self.last_sequence = Some(packet.sequence_number);
        self.last_timestamp = packet.timestamp;
    }

    pub fn update_disposition(&mut self, disposition: PacketDisposition) {
        match disposition {
            PacketDisposition::Media => {}
            PacketDisposition::Event => self.dtmf_packets += 1,
            PacketDisposition::Malformed => {
                self.dtmf_packets += 1;
                self.malformed_dtmf_packets += 1;
            }
        }
    }
}

/// A key press detected on a receive stream
#[derive(Debug, Clone, Serialize)]
pub struct DetectedDigit {
    pub stream_id: Uuid,
    pub symbol: char,
    pub timestamp: u32,
    pub ssrc: u32,
    pub source: SocketAddr,
    pub received_at: DateTime<Utc>,
}

pub(crate) fn bind_udp(addr: SocketAddr, recv_buffer_size: Option<usize>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Some(size) = recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::network(format!("Failed to bind RTP socket to {}: {}", addr, e)))?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Receives one RTP stream and reports DTMF key presses
pub struct RtpReceiver {
    id: Uuid,
    socket: UdpSocket,
    dtmf_payload_type: u8,
    detector: DtmfDetector,
    stats: RtpStreamStats,
}

impl RtpReceiver {
    pub async fn bind(config: &RtpConfig, dtmf_payload_type: u8) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
            .parse()
            .map_err(|e| Error::parse(format!("Invalid RTP bind address: {}", e)))?;
        let socket = bind_udp(addr, config.recv_buffer_size)?;
        Ok(Self::from_socket(socket, dtmf_payload_type))
    }

    pub fn from_socket(socket: UdpSocket, dtmf_payload_type: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            socket,
            dtmf_payload_type,
            detector: DtmfDetector::new(),
            stats: RtpStreamStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn latch(&self) -> DetectedSymbolLatch {
        self.detector.latch()
    }

    pub fn stats(&self) -> &RtpStreamStats {
        &self.stats
    }

    /// Runs until cancelled or until `digits` is closed, returning the
    /// final stream statistics.
    pub async fn run(
        mut self,
        digits: mpsc::UnboundedSender<DetectedDigit>,
        cancel: CancellationToken,
    ) -> RtpStreamStats {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("RTP receiver {} listening on {:?}", self.id, self.socket.local_addr().ok());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RTP receiver {} cancelled", self.id);
                    break;
                }
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((size, source)) => {
                        if let Some(digit) = self.handle_datagram(&buffer[..size], source) {
                            if digits.send(digit).is_err() {
                                debug!("DTMF consumer for receiver {} went away", self.id);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("RTP receive error on stream {}: {}", self.id, e);
                    }
                },
            }
        }

        info!("RTP receiver {} stopped: {:?}", self.id, self.stats);
        self.stats
    }

    fn handle_datagram(&mut self, data: &[u8], source: SocketAddr) -> Option<DetectedDigit> {
        let packet = match RtpPacket::decode(Bytes::copy_from_slice(data)) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to decode RTP packet from {}: {}", source, e);
                self.stats.invalid_packets += 1;
                return None;
            }
        };

        trace!("Received RTP packet: SSRC={}, PT={}, Seq={}, TS={}",
            packet.ssrc, packet.payload_type, packet.sequence_number, packet.timestamp);

        self.stats.update_received(&packet);
        let header = packet.header();
        let disposition = inspect_packet(
            &mut self.detector,
            self.dtmf_payload_type,
            &header,
            &packet.payload,
        );
        self.stats.update_disposition(disposition);

        // Drained after every packet so no detection is overwritten
        let symbol = self.detector.read_detected()?;
        self.stats.digits_detected += 1;
        info!("DTMF digit {:?} detected on stream {} from {}", symbol, self.id, source);

        Some(DetectedDigit {
            stream_id: self.id,
            symbol,
            timestamp: header.timestamp,
            ssrc: header.ssrc,
            source,
            received_at: Utc::now(),
        })
    }
}

/// RTP timestamp units for `ms` milliseconds, saturating at `u32::MAX`
fn ms_to_clock_units(ms: u32, clock_rate: u32) -> u32 {
    let units = u64::from(ms) * u64::from(clock_rate) / 1000;
    u32::try_from(units).unwrap_or(u32::MAX)
}

/// Sends key presses as RFC 2833 telephone-events
pub struct RtpSender {
    socket: UdpSocket,
    remote: SocketAddr,
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    timestamp: u32,
    params: DtmfSendParams,
    ptime: Duration,
    inter_digit_units: u32,
    inter_digit_delay: Duration,
}

impl RtpSender {
    pub async fn connect(remote: SocketAddr, dtmf: &DtmfConfig, rtp: &RtpConfig) -> Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        }
        .parse()
        .map_err(|e| Error::internal(format!("Invalid wildcard address: {}", e)))?;

        let socket = bind_udp(local, None)?;

        Ok(Self {
            socket,
            remote,
            payload_type: dtmf.payload_type,
            ssrc: rand::random::<u32>(),
            sequence_number: rand::random::<u16>(),
            timestamp: rand::random::<u32>(),
            params: DtmfSendParams::from_config(dtmf, rtp),
            ptime: Duration::from_millis(u64::from(rtp.ptime_ms)),
            inter_digit_units: ms_to_clock_units(dtmf.inter_digit_delay_ms, rtp.clock_rate),
            inter_digit_delay: Duration::from_millis(u64::from(dtmf.inter_digit_delay_ms)),
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Builds the packets for one key press and advances the sequence
    /// number and timestamp past it
    pub fn press_packets(&mut self, digit: u8) -> Vec<RtpPacket> {
        let events = DtmfEventSequence::for_press(digit, &self.params);
        let timestamp = self.timestamp;

        let packets = events
            .iter()
            .enumerate()
            .map(|(idx, event)| {
                self.sequence_number = self.sequence_number.wrapping_add(1);
                let mut packet =
                    RtpPacket::new(self.payload_type, self.sequence_number, timestamp, self.ssrc);
                packet.marker = idx == 0;
                packet.payload = event.encode();
                packet
            })
            .collect();

        self.timestamp = self
            .timestamp
            .wrapping_add(u32::from(self.params.duration))
            .wrapping_add(self.inter_digit_units);

        packets
    }

    /// Sends every symbol of `digits`, returning the number of packets sent.
    /// Nothing is sent if any symbol is not a keypad symbol.
    pub async fn send_digits(&mut self, digits: &str) -> Result<usize> {
        let codes = digits
            .chars()
            .map(|c| {
                symbol_to_digit(c).ok_or_else(|| Error::dtmf(format!("Invalid DTMF symbol {:?}", c)))
            })
            .collect::<Result<Vec<u8>>>()?;

        let mut sent = 0;
        for (idx, code) in codes.into_iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.inter_digit_delay).await;
            }

            let mut ticker = tokio::time::interval(self.ptime);
            for packet in self.press_packets(code) {
                ticker.tick().await;
                self.socket.send_to(&packet.encode(), self.remote).await?;
                sent += 1;
            }
            debug!("Sent DTMF {:?} to {}", digits.chars().nth(idx), self.remote);
        }

        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::dtmf::DtmfEvent;

    fn dtmf_config() -> DtmfConfig {
        DtmfConfig {
            inter_digit_delay_ms: 10,
            duration_ms: 40,
            ..DtmfConfig::default()
        }
    }

    #[test]
    fn test_rtp_packet_encoding() {
        let payload = Bytes::from("test payload");
        let mut packet = RtpPacket::new(0, 12345, 67890, 0x12345678);
        packet.payload = payload.clone();

        let encoded = packet.encode();
        let decoded = RtpPacket::decode(encoded).unwrap();

        assert_eq!(decoded.payload_type, 0);
        assert_eq!(decoded.sequence_number, 12345);
        assert_eq!(decoded.timestamp, 67890);
        assert_eq!(decoded.ssrc, 0x12345678);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_rtp_packet_with_marker() {
        let mut packet = RtpPacket::new(101, 1, 160, 0x11111111);
        packet.marker = true;

        let decoded = RtpPacket::decode(packet.encode()).unwrap();
        assert!(decoded.marker);
        assert_eq!(decoded.payload_type, 101);
        assert_eq!(decoded.header().timestamp, 160);
    }

    #[test]
    fn test_rtp_decode_rejects_bad_input() {
        assert!(RtpPacket::decode(Bytes::from_static(&[0x80, 0x65, 0x00])).is_err());

        let mut version_one = RtpPacket::new(0, 1, 1, 1).encode().to_vec();
        version_one[0] = 0x40;
        assert!(RtpPacket::decode(Bytes::from(version_one)).is_err());
    }

    #[test]
    fn test_rtp_decode_extension_and_padding() {
        let mut data = vec![0xB0, 0x65, 0x00, 0x01, 0x00, 0x00, 0x03, 0xE8, 0, 0, 0, 1];
        // one word of extension
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]);
        data.extend_from_slice(&[0x01, 0x8A, 0x03, 0x20]);
        // two bytes of padding
        data.extend_from_slice(&[0x00, 0x02]);

        let packet = RtpPacket::decode(Bytes::from(data)).unwrap();
        assert!(packet.extension);
        assert_eq!(packet.timestamp, 1000);
        assert_eq!(packet.payload.as_ref(), &[0x01, 0x8A, 0x03, 0x20]);

        // the extension is dropped on re-encode
        let reencoded = packet.encode();
        assert_eq!(reencoded[0] & 0x30, 0);
        assert_eq!(reencoded.len(), 12 + 4);
        let again = RtpPacket::decode(reencoded).unwrap();
        assert_eq!(again.payload, packet.payload);
    }

    #[test]
    fn test_packet_reader_records_header() {
        let mut packet = RtpPacket::new(8, 42, 3200, 7);
        packet.payload = Bytes::from_static(&[0xD5; 160]);
        let datagram = packet.encode();

        let mut reader = RtpPacketReader::new(&datagram[..]);
        assert!(reader.packet_header().is_none());

        let mut buf = [0u8; 512];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 160);
        assert_eq!(&buf[..n], &[0xD5; 160][..]);

        let header = reader.packet_header().unwrap();
        assert_eq!(header.payload_type, 8);
        assert_eq!(header.sequence_number, 42);
        assert_eq!(header.timestamp, 3200);
    }

    #[test]
    fn test_packet_reader_errors() {
        let garbage = [0u8; 4];
        let mut reader = RtpPacketReader::new(&garbage[..]);
        let err = reader.read(&mut [0u8; 64]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut packet = RtpPacket::new(0, 1, 1, 1);
        packet.payload = Bytes::from_static(&[1; 32]);
        let datagram = packet.encode();
        let mut reader = RtpPacketReader::new(&datagram[..]);
        let err = reader.read(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_packet_reader_empty_payload_is_not_eof() {
        let datagram = RtpPacket::new(101, 77, 4000, 7).encode();
        let mut reader = RtpPacketReader::new(&datagram[..]);

        let mut buf = [0u8; 64];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(reader.packet_header().map(|h| h.sequence_number), Some(77));

        // the transport itself is now exhausted
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stream_stats_loss() {
        let mut stats = RtpStreamStats::default();
        for seq in [65534u16, 65535, 2, 3] {
            stats.update_received(&RtpPacket::new(0, seq, 0, 1));
        }
        assert_eq!(stats.packets_received, 4);
        assert_eq!(stats.packets_lost, 2);

        // late packet
        stats.update_received(&RtpPacket::new(0, 1, 0, 1));
        assert_eq!(stats.packets_lost, 2);
    }

    #[tokio::test]
    async fn test_sender_press_packets() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut sender = RtpSender::connect(remote, &DtmfConfig::default(), &RtpConfig::default())
            .await
            .unwrap();

        let first = sender.press_packets(5);
        assert_eq!(first.len(), 7);
        assert!(first[0].marker);
        assert!(first[1..].iter().all(|p| !p.marker));
        assert!(first.iter().all(|p| p.timestamp == first[0].timestamp));
        assert!(first.iter().all(|p| p.payload_type == 101));
        for pair in first.windows(2) {
            assert_eq!(pair[1].sequence_number, pair[0].sequence_number.wrapping_add(1));
        }

        let last = DtmfEvent::decode(&first[6].payload).unwrap();
        assert!(last.end_of_event);
        assert_eq!(last.digit, 5);

        // 100 ms tone plus 50 ms gap at 8 kHz
        let second = sender.press_packets(5);
        assert_eq!(second[0].timestamp, first[0].timestamp.wrapping_add(1200));
    }

    #[test]
    fn test_clock_units_saturate() {
        assert_eq!(ms_to_clock_units(50, 8000), 400);
        assert_eq!(ms_to_clock_units(u32::MAX, 192_000), u32::MAX);
    }

    #[tokio::test]
    async fn test_sender_large_gap_does_not_overflow() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let dtmf = DtmfConfig {
            inter_digit_delay_ms: u32::MAX,
            ..DtmfConfig::default()
        };
        let rtp = RtpConfig {
            clock_rate: 48_000,
            ..RtpConfig::default()
        };
        let mut sender = RtpSender::connect(remote, &dtmf, &rtp).await.unwrap();

        let first = sender.press_packets(1);
        let second = sender.press_packets(1);
        let expected = first[0].timestamp.wrapping_add(4800).wrapping_add(u32::MAX);
        assert_eq!(second[0].timestamp, expected);
    }

    #[tokio::test]
    async fn test_sender_rejects_invalid_symbols() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut sender = RtpSender::connect(remote, &DtmfConfig::default(), &RtpConfig::default())
            .await
            .unwrap();

        let result = sender.send_digits("12x").await;
        assert!(matches!(result, Err(Error::Dtmf(_))));
    }

    #[test]
    fn test_receiver_handles_datagrams() {
        tokio_test::block_on(async {
            let socket = bind_udp("127.0.0.1:0".parse().unwrap(), None).unwrap();
            let mut receiver = RtpReceiver::from_socket(socket, 101);
            let source: SocketAddr = "127.0.0.1:4000".parse().unwrap();

            let mut audio = RtpPacket::new(0, 1, 160, 99);
            audio.payload = DtmfEvent::new(3, true, 10, 800).encode();
            assert!(receiver.handle_datagram(&audio.encode(), source).is_none());

            let mut short = RtpPacket::new(101, 2, 320, 99);
            short.payload = Bytes::from_static(&[3, 0x80]);
            assert!(receiver.handle_datagram(&short.encode(), source).is_none());

            let mut detected = Vec::new();
            for (seq, end) in [(3u16, false), (4, true), (5, true), (6, true)] {
                let mut packet = RtpPacket::new(101, seq, 480, 99);
                packet.payload = DtmfEvent::new(3, end, 10, 160).encode();
                if let Some(digit) = receiver.handle_datagram(&packet.encode(), source) {
                    detected.push(digit);
                }
            }

            assert!(receiver.handle_datagram(&[0xFF; 3], source).is_none());

            assert_eq!(detected.len(), 1);
            assert_eq!(detected[0].symbol, '3');
            assert_eq!(detected[0].timestamp, 480);
            assert_eq!(detected[0].ssrc, 99);

            let stats = receiver.stats();
            assert_eq!(stats.packets_received, 6);
            assert_eq!(stats.dtmf_packets, 5);
            assert_eq!(stats.malformed_dtmf_packets, 1);
            assert_eq!(stats.invalid_packets, 1);
            assert_eq!(stats.digits_detected, 1);
        });
    }

    #[tokio::test]
    async fn test_send_and_receive_digits() {
        let rtp = RtpConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..RtpConfig::default()
        };
        let dtmf = dtmf_config();

        let receiver = RtpReceiver::bind(&rtp, dtmf.payload_type).await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(receiver.run(tx, cancel.clone()));

        let mut sender = RtpSender::connect(remote, &dtmf, &rtp).await.unwrap();
        let sent = sender.send_digits("1109#").await.unwrap();
        // 40 ms at 20 ms ptime: one continuation plus three end packets
        assert_eq!(sent, 5 * 4);

        let mut detected = String::new();
        while detected.len() < 5 {
            let digit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for digit")
                .expect("receiver closed");
            assert_eq!(digit.ssrc, sender.ssrc());
            detected.push(digit.symbol);
        }
        assert_eq!(detected, "1109#");

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.digits_detected, 5);
        // trailing end packets of the last press may still be in flight
        assert!(stats.dtmf_packets >= 18);
    }
}
