//! Protocol implementations for Redfire DTMF

pub mod rtp;
pub mod dtmf;
pub mod dtmf_detector;
pub mod dtmf_reader;

pub use rtp::{DetectedDigit, PacketTiming, RtpHeader, RtpPacket, RtpPacketReader, RtpReceiver, RtpSender, RtpStreamStats};
pub use dtmf::{digit_to_symbol, symbol_to_digit, DtmfDecodeError, DtmfEvent, DtmfEventSequence, DtmfSendParams};
pub use dtmf_detector::{DetectedSymbolLatch, DtmfDetector};
pub use dtmf_reader::{DtmfReader, PacketDisposition};
