//! Redfire DTMF - RFC 2833/4733 telephone-event handling
//!
//! Decodes and encodes telephone-event payloads, reconstructs key presses
//! from retransmission-heavy RTP streams, and carries the RTP plumbing
//! needed to send and receive them on softphone and PBX endpoints.
//!
//! **Sponsored by [Carrier One Inc](https://carrierone.com) - Professional Telecommunications Solutions**

pub mod config;
pub mod protocols;
pub mod services;
pub mod error;
pub mod utils;

pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
