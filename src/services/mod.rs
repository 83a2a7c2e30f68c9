//! Services module for Redfire DTMF

pub mod tones;

pub use tones::{generate_ringtone_pcm, load_ringtone_pcm, DtmfToneGenerator, RingtoneKey};
