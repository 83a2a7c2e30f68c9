//! Tone synthesis and the shared ringtone cache

use std::f64::consts::PI;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use tracing::debug;

const RINGTONE_SECONDS: u32 = 2;
const RINGTONE_VOLUME: f64 = 0.3;
const RINGTONE_FREQS: (f64, f64) = (350.0, 440.0);

/// Cache key for generated ringtone PCM
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RingtoneKey {
    pub codec: String,
    pub sample_rate: u32,
}

static RINGTONES: Lazy<DashMap<RingtoneKey, Arc<OnceCell<Bytes>>>> = Lazy::new(DashMap::new);

/// Returns the ringtone PCM for a codec/rate pair, generating it on first
/// use. Concurrent first callers wait for a single generation.
pub fn load_ringtone_pcm(codec: &str, sample_rate: u32) -> Bytes {
    let key = RingtoneKey {
        codec: codec.to_string(),
        sample_rate,
    };

    // The map shard lock is released before generating
    let cell = RINGTONES.entry(key).or_default().value().clone();

    cell.get_or_init(|| {
        debug!("Generating ringtone for {} at {} Hz", codec, sample_rate);
        generate_ringtone_pcm(sample_rate)
    })
    .clone()
}

pub fn cached_ringtones() -> usize {
    RINGTONES.iter().filter(|entry| entry.value().get().is_some()).count()
}

/// Two seconds of the 350 Hz + 440 Hz ring-back tone as signed 16-bit
/// little-endian PCM
pub fn generate_ringtone_pcm(sample_rate: u32) -> Bytes {
    let num_samples = usize::try_from(u64::from(sample_rate) * u64::from(RINGTONE_SECONDS))
        .unwrap_or(usize::MAX);
    let mut buf = BytesMut::with_capacity(num_samples * 2);

    for i in 0..num_samples {
        let t = i as f64 / sample_rate as f64;
        let sample = RINGTONE_VOLUME
            * ((2.0 * PI * RINGTONE_FREQS.0 * t).sin() + (2.0 * PI * RINGTONE_FREQS.1 * t).sin())
            / 2.0;
        buf.put_i16_le((sample * i16::MAX as f64) as i16);
    }

    buf.freeze()
}

/// In-band dual tone generator for keypad symbols
pub struct DtmfToneGenerator {
    pub sample_rate: u32,
}

impl DtmfToneGenerator {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn frequencies(symbol: char) -> Option<(f64, f64)> {
        let pair = match symbol.to_ascii_uppercase() {
            '1' => (697.0, 1209.0),
            '2' => (697.0, 1336.0),
            '3' => (697.0, 1477.0),
            'A' => (697.0, 1633.0),
            '4' => (770.0, 1209.0),
            '5' => (770.0, 1336.0),
            '6' => (770.0, 1477.0),
            'B' => (770.0, 1633.0),
            '7' => (852.0, 1209.0),
            '8' => (852.0, 1336.0),
            '9' => (852.0, 1477.0),
            'C' => (852.0, 1633.0),
            '*' => (941.0, 1209.0),
            '0' => (941.0, 1336.0),
            '#' => (941.0, 1477.0),
            'D' => (941.0, 1633.0),
            _ => return None,
        };
        Some(pair)
    }

    /// Samples for `duration_ms` of the symbol's tone pair; empty for
    /// symbols outside the keypad
    pub fn generate(&self, symbol: char, duration_ms: u32) -> Vec<i16> {
        let Some((low_freq, high_freq)) = Self::frequencies(symbol) else {
            return Vec::new();
        };

        let sample_count = (self.sample_rate as f64 * duration_ms as f64 / 1000.0) as usize;
        let mut samples = Vec::with_capacity(sample_count);

        for i in 0..sample_count {
            let t = i as f64 / self.sample_rate as f64;
            let sample = (2.0 * PI * low_freq * t).sin() + (2.0 * PI * high_freq * t).sin();
            samples.push((sample * 16383.0) as i16);
        }

        samples
    }
}
