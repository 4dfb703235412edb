//! PCM wire codec for the live session
//!
//! The live endpoint speaks uncompressed 16-bit little-endian PCM wrapped in
//! base64 for transport. Microphone input goes up at 16 kHz mono; assistant
//! audio comes back at 24 kHz. Sample rates are fixed configuration, not
//! negotiated.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Sample rate for microphone audio sent to the endpoint.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of assistant audio received from the endpoint.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// MIME descriptor tagged onto every outbound audio chunk.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Errors produced while decoding an inbound audio payload.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// The base64 transport encoding could not be reversed.
    InvalidBase64(String),
    /// Channel count of zero makes de-interleaving meaningless.
    ZeroChannels,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::InvalidBase64(e) => write!(f, "Invalid base64 audio payload: {}", e),
            CodecError::ZeroChannels => write!(f, "Audio payload with zero channels"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode float samples in [-1, 1] into the text-safe wire form.
///
/// Each sample is scaled by 32768 and truncated to i16 (saturating at the
/// positive rail), packed little-endian, then base64-encoded.
pub fn encode_frame(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| sample_to_i16(s).to_le_bytes())
        .collect();

    STANDARD.encode(&bytes)
}

/// Decode a wire payload back into per-channel float samples.
///
/// Reverses the base64 encoding, reads bytes as little-endian i16,
/// de-interleaves by `channels`, and rescales by 1/32768. A trailing byte or
/// partial frame that does not fill every channel is truncated.
pub fn decode_frame(payload: &str, channels: u16) -> Result<Vec<Vec<f32>>, CodecError> {
    if channels == 0 {
        return Err(CodecError::ZeroChannels);
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;

    let channels = channels as usize;
    let samples_total = bytes.len() / 2;
    let frames = samples_total / channels;

    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for (ch, channel_out) in out.iter_mut().enumerate() {
            let i = (frame * channels + ch) * 2;
            let raw = i16::from_le_bytes([bytes[i], bytes[i + 1]]);
            channel_out.push(raw as f32 / 32_768.0);
        }
    }

    Ok(out)
}

/// Decode a mono wire payload into a single sample vector.
pub fn decode_mono(payload: &str) -> Result<Vec<f32>, CodecError> {
    let mut channels = decode_frame(payload, 1)?;
    Ok(channels.remove(0))
}

fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = clamped * 32_768.0;
    if scaled >= i16::MAX as f32 {
        i16::MAX
    } else {
        scaled as i16
    }
}
