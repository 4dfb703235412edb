//! Audio device layer for the voice widget
//!
//! Microphone capture (cpal) and scheduled playback output (rodio). Each
//! device lives on its own dedicated thread because neither stream type is
//! `Send`; handles communicate over channels and release the device when
//! dropped.

pub mod capture;
pub mod playback;

pub use capture::{start_capture, CaptureHandle, FRAME_SAMPLES};
pub use playback::{
    AudioSink, MonotonicClock, OutputClock, PlaybackScheduler, RodioSink, ScheduledSource,
};

/// Errors that can occur while opening or driving audio devices.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    /// Device rate is not an integer multiple of the wire rate
    UnsupportedRate(u32),
    StreamCreationFailed(String),
    OutputUnavailable(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::UnsupportedRate(rate) => {
                write!(f, "Unsupported input sample rate: {} Hz", rate)
            }
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::OutputUnavailable(e) => write!(f, "Audio output unavailable: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}
