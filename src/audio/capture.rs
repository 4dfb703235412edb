//! Microphone capture using CPAL
//!
//! Opens the default input device on a dedicated thread, mixes incoming
//! frames down to mono f32, converts to the 16 kHz wire rate, and hands off
//! fixed-size frames over a bounded channel. The audio callback never blocks:
//! if the channel is full the frame is dropped with a warning and lost.

use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::mpsc;

use super::AudioError;
use crate::session::CAPTURE_SAMPLE_RATE;

/// Samples per frame delivered to the session, at the 16 kHz wire rate.
pub const FRAME_SAMPLES: usize = 4096;

/// Handle to a live microphone capture.
///
/// The capture thread owns the cpal stream (it is not `Send`); dropping or
/// stopping the handle releases the device.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Release the input device. Idempotent via Drop for the handle owner.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the default microphone and start delivering mono 16 kHz frames.
///
/// Fails if there is no input device, the device config is unsupported, or
/// the device rate cannot be reduced to 16 kHz by an integer ratio.
pub fn start_capture(frame_tx: mpsc::Sender<Vec<f32>>) -> Result<CaptureHandle, AudioError> {
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (init_tx, init_rx) = std_mpsc::channel::<Result<(), AudioError>>();

    let thread = std::thread::Builder::new()
        .name("dropvoice-capture".to_string())
        .spawn(move || {
            let stream = match build_capture_stream(frame_tx) {
                Ok(stream) => {
                    let _ = init_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Capture: failed to start stream: {}", e);
                return;
            }

            // Keep the stream alive until the handle asks us to stop
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("Capture thread exiting");
        })
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop_tx,
            thread: Some(thread),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AudioError::StreamCreationFailed(
            "Capture thread exited during init".to_string(),
        )),
    }
}

fn build_capture_stream(frame_tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    let device_rate = supported_config.sample_rate().0;
    if device_rate < CAPTURE_SAMPLE_RATE || device_rate % CAPTURE_SAMPLE_RATE != 0 {
        return Err(AudioError::UnsupportedRate(device_rate));
    }

    log::info!(
        "Audio config: {} Hz, {} channels, {:?} (downsampling to {} Hz)",
        device_rate,
        supported_config.channels(),
        supported_config.sample_format(),
        CAPTURE_SAMPLE_RATE
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, frame_tx),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, frame_tx),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, frame_tx),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    frame_tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::Sample<Float = f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    // Accumulates 16 kHz mono samples until a full frame is ready
    let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = mixdown(data, channels);
                pending.extend(downsample(&mono, device_rate, CAPTURE_SAMPLE_RATE));

                while pending.len() >= FRAME_SAMPLES {
                    let frame: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
                    if let Err(e) = frame_tx.try_send(frame) {
                        // No backpressure by design: the frame is lost
                        log::warn!("Capture: dropping frame ({})", e);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Average interleaved channels down to mono float samples.
fn mixdown<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: cpal::Sample<Float = f32>,
{
    if channels <= 1 {
        return data.iter().map(|s| s.to_float_sample()).collect();
    }

    data.chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|s| s.to_float_sample()).sum();
            sum / channels as f32
        })
        .collect()
}

/// Downsample by an integer ratio using simple averaging.
///
/// Rates are validated at stream-open time; a non-integer ratio here returns
/// the input unchanged rather than producing garbage.
fn downsample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if target_rate == 0 || source_rate == 0 || source_rate % target_rate != 0 {
        log::warn!(
            "Unsupported resample ratio {}:{}, returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let ratio = (source_rate / target_rate) as usize;
    samples
        .chunks(ratio)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}
