//! Effect runner for the voice session
//!
//! This module handles executing effects produced by the state machine:
//! opening the live connection, streaming microphone frames into it, and
//! scheduling decoded assistant audio for playback.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::audio::{start_capture, CaptureHandle, MonotonicClock, PlaybackScheduler, RodioSink};
use crate::context;
use crate::session::{codec, LiveEvent, LiveSession, SessionError, PLAYBACK_SAMPLE_RATE};
use crate::state_machine::{Effect, Event};

/// Capacity of the capture-frame and outbound-chunk channels.
/// Frames are dropped upstream when these back up; they never block audio.
const AUDIO_CHANNEL_CAPACITY: usize = 32;

type Scheduler = PlaybackScheduler<MonotonicClock, RodioSink>;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Outbound half of a realtime connection, as the audio pump sees it.
trait RealtimeSink {
    async fn send_chunk(&mut self, encoded: String) -> Result<(), SessionError>;
}

impl RealtimeSink for LiveSession {
    async fn send_chunk(&mut self, encoded: String) -> Result<(), SessionError> {
        self.send_realtime_input(encoded).await
    }
}

/// Forward encoded chunks to the connection until the channel closes at
/// teardown.
///
/// A failed send costs that chunk only; streaming continues. If the
/// connection is actually dead the receive side surfaces it, so termination
/// is never decided here.
async fn pump_outbound<S: RealtimeSink>(mut audio_rx: mpsc::Receiver<String>, sink: &mut S) {
    while let Some(encoded) = audio_rx.recv().await {
        if let Err(e) = sink.send_chunk(encoded).await {
            log::warn!("Dropping audio chunk after failed send: {}", e);
        }
    }
}

/// Per-session resources held between OpenSession and Teardown.
///
/// The live connection itself is owned by a writer task; dropping `audio_tx`
/// makes that task close the connection.
struct ActiveSession {
    audio_tx: mpsc::Sender<String>,
    scheduler: Arc<Mutex<Scheduler>>,
    capture: Option<CaptureHandle>,
}

/// Real effect runner: live endpoint over WebSocket, CPAL microphone capture
/// and rodio playback.
pub struct LiveEffectRunner {
    api_key: String,
    voice_name: String,
    sessions: Arc<Mutex<HashMap<Uuid, ActiveSession>>>,
}

impl LiveEffectRunner {
    pub fn new(api_key: String, voice_name: String) -> Arc<Self> {
        Arc::new(Self {
            api_key,
            voice_name,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl EffectRunner for LiveEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenSession { id, screen } => {
                let api_key = self.api_key.clone();
                let voice_name = self.voice_name.clone();
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let instruction = context::system_instruction(&screen);

                    let mut live =
                        match LiveSession::connect(&api_key, &voice_name, &instruction).await {
                            Ok(live) => live,
                            Err(e) => {
                                log::error!("Failed to open live session: {}", e);
                                let _ = tx
                                    .send(Event::SessionFailed {
                                        id,
                                        err: e.to_string(),
                                    })
                                    .await;
                                return;
                            }
                        };

                    let Some(mut live_events) = live.take_events() else {
                        let _ = tx
                            .send(Event::SessionFailed {
                                id,
                                err: "Live event stream unavailable".to_string(),
                            })
                            .await;
                        return;
                    };

                    // Playback output: one clock shared by scheduler and sink.
                    // Device init blocks, so it runs off the async runtime.
                    let clock = MonotonicClock::new();
                    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();
                    let sink = match tokio::task::spawn_blocking(move || {
                        RodioSink::spawn(clock, done_tx)
                    })
                    .await
                    {
                        Ok(Ok(sink)) => sink,
                        Ok(Err(e)) => {
                            log::error!("Failed to open audio output: {}", e);
                            live.close().await;
                            let _ = tx
                                .send(Event::SessionFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                            return;
                        }
                        Err(e) => {
                            live.close().await;
                            let _ = tx
                                .send(Event::SessionFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    };
                    let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(clock, sink)));

                    // Writer task owns the connection; it closes the socket
                    // once the audio channel is dropped at teardown
                    let (audio_tx, audio_rx) = mpsc::channel::<String>(AUDIO_CHANNEL_CAPACITY);
                    tokio::spawn(async move {
                        pump_outbound(audio_rx, &mut live).await;
                        live.close().await;
                    });

                    // Receiver task: decode server messages into events
                    let events_tx = tx.clone();
                    tokio::spawn(async move {
                        while let Some(live_event) = live_events.recv().await {
                            match live_event {
                                LiveEvent::Message(msg) => {
                                    if msg.is_interrupted() {
                                        if events_tx.send(Event::Interrupted { id }).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                    for payload in msg.audio_payloads() {
                                        match codec::decode_mono(payload) {
                                            Ok(samples) => {
                                                if events_tx
                                                    .send(Event::AssistantAudio { id, samples })
                                                    .await
                                                    .is_err()
                                                {
                                                    return;
                                                }
                                            }
                                            Err(e) => {
                                                // A bad chunk costs one blip of
                                                // audio, not the session
                                                log::warn!(
                                                    "Skipping undecodable audio chunk: {}",
                                                    e
                                                );
                                            }
                                        }
                                    }
                                }
                                LiveEvent::Error(e) => {
                                    let _ = events_tx
                                        .send(Event::SessionErrored {
                                            id,
                                            err: e.to_string(),
                                        })
                                        .await;
                                    return;
                                }
                                LiveEvent::Closed => {
                                    let _ = events_tx.send(Event::SessionClosed { id }).await;
                                    return;
                                }
                            }
                        }
                    });

                    // Playback monitor: completion ids -> PlaybackIdle when
                    // the queue drains. Holds only a weak ref so teardown can
                    // drop the scheduler and stop the output thread.
                    let scheduler_weak = Arc::downgrade(&scheduler);
                    let idle_tx = tx.clone();
                    tokio::spawn(async move {
                        while let Some(source_id) = done_rx.recv().await {
                            let Some(scheduler) = scheduler_weak.upgrade() else {
                                return;
                            };
                            let drained = scheduler.lock().await.on_source_done(source_id);
                            if drained
                                && idle_tx.send(Event::PlaybackIdle { id }).await.is_err()
                            {
                                return;
                            }
                        }
                    });

                    sessions.lock().await.insert(
                        id,
                        ActiveSession {
                            audio_tx,
                            scheduler,
                            capture: None,
                        },
                    );

                    let _ = tx.send(Event::SessionOpened { id }).await;
                });
            }

            Effect::StartStreaming { id } => {
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let audio_tx = {
                        let guard = sessions.lock().await;
                        match guard.get(&id) {
                            Some(session) => session.audio_tx.clone(),
                            None => {
                                log::debug!("StartStreaming: session {} already gone", id);
                                return;
                            }
                        }
                    };

                    let (frame_tx, mut frame_rx) =
                        mpsc::channel::<Vec<f32>>(AUDIO_CHANNEL_CAPACITY);

                    // Device init touches the audio backend; keep it off the
                    // async runtime
                    let capture = match tokio::task::spawn_blocking(move || {
                        start_capture(frame_tx)
                    })
                    .await
                    {
                        Ok(Ok(handle)) => handle,
                        Ok(Err(e)) => {
                            log::error!("Failed to start microphone capture: {}", e);
                            let _ = tx
                                .send(Event::CaptureFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                            return;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::CaptureFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    };

                    {
                        let mut guard = sessions.lock().await;
                        match guard.get_mut(&id) {
                            Some(session) => session.capture = Some(capture),
                            None => {
                                // Teardown raced the device open; release it
                                log::debug!("StartStreaming: session {} torn down mid-open", id);
                                drop(guard);
                                let _ = tokio::task::spawn_blocking(move || drop(capture)).await;
                                return;
                            }
                        }
                    }

                    log::info!("Streaming microphone frames for session {}", id);

                    // Pump: mono 16 kHz frames -> base64 chunks -> writer task
                    tokio::spawn(async move {
                        while let Some(frame) = frame_rx.recv().await {
                            let encoded = codec::encode_frame(&frame);
                            if audio_tx.send(encoded).await.is_err() {
                                log::debug!("Audio pump stopping, session closed");
                                return;
                            }
                        }
                    });
                });
            }

            Effect::SchedulePlayback { id, samples } => {
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let scheduler = {
                        let guard = sessions.lock().await;
                        match guard.get(&id) {
                            Some(session) => session.scheduler.clone(),
                            None => {
                                log::debug!("SchedulePlayback: session {} already gone", id);
                                return;
                            }
                        }
                    };
                    scheduler.lock().await.enqueue(samples, PLAYBACK_SAMPLE_RATE);
                });
            }

            Effect::FlushPlayback { id } => {
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let scheduler = {
                        let guard = sessions.lock().await;
                        match guard.get(&id) {
                            Some(session) => session.scheduler.clone(),
                            None => return,
                        }
                    };
                    scheduler.lock().await.flush();
                });
            }

            Effect::Teardown { id } => {
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let removed = sessions.lock().await.remove(&id);
                    let Some(session) = removed else {
                        log::debug!("Teardown: session {} already torn down", id);
                        return;
                    };

                    // Silence output before the slower device shutdown
                    session.scheduler.lock().await.flush();

                    log::info!("Tearing down session {}", id);

                    // Dropping the session joins the capture and playback
                    // threads and closes the connection via the writer task
                    let _ = tokio::task::spawn_blocking(move || drop(session)).await;
                });
            }

            Effect::EmitUi => {
                // Handled in the main loop, not here
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

/// Stub effect runner for testing: no devices, no network.
///
/// Connection and playback are simulated with short timers so lifecycle
/// scenarios can run end to end. The id of the most recently opened session
/// is recorded so tests can inject mid-session events.
pub struct StubEffectRunner {
    last_session: std::sync::Mutex<Option<Uuid>>,
}

impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_session: std::sync::Mutex::new(None),
        })
    }

    pub fn last_session(&self) -> Option<Uuid> {
        *self.last_session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenSession { id, screen } => {
                *self.last_session.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    log::info!("Stub: session opened for screen {}", screen);
                    let _ = tx.send(Event::SessionOpened { id }).await;
                });
            }

            Effect::StartStreaming { id } => {
                log::info!("Stub: streaming started for session {}", id);
            }

            Effect::SchedulePlayback { id, samples } => {
                tokio::spawn(async move {
                    // Pretend the chunk played out at one tenth of real time
                    let secs = samples.len() as f64 / PLAYBACK_SAMPLE_RATE as f64;
                    tokio::time::sleep(std::time::Duration::from_secs_f64(secs / 10.0)).await;
                    let _ = tx.send(Event::PlaybackIdle { id }).await;
                });
            }

            Effect::FlushPlayback { id } => {
                log::info!("Stub: playback flushed for session {}", id);
            }

            Effect::Teardown { id } => {
                log::info!("Stub: session {} torn down", id);
            }

            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink {
        attempted: Vec<String>,
    }

    impl RealtimeSink for FailingSink {
        async fn send_chunk(&mut self, encoded: String) -> Result<(), SessionError> {
            self.attempted.push(encoded);
            Err(SessionError::SendFailed("socket gone".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_send_drops_the_chunk_and_keeps_streaming() {
        let (tx, rx) = mpsc::channel::<String>(8);
        for chunk in ["a", "b", "c"] {
            tx.send(chunk.to_string()).await.unwrap();
        }
        drop(tx);

        let mut sink = FailingSink { attempted: vec![] };
        pump_outbound(rx, &mut sink).await;

        // Every chunk was offered to the connection; the first failure did
        // not end the pump
        assert_eq!(sink.attempted, vec!["a", "b", "c"]);
    }

    struct FlakySink {
        attempted: Vec<String>,
        delivered: Vec<String>,
    }

    impl RealtimeSink for FlakySink {
        async fn send_chunk(&mut self, encoded: String) -> Result<(), SessionError> {
            self.attempted.push(encoded.clone());
            // Every other send fails
            if self.attempted.len() % 2 == 0 {
                return Err(SessionError::SendFailed("transient".to_string()));
            }
            self.delivered.push(encoded);
            Ok(())
        }
    }

    #[tokio::test]
    async fn chunks_after_a_failure_still_go_out() {
        let (tx, rx) = mpsc::channel::<String>(8);
        for chunk in ["a", "b", "c", "d"] {
            tx.send(chunk.to_string()).await.unwrap();
        }
        drop(tx);

        let mut sink = FlakySink {
            attempted: vec![],
            delivered: vec![],
        };
        pump_outbound(rx, &mut sink).await;

        assert_eq!(sink.attempted.len(), 4);
        assert_eq!(sink.delivered, vec!["a", "c"]);
    }
}
