//! Gapless playback scheduling for assistant audio
//!
//! Decoded response chunks arrive in bursts faster than real time. The
//! scheduler lines them up back-to-back against a monotonic output clock:
//! each buffer starts exactly where the previous one ends, and the cursor is
//! clamped forward before every schedule so a stalled pipeline produces a
//! silent gap instead of overlapping audio.
//!
//! The scheduling arithmetic is kept behind the [`OutputClock`] and
//! [`AudioSink`] traits so it can be tested without audio hardware; the
//! production sink is a dedicated thread owning the rodio output stream.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::AudioError;

/// Monotonic clock the scheduler positions buffers against, in seconds.
pub trait OutputClock: Send {
    fn now(&self) -> f64;
}

/// Wall-start-anchored monotonic clock shared by the scheduler and the
/// output thread.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A decoded buffer with its assigned start time.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Absolute start time on the output clock, seconds
    pub start_at: f64,
}

impl ScheduledSource {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Output backend the scheduler hands positioned buffers to.
pub trait AudioSink: Send {
    /// Begin (or queue) playback of one buffer at its assigned start time.
    fn play(&mut self, source: ScheduledSource);
    /// Immediately stop every queued and playing buffer.
    fn stop_all(&mut self);
}

/// Queues decoded audio buffers for gapless sequential playback.
///
/// Tracks the set of in-flight sources; when a completion drains the set the
/// session is no longer "speaking". `flush()` models barge-in: everything
/// stops at once and the cursor re-anchors to the clock on the next enqueue.
pub struct PlaybackScheduler<C: OutputClock, S: AudioSink> {
    clock: C,
    sink: S,
    next_start_time: f64,
    in_flight: BTreeSet<u64>,
    next_source_id: u64,
}

impl<C: OutputClock, S: AudioSink> PlaybackScheduler<C, S> {
    pub fn new(clock: C, sink: S) -> Self {
        Self {
            clock,
            sink,
            next_start_time: 0.0,
            in_flight: BTreeSet::new(),
            next_source_id: 0,
        }
    }

    /// Schedule a decoded buffer directly after the last one.
    ///
    /// Returns the id the sink will report on completion.
    pub fn enqueue(&mut self, samples: Vec<f32>, sample_rate: u32) -> u64 {
        // Never schedule into the past; a stall becomes a silent gap
        self.next_start_time = self.next_start_time.max(self.clock.now());

        let id = self.next_source_id;
        self.next_source_id += 1;

        let source = ScheduledSource {
            id,
            samples,
            sample_rate,
            start_at: self.next_start_time,
        };
        let duration = source.duration_secs();

        self.in_flight.insert(id);
        self.sink.play(source);
        self.next_start_time += duration;

        log::debug!(
            "Playback: scheduled source {} ({:.3}s), cursor now {:.3}",
            id,
            duration,
            self.next_start_time
        );
        id
    }

    /// Barge-in: stop everything now and reset the cursor.
    pub fn flush(&mut self) {
        if !self.in_flight.is_empty() {
            log::info!("Playback: flushing {} in-flight sources", self.in_flight.len());
        }
        self.sink.stop_all();
        self.in_flight.clear();
        self.next_start_time = 0.0;
    }

    /// Record the natural completion of a source.
    ///
    /// Returns `true` when this completion drained the in-flight set (the
    /// assistant has stopped speaking). Completions for sources already
    /// flushed are ignored.
    pub fn on_source_done(&mut self, id: u64) -> bool {
        if !self.in_flight.remove(&id) {
            return false;
        }
        self.in_flight.is_empty()
    }

    /// True when nothing is queued or audibly playing.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

// ============================================================================
// Rodio-backed sink
// ============================================================================

enum SinkCmd {
    Play(ScheduledSource),
    StopAll,
    Shutdown,
}

/// Production [`AudioSink`] backed by rodio on a dedicated thread.
///
/// The rodio output stream is not `Send`, so the thread owns it outright;
/// commands go in over a channel and completions come back as source ids on
/// the provided tokio channel.
pub struct RodioSink {
    cmd_tx: std::sync::mpsc::Sender<SinkCmd>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RodioSink {
    /// Spawn the output thread.
    ///
    /// `clock` must be the same clock the scheduler positions buffers with;
    /// `done_tx` receives the id of each source that finishes naturally.
    pub fn spawn(
        clock: MonotonicClock,
        done_tx: mpsc::UnboundedSender<u64>,
    ) -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<SinkCmd>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let thread = std::thread::Builder::new()
            .name("dropvoice-playback".to_string())
            .spawn(move || {
                // The OutputStream must stay alive on this thread for audio
                // to keep flowing
                let (_stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = init_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let mut active: Vec<(u64, rodio::Sink)> = Vec::new();

                loop {
                    match cmd_rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(SinkCmd::Play(source)) => {
                            let sink = match rodio::Sink::try_new(&handle) {
                                Ok(s) => s,
                                Err(e) => {
                                    log::warn!("Playback: failed to open sink: {}", e);
                                    let _ = done_tx.send(source.id);
                                    continue;
                                }
                            };

                            use rodio::Source;
                            let delay = (source.start_at - clock.now()).max(0.0);
                            let buffer = rodio::buffer::SamplesBuffer::new(
                                1,
                                source.sample_rate,
                                source.samples,
                            )
                            .delay(Duration::from_secs_f64(delay));

                            sink.append(buffer);
                            active.push((source.id, sink));
                        }
                        Ok(SinkCmd::StopAll) => {
                            for (_, sink) in active.drain(..) {
                                sink.stop();
                            }
                        }
                        Ok(SinkCmd::Shutdown) => break,
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }

                    // Sweep finished sources and report them
                    let mut i = 0;
                    while i < active.len() {
                        if active[i].1.empty() {
                            let (id, _) = active.remove(i);
                            if done_tx.send(id).is_err() {
                                return;
                            }
                        } else {
                            i += 1;
                        }
                    }
                }
            })
            .map_err(|e| AudioError::OutputUnavailable(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(AudioError::OutputUnavailable(e)),
            Err(_) => Err(AudioError::OutputUnavailable(
                "Playback thread exited during init".to_string(),
            )),
        }
    }
}

impl AudioSink for RodioSink {
    fn play(&mut self, source: ScheduledSource) {
        if self.cmd_tx.send(SinkCmd::Play(source)).is_err() {
            log::warn!("Playback: output thread is gone, dropping buffer");
        }
    }

    fn stop_all(&mut self) {
        let _ = self.cmd_tx.send(SinkCmd::StopAll);
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SinkCmd::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<f64>>);

    impl TestClock {
        fn new(t: f64) -> Self {
            Self(Arc::new(Mutex::new(t)))
        }

        fn set(&self, t: f64) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl OutputClock for TestClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        played: Arc<Mutex<Vec<ScheduledSource>>>,
        stops: Arc<Mutex<u32>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, source: ScheduledSource) {
            self.played.lock().unwrap().push(source);
        }

        fn stop_all(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn samples_for_secs(secs: f64, rate: u32) -> Vec<f32> {
        vec![0.0; (secs * rate as f64) as usize]
    }

    #[test]
    fn enqueue_anchors_first_buffer_to_clock() {
        let clock = TestClock::new(5.0);
        let sink = RecordingSink::default();
        let played = sink.played.clone();
        let mut sched = PlaybackScheduler::new(clock, sink);

        sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);

        let played = played.lock().unwrap();
        assert_eq!(played[0].start_at, 5.0);
    }

    #[test]
    fn sequential_buffers_are_gapless() {
        let clock = TestClock::new(10.0);
        let sink = RecordingSink::default();
        let played = sink.played.clone();
        let mut sched = PlaybackScheduler::new(clock, sink);

        // Durations 1s, 0.5s, 0.25s arriving while idle
        sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);
        sched.enqueue(samples_for_secs(0.5, 24_000), 24_000);
        sched.enqueue(samples_for_secs(0.25, 24_000), 24_000);

        let played = played.lock().unwrap();
        assert_eq!(played[0].start_at, 10.0);
        assert_eq!(played[1].start_at, 11.0);
        assert_eq!(played[2].start_at, 11.5);
    }

    #[test]
    fn stalled_cursor_is_clamped_forward_not_overlapped() {
        let clock = TestClock::new(0.0);
        let sink = RecordingSink::default();
        let played = sink.played.clone();
        let mut sched = PlaybackScheduler::new(clock.clone(), sink);

        sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);

        // Pipeline stalls: the next chunk arrives well after the first ended
        clock.set(4.0);
        sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);

        let played = played.lock().unwrap();
        assert_eq!(played[1].start_at, 4.0); // gap, not overlap
    }

    #[test]
    fn flush_stops_sources_clears_state_and_resets_cursor() {
        let clock = TestClock::new(2.0);
        let sink = RecordingSink::default();
        let stops = sink.stops.clone();
        let played = sink.played.clone();
        let mut sched = PlaybackScheduler::new(clock.clone(), sink);

        let id = sched.enqueue(samples_for_secs(5.0, 24_000), 24_000);
        assert!(!sched.is_idle());

        sched.flush();

        assert!(sched.is_idle());
        assert_eq!(*stops.lock().unwrap(), 1);
        // Stale completion after the flush is ignored
        assert!(!sched.on_source_done(id));

        // Next buffer re-anchors to the current clock time
        clock.set(3.0);
        sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);
        assert_eq!(played.lock().unwrap()[1].start_at, 3.0);
    }

    #[test]
    fn completion_drains_the_in_flight_set() {
        let clock = TestClock::new(0.0);
        let mut sched = PlaybackScheduler::new(clock, RecordingSink::default());

        let a = sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);
        let b = sched.enqueue(samples_for_secs(1.0, 24_000), 24_000);

        assert!(!sched.on_source_done(a)); // b still playing
        assert!(sched.on_source_done(b)); // drained: no longer speaking
        assert!(sched.is_idle());

        // Duplicate completion is not a second "drained" signal
        assert!(!sched.on_source_done(b));
    }
}
