//! Voice and text support widget for the DropNacional dashboard
//!
//! The core is a single-writer state machine: every input (UI actions,
//! connection events, capture failures, playback completions) becomes an
//! [`state_machine::Event`], the reducer returns the next state plus a list
//! of [`state_machine::Effect`]s, and an [`effects::EffectRunner`] executes
//! them asynchronously. Widget snapshots are published on a watch channel
//! whenever the state changes.

pub mod audio;
pub mod chat;
pub mod context;
pub mod effects;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod widget;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use effects::EffectRunner;
use state_machine::{reduce, Effect, Event, State};
use widget::{voice_status, VoiceStatus};

/// Event channel capacity for the state loop
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Handle for driving a running state loop.
///
/// Cloneable; the loop ends when every handle is dropped.
#[derive(Clone)]
pub struct StateLoopHandle {
    tx: mpsc::Sender<Event>,
    status_rx: watch::Receiver<VoiceStatus>,
}

impl StateLoopHandle {
    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }

    /// Start a voice session scoped to the given screen.
    pub async fn start(&self, screen: impl Into<String>) {
        let _ = self
            .send(Event::StartRequested {
                screen: screen.into(),
            })
            .await;
    }

    /// Stop the current session, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let _ = self.send(Event::StopRequested).await;
    }

    /// Subscribe to session status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<VoiceStatus> {
        self.status_rx.clone()
    }
}

/// Spawn the state loop on the current tokio runtime.
pub fn spawn_state_loop(effect_runner: Arc<dyn EffectRunner>) -> StateLoopHandle {
    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = watch::channel(VoiceStatus::Idle);

    let tx_for_loop = tx.clone();
    tokio::spawn(async move {
        run_state_loop(rx, tx_for_loop, effect_runner, status_tx).await;
    });

    StateLoopHandle { tx, status_rx }
}

/// Run the main state loop
async fn run_state_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    status_tx: watch::Sender<VoiceStatus>,
) {
    let mut state = State::default();
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event);
        let new_discriminant = std::mem::discriminant(&next);

        // Log state transitions
        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        // Execute effects
        for eff in effects {
            match eff {
                Effect::EmitUi => {
                    let status = voice_status(&state);
                    log::debug!("Publishing status: {:?}", status);
                    let _ = status_tx.send(status);
                }
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("State loop ended");
}
