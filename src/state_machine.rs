//! Voice session state machine
//!
//! This module implements the session lifecycle using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute.

use uuid::Uuid;

/// Internal state of the voice session.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Connecting {
        session_id: Uuid,
    },
    Active {
        session_id: Uuid,
        /// True while assistant audio is queued or audible
        speaking: bool,
    },
    Failed {
        message: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

/// Events that can trigger state transitions.
/// These are sent from various sources: the UI, the capture thread, the live
/// connection receiver, and the playback monitor.
#[derive(Debug, Clone)]
pub enum Event {
    /// User pressed the mic button while no session was running
    StartRequested { screen: String },
    /// User pressed the mic button while a session was running, or closed
    /// the panel
    StopRequested,

    // Live connection events
    SessionOpened {
        id: Uuid,
    },
    SessionFailed {
        id: Uuid,
        err: String,
    },
    /// The endpoint closed the connection cleanly
    SessionClosed {
        id: Uuid,
    },
    SessionErrored {
        id: Uuid,
        err: String,
    },

    // Capture events
    CaptureFailed {
        id: Uuid,
        err: String,
    },

    // Assistant audio events
    /// One decoded 24 kHz mono chunk of assistant speech
    AssistantAudio {
        id: Uuid,
        samples: Vec<f32>,
    },
    /// The endpoint reported a barge-in: queued audio is now stale
    Interrupted {
        id: Uuid,
    },
    /// Every scheduled chunk has finished playing
    PlaybackIdle {
        id: Uuid,
    },

    /// User dismissed the error banner
    DismissError,
}

/// Effects to be executed after a state transition.
/// The effect runner handles these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Connect to the live endpoint and complete setup
    OpenSession {
        id: Uuid,
        screen: String,
    },
    /// Open the microphone and start streaming frames into the session
    StartStreaming {
        id: Uuid,
    },
    /// Queue one decoded chunk after everything already queued
    SchedulePlayback {
        id: Uuid,
        samples: Vec<f32>,
    },
    /// Discard all queued and playing assistant audio
    FlushPlayback {
        id: Uuid,
    },
    /// Release the microphone, playback and connection for this session
    Teardown {
        id: Uuid,
    },
    /// Signal to emit widget state to the frontend
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Always emit EmitUi after state changes
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    // Helper: extract current session_id (if any)
    let current_id: Option<Uuid> = match state {
        Idle => None,
        Connecting { session_id } => Some(*session_id),
        Active { session_id, .. } => Some(*session_id),
        Failed { .. } => None,
    };

    // Helper: check if event's ID is stale (doesn't match current session)
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartRequested { screen }) => {
            let id = Uuid::new_v4();
            (
                Connecting { session_id: id },
                vec![OpenSession { id, screen }, EmitUi],
            )
        }
        (Idle, StopRequested) => (Idle, vec![]),

        // -----------------
        // Connecting
        // -----------------
        (Connecting { session_id }, SessionOpened { id }) if *session_id == id => (
            Active {
                session_id: id,
                speaking: false,
            },
            vec![StartStreaming { id }, EmitUi],
        ),
        (Connecting { session_id }, SessionFailed { id, err }) if *session_id == id => (
            Failed { message: err },
            vec![Teardown { id }, EmitUi],
        ),
        (Connecting { session_id }, StopRequested) => {
            // Teardown covers the half-open connection if it raced the stop
            let id = *session_id;
            (Idle, vec![Teardown { id }, EmitUi])
        }

        // -----------------
        // Active
        // -----------------
        (Active { session_id, .. }, StopRequested) => {
            let id = *session_id;
            (Idle, vec![Teardown { id }, EmitUi])
        }
        (
            Active {
                session_id,
                speaking,
            },
            AssistantAudio { id, samples },
        ) if *session_id == id => {
            let mut effects = vec![SchedulePlayback { id, samples }];
            if !speaking {
                effects.push(EmitUi);
            }
            (
                Active {
                    session_id: id,
                    speaking: true,
                },
                effects,
            )
        }
        (Active { session_id, .. }, Interrupted { id }) if *session_id == id => (
            Active {
                session_id: id,
                speaking: false,
            },
            vec![FlushPlayback { id }, EmitUi],
        ),
        (
            Active {
                session_id,
                speaking,
            },
            PlaybackIdle { id },
        ) if *session_id == id => {
            if *speaking {
                (
                    Active {
                        session_id: id,
                        speaking: false,
                    },
                    vec![EmitUi],
                )
            } else {
                (state.clone(), vec![])
            }
        }
        (Active { session_id, .. }, SessionClosed { id }) if *session_id == id => {
            (Idle, vec![Teardown { id }, EmitUi])
        }
        (Active { session_id, .. }, SessionErrored { id, err }) if *session_id == id => (
            Failed { message: err },
            vec![Teardown { id }, EmitUi],
        ),
        (Active { session_id, .. }, CaptureFailed { id, err }) if *session_id == id => (
            Failed { message: err },
            vec![Teardown { id }, EmitUi],
        ),

        // Start while a session is already connecting or active: no-op
        (Connecting { .. }, StartRequested { .. }) | (Active { .. }, StartRequested { .. }) => {
            log::warn!("Start requested while a session is already running, ignoring");
            (state.clone(), vec![])
        }

        // -----------------
        // Failed
        // -----------------
        (Failed { .. }, StartRequested { screen }) => {
            let id = Uuid::new_v4();
            (
                Connecting { session_id: id },
                vec![OpenSession { id, screen }, EmitUi],
            )
        }
        (Failed { .. }, DismissError) => (Idle, vec![EmitUi]),
        (Failed { .. }, StopRequested) => (Idle, vec![EmitUi]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        // A connect that wins a race against stop still allocated resources;
        // reap them instead of just dropping the event
        (_, SessionOpened { id }) if is_stale(id) => (state.clone(), vec![Teardown { id }]),
        (_, SessionFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SessionClosed { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, SessionErrored { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AssistantAudio { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, Interrupted { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, PlaybackIdle { id }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> Event {
        Event::StartRequested {
            screen: "dashboard".to_string(),
        }
    }

    #[test]
    fn idle_start_transitions_to_connecting() {
        let (next, effects) = reduce(&State::Idle, start());
        assert!(matches!(next, State::Connecting { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSession { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn open_session_effect_carries_the_screen() {
        let (_, effects) = reduce(
            &State::Idle,
            Event::StartRequested {
                screen: "orders".to_string(),
            },
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSession { screen, .. } if screen == "orders")));
    }

    #[test]
    fn connecting_session_opened_starts_streaming() {
        let id = Uuid::new_v4();
        let state = State::Connecting { session_id: id };
        let (next, effects) = reduce(&state, Event::SessionOpened { id });

        assert!(matches!(
            next,
            State::Active {
                speaking: false,
                ..
            }
        ));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartStreaming { .. })));
    }

    #[test]
    fn connecting_session_failed_transitions_to_failed() {
        let id = Uuid::new_v4();
        let state = State::Connecting { session_id: id };
        let (next, effects) = reduce(
            &state,
            Event::SessionFailed {
                id,
                err: "connection timeout".to_string(),
            },
        );

        assert!(matches!(next, State::Failed { .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::Teardown { .. })));
    }

    #[test]
    fn start_while_active_is_a_no_op() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: false,
        };
        let (next, effects) = reduce(&state, start());

        assert!(matches!(next, State::Active { session_id, .. } if session_id == id));
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_event_is_ignored() {
        let id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: false,
        };
        let (next, effects) = reduce(
            &state,
            Event::AssistantAudio {
                id: stale_id,
                samples: vec![0.0; 8],
            },
        );

        // Should stay in Active with nothing scheduled
        assert!(matches!(next, State::Active { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn first_audio_chunk_sets_speaking_and_emits_ui() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: false,
        };
        let (next, effects) = reduce(
            &state,
            Event::AssistantAudio {
                id,
                samples: vec![0.1; 8],
            },
        );

        assert!(matches!(next, State::Active { speaking: true, .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SchedulePlayback { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn later_audio_chunks_schedule_without_ui_churn() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: true,
        };
        let (next, effects) = reduce(
            &state,
            Event::AssistantAudio {
                id,
                samples: vec![0.1; 8],
            },
        );

        assert!(matches!(next, State::Active { speaking: true, .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SchedulePlayback { .. })));
        assert!(!effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn interruption_flushes_playback() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: true,
        };
        let (next, effects) = reduce(&state, Event::Interrupted { id });

        assert!(matches!(next, State::Active { speaking: false, .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FlushPlayback { .. })));
    }

    #[test]
    fn playback_idle_clears_speaking() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: true,
        };
        let (next, effects) = reduce(&state, Event::PlaybackIdle { id });

        assert!(matches!(next, State::Active { speaking: false, .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn stop_during_active_tears_down() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: true,
        };
        let (next, effects) = reduce(&state, Event::StopRequested);

        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Teardown { id: tid } if *tid == id)));
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let (next, effects) = reduce(&State::Idle, Event::StopRequested);
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_during_connecting_tears_down() {
        let id = Uuid::new_v4();
        let state = State::Connecting { session_id: id };
        let (next, effects) = reduce(&state, Event::StopRequested);

        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::Teardown { .. })));
    }

    #[test]
    fn late_open_after_stop_reaps_the_orphaned_session() {
        // Stop raced the connect: session id is gone once we are back in
        // Idle, but the connect still allocated devices that need releasing
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&State::Idle, Event::SessionOpened { id });

        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .all(|e| matches!(e, Effect::Teardown { id: tid } if *tid == id)));
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn failed_start_retries_with_a_new_session() {
        let state = State::Failed {
            message: "boom".to_string(),
        };
        let (next, effects) = reduce(&state, start());

        assert!(matches!(next, State::Connecting { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSession { .. })));
    }

    #[test]
    fn dismiss_error_returns_to_idle() {
        let state = State::Failed {
            message: "boom".to_string(),
        };
        let (next, effects) = reduce(&state, Event::DismissError);

        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn endpoint_close_returns_to_idle() {
        let id = Uuid::new_v4();
        let state = State::Active {
            session_id: id,
            speaking: false,
        };
        let (next, effects) = reduce(&state, Event::SessionClosed { id });

        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::Teardown { .. })));
    }
}
