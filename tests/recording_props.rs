//! Property-based tests for recording state
//!
//! These tests check the bookkeeping rules of a recording session against
//! arbitrary sequences of upload outcomes and capture phase events.
//!
//! Run with: cargo test --test recording_props

use classroom_media::recording::{CapturePhase, PhaseEvent, RecordingOptions, RecordingSession};
use classroom_media::RoomId;
use proptest::prelude::*;

fn phase_event() -> impl Strategy<Value = PhaseEvent> {
    prop_oneof![
        Just(PhaseEvent::Started),
        Just(PhaseEvent::Rotate),
        Just(PhaseEvent::Shutdown),
        Just(PhaseEvent::Stopped),
    ]
}

fn live_session() -> RecordingSession {
    let mut session = RecordingSession::new();
    session.begin(RoomId::from("prop-room"), RecordingOptions::default());
    session
}

proptest! {
    /// chunk_index counts successes exactly; failures never open a gap
    #[test]
    fn chunk_index_counts_only_successes(outcomes in prop::collection::vec(any::<bool>(), 0..200)) {
        let mut session = live_session();
        let mut accepted = 0u32;

        for ok in &outcomes {
            let before = session.chunk_index;
            if *ok {
                accepted += 1;
                session.record_upload_success(accepted);
                prop_assert_eq!(session.chunk_index, before + 1);
            } else {
                prop_assert_eq!(session.chunk_index, before);
            }
        }

        prop_assert_eq!(session.chunk_index, accepted);
        prop_assert_eq!(session.uploaded_chunks, accepted);
    }

    /// Rejected transitions leave the phase untouched
    #[test]
    fn phase_only_moves_along_allowed_edges(events in prop::collection::vec(phase_event(), 0..100)) {
        let mut session = live_session();

        for event in events {
            let before = session.phase;
            let applied = session.apply(event);
            match before.next(event) {
                Some(next) => {
                    prop_assert!(applied);
                    prop_assert_eq!(session.phase, next);
                }
                None => {
                    prop_assert!(!applied);
                    prop_assert_eq!(session.phase, before);
                }
            }
        }
    }

    /// Once shutdown has begun, nothing but a stop leaves it
    #[test]
    fn shutdown_is_terminal_until_stopped(events in prop::collection::vec(phase_event(), 0..50)) {
        let mut phase = CapturePhase::StoppingForShutdown;
        for event in events {
            match phase.next(event) {
                Some(next) if event == PhaseEvent::Stopped => {
                    prop_assert_eq!(next, CapturePhase::Idle);
                    break;
                }
                Some(next) => prop_assert!(false, "unexpected {:?} -> {:?}", phase, next),
                None => {}
            }
            phase = phase.next(event).unwrap_or(phase);
        }
    }

    /// Only the first of any number of stops claims the recording
    #[test]
    fn only_one_stop_claims(stops in 1usize..10) {
        let mut session = live_session();
        let claimed = (0..stops).filter(|_| session.begin_stop()).count();

        prop_assert_eq!(claimed, 1);
        prop_assert!(!session.should_restart_capture());
        prop_assert!(session.is_active());
    }
}

#[test]
fn idle_session_cannot_be_stopped() {
    let mut session = RecordingSession::new();
    assert!(!session.begin_stop());
    assert!(!session.is_active());
}
