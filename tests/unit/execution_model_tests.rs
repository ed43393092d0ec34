//! Unit tests for the execution session lifecycle model.

use agent_bridge::models::execution::{
    ExecutionSession, ExecutionState, ExecutionStatus, OutputChunk, OutputStream,
};

fn session() -> ExecutionSession {
    ExecutionSession::new("proj".into(), "alice".into(), "echo hi".into())
}

#[test]
fn new_session_is_pending_with_unique_id() {
    let a = session();
    let b = session();
    assert_eq!(a.state, ExecutionState::Pending);
    assert!(a.ended_at.is_none());
    assert_ne!(a.id, b.id);
}

#[test]
fn happy_path_transitions_are_allowed() {
    let mut s = session();
    for next in [
        ExecutionState::Hydrating,
        ExecutionState::Running,
        ExecutionState::Reconciling,
        ExecutionState::Completed,
    ] {
        s.transition(next).expect("allowed transition");
    }
    assert!(s.state.is_terminal());
    assert!(s.ended_at.is_some());
}

#[test]
fn cancellation_after_running_goes_through_reconciling() {
    let mut s = session();
    s.transition(ExecutionState::Hydrating).expect("hydrating");
    s.transition(ExecutionState::Running).expect("running");
    assert!(!s.can_transition_to(ExecutionState::Cancelled));
    s.transition(ExecutionState::Reconciling).expect("reconciling");
    s.transition(ExecutionState::Cancelled).expect("cancelled");
}

#[test]
fn hydration_failure_is_terminal() {
    let mut s = session();
    s.transition(ExecutionState::Hydrating).expect("hydrating");
    s.transition(ExecutionState::Failed).expect("failed");
    assert!(s.state.is_terminal());
}

#[test]
fn terminal_states_cannot_be_left() {
    let mut s = session();
    s.transition(ExecutionState::Cancelled).expect("pending can cancel");
    let err = s
        .transition(ExecutionState::Running)
        .expect_err("terminal state is final");
    assert_eq!(err.code(), "RUNTIME_ERROR");
    assert_eq!(s.state, ExecutionState::Cancelled);
}

#[test]
fn skipping_states_is_rejected() {
    let s = session();
    assert!(!s.can_transition_to(ExecutionState::Running));
    assert!(!s.can_transition_to(ExecutionState::Completed));
}

#[test]
fn status_and_stream_use_wire_names() {
    assert_eq!(
        serde_json::to_string(&ExecutionStatus::Partial).expect("serialize"),
        "\"partial\""
    );
    let chunk = OutputChunk::new(OutputStream::Error, "boom".into(), 3);
    let json = serde_json::to_value(&chunk).expect("serialize");
    assert_eq!(json["stream"], "error");
    assert_eq!(json["sequence"], 3);
}

#[test]
fn stop_is_accepted_only_until_the_process_exits() {
    for state in [ExecutionState::Pending, ExecutionState::Hydrating, ExecutionState::Running] {
        assert!(state.accepts_stop(), "{state:?}");
    }
    for state in [
        ExecutionState::Reconciling,
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Cancelled,
    ] {
        assert!(!state.accepts_stop(), "{state:?}");
    }
}
