//! The navigation procedure's finite state machine.
//!
//! The table below is the whole of the machine: given the current state and
//! an incoming event, it names the next state and, where one applies, the
//! outbound message to send. It is data, not a macro-generated graph, so
//! adding a transition means adding a match arm here and nowhere else.
use crate::message::{CancelTaskResponse, GetRealTimeStatusRequest, Message, NavStatus,
    NavigationTaskRequest, NavigationTaskResponse, QueryStatusResponse};
use crate::message::{ErrorCode, NavigationPoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavState {
    Init,
    PrepareEnterNav,
    Nav,
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NavEvent {
    Start,
    NavigationTaskResponse(NavigationTaskResponse),
    CancelTaskResponse(CancelTaskResponse),
    QueryStatusResponse(QueryStatusResponse),
}

/// Sink the machine sends outbound requests through. Implemented by the
/// transport's queued writer; kept as a trait here so the machine does not
/// depend on the transport crate.
pub trait NavTransport: Send + Sync {
    fn send(&self, message: Message);
}

pub struct NavigationMachine {
    state: NavState,
}

impl NavigationMachine {
    pub fn new() -> Self {
        Self { state: NavState::Init }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Applies one event to the machine, performing at most one side effect
    /// (an outbound send) along the way. Returns the state the machine is in
    /// after the transition, and whether this call is what moved it into
    /// `Done` (the caller is responsible for the effects that follow from
    /// entering that state: clearing the queue, queuing a procedure reset,
    /// and invoking the terminate callback).
    pub fn apply(
        &mut self,
        event: NavEvent,
        points: &[NavigationPoint],
        transport: &dyn NavTransport,
    ) -> (NavState, bool) {
        let from = self.state;
        let (next, send) = match (from, &event) {
            (NavState::Init, NavEvent::Start) => (
                NavState::PrepareEnterNav,
                Some(Message::NavigationTaskRequest(NavigationTaskRequest::new(
                    points.to_vec(),
                ))),
            ),
            (NavState::PrepareEnterNav, NavEvent::NavigationTaskResponse(_)) => {
                (NavState::Done, None)
            }
            (NavState::PrepareEnterNav, NavEvent::CancelTaskResponse(resp))
                if resp.error_code == ErrorCode::Success =>
            {
                (NavState::Done, None)
            }
            (NavState::PrepareEnterNav, NavEvent::QueryStatusResponse(resp))
                if resp.status == NavStatus::Completed =>
            {
                (NavState::Done, None)
            }
            (NavState::PrepareEnterNav, NavEvent::QueryStatusResponse(resp))
                if resp.status == NavStatus::Executing =>
            {
                (NavState::Nav, None)
            }
            (NavState::Nav, NavEvent::CancelTaskResponse(resp))
                if resp.error_code == ErrorCode::Success =>
            {
                (NavState::Done, None)
            }
            (NavState::Nav, NavEvent::NavigationTaskResponse(_)) => (NavState::Done, None),
            (NavState::Nav, NavEvent::QueryStatusResponse(resp))
                if resp.status == NavStatus::Executing =>
            {
                (
                    NavState::Nav,
                    Some(Message::GetRealTimeStatusRequest(GetRealTimeStatusRequest::new())),
                )
            }
            (NavState::Nav, NavEvent::QueryStatusResponse(resp))
                if resp.status == NavStatus::Completed =>
            {
                (NavState::Done, None)
            }
            (state, event) => {
                tracing::warn!(?state, ?event, "no transition defined for this event");
                (state, None)
            }
        };
        if let Some(message) = send {
            transport.send(message);
        }
        self.state = next;
        (next, from != NavState::Done && next == NavState::Done)
    }
}

impl Default for NavigationMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
    }

    impl NavTransport for RecordingTransport {
        fn send(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }
    }

    fn success_cancel() -> NavEvent {
        NavEvent::CancelTaskResponse(CancelTaskResponse {
            error_code: ErrorCode::Success,
            timestamp: "t".into(),
        })
    }

    #[test]
    fn start_sends_navigation_request_and_enters_prepare() {
        let transport = Arc::new(RecordingTransport::default());
        let mut machine = NavigationMachine::new();
        let (state, entered_done) = machine.apply(NavEvent::Start, &[], transport.as_ref());
        assert_eq!(state, NavState::PrepareEnterNav);
        assert!(!entered_done);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn executing_status_in_prepare_moves_to_nav() {
        let transport = Arc::new(RecordingTransport::default());
        let mut machine = NavigationMachine::new();
        machine.apply(NavEvent::Start, &[], transport.as_ref());
        let (state, entered_done) = machine.apply(
            NavEvent::QueryStatusResponse(QueryStatusResponse {
                status: NavStatus::Executing,
                value: 0,
                error_code: ErrorCode::Success,
                timestamp: "t".into(),
            }),
            &[],
            transport.as_ref(),
        );
        assert_eq!(state, NavState::Nav);
        assert!(!entered_done);
    }

    #[test]
    fn executing_status_in_nav_self_loops_and_polls() {
        let transport = Arc::new(RecordingTransport::default());
        let mut machine = NavigationMachine::new();
        machine.apply(NavEvent::Start, &[], transport.as_ref());
        machine.apply(
            NavEvent::QueryStatusResponse(QueryStatusResponse {
                status: NavStatus::Executing,
                value: 0,
                error_code: ErrorCode::Success,
                timestamp: "t".into(),
            }),
            &[],
            transport.as_ref(),
        );
        let (state, entered_done) = machine.apply(
            NavEvent::QueryStatusResponse(QueryStatusResponse {
                status: NavStatus::Executing,
                value: 1,
                error_code: ErrorCode::Success,
                timestamp: "t".into(),
            }),
            &[],
            transport.as_ref(),
        );
        assert_eq!(state, NavState::Nav);
        assert!(!entered_done);
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn cancel_success_from_nav_enters_done_once() {
        let transport = Arc::new(RecordingTransport::default());
        let mut machine = NavigationMachine::new();
        machine.apply(NavEvent::Start, &[], transport.as_ref());
        machine.apply(
            NavEvent::QueryStatusResponse(QueryStatusResponse {
                status: NavStatus::Executing,
                value: 0,
                error_code: ErrorCode::Success,
                timestamp: "t".into(),
            }),
            &[],
            transport.as_ref(),
        );
        let (state, entered_done) = machine.apply(success_cancel(), &[], transport.as_ref());
        assert_eq!(state, NavState::Done);
        assert!(entered_done);
        let (state2, entered_done2) = machine.apply(success_cancel(), &[], transport.as_ref());
        assert_eq!(state2, NavState::Done);
        assert!(!entered_done2);
    }

    #[test]
    fn unmodeled_event_in_done_is_ignored() {
        let transport = Arc::new(RecordingTransport::default());
        let mut machine = NavigationMachine::new();
        machine.apply(NavEvent::Start, &[], transport.as_ref());
        machine.apply(success_cancel(), &[], transport.as_ref());
        let before = transport.sent.lock().unwrap().len();
        let (state, entered_done) = machine.apply(success_cancel(), &[], transport.as_ref());
        assert_eq!(state, NavState::Done);
        assert!(!entered_done);
        assert_eq!(transport.sent.lock().unwrap().len(), before);
    }
}
