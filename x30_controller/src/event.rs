//! The session-wide domain events published over [`x30_shared::EventBus`].
//! Everything an operator or a log sink would want to observe about a
//! running session comes through here; nothing else in this crate is
//! public API for that purpose.
use x30_protocol::{ErrorCode, Location, NavStatus};

use x30_shared::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationTaskStatus {
    Started,
    Completed,
}

/// One session-level occurrence. Mirrors §4.4's event variant set exactly;
/// `kind()` is the string subscriptions are keyed by.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    NetworkError {
        message: String,
    },
    QueryStatus {
        status: NavStatus,
        value: i32,
        timestamp: String,
        error_code: ErrorCode,
    },
    GetRealTimeStatus {
        pos_x: f64,
        pos_y: f64,
        pos_z: f64,
        sum_odom: f64,
        location: Location,
        timestamp: String,
    },
    NavigationTask {
        status: NavigationTaskStatus,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl Event for SessionEvent {
    fn kind(&self) -> &'static str {
        match self {
            SessionEvent::NetworkError { .. } => "network_error",
            SessionEvent::QueryStatus { .. } => "query_status",
            SessionEvent::GetRealTimeStatus { .. } => "get_real_time_status",
            SessionEvent::NavigationTask { .. } => "navigation_task",
            SessionEvent::Error { .. } => "error",
        }
    }
}

pub type SessionEventBus = x30_shared::EventBus<SessionEvent>;
