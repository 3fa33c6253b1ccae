//! Drives one navigation run to completion: owns the state machine, the
//! 1-second status-poll ticker, and the bookkeeping that happens when the
//! machine reaches its terminal state.
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::message::{Message, NavigationPoint, QueryStatusRequest};
use crate::state::{NavEvent, NavState, NavTransport, NavigationMachine};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Sink for the two actions the machine's terminal-state entry performs on
/// the queue: dropping whatever is pending and pushing a reset marker so the
/// owning pump knows to tear the procedure down.
pub trait NavQueue: Send + Sync {
    fn clear(&self);
    fn push_procedure_reset(&self);
}

pub struct NavigationProcedure {
    machine: Mutex<NavigationMachine>,
    points: Vec<NavigationPoint>,
    transport: Arc<dyn NavTransport>,
    queue: Arc<dyn NavQueue>,
    terminate_callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl NavigationProcedure {
    pub fn new(
        points: Vec<NavigationPoint>,
        transport: Arc<dyn NavTransport>,
        queue: Arc<dyn NavQueue>,
    ) -> Self {
        Self {
            machine: Mutex::new(NavigationMachine::new()),
            points,
            transport,
            queue,
            terminate_callback: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    pub fn set_terminate_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.terminate_callback.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn state(&self) -> NavState {
        self.machine.lock().unwrap().state()
    }

    /// Sends the initial navigation request and starts the status-poll
    /// ticker. The ticker sends a `QueryStatusRequest` every second for as
    /// long as the machine has not reached `Done`; the state machine itself
    /// decides what follows from the `QueryStatusResponse` that comes back
    /// (§4.5).
    pub fn start(self: &Arc<Self>) {
        self.dispatch(NavEvent::Start);
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(STATUS_POLL_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(procedure) = weak.upgrade() else {
                    break;
                };
                if procedure.state() == NavState::Done {
                    break;
                }
                procedure
                    .transport
                    .send(Message::QueryStatusRequest(QueryStatusRequest::new()));
            }
        });
        *self.ticker.lock().unwrap() = Some(handle);
    }

    pub fn dispatch(&self, event: NavEvent) -> NavState {
        let (state, entered_done) = {
            let mut machine = self.machine.lock().unwrap();
            machine.apply(event, &self.points, self.transport.as_ref())
        };
        if entered_done {
            self.queue.clear();
            self.queue.push_procedure_reset();
            if let Some(callback) = self.terminate_callback.lock().unwrap().as_ref() {
                callback();
            }
        }
        state
    }
}

impl Drop for NavigationProcedure {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }
}
