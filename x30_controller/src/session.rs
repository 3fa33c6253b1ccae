//! The session controller (§4.7): wires the transport, the message queue and
//! the navigation procedure together, pumps the one ordered message stream,
//! and translates operator commands into that same stream.
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use x30_protocol::{
    CancelTaskRequest, Message, NavEvent, NavQueue, NavTransport, NavigationPoint,
    NavigationProcedure, NavigationTaskRequest, QueryStatusRequest,
};
use x30_shared::Shutdown;
use x30_transport::{MessageQueue, Popped, Transport};

use crate::error::{ControllerError, Result};
use crate::event::{NavigationTaskStatus, SessionEvent, SessionEventBus};

type Procedure = Arc<NavigationProcedure>;

/// Owns exactly one live navigation procedure at a time (invariant 4 in
/// §3): `start` fails with `AlreadyRunning` while one exists, and a fresh
/// one may only be created after `PROCEDURE_RESET` clears the slot.
pub struct Session {
    queue: Arc<MessageQueue>,
    transport: Mutex<Option<Transport>>,
    procedure: Arc<Mutex<Option<Procedure>>>,
    points: Vec<NavigationPoint>,
    bus: Arc<SessionEventBus>,
    shutdown: Shutdown,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
    // Retains the one strong sender for the shutdown-complete channel so the
    // `WeakSender` handed to every spawned task's `drop_guard()` has
    // something to upgrade against. Dropped in `shutdown()`, once all
    // per-task clones have already been dropped, so the channel actually
    // closes instead of upgrading forever.
    shutdown_complete_tx: Mutex<Option<mpsc::Sender<()>>>,
    shutdown_complete_rx: Mutex<Option<mpsc::Receiver<()>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(points: Vec<NavigationPoint>, bus: Arc<SessionEventBus>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        Self {
            queue: Arc::new(MessageQueue::new()),
            transport: Mutex::new(None),
            procedure: Arc::new(Mutex::new(None)),
            points,
            bus,
            shutdown: Shutdown::new(shutdown_tx, shutdown_complete_tx.clone()),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            shutdown_complete_tx: Mutex::new(Some(shutdown_complete_tx)),
            shutdown_complete_rx: Mutex::new(Some(shutdown_complete_rx)),
            pump_handle: Mutex::new(None),
        }
    }

    /// Connects to the device and starts the message pump. Also subscribes
    /// a handler on the transport's own fatal-error channel that tears the
    /// in-flight procedure down and republishes the failure as a
    /// `NetworkError` session event (§4.7, §7).
    #[tracing::instrument(target = "session", skip(self))]
    pub async fn initialize(&self, host: &str, port: u16) -> Result<()> {
        tracing::info!(host, port, "initializing session");
        let transport = Transport::connect(host, port, self.queue.clone()).await?;
        let events = transport.events().await?;
        *self.transport.lock().unwrap() = Some(transport.clone());

        self.spawn_network_error_listener(events, transport.clone());
        self.spawn_pump(transport);
        Ok(())
    }

    fn spawn_network_error_listener(
        &self,
        mut events: mpsc::UnboundedReceiver<x30_transport::Event>,
        transport: Transport,
    ) {
        let bus = self.bus.clone();
        let procedure = self.procedure.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _guard = shutdown.drop_guard();
            loop {
                tokio::select! {
                    _ = shutdown.recv_shutdown() => break,
                    event = events.recv() => {
                        let Some(x30_transport::Event::NetworkError(message)) = event else {
                            break;
                        };
                        tracing::warn!(%message, "network error, tearing down the procedure");
                        transport.disconnect();
                        procedure.lock().unwrap().take();
                        bus.publish(SessionEvent::NetworkError { message });
                    }
                }
            }
        });
    }

    fn spawn_pump(&self, transport: Transport) {
        let queue = self.queue.clone();
        let bus = self.bus.clone();
        let procedure = self.procedure.clone();
        let points = self.points.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let _guard = shutdown.drop_guard();
            loop {
                tokio::select! {
                    _ = shutdown.recv_shutdown() => break,
                    popped = queue.pop() => {
                        match popped {
                            Popped::Closed => break,
                            Popped::Message(message) => {
                                dispatch(message, &transport, &queue, &bus, &procedure, &points);
                            }
                        }
                    }
                }
            }
        });
        *self.pump_handle.lock().unwrap() = Some(handle);
    }

    /// Maps an operator-typed command to a synthetic request and pushes it
    /// onto the same ordered queue inbound wire traffic flows through
    /// (§4.7). Unknown commands publish an `Error` event without touching
    /// the queue.
    pub fn handle_command(&self, text: &str) {
        let message = match text.trim() {
            "start" => Message::NavigationTaskRequest(NavigationTaskRequest::new(self.points.clone())),
            "cancel" => Message::CancelTaskRequest(CancelTaskRequest::new()),
            "status" => Message::QueryStatusRequest(QueryStatusRequest::new()),
            other => {
                let message = format!("unknown command: {other}");
                tracing::warn!(%message);
                self.bus.publish(SessionEvent::Error { code: -1, message });
                return;
            }
        };
        self.queue.push(message);
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .unwrap()
            .as_ref()
            .map(Transport::is_connected)
            .unwrap_or(false)
    }

    /// Idempotent: resets the procedure, disconnects the transport, closes
    /// the queue (unblocking the pump), and joins every task this session
    /// spawned. A second call observes the pump and listener already gone
    /// and returns immediately.
    #[tracing::instrument(target = "session", skip(self))]
    pub async fn shutdown(&self) {
        let Some(shutdown_rx) = self.shutdown_rx.lock().unwrap().take() else {
            return;
        };
        tracing::info!("shutting down session");
        drop(shutdown_rx);
        self.procedure.lock().unwrap().take();
        self.queue.close();
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.disconnect();
        }
        if let Some(handle) = self.pump_handle.lock().unwrap().take() {
            let _ = handle.await;
        }
        // Drop our own retained strong sender now that both spawned tasks
        // have returned (each dropped its own clone via `drop_guard` on the
        // way out); this is what actually lets `shutdown_complete_rx.recv()`
        // observe the channel closing instead of blocking forever.
        self.shutdown_complete_tx.lock().unwrap().take();
        let shutdown_complete_rx = self.shutdown_complete_rx.lock().unwrap().take();
        if let Some(mut rx) = shutdown_complete_rx {
            let _ = rx.recv().await;
        }
    }
}

/// The pump's dispatch table (§4.7). Runs entirely synchronously: every
/// branch either sends through the transport's non-blocking queue, mutates
/// the procedure slot, or publishes to the event bus — none of it awaits.
fn dispatch(
    message: Message,
    transport: &Transport,
    queue: &Arc<MessageQueue>,
    bus: &Arc<SessionEventBus>,
    procedure: &Arc<Mutex<Option<Procedure>>>,
    points: &[NavigationPoint],
) {
    match message {
        Message::NavigationTaskRequest(_) => {
            let mut slot = procedure.lock().unwrap();
            if slot.is_some() {
                publish_error(bus, ControllerError::AlreadyRunning);
                return;
            }
            let proc = Arc::new(NavigationProcedure::new(
                points.to_vec(),
                Arc::new(transport.clone()) as Arc<dyn NavTransport>,
                queue.clone() as Arc<dyn NavQueue>,
            ));
            // Entering `Done` also calls this, independently of the
            // `PROCEDURE_RESET` message the pump tears the procedure down
            // on; it is the Done-entry observability hook, not a
            // destruction path (§4.5, §4.6).
            proc.set_terminate_callback(|| {
                tracing::info!("navigation procedure reached Done state");
            });
            proc.start();
            *slot = Some(proc);
            drop(slot);
            bus.publish(SessionEvent::NavigationTask { status: NavigationTaskStatus::Started });
        }
        Message::CancelTaskRequest(_) => {
            if has_procedure(procedure) {
                transport.send(Message::CancelTaskRequest(CancelTaskRequest::new()));
            } else {
                publish_error(bus, ControllerError::NoActiveProcedure);
            }
        }
        Message::QueryStatusRequest(_) => {
            if has_procedure(procedure) {
                transport.send(Message::QueryStatusRequest(QueryStatusRequest::new()));
            } else {
                publish_error(bus, ControllerError::NoActiveProcedure);
            }
        }
        Message::GetRealTimeStatusRequest(_) => {
            publish_error(bus, ControllerError::UnknownCommand("unexpected message".into()));
        }
        Message::ProcedureReset => {
            procedure.lock().unwrap().take();
            bus.publish(SessionEvent::NavigationTask { status: NavigationTaskStatus::Completed });
        }
        Message::NavigationTaskResponse(resp) => {
            forward_to_procedure(procedure, NavEvent::NavigationTaskResponse(resp));
        }
        Message::CancelTaskResponse(resp) => {
            forward_to_procedure(procedure, NavEvent::CancelTaskResponse(resp));
        }
        Message::QueryStatusResponse(resp) => {
            bus.publish(SessionEvent::QueryStatus {
                status: resp.status,
                value: resp.value,
                timestamp: resp.timestamp.clone(),
                error_code: resp.error_code,
            });
            forward_to_procedure(procedure, NavEvent::QueryStatusResponse(resp));
        }
        Message::GetRealTimeStatusResponse(resp) => {
            bus.publish(SessionEvent::GetRealTimeStatus {
                pos_x: resp.pos_x,
                pos_y: resp.pos_y,
                pos_z: resp.pos_z,
                sum_odom: resp.sum_odom,
                location: resp.location,
                timestamp: resp.timestamp,
            });
        }
    }
}

fn has_procedure(procedure: &Arc<Mutex<Option<Procedure>>>) -> bool {
    procedure.lock().unwrap().is_some()
}

fn forward_to_procedure(procedure: &Arc<Mutex<Option<Procedure>>>, event: NavEvent) {
    let proc = procedure.lock().unwrap().clone();
    if let Some(proc) = proc {
        proc.dispatch(event);
    }
}

fn publish_error(bus: &Arc<SessionEventBus>, err: ControllerError) {
    tracing::warn!(%err, "command rejected");
    bus.publish(SessionEvent::Error { code: -1, message: err.to_string() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use x30_protocol::{
        CancelTaskResponse, ErrorCode, GetRealTimeStatusResponse, Location, MessageType, NavStatus,
        NavigationTaskResponse, ProtocolHeader, QueryStatusResponse,
    };
    use x30_shared::EventBus;

    fn sample_point(id: i32) -> NavigationPoint {
        NavigationPoint {
            map_id: 0,
            point_id: id,
            pos_x: 0.0,
            pos_y: 0.0,
            pos_z: 0.0,
            angle_yaw: 0.0,
            point_info: 0,
            gait: 0,
            speed: 0,
            manner: 0,
            obs_mode: 0,
            navi_mode: 0,
            terrain: 0,
            posture: 0,
        }
    }

    async fn write_frame(
        socket: &mut tokio::net::TcpStream,
        message_type: MessageType,
        message: Message,
    ) {
        use tokio::io::AsyncWriteExt;
        let body = message.encode_body();
        let header = ProtocolHeader::new(message_type, body.len() as u16);
        socket.write_all(&header.encode()).await.unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
    }

    /// A tiny fake device: accepts one connection, then lets the test drive
    /// exactly which response frames it sends and in what order.
    async fn fake_device() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn happy_path_completion_publishes_started_then_completed() {
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(
                &mut socket,
                MessageType::NavigationTaskResponse,
                Message::NavigationTaskResponse(NavigationTaskResponse {
                    value: 0,
                    error_code: ErrorCode::Success,
                    error_status: 0,
                    timestamp: "t".into(),
                }),
            )
            .await;
            socket
        });

        let bus = Arc::new(EventBus::new());
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let c = completed.clone();
        bus.subscribe("navigation_task", move |event| {
            if let SessionEvent::NavigationTask { status } = event {
                match status {
                    NavigationTaskStatus::Started => {
                        s.fetch_add(1, Ordering::SeqCst);
                    }
                    NavigationTaskStatus::Completed => {
                        c.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        let session = Session::new(vec![sample_point(1), sample_point(2)], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.handle_command("start");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_while_preparing_reaches_done() {
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(
                &mut socket,
                MessageType::CancelTaskResponse,
                Message::CancelTaskResponse(CancelTaskResponse {
                    error_code: ErrorCode::Success,
                    timestamp: "t".into(),
                }),
            )
            .await;
            socket
        });

        let bus = Arc::new(EventBus::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        bus.subscribe("navigation_task", move |event| {
            if let SessionEvent::NavigationTask { status: NavigationTaskStatus::Completed } = event {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let session = Session::new(vec![sample_point(1)], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.handle_command("start");
        session.handle_command("cancel");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn status_before_start_publishes_single_error_and_sends_nothing() {
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the connection open but never read or write.
            tokio::time::sleep(Duration::from_millis(150)).await;
            socket
        });

        let bus = Arc::new(EventBus::new());
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        bus.subscribe("error", move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let session = Session::new(vec![], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.handle_command("status");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        let _ = server.await;
    }

    #[tokio::test]
    async fn bad_sync_bytes_publishes_network_error_and_blocks_further_commands() {
        use tokio::io::AsyncWriteExt;
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0u8; x30_protocol::HEADER_LEN]).await.unwrap();
            socket
        });

        let bus = Arc::new(EventBus::new());
        let network_errors = Arc::new(AtomicUsize::new(0));
        let n = network_errors.clone();
        bus.subscribe("network_error", move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });
        let command_errors = Arc::new(AtomicUsize::new(0));
        let ce = command_errors.clone();
        bus.subscribe("error", move |_| {
            ce.fetch_add(1, Ordering::SeqCst);
        });

        let session = Session::new(vec![], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(network_errors.load(Ordering::SeqCst), 1);

        session.handle_command("status");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(command_errors.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        let _ = server.await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let bus = Arc::new(EventBus::new());
        let session = Session::new(vec![], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.shutdown().await;
        session.shutdown().await;
        assert!(!session.is_connected());
        let _ = server.await;
    }

    #[tokio::test]
    async fn cancel_after_entering_nav_reaches_done() {
        use tokio::io::AsyncReadExt;
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Read the initial NavigationTaskRequest from `start`.
            let mut header_buf = [0u8; x30_protocol::HEADER_LEN];
            socket.read_exact(&mut header_buf).await.unwrap();
            let header = ProtocolHeader::decode(&header_buf);
            let mut body = vec![0u8; header.length as usize];
            socket.read_exact(&mut body).await.unwrap();

            // PrepareEnterNav + Executing -> Nav.
            write_frame(
                &mut socket,
                MessageType::QueryStatusResponse,
                Message::QueryStatusResponse(QueryStatusResponse {
                    status: NavStatus::Executing,
                    value: 0,
                    error_code: ErrorCode::Success,
                    timestamp: "t".into(),
                }),
            )
            .await;

            // Read the CancelTaskRequest sent once the operator cancels from Nav.
            let mut cancel_header = [0u8; x30_protocol::HEADER_LEN];
            socket.read_exact(&mut cancel_header).await.unwrap();
            let header = ProtocolHeader::decode(&cancel_header);
            let mut cancel_body = vec![0u8; header.length as usize];
            socket.read_exact(&mut cancel_body).await.unwrap();

            write_frame(
                &mut socket,
                MessageType::CancelTaskResponse,
                Message::CancelTaskResponse(CancelTaskResponse {
                    error_code: ErrorCode::Success,
                    timestamp: "t".into(),
                }),
            )
            .await;
            socket
        });

        let bus = Arc::new(EventBus::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        bus.subscribe("navigation_task", move |event| {
            if let SessionEvent::NavigationTask { status: NavigationTaskStatus::Completed } = event {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let session = Session::new(vec![sample_point(1)], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.handle_command("start");
        tokio::time::sleep(Duration::from_millis(80)).await;
        session.handle_command("cancel");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn self_loop_in_nav_sends_get_real_time_status_request_as_side_effect() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Read the initial NavigationTaskRequest from `start`.
            let mut header_buf = [0u8; x30_protocol::HEADER_LEN];
            socket.read_exact(&mut header_buf).await.unwrap();
            let header = ProtocolHeader::decode(&header_buf);
            let mut body = vec![0u8; header.length as usize];
            socket.read_exact(&mut body).await.unwrap();

            // PrepareEnterNav + Executing -> Nav, no side effect.
            write_frame(
                &mut socket,
                MessageType::QueryStatusResponse,
                Message::QueryStatusResponse(QueryStatusResponse {
                    status: NavStatus::Executing,
                    value: 0,
                    error_code: ErrorCode::Success,
                    timestamp: "t".into(),
                }),
            )
            .await;

            // Nav + Executing self-loops and sends a GetRealTimeStatusRequest
            // immediately, without waiting on the status-poll ticker.
            write_frame(
                &mut socket,
                MessageType::QueryStatusResponse,
                Message::QueryStatusResponse(QueryStatusResponse {
                    status: NavStatus::Executing,
                    value: 7,
                    error_code: ErrorCode::Success,
                    timestamp: "t".into(),
                }),
            )
            .await;
            let mut header_buf2 = [0u8; x30_protocol::HEADER_LEN];
            socket.read_exact(&mut header_buf2).await.unwrap();
            let header2 = ProtocolHeader::decode(&header_buf2);
            assert_eq!(header2.message_type().unwrap(), MessageType::GetRealTimeStatusRequest);
            socket
        });

        let bus = Arc::new(EventBus::new());
        let session = Session::new(vec![sample_point(1)], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();
        session.handle_command("start");

        tokio::time::sleep(Duration::from_millis(200)).await;
        session.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn get_real_time_status_response_publishes_event() {
        let (listener, addr) = fake_device().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(
                &mut socket,
                MessageType::GetRealTimeStatusResponse,
                Message::GetRealTimeStatusResponse(GetRealTimeStatusResponse {
                    pos_x: 1.0,
                    pos_y: 2.0,
                    pos_z: 3.0,
                    sum_odom: 4.0,
                    location: Location::Localized,
                    timestamp: "t".into(),
                }),
            )
            .await;
            socket
        });

        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe("get_real_time_status", move |event| {
            if let SessionEvent::GetRealTimeStatus { pos_x, .. } = event {
                assert_eq!(*pos_x, 1.0);
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let session = Session::new(vec![], bus);
        session.initialize(&addr.ip().to_string(), addr.port()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        session.shutdown().await;
        let _ = server.await;
    }
}
