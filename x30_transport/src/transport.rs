//! Framed, async, single-connection TCP client. Every frame on the wire is a
//! 16-byte [`x30_protocol::ProtocolHeader`] immediately followed by its XML
//! body; the receive loop below is the only place that boundary is drawn.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use x30_protocol::{Message, ProtocolHeader, HEADER_LEN};

use crate::error::TransportError;
use crate::event::{Event, SubscriptionReq};
use crate::queue::MessageQueue;

/// A live connection to the device. Cloning shares the same underlying
/// socket and background tasks; the last clone dropped tears them down.
#[derive(Clone, Debug)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Resolves `host:port`, connects, and starts the receive and write
    /// loops. Messages parsed off the wire are pushed onto `queue` as they
    /// arrive; nothing is handed back through this call itself.
    #[tracing::instrument(target = "transport", skip(queue))]
    pub async fn connect(host: &str, port: u16, queue: Arc<MessageQueue>) -> Result<Self, TransportError> {
        tracing::info!(host, port, "connecting to device");
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = stream.into_split();

        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_sub_tx, event_sub_rx) = mpsc::channel(8);
        Event::handle_events(msg_rx, event_sub_rx)?;

        let inner = Arc::new(TransportInner {
            write_tx,
            connected: AtomicBool::new(true),
            msg_tx,
            event_sub_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let receive_handle = tokio::spawn({
            let inner = inner.clone();
            let queue = queue.clone();
            async move { inner.receive_loop(read_half, queue).await }
        });
        let write_handle = tokio::spawn({
            let inner = inner.clone();
            async move { inner.write_loop(write_half, write_rx).await }
        });
        *inner.tasks.lock().unwrap() = vec![receive_handle, write_handle];

        tracing::info!(host, port, "connected");
        Ok(Self { inner })
    }

    /// Serializes and enqueues one frame for the write loop. Never blocks;
    /// drops the message with a warning if the transport is already closed.
    pub fn send(&self, message: Message) {
        self.inner.send(message);
    }

    /// Marks the transport closed and aborts the read/write loop tasks,
    /// which closes the underlying socket. A blocked `read_exact` does not
    /// notice a flag flip on its own, so abort is what actually closes it.
    /// Idempotent: aborting an already-finished task is a no-op.
    pub fn disconnect(&self) {
        self.inner.mark_disconnected();
        for handle in self.inner.tasks.lock().unwrap().iter() {
            handle.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Subscribes to this transport's `NetworkError` channel. May be called
    /// more than once; every subscriber gets every event.
    pub async fn events(&self) -> Result<mpsc::UnboundedReceiver<Event>, TransportError> {
        let mut sub_tx = self.inner.event_sub_tx.clone();
        Ok(Event::subscribe(&mut sub_tx).await?)
    }
}

impl x30_protocol::NavTransport for Transport {
    fn send(&self, message: Message) {
        Transport::send(self, message)
    }
}

#[derive(Debug)]
struct TransportInner {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    connected: AtomicBool,
    msg_tx: mpsc::UnboundedSender<Event>,
    event_sub_tx: mpsc::Sender<SubscriptionReq>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportInner {
    fn send(&self, message: Message) {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::warn!("dropping outbound message on a closed transport");
            return;
        }
        let body = message.encode_body();
        let header = ProtocolHeader::new(message.message_type(), body.len() as u16);
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body.as_bytes());
        let _ = self.write_tx.send(frame);
    }

    async fn receive_loop(&self, mut read_half: OwnedReadHalf, queue: Arc<MessageQueue>) {
        loop {
            if !self.connected.load(Ordering::SeqCst) {
                return;
            }
            let mut header_buf = [0u8; HEADER_LEN];
            if let Err(err) = read_half.read_exact(&mut header_buf).await {
                self.fail(TransportError::Io(err));
                return;
            }
            let header = ProtocolHeader::decode(&header_buf);
            if !header.validate_sync_bytes() {
                self.fail(TransportError::BadSyncBytes);
                return;
            }
            let mut body_buf = vec![0u8; header.length as usize];
            if let Err(err) = read_half.read_exact(&mut body_buf).await {
                self.fail(TransportError::Io(err));
                return;
            }
            let message_type = match header.message_type() {
                Ok(ty) => ty,
                Err(err) => {
                    tracing::warn!(%err, "parse failed: unrecognized message id on the wire");
                    self.dispatch_network_error(format!("parse failed: {err}"));
                    self.mark_disconnected();
                    return;
                }
            };
            let body = String::from_utf8_lossy(&body_buf);
            match Message::parse(message_type, &body) {
                Ok(message) => queue.push(message),
                Err(err) => {
                    tracing::warn!(%err, "parse failed");
                    self.dispatch_network_error(format!("parse failed: {err}"));
                    self.mark_disconnected();
                    return;
                }
            }
        }
    }

    async fn write_loop(&self, mut write_half: OwnedWriteHalf, mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(frame) = write_rx.recv().await {
            if !self.connected.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = write_half.write_all(&frame).await {
                self.fail(TransportError::Io(err));
                return;
            }
        }
    }

    fn fail(&self, err: TransportError) {
        tracing::warn!(%err, "transport failed");
        let _ = self.msg_tx.send(Event::from_transport_error(&err));
        self.mark_disconnected();
    }

    fn dispatch_network_error(&self, message: String) {
        let _ = self.msg_tx.send(Event::NetworkError(message));
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
