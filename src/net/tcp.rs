//! Tokio TCP transport.
//!
//! # Responsibilities
//! - One writer task per connection draining an unbounded outbound queue
//! - One reader task per connection decoding packets and dispatching them
//! - Correlate `send_await` calls with their replies
//! - Report Connect/Close/Exception events to the frame handler, in that order

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::net::codec::{read_packet, write_packet};
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::net::transport::{Connection, ConnectionEvent, ConnectionRef, Connector, FrameHandler, TransportError};
use crate::protocol::{Frame, Packet};

/// A TCP connection speaking the packet protocol.
#[derive(Debug)]
pub struct TcpConnection {
    id: ConnectionId,
    remote_address: String,
    outbound: mpsc::UnboundedSender<Packet>,
    pending: DashMap<u64, oneshot::Sender<Frame>>,
    next_invoke_id: AtomicU64,
    open: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpConnection {
    /// Start the reader and writer tasks for `stream`.
    ///
    /// The guard is held by the reader task and dropped when the connection ends.
    pub fn spawn(
        stream: TcpStream,
        remote_address: String,
        handler: Arc<dyn FrameHandler>,
        max_frame_bytes: usize,
        guard: ConnectionGuard,
    ) -> Arc<Self> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(remote = %remote_address, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            id: guard.id(),
            remote_address,
            outbound,
            pending: DashMap::new(),
            next_invoke_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
            shutdown_tx,
        });

        tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            shutdown_rx.clone(),
            max_frame_bytes,
            connection.remote_address.clone(),
        ));
        tokio::spawn(read_loop(
            Arc::clone(&connection),
            read_half,
            handler,
            shutdown_rx,
            max_frame_bytes,
            guard,
        ));

        connection
    }

    fn enqueue(&self, packet: Packet) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.remote_address.clone()));
        }
        self.outbound
            .send(packet)
            .map_err(|_| TransportError::Closed(self.remote_address.clone()))
    }

    fn mark_closed(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        let _ = self.shutdown_tx.send(true);
        // Dropping the senders wakes every waiter with a closed error.
        self.pending.clear();
        was_open
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn send_oneway(&self, frame: Frame) -> Result<(), TransportError> {
        self.enqueue(Packet::oneway(frame))
    }

    fn reply(&self, invoke_id: u64, frame: Frame) -> Result<(), TransportError> {
        self.enqueue(Packet::reply(invoke_id, frame))
    }

    fn send_await(&self, frame: Frame, timeout: Duration) -> BoxFuture<'_, Result<Frame, TransportError>> {
        Box::pin(async move {
            let invoke_id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            self.pending.insert(invoke_id, tx);

            if let Err(e) = self.enqueue(Packet::invoke(invoke_id, frame)) {
                self.pending.remove(&invoke_id);
                return Err(e);
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(TransportError::Closed(self.remote_address.clone())),
                Err(_) => {
                    self.pending.remove(&invoke_id);
                    Err(TransportError::Timeout(timeout))
                }
            }
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.mark_closed() {
            tracing::debug!(connection_id = %self.id, remote = %self.remote_address, "Connection closed locally");
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Packet>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_frame_bytes: usize,
    remote_address: String,
) {
    let mut writer = BufWriter::new(write_half);
    loop {
        tokio::select! {
            packet = outbound_rx.recv() => {
                let Some(packet) = packet else { break };
                match write_packet(&mut writer, &packet, max_frame_bytes).await {
                    Ok(()) => {}
                    Err(TransportError::FrameTooLarge { size, limit }) => {
                        tracing::error!(remote = %remote_address, size, limit, frame = packet.frame.name(), "Dropping oversized packet");
                    }
                    Err(e) => {
                        tracing::warn!(remote = %remote_address, error = %e, "Write failed, stopping writer");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    connection: Arc<TcpConnection>,
    mut read_half: OwnedReadHalf,
    handler: Arc<dyn FrameHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_frame_bytes: usize,
    _guard: ConnectionGuard,
) {
    let conn_ref: ConnectionRef = connection.clone();
    // Reported here so Close can never overtake it.
    handler.on_event(ConnectionEvent::Connect, &conn_ref);
    let mut failed = false;

    loop {
        let packet = tokio::select! {
            result = read_packet(&mut read_half, max_frame_bytes) => result,
            _ = shutdown_rx.changed() => break,
        };

        match packet {
            Ok(Some(packet)) if packet.reply => {
                match connection.pending.remove(&packet.invoke_id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(packet.frame);
                    }
                    None => {
                        tracing::debug!(
                            remote = %connection.remote_address,
                            invoke_id = packet.invoke_id,
                            "Reply arrived after its caller gave up"
                        );
                    }
                }
            }
            Ok(Some(packet)) => {
                let invoke_id = packet.expects_reply();
                handler.on_frame(&conn_ref, invoke_id, packet.frame);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(remote = %connection.remote_address, error = %e, "Connection read failed");
                failed = true;
                break;
            }
        }
    }

    connection.mark_closed();
    if failed {
        handler.on_event(ConnectionEvent::Exception, &conn_ref);
    }
    handler.on_event(ConnectionEvent::Close, &conn_ref);
}

/// Opens outbound TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    max_frame_bytes: usize,
    tracker: ConnectionTracker,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, max_frame_bytes: usize) -> Self {
        Self {
            connect_timeout,
            max_frame_bytes,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Outbound connections still open.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        address: &'a str,
        handler: Arc<dyn FrameHandler>,
    ) -> BoxFuture<'a, Result<ConnectionRef, TransportError>> {
        Box::pin(async move {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

            let connection: ConnectionRef = TcpConnection::spawn(
                stream,
                address.to_string(),
                handler,
                self.max_frame_bytes,
                self.tracker.track(),
            );
            tracing::debug!(connection_id = %connection.id(), remote = %address, "Outbound connection established");
            Ok(connection)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::DEFAULT_MAX_FRAME_BYTES;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// Answers every correlated call with an ack and records events.
    #[derive(Default)]
    struct AckHandler {
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl FrameHandler for AckHandler {
        fn on_frame(&self, connection: &ConnectionRef, invoke_id: Option<u64>, _frame: Frame) {
            if let Some(id) = invoke_id {
                let _ = connection.reply(id, Frame::ModuleRegisterAck { broker_id: "test".into() });
            }
        }

        fn on_event(&self, event: ConnectionEvent, _connection: &ConnectionRef) {
            self.events.lock().unwrap().push(event);
        }
    }

    async fn accept_one(listener: TcpListener, handler: Arc<AckHandler>) -> Arc<TcpConnection> {
        let (stream, peer) = listener.accept().await.unwrap();
        let tracker = ConnectionTracker::new();
        TcpConnection::spawn(stream, peer.to_string(), handler, DEFAULT_MAX_FRAME_BYTES, tracker.track())
    }

    #[tokio::test]
    async fn send_await_receives_correlated_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server_handler = Arc::new(AckHandler::default());
        let server = tokio::spawn(accept_one(listener, server_handler.clone()));

        let connector = TcpConnector::new(Duration::from_secs(1), DEFAULT_MAX_FRAME_BYTES);
        let client_handler = Arc::new(AckHandler::default());
        let client = connector.connect(&addr, client_handler.clone()).await.unwrap();
        let _server_conn = server.await.unwrap();

        let reply = client
            .send_await(Frame::ModuleRegisterAck { broker_id: "ping".into() }, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply, Frame::ModuleRegisterAck { broker_id: "test".into() });
        assert_eq!(client_handler.events.lock().unwrap()[0], ConnectionEvent::Connect);
        assert_eq!(connector.tracker().active_count(), 1);
    }

    #[tokio::test]
    async fn peer_close_emits_close_event_and_fails_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(accept_one(listener, Arc::new(AckHandler::default())));

        let connector = TcpConnector::new(Duration::from_secs(1), DEFAULT_MAX_FRAME_BYTES);
        let client_handler = Arc::new(AckHandler::default());
        let client = connector.connect(&addr, client_handler.clone()).await.unwrap();
        let server_conn = server.await.unwrap();

        server_conn.close();

        for _ in 0..100 {
            if !client.is_open() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.is_open());
        assert!(client_handler.events.lock().unwrap().contains(&ConnectionEvent::Close));
        assert!(matches!(
            client.send_oneway(Frame::ModuleRegisterAck { broker_id: "x".into() }),
            Err(TransportError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_secs(1), DEFAULT_MAX_FRAME_BYTES);
        let result = connector.connect(&addr, Arc::new(AckHandler::default())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_is_reported_before_an_immediate_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = TcpStream::connect(addr).await.unwrap();
        drop(peer);

        let handler = Arc::new(AckHandler::default());
        let connection = accept_one(listener, handler.clone()).await;
        for _ in 0..100 {
            if handler.events.lock().unwrap().contains(&ConnectionEvent::Close) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!connection.is_open());
        assert_eq!(
            *handler.events.lock().unwrap(),
            vec![ConnectionEvent::Connect, ConnectionEvent::Close]
        );
    }
}
