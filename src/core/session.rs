use crate::core::config::SessionConfig;
use crate::core::errors::{ConnectFailure, SessionError};
use crate::core::kernel::connection::Connection;
use crate::core::kernel::queue::BlockingQueue;
use crate::core::kernel::routes::InboundRoutes;
use crate::core::kernel::state::ConnectionState;
use crate::core::kernel::stats::StatsSnapshot;
use crate::core::kernel::transport::Endpoint;
use crate::core::types::{RpcMessage, RpcRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// One secure WebSocket connection carrying a JSON-RPC conversation.
///
/// Every method takes `&self` and may be called from any thread. The
/// connection itself lives in a single task on the injected runtime; the
/// facade talks to it through channels and shared routing targets only.
///
/// Messages passed to [`Session::send`] before the session is ready are held
/// and written once the handshake completes.
pub struct Session {
    config: Arc<SessionConfig>,
    handle: Handle,
    routes: Arc<InboundRoutes>,
    outbound: mpsc::UnboundedSender<String>,
    commands: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown: watch::Sender<bool>,
    state: Arc<watch::Sender<ConnectionState>>,
    failure: Arc<Mutex<Option<ConnectFailure>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// `feed` receives subscription notifications, `inbox` everything else
    /// once authenticated. Both are owned by the caller.
    pub fn new(
        config: SessionConfig,
        handle: Handle,
        feed: Arc<BlockingQueue<RpcMessage>>,
        inbox: Arc<BlockingQueue<RpcMessage>>,
    ) -> Self {
        let (outbound, commands) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            config: Arc::new(config),
            handle,
            routes: Arc::new(InboundRoutes::new(feed, inbox)),
            outbound,
            commands: Mutex::new(Some(commands)),
            shutdown,
            state: Arc::new(state),
            failure: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Start connecting to `host:port` and serving `path`.
    ///
    /// Returns once the connection task is spawned; progress is visible
    /// through [`Session::state`]. A session runs at most once.
    #[instrument(skip(self))]
    pub fn run(&self, host: &str, port: &str, path: &str) -> Result<(), SessionError> {
        if *self.shutdown.borrow() {
            return Err(SessionError::Closed);
        }
        let commands = self
            .commands
            .lock()
            .take()
            .ok_or(SessionError::AlreadyStarted)?;

        let connection = Connection::new(
            Endpoint::new(host, port, path),
            Arc::clone(&self.config),
            Arc::clone(&self.routes),
            commands,
            self.shutdown.subscribe(),
            Arc::clone(&self.state),
            Arc::clone(&self.failure),
        );
        *self.task.lock() = Some(self.handle.spawn(connection.run()));
        info!("Session started");
        Ok(())
    }

    /// Run on the configured endpoint
    pub fn run_default(&self) -> Result<(), SessionError> {
        self.run(&self.config.host, &self.config.port, &self.config.path)
    }

    /// Append raw JSON text to the outbound sequence.
    ///
    /// Delivery is not reported; write failures only show up in the log.
    pub fn send(&self, message: impl Into<String>) {
        if self.outbound.send(message.into()).is_err() {
            warn!("Session is closed, message dropped");
        }
    }

    pub fn send_request(&self, request: &RpcRequest) -> Result<(), SessionError> {
        let text = request.to_text()?;
        debug!(id = %request.id, method = %request.method, "Queueing request");
        self.send(text);
        Ok(())
    }

    /// Send `request` and get its reply by id instead of through the inbox.
    ///
    /// The receiver errors if the session closes before a reply arrives.
    pub fn call(
        &self,
        request: &RpcRequest,
    ) -> Result<oneshot::Receiver<RpcMessage>, SessionError> {
        let text = request.to_text()?;
        let reply = self.routes.pending.register(&request.id);
        if self.outbound.send(text).is_err() {
            self.routes.pending.forget(&request.id);
            return Err(SessionError::Closed);
        }
        Ok(reply)
    }

    /// Captured access token, if the auth reply carried one
    pub fn access_token(&self) -> Option<String> {
        self.routes.token.get()
    }

    /// Token for requests that need authentication
    pub fn require_token(&self) -> Result<String, SessionError> {
        self.access_token().ok_or(SessionError::NotAuthenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.routes.is_authenticated()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the state satisfies `predicate`, returning that state
    pub async fn wait_for_state<F>(&self, predicate: F) -> ConnectionState
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut states = self.state.subscribe();
        loop {
            let state = *states.borrow_and_update();
            if predicate(state) {
                return state;
            }
            if states.changed().await.is_err() {
                return state;
            }
        }
    }

    /// Connection-phase failure that closed the session, if any
    pub fn failure(&self) -> Option<ConnectFailure> {
        self.failure.lock().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.routes.stats.snapshot()
    }

    /// Last notification payload received on `channel`
    pub fn latest(&self, channel: &str) -> Option<serde_json::Value> {
        self.routes.channels.get(channel)
    }

    /// Subscribed channels that have delivered data, with their last payload
    pub fn channels(&self) -> Vec<(String, serde_json::Value)> {
        self.routes.channels.all()
    }

    /// Forget every last-seen payload, e.g. after unsubscribing
    pub fn clear_channels(&self) {
        self.routes.channels.clear();
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn feed(&self) -> &Arc<BlockingQueue<RpcMessage>> {
        &self.routes.feed
    }

    pub fn inbox(&self) -> &Arc<BlockingQueue<RpcMessage>> {
        &self.routes.inbox
    }

    /// Cancel pending transport operations.
    ///
    /// Returns at once; the close handshake is best effort and may still be
    /// running, or be abandoned if the runtime stops first.
    pub fn close(&self) {
        let already = self.shutdown.send_replace(true);
        if already {
            return;
        }
        if self.commands.lock().take().is_some() {
            // Never ran: nothing to tear down
            self.state.send_replace(ConnectionState::Closed);
        }
        info!("Session close requested");
    }

    /// Whether the connection task has exited
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(self.state().is_terminal(), JoinHandle::is_finished)
    }

    /// Serve an already-upgraded socket, skipping the connection steps
    #[cfg(test)]
    pub(crate) fn attach<S>(
        &self,
        ws: tokio_tungstenite::WebSocketStream<S>,
    ) -> Result<(), SessionError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let commands = self
            .commands
            .lock()
            .take()
            .ok_or(SessionError::AlreadyStarted)?;
        let mut connection = Connection::new(
            Endpoint::new("localhost", "0", "/"),
            Arc::clone(&self.config),
            Arc::clone(&self.routes),
            commands,
            self.shutdown.subscribe(),
            Arc::clone(&self.state),
            Arc::clone(&self.failure),
        );
        connection.assume_ready();
        *self.task.lock() = Some(self.handle.spawn(connection.serve(ws)));
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("authenticated", &self.is_authenticated())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    fn session() -> Session {
        Session::new(
            SessionConfig::new("id".to_string(), "secret".to_string()),
            Handle::current(),
            Arc::new(BlockingQueue::new()),
            Arc::new(BlockingQueue::new()),
        )
    }

    /// Ready session plus the server end of its socket
    async fn attached() -> (Session, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let session = session();
        session.attach(client).unwrap();
        (session, server)
    }

    async fn next_text(server: &mut WebSocketStream<DuplexStream>) -> String {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), server.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("read failed");
            if let Message::Text(text) = frame {
                return text;
            }
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let session = session();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.access_token().is_none());
        assert!(session.failure().is_none());
    }

    #[tokio::test]
    async fn test_require_token() {
        let session = session();
        assert!(matches!(
            session.require_token(),
            Err(SessionError::NotAuthenticated)
        ));
        session.routes.token.capture("tok");
        assert_eq!(session.require_token().unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let (session, _server) = attached().await;
        assert!(matches!(
            session.run("localhost", "1", "/"),
            Err(SessionError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_close_before_run() {
        let session = session();
        session.close();
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(matches!(
            session.run("localhost", "1", "/"),
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sends_reach_wire_in_call_order() {
        let (session, mut server) = attached().await;
        assert_eq!(session.state(), ConnectionState::Ready);

        session.send("A");
        session.send("B");
        assert_eq!(next_text(&mut server).await, "A");
        assert_eq!(next_text(&mut server).await, "B");
        eventually(|| session.stats().messages_sent == 2).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inbound_routing_and_token_capture() {
        let (session, mut server) = attached().await;

        let notification = json!({"jsonrpc": "2.0", "method": "subscription",
            "params": {"channel": "x", "data": {}}});
        server.send(Message::Text(notification.to_string())).await.unwrap();
        server.send(Message::Text("{broken".to_string())).await.unwrap();
        server
            .send(Message::Text(
                json!({"jsonrpc": "2.0", "id": "1", "result": {"access_token": "tok"}}).to_string(),
            ))
            .await
            .unwrap();
        server
            .send(Message::Text(json!({"jsonrpc": "2.0", "id": "2", "result": []}).to_string()))
            .await
            .unwrap();

        let reply = session
            .inbox()
            .wait_and_pop_timeout(Duration::from_secs(5))
            .expect("response routed to inbox");
        assert_eq!(reply.id().as_deref(), Some("2"));
        assert_eq!(session.access_token().as_deref(), Some("tok"));
        assert_eq!(session.feed().try_pop().unwrap().channel(), Some("x"));
        assert_eq!(session.latest("x"), Some(json!({})));
        assert_eq!(session.stats().parse_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_gets_reply_by_id() {
        let (session, mut server) = attached().await;
        session.routes.token.capture("tok");

        let first = RpcRequest::new("public/test", json!({}));
        let second = RpcRequest::new("public/test", json!({}));
        let first_reply = session.call(&first).unwrap();
        let second_reply = session.call(&second).unwrap();

        let _ = next_text(&mut server).await;
        let _ = next_text(&mut server).await;

        // Answer out of order
        for id in [&second.id, &first.id] {
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": id});
            server.send(Message::Text(reply.to_string())).await.unwrap();
        }

        assert_eq!(first_reply.await.unwrap().result(), Some(&json!(first.id)));
        assert_eq!(second_reply.await.unwrap().result(), Some(&json!(second.id)));
        assert!(session.inbox().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_releases_unanswered_call() {
        let (session, mut server) = attached().await;
        let reply = session
            .call(&RpcRequest::new("public/test", json!({})))
            .unwrap();
        let _ = next_text(&mut server).await;

        session.close();
        session.wait_for_state(ConnectionState::is_terminal).await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), reply)
            .await
            .expect("waiter still pending after close");
        assert!(outcome.is_err());
        assert!(session.routes.pending.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_reaches_closed_and_sends_close_frame() {
        let (session, mut server) = attached().await;
        session.close();

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            session.wait_for_state(ConnectionState::is_terminal),
        )
        .await
        .unwrap();
        assert_eq!(state, ConnectionState::Closed);
        assert!(matches!(server.next().await, Some(Ok(Message::Close(_)))));

        session.send("late");
        eventually(|| session.is_finished()).await;
    }
}
