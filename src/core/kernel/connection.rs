use crate::core::config::SessionConfig;
use crate::core::errors::{ConnectFailure, ConnectPhase, SessionError};
use crate::core::kernel::reader::{InboundReadLoop, ReadExit};
use crate::core::kernel::routes::InboundRoutes;
use crate::core::kernel::state::{ConnectionState, ConnectionStateMachine};
use crate::core::kernel::transport::{self, Endpoint, SecureWebSocket};
use crate::core::kernel::writer::OutboundWriteQueue;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tracing::{error, info, instrument, warn};

/// Resolves once `shutdown` is set, or once its sender is gone
pub async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Connection state plus where its changes are published
struct Lifecycle {
    machine: ConnectionStateMachine,
    state: Arc<watch::Sender<ConnectionState>>,
    failure: Arc<Mutex<Option<ConnectFailure>>>,
}

impl Lifecycle {
    fn phase(&self) -> ConnectPhase {
        self.machine.state().phase().unwrap_or(ConnectPhase::Resolve)
    }

    fn advance(
        &mut self,
        transition: fn(&mut ConnectionStateMachine) -> Result<ConnectionState, SessionError>,
    ) -> Result<(), ConnectFailure> {
        match transition(&mut self.machine) {
            Ok(state) => {
                self.state.send_replace(state);
                Ok(())
            }
            Err(e) => Err(ConnectFailure::new(self.phase(), e)),
        }
    }

    fn fail(&mut self, failure: ConnectFailure) {
        error!(phase = %failure.phase, reason = %failure.reason, "Connection failed");
        *self.failure.lock() = Some(failure.clone());
        let result = self.machine.fail(failure);
        self.publish(result);
    }

    fn close(&mut self) {
        let state = self.machine.begin_close();
        self.state.send_replace(state);
        if state == ConnectionState::Closing {
            let result = self.machine.closed();
            self.publish(result);
        }
    }

    fn publish(&self, result: Result<ConnectionState, SessionError>) {
        match result {
            Ok(state) => {
                self.state.send_replace(state);
            }
            Err(e) => error!(error = %e, "Rejected state transition"),
        }
    }
}

/// The one task that owns a session's connection.
///
/// Drives the state machine through each connection step, then runs the
/// write queue and read loop side by side until shutdown. Every state change
/// is published through `state` so the facade can observe it.
pub struct Connection {
    endpoint: Endpoint,
    config: Arc<SessionConfig>,
    routes: Arc<InboundRoutes>,
    commands: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    lifecycle: Lifecycle,
}

impl Connection {
    pub fn new(
        endpoint: Endpoint,
        config: Arc<SessionConfig>,
        routes: Arc<InboundRoutes>,
        commands: mpsc::UnboundedReceiver<String>,
        shutdown: watch::Receiver<bool>,
        state: Arc<watch::Sender<ConnectionState>>,
        failure: Arc<Mutex<Option<ConnectFailure>>>,
    ) -> Self {
        Self {
            endpoint,
            config,
            routes,
            commands,
            shutdown,
            lifecycle: Lifecycle {
                machine: ConnectionStateMachine::new(),
                state,
                failure,
            },
        }
    }

    #[instrument(skip_all, fields(url = %self.endpoint))]
    pub async fn run(mut self) {
        let established = self.establish().await;
        let closing = *self.shutdown.borrow();
        match established {
            Ok(ws) => self.serve(ws).await,
            Err(failure) if closing => {
                info!(phase = %failure.phase, "Connection cancelled");
                self.lifecycle.close();
                self.routes.pending.clear();
            }
            Err(failure) => {
                self.lifecycle.fail(failure);
                self.routes.pending.clear();
            }
        }
    }

    async fn establish(&mut self) -> Result<SecureWebSocket, ConnectFailure> {
        self.lifecycle.advance(ConnectionStateMachine::start)?;

        // One deadline spans resolve and connect; it is gone once TCP is up
        let deadline = Instant::now() + self.config.connect_timeout;
        let addrs = self
            .guard(Some(deadline), transport::resolve(&self.endpoint))
            .await?;
        self.lifecycle.advance(ConnectionStateMachine::resolved)?;

        let tcp = self.guard(Some(deadline), transport::connect(&addrs)).await?;
        self.lifecycle.advance(ConnectionStateMachine::connected)?;
        info!("TCP connected");

        let connector = transport::tls_connector(&self.config)?;
        let tls = self
            .guard(None, transport::tls_handshake(&connector, &self.endpoint.host, tcp))
            .await?;
        self.lifecycle.advance(ConnectionStateMachine::tls_established)?;

        let ws = self
            .guard(
                None,
                transport::protocol_handshake(&self.endpoint, &self.config.user_agent, tls),
            )
            .await?;
        self.lifecycle.advance(ConnectionStateMachine::handshake_complete)?;
        info!("WebSocket session ready");

        Ok(ws)
    }

    /// Run one connection step, bounded by `deadline` and by shutdown
    async fn guard<T, F>(&self, deadline: Option<Instant>, step: F) -> Result<T, ConnectFailure>
    where
        F: Future<Output = Result<T, ConnectFailure>>,
    {
        let phase = self.lifecycle.phase();
        let timeout = self.config.connect_timeout;
        let bounded = async move {
            match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, step).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectFailure::timed_out(phase, timeout)),
                },
                None => step.await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled(self.shutdown.clone()) => Err(ConnectFailure::cancelled(phase)),
            result = bounded => result,
        }
    }

    /// Serve an established socket until shutdown
    pub(crate) async fn serve<S>(self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Self {
            routes,
            commands,
            shutdown,
            mut lifecycle,
            ..
        } = self;

        let (sink, stream) = ws.split();
        let writer = OutboundWriteQueue::new(sink, commands, shutdown.clone(), Arc::clone(&routes));
        let reader = InboundReadLoop::new(stream, shutdown, Arc::clone(&routes));

        let reading = async {
            let exit = reader.run().await;
            if exit != ReadExit::Shutdown {
                // Writes keep going until close; the session is not torn down
                warn!(?exit, "Read loop stopped, no more inbound messages");
            }
        };
        tokio::join!(writer.run(), reading);

        lifecycle.close();
        // Replies can no longer arrive
        routes.pending.clear();
        info!("Session closed");
    }

    /// Mark every connection step as done, for serving a socket built elsewhere
    #[cfg(test)]
    pub(crate) fn assume_ready(&mut self) {
        type Step = fn(&mut ConnectionStateMachine) -> Result<ConnectionState, SessionError>;
        let steps: [Step; 5] = [
            ConnectionStateMachine::start,
            ConnectionStateMachine::resolved,
            ConnectionStateMachine::connected,
            ConnectionStateMachine::tls_established,
            ConnectionStateMachine::handshake_complete,
        ];
        for step in steps {
            let result = step(&mut self.lifecycle.machine);
            self.lifecycle.publish(result);
        }
    }
}
