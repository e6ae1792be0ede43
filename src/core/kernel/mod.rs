/// Tradelink kernel - transport and routing for one JSON-RPC WebSocket session
///
/// The kernel holds everything below the [`Session`](crate::core::session::Session)
/// facade. It contains no venue-specific logic: request payloads are built
/// by the caller, and inbound messages are classified only by their
/// JSON-RPC envelope.
///
/// # Architecture
///
/// ## Connection
/// - `ConnectionStateMachine`: pure transition table, one method per step
/// - `transport`: resolve, TCP connect, TLS handshake, WebSocket upgrade
/// - `Connection`: the single task that owns the socket for its lifetime
///
/// ## Message Flow
/// - `OutboundWriteQueue`: FIFO, single writer, one write in flight
/// - `InboundReadLoop`: one read in flight, classify, route, repeat
/// - `codec`: frame decoding and the classification rules
/// - `InboundRoutes`: feed queue, inbox, access token, pending calls
///
/// ## Handoff
/// - `BlockingQueue`: mutex + condvar FIFO for consumer threads outside the runtime
///
/// # Usage
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tradelink::core::config::SessionConfig;
/// use tradelink::core::kernel::BlockingQueue;
/// use tradelink::core::session::Session;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = tokio::runtime::Builder::new_multi_thread()
///     .worker_threads(1)
///     .enable_all()
///     .build()?;
///
/// let feed = Arc::new(BlockingQueue::new());
/// let inbox = Arc::new(BlockingQueue::new());
/// let config = SessionConfig::new("client_id".to_string(), "client_secret".to_string());
/// let session = Session::new(config, runtime.handle().clone(), feed, Arc::clone(&inbox));
///
/// session.run("test.deribit.com", "443", "/ws/api/v2")?;
/// session.send(r#"{"jsonrpc":"2.0","id":"1","method":"public/test","params":{}}"#);
///
/// if let Some(reply) = inbox.wait_and_pop_timeout(Duration::from_secs(5)) {
///     println!("{}", reply);
/// }
/// session.close();
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod connection;
pub mod queue;
pub mod reader;
pub mod routes;
pub mod state;
pub mod stats;
pub mod transport;
pub mod writer;

// Re-export key types for convenience
pub use codec::{classify, Frame, Inbound};
pub use queue::BlockingQueue;
pub use reader::{InboundReadLoop, ReadExit};
pub use routes::{AccessToken, ChannelSnapshots, InboundRoutes, PendingCalls};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use stats::{SessionStats, StatsSnapshot};
pub use transport::Endpoint;
pub use writer::OutboundWriteQueue;
