use crate::core::kernel::codec::{classify, decode_frame, Frame};
use crate::core::kernel::routes::InboundRoutes;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

/// Why the read loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadExit {
    Shutdown,
    PeerClosed,
    Error(String),
}

/// Continuous receive loop for one session.
///
/// Exactly one read is outstanding at a time. Each message is classified and
/// routed before the next read is issued, so routing sees arrival order.
pub struct InboundReadLoop<St> {
    stream: St,
    shutdown: watch::Receiver<bool>,
    routes: Arc<InboundRoutes>,
}

impl<St> InboundReadLoop<St>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    pub fn new(stream: St, shutdown: watch::Receiver<bool>, routes: Arc<InboundRoutes>) -> Self {
        Self {
            stream,
            shutdown,
            routes,
        }
    }

    pub async fn run(mut self) -> ReadExit {
        loop {
            if *self.shutdown.borrow() {
                return ReadExit::Shutdown;
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return ReadExit::Shutdown,
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(message)) => self.on_message(message),
                Some(Err(e)) => {
                    error!(error = %e, "Read error, stopping read loop");
                    return ReadExit::Error(e.to_string());
                }
                None => {
                    warn!("Stream ended, stopping read loop");
                    return ReadExit::PeerClosed;
                }
            }
        }
    }

    fn on_message(&self, message: Message) {
        match decode_frame(message) {
            Frame::Payload(bytes) => {
                self.routes.stats.record_received(bytes.len());
                let inbound = classify(&bytes, self.routes.is_authenticated());
                self.routes.dispatch(inbound);
            }
            Frame::Control => debug!("Control frame"),
            Frame::Close(frame) => {
                // The protocol layer echoes the close; the stream ends after it
                info!(?frame, "Peer sent close frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::queue::BlockingQueue;
    use futures_util::stream;
    use serde_json::json;

    fn routes() -> Arc<InboundRoutes> {
        Arc::new(InboundRoutes::new(
            Arc::new(BlockingQueue::new()),
            Arc::new(BlockingQueue::new()),
        ))
    }

    fn text(value: serde_json::Value) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(value.to_string()))
    }

    #[tokio::test]
    async fn test_routes_in_arrival_order() {
        let routes = routes();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let frames = vec![
            Ok(Message::Text("not json".to_string())),
            text(json!({"method": "subscription", "params": {"channel": "a", "data": 1}})),
            text(json!({"id": "1", "result": {"access_token": "tok"}})),
            Ok(Message::Ping(vec![])),
            text(json!({"id": "2", "result": "x"})),
            text(json!({"id": "3", "result": "y"})),
            text(json!({"method": "subscription", "params": {"channel": "b", "data": 2}})),
        ];

        let exit = InboundReadLoop::new(stream::iter(frames), stop_rx, Arc::clone(&routes))
            .run()
            .await;

        assert_eq!(exit, ReadExit::PeerClosed);
        assert_eq!(routes.token.get().as_deref(), Some("tok"));
        assert_eq!(routes.inbox.try_pop().unwrap().result(), Some(&json!("x")));
        assert_eq!(routes.inbox.try_pop().unwrap().result(), Some(&json!("y")));
        assert_eq!(routes.feed.try_pop().unwrap().channel(), Some("a"));
        assert_eq!(routes.feed.try_pop().unwrap().channel(), Some("b"));

        let stats = routes.stats.snapshot();
        assert_eq!(stats.messages_received, 6);
        assert_eq!(stats.parse_failures, 1);
    }

    #[tokio::test]
    async fn test_read_error_stops_loop() {
        let routes = routes();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let frames = vec![
            text(json!({"method": "subscription", "params": {"channel": "a"}})),
            Err(tungstenite::Error::ConnectionClosed),
            text(json!({"method": "subscription", "params": {"channel": "never"}})),
        ];

        let exit = InboundReadLoop::new(stream::iter(frames), stop_rx, Arc::clone(&routes))
            .run()
            .await;

        assert!(matches!(exit, ReadExit::Error(_)));
        assert_eq!(routes.feed.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_read() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = InboundReadLoop::new(
            stream::pending::<Result<Message, tungstenite::Error>>(),
            stop_rx,
            routes(),
        );
        let task = tokio::spawn(reader.run());

        stop_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), ReadExit::Shutdown);
    }
}
