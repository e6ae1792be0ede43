use crate::core::kernel::codec::encode_text;
use crate::core::kernel::routes::InboundRoutes;
use futures_util::{Sink, SinkExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

/// Upper bound on the best-effort close frame sent at shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Single writer for one session.
///
/// Owns the outbound sequence and the sink half of the socket. Messages reach
/// it through an unbounded channel, so `Session::send` is callable from any
/// thread, and only this task touches the sequence. At most one write is in
/// flight; a failed write stalls the queue for good.
pub struct OutboundWriteQueue<Si> {
    sink: Si,
    commands: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    routes: Arc<InboundRoutes>,
    pending: VecDeque<String>,
    stalled: bool,
}

impl<Si> OutboundWriteQueue<Si>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    pub fn new(
        sink: Si,
        commands: mpsc::UnboundedReceiver<String>,
        shutdown: watch::Receiver<bool>,
        routes: Arc<InboundRoutes>,
    ) -> Self {
        Self {
            sink,
            commands,
            shutdown,
            routes,
            pending: VecDeque::new(),
            stalled: false,
        }
    }

    /// Drive writes until shutdown, or until every sender is gone and the
    /// sequence has drained.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if self.stalled || self.pending.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => break,
                    command = self.commands.recv() => match command {
                        Some(text) => self.enqueue(text),
                        None if self.stalled => {
                            // Nothing can move anymore; wait for close
                            let _ = self.shutdown.changed().await;
                            break;
                        }
                        None => break,
                    },
                }
                continue;
            }

            // Pick up whatever arrived during the previous write
            while let Ok(text) = self.commands.try_recv() {
                self.enqueue(text);
            }

            let Some(head) = self.pending.front().cloned() else {
                continue;
            };
            let bytes = head.len();

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = self.sink.send(encode_text(head)) => self.on_write_complete(result, bytes),
            }
        }

        self.finish().await;
    }

    fn enqueue(&mut self, text: String) {
        if self.stalled {
            warn!(
                bytes = text.len(),
                "Write queue stalled after a failed write, message dropped"
            );
            return;
        }
        self.pending.push_back(text);
    }

    fn on_write_complete(&mut self, result: Result<(), tungstenite::Error>, bytes: usize) {
        match result {
            Ok(()) => {
                self.pending.pop_front();
                self.routes.stats.record_sent(bytes);
                debug!(bytes, pending = self.pending.len(), "Sent message");
            }
            Err(e) => {
                self.stalled = true;
                self.routes.stats.record_write_failure();
                error!(error = %e, pending = self.pending.len(), "Error sending message");
            }
        }
    }

    async fn finish(mut self) {
        if !self.pending.is_empty() {
            info!(abandoned = self.pending.len(), "Dropping unsent messages");
        }
        if !self.stalled {
            match tokio::time::timeout(CLOSE_GRACE, self.sink.send(Message::Close(None))).await {
                Ok(Ok(())) => debug!("Close frame sent"),
                Ok(Err(e)) => debug!(error = %e, "Close frame not sent"),
                Err(_) => debug!("Close frame timed out"),
            }
        }
    }
}
