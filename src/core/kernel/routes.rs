use crate::core::kernel::codec::Inbound;
use crate::core::kernel::queue::BlockingQueue;
use crate::core::kernel::stats::SessionStats;
use crate::core::types::RpcMessage;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Access token that moves from unset to set exactly once
#[derive(Debug, Default)]
pub struct AccessToken {
    cell: OnceLock<Secret<String>>,
}

impl AccessToken {
    /// Store `token` if none is set yet. Returns whether it was stored.
    pub fn capture(&self, token: &str) -> bool {
        self.cell.set(Secret::new(token.to_string())).is_ok()
    }

    pub fn get(&self) -> Option<String> {
        self.cell.get().map(|token| token.expose_secret().clone())
    }

    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Requests sent through `Session::call`, keyed by request id
#[derive(Debug, Default)]
pub struct PendingCalls {
    waiters: Mutex<HashMap<String, oneshot::Sender<RpcMessage>>>,
}

impl PendingCalls {
    pub fn register(&self, id: &str) -> oneshot::Receiver<RpcMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id.to_string(), tx);
        rx
    }

    pub fn forget(&self, id: &str) {
        self.waiters.lock().remove(id);
    }

    /// Hand `message` to the waiter registered for its id.
    /// Gives the message back when nobody is waiting for it.
    pub fn complete(&self, message: RpcMessage) -> Result<(), RpcMessage> {
        let Some(id) = message.id() else {
            return Err(message);
        };
        let Some(waiter) = self.waiters.lock().remove(&id) else {
            return Err(message);
        };
        waiter.send(message)
    }

    /// Drop every waiter; their receivers see the sender gone
    pub fn clear(&self) {
        let dropped = {
            let mut waiters = self.waiters.lock();
            let count = waiters.len();
            waiters.clear();
            count
        };
        if dropped > 0 {
            debug!(dropped, "Abandoned pending calls");
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

/// Most recent notification payload per subscription channel
#[derive(Debug, Default)]
pub struct ChannelSnapshots {
    latest: Mutex<BTreeMap<String, Value>>,
}

impl ChannelSnapshots {
    pub fn record(&self, message: &RpcMessage) {
        if let (Some(channel), Some(data)) = (message.channel(), message.data()) {
            self.latest.lock().insert(channel.to_string(), data.clone());
        }
    }

    pub fn get(&self, channel: &str) -> Option<Value> {
        self.latest.lock().get(channel).cloned()
    }

    /// Every channel seen so far with its last payload, sorted by name
    pub fn all(&self) -> Vec<(String, Value)> {
        self.latest
            .lock()
            .iter()
            .map(|(channel, data)| (channel.clone(), data.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.latest.lock().clear();
    }
}

/// Destinations for classified inbound traffic of one session
#[derive(Debug)]
pub struct InboundRoutes {
    pub feed: Arc<BlockingQueue<RpcMessage>>,
    pub inbox: Arc<BlockingQueue<RpcMessage>>,
    pub token: AccessToken,
    pub pending: PendingCalls,
    pub channels: ChannelSnapshots,
    pub stats: SessionStats,
}

impl InboundRoutes {
    pub fn new(
        feed: Arc<BlockingQueue<RpcMessage>>,
        inbox: Arc<BlockingQueue<RpcMessage>>,
    ) -> Self {
        Self {
            feed,
            inbox,
            token: AccessToken::default(),
            pending: PendingCalls::default(),
            channels: ChannelSnapshots::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_set()
    }

    pub fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Malformed(e) => {
                self.stats.record_parse_failure();
                error!(error = %e, "JSON parse error, message discarded");
            }
            Inbound::Feed(message) => {
                self.stats.record_feed();
                self.channels.record(&message);
                self.feed.push(message);
            }
            Inbound::Auth(message) => self.capture_token(message),
            Inbound::Response(message) => {
                if let Err(message) = self.pending.complete(message) {
                    self.stats.record_inbox();
                    self.inbox.push(message);
                }
            }
        }
    }

    fn capture_token(&self, message: RpcMessage) {
        match message.access_token() {
            Some(token) => {
                if self.token.capture(token) {
                    info!("Access token set");
                } else {
                    debug!("Access token already set, keeping the first one");
                }
            }
            None => {
                warn!(error = ?message.error(), "No access token found in response");
            }
        }

        // A caller awaiting this id still gets the reply
        if self.pending.complete(message).is_err() {
            debug!("Auth response had no registered caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::classify;
    use serde_json::json;

    fn routes() -> InboundRoutes {
        InboundRoutes::new(Arc::new(BlockingQueue::new()), Arc::new(BlockingQueue::new()))
    }

    fn route(routes: &InboundRoutes, value: serde_json::Value) {
        let payload = value.to_string();
        routes.dispatch(classify(payload.as_bytes(), routes.is_authenticated()));
    }

    #[test]
    fn test_token_captured_once() {
        let routes = routes();
        route(&routes, json!({"id": "1", "result": {"access_token": "first"}}));
        route(&routes, json!({"id": "2", "result": {"access_token": "second"}}));

        assert_eq!(routes.token.get().as_deref(), Some("first"));
        // The second reply arrived while authenticated, so it is a plain response
        assert_eq!(routes.inbox.len(), 1);
    }

    #[test]
    fn test_feed_keeps_last_payload_per_channel() {
        let routes = routes();
        for (channel, price) in [("ticker.BTC", 1), ("ticker.ETH", 2), ("ticker.BTC", 3)] {
            route(
                &routes,
                json!({"method": "subscription",
                    "params": {"channel": channel, "data": {"price": price}}}),
            );
        }

        assert_eq!(routes.feed.len(), 3);
        assert_eq!(routes.channels.get("ticker.BTC"), Some(json!({"price": 3})));
        let all = routes.channels.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], ("ticker.ETH".to_string(), json!({"price": 2})));

        routes.channels.clear();
        assert!(routes.channels.all().is_empty());
    }

    #[test]
    fn test_auth_reply_without_token_leaves_unset() {
        let routes = routes();
        route(
            &routes,
            json!({"id": "1", "error": {"code": 13004, "message": "invalid_credentials"}}),
        );
        assert!(!routes.is_authenticated());
        assert!(routes.inbox.is_empty());
        assert!(routes.feed.is_empty());
    }

    #[test]
    fn test_subscription_while_unauthenticated_is_not_the_auth_reply() {
        let routes = routes();
        route(
            &routes,
            json!({"method": "subscription", "params": {"channel": "x", "data": {}}}),
        );
        assert!(!routes.is_authenticated());
        assert_eq!(routes.feed.len(), 1);
        assert_eq!(routes.stats.snapshot().feed_messages, 1);
    }

    #[test]
    fn test_pending_call_receives_matching_response() {
        let routes = routes();
        routes.token.capture("tok");
        let mut rx = routes.pending.register("abc");

        route(&routes, json!({"id": "other", "result": 1}));
        route(&routes, json!({"id": "abc", "result": 2}));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.result(), Some(&json!(2)));
        assert_eq!(routes.inbox.len(), 1);
        assert!(routes.pending.is_empty());
    }

    #[test]
    fn test_dropped_waiter_falls_back_to_inbox() {
        let routes = routes();
        routes.token.capture("tok");
        drop(routes.pending.register("gone"));

        route(&routes, json!({"id": "gone", "result": true}));
        assert_eq!(routes.inbox.len(), 1);
    }

    #[test]
    fn test_auth_call_waiter_gets_reply_and_token_is_captured() {
        let routes = routes();
        let mut rx = routes.pending.register("auth-1");
        route(&routes, json!({"id": "auth-1", "result": {"access_token": "tok"}}));

        assert_eq!(routes.token.get().as_deref(), Some("tok"));
        assert_eq!(rx.try_recv().unwrap().access_token(), Some("tok"));
    }

    #[test]
    fn test_clear_releases_waiters() {
        let routes = routes();
        let mut first = routes.pending.register("a");
        let mut second = routes.pending.register("b");

        routes.pending.clear();
        assert!(routes.pending.is_empty());
        assert!(matches!(first.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(second.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    }

    #[test]
    fn test_malformed_counts_parse_failure() {
        let routes = routes();
        routes.dispatch(classify(b"garbage", false));
        assert_eq!(routes.stats.snapshot().parse_failures, 1);
        assert!(!routes.is_authenticated());
    }
}
