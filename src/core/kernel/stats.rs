use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session traffic counters, shared by the write queue and read loop
#[derive(Debug, Default)]
pub struct SessionStats {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    write_failures: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    parse_failures: AtomicU64,
    feed_messages: AtomicU64,
    inbox_messages: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub write_failures: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub parse_failures: u64,
    pub feed_messages: u64,
    pub inbox_messages: u64,
}

impl SessionStats {
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed(&self) {
        self.feed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inbox(&self) {
        self.inbox_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            feed_messages: self.feed_messages.load(Ordering::Relaxed),
            inbox_messages: self.inbox_messages.load(Ordering::Relaxed),
        }
    }
}
