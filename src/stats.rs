use std::sync::Arc;
use tokio::sync::Mutex;

/// Counters a philosopher accumulates over its lifetime. They only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub meals: u64,
    pub deadlocks: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Stats shared between the dining engine and every ring connection.
pub type SharedStats = Arc<Mutex<Stats>>;

impl Stats {
    pub fn shared() -> SharedStats {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn record_meal(&mut self) {
        self.meals += 1;
    }

    pub fn record_deadlock(&mut self) {
        self.deadlocks += 1;
    }

    pub fn record_sent(&mut self) {
        self.messages_sent += 1;
    }

    pub fn record_received(&mut self) {
        self.messages_received += 1;
    }
}
