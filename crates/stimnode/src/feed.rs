//! Operator feed: console lines broadcast to connected operators.

use boothproto::FeedLine;
use tokio::sync::broadcast;
use tracing::info;

const FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct OperatorFeed {
    tx: broadcast::Sender<String>,
}

impl OperatorFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Publish a line. Also logged under the `operator` target.
    pub fn publish(&self, line: impl Into<FeedLine>) {
        let line = line.into().to_string();
        info!(target: "operator", "{}", line);
        // No subscribers is fine; the line is still in the log.
        let _ = self.tx.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for OperatorFeed {
    fn default() -> Self {
        Self::new()
    }
}
