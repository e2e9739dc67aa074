//! Dispatch queues between observers and effect proxies.

use tokio::sync::mpsc;

/// Envelope on a proxy's work queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<J> {
    /// One unit of external work.
    Job(J),
    /// Stop consuming. The producer side sends this once at shutdown;
    /// jobs behind the sentinel are dropped.
    Shutdown,
}

/// Producer half of a dispatch queue.
pub type Sender<J> = mpsc::UnboundedSender<Dispatch<J>>;

/// Consumer half of a dispatch queue.
pub type Receiver<J> = mpsc::UnboundedReceiver<Dispatch<J>>;

/// Creates an unbounded dispatch queue.
///
/// Unbounded is a deliberate trade: observers never block on a slow
/// proxy, at the cost of no backpressure. Queue depth is bounded in
/// practice by the artifact population, since a claimed artifact is not
/// re-enqueued.
#[must_use]
pub fn channel<J>() -> (Sender<J>, Receiver<J>) {
    mpsc::unbounded_channel()
}
