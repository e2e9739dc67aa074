//! Effect proxies.
//!
//! A proxy is the single consumer of one dispatch queue and the only place
//! an external system is touched. Each queue item drives exactly one
//! external call, bounded by a timeout at the proxy boundary. On success
//! the proxy appends the job's success event; on failure it appends a
//! revert event back to the job's scan state so the next observer cycle
//! retries. A ledger constraint refusal drops the item after logging it.

pub mod directory;
pub mod emailer;

pub use directory::{Directory, DirectoryJob, DirectoryProxy, LdifProducer};
pub use emailer::{EmailJob, Emailer, LogMailTransport, MailMessage, MailTransport};

use std::time::Duration;

/// How long one external call may take before the proxy gives up on it.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Error from one external call at a proxy boundary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The call did not complete within the proxy's timeout.
    #[error("external call timed out")]
    Timeout,

    /// The transport reported a failure.
    #[error("transport failure: {detail}")]
    Failed {
        /// Transport-specific description.
        detail: String,
    },
}
