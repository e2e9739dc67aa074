//! Directory write proxy.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use provost_core::directory::{identify, DirectoryRecord};
use provost_core::{Ledger, Resource};

use super::{TransportError, CALL_TIMEOUT};
use crate::queue::{Dispatch, Receiver};

/// Resource label recorded when an entry already existed, so history shows
/// which writes were absorbed rather than performed.
pub const ENTRY_EXISTS_LABEL: &str = "directory-entry-exists";

/// Seam to the directory server. Bind handling and TLS are the
/// implementation's concern.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Searches under `base` with an LDAP `filter`, returning the named
    /// attributes of each matching entry.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Failed`] when the search did not run.
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryRecord>, TransportError>;

    /// Adds one entry.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Failed`] when the entry was not written.
    async fn add(&self, record: &DirectoryRecord) -> Result<(), TransportError>;

    /// Replaces the attributes of the entry at `record`'s DN with the
    /// record's. Entries evolve in place as an identity is provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Failed`] when the entry was not written.
    async fn modify(&self, record: &DirectoryRecord) -> Result<(), TransportError>;
}

/// Stand-in directory that renders each write as LDIF into the log and
/// reports every search empty. Used when no directory server is reachable.
#[derive(Debug, Clone, Default)]
pub struct LdifProducer;

#[async_trait]
impl Directory for LdifProducer {
    async fn search(
        &self,
        base: &str,
        filter: &str,
        _attributes: &[&str],
    ) -> Result<Vec<DirectoryRecord>, TransportError> {
        info!(base, filter, "search (ldif producer): no entries");
        Ok(Vec::new())
    }

    async fn add(&self, record: &DirectoryRecord) -> Result<(), TransportError> {
        info!("add (ldif producer)\n{record}");
        Ok(())
    }

    async fn modify(&self, record: &DirectoryRecord) -> Result<(), TransportError> {
        info!("modify (ldif producer)\n{record}");
        Ok(())
    }
}

/// A queued directory write.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryJob {
    /// Artifact the write advances.
    pub artifact: String,
    /// `cn` of the entry; the idempotency key for search-then-add.
    pub cn: String,
    /// Entry to publish.
    pub record: DirectoryRecord,
    /// State appended when the write lands (or already had).
    pub success: &'static str,
    /// State appended when the transport fails, returning the artifact to
    /// its scan state.
    pub revert: &'static str,
}

/// Consumer of the directory queue.
pub struct DirectoryProxy<D: Directory> {
    ledger: Ledger,
    actor: String,
    directory: D,
    base_dn: String,
    timeout: Duration,
}

impl<D: Directory> DirectoryProxy<D> {
    /// Creates a proxy writing ledger events as `actor_uuid` and directory
    /// entries under `base_dn`.
    pub fn new(ledger: Ledger, actor_uuid: String, directory: D, base_dn: String) -> Self {
        Self {
            ledger,
            actor: actor_uuid,
            directory,
            base_dn,
            timeout: CALL_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consumes the queue until the shutdown sentinel or channel closure.
    pub async fn run(self, mut queue: Receiver<DirectoryJob>) {
        info!(base = %self.base_dn, "directory proxy started");
        while let Some(item) = queue.recv().await {
            match item {
                Dispatch::Job(job) => self.handle(job).await,
                Dispatch::Shutdown => break,
            }
        }
        info!("directory proxy stopped");
    }

    async fn handle(&self, job: DirectoryJob) {
        match self.publish(&job).await {
            Ok(absorbed) => {
                let resources = if absorbed {
                    vec![Resource::Label(ENTRY_EXISTS_LABEL.to_string())]
                } else {
                    Vec::new()
                };
                if let Err(err) =
                    self.ledger
                        .append(&job.artifact, &self.actor, job.success, &resources)
                {
                    // Put the artifact back in its scan state rather than
                    // stranding it in pending; the retry is absorbed by
                    // the search-then-write path.
                    error!(artifact = %job.artifact, %err, "entry published but event refused");
                    self.revert(&job);
                    return;
                }
                info!(artifact = %job.artifact, cn = %job.cn, absorbed, "directory entry published");
            }
            Err(err) => {
                warn!(artifact = %job.artifact, cn = %job.cn, %err, "directory write failed, reverting");
                self.revert(&job);
            }
        }
    }

    fn revert(&self, job: &DirectoryJob) {
        if let Err(err) = self
            .ledger
            .append(&job.artifact, &self.actor, job.revert, &[])
        {
            error!(artifact = %job.artifact, %err, "failed to revert claim");
        }
    }

    /// Search-then-write idempotency. Returns `true` when the write was
    /// absorbed because the entry is already at or beyond the job's shape.
    ///
    /// A missing `cn` is added; an entry at an earlier provisioning shape
    /// is modified in place up to the job's record.
    async fn publish(&self, job: &DirectoryJob) -> Result<bool, TransportError> {
        let filter = format!("(cn={})", job.cn);
        let existing = self
            .call(self.directory.search(&self.base_dn, &filter, &["*"]))
            .await?;
        let Some(entry) = existing.first() else {
            self.call(self.directory.add(&job.record)).await?;
            return Ok(false);
        };
        if identify(entry) >= identify(&job.record) {
            return Ok(true);
        }
        self.call(self.directory.modify(&job.record)).await?;
        Ok(false)
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Collects the uid numbers already present in the directory, so the
/// allocator never hands one of them out.
///
/// # Errors
///
/// Returns the underlying [`TransportError`] when the search fails.
pub async fn discover_uid_numbers<D: Directory>(
    directory: &D,
    base: &str,
    filter: &str,
) -> Result<BTreeSet<u32>, TransportError> {
    let entries = directory.search(base, filter, &["uidNumber"]).await?;
    Ok(entries
        .iter()
        .flat_map(|entry| entry.values("uidNumber").iter())
        .filter_map(|value| value.parse().ok())
        .collect())
}
