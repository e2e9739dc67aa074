//! Scan-rule observers.
//!
//! An observer owns one [`ScanRule`]: it periodically queries the ledger
//! for artifacts whose latest event sits in the rule's scan state, builds
//! one queue job per artifact, and claims the artifact by appending an
//! event to the rule's claim state. The claim happens before the enqueue,
//! so a constraint refusal at claim time leaves the artifact untouched and
//! scannable, while the queued job is only visible to the proxy once the
//! claim is on record.
//!
//! Observers share nothing: each gets its own ledger handle, builder,
//! queue sender and actor identity.

mod registration;

pub use registration::{MailJobBuilder, UidJobBuilder, UserHandleJobBuilder, ENTRY_DESCRIPTION};

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use provost_core::{ArtifactKind, ArtifactSummary, Ledger, LedgerError, Resource, ResourceKind};

use crate::queue::{Dispatch, Sender};

/// One observation rule: which artifacts to scan for and where to park
/// them while their job is in flight.
#[derive(Debug, Clone, Copy)]
pub struct ScanRule {
    /// Artifact type to scan.
    pub kind: ArtifactKind,
    /// State that makes an artifact eligible.
    pub scan: &'static str,
    /// State that marks an artifact claimed.
    pub claim: &'static str,
}

/// Error building a job for one artifact. Build errors never abort a
/// scan cycle; the artifact is skipped and retried next cycle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The artifact lacks a resource the job needs.
    #[error("artifact {artifact} has no {kind} resource")]
    MissingResource {
        /// Artifact scanned.
        artifact: String,
        /// Resource kind that was required.
        kind: ResourceKind,
    },

    /// No free uid number remains in the configured pool.
    #[error("uid number pool exhausted")]
    PoolExhausted,

    /// A ledger query failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A built job plus the resources to attach on the claim event.
#[derive(Debug)]
pub struct Built<J> {
    /// The job to enqueue.
    pub job: J,
    /// Resources minted at claim time. Ledger uniqueness constraints
    /// arbitrate races between concurrent claimants here.
    pub claim_resources: Vec<Resource>,
}

impl<J> Built<J> {
    /// A job with nothing minted at claim time.
    pub fn plain(job: J) -> Self {
        Self {
            job,
            claim_resources: Vec::new(),
        }
    }
}

/// Builds one queue job from one scanned artifact.
pub trait JobBuilder {
    /// Queue payload this builder produces.
    type Job;

    /// The rule this builder serves.
    fn rule(&self) -> ScanRule;

    /// Builds the job for `artifact`, reading whatever resources it needs
    /// from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when a required resource is missing or a
    /// ledger query fails; the observer logs and skips the artifact.
    fn build(&self, ledger: &Ledger, artifact: &ArtifactSummary) -> Result<Built<Self::Job>, BuildError>;
}

/// A worker that repeatedly applies one scan rule.
pub struct Observer<B: JobBuilder> {
    ledger: Ledger,
    builder: B,
    queue: Sender<B::Job>,
    actor: String,
}

impl<B: JobBuilder> Observer<B> {
    /// Creates an observer writing claim events as `actor_uuid`.
    pub fn new(ledger: Ledger, builder: B, queue: Sender<B::Job>, actor_uuid: String) -> Self {
        Self {
            ledger,
            builder,
            queue,
            actor: actor_uuid,
        }
    }

    /// Runs one scan cycle and returns the number of jobs enqueued.
    ///
    /// Per-artifact failures (build errors, claim refusals) are logged and
    /// skipped; the artifact stays in its scan state for the next cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] only when the scan query itself fails.
    pub fn cycle(&self) -> Result<usize, LedgerError> {
        let rule = self.builder.rule();
        let mut seen = BTreeSet::new();
        let mut enqueued = 0;

        for artifact in self.ledger.find_by_latest_state(rule.kind, rule.scan)? {
            if !seen.insert(artifact.uuid.clone()) {
                continue;
            }
            let built = match self.builder.build(&self.ledger, &artifact) {
                Ok(built) => built,
                Err(err) => {
                    warn!(artifact = %artifact.uuid, scan = rule.scan, %err, "skipping artifact");
                    continue;
                }
            };
            if let Err(err) =
                self.ledger
                    .append(&artifact.uuid, &self.actor, rule.claim, &built.claim_resources)
            {
                warn!(artifact = %artifact.uuid, claim = rule.claim, %err, "claim refused");
                continue;
            }
            if self.queue.send(Dispatch::Job(built.job)).is_err() {
                // Consumer gone: shutdown is in progress. Undo the claim
                // so the artifact is picked up on the next start.
                if let Err(err) = self.ledger.append(&artifact.uuid, &self.actor, rule.scan, &[]) {
                    error!(artifact = %artifact.uuid, %err, "failed to revert claim");
                }
                break;
            }
            debug!(artifact = %artifact.uuid, claim = rule.claim, "job enqueued");
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Loops [`cycle`](Self::cycle) every `interval` until `shutdown`
    /// flips to `true`. The signal is honoured at the top of each cycle
    /// and during the sleep.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let rule = self.builder.rule();
        info!(kind = %rule.kind, scan = rule.scan, "observer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.cycle() {
                Ok(0) => {}
                Ok(n) => debug!(scan = rule.scan, enqueued = n, "scan cycle complete"),
                Err(err) => warn!(scan = rule.scan, %err, "scan cycle failed"),
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!(scan = rule.scan, "observer stopped");
    }
}
