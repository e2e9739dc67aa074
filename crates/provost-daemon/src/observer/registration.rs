//! Job builders for the registration provisioning pipeline.
//!
//! Three rules drive a registration from creation to a working account:
//! mail the confirmation link, publish the person entry once the link is
//! visited, and publish the posix account once a uid number is allocated.

use std::collections::BTreeSet;
use std::ops::Range;

use provost_core::directory::{next_uid_number, person_entry, DirectoryRecord};
use provost_core::fsm::registration as states;
use provost_core::registration::login_from_email;
use provost_core::{ArtifactKind, ArtifactSummary, Ledger, Resource, ResourceKind};

use super::{BuildError, Built, JobBuilder, ScanRule};
use crate::proxy::directory::DirectoryJob;
use crate::proxy::emailer::EmailJob;

/// Entry description on published directory records.
pub const ENTRY_DESCRIPTION: &str = "Portal registration";

const GID_NUMBER: &str = "100";

/// Queues confirmation email for fresh registrations.
pub struct MailJobBuilder {
    /// Portal base URL; the confirmation link hangs off it.
    pub portal_url: String,
}

impl JobBuilder for MailJobBuilder {
    type Job = EmailJob;

    fn rule(&self) -> ScanRule {
        ScanRule {
            kind: ArtifactKind::Registration,
            scan: states::PRE_REGISTRATION_PERSON,
            claim: states::PRE_REGISTRATION_PERSON_PENDING,
        }
    }

    fn build(
        &self,
        ledger: &Ledger,
        artifact: &ArtifactSummary,
    ) -> Result<Built<EmailJob>, BuildError> {
        let recipient = require_email(ledger, artifact)?;
        let confirm_url = format!(
            "{}/registration/{}",
            self.portal_url.trim_end_matches('/'),
            artifact.uuid
        );
        Ok(Built::plain(EmailJob {
            artifact: artifact.uuid.clone(),
            recipient,
            confirm_url,
        }))
    }
}

/// Queues the person/inetOrgPerson entry write for confirmed registrations.
///
/// The entry's `cn` is the login handle derived from the registered email
/// address. The handle is minted as a `PosixUId` resource on the claim
/// event, so two registrations deriving the same handle collide at claim
/// time and the loser stays scannable.
pub struct UserHandleJobBuilder {
    /// Base DN new entries are created under.
    pub base_dn: String,
}

impl JobBuilder for UserHandleJobBuilder {
    type Job = DirectoryJob;

    fn rule(&self) -> ScanRule {
        ScanRule {
            kind: ArtifactKind::Registration,
            scan: states::PRE_REGISTRATION_INETORGPERSON_CN,
            claim: states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING,
        }
    }

    fn build(
        &self,
        ledger: &Ledger,
        artifact: &ArtifactSummary,
    ) -> Result<Built<DirectoryJob>, BuildError> {
        let email = require_email(ledger, artifact)?;
        // A handle reserved by an earlier (reverted) claim is reused.
        let (handle, claim_resources) =
            match ledger.latest_resource(&artifact.uuid, ResourceKind::PosixUId)? {
                Some(Resource::PosixUId(handle)) => (handle, Vec::new()),
                _ => {
                    let handle = login_from_email(&email);
                    (handle.clone(), vec![Resource::PosixUId(handle)])
                }
            };

        let mut record = person_entry(&self.base_dn, &handle, ENTRY_DESCRIPTION);
        record.add("objectclass", "organizationalPerson");
        record.add("objectclass", "inetOrgPerson");
        record.add("mail", email);
        if let Some(ou) = leading_ou(&self.base_dn) {
            record.add("ou", ou);
        }

        Ok(Built {
            job: DirectoryJob {
                artifact: artifact.uuid.clone(),
                cn: handle,
                record,
                success: states::PRE_USER_INETORGPERSON_DN,
                revert: states::PRE_REGISTRATION_INETORGPERSON_CN,
            },
            claim_resources,
        })
    }
}

/// Queues the posixAccount entry write for registrations with a handle.
///
/// A uid number is allocated from the configured pool the first time an
/// artifact is claimed here, and attached on the claim event so the
/// ledger's uniqueness constraint arbitrates a race between allocators.
pub struct UidJobBuilder {
    /// Base DN new entries are created under.
    pub base_dn: String,
    /// Uid numbers available for allocation.
    pub pool: Range<u32>,
    /// Numbers discovered in the directory at startup, never allocated.
    pub reserved: BTreeSet<u32>,
}

impl JobBuilder for UidJobBuilder {
    type Job = DirectoryJob;

    fn rule(&self) -> ScanRule {
        ScanRule {
            kind: ArtifactKind::Registration,
            scan: states::PRE_USER_INETORGPERSON_DN,
            claim: states::PRE_USER_INETORGPERSON_DN_PENDING,
        }
    }

    fn build(
        &self,
        ledger: &Ledger,
        artifact: &ArtifactSummary,
    ) -> Result<Built<DirectoryJob>, BuildError> {
        let Some(Resource::PosixUId(handle)) =
            ledger.latest_resource(&artifact.uuid, ResourceKind::PosixUId)?
        else {
            return Err(BuildError::MissingResource {
                artifact: artifact.uuid.clone(),
                kind: ResourceKind::PosixUId,
            });
        };
        let email = require_email(ledger, artifact)?;

        let (number, claim_resources) = match ledger
            .latest_resource(&artifact.uuid, ResourceKind::PosixUIdNumber)?
        {
            Some(Resource::PosixUIdNumber(n)) => (n, Vec::new()),
            _ => {
                let n = self.allocate(ledger)?;
                (n, vec![Resource::PosixUIdNumber(n)])
            }
        };

        let mut record = DirectoryRecord::new();
        record.add("dn", format!("cn={handle},{}", self.base_dn));
        for class in [
            "top",
            "person",
            "organizationalPerson",
            "inetOrgPerson",
            "posixAccount",
        ] {
            record.add("objectclass", class);
        }
        record.add("description", ENTRY_DESCRIPTION);
        record.add("cn", handle.as_str());
        record.add("sn", surname_from_email(&email));
        record.add("mail", email);
        if let Some(ou) = leading_ou(&self.base_dn) {
            record.add("ou", ou);
        }
        record.add("uid", handle.as_str());
        record.add("uidNumber", number.to_string());
        record.add("gidNumber", GID_NUMBER);
        record.add("homeDirectory", format!("/home/{handle}"));

        Ok(Built {
            job: DirectoryJob {
                artifact: artifact.uuid.clone(),
                cn: handle,
                record,
                success: states::PRE_USER_POSIXACCOUNT,
                revert: states::PRE_USER_INETORGPERSON_DN,
            },
            claim_resources,
        })
    }
}

impl UidJobBuilder {
    /// Lowest pool number not reserved and not held by any registration.
    fn allocate(&self, ledger: &Ledger) -> Result<u32, BuildError> {
        let mut taken = self.reserved.clone();
        for summary in ledger.find_by_kind(ArtifactKind::Registration)? {
            if let Some(Resource::PosixUIdNumber(n)) =
                ledger.latest_resource(&summary.uuid, ResourceKind::PosixUIdNumber)?
            {
                taken.insert(n);
            }
        }
        next_uid_number(self.pool.clone(), &taken).ok_or(BuildError::PoolExhausted)
    }
}

fn require_email(ledger: &Ledger, artifact: &ArtifactSummary) -> Result<String, BuildError> {
    match ledger.latest_resource(&artifact.uuid, ResourceKind::EmailAddress)? {
        Some(Resource::EmailAddress(addr)) => Ok(addr),
        _ => Err(BuildError::MissingResource {
            artifact: artifact.uuid.clone(),
            kind: ResourceKind::EmailAddress,
        }),
    }
}

/// The value of the leading `ou=` component of a DN, when there is one.
fn leading_ou(base_dn: &str) -> Option<&str> {
    base_dn
        .split(',')
        .next()
        .and_then(|rdn| rdn.trim().strip_prefix("ou="))
}

/// Capitalized final dotted part of the email's local part.
fn surname_from_email(addr: &str) -> String {
    let local = addr.split('@').next().unwrap_or(addr);
    let last = local.rsplit('.').next().unwrap_or(local);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "UNKNOWN".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, Dispatch};
    use provost_core::directory::{identify, RecordPattern};
    use provost_core::Actor;

    use super::super::Observer;

    const BASE_DN: &str = "ou=jasmin2,ou=People,o=hpc,dc=rl,dc=ac,dc=uk";

    fn ledger_with_controller() -> (Ledger, Actor) {
        let ledger = Ledger::in_memory().unwrap();
        let actor = ledger.register_component("identity.controller").unwrap();
        (ledger, actor)
    }

    fn fresh_registration(ledger: &Ledger, actor: &Actor, email: &str) -> String {
        ledger
            .create_artifact(
                ArtifactKind::Registration,
                &actor.uuid,
                states::PRE_REGISTRATION_PERSON,
                &[Resource::EmailAddress(email.into())],
            )
            .unwrap()
            .uuid
    }

    /// Walks a fresh registration to the link-confirmed state.
    fn confirmed_registration(ledger: &Ledger, actor: &Actor, email: &str) -> String {
        let uuid = fresh_registration(ledger, actor, email);
        for state in [
            states::PRE_REGISTRATION_PERSON_PENDING,
            states::PRE_REGISTRATION_INETORGPERSON,
            states::PRE_REGISTRATION_INETORGPERSON_CN,
        ] {
            ledger.append(&uuid, &actor.uuid, state, &[]).unwrap();
        }
        uuid
    }

    #[test]
    fn scan_claims_and_enqueues_once() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = fresh_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            MailJobBuilder {
                portal_url: "https://portal.example.ac.uk".into(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 1);
        assert_eq!(
            ledger.current_state(&uuid).unwrap().name,
            states::PRE_REGISTRATION_PERSON_PENDING
        );
        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected one job on the queue");
        };
        assert_eq!(job.recipient, "david.e.haynes@stfc.ac.uk");
        assert_eq!(
            job.confirm_url,
            format!("https://portal.example.ac.uk/registration/{uuid}")
        );

        // Claimed artifacts are invisible to the next cycle.
        assert_eq!(observer.cycle().unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn artifact_without_email_is_skipped_not_fatal() {
        let (ledger, actor) = ledger_with_controller();
        let broken = ledger
            .create_artifact(
                ArtifactKind::Registration,
                &actor.uuid,
                states::PRE_REGISTRATION_PERSON,
                &[],
            )
            .unwrap()
            .uuid;
        let good = fresh_registration(&ledger, &actor, "p.j.kershaw@stfc.ac.uk");

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            MailJobBuilder {
                portal_url: "https://portal.example.ac.uk".into(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 1);
        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected the intact artifact's job");
        };
        assert_eq!(job.artifact, good);
        // The broken artifact is untouched and will be rescanned.
        assert_eq!(
            ledger.current_state(&broken).unwrap().name,
            states::PRE_REGISTRATION_PERSON
        );
    }

    #[test]
    fn closed_queue_reverts_the_claim() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = fresh_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");

        let (tx, rx) = queue::channel();
        drop(rx);
        let observer = Observer::new(
            ledger.clone(),
            MailJobBuilder {
                portal_url: "https://portal.example.ac.uk".into(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 0);
        assert_eq!(
            ledger.current_state(&uuid).unwrap().name,
            states::PRE_REGISTRATION_PERSON
        );
    }

    #[test]
    fn user_handle_job_carries_a_recognisable_entry() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = confirmed_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            UserHandleJobBuilder {
                base_dn: BASE_DN.into(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 1);
        assert_eq!(
            ledger.current_state(&uuid).unwrap().name,
            states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING
        );
        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected a directory job");
        };
        assert_eq!(job.cn, "dehaynes");
        assert_eq!(job.record.dn(), Some(format!("cn=dehaynes,{BASE_DN}").as_str()));
        assert_eq!(
            identify(&job.record),
            Some(RecordPattern::RegistrationInetOrgPerson)
        );
        // The handle is on the claim event, not deferred to the write.
        assert_eq!(
            ledger.latest_resource(&uuid, ResourceKind::PosixUId).unwrap(),
            Some(Resource::PosixUId("dehaynes".into()))
        );
    }

    #[test]
    fn colliding_handle_leaves_the_loser_scannable() {
        let (ledger, actor) = ledger_with_controller();
        // Both addresses derive the login handle "dehaynes".
        let winner = confirmed_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");
        let loser = confirmed_registration(&ledger, &actor, "dave.e.haynes@example.ac.uk");

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            UserHandleJobBuilder {
                base_dn: BASE_DN.into(),
            },
            tx,
            actor.uuid.clone(),
        );

        // Only the first claim mints the handle; the second is refused by
        // the ledger's uniqueness constraint and never enters pending.
        assert_eq!(observer.cycle().unwrap(), 1);
        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected the winner's job");
        };
        assert_eq!(job.artifact, winner);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            ledger.current_state(&winner).unwrap().name,
            states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING
        );
        assert_eq!(
            ledger.current_state(&loser).unwrap().name,
            states::PRE_REGISTRATION_INETORGPERSON_CN
        );
        assert_eq!(
            ledger.latest_resource(&loser, ResourceKind::PosixUId).unwrap(),
            None
        );
    }

    #[test]
    fn reverted_claim_reuses_its_minted_handle() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = confirmed_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");
        ledger
            .append(
                &uuid,
                &actor.uuid,
                states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING,
                &[Resource::PosixUId("dehaynes".into())],
            )
            .unwrap();
        ledger
            .append(&uuid, &actor.uuid, states::PRE_REGISTRATION_INETORGPERSON_CN, &[])
            .unwrap();

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            UserHandleJobBuilder {
                base_dn: BASE_DN.into(),
            },
            tx,
            actor.uuid.clone(),
        );

        // Re-minting would collide with the artifact's own earlier claim.
        assert_eq!(observer.cycle().unwrap(), 1);
        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected a directory job");
        };
        assert_eq!(job.cn, "dehaynes");
        assert_eq!(
            ledger.current_state(&uuid).unwrap().name,
            states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING
        );
    }

    #[test]
    fn uid_job_allocates_a_number_on_the_claim_event() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = confirmed_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");
        for (state, resources) in [
            (
                states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING,
                Vec::new(),
            ),
            (
                states::PRE_USER_INETORGPERSON_DN,
                vec![Resource::PosixUId("dehaynes".to_string())],
            ),
        ] {
            ledger.append(&uuid, &actor.uuid, state, &resources).unwrap();
        }

        let (tx, mut rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            UidJobBuilder {
                base_dn: BASE_DN.into(),
                pool: 1000..1100,
                reserved: [1000, 1001].into_iter().collect(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 1);
        assert_eq!(
            ledger
                .latest_resource(&uuid, ResourceKind::PosixUIdNumber)
                .unwrap(),
            Some(Resource::PosixUIdNumber(1002))
        );

        let Ok(Dispatch::Job(job)) = rx.try_recv() else {
            panic!("expected a directory job");
        };
        assert_eq!(job.record.values("uidNumber").iter().next().map(String::as_str), Some("1002"));
        assert_eq!(identify(&job.record), Some(RecordPattern::UserPosixAccount));
        assert_eq!(job.success, states::PRE_USER_POSIXACCOUNT);
    }

    #[test]
    fn exhausted_pool_skips_the_artifact() {
        let (ledger, actor) = ledger_with_controller();
        let uuid = confirmed_registration(&ledger, &actor, "david.e.haynes@stfc.ac.uk");
        for (state, resources) in [
            (
                states::PRE_REGISTRATION_INETORGPERSON_CN_PENDING,
                Vec::new(),
            ),
            (
                states::PRE_USER_INETORGPERSON_DN,
                vec![Resource::PosixUId("dehaynes".to_string())],
            ),
        ] {
            ledger.append(&uuid, &actor.uuid, state, &resources).unwrap();
        }

        let (tx, _rx) = queue::channel();
        let observer = Observer::new(
            ledger.clone(),
            UidJobBuilder {
                base_dn: BASE_DN.into(),
                pool: 1000..1001,
                reserved: [1000].into_iter().collect(),
            },
            tx,
            actor.uuid.clone(),
        );

        assert_eq!(observer.cycle().unwrap(), 0);
        assert_eq!(
            ledger.current_state(&uuid).unwrap().name,
            states::PRE_USER_INETORGPERSON_DN
        );
    }

    #[test]
    fn helper_parses_dn_and_surname() {
        assert_eq!(leading_ou(BASE_DN), Some("jasmin2"));
        assert_eq!(leading_ou("o=hpc,dc=rl"), None);
        assert_eq!(surname_from_email("david.e.haynes@stfc.ac.uk"), "Haynes");
        assert_eq!(surname_from_email("root@localhost"), "Root");
    }
}
