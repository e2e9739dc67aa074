//! Organisation membership operations.
//!
//! A membership artifact records one user's standing in one organisation.
//! The organisation and role travel as `Label` resources (`org:<name>`,
//! `role:<role>`) on the artifact's events; the guest is whoever, besides
//! the inviting admin, has touched the artifact.

use std::collections::BTreeSet;

use crate::fsm::{membership, registration};
use crate::ledger::{Actor, ArtifactSummary, Event, Ledger, LedgerError};
use crate::resource::Resource;
use crate::ArtifactKind;

/// Error from a membership operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MembershipError {
    /// The acting user holds no active admin membership of the organisation.
    #[error("actor {actor} is not an admin of organisation {organisation}")]
    NotPrivileged {
        /// Acting user's UUID.
        actor: String,
        /// Organisation the invitation targeted.
        organisation: String,
    },

    /// The ledger rejected an operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Everything an accepted invitation creates.
#[derive(Debug, Clone)]
pub struct Invited {
    /// The guest's new membership artifact, in `created` state.
    pub membership: ArtifactSummary,
    /// The guest's new registration artifact, at the start of the pipeline.
    pub registration: ArtifactSummary,
    /// The guest actor.
    pub guest: Actor,
}

/// An invitation of a guest into an organisation.
#[derive(Debug, Clone)]
pub struct Invitation {
    /// Organisation the guest is invited into.
    pub organisation: String,
    /// The guest's handle.
    pub handle: String,
    /// The guest's email address; seeds their registration.
    pub email: String,
}

impl Invitation {
    /// Creates the guest's membership and registration artifacts.
    ///
    /// The acting user must hold an active admin membership of the
    /// organisation. The membership starts in `created` with `org:` and
    /// `role:user` labels; the registration starts at the head of the
    /// provisioning pipeline carrying the guest's email address, where the
    /// daemon's observers pick it up.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::NotPrivileged`] when the actor is not an
    /// active admin of the organisation, and [`MembershipError::Ledger`]
    /// when an append fails (a duplicate email address included).
    pub fn run(&self, ledger: &Ledger, actor_uuid: &str) -> Result<Invited, MembershipError> {
        if !is_org_admin(ledger, actor_uuid, &self.organisation)? {
            return Err(MembershipError::NotPrivileged {
                actor: actor_uuid.to_string(),
                organisation: self.organisation.clone(),
            });
        }

        let mship = ledger.create_artifact(
            ArtifactKind::Membership,
            actor_uuid,
            membership::CREATED,
            &[
                Resource::Label(format!("org:{}", self.organisation)),
                Resource::Label("role:user".to_string()),
            ],
        )?;

        // The guest countersigns the membership so later events can tell
        // the two parties apart.
        let guest = ledger.register_user(Some(&self.handle))?;
        ledger.append(&mship.uuid, &guest.uuid, membership::CREATED, &[])?;

        let reg = ledger.create_artifact(
            ArtifactKind::Registration,
            &guest.uuid,
            registration::PRE_REGISTRATION_PERSON,
            &[Resource::EmailAddress(self.email.clone())],
        )?;

        Ok(Invited {
            membership: mship,
            registration: reg,
            guest,
        })
    }
}

/// Moves a membership into force.
///
/// Legal from `created` (an admin vouching directly) or `invited`.
///
/// # Errors
///
/// Returns the underlying [`LedgerError`] when the membership is unknown or
/// the transition is not legal from its current state.
pub fn activate(
    ledger: &Ledger,
    membership_uuid: &str,
    actor_uuid: &str,
) -> Result<Event, LedgerError> {
    ledger.append(membership_uuid, actor_uuid, membership::ACTIVE, &[])
}

/// Whether `actor_uuid` has touched an active membership of `organisation`
/// carrying the admin role.
fn is_org_admin(
    ledger: &Ledger,
    actor_uuid: &str,
    organisation: &str,
) -> Result<bool, LedgerError> {
    let org_label = format!("org:{organisation}");
    for summary in ledger.find_by_latest_state(ArtifactKind::Membership, membership::ACTIVE)? {
        let events = ledger.events(&summary.uuid)?;
        if !events.iter().any(|e| e.actor == actor_uuid) {
            continue;
        }
        let labels: BTreeSet<&str> = events
            .iter()
            .flat_map(|e| e.resources.iter())
            .filter_map(|r| match r {
                Resource::Label(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        if labels.contains(org_label.as_str()) && labels.contains("role:admin") {
            return Ok(true);
        }
    }
    Ok(false)
}
