//! Static state catalogue for artifact lifecycles.
//!
//! Every artifact type owns one state namespace (its "fsm"). The catalogue is
//! fixed at compile time: provost is not a general workflow engine, and the
//! ledger refuses to append a state that is not reachable from the artifact's
//! current state.
//!
//! # Registration lifecycle
//!
//! ```text
//! pre_registration_person ----------------> pre_registration_person_pending
//!   (created)                                 (confirmation email queued)
//!                                                |
//!                 +------------------------------+
//!                 v
//! pre_registration_inetorgperson ---------> pre_registration_inetorgperson_cn
//!   (email sent, window open)                 (link confirmed by user)
//!                                                |
//!                 ... person entry published, posix account published ...
//!                 v
//! pre_user_ldappublickey ------------------> valid
//! ```
//!
//! Each `*_pending` state marks an artifact claimed by an observer while its
//! work item sits on a dispatch queue. A failed external call reverts the
//! artifact from the pending state back to its scan state, so the next cycle
//! retries it. The terminal states `expired` and `withdrawn` are reachable
//! from any non-terminal state.

use std::fmt;
use std::str::FromStr;

/// Artifact types subject to lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// A user's registration with the portal.
    Registration,
    /// A user's membership of an organisation.
    Membership,
    /// A provisioned host.
    Host,
    /// An organisation's subscription to a provider.
    Subscription,
    /// A catalogue appliance instance.
    Appliance,
}

impl ArtifactKind {
    /// The stable string form used in the ledger and in state namespaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Membership => "membership",
            Self::Host => "host",
            Self::Subscription => "subscription",
            Self::Appliance => "appliance",
        }
    }

    /// The state namespace for this artifact type.
    #[must_use]
    pub const fn fsm_name(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = UnknownFsm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(Self::Registration),
            "membership" => Ok(Self::Membership),
            "host" => Ok(Self::Host),
            "subscription" => Ok(Self::Subscription),
            "appliance" => Ok(Self::Appliance),
            other => Err(UnknownFsm {
                name: other.to_string(),
            }),
        }
    }
}

/// Error for an artifact kind or namespace the catalogue does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fsm: {name}")]
pub struct UnknownFsm {
    /// The unrecognised namespace name.
    pub name: String,
}

/// Registration state names.
pub mod registration {
    /// Namespace name.
    pub const FSM: &str = "registration";

    /// Initial state: account requested, confirmation email not yet sent.
    pub const PRE_REGISTRATION_PERSON: &str = "pre_registration_person";
    /// Confirmation email queued for dispatch.
    pub const PRE_REGISTRATION_PERSON_PENDING: &str = "pre_registration_person_pending";
    /// Confirmation email sent; the confirmation window is open.
    pub const PRE_REGISTRATION_INETORGPERSON: &str = "pre_registration_inetorgperson";
    /// Confirmation link visited; awaiting directory person entry.
    pub const PRE_REGISTRATION_INETORGPERSON_CN: &str = "pre_registration_inetorgperson_cn";
    /// Directory person-entry write queued.
    pub const PRE_REGISTRATION_INETORGPERSON_CN_PENDING: &str =
        "pre_registration_inetorgperson_cn_pending";
    /// Person entry published; awaiting POSIX account details.
    pub const PRE_USER_INETORGPERSON_DN: &str = "pre_user_inetorgperson_dn";
    /// Directory POSIX account write queued.
    pub const PRE_USER_INETORGPERSON_DN_PENDING: &str = "pre_user_inetorgperson_dn_pending";
    /// POSIX account published; awaiting public key.
    pub const PRE_USER_POSIXACCOUNT: &str = "pre_user_posixaccount";
    /// Public key published.
    pub const PRE_USER_LDAPPUBLICKEY: &str = "pre_user_ldappublickey";
    /// Registration complete.
    pub const VALID: &str = "valid";
    /// Confirmation window elapsed without action.
    pub const EXPIRED: &str = "expired";
    /// Withdrawn by the user or an operator.
    pub const WITHDRAWN: &str = "withdrawn";
}

/// Membership state names.
pub mod membership {
    /// Namespace name.
    pub const FSM: &str = "membership";

    /// Membership record created by an organisation admin.
    pub const CREATED: &str = "created";
    /// Invitation issued to the guest.
    pub const INVITED: &str = "invited";
    /// Membership in force.
    pub const ACTIVE: &str = "active";
    /// Lapsed.
    pub const EXPIRED: &str = "expired";
    /// Withdrawn.
    pub const WITHDRAWN: &str = "withdrawn";
}

type Edges = &'static [(&'static str, &'static [&'static str])];

const REGISTRATION_EDGES: Edges = &[
    (
        registration::PRE_REGISTRATION_PERSON,
        &[registration::PRE_REGISTRATION_PERSON_PENDING],
    ),
    (
        registration::PRE_REGISTRATION_PERSON_PENDING,
        &[
            registration::PRE_REGISTRATION_INETORGPERSON,
            registration::PRE_REGISTRATION_PERSON,
        ],
    ),
    (
        registration::PRE_REGISTRATION_INETORGPERSON,
        &[registration::PRE_REGISTRATION_INETORGPERSON_CN],
    ),
    (
        registration::PRE_REGISTRATION_INETORGPERSON_CN,
        &[registration::PRE_REGISTRATION_INETORGPERSON_CN_PENDING],
    ),
    (
        registration::PRE_REGISTRATION_INETORGPERSON_CN_PENDING,
        &[
            registration::PRE_USER_INETORGPERSON_DN,
            registration::PRE_REGISTRATION_INETORGPERSON_CN,
        ],
    ),
    (
        registration::PRE_USER_INETORGPERSON_DN,
        &[registration::PRE_USER_INETORGPERSON_DN_PENDING],
    ),
    (
        registration::PRE_USER_INETORGPERSON_DN_PENDING,
        &[
            registration::PRE_USER_POSIXACCOUNT,
            registration::PRE_USER_INETORGPERSON_DN,
        ],
    ),
    (
        registration::PRE_USER_POSIXACCOUNT,
        &[registration::PRE_USER_LDAPPUBLICKEY],
    ),
    (
        registration::PRE_USER_LDAPPUBLICKEY,
        &[registration::VALID],
    ),
    (registration::VALID, &[]),
    (registration::EXPIRED, &[]),
    (registration::WITHDRAWN, &[]),
];

const MEMBERSHIP_EDGES: Edges = &[
    (
        membership::CREATED,
        &[membership::INVITED, membership::ACTIVE],
    ),
    (membership::INVITED, &[membership::ACTIVE]),
    (membership::ACTIVE, &[]),
    (membership::EXPIRED, &[]),
    (membership::WITHDRAWN, &[]),
];

const HOST_EDGES: Edges = &[
    ("requested", &["scheduling"]),
    ("scheduling", &["up", "down"]),
    ("up", &["down"]),
    ("down", &["up"]),
    ("deleting", &[]),
    ("expired", &[]),
    ("withdrawn", &[]),
];

const SUBSCRIPTION_EDGES: Edges = &[
    ("unchecked", &["maintenance"]),
    ("maintenance", &["active"]),
    ("active", &["maintenance"]),
    ("expired", &[]),
    ("withdrawn", &[]),
];

const APPLIANCE_EDGES: Edges = &[
    ("requested", &["configuring"]),
    ("configuring", &["pre_provision"]),
    ("pre_provision", &["provisioning"]),
    ("provisioning", &["operational"]),
    ("operational", &[]),
    ("expired", &[]),
    ("withdrawn", &[]),
];

/// States any non-terminal state may fall into directly.
const TERMINAL: &[&str] = &["expired", "withdrawn"];

fn edges(fsm: &str) -> Option<Edges> {
    match fsm {
        "registration" => Some(REGISTRATION_EDGES),
        "membership" => Some(MEMBERSHIP_EDGES),
        "host" => Some(HOST_EDGES),
        "subscription" => Some(SUBSCRIPTION_EDGES),
        "appliance" => Some(APPLIANCE_EDGES),
        _ => None,
    }
}

/// Returns true when `name` is a state in the `fsm` namespace.
#[must_use]
pub fn contains(fsm: &str, name: &str) -> bool {
    edges(fsm).is_some_and(|e| e.iter().any(|(s, _)| *s == name))
}

/// All state names in the `fsm` namespace, declaration order.
#[must_use]
pub fn states(fsm: &str) -> Vec<&'static str> {
    edges(fsm)
        .map(|e| e.iter().map(|(s, _)| *s).collect())
        .unwrap_or_default()
}

/// Every `(fsm, state)` pair in the catalogue, used to seed the ledger.
pub fn catalogue() -> impl Iterator<Item = (&'static str, &'static str)> {
    [
        ("registration", REGISTRATION_EDGES),
        ("membership", MEMBERSHIP_EDGES),
        ("host", HOST_EDGES),
        ("subscription", SUBSCRIPTION_EDGES),
        ("appliance", APPLIANCE_EDGES),
    ]
    .into_iter()
    .flat_map(|(fsm, e)| e.iter().map(move |(s, _)| (fsm, *s)))
}

/// Whether an event may move an artifact in `fsm` from `from` to `to`.
///
/// Allowed transitions are:
/// - a listed edge in the namespace's graph,
/// - `from == to` (a resource-attachment event that does not move state),
/// - any non-terminal state to `expired` or `withdrawn`.
#[must_use]
pub fn can_transition(fsm: &str, from: &str, to: &str) -> bool {
    let Some(graph) = edges(fsm) else {
        return false;
    };
    if !contains(fsm, to) {
        return false;
    }
    if from == to {
        return true;
    }
    if TERMINAL.contains(&to) && !TERMINAL.contains(&from) {
        return true;
    }
    graph
        .iter()
        .find(|(s, _)| *s == from)
        .is_some_and(|(_, next)| next.contains(&to))
}
