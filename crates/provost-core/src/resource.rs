//! Typed side-data attached to ledger events.
//!
//! A resource is owned by exactly one event and is never updated in place:
//! the current value of, say, a registration's email address is found by
//! walking the artifact's events newest-first until an `EmailAddress`
//! resource appears.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side-data payload produced by a lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
#[non_exhaustive]
pub enum Resource {
    /// A contact address for the registrant. Unique across the ledger.
    #[serde(rename = "email_address")]
    EmailAddress(String),

    /// A bcrypt password hash. Hashing happens in the web layer; the ledger
    /// only ever sees the digest.
    #[serde(rename = "bcrypted_password")]
    BcryptedPassword(String),

    /// A POSIX account name. Unique across the ledger.
    #[serde(rename = "posix_uid")]
    PosixUId(String),

    /// A POSIX uid number allocated from the provider's pool. Unique.
    #[serde(rename = "posix_uid_number")]
    PosixUIdNumber(u32),

    /// An SSH public key. Unique across the ledger.
    #[serde(rename = "public_key")]
    PublicKey(String),

    /// An IP address assigned to a host.
    #[serde(rename = "ip_address")]
    IpAddress(String),

    /// The node a host was placed on.
    #[serde(rename = "node")]
    Node(String),

    /// A free-form marker, e.g. organisation/role tags on a membership or
    /// the `directory-entry-exists` outcome on a directory write.
    #[serde(rename = "label")]
    Label(String),

    /// A validity window, e.g. the confirmation-link expiry recorded when a
    /// registration email is sent.
    #[serde(rename = "time_interval")]
    TimeInterval {
        /// When the window opened.
        opened: DateTime<Utc>,
        /// When the window closes.
        expires: DateTime<Utc>,
    },
}

impl Resource {
    /// The discriminator for this resource, used as the ledger's kind column.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::EmailAddress(_) => ResourceKind::EmailAddress,
            Self::BcryptedPassword(_) => ResourceKind::BcryptedPassword,
            Self::PosixUId(_) => ResourceKind::PosixUId,
            Self::PosixUIdNumber(_) => ResourceKind::PosixUIdNumber,
            Self::PublicKey(_) => ResourceKind::PublicKey,
            Self::IpAddress(_) => ResourceKind::IpAddress,
            Self::Node(_) => ResourceKind::Node,
            Self::Label(_) => ResourceKind::Label,
            Self::TimeInterval { .. } => ResourceKind::TimeInterval,
        }
    }
}

/// Resource discriminators, for queries that only care about the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceKind {
    /// See [`Resource::EmailAddress`].
    EmailAddress,
    /// See [`Resource::BcryptedPassword`].
    BcryptedPassword,
    /// See [`Resource::PosixUId`].
    PosixUId,
    /// See [`Resource::PosixUIdNumber`].
    PosixUIdNumber,
    /// See [`Resource::PublicKey`].
    PublicKey,
    /// See [`Resource::IpAddress`].
    IpAddress,
    /// See [`Resource::Node`].
    Node,
    /// See [`Resource::Label`].
    Label,
    /// See [`Resource::TimeInterval`].
    TimeInterval,
}

impl ResourceKind {
    /// The stable string form stored in the ledger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailAddress => "email_address",
            Self::BcryptedPassword => "bcrypted_password",
            Self::PosixUId => "posix_uid",
            Self::PosixUIdNumber => "posix_uid_number",
            Self::PublicKey => "public_key",
            Self::IpAddress => "ip_address",
            Self::Node => "node",
            Self::Label => "label",
            Self::TimeInterval => "time_interval",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_displays_as_its_ledger_column_value() {
        assert_eq!(ResourceKind::PosixUId.to_string(), "posix_uid");
        assert_eq!(ResourceKind::TimeInterval.to_string(), "time_interval");
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let resources = [
            Resource::EmailAddress("a@b.example".into()),
            Resource::PosixUId("dehaynes".into()),
            Resource::PosixUIdNumber(7_010_001),
            Resource::Label("role:admin".into()),
            Resource::TimeInterval {
                opened: Utc::now(),
                expires: Utc::now(),
            },
        ];
        for r in resources {
            let json = serde_json::to_value(&r).unwrap();
            assert_eq!(json["kind"], r.kind().as_str());
        }
    }

    #[test]
    fn round_trips_through_json() {
        let r = Resource::TimeInterval {
            opened: "2014-03-01T12:00:00Z".parse().unwrap(),
            expires: "2014-03-02T12:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
