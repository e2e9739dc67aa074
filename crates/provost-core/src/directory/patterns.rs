//! Directory record pattern classification.
//!
//! A directory entry for a portal identity passes through a fixed sequence
//! of shapes as the identity is provisioned: a bare person entry at
//! registration, an `inetOrgPerson` once contact details are attached, a
//! `posixAccount` once the account exists, and finally an entry carrying an
//! SSH public key. [`identify`] classifies a record into one of those
//! shapes, or `None` for anything else.
//!
//! The classifier is an ordered list of matcher stages. Each stage widens
//! the set of attributes an entry is allowed to carry and fixes the exact
//! `objectclass` value set; a record matches the *first* stage whose
//! attribute set covers it and whose object classes it carries exactly.
//! Attributes a stage allows but the record omits are treated as present
//! with an empty value set, so partial entries still classify at their
//! stage. The stage order is load-bearing: evaluating the stages in any
//! other order changes classification outcomes.

use std::collections::BTreeSet;
use std::fmt;

use super::record::DirectoryRecord;

/// The recognised directory record shapes, in provisioning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordPattern {
    /// Person-level entry created at registration, nothing verified.
    RegistrationPerson,
    /// Contact details attached, surname still the `UNKNOWN` placeholder.
    RegistrationInetOrgPerson,
    /// Contact details attached and a real surname recorded.
    RegistrationInetOrgPersonSn,
    /// A named user (8-character `cn`) that has no POSIX account yet.
    UserInetOrgPersonDn,
    /// Full POSIX account entry.
    UserPosixAccount,
    /// POSIX account entry carrying at least one SSH public key.
    UserLdapPublicKey,
}

impl RecordPattern {
    /// Human-readable tag, as reported in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegistrationPerson => "unverified anonymous registration",
            Self::RegistrationInetOrgPerson => "verified anonymous registration",
            Self::RegistrationInetOrgPersonSn => "verified registration",
            Self::UserInetOrgPersonDn => "user without account",
            Self::UserPosixAccount => "user account",
            Self::UserLdapPublicKey => "user account with public key",
        }
    }
}

impl fmt::Display for RecordPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One refinement step: attributes this stage adds to the allowed set, the
/// object classes it adds to the required set, and how a match resolves.
struct MatcherStage {
    attributes: &'static [&'static str],
    object_classes: &'static [&'static str],
    resolve: fn(&DirectoryRecord) -> RecordPattern,
}

/// Stages in refinement order. Attribute and object-class sets are
/// cumulative from one stage to the next.
const STAGES: &[MatcherStage] = &[
    MatcherStage {
        attributes: &["version", "changetype", "dn", "cn", "sn", "description"],
        object_classes: &["top", "person"],
        resolve: |_| RecordPattern::RegistrationPerson,
    },
    MatcherStage {
        attributes: &["ou", "mail"],
        object_classes: &["organizationalPerson", "inetOrgPerson"],
        resolve: resolve_inetorgperson,
    },
    MatcherStage {
        attributes: &[
            "uid",
            "uidNumber",
            "gidNumber",
            "homeDirectory",
            "userPassword",
        ],
        object_classes: &["posixAccount"],
        resolve: |_| RecordPattern::UserPosixAccount,
    },
    MatcherStage {
        attributes: &["sshPublicKey"],
        object_classes: &["ldapPublicKey"],
        resolve: |_| RecordPattern::UserLdapPublicKey,
    },
];

/// An `inetOrgPerson`-shaped entry is one of three things: still anonymous
/// (placeholder surname), a named user awaiting an account (some `cn` value
/// is an 8-character login name), or a verified registration.
fn resolve_inetorgperson(record: &DirectoryRecord) -> RecordPattern {
    let sn = record.values("sn");
    if sn.len() == 1 && sn.contains("UNKNOWN") {
        RecordPattern::RegistrationInetOrgPerson
    } else if record.values("cn").iter().any(|cn| cn.len() == 8) {
        RecordPattern::UserInetOrgPersonDn
    } else {
        RecordPattern::RegistrationInetOrgPersonSn
    }
}

/// Classifies a directory record into one of the provisioning shapes.
///
/// Returns `None` for an unrecognised record: one carrying attributes
/// outside every stage's allowed set, or whose `objectclass` values match
/// no stage exactly. Pure function; classifying the same record twice
/// yields the same tag.
#[must_use]
pub fn identify(record: &DirectoryRecord) -> Option<RecordPattern> {
    let mut allowed: BTreeSet<String> = BTreeSet::from(["objectclass".to_string()]);
    let mut classes: BTreeSet<String> = BTreeSet::new();

    for stage in STAGES {
        allowed.extend(stage.attributes.iter().map(|a| a.to_lowercase()));
        classes.extend(stage.object_classes.iter().map(ToString::to_string));

        let covered = record.keys().all(|k| allowed.contains(k));
        if covered && record.values("objectclass") == &classes {
            return Some((stage.resolve)(record));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::record::DirectoryRecord;
    use super::{identify, RecordPattern};

    const BASE_DN: &str = "ou=jasmin2,ou=People,o=hpc,dc=rl,dc=ac,dc=uk";

    fn person() -> String {
        format!(
            "dn: cn=3dceb7f3dc9947b78345f864972ee31f,{BASE_DN}\n\
             objectclass: top\n\
             objectclass: person\n\
             description: JASMIN2 vCloud registration\n\
             cn: 3dceb7f3dc9947b78345f864972ee31f\n\
             sn: UNKNOWN\n"
        )
    }

    fn inetorgperson_anonymous() -> String {
        format!(
            "dn: cn=3dceb7f3dc9947b78345f864972ee31f,{BASE_DN}\n\
             objectclass: top\n\
             objectclass: person\n\
             objectclass: organizationalPerson\n\
             objectclass: inetOrgPerson\n\
             description: JASMIN2 vCloud registration\n\
             cn: 3dceb7f3dc9947b78345f864972ee31f\n\
             sn: UNKNOWN\n\
             ou: jasmin2\n\
             mail: david.e.haynes@stfc.ac.uk\n"
        )
    }

    fn inetorgperson_named() -> String {
        inetorgperson_anonymous().replace("sn: UNKNOWN", "sn: Haynes")
    }

    fn user_without_account() -> String {
        format!(
            "dn: cn=dehaynes,{BASE_DN}\n\
             objectclass: top\n\
             objectclass: person\n\
             objectclass: organizationalPerson\n\
             objectclass: inetOrgPerson\n\
             description: JASMIN2 vCloud user\n\
             cn: dehaynes\n\
             sn: Haynes\n\
             ou: jasmin2\n\
             mail: david.e.haynes@stfc.ac.uk\n"
        )
    }

    fn posix_account() -> String {
        format!(
            "dn: cn=dehaynes,{BASE_DN}\n\
             objectclass: top\n\
             objectclass: person\n\
             objectclass: organizationalPerson\n\
             objectclass: inetOrgPerson\n\
             objectclass: posixAccount\n\
             description: JASMIN2 vCloud account\n\
             userPassword: {{SHA}}0LXhFAsrBWEEQ\n\
             cn: dehaynes\n\
             sn: Haynes\n\
             ou: jasmin2\n\
             uid: dehaynes\n\
             uidNumber: 1034\n\
             gidNumber: 100\n\
             mail: david.e.haynes@stfc.ac.uk\n\
             homeDirectory: /home/dehaynes\n"
        )
    }

    fn public_key_account() -> String {
        format!(
            "{}objectclass: ldapPublicKey\nsshPublicKey: ssh-dss AAAAB3...\n",
            posix_account()
        )
    }

    fn identify_ldif(text: &str) -> Option<RecordPattern> {
        identify(&DirectoryRecord::from_ldif(text))
    }

    #[test]
    fn six_canonical_fixtures_classify_in_order() {
        let expected = [
            (person(), RecordPattern::RegistrationPerson),
            (
                inetorgperson_anonymous(),
                RecordPattern::RegistrationInetOrgPerson,
            ),
            (
                inetorgperson_named(),
                RecordPattern::RegistrationInetOrgPersonSn,
            ),
            (user_without_account(), RecordPattern::UserInetOrgPersonDn),
            (posix_account(), RecordPattern::UserPosixAccount),
            (public_key_account(), RecordPattern::UserLdapPublicKey),
        ];
        for (ldif, pattern) in expected {
            assert_eq!(identify_ldif(&ldif), Some(pattern), "fixture:\n{ldif}");
        }
    }

    #[test]
    fn version_and_changetype_headers_are_tolerated() {
        let ldif = format!("version: 1\nchangetype: add\n{}", person());
        assert_eq!(
            identify_ldif(&ldif),
            Some(RecordPattern::RegistrationPerson)
        );
    }

    #[test]
    fn extra_attribute_is_unrecognised() {
        let ldif = format!("{}telephoneNumber: 01235 445000\n", person());
        assert_eq!(identify_ldif(&ldif), None);
    }

    #[test]
    fn extra_object_class_without_its_attributes_is_unrecognised() {
        let ldif = format!("{}objectclass: organizationalPerson\n", person());
        assert_eq!(identify_ldif(&ldif), None);
    }

    #[test]
    fn posix_attributes_without_posix_class_are_unrecognised() {
        let ldif = inetorgperson_named().replace(
            "ou: jasmin2\n",
            "ou: jasmin2\nuid: dehaynes\nuidNumber: 1034\n",
        );
        assert_eq!(identify_ldif(&ldif), None);
    }

    #[test]
    fn eight_character_cn_reads_as_user_handle() {
        // Same shape, anonymous surname wins over cn length.
        let anonymous = inetorgperson_anonymous();
        assert_eq!(
            identify_ldif(&anonymous),
            Some(RecordPattern::RegistrationInetOrgPerson)
        );

        // Named record with a 9-character cn is a verified registration,
        // not a user handle.
        let nine = user_without_account().replace("dehaynes", "ddehaynes");
        assert_eq!(
            identify_ldif(&nine),
            Some(RecordPattern::RegistrationInetOrgPersonSn)
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let record = DirectoryRecord::from_ldif(&posix_account());
        let first = identify(&record);
        let second = identify(&record);
        assert_eq!(first, second);
        assert_eq!(first, Some(RecordPattern::UserPosixAccount));
    }

    #[test]
    fn pattern_tags_match_reporting_strings() {
        assert_eq!(
            RecordPattern::RegistrationPerson.to_string(),
            "unverified anonymous registration"
        );
        assert_eq!(
            RecordPattern::UserLdapPublicKey.to_string(),
            "user account with public key"
        );
    }
}
