//! Directory entry modelling: transient records, the pattern classifier and
//! uid number allocation.
//!
//! Nothing in this module talks to a directory server. Records are plain
//! values; the daemon's directory proxy decides what to do with them.

mod account;
mod patterns;
mod record;

pub use account::next_uid_number;
pub use patterns::{identify, RecordPattern};
pub use record::DirectoryRecord;

/// Builds the person-level entry published for a fresh registration:
/// an anonymous `cn`, the placeholder surname and no contact details.
#[must_use]
pub fn person_entry(base_dn: &str, cn: &str, description: &str) -> DirectoryRecord {
    let mut record = DirectoryRecord::new();
    record.add("dn", format!("cn={cn},{base_dn}"));
    record.add("objectclass", "top");
    record.add("objectclass", "person");
    record.add("cn", cn);
    record.add("sn", "UNKNOWN");
    record.add("description", description);
    record
}
