//! Registration operations shared by the daemon and its operators.

use crate::ledger::{Event, Ledger, LedgerError};
use crate::resource::Resource;

/// Derives a display name from an email address:
/// `david.e.haynes@example.ac.uk` becomes `David E Haynes`.
#[must_use]
pub fn handle_from_email(addr: &str) -> String {
    let local = addr.split('@').next().unwrap_or(addr);
    local
        .split('.')
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives a login handle from an email address: the initial of each
/// leading name part followed by the final part, lower-cased and cut to
/// eight characters. `david.e.haynes@example.ac.uk` becomes `dehaynes`.
#[must_use]
pub fn login_from_email(addr: &str) -> String {
    let local = addr.split('@').next().unwrap_or(addr);
    let parts: Vec<&str> = local.split('.').filter(|p| !p.is_empty()).collect();
    let mut handle = String::new();
    if let Some((last, leading)) = parts.split_last() {
        for part in leading {
            handle.extend(part.chars().next());
        }
        handle.push_str(last);
    }
    let handle = handle.to_lowercase();
    match handle.char_indices().nth(8) {
        Some((idx, _)) => handle[..idx].to_string(),
        None => handle,
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Attaches a (pre-hashed) password to a registration.
///
/// The event does not move the registration's state; password changes are
/// legal at any point in the lifecycle, including after completion.
///
/// # Errors
///
/// Returns the underlying [`LedgerError`] when the registration is unknown
/// or the append fails.
pub fn new_password(
    ledger: &Ledger,
    registration_uuid: &str,
    actor_uuid: &str,
    bcrypted: &str,
) -> Result<Event, LedgerError> {
    let state = ledger.current_state(registration_uuid)?;
    ledger.append(
        registration_uuid,
        actor_uuid,
        &state.name,
        &[Resource::BcryptedPassword(bcrypted.to_string())],
    )
}
