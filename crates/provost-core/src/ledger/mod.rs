//! Append-only history ledger.
//!
//! Every artifact owns an ordered sequence of immutable events ("touches"):
//! who moved it, to which state, when, and with what attached resources.
//! Creation is the only mutation history permits; the current state of an
//! artifact is always the state of its latest event.
//!
//! # Example
//!
//! ```rust
//! use provost_core::fsm::registration;
//! use provost_core::{ArtifactKind, Ledger, Resource};
//!
//! # fn example() -> Result<(), provost_core::LedgerError> {
//! let ledger = Ledger::in_memory()?;
//! let controller = ledger.register_component("identity.controller")?;
//!
//! let reg = ledger.create_artifact(
//!     ArtifactKind::Registration,
//!     &controller.uuid,
//!     registration::PRE_REGISTRATION_PERSON,
//!     &[Resource::EmailAddress("new.user@example.ac.uk".into())],
//! )?;
//!
//! assert_eq!(
//!     ledger.current_state(&reg.uuid)?.name,
//!     registration::PRE_REGISTRATION_PERSON
//! );
//! # Ok(())
//! # }
//! ```

mod storage;


pub use storage::{Actor, ActorKind, ArtifactSummary, Event, Ledger, LedgerError, State};
