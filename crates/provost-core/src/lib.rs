//! provost-core - Lifecycle engine for cloud-portal identity provisioning.
//!
//! This crate provides the event-sourced core of the provost portal:
//! artifacts (registrations, memberships, hosts, subscriptions, appliances)
//! advance through named lifecycle states by appending immutable events to a
//! history ledger. Side-effecting work (confirmation email, directory writes)
//! is driven from those transitions by the workers in `provost-daemon`.
//!
//! # Modules
//!
//! - [`ledger`]: Append-only `SQLite` history ledger (artifacts, events,
//!   states, resources)
//! - [`fsm`]: Static state catalogue, one namespace per artifact type
//! - [`resource`]: Typed side-data attached to ledger events
//! - [`directory`]: LDAP directory records, LDIF parsing and the record
//!   pattern classifier
//! - [`config`]: Portal configuration (TOML)
//! - [`registration`]: Registration-level ledger operations
//! - [`membership`]: Organisation membership operations

pub mod config;
pub mod directory;
pub mod fsm;
pub mod ledger;
pub mod membership;
pub mod registration;
pub mod resource;

pub use fsm::ArtifactKind;
pub use ledger::{Actor, ActorKind, ArtifactSummary, Event, Ledger, LedgerError, State};
pub use resource::{Resource, ResourceKind};
