//! `SQLite`-backed history ledger implementation.
//!
//! The ledger uses `SQLite` with WAL mode. One [`Ledger`] handle wraps a
//! single connection behind a mutex and is cheap to clone across worker
//! tasks; every append runs in its own transaction, so no task ever observes
//! a half-written event.

// SQLite returns i64 for row IDs; they're always non-negative here.
// Timestamps in nanoseconds won't overflow i64 until the year 2262.
// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(clippy::cast_sign_loss, clippy::missing_panics_doc)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::fsm::{self, ArtifactKind};
use crate::resource::{Resource, ResourceKind};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A unique constraint was violated, e.g. a duplicate email address.
    /// The enclosing transaction has been rolled back; the caller may retry
    /// on a later scan cycle.
    #[error("constraint violated: {detail}")]
    Constraint {
        /// Description from the database driver.
        detail: String,
    },

    /// No artifact with the given UUID.
    #[error("artifact not found: {uuid}")]
    ArtifactNotFound {
        /// The UUID that was looked up.
        uuid: String,
    },

    /// No actor with the given UUID.
    #[error("actor not found: {uuid}")]
    ActorNotFound {
        /// The UUID that was looked up.
        uuid: String,
    },

    /// The artifact exists but has no events.
    #[error("artifact {uuid} has an empty history")]
    EmptyHistory {
        /// The artifact's UUID.
        uuid: String,
    },

    /// The requested state is not in the artifact type's catalogue.
    #[error("unknown state {name} in fsm {fsm}")]
    UnknownState {
        /// State namespace.
        fsm: String,
        /// State name.
        name: String,
    },

    /// The requested state is not reachable from the artifact's current
    /// state.
    #[error("invalid transition in {fsm}: {from} -> {to}")]
    InvalidTransition {
        /// State namespace.
        fsm: String,
        /// Current state name.
        from: String,
        /// Requested state name.
        to: String,
    },

    /// A stored row could not be interpreted.
    #[error("malformed ledger row: {detail}")]
    Malformed {
        /// What failed to parse.
        detail: String,
    },
}

/// Who performed a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    /// A person using the portal.
    User,
    /// A system component, e.g. the identity controller.
    Component,
}

impl ActorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Component => "component",
        }
    }
}

/// An actor recorded against ledger events. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Opaque identifier.
    pub uuid: String,
    /// Login handle for users, well-known name for components. May be
    /// absent for system actors created ad hoc.
    pub handle: Option<String>,
    /// User or component.
    pub kind: ActorKind,
}

/// A `(namespace, name)` state pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    /// The artifact type's namespace.
    pub fsm: String,
    /// The state name within that namespace.
    pub name: String,
}

/// One immutable lifecycle transition ("touch") in an artifact's history.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Ledger-assigned sequence ID.
    pub id: u64,
    /// Owning artifact's UUID.
    pub artifact: String,
    /// Acting actor's UUID.
    pub actor: String,
    /// The state this event moved the artifact to.
    pub state: State,
    /// Event timestamp. Non-decreasing within one artifact's history.
    pub at: DateTime<Utc>,
    /// Resources produced by this event.
    pub resources: Vec<Resource>,
}

/// An artifact row without its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    /// Opaque identifier (hex, no hyphens).
    pub uuid: String,
    /// The artifact's type.
    pub kind: ArtifactKind,
    /// Schema-version tag recorded at creation.
    pub model: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// The append-only history ledger.
///
/// Cloning a `Ledger` clones the shared connection handle; all clones see
/// the same database.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

fn map_sqlite(e: rusqlite::Error) -> LedgerError {
    match &e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            LedgerError::Constraint {
                detail: msg.clone().unwrap_or_else(|| f.to_string()),
            }
        }
        _ => LedgerError::Database(e),
    }
}

impl Ledger {
    /// Opens or creates a ledger at the specified path.
    ///
    /// The schema is applied and the state catalogue seeded on every open;
    /// both are idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(SCHEMA_SQL)?;
        // Seed the state catalogue.
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO states (fsm, name) VALUES (?1, ?2)")?;
        for (fsm, name) in fsm::catalogue() {
            stmt.execute(params![fsm, name])?;
        }
        Ok(())
    }

    /// Registers (or returns the existing) system component with `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn register_component(&self, handle: &str) -> Result<Actor, LedgerError> {
        self.register_actor(Some(handle), ActorKind::Component)
    }

    /// Registers (or returns the existing) user with `handle`. Pass `None`
    /// for an anonymous actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn register_user(&self, handle: Option<&str>) -> Result<Actor, LedgerError> {
        self.register_actor(handle, ActorKind::User)
    }

    fn register_actor(
        &self,
        handle: Option<&str>,
        kind: ActorKind,
    ) -> Result<Actor, LedgerError> {
        let conn = self.conn.lock().unwrap();
        if let Some(h) = handle {
            let existing = conn
                .query_row(
                    "SELECT uuid, handle, kind FROM actors WHERE handle = ?1",
                    params![h],
                    row_to_actor,
                )
                .optional()?;
            if let Some(actor) = existing {
                return actor;
            }
        }
        let uuid = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO actors (uuid, handle, kind) VALUES (?1, ?2, ?3)",
            params![uuid, handle, kind.as_str()],
        )
        .map_err(map_sqlite)?;
        Ok(Actor {
            uuid,
            handle: handle.map(str::to_string),
            kind,
        })
    }

    /// Looks up an actor by UUID.
    ///
    /// # Errors
    ///
    /// Returns `ActorNotFound` if no such actor exists.
    pub fn actor(&self, uuid: &str) -> Result<Actor, LedgerError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT uuid, handle, kind FROM actors WHERE uuid = ?1",
            params![uuid],
            row_to_actor,
        )
        .optional()?
        .unwrap_or_else(|| {
            Err(LedgerError::ActorNotFound {
                uuid: uuid.to_string(),
            })
        })
    }

    /// Creates an artifact together with its first event, atomically.
    ///
    /// The initial state may be any state in the artifact type's catalogue.
    ///
    /// # Errors
    ///
    /// Returns `UnknownState` for an uncatalogued initial state,
    /// `ActorNotFound` for an unknown actor, or `Constraint` when an
    /// attached resource collides with an existing unique value.
    pub fn create_artifact(
        &self,
        kind: ArtifactKind,
        actor_uuid: &str,
        state_name: &str,
        resources: &[Resource],
    ) -> Result<ArtifactSummary, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let state_id = lookup_state_id(&tx, kind.fsm_name(), state_name)?;
        let actor_id = lookup_actor_id(&tx, actor_uuid)?;

        let uuid = Uuid::new_v4().simple().to_string();
        let model = env!("CARGO_PKG_VERSION");
        let at_ns = now_ns();
        tx.execute(
            "INSERT INTO artifacts (uuid, kind, model, created_at_ns) VALUES (?1, ?2, ?3, ?4)",
            params![uuid, kind.as_str(), model, at_ns],
        )
        .map_err(map_sqlite)?;
        let artifact_id = tx.last_insert_rowid();

        insert_event(&tx, artifact_id, actor_id, state_id, at_ns, resources)?;
        tx.commit()?;
        debug!(artifact = %uuid, kind = %kind, state = state_name, "artifact created");

        Ok(ArtifactSummary {
            uuid,
            kind,
            model: model.to_string(),
            created: from_ns(at_ns),
        })
    }

    /// Appends an event to an artifact's history.
    ///
    /// The transition is validated against the state catalogue; the event
    /// timestamp is clamped so per-artifact history stays non-decreasing
    /// even across wall-clock regression. Event and resources are inserted
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when `state_name` is not reachable from
    /// the artifact's current state, `UnknownState`/`ActorNotFound`/
    /// `ArtifactNotFound` for unknown references, or `Constraint` when an
    /// attached resource collides with an existing unique value (the
    /// transaction is rolled back; nothing is appended).
    pub fn append(
        &self,
        artifact_uuid: &str,
        actor_uuid: &str,
        state_name: &str,
        resources: &[Resource],
    ) -> Result<Event, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (artifact_id, kind) = lookup_artifact(&tx, artifact_uuid)?;
        let fsm_name = kind.fsm_name();
        let state_id = lookup_state_id(&tx, fsm_name, state_name)?;
        let actor_id = lookup_actor_id(&tx, actor_uuid)?;

        let mut at_ns = now_ns();
        if let Some((from, last_ns)) = latest_state_row(&tx, artifact_id)? {
            if !fsm::can_transition(fsm_name, &from, state_name) {
                return Err(LedgerError::InvalidTransition {
                    fsm: fsm_name.to_string(),
                    from,
                    to: state_name.to_string(),
                });
            }
            at_ns = at_ns.max(last_ns);
        }

        let event_id = insert_event(&tx, artifact_id, actor_id, state_id, at_ns, resources)?;
        tx.commit()?;
        debug!(artifact = artifact_uuid, state = state_name, "event appended");

        Ok(Event {
            id: event_id as u64,
            artifact: artifact_uuid.to_string(),
            actor: actor_uuid.to_string(),
            state: State {
                fsm: fsm_name.to_string(),
                name: state_name.to_string(),
            },
            at: from_ns(at_ns),
            resources: resources.to_vec(),
        })
    }

    /// Returns the state of the artifact's most recent event.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` for an unknown UUID and `EmptyHistory`
    /// when the artifact has no events.
    pub fn current_state(&self, artifact_uuid: &str) -> Result<State, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let (artifact_id, kind) = lookup_artifact(&conn, artifact_uuid)?;
        match latest_state_row(&conn, artifact_id)? {
            Some((name, _)) => Ok(State {
                fsm: kind.fsm_name().to_string(),
                name,
            }),
            None => Err(LedgerError::EmptyHistory {
                uuid: artifact_uuid.to_string(),
            }),
        }
    }

    /// Returns the newest resource of `kind` in the artifact's history, or
    /// `None` if no event ever produced one. Latest wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is
    /// malformed.
    pub fn latest_resource(
        &self,
        artifact_uuid: &str,
        kind: ResourceKind,
    ) -> Result<Option<Resource>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let (artifact_id, _) = lookup_artifact(&conn, artifact_uuid)?;
        let value: Option<String> = conn
            .query_row(
                "SELECT r.value FROM resources r
                 JOIN events e ON e.id = r.event_id
                 WHERE e.artifact_id = ?1 AND r.kind = ?2
                 ORDER BY e.at_ns DESC, e.id DESC, r.id DESC
                 LIMIT 1",
                params![artifact_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                serde_json::from_str(&v).map_err(|e| LedgerError::Malformed {
                    detail: format!("resource payload: {e}"),
                })
            })
            .transpose()
    }

    /// Returns the artifact's full history in chronological order.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` for an unknown UUID.
    pub fn events(&self, artifact_uuid: &str) -> Result<Vec<Event>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let (artifact_id, _) = lookup_artifact(&conn, artifact_uuid)?;

        let mut stmt = conn.prepare(
            "SELECT e.id, a.uuid, s.fsm, s.name, e.at_ns
             FROM events e
             JOIN actors a ON a.id = e.actor_id
             JOIN states s ON s.id = e.state_id
             WHERE e.artifact_id = ?1
             ORDER BY e.at_ns ASC, e.id ASC",
        )?;
        let rows = stmt
            .query_map(params![artifact_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut res_stmt = conn.prepare(
            "SELECT value FROM resources WHERE event_id = ?1 ORDER BY id ASC",
        )?;
        let mut events = Vec::with_capacity(rows.len());
        for (id, actor, fsm_name, name, at_ns) in rows {
            let resources = res_stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|v| {
                    serde_json::from_str(&v).map_err(|e| LedgerError::Malformed {
                        detail: format!("resource payload: {e}"),
                    })
                })
                .collect::<Result<Vec<Resource>, _>>()?;
            events.push(Event {
                id: id as u64,
                artifact: artifact_uuid.to_string(),
                actor,
                state: State {
                    fsm: fsm_name,
                    name,
                },
                at: from_ns(at_ns),
                resources,
            });
        }
        Ok(events)
    }

    /// Looks up an artifact row by UUID.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` for an unknown UUID.
    pub fn artifact(&self, uuid: &str) -> Result<ArtifactSummary, LedgerError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT uuid, kind, model, created_at_ns FROM artifacts WHERE uuid = ?1",
            params![uuid],
            row_to_summary,
        )
        .optional()?
        .unwrap_or_else(|| {
            Err(LedgerError::ArtifactNotFound {
                uuid: uuid.to_string(),
            })
        })
    }

    /// Returns all artifacts of `kind` whose latest event is in state
    /// `state_name`. This is the scan-rule query primitive: a full scan of
    /// the artifact table, not an incremental one.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_latest_state(
        &self,
        kind: ArtifactKind,
        state_name: &str,
    ) -> Result<Vec<ArtifactSummary>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT a.uuid, a.kind, a.model, a.created_at_ns
             FROM artifacts a
             JOIN events e ON e.artifact_id = a.id
             JOIN states s ON s.id = e.state_id
             WHERE a.kind = ?1 AND s.name = ?2
               AND e.id = (SELECT e2.id FROM events e2
                           WHERE e2.artifact_id = a.id
                           ORDER BY e2.at_ns DESC, e2.id DESC
                           LIMIT 1)
             ORDER BY a.id ASC",
        )?;
        let summaries = stmt
            .query_map(params![kind.as_str(), state_name], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Returns all artifacts of `kind`, regardless of state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_kind(&self, kind: ArtifactKind) -> Result<Vec<ArtifactSummary>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT uuid, kind, model, created_at_ns FROM artifacts
             WHERE kind = ?1 ORDER BY id ASC",
        )?;
        let summaries = stmt
            .query_map(params![kind.as_str()], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }
}

type ActorRow = Result<Actor, LedgerError>;

fn row_to_actor(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActorRow> {
    let uuid: String = row.get(0)?;
    let handle: Option<String> = row.get(1)?;
    let kind: String = row.get(2)?;
    Ok(match kind.as_str() {
        "user" => Ok(Actor {
            uuid,
            handle,
            kind: ActorKind::User,
        }),
        "component" => Ok(Actor {
            uuid,
            handle,
            kind: ActorKind::Component,
        }),
        other => Err(LedgerError::Malformed {
            detail: format!("actor kind: {other}"),
        }),
    })
}

type SummaryRow = Result<ArtifactSummary, LedgerError>;

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SummaryRow> {
    let uuid: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let model: String = row.get(2)?;
    let created_at_ns: i64 = row.get(3)?;
    Ok(kind
        .parse::<ArtifactKind>()
        .map_err(|e| LedgerError::Malformed {
            detail: e.to_string(),
        })
        .map(|kind| ArtifactSummary {
            uuid,
            kind,
            model,
            created: from_ns(created_at_ns),
        }))
}

fn lookup_artifact(
    conn: &Connection,
    uuid: &str,
) -> Result<(i64, ArtifactKind), LedgerError> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, kind FROM artifacts WHERE uuid = ?1",
            params![uuid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (id, kind) = row.ok_or_else(|| LedgerError::ArtifactNotFound {
        uuid: uuid.to_string(),
    })?;
    let kind = kind
        .parse::<ArtifactKind>()
        .map_err(|e| LedgerError::Malformed {
            detail: e.to_string(),
        })?;
    Ok((id, kind))
}

fn lookup_actor_id(conn: &Connection, uuid: &str) -> Result<i64, LedgerError> {
    conn.query_row(
        "SELECT id FROM actors WHERE uuid = ?1",
        params![uuid],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::ActorNotFound {
        uuid: uuid.to_string(),
    })
}

fn lookup_state_id(conn: &Connection, fsm: &str, name: &str) -> Result<i64, LedgerError> {
    conn.query_row(
        "SELECT id FROM states WHERE fsm = ?1 AND name = ?2",
        params![fsm, name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::UnknownState {
        fsm: fsm.to_string(),
        name: name.to_string(),
    })
}

fn latest_state_row(
    conn: &Connection,
    artifact_id: i64,
) -> Result<Option<(String, i64)>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT s.name, e.at_ns FROM events e
             JOIN states s ON s.id = e.state_id
             WHERE e.artifact_id = ?1
             ORDER BY e.at_ns DESC, e.id DESC
             LIMIT 1",
            params![artifact_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn insert_event(
    conn: &Connection,
    artifact_id: i64,
    actor_id: i64,
    state_id: i64,
    at_ns: i64,
    resources: &[Resource],
) -> Result<i64, LedgerError> {
    conn.execute(
        "INSERT INTO events (artifact_id, actor_id, state_id, at_ns)
         VALUES (?1, ?2, ?3, ?4)",
        params![artifact_id, actor_id, state_id, at_ns],
    )
    .map_err(map_sqlite)?;
    let event_id = conn.last_insert_rowid();
    let mut stmt = conn
        .prepare("INSERT INTO resources (event_id, kind, value) VALUES (?1, ?2, ?3)")?;
    for resource in resources {
        let value = serde_json::to_string(resource).map_err(|e| LedgerError::Malformed {
            detail: format!("resource payload: {e}"),
        })?;
        stmt.execute(params![event_id, resource.kind().as_str(), value])
            .map_err(map_sqlite)?;
    }
    Ok(event_id)
}
